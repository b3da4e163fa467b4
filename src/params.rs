//! Named Parameter Collections
//!
//! Every trainable component reports the tensors it owns, and those of its
//! children, as a flat list of `(dotted_name, tensor)` pairs. The optimizer,
//! gradient clipping and pretrained-weight import all work from this list
//! rather than knowing the model's structure.
//!
//! Gradient structs implement the same trait with the same names, so a
//! model's parameters and its gradients line up index for index:
//!
//! ```rust,ignore
//! let params = model.named_parameters_mut();
//! let grads = grads.named_parameters();
//! for ((name, p), (grad_name, g)) in params.into_iter().zip(grads) {
//!     debug_assert_eq!(name, grad_name);
//!     // update p from g
//! }
//! ```

use crate::tensor::Tensor;
use std::collections::BTreeMap;

/// Dotted name to tensor, ordered by name
pub type StateDict = BTreeMap<String, Tensor>;

/// Append `name` to a dotted prefix
pub fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// A component that owns named tensors
pub trait Parameters {
    /// Push `(prefix.name, tensor)` for every owned tensor, in a fixed order
    fn visit<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>);

    /// Mutable counterpart of [`Parameters::visit`], same order and names
    fn visit_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, &'a mut Tensor)>);

    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut out = Vec::new();
        self.visit("", &mut out);
        out
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = Vec::new();
        self.visit_mut("", &mut out);
        out
    }

    /// Total number of scalar parameters
    fn num_parameters(&self) -> usize {
        self.named_parameters().iter().map(|(_, t)| t.len()).sum()
    }
}
