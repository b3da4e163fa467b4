//! Pretrained Weight Import
//!
//! Loads the published GPT-2 checkpoints into a [`GPT`].
//!
//! ## Naming and Layout
//!
//! Source tensors are addressed by dotted names in the `GPT2LMHeadModel`
//! convention (`transformer.h.0.attn.c_attn.weight`, `lm_head.weight`, ...),
//! the same names [`Parameters`] produces. Four weights are stored
//! transposed in the published files, `[in_features, out_features]`, while
//! linear layers here keep `[out_features, in_features]`:
//!
//! ```text
//! attn.c_attn.weight   attn.c_proj.weight   mlp.c_fc.weight   mlp.c_proj.weight
//! ```
//!
//! Those are transposed on copy; everything else is copied as is. The
//! attention mask buffers some checkpoints carry (`.attn.bias`,
//! `.attn.masked_bias`) are derived, not learned, and are ignored.
//!
//! ## All or Nothing
//!
//! The full name set and every shape are checked before the first tensor
//! is written, so a failed import leaves the model untouched.

use crate::config::ModelFamily;
use crate::error::{GptError, Mismatch, Result};
use crate::model::{LM_HEAD_WEIGHT, GPT, WTE_WEIGHT};
use crate::params::{Parameters, StateDict};
use crate::tensor::Tensor;
use safetensors::{Dtype, SafeTensors};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Weights stored `[in, out]` in the published checkpoints
pub const TRANSPOSED: [&str; 4] = [
    "attn.c_attn.weight",
    "attn.c_proj.weight",
    "mlp.c_fc.weight",
    "mlp.c_proj.weight",
];

/// Buffers present in some checkpoints that are not parameters
const IGNORED_SUFFIXES: [&str; 2] = [".attn.bias", ".attn.masked_bias"];

fn is_transposed(name: &str) -> bool {
    TRANSPOSED.iter().any(|suffix| name.ends_with(suffix))
}

fn is_ignored(name: &str) -> bool {
    IGNORED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Provider of named weight tensors for a model family
pub trait WeightSource {
    fn load(&self, family: ModelFamily) -> Result<StateDict>;
}

/// An in-memory state dict serves every family as is
impl WeightSource for StateDict {
    fn load(&self, _family: ModelFamily) -> Result<StateDict> {
        Ok(self.clone())
    }
}

/// Reads `<root>/<family>/model.safetensors`
///
/// Hub checkpoints name tensors without the `transformer.` prefix and omit
/// the tied `lm_head.weight`; both are normalized here.
#[derive(Debug, Clone)]
pub struct SafetensorsDir {
    root: PathBuf,
}

impl SafetensorsDir {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, family: ModelFamily) -> PathBuf {
        self.root.join(family.name()).join("model.safetensors")
    }
}

impl WeightSource for SafetensorsDir {
    fn load(&self, family: ModelFamily) -> Result<StateDict> {
        read_safetensors(&self.path_for(family))
    }
}

/// Parse a safetensors file into a normalized state dict (f32 only)
pub fn read_safetensors(path: &Path) -> Result<StateDict> {
    let bytes = fs::read(path)?;
    let st = SafeTensors::deserialize(&bytes)
        .map_err(|e| GptError::Format(format!("{}: {e}", path.display())))?;

    let mut sd = StateDict::new();
    for (name, view) in st.tensors() {
        if is_ignored(&name) {
            continue;
        }
        if view.dtype() != Dtype::F32 {
            return Err(GptError::Format(format!(
                "`{name}` has dtype {:?}, only F32 is supported",
                view.dtype()
            )));
        }
        let data = view
            .data()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let name = if name == LM_HEAD_WEIGHT || name.starts_with("transformer.") {
            name
        } else {
            format!("transformer.{name}")
        };
        sd.insert(name, Tensor::new(data, view.shape().to_vec()));
    }

    if !sd.contains_key(LM_HEAD_WEIGHT) {
        if let Some(wte) = sd.get(WTE_WEIGHT).cloned() {
            sd.insert(LM_HEAD_WEIGHT.to_string(), wte);
        }
    }
    debug!("read {} tensors from {}", sd.len(), path.display());
    Ok(sd)
}

/// Check a source state dict against the expected `(name, shape)` list
///
/// Shapes of transposed weights are compared, and reported, after
/// transposition.
pub fn validate_state_dict(expected: &[(String, Vec<usize>)], source: &StateDict) -> Result<()> {
    let expected_names: BTreeSet<&str> = expected.iter().map(|(n, _)| n.as_str()).collect();
    let source_names: BTreeSet<&str> = source
        .keys()
        .map(String::as_str)
        .filter(|n| !is_ignored(n))
        .collect();

    let missing: Vec<String> = expected_names
        .difference(&source_names)
        .map(|n| n.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(Mismatch::MissingKeys(missing).into());
    }
    let unexpected: Vec<String> = source_names
        .difference(&expected_names)
        .map(|n| n.to_string())
        .collect();
    if !unexpected.is_empty() {
        return Err(Mismatch::UnexpectedKeys(unexpected).into());
    }

    for (name, shape) in expected {
        let tensor = &source[name];
        let found: Vec<usize> = if is_transposed(name) {
            tensor.shape.iter().rev().copied().collect()
        } else {
            tensor.shape.clone()
        };
        if &found != shape {
            return Err(Mismatch::Shape {
                name: name.clone(),
                expected: shape.clone(),
                found,
            }
            .into());
        }
    }
    Ok(())
}

impl GPT {
    /// Copy every tensor of `source` into the model.
    ///
    /// Fails with [`GptError::ShapeMismatch`] without modifying anything if
    /// the name sets or any shape disagree.
    pub fn import_state_dict(&mut self, source: &StateDict) -> Result<()> {
        validate_state_dict(&GPT::state_dict_shapes(&self.config), source)?;

        for (name, dest) in self.named_parameters_mut() {
            let src = &source[&name];
            dest.data = if is_transposed(&name) {
                src.transpose(0, 1).data
            } else {
                src.data.clone()
            };
        }
        // lm_head.weight shares storage with wte and is written last
        self.wte.data.clone_from(&source[LM_HEAD_WEIGHT].data);
        Ok(())
    }

    /// Build a model from a published checkpoint
    pub fn from_pretrained(family: ModelFamily, source: &dyn WeightSource) -> Result<Self> {
        info!("loading weights from pretrained gpt: {family}");
        let config = family.config();
        let sd = source.load(family)?;
        // validate before allocating the model
        validate_state_dict(&GPT::state_dict_shapes(&config), &sd)?;

        let mut model = GPT::zeroed(config)?;
        model.import_state_dict(&sd)?;
        info!(
            "imported {} tensors ({} parameters)",
            sd.len(),
            model.num_parameters()
        );
        Ok(model)
    }
}
