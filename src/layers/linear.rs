//! Linear Layer (Fully Connected)
//!
//! Performs the affine map `y = x @ W^T + b`.
//!
//! ## Shapes
//!
//! ```text
//! Input:  x [..., in_features]
//! Weight: W [out_features, in_features]
//! Bias:   b [out_features]
//! Output: y [..., out_features]
//! ```
//!
//! Leading dimensions are flattened into rows, so `[B, T, C]` activations go
//! through the same 2D product as `[N, C]` ones.
//!
//! ## Backward Pass
//!
//! ```text
//! grad_W = grad_y^T @ x
//! grad_b = sum(grad_y, over rows)
//! grad_x = grad_y @ W
//! ```
//!
//! ## Initialization
//!
//! Weights are drawn from N(0, 0.02). Layers tagged
//! [`InitScale::ResidualProjection`] write into the residual stream, which
//! sums `2 * n_layer` such contributions, so their std is further scaled by
//! `(2 * n_layer)^-0.5`. Biases start at zero.

use crate::error::{GptError, Result};
use crate::params::{join, Parameters};
use crate::tensor::Tensor;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Standard deviation for linear and embedding weights
pub const INIT_STD: f32 = 0.02;

/// Draw `len` samples from N(0, std)
pub fn normal_init<R: Rng + ?Sized>(len: usize, std: f32, rng: &mut R) -> Result<Vec<f32>> {
    let normal = Normal::new(0.0f32, std)
        .map_err(|e| GptError::ConfigInvalid(format!("init std {std}: {e}")))?;
    Ok((0..len).map(|_| normal.sample(rng)).collect())
}

/// Initialization tag carried by every linear layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitScale {
    /// N(0, 0.02)
    Standard,
    /// N(0, 0.02 * (2 * n_layer)^-0.5), for projections back into the residual stream
    ResidualProjection,
}

impl InitScale {
    pub fn std(self, n_layer: usize) -> f32 {
        match self {
            InitScale::Standard => INIT_STD,
            InitScale::ResidualProjection => INIT_STD * (2.0 * n_layer as f32).powf(-0.5),
        }
    }
}

/// Fully connected layer with weight stored `[out_features, in_features]`
#[derive(Debug, Clone)]
pub struct Linear {
    pub weight: Tensor,
    pub bias: Tensor,
    pub init: InitScale,
}

impl Linear {
    /// Zero-initialized layer; call [`Linear::reset_parameters`] before training
    pub fn new(in_features: usize, out_features: usize, init: InitScale) -> Self {
        Self {
            weight: Tensor::zeros(vec![out_features, in_features]),
            bias: Tensor::zeros(vec![out_features]),
            init,
        }
    }

    pub fn in_features(&self) -> usize {
        self.weight.shape[1]
    }

    pub fn out_features(&self) -> usize {
        self.weight.shape[0]
    }

    /// Redraw the weights according to the layer's [`InitScale`] and zero the bias
    pub fn reset_parameters<R: Rng + ?Sized>(&mut self, n_layer: usize, rng: &mut R) -> Result<()> {
        let std = self.init.std(n_layer);
        self.weight.data = normal_init(self.weight.len(), std, rng)?;
        self.bias.data.iter_mut().for_each(|b| *b = 0.0);
        Ok(())
    }

    /// Forward pass, caching the input for backward
    pub fn forward(&self, x: &Tensor) -> (Tensor, LinearCache) {
        let in_features = self.in_features();
        assert_eq!(
            x.last_dim(),
            in_features,
            "linear expects last dim {}, got shape {:?}",
            in_features,
            x.shape
        );
        let rows = x.rows();
        let x2d = x.reshape(&[rows, in_features]);
        let y2d = x2d.matmul_t(&self.weight).add_row(&self.bias);

        let mut out_shape = x.shape.clone();
        if let Some(last) = out_shape.last_mut() {
            *last = self.out_features();
        }
        (y2d.into_shape(&out_shape), LinearCache { x: x2d, in_shape: x.shape.clone() })
    }

    /// Backward pass
    ///
    /// Returns the gradient w.r.t. the input (in the input's original shape)
    /// and the parameter gradients.
    pub fn backward(&self, grad_out: &Tensor, cache: &LinearCache) -> (Tensor, LinearGradients) {
        let rows = cache.x.shape[0];
        let g2d = grad_out.reshape(&[rows, self.out_features()]);

        let weight = g2d.transpose(0, 1).matmul(&cache.x);
        let bias = g2d.sum_rows();
        let grad_x = g2d.matmul(&self.weight).into_shape(&cache.in_shape);

        (grad_x, LinearGradients { weight, bias })
    }
}

impl Parameters for Linear {
    fn visit<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>) {
        out.push((join(prefix, "weight"), &self.weight));
        out.push((join(prefix, "bias"), &self.bias));
    }

    fn visit_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, &'a mut Tensor)>) {
        out.push((join(prefix, "weight"), &mut self.weight));
        out.push((join(prefix, "bias"), &mut self.bias));
    }
}

/// Input saved by [`Linear::forward`], flattened to `[rows, in_features]`
#[derive(Debug, Clone)]
pub struct LinearCache {
    pub x: Tensor,
    in_shape: Vec<usize>,
}

/// Parameter gradients of a [`Linear`] layer
#[derive(Debug, Clone)]
pub struct LinearGradients {
    pub weight: Tensor,
    pub bias: Tensor,
}

impl Parameters for LinearGradients {
    fn visit<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>) {
        out.push((join(prefix, "weight"), &self.weight));
        out.push((join(prefix, "bias"), &self.bias));
    }

    fn visit_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, &'a mut Tensor)>) {
        out.push((join(prefix, "weight"), &mut self.weight));
        out.push((join(prefix, "bias"), &mut self.bias));
    }
}
