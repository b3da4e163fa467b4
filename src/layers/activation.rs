//! GELU Activation
//!
//! The tanh approximation of GELU used by GPT-2:
//!
//! ```text
//! GELU(x) ≈ 0.5 × x × (1 + tanh(√(2/π) × (x + 0.044715 × x³)))
//! ```
//!
//! This is numerically distinct from the exact `x × Φ(x)` form. Published
//! GPT-2 weights were trained with the approximation, so it is the one used
//! here.

use crate::tensor::Tensor;
use rayon::prelude::*;

const SQRT_2_OVER_PI: f32 = 0.797_884_6;
const GELU_COEFF: f32 = 0.044715;

#[inline]
fn gelu(x: f32) -> f32 {
    0.5 * x * (1.0 + (SQRT_2_OVER_PI * (x + GELU_COEFF * x * x * x)).tanh())
}

#[inline]
fn gelu_grad(x: f32) -> f32 {
    let t = (SQRT_2_OVER_PI * (x + GELU_COEFF * x * x * x)).tanh();
    let sech_sq = 1.0 - t * t;
    0.5 * (1.0 + t) + 0.5 * x * sech_sq * SQRT_2_OVER_PI * (1.0 + 3.0 * GELU_COEFF * x * x)
}

/// Apply GELU elementwise
pub fn gelu_forward(x: &Tensor) -> Tensor {
    let data = x.data.par_iter().map(|&v| gelu(v)).collect();
    Tensor::new(data, x.shape.clone())
}

/// Gradient of GELU given the upstream gradient and the original input
pub fn gelu_backward(grad_out: &Tensor, x: &Tensor) -> Tensor {
    let data = x
        .data
        .par_iter()
        .zip(&grad_out.data)
        .map(|(&xv, &g)| g * gelu_grad(xv))
        .collect();
    Tensor::new(data, x.shape.clone())
}
