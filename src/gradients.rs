//! Gradient Utilities
//!
//! Measuring and clipping the global gradient norm.
//!
//! ## Why Gradient Clipping?
//!
//! An occasional batch produces a very large gradient that can undo many
//! steps of progress in one update. Clipping rescales the whole gradient so
//! its global L2 norm never exceeds a threshold, preserving its direction.
//!
//! ## Algorithm
//!
//! ```text
//! norm = √(Σ g²)                         over every gradient tensor
//! coef = max_norm / (norm + 1e-6)
//! if coef < 1:
//!     g *= coef                          every tensor, same factor
//! return norm                            the norm before clipping
//! ```
//!
//! Both functions work on anything implementing [`Parameters`], normally a
//! [`GptGradients`](crate::model::GptGradients).

use crate::params::Parameters;
use rayon::prelude::*;

/// Added to the norm before dividing, matching the usual clipping formula
const CLIP_EPS: f32 = 1e-6;

/// Global L2 norm over every tensor of `grads`
pub fn compute_grad_norm<P: Parameters + ?Sized>(grads: &P) -> f32 {
    let per_tensor: Vec<f64> = grads
        .named_parameters()
        .par_iter()
        .map(|(_, g)| g.sum_squares() as f64)
        .collect();
    per_tensor.iter().sum::<f64>().sqrt() as f32
}

/// Clip `grads` in place to a global norm of `max_norm`.
///
/// Returns the norm measured before clipping.
pub fn clip_grad_norm<P: Parameters + ?Sized>(grads: &mut P, max_norm: f32) -> f32 {
    let norm = compute_grad_norm(grads);
    let coef = max_norm / (norm + CLIP_EPS);
    if coef < 1.0 {
        for (_, g) in grads.named_parameters_mut() {
            g.scale_(coef);
        }
    }
    norm
}
