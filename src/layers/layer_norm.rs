//! Layer Normalization
//!
//! Normalizes each row of the last dimension to zero mean and unit variance,
//! then applies a learned scale (`weight`) and shift (`bias`).
//!
//! ## Forward Pass
//!
//! ```text
//! mean   = sum(x) / C
//! var    = sum((x - mean)²) / C          (biased)
//! x_norm = (x - mean) / √(var + ε)
//! y      = weight * x_norm + bias
//! ```
//!
//! ## Backward Pass
//!
//! ```text
//! grad_weight = sum over rows(grad_y * x_norm)
//! grad_bias   = sum over rows(grad_y)
//! g           = grad_y * weight
//! grad_x      = (g - mean(g) - x_norm * mean(g * x_norm)) / √(var + ε)
//! ```
//!
//! The two mean terms account for every element of a row feeding the row's
//! mean and variance.

use crate::params::{join, Parameters};
use crate::tensor::Tensor;
use rayon::prelude::*;

/// Epsilon added to the variance
pub const LN_EPS: f32 = 1e-5;

/// Layer normalization over the last dimension
#[derive(Debug, Clone)]
pub struct LayerNorm {
    pub weight: Tensor,
    pub bias: Tensor,
    pub eps: f32,
}

impl LayerNorm {
    /// Identity-initialized layer norm (weight 1, bias 0)
    pub fn new(dim: usize) -> Self {
        Self {
            weight: Tensor::full(vec![dim], 1.0),
            bias: Tensor::zeros(vec![dim]),
            eps: LN_EPS,
        }
    }

    pub fn reset_parameters(&mut self) {
        self.weight.data.iter_mut().for_each(|w| *w = 1.0);
        self.bias.data.iter_mut().for_each(|b| *b = 0.0);
    }

    /// Forward pass over `[..., C]`
    pub fn forward(&self, x: &Tensor) -> (Tensor, LayerNormCache) {
        let cols = x.last_dim();
        assert_eq!(cols, self.weight.len(), "layer norm width mismatch");
        let rows = x.rows();

        let mut x_norm = vec![0.0; x.len()];
        let mut inv_std = vec![0.0; rows];
        let mut y = vec![0.0; x.len()];

        x_norm
            .par_chunks_mut(cols)
            .zip(y.par_chunks_mut(cols))
            .zip(inv_std.par_iter_mut())
            .zip(x.data.par_chunks(cols))
            .for_each(|(((xn, yr), is), xr)| {
                let n = cols as f32;
                let mean = xr.iter().sum::<f32>() / n;
                let var = xr.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
                let r = 1.0 / (var + self.eps).sqrt();
                *is = r;
                for (i, (&xv, xo)) in xr.iter().zip(xn.iter_mut()).enumerate() {
                    *xo = (xv - mean) * r;
                    yr[i] = *xo * self.weight.data[i] + self.bias.data[i];
                }
            });

        let cache = LayerNormCache {
            x_norm: Tensor::new(x_norm, x.shape.clone()),
            inv_std,
        };
        (Tensor::new(y, x.shape.clone()), cache)
    }

    /// Backward pass, returning the input gradient and parameter gradients
    pub fn backward(&self, grad_out: &Tensor, cache: &LayerNormCache) -> (Tensor, LayerNormGradients) {
        let cols = grad_out.last_dim();
        let n = cols as f32;

        let mut grad_x = vec![0.0; grad_out.len()];
        grad_x
            .par_chunks_mut(cols)
            .zip(grad_out.data.par_chunks(cols))
            .zip(cache.x_norm.data.par_chunks(cols))
            .zip(cache.inv_std.par_iter())
            .for_each(|(((gx, gy), xn), &r)| {
                let mut mean_g = 0.0;
                let mut mean_gx = 0.0;
                for i in 0..cols {
                    let g = gy[i] * self.weight.data[i];
                    mean_g += g;
                    mean_gx += g * xn[i];
                }
                mean_g /= n;
                mean_gx /= n;
                for i in 0..cols {
                    let g = gy[i] * self.weight.data[i];
                    gx[i] = (g - mean_g - xn[i] * mean_gx) * r;
                }
            });

        let mut weight = vec![0.0; cols];
        let mut bias = vec![0.0; cols];
        for (gy, xn) in grad_out.data.chunks(cols).zip(cache.x_norm.data.chunks(cols)) {
            for i in 0..cols {
                weight[i] += gy[i] * xn[i];
                bias[i] += gy[i];
            }
        }

        (
            Tensor::new(grad_x, grad_out.shape.clone()),
            LayerNormGradients {
                weight: Tensor::new(weight, vec![cols]),
                bias: Tensor::new(bias, vec![cols]),
            },
        )
    }
}

impl Parameters for LayerNorm {
    fn visit<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>) {
        out.push((join(prefix, "weight"), &self.weight));
        out.push((join(prefix, "bias"), &self.bias));
    }

    fn visit_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, &'a mut Tensor)>) {
        out.push((join(prefix, "weight"), &mut self.weight));
        out.push((join(prefix, "bias"), &mut self.bias));
    }
}

/// Normalized input and per-row `1/√(var+ε)` saved by the forward pass
#[derive(Debug, Clone)]
pub struct LayerNormCache {
    pub x_norm: Tensor,
    pub inv_std: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct LayerNormGradients {
    pub weight: Tensor,
    pub bias: Tensor,
}

impl Parameters for LayerNormGradients {
    fn visit<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>) {
        out.push((join(prefix, "weight"), &self.weight));
        out.push((join(prefix, "bias"), &self.bias));
    }

    fn visit_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, &'a mut Tensor)>) {
        out.push((join(prefix, "weight"), &mut self.weight));
        out.push((join(prefix, "bias"), &mut self.bias));
    }
}
