//! AdamW Optimizer
//!
//! Adam with decoupled weight decay, the standard optimizer for transformer
//! training.
//!
//! ## Algorithm
//!
//! For each parameter θ with gradient g at step t (starting at 1):
//!
//! ```text
//! θ = θ × (1 - α × λ)              decoupled weight decay
//! m = β₁ × m + (1 - β₁) × g        first moment
//! v = β₂ × v + (1 - β₂) × g²       second moment
//! m̂ = m / (1 - β₁^t)               bias correction
//! v̂ = v / (1 - β₂^t)
//! θ = θ - α × m̂ / (√v̂ + ε)
//! ```
//!
//! with α the learning rate, λ the weight decay, β₁ = 0.9, β₂ = 0.95 and
//! ε = 1e-8 for GPT-2 training. The decay applies to every parameter,
//! embeddings, biases and layer norms included.
//!
//! ## State
//!
//! One `(m, v)` pair per parameter tensor, created at zero on the first
//! step and matched to parameters by position in the
//! [`Parameters`] enumeration. Parameters and gradients must enumerate in
//! the same order, which every model/gradient pair in this crate does.
//!
//! The learning rate is plain state: the training loop sets it with
//! [`AdamW::set_lr`] before each step.
//!
//! ## Example
//!
//! ```rust,no_run
//! use nanogpt::optimizer::AdamW;
//! # use nanogpt::{ModelConfig, TokenGrid, GPT};
//! # use rand::{rngs::StdRng, SeedableRng};
//! # let mut model = GPT::new(ModelConfig::tiny(), &mut StdRng::seed_from_u64(0))?;
//! # let idx = TokenGrid::new(vec![1, 2, 3], 1, 3);
//! let mut optimizer = AdamW::new(3e-4, 0.9, 0.95, 1e-8, 0.01);
//! let (logits, cache) = model.forward_with_cache(&idx)?;
//! let grads = model.backward(&logits, &idx, &cache)?;
//! optimizer.step(&mut model, &grads);
//! # Ok::<(), nanogpt::GptError>(())
//! ```

use crate::params::Parameters;
use rayon::prelude::*;

/// Tensors at or below this size are updated on the calling thread
const PARALLEL_THRESHOLD: usize = 1000;

/// First and second moment estimates for one parameter tensor
#[derive(Debug, Clone, PartialEq)]
pub struct Moments {
    pub m: Vec<f32>,
    pub v: Vec<f32>,
}

impl Moments {
    fn zeros(len: usize) -> Self {
        Self {
            m: vec![0.0; len],
            v: vec![0.0; len],
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdamW {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    pub weight_decay: f32,
    /// Number of steps taken
    pub t: usize,
    /// One entry per parameter tensor, empty until the first step
    pub moments: Vec<Moments>,
}

impl AdamW {
    pub fn new(lr: f32, beta1: f32, beta2: f32, eps: f32, weight_decay: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            eps,
            weight_decay,
            t: 0,
            moments: Vec::new(),
        }
    }

    pub fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    /// Apply one update to every tensor of `params` from the matching tensor of `grads`
    ///
    /// # Panics
    ///
    /// Panics if `params` and `grads` don't enumerate the same tensor shapes.
    pub fn step<P, G>(&mut self, params: &mut P, grads: &G)
    where
        P: Parameters + ?Sized,
        G: Parameters + ?Sized,
    {
        let mut params = params.named_parameters_mut();
        let grads = grads.named_parameters();
        assert_eq!(
            params.len(),
            grads.len(),
            "optimizer got {} parameters but {} gradients",
            params.len(),
            grads.len()
        );
        if self.moments.is_empty() {
            self.moments = params.iter().map(|(_, p)| Moments::zeros(p.len())).collect();
        }

        self.t += 1;
        let t = self.t as i32;
        let (lr, beta1, beta2, eps) = (self.lr, self.beta1, self.beta2, self.eps);
        let decay = 1.0 - lr * self.weight_decay;
        let bias_correction1 = 1.0 - beta1.powi(t);
        let bias_correction2 = 1.0 - beta2.powi(t);

        let update = |p: &mut f32, g: f32, m: &mut f32, v: &mut f32| {
            *p *= decay;
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            let m_hat = *m / bias_correction1;
            let v_hat = *v / bias_correction2;
            *p -= lr * m_hat / (v_hat.sqrt() + eps);
        };

        for (((name, param), (grad_name, grad)), state) in
            params.iter_mut().zip(&grads).zip(&mut self.moments)
        {
            debug_assert_eq!(name, grad_name);
            assert_eq!(param.shape, grad.shape, "gradient shape for {name}");

            let Moments { m, v } = state;
            if param.len() > PARALLEL_THRESHOLD {
                param
                    .data
                    .par_iter_mut()
                    .zip(grad.data.par_iter())
                    .zip(m.par_iter_mut().zip(v.par_iter_mut()))
                    .for_each(|((p, &g), (m, v))| update(p, g, m, v));
            } else {
                let elements = param.data.iter_mut().zip(&grad.data);
                for ((p, &g), (m, v)) in elements.zip(m.iter_mut().zip(v.iter_mut())) {
                    update(p, g, m, v);
                }
            }
        }
    }
}
