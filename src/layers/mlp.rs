//! Feed-Forward Network (MLP)
//!
//! Position-wise two-layer network applied after attention in every block:
//!
//! ```text
//! x [B, T, C] → c_fc [B, T, 4C] → GELU → c_proj [B, T, C]
//! ```
//!
//! Each position is transformed independently; there is no mixing across
//! the sequence here.

use super::activation::{gelu_backward, gelu_forward};
use super::linear::{InitScale, Linear, LinearCache, LinearGradients};
use crate::params::{join, Parameters};
use crate::tensor::Tensor;

#[derive(Debug, Clone)]
pub struct Mlp {
    /// Expansion `C → 4C`
    pub c_fc: Linear,
    /// Contraction `4C → C`, writes into the residual stream
    pub c_proj: Linear,
}

impl Mlp {
    pub fn new(n_embd: usize) -> Self {
        Self {
            c_fc: Linear::new(n_embd, 4 * n_embd, InitScale::Standard),
            c_proj: Linear::new(4 * n_embd, n_embd, InitScale::ResidualProjection),
        }
    }

    pub fn linears_mut(&mut self) -> [&mut Linear; 2] {
        [&mut self.c_fc, &mut self.c_proj]
    }

    pub fn forward(&self, x: &Tensor) -> (Tensor, MlpCache) {
        let (hidden, c_fc) = self.c_fc.forward(x);
        let activated = gelu_forward(&hidden);
        let (out, c_proj) = self.c_proj.forward(&activated);
        (out, MlpCache { c_fc, hidden, c_proj })
    }

    pub fn backward(&self, grad_out: &Tensor, cache: &MlpCache) -> (Tensor, MlpGradients) {
        let (grad_activated, c_proj) = self.c_proj.backward(grad_out, &cache.c_proj);
        let grad_hidden = gelu_backward(&grad_activated, &cache.hidden);
        let (grad_x, c_fc) = self.c_fc.backward(&grad_hidden, &cache.c_fc);
        (grad_x, MlpGradients { c_fc, c_proj })
    }
}

impl Parameters for Mlp {
    fn visit<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>) {
        self.c_fc.visit(&join(prefix, "c_fc"), out);
        self.c_proj.visit(&join(prefix, "c_proj"), out);
    }

    fn visit_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, &'a mut Tensor)>) {
        self.c_fc.visit_mut(&join(prefix, "c_fc"), out);
        self.c_proj.visit_mut(&join(prefix, "c_proj"), out);
    }
}

#[derive(Debug, Clone)]
pub struct MlpCache {
    c_fc: LinearCache,
    /// Pre-activation `[.., 4C]`, needed by the GELU gradient
    hidden: Tensor,
    c_proj: LinearCache,
}

#[derive(Debug, Clone)]
pub struct MlpGradients {
    pub c_fc: LinearGradients,
    pub c_proj: LinearGradients,
}

impl Parameters for MlpGradients {
    fn visit<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>) {
        self.c_fc.visit(&join(prefix, "c_fc"), out);
        self.c_proj.visit(&join(prefix, "c_proj"), out);
    }

    fn visit_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, &'a mut Tensor)>) {
        self.c_fc.visit_mut(&join(prefix, "c_fc"), out);
        self.c_proj.visit_mut(&join(prefix, "c_proj"), out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::linear::normal_init;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_shapes_and_init_tags() {
        let mlp = Mlp::new(8);
        assert_eq!(mlp.c_fc.weight.shape, vec![32, 8]);
        assert_eq!(mlp.c_proj.weight.shape, vec![8, 32]);
        assert_eq!(mlp.c_fc.init, InitScale::Standard);
        assert_eq!(mlp.c_proj.init, InitScale::ResidualProjection);

        let (y, _) = mlp.forward(&Tensor::zeros(vec![2, 3, 8]));
        assert_eq!(y.shape, vec![2, 3, 8]);
    }

    #[test]
    fn test_positions_are_independent() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut mlp = Mlp::new(4);
        for linear in mlp.linears_mut() {
            linear.weight.data = normal_init(linear.weight.len(), 0.3, &mut rng).unwrap();
        }
        let x = Tensor::new((0..8).map(|i| i as f32 * 0.1).collect(), vec![1, 2, 4]);
        let mut changed = x.clone();
        changed.data[4..].iter_mut().for_each(|v| *v = -1.0);
        let (a, _) = mlp.forward(&x);
        let (b, _) = mlp.forward(&changed);
        assert_eq!(a.data[..4], b.data[..4]);
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut mlp = Mlp::new(2);
        for linear in mlp.linears_mut() {
            linear.weight.data = normal_init(linear.weight.len(), 0.7, &mut rng).unwrap();
            linear.bias.data = normal_init(linear.bias.len(), 0.2, &mut rng).unwrap();
        }
        let x = Tensor::new(vec![0.4, -0.9, 1.1, 0.2], vec![1, 2, 2]);
        let upstream = Tensor::new(vec![1.0, -0.5, 0.25, 2.0], vec![1, 2, 2]);
        let (_, cache) = mlp.forward(&x);
        let (grad_x, _) = mlp.backward(&upstream, &cache);

        let objective = |x: &Tensor| -> f32 {
            let (y, _) = mlp.forward(x);
            y.data.iter().zip(&upstream.data).map(|(a, b)| a * b).sum()
        };
        let eps = 1e-2;
        for i in 0..x.len() {
            let mut plus = x.clone();
            plus.data[i] += eps;
            let mut minus = x.clone();
            minus.data[i] -= eps;
            let numeric = (objective(&plus) - objective(&minus)) / (2.0 * eps);
            assert!((numeric - grad_x.data[i]).abs() < 5e-3);
        }
    }
}
