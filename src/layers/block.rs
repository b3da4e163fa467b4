//! Transformer Block
//!
//! Pre-norm residual structure:
//!
//! ```text
//! x = x + attn(ln_1(x))
//! x = x + mlp(ln_2(x))
//! ```
//!
//! ```text
//! x ─┬─ ln_1 → attn ─(+)─┬─ ln_2 → mlp ─(+)→ out
//!    └────────────────────┘└───────────────┘
//! ```
//!
//! Normalization is applied to each sub-layer's input, never to the
//! residual stream itself. Post-norm ordering is a different model.
//!
//! ## Backward Pass
//!
//! At each residual connection the gradient flows both through the
//! sub-layer and straight past it; the two paths are summed.

use super::attention::{AttentionCache, AttentionGradients, CausalSelfAttention};
use super::layer_norm::{LayerNorm, LayerNormCache, LayerNormGradients};
use super::mlp::{Mlp, MlpCache, MlpGradients};
use crate::error::Result;
use crate::params::{join, Parameters};
use crate::tensor::Tensor;

#[derive(Debug, Clone)]
pub struct Block {
    pub ln_1: LayerNorm,
    pub attn: CausalSelfAttention,
    pub ln_2: LayerNorm,
    pub mlp: Mlp,
}

impl Block {
    pub fn new(n_embd: usize, n_head: usize, block_size: usize) -> Self {
        Self {
            ln_1: LayerNorm::new(n_embd),
            attn: CausalSelfAttention::new(n_embd, n_head, block_size),
            ln_2: LayerNorm::new(n_embd),
            mlp: Mlp::new(n_embd),
        }
    }

    pub fn forward(&self, x: &Tensor) -> Result<(Tensor, BlockCache)> {
        let (n1, ln_1) = self.ln_1.forward(x);
        let (a, attn) = self.attn.forward(&n1)?;
        let x1 = x.add(&a);

        let (n2, ln_2) = self.ln_2.forward(&x1);
        let (m, mlp) = self.mlp.forward(&n2);
        let out = x1.add(&m);

        Ok((out, BlockCache { ln_1, attn, ln_2, mlp }))
    }

    pub fn backward(&self, grad_out: &Tensor, cache: &BlockCache) -> (Tensor, BlockGradients) {
        // second residual: out = x1 + mlp(ln_2(x1))
        let (grad_n2, mlp) = self.mlp.backward(grad_out, &cache.mlp);
        let (grad_x1_ln, ln_2) = self.ln_2.backward(&grad_n2, &cache.ln_2);
        let grad_x1 = grad_out.add(&grad_x1_ln);

        // first residual: x1 = x + attn(ln_1(x))
        let (grad_n1, attn) = self.attn.backward(&grad_x1, &cache.attn);
        let (grad_x_ln, ln_1) = self.ln_1.backward(&grad_n1, &cache.ln_1);
        let grad_x = grad_x1.add(&grad_x_ln);

        (grad_x, BlockGradients { ln_1, attn, ln_2, mlp })
    }
}

impl Parameters for Block {
    fn visit<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>) {
        self.ln_1.visit(&join(prefix, "ln_1"), out);
        self.attn.visit(&join(prefix, "attn"), out);
        self.ln_2.visit(&join(prefix, "ln_2"), out);
        self.mlp.visit(&join(prefix, "mlp"), out);
    }

    fn visit_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, &'a mut Tensor)>) {
        self.ln_1.visit_mut(&join(prefix, "ln_1"), out);
        self.attn.visit_mut(&join(prefix, "attn"), out);
        self.ln_2.visit_mut(&join(prefix, "ln_2"), out);
        self.mlp.visit_mut(&join(prefix, "mlp"), out);
    }
}

#[derive(Debug, Clone)]
pub struct BlockCache {
    ln_1: LayerNormCache,
    attn: AttentionCache,
    ln_2: LayerNormCache,
    mlp: MlpCache,
}

#[derive(Debug, Clone)]
pub struct BlockGradients {
    pub ln_1: LayerNormGradients,
    pub attn: AttentionGradients,
    pub ln_2: LayerNormGradients,
    pub mlp: MlpGradients,
}

impl Parameters for BlockGradients {
    fn visit<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>) {
        self.ln_1.visit(&join(prefix, "ln_1"), out);
        self.attn.visit(&join(prefix, "attn"), out);
        self.ln_2.visit(&join(prefix, "ln_2"), out);
        self.mlp.visit(&join(prefix, "mlp"), out);
    }

    fn visit_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, &'a mut Tensor)>) {
        self.ln_1.visit_mut(&join(prefix, "ln_1"), out);
        self.attn.visit_mut(&join(prefix, "attn"), out);
        self.ln_2.visit_mut(&join(prefix, "ln_2"), out);
        self.mlp.visit_mut(&join(prefix, "mlp"), out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::linear::normal_init;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn block() -> Block {
        let mut rng = StdRng::seed_from_u64(11);
        let mut block = Block::new(4, 2, 4);
        let Block { attn, mlp, .. } = &mut block;
        for linear in attn.linears_mut().into_iter().chain(mlp.linears_mut()) {
            linear.weight.data = normal_init(linear.weight.len(), 0.4, &mut rng).unwrap();
        }
        block
    }

    #[test]
    fn test_zero_sublayers_are_identity() {
        // freshly constructed linears are all zero, so both residual branches add nothing
        let block = Block::new(4, 2, 4);
        let x = Tensor::new((0..8).map(|i| i as f32).collect(), vec![1, 2, 4]);
        let (y, _) = block.forward(&x).unwrap();
        assert_eq!(y, x);
    }

    #[test]
    fn test_parameter_names_follow_gpt2_layout() {
        let names: Vec<String> = block()
            .named_parameters()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names.len(), 12);
        assert_eq!(names[0], "ln_1.weight");
        assert_eq!(names[2], "attn.c_attn.weight");
        assert_eq!(names[11], "mlp.c_proj.bias");
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let block = block();
        let x = Tensor::new(
            vec![0.3, -0.8, 1.2, 0.1, -0.5, 0.9, 0.0, 0.7, 1.5, -1.1, 0.4, -0.2],
            vec![1, 3, 4],
        );
        let upstream = Tensor::new(
            (0..12).map(|i| ((i % 4) as f32 - 1.5) * 0.5).collect(),
            vec![1, 3, 4],
        );
        let (_, cache) = block.forward(&x).unwrap();
        let (grad_x, grads) = block.backward(&upstream, &cache);
        assert_eq!(
            grads.named_parameters().len(),
            block.named_parameters().len()
        );

        let objective = |x: &Tensor| -> f32 {
            let (y, _) = block.forward(x).unwrap();
            y.data.iter().zip(&upstream.data).map(|(a, b)| a * b).sum()
        };
        let eps = 1e-2;
        for i in 0..x.len() {
            let mut plus = x.clone();
            plus.data[i] += eps;
            let mut minus = x.clone();
            minus.data[i] -= eps;
            let numeric = (objective(&plus) - objective(&minus)) / (2.0 * eps);
            assert!(
                (numeric - grad_x.data[i]).abs() < 1e-2,
                "x[{}]: numeric {} vs analytic {}",
                i,
                numeric,
                grad_x.data[i]
            );
        }
    }
}
