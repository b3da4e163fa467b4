//! Causal Multi-Head Self-Attention
//!
//! ## Forward Pass
//!
//! ```text
//! x [B, T, C]
//!   → c_attn                         [B, T, 3C]
//!   → split into q, k, v             3 × [B, T, C]
//!   → heads                          3 × [B, nh, T, hs]     (hs = C / nh)
//!   → scores = q @ k^T / √hs         [B, nh, T, T]
//!   → mask future positions with -∞
//!   → att = softmax(scores)
//!   → y = att @ v                    [B, nh, T, hs]
//!   → merge heads                    [B, T, C]
//!   → c_proj                         [B, T, C]
//! ```
//!
//! ## Causal Mask
//!
//! A lower-triangular `[block_size, block_size]` matrix built once at
//! construction. Calls with `T < block_size` use its top-left `[T, T]`
//! corner. Scores above the diagonal are set to exactly `-∞`, so after the
//! softmax they carry probability exactly `0.0` and output row `i` never
//! depends on inputs at positions `j > i`.
//!
//! ## Backward Pass
//!
//! ```text
//! grad_att    = grad_y @ v^T
//! grad_v      = att^T @ grad_y
//! grad_scores = softmax_backward(att, grad_att) / √hs
//! grad_q      = grad_scores @ k
//! grad_k      = grad_scores^T @ q
//! ```
//!
//! Masked entries have `att == 0`, so their score gradient is zero.

use super::linear::{InitScale, Linear, LinearCache, LinearGradients};
use crate::error::{GptError, Result};
use crate::params::{join, Parameters};
use crate::tensor::Tensor;

/// Causal self-attention with a fused QKV projection
#[derive(Debug, Clone)]
pub struct CausalSelfAttention {
    /// Combined query/key/value projection, `C → 3C`
    pub c_attn: Linear,
    /// Output projection, `C → C` (residual projection)
    pub c_proj: Linear,
    pub n_head: usize,
    pub n_embd: usize,
    /// Lower-triangular `[block_size, block_size]` buffer, never trained
    mask: Tensor,
}

impl CausalSelfAttention {
    pub fn new(n_embd: usize, n_head: usize, block_size: usize) -> Self {
        Self {
            c_attn: Linear::new(n_embd, 3 * n_embd, InitScale::Standard),
            c_proj: Linear::new(n_embd, n_embd, InitScale::ResidualProjection),
            n_head,
            n_embd,
            mask: Tensor::tril(block_size),
        }
    }

    pub fn block_size(&self) -> usize {
        self.mask.shape[0]
    }

    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }

    pub fn linears_mut(&mut self) -> [&mut Linear; 2] {
        [&mut self.c_attn, &mut self.c_proj]
    }

    /// Top-left `[t, t]` corner of the causal mask
    fn mask_for(&self, t: usize) -> Tensor {
        let n = self.block_size();
        let data = (0..t)
            .flat_map(|i| self.mask.data[i * n..i * n + t].iter().copied())
            .collect();
        Tensor::new(data, vec![t, t])
    }

    /// `[B, T, C]` → `[B, nh, T, hs]`
    fn split_heads(&self, x: &Tensor) -> Tensor {
        let (b, t) = (x.shape[0], x.shape[1]);
        x.reshape(&[b, t, self.n_head, self.head_dim()]).transpose(1, 2)
    }

    /// `[B, nh, T, hs]` → `[B, T, C]`
    fn merge_heads(&self, x: &Tensor) -> Tensor {
        let (b, t) = (x.shape[0], x.shape[2]);
        x.transpose(1, 2).into_shape(&[b, t, self.n_embd])
    }

    /// Forward pass over `[B, T, C]`
    ///
    /// Fails with [`GptError::SequenceTooLong`] when `T > block_size`.
    pub fn forward(&self, x: &Tensor) -> Result<(Tensor, AttentionCache)> {
        assert_eq!(x.shape.len(), 3, "attention expects [B, T, C], got {:?}", x.shape);
        let t = x.shape[1];
        if t > self.block_size() {
            return Err(GptError::SequenceTooLong {
                len: t,
                block_size: self.block_size(),
            });
        }

        let (qkv, attn_cache) = self.c_attn.forward(x);
        let mut parts = qkv.split_last(3).into_iter().map(|p| self.split_heads(&p));
        let (q, k, v) = match (parts.next(), parts.next(), parts.next()) {
            (Some(q), Some(k), Some(v)) => (q, k, v),
            _ => unreachable!("split_last(3) yields three tensors"),
        };

        let scale = 1.0 / (self.head_dim() as f32).sqrt();
        let scores = q
            .matmul_t(&k)
            .mul_scalar(scale)
            .masked_fill(&self.mask_for(t), f32::NEG_INFINITY);
        let att = scores.softmax();
        let y = self.merge_heads(&att.matmul(&v));
        let (out, proj_cache) = self.c_proj.forward(&y);

        let cache = AttentionCache {
            c_attn: attn_cache,
            c_proj: proj_cache,
            q,
            k,
            v,
            att,
        };
        Ok((out, cache))
    }

    /// Backward pass, returning `grad_x [B, T, C]` and parameter gradients
    pub fn backward(&self, grad_out: &Tensor, cache: &AttentionCache) -> (Tensor, AttentionGradients) {
        let (grad_y, c_proj) = self.c_proj.backward(grad_out, &cache.c_proj);
        let grad_y = self.split_heads(&grad_y);

        let grad_att = grad_y.matmul_t(&cache.v);
        let grad_v = cache.att.transpose(-2, -1).matmul(&grad_y);

        let scale = 1.0 / (self.head_dim() as f32).sqrt();
        let grad_scores = cache.att.softmax_backward(&grad_att).mul_scalar(scale);
        let grad_q = grad_scores.matmul(&cache.k);
        let grad_k = grad_scores.transpose(-2, -1).matmul(&cache.q);

        let grad_qkv = Tensor::concat_last(&[
            &self.merge_heads(&grad_q),
            &self.merge_heads(&grad_k),
            &self.merge_heads(&grad_v),
        ]);
        let (grad_x, c_attn) = self.c_attn.backward(&grad_qkv, &cache.c_attn);

        (grad_x, AttentionGradients { c_attn, c_proj })
    }
}

impl Parameters for CausalSelfAttention {
    fn visit<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>) {
        self.c_attn.visit(&join(prefix, "c_attn"), out);
        self.c_proj.visit(&join(prefix, "c_proj"), out);
    }

    fn visit_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, &'a mut Tensor)>) {
        self.c_attn.visit_mut(&join(prefix, "c_attn"), out);
        self.c_proj.visit_mut(&join(prefix, "c_proj"), out);
    }
}

/// Activations saved by [`CausalSelfAttention::forward`]
#[derive(Debug, Clone)]
pub struct AttentionCache {
    c_attn: LinearCache,
    c_proj: LinearCache,
    q: Tensor,
    k: Tensor,
    v: Tensor,
    /// Post-softmax attention weights `[B, nh, T, T]`
    pub att: Tensor,
}

#[derive(Debug, Clone)]
pub struct AttentionGradients {
    pub c_attn: LinearGradients,
    pub c_proj: LinearGradients,
}

impl Parameters for AttentionGradients {
    fn visit<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>) {
        self.c_attn.visit(&join(prefix, "c_attn"), out);
        self.c_proj.visit(&join(prefix, "c_proj"), out);
    }

    fn visit_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, &'a mut Tensor)>) {
        self.c_attn.visit_mut(&join(prefix, "c_attn"), out);
        self.c_proj.visit_mut(&join(prefix, "c_proj"), out);
    }
}
