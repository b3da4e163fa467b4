//! GPT Model
//!
//! A decoder-only transformer in the GPT-2 layout.
//!
//! ## Architecture
//!
//! ```text
//! idx [B, T]
//!   → wte[idx] + wpe[0..T]          token + position embeddings   [B, T, C]
//!   → h.0 … h.{n_layer-1}           pre-norm transformer blocks   [B, T, C]
//!   → ln_f                          final layer norm              [B, T, C]
//!   → x @ wte^T                     tied output projection        [B, T, V]
//! ```
//!
//! ## Weight Tying
//!
//! There is no separate output-projection tensor. The logits are computed
//! against `wte` directly, so the embedding table and the output projection
//! are one tensor: any optimizer update to one is the update to the other.
//! Its gradient is the sum of the embedding-lookup gradient and the
//! output-projection gradient.
//!
//! ## Initialization
//!
//! Embeddings and linear weights start from N(0, 0.02); the residual
//! projections (`attn.c_proj`, `mlp.c_proj`) are tagged
//! [`InitScale::ResidualProjection`](crate::layers::InitScale) and get
//! `0.02 × (2 × n_layer)^-0.5`. Biases start at zero, layer norms at identity.
//!
//! ## Example
//!
//! ```rust
//! use nanogpt::{ModelConfig, TokenGrid, GPT};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let mut rng = StdRng::seed_from_u64(1337);
//! let model = GPT::new(ModelConfig::tiny(), &mut rng)?;
//! let idx = TokenGrid::new(vec![1, 2, 3, 4], 1, 4);
//! let targets = TokenGrid::new(vec![2, 3, 4, 5], 1, 4);
//! let (logits, loss) = model.forward(&idx, Some(&targets))?;
//! assert_eq!(logits.shape, vec![1, 4, 16]);
//! assert!(loss.unwrap() > 0.0);
//! # Ok::<(), nanogpt::GptError>(())
//! ```

use crate::config::ModelConfig;
use crate::data::TokenGrid;
use crate::error::{GptError, Result};
use crate::layers::{
    normal_init, Block, BlockCache, BlockGradients, LayerNorm, LayerNormCache, LayerNormGradients,
    INIT_STD,
};
use crate::loss::{cross_entropy, cross_entropy_backward};
use crate::params::{join, Parameters, StateDict};
use crate::tensor::Tensor;
use rand::Rng;
use rayon::prelude::*;
use tracing::debug;

/// Name under which the tied output projection appears in state dicts
pub const LM_HEAD_WEIGHT: &str = "lm_head.weight";

/// Name of the token embedding table
pub const WTE_WEIGHT: &str = "transformer.wte.weight";

/// GPT-2 style language model
#[derive(Debug, Clone)]
pub struct GPT {
    pub config: ModelConfig,
    /// Token embedding table `[vocab_size, n_embd]`, also the output projection
    pub wte: Tensor,
    /// Position embedding table `[block_size, n_embd]`
    pub wpe: Tensor,
    pub blocks: Vec<Block>,
    pub ln_f: LayerNorm,
}

impl GPT {
    /// Build a freshly initialized model.
    ///
    /// Fails with [`GptError::ConfigInvalid`] for an invalid configuration.
    pub fn new<R: Rng + ?Sized>(config: ModelConfig, rng: &mut R) -> Result<Self> {
        let mut model = Self::zeroed(config)?;
        model.init_weights(rng)?;
        debug!(
            "built model with {} parameters ({} layers, {} heads, {} embd)",
            model.num_parameters(),
            config.n_layer,
            config.n_head,
            config.n_embd
        );
        Ok(model)
    }

    /// Model with zero weights and identity layer norms, to be filled by an import
    pub(crate) fn zeroed(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        let c = config.n_embd;
        Ok(Self {
            config,
            wte: Tensor::zeros(vec![config.vocab_size, c]),
            wpe: Tensor::zeros(vec![config.block_size, c]),
            blocks: (0..config.n_layer)
                .map(|_| Block::new(c, config.n_head, config.block_size))
                .collect(),
            ln_f: LayerNorm::new(c),
        })
    }

    /// Redraw every parameter from the initialization policy
    pub fn init_weights<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        let n_layer = self.config.n_layer;
        self.wte.data = normal_init(self.wte.len(), INIT_STD, rng)?;
        self.wpe.data = normal_init(self.wpe.len(), INIT_STD, rng)?;
        for block in &mut self.blocks {
            block.ln_1.reset_parameters();
            block.ln_2.reset_parameters();
            let Block { attn, mlp, .. } = block;
            for linear in attn.linears_mut().into_iter().chain(mlp.linears_mut()) {
                linear.reset_parameters(n_layer, rng)?;
            }
        }
        self.ln_f.reset_parameters();
        Ok(())
    }

    /// Output projection weight `[vocab_size, n_embd]`.
    ///
    /// This is the token embedding table itself, not a copy.
    pub fn lm_head_weight(&self) -> &Tensor {
        &self.wte
    }

    fn check_tokens(&self, grid: &TokenGrid) -> Result<()> {
        let vocab_size = self.config.vocab_size;
        match grid.ids().iter().find(|&&token| token >= vocab_size) {
            Some(&token) => Err(GptError::TokenOutOfRange { token, vocab_size }),
            None => Ok(()),
        }
    }

    /// Logits for `idx`, plus the mean cross-entropy loss when targets are given
    pub fn forward(&self, idx: &TokenGrid, targets: Option<&TokenGrid>) -> Result<(Tensor, Option<f32>)> {
        let (logits, _) = self.forward_with_cache(idx)?;
        let loss = match targets {
            Some(targets) => Some(self.loss(&logits, targets)?),
            None => None,
        };
        Ok((logits, loss))
    }

    /// Forward pass keeping every activation the backward pass needs
    ///
    /// Fails with [`GptError::SequenceTooLong`] when `T > block_size`, with
    /// [`GptError::InvalidInput`] for an empty grid and with
    /// [`GptError::TokenOutOfRange`] for ids outside the vocabulary, all
    /// before any computation.
    pub fn forward_with_cache(&self, idx: &TokenGrid) -> Result<(Tensor, GptCache)> {
        let (b, t) = (idx.rows(), idx.cols());
        let c = self.config.n_embd;
        if idx.is_empty() {
            return Err(GptError::InvalidInput(format!(
                "cannot forward an empty [{b}, {t}] grid"
            )));
        }
        if t > self.config.block_size {
            return Err(GptError::SequenceTooLong {
                len: t,
                block_size: self.config.block_size,
            });
        }
        self.check_tokens(idx)?;

        // ==================== EMBEDDINGS ====================
        let mut emb = vec![0.0; b * t * c];
        emb.par_chunks_mut(c)
            .zip(idx.ids().par_iter())
            .enumerate()
            .for_each(|(i, (row, &token))| {
                let pos = i % t;
                let tok_row = &self.wte.data[token * c..(token + 1) * c];
                let pos_row = &self.wpe.data[pos * c..(pos + 1) * c];
                for ((o, &te), &pe) in row.iter_mut().zip(tok_row).zip(pos_row) {
                    *o = te + pe;
                }
            });
        let mut x = Tensor::new(emb, vec![b, t, c]);

        // ==================== TRANSFORMER BLOCKS ====================
        let mut block_caches = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let (out, cache) = block.forward(&x)?;
            block_caches.push(cache);
            x = out;
        }

        // ==================== OUTPUT ====================
        let (x_f, ln_f) = self.ln_f.forward(&x);
        let x_f = x_f.into_shape(&[b * t, c]);
        let logits = x_f
            .matmul_t(&self.wte)
            .into_shape(&[b, t, self.config.vocab_size]);

        let cache = GptCache {
            idx: idx.clone(),
            blocks: block_caches,
            ln_f,
            x_f,
        };
        Ok((logits, cache))
    }

    /// Mean cross-entropy of `[B, T, V]` logits against `[B, T]` targets
    pub fn loss(&self, logits: &Tensor, targets: &TokenGrid) -> Result<f32> {
        self.check_targets(logits, targets)?;
        let v = self.config.vocab_size;
        Ok(cross_entropy(&logits.reshape(&[targets.len(), v]), targets.ids()))
    }

    fn check_targets(&self, logits: &Tensor, targets: &TokenGrid) -> Result<()> {
        if targets.is_empty() {
            return Err(GptError::InvalidInput("targets are empty".to_string()));
        }
        let expected = [targets.rows(), targets.cols(), self.config.vocab_size];
        if logits.shape != expected {
            return Err(GptError::InvalidInput(format!(
                "targets [{}, {}] don't match logits {:?}",
                targets.rows(),
                targets.cols(),
                logits.shape
            )));
        }
        self.check_tokens(targets)
    }

    /// Gradients of the mean cross-entropy loss w.r.t. every parameter
    pub fn backward(&self, logits: &Tensor, targets: &TokenGrid, cache: &GptCache) -> Result<GptGradients> {
        self.check_targets(logits, targets)?;
        let (b, t) = (targets.rows(), targets.cols());
        let (c, v) = (self.config.n_embd, self.config.vocab_size);

        // ==================== OUTPUT PROJECTION ====================
        let grad_logits = cross_entropy_backward(&logits.reshape(&[b * t, v]), targets.ids());
        // tied weight, first contribution: grad_logits^T @ x_f
        let mut grad_wte = grad_logits.transpose(0, 1).matmul(&cache.x_f);
        let grad_xf = grad_logits.matmul(&self.wte).into_shape(&[b, t, c]);

        let (mut grad_x, ln_f) = self.ln_f.backward(&grad_xf, &cache.ln_f);

        // ==================== TRANSFORMER BLOCKS ====================
        let mut block_grads = Vec::with_capacity(self.blocks.len());
        for (block, block_cache) in self.blocks.iter().zip(&cache.blocks).rev() {
            let (grad_in, grads) = block.backward(&grad_x, block_cache);
            block_grads.push(grads);
            grad_x = grad_in;
        }
        block_grads.reverse();

        // ==================== EMBEDDINGS ====================
        // tied weight, second contribution: scatter-add into the looked-up rows
        let mut grad_wpe = Tensor::zeros(self.wpe.shape.clone());
        for (i, (&token, g)) in cache.idx.ids().iter().zip(grad_x.data.chunks(c)).enumerate() {
            let pos = i % t;
            let tok_row = &mut grad_wte.data[token * c..(token + 1) * c];
            for (dst, src) in tok_row.iter_mut().zip(g) {
                *dst += src;
            }
            let pos_row = &mut grad_wpe.data[pos * c..(pos + 1) * c];
            for (dst, src) in pos_row.iter_mut().zip(g) {
                *dst += src;
            }
        }

        Ok(GptGradients {
            wte: grad_wte,
            wpe: grad_wpe,
            blocks: block_grads,
            ln_f,
        })
    }

    /// Copy of every parameter in the external naming convention, including
    /// the tied `lm_head.weight` alias
    pub fn state_dict(&self) -> StateDict {
        let mut sd: StateDict = self
            .named_parameters()
            .into_iter()
            .map(|(name, t)| (name, t.clone()))
            .collect();
        sd.insert(LM_HEAD_WEIGHT.to_string(), self.wte.clone());
        sd
    }

    /// Names of [`GPT::state_dict`] in parameter order, ending with `lm_head.weight`
    pub fn state_dict_keys(&self) -> Vec<String> {
        GPT::state_dict_shapes(&self.config)
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    /// Every state-dict name with its shape for `config`, including the tied
    /// alias, in parameter order. Computed without building the model.
    pub fn state_dict_shapes(config: &ModelConfig) -> Vec<(String, Vec<usize>)> {
        let (v, t, c) = (config.vocab_size, config.block_size, config.n_embd);
        let mut shapes = vec![
            (WTE_WEIGHT.to_string(), vec![v, c]),
            ("transformer.wpe.weight".to_string(), vec![t, c]),
        ];
        let per_block: [(&str, Vec<usize>); 12] = [
            ("ln_1.weight", vec![c]),
            ("ln_1.bias", vec![c]),
            ("attn.c_attn.weight", vec![3 * c, c]),
            ("attn.c_attn.bias", vec![3 * c]),
            ("attn.c_proj.weight", vec![c, c]),
            ("attn.c_proj.bias", vec![c]),
            ("ln_2.weight", vec![c]),
            ("ln_2.bias", vec![c]),
            ("mlp.c_fc.weight", vec![4 * c, c]),
            ("mlp.c_fc.bias", vec![4 * c]),
            ("mlp.c_proj.weight", vec![c, 4 * c]),
            ("mlp.c_proj.bias", vec![c]),
        ];
        for i in 0..config.n_layer {
            for (name, shape) in &per_block {
                shapes.push((format!("transformer.h.{i}.{name}"), shape.clone()));
            }
        }
        shapes.push(("transformer.ln_f.weight".to_string(), vec![c]));
        shapes.push(("transformer.ln_f.bias".to_string(), vec![c]));
        shapes.push((LM_HEAD_WEIGHT.to_string(), vec![v, c]));
        shapes
    }
}

impl Parameters for GPT {
    fn visit<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>) {
        let root = join(prefix, "transformer");
        out.push((join(&root, "wte.weight"), &self.wte));
        out.push((join(&root, "wpe.weight"), &self.wpe));
        for (i, block) in self.blocks.iter().enumerate() {
            block.visit(&join(&root, &format!("h.{i}")), out);
        }
        self.ln_f.visit(&join(&root, "ln_f"), out);
    }

    fn visit_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, &'a mut Tensor)>) {
        let root = join(prefix, "transformer");
        out.push((join(&root, "wte.weight"), &mut self.wte));
        out.push((join(&root, "wpe.weight"), &mut self.wpe));
        for (i, block) in self.blocks.iter_mut().enumerate() {
            block.visit_mut(&join(&root, &format!("h.{i}")), out);
        }
        self.ln_f.visit_mut(&join(&root, "ln_f"), out);
    }
}

/// Activations saved by [`GPT::forward_with_cache`]
#[derive(Debug, Clone)]
pub struct GptCache {
    idx: TokenGrid,
    blocks: Vec<BlockCache>,
    ln_f: LayerNormCache,
    /// Final normalized activations `[B*T, C]`
    x_f: Tensor,
}

/// Gradients for every [`GPT`] parameter, under the same names
#[derive(Debug, Clone)]
pub struct GptGradients {
    pub wte: Tensor,
    pub wpe: Tensor,
    pub blocks: Vec<BlockGradients>,
    pub ln_f: LayerNormGradients,
}

impl Parameters for GptGradients {
    fn visit<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>) {
        let root = join(prefix, "transformer");
        out.push((join(&root, "wte.weight"), &self.wte));
        out.push((join(&root, "wpe.weight"), &self.wpe));
        for (i, block) in self.blocks.iter().enumerate() {
            block.visit(&join(&root, &format!("h.{i}")), out);
        }
        self.ln_f.visit(&join(&root, "ln_f"), out);
    }

    fn visit_mut<'a>(&'a mut self, prefix: &str, out: &mut Vec<(String, &'a mut Tensor)>) {
        let root = join(prefix, "transformer");
        out.push((join(&root, "wte.weight"), &mut self.wte));
        out.push((join(&root, "wpe.weight"), &mut self.wpe));
        for (i, block) in self.blocks.iter_mut().enumerate() {
            block.visit_mut(&join(&root, &format!("h.{i}")), out);
        }
        self.ln_f.visit_mut(&join(&root, "ln_f"), out);
    }
}
