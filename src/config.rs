//! Model Configuration
//!
//! `ModelConfig` fixes the shape of a GPT model; it is validated once at
//! construction and never changes afterwards. `ModelFamily` names the four
//! published GPT-2 sizes whose weights can be imported.
//!
//! ## Published Families
//!
//! ```text
//! family        n_layer  n_head  n_embd   parameters
//! gpt2             12      12      768       124M
//! gpt2-medium      24      16     1024       350M
//! gpt2-large       36      20     1280       774M
//! gpt2-xl          48      25     1600      1558M
//! ```
//!
//! All four share `vocab_size = 50257` and `block_size = 1024`.

use crate::error::{GptError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// GPT-2 BPE vocabulary size
pub const GPT2_VOCAB_SIZE: usize = 50257;

/// Context length of the published checkpoints
pub const GPT2_BLOCK_SIZE: usize = 1024;

/// Vocabulary size used for training from scratch: 50257 rounded up to a
/// multiple of 128. The extra rows are never produced by the tokenizer.
pub const PADDED_VOCAB_SIZE: usize = 50304;

/// Shape of a GPT model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Maximum sequence length
    pub block_size: usize,
    /// Number of token ids
    pub vocab_size: usize,
    /// Number of transformer blocks
    pub n_layer: usize,
    /// Attention heads per block
    pub n_head: usize,
    /// Embedding width
    pub n_embd: usize,
}

impl Default for ModelConfig {
    /// GPT-2 small (124M)
    fn default() -> Self {
        Self {
            block_size: GPT2_BLOCK_SIZE,
            vocab_size: GPT2_VOCAB_SIZE,
            n_layer: 12,
            n_head: 12,
            n_embd: 768,
        }
    }
}

impl ModelConfig {
    /// Tiny shape for tests and smoke runs (a few thousand parameters)
    pub fn tiny() -> Self {
        Self {
            block_size: 8,
            vocab_size: 16,
            n_layer: 2,
            n_head: 2,
            n_embd: 8,
        }
    }

    /// Configuration of a published checkpoint
    pub fn from_family(family: ModelFamily) -> Self {
        let (n_layer, n_head, n_embd) = family.dims();
        Self {
            block_size: GPT2_BLOCK_SIZE,
            vocab_size: GPT2_VOCAB_SIZE,
            n_layer,
            n_head,
            n_embd,
        }
    }

    /// Check every dimension is usable.
    ///
    /// Fails with [`GptError::ConfigInvalid`] if any dimension is zero or
    /// `n_embd` isn't divisible by `n_head`.
    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("block_size", self.block_size),
            ("vocab_size", self.vocab_size),
            ("n_layer", self.n_layer),
            ("n_head", self.n_head),
            ("n_embd", self.n_embd),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(GptError::ConfigInvalid(format!(
                    "{name} must be greater than 0"
                )));
            }
        }
        if self.n_embd % self.n_head != 0 {
            return Err(GptError::ConfigInvalid(format!(
                "n_embd ({}) must be divisible by n_head ({})",
                self.n_embd, self.n_head
            )));
        }
        Ok(())
    }

    /// Width of one attention head
    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }

    /// Lower bound on the bytes a training step keeps alive for a
    /// `[batch, seq_len]` batch: the `[B, nh, T, T]` attention weights of
    /// every layer plus the `[B, T, V]` logits
    pub fn activation_bytes(&self, batch: usize, seq_len: usize) -> usize {
        let f32_bytes = std::mem::size_of::<f32>();
        let attention = self.n_layer * batch * self.n_head * seq_len * seq_len;
        let logits = batch * seq_len * self.vocab_size;
        (attention + logits) * f32_bytes
    }
}

/// One of the four published GPT-2 checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    Gpt2,
    Gpt2Medium,
    Gpt2Large,
    Gpt2Xl,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 4] = [
        ModelFamily::Gpt2,
        ModelFamily::Gpt2Medium,
        ModelFamily::Gpt2Large,
        ModelFamily::Gpt2Xl,
    ];

    /// `(n_layer, n_head, n_embd)`
    fn dims(self) -> (usize, usize, usize) {
        match self {
            ModelFamily::Gpt2 => (12, 12, 768),
            ModelFamily::Gpt2Medium => (24, 16, 1024),
            ModelFamily::Gpt2Large => (36, 20, 1280),
            ModelFamily::Gpt2Xl => (48, 25, 1600),
        }
    }

    /// Canonical name, also the directory name used by weight sources
    pub fn name(self) -> &'static str {
        match self {
            ModelFamily::Gpt2 => "gpt2",
            ModelFamily::Gpt2Medium => "gpt2-medium",
            ModelFamily::Gpt2Large => "gpt2-large",
            ModelFamily::Gpt2Xl => "gpt2-xl",
        }
    }

    pub fn config(self) -> ModelConfig {
        ModelConfig::from_family(self)
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelFamily {
    type Err = GptError;

    fn from_str(s: &str) -> Result<Self> {
        ModelFamily::ALL
            .into_iter()
            .find(|family| family.name() == s)
            .ok_or_else(|| GptError::UnknownModelFamily(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_gpt2_small() {
        let config = ModelConfig::default();
        assert_eq!(config, ModelFamily::Gpt2.config());
        assert_eq!(config.head_dim(), 64);
    }

    #[test]
    fn test_activation_bytes() {
        let config = ModelConfig::tiny();
        // 2 layers * 2 heads * 8 * 8 + 8 * 16 logits, per sequence
        assert_eq!(config.activation_bytes(1, 8), (256 + 128) * 4);

        let gpt2 = ModelConfig {
            vocab_size: 50304,
            ..ModelConfig::default()
        };
        let bytes = gpt2.activation_bytes(16, 1024);
        assert_eq!(bytes, (12 * 16 * 12 * 1024 * 1024 + 16 * 1024 * 50304) * 4);
        assert!(bytes > 12 << 30);
    }

    #[test]
    fn test_validate_rejects_indivisible_heads() {
        let config = ModelConfig {
            n_embd: 10,
            n_head: 3,
            ..ModelConfig::tiny()
        };
        match config.validate() {
            Err(GptError::ConfigInvalid(msg)) => assert!(msg.contains("divisible")),
            other => panic!("expected ConfigInvalid, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_zero_dims() {
        let config = ModelConfig {
            n_layer: 0,
            ..ModelConfig::tiny()
        };
        assert!(matches!(config.validate(), Err(GptError::ConfigInvalid(_))));
    }

    #[test]
    fn test_every_family_is_valid() {
        for family in ModelFamily::ALL {
            let config = family.config();
            config.validate().unwrap();
            assert_eq!(config.vocab_size, GPT2_VOCAB_SIZE);
            assert_eq!(config.block_size, GPT2_BLOCK_SIZE);
        }
        assert_eq!(ModelFamily::Gpt2Xl.config().n_embd, 1600);
        assert_eq!(ModelFamily::Gpt2Large.config().n_head, 20);
        assert_eq!(ModelFamily::Gpt2Medium.config().n_layer, 24);
    }

    #[test]
    fn test_family_from_str() {
        assert_eq!("gpt2-medium".parse::<ModelFamily>().unwrap(), ModelFamily::Gpt2Medium);
        for family in ModelFamily::ALL {
            assert_eq!(family.to_string().parse::<ModelFamily>().unwrap(), family);
        }
        assert!(matches!(
            "gpt3".parse::<ModelFamily>(),
            Err(GptError::UnknownModelFamily(_))
        ));
    }

    #[test]
    fn test_config_json_roundtrip() {
        let json = serde_json::to_string(&ModelConfig::tiny()).unwrap();
        let back: ModelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ModelConfig::tiny());
    }
}
