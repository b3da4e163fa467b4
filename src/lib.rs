//! nanogpt: a GPT-2 style language model trained from scratch on the CPU
//!
//! A decoder-only transformer with hand-written forward and backward
//! passes, a warmup-cosine AdamW training loop, and import of the published
//! GPT-2 weights.
//!
//! # Modules
//!
//! - [`tensor`] - Dense `f32` arrays with rayon-parallel kernels
//! - [`layers`] - Linear, LayerNorm, GELU, causal self-attention, MLP, block
//! - [`model`] - The [`GPT`] model: embeddings, block stack, tied output head
//! - [`loss`] - Cross-entropy over next-token targets
//! - [`params`] - Named parameter enumeration shared by optimizer and import
//! - [`pretrained`] - Loading published checkpoints
//! - [`tokenizer`] - GPT-2 byte-level BPE and a byte codec
//! - [`data`] - Sequential `[B, T]` batch loader
//! - [`schedule`], [`optimizer`], [`gradients`], [`train`] - The training loop
//! - [`generate`] - Top-k sampling
//! - [`config`], [`runtime`], [`error`] - Configuration, process setup, errors
//!
//! # Example
//!
//! ```rust,no_run
//! use nanogpt::{runtime, DataLoaderLite, GPT, ModelConfig, RuntimeConfig, TrainConfig, Trainer};
//! use nanogpt::tokenizer::Gpt2Tokenizer;
//!
//! let mut rng = runtime::init(&RuntimeConfig::default());
//! let tokenizer = Gpt2Tokenizer::from_dir("gpt2")?;
//! let config = TrainConfig::default();
//! let loader = DataLoaderLite::from_file("input.txt", &tokenizer, config.batch_size, config.seq_len)?;
//! let model_config = ModelConfig {
//!     vocab_size: config.vocab_size,
//!     ..ModelConfig::default()
//! };
//! let model = GPT::new(model_config, &mut rng)?;
//! let history = Trainer::new(model, loader, config)?.run()?;
//! println!("final step loss {}", history.last().map_or(f32::NAN, |s| s.loss));
//! # Ok::<(), nanogpt::GptError>(())
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod generate;
pub mod gradients;
pub mod layers;
pub mod loss;
pub mod model;
pub mod optimizer;
pub mod params;
pub mod pretrained;
pub mod runtime;
pub mod schedule;
pub mod tensor;
pub mod tokenizer;
pub mod train;

// Re-export main types for convenience
pub use config::{ModelConfig, ModelFamily};
pub use data::{Batch, DataLoaderLite, TokenGrid};
pub use error::{GptError, Mismatch, Result};
pub use generate::{generate, SampleConfig};
pub use model::{GptGradients, GPT};
pub use params::{Parameters, StateDict};
pub use pretrained::{SafetensorsDir, WeightSource};
pub use runtime::RuntimeConfig;
pub use schedule::CosineSchedule;
pub use tensor::Tensor;
pub use tokenizer::{ByteTokenizer, Gpt2Tokenizer, TokenCodec};
pub use train::{StepStats, TrainConfig, Trainer};
