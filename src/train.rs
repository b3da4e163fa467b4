//! Training Loop
//!
//! [`Trainer`] owns the model, the data loader, the optimizer and the step
//! counter, and runs the per-step sequence:
//!
//! ```text
//! batch   = loader.next_batch()
//! logits  = model.forward(batch.inputs)             fresh activations
//! loss    = cross_entropy(logits, batch.targets)
//! grads   = model.backward(...)                     fresh gradients, nothing carried over
//! norm    = clip_grad_norm(grads, 1.0)
//! lr      = schedule.get_lr(step)
//! optimizer.set_lr(lr)
//! optimizer.step(model, grads)
//! ```
//!
//! Each step logs one line:
//!
//! ```text
//! step    0 | loss: 10.955081 | norm: 28.6103 | lr 6.0000e-05 | dt: 1843.12ms | tok/sec: 8889.34
//! ```
//!
//! ## Configuration
//!
//! [`TrainConfig`] holds every hyperparameter of a run. Its defaults are the
//! GPT-2 reproduction settings; a JSON file may override any subset of them.

use crate::config::PADDED_VOCAB_SIZE;
use crate::data::{Batch, DataLoaderLite};
use crate::error::{GptError, Result};
use crate::gradients::clip_grad_norm;
use crate::model::GPT;
use crate::optimizer::AdamW;
use crate::params::Parameters;
use crate::schedule::CosineSchedule;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Hyperparameters of a training run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainConfig {
    /// Sequences per batch (B)
    pub batch_size: usize,
    /// Tokens per sequence (T)
    pub seq_len: usize,
    pub max_lr: f32,
    /// Floor of the schedule as a fraction of `max_lr`
    pub min_lr_ratio: f32,
    pub warmup_steps: usize,
    pub max_steps: usize,
    /// Maximum global gradient norm
    pub grad_clip: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    pub weight_decay: f32,
    pub seed: u64,
    /// Vocabulary size of the trained model, padded for efficient kernels
    pub vocab_size: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            seq_len: 1024,
            max_lr: 3e-4,
            min_lr_ratio: 0.1,
            warmup_steps: 10,
            max_steps: 50,
            grad_clip: 1.0,
            beta1: 0.9,
            beta2: 0.95,
            eps: 1e-8,
            weight_decay: 0.01,
            seed: 1337,
            vocab_size: PADDED_VOCAB_SIZE,
        }
    }
}

impl TrainConfig {
    /// Read a config from JSON; missing fields keep their defaults
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: TrainConfig = serde_json::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    pub fn min_lr(&self) -> f32 {
        self.max_lr * self.min_lr_ratio
    }

    pub fn schedule(&self) -> CosineSchedule {
        CosineSchedule::new(self.max_lr, self.min_lr(), self.warmup_steps, self.max_steps)
    }

    pub fn optimizer(&self) -> AdamW {
        AdamW::new(self.max_lr, self.beta1, self.beta2, self.eps, self.weight_decay)
    }

    /// Tokens processed per optimizer step
    pub fn tokens_per_step(&self) -> usize {
        self.batch_size * self.seq_len
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(GptError::ConfigInvalid(msg));
        if self.batch_size == 0 || self.seq_len == 0 {
            return invalid(format!(
                "batch shape must be non-empty, got B={} T={}",
                self.batch_size, self.seq_len
            ));
        }
        if self.warmup_steps == 0 {
            return invalid("warmup_steps must be at least 1".to_string());
        }
        if self.max_steps < self.warmup_steps {
            return invalid(format!(
                "max_steps ({}) must be at least warmup_steps ({})",
                self.max_steps, self.warmup_steps
            ));
        }
        if self.max_lr.is_nan() || self.max_lr <= 0.0 {
            return invalid(format!("max_lr must be positive, got {}", self.max_lr));
        }
        if !(0.0..=1.0).contains(&self.min_lr_ratio) {
            return invalid(format!("min_lr_ratio must be in [0, 1], got {}", self.min_lr_ratio));
        }
        if self.grad_clip.is_nan() || self.grad_clip <= 0.0 {
            return invalid(format!("grad_clip must be positive, got {}", self.grad_clip));
        }
        if self.vocab_size == 0 {
            return invalid("vocab_size must be positive".to_string());
        }
        Ok(())
    }
}

/// Measurements of one optimizer step
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepStats {
    pub step: usize,
    pub loss: f32,
    /// Global gradient norm before clipping
    pub norm: f32,
    pub lr: f32,
    pub dt_ms: f64,
    pub tokens_per_sec: f64,
}

/// Drives training of one model over one data loader
pub struct Trainer {
    model: GPT,
    loader: DataLoaderLite,
    optimizer: AdamW,
    schedule: CosineSchedule,
    config: TrainConfig,
    step: usize,
    last_batch: Option<Batch>,
}

impl Trainer {
    /// The loader must produce the `[batch_size, seq_len]` batches `config`
    /// describes.
    pub fn new(model: GPT, loader: DataLoaderLite, config: TrainConfig) -> Result<Self> {
        config.validate()?;
        if loader.seq_len() > model.config.block_size {
            return Err(GptError::SequenceTooLong {
                len: loader.seq_len(),
                block_size: model.config.block_size,
            });
        }
        if (loader.batch_size(), loader.seq_len()) != (config.batch_size, config.seq_len) {
            return Err(GptError::ConfigInvalid(format!(
                "loader yields [{}, {}] batches but the config says [{}, {}]",
                loader.batch_size(),
                loader.seq_len(),
                config.batch_size,
                config.seq_len
            )));
        }
        Ok(Self {
            optimizer: config.optimizer(),
            schedule: config.schedule(),
            model,
            loader,
            config,
            step: 0,
            last_batch: None,
        })
    }

    pub fn model(&self) -> &GPT {
        &self.model
    }

    pub fn into_model(self) -> GPT {
        self.model
    }

    pub fn optimizer(&self) -> &AdamW {
        &self.optimizer
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Index of the next step
    pub fn current_step(&self) -> usize {
        self.step
    }

    /// Run one step and advance the step counter
    pub fn step(&mut self) -> Result<StepStats> {
        let t0 = Instant::now();
        let batch = self.loader.next_batch();

        let (logits, cache) = self.model.forward_with_cache(&batch.inputs)?;
        let loss = self.model.loss(&logits, &batch.targets)?;
        let mut grads = self.model.backward(&logits, &batch.targets, &cache)?;
        drop(cache);

        let norm = clip_grad_norm(&mut grads, self.config.grad_clip);
        let lr = self.schedule.get_lr(self.step);
        self.optimizer.set_lr(lr);
        self.optimizer.step(&mut self.model, &grads);

        let elapsed = t0.elapsed().as_secs_f64();
        let tokens = batch.inputs.len();
        let stats = StepStats {
            step: self.step,
            loss,
            norm,
            lr,
            dt_ms: elapsed * 1000.0,
            tokens_per_sec: tokens as f64 / elapsed.max(f64::EPSILON),
        };
        info!(
            "step {:4} | loss: {:.6} | norm: {:.4} | lr {:.4e} | dt: {:.2}ms | tok/sec: {:.2}",
            stats.step, stats.loss, stats.norm, stats.lr, stats.dt_ms, stats.tokens_per_sec
        );
        debug!("loader position {}", self.loader.position());

        self.step += 1;
        self.last_batch = Some(batch);
        Ok(stats)
    }

    /// Train until the step counter reaches `max_steps`, then log the loss
    /// of the updated model on the last batch seen
    pub fn run(&mut self) -> Result<Vec<StepStats>> {
        info!(
            "training {} parameters for {} steps, {} tokens per step",
            self.model.num_parameters(),
            self.config.max_steps,
            self.loader.tokens_per_batch()
        );
        let mut history = Vec::with_capacity(self.config.max_steps.saturating_sub(self.step));
        while self.step < self.config.max_steps {
            history.push(self.step()?);
        }
        if let Some(loss) = self.last_batch_loss()? {
            info!("final loss: {loss:.6}");
        }
        Ok(history)
    }

    /// Loss of the current model on the most recent batch, `None` before the first step
    pub fn last_batch_loss(&self) -> Result<Option<f32>> {
        match &self.last_batch {
            Some(batch) => {
                let (_, loss) = self.model.forward(&batch.inputs, Some(&batch.targets))?;
                Ok(loss)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tiny_config() -> TrainConfig {
        TrainConfig {
            batch_size: 2,
            seq_len: 4,
            max_lr: 1e-2,
            warmup_steps: 2,
            max_steps: 6,
            vocab_size: 16,
            ..TrainConfig::default()
        }
    }

    fn trainer(config: TrainConfig) -> Trainer {
        let model = GPT::new(ModelConfig::tiny(), &mut StdRng::seed_from_u64(config.seed)).unwrap();
        let tokens: Vec<usize> = (0..64).map(|i| (i * 5 + i / 3) % 16).collect();
        let loader = DataLoaderLite::new(tokens, config.batch_size, config.seq_len).unwrap();
        Trainer::new(model, loader, config).unwrap()
    }

    #[test]
    fn test_defaults_match_reference_run() {
        let config = TrainConfig::default();
        assert_eq!((config.batch_size, config.seq_len), (16, 1024));
        assert_eq!(config.vocab_size, 50304);
        assert!((config.min_lr() - 3e-5).abs() < 1e-10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_hyperparameters() {
        let mut bad = vec![TrainConfig::default(); 4];
        bad[0].warmup_steps = 0;
        bad[1].max_steps = 5;
        bad[2].max_lr = 0.0;
        bad[3].batch_size = 0;
        for config in bad {
            assert!(matches!(config.validate(), Err(GptError::ConfigInvalid(_))), "{config:?}");
        }
    }

    #[test]
    fn test_load_json_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(&path, r#"{ "batch_size": 4, "max_steps": 20 }"#).unwrap();
        let config = TrainConfig::load_json(&path).unwrap();
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.max_steps, 20);
        assert_eq!(config.seq_len, 1024);

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(TrainConfig::load_json(&path), Err(GptError::Format(_))));
    }

    #[test]
    fn test_step_sets_scheduled_lr_before_update() {
        let mut trainer = trainer(tiny_config());
        let first = trainer.step().unwrap();
        assert_eq!(first.step, 0);
        assert!((first.lr - 5e-3).abs() < 1e-9);
        assert_eq!(trainer.optimizer().lr, first.lr);
        assert_eq!(trainer.optimizer().t, 1);
        assert_eq!(trainer.current_step(), 1);
        assert!(first.loss.is_finite() && first.loss > 0.0);
        assert!(first.norm > 0.0);
    }

    #[test]
    fn test_run_stops_at_max_steps_and_is_deterministic() {
        let mut a = trainer(tiny_config());
        let mut b = trainer(tiny_config());
        let history = a.run().unwrap();
        assert_eq!(history.len(), 6);
        assert_eq!(history.last().unwrap().step, 5);
        assert_eq!(a.current_step(), 6);

        let losses = |h: &[StepStats]| h.iter().map(|s| s.loss).collect::<Vec<_>>();
        assert_eq!(losses(&history), losses(&b.run().unwrap()));
        assert_eq!(a.model().state_dict(), b.model().state_dict());
    }

    #[test]
    fn test_last_batch_loss_reflects_update() {
        let mut trainer = trainer(tiny_config());
        assert!(trainer.last_batch_loss().unwrap().is_none());
        let stats = trainer.step().unwrap();
        let after = trainer.last_batch_loss().unwrap().unwrap();
        assert!(after.is_finite());
        assert_ne!(after, stats.loss);
    }

    #[test]
    fn test_rejects_sequences_longer_than_block() {
        let config = TrainConfig {
            seq_len: 9,
            ..tiny_config()
        };
        let model = GPT::new(ModelConfig::tiny(), &mut StdRng::seed_from_u64(0)).unwrap();
        let loader = DataLoaderLite::new((0..64).map(|i| i % 16).collect(), 2, 9).unwrap();
        assert!(matches!(
            Trainer::new(model, loader, config),
            Err(GptError::SequenceTooLong { len: 9, block_size: 8 })
        ));
    }

    #[test]
    fn test_rejects_loader_with_other_batch_shape() {
        let model = GPT::new(ModelConfig::tiny(), &mut StdRng::seed_from_u64(0)).unwrap();
        let loader = DataLoaderLite::new((0..64).map(|i| i % 16).collect(), 4, 4).unwrap();
        assert!(matches!(
            Trainer::new(model, loader, tiny_config()),
            Err(GptError::ConfigInvalid(_))
        ));
    }
}
