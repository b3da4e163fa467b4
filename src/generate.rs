//! Autoregressive Sampling
//!
//! Extends a prompt one token at a time:
//!
//! ```text
//! rows = prompt repeated num_return_sequences times
//! while len(rows) < max_length:
//!     logits = model(rows[:, -block_size:])[:, -1, :]     last position only
//!     probs  = softmax(logits)
//!     keep the top_k largest probabilities, renormalize
//!     sample one id per row, append it
//! ```
//!
//! Top-k sampling cuts off the long tail of unlikely tokens, which keeps
//! short generations from wandering into nonsense. Each row draws from the
//! same RNG in row order, so a seeded RNG reproduces the same samples.

use crate::data::TokenGrid;
use crate::error::{GptError, Result};
use crate::model::GPT;
use rand::Rng;
use rand_distr::weighted::WeightedIndex;
use rand_distr::Distribution;

/// Sampling settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleConfig {
    pub num_return_sequences: usize,
    /// Total row length, prompt included
    pub max_length: usize,
    pub top_k: usize,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            num_return_sequences: 5,
            max_length: 30,
            top_k: 50,
        }
    }
}

/// The `k` largest entries of `probs` as `(id, prob)`, largest first
///
/// Ties keep the lower id first.
pub fn top_k(probs: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(k);
    ranked
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Sample continuations of `prompt`, returning `num_return_sequences` rows
/// of exactly `max_length` ids (a longer prompt is cut to `max_length`).
pub fn generate<R: Rng + ?Sized>(
    model: &GPT,
    prompt: &[usize],
    config: &SampleConfig,
    rng: &mut R,
) -> Result<Vec<Vec<usize>>> {
    if prompt.is_empty() {
        return Err(GptError::InvalidInput("prompt must hold at least one token".to_string()));
    }
    if config.top_k == 0 || config.num_return_sequences == 0 {
        return Err(GptError::ConfigInvalid(format!(
            "top_k and num_return_sequences must be positive, got {} and {}",
            config.top_k, config.num_return_sequences
        )));
    }

    let n = config.num_return_sequences;
    let block_size = model.config.block_size;
    let vocab = model.config.vocab_size;
    let mut rows = vec![prompt.to_vec(); n];

    while rows[0].len() < config.max_length {
        let len = rows[0].len();
        let t = len.min(block_size);
        let context = rows.iter().flat_map(|row| row[len - t..].iter().copied()).collect();
        let (logits, _) = model.forward(&TokenGrid::new(context, n, t), None)?;

        for (b, row) in rows.iter_mut().enumerate() {
            let last = (b * t + t - 1) * vocab;
            let probs = softmax(&logits.data[last..last + vocab]);
            let candidates = top_k(&probs, config.top_k);
            let dist = WeightedIndex::new(candidates.iter().map(|&(_, p)| p))
                .map_err(|e| GptError::Format(format!("sampling weights: {e}")))?;
            row.push(candidates[dist.sample(rng)].0);
        }
    }

    for row in &mut rows {
        row.truncate(config.max_length);
    }
    Ok(rows)
}
