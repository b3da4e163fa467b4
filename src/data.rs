//! Training Data Loading
//!
//! `DataLoaderLite` walks a flat token sequence in fixed `[B, T]` windows:
//!
//! ```text
//! tokens: [t0 t1 t2 t3 t4 t5 t6 t7 t8 t9 ...]      B = 2, T = 2
//!
//! batch 1 reads t0..=t4 (B*T + 1 tokens)
//!   inputs  [[t0 t1] [t2 t3]]
//!   targets [[t1 t2] [t3 t4]]
//! batch 2 reads t4..=t8
//!   inputs  [[t4 t5] [t6 t7]]
//!   targets [[t5 t6] [t7 t8]]
//! ```
//!
//! Targets are the inputs shifted left by one token. After each batch the
//! cursor moves forward by `B*T`; when the next read would run past the end
//! of the corpus it wraps back to 0. There is no shuffling.

use crate::error::{GptError, Result};
use crate::tokenizer::TokenCodec;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// A `[rows, cols]` grid of token ids in row-major order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrid {
    ids: Vec<usize>,
    rows: usize,
    cols: usize,
}

impl TokenGrid {
    /// # Panics
    ///
    /// Panics if `ids.len() != rows * cols`.
    pub fn new(ids: Vec<usize>, rows: usize, cols: usize) -> Self {
        assert_eq!(
            ids.len(),
            rows * cols,
            "token grid of {} ids can't be shaped [{}, {}]",
            ids.len(),
            rows,
            cols
        );
        Self { ids, rows, cols }
    }

    /// Grid from equal-length rows
    pub fn from_rows(rows: &[Vec<usize>]) -> Self {
        let cols = rows.first().map_or(0, Vec::len);
        let ids = rows.iter().flatten().copied().collect();
        Self::new(ids, rows.len(), cols)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn ids(&self) -> &[usize] {
        &self.ids
    }

    pub fn row(&self, r: usize) -> &[usize] {
        &self.ids[r * self.cols..(r + 1) * self.cols]
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// One training step's inputs and next-token targets, both `[B, T]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub inputs: TokenGrid,
    pub targets: TokenGrid,
}

/// Sequential batch loader over an in-memory token sequence
#[derive(Debug, Clone)]
pub struct DataLoaderLite {
    tokens: Vec<usize>,
    batch_size: usize,
    seq_len: usize,
    current_position: usize,
}

impl DataLoaderLite {
    /// Build a loader over already-tokenized data.
    ///
    /// Fails with [`GptError::CorpusTooSmall`] if the sequence can't supply a
    /// single `B*T + 1` window, and with [`GptError::ConfigInvalid`] if `B` or
    /// `T` is zero.
    pub fn new(tokens: Vec<usize>, batch_size: usize, seq_len: usize) -> Result<Self> {
        if batch_size == 0 || seq_len == 0 {
            return Err(GptError::ConfigInvalid(format!(
                "batch shape must be non-empty, got B={batch_size} T={seq_len}"
            )));
        }
        let needed = batch_size * seq_len + 1;
        if tokens.len() < needed {
            return Err(GptError::CorpusTooSmall {
                tokens: tokens.len(),
                needed,
            });
        }

        let loader = Self {
            tokens,
            batch_size,
            seq_len,
            current_position: 0,
        };
        info!("loaded {} tokens", loader.tokens.len());
        info!("1 epoch = {} batches", loader.batches_per_epoch());
        if loader.batches_per_epoch() == 1 {
            warn!("corpus holds a single batch; every step will see the same data");
        }
        Ok(loader)
    }

    /// Read a text corpus once, tokenize it and build a loader
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        codec: &dyn TokenCodec,
        batch_size: usize,
        seq_len: usize,
    ) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let tokens = codec.encode(&text);
        Self::new(tokens, batch_size, seq_len)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    /// Tokens consumed per batch
    pub fn tokens_per_batch(&self) -> usize {
        self.batch_size * self.seq_len
    }

    pub fn num_tokens(&self) -> usize {
        self.tokens.len()
    }

    /// Number of whole `B*T` windows in the corpus
    pub fn batches_per_epoch(&self) -> usize {
        self.tokens.len() / self.tokens_per_batch()
    }

    /// Cursor where the next batch starts
    pub fn position(&self) -> usize {
        self.current_position
    }

    pub fn reset(&mut self) {
        self.current_position = 0;
    }

    /// Next `(inputs, targets)` pair, advancing the cursor
    pub fn next_batch(&mut self) -> Batch {
        let (b, t) = (self.batch_size, self.seq_len);
        let n = b * t;
        let buf = &self.tokens[self.current_position..self.current_position + n + 1];

        let batch = Batch {
            inputs: TokenGrid::new(buf[..n].to_vec(), b, t),
            targets: TokenGrid::new(buf[1..].to_vec(), b, t),
        };

        self.current_position += n;
        if self.current_position + n + 1 > self.tokens.len() {
            self.current_position = 0;
        }
        batch
    }
}
