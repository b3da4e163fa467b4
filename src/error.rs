//! Crate-wide error type
//!
//! Every failure in the library is a configuration or programming error
//! surfaced immediately; nothing here is retried.

use std::fmt;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, GptError>;

/// Disagreement between a weight source and the model it is loaded into
#[derive(Debug, Clone, PartialEq)]
pub enum Mismatch {
    /// Names the model expects but the source lacks
    MissingKeys(Vec<String>),
    /// Names the source provides but the model doesn't have
    UnexpectedKeys(Vec<String>),
    /// A tensor whose shape differs (after any transposition)
    Shape {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::MissingKeys(keys) => write!(f, "missing keys {keys:?}"),
            Mismatch::UnexpectedKeys(keys) => write!(f, "unexpected keys {keys:?}"),
            Mismatch::Shape {
                name,
                expected,
                found,
            } => write!(f, "`{name}` expected shape {expected:?}, found {found:?}"),
        }
    }
}

/// Errors produced by model construction, training and weight import.
///
/// # Variants
///
/// - **ConfigInvalid**: a model or training configuration fails validation,
///   e.g. `n_embd` not divisible by `n_head`. Raised at construction time.
/// - **SequenceTooLong**: an input sequence is longer than `block_size`.
///   Raised before any computation; sequences are never truncated.
/// - **ShapeMismatch**: a pretrained state dict doesn't match the model. The
///   import is aborted before any tensor is written.
/// - **TokenOutOfRange**: a token id is not below the vocabulary size.
/// - **InvalidInput**: an id grid the model can't run on, such as an empty
///   grid or targets whose shape doesn't match the logits.
/// - **CorpusTooSmall**: the corpus can't fill a single `B*T+1` window.
/// - **UnknownModelFamily**: an unrecognized pretrained family name.
/// - **Format**: malformed tokenizer, weight or config files.
/// - **Io**: reading a file failed.
#[derive(Debug)]
pub enum GptError {
    ConfigInvalid(String),
    SequenceTooLong { len: usize, block_size: usize },
    ShapeMismatch(Mismatch),
    TokenOutOfRange { token: usize, vocab_size: usize },
    InvalidInput(String),
    CorpusTooSmall { tokens: usize, needed: usize },
    UnknownModelFamily(String),
    Format(String),
    Io(std::io::Error),
}

impl fmt::Display for GptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GptError::ConfigInvalid(msg) => write!(f, "invalid config: {msg}"),
            GptError::SequenceTooLong { len, block_size } => write!(
                f,
                "cannot forward sequence of length {len}, block size is only {block_size}"
            ),
            GptError::ShapeMismatch(m) => write!(f, "state dict mismatch: {m}"),
            GptError::TokenOutOfRange { token, vocab_size } => {
                write!(f, "token id {token} out of range for vocab size {vocab_size}")
            }
            GptError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            GptError::CorpusTooSmall { tokens, needed } => write!(
                f,
                "corpus has {tokens} tokens but one batch needs {needed}"
            ),
            GptError::UnknownModelFamily(name) => write!(
                f,
                "unknown model family `{name}` (expected gpt2, gpt2-medium, gpt2-large or gpt2-xl)"
            ),
            GptError::Format(msg) => write!(f, "format error: {msg}"),
            GptError::Io(e) => write!(f, "io: {e}"),
        }
    }
}

impl std::error::Error for GptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GptError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for GptError {
    fn from(e: std::io::Error) -> Self {
        GptError::Io(e)
    }
}

impl From<serde_json::Error> for GptError {
    fn from(e: serde_json::Error) -> Self {
        GptError::Format(e.to_string())
    }
}

impl From<Mismatch> for GptError {
    fn from(m: Mismatch) -> Self {
        GptError::ShapeMismatch(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display_sequence_too_long() {
        let err = GptError::SequenceTooLong {
            len: 9,
            block_size: 8,
        };
        assert_eq!(
            err.to_string(),
            "cannot forward sequence of length 9, block size is only 8"
        );
    }

    #[test]
    fn test_io_source_is_preserved() {
        let err: GptError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(err.source().is_some());
        assert!(GptError::ConfigInvalid("x".into()).source().is_none());
    }

    #[test]
    fn test_shape_mismatch_display() {
        let err: GptError = Mismatch::Shape {
            name: "transformer.wpe.weight".into(),
            expected: vec![8, 4],
            found: vec![4, 8],
        }
        .into();
        assert!(err.to_string().contains("transformer.wpe.weight"));
    }
}
