//! Tokenization
//!
//! Language models never see raw text, they see token ids. Everything that
//! turns text into ids and back implements [`TokenCodec`]:
//!
//! - [`Gpt2Tokenizer`]: the published GPT-2 byte-level BPE (50257 tokens),
//!   loaded from `vocab.json` and `merges.txt`
//! - [`ByteTokenizer`]: one token per byte (256 tokens), for offline runs
//!   and tests
//!
//! ## Byte-Level BPE
//!
//! GPT-2 never fails to encode: every input byte first maps to one printable
//! unicode character, so the base vocabulary covers all 256 byte values.
//! Merges then join adjacent symbols, always applying the lowest-ranked
//! (earliest learned) pair first, until no ranked pair is left:
//!
//! ```text
//! " hello"  →  Ġ h e l l o          (Ġ is the mapped space byte)
//!           →  Ġ h e ll o           rank of (l, l) is lowest
//!           →  Ġh e ll o
//!           →  Ġhe ll o
//!           →  Ġhell o
//!           →  Ġhello               one token
//! ```
//!
//! ## Pre-tokenization
//!
//! Merges never cross word boundaries. Text is first split into pieces:
//!
//! ```text
//! 's 't 're 've 'm 'll 'd       contractions
//! ␣?letters                     a letter run with at most one leading space
//! ␣?digits                      a digit run with at most one leading space
//! ␣?other                       a run of anything else with at most one leading space
//! whitespace                    a whitespace run, leaving its last character
//!                               to lead the next word
//! ```
//!
//! ## Parallel Encoding
//!
//! Large texts are pre-tokenized once and the pieces encoded in parallel
//! chunks. Because chunks split on piece boundaries the result is identical
//! to sequential encoding.

use crate::error::{GptError, Result};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// Conversion between text and token ids
pub trait TokenCodec: Send + Sync {
    fn encode(&self, text: &str) -> Vec<usize>;

    /// Ids outside the vocabulary are skipped; invalid UTF-8 is replaced
    fn decode(&self, ids: &[usize]) -> String;

    fn vocab_size(&self) -> usize;
}

/// One token per byte
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteTokenizer;

impl TokenCodec for ByteTokenizer {
    fn encode(&self, text: &str) -> Vec<usize> {
        text.bytes().map(usize::from).collect()
    }

    fn decode(&self, ids: &[usize]) -> String {
        let bytes: Vec<u8> = ids.iter().filter_map(|&id| u8::try_from(id).ok()).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn vocab_size(&self) -> usize {
        256
    }
}

/// Pieces encoded per parallel task
const PIECES_PER_CHUNK: usize = 4096;

/// Texts shorter than this are encoded on the calling thread
const PARALLEL_THRESHOLD: usize = 200_000;

/// The GPT-2 byte-level BPE tokenizer
#[derive(Debug, Clone)]
pub struct Gpt2Tokenizer {
    encoder: HashMap<String, usize>,
    /// Inverse of `encoder`, indexed by id
    decoder: Vec<Option<String>>,
    ranks: HashMap<(String, String), usize>,
    byte_encoder: [char; 256],
    byte_decoder: HashMap<char, u8>,
}

/// Map each byte to a printable character
///
/// Printable latin-1 bytes map to themselves; the rest (control characters,
/// space, ...) are shifted to code points from 256 upward, in byte order.
pub fn bytes_to_unicode() -> [char; 256] {
    let mut table = ['\0'; 256];
    let mut shifted = 0u32;
    for b in 0..=255u8 {
        let printable = matches!(b, b'!'..=b'~' | 0xA1..=0xAC | 0xAE..=0xFF);
        let code = if printable {
            u32::from(b)
        } else {
            shifted += 1;
            255 + shifted
        };
        // every value is below the surrogate range
        table[usize::from(b)] = char::from_u32(code).unwrap_or('\u{FFFD}');
    }
    table
}

impl Gpt2Tokenizer {
    /// Load `vocab.json` and `merges.txt` from a directory
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        Self::from_files(dir.join("vocab.json"), dir.join("merges.txt"))
    }

    pub fn from_files<P: AsRef<Path>, Q: AsRef<Path>>(vocab: P, merges: Q) -> Result<Self> {
        let encoder: HashMap<String, usize> = serde_json::from_str(&fs::read_to_string(vocab)?)?;
        let merges = parse_merges(&fs::read_to_string(merges)?)?;
        let tokenizer = Self::from_parts(encoder, merges)?;
        info!(
            "loaded gpt-2 tokenizer: {} tokens, {} merges",
            tokenizer.vocab_size(),
            tokenizer.ranks.len()
        );
        Ok(tokenizer)
    }

    /// Build from an encoder map and merges in rank order.
    ///
    /// Fails with [`GptError::Format`] unless every byte symbol and every
    /// merge result is in the vocabulary, so encoding can't produce an
    /// unknown token.
    pub fn from_parts(encoder: HashMap<String, usize>, merges: Vec<(String, String)>) -> Result<Self> {
        let byte_encoder = bytes_to_unicode();
        if let Some(missing) = byte_encoder
            .iter()
            .map(char::to_string)
            .find(|symbol| !encoder.contains_key(symbol))
        {
            return Err(GptError::Format(format!(
                "vocabulary has no entry for byte symbol {missing:?}"
            )));
        }
        if let Some((a, b)) = merges
            .iter()
            .find(|(a, b)| !encoder.contains_key(&format!("{a}{b}")))
        {
            return Err(GptError::Format(format!(
                "merge ({a:?}, {b:?}) produces a token missing from the vocabulary"
            )));
        }

        let size = encoder.values().max().map_or(0, |&max| max + 1);
        let mut decoder = vec![None; size];
        for (token, &id) in &encoder {
            decoder[id] = Some(token.clone());
        }
        let byte_decoder = byte_encoder
            .iter()
            .enumerate()
            .map(|(b, &c)| (c, b as u8))
            .collect();
        let ranks = merges
            .into_iter()
            .enumerate()
            .map(|(rank, pair)| (pair, rank))
            .collect();

        Ok(Self {
            encoder,
            decoder,
            ranks,
            byte_encoder,
            byte_decoder,
        })
    }

    /// Id of a whole token string, e.g. `"<|endoftext|>"`
    pub fn token_id(&self, token: &str) -> Option<usize> {
        self.encoder.get(token).copied()
    }

    /// Apply ranked merges to one pre-tokenized piece
    fn bpe(&self, piece: &str) -> Vec<String> {
        let mut symbols: Vec<String> = piece
            .bytes()
            .map(|b| self.byte_encoder[usize::from(b)].to_string())
            .collect();

        while symbols.len() > 1 {
            let best = symbols
                .windows(2)
                .filter_map(|w| self.ranks.get(&(w[0].clone(), w[1].clone())))
                .min();
            let Some(&rank) = best else { break };

            let mut merged = Vec::with_capacity(symbols.len());
            let mut i = 0;
            while i < symbols.len() {
                if i + 1 < symbols.len()
                    && self.ranks.get(&(symbols[i].clone(), symbols[i + 1].clone())) == Some(&rank)
                {
                    merged.push(format!("{}{}", symbols[i], symbols[i + 1]));
                    i += 2;
                } else {
                    merged.push(symbols[i].clone());
                    i += 1;
                }
            }
            symbols = merged;
        }
        symbols
    }

    fn encode_pieces(&self, pieces: &[&str]) -> Vec<usize> {
        let mut cache: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut ids = Vec::with_capacity(pieces.len());
        for &piece in pieces {
            let encoded = cache.entry(piece).or_insert_with(|| {
                self.bpe(piece)
                    .iter()
                    // from_parts guarantees every symbol is in the vocabulary
                    .filter_map(|symbol| self.encoder.get(symbol).copied())
                    .collect()
            });
            ids.extend_from_slice(encoded);
        }
        ids
    }
}

impl TokenCodec for Gpt2Tokenizer {
    fn encode(&self, text: &str) -> Vec<usize> {
        let pieces = pretokenize(text);
        if text.len() < PARALLEL_THRESHOLD {
            return self.encode_pieces(&pieces);
        }
        pieces
            .par_chunks(PIECES_PER_CHUNK)
            .map(|chunk| self.encode_pieces(chunk))
            .collect::<Vec<_>>()
            .concat()
    }

    fn decode(&self, ids: &[usize]) -> String {
        let bytes: Vec<u8> = ids
            .iter()
            .filter_map(|&id| self.decoder.get(id).and_then(Option::as_deref))
            .flat_map(str::chars)
            .filter_map(|c| self.byte_decoder.get(&c).copied())
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn vocab_size(&self) -> usize {
        self.decoder.len()
    }
}

/// Parse `merges.txt`: an optional `#version` header, then one `a b` pair per line
pub fn parse_merges(text: &str) -> Result<Vec<(String, String)>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.is_empty() && !line.starts_with("#version"))
        .map(|(n, line)| match line.split_once(' ') {
            Some((a, b)) if !a.is_empty() && !b.is_empty() && !b.contains(' ') => {
                Ok((a.to_string(), b.to_string()))
            }
            _ => Err(GptError::Format(format!(
                "merges line {}: expected two space-separated symbols, got {:?}",
                n + 1,
                line
            ))),
        })
        .collect()
}

// ==================== PRE-TOKENIZATION ====================

const CONTRACTIONS: [&str; 7] = ["s", "t", "re", "ve", "m", "ll", "d"];

#[derive(Clone, Copy, PartialEq)]
enum Class {
    Letter,
    Digit,
    Space,
    Other,
}

fn class_of(c: char) -> Class {
    if c.is_alphabetic() {
        Class::Letter
    } else if c.is_numeric() {
        Class::Digit
    } else if c.is_whitespace() {
        Class::Space
    } else {
        Class::Other
    }
}

/// Split text into the pieces BPE runs on.
///
/// Concatenating the pieces gives back `text` exactly.
pub fn pretokenize(text: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let offset = |i: usize| chars.get(i).map_or(text.len(), |&(o, _)| o);
    let run_end = |from: usize, class: Class| {
        let mut j = from;
        while j < chars.len() && class_of(chars[j].1) == class {
            j += 1;
        }
        j
    };

    let mut pieces = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (start, c) = chars[i];

        if c == '\'' {
            let rest = &text[start + 1..];
            if let Some(suffix) = CONTRACTIONS.iter().find(|s| rest.starts_with(*s)) {
                let end = start + 1 + suffix.len();
                pieces.push(&text[start..end]);
                while offset(i) < end {
                    i += 1;
                }
                continue;
            }
        }

        // a single leading space attaches to the following non-space run
        let body = if c == ' ' { i + 1 } else { i };
        let body_class = chars.get(body).map(|&(_, b)| class_of(b));
        let end = match body_class {
            Some(class @ (Class::Letter | Class::Digit | Class::Other)) => run_end(body, class),
            _ => {
                let end = run_end(i, Class::Space);
                if end < chars.len() && end - i > 1 {
                    // the last space leads the next word
                    end - 1
                } else {
                    end
                }
            }
        };
        pieces.push(&text[start..offset(end)]);
        i = end;
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// A byte vocabulary plus the merges needed for " hello" and "ll"
    fn toy_tokenizer() -> Gpt2Tokenizer {
        let mut encoder: HashMap<String, usize> = bytes_to_unicode()
            .iter()
            .enumerate()
            .map(|(i, c)| (c.to_string(), i))
            .collect();
        let merges: Vec<(String, String)> = [("l", "l"), ("Ġ", "h"), ("Ġh", "e"), ("Ġhe", "ll"), ("Ġhell", "o")]
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        for (a, b) in &merges {
            let next = encoder.len();
            encoder.insert(format!("{a}{b}"), next);
        }
        Gpt2Tokenizer::from_parts(encoder, merges).unwrap()
    }

    #[test]
    fn test_byte_tokenizer_roundtrip() {
        let codec = ByteTokenizer;
        let ids = codec.encode("héllo");
        assert_eq!(ids.len(), 6);
        assert_eq!(codec.decode(&ids), "héllo");
        assert_eq!(codec.decode(&[104, 300, 105]), "hi");
        assert_eq!(codec.vocab_size(), 256);
    }

    #[test]
    fn test_bytes_to_unicode_is_a_bijection() {
        let table = bytes_to_unicode();
        assert_eq!(table[usize::from(b'A')], 'A');
        assert_eq!(table[usize::from(b' ')], 'Ġ');
        assert_eq!(table[usize::from(b'\n')], 'Ċ');
        let mut seen: Vec<char> = table.to_vec();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 256);
    }

    #[test]
    fn test_pretokenize_gpt2_rules() {
        assert_eq!(
            pretokenize("Hello world, it's 2024!"),
            vec!["Hello", " world", ",", " it", "'s", " 2024", "!"]
        );
        // the last space of a run leads the next word
        assert_eq!(pretokenize("a   b"), vec!["a", "  ", " b"]);
        assert_eq!(pretokenize("a\n\nb"), vec!["a", "\n", "\n", "b"]);
        assert_eq!(pretokenize("end  "), vec!["end", "  "]);
        assert_eq!(pretokenize("'quote'"), vec!["'", "quote", "'"]);
        assert_eq!(pretokenize("we'll"), vec!["we", "'ll"]);
    }

    #[test]
    fn test_pretokenize_is_lossless() {
        let text = "First Citizen:\nBefore we proceed any further, hear me speak.\n\n  All:\tSpeak, speak. ünï 42x";
        assert_eq!(pretokenize(text).concat(), text);
    }

    #[test]
    fn test_merges_apply_in_rank_order() {
        let tok = toy_tokenizer();
        assert_eq!(tok.bpe(" hello"), vec!["Ġhello"]);
        assert_eq!(tok.bpe("hello"), vec!["h", "e", "ll", "o"]);

        let ids = tok.encode(" hello hello");
        assert_eq!(ids, vec![260, 260]);
        assert_eq!(tok.decode(&ids), " hello hello");
    }

    #[test]
    fn test_encode_decode_roundtrip_arbitrary_text() {
        let tok = toy_tokenizer();
        let text = "say hello, héllo\n\tworld 123 🙂";
        assert_eq!(tok.decode(&tok.encode(text)), text);
    }

    #[test]
    fn test_parallel_encoding_matches_sequential() {
        let tok = toy_tokenizer();
        let text = " hello there, friend.\n".repeat(12_000);
        assert!(text.len() >= PARALLEL_THRESHOLD);
        let parallel = tok.encode(&text);
        let sequential = tok.encode_pieces(&pretokenize(&text));
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_from_parts_rejects_incomplete_vocabulary() {
        let encoder: HashMap<String, usize> = [("a".to_string(), 0)].into_iter().collect();
        assert!(matches!(
            Gpt2Tokenizer::from_parts(encoder, Vec::new()),
            Err(GptError::Format(_))
        ));
    }

    #[test]
    fn test_parse_merges() {
        let merges = parse_merges("#version: 0.2\nĠ t\nh e\n").unwrap();
        let expected = vec![
            ("Ġ".to_string(), "t".to_string()),
            ("h".to_string(), "e".to_string()),
        ];
        assert_eq!(merges, expected);
        assert!(matches!(parse_merges("abc\n"), Err(GptError::Format(_))));
    }

    #[test]
    fn test_from_dir_reads_published_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder: HashMap<String, usize> = bytes_to_unicode()
            .iter()
            .enumerate()
            .map(|(i, c)| (c.to_string(), i))
            .collect();
        encoder.insert("ll".to_string(), 256);
        encoder.insert("<|endoftext|>".to_string(), 257);
        fs::write(dir.path().join("vocab.json"), serde_json::to_string(&encoder).unwrap()).unwrap();
        let mut merges = fs::File::create(dir.path().join("merges.txt")).unwrap();
        writeln!(merges, "#version: 0.2").unwrap();
        writeln!(merges, "l l").unwrap();

        let tok = Gpt2Tokenizer::from_dir(dir.path()).unwrap();
        assert_eq!(tok.vocab_size(), 258);
        assert_eq!(tok.token_id("<|endoftext|>"), Some(257));
        assert_eq!(tok.encode("all"), vec![usize::from(b'a'), 256]);
    }
}
