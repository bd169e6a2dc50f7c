//! Token-window text chunker.
//!
//! Splits a file's extracted text into ordered [`Chunk`]s of at most
//! `max_part_tokens` tokens each. Splitting is lossless: concatenating the
//! text of every chunk reproduces the normalized input byte for byte.
//!
//! # Algorithm
//!
//! 1. Normalize the text (strip a BOM, convert line endings to `\n`, trim).
//! 2. Cut it into tokens. A token is a run of non-whitespace characters
//!    plus the whitespace that follows it, so tokens are never split.
//! 3. Greedily fill a window with tokens until the next one would exceed
//!    the budget. A single oversized token still forms its own chunk.
//! 4. Under [`BoundaryPolicy::Sentence`], pull the cut back to the last
//!    sentence or paragraph end in the window, as long as that keeps at
//!    least half of the window.
//!
//! # Example
//!
//! ```rust
//! use embedstore_core::chunk::{split_text, ChunkPolicy};
//!
//! let chunks = split_text("one two three four five", &ChunkPolicy::new(2)).unwrap();
//! assert_eq!(chunks.len(), 3);
//! assert_eq!(chunks[0].text, "one two ");
//! assert_eq!(chunks[2].count, 3);
//! ```

use crate::error::{Result, StoreError};

/// Default token budget per part.
pub const DEFAULT_MAX_PART_TOKENS: usize = 512;

/// Approximate characters-per-token ratio for [`TokenCounting::ApproxChars`].
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// How a token is weighed against the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCounting {
    /// Every whitespace-delimited word costs one token.
    Words,
    /// A word costs `ceil(chars / chars_per_token)` tokens (at least one).
    ApproxChars { chars_per_token: usize },
}

/// Where a window may be cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryPolicy {
    /// Prefer cutting after a sentence end (`.`, `!`, `?`) or a blank line.
    Sentence,
    /// Always fill the window.
    Whitespace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    pub max_part_tokens: usize,
    pub counting: TokenCounting,
    pub boundary: BoundaryPolicy,
}

impl ChunkPolicy {
    /// Word counting with sentence boundaries.
    pub fn new(max_part_tokens: usize) -> Self {
        Self {
            max_part_tokens,
            counting: TokenCounting::Words,
            boundary: BoundaryPolicy::Sentence,
        }
    }

    pub fn with_counting(mut self, counting: TokenCounting) -> Self {
        self.counting = counting;
        self
    }

    pub fn with_boundary(mut self, boundary: BoundaryPolicy) -> Self {
        self.boundary = boundary;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_part_tokens == 0 {
            return Err(StoreError::invalid("max_part_tokens", "must be greater than 0"));
        }
        if let TokenCounting::ApproxChars { chars_per_token: 0 } = self.counting {
            return Err(StoreError::invalid("chars_per_token", "must be greater than 0"));
        }
        Ok(())
    }

    fn cost(&self, token: &str) -> usize {
        match self.counting {
            TokenCounting::Words => 1,
            TokenCounting::ApproxChars { chars_per_token } => token
                .trim_end()
                .chars()
                .count()
                .div_ceil(chars_per_token)
                .max(1),
        }
    }
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PART_TOKENS)
    }
}

/// One slice of the normalized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: u32,
    pub count: u32,
    pub text: String,
    /// Token count under the policy that produced the chunk.
    pub tokens: u64,
}

/// Normalize text before splitting.
pub fn normalize_text(text: &str) -> String {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    text.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

/// Split `text` into chunks under `policy`.
///
/// Fails with [`StoreError::EmptyInput`] when nothing but whitespace is left
/// after normalization.
pub fn split_text(text: &str, policy: &ChunkPolicy) -> Result<Vec<Chunk>> {
    policy.validate()?;
    let normalized = normalize_text(text);
    if normalized.is_empty() {
        return Err(StoreError::EmptyInput);
    }

    let tokens = tokenize(&normalized);
    let costs: Vec<usize> = tokens.iter().map(|t| policy.cost(t)).collect();

    let mut spans: Vec<(usize, usize, usize)> = Vec::new();
    let mut start = 0;
    while start < tokens.len() {
        let mut end = start;
        let mut budget = 0;
        while end < tokens.len() {
            if end > start && budget + costs[end] > policy.max_part_tokens {
                break;
            }
            budget += costs[end];
            end += 1;
        }

        if policy.boundary == BoundaryPolicy::Sentence && end < tokens.len() {
            let window = end - start;
            if let Some(last) = (start..end).rev().find(|&i| ends_sentence(tokens[i])) {
                let kept = last + 1 - start;
                if kept * 2 >= window {
                    end = last + 1;
                }
            }
        }

        let used: usize = costs[start..end].iter().sum();
        spans.push((start, end, used));
        start = end;
    }

    let count = spans.len() as u32;
    Ok(spans
        .into_iter()
        .enumerate()
        .map(|(index, (start, end, used))| Chunk {
            index: index as u32,
            count,
            text: tokens[start..end].concat(),
            tokens: used as u64,
        })
        .collect())
}

/// Cut text into tokens, each a word plus its trailing whitespace.
fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut in_space = false;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            in_space = true;
        } else if in_space {
            tokens.push(&text[start..i]);
            start = i;
            in_space = false;
        }
    }
    if start < text.len() {
        tokens.push(&text[start..]);
    }
    tokens
}

fn ends_sentence(token: &str) -> bool {
    let word = token.trim_end();
    let gap = &token[word.len()..];
    gap.contains("\n\n") || word.ends_with(['.', '!', '?'])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
    }

    fn assert_well_formed(chunks: &[Chunk], normalized: &str) {
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, normalized);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i as u32);
            assert_eq!(c.count, chunks.len() as u32);
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = split_text("Hello, world!", &ChunkPolicy::new(50)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].tokens, 2);
    }

    #[test]
    fn test_two_hundred_words_fifty_per_part() {
        let text = words(200);
        let chunks = split_text(&text, &ChunkPolicy::new(50)).unwrap();
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.tokens == 50));
        assert_well_formed(&chunks, &text);
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(
            split_text("", &ChunkPolicy::new(10)),
            Err(StoreError::EmptyInput)
        ));
        assert!(matches!(
            split_text(" \r\n\t ", &ChunkPolicy::new(10)),
            Err(StoreError::EmptyInput)
        ));
    }

    #[test]
    fn test_zero_budget_rejected() {
        assert!(matches!(
            split_text("abc", &ChunkPolicy::new(0)),
            Err(StoreError::Invalid { .. })
        ));
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_text("\u{feff}  a\r\nb\rc \n"), "a\nb\nc");
        let chunks = split_text("\u{feff}line one\r\nline two\r\n", &ChunkPolicy::new(10)).unwrap();
        assert_eq!(chunks[0].text, "line one\nline two");
    }

    #[test]
    fn test_sentence_boundary_preferred() {
        let text = "Alpha beta gamma. Delta epsilon zeta eta theta iota.";
        let chunks = split_text(text, &ChunkPolicy::new(5)).unwrap();
        assert_eq!(chunks[0].text, "Alpha beta gamma. ");
        assert_well_formed(&chunks, text);

        let hard = ChunkPolicy::new(5).with_boundary(BoundaryPolicy::Whitespace);
        let chunks = split_text(text, &hard).unwrap();
        assert_eq!(chunks[0].text, "Alpha beta gamma. Delta epsilon ");
    }

    #[test]
    fn test_early_boundary_ignored() {
        let text = "Yes. one two three four five six seven";
        let chunks = split_text(text, &ChunkPolicy::new(6)).unwrap();
        assert_eq!(chunks[0].tokens, 6);
    }

    #[test]
    fn test_paragraph_break_is_boundary() {
        let text = "one two three\n\nfour five six seven";
        let chunks = split_text(text, &ChunkPolicy::new(5)).unwrap();
        assert_eq!(chunks[0].text, "one two three\n\n");
        assert_well_formed(&chunks, text);
    }

    #[test]
    fn test_oversized_token_kept_whole() {
        let long = "x".repeat(100);
        let text = format!("a {} b", long);
        let policy = ChunkPolicy::new(5).with_counting(TokenCounting::ApproxChars {
            chars_per_token: 4,
        });
        let chunks = split_text(&text, &policy).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].text.trim_end(), long);
        assert_eq!(chunks[1].tokens, 25);
        assert_well_formed(&chunks, &text);
    }

    #[test]
    fn test_multibyte_text() {
        let text = "┌──────┐ │ héllo wörld │ └──────┘ 日本語 テキスト";
        let policy = ChunkPolicy::new(2).with_counting(TokenCounting::ApproxChars {
            chars_per_token: 3,
        });
        let chunks = split_text(text, &policy).unwrap();
        assert!(chunks.len() > 1);
        assert_well_formed(&chunks, text);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha. Beta gamma.\n\nDelta epsilon. Zeta";
        let c1 = split_text(text, &ChunkPolicy::new(3)).unwrap();
        let c2 = split_text(text, &ChunkPolicy::new(3)).unwrap();
        assert_eq!(c1, c2);
    }
}
