//! Paragraph-aware chunking with overlap
//!
//! Text is split on blank lines and paragraphs are packed greedily into chunks
//! of at most `max_chars` characters. Each new chunk is seeded with the trailing
//! paragraphs of the previous one that fit within `overlap_chars`, so adjacent
//! chunks share context.
//!
//! Paragraphs are never split. A single paragraph longer than `max_chars`
//! becomes its own chunk and overshoots the limit.

use crate::config::ChunkingConfig;
use crate::error::{Result, SourcegateError};
use regex::Regex;

const SEPARATOR: &str = "\n\n";
const SEPARATOR_LEN: usize = 2;

/// Splits raw document text into overlapping passages
#[derive(Debug, Clone)]
pub struct Chunker {
    max_chars: usize,
    overlap_chars: usize,
    paragraph_break: Regex,
}

impl Chunker {
    /// Create a chunker
    ///
    /// # Arguments
    /// * `max_chars` - Upper bound on chunk length (in characters)
    /// * `overlap_chars` - Budget for paragraphs carried into the next chunk
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self> {
        if max_chars == 0 {
            return Err(SourcegateError::InvalidConfigValue {
                path: "chunking.max_chars".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        let paragraph_break = Regex::new(r"\n\s*\n").map_err(|e| {
            SourcegateError::Config(format!("Invalid paragraph pattern: {}", e))
        })?;

        Ok(Self {
            max_chars,
            overlap_chars,
            paragraph_break,
        })
    }

    /// Create a chunker from configuration
    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.max_chars, config.overlap_chars)
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn overlap_chars(&self) -> usize {
        self.overlap_chars
    }

    /// Split text into chunks
    ///
    /// Returns an empty vector when the text has no non-blank paragraphs.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let paragraphs: Vec<&str> = self
            .paragraph_break
            .split(text)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        let mut chunks = Vec::new();
        let mut buffer: Vec<&str> = Vec::new();
        let mut buffer_len = 0usize;

        for para in paragraphs {
            let para_len = para.chars().count();

            if !buffer.is_empty() && buffer_len + SEPARATOR_LEN + para_len > self.max_chars {
                chunks.push(buffer.join(SEPARATOR));

                buffer = self.overlap_seed(&buffer);
                buffer_len = joined_len(&buffer);

                // The carried context must not push the next chunk past the limit
                while !buffer.is_empty() && buffer_len + SEPARATOR_LEN + para_len > self.max_chars
                {
                    buffer.remove(0);
                    buffer_len = joined_len(&buffer);
                }
            }

            if !buffer.is_empty() {
                buffer_len += SEPARATOR_LEN;
            }
            buffer.push(para);
            buffer_len += para_len;
        }

        if !buffer.is_empty() {
            chunks.push(buffer.join(SEPARATOR));
        }

        chunks
    }

    /// Trailing paragraphs of a sealed chunk that fit in the overlap budget,
    /// in their original order
    fn overlap_seed<'a>(&self, sealed: &[&'a str]) -> Vec<&'a str> {
        let mut seed = Vec::new();
        let mut seed_len = 0usize;

        for para in sealed.iter().rev() {
            let added = para.chars().count() + if seed.is_empty() { 0 } else { SEPARATOR_LEN };
            if seed_len + added > self.overlap_chars {
                break;
            }
            seed_len += added;
            seed.push(*para);
        }

        seed.reverse();
        seed
    }
}

fn joined_len(paragraphs: &[&str]) -> usize {
    if paragraphs.is_empty() {
        return 0;
    }
    paragraphs.iter().map(|p| p.chars().count()).sum::<usize>()
        + SEPARATOR_LEN * (paragraphs.len() - 1)
}
