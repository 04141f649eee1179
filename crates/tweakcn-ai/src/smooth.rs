//! Word-chunked smoothing of text deltas.
//!
//! Providers deliver text in uneven bursts.  [`WordChunker`] re-slices the
//! text into whole words (each with its trailing whitespace) so the client
//! can render at a steady pace, with a fixed delay between chunks.

use std::time::Duration;

use regex::Regex;

use crate::error::{AiError, Result};

/// Delay between smoothed chunks.
pub const SMOOTH_DELAY: Duration = Duration::from_millis(10);

/// Buffers text and releases it a word at a time.
#[derive(Debug)]
pub struct WordChunker {
    pattern: Regex,
    buffer: String,
}

impl WordChunker {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(r"^\s*\S+\s+").map_err(|e| AiError::ConfigError {
            reason: format!("invalid word pattern: {e}"),
        })?;
        Ok(Self {
            pattern,
            buffer: String::new(),
        })
    }

    /// Add a delta and return every complete word now available.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);
        let mut chunks = Vec::new();
        while let Some(m) = self.pattern.find(&self.buffer) {
            let end = m.end();
            chunks.push(self.buffer[..end].to_owned());
            self.buffer.drain(..end);
        }
        chunks
    }

    /// Whatever is left once the text ends.
    pub fn flush(&mut self) -> Option<String> {
        (!self.buffer.is_empty()).then(|| std::mem::take(&mut self.buffer))
    }
}
