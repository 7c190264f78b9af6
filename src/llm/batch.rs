//! Batches handed to [`GenerationEngine::decode`].

use super::{GenerationEngine, Token};
use crate::error::Result;
use tracing::debug;

/// One token at an absolute context position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEntry {
    pub token: Token,
    pub pos: usize,
    /// Whether the engine should produce logits for this entry.
    pub logits: bool,
}

/// Ordered tokens for a single decode call, on sequence 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    entries: Vec<BatchEntry>,
}

impl Batch {
    /// Build a batch placing `tokens` at `n_past, n_past + 1, ...`.
    ///
    /// Only the final entry is marked for logits.
    pub fn from_pending(tokens: &[Token], n_past: usize) -> Self {
        let mut batch = Self {
            entries: Vec::with_capacity(tokens.len()),
        };
        for (i, &token) in tokens.iter().enumerate() {
            batch.add(token, n_past + i, false);
        }
        batch.mark_last_for_logits();
        batch
    }

    /// Append one entry.
    pub fn add(&mut self, token: Token, pos: usize, logits: bool) {
        self.entries.push(BatchEntry { token, pos, logits });
    }

    /// Ensure only the last entry is marked for logits.
    pub fn mark_last_for_logits(&mut self) {
        let n = self.entries.len();
        for (i, entry) in self.entries.iter_mut().enumerate() {
            entry.logits = i + 1 == n;
        }
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decode `tokens` starting at `n_past`. A no-op for empty input.
///
/// # Errors
///
/// Propagates the engine's decode failure unchanged. Decode errors are not retried.
pub fn decode_pending<E: GenerationEngine + ?Sized>(
    engine: &mut E,
    tokens: &[Token],
    n_past: usize,
) -> Result<()> {
    if tokens.is_empty() {
        return Ok(());
    }
    let batch = Batch::from_pending(tokens, n_past);
    debug!(n_tokens = batch.len(), n_past, "decoding batch");
    engine.decode(&batch)
}
