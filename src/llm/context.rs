//! Context window bookkeeping.
//!
//! [`ConversationState`] mirrors what the engine has evaluated. Every batch
//! goes through [`ConversationState::prepare`] (overflow handling and session
//! prefix reuse) and, once decoded, [`ConversationState::commit`].

use super::session::SessionCache;
use super::{GenerationEngine, Token};
use crate::error::Result;
use tracing::{debug, warn};

/// Tokens ready for the decoder after overflow handling and cache reuse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prepared {
    /// Tokens still to be decoded, starting at the current `n_past`.
    pub tokens: Vec<Token>,
    /// The context overflowed and was rebuilt from the kept prompt.
    pub evicted: bool,
    /// Leading tokens satisfied by the session cache instead of decoding.
    pub reused: usize,
}

impl Prepared {
    /// Whether the step was satisfied entirely from the session cache.
    pub fn fully_reused(&self) -> bool {
        self.tokens.is_empty() && self.reused > 0
    }
}

/// Conversation state owned by the turn controller.
#[derive(Debug, Clone)]
pub struct ConversationState {
    history: Vec<Token>,
    n_past: usize,
    n_keep: usize,
    n_prev: usize,
    capacity: usize,
    session: SessionCache,
}

impl ConversationState {
    pub fn new(capacity: usize, n_prev: usize, session: SessionCache) -> Self {
        Self {
            history: Vec::new(),
            n_past: 0,
            n_keep: 0,
            n_prev,
            capacity,
            session,
        }
    }

    /// Shape `pending` for the next decode.
    ///
    /// On overflow the engine position rewinds to the kept prompt and the last
    /// `n_prev` history tokens are re-fed ahead of `pending`; persistence is
    /// switched off for good. Tokens the session cache already covers are then
    /// applied without decoding.
    pub fn prepare(&mut self, pending: Vec<Token>) -> Prepared {
        let mut prepared = Prepared {
            tokens: pending,
            ..Prepared::default()
        };
        if prepared.tokens.is_empty() {
            return prepared;
        }

        if self.n_past + prepared.tokens.len() > self.capacity {
            self.evict(&mut prepared.tokens);
            prepared.evicted = true;
        }

        let reused = self.session.consume_prefix(&prepared.tokens);
        if reused > 0 {
            self.history.extend(prepared.tokens.drain(..reused));
            self.n_past += reused;
            prepared.reused = reused;
            debug!(reused, n_past = self.n_past, "reused tokens from session");
        }

        if !prepared.tokens.is_empty() {
            self.session.extend(&prepared.tokens);
        }
        prepared
    }

    fn evict(&mut self, pending: &mut Vec<Token>) {
        let start = self.history.len().saturating_sub(self.n_prev);
        let carried = &self.history[start..];
        warn!(
            n_past = self.n_past,
            n_keep = self.n_keep,
            carried = carried.len(),
            "context full, rebuilding from kept prompt"
        );

        self.n_past = self.n_keep;
        pending.splice(0..0, carried.iter().copied());

        if self.session.disable() {
            warn!("context overflow, session persistence disabled");
        }
        self.session.truncate_unconsumed();

        if self.n_past + pending.len() > self.capacity {
            warn!(
                n_past = self.n_past,
                pending = pending.len(),
                capacity = self.capacity,
                "rebuilt batch still exceeds context"
            );
        }
    }

    /// Record tokens that were successfully decoded.
    pub fn commit(&mut self, sent: &[Token]) {
        self.history.extend_from_slice(sent);
        self.n_past += sent.len();
    }

    /// Freeze the currently evaluated tokens as the never-evicted prompt.
    pub fn pin_prompt(&mut self) {
        self.n_keep = self.n_past;
    }

    /// Persist the history if the cache asked for it.
    ///
    /// # Errors
    ///
    /// Propagates the engine's save failure.
    pub fn save_if_needed<E: GenerationEngine + ?Sized>(&mut self, engine: &mut E) -> Result<bool> {
        if !self.session.needs_save() {
            return Ok(false);
        }
        self.session.save(engine, &self.history)?;
        Ok(true)
    }

    /// Last evaluated token and its position, for re-deriving logits.
    pub fn last_evaluated(&self) -> Option<(Token, usize)> {
        if self.n_past == 0 {
            return None;
        }
        self.history.last().map(|&t| (t, self.n_past - 1))
    }

    /// The last `n` history tokens (fewer if the history is shorter).
    pub fn recent(&self, n: usize) -> &[Token] {
        &self.history[self.history.len().saturating_sub(n)..]
    }

    pub fn history(&self) -> &[Token] {
        &self.history
    }

    pub fn n_past(&self) -> usize {
        self.n_past
    }

    pub fn n_keep(&self) -> usize {
        self.n_keep
    }

    pub fn n_prev(&self) -> usize {
        self.n_prev
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn session(&self) -> &SessionCache {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionCache {
        &mut self.session
    }
}
