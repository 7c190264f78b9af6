//! Persisted generation state ("session cache").
//!
//! A session file pairs the engine's evaluated state with the tokens that
//! produced it. On startup the cached tokens are compared against the freshly
//! assembled prompt; the longest common prefix is reused instead of
//! re-decoded.

use super::{GenerationEngine, Token};
use crate::error::{Result, TalkError};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// How well a loaded cache lines up with the current prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMatch {
    /// Nothing cached, or persistence disabled.
    Empty,
    /// The whole prompt is covered by the cache.
    Exact,
    /// Some prefix matched.
    Partial { n_matching: usize },
    /// Less than half of the prompt matched.
    Low { n_matching: usize },
}

/// Length of the longest common prefix of `a` and `b`.
pub fn common_prefix_len(a: &[Token], b: &[Token]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Walk `pending` against `cached[*consumed..]`.
///
/// Returns how many leading tokens of `pending` matched; `consumed` advances by
/// the same amount. On the first mismatch `cached` is truncated to `*consumed`,
/// since everything after that point no longer describes engine state.
pub fn match_cached_prefix(pending: &[Token], cached: &mut Vec<Token>, consumed: &mut usize) -> usize {
    let mut i = 0;
    let mut j = *consumed;
    while i < pending.len() && j < cached.len() {
        if pending[i] != cached[j] {
            cached.truncate(j);
            break;
        }
        i += 1;
        j += 1;
    }
    *consumed = j;
    i
}

/// Tokens mirrored from a session file plus the bookkeeping around reusing them.
#[derive(Debug, Clone, Default)]
pub struct SessionCache {
    path: Option<PathBuf>,
    tokens: Vec<Token>,
    consumed: usize,
    needs_save: bool,
}

impl SessionCache {
    /// A cache with persistence switched off.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Open the session at `path`.
    ///
    /// A missing file yields an empty, active cache that will be created on
    /// the first save.
    ///
    /// # Errors
    ///
    /// Returns [`TalkError::Session`] when an existing file cannot be loaded.
    pub fn load<E: GenerationEngine + ?Sized>(
        engine: &mut E,
        path: &Path,
        capacity: usize,
    ) -> Result<Self> {
        let mut cache = Self {
            path: Some(path.to_path_buf()),
            ..Self::default()
        };

        if !path.exists() {
            info!("session file {} does not exist, will create", path.display());
            return Ok(cache);
        }

        info!("loading saved session from {}", path.display());
        cache.tokens = engine.load_session(path, capacity).map_err(|e| match e {
            e @ TalkError::Session(_) => e,
            other => TalkError::Session(format!("failed to load {}: {other}", path.display())),
        })?;
        info!("loaded a session with {} tokens", cache.tokens.len());
        Ok(cache)
    }

    /// Compare the cache with the assembled prompt and decide whether the
    /// first sampling step should rewrite the file.
    pub fn reconcile(&mut self, prompt: &[Token], resave_ratio: f32) -> SessionMatch {
        if !self.is_active() || self.tokens.is_empty() {
            self.needs_save = self.is_active();
            return SessionMatch::Empty;
        }

        let n_matching = common_prefix_len(&self.tokens, prompt);
        let verdict = if n_matching >= prompt.len() {
            info!("session file has exact match for prompt");
            SessionMatch::Exact
        } else if n_matching < prompt.len() / 2 {
            warn!(
                n_matching,
                prompt_len = prompt.len(),
                "session file has low similarity to prompt, will mostly be re-evaluated"
            );
            SessionMatch::Low { n_matching }
        } else {
            info!(
                n_matching,
                prompt_len = prompt.len(),
                "session file matches prompt partially"
            );
            SessionMatch::Partial { n_matching }
        };

        self.needs_save = (n_matching as f32) < prompt.len() as f32 * resave_ratio;
        debug!(needs_save = self.needs_save, "session reconciled");
        verdict
    }

    /// Persist `tokens` through the engine. A no-op once persistence is disabled.
    ///
    /// # Errors
    ///
    /// Returns the engine's save failure.
    pub fn save<E: GenerationEngine + ?Sized>(&mut self, engine: &mut E, tokens: &[Token]) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        debug!(n_tokens = tokens.len(), "saving session to {}", path.display());
        engine.save_session(path, tokens)?;
        self.needs_save = false;
        Ok(())
    }

    /// Stop persisting for the rest of the process.
    ///
    /// Returns `true` the first time persistence is switched off.
    pub fn disable(&mut self) -> bool {
        self.needs_save = false;
        self.path.take().is_some()
    }

    /// Drop cached tokens that were never matched.
    pub fn truncate_unconsumed(&mut self) {
        self.tokens.truncate(self.consumed);
    }

    /// Reuse as much of `pending` as the cache covers. See [`match_cached_prefix`].
    pub fn consume_prefix(&mut self, pending: &[Token]) -> usize {
        if self.consumed >= self.tokens.len() {
            return 0;
        }
        match_cached_prefix(pending, &mut self.tokens, &mut self.consumed)
    }

    /// Record tokens about to be decoded so the cache keeps mirroring engine state.
    pub fn extend(&mut self, tokens: &[Token]) {
        if !self.is_active() {
            return;
        }
        self.tokens.extend_from_slice(tokens);
        self.consumed = self.tokens.len();
    }

    pub fn mark_dirty(&mut self) {
        if self.is_active() {
            self.needs_save = true;
        }
    }

    pub fn needs_save(&self) -> bool {
        self.needs_save && self.is_active()
    }

    pub fn is_active(&self) -> bool {
        self.path.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }
}
