//! Token-level generation.
//!
//! The turn controller drives a [`GenerationEngine`] one batch at a time and
//! keeps its own view of what the engine has seen ([`context::ConversationState`]).
//! Engines only need to expose the primitives below; the `llama` feature
//! adds [`llama::LlamaEngine`] on llama.cpp.

pub mod batch;
pub mod context;
#[cfg(feature = "llama")]
pub mod llama;
pub mod sampler;
pub mod session;

pub use batch::{Batch, BatchEntry, decode_pending};
pub use context::{ConversationState, Prepared};
pub use sampler::{Candidates, TokenData, TokenSampler};
pub use session::{SessionCache, SessionMatch};

use crate::error::Result;
use std::path::Path;

/// Vocabulary id of the generation engine.
///
/// A newtype keeps token ids from mixing with positions and counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct Token(pub i32);

impl From<i32> for Token {
    #[inline]
    fn from(value: i32) -> Self {
        Token(value)
    }
}

impl From<Token> for i32 {
    #[inline]
    fn from(token: Token) -> i32 {
        token.0
    }
}

/// Primitives the turn controller needs from a generation engine.
pub trait GenerationEngine {
    /// Split `text` into tokens, optionally prefixed with the BOS token.
    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>>;

    /// Text fragment for a single token.
    fn token_to_piece(&self, token: Token) -> Result<String>;

    /// Evaluate a batch, updating engine state and the logits of the marked entry.
    ///
    /// Entries continue from the evaluated state; rewind with [`Self::truncate`]
    /// before decoding over earlier positions.
    fn decode(&mut self, batch: &Batch) -> Result<()>;

    /// Drop evaluated state at `from_pos` and beyond (a KV cache sequence removal).
    fn truncate(&mut self, from_pos: usize) -> Result<()>;

    /// Logits produced by the last decoded entry marked for output.
    fn logits(&self) -> &[f32];

    /// Context capacity in tokens.
    fn n_ctx(&self) -> usize;

    /// Vocabulary size.
    fn n_vocab(&self) -> usize {
        self.logits().len()
    }

    /// End-of-sequence token.
    fn eos_token(&self) -> Token;

    /// Token for `"\n"`.
    fn newline_token(&self) -> Token;

    /// Whether `token` ends a generated turn (EOS, end-of-turn markers).
    fn is_end_of_generation(&self, token: Token) -> bool {
        token == self.eos_token()
    }

    /// Restore engine state from a session file, returning the tokens it covers.
    ///
    /// At most `capacity` tokens are read.
    fn load_session(&mut self, path: &Path, capacity: usize) -> Result<Vec<Token>>;

    /// Persist engine state for `tokens` to a session file.
    fn save_session(&mut self, path: &Path, tokens: &[Token]) -> Result<()>;
}
