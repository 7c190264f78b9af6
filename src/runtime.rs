//! Runtime events emitted by the turn controller for UI and observability.
//!
//! Events are small and sent with `try_send`, so a slow consumer never stalls
//! generation.

use crate::gate::IgnoreReason;
use crate::pipeline::messages::TurnPhase;

/// What the turn controller is doing "right now".
#[derive(Debug, Clone, PartialEq)]
pub enum TalkEvent {
    /// The controller moved to a new phase.
    Phase(TurnPhase),
    /// A turn was accepted; carries the normalized user text.
    Heard {
        speaker: String,
        text: String,
        confidence: Option<f32>,
    },
    /// Speech was detected but not taken as a turn.
    Ignored(IgnoreReason),
    /// One generated text fragment, in order.
    Token(String),
    /// The reply finished.
    Reply { text: String, interrupted: bool },
    /// The context overflowed and was rebuilt from the kept prompt.
    ContextEvicted { n_keep: usize },
    /// Session cache written with this many tokens.
    SessionSaved { tokens: usize },
}
