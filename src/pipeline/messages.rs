//! Message types passed between turn stages.

use crate::llm::Token;

/// Where the turn controller is in the listen/reply cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnPhase {
    Idle,
    Listening,
    /// Voice activity check and, after an utterance, transcription.
    Gating,
    Generating,
    Speaking,
}

impl std::fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Gating => "gating",
            Self::Generating => "generating",
            Self::Speaking => "speaking",
        };
        f.write_str(name)
    }
}

/// One accepted user utterance on its way into the generator.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub speaker: String,
    /// Text as handed over by the gate (wake words removed) or the caller.
    pub utterance: String,
    /// Text after [`crate::transcript::normalize_transcript`].
    pub normalized: String,
    /// Tokens of the full turn fragment (headers included).
    pub tokens: Vec<Token>,
}

/// A generated reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub text: String,
    pub tokens: Vec<Token>,
    /// Generation stopped on cancellation rather than end of turn.
    pub interrupted: bool,
}
