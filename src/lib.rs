//! Talkback: a turn controller for spoken conversations with a local LLM.
//!
//! Microphone → VAD → STT → turn gate → prompt → generator → speech output
//!
//! # Architecture
//!
//! A single control loop owns all conversation state:
//! - **Audio capture**: `cpal` callback writes into a shared ring buffer
//! - **Turn gate**: energy VAD, Parakeet transcription, optional wake command
//! - **Context**: session cache reuse, overflow eviction, batch decoding
//! - **Sampling**: repetition penalty, top-k, top-p, temperature
//! - **Speech output**: external command fed through a text file

pub mod audio;
pub mod config;
pub mod error;
pub mod gate;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod runtime;
pub mod stt;
pub mod transcript;
pub mod tts;
pub mod vad;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::TalkConfig;
pub use error::{Result, TalkError};
pub use llm::{GenerationEngine, Token};
pub use pipeline::coordinator::{StepOutcome, TurnController};
pub use runtime::TalkEvent;
