//! Turn orchestration: gate, prompt, generate, speak.

pub mod coordinator;
pub mod messages;
