//! Speech output.
//!
//! The turn controller hands finished replies to a [`SpeechOutput`].
//! [`CommandSpeaker`] delegates synthesis to an external command, which keeps
//! any TTS engine pluggable without linking it.

use crate::config::SpeechOutputConfig;
use crate::error::{Result, TalkError};
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info};

/// Something that can say a line of text out loud.
pub trait SpeechOutput {
    /// Speak `text` with the given voice, blocking until done.
    fn speak(&mut self, text: &str, voice_id: u32) -> Result<()>;
}

/// Runs `command <voice_id> <speak_file>` after writing the text to `speak_file`.
#[derive(Debug, Clone)]
pub struct CommandSpeaker {
    command: PathBuf,
    speak_file: PathBuf,
}

impl CommandSpeaker {
    pub fn new(config: &SpeechOutputConfig) -> Self {
        info!(
            "speech output via {} (text file {})",
            config.command.display(),
            config.speak_file.display()
        );
        Self {
            command: config.command.clone(),
            speak_file: config.speak_file.clone(),
        }
    }
}

impl SpeechOutput for CommandSpeaker {
    fn speak(&mut self, text: &str, voice_id: u32) -> Result<()> {
        std::fs::write(&self.speak_file, text).map_err(|e| {
            TalkError::Tts(format!("cannot write {}: {e}", self.speak_file.display()))
        })?;

        debug!(voice_id, chars = text.len(), "speaking");
        let status = Command::new(&self.command)
            .arg(voice_id.to_string())
            .arg(&self.speak_file)
            .status()
            .map_err(|e| TalkError::Tts(format!("cannot run {}: {e}", self.command.display())))?;

        if !status.success() {
            return Err(TalkError::Tts(format!(
                "{} exited with {status}",
                self.command.display()
            )));
        }
        Ok(())
    }
}
