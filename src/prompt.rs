//! Prompt text assembly.

use crate::config::PromptConfig;
use crate::error::{Result, TalkError};
use chrono::{DateTime, Datelike, Local, TimeZone};

/// Replace `{name}` placeholders in one left-to-right pass.
///
/// Inserted values are never re-scanned and unknown placeholders are kept
/// verbatim.
pub fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            rest = &rest[open..];
            break;
        };
        let name = &after[..close];
        match vars.iter().find(|(key, _)| *key == name) {
            Some((_, value)) => out.push_str(value),
            None => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

/// Builds every piece of text fed to the generator or the recognizer.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    person: String,
    bot: String,
    time: String,
    year: String,
    system: String,
    user_turn_template: String,
    reply_header_template: String,
    hint_template: String,
}

impl PromptAssembler {
    /// Assembler stamped with the local clock.
    ///
    /// # Errors
    ///
    /// Fails when `system_prompt_file` is set but cannot be read.
    pub fn new(config: &PromptConfig) -> Result<Self> {
        Self::at(config, &Local::now())
    }

    /// Assembler stamped with `now`.
    ///
    /// # Errors
    ///
    /// Fails when `system_prompt_file` is set but cannot be read.
    pub fn at<Tz: TimeZone>(config: &PromptConfig, now: &DateTime<Tz>) -> Result<Self>
    where
        Tz::Offset: std::fmt::Display,
    {
        let system = match &config.system_prompt_file {
            Some(path) => {
                let mut text = std::fs::read_to_string(path).map_err(|e| {
                    TalkError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                if text.ends_with('\n') {
                    text.pop();
                }
                text
            }
            None => config.system_template.clone(),
        };

        Ok(Self {
            person: config.person.clone(),
            bot: config.bot_name.clone(),
            time: now.format("%H:%M").to_string(),
            year: now.year().to_string(),
            system,
            user_turn_template: config.user_turn_template.clone(),
            reply_header_template: config.reply_header_template.clone(),
            hint_template: config.transcription_hint.clone(),
        })
    }

    fn render(&self, template: &str, text: Option<&str>) -> String {
        let mut vars = vec![
            ("person", self.person.as_str()),
            ("0", self.person.as_str()),
            ("bot", self.bot.as_str()),
            ("1", self.bot.as_str()),
            ("time", self.time.as_str()),
            ("2", self.time.as_str()),
            ("year", self.year.as_str()),
            ("3", self.year.as_str()),
        ];
        if let Some(text) = text {
            vars.push(("text", text));
        }
        substitute(template, &vars)
    }

    /// Initial prompt decoded once at startup.
    pub fn system_prompt(&self) -> String {
        self.render(&self.system, None)
    }

    /// Fragment fed for one accepted utterance: the user's turn followed by
    /// the opening of the bot's reply.
    pub fn turn_fragment(&self, text: &str) -> String {
        let mut fragment = self.render(&self.user_turn_template, Some(text));
        fragment.push_str(&self.reply_header());
        fragment
    }

    /// Opening of the bot's reply, fed alone for forced turns.
    pub fn reply_header(&self) -> String {
        self.render(&self.reply_header_template, None)
    }

    pub fn transcription_hint(&self) -> String {
        self.render(&self.hint_template, None)
    }

    pub fn person(&self) -> &str {
        &self.person
    }

    pub fn bot(&self) -> &str {
        &self.bot
    }
}
