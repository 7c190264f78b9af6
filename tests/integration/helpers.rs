//! Shared helpers for integration tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use talkback::audio::{AudioRing, AudioSource};
use talkback::config::TalkConfig;
use talkback::error::{Result, TalkError};
use talkback::llm::{Batch, GenerationEngine, Token};
use talkback::stt::{Recognized, SpeechRecognizer, TranscribeRequest};
use talkback::tts::SpeechOutput;
use tokio_util::sync::CancellationToken;

pub(crate) const BOS: Token = Token(256);
pub(crate) const EOS: Token = Token(257);
pub(crate) const EOT: Token = Token(258);
const NEWLINE: Token = Token(10);
const VOCAB: usize = 260;

/// Byte-level engine that replays scripted replies and checks positions.
pub(crate) struct CharEngine {
    ctx: usize,
    pub(crate) positions: Vec<Token>,
    pub(crate) batches: Vec<Batch>,
    script: VecDeque<Token>,
    logits: Vec<f32>,
    cancel_at: Option<(usize, CancellationToken)>,
}

impl CharEngine {
    pub(crate) fn new(ctx: usize) -> Self {
        Self {
            ctx,
            positions: Vec::new(),
            batches: Vec::new(),
            script: VecDeque::new(),
            logits: vec![0.0; VOCAB],
            cancel_at: None,
        }
    }

    /// Cancel `token` once `decodes` more batches have been decoded.
    pub(crate) fn cancel_after(&mut self, decodes: usize, token: CancellationToken) {
        self.cancel_at = Some((self.batches.len() + decodes, token));
    }

    /// Queue `text` as the next reply; a newline ends it.
    pub(crate) fn script_reply(&mut self, text: &str) {
        self.script.extend(chars(text));
        self.script.push_back(NEWLINE);
    }
}

pub(crate) fn chars(text: &str) -> Vec<Token> {
    text.bytes().map(|b| Token(i32::from(b))).collect()
}

impl GenerationEngine for CharEngine {
    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        if add_bos {
            tokens.push(BOS);
        }
        tokens.extend(chars(text));
        Ok(tokens)
    }

    fn token_to_piece(&self, token: Token) -> Result<String> {
        Ok(u8::try_from(token.0)
            .map(|b| char::from(b).to_string())
            .unwrap_or_default())
    }

    fn decode(&mut self, batch: &Batch) -> Result<()> {
        for entry in batch.entries() {
            if entry.pos != self.positions.len() || entry.pos >= self.ctx {
                return Err(TalkError::Engine(format!(
                    "bad position {} (evaluated {}, ctx {})",
                    entry.pos,
                    self.positions.len(),
                    self.ctx
                )));
            }
            self.positions.push(entry.token);
        }
        let last = batch.entries().last().map(|e| e.token);
        // A reply's closing newline is sampled but never decoded.
        if self.script.front() == Some(&NEWLINE) && last != Some(NEWLINE) {
            self.script.pop_front();
        }
        if last.is_some() && last == self.script.front().copied() {
            self.script.pop_front();
        }
        self.batches.push(batch.clone());
        if let Some((at, token)) = &self.cancel_at
            && self.batches.len() >= *at
        {
            token.cancel();
        }

        let favoured = self.script.front().copied().unwrap_or(EOT);
        self.logits.iter_mut().for_each(|l| *l = 0.0);
        self.logits[favoured.0 as usize] = 8.0;
        Ok(())
    }

    fn truncate(&mut self, from_pos: usize) -> Result<()> {
        self.positions.truncate(from_pos);
        Ok(())
    }

    fn logits(&self) -> &[f32] {
        &self.logits
    }

    fn n_ctx(&self) -> usize {
        self.ctx
    }

    fn eos_token(&self) -> Token {
        EOS
    }

    fn newline_token(&self) -> Token {
        NEWLINE
    }

    fn is_end_of_generation(&self, token: Token) -> bool {
        token == EOS || token == EOT
    }

    fn load_session(&mut self, path: &Path, capacity: usize) -> Result<Vec<Token>> {
        let content = std::fs::read_to_string(path)?;
        let tokens: Vec<Token> = content
            .split_whitespace()
            .map(|s| s.parse::<i32>().map(Token))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| TalkError::Session(format!("bad session file: {e}")))?;
        if tokens.len() > capacity {
            return Err(TalkError::Session("session larger than context".into()));
        }
        self.positions = tokens.clone();
        Ok(tokens)
    }

    fn save_session(&mut self, path: &Path, tokens: &[Token]) -> Result<()> {
        let ids: Vec<String> = tokens.iter().map(|t| t.0.to_string()).collect();
        std::fs::write(path, ids.join(" "))?;
        Ok(())
    }
}

/// Recognizer returning queued transcripts in order.
pub(crate) struct ScriptedRecognizer {
    pub(crate) transcripts: VecDeque<String>,
    pub(crate) calls: usize,
}

impl ScriptedRecognizer {
    pub(crate) fn new(transcripts: &[&str]) -> Self {
        Self {
            transcripts: transcripts.iter().map(|s| (*s).to_owned()).collect(),
            calls: 0,
        }
    }
}

impl SpeechRecognizer for ScriptedRecognizer {
    fn transcribe(&mut self, _: &[f32], _: u32, _: &TranscribeRequest) -> Result<Recognized> {
        self.calls += 1;
        self.transcripts
            .pop_front()
            .map(|text| Recognized {
                text,
                confidence: Some(0.9),
            })
            .ok_or_else(|| TalkError::Stt("no transcript queued".into()))
    }
}

/// Speech output that records every line.
#[derive(Default)]
pub(crate) struct RecordingSpeaker {
    pub(crate) lines: Vec<String>,
}

impl SpeechOutput for RecordingSpeaker {
    fn speak(&mut self, text: &str, _voice_id: u32) -> Result<()> {
        self.lines.push(text.to_owned());
        Ok(())
    }
}

/// Fill `ring` with one second of speech-like signal followed by silence.
pub(crate) fn push_finished_utterance(ring: &AudioRing) {
    let rate = ring.sample_rate() as usize;
    let voiced: Vec<f32> = (0..rate)
        .map(|i| 0.4 * (i as f32 * 2.0 * std::f32::consts::PI * 300.0 / rate as f32).sin())
        .collect();
    ring.push(&voiced);
    ring.push(&vec![0.0; rate * 3 / 2]);
}

/// Config with short templates so byte-level token counts stay readable.
pub(crate) fn small_config() -> TalkConfig {
    let mut config = TalkConfig::default();
    config.prompt.system_template = "SYS {bot}".to_owned();
    config.prompt.user_turn_template = "|U:{text}".to_owned();
    config.prompt.reply_header_template = "|B:".to_owned();
    config.audio.poll_interval_ms = 1;
    config.llm.context_size = 512;
    config.llm.n_prev = 8;
    config
}

pub(crate) fn session_file(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("session.txt")
}
