//! Shared test doubles used across unit test modules.

use crate::error::{Result, TalkError};
use crate::llm::{Batch, GenerationEngine, Token};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

pub const BOS: Token = Token(256);
pub const EOS: Token = Token(257);
pub const EOT: Token = Token(258);
const VOCAB: usize = 260;

/// Byte-level engine whose "model" replays a scripted reply.
///
/// Every byte of the input is one token. The engine tracks which token sits
/// at every context position and rejects batches that do not continue
/// exactly where evaluation stopped, so a missing rewind fails loudly.
pub struct ScriptedEngine {
    pub ctx: usize,
    /// Token at each context position.
    pub positions: Vec<Token>,
    pub decoded: Vec<Batch>,
    /// Tokens the engine favours next, front first. Falls back to [`EOT`].
    pub script: VecDeque<Token>,
    pub fail_decode: bool,
    /// Arguments of every `truncate` call.
    pub truncations: Vec<usize>,
    pub saved: Vec<(PathBuf, Vec<Token>)>,
    logits: Vec<f32>,
}

impl ScriptedEngine {
    pub fn new(ctx: usize) -> Self {
        Self {
            ctx,
            positions: Vec::new(),
            decoded: Vec::new(),
            script: VecDeque::new(),
            fail_decode: false,
            truncations: Vec::new(),
            saved: Vec::new(),
            logits: vec![0.0; VOCAB],
        }
    }

    /// Queue `text` as the next reply, terminated by a newline.
    pub fn script_reply(&mut self, text: &str) {
        self.script.extend(bytes_to_tokens(text));
        self.script.push_back(Token(10));
    }

    fn refresh_logits(&mut self) {
        let favoured = self.script.front().copied().unwrap_or(EOT);
        self.logits.iter_mut().for_each(|l| *l = 0.0);
        self.logits[favoured.0 as usize] = 8.0;
    }
}

pub fn bytes_to_tokens(text: &str) -> Vec<Token> {
    text.bytes().map(|b| Token(i32::from(b))).collect()
}

impl GenerationEngine for ScriptedEngine {
    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>> {
        let mut tokens = Vec::with_capacity(text.len() + 1);
        if add_bos {
            tokens.push(BOS);
        }
        tokens.extend(bytes_to_tokens(text));
        Ok(tokens)
    }

    fn token_to_piece(&self, token: Token) -> Result<String> {
        match u8::try_from(token.0) {
            Ok(b) => Ok(char::from(b).to_string()),
            Err(_) => Ok(String::new()),
        }
    }

    fn decode(&mut self, batch: &Batch) -> Result<()> {
        if self.fail_decode {
            return Err(TalkError::Engine("scripted decode failure".into()));
        }
        for entry in batch.entries() {
            if entry.pos != self.positions.len() {
                return Err(TalkError::Engine(format!(
                    "position {} does not follow evaluated length {}",
                    entry.pos,
                    self.positions.len()
                )));
            }
            if entry.pos >= self.ctx {
                return Err(TalkError::Engine(format!(
                    "position {} beyond context {}",
                    entry.pos, self.ctx
                )));
            }
            self.positions.push(entry.token);
        }
        let last = batch.entries().last().map(|e| e.token);
        // A reply's closing newline is sampled but never decoded.
        if self.script.front() == Some(&Token(10)) && last != Some(Token(10)) {
            self.script.pop_front();
        }
        if last.is_some() && last == self.script.front().copied() {
            self.script.pop_front();
        }
        self.decoded.push(batch.clone());
        self.refresh_logits();
        Ok(())
    }

    fn truncate(&mut self, from_pos: usize) -> Result<()> {
        self.positions.truncate(from_pos);
        self.truncations.push(from_pos);
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
        Token(10)
    }

    fn is_end_of_generation(&self, token: Token) -> bool {
        token == EOS || token == EOT
    }

    fn load_session(&mut self, path: &Path, capacity: usize) -> Result<Vec<Token>> {
        let content = std::fs::read_to_string(path)?;
        let tokens = content
            .split_whitespace()
            .map(|s| s.parse::<i32>().map(Token))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| TalkError::Session(format!("bad session file: {e}")))?;
        if tokens.len() > capacity {
            return Err(TalkError::Session(format!(
                "session holds {} tokens, capacity is {capacity}",
                tokens.len()
            )));
        }
        self.positions = tokens.clone();
        Ok(tokens)
    }

    fn save_session(&mut self, path: &Path, tokens: &[Token]) -> Result<()> {
        let content: Vec<String> = tokens.iter().map(|t| t.0.to_string()).collect();
        std::fs::write(path, content.join(" "))?;
        self.saved.push((path.to_path_buf(), tokens.to_vec()));
        Ok(())
    }
}
