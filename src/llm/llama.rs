//! [`GenerationEngine`] on llama.cpp through `llama-cpp-2`.
//!
//! [`LlamaRuntime`] owns the backend and the model weights; each
//! [`LlamaEngine`] borrows them and holds one inference context (sequence 0).

use super::{Batch, GenerationEngine, Token};
use crate::config::LlmConfig;
use crate::error::{Result, TalkError};
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::token::LlamaToken;
use std::num::NonZeroU32;
use std::path::Path;
use tracing::{debug, info};

/// Loaded llama.cpp backend and model weights.
pub struct LlamaRuntime {
    backend: LlamaBackend,
    model: LlamaModel,
}

impl LlamaRuntime {
    /// Initialise llama.cpp and load `config.model_path`, offloading
    /// `config.gpu_layers` layers.
    ///
    /// # Errors
    ///
    /// Returns [`TalkError::Model`] if the backend or the model fails to load.
    pub fn load(config: &LlmConfig) -> Result<Self> {
        let backend = LlamaBackend::init()
            .map_err(|e| TalkError::Model(format!("llama.cpp init failed: {e}")))?;
        let params = LlamaModelParams::default().with_n_gpu_layers(config.gpu_layers);

        info!(
            gpu_layers = config.gpu_layers,
            "loading model from {}",
            config.model_path.display()
        );
        let model = LlamaModel::load_from_file(&backend, &config.model_path, &params).map_err(
            |e| {
                TalkError::Model(format!(
                    "failed to load {}: {e}",
                    config.model_path.display()
                ))
            },
        )?;
        Ok(Self { backend, model })
    }

    /// Create an inference context sized by `config.context_size`, running on
    /// `config.threads` threads.
    ///
    /// # Errors
    ///
    /// Returns [`TalkError::Config`] for sizes llama.cpp cannot take and
    /// [`TalkError::Engine`] if the context cannot be created.
    pub fn engine(&self, config: &LlmConfig) -> Result<LlamaEngine<'_>> {
        let n_ctx = u32::try_from(config.context_size)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| {
                TalkError::Config(format!("unusable context size {}", config.context_size))
            })?;
        let threads = i32::try_from(config.threads)
            .map_err(|_| TalkError::Config(format!("unusable thread count {}", config.threads)))?;

        let params = LlamaContextParams::default()
            .with_n_ctx(Some(n_ctx))
            .with_n_batch(n_ctx.get())
            .with_n_threads(threads)
            .with_n_threads_batch(threads);
        let ctx = self
            .model
            .new_context(&self.backend, params)
            .map_err(|e| TalkError::Engine(format!("failed to create context: {e}")))?;
        info!(n_ctx = n_ctx.get(), threads, "inference context ready");

        Ok(LlamaEngine {
            model: &self.model,
            ctx,
            logits: Vec::new(),
        })
    }
}

/// One llama.cpp context driven by the turn controller.
pub struct LlamaEngine<'m> {
    model: &'m LlamaModel,
    ctx: LlamaContext<'m>,
    /// Copy of the logits of the last entry marked for output.
    logits: Vec<f32>,
}

fn to_llama(token: Token) -> LlamaToken {
    LlamaToken::new(token.0)
}

fn from_llama(token: LlamaToken) -> Token {
    Token(token.0)
}

fn to_pos(pos: usize) -> Result<i32> {
    i32::try_from(pos).map_err(|_| TalkError::Engine(format!("position {pos} out of range")))
}

impl GenerationEngine for LlamaEngine<'_> {
    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>> {
        let add_bos = if add_bos { AddBos::Always } else { AddBos::Never };
        let tokens = self
            .model
            .str_to_token(text, add_bos)
            .map_err(|e| TalkError::Engine(format!("tokenize failed: {e}")))?;
        Ok(tokens.into_iter().map(from_llama).collect())
    }

    fn token_to_piece(&self, token: Token) -> Result<String> {
        let bytes = self
            .model
            .token_to_bytes(to_llama(token), Special::Tokenize)
            .map_err(|e| TalkError::Engine(format!("detokenize failed: {e}")))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn decode(&mut self, batch: &Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut llama_batch = LlamaBatch::new(batch.len(), 1);
        for entry in batch.entries() {
            llama_batch
                .add(to_llama(entry.token), to_pos(entry.pos)?, &[0], entry.logits)
                .map_err(|e| TalkError::Engine(format!("batch add failed: {e}")))?;
        }
        self.ctx
            .decode(&mut llama_batch)
            .map_err(|e| TalkError::Engine(format!("decode failed: {e}")))?;

        if let Some(idx) = batch.entries().iter().rposition(|e| e.logits) {
            let idx = i32::try_from(idx)
                .map_err(|_| TalkError::Engine(format!("batch index {idx} out of range")))?;
            self.logits = self.ctx.get_logits_ith(idx).to_vec();
        }
        Ok(())
    }

    fn truncate(&mut self, from_pos: usize) -> Result<()> {
        let from = u32::try_from(from_pos)
            .map_err(|_| TalkError::Engine(format!("position {from_pos} out of range")))?;
        debug!(from_pos, "removing KV cache entries");
        self.ctx
            .clear_kv_cache_seq(Some(0), Some(from), None)
            .map_err(|e| TalkError::Engine(format!("KV cache truncation failed: {e}")))?;
        Ok(())
    }

    fn logits(&self) -> &[f32] {
        &self.logits
    }

    fn n_ctx(&self) -> usize {
        self.ctx.n_ctx() as usize
    }

    fn n_vocab(&self) -> usize {
        usize::try_from(self.model.n_vocab()).unwrap_or_default()
    }

    fn eos_token(&self) -> Token {
        from_llama(self.model.token_eos())
    }

    fn newline_token(&self) -> Token {
        from_llama(self.model.token_nl())
    }

    fn is_end_of_generation(&self, token: Token) -> bool {
        self.model.is_eog_token(to_llama(token))
    }

    fn load_session(&mut self, path: &Path, capacity: usize) -> Result<Vec<Token>> {
        let tokens = self
            .ctx
            .load_session_file(path, capacity)
            .map_err(|e| TalkError::Session(format!("failed to load {}: {e}", path.display())))?;
        Ok(tokens.into_iter().map(from_llama).collect())
    }

    fn save_session(&mut self, path: &Path, tokens: &[Token]) -> Result<()> {
        let tokens: Vec<LlamaToken> = tokens.iter().copied().map(to_llama).collect();
        self.ctx
            .save_session_file(path, &tokens)
            .map_err(|e| TalkError::Session(format!("failed to save {}: {e}", path.display())))
    }
}
