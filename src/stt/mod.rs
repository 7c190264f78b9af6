//! Speech-to-text.
//!
//! [`SpeechRecognizer`] is what the turn gate needs; [`ParakeetStt`] is the
//! bundled implementation on top of NVIDIA Parakeet TDT via `parakeet-rs`.

use crate::config::{ModelConfig, SttConfig};
use crate::error::{Result, TalkError};
use crate::models::ModelManager;
use parakeet_rs::{ParakeetTDT, TimestampMode, Transcriber};
use std::time::Instant;
use tracing::{debug, info};

/// Decoding hints passed with every transcription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscribeRequest {
    /// Context prompt (names the participants to bias spelling).
    pub prompt: String,
    pub language: String,
    pub max_tokens: usize,
    pub translate: bool,
}

/// Text recognized from one audio snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognized {
    pub text: String,
    /// Recognizer confidence in `[0, 1]`, when available.
    pub confidence: Option<f32>,
}

/// Anything that turns mono samples into text.
pub trait SpeechRecognizer {
    /// Transcribe `samples` recorded at `sample_rate`.
    fn transcribe(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        request: &TranscribeRequest,
    ) -> Result<Recognized>;
}

/// Model files required by Parakeet TDT.
const ENCODER_ONNX: &str = "encoder-model.onnx";
const ENCODER_DATA: &str = "encoder-model.onnx.data";
const DECODER_ONNX: &str = "decoder_joint-model.onnx";
const VOCAB_TXT: &str = "vocab.txt";

/// Speech-to-text engine using Parakeet TDT (multilingual, 25 languages).
pub struct ParakeetStt {
    model: Option<ParakeetTDT>,
    model_id: String,
    model_manager: ModelManager,
}

impl ParakeetStt {
    /// Create a new STT engine. The model is loaded on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cache cannot be prepared.
    pub fn new(config: &SttConfig, model_config: &ModelConfig) -> Result<Self> {
        let model_manager = ModelManager::new(model_config)?;
        info!("STT configured with model: {}", config.model_id);

        Ok(Self {
            model: None,
            model_id: config.model_id.clone(),
            model_manager,
        })
    }

    /// Load the model now instead of on the first transcription.
    ///
    /// # Errors
    ///
    /// Returns an error if model loading fails.
    pub fn ensure_loaded(&mut self) -> Result<()> {
        if self.model.is_none() {
            self.initialize()?;
        }
        Ok(())
    }

    fn initialize(&mut self) -> Result<()> {
        info!("loading STT model: {}", self.model_id);
        let repo_dir = self.model_manager.fetch_repo_files(
            &self.model_id,
            &[ENCODER_ONNX, ENCODER_DATA, DECODER_ONNX, VOCAB_TXT],
        )?;

        let model = ParakeetTDT::from_pretrained(&repo_dir, None)
            .map_err(|e| TalkError::Stt(format!("failed to load Parakeet TDT: {e}")))?;

        info!("STT model loaded successfully");
        self.model = Some(model);
        Ok(())
    }
}

impl SpeechRecognizer for ParakeetStt {
    fn transcribe(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        request: &TranscribeRequest,
    ) -> Result<Recognized> {
        self.ensure_loaded()?;
        let model = self
            .model
            .as_mut()
            .ok_or_else(|| TalkError::Stt("model not initialized".into()))?;

        // Parakeet detects the language itself and takes no prompt.
        debug!(
            language = %request.language,
            max_tokens = request.max_tokens,
            "transcribing {:.1}s of audio",
            samples.len() as f32 / sample_rate as f32
        );

        let start = Instant::now();
        let result = model
            .transcribe_samples(samples.to_vec(), sample_rate, 1, Some(TimestampMode::Sentences))
            .map_err(|e| TalkError::Stt(format!("transcription failed: {e}")))?;

        info!(
            "transcribed in {:.0}ms: \"{}\"",
            start.elapsed().as_millis(),
            result.text
        );
        // TDT decoding yields token timings only, no probabilities.
        Ok(Recognized {
            text: result.text,
            confidence: None,
        })
    }
}
