//! Configuration types for the spoken dialogue loop.

use crate::error::{Result, TalkError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level configuration, built once at startup and passed by reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TalkConfig {
    /// Audio capture settings.
    pub audio: AudioConfig,
    /// Voice activity detection settings.
    pub vad: VadConfig,
    /// Speech-to-text settings.
    pub stt: SttConfig,
    /// Generation engine and context settings.
    pub llm: LlmConfig,
    /// Token sampling policy.
    pub sampling: SamplingConfig,
    /// Prompt templates and participant names.
    pub prompt: PromptConfig,
    /// Turn gating (wake command, acknowledgement).
    pub conversation: ConversationConfig,
    /// Speech output settings.
    pub speech: SpeechOutputConfig,
    /// Model management settings.
    pub models: ModelConfig,
}

/// Audio capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture sample rate in Hz. The recognizer expects 16kHz.
    pub sample_rate: u32,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Length of the capture ring buffer in ms.
    pub buffer_ms: u32,
    /// Length of the audio snapshot handed to the recognizer, in ms.
    pub voice_ms: u32,
    /// Delay between loop iterations in ms.
    pub poll_interval_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            input_device: None,
            buffer_ms: 30_000,
            voice_ms: 10_000,
            poll_interval_ms: 100,
        }
    }
}

/// Voice activity detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Ratio of trailing-window energy to whole-snapshot energy below which
    /// the speaker is considered to have finished talking.
    pub threshold: f32,
    /// High-pass cutoff in Hz applied before measuring energy (0 disables).
    pub freq_threshold: f32,
    /// Length of the trailing window compared against the snapshot, in ms.
    pub window_ms: u32,
    /// Length of the snapshot inspected every iteration, in ms.
    pub probe_ms: u32,
    /// Log energies at info level instead of debug.
    pub log_energy: bool,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            freq_threshold: 100.0,
            window_ms: 1_250,
            probe_ms: 2_000,
            log_energy: false,
        }
    }
}

/// Speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// HuggingFace model ID for the STT model.
    pub model_id: String,
    /// Spoken language.
    pub language: String,
    /// Maximum number of tokens per transcribed segment.
    pub max_tokens: usize,
    /// Translate from the spoken language to English.
    pub translate: bool,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model_id: "istupakov/parakeet-tdt-0.6b-v3-onnx".to_owned(),
            language: "en".to_owned(),
            max_tokens: 32,
            translate: false,
        }
    }
}

/// Generation engine and context window configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Model file handed to the engine adapter.
    pub model_path: PathBuf,
    /// Context capacity in tokens.
    pub context_size: usize,
    /// Worker threads used by the engine. Passed through, never used here.
    pub threads: usize,
    /// Layers offloaded to the GPU. Passed through to the engine adapter.
    pub gpu_layers: u32,
    /// Trailing tokens re-fed after the context overflows.
    pub n_prev: usize,
    /// Seed for the token sampler.
    pub seed: u64,
    /// Stop a reply after this many tokens (0 = until end of turn).
    pub max_reply_tokens: usize,
    /// Persisted session cache (None disables persistence).
    pub session_path: Option<PathBuf>,
    /// Skip the initial cache rewrite when at least this fraction of the
    /// prompt matched the loaded cache.
    pub session_resave_ratio: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("./models/Meta-Llama-3-8B-Instruct-IQ4_XS.gguf"),
            context_size: 2_048,
            threads: default_threads(),
            gpu_layers: 999,
            n_prev: 64,
            seed: 1,
            max_reply_tokens: 0,
            session_path: None,
            session_resave_ratio: 0.75,
        }
    }
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(4))
        .unwrap_or(4)
}

/// Token sampling configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Sampling temperature (<= 0.0 = greedy).
    pub temperature: f32,
    /// Number of highest scoring candidates kept before nucleus filtering.
    pub top_k: usize,
    /// Nucleus (top-p) cumulative probability.
    pub top_p: f32,
    /// Repetition penalty applied to recently seen tokens.
    pub repeat_penalty: f32,
    /// How many trailing history tokens the repetition penalty looks at.
    pub repeat_last_n: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            top_k: 5,
            top_p: 0.8,
            repeat_penalty: 1.1764,
            repeat_last_n: 256,
        }
    }
}

/// Prompt templates.
///
/// Templates understand `{person}`, `{bot}`, `{time}` and `{year}` (and the
/// positional aliases `{0}`..`{3}`); the per-turn template also takes `{text}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Name of the human participant.
    pub person: String,
    /// Name of the assistant.
    pub bot_name: String,
    /// System prompt decoded once at startup.
    pub system_template: String,
    /// Read the system prompt from this file instead of `system_template`.
    pub system_prompt_file: Option<PathBuf>,
    /// Wraps one normalized utterance of the human participant.
    pub user_turn_template: String,
    /// Opens the assistant's reply.
    pub reply_header_template: String,
    /// Prompt text handed to the recognizer.
    pub transcription_hint: String,
}

impl PromptConfig {
    /// Llama-3 style system header used by the default template.
    pub const DEFAULT_SYSTEM_TEMPLATE: &'static str = "<|start_header_id|>system<|end_header_id|>\n\n\
Write a single response to {person} as {bot}, where {person} is talking with a friend named {bot}.\n\
The transcript only consists of what {person} and {bot} say to each other.\n\
Only use text.\n\
Do not include annotations, symbols, sounds, emojis, or code.\n\
{bot} responds with short and concise responses.\n\
The current time is {time} and the year is {year}.<|eot_id|>";
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            person: "User".to_owned(),
            bot_name: "Fae".to_owned(),
            system_template: Self::DEFAULT_SYSTEM_TEMPLATE.to_owned(),
            system_prompt_file: None,
            user_turn_template: "\n<|start_header_id|>{person}<|end_header_id|>\n\n{text}<|eot_id|>"
                .to_owned(),
            reply_header_template: "\n<|start_header_id|>{bot}<|end_header_id|>\n\n".to_owned(),
            transcription_hint: "A conversation with a friend called {bot}.".to_owned(),
        }
    }
}

/// Turn gating configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Phrase that must open every turn (empty = every utterance is a turn).
    pub wake_command: String,
    /// Minimum similarity between the heard and configured wake phrase.
    pub wake_similarity: f32,
    /// Spoken right after a turn is accepted (empty = silent).
    pub heard_ok: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            wake_command: String::new(),
            wake_similarity: 0.5,
            heard_ok: String::new(),
        }
    }
}

/// Speech output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechOutputConfig {
    /// Command invoked as `command <voice_id> <speak_file>`.
    pub command: PathBuf,
    /// File the text to speak is written to.
    pub speak_file: PathBuf,
    /// Voice identifier passed to the command.
    pub voice_id: u32,
}

impl Default for SpeechOutputConfig {
    fn default() -> Self {
        Self {
            command: PathBuf::from("./speak"),
            speak_file: PathBuf::from("./to_speak.txt"),
            voice_id: 2,
        }
    }
}

/// Model management configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory for caching downloaded models.
    pub cache_dir: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            cache_dir: dirs_cache_dir(),
        }
    }
}

/// Model cache directory: `TALKBACK_CACHE_DIR`, else `dirs::cache_dir()/talkback/`.
fn dirs_cache_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("TALKBACK_CACHE_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::cache_dir()
        .map(|d| d.join("talkback"))
        .unwrap_or_else(|| PathBuf::from("/tmp/talkback-cache"))
}

impl TalkConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| TalkError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| TalkError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default config file: `config.toml` under `TALKBACK_CONFIG_DIR`, else
    /// `dirs::config_dir()/talkback/`.
    pub fn default_config_path() -> PathBuf {
        let dir = match std::env::var_os("TALKBACK_CONFIG_DIR") {
            Some(override_dir) => PathBuf::from(override_dir),
            None => dirs::config_dir()
                .map(|d| d.join("talkback"))
                .unwrap_or_else(|| PathBuf::from("/tmp/talkback-config")),
        };
        dir.join("config.toml")
    }

    /// Load `path`, or the default config file when `path` is `None`.
    ///
    /// A missing default file gives [`TalkConfig::default`]; an explicit path
    /// must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the chosen file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = Self::default_config_path();
                if !default.exists() {
                    info!("no config at {}, using defaults", default.display());
                    return Ok(Self::default());
                }
                default
            }
        };
        info!("loading config from {}", path.display());
        Self::from_file(&path)
    }

    /// Check value ranges the turn controller relies on.
    ///
    /// # Errors
    ///
    /// Returns [`TalkError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(TalkError::Config("audio.sample_rate must be > 0".into()));
        }
        if self.audio.voice_ms > self.audio.buffer_ms {
            return Err(TalkError::Config(format!(
                "audio.voice_ms ({}) exceeds audio.buffer_ms ({})",
                self.audio.voice_ms, self.audio.buffer_ms
            )));
        }
        if self.vad.window_ms >= self.vad.probe_ms {
            return Err(TalkError::Config(format!(
                "vad.window_ms ({}) must be shorter than vad.probe_ms ({})",
                self.vad.window_ms, self.vad.probe_ms
            )));
        }
        if self.llm.context_size == 0 {
            return Err(TalkError::Config("llm.context_size must be > 0".into()));
        }
        if self.llm.n_prev >= self.llm.context_size {
            return Err(TalkError::Config(format!(
                "llm.n_prev ({}) must be smaller than llm.context_size ({})",
                self.llm.n_prev, self.llm.context_size
            )));
        }
        if !(0.0..=1.0).contains(&self.llm.session_resave_ratio) {
            return Err(TalkError::Config(
                "llm.session_resave_ratio must be within [0, 1]".into(),
            ));
        }
        if !(self.sampling.top_p > 0.0 && self.sampling.top_p <= 1.0) {
            return Err(TalkError::Config("sampling.top_p must be within (0, 1]".into()));
        }
        if self.sampling.repeat_penalty <= 0.0 {
            return Err(TalkError::Config(
                "sampling.repeat_penalty must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.conversation.wake_similarity) {
            return Err(TalkError::Config(
                "conversation.wake_similarity must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}
