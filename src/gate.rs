//! Turn gating: decides whether the latest audio is a turn addressed to the bot.
//!
//! A turn needs an end-of-utterance from the VAD, a successful transcription
//! and, when a wake command is configured, a transcript that opens with
//! something close enough to that command.

use crate::audio::AudioSource;
use crate::config::TalkConfig;
use crate::stt::{SpeechRecognizer, TranscribeRequest};
use crate::vad::VoiceActivityDetector;
use tracing::{debug, info, warn};

/// Why a detected utterance was not accepted as a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum IgnoreReason {
    /// The recognizer failed; the error has been logged.
    TranscriptionFailed,
    /// The recognizer returned nothing but whitespace.
    EmptyTranscript,
    /// The opening words did not resemble the wake command.
    WakeMismatch { heard: String, similarity: f32 },
    /// The wake command was heard but nothing followed it.
    NothingAfterWake,
}

/// Outcome of one gate poll.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// No end of utterance in the probe window.
    NoSpeech,
    /// The user asked the bot to speak without new input.
    Forced,
    /// An utterance addressed to the bot.
    Heard {
        /// The words matched against the wake command, if one is configured.
        wake: Option<String>,
        /// Transcript with the wake words removed.
        text: String,
        /// Recognizer confidence, when the recognizer reports one.
        confidence: Option<f32>,
    },
    Ignored(IgnoreReason),
}

impl GateDecision {
    /// Whether the audio buffer should be dropped right away.
    pub fn clears_audio_now(&self) -> bool {
        matches!(self, Self::Ignored(_))
    }
}

/// Configured wake command.
#[derive(Debug, Clone)]
pub struct WakePhrase {
    phrase: String,
    n_words: usize,
    min_similarity: f32,
}

/// Transcript split into wake words and the remaining utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct WakeSplit {
    pub heard: String,
    pub rest: String,
    pub similarity: f32,
}

impl WakePhrase {
    /// `None` for an empty command, meaning every utterance is a turn.
    pub fn new(phrase: &str, min_similarity: f32) -> Option<Self> {
        let phrase = phrase.trim();
        if phrase.is_empty() {
            return None;
        }
        Some(Self {
            n_words: phrase.split_whitespace().count(),
            phrase: phrase.to_owned(),
            min_similarity,
        })
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// Split the first words off `transcript` and score them against the command.
    pub fn split(&self, transcript: &str) -> WakeSplit {
        let words: Vec<&str> = transcript.split_whitespace().collect();
        let cut = self.n_words.min(words.len());
        let heard = words[..cut].join(" ");
        WakeSplit {
            similarity: similarity(&heard, &self.phrase),
            heard,
            rest: words[cut..].join(" "),
        }
    }

    /// Accept `transcript` as a turn, returning the wake words and the utterance.
    pub fn check(&self, transcript: &str) -> std::result::Result<(String, String), IgnoreReason> {
        let split = self.split(transcript);
        if split.similarity < self.min_similarity {
            return Err(IgnoreReason::WakeMismatch {
                heard: split.heard,
                similarity: split.similarity,
            });
        }
        if split.rest.is_empty() {
            return Err(IgnoreReason::NothingAfterWake);
        }
        Ok((split.heard, split.rest))
    }
}

/// Edit distance between `a` and `b`, counted in chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Similarity in `[0, 1]`: `1 - distance / max_len` over lower-cased, trimmed text.
pub fn similarity(a: &str, b: &str) -> f32 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f32 / max_len as f32
}

/// VAD, transcription and wake-command check in one place.
pub struct TurnGate {
    vad: VoiceActivityDetector,
    wake: Option<WakePhrase>,
    probe_ms: u32,
    voice_ms: u32,
    request: TranscribeRequest,
}

impl TurnGate {
    /// `hint` is the already-assembled transcription prompt.
    pub fn new(config: &TalkConfig, sample_rate: u32, hint: String) -> Self {
        let wake = WakePhrase::new(
            &config.conversation.wake_command,
            config.conversation.wake_similarity,
        );
        if let Some(wake) = &wake {
            info!("wake command: \"{}\"", wake.phrase());
        }
        Self {
            vad: VoiceActivityDetector::new(&config.vad, sample_rate),
            wake,
            probe_ms: config.vad.probe_ms,
            voice_ms: config.audio.voice_ms,
            request: TranscribeRequest {
                prompt: hint,
                language: config.stt.language.clone(),
                max_tokens: config.stt.max_tokens,
                translate: config.stt.translate,
            },
        }
    }

    pub fn wake(&self) -> Option<&WakePhrase> {
        self.wake.as_ref()
    }

    /// Look at the latest audio and decide whether a turn just ended.
    ///
    /// `force` short-circuits to [`GateDecision::Forced`] without transcribing.
    pub fn poll<A, R>(&self, audio: &A, recognizer: &mut R, force: bool) -> GateDecision
    where
        A: AudioSource + ?Sized,
        R: SpeechRecognizer + ?Sized,
    {
        if force {
            return GateDecision::Forced;
        }
        if !self.speech_ended(audio) {
            return GateDecision::NoSpeech;
        }
        self.transcribe(audio, recognizer)
    }

    /// Whether the probe window shows the end of an utterance.
    pub fn speech_ended<A: AudioSource + ?Sized>(&self, audio: &A) -> bool {
        let mut probe = audio.snapshot(self.probe_ms);
        self.vad.detect(&mut probe)
    }

    /// Transcribe the voice window and judge the result.
    pub fn transcribe<A, R>(&self, audio: &A, recognizer: &mut R) -> GateDecision
    where
        A: AudioSource + ?Sized,
        R: SpeechRecognizer + ?Sized,
    {
        let voice = audio.snapshot(self.voice_ms);
        let recognized = match recognizer.transcribe(&voice, audio.sample_rate(), &self.request) {
            Ok(r) => r,
            Err(e) => {
                warn!("transcription failed: {e}");
                return GateDecision::Ignored(IgnoreReason::TranscriptionFailed);
            }
        };
        self.judge(&recognized.text, recognized.confidence)
    }

    /// Apply the transcript checks to already-recognized text.
    pub fn judge(&self, transcript: &str, confidence: Option<f32>) -> GateDecision {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            debug!("heard nothing");
            return GateDecision::Ignored(IgnoreReason::EmptyTranscript);
        }

        let Some(wake) = &self.wake else {
            return GateDecision::Heard {
                wake: None,
                text: transcript.to_owned(),
                confidence,
            };
        };

        match wake.check(transcript) {
            Ok((heard, text)) => GateDecision::Heard {
                wake: Some(heard),
                text,
                confidence,
            },
            Err(reason) => {
                debug!(?reason, "utterance not addressed to the bot");
                GateDecision::Ignored(reason)
            }
        }
    }
}
