//! Turn controller: the single-threaded listen, reply, speak loop.

use crate::audio::AudioSource;
use crate::config::TalkConfig;
use crate::error::{Result, TalkError};
use crate::gate::{GateDecision, IgnoreReason, TurnGate};
use crate::llm::sampler::is_turn_end;
use crate::llm::{
    ConversationState, GenerationEngine, SessionCache, Token, TokenSampler, decode_pending,
};
use crate::pipeline::messages::{Reply, Turn, TurnPhase};
use crate::prompt::PromptAssembler;
use crate::runtime::TalkEvent;
use crate::stt::SpeechRecognizer;
use crate::transcript::normalize_transcript;
use crate::tts::SpeechOutput;
use crossbeam_channel::Sender;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What one loop iteration did.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The speaker has not finished an utterance yet.
    NoSpeech,
    /// Speech was heard but not taken as a turn.
    Ignored(IgnoreReason),
    /// The utterance normalized to nothing.
    NothingToSay,
    /// A reply was generated (and handed to speech output).
    Replied(Reply),
}

/// Owns the generator and the conversation state for the life of the process.
pub struct TurnController<'c, E: GenerationEngine> {
    config: &'c TalkConfig,
    engine: E,
    prompts: PromptAssembler,
    gate: TurnGate,
    sampler: TokenSampler,
    state: ConversationState,
    phase: TurnPhase,
    events: Option<Sender<TalkEvent>>,
    force_speak: Arc<AtomicBool>,
    cancel: CancellationToken,
    console_output: bool,
    /// The last step applied tokens only from the session cache, so the
    /// engine's logits predate them.
    stale_logits: bool,
}

impl<'c, E: GenerationEngine> TurnController<'c, E> {
    /// Build the system prompt, hydrate the session cache and evaluate the prompt.
    ///
    /// # Errors
    ///
    /// Fails when the prompt does not fit the context, the session file is
    /// malformed or the engine cannot evaluate the prompt.
    pub fn start(config: &'c TalkConfig, mut engine: E) -> Result<Self> {
        let prompts = PromptAssembler::new(&config.prompt)?;
        let system = prompts.system_prompt();
        let prompt_tokens = engine.tokenize(&system, true)?;

        let capacity = engine.n_ctx();
        if capacity != config.llm.context_size {
            debug!(
                engine = capacity,
                configured = config.llm.context_size,
                "engine context differs from configuration"
            );
        }
        if prompt_tokens.len() > capacity {
            return Err(TalkError::Pipeline(format!(
                "prompt is {} tokens, context holds {capacity}",
                prompt_tokens.len()
            )));
        }

        let session = match &config.llm.session_path {
            Some(path) => {
                let mut session = SessionCache::load(&mut engine, path, capacity)?;
                session.reconcile(&prompt_tokens, config.llm.session_resave_ratio);
                session
            }
            None => SessionCache::disabled(),
        };

        let gate = TurnGate::new(config, config.audio.sample_rate, prompts.transcription_hint());
        let mut controller = Self {
            config,
            engine,
            prompts,
            gate,
            sampler: TokenSampler::new(config.sampling, config.llm.seed),
            state: ConversationState::new(capacity, config.llm.n_prev, session),
            phase: TurnPhase::Idle,
            events: None,
            force_speak: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            console_output: false,
            stale_logits: false,
        };

        info!(n_tokens = prompt_tokens.len(), "evaluating initial prompt");
        controller.feed(prompt_tokens)?;
        controller.state.pin_prompt();
        info!(n_keep = controller.state.n_keep(), "initial prompt ready");
        Ok(controller)
    }

    /// Send [`TalkEvent`]s to `tx`.
    pub fn with_events(mut self, tx: Sender<TalkEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Stop the loop (and any reply in progress) when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Echo heard text and generated tokens to stdout.
    pub fn with_console_output(mut self, enabled: bool) -> Self {
        self.console_output = enabled;
        self
    }

    /// Flag that makes the next iteration reply without waiting for speech.
    pub fn force_speak_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.force_speak)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn prompts(&self) -> &PromptAssembler {
        &self.prompts
    }

    /// Poll until cancelled.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error (decode or session failures).
    pub fn run<A, R, S>(&mut self, audio: &A, recognizer: &mut R, speaker: &mut S) -> Result<()>
    where
        A: AudioSource + ?Sized,
        R: SpeechRecognizer + ?Sized,
        S: SpeechOutput + ?Sized,
    {
        let poll = Duration::from_millis(self.config.audio.poll_interval_ms);
        info!("listening");
        self.set_phase(TurnPhase::Listening);

        while !self.cancel.is_cancelled() {
            std::thread::sleep(poll);
            if self.cancel.is_cancelled() {
                break;
            }
            self.step(audio, recognizer, speaker)?;
        }

        self.set_phase(TurnPhase::Idle);
        info!("turn controller stopped");
        Ok(())
    }

    /// One loop iteration: gate, and on an accepted turn reply and speak.
    ///
    /// # Errors
    ///
    /// Returns fatal generator or session errors. Recognizer and speech
    /// output failures are logged and swallowed.
    pub fn step<A, R, S>(
        &mut self,
        audio: &A,
        recognizer: &mut R,
        speaker: &mut S,
    ) -> Result<StepOutcome>
    where
        A: AudioSource + ?Sized,
        R: SpeechRecognizer + ?Sized,
        S: SpeechOutput + ?Sized,
    {
        let forced = self.force_speak.swap(false, Ordering::SeqCst);
        self.set_phase(TurnPhase::Gating);
        let decision = self.gate.poll(audio, recognizer, forced);
        if decision.clears_audio_now() {
            audio.clear();
        }

        let outcome = match decision {
            GateDecision::NoSpeech => StepOutcome::NoSpeech,
            GateDecision::Ignored(reason) => {
                debug!(?reason, "speech ignored");
                self.emit(TalkEvent::Ignored(reason.clone()));
                StepOutcome::Ignored(reason)
            }
            GateDecision::Forced => {
                info!("forced reply");
                self.acknowledge(speaker);
                let reply = self.force_reply()?;
                self.speak(speaker, &reply.text);
                audio.clear();
                StepOutcome::Replied(reply)
            }
            GateDecision::Heard {
                text, confidence, ..
            } => {
                self.acknowledge(speaker);
                let outcome = match self.take_turn(&text, confidence)? {
                    Some(reply) => {
                        self.speak(speaker, &reply.text);
                        StepOutcome::Replied(reply)
                    }
                    None => StepOutcome::NothingToSay,
                };
                audio.clear();
                outcome
            }
        };

        self.set_phase(TurnPhase::Listening);
        Ok(outcome)
    }

    /// Normalize and tokenize an utterance. `None` when there is nothing to say.
    ///
    /// # Errors
    ///
    /// Propagates tokenizer failures.
    pub fn prepare_turn(&self, utterance: &str) -> Result<Option<Turn>> {
        let normalized = normalize_transcript(utterance);
        if normalized.is_empty() || self.engine.tokenize(&normalized, false)?.is_empty() {
            debug!("heard nothing, skipping");
            return Ok(None);
        }

        let fragment = self.prompts.turn_fragment(&normalized);
        Ok(Some(Turn {
            speaker: self.prompts.person().to_owned(),
            utterance: utterance.to_owned(),
            tokens: self.engine.tokenize(&fragment, false)?,
            normalized,
        }))
    }

    /// Feed already-transcribed text as a user turn and generate the reply.
    ///
    /// Returns `None` when the text normalizes to nothing.
    ///
    /// # Errors
    ///
    /// Returns fatal generator or session errors.
    pub fn submit_text(&mut self, raw: &str) -> Result<Option<Reply>> {
        self.take_turn(raw, None)
    }

    fn take_turn(&mut self, utterance: &str, confidence: Option<f32>) -> Result<Option<Reply>> {
        let Some(turn) = self.prepare_turn(utterance)? else {
            return Ok(None);
        };

        match confidence {
            Some(confidence) => info!(confidence, "{}: {}", turn.speaker, turn.normalized),
            None => info!("{}: {}", turn.speaker, turn.normalized),
        }
        if self.console_output {
            print!("{}\n\n{}: ", turn.normalized, self.prompts.bot());
            let _ = std::io::stdout().flush();
        }
        self.emit(TalkEvent::Heard {
            speaker: turn.speaker,
            text: turn.normalized,
            confidence,
        });

        self.feed(turn.tokens)?;
        self.generate().map(Some)
    }

    /// Let the bot continue without new user text.
    ///
    /// # Errors
    ///
    /// Returns fatal generator or session errors.
    pub fn force_reply(&mut self) -> Result<Reply> {
        let header = self.engine.tokenize(&self.prompts.reply_header(), false)?;
        self.feed(header)?;
        self.generate()
    }

    /// Sample until end of turn, cancellation or the reply length limit.
    ///
    /// # Errors
    ///
    /// Returns fatal generator or session errors.
    pub fn generate(&mut self) -> Result<Reply> {
        self.set_phase(TurnPhase::Generating);
        let max_tokens = self.config.llm.max_reply_tokens;
        let mut reply = Reply::default();

        loop {
            if self.cancel.is_cancelled() {
                info!("reply interrupted");
                reply.interrupted = true;
                break;
            }
            if max_tokens > 0 && reply.tokens.len() >= max_tokens {
                debug!(max_tokens, "reply length limit reached");
                self.state.session_mut().mark_dirty();
                break;
            }

            let token = self.next_token()?;
            if is_turn_end(&self.engine, token) {
                self.state.session_mut().mark_dirty();
                break;
            }

            let piece = self.engine.token_to_piece(token)?;
            if self.console_output {
                print!("{piece}");
                let _ = std::io::stdout().flush();
            }
            reply.text.push_str(&piece);
            reply.tokens.push(token);
            self.emit(TalkEvent::Token(piece));

            self.feed(vec![token])?;
        }

        if self.console_output {
            println!("\n");
        }
        info!("{}: {}", self.prompts.bot(), reply.text);
        self.emit(TalkEvent::Reply {
            text: reply.text.clone(),
            interrupted: reply.interrupted,
        });
        Ok(reply)
    }

    /// Persist if due, make sure logits are current, then sample.
    fn next_token(&mut self) -> Result<Token> {
        if self.state.save_if_needed(&mut self.engine)? {
            self.emit(TalkEvent::SessionSaved {
                tokens: self.state.history().len(),
            });
        }

        if self.stale_logits {
            if let Some((token, pos)) = self.state.last_evaluated() {
                debug!(pos, "refreshing logits after cached prefix");
                self.state.session_mut().truncate_unconsumed();
                self.engine.truncate(pos)?;
                decode_pending(&mut self.engine, &[token], pos)?;
            }
            self.stale_logits = false;
        }

        let recent = self.state.recent(self.sampler.config().repeat_last_n);
        self.sampler.sample(&self.engine, recent)
    }

    /// Run `tokens` through the context manager and the decoder.
    fn feed(&mut self, tokens: Vec<Token>) -> Result<()> {
        let prepared = self.state.prepare(tokens);
        if prepared.evicted {
            self.emit(TalkEvent::ContextEvicted {
                n_keep: self.state.n_keep(),
            });
        }

        if !prepared.tokens.is_empty() {
            self.engine.truncate(self.state.n_past())?;
        }
        decode_pending(&mut self.engine, &prepared.tokens, self.state.n_past())?;
        self.state.commit(&prepared.tokens);

        if prepared.fully_reused() {
            self.stale_logits = true;
        } else if !prepared.tokens.is_empty() {
            self.stale_logits = false;
        }
        Ok(())
    }

    fn acknowledge<S: SpeechOutput + ?Sized>(&mut self, speaker: &mut S) {
        let config = self.config;
        self.speak(speaker, &config.conversation.heard_ok);
    }

    fn speak<S: SpeechOutput + ?Sized>(&mut self, speaker: &mut S, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        self.set_phase(TurnPhase::Speaking);
        if let Err(e) = speaker.speak(text, self.config.speech.voice_id) {
            warn!("speech output failed: {e}");
        }
    }

    fn set_phase(&mut self, phase: TurnPhase) {
        if self.phase != phase {
            debug!(%phase, "phase");
            self.phase = phase;
            self.emit(TalkEvent::Phase(phase));
        }
    }

    fn emit(&self, event: TalkEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }
}
