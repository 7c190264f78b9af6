//! Listen-only front end: capture, gate and print what the user says.
//!
//! Useful for tuning VAD thresholds and the wake command without loading a
//! generator. Logs go to stderr, heard turns to stdout.
//!
//! Usage: `talkback-listen [config.toml]`

use std::path::PathBuf;
use std::time::Duration;
use talkback::audio::{AudioRing, AudioSource, CpalCapture};
use talkback::gate::{GateDecision, TurnGate};
use talkback::prompt::PromptAssembler;
use talkback::stt::ParakeetStt;
use talkback::transcript::normalize_transcript;
use talkback::TalkConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("talkback=info,hf_hub=warn,ort=warn")
            }),
        )
        .init();

    let config = load_config()?;
    config.validate()?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping");
            on_signal.cancel();
        }
    });

    listen(&config, &cancel).map_err(|e| {
        tracing::error!(error = %e, "talkback-listen exited with error");
        anyhow::anyhow!("talkback-listen failed: {e}")
    })
}

fn load_config() -> anyhow::Result<TalkConfig> {
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    Ok(TalkConfig::load(path.as_deref())?)
}

fn listen(config: &TalkConfig, cancel: &CancellationToken) -> talkback::Result<()> {
    let sample_rate = config.audio.sample_rate;
    let prompts = PromptAssembler::new(&config.prompt)?;
    let gate = TurnGate::new(config, sample_rate, prompts.transcription_hint());

    let mut stt = ParakeetStt::new(&config.stt, &config.models)?;
    stt.ensure_loaded()?;

    let ring = AudioRing::new(config.audio.buffer_ms, sample_rate);
    let capture = CpalCapture::new(&config.audio)?;
    let _handle = capture.start(ring.clone())?;

    match gate.wake() {
        Some(wake) => info!("say \"{}\" followed by your message", wake.phrase()),
        None => info!("start speaking"),
    }

    let poll = Duration::from_millis(config.audio.poll_interval_ms);
    while !cancel.is_cancelled() {
        std::thread::sleep(poll);
        let decision = gate.poll(&ring, &mut stt, false);
        if decision.clears_audio_now() {
            ring.clear();
        }
        match decision {
            GateDecision::Heard { text, .. } => {
                let normalized = normalize_transcript(&text);
                if normalized.is_empty() {
                    debug!("heard nothing");
                } else {
                    println!("{}: {normalized}", prompts.person());
                }
                ring.clear();
            }
            GateDecision::Ignored(reason) => debug!(?reason, "ignored"),
            GateDecision::NoSpeech | GateDecision::Forced => {}
        }
    }
    Ok(())
}
