//! Voice conversation front end on a local llama.cpp model.
//!
//! Usage: `talkback [config.toml]`

use std::path::PathBuf;
use talkback::audio::{AudioRing, CpalCapture};
use talkback::llm::llama::LlamaRuntime;
use talkback::stt::ParakeetStt;
use talkback::tts::CommandSpeaker;
use talkback::{TalkConfig, TurnController};
use tokio_util::sync::CancellationToken;
use tracing::info;

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

    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = TalkConfig::load(path.as_deref())?;
    config.validate()?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping");
            on_signal.cancel();
        }
    });

    // The controller blocks; keep the runtime free for the signal task.
    tokio::task::spawn_blocking(move || talk(&config, &cancel))
        .await?
        .map_err(|e| {
            tracing::error!(error = %e, "talkback exited with error");
            anyhow::anyhow!("talkback failed: {e}")
        })
}

fn talk(config: &TalkConfig, cancel: &CancellationToken) -> talkback::Result<()> {
    let runtime = LlamaRuntime::load(&config.llm)?;
    let engine = runtime.engine(&config.llm)?;
    let mut controller = TurnController::start(config, engine)?
        .with_cancel(cancel.clone())
        .with_console_output(true);

    let mut stt = ParakeetStt::new(&config.stt, &config.models)?;
    stt.ensure_loaded()?;

    let ring = AudioRing::new(config.audio.buffer_ms, config.audio.sample_rate);
    let capture = CpalCapture::new(&config.audio)?;
    let _handle = capture.start(ring.clone())?;

    let mut speaker = CommandSpeaker::new(&config.speech);
    controller.run(&ring, &mut stt, &mut speaker)
}
