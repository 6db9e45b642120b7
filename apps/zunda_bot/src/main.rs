mod commands;
mod config;
mod console;
mod speaker;

use config::BotConfig;
use console::Console;
use speaker::LocalSpeaker;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use zunda_core::{LlmClient, PlaybackSequencer, SynthesisClient, Zunda};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Logging / tracing
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,zunda_core=info,zunda_bot=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(target: "zunda_bot", "Starting Zunda bot: text → chat → VOICEVOX → speaker");

    // Load configuration (defaults + env + optional TOML overlay)
    let cfg = BotConfig::load();

    let generator = Arc::new(LlmClient::new(cfg.llm.clone())?);
    if generator.config().api_key.is_none() {
        warn!(target: "zunda_bot", "No LLM API key configured; chat replies will likely fail");
    }
    let synthesis = Arc::new(SynthesisClient::from_config(&cfg.voicevox)?);
    let gateway = Arc::new(LocalSpeaker::new(cfg.voice.player.as_deref()));
    let sequencer = Arc::new(PlaybackSequencer::new(gateway, cfg.playback.clone()));

    let zunda = Zunda::new(
        generator,
        cfg.chat.clone(),
        synthesis,
        sequencer,
        cfg.voicevox.speaker,
    )
    .with_max_segment_chars(cfg.voice.max_segment_chars);
    zunda.start().await?;

    let mut console = Console::new(Arc::new(zunda), &cfg.voice);
    info!(target: "zunda_bot", destination = %console.destination(), "Console ready");
    println!("{}", commands::HELP_TEXT);

    // Created once so a Ctrl-C arriving between polls is not lost
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    error!(target: "zunda_bot", error = %e, "Ctrl-C handler failed");
                }
                info!(target: "zunda_bot", "Shutting down...");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => console.handle_line(&line).await,
                    Ok(None) => {
                        info!(target: "zunda_bot", "stdin closed; shutting down");
                        break;
                    }
                    Err(e) => {
                        error!(target: "zunda_bot", error = %e, "Failed to read stdin");
                        break;
                    }
                }
            }
        }
    }

    info!(target: "zunda_bot", in_flight = console.in_flight(), "Stopping speech tasks");
    if let Err(e) = console.shutdown().await {
        error!(target: "zunda_bot", error = %e, "Shutdown failed");
    }
    Ok(())
}
