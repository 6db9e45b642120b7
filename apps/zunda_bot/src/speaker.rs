//! Local speaker output
//!
//! Stands in for a chat-platform voice connection: "connecting" to a channel
//! just labels the connection, and each artifact is played by spawning an
//! external player (aplay | paplay | ffplay). `is_playing` polls the child.
//! Without any player the WAV stays on disk and playback is logged only.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use zunda_core::{AudioArtifact, Destination, Result, VoiceConnection, VoiceGateway, ZundaError};

fn get_from_path(bin: &str) -> Option<PathBuf> {
    if bin.contains(std::path::MAIN_SEPARATOR) {
        let p = PathBuf::from(bin);
        return if p.exists() { Some(p) } else { None };
    }
    if let Ok(paths) = std::env::var("PATH") {
        for dir in std::env::split_paths(&paths) {
            let candidate = dir.join(bin);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Preferred player if installed, else the first of aplay, paplay, ffplay
pub fn select_player(pref: Option<&str>) -> Option<PathBuf> {
    if let Some(p) = pref.and_then(get_from_path) {
        return Some(p);
    }
    ["aplay", "paplay", "ffplay"]
        .iter()
        .find_map(|name| get_from_path(name))
}

fn player_command(player_bin: &Path, wav_path: &Path) -> Command {
    let name = player_bin
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    let mut cmd = Command::new(player_bin);
    if name == "ffplay" {
        cmd.arg("-autoexit").arg("-nodisp").arg("-loglevel").arg("quiet");
    }
    cmd.arg(wav_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    cmd
}

pub struct LocalSpeaker {
    player: Option<PathBuf>,
}

impl LocalSpeaker {
    pub fn new(player_pref: Option<&str>) -> Self {
        let player = select_player(player_pref);
        match &player {
            Some(p) => info!(target: "zunda_bot", bin = ?p, "Detected audio player"),
            None => warn!(target: "zunda_bot", "No audio player found; WAV files will only be kept on disk"),
        }
        Self { player }
    }
}

#[async_trait]
impl VoiceGateway for LocalSpeaker {
    async fn connect(&self, destination: &Destination) -> Result<Arc<dyn VoiceConnection>> {
        info!(target: "zunda_bot", destination = %destination, "Joining voice channel");
        Ok(Arc::new(LocalConnection {
            player: self.player.clone(),
            channel: Mutex::new(destination.channel.clone()),
            connected: AtomicBool::new(true),
            child: Mutex::new(None),
        }))
    }
}

struct LocalConnection {
    player: Option<PathBuf>,
    channel: Mutex<String>,
    connected: AtomicBool,
    child: Mutex<Option<Child>>,
}

impl LocalConnection {
    fn lock_child(&self) -> std::sync::MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl VoiceConnection for LocalConnection {
    fn channel(&self) -> String {
        self.channel
            .lock()
            .map(|c| c.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_playing(&self) -> bool {
        let mut child = self.lock_child();
        match child.as_mut() {
            Some(c) => matches!(c.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn move_to(&self, channel: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(ZundaError::ConnectionEstablishment(
                "cannot move a disconnected speaker".into(),
            ));
        }
        info!(target: "zunda_bot", channel, "Moving to voice channel");
        let mut current = self.channel.lock().unwrap_or_else(|e| e.into_inner());
        *current = channel.to_string();
        Ok(())
    }

    async fn play(&self, artifact: &AudioArtifact) -> Result<()> {
        let Some(player) = &self.player else {
            info!(target: "zunda_bot", path = %artifact.path.display(), "No audio player found; kept WAV on disk");
            return Ok(());
        };
        let mut cmd = player_command(player, &artifact.path);
        debug!(target: "zunda_bot", command = ?cmd, "Starting player");
        let child = cmd
            .spawn()
            .map_err(|e| ZundaError::Playback(format!("failed to start {}: {e}", player.display())))?;
        *self.lock_child() = Some(child);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(mut child) = self.lock_child().take() {
            child
                .start_kill()
                .map_err(|e| ZundaError::Playback(format!("failed to stop player: {e}")))?;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop().await?;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
