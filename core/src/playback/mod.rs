//! Voice-channel playback sequencing
//!
//! The sequencer owns the single voice connection of every guild. All
//! connection changes (connect, move, reuse, stop, disconnect) go through
//! it, and one async mutex per guild serializes `play_sequence` calls so
//! two utterances aimed at the same guild queue up instead of talking over
//! each other. Different guilds proceed independently.
//!
//! The connection handle itself sits outside that queue lock, so `stop`
//! and `disconnect` take effect while a batch is running. `stop` cancels
//! every batch submitted before it (running or queued); their remaining
//! artifacts are reported as abandoned.
//!
//! Per batch:
//! 1. resolve the connection (reuse / move / connect), retried with a
//!    bounded policy; exhaustion aborts the batch before anything plays
//! 2. for each artifact: wait until the connection is idle (suspend and
//!    poll, never spin), re-resolve, play
//!
//! Once playback has started, a failed `play()` only costs that artifact.
//! If the connection cannot be re-established mid-batch, the rest of the
//! batch is abandoned and reported.

use crate::retry::RetryPolicy;
use crate::synthesis::AudioArtifact;
use crate::{Result, ZundaError};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Where audio should play: a guild's single voice slot, pointed at `channel`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub guild: String,
    pub channel: String,
}

impl Destination {
    pub fn new(guild: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            guild: guild.into(),
            channel: channel.into(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.guild, self.channel)
    }
}

/// A live voice connection as exposed by the chat platform
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    /// Channel the connection currently points at
    fn channel(&self) -> String;
    fn is_connected(&self) -> bool;
    fn is_playing(&self) -> bool;
    async fn move_to(&self, channel: &str) -> Result<()>;
    /// Start playing; returns once playback has begun, not when it ends
    async fn play(&self, artifact: &AudioArtifact) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
}

/// Opens voice connections
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn connect(&self, destination: &Destination) -> Result<Arc<dyn VoiceConnection>>;
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Interval between `is_playing` polls while waiting for idle
    pub poll_interval: Duration,
    /// Longest wait for a previous clip; it is stopped once exceeded
    pub idle_timeout: Option<Duration>,
    pub connect_retry: RetryPolicy,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        let poll_ms = std::env::var("PLAYBACK_POLL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(1_000);
        let idle_timeout_ms = std::env::var("PLAYBACK_IDLE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(120_000);
        let attempts = std::env::var("VOICE_CONNECT_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(3);
        Self {
            poll_interval: Duration::from_millis(poll_ms),
            // 0 disables the timeout
            idle_timeout: (idle_timeout_ms > 0).then(|| Duration::from_millis(idle_timeout_ms)),
            connect_retry: RetryPolicy::fixed(attempts, Duration::from_secs(1)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackFailure {
    pub segment_index: usize,
    pub error: String,
}

/// Outcome of one `play_sequence` batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    /// Segment indices that started playing, in play order
    pub played: Vec<usize>,
    pub failed: Vec<PlaybackFailure>,
    /// Segment indices never attempted because the connection was lost
    pub abandoned: Vec<usize>,
    pub abandon_reason: Option<String>,
}

impl PlaybackReport {
    pub fn played_count(&self) -> usize {
        self.played.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.abandoned.is_empty()
    }

    fn abandon(&mut self, rest: &[AudioArtifact], reason: String) {
        self.abandoned = rest.iter().map(|a| a.segment_index).collect();
        self.abandon_reason = Some(reason);
    }
}

const STOPPED_REASON: &str = "playback stopped";

type Connection = Arc<dyn VoiceConnection>;

/// Per-guild state
#[derive(Default)]
struct GuildSlot {
    /// Held by a batch for its whole duration
    queue: Mutex<()>,
    /// Current connection; never locked across an await
    conn: std::sync::Mutex<Option<Connection>>,
    /// Bumped by every `stop`/`disconnect`; batches compare against the
    /// value seen on entry
    stops: AtomicU64,
}

impl GuildSlot {
    fn current(&self) -> Option<Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn replace(&self, conn: Option<Connection>) -> Option<Connection> {
        let mut guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, conn)
    }

    fn epoch(&self) -> u64 {
        self.stops.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct PlaybackSequencer {
    gateway: Arc<dyn VoiceGateway>,
    cfg: PlaybackConfig,
    slots: DashMap<String, Arc<GuildSlot>>,
}

impl PlaybackSequencer {
    pub fn new(gateway: Arc<dyn VoiceGateway>, cfg: PlaybackConfig) -> Self {
        Self {
            gateway,
            cfg,
            slots: DashMap::new(),
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.cfg
    }

    fn slot(&self, guild: &str) -> Arc<GuildSlot> {
        Arc::clone(&*self.slots.entry(guild.to_string()).or_default())
    }

    /// Play `artifacts` on `destination` back to back, in order.
    pub async fn play_sequence(
        &self,
        destination: &Destination,
        artifacts: &[AudioArtifact],
    ) -> Result<PlaybackReport> {
        let slot = self.slot(&destination.guild);
        let epoch = slot.epoch();
        let _turn = slot.queue.lock().await;
        let mut report = PlaybackReport::default();

        if slot.epoch() != epoch {
            debug!(target: "playback", destination = %destination, "Batch stopped before it started");
            report.abandon(artifacts, STOPPED_REASON.to_string());
            return Ok(report);
        }

        self.resolve(&slot, destination).await?;
        info!(
            target: "playback",
            destination = %destination,
            artifacts = artifacts.len(),
            "Starting playback sequence"
        );

        for (pos, artifact) in artifacts.iter().enumerate() {
            self.wait_until_idle(&slot, epoch).await;
            if slot.epoch() != epoch {
                info!(target: "playback", destination = %destination, remaining = artifacts.len() - pos, "Playback stopped");
                report.abandon(&artifacts[pos..], STOPPED_REASON.to_string());
                break;
            }

            let conn = match self.resolve(&slot, destination).await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(target: "playback", destination = %destination, error = %e, "Connection lost mid-sequence; abandoning rest");
                    report.abandon(&artifacts[pos..], e.to_string());
                    break;
                }
            };

            match conn.play(artifact).await {
                Ok(()) => {
                    debug!(target: "playback", segment = artifact.segment_index, path = %artifact.path.display(), "Playing");
                    report.played.push(artifact.segment_index);
                }
                Err(e) => {
                    warn!(target: "playback", segment = artifact.segment_index, error = %e, "Failed to play artifact");
                    report.failed.push(PlaybackFailure {
                        segment_index: artifact.segment_index,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Resolve the connection with the configured retry budget.
    async fn resolve(&self, slot: &GuildSlot, destination: &Destination) -> Result<Connection> {
        let policy = self.cfg.connect_retry;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.resolve_once(slot, destination).await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    warn!(
                        target: "playback",
                        destination = %destination,
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        "Voice connection attempt failed"
                    );
                    if !policy.should_retry(attempt) {
                        return Err(ZundaError::SequenceAborted {
                            destination: destination.to_string(),
                            attempts: attempt,
                            reason: e.to_string(),
                        });
                    }
                    tokio::time::sleep(policy.delay_after(attempt)).await;
                }
            }
        }
    }

    async fn resolve_once(&self, slot: &GuildSlot, destination: &Destination) -> Result<Connection> {
        if let Some(conn) = slot.current() {
            if conn.is_connected() {
                if conn.channel() == destination.channel {
                    return Ok(conn);
                }
                debug!(target: "playback", from = %conn.channel(), to = %destination.channel, "Moving voice connection");
                if let Err(e) = conn.move_to(&destination.channel).await {
                    // Forget the connection so the next attempt connects fresh.
                    slot.replace(None);
                    return Err(e);
                }
                return Ok(conn);
            }
            debug!(target: "playback", destination = %destination, "Dropping stale voice connection");
            slot.replace(None);
        }

        let conn = self.gateway.connect(destination).await?;
        info!(target: "playback", destination = %destination, "Connected to voice channel");
        slot.replace(Some(Arc::clone(&conn)));
        Ok(conn)
    }

    /// Suspend until the current clip ends, the batch is stopped, or the
    /// idle timeout forces the clip to stop.
    async fn wait_until_idle(&self, slot: &GuildSlot, epoch: u64) {
        let Some(conn) = slot.current() else {
            return;
        };
        let started = Instant::now();
        while conn.is_connected() && conn.is_playing() {
            if slot.epoch() != epoch {
                return;
            }
            if let Some(limit) = self.cfg.idle_timeout {
                if started.elapsed() >= limit {
                    warn!(target: "playback", waited_ms = limit.as_millis() as u64, "Previous clip still playing; stopping it");
                    if let Err(e) = conn.stop().await {
                        warn!(target: "playback", error = %e, "Failed to stop stale playback");
                    }
                    return;
                }
            }
            tokio::time::sleep(self.cfg.poll_interval).await;
        }
    }

    /// Stop the clip playing in `guild` and cancel the batches already submitted
    pub async fn stop(&self, guild: &str) -> Result<()> {
        let slot = self.slot(guild);
        slot.cancel();
        match slot.current() {
            Some(conn) if conn.is_playing() => conn.stop().await,
            _ => Ok(()),
        }
    }

    /// Leave the voice channel of `guild`, cancelling submitted batches
    pub async fn disconnect(&self, guild: &str) -> Result<()> {
        let slot = self.slot(guild);
        slot.cancel();
        match slot.replace(None) {
            Some(conn) => conn.disconnect().await,
            None => Ok(()),
        }
    }

    pub async fn disconnect_all(&self) {
        let slots: Vec<(String, Arc<GuildSlot>)> = self
            .slots
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        for (guild, slot) in slots {
            slot.cancel();
            if let Some(conn) = slot.replace(None) {
                if let Err(e) = conn.disconnect().await {
                    warn!(target: "playback", guild = %guild, error = %e, "Failed to disconnect");
                }
            }
        }
    }

    /// Channel the guild's connection points at, if connected
    pub fn current_channel(&self, guild: &str) -> Option<String> {
        self.slots
            .get(guild)
            .and_then(|slot| slot.current())
            .filter(|c| c.is_connected())
            .map(|c| c.channel())
    }
}
