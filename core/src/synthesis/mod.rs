//! Speech synthesis client
//!
//! Turns one text segment into one WAV file on disk by talking to a speech
//! backend (VOICEVOX-compatible by default). Every call runs the same
//! attempt, up to the retry budget:
//!
//! 1. health check (fail fast when the backend is down)
//! 2. build the synthesis query from text + speaker
//! 3. synthesize audio from the query
//! 4. write the artifact
//!
//! Attempts never reuse partial results from a previous attempt. When the
//! budget runs out the last observed error is returned.
//!
//! A locally managed backend process can be bracketed around each call
//! ([`LifecycleScope::PerCall`]) or kept up for the whole session
//! ([`LifecycleScope::Session`], started and stopped by the host).

mod artifact;
mod lifecycle;
mod voicevox;

pub use artifact::ArtifactStore;
pub use lifecycle::{BackendLifecycle, LifecycleGuard, LifecycleScope, ProcessLifecycle};
pub use voicevox::{VoicevoxBackend, VoicevoxConfig};

use crate::retry::RetryPolicy;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Step of the synthesis protocol a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisStage {
    Health,
    Query,
    Synthesis,
}

impl fmt::Display for SynthesisStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SynthesisStage::Health => "health",
            SynthesisStage::Query => "audio_query",
            SynthesisStage::Synthesis => "synthesis",
        };
        f.write_str(s)
    }
}

/// Synthesized audio for one segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioArtifact {
    pub path: PathBuf,
    /// Index of the segment this audio was produced from
    pub segment_index: usize,
}

impl AudioArtifact {
    pub fn new(path: impl Into<PathBuf>, segment_index: usize) -> Self {
        Self {
            path: path.into(),
            segment_index,
        }
    }
}

/// Two-step speech backend protocol plus a health check.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// `Ok` only when the backend reports itself healthy.
    async fn check_health(&self) -> Result<()>;

    /// Build a synthesis query for `text` spoken by `speaker`
    async fn audio_query(&self, text: &str, speaker: u32) -> Result<Value>;

    /// Render a query to encoded audio bytes (WAV)
    async fn synthesis(&self, query: &Value, speaker: u32) -> Result<Vec<u8>>;
}

/// Anything that can turn text into an audio file.
///
/// The orchestrator only depends on this, which keeps retry and backend
/// details out of it.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, speaker: u32) -> Result<PathBuf>;
}

pub struct SynthesisClient {
    backend: Arc<dyn SpeechBackend>,
    store: ArtifactStore,
    retry: RetryPolicy,
    lifecycle: Option<Arc<dyn BackendLifecycle>>,
    scope: LifecycleScope,
}

impl SynthesisClient {
    pub fn new(backend: Arc<dyn SpeechBackend>, store: ArtifactStore) -> Self {
        Self {
            backend,
            store,
            retry: RetryPolicy::default(),
            lifecycle: None,
            scope: LifecycleScope::Session,
        }
    }

    /// Build the client for a VOICEVOX engine described by `cfg`, including
    /// the engine process lifecycle when a binary is configured.
    pub fn from_config(cfg: &VoicevoxConfig) -> Result<Self> {
        let backend: Arc<dyn SpeechBackend> = Arc::new(VoicevoxBackend::new(cfg.clone())?);
        let store = ArtifactStore::new(&cfg.wav_dir).with_retention(cfg.wav_keep);
        let mut client = Self::new(Arc::clone(&backend), store).with_retry(cfg.retry_policy());
        if let Some(bin) = &cfg.engine_bin {
            let process = ProcessLifecycle::new(bin, cfg.engine_args.clone())
                .with_readiness(backend, cfg.engine_ready_timeout());
            client = client.with_lifecycle(Arc::new(process), cfg.lifecycle);
        }
        Ok(client)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_lifecycle(
        mut self,
        lifecycle: Arc<dyn BackendLifecycle>,
        scope: LifecycleScope,
    ) -> Self {
        self.lifecycle = Some(lifecycle);
        self.scope = scope;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Start a session-scoped backend. No-op for per-call scope or when no
    /// lifecycle is configured.
    pub async fn start_session(&self) -> Result<()> {
        match (&self.lifecycle, self.scope) {
            (Some(lc), LifecycleScope::Session) => {
                info!(target: "synthesis", "Starting speech backend for session");
                lc.start().await
            }
            _ => Ok(()),
        }
    }

    /// Stop a session-scoped backend started by [`Self::start_session`]
    pub async fn stop_session(&self) -> Result<()> {
        match (&self.lifecycle, self.scope) {
            (Some(lc), LifecycleScope::Session) => {
                info!(target: "synthesis", "Stopping speech backend");
                lc.stop().await
            }
            _ => Ok(()),
        }
    }

    /// Synthesize `text` with `speaker` and return the written WAV path.
    pub async fn synthesize(&self, text: &str, speaker: u32) -> Result<PathBuf> {
        match (&self.lifecycle, self.scope) {
            (Some(lc), LifecycleScope::PerCall) => {
                let guard = LifecycleGuard::acquire(Arc::clone(lc)).await?;
                let result = self.synthesize_with_retry(text, speaker).await;
                guard.release().await;
                result
            }
            _ => self.synthesize_with_retry(text, speaker).await,
        }
    }

    async fn synthesize_with_retry(&self, text: &str, speaker: u32) -> Result<PathBuf> {
        debug!(target: "synthesis", chars = text.chars().count(), speaker, "Synthesizing segment");
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.attempt(text, speaker).await {
                Ok(path) => {
                    info!(target: "synthesis", attempt, path = %path.display(), "Saved synthesized audio");
                    return Ok(path);
                }
                Err(err) => {
                    warn!(
                        target: "synthesis",
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %err,
                        "Synthesis attempt failed"
                    );
                    if !self.retry.should_retry(attempt) {
                        return Err(err);
                    }
                    tokio::time::sleep(self.retry.delay_after(attempt)).await;
                }
            }
        }
    }

    async fn attempt(&self, text: &str, speaker: u32) -> Result<PathBuf> {
        self.backend.check_health().await?;
        let query = self.backend.audio_query(text, speaker).await?;
        let audio = self.backend.synthesis(&query, speaker).await?;
        self.store.write(&audio).await
    }
}

#[async_trait]
impl Synthesizer for SynthesisClient {
    async fn synthesize(&self, text: &str, speaker: u32) -> Result<PathBuf> {
        SynthesisClient::synthesize(self, text, speaker).await
    }
}
