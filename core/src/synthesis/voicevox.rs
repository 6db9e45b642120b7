use super::{LifecycleScope, SpeechBackend, SynthesisStage};
use crate::retry::RetryPolicy;
use crate::{Result, ZundaError};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Configuration for the VOICEVOX engine, loaded from environment variables
#[derive(Debug, Clone)]
pub struct VoicevoxConfig {
    pub base_url: String, // e.g., http://127.0.0.1:50021
    pub speaker: u32,     // 1 = ずんだもん (あまあま)
    pub speed_scale: f32,
    pub request_timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub wav_dir: PathBuf,
    /// Artifacts kept on disk; 0 keeps all
    pub wav_keep: usize,
    /// Engine binary to manage; `None` means the engine is run externally
    pub engine_bin: Option<PathBuf>,
    pub engine_args: Vec<String>,
    pub engine_ready_timeout_ms: u64,
    pub lifecycle: LifecycleScope,
}

impl Default for VoicevoxConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("VOICEVOX_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "http://127.0.0.1:50021".to_string()),
            speaker: std::env::var("VOICEVOX_SPEAKER")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(1),
            speed_scale: std::env::var("VOICEVOX_SPEED_SCALE")
                .ok()
                .and_then(|v| v.parse::<f32>().ok())
                .unwrap_or(1.2),
            request_timeout_ms: std::env::var("VOICEVOX_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30_000),
            max_attempts: std::env::var("VOICEVOX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(10),
            retry_delay_ms: std::env::var("VOICEVOX_RETRY_DELAY_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(1_000),
            wav_dir: std::env::var("WAV_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("wav")),
            wav_keep: std::env::var("WAV_KEEP")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(200),
            engine_bin: std::env::var("VOICEVOX_ENGINE_BIN")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            engine_args: std::env::var("VOICEVOX_ENGINE_ARGS")
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            engine_ready_timeout_ms: std::env::var("VOICEVOX_READY_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30_000),
            lifecycle: std::env::var("VOICEVOX_LIFECYCLE")
                .ok()
                .and_then(|v| v.parse::<LifecycleScope>().ok())
                .unwrap_or_default(),
        }
    }
}

impl VoicevoxConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_attempts, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn engine_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_ready_timeout_ms)
    }
}

/// HTTP client for a VOICEVOX-compatible engine
#[derive(Clone)]
pub struct VoicevoxBackend {
    http: Client,
    cfg: VoicevoxConfig,
}

impl VoicevoxBackend {
    pub fn new(cfg: VoicevoxConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| ZundaError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, cfg })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(VoicevoxConfig::default())
    }

    pub fn config(&self) -> &VoicevoxConfig {
        &self.cfg
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.cfg.base_url.trim_end_matches('/'), path)
    }
}

/// Map a non-success response to `SynthesisRejected` carrying the body
async fn ensure_success(resp: Response, stage: SynthesisStage) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let detail = resp.text().await.unwrap_or_default();
    Err(ZundaError::SynthesisRejected {
        stage,
        status,
        detail,
    })
}

#[async_trait]
impl SpeechBackend for VoicevoxBackend {
    async fn check_health(&self) -> Result<()> {
        let url = self.url("version");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ZundaError::BackendUnavailable(format!("{url}: {e}")))?;
        if resp.status() != reqwest::StatusCode::OK {
            return Err(ZundaError::BackendUnavailable(format!(
                "{url} answered with status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn audio_query(&self, text: &str, speaker: u32) -> Result<Value> {
        let url = self.url("audio_query");
        debug!(target: "synthesis", "POST {}", url);
        let speaker = speaker.to_string();
        let resp = self
            .http
            .post(&url)
            .query(&[("text", text), ("speaker", speaker.as_str())])
            .send()
            .await
            .map_err(|e| ZundaError::TransientBackend(format!("audio_query: {e}")))?;
        let resp = ensure_success(resp, SynthesisStage::Query).await?;
        let mut query: Value = resp
            .json()
            .await
            .map_err(|e| ZundaError::TransientBackend(format!("audio_query body: {e}")))?;
        if let Some(obj) = query.as_object_mut() {
            obj.insert("speedScale".to_string(), json!(self.cfg.speed_scale));
        }
        Ok(query)
    }

    async fn synthesis(&self, query: &Value, speaker: u32) -> Result<Vec<u8>> {
        let url = self.url("synthesis");
        debug!(target: "synthesis", "POST {}", url);
        let resp = self
            .http
            .post(&url)
            .query(&[("speaker", speaker)])
            .json(query)
            .send()
            .await
            .map_err(|e| ZundaError::TransientBackend(format!("synthesis: {e}")))?;
        let resp = ensure_success(resp, SynthesisStage::Synthesis).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ZundaError::TransientBackend(format!("synthesis body: {e}")))?;
        Ok(bytes.to_vec())
    }
}
