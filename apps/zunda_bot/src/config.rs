use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use zunda_core::{
    ChatConfig, LifecycleScope, LlmClientConfig, PlaybackConfig, RetryPolicy, VoicevoxConfig,
    DEFAULT_MAX_SEGMENT_CHARS,
};

/// High-level configuration for the bot
#[derive(Clone, Debug)]
pub struct BotConfig {
    pub voicevox: VoicevoxConfig,
    pub playback: PlaybackConfig,
    pub llm: LlmClientConfig,
    pub chat: ChatConfig,
    pub voice: VoiceConfig,
}

/// Where and how speech is played
#[derive(Clone, Debug)]
pub struct VoiceConfig {
    pub guild: String,
    pub channel: String,
    /// Clip played by `/talk test`
    pub test_clip: PathBuf,
    pub player: Option<String>,
    pub max_segment_chars: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            guild: std::env::var("ZUNDA_GUILD").unwrap_or_else(|_| "local".to_string()),
            channel: std::env::var("ZUNDA_VOICE_CHANNEL").unwrap_or_else(|_| "general".to_string()),
            test_clip: std::env::var("ZUNDA_TEST_CLIP")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("assets/test.wav")),
            player: std::env::var("ZUNDA_PLAYER").ok().filter(|s| !s.is_empty()),
            max_segment_chars: std::env::var("ZUNDA_MAX_SEGMENT_CHARS")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(DEFAULT_MAX_SEGMENT_CHARS),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        // Feature module defaults already consider env vars
        Self {
            voicevox: VoicevoxConfig::default(),
            playback: PlaybackConfig::default(),
            llm: LlmClientConfig::default(),
            chat: ChatConfig::default(),
            voice: VoiceConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file (path via ZUNDA_BOT_CONFIG or ./zunda_bot.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let default = Self::default();
        let path = std::env::var("ZUNDA_BOT_CONFIG").unwrap_or_else(|_| "zunda_bot.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target: "zunda_bot", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match Self::from_toml_str(&s, default.clone()) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(target: "zunda_bot", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target: "zunda_bot", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    pub fn from_toml_str(s: &str, base: Self) -> Result<Self, toml::de::Error> {
        toml::from_str::<BotToml>(s).map(|t| t.overlay(base))
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct BotToml {
    pub voicevox: Option<VoicevoxToml>,
    pub playback: Option<PlaybackToml>,
    pub llm: Option<LlmToml>,
    pub chat: Option<ChatToml>,
    pub voice: Option<VoiceToml>,
}

impl BotToml {
    fn overlay(self, mut base: BotConfig) -> BotConfig {
        if let Some(v) = self.voicevox {
            v.apply(&mut base.voicevox);
        }
        if let Some(p) = self.playback {
            p.apply(&mut base.playback);
        }
        if let Some(l) = self.llm {
            l.apply(&mut base.llm);
        }
        if let Some(c) = self.chat {
            c.apply(&mut base.chat);
        }
        if let Some(v) = self.voice {
            v.apply(&mut base.voice);
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct VoicevoxToml {
    pub base_url: Option<String>,
    pub speaker: Option<u32>,
    pub speed_scale: Option<f32>,
    pub request_timeout_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub wav_dir: Option<PathBuf>,
    pub wav_keep: Option<usize>,
    pub engine_bin: Option<PathBuf>,
    pub engine_args: Option<Vec<String>>,
    pub engine_ready_timeout_ms: Option<u64>,
    pub lifecycle: Option<LifecycleScope>,
}
impl VoicevoxToml {
    fn apply(self, v: &mut VoicevoxConfig) {
        if let Some(x) = self.base_url {
            v.base_url = x;
        }
        if let Some(x) = self.speaker {
            v.speaker = x;
        }
        if let Some(x) = self.speed_scale {
            v.speed_scale = x.clamp(0.5, 2.0);
        }
        if let Some(x) = self.request_timeout_ms {
            v.request_timeout_ms = x;
        }
        if let Some(x) = self.max_attempts {
            v.max_attempts = x.max(1);
        }
        if let Some(x) = self.retry_delay_ms {
            v.retry_delay_ms = x;
        }
        if let Some(x) = self.wav_dir {
            v.wav_dir = x;
        }
        if let Some(x) = self.wav_keep {
            v.wav_keep = x;
        }
        if let Some(x) = self.engine_bin {
            v.engine_bin = Some(x);
        }
        if let Some(x) = self.engine_args {
            v.engine_args = x.into_iter().filter(|a| !a.is_empty()).collect();
        }
        if let Some(x) = self.engine_ready_timeout_ms {
            v.engine_ready_timeout_ms = x;
        }
        if let Some(x) = self.lifecycle {
            v.lifecycle = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct PlaybackToml {
    pub poll_interval_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
    pub connect_attempts: Option<u32>,
    pub connect_retry_delay_ms: Option<u64>,
}
impl PlaybackToml {
    fn apply(self, p: &mut PlaybackConfig) {
        if let Some(x) = self.poll_interval_ms {
            p.poll_interval = Duration::from_millis(x);
        }
        if let Some(x) = self.idle_timeout_ms {
            p.idle_timeout = (x > 0).then(|| Duration::from_millis(x));
        }
        if self.connect_attempts.is_some() || self.connect_retry_delay_ms.is_some() {
            let attempts = self.connect_attempts.unwrap_or(p.connect_retry.max_attempts);
            let delay = self
                .connect_retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| p.connect_retry.delay_after(1));
            p.connect_retry = RetryPolicy::fixed(attempts, delay);
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct LlmToml {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub temperature: Option<f32>,
}
impl LlmToml {
    fn apply(self, l: &mut LlmClientConfig) {
        if let Some(x) = self.base_url {
            l.base_url = x;
        }
        if let Some(x) = self.model {
            l.model = x;
        }
        if let Some(x) = self.api_key {
            l.api_key = Some(x);
        }
        if let Some(x) = self.request_timeout_ms {
            l.request_timeout_ms = x;
        }
        if let Some(x) = self.temperature {
            l.temperature = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct ChatToml {
    pub persona: Option<String>,
    pub user_label: Option<String>,
    pub bot_label: Option<String>,
}
impl ChatToml {
    fn apply(self, c: &mut ChatConfig) {
        if let Some(x) = self.persona {
            c.persona = x;
        }
        if let Some(x) = self.user_label {
            c.user_label = x;
        }
        if let Some(x) = self.bot_label {
            c.bot_label = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct VoiceToml {
    pub guild: Option<String>,
    pub channel: Option<String>,
    pub test_clip: Option<PathBuf>,
    pub player: Option<String>,
    pub max_segment_chars: Option<usize>,
}
impl VoiceToml {
    fn apply(self, v: &mut VoiceConfig) {
        if let Some(x) = self.guild {
            v.guild = x;
        }
        if let Some(x) = self.channel {
            v.channel = x;
        }
        if let Some(x) = self.test_clip {
            v.test_clip = x;
        }
        if let Some(x) = self.player {
            v.player = Some(x);
        }
        if let Some(x) = self.max_segment_chars {
            v.max_segment_chars = x.max(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_only_touches_given_fields() {
        let base = BotConfig::default();
        let speaker_before = base.voicevox.speaker;
        let cfg = BotConfig::from_toml_str(
            r#"
            [voicevox]
            base_url = "http://engine:50021"
            lifecycle = "per_call"

            [playback]
            connect_attempts = 5

            [voice]
            channel = "zunda-room"
            "#,
            base,
        )
        .unwrap();

        assert_eq!(cfg.voicevox.base_url, "http://engine:50021");
        assert_eq!(cfg.voicevox.lifecycle, LifecycleScope::PerCall);
        assert_eq!(cfg.voicevox.speaker, speaker_before);
        assert_eq!(cfg.playback.connect_retry.max_attempts, 5);
        assert_eq!(cfg.voice.channel, "zunda-room");
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(BotConfig::from_toml_str("[voicevox\nspeaker = ", BotConfig::default()).is_err());
    }
}
