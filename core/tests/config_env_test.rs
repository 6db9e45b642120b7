use serial_test::serial;
use std::time::Duration;
use zunda_core::{LifecycleScope, LlmClientConfig, PlaybackConfig, VoicevoxConfig};

const VARS: &[&str] = &[
    "VOICEVOX_URL",
    "VOICEVOX_SPEAKER",
    "VOICEVOX_ATTEMPTS",
    "VOICEVOX_RETRY_DELAY_MS",
    "VOICEVOX_LIFECYCLE",
    "VOICEVOX_ENGINE_BIN",
    "VOICEVOX_ENGINE_ARGS",
    "WAV_KEEP",
    "PLAYBACK_IDLE_TIMEOUT_MS",
    "VOICE_CONNECT_ATTEMPTS",
    "LLM_API_KEY",
    "GEMINI_API_KEY",
    "LLM_MODEL",
];

fn clear() {
    for v in VARS {
        std::env::remove_var(v);
    }
}

#[test]
#[serial]
fn test_voicevox_defaults() {
    clear();
    let cfg = VoicevoxConfig::default();
    assert_eq!(cfg.base_url, "http://127.0.0.1:50021");
    assert_eq!(cfg.speaker, 1);
    assert_eq!(cfg.lifecycle, LifecycleScope::Session);
    assert!(cfg.engine_bin.is_none());
    assert_eq!(cfg.wav_keep, 200);
    let policy = cfg.retry_policy();
    assert_eq!(policy.max_attempts, 10);
    assert_eq!(policy.delay_after(1), Duration::from_secs(1));
}

#[test]
#[serial]
fn test_voicevox_env_overrides() {
    clear();
    std::env::set_var("VOICEVOX_URL", "http://engine:50021");
    std::env::set_var("VOICEVOX_SPEAKER", "3");
    std::env::set_var("VOICEVOX_ATTEMPTS", "2");
    std::env::set_var("VOICEVOX_RETRY_DELAY_MS", "50");
    std::env::set_var("VOICEVOX_LIFECYCLE", "per_call");
    std::env::set_var("VOICEVOX_ENGINE_BIN", "/opt/voicevox/run");
    std::env::set_var("VOICEVOX_ENGINE_ARGS", "--host 127.0.0.1  --port 50021");
    std::env::set_var("WAV_KEEP", "0");

    let cfg = VoicevoxConfig::default();
    clear();

    assert_eq!(cfg.base_url, "http://engine:50021");
    assert_eq!(cfg.speaker, 3);
    assert_eq!(cfg.lifecycle, LifecycleScope::PerCall);
    assert_eq!(cfg.retry_policy().max_attempts, 2);
    assert_eq!(cfg.retry_policy().delay_after(1), Duration::from_millis(50));
    assert_eq!(cfg.engine_args, vec!["--host", "127.0.0.1", "--port", "50021"]);
    assert_eq!(cfg.wav_keep, 0);
}

#[test]
#[serial]
fn test_playback_env() {
    clear();
    std::env::set_var("PLAYBACK_IDLE_TIMEOUT_MS", "0");
    std::env::set_var("VOICE_CONNECT_ATTEMPTS", "5");
    let cfg = PlaybackConfig::default();
    clear();

    assert_eq!(cfg.idle_timeout, None);
    assert_eq!(cfg.connect_retry.max_attempts, 5);
}

#[test]
#[serial]
fn test_llm_key_falls_back_to_gemini() {
    clear();
    std::env::set_var("GEMINI_API_KEY", "gm-key");
    std::env::set_var("LLM_MODEL", "gemini-2.5-flash");
    let cfg = LlmClientConfig::default();
    clear();

    assert_eq!(cfg.api_key.as_deref(), Some("gm-key"));
    assert_eq!(cfg.model, "gemini-2.5-flash");
}
