//! VOICEVOX HTTP protocol against a minimal in-process engine
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use zunda_core::{SpeechBackend, SynthesisStage, VoicevoxBackend, VoicevoxConfig, ZundaError};

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    target: String,
    body: String,
}

type Handler = fn(&str, &str) -> (u16, &'static str);

/// Serve `handler` on an ephemeral port; every request is recorded
async fn fake_engine(handler: Handler) -> (String, Arc<Mutex<Vec<Recorded>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&log);
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let header_end = loop {
                    let n = sock.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };
                let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
                let content_length = head
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                while buf.len() < header_end + content_length {
                    let n = sock.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }

                let mut request_line = head.lines().next().unwrap_or("").split_whitespace();
                let method = request_line.next().unwrap_or("").to_string();
                let target = request_line.next().unwrap_or("").to_string();
                let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
                let path = target.split('?').next().unwrap_or("").to_string();
                seen.lock().unwrap().push(Recorded {
                    method: method.clone(),
                    target,
                    body,
                });

                let (status, payload) = handler(&method, &path);
                let response = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{payload}",
                    payload.len()
                );
                let _ = sock.write_all(response.as_bytes()).await;
                let _ = sock.shutdown().await;
            });
        }
    });
    (format!("http://{addr}"), log)
}

fn healthy_engine(method: &str, path: &str) -> (u16, &'static str) {
    match (method, path) {
        ("GET", "/version") => (200, "\"0.14.0\""),
        ("POST", "/audio_query") => (200, r#"{"accent_phrases":[],"speedScale":1.0}"#),
        ("POST", "/synthesis") => (200, "RIFF0000WAVE"),
        _ => (404, r#"{"detail":"Not Found"}"#),
    }
}

fn rejecting_engine(method: &str, path: &str) -> (u16, &'static str) {
    match (method, path) {
        ("POST", "/audio_query") => (422, r#"{"detail":"speaker not found"}"#),
        _ => healthy_engine(method, path),
    }
}

fn backend(base_url: String) -> VoicevoxBackend {
    VoicevoxBackend::new(VoicevoxConfig {
        base_url,
        speed_scale: 1.5,
        request_timeout_ms: 5_000,
        ..VoicevoxConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_query_then_synthesis() {
    let (url, log) = fake_engine(healthy_engine).await;
    let backend = backend(url);

    backend.check_health().await.unwrap();
    let query = backend.audio_query("ずんだ", 3).await.unwrap();
    assert_eq!(query["speedScale"], serde_json::json!(1.5));
    let audio = backend.synthesis(&query, 3).await.unwrap();
    assert_eq!(audio, b"RIFF0000WAVE");

    let log = log.lock().unwrap().clone();
    assert_eq!(log.len(), 3);
    assert_eq!(log[0].method, "GET");
    assert!(log[1].target.starts_with("/audio_query?"));
    assert!(log[1].target.contains("speaker=3"));
    assert_eq!(log[2].target, "/synthesis?speaker=3");
    let sent: serde_json::Value = serde_json::from_str(&log[2].body).unwrap();
    assert_eq!(sent["speedScale"], serde_json::json!(1.5));
}

#[tokio::test]
async fn test_rejection_carries_detail() {
    let (url, _log) = fake_engine(rejecting_engine).await;
    let err = backend(url).audio_query("hi", 999).await.unwrap_err();
    match err {
        ZundaError::SynthesisRejected {
            stage,
            status,
            detail,
        } => {
            assert_eq!(stage, SynthesisStage::Query);
            assert_eq!(status, 422);
            assert!(detail.contains("speaker not found"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_engine_is_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = backend(format!("http://{addr}")).check_health().await.unwrap_err();
    assert!(matches!(err, ZundaError::BackendUnavailable(_)));
}
