//! Stdin command dispatch.
//!
//! Speech commands (`/talk`, `/talk test`, chat) run on background tasks so
//! the input loop keeps reading: `/stop` and `/leave` act on a running
//! utterance, and Ctrl-C is never starved. Ordering between utterances is
//! left to the playback sequencer's per-guild queue.

use crate::commands::{self, describe_report, Command};
use crate::config::VoiceConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use zunda_core::{Destination, Zunda};

pub struct Console {
    zunda: Arc<Zunda>,
    destination: Destination,
    test_clip: PathBuf,
    tasks: Vec<JoinHandle<()>>,
}

impl Console {
    pub fn new(zunda: Arc<Zunda>, voice: &VoiceConfig) -> Self {
        Self {
            zunda,
            destination: Destination::new(voice.guild.clone(), voice.channel.clone()),
            test_clip: voice.test_clip.clone(),
            tasks: Vec::new(),
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Speech tasks still running
    pub fn in_flight(&mut self) -> usize {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.len()
    }

    /// Handle one input line; returns once speech work is queued, not done
    pub async fn handle_line(&mut self, line: &str) {
        match commands::parse(line) {
            Command::Empty => {}
            Command::Help => println!("{}", commands::HELP_TEXT),
            Command::Neko => println!("{}", commands::NEKO_TEXT),
            Command::TalkEmpty => println!("{}", commands::TALK_USAGE),
            Command::JoinEmpty => println!("{}", commands::JOIN_USAGE),
            Command::Join(channel) => {
                self.destination.channel = channel;
                println!("次の読み上げは {} で行うにゃ", self.destination);
            }
            Command::Leave => {
                let sequencer = self.zunda.speech.sequencer();
                match sequencer.disconnect(&self.destination.guild).await {
                    Ok(()) => println!("ボイスチャンネルから退出したにゃ"),
                    Err(e) => println!("退出に失敗したにゃ: {e}"),
                }
            }
            Command::Stop => {
                let sequencer = self.zunda.speech.sequencer();
                if let Err(e) = sequencer.stop(&self.destination.guild).await {
                    println!("停止に失敗したにゃ: {e}");
                }
            }
            Command::TalkTest => {
                let clip = self.test_clip.clone();
                self.spawn(move |zunda, dest| async move {
                    let report = zunda.speech.play_clip(&clip, &dest).await;
                    println!("{}", describe_report(&report));
                });
            }
            Command::Talk(text) => {
                self.spawn(move |zunda, dest| async move {
                    let report = zunda.speech.handle_text(&text, &dest).await;
                    println!("{}", describe_report(&report));
                });
            }
            Command::Chat(text) => {
                self.spawn(move |zunda, dest| async move {
                    // One conversation per guild in console mode
                    let Some(reply) = zunda.chat.respond(&dest.guild, &text).await else {
                        println!("うまく返事ができなかったのだ");
                        return;
                    };
                    println!("ずんだもん: {reply}");
                    let report = zunda.speech.handle_text(&reply, &dest).await;
                    info!(target: "zunda_bot", summary = %describe_report(&report), "Spoke reply");
                });
            }
        }
    }

    fn spawn<F, Fut>(&mut self, job: F)
    where
        F: FnOnce(Arc<Zunda>, Destination) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.retain(|t| !t.is_finished());
        let fut = job(Arc::clone(&self.zunda), self.destination.clone());
        self.tasks.push(tokio::spawn(fut));
    }

    /// Cancel in-flight speech, then release voice connections and the backend
    pub async fn shutdown(&mut self) -> zunda_core::Result<()> {
        let tasks = std::mem::take(&mut self.tasks);
        debug!(target: "zunda_bot", in_flight = tasks.len(), "Cancelling speech tasks");
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            // Cancelled tasks report a JoinError; nothing to recover from it.
            let _ = task.await;
        }
        self.zunda.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;
    use zunda_core::{
        ArtifactStore, ChatConfig, PlaybackConfig, PlaybackSequencer, RetryPolicy, SpeechBackend,
        SynthesisClient, TextGenerator, VoiceConnection, VoiceGateway, ZundaError,
    };

    /// Engine that never answers its health check
    struct StuckEngine;

    #[async_trait]
    impl SpeechBackend for StuckEngine {
        async fn check_health(&self) -> zunda_core::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
        async fn audio_query(&self, _text: &str, _speaker: u32) -> zunda_core::Result<Value> {
            Ok(Value::Null)
        }
        async fn synthesis(&self, _query: &Value, _speaker: u32) -> zunda_core::Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    struct NoVoice;

    #[async_trait]
    impl VoiceGateway for NoVoice {
        async fn connect(
            &self,
            _destination: &Destination,
        ) -> zunda_core::Result<Arc<dyn VoiceConnection>> {
            Err(ZundaError::ConnectionEstablishment("offline".into()))
        }
    }

    struct Parrot;

    #[async_trait]
    impl TextGenerator for Parrot {
        async fn generate(&self, _prompt: &str) -> zunda_core::Result<String> {
            Ok("そうなのだ".into())
        }
    }

    fn console() -> Console {
        let synthesis = Arc::new(
            SynthesisClient::new(Arc::new(StuckEngine), ArtifactStore::new("wav"))
                .with_retry(RetryPolicy::none()),
        );
        let sequencer = Arc::new(PlaybackSequencer::new(
            Arc::new(NoVoice),
            PlaybackConfig {
                poll_interval: Duration::from_millis(1),
                idle_timeout: None,
                connect_retry: RetryPolicy::none(),
            },
        ));
        let zunda = Zunda::new(
            Arc::new(Parrot),
            ChatConfig::default(),
            synthesis,
            sequencer,
            1,
        );
        let voice = VoiceConfig {
            guild: "local".into(),
            channel: "general".into(),
            test_clip: PathBuf::from("assets/test.wav"),
            player: None,
            max_segment_chars: 300,
        };
        Console::new(Arc::new(zunda), &voice)
    }

    #[tokio::test]
    async fn test_speech_does_not_block_input() {
        let mut console = console();
        let quick = Duration::from_millis(500);

        tokio::time::timeout(quick, console.handle_line("/talk こんにちは"))
            .await
            .expect("/talk must return while synthesis is pending");
        tokio::time::timeout(quick, console.handle_line("元気？"))
            .await
            .expect("chat must return while synthesis is pending");
        assert_eq!(console.in_flight(), 2);

        tokio::time::timeout(quick, console.handle_line("/stop"))
            .await
            .expect("/stop must not wait for speech");
        tokio::time::timeout(quick, console.handle_line("/join lobby"))
            .await
            .expect("/join must not wait for speech");
        assert_eq!(console.destination().channel, "lobby");

        tokio::time::timeout(quick, console.shutdown())
            .await
            .expect("shutdown must cancel pending speech")
            .unwrap();
        assert_eq!(console.in_flight(), 0);
    }
}
