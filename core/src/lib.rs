// Zunda Core Library
// Voice chat bot runtime: text segmenting, conversation history, speech
// synthesis and voice-channel playback sequencing

pub mod chat;
pub mod history;
pub mod orchestrator;
pub mod playback;
pub mod retry;
pub mod segment;
pub mod synthesis;

// Export core types
pub use chat::{
    render_prompt, strip_mentions, ChatConfig, ChatResponder, LlmClient, LlmClientConfig,
    TextGenerator,
};
pub use history::{ConversationHistory, ConversationTurn};
pub use orchestrator::{SegmentOutcome, SpeechOrchestrator, SpeechReport};
pub use playback::{
    Destination, PlaybackConfig, PlaybackFailure, PlaybackReport, PlaybackSequencer,
    VoiceConnection, VoiceGateway,
};
pub use retry::RetryPolicy;
pub use segment::{segment, segments, Segment, DEFAULT_MAX_SEGMENT_CHARS};
pub use synthesis::{
    ArtifactStore, AudioArtifact, BackendLifecycle, LifecycleScope, ProcessLifecycle,
    SpeechBackend, SynthesisClient, SynthesisStage, Synthesizer, VoicevoxBackend, VoicevoxConfig,
};

use std::sync::Arc;

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ZundaError {
    #[error("Speech backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Speech backend rejected {stage} request (status {status}): {detail}")]
    SynthesisRejected {
        stage: SynthesisStage,
        status: u16,
        detail: String,
    },

    #[error("Transient speech backend failure: {0}")]
    TransientBackend(String),

    #[error("Speech backend process error: {0}")]
    BackendProcess(String),

    #[error("Voice connection error: {0}")]
    ConnectionEstablishment(String),

    #[error("Playback aborted for {destination} after {attempts} connection attempts: {reason}")]
    SequenceAborted {
        destination: String,
        attempts: u32,
        reason: String,
    },

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Text generation error: {0}")]
    Generation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ZundaError>;

/// Process-wide bot context.
///
/// The host constructs this once and hands out references; it owns the
/// conversation history, the chat responder and the speech pipeline.
pub struct Zunda {
    pub history: Arc<ConversationHistory>,
    pub chat: ChatResponder,
    pub speech: SpeechOrchestrator,
    synthesis: Arc<SynthesisClient>,
}

impl Zunda {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        chat_cfg: ChatConfig,
        synthesis: Arc<SynthesisClient>,
        sequencer: Arc<PlaybackSequencer>,
        speaker: u32,
    ) -> Self {
        let history = Arc::new(ConversationHistory::new());
        let chat = ChatResponder::new(generator, Arc::clone(&history), chat_cfg);
        let speech = SpeechOrchestrator::new(
            Arc::clone(&synthesis) as Arc<dyn Synthesizer>,
            sequencer,
            speaker,
        );
        Self {
            history,
            chat,
            speech,
            synthesis,
        }
    }

    /// Split utterances at `max_chars` code points instead of the default
    pub fn with_max_segment_chars(mut self, max_chars: usize) -> Self {
        self.speech = self.speech.with_max_segment_chars(max_chars);
        self
    }

    pub async fn start(&self) -> Result<()> {
        tracing::info!("Starting Zunda...");
        self.synthesis.start_session().await?;
        tracing::info!("Zunda started successfully");
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down Zunda...");
        self.speech.sequencer().disconnect_all().await;
        self.synthesis.stop_session().await?;
        tracing::info!("Zunda shut down successfully");
        Ok(())
    }
}
