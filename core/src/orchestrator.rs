//! Text → speech → voice channel
//!
//! Segments the text, synthesizes each segment in order and hands every
//! segment that made it to the playback sequencer as one batch, so the
//! sequencer's ordering and no-overlap guarantees cover the whole utterance.
//! A failed segment is reported and skipped; it never cancels the others.

use crate::playback::{Destination, PlaybackReport, PlaybackSequencer};
use crate::segment::{segments, DEFAULT_MAX_SEGMENT_CHARS};
use crate::synthesis::{AudioArtifact, Synthesizer};
use crate::ZundaError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// What happened to one segment during synthesis
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentOutcome {
    Synthesized { index: usize, path: PathBuf },
    Failed { index: usize, error: String },
}

impl SegmentOutcome {
    pub fn index(&self) -> usize {
        match self {
            SegmentOutcome::Synthesized { index, .. } | SegmentOutcome::Failed { index, .. } => {
                *index
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SegmentOutcome::Synthesized { .. })
    }
}

/// Result of one `handle_text` call
#[derive(Debug, Default)]
pub struct SpeechReport {
    pub outcomes: Vec<SegmentOutcome>,
    pub playback: Option<PlaybackReport>,
    /// Set when the sequencer could not play the batch at all
    pub fatal: Option<ZundaError>,
}

impl SpeechReport {
    pub fn segments(&self) -> usize {
        self.outcomes.len()
    }

    pub fn synthesized(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn played(&self) -> usize {
        self.playback
            .as_ref()
            .map(PlaybackReport::played_count)
            .unwrap_or(0)
    }

    /// Indices of segments that could not be synthesized
    pub fn failed_segments(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(SegmentOutcome::index)
            .collect()
    }

    /// Everything synthesized, started playing, and nothing fatal
    pub fn is_complete(&self) -> bool {
        self.fatal.is_none() && self.segments() > 0 && self.played() == self.segments()
    }
}

pub struct SpeechOrchestrator {
    synthesizer: Arc<dyn Synthesizer>,
    sequencer: Arc<PlaybackSequencer>,
    speaker: u32,
    max_segment_chars: usize,
}

impl SpeechOrchestrator {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        sequencer: Arc<PlaybackSequencer>,
        speaker: u32,
    ) -> Self {
        Self {
            synthesizer,
            sequencer,
            speaker,
            max_segment_chars: DEFAULT_MAX_SEGMENT_CHARS,
        }
    }

    pub fn with_max_segment_chars(mut self, max_segment_chars: usize) -> Self {
        self.max_segment_chars = max_segment_chars;
        self
    }

    pub fn sequencer(&self) -> &Arc<PlaybackSequencer> {
        &self.sequencer
    }

    /// Speak `text` on `destination`.
    pub async fn handle_text(&self, text: &str, destination: &Destination) -> SpeechReport {
        let segs = segments(text, self.max_segment_chars);
        info!(
            target: "orchestrator",
            destination = %destination,
            segments = segs.len(),
            "Speaking text"
        );

        let mut report = SpeechReport::default();
        let mut artifacts = Vec::with_capacity(segs.len());
        for seg in &segs {
            match self.synthesizer.synthesize(&seg.text, self.speaker).await {
                Ok(path) => {
                    artifacts.push(AudioArtifact::new(path.clone(), seg.index));
                    report.outcomes.push(SegmentOutcome::Synthesized {
                        index: seg.index,
                        path,
                    });
                }
                Err(e) => {
                    warn!(
                        target: "orchestrator",
                        segment = seg.index,
                        total = seg.total,
                        error = %e,
                        "Segment synthesis failed; continuing"
                    );
                    report.outcomes.push(SegmentOutcome::Failed {
                        index: seg.index,
                        error: e.to_string(),
                    });
                }
            }
        }

        if artifacts.is_empty() {
            warn!(target: "orchestrator", "No segment could be synthesized; nothing to play");
            return report;
        }

        self.play(destination, &artifacts, &mut report).await;
        info!(
            target: "orchestrator",
            segments = report.segments(),
            synthesized = report.synthesized(),
            played = report.played(),
            "Speech finished"
        );
        report
    }

    /// Play a prerecorded clip through the same sequencer
    pub async fn play_clip(&self, path: impl AsRef<Path>, destination: &Destination) -> SpeechReport {
        let path = path.as_ref().to_path_buf();
        let mut report = SpeechReport {
            outcomes: vec![SegmentOutcome::Synthesized {
                index: 0,
                path: path.clone(),
            }],
            ..Default::default()
        };
        self.play(destination, &[AudioArtifact::new(path, 0)], &mut report)
            .await;
        report
    }

    async fn play(
        &self,
        destination: &Destination,
        artifacts: &[AudioArtifact],
        report: &mut SpeechReport,
    ) {
        match self.sequencer.play_sequence(destination, artifacts).await {
            Ok(playback) => report.playback = Some(playback),
            Err(e) => {
                warn!(target: "orchestrator", destination = %destination, error = %e, "Playback could not start");
                report.fatal = Some(e);
            }
        }
    }
}
