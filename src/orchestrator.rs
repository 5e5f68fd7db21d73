use crate::chat::ChatEvent;
use crate::engine::{SynthesisEngine, SynthesisRequest};
use crate::error::{PipelineError, Result};
use crate::queue::PlaybackSender;
use crate::voice_config::SynthesisParams;
use regex::{Captures, Regex};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

pub const DEFAULT_UTTERANCE_TEMPLATE: &str = "{sender} 说 {content}";

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(sender|content)\}").expect("valid regex"))
}

/// Fixed per-session voice choices applied to every chat event.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSelection {
    pub language: String,
    pub speaker: String,
    pub params: SynthesisParams,
    /// `{sender}` and `{content}` are substituted.
    pub template: String,
}

impl VoiceSelection {
    pub fn compose(&self, event: &ChatEvent) -> String {
        // Single pass, so placeholders typed in chat are spoken literally.
        placeholder_re()
            .replace_all(&self.template, |caps: &Captures| match &caps[1] {
                "sender" => event.sender.clone(),
                _ => event.content.clone(),
            })
            .into_owned()
    }

    pub fn request_for(&self, event: &ChatEvent) -> SynthesisRequest {
        SynthesisRequest {
            text: self.compose(event),
            language: self.language.clone(),
            speaker: self.speaker.clone(),
            params: self.params,
        }
    }
}

/// Counters reported when the orchestrator stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorStats {
    pub handled: usize,
    pub enqueued: usize,
    pub dropped: usize,
}

/// Turns chat events into queued utterances, one event at a time.
pub struct Orchestrator {
    engine: Arc<SynthesisEngine>,
    voice: VoiceSelection,
    queue: PlaybackSender,
}

impl Orchestrator {
    pub fn new(engine: Arc<SynthesisEngine>, voice: VoiceSelection, queue: PlaybackSender) -> Self {
        Self {
            engine,
            voice,
            queue,
        }
    }

    /// Synthesizes one event and enqueues its audio.
    ///
    /// Inference runs on the blocking pool so the playback worker and the
    /// chat source keep running; the next event is not started until this
    /// one is enqueued, which keeps playback in handling order.
    pub async fn handle(&self, event: ChatEvent) -> Result<()> {
        info!(sender = %event.sender, content = %event.content, "chat message");
        let request = self.voice.request_for(&event);

        let engine = self.engine.clone();
        let buffer = tokio::task::spawn_blocking(move || engine.synthesize_request(&request))
            .await
            .map_err(|e| PipelineError::Synthesis(format!("synthesis task failed: {}", e)))??;

        debug!(
            samples = buffer.len(),
            secs = buffer.duration().as_secs_f32(),
            "utterance queued"
        );
        self.queue.push_audio(buffer)
    }

    /// Handles events until the source closes, then pushes the sentinel.
    ///
    /// Per-event failures are logged and skipped. A closed playback queue
    /// means the worker is gone, so the orchestrator stops early.
    pub async fn run(self, mut events: UnboundedReceiver<ChatEvent>) -> OrchestratorStats {
        let mut stats = OrchestratorStats::default();
        while let Some(event) = events.recv().await {
            stats.handled += 1;
            match self.handle(event).await {
                Ok(()) => stats.enqueued += 1,
                Err(PipelineError::QueueClosed) => {
                    warn!("playback queue closed, ignoring further chat events");
                    stats.dropped += 1;
                    return stats;
                }
                Err(e) => {
                    if e.is_per_event() {
                        warn!(error = %e, "dropping chat message");
                    } else {
                        error!(error = %e, "dropping chat message");
                    }
                    stats.dropped += 1;
                }
            }
        }

        if self.queue.finish().is_err() {
            debug!("playback worker already stopped");
        }
        info!(
            handled = stats.handled,
            enqueued = stats.enqueued,
            dropped = stats.dropped,
            "chat stream ended"
        );
        stats
    }
}
