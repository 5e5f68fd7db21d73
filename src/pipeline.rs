//! Wires a chat source, the orchestrator and the playback worker together.

use crate::chat::ChatSource;
use crate::engine::SynthesisEngine;
use crate::error::{PipelineError, Result};
use crate::orchestrator::{Orchestrator, OrchestratorStats, VoiceSelection};
use crate::playback::{AudioSink, PlaybackWorker};
use crate::queue::playback_queue;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub orchestrator: OrchestratorStats,
    pub played: usize,
}

pub struct Pipeline {
    engine: Arc<SynthesisEngine>,
    voice: VoiceSelection,
    sink: Arc<dyn AudioSink>,
}

impl Pipeline {
    pub fn new(engine: Arc<SynthesisEngine>, voice: VoiceSelection, sink: Arc<dyn AudioSink>) -> Self {
        Self {
            engine,
            voice,
            sink,
        }
    }

    /// Runs until the source ends or `shutdown` resolves, then drains.
    ///
    /// Shutdown order: the source stops, the orchestrator finishes the events
    /// it already received and pushes the end-of-stream sentinel, and the
    /// worker plays everything queued before it. A playback failure ends the
    /// session at once: the source and orchestrator are aborted and the
    /// device error is returned.
    pub async fn run<F>(self, mut source: Box<dyn ChatSource>, shutdown: F) -> Result<PipelineReport>
    where
        F: Future<Output = ()>,
    {
        let (queue_tx, queue_rx) = playback_queue();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        info!(
            backend = self.engine.backend_id(),
            sink = self.sink.id(),
            source = source.name(),
            language = %self.voice.language,
            speaker = %self.voice.speaker,
            "narration pipeline starting"
        );

        let mut worker = tokio::spawn(PlaybackWorker::new(self.sink, queue_rx).run());
        let mut orchestrator =
            tokio::spawn(Orchestrator::new(self.engine, self.voice, queue_tx).run(event_rx));
        let mut source_task = tokio::spawn(async move { source.run(event_tx).await });
        tokio::pin!(shutdown);

        let mut source_error = None;
        let mut early_worker = None;
        tokio::select! {
            joined = &mut source_task => match joined {
                Ok(Ok(())) => info!("chat source finished"),
                Ok(Err(e)) => {
                    error!(error = %e, "chat source failed");
                    source_error = Some(e);
                }
                Err(e) => {
                    source_error = Some(PipelineError::Source(format!("chat source task failed: {}", e)));
                }
            },
            _ = &mut shutdown => {
                info!("shutdown requested, draining queued speech");
                source_task.abort();
            }
            joined = &mut worker => {
                source_task.abort();
                early_worker = Some(joined);
            }
        }

        let mut stats = None;
        let worker_joined = match early_worker {
            Some(joined) => joined,
            None => tokio::select! {
                joined = &mut orchestrator => {
                    stats = Some(joined.map_err(orchestrator_failed)?);
                    worker.await
                }
                joined = &mut worker => joined,
            },
        };
        let played = match worker_joined {
            Ok(Ok(played)) => played,
            Ok(Err(e)) => {
                orchestrator.abort();
                return Err(e);
            }
            Err(e) => {
                orchestrator.abort();
                return Err(PipelineError::PlaybackDevice(format!("playback task failed: {}", e)));
            }
        };
        let stats = match stats {
            Some(stats) => stats,
            None => orchestrator.await.map_err(orchestrator_failed)?,
        };

        if let Some(e) = source_error {
            return Err(e);
        }
        Ok(PipelineReport {
            orchestrator: stats,
            played,
        })
    }
}

fn orchestrator_failed(e: tokio::task::JoinError) -> PipelineError {
    PipelineError::Source(format!("orchestrator task failed: {}", e))
}
