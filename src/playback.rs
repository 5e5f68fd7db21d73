use crate::engine::AudioBuffer;
use crate::error::{PipelineError, Result};
use crate::queue::{PlaybackReceiver, QueueItem};
use async_trait::async_trait;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use std::sync::mpsc::{channel, sync_channel, Sender};
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

/// Audio output. `play` returns once the buffer has been fully rendered.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, buffer: AudioBuffer) -> Result<()>;

    fn id(&self) -> &'static str;
}

struct PlayJob {
    buffer: AudioBuffer,
    done: oneshot::Sender<()>,
}

/// Plays through the default output device.
///
/// The rodio stream is not `Send`, so it lives on a dedicated thread that
/// takes one buffer at a time and reports back when the sink has drained.
pub struct RodioSink {
    tx: Sender<PlayJob>,
}

impl RodioSink {
    pub fn open(volume: f32) -> Result<Self> {
        let (tx, rx) = channel::<PlayJob>();
        let (ready_tx, ready_rx) = sync_channel::<std::result::Result<(), String>>(1);

        thread::Builder::new()
            .name("audio-out".into())
            .spawn(move || {
                // Audio stream must live on this thread
                let (_stream, stream_handle) = match OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("no audio output device: {}", e)));
                        return;
                    }
                };
                let sink = match Sink::try_new(&stream_handle) {
                    Ok(sink) => sink,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("failed to create sink: {}", e)));
                        return;
                    }
                };
                sink.set_volume(volume);
                let _ = ready_tx.send(Ok(()));

                while let Ok(job) = rx.recv() {
                    let PlayJob { buffer, done } = job;
                    sink.append(SamplesBuffer::new(1, buffer.sample_rate, buffer.samples));
                    sink.sleep_until_end();
                    let _ = done.send(());
                }
                debug!("audio thread exiting");
            })
            .map_err(|e| PipelineError::PlaybackDevice(format!("failed to spawn audio thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!(volume, "audio output ready");
                Ok(Self { tx })
            }
            Ok(Err(msg)) => Err(PipelineError::PlaybackDevice(msg)),
            Err(_) => Err(PipelineError::PlaybackDevice(
                "audio thread exited during startup".into(),
            )),
        }
    }
}

#[async_trait]
impl AudioSink for RodioSink {
    async fn play(&self, buffer: AudioBuffer) -> Result<()> {
        let (done, finished) = oneshot::channel();
        self.tx
            .send(PlayJob { buffer, done })
            .map_err(|_| PipelineError::PlaybackDevice("audio thread is gone".into()))?;
        finished
            .await
            .map_err(|_| PipelineError::PlaybackDevice("audio thread stopped mid-playback".into()))
    }

    fn id(&self) -> &'static str {
        "rodio"
    }
}

/// Discards audio but takes as long as playing it would.
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, buffer: AudioBuffer) -> Result<()> {
        tokio::time::sleep(buffer.duration()).await;
        Ok(())
    }

    fn id(&self) -> &'static str {
        "null"
    }
}

/// Drains the playback queue into a sink, one utterance at a time.
pub struct PlaybackWorker {
    sink: Arc<dyn AudioSink>,
    queue: PlaybackReceiver,
}

impl PlaybackWorker {
    pub fn new(sink: Arc<dyn AudioSink>, queue: PlaybackReceiver) -> Self {
        Self { sink, queue }
    }

    /// Plays queued buffers until the end-of-stream sentinel.
    ///
    /// Each buffer is played to completion before the next pop, so playback
    /// never overlaps. Returns the number of buffers played. A sink failure
    /// stops the worker.
    pub async fn run(mut self) -> Result<usize> {
        let mut played = 0;
        loop {
            match self.queue.pop().await {
                QueueItem::EndOfStream => {
                    info!(played, sink = self.sink.id(), "playback finished");
                    return Ok(played);
                }
                QueueItem::Audio(buffer) => {
                    debug!(
                        samples = buffer.len(),
                        secs = buffer.duration().as_secs_f32(),
                        "playing utterance"
                    );
                    if let Err(e) = self.sink.play(buffer).await {
                        error!(error = %e, sink = self.sink.id(), "audio output failed");
                        return Err(match e {
                            PipelineError::PlaybackDevice(_) => e,
                            other => PipelineError::PlaybackDevice(other.to_string()),
                        });
                    }
                    played += 1;
                }
            }
        }
    }
}
