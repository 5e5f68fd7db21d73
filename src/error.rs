use thiserror::Error;

/// Every failure the narration pipeline can report.
///
/// `UnknownLanguage`, `UnknownSpeaker` and `Synthesis` are per-event: the
/// orchestrator logs them and moves on. `Config` is fatal at startup and
/// `PlaybackDevice` is fatal to the playback worker.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown language: {0}")]
    UnknownLanguage(String),

    #[error("unknown speaker: {0}")]
    UnknownSpeaker(String),

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("audio device error: {0}")]
    PlaybackDevice(String),

    #[error("chat source error: {0}")]
    Source(String),

    #[error("playback queue closed")]
    QueueClosed,
}

impl PipelineError {
    /// True for errors that only affect the event being processed.
    pub fn is_per_event(&self) -> bool {
        matches!(
            self,
            Self::UnknownLanguage(_) | Self::UnknownSpeaker(_) | Self::Synthesis(_)
        )
    }
}

#[cfg(feature = "onnx")]
impl From<ort::Error> for PipelineError {
    fn from(source: ort::Error) -> Self {
        Self::Synthesis(source.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
