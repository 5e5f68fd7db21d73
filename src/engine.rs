use crate::backends::{InferenceParams, VoiceModel};
use crate::error::{PipelineError, Result};
use crate::text::{CleanerRegistry, TextNormalizer};
use crate::voice_config::{SpeakerTable, SynthesisParams, VoiceConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// One synthesized utterance: mono samples at a fixed sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback time: `len / sample_rate` seconds.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Everything needed to synthesize one chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub language: String,
    pub speaker: String,
    pub params: SynthesisParams,
}

/// The loaded voice: model plus the config it was trained with.
///
/// Built once at startup and shared behind an `Arc`. Inference never
/// mutates it.
pub struct SynthesisEngine {
    model: Arc<dyn VoiceModel>,
    config: Arc<VoiceConfig>,
    normalizer: TextNormalizer,
}

impl SynthesisEngine {
    pub fn new(
        model: Arc<dyn VoiceModel>,
        config: Arc<VoiceConfig>,
        registry: &CleanerRegistry,
    ) -> Result<Self> {
        let normalizer = TextNormalizer::new(config.clone(), registry)?;
        Ok(Self {
            model,
            config,
            normalizer,
        })
    }

    /// Synthesizes `text` spoken by `speaker_name` in `language`.
    ///
    /// `length_scale` is the user-facing speech rate: 2.0 speaks twice as
    /// fast, 0.5 half as fast. The model's length factor multiplies predicted
    /// durations, so it receives `1.0 / length_scale`; the value is inverted
    /// exactly once, here.
    ///
    /// Runs inference to completion on the calling thread.
    pub fn synthesize(
        &self,
        text: &str,
        language: &str,
        speaker_name: &str,
        noise_scale: f32,
        noise_scale_w: f32,
        length_scale: f32,
    ) -> Result<AudioBuffer> {
        let speaker_id = self.config.speaker_id(speaker_name)?;

        SynthesisParams {
            noise_scale,
            noise_scale_w,
            length_scale,
        }
        .validate()
        .map_err(PipelineError::Synthesis)?;

        let symbols = self.normalizer.encode(text, language, false)?;
        let real_symbols = if self.config.add_blank() {
            symbols.len() / 2
        } else {
            symbols.len()
        };
        if real_symbols == 0 {
            return Err(PipelineError::Synthesis(format!(
                "text {:?} produced no known symbols",
                text
            )));
        }

        let params = InferenceParams {
            noise_scale,
            noise_scale_w,
            length_scale: 1.0 / length_scale,
        };

        let start = Instant::now();
        let samples = self.model.infer(&symbols, speaker_id, &params)?;
        if samples.is_empty() {
            return Err(PipelineError::Synthesis(format!(
                "{} returned no audio",
                self.model.id()
            )));
        }

        let buffer = AudioBuffer::new(samples, self.config.sample_rate());
        debug!(
            backend = self.model.id(),
            symbols = symbols.len(),
            speaker_id,
            audio_secs = buffer.duration().as_secs_f32(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "synthesized utterance"
        );
        Ok(buffer)
    }

    pub fn synthesize_request(&self, request: &SynthesisRequest) -> Result<AudioBuffer> {
        self.synthesize(
            &request.text,
            &request.language,
            &request.speaker,
            request.params.noise_scale,
            request.params.noise_scale_w,
            request.params.length_scale,
        )
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.config
    }

    pub fn speakers(&self) -> &SpeakerTable {
        self.config.speakers()
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate()
    }

    pub fn backend_id(&self) -> &'static str {
        self.model.id()
    }
}
