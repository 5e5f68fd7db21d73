//! VITS voices exported to ONNX.
//!
//! The exported graph takes `input` (1 x n symbol ids), `input_lengths` (1),
//! `scales` (`[noise_scale, length_scale, noise_scale_w]`) and, for
//! multi-speaker voices, `sid` (1). Its first output is the waveform.

use super::{InferenceParams, VoiceModel};
use crate::error::{PipelineError, Result};
use ort::{inputs, session::Session, value::Tensor};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

pub struct OnnxVitsModel {
    session: Mutex<Session>,
    multi_speaker: bool,
}

impl OnnxVitsModel {
    pub fn load(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "loading ONNX voice model");
        let session = Session::builder()
            .and_then(|builder| builder.commit_from_file(path))
            .map_err(|e| {
                PipelineError::Config(format!(
                    "failed to load onnx model from {}: {}",
                    path.display(),
                    e
                ))
            })?;

        let multi_speaker = session.inputs.iter().any(|input| input.name == "sid");
        info!(multi_speaker, "ONNX voice model ready");

        Ok(Self {
            session: Mutex::new(session),
            multi_speaker,
        })
    }
}

impl VoiceModel for OnnxVitsModel {
    fn id(&self) -> &'static str {
        "onnx-vits"
    }

    fn infer(&self, symbols: &[i64], speaker_id: i64, params: &InferenceParams) -> Result<Vec<f32>> {
        let n = symbols.len();
        let input = Tensor::from_array(([1usize, n], symbols.to_vec()))?;
        let input_lengths = Tensor::from_array(([1usize], vec![n as i64]))?;
        let scales = Tensor::from_array((
            [3usize],
            vec![params.noise_scale, params.length_scale, params.noise_scale_w],
        ))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| PipelineError::Synthesis("model session lock poisoned".into()))?;

        let outputs = if self.multi_speaker {
            let sid = Tensor::from_array(([1usize], vec![speaker_id]))?;
            session.run(inputs![
                "input" => input,
                "input_lengths" => input_lengths,
                "scales" => scales,
                "sid" => sid
            ])?
        } else {
            session.run(inputs![
                "input" => input,
                "input_lengths" => input_lengths,
                "scales" => scales
            ])?
        };

        if outputs.len() == 0 {
            return Err(PipelineError::Synthesis(
                "onnx model returned no output tensors".into(),
            ));
        }
        let (_, audio) = outputs[0].try_extract_tensor::<f32>()?;
        Ok(audio.to_vec())
    }
}
