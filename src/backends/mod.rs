#[cfg(feature = "onnx")]
pub mod onnx;

use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Scales passed straight to the model's inference call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceParams {
    pub noise_scale: f32,
    pub noise_scale_w: f32,
    /// Model-side duration factor. This is the reciprocal of the user-facing
    /// length scale, see `SynthesisEngine::synthesize`.
    pub length_scale: f32,
}

/// Trait that every neural voice backend must implement.
/// This allows us to plug in different runtimes (ONNX, in-process test doubles, ...)
pub trait VoiceModel: Send + Sync {
    /// Runs inference on one encoded utterance and returns mono f32 samples
    /// at the voice config's sample rate.
    fn infer(&self, symbols: &[i64], speaker_id: i64, params: &InferenceParams) -> Result<Vec<f32>>;

    /// Returns the unique ID of the backend (e.g., "onnx-vits")
    fn id(&self) -> &'static str;
}

/// Loads the voice model at `path` with the backend this build supports.
pub fn load_model(path: &Path) -> Result<Arc<dyn VoiceModel>> {
    if !path.exists() {
        return Err(PipelineError::Config(format!(
            "model file not found: {}",
            path.display()
        )));
    }

    load_backend(path)
}

#[cfg(feature = "onnx")]
fn load_backend(path: &Path) -> Result<Arc<dyn VoiceModel>> {
    Ok(Arc::new(onnx::OnnxVitsModel::load(path)?))
}

#[cfg(not(feature = "onnx"))]
fn load_backend(path: &Path) -> Result<Arc<dyn VoiceModel>> {
    Err(PipelineError::Config(format!(
        "cannot load {}: this build has no model backend (rebuild with --features onnx)",
        path.display()
    )))
}

/// Finds the voice config for a model when none was given explicitly.
///
/// Looks for `<model>.json` (the `voice.onnx` + `voice.onnx.json` layout),
/// then `config.json` in the model's directory.
pub fn find_config_for(model_path: &Path) -> Option<PathBuf> {
    let mut sidecar = model_path.as_os_str().to_owned();
    sidecar.push(".json");
    let sidecar = PathBuf::from(sidecar);
    if sidecar.exists() {
        return Some(sidecar);
    }

    let sibling = model_path.parent()?.join("config.json");
    if sibling.exists() {
        Some(sibling)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_find_sidecar_config() {
        let dir = tempdir().unwrap();
        let model = dir.path().join("voice.onnx");
        std::fs::write(&model, b"").unwrap();
        assert_eq!(find_config_for(&model), None);

        std::fs::write(dir.path().join("config.json"), b"{}").unwrap();
        assert_eq!(find_config_for(&model), Some(dir.path().join("config.json")));

        std::fs::write(dir.path().join("voice.onnx.json"), b"{}").unwrap();
        assert_eq!(
            find_config_for(&model),
            Some(dir.path().join("voice.onnx.json"))
        );
    }

    #[test]
    fn test_missing_model_is_config_error() {
        let dir = tempdir().unwrap();
        let result = load_model(&dir.path().join("absent.onnx"));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}
