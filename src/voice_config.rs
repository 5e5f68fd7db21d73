//! Voice hyperparameters loaded from the model's JSON configuration file.
//!
//! The file follows the VITS `config.json` layout (`symbols`, `speakers`,
//! `data`, `model`) with two optional extensions: an `inference` section
//! holding default synthesis hyperparameters and a `language_marks` table
//! that adds to or overrides the built-in language markers.

use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, warn};

pub const DEFAULT_LANGUAGE: &str = "简体中文";

/// Built-in language tags and the marker each one wraps text with.
pub const LANGUAGE_MARKS: [(&str, &str); 5] = [
    ("Japanese", ""),
    ("日本語", "[JA]"),
    ("简体中文", "[ZH]"),
    ("English", "[EN]"),
    ("Mix", ""),
];

/// Noise and duration controls handed to the model for one utterance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthesisParams {
    pub noise_scale: f32,
    pub noise_scale_w: f32,
    /// Speech rate: larger is faster. The model gets the reciprocal.
    pub length_scale: f32,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            noise_scale: 0.667,
            noise_scale_w: 0.6,
            length_scale: 1.0,
        }
    }
}

impl SynthesisParams {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.length_scale.is_finite() || self.length_scale <= 0.0 {
            return Err(format!(
                "length_scale must be a positive number, got {}",
                self.length_scale
            ));
        }
        for (name, value) in [
            ("noise_scale", self.noise_scale),
            ("noise_scale_w", self.noise_scale_w),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{} must be >= 0, got {}", name, value));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct RawVoiceConfig {
    symbols: Vec<String>,
    #[serde(default)]
    speakers: Option<RawSpeakers>,
    data: RawData,
    model: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    inference: RawInference,
    #[serde(default)]
    language_marks: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct RawData {
    sampling_rate: u32,
    hop_length: u32,
    #[serde(default)]
    add_blank: bool,
    #[serde(default)]
    text_cleaners: Vec<String>,
    #[serde(default)]
    n_speakers: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSpeakers {
    Table(BTreeMap<String, i64>),
    List(Vec<String>),
}

#[derive(Deserialize, Default)]
struct RawInference {
    noise_scale: Option<f32>,
    noise_scale_w: Option<f32>,
    length_scale: Option<f32>,
}

/// Speaker name to model speaker id.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerTable(BTreeMap<String, i64>);

impl SpeakerTable {
    pub fn id(&self, name: &str) -> Result<i64> {
        self.0
            .get(name)
            .copied()
            .ok_or_else(|| PipelineError::UnknownSpeaker(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Language tag to the marker affix placed around text before cleaning.
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageMarks(BTreeMap<String, String>);

impl LanguageMarks {
    pub fn with_overrides(overrides: BTreeMap<String, String>) -> Result<Self> {
        let mut marks: BTreeMap<String, String> = LANGUAGE_MARKS
            .iter()
            .map(|(lang, mark)| (lang.to_string(), mark.to_string()))
            .collect();
        for (lang, mark) in overrides {
            if lang.trim().is_empty() {
                return Err(PipelineError::Config(
                    "language_marks contains an empty language tag".to_string(),
                ));
            }
            marks.insert(lang, mark);
        }
        Ok(Self(marks))
    }

    pub fn marker(&self, language: &str) -> Result<&str> {
        self.0
            .get(language)
            .map(String::as_str)
            .ok_or_else(|| PipelineError::UnknownLanguage(language.to_string()))
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl Default for LanguageMarks {
    fn default() -> Self {
        Self(
            LANGUAGE_MARKS
                .iter()
                .map(|(lang, mark)| (lang.to_string(), mark.to_string()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct VoiceConfig {
    symbols: Vec<String>,
    symbol_ids: HashMap<char, i64>,
    speakers: SpeakerTable,
    sample_rate: u32,
    hop_length: u32,
    add_blank: bool,
    text_cleaners: Vec<String>,
    n_speakers: u32,
    model: serde_json::Map<String, serde_json::Value>,
    defaults: SynthesisParams,
    language_marks: LanguageMarks,
}

impl VoiceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "failed to read voice config {}: {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_json_str(&content)?;
        debug!(
            path = %path.display(),
            symbols = config.symbols.len(),
            speakers = config.speakers.len(),
            sample_rate = config.sample_rate,
            "voice config loaded"
        );
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: RawVoiceConfig = serde_json::from_str(json)
            .map_err(|e| PipelineError::Config(format!("invalid voice config: {}", e)))?;

        if raw.symbols.is_empty() {
            return Err(PipelineError::Config(
                "voice config defines no symbols".to_string(),
            ));
        }
        if raw.data.sampling_rate == 0 {
            return Err(PipelineError::Config(
                "data.sampling_rate must be greater than 0".to_string(),
            ));
        }
        if raw.data.hop_length == 0 {
            return Err(PipelineError::Config(
                "data.hop_length must be greater than 0".to_string(),
            ));
        }

        // Later duplicates win, matching a dict built from enumerate(symbols).
        let mut symbol_ids = HashMap::with_capacity(raw.symbols.len());
        for (id, symbol) in raw.symbols.iter().enumerate() {
            let mut chars = symbol.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => {
                    symbol_ids.insert(c, id as i64);
                }
                _ => warn!(symbol = %symbol, "skipping symbol that is not a single character"),
            }
        }

        let n_speakers = raw.data.n_speakers;
        let speakers = match raw.speakers {
            Some(RawSpeakers::Table(table)) => table,
            Some(RawSpeakers::List(names)) => names
                .into_iter()
                .enumerate()
                .map(|(id, name)| (name, id as i64))
                .collect(),
            None if n_speakers <= 1 => BTreeMap::from([("default".to_string(), 0)]),
            None => {
                return Err(PipelineError::Config(format!(
                    "voice config has {} speakers but no speaker table",
                    n_speakers
                )))
            }
        };
        for (name, id) in &speakers {
            if *id < 0 || (n_speakers > 0 && *id >= i64::from(n_speakers)) {
                return Err(PipelineError::Config(format!(
                    "speaker '{}' has id {} outside 0..{}",
                    name, id, n_speakers
                )));
            }
        }

        let base = SynthesisParams::default();
        let defaults = SynthesisParams {
            noise_scale: raw.inference.noise_scale.unwrap_or(base.noise_scale),
            noise_scale_w: raw.inference.noise_scale_w.unwrap_or(base.noise_scale_w),
            length_scale: raw.inference.length_scale.unwrap_or(base.length_scale),
        };
        defaults
            .validate()
            .map_err(|e| PipelineError::Config(format!("inference: {}", e)))?;

        Ok(Self {
            symbols: raw.symbols,
            symbol_ids,
            speakers: SpeakerTable(speakers),
            sample_rate: raw.data.sampling_rate,
            hop_length: raw.data.hop_length,
            add_blank: raw.data.add_blank,
            text_cleaners: raw.data.text_cleaners,
            n_speakers,
            model: raw.model,
            defaults,
            language_marks: LanguageMarks::with_overrides(raw.language_marks)?,
        })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn symbol_id(&self, symbol: char) -> Option<i64> {
        self.symbol_ids.get(&symbol).copied()
    }

    pub fn speakers(&self) -> &SpeakerTable {
        &self.speakers
    }

    pub fn speaker_id(&self, name: &str) -> Result<i64> {
        self.speakers.id(name)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn hop_length(&self) -> u32 {
        self.hop_length
    }

    /// Whether encoded sequences get blank tokens between symbols.
    pub fn add_blank(&self) -> bool {
        self.add_blank
    }

    pub fn text_cleaners(&self) -> &[String] {
        &self.text_cleaners
    }

    pub fn n_speakers(&self) -> u32 {
        self.n_speakers
    }

    pub fn model_hparams(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.model
    }

    pub fn default_params(&self) -> SynthesisParams {
        self.defaults
    }

    pub fn language_marks(&self) -> &LanguageMarks {
        &self.language_marks
    }
}
