//! Text to symbol-id encoding.
//!
//! Text is wrapped in its language marker, passed through the cleaner
//! pipeline named by the voice config, then mapped character by character
//! onto the symbol vocabulary.

use crate::error::{PipelineError, Result};
use crate::voice_config::VoiceConfig;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Filler id placed between symbols when `add_blank` is set.
pub const BLANK_ID: i64 = 0;

/// One text cleaning stage. Phonemizers plug in here.
pub trait TextCleaner: Send + Sync {
    fn clean(&self, text: &str) -> Result<String>;
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\[[a-z]{2}\]").expect("valid regex"))
}

fn collapse_whitespace(text: &str) -> String {
    whitespace_re().replace_all(text, " ").into_owned()
}

struct BasicCleaner;

impl TextCleaner for BasicCleaner {
    fn clean(&self, text: &str) -> Result<String> {
        Ok(collapse_whitespace(&text.to_lowercase()))
    }
}

struct TransliterationCleaner;

impl TextCleaner for TransliterationCleaner {
    fn clean(&self, text: &str) -> Result<String> {
        let ascii = deunicode::deunicode(text);
        Ok(collapse_whitespace(&ascii.to_lowercase()))
    }
}

struct MarkerCleaner;

impl TextCleaner for MarkerCleaner {
    fn clean(&self, text: &str) -> Result<String> {
        Ok(marker_re().replace_all(text, "").trim().to_string())
    }
}

struct NoCleaner;

impl TextCleaner for NoCleaner {
    fn clean(&self, text: &str) -> Result<String> {
        Ok(text.to_string())
    }
}

/// Cleaners available by name when building a normalizer.
#[derive(Clone)]
pub struct CleanerRegistry {
    cleaners: HashMap<String, Arc<dyn TextCleaner>>,
}

impl CleanerRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            cleaners: HashMap::new(),
        };
        registry.register("basic_cleaners", Arc::new(BasicCleaner));
        registry.register("transliteration_cleaners", Arc::new(TransliterationCleaner));
        registry.register("marker_cleaners", Arc::new(MarkerCleaner));
        registry.register("no_cleaners", Arc::new(NoCleaner));
        registry
    }

    pub fn register(&mut self, name: &str, cleaner: Arc<dyn TextCleaner>) {
        self.cleaners.insert(name.to_string(), cleaner);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cleaners.contains_key(name)
    }

    /// Resolves every name up front so a typo fails at load, not per message.
    fn resolve(&self, names: &[String]) -> Result<Vec<Arc<dyn TextCleaner>>> {
        names
            .iter()
            .map(|name| {
                self.cleaners.get(name).cloned().ok_or_else(|| {
                    PipelineError::Config(format!("unknown text cleaner '{}'", name))
                })
            })
            .collect()
    }
}

impl Default for CleanerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Inserts `item` between every pair of elements and at both ends.
pub fn intersperse(sequence: &[i64], item: i64) -> Vec<i64> {
    let mut result = vec![item; sequence.len() * 2 + 1];
    for (i, symbol) in sequence.iter().enumerate() {
        result[i * 2 + 1] = *symbol;
    }
    result
}

pub struct TextNormalizer {
    config: Arc<VoiceConfig>,
    cleaners: Vec<Arc<dyn TextCleaner>>,
}

impl TextNormalizer {
    pub fn new(config: Arc<VoiceConfig>, registry: &CleanerRegistry) -> Result<Self> {
        let cleaners = registry.resolve(config.text_cleaners())?;
        Ok(Self { config, cleaners })
    }

    /// Encodes `text` for the model.
    ///
    /// With `use_raw_symbols` the text is taken as an already-cleaned symbol
    /// string: it is neither wrapped in the language marker nor cleaned. The
    /// language tag is validated either way.
    pub fn encode(&self, text: &str, language: &str, use_raw_symbols: bool) -> Result<Vec<i64>> {
        let marker = self.config.language_marks().marker(language)?;

        let cleaned = if use_raw_symbols {
            text.to_string()
        } else {
            let mut wrapped = format!("{}{}{}", marker, text, marker);
            for cleaner in &self.cleaners {
                wrapped = cleaner.clean(&wrapped)?;
            }
            wrapped
        };

        let sequence: Vec<i64> = cleaned
            .chars()
            .filter_map(|c| self.config.symbol_id(c))
            .collect();

        if self.config.add_blank() {
            Ok(intersperse(&sequence, BLANK_ID))
        } else {
            Ok(sequence)
        }
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.config
    }
}
