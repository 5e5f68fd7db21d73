use crate::orchestrator::DEFAULT_UTTERANCE_TEMPLATE;
use crate::voice_config::{SynthesisParams, DEFAULT_LANGUAGE};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Where chat events come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// JSON lines on standard input
    Stdin,
    /// JSON lines from TCP relays
    Tcp,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub model_path: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    /// Only chat tagged with this room is read; `None` reads everything.
    pub room: Option<String>,
    pub speaker: Option<String>,
    pub language: String,
    // Unset hyperparameters fall back to the voice config, then built-ins.
    pub noise_scale: Option<f32>,
    pub noise_scale_w: Option<f32>,
    pub length_scale: Option<f32>,
    pub utterance_template: String,
    pub source: SourceKind,
    pub listen_addr: String,
    pub enable_audio: bool,
    pub playback_volume: f32, // 0.0 - 1.0
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_path: None,
            config_path: None,
            room: None,
            speaker: None,
            language: DEFAULT_LANGUAGE.to_string(),
            noise_scale: None,
            noise_scale_w: None,
            length_scale: None,
            utterance_template: DEFAULT_UTTERANCE_TEMPLATE.to_string(),
            source: SourceKind::Stdin,
            listen_addr: "127.0.0.1:6561".to_string(),
            enable_audio: true,
            playback_volume: 1.0,
        }
    }
}

impl Settings {
    /// Layers built-in defaults, the `ChatNarrator` file in the working
    /// directory, `~/.config/chat-narrator/ChatNarrator`, an optional
    /// explicit file and `CHAT_NARRATOR_*` environment variables.
    pub fn new(explicit: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder()
            .set_default("language", DEFAULT_LANGUAGE)?
            .set_default("utterance_template", DEFAULT_UTTERANCE_TEMPLATE)?
            .set_default("source", "stdin")?
            .set_default("listen_addr", "127.0.0.1:6561")?
            .set_default("enable_audio", true)?
            .set_default("playback_volume", 1.0)?
            // Merge with local config file (if exists)
            .add_source(File::with_name("ChatNarrator").required(false));

        if let Some(config_dir) = dirs::config_dir() {
            builder = builder.add_source(
                File::from(config_dir.join("chat-narrator").join("ChatNarrator")).required(false),
            );
        }
        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings: Settings = builder
            // e.g. CHAT_NARRATOR_SPEAKER=narrator
            .add_source(Environment::with_prefix("CHAT_NARRATOR"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.playback_volume < 0.0 || self.playback_volume > 1.0 {
            return Err(config::ConfigError::Message(format!(
                "Invalid playback_volume: {}. Must be between 0.0 and 1.0",
                self.playback_volume
            )));
        }
        if self.language.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "language must not be empty".to_string(),
            ));
        }
        if !self.utterance_template.contains("{content}") {
            return Err(config::ConfigError::Message(
                "utterance_template must contain {content}".to_string(),
            ));
        }
        self.params_over(SynthesisParams::default())
            .validate()
            .map_err(config::ConfigError::Message)?;
        Ok(())
    }

    /// Hyperparameters with unset values taken from `defaults`.
    pub fn params_over(&self, defaults: SynthesisParams) -> SynthesisParams {
        SynthesisParams {
            noise_scale: self.noise_scale.unwrap_or(defaults.noise_scale),
            noise_scale_w: self.noise_scale_w.unwrap_or(defaults.noise_scale_w),
            length_scale: self.length_scale.unwrap_or(defaults.length_scale),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn test_config_load() {
        let settings = Settings::new(None).expect("Failed to load settings");
        assert!(!settings.language.is_empty());
        assert!(settings.utterance_template.contains("{content}"));
    }

    #[test]
    #[serial]
    fn test_explicit_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("narrator.toml");
        std::fs::write(
            &path,
            r#"
speaker = "narrator"
language = "English"
length_scale = 1.5
source = "tcp"
room = "21452505"
"#,
        )
        .unwrap();

        let settings = Settings::new(Some(&path)).unwrap();
        assert_eq!(settings.speaker.as_deref(), Some("narrator"));
        assert_eq!(settings.language, "English");
        assert_eq!(settings.length_scale, Some(1.5));
        assert_eq!(settings.source, SourceKind::Tcp);
        assert_eq!(settings.room.as_deref(), Some("21452505"));
        assert!(settings.enable_audio);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        std::env::set_var("CHAT_NARRATOR_SPEAKER", "from-env");
        let result = Settings::new(None);
        std::env::remove_var("CHAT_NARRATOR_SPEAKER");
        assert_eq!(result.unwrap().speaker.as_deref(), Some("from-env"));
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_fails() {
        let dir = tempdir().unwrap();
        assert!(Settings::new(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());

        settings.playback_volume = 1.5;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.length_scale = Some(-1.0);
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.utterance_template = "{sender}".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_params_resolution_order() {
        let settings = Settings {
            noise_scale: Some(0.3),
            ..Settings::default()
        };
        let from_voice = SynthesisParams {
            noise_scale: 0.9,
            noise_scale_w: 0.8,
            length_scale: 1.1,
        };
        let params = settings.params_over(from_voice);
        assert_eq!(params.noise_scale, 0.3);
        assert_eq!(params.noise_scale_w, 0.8);
        assert_eq!(params.length_scale, 1.1);
    }
}
