use config::{Config, File};
use serde::Deserialize;
use std::time::Duration;

use crate::session::SessionTimings;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    // Game data
    pub data_source: String, // "file" or "http"
    pub data_dir: String,
    pub base_url: String,
    // Speech
    pub tts_backend: String, // "espeak", "scripted" (dry run) or "none"
    pub espeak_binary: String,
    pub espeak_voice: String,
    pub speech_rate: f32,
    // Session pacing
    pub loading_delay_ms: u64,
    pub answer_wait_ms: u64,
    // Logging
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_source: "file".to_string(),
            data_dir: ".".to_string(),
            base_url: String::new(),
            tts_backend: "espeak".to_string(),
            espeak_binary: "espeak-ng".to_string(),
            espeak_voice: "ja".to_string(),
            speech_rate: 1.0,
            loading_delay_ms: 3000,
            answer_wait_ms: 10000,
            log_filter: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let defaults = Settings::default();
        let mut builder = Config::builder()
            .set_default("data_source", defaults.data_source)?
            .set_default("data_dir", defaults.data_dir)?
            .set_default("base_url", defaults.base_url)?
            .set_default("tts_backend", defaults.tts_backend)?
            .set_default("espeak_binary", defaults.espeak_binary)?
            .set_default("espeak_voice", defaults.espeak_voice)?
            .set_default("speech_rate", f64::from(defaults.speech_rate))?
            .set_default("loading_delay_ms", defaults.loading_delay_ms)?
            .set_default("answer_wait_ms", defaults.answer_wait_ms)?
            .set_default("log_filter", defaults.log_filter)?
            // Merge with local config file (if exists)
            .add_source(File::with_name("Carta").required(false));

        if let Some(config_dir) = dirs::config_dir() {
            builder = builder.add_source(
                File::from(config_dir.join("carta-reader").join("Carta")).required(false),
            );
        }

        // Merge with environment variables (e.g. CARTA_SPEECH_RATE)
        let settings: Settings = builder
            .add_source(config::Environment::with_prefix("CARTA"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if !matches!(self.data_source.as_str(), "file" | "http") {
            return Err(config::ConfigError::Message(format!(
                "Invalid data_source: {}. Must be 'file' or 'http'",
                self.data_source
            )));
        }
        if self.data_source == "http" && self.base_url.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "base_url is required when data_source is 'http'".to_string(),
            ));
        }
        if !matches!(self.tts_backend.as_str(), "espeak" | "scripted" | "none") {
            return Err(config::ConfigError::Message(format!(
                "Invalid tts_backend: {}. Must be 'espeak', 'scripted' or 'none'",
                self.tts_backend
            )));
        }
        if !(self.speech_rate > 0.0 && self.speech_rate <= 10.0) {
            return Err(config::ConfigError::Message(format!(
                "Invalid speech_rate: {}. Must be in (0.0, 10.0]",
                self.speech_rate
            )));
        }
        Ok(())
    }

    pub fn timings(&self) -> SessionTimings {
        SessionTimings {
            loading_delay: Duration::from_millis(self.loading_delay_ms),
            answer_wait: Duration::from_millis(self.answer_wait_ms),
        }
    }
}
