pub mod espeak;
pub mod scripted;

use crate::config_loader::Settings;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// A single piece of text handed to an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub rate: f32,
}

/// Progress and outcome reports from an engine, in the order they happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Playback reached `char_index` of the utterance text.
    Boundary { char_index: usize },
    End,
    Error(String),
}

pub type EngineEvents = UnboundedSender<EngineEvent>;

/// Trait that all speech synthesis engines must implement.
/// This allows us to plug in different engines (eSpeak, a scripted engine for tests and dry runs, ...)
pub trait SpeechBackend: Send + Sync {
    /// Returns the unique ID of the backend (e.g., "espeak-ng")
    fn id(&self) -> &'static str;

    /// Starts playing `utterance` and returns without waiting for it.
    /// Progress and the final outcome are reported on `events`.
    fn speak(&self, utterance: Utterance, events: EngineEvents);

    /// Stops whatever is playing. Engines are not required to report an
    /// outcome for an utterance they were told to drop.
    fn cancel(&self);
}

/// Picks the engine named in the settings, or `None` when speech is
/// unavailable on this machine.
pub fn detect(settings: &Settings) -> Option<Arc<dyn SpeechBackend>> {
    match settings.tts_backend.as_str() {
        "espeak" => {
            if espeak::EspeakBackend::probe(&settings.espeak_binary) {
                let voice = Some(settings.espeak_voice.clone()).filter(|v| !v.is_empty());
                Some(Arc::new(espeak::EspeakBackend::new(
                    settings.espeak_binary.clone(),
                    voice,
                )))
            } else {
                tracing::warn!(binary = %settings.espeak_binary, "espeak-ng not found, speech disabled");
                None
            }
        }
        "scripted" => {
            tracing::info!("Dry run: utterances complete instantly without audio");
            Some(Arc::new(scripted::ScriptedBackend::auto_complete()))
        }
        _ => None,
    }
}
