//! Uniform asynchronous speech contract over an optional engine.
//!
//! [`SpeechController::speak`] resolves once per request with either the
//! spoken text or a [`SpeechError`]. Progress is delivered on the side through
//! a [`SpeechListener`]. Some engines never report completion, so every
//! request also arms a fallback timer that completes it successfully after a
//! duration estimated from the text length and rate.

use crate::backends::{EngineEvent, SpeechBackend, Utterance};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const FALLBACK_MS_PER_CHAR: f64 = 120.0;
const FALLBACK_MIN_MS: f64 = 1200.0;
const FALLBACK_MAX_MS: f64 = 15000.0;
const MIN_RATE: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechBoundary {
    pub char_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpeechError {
    #[error("Speech synthesis unavailable")]
    Unsupported,

    #[error("Speech synthesis failed: {0}")]
    SynthesisError(String),

    /// Reserved for engines that report cancellation explicitly.
    #[error("Speech canceled")]
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechPlayback {
    pub text: String,
}

#[derive(Debug, Clone, Copy)]
pub struct SpeechRequest<'a> {
    pub text: &'a str,
    pub rate: f32,
}

/// Receives progress for one request. Exactly one of `on_end` / `on_error`
/// is called, after any number of boundaries.
pub trait SpeechListener: Send {
    fn on_boundary(&mut self, _boundary: SpeechBoundary) {}
    fn on_end(&mut self) {}
    fn on_error(&mut self, _error: &SpeechError) {}
}

impl SpeechListener for () {}

/// How long to wait for an engine before assuming it finished silently.
pub fn fallback_duration(text: &str, rate: f32) -> Duration {
    let chars = text.chars().count() as f64;
    let rate = f64::from(rate.max(MIN_RATE));
    let ms = (chars / rate * FALLBACK_MS_PER_CHAR)
        .ceil()
        .clamp(FALLBACK_MIN_MS, FALLBACK_MAX_MS);
    Duration::from_millis(ms as u64)
}

#[derive(Clone)]
pub struct SpeechController {
    backend: Option<Arc<dyn SpeechBackend>>,
}

impl SpeechController {
    pub fn new(backend: Option<Arc<dyn SpeechBackend>>) -> Self {
        Self { backend }
    }

    pub fn unsupported() -> Self {
        Self { backend: None }
    }

    pub fn backend_id(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|b| b.id())
    }

    pub async fn speak<L>(
        &self,
        request: SpeechRequest<'_>,
        listener: &mut L,
    ) -> Result<SpeechPlayback, SpeechError>
    where
        L: SpeechListener + ?Sized,
    {
        let Some(backend) = &self.backend else {
            let error = SpeechError::Unsupported;
            listener.on_error(&error);
            return Err(error);
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let fallback = tokio::time::sleep(fallback_duration(request.text, request.rate));
        tokio::pin!(fallback);

        backend.speak(
            Utterance {
                text: request.text.to_string(),
                rate: request.rate,
            },
            tx,
        );

        // The first terminal event wins. Anything the engine sends afterwards
        // goes to a dropped receiver.
        let mut engine_open = true;
        let outcome = loop {
            tokio::select! {
                event = rx.recv(), if engine_open => match event {
                    Some(EngineEvent::Boundary { char_index }) => {
                        listener.on_boundary(SpeechBoundary { char_index });
                    }
                    Some(EngineEvent::End) => break Ok(()),
                    Some(EngineEvent::Error(message)) => {
                        break Err(SpeechError::SynthesisError(message));
                    }
                    None => engine_open = false,
                },
                () = &mut fallback => {
                    tracing::warn!(
                        backend = backend.id(),
                        chars = request.text.chars().count(),
                        "Engine never reported completion, using fallback"
                    );
                    break Ok(());
                }
            }
        };

        match outcome {
            Ok(()) => {
                listener.on_end();
                Ok(SpeechPlayback {
                    text: request.text.to_string(),
                })
            }
            Err(error) => {
                tracing::warn!(backend = backend.id(), error = %error, "Speech failed");
                listener.on_error(&error);
                Err(error)
            }
        }
    }

    /// Tells the engine to stop. Pending `speak` futures are not resolved by
    /// this; callers that cancel should stop polling them.
    pub fn cancel(&self) {
        if let Some(backend) = &self.backend {
            backend.cancel();
        }
    }
}
