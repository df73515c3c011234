use super::{EngineEvent, EngineEvents, SpeechBackend, Utterance};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// An in-memory engine driven by the caller. Used by tests and for dry runs
/// without audio: it records every utterance and only reports progress when
/// told to.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<ScriptState>>,
}

#[derive(Default)]
struct ScriptState {
    spoken: Vec<Utterance>,
    pending: Option<EngineEvents>,
    cancels: usize,
    auto_complete: bool,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine that finishes every utterance as soon as it is submitted.
    pub fn auto_complete() -> Self {
        let backend = Self::default();
        backend.state().auto_complete = true;
        backend
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn spoken(&self) -> Vec<Utterance> {
        self.state().spoken.clone()
    }

    pub fn last_spoken(&self) -> Option<Utterance> {
        self.state().spoken.last().cloned()
    }

    pub fn cancel_count(&self) -> usize {
        self.state().cancels
    }

    /// True while an utterance is waiting for its outcome.
    pub fn is_pending(&self) -> bool {
        self.state().pending.is_some()
    }

    fn emit(&self, event: EngineEvent, terminal: bool) -> bool {
        let mut state = self.state();
        let sent = match &state.pending {
            Some(events) => events.send(event).is_ok(),
            None => false,
        };
        if terminal {
            state.pending = None;
        }
        sent
    }

    /// Reports a boundary for the pending utterance. Returns false if nothing
    /// was listening.
    pub fn boundary(&self, char_index: usize) -> bool {
        self.emit(EngineEvent::Boundary { char_index }, false)
    }

    pub fn finish(&self) -> bool {
        self.emit(EngineEvent::End, true)
    }

    pub fn fail(&self, message: &str) -> bool {
        self.emit(EngineEvent::Error(message.to_string()), true)
    }
}

impl SpeechBackend for ScriptedBackend {
    fn id(&self) -> &'static str {
        "scripted"
    }

    fn speak(&self, utterance: Utterance, events: EngineEvents) {
        tracing::debug!(text = %utterance.text, rate = utterance.rate, "Scripted utterance");
        let mut state = self.state();
        state.spoken.push(utterance);
        if state.auto_complete {
            let _ = events.send(EngineEvent::End);
        } else {
            state.pending = Some(events);
        }
    }

    fn cancel(&self) {
        let mut state = self.state();
        state.cancels += 1;
        // Like many platform engines, a canceled utterance never reports back.
        state.pending = None;
    }
}
