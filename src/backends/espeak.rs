use super::{EngineEvent, EngineEvents, SpeechBackend, Utterance};

use std::io::Read;
use std::process::{Child, ChildStderr, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use wait_timeout::ChildExt;

const DEFAULT_WPM: f32 = 175.0;
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Speaks through a local `espeak-ng` process, one child per utterance.
pub struct EspeakBackend {
    binary: String,
    voice: Option<String>,
    current: Arc<Mutex<Option<Playing>>>,
    next_id: Mutex<u64>,
}

struct Playing {
    id: u64,
    child: Child,
}

impl EspeakBackend {
    pub fn new(binary: String, voice: Option<String>) -> Self {
        Self {
            binary,
            voice,
            current: Arc::new(Mutex::new(None)),
            next_id: Mutex::new(0),
        }
    }

    /// True if `binary --version` runs successfully.
    pub fn probe(binary: &str) -> bool {
        Command::new(binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Maps a playback rate (1.0 = normal) to espeak words per minute.
    pub fn words_per_minute(rate: f32) -> u32 {
        (DEFAULT_WPM * rate).round().clamp(80.0, 450.0) as u32
    }

    fn command(&self, utterance: &Utterance) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("-s")
            .arg(Self::words_per_minute(utterance.rate).to_string());
        if let Some(voice) = &self.voice {
            command.arg("-v").arg(voice);
        }
        command
            .arg(&utterance.text)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        command
    }

    fn kill_current(slot: &mut Option<Playing>) {
        if let Some(mut playing) = slot.take() {
            let _ = playing.child.kill();
            let _ = playing.child.wait();
        }
    }
}

/// Reads the child's stderr on its own thread so a full pipe never blocks it.
fn drain_stderr(mut stderr: ChildStderr) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf);
        buf
    })
}

impl SpeechBackend for EspeakBackend {
    fn id(&self) -> &'static str {
        "espeak-ng"
    }

    fn speak(&self, utterance: Utterance, events: EngineEvents) {
        let id = {
            let mut next_id = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
            *next_id += 1;
            *next_id
        };

        // Held across kill, spawn and store: a concurrent cancel() either
        // runs first or finds the new child in the slot.
        let mut slot = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        Self::kill_current(&mut slot);

        let mut child = match self.command(&utterance).spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = events.send(EngineEvent::Error(format!("Failed to run espeak: {}", e)));
                return;
            }
        };
        let stderr = child.stderr.take().map(drain_stderr);
        *slot = Some(Playing { id, child });
        drop(slot);

        let current = self.current.clone();
        thread::spawn(move || loop {
            let mut slot = current.lock().unwrap_or_else(PoisonError::into_inner);
            let playing = match slot.as_mut() {
                Some(playing) if playing.id == id => playing,
                // Killed by cancel() or replaced by a newer utterance.
                _ => {
                    let _ = events.send(EngineEvent::Error("interrupted".to_string()));
                    return;
                }
            };

            match playing.child.wait_timeout(POLL_INTERVAL) {
                Ok(Some(status)) => {
                    slot.take();
                    drop(slot);
                    if status.success() {
                        let _ = events.send(EngineEvent::End);
                    } else {
                        let stderr = stderr
                            .and_then(|reader| reader.join().ok())
                            .unwrap_or_default();
                        let _ = events.send(EngineEvent::Error(format!(
                            "espeak error ({}): {}",
                            status,
                            stderr.trim()
                        )));
                    }
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    slot.take();
                    let _ = events.send(EngineEvent::Error(format!("espeak wait failed: {}", e)));
                    return;
                }
            }
        });
    }

    fn cancel(&self) {
        let mut slot = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        Self::kill_current(&mut slot);
    }
}
