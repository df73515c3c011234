//! The reading session: one run through a deck.
//!
//! Each card goes through a fixed sequence, driven by a spawned task:
//!
//! ```text
//!   LoadingFirst ─3s─▶ ReadingDescriptionFirst ─3s─▶ ReadingDescriptionSecond
//!        ▲                                                   │
//!        │ next()                                            ▼
//!   ReadyNext / Finished ◀── ReadingAnswer ◀─10s── WaitingAnswer
//! ```
//!
//! `pause()` moves any reading phase to `Paused`; `resume()` restarts the
//! current card from `LoadingFirst`. State lives behind a mutex that is never
//! held across an await, and every write coming from a sequence task is
//! checked against the sequence epoch so that a canceled task cannot touch
//! newer state.

use crate::carta::{CartaData, CartaItem, GameMeta};
use crate::display::{self, LINE_BREAK_INTERVAL};
use crate::games::{GameLoader, LoadError};
use crate::reading_order::{self, create_reading_order};
use crate::speech::{
    SpeechBoundary, SpeechController, SpeechError, SpeechListener, SpeechPlayback, SpeechRequest,
};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Phrase used to try out the speech rate.
pub const SAMPLE_TEXT: &str = "ふるいけやかわずとびこむなつのおと";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    Idle,
    /// "Get ready" pause before the first reading.
    LoadingFirst,
    ReadingDescriptionFirst,
    ReadingDescriptionSecond,
    /// Players are guessing; the answer has not been read yet.
    WaitingAnswer,
    ReadingAnswer,
    ReadyNext,
    Finished,
    Paused,
}

impl SessionPhase {
    /// True while a card is occupying a reading slot.
    pub fn is_active_reading(self) -> bool {
        match self {
            SessionPhase::LoadingFirst
            | SessionPhase::ReadingDescriptionFirst
            | SessionPhase::ReadingDescriptionSecond
            | SessionPhase::WaitingAnswer
            | SessionPhase::ReadingAnswer => true,
            SessionPhase::Idle
            | SessionPhase::ReadyNext
            | SessionPhase::Finished
            | SessionPhase::Paused => false,
        }
    }

    /// True once the answer card should be on screen.
    pub fn shows_answer(self) -> bool {
        matches!(
            self,
            SessionPhase::WaitingAnswer
                | SessionPhase::ReadingAnswer
                | SessionPhase::ReadyNext
                | SessionPhase::Finished
        )
    }
}

/// Loading state of the game around the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PageStatus {
    Loading,
    Ready,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("No game selected")]
    MissingSelection,

    #[error("Invalid carta data")]
    InvalidDataFormat,

    #[error("Failed to fetch game data: {0}")]
    DataFetchFailure(String),

    #[error("Speech failed: {0}")]
    SpeechFailure(#[from] SpeechError),
}

impl SessionError {
    /// Message shown to players.
    pub fn user_message(&self) -> &'static str {
        match self {
            SessionError::MissingSelection => "選択に失敗しました",
            SessionError::InvalidDataFormat => "データ形式が不正です",
            SessionError::DataFetchFailure(_) => "データの取得に失敗しました",
            SessionError::SpeechFailure(_) => "読み上げに失敗しました",
        }
    }
}

impl From<LoadError> for SessionError {
    fn from(error: LoadError) -> Self {
        if error.is_invalid_data() {
            SessionError::InvalidDataFormat
        } else {
            SessionError::DataFetchFailure(error.to_string())
        }
    }
}

/// How a successful [`ReadingSession::load`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The deck was installed and the session is back to `Idle`.
    Loaded,
    /// A newer load or `shutdown()` happened while fetching. The fetched deck
    /// was dropped and nothing was published.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    /// Silence before each description reading.
    pub loading_delay: Duration,
    /// Guessing time before the answer is read.
    pub answer_wait: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            loading_delay: Duration::from_millis(3000),
            answer_wait: Duration::from_millis(10000),
        }
    }
}

/// Uniform `[0, 1)` source used to shuffle the deck.
pub type RandomSource = Box<dyn FnMut() -> f64 + Send>;

pub struct SessionOptions {
    pub timings: SessionTimings,
    pub rate: f32,
    pub random: RandomSource,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timings: SessionTimings::default(),
            rate: 1.0,
            random: Box::new(reading_order::uniform_random),
        }
    }
}

/// Everything the presentation layer can see at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub status: PageStatus,
    pub phase: SessionPhase,
    pub error: Option<SessionError>,
    pub meta: Option<GameMeta>,
    pub total_items: usize,
    pub current_item: Option<CartaItem>,
    pub description_display: String,
    pub answer_display: String,
    pub furigana_display: String,
    /// Most recently finished card first.
    pub history: Vec<CartaItem>,
    pub next_available: bool,
    pub rate: f32,
    pub current_number: usize,
    pub remaining_count: usize,
}

impl SessionSnapshot {
    /// Description buffer broken into vertical columns.
    pub fn formatted_description(&self) -> String {
        display::insert_line_breaks(&self.description_display, LINE_BREAK_INTERVAL)
    }

    pub fn error_message(&self) -> Option<&'static str> {
        self.error.as_ref().map(SessionError::user_message)
    }
}

struct SessionState {
    status: PageStatus,
    error: Option<SessionError>,
    data: Option<Arc<CartaData>>,
    order: Vec<usize>,
    position: Option<usize>,
    history: Vec<CartaItem>,
    phase: SessionPhase,
    description_display: String,
    answer_display: String,
    furigana_display: String,
    next_available: bool,
    rate: f32,
    sequence_epoch: u64,
    load_epoch: u64,
}

impl SessionState {
    fn new(rate: f32) -> Self {
        Self {
            status: PageStatus::Loading,
            error: None,
            data: None,
            order: Vec::new(),
            position: None,
            history: Vec::new(),
            phase: SessionPhase::Idle,
            description_display: String::new(),
            answer_display: String::new(),
            furigana_display: String::new(),
            next_available: false,
            rate,
            sequence_epoch: 0,
            load_epoch: 0,
        }
    }

    fn current_item(&self) -> Option<&CartaItem> {
        let data = self.data.as_ref()?;
        let index = *self.order.get(self.position?)?;
        data.items.get(index)
    }

    fn clear_displays(&mut self) {
        self.description_display.clear();
        self.answer_display.clear();
        self.furigana_display.clear();
    }

    fn fail(&mut self, error: SessionError) {
        self.status = PageStatus::Error;
        self.error = Some(error);
    }

    fn snapshot(&self) -> SessionSnapshot {
        let current_item = self.current_item().cloned();
        let total_items = self.data.as_ref().map_or(0, |d| d.items.len());
        let reading = usize::from(current_item.is_some() && self.phase.is_active_reading());

        SessionSnapshot {
            status: self.status,
            phase: self.phase,
            error: self.error.clone(),
            meta: self.data.as_ref().map(|d| d.meta.clone()),
            total_items,
            current_number: if current_item.is_some() {
                self.history.len() + 1
            } else {
                0
            },
            remaining_count: total_items.saturating_sub(self.history.len() + reading),
            current_item,
            description_display: self.description_display.clone(),
            answer_display: self.answer_display.clone(),
            furigana_display: self.furigana_display.clone(),
            history: self.history.clone(),
            next_available: self.next_available,
            rate: self.rate,
        }
    }
}

fn same_card(a: &CartaItem, b: &CartaItem) -> bool {
    a.description == b.description && a.answer == b.answer
}

struct Inner {
    speech: SpeechController,
    loader: Arc<dyn GameLoader>,
    game_id: Option<String>,
    timings: SessionTimings,
    state: Mutex<SessionState>,
    random: Mutex<RandomSource>,
    sequence: Mutex<Option<JoinHandle<()>>>,
    updates: watch::Sender<SessionSnapshot>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &SessionState) {
        let snapshot = state.snapshot();
        let phase = snapshot.phase;
        let previous = self.updates.send_replace(snapshot);
        if previous.phase != phase {
            tracing::debug!(from = ?previous.phase, to = ?phase, "Session phase changed");
        }
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.lock();
        let result = f(&mut state);
        self.publish(&state);
        result
    }

    /// Applies a write from the sequence started at `epoch`. Returns `None`
    /// without touching anything if that sequence has been superseded.
    fn apply<R>(&self, epoch: u64, f: impl FnOnce(&mut SessionState) -> R) -> Option<R> {
        let mut state = self.lock();
        if state.sequence_epoch != epoch {
            return None;
        }
        let result = f(&mut state);
        self.publish(&state);
        Some(result)
    }

    fn new_order(&self, length: usize) -> Vec<usize> {
        let mut random = self.random.lock().unwrap_or_else(PoisonError::into_inner);
        create_reading_order(length, &mut *random)
    }

    /// Invalidates the running sequence, silences the engine and drops the
    /// sequence's pending delays.
    fn cancel_sequence(&self, state: &mut SessionState) {
        state.sequence_epoch += 1;
        self.speech.cancel();
        let handle = self
            .sequence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    fn begin_sequence(self: &Arc<Self>, state: &mut SessionState, item: CartaItem, position: usize) {
        self.cancel_sequence(state);
        let epoch = state.sequence_epoch;
        let has_remaining = position + 1 < state.order.len();

        state.clear_displays();
        state.next_available = false;
        state.phase = SessionPhase::LoadingFirst;

        tracing::debug!(position, epoch, description = %item.description, "Reading card");

        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            inner.run_sequence(epoch, item, has_remaining).await;
        });
        *self.sequence.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    async fn run_sequence(&self, epoch: u64, item: CartaItem, has_remaining: bool) {
        sleep(self.timings.loading_delay).await;
        if !self
            .read_description(epoch, &item, SessionPhase::ReadingDescriptionFirst)
            .await
        {
            return;
        }

        sleep(self.timings.loading_delay).await;
        if !self
            .read_description(epoch, &item, SessionPhase::ReadingDescriptionSecond)
            .await
        {
            return;
        }

        let waiting = self.apply(epoch, |s| {
            s.next_available = has_remaining;
            s.phase = SessionPhase::WaitingAnswer;
        });
        if waiting.is_none() {
            return;
        }

        sleep(self.timings.answer_wait).await;
        if !self.read_answer(epoch, &item).await {
            return;
        }

        self.apply(epoch, |s| {
            s.history.insert(0, item.clone());
            if has_remaining {
                s.phase = SessionPhase::ReadyNext;
            } else {
                s.phase = SessionPhase::Finished;
                s.next_available = false;
            }
        });
    }

    async fn read_description(&self, epoch: u64, item: &CartaItem, phase: SessionPhase) -> bool {
        let Some(rate) = self.apply(epoch, |s| {
            s.phase = phase;
            s.description_display.clear();
            s.rate
        }) else {
            return false;
        };

        let mut listener = RevealListener {
            inner: self,
            epoch,
            reveal: Reveal::Description(&item.description),
        };
        let request = SpeechRequest {
            text: &item.how_to_read_description,
            rate,
        };
        let result = self.speech.speak(request, &mut listener).await;
        self.settle_speech(epoch, result)
    }

    async fn read_answer(&self, epoch: u64, item: &CartaItem) -> bool {
        let Some(rate) = self.apply(epoch, |s| {
            s.phase = SessionPhase::ReadingAnswer;
            s.answer_display.clear();
            s.furigana_display.clear();
            s.rate
        }) else {
            return false;
        };

        let mut listener = RevealListener {
            inner: self,
            epoch,
            reveal: Reveal::Answer {
                answer: &item.answer,
                furigana: &item.how_to_read_answer,
            },
        };
        let request = SpeechRequest {
            text: &item.how_to_read_answer,
            rate,
        };
        let result = self.speech.speak(request, &mut listener).await;
        self.settle_speech(epoch, result)
    }

    fn settle_speech(&self, epoch: u64, result: Result<SpeechPlayback, SpeechError>) -> bool {
        match result {
            Ok(_) => true,
            Err(error) => {
                tracing::warn!(error = %error, "Reading stopped after speech failure");
                self.apply(epoch, |s| s.fail(SessionError::SpeechFailure(error)));
                false
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Reveal<'a> {
    Description(&'a str),
    Answer { answer: &'a str, furigana: &'a str },
}

/// Mirrors speech progress into the display buffers.
struct RevealListener<'a> {
    inner: &'a Inner,
    epoch: u64,
    reveal: Reveal<'a>,
}

impl RevealListener<'_> {
    fn show(&self, char_index: Option<usize>) {
        let reveal = |text: &str| match char_index {
            Some(index) => display::reveal_prefix(text, index),
            None => text.to_string(),
        };

        self.inner.apply(self.epoch, |s| match self.reveal {
            Reveal::Description(description) => {
                s.description_display = reveal(description);
            }
            Reveal::Answer { answer, furigana } => {
                s.answer_display = reveal(answer);
                s.furigana_display = reveal(furigana);
            }
        });
    }
}

impl SpeechListener for RevealListener<'_> {
    fn on_boundary(&mut self, boundary: SpeechBoundary) {
        self.show(Some(boundary.char_index));
    }

    fn on_end(&mut self) {
        self.show(None);
    }
}

/// A game page's reading session. Control methods must be called from within
/// a Tokio runtime; they return `true` when the operation took effect.
pub struct ReadingSession {
    inner: Arc<Inner>,
}

impl ReadingSession {
    pub fn new(
        speech: SpeechController,
        loader: Arc<dyn GameLoader>,
        game_id: Option<String>,
        options: SessionOptions,
    ) -> Self {
        let state = SessionState::new(options.rate);
        let (updates, _) = watch::channel(state.snapshot());

        Self {
            inner: Arc::new(Inner {
                speech,
                loader,
                game_id,
                timings: options.timings,
                state: Mutex::new(state),
                random: Mutex::new(options.random),
                sequence: Mutex::new(None),
                updates,
            }),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.lock().snapshot()
    }

    /// Receives a fresh snapshot after every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.updates.subscribe()
    }

    pub fn reading_order(&self) -> Vec<usize> {
        self.inner.lock().order.clone()
    }

    pub fn rate(&self) -> f32 {
        self.inner.lock().rate
    }

    /// Fetches the deck and puts the session back to `Idle`.
    ///
    /// A load overtaken by a newer `load()` or by `shutdown()` returns
    /// `Ok(LoadOutcome::Superseded)` and leaves state as the newer call left
    /// it; after `shutdown()` that means status stays `Loading`.
    pub async fn load(&self) -> Result<LoadOutcome, SessionError> {
        let Some(game_id) = self.inner.game_id.clone() else {
            self.inner.mutate(|s| s.fail(SessionError::MissingSelection));
            return Err(SessionError::MissingSelection);
        };

        let epoch = self.inner.mutate(|s| {
            s.load_epoch += 1;
            s.status = PageStatus::Loading;
            s.error = None;
            s.load_epoch
        });

        tracing::info!(%game_id, "Loading game");
        let result = self.inner.loader.fetch_game_data(&game_id).await;

        let mut state = self.inner.lock();
        if state.load_epoch != epoch {
            tracing::debug!(%game_id, "Discarding superseded game load");
            return Ok(LoadOutcome::Superseded);
        }

        let outcome = match result {
            Ok(data) => {
                self.inner.cancel_sequence(&mut state);
                state.data = Some(Arc::new(data));
                state.status = PageStatus::Ready;
                state.error = None;
                state.history.clear();
                state.position = None;
                state.phase = SessionPhase::Idle;
                state.order.clear();
                state.clear_displays();
                state.next_available = false;
                Ok(LoadOutcome::Loaded)
            }
            Err(e) => {
                tracing::warn!(%game_id, error = %e, "Failed to load game");
                let error = SessionError::from(e);
                state.fail(error.clone());
                Err(error)
            }
        };
        self.inner.publish(&state);
        outcome
    }

    async fn ensure_game_data(&self) -> Option<Arc<CartaData>> {
        let loaded = self.inner.lock().data.clone();
        if let Some(data) = loaded {
            return Some(data);
        }

        let Some(game_id) = self.inner.game_id.as_deref() else {
            self.inner.mutate(|s| s.fail(SessionError::MissingSelection));
            return None;
        };

        match self.inner.loader.fetch_game_data(game_id).await {
            Ok(data) => {
                let data = Arc::new(data);
                self.inner.mutate(|s| {
                    s.data = Some(Arc::clone(&data));
                    s.status = PageStatus::Ready;
                    s.error = None;
                });
                Some(data)
            }
            Err(e) => {
                tracing::warn!(%game_id, error = %e, "Failed to load game");
                self.inner.mutate(|s| s.fail(SessionError::from(e)));
                None
            }
        }
    }

    pub async fn start(&self) -> bool {
        if self.inner.lock().phase != SessionPhase::Idle {
            tracing::debug!("start ignored: session already running");
            return false;
        }

        let Some(data) = self.ensure_game_data().await else {
            return false;
        };

        let mut state = self.inner.lock();
        if state.phase != SessionPhase::Idle {
            return false;
        }

        let order = self.inner.new_order(data.items.len());
        let first = order.first().and_then(|&index| data.items.get(index)).cloned();
        state.order = order;
        state.history.clear();
        state.next_available = false;

        match first {
            Some(item) => {
                state.position = Some(0);
                self.inner.begin_sequence(&mut state, item, 0);
            }
            None => {
                tracing::info!("Deck is empty, nothing to read");
                state.position = None;
                state.phase = SessionPhase::Finished;
            }
        }
        self.inner.publish(&state);
        true
    }

    pub fn next(&self) -> bool {
        let mut state = self.inner.lock();
        if !state.next_available {
            tracing::debug!(phase = ?state.phase, "next ignored: no next card available");
            return false;
        }

        self.inner.cancel_sequence(&mut state);

        if let Some(current) = state.current_item().cloned() {
            if !state.history.iter().any(|done| same_card(done, &current)) {
                state.history.insert(0, current);
            }
        }

        let next_position = state.position.map_or(0, |p| p + 1);
        let next_item = state
            .order
            .get(next_position)
            .and_then(|&index| state.data.as_ref()?.items.get(index))
            .cloned();

        match next_item {
            Some(item) => {
                state.position = Some(next_position);
                self.inner.begin_sequence(&mut state, item, next_position);
            }
            None => {
                state.phase = SessionPhase::Finished;
                state.next_available = false;
            }
        }
        self.inner.publish(&state);
        true
    }

    pub fn pause(&self) -> bool {
        let mut state = self.inner.lock();
        if !state.phase.is_active_reading() {
            tracing::debug!(phase = ?state.phase, "pause ignored: nothing is being read");
            return false;
        }

        self.inner.cancel_sequence(&mut state);
        state.phase = SessionPhase::Paused;
        self.inner.publish(&state);
        true
    }

    /// Restarts the current card from the beginning of its sequence.
    pub fn resume(&self) -> bool {
        let mut state = self.inner.lock();
        if state.phase != SessionPhase::Paused {
            tracing::debug!(phase = ?state.phase, "resume ignored: session is not paused");
            return false;
        }

        let (Some(item), Some(position)) = (state.current_item().cloned(), state.position) else {
            return false;
        };

        self.inner.begin_sequence(&mut state, item, position);
        self.inner.publish(&state);
        true
    }

    pub fn reset(&self) -> bool {
        let mut state = self.inner.lock();
        self.inner.cancel_sequence(&mut state);

        state.history.clear();
        state.position = None;
        state.phase = SessionPhase::Idle;
        state.next_available = false;
        state.order = match &state.data {
            Some(data) => self.inner.new_order(data.items.len()),
            None => Vec::new(),
        };
        state.clear_displays();
        if matches!(state.error, Some(SessionError::SpeechFailure(_))) {
            state.error = None;
            state.status = PageStatus::Ready;
        }
        self.inner.publish(&state);
        true
    }

    /// Applies to speech started after this call.
    pub fn set_rate(&self, rate: f32) {
        self.inner.mutate(|s| s.rate = rate);
    }

    /// Speaks the sample phrase at the current rate. Does not touch the
    /// session; the outcome is only logged.
    pub fn play_sample(&self) -> JoinHandle<Result<SpeechPlayback, SpeechError>> {
        let rate = self.rate();
        let speech = self.inner.speech.clone();
        tokio::spawn(async move {
            let request = SpeechRequest {
                text: SAMPLE_TEXT,
                rate,
            };
            let result = speech.speak(request, &mut ()).await;
            if let Err(e) = &result {
                tracing::debug!(error = %e, "Sample playback failed");
            }
            result
        })
    }

    /// Stops everything in flight. Loads that resolve afterwards are ignored.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock();
        state.load_epoch += 1;
        self.inner.cancel_sequence(&mut state);
    }
}

impl Drop for ReadingSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
