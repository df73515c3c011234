use carta_reader::backends::scripted::ScriptedBackend;
use carta_reader::carta::{CartaData, CartaItem, GameMeta, InvalidCartaData};
use carta_reader::games::{GameLoader, LoadError};
use carta_reader::session::{
    LoadOutcome, PageStatus, ReadingSession, SessionError, SessionOptions, SessionPhase,
    SessionTimings,
};
use carta_reader::speech::{SpeechController, SpeechError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

mockall::mock! {
    pub Loader {}
    #[async_trait::async_trait]
    impl GameLoader for Loader {
        async fn fetch_game_data(&self, game_id: &str) -> Result<CartaData, LoadError>;
    }
}

const LOADING_MS: u64 = 3000;
const ANSWER_WAIT_MS: u64 = 10000;

fn item(description: &str, answer: &str, how_to_read_answer: &str) -> CartaItem {
    CartaItem {
        description: description.into(),
        answer: answer.into(),
        how_to_read_description: description.into(),
        how_to_read_answer: how_to_read_answer.into(),
    }
}

fn two_cards() -> Vec<CartaItem> {
    vec![
        item("句", "答え", "こたえ"),
        item("次の句", "次の答え", "つぎのこたえ"),
    ]
}

fn deck(items: Vec<CartaItem>) -> CartaData {
    CartaData {
        meta: GameMeta {
            title: "広辞苑カルタ".into(),
            description: "説明".into(),
        },
        items,
    }
}

fn loader_with(items: Vec<CartaItem>) -> MockLoader {
    let mut loader = MockLoader::new();
    loader.expect_fetch_game_data().returning(move |game_id| {
        assert_eq!(game_id, "kojien");
        Ok(deck(items.clone()))
    });
    loader
}

/// A random source of 0.99 keeps small decks in their listed order.
fn options() -> SessionOptions {
    SessionOptions {
        timings: SessionTimings::default(),
        rate: 1.0,
        random: Box::new(|| 0.99),
    }
}

fn session_with(loader: MockLoader, backend: &ScriptedBackend) -> ReadingSession {
    ReadingSession::new(
        SpeechController::new(Some(Arc::new(backend.clone()))),
        Arc::new(loader),
        Some("kojien".into()),
        options(),
    )
}

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

async fn advance_ms(ms: u64) {
    tokio::time::advance(Duration::from_millis(ms)).await;
    settle().await;
}

/// Drives one card from `LoadingFirst` to the end of its answer.
async fn read_card(backend: &ScriptedBackend) {
    advance_ms(LOADING_MS).await;
    assert!(backend.finish());
    settle().await;
    advance_ms(LOADING_MS).await;
    assert!(backend.finish());
    settle().await;
    advance_ms(ANSWER_WAIT_MS).await;
    assert!(backend.finish());
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn test_full_game_of_two_cards() {
    let backend = ScriptedBackend::new();
    let session = session_with(loader_with(two_cards()), &backend);

    assert_eq!(session.load().await, Ok(LoadOutcome::Loaded));
    assert_eq!(session.snapshot().status, PageStatus::Ready);
    assert_eq!(session.snapshot().phase, SessionPhase::Idle);

    assert!(session.start().await);
    assert_eq!(session.reading_order(), vec![0, 1]);
    assert_eq!(session.snapshot().phase, SessionPhase::LoadingFirst);
    assert_eq!(session.snapshot().current_number, 1);
    assert_eq!(session.snapshot().remaining_count, 1);

    advance_ms(LOADING_MS).await;
    assert_eq!(session.snapshot().phase, SessionPhase::ReadingDescriptionFirst);
    assert!(backend.finish());
    settle().await;
    assert_eq!(session.snapshot().description_display, "句");

    advance_ms(LOADING_MS).await;
    assert_eq!(session.snapshot().phase, SessionPhase::ReadingDescriptionSecond);
    assert!(backend.finish());
    settle().await;

    let waiting = session.snapshot();
    assert_eq!(waiting.phase, SessionPhase::WaitingAnswer);
    assert!(waiting.next_available);

    advance_ms(ANSWER_WAIT_MS).await;
    assert_eq!(session.snapshot().phase, SessionPhase::ReadingAnswer);
    assert!(backend.finish());
    settle().await;

    let ready = session.snapshot();
    assert_eq!(ready.phase, SessionPhase::ReadyNext);
    assert_eq!(ready.history.len(), 1);
    assert_eq!(ready.answer_display, "答え");
    assert_eq!(ready.furigana_display, "こたえ");

    assert!(session.next());
    assert_eq!(session.snapshot().phase, SessionPhase::LoadingFirst);
    read_card(&backend).await;

    let finished = session.snapshot();
    assert_eq!(finished.phase, SessionPhase::Finished);
    assert!(!finished.next_available);
    assert_eq!(finished.history.len(), 2);
    assert_eq!(finished.history[0].description, "次の句");
    assert_eq!(finished.history[1].description, "句");
    assert_eq!(finished.remaining_count, 0);

    let texts: Vec<String> = backend.spoken().into_iter().map(|u| u.text).collect();
    assert_eq!(
        texts,
        vec!["句", "句", "こたえ", "次の句", "次の句", "つぎのこたえ"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_boundaries_reveal_text() {
    let backend = ScriptedBackend::new();
    let long_description = "あいうえおかきくけこさしすせそた";
    let session = session_with(
        loader_with(vec![item(long_description, "答え", "こたえ")]),
        &backend,
    );
    session.load().await.unwrap();
    session.start().await;

    advance_ms(LOADING_MS).await;
    assert!(backend.boundary(2));
    settle().await;
    assert_eq!(session.snapshot().description_display, "あいう");

    assert!(backend.boundary(15));
    settle().await;
    let snapshot = session.snapshot();
    assert_eq!(snapshot.description_display, long_description);
    assert_eq!(snapshot.formatted_description(), "あいうえおかきくけこさしすせそ\nた");

    assert!(backend.boundary(100));
    settle().await;
    assert_eq!(session.snapshot().description_display, long_description);

    assert!(backend.finish());
    settle().await;
    advance_ms(LOADING_MS).await;
    assert_eq!(session.snapshot().phase, SessionPhase::ReadingDescriptionSecond);
    assert_eq!(session.snapshot().description_display, "");

    assert!(backend.finish());
    settle().await;
    advance_ms(ANSWER_WAIT_MS).await;

    // Both answer buffers follow the same boundary, each clamped to its own length.
    assert!(backend.boundary(1));
    settle().await;
    let snapshot = session.snapshot();
    assert_eq!(snapshot.answer_display, "答え");
    assert_eq!(snapshot.furigana_display, "こた");

    assert!(backend.boundary(2));
    settle().await;
    assert_eq!(session.snapshot().answer_display, "答え");
    assert_eq!(session.snapshot().furigana_display, "こたえ");
}

#[tokio::test(start_paused = true)]
async fn test_end_reveals_full_text_without_boundaries() {
    let backend = ScriptedBackend::new();
    let session = session_with(loader_with(two_cards()), &backend);
    session.load().await.unwrap();
    session.start().await;

    advance_ms(LOADING_MS).await;
    assert!(backend.boundary(0));
    settle().await;
    assert_eq!(session.snapshot().description_display, "句");
    assert!(backend.finish());
    settle().await;
    assert_eq!(session.snapshot().description_display, "句");
}

#[tokio::test(start_paused = true)]
async fn test_empty_deck_finishes_without_speech() {
    let backend = ScriptedBackend::new();
    let session = session_with(loader_with(Vec::new()), &backend);
    session.load().await.unwrap();

    assert!(session.start().await);
    assert_eq!(session.snapshot().phase, SessionPhase::Finished);
    assert_eq!(session.snapshot().current_number, 0);

    advance_ms(LOADING_MS * 10).await;
    assert!(backend.spoken().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_start_loads_data_when_needed() {
    let backend = ScriptedBackend::new();
    let mut loader = MockLoader::new();
    loader
        .expect_fetch_game_data()
        .times(1)
        .returning(|_| Ok(deck(two_cards())));
    let session = session_with(loader, &backend);

    assert!(session.start().await);
    assert_eq!(session.snapshot().status, PageStatus::Ready);
    assert_eq!(session.snapshot().phase, SessionPhase::LoadingFirst);
    assert!(!session.start().await);
}

#[tokio::test(start_paused = true)]
async fn test_next_requires_next_available() {
    let backend = ScriptedBackend::new();
    let session = session_with(loader_with(two_cards()), &backend);
    session.load().await.unwrap();

    assert!(!session.next());
    session.start().await;
    assert!(!session.next());

    advance_ms(LOADING_MS).await;
    let cancels = backend.cancel_count();
    assert!(!session.next());
    assert_eq!(session.snapshot().phase, SessionPhase::ReadingDescriptionFirst);
    assert_eq!(backend.cancel_count(), cancels);
    assert!(backend.is_pending());
}

#[tokio::test(start_paused = true)]
async fn test_next_while_waiting_records_current_card() {
    let backend = ScriptedBackend::new();
    let session = session_with(loader_with(two_cards()), &backend);
    session.load().await.unwrap();
    session.start().await;

    advance_ms(LOADING_MS).await;
    assert!(backend.finish());
    settle().await;
    advance_ms(LOADING_MS).await;
    assert!(backend.finish());
    settle().await;
    assert_eq!(session.snapshot().phase, SessionPhase::WaitingAnswer);

    assert!(session.next());
    let snapshot = session.snapshot();
    assert_eq!(snapshot.phase, SessionPhase::LoadingFirst);
    assert_eq!(snapshot.history.len(), 1);
    assert_eq!(snapshot.history[0].description, "句");
    assert_eq!(snapshot.current_item.map(|i| i.description), Some("次の句".to_string()));

    // The abandoned answer wait must not fire into the new card.
    advance_ms(ANSWER_WAIT_MS).await;
    assert_eq!(session.snapshot().phase, SessionPhase::ReadingDescriptionFirst);
    assert_eq!(backend.last_spoken().map(|u| u.text), Some("次の句".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_pause_and_resume_restart_the_card() {
    let backend = ScriptedBackend::new();
    let session = session_with(loader_with(two_cards()), &backend);
    session.load().await.unwrap();
    session.start().await;

    advance_ms(LOADING_MS).await;
    assert!(backend.finish());
    settle().await;
    advance_ms(LOADING_MS).await;
    assert_eq!(session.snapshot().phase, SessionPhase::ReadingDescriptionSecond);
    assert!(backend.boundary(0));
    settle().await;

    let cancels = backend.cancel_count();
    assert!(session.pause());
    assert_eq!(session.snapshot().phase, SessionPhase::Paused);
    assert_eq!(backend.cancel_count(), cancels + 1);
    assert!(!backend.is_pending());
    assert!(!session.pause());

    // Nothing left over from the paused sequence may run.
    advance_ms(60_000).await;
    assert_eq!(session.snapshot().phase, SessionPhase::Paused);
    assert_eq!(backend.spoken().len(), 2);

    assert!(session.resume());
    let resumed = session.snapshot();
    assert_eq!(resumed.phase, SessionPhase::LoadingFirst);
    assert_eq!(resumed.description_display, "");
    assert_eq!(resumed.current_item.map(|i| i.description), Some("句".to_string()));

    advance_ms(LOADING_MS).await;
    assert_eq!(session.snapshot().phase, SessionPhase::ReadingDescriptionFirst);
    assert_eq!(backend.spoken().len(), 3);
    assert!(!session.resume());
}

#[tokio::test(start_paused = true)]
async fn test_reset_after_finish() {
    let backend = ScriptedBackend::new();
    let session = session_with(loader_with(two_cards()), &backend);
    session.load().await.unwrap();
    session.start().await;
    read_card(&backend).await;
    assert!(session.next());
    read_card(&backend).await;
    assert_eq!(session.snapshot().phase, SessionPhase::Finished);

    assert!(session.reset());
    let snapshot = session.snapshot();
    assert_eq!(snapshot.phase, SessionPhase::Idle);
    assert!(snapshot.history.is_empty());
    assert_eq!(snapshot.current_item, None);
    assert_eq!(snapshot.remaining_count, 2);

    let mut order = session.reading_order();
    order.sort_unstable();
    assert_eq!(order, vec![0, 1]);

    assert!(session.start().await);
    assert_eq!(session.snapshot().phase, SessionPhase::LoadingFirst);
}

#[tokio::test(start_paused = true)]
async fn test_speech_failure_freezes_phase() {
    let backend = ScriptedBackend::new();
    let session = session_with(loader_with(two_cards()), &backend);
    session.load().await.unwrap();
    session.start().await;

    advance_ms(LOADING_MS).await;
    assert!(backend.fail("synthesis"));
    settle().await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.status, PageStatus::Error);
    assert_eq!(snapshot.phase, SessionPhase::ReadingDescriptionFirst);
    assert_eq!(
        snapshot.error,
        Some(SessionError::SpeechFailure(SpeechError::SynthesisError(
            "synthesis".into()
        )))
    );
    assert_eq!(snapshot.error_message(), Some("読み上げに失敗しました"));

    advance_ms(60_000).await;
    assert_eq!(backend.spoken().len(), 1);

    assert!(session.reset());
    assert_eq!(session.snapshot().status, PageStatus::Ready);
    assert_eq!(session.snapshot().error, None);
}

#[tokio::test(start_paused = true)]
async fn test_missing_speech_engine() {
    let session = ReadingSession::new(
        SpeechController::unsupported(),
        Arc::new(loader_with(two_cards())),
        Some("kojien".into()),
        options(),
    );
    session.load().await.unwrap();
    session.start().await;
    advance_ms(LOADING_MS).await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.phase, SessionPhase::ReadingDescriptionFirst);
    assert_eq!(
        snapshot.error,
        Some(SessionError::SpeechFailure(SpeechError::Unsupported))
    );
}

#[tokio::test(start_paused = true)]
async fn test_rate_applies_to_later_speech() {
    let backend = ScriptedBackend::new();
    let session = session_with(loader_with(two_cards()), &backend);
    session.load().await.unwrap();
    session.start().await;

    session.set_rate(1.5);
    advance_ms(LOADING_MS).await;
    assert_eq!(backend.last_spoken().map(|u| u.rate), Some(1.5));

    session.set_rate(0.8);
    assert_eq!(backend.last_spoken().map(|u| u.rate), Some(1.5));
    assert!(backend.finish());
    settle().await;
    advance_ms(LOADING_MS).await;
    assert_eq!(backend.last_spoken().map(|u| u.rate), Some(0.8));
}

#[tokio::test(start_paused = true)]
async fn test_sample_does_not_touch_session() {
    let backend = ScriptedBackend::auto_complete();
    let session = session_with(loader_with(two_cards()), &backend);
    session.load().await.unwrap();
    session.set_rate(1.2);

    let played = session.play_sample().await.unwrap();
    assert!(played.is_ok());

    let spoken = backend.last_spoken().unwrap();
    assert_eq!(spoken.text, carta_reader::session::SAMPLE_TEXT);
    assert_eq!(spoken.rate, 1.2);
    assert_eq!(session.snapshot().phase, SessionPhase::Idle);
    assert!(session.snapshot().history.is_empty());
}

#[tokio::test]
async fn test_missing_selection() {
    let mut loader = MockLoader::new();
    loader.expect_fetch_game_data().times(0);
    let session = ReadingSession::new(
        SpeechController::unsupported(),
        Arc::new(loader),
        None,
        options(),
    );

    assert_eq!(session.load().await, Err(SessionError::MissingSelection));
    assert_eq!(session.snapshot().status, PageStatus::Error);
    assert_eq!(session.snapshot().error_message(), Some("選択に失敗しました"));
    assert!(!session.start().await);
}

#[tokio::test]
async fn test_load_errors_are_distinguished() {
    let mut loader = MockLoader::new();
    loader
        .expect_fetch_game_data()
        .times(1)
        .returning(|_| Err(LoadError::InvalidData(InvalidCartaData)));
    let session = ReadingSession::new(
        SpeechController::unsupported(),
        Arc::new(loader),
        Some("kojien".into()),
        options(),
    );
    assert_eq!(session.load().await, Err(SessionError::InvalidDataFormat));
    assert_eq!(session.snapshot().error_message(), Some("データ形式が不正です"));

    let mut loader = MockLoader::new();
    loader
        .expect_fetch_game_data()
        .times(1)
        .returning(|_| Err(LoadError::Request("assets/data/kojien.json".into())));
    let session = ReadingSession::new(
        SpeechController::unsupported(),
        Arc::new(loader),
        Some("kojien".into()),
        options(),
    );
    assert!(matches!(
        session.load().await,
        Err(SessionError::DataFetchFailure(_))
    ));
    assert_eq!(
        session.snapshot().error_message(),
        Some("データの取得に失敗しました")
    );
}

#[tokio::test(start_paused = true)]
async fn test_subscribers_see_phase_changes() {
    let backend = ScriptedBackend::new();
    let session = session_with(loader_with(two_cards()), &backend);
    let mut updates = session.subscribe();
    session.load().await.unwrap();

    session.start().await;
    assert!(updates.has_changed().unwrap());
    assert_eq!(updates.borrow_and_update().phase, SessionPhase::LoadingFirst);

    advance_ms(LOADING_MS).await;
    assert!(updates.has_changed().unwrap());
    assert_eq!(
        updates.borrow_and_update().phase,
        SessionPhase::ReadingDescriptionFirst
    );
}

/// Serves one queued deck per call, each after its own delay.
struct SlowLoader {
    replies: Mutex<VecDeque<(u64, CartaData)>>,
}

impl SlowLoader {
    fn new(replies: Vec<(u64, CartaData)>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
        }
    }
}

#[async_trait::async_trait]
impl GameLoader for SlowLoader {
    async fn fetch_game_data(&self, _game_id: &str) -> Result<CartaData, LoadError> {
        let (delay_ms, data) = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("no reply queued");
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        Ok(data)
    }
}

fn titled(title: &str) -> CartaData {
    let mut data = deck(two_cards());
    data.meta.title = title.into();
    data
}

fn slow_session(loader: SlowLoader) -> Arc<ReadingSession> {
    Arc::new(ReadingSession::new(
        SpeechController::unsupported(),
        Arc::new(loader),
        Some("kojien".into()),
        options(),
    ))
}

fn spawn_load(
    session: &Arc<ReadingSession>,
) -> tokio::task::JoinHandle<Result<LoadOutcome, SessionError>> {
    let session = Arc::clone(session);
    tokio::spawn(async move { session.load().await })
}

#[tokio::test(start_paused = true)]
async fn test_newer_load_wins_over_slower_one() {
    let session = slow_session(SlowLoader::new(vec![
        (5000, titled("古い")),
        (1000, titled("新しい")),
    ]));

    let first = spawn_load(&session);
    settle().await;
    let second = spawn_load(&session);
    settle().await;

    advance_ms(1000).await;
    assert_eq!(second.await.unwrap(), Ok(LoadOutcome::Loaded));
    assert_eq!(
        session.snapshot().meta.map(|m| m.title),
        Some("新しい".to_string())
    );

    let mut updates = session.subscribe();
    updates.borrow_and_update();
    advance_ms(4000).await;

    assert_eq!(first.await.unwrap(), Ok(LoadOutcome::Superseded));
    let snapshot = session.snapshot();
    assert_eq!(snapshot.status, PageStatus::Ready);
    assert_eq!(snapshot.meta.map(|m| m.title), Some("新しい".to_string()));
    assert!(!updates.has_changed().unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_load_finishing_after_shutdown_is_dropped() {
    let session = slow_session(SlowLoader::new(vec![(5000, titled("古い"))]));

    let pending = spawn_load(&session);
    settle().await;
    assert_eq!(session.snapshot().status, PageStatus::Loading);

    session.shutdown();
    let mut updates = session.subscribe();
    updates.borrow_and_update();
    advance_ms(5000).await;

    assert_eq!(pending.await.unwrap(), Ok(LoadOutcome::Superseded));
    let snapshot = session.snapshot();
    assert_eq!(snapshot.status, PageStatus::Loading);
    assert_eq!(snapshot.meta, None);
    assert_eq!(snapshot.total_items, 0);
    assert!(!updates.has_changed().unwrap());
}
