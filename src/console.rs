//! Terminal presentation of a reading session.

use crate::session::{PageStatus, SessionPhase, SessionSnapshot};

const RATE_STEP: f32 = 0.1;
const MIN_RATE: f32 = 0.1;
const MAX_RATE: f32 = 10.0;
const PLACEHOLDER: &str = "読み札を開始してください";

pub const HELP: &str = "\
commands:
  s        start
  n        next card
  p        pause
  r        resume
  x        reset
  t        play sample
  + / -    faster / slower
  rate N   set speech rate
  h        help
  q        quit";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConsoleCommand {
    Start,
    Next,
    Pause,
    Resume,
    Reset,
    Sample,
    Faster,
    Slower,
    Rate(f32),
    Help,
    Quit,
}

/// Parses one line of input. Blank or unknown input yields `None`.
pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    let mut words = line.split_whitespace();
    let command = match words.next()? {
        "s" | "start" => ConsoleCommand::Start,
        "n" | "next" => ConsoleCommand::Next,
        "p" | "pause" => ConsoleCommand::Pause,
        "r" | "resume" => ConsoleCommand::Resume,
        "x" | "reset" => ConsoleCommand::Reset,
        "t" | "sample" => ConsoleCommand::Sample,
        "+" => ConsoleCommand::Faster,
        "-" => ConsoleCommand::Slower,
        "rate" => ConsoleCommand::Rate(words.next()?.parse().ok()?),
        "h" | "help" | "?" => ConsoleCommand::Help,
        "q" | "quit" | "exit" => ConsoleCommand::Quit,
        _ => return None,
    };
    Some(command)
}

/// The rate after applying `command` to `current`, kept in a usable range.
pub fn adjust_rate(current: f32, command: ConsoleCommand) -> Option<f32> {
    let rate = match command {
        ConsoleCommand::Faster => current + RATE_STEP,
        ConsoleCommand::Slower => current - RATE_STEP,
        ConsoleCommand::Rate(rate) => rate,
        _ => return None,
    };
    Some(((rate * 10.0).round() / 10.0).clamp(MIN_RATE, MAX_RATE))
}

fn phase_label(phase: SessionPhase) -> &'static str {
    match phase {
        SessionPhase::Idle => "待機中",
        SessionPhase::LoadingFirst => "準備中",
        SessionPhase::ReadingDescriptionFirst => "読み上げ中 (1回目)",
        SessionPhase::ReadingDescriptionSecond => "読み上げ中 (2回目)",
        SessionPhase::WaitingAnswer => "答え待ち",
        SessionPhase::ReadingAnswer => "答え読み上げ中",
        SessionPhase::ReadyNext => "次へ進めます",
        SessionPhase::Finished => "終了",
        SessionPhase::Paused => "一時停止中",
    }
}

/// Renders the parts of a snapshot a player looks at.
pub fn render(snapshot: &SessionSnapshot) -> String {
    match snapshot.status {
        PageStatus::Loading => return "読み込み中".to_string(),
        PageStatus::Error => {
            return snapshot
                .error_message()
                .unwrap_or("選択に失敗しました")
                .to_string();
        }
        PageStatus::Ready => {}
    }

    let mut lines = Vec::new();
    if let Some(meta) = &snapshot.meta {
        lines.push(format!("選択中: {}", meta.title));
    }
    lines.push(format!(
        "[{}] {}枚目 / 残り{}枚 / 速度 {:.1}",
        phase_label(snapshot.phase),
        snapshot.current_number,
        snapshot.remaining_count,
        snapshot.rate
    ));

    if snapshot.description_display.is_empty() {
        lines.push(PLACEHOLDER.to_string());
    } else {
        lines.push(snapshot.formatted_description());
    }

    if snapshot.phase.shows_answer() && !snapshot.answer_display.is_empty() {
        lines.push(format!(
            "答え: {} ({})",
            snapshot.answer_display, snapshot.furigana_display
        ));
    }

    if snapshot.next_available {
        lines.push("[n] 次へ".to_string());
    }

    lines.join("\n")
}

/// One line per card already read, newest first.
pub fn render_history(snapshot: &SessionSnapshot) -> String {
    snapshot
        .history
        .iter()
        .map(|item| format!("{} … {}", item.description, item.answer))
        .collect::<Vec<_>>()
        .join("\n")
}
