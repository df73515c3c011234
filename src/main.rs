//! carta-reader - reads karuta cards aloud in the terminal

use carta_reader::backends;
use carta_reader::config_loader::Settings;
use carta_reader::console::{self, ConsoleCommand};
use carta_reader::games::{AssetSource, FileSource, GameCatalog, GameLoader, HttpSource};
use carta_reader::session::{ReadingSession, SessionOptions, SAMPLE_TEXT};
use carta_reader::speech::{SpeechController, SpeechRequest};
use clap::{Parser, Subcommand};
use std::error::Error;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Karuta card reader
#[derive(Parser)]
#[command(name = "carta-reader")]
#[command(version)]
#[command(about = "Shuffles a karuta deck and reads the cards aloud", long_about = None)]
struct Cli {
    /// Directory that contains assets/data/
    #[arg(long, global = true)]
    data_dir: Option<String>,

    /// Static host that serves assets/data/ (loads over HTTP instead of disk)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Speech rate, 1.0 is normal speed
    #[arg(long, global = true)]
    rate: Option<f32>,

    /// Disable the speech engine
    #[arg(long, global = true)]
    silent: bool,

    /// Run without audio; every utterance completes at once
    #[arg(long, global = true, conflicts_with = "silent")]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available games
    List,

    /// Play a game interactively
    Play {
        /// Game id, as listed by `list`
        game_id: Option<String>,
    },

    /// Speak a sample phrase to check the voice and rate
    Sample {
        /// Text to speak instead of the default phrase
        text: Option<String>,
    },
}

fn apply_overrides(settings: &mut Settings, cli: &Cli) -> Result<(), config::ConfigError> {
    if let Some(dir) = &cli.data_dir {
        settings.data_dir = dir.clone();
        settings.data_source = "file".to_string();
    }
    if let Some(url) = &cli.base_url {
        settings.base_url = url.clone();
        settings.data_source = "http".to_string();
    }
    if let Some(rate) = cli.rate {
        settings.speech_rate = rate;
    }
    if cli.silent {
        settings.tts_backend = "none".to_string();
    }
    if cli.dry_run {
        settings.tts_backend = "scripted".to_string();
    }
    settings.validate()
}

async fn list_games<S: AssetSource>(catalog: &GameCatalog<S>) -> Result<(), Box<dyn Error>> {
    let summaries = catalog.fetch_game_summaries().await?;
    if summaries.is_empty() {
        println!("利用可能なゲームがありません");
    }
    for summary in summaries {
        println!(
            "{:<16} {} - {}",
            summary.game_id, summary.meta.title, summary.meta.description
        );
    }
    Ok(())
}

async fn play(
    settings: &Settings,
    loader: Arc<dyn GameLoader>,
    game_id: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let speech = SpeechController::new(backends::detect(settings));
    match speech.backend_id() {
        Some(backend) => tracing::info!(backend, "Speech engine ready"),
        None => tracing::warn!("No speech engine available; readings will stop with an error"),
    }

    let session = ReadingSession::new(
        speech,
        loader,
        game_id,
        SessionOptions {
            timings: settings.timings(),
            rate: settings.speech_rate,
            ..SessionOptions::default()
        },
    );

    if let Err(e) = session.load().await {
        println!("{}", e.user_message());
        return Err(Box::new(e));
    }

    let mut updates = session.subscribe();
    let mut last_rendered = console::render(&updates.borrow_and_update());
    if let Some(meta) = session.snapshot().meta {
        println!("{}\n{}\n", meta.title, meta.description);
    }
    println!("{}\n\n{}\n", last_rendered, console::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let rendered = console::render(&updates.borrow_and_update());
                if rendered != last_rendered {
                    println!("{}\n", rendered);
                    last_rendered = rendered;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let Some(command) = console::parse_command(&line) else {
                    if !line.trim().is_empty() {
                        println!("{}", console::HELP);
                    }
                    continue;
                };

                let accepted = match command {
                    ConsoleCommand::Start => session.start().await,
                    ConsoleCommand::Next => session.next(),
                    ConsoleCommand::Pause => session.pause(),
                    ConsoleCommand::Resume => session.resume(),
                    ConsoleCommand::Reset => session.reset(),
                    ConsoleCommand::Sample => {
                        drop(session.play_sample());
                        true
                    }
                    ConsoleCommand::Faster | ConsoleCommand::Slower | ConsoleCommand::Rate(_) => {
                        match console::adjust_rate(session.rate(), command) {
                            Some(rate) => {
                                session.set_rate(rate);
                                true
                            }
                            None => false,
                        }
                    }
                    ConsoleCommand::Help => {
                        println!("{}", console::HELP);
                        true
                    }
                    ConsoleCommand::Quit => break,
                };

                if !accepted {
                    println!("(今はその操作はできません)");
                }
            }
        }
    }

    session.shutdown();
    let history = console::render_history(&session.snapshot());
    if !history.is_empty() {
        println!("読んだ札:\n{}", history);
    }
    Ok(())
}

async fn sample(settings: &Settings, text: Option<String>) -> Result<(), Box<dyn Error>> {
    let speech = SpeechController::new(backends::detect(settings));
    let text = text.unwrap_or_else(|| SAMPLE_TEXT.to_string());
    let request = SpeechRequest {
        text: &text,
        rate: settings.speech_rate,
    };
    speech.speak(request, &mut ()).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut settings = Settings::new()?;
    apply_overrides(&mut settings, &cli)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(?settings, "Settings loaded");

    match cli.command {
        Commands::List => {
            if settings.data_source == "http" {
                list_games(&GameCatalog::new(HttpSource::new(&settings.base_url))).await
            } else {
                list_games(&GameCatalog::new(FileSource::new(&settings.data_dir))).await
            }
        }
        Commands::Play { game_id } => {
            let loader: Arc<dyn GameLoader> = if settings.data_source == "http" {
                Arc::new(GameCatalog::new(HttpSource::new(&settings.base_url)))
            } else {
                Arc::new(GameCatalog::new(FileSource::new(&settings.data_dir)))
            };
            play(&settings, loader, game_id).await
        }
        Commands::Sample { text } => sample(&settings, text).await,
    }
}
