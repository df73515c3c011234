//! Loading game decks from a static asset tree.
//!
//! Games live under `assets/data/`: an `index.json` listing the available
//! game ids and one `<gameId>.json` payload per game. The tree can be a local
//! directory or the same layout served over HTTP.

use crate::carta::{self, CartaData, GameMeta, InvalidCartaData};
use async_trait::async_trait;
use futures_util::future::join_all;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::path::PathBuf;

const INDEX_PATH: &str = "assets/data/index.json";

lazy_static! {
    static ref GAME_ID: Regex = Regex::new(r"^[A-Za-z0-9_-]+$").expect("game id pattern");
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error(transparent)]
    InvalidData(#[from] InvalidCartaData),

    #[error("Invalid game index data")]
    InvalidIndex,

    #[error("Invalid game meta data")]
    InvalidMeta,

    #[error("Invalid game id: {0:?}")]
    InvalidGameId(String),

    #[error("No valid games")]
    NoValidGames,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl LoadError {
    /// True when the payload arrived but failed structural validation.
    pub fn is_invalid_data(&self) -> bool {
        matches!(self, LoadError::InvalidData(_))
    }
}

/// A game id and its meta block, as listed on the top page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSummary {
    pub game_id: String,
    pub meta: GameMeta,
}

/// Somewhere JSON assets can be read from by relative path.
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn fetch_json(&self, path: &str) -> Result<Value, LoadError>;
}

/// What the reading session needs from the data layer.
#[async_trait]
pub trait GameLoader: Send + Sync {
    async fn fetch_game_data(&self, game_id: &str) -> Result<CartaData, LoadError>;
}

/// Reads assets from a directory on disk.
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl AssetSource for FileSource {
    async fn fetch_json(&self, path: &str) -> Result<Value, LoadError> {
        let full_path = self.root.join(path.trim_start_matches('/'));
        let bytes = tokio::fs::read(&full_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LoadError::Request(full_path.display().to_string())
            } else {
                LoadError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Reads assets from a static web host.
pub struct HttpSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            client: reqwest::Client::new(),
        }
    }

    pub fn asset_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl AssetSource for HttpSource {
    async fn fetch_json(&self, path: &str) -> Result<Value, LoadError> {
        let url = self.asset_url(path);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(LoadError::Request(url));
        }

        Ok(response.json::<Value>().await?)
    }
}

/// Ensures a base URL ends with exactly one trailing slash; empty means `/`.
pub fn normalize_base_url(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return "/".to_string();
    }

    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}

fn game_path(game_id: &str) -> Result<String, LoadError> {
    if !GAME_ID.is_match(game_id) {
        return Err(LoadError::InvalidGameId(game_id.to_string()));
    }
    Ok(format!("assets/data/{}.json", game_id))
}

/// Game index, metadata and decks on top of an [`AssetSource`].
pub struct GameCatalog<S> {
    source: S,
}

impl<S: AssetSource> GameCatalog<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub async fn fetch_game_index(&self) -> Result<Vec<String>, LoadError> {
        let data = self.source.fetch_json(INDEX_PATH).await?;
        carta::parse_game_index(&data).ok_or(LoadError::InvalidIndex)
    }

    pub async fn fetch_game_meta(&self, game_id: &str) -> Result<GameMeta, LoadError> {
        let data = self.source.fetch_json(&game_path(game_id)?).await?;
        carta::extract_game_meta(&data).ok_or(LoadError::InvalidMeta)
    }

    /// Summaries for every listed game whose meta loads. Broken games are
    /// skipped; an index where every game is broken is an error.
    pub async fn fetch_game_summaries(&self) -> Result<Vec<GameSummary>, LoadError> {
        let game_ids = self.fetch_game_index().await?;

        if game_ids.is_empty() {
            return Ok(Vec::new());
        }

        let results = join_all(game_ids.into_iter().map(|game_id| async move {
            let meta = self.fetch_game_meta(&game_id).await;
            (game_id, meta)
        }))
        .await;

        let summaries: Vec<GameSummary> = results
            .into_iter()
            .filter_map(|(game_id, meta)| match meta {
                Ok(meta) => Some(GameSummary { game_id, meta }),
                Err(e) => {
                    tracing::warn!(%game_id, error = %e, "Skipping game with unreadable meta");
                    None
                }
            })
            .collect();

        if summaries.is_empty() {
            return Err(LoadError::NoValidGames);
        }

        Ok(summaries)
    }
}

#[async_trait]
impl<S: AssetSource> GameLoader for GameCatalog<S> {
    async fn fetch_game_data(&self, game_id: &str) -> Result<CartaData, LoadError> {
        let data = self.source.fetch_json(&game_path(game_id)?).await?;
        tracing::info!(%game_id, "Loaded game payload");
        Ok(carta::parse_carta_data(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_asset(root: &std::path::Path, name: &str, body: &str) {
        let dir = root.join("assets/data");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), body).unwrap();
    }

    const KOJIEN: &str = r#"{
        "meta": { "title": "広辞苑かるた", "description": "説明" },
        "items": [
            { "description": "句", "answer": "答え", "howtoread_description": "く", "howtoread_answer": "こたえ" }
        ]
    }"#;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url(""), "/");
        assert_eq!(normalize_base_url("/"), "/");
        assert_eq!(normalize_base_url("/carta"), "/carta/");
        assert_eq!(normalize_base_url("https://example.com/carta/"), "https://example.com/carta/");
    }

    #[test]
    fn test_asset_url_strips_leading_slash() {
        let source = HttpSource::new("https://example.com/carta");
        assert_eq!(
            source.asset_url("/assets/data/index.json"),
            "https://example.com/carta/assets/data/index.json"
        );
    }

    #[test]
    fn test_game_id_validation() {
        assert_eq!(game_path("kojien_2").unwrap(), "assets/data/kojien_2.json");
        assert!(matches!(game_path("../secret"), Err(LoadError::InvalidGameId(_))));
        assert!(matches!(game_path(""), Err(LoadError::InvalidGameId(_))));
    }

    #[tokio::test]
    async fn test_file_source_loads_game() {
        let dir = tempdir().unwrap();
        write_asset(dir.path(), "kojien.json", KOJIEN);

        let catalog = GameCatalog::new(FileSource::new(dir.path()));
        let data = catalog.fetch_game_data("kojien").await.unwrap();
        assert_eq!(data.meta.title, "広辞苑かるた");
        assert_eq!(data.items.len(), 1);
    }

    #[tokio::test]
    async fn test_file_source_distinguishes_invalid_data() {
        let dir = tempdir().unwrap();
        write_asset(dir.path(), "broken.json", r#"{ "meta": { "title": 1 }, "items": [] }"#);

        let catalog = GameCatalog::new(FileSource::new(dir.path()));
        let err = catalog.fetch_game_data("broken").await.unwrap_err();
        assert!(err.is_invalid_data());

        let err = catalog.fetch_game_data("missing").await.unwrap_err();
        assert!(!err.is_invalid_data());
        assert!(matches!(err, LoadError::Request(_)));
    }

    #[tokio::test]
    async fn test_summaries_skip_broken_games() {
        let dir = tempdir().unwrap();
        write_asset(dir.path(), "index.json", r#"{ "gameIds": ["kojien", "broken", "missing"] }"#);
        write_asset(dir.path(), "kojien.json", KOJIEN);
        write_asset(dir.path(), "broken.json", r#"{ "meta": {} }"#);

        let catalog = GameCatalog::new(FileSource::new(dir.path()));
        let summaries = catalog.fetch_game_summaries().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].game_id, "kojien");
    }

    #[tokio::test]
    async fn test_summaries_empty_and_all_broken() {
        let dir = tempdir().unwrap();
        write_asset(dir.path(), "index.json", r#"{ "gameIds": [] }"#);
        let catalog = GameCatalog::new(FileSource::new(dir.path()));
        assert!(catalog.fetch_game_summaries().await.unwrap().is_empty());

        write_asset(dir.path(), "index.json", r#"{ "gameIds": ["missing"] }"#);
        assert!(matches!(
            catalog.fetch_game_summaries().await,
            Err(LoadError::NoValidGames)
        ));

        write_asset(dir.path(), "index.json", r#"{ "games": [] }"#);
        assert!(matches!(
            catalog.fetch_game_index().await,
            Err(LoadError::InvalidIndex)
        ));
    }
}
