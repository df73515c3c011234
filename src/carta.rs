//! Deck model and validation of raw game payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Title and blurb of a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMeta {
    pub title: String,
    pub description: String,
}

/// One card. The `how_to_read_*` fields are the phonetic strings handed to
/// speech synthesis and may differ from the displayed text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartaItem {
    pub description: String,
    pub answer: String,
    pub how_to_read_description: String,
    pub how_to_read_answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartaData {
    pub meta: GameMeta,
    pub items: Vec<CartaItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid carta data")]
pub struct InvalidCartaData;

fn string_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn parse_meta(value: &Value) -> Option<GameMeta> {
    if !value.is_object() {
        return None;
    }

    Some(GameMeta {
        title: string_field(value, "title")?.to_string(),
        description: string_field(value, "description")?.to_string(),
    })
}

fn parse_item(value: &Value) -> Option<CartaItem> {
    if !value.is_object() {
        return None;
    }

    // Older decks spell the answer reading without the underscore.
    let how_to_read_answer = string_field(value, "howtoread_answer")
        .or_else(|| string_field(value, "howtoreadanswer"))?;

    Some(CartaItem {
        description: string_field(value, "description")?.to_string(),
        answer: string_field(value, "answer")?.to_string(),
        how_to_read_description: string_field(value, "howtoread_description")?.to_string(),
        how_to_read_answer: how_to_read_answer.to_string(),
    })
}

/// Validates a decoded game payload and converts it into a deck.
pub fn parse_carta_data(value: &Value) -> Result<CartaData, InvalidCartaData> {
    let meta = value
        .get("meta")
        .and_then(parse_meta)
        .ok_or(InvalidCartaData)?;

    let items = value
        .get("items")
        .and_then(Value::as_array)
        .ok_or(InvalidCartaData)?
        .iter()
        .map(|item| parse_item(item).ok_or(InvalidCartaData))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CartaData { meta, items })
}

/// Pulls just the meta block out of a game payload, ignoring the items.
pub fn extract_game_meta(value: &Value) -> Option<GameMeta> {
    value.get("meta").and_then(parse_meta)
}

/// Reads `{"gameIds": [...]}`. Non-string entries make the index invalid.
pub fn parse_game_index(value: &Value) -> Option<Vec<String>> {
    value
        .get("gameIds")?
        .as_array()?
        .iter()
        .map(|id| id.as_str().map(str::to_string))
        .collect()
}
