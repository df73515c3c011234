//! Text helpers for the card display.

/// Characters per column when descriptions are laid out vertically.
pub const LINE_BREAK_INTERVAL: usize = 15;

/// The part of `text` revealed once speech has reached `char_index`:
/// `min(char_index + 1, len)` characters.
pub fn reveal_prefix(text: &str, char_index: usize) -> String {
    text.chars().take(char_index.saturating_add(1)).collect()
}

/// Inserts a newline every `interval` characters. Text that fits in one
/// column is returned unchanged.
pub fn insert_line_breaks(text: &str, interval: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if interval == 0 || chars.len() <= interval {
        return text.to_string();
    }

    chars
        .chunks(interval)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("\n")
}
