/// Marker appended to text cut by [`truncate_chars`].
pub const TRUNCATION_MARKER: &str = "...";

/// Characters shown per hit in human-readable output.
pub const DEFAULT_PREVIEW_CHARS: usize = 300;

/// Cut `text` to at most `max_chars` characters, appending `...` when
/// anything was removed. Never splits a UTF-8 sequence.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_string(),
    }
}

/// A short single-paragraph preview of a hit for terminal output.
pub fn preview(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, max_chars)
}

/// File name of a source path, or the path itself.
pub fn display_name(source: &str) -> &str {
    source
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(source)
}
