/// Normalize a provider summary to plain text.
///
/// Trims whitespace and returns `None` for empty input. Text that looks
/// like markup (contains both `<` and `>`) is rendered to undecorated
/// plain text; if rendering fails or produces nothing, the trimmed
/// original is kept. Normalizing an already-normalized string returns
/// it unchanged.
pub fn normalize_summary(summary: Option<&str>) -> Option<String> {
    let trimmed = summary?.trim();
    if trimmed.is_empty() {
        return None;
    }

    if !looks_like_markup(trimmed) {
        return Some(trimmed.to_string());
    }

    let rendered = html2text::config::plain()
        .string_from_read(trimmed.as_bytes(), 80)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    Some(rendered.unwrap_or_else(|| trimmed.to_string()))
}

fn looks_like_markup(text: &str) -> bool {
    text.contains('<') && text.contains('>')
}
