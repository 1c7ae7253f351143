//! Text normalization and matching helpers.
//!
//! Queries, specialist replies, and registry vocabulary all pass through
//! [`normalize`] so that full-width digits, compatibility characters, and
//! letter case never decide a route.

use unicode_normalization::UnicodeNormalization;

/// NFKC-normalize and lowercase.
pub fn normalize(text: &str) -> String {
    text.nfkc().collect::<String>().to_lowercase()
}

/// Return the phrases of `vocabulary` present in already-normalized `text`,
/// in vocabulary order.
pub fn matched_phrases<'a>(normalized_text: &str, vocabulary: &'a [String]) -> Vec<&'a str> {
    vocabulary
        .iter()
        .filter(|phrase| normalized_text.contains(phrase.as_str()))
        .map(String::as_str)
        .collect()
}

/// Count phrases of `vocabulary` present in already-normalized `text`.
pub fn count_matches(normalized_text: &str, vocabulary: &[String]) -> usize {
    vocabulary
        .iter()
        .filter(|phrase| normalized_text.contains(phrase.as_str()))
        .count()
}

/// Split text into sentences, keeping terminators.
///
/// Handles both Japanese (`。！？`) and Latin (`.!?`) punctuation plus line
/// breaks. A `.` only ends a sentence before whitespace or the end of the
/// text, so decimals like `38.5度` stay whole. Empty fragments are dropped.
pub fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        let ends = match ch {
            '.' => chars.peek().is_none_or(|(_, next)| next.is_whitespace()),
            '。' | '！' | '？' | '!' | '?' | '\n' => true,
            _ => false,
        };
        if ends {
            let end = idx + ch.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Truncate to at most `max_chars` characters, appending an ellipsis when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push('…');
    cut
}
