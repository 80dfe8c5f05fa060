//! Text normalization, word tokenization and heuristic language detection.
//! Normalized text feeds cache keying; tokens feed the word cache.

use std::collections::{HashMap, HashSet};

/// Number of leading characters inspected by [`detect_language`].
const DETECT_PREFIX_CHARS: usize = 100;
/// Script fraction above which Cyrillic / Arabic text is classified.
const SCRIPT_FRACTION: f64 = 0.3;

const ENGLISH_WORDS: &[&str] = &["the", "and", "is", "are", "you", "this"];
const FRENCH_WORDS: &[&str] = &["le", "la", "et", "est", "une", "des"];
const SPANISH_WORDS: &[&str] = &["el", "la", "y", "es", "una", "los"];

/// Canonical form used for cache keys: trimmed and lowercased.
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Byte ranges of maximal alphanumeric runs in `text`.
fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in text.char_indices() {
        match (c.is_alphanumeric(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                spans.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

/// Lowercased word tokens in order of appearance, duplicates kept.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    token_spans(&lower)
        .into_iter()
        .map(|(s, e)| lower[s..e].to_string())
        .collect()
}

/// Set view of `tokens`, keeping first-occurrence order.
pub fn unique_tokens(tokens: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(tokens.len());
    tokens
        .iter()
        .filter(|t| seen.insert(t.as_str()))
        .cloned()
        .collect()
}

/// Lowercase `text` and replace every whole token found in `translations`.
/// Separators and unknown tokens are copied through unchanged.
pub fn substitute_tokens(text: &str, translations: &HashMap<String, String>) -> String {
    let lower = text.to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut cursor = 0;
    for (s, e) in token_spans(&lower) {
        out.push_str(&lower[cursor..s]);
        let token = &lower[s..e];
        match translations.get(token) {
            Some(translated) => out.push_str(translated),
            None => out.push_str(token),
        }
        cursor = e;
    }
    out.push_str(&lower[cursor..]);
    out
}

/// Best-effort guess of the language of `text`. Never fails; defaults to `en`.
pub fn detect_language(text: &str) -> &'static str {
    let prefix: Vec<char> = text.chars().take(DETECT_PREFIX_CHARS).collect();
    if prefix.is_empty() {
        return "en";
    }
    let total = prefix.len() as f64;
    let fraction = |range: std::ops::RangeInclusive<char>| {
        prefix.iter().filter(|c| range.contains(*c)).count() as f64 / total
    };

    if fraction('\u{0400}'..='\u{04FF}') > SCRIPT_FRACTION {
        return "ru";
    }
    if prefix.iter().any(|c| ('\u{4E00}'..='\u{9FFF}').contains(c)) {
        return "zh";
    }
    if fraction('\u{0600}'..='\u{06FF}') > SCRIPT_FRACTION {
        return "ar";
    }
    if prefix
        .iter()
        .any(|c| matches!(c, 'ä' | 'ö' | 'ü' | 'ß' | 'Ä' | 'Ö' | 'Ü'))
    {
        return "de";
    }

    let prefix: String = prefix.into_iter().collect();
    let words = tokenize(&prefix);
    let has_any = |list: &[&str]| words.iter().any(|w| list.contains(&w.as_str()));
    if has_any(ENGLISH_WORDS) {
        "en"
    } else if has_any(FRENCH_WORDS) {
        "fr"
    } else if has_any(SPANISH_WORDS) {
        "es"
    } else {
        "en"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        for s in ["  Hello World ", "ПРИВЕТ мир\n", "", "\tÄpfel  und Birnen "] {
            let once = normalize(s);
            assert_eq!(normalize(&once), once);
        }
        assert_eq!(normalize("  Hello World "), "hello world");
    }

    #[test]
    fn tokenize_splits_on_non_alphanumerics() {
        assert_eq!(
            tokenize("Hello, world! Hello-again 42x"),
            vec!["hello", "world", "hello", "again", "42x"]
        );
        assert_eq!(tokenize("Привет, мир!"), vec!["привет", "мир"]);
        assert!(tokenize(" ?! ... ").is_empty());
    }

    #[test]
    fn unique_tokens_keeps_first_occurrence_order() {
        let tokens = tokenize("b a b c a");
        assert_eq!(unique_tokens(&tokens), vec!["b", "a", "c"]);
    }

    #[test]
    fn substitution_respects_token_boundaries() {
        let mut map = HashMap::new();
        map.insert("art".to_string(), "kunst".to_string());
        map.insert("the".to_string(), "die".to_string());
        assert_eq!(
            substitute_tokens("Start the ART, then art.", &map),
            "start die kunst, then kunst."
        );
    }

    #[test]
    fn detects_scripts_and_function_words() {
        assert_eq!(detect_language("Привет мир"), "ru");
        assert_eq!(detect_language("你好世界"), "zh");
        assert_eq!(detect_language("مرحبا بالعالم"), "ar");
        assert_eq!(detect_language("Schöne Grüße"), "de");
        assert_eq!(detect_language("this is a test"), "en");
        assert_eq!(detect_language("le chat est noir"), "fr");
        assert_eq!(detect_language("el perro y una casa"), "es");
        assert_eq!(detect_language("zzz qqq"), "en");
        assert_eq!(detect_language(""), "en");
    }

    #[test]
    fn function_words_match_whole_words_only() {
        // "theory" contains "the" but is not the word "the"; "la" makes it French.
        assert_eq!(detect_language("theory la"), "fr");
    }

    #[test]
    fn sparse_cyrillic_stays_below_script_threshold() {
        assert_eq!(detect_language("Привет мир"), "ru");
        // 6 Cyrillic letters out of 35 characters.
        assert_eq!(detect_language("hello world this is the test привет"), "en");
        assert_eq!(detect_language("مرحبا and the rest is english text"), "en");
    }

    #[test]
    fn detection_only_inspects_prefix() {
        let text = format!("{}{}", "x ".repeat(60), "Привет ".repeat(50));
        assert_eq!(detect_language(&text), "en");
    }
}
