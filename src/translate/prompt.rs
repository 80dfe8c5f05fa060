//! Prompt construction for phrase, fallback and word-batch requests.

use super::languages::LanguageTable;

/// Full instruction prompt used for the backend race.
pub fn translation_prompt(
    languages: &LanguageTable,
    text: &str,
    src_lang: &str,
    tgt_lang: &str,
) -> String {
    let source = languages.display_name(src_lang);
    let target = languages.display_name(tgt_lang);
    format!(
        "You are a professional translator with many years of experience. \
Produce an accurate, natural translation.

SOURCE LANGUAGE: {source}
TARGET LANGUAGE: {target}
TEXT TO TRANSLATE: \"{text}\"

REQUIREMENTS:
- Keep the meaning, style and tone of the original
- Render idioms with natural equivalents
- Follow the grammar of the target language

OUTPUT ONLY THE FINAL TRANSLATION, WITHOUT COMMENTS.

TRANSLATION:"
    )
}

/// Short prompt for the single fallback call.
pub fn fallback_prompt(languages: &LanguageTable, text: &str, src_lang: &str, tgt_lang: &str) -> String {
    format!(
        "Translate from {} to {}: {}",
        languages.display_name(src_lang),
        languages.display_name(tgt_lang),
        text
    )
}

/// Word batch prompt; the reply is expected as space-separated translations in order.
pub fn word_batch_prompt(
    languages: &LanguageTable,
    words: &[String],
    src_lang: &str,
    tgt_lang: &str,
) -> String {
    format!(
        "Translate these words from {} to {}. Output only the translations, \
one per word, separated by spaces, in the same order: {}",
        languages.display_name(src_lang),
        languages.display_name(tgt_lang),
        words.join(" ")
    )
}
