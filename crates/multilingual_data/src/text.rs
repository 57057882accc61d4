use crate::lang_pair::LangPair;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Sentencepiece word-boundary marker.
pub const SENTENCEPIECE_MARKER: char = '\u{2581}';

/// Removes subword markers from a decoded sentence.
///
/// - `"sentencepiece"`: all spaces are dropped, `▁` becomes a space and the
///   result is trimmed.
/// - any other symbol is removed verbatim from the sentence with a space
///   appended, then trailing whitespace is trimmed. Subword-nmt output is
///   therefore decoded with the joiner and its space, `"@@ "`
///   (`"he@@ llo"` -> `"hello"`); a bare `"@@"` only deletes the marker.
/// - `None` returns the sentence unchanged.
pub fn process_bpe_symbol(sentence: &str, bpe_symbol: Option<&str>) -> String {
    match bpe_symbol {
        Some("sentencepiece") => sentence
            .replace(' ', "")
            .replace(SENTENCEPIECE_MARKER, " ")
            .trim()
            .to_string(),
        Some(symbol) => format!("{sentence} ").replace(symbol, "").trim_end().to_string(),
        None => sentence.to_string(),
    }
}

/// Infers the language pair from file names shaped `<split>.<src>-<tgt>.<...>`
/// in `dir`. Returns the first match, or `None` when no file fits.
pub fn infer_language_pair(dir: impl AsRef<Path>) -> Result<Option<LangPair>> {
    let dir = dir.as_ref();
    let mut names: Vec<String> = fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    // read_dir order is platform dependent.
    names.sort();

    Ok(names.iter().find_map(|name| {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() < 3 {
            return None;
        }
        parts[1].parse::<LangPair>().ok()
    }))
}
