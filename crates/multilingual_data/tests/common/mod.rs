#![allow(dead_code)]

use indexmap::IndexMap;
use multilingual_data::{LangPair, LanguagePairDataset, Vocabulary};

pub const EOS: i64 = 2;

/// Eos-terminated sequence of `len` tokens.
pub fn sequence(len: usize, first: i64) -> Vec<i64> {
    let mut tokens: Vec<i64> = (0..len.saturating_sub(1) as i64).map(|t| first + t).collect();
    tokens.push(EOS);
    tokens
}

/// Parallel corpus of `n` examples with varied lengths.
pub fn corpus(n: usize, salt: usize) -> LanguagePairDataset {
    let source = (0..n).map(|i| sequence(1 + (i * 7 + salt) % 11, 4)).collect();
    let target = (0..n).map(|i| sequence(1 + (i * 5 + salt) % 9, 4)).collect();
    LanguagePairDataset::new(source, Some(target)).expect("aligned corpus")
}

pub fn corpora(pairs: &[(&str, usize)]) -> IndexMap<LangPair, LanguagePairDataset> {
    pairs
        .iter()
        .enumerate()
        .map(|(salt, &(pair, n))| (pair.parse().expect("valid pair"), corpus(n, salt)))
        .collect()
}

pub fn dictionaries(langs: &[&str]) -> IndexMap<String, Vocabulary> {
    langs
        .iter()
        .map(|lang| {
            let vocab = Vocabulary::from_symbols((0..32).map(|i| format!("{lang}_{i}")));
            (lang.to_string(), vocab)
        })
        .collect()
}

/// Installs a test subscriber once so `RUST_LOG` shows library logs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
