use crate::error::DataError;
use anyhow::Result;
use std::collections::HashMap;

/// Symbol-to-id capability consumed by collation and augmentation.
///
/// Parsing dictionary files is left to the caller; anything that can answer
/// these questions can drive the pipeline.
pub trait Dictionary: Send + Sync {
    fn pad(&self) -> i64;
    fn eos(&self) -> i64;
    fn bos(&self) -> i64;
    fn unk(&self) -> i64;

    /// Id of `symbol`, or [`unk`](Self::unk) when it is not present.
    fn index(&self, symbol: &str) -> i64;

    /// Adds `symbol` if missing and returns its id.
    fn add_symbol(&mut self, symbol: &str) -> i64;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory dictionary with the usual special-symbol layout:
/// `<s>` = 0, `<pad>` = 1, `</s>` = 2, `<unk>` = 3.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    symbols: Vec<String>,
    indices: HashMap<String, i64>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        let mut vocab = Self {
            symbols: Vec::new(),
            indices: HashMap::new(),
        };
        for special in ["<s>", "<pad>", "</s>", "<unk>"] {
            vocab.add_symbol(special);
        }
        vocab
    }
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a vocabulary with the special symbols followed by `symbols`.
    pub fn from_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocab = Self::default();
        for symbol in symbols {
            vocab.add_symbol(symbol.as_ref());
        }
        vocab
    }

    pub fn symbol(&self, index: i64) -> Option<&str> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.symbols.get(i))
            .map(String::as_str)
    }
}

impl Dictionary for Vocabulary {
    fn pad(&self) -> i64 {
        1
    }

    fn eos(&self) -> i64 {
        2
    }

    fn bos(&self) -> i64 {
        0
    }

    fn unk(&self) -> i64 {
        3
    }

    fn index(&self, symbol: &str) -> i64 {
        self.indices.get(symbol).copied().unwrap_or(self.unk())
    }

    fn add_symbol(&mut self, symbol: &str) -> i64 {
        if let Some(&index) = self.indices.get(symbol) {
            return index;
        }
        let index = self.symbols.len() as i64;
        self.symbols.push(symbol.to_string());
        self.indices.insert(symbol.to_string(), index);
        index
    }

    fn len(&self) -> usize {
        self.symbols.len()
    }
}

/// Symbol used for a language tag, e.g. `__de__`.
pub fn lang_token(lang: &str) -> String {
    format!("__{lang}__")
}

/// Id of the language tag for `lang`; fails if the dictionary lacks it.
pub fn lang_token_index<D: Dictionary + ?Sized>(dictionary: &D, lang: &str) -> Result<i64> {
    let index = dictionary.index(&lang_token(lang));
    if index == dictionary.unk() {
        return Err(DataError::config(format!("cannot find language token for lang {lang}")).into());
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_symbols_come_first() {
        let vocab = Vocabulary::from_symbols(["hello", "world"]);
        assert_eq!(vocab.symbol(vocab.bos()), Some("<s>"));
        assert_eq!(vocab.symbol(vocab.pad()), Some("<pad>"));
        assert_eq!(vocab.symbol(vocab.eos()), Some("</s>"));
        assert_eq!(vocab.symbol(vocab.unk()), Some("<unk>"));
        assert_eq!(vocab.index("hello"), 4);
        assert_eq!(vocab.index("missing"), vocab.unk());
        assert_eq!(vocab.len(), 6);
    }

    #[test]
    fn add_symbol_is_idempotent() {
        let mut vocab = Vocabulary::new();
        let first = vocab.add_symbol("x");
        assert_eq!(vocab.add_symbol("x"), first);
        assert_eq!(vocab.len(), 5);
    }

    #[test]
    fn lang_token_lookup() -> Result<()> {
        let mut vocab = Vocabulary::new();
        let de = vocab.add_symbol(&lang_token("de"));
        assert_eq!(lang_token_index(&vocab, "de")?, de);

        let err = lang_token_index(&vocab, "fr").unwrap_err();
        assert!(err.to_string().contains("cannot find language token for lang fr"));
        Ok(())
    }
}
