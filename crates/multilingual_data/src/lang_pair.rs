use crate::error::DataError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered (source, target) language pair, written `src-tgt`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LangPair {
    pub source: String,
    pub target: String,
}

impl LangPair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl fmt::Display for LangPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.target)
    }
}

impl FromStr for LangPair {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split('-').collect::<Vec<_>>().as_slice() {
            [source, target] if !source.is_empty() && !target.is_empty() => {
                Ok(LangPair::new(*source, *target))
            }
            _ => Err(DataError::config(format!(
                "invalid language pair '{s}', expected the form src-tgt"
            ))),
        }
    }
}

impl TryFrom<String> for LangPair {
    type Error = DataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LangPair> for String {
    fn from(pair: LangPair) -> Self {
        pair.to_string()
    }
}

/// Parses a comma-separated list such as `en-de,en-fr,de-fr`.
pub fn parse_lang_pairs(list: &str) -> Result<Vec<LangPair>, DataError> {
    list.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect()
}
