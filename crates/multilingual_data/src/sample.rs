/// A single parallel-corpus example: source tokens and, outside of inference,
/// the target tokens.
///
/// Both sequences are expected to end with the dictionary's eos id; the
/// collator relies on that when it shifts the target to build decoder inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationSample {
    /// Position of this example in its dataset.
    pub id: usize,
    pub source: Vec<i64>,
    pub target: Option<Vec<i64>>,
}

impl TranslationSample {
    pub fn new(id: usize, source: Vec<i64>, target: Option<Vec<i64>>) -> Self {
        Self { id, source, target }
    }

    pub fn source_len(&self) -> usize {
        self.source.len()
    }

    pub fn target_len(&self) -> Option<usize> {
        self.target.as_ref().map(Vec::len)
    }
}
