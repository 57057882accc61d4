use crate::lang_pair::LangPair;
use indexmap::IndexMap;
use ndarray::Array2;

/// A collated translation batch, ready for a training or validation step.
///
/// Rows of every 2D field line up: row `i` of `src_tokens`, `target` and
/// `prev_output_tokens` all belong to the example `id[i]`.
///
/// # Example
/// For three examples with source lengths `[5, 3, 2]` and a left-padded source:
/// - `src_tokens` -> shape `[3, 5]`
/// - `src_lengths` -> `[5, 3, 2]`
/// - `target` / `prev_output_tokens` -> shape `[3, max_target_len]`
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationBatch {
    /// Dataset indices of the rows, in row order.
    pub id: Vec<usize>,
    pub nsentences: usize,
    /// Target tokens in the batch (source tokens when there is no target).
    pub ntokens: usize,
    pub src_tokens: Array2<i64>,
    pub src_lengths: Vec<usize>,
    /// Target shifted right with eos moved to the front (decoder input).
    pub prev_output_tokens: Option<Array2<i64>>,
    pub target: Option<Array2<i64>>,
}

impl TranslationBatch {
    /// Returns the number of examples in the batch.
    pub fn batch_size(&self) -> usize {
        self.id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }
}

/// Collated batches for one training step, keyed by language pair.
///
/// Pairs that were not drawn this step are absent and contribute nothing to
/// the step totals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepBatch {
    batches: IndexMap<LangPair, TranslationBatch>,
}

impl StepBatch {
    pub fn insert(&mut self, pair: LangPair, batch: TranslationBatch) {
        self.batches.insert(pair, batch);
    }

    pub fn get(&self, pair: &LangPair) -> Option<&TranslationBatch> {
        self.batches.get(pair)
    }

    /// Iterates `pairs` in the given order, skipping pairs absent this step.
    pub fn present<'a>(
        &'a self,
        pairs: &'a [LangPair],
    ) -> impl Iterator<Item = (&'a LangPair, &'a TranslationBatch)> + 'a {
        pairs
            .iter()
            .filter_map(move |pair| self.get(pair).map(|batch| (pair, batch)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LangPair, &TranslationBatch)> {
        self.batches.iter()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn ntokens(&self) -> usize {
        self.batches.values().map(|batch| batch.ntokens).sum()
    }

    pub fn nsentences(&self) -> usize {
        self.batches.values().map(|batch| batch.nsentences).sum()
    }

    pub fn into_inner(self) -> IndexMap<LangPair, TranslationBatch> {
        self.batches
    }
}
