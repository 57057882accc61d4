use crate::sample::TranslationSample;
use crate::size::Size;
use anyhow::{ensure, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;

/// Capability the batching engine needs from a dataset.
///
/// The pipeline never looks inside examples; it only asks how large they are.
/// Implementations must be `Send + Sync` so one read-only dataset can be
/// shared by every worker that iterates over it.
pub trait TokenDataset: Send + Sync {
    /// Number of examples.
    fn len(&self) -> usize;

    /// Size used for max-position filtering.
    fn size(&self, index: usize) -> Size;

    /// Token count used as the packing cost of one example.
    fn num_tokens(&self, index: usize) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Source/target token sequences for one language pair, held in memory.
///
/// Sequences are stored behind `Arc<[...]>`, so cloning the dataset only
/// bumps reference counts.
#[derive(Debug, Clone)]
pub struct LanguagePairDataset {
    source: Arc<[Vec<i64>]>,
    target: Option<Arc<[Vec<i64>]>>,
}

impl LanguagePairDataset {
    /// Builds a dataset; `target` must be as long as `source` when present.
    pub fn new(source: Vec<Vec<i64>>, target: Option<Vec<Vec<i64>>>) -> Result<Self> {
        if let Some(target) = &target {
            ensure!(
                target.len() == source.len(),
                "Source and target lengths differ: {} vs {}",
                source.len(),
                target.len()
            );
        }
        Ok(Self {
            source: source.into(),
            target: target.map(Into::into),
        })
    }

    pub fn source_len(&self, index: usize) -> usize {
        self.source[index].len()
    }

    pub fn target_len(&self, index: usize) -> Option<usize> {
        self.target.as_ref().map(|target| target[index].len())
    }

    /// Returns the example at `index`, or `None` if out of bounds.
    pub fn get(&self, index: usize) -> Option<TranslationSample> {
        let source = self.source.get(index)?.clone();
        let target = match &self.target {
            Some(target) => Some(target.get(index)?.clone()),
            None => None,
        };
        Some(TranslationSample::new(index, source, target))
    }

    /// Indices in batching order: an optional random permutation followed by a
    /// stable sort on target length, then source length.
    ///
    /// The stable sort keeps the permutation as a tie-breaker, so a shuffled
    /// epoch still buckets similar lengths together.
    pub fn ordered_indices<R: Rng + ?Sized>(&self, shuffle: Option<&mut R>) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.source.len()).collect();
        if let Some(rng) = shuffle {
            indices.shuffle(rng);
        }
        if self.target.is_some() {
            indices.sort_by_key(|&i| self.target_len(i).unwrap_or(0));
        }
        indices.sort_by_key(|&i| self.source_len(i));
        indices
    }
}

impl TokenDataset for LanguagePairDataset {
    fn len(&self) -> usize {
        self.source.len()
    }

    fn size(&self, index: usize) -> Size {
        Size::pair(self.source_len(index), self.target_len(index))
    }

    fn num_tokens(&self, index: usize) -> usize {
        self.source_len(index)
            .max(self.target_len(index).unwrap_or(0))
    }
}
