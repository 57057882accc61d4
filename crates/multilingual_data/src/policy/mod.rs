//! Multi-corpus sampling policies.
//!
//! A policy decides, for every training step, which language pairs contribute
//! a batch. All policies share one contract: they are [`Sampler`]s whose items
//! are [`StepSample`]s, and their per-epoch state (draw probabilities,
//! selection counters, stream positions) is built inside `iter(epoch)` and
//! dropped with the iterator. Nothing carries over between epochs.
//!
//! ```text
//!   en-de batches ─┐
//!   en-fr batches ─┼─> SamplingPolicy ─> StepSample { pair -> batch, ... }
//!   de-fr batches ─┘
//! ```
//!
//! - [`RoundRobinZip`]: every pair advances one batch per step.
//! - [`FrequencyWeighted`]: one pair per step, drawn by tempered corpus size.
//! - [`DistanceWeighted`]: one pair per step, drawn by corpus size and
//!   language distance.

mod round_robin;
mod weighted;

pub use round_robin::RoundRobinZip;
pub use weighted::{normalize_lang_distances, DistanceWeighted, FrequencyWeighted};

use crate::lang_pair::LangPair;
use crate::sampler::{EpochBatchSampler, Sampler};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Which policy a task builds for its training split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    RoundRobin,
    #[serde(rename = "multi")]
    FrequencyWeighted,
    #[serde(rename = "tcs")]
    DistanceWeighted,
}

/// Batches chosen for one training step, keyed by language pair.
///
/// A pair that did not contribute this step is simply absent; consumers skip
/// it and it adds nothing to the step's totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepSample {
    batches: IndexMap<LangPair, Vec<usize>>,
}

impl StepSample {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(pair: LangPair, batch: Vec<usize>) -> Self {
        let mut sample = Self::new();
        sample.insert(pair, batch);
        sample
    }

    pub fn insert(&mut self, pair: LangPair, batch: Vec<usize>) {
        self.batches.insert(pair, batch);
    }

    pub fn get(&self, pair: &LangPair) -> Option<&[usize]> {
        self.batches.get(pair).map(Vec::as_slice)
    }

    pub fn contains(&self, pair: &LangPair) -> bool {
        self.batches.contains_key(pair)
    }

    /// Iterates `pairs` in the given order, skipping pairs absent this step.
    pub fn present<'a>(
        &'a self,
        pairs: &'a [LangPair],
    ) -> impl Iterator<Item = (&'a LangPair, &'a [usize])> + 'a {
        pairs
            .iter()
            .filter_map(move |pair| self.get(pair).map(|batch| (pair, batch)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LangPair, &[usize])> {
        self.batches.iter().map(|(pair, batch)| (pair, batch.as_slice()))
    }

    /// Number of pairs that contributed.
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Examples across all contributing pairs.
    pub fn nsentences(&self) -> usize {
        self.batches.values().map(Vec::len).sum()
    }

    pub fn into_inner(self) -> IndexMap<LangPair, Vec<usize>> {
        self.batches
    }
}

/// Shared contract of the multi-corpus policies.
pub trait SamplingPolicy: Sampler<Item = StepSample> {
    fn kind(&self) -> PolicyKind;

    /// Language pairs this policy can emit, in configured order.
    fn lang_pairs(&self) -> Vec<LangPair>;

    /// Steps yielded by one call to `iter(epoch)`.
    fn steps_per_epoch(&self) -> usize;
}

/// A batch stream that restarts from the top of the same epoch when it runs
/// out, so a short corpus keeps pace with a long one.
pub(crate) struct CyclingStream<'a> {
    sampler: &'a EpochBatchSampler,
    epoch: usize,
    current: Box<dyn Iterator<Item = Vec<usize>> + Send + 'a>,
}

impl<'a> CyclingStream<'a> {
    pub(crate) fn new(sampler: &'a EpochBatchSampler, epoch: usize) -> Self {
        Self {
            sampler,
            epoch,
            current: sampler.iter(epoch),
        }
    }
}

impl Iterator for CyclingStream<'_> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if let Some(batch) = self.current.next() {
            return Some(batch);
        }
        if self.sampler.is_empty() {
            return None;
        }
        self.current = self.sampler.iter(self.epoch);
        self.current.next()
    }
}
