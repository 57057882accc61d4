//! Data-selection filters that drop a share of the training indices.
//!
//! Two random filters ([`filter_random`], [`filter_random_by_length`]) and
//! one score-driven filter ([`filter_by_score`]) whose scores come from a
//! caller-supplied callback. All return the surviving indices sorted
//! ascending.

use crate::sampler::{BatchBySize, Sampler};
use anyhow::{ensure, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Token budget of the batches handed to the scorer.
pub const SCORE_MAX_TOKENS: usize = 4800;
/// Sentence budget of the batches handed to the scorer.
pub const SCORE_MAX_SENTENCES: usize = 100;
/// Length buckets used by [`filter_random_by_length`].
pub const LENGTH_BINS: usize = 50;

fn check_percentage(percentage: f64) -> Result<()> {
    ensure!(
        (0.0..=1.0).contains(&percentage),
        "filter percentage must be in [0, 1], got {}",
        percentage
    );
    Ok(())
}

fn dropped_count(len: usize, percentage: f64) -> usize {
    ((len as f64 * percentage) as usize).min(len)
}

/// Shuffles `indices` and drops the first `percentage` share.
pub fn filter_random<R: Rng + ?Sized>(indices: &[usize], percentage: f64, rng: &mut R) -> Result<Vec<usize>> {
    check_percentage(percentage)?;
    let mut shuffled = indices.to_vec();
    shuffled.shuffle(rng);
    let mut kept = shuffled.split_off(dropped_count(shuffled.len(), percentage));
    kept.sort_unstable();
    info!(original = indices.len(), filtered = kept.len(), "random data filter");
    Ok(kept)
}

/// Splits length-ordered `indices` into [`LENGTH_BINS`] consecutive bins and
/// drops a random `percentage` share inside each bin, so every length range
/// loses the same proportion.
pub fn filter_random_by_length<R: Rng + ?Sized>(
    indices: &[usize],
    percentage: f64,
    rng: &mut R,
) -> Result<Vec<usize>> {
    check_percentage(percentage)?;
    let interval = (indices.len() / LENGTH_BINS).max(1);
    let mut kept = Vec::with_capacity(indices.len());
    for bin in indices.chunks(interval) {
        let mut bin = bin.to_vec();
        bin.shuffle(rng);
        let skip = dropped_count(bin.len(), percentage);
        kept.extend_from_slice(&bin[skip..]);
    }
    kept.sort_unstable();
    info!(original = indices.len(), filtered = kept.len(), "random data filter by length");
    Ok(kept)
}

/// Scores every index and drops the lowest-scoring `percentage` share.
///
/// Indices are packed in order with [`SCORE_MAX_TOKENS`] and
/// [`SCORE_MAX_SENTENCES`]; `scorer` receives each batch and must return one
/// score per index, in batch order.
pub fn filter_by_score<F, S>(
    indices: &[usize],
    num_tokens: F,
    mut scorer: S,
    percentage: f64,
) -> Result<Vec<usize>>
where
    F: Fn(usize) -> usize + Send + Sync,
    S: FnMut(&[usize]) -> Result<Vec<f64>>,
{
    check_percentage(percentage)?;
    let packer = BatchBySize::new(
        indices.to_vec(),
        num_tokens,
        Some(SCORE_MAX_TOKENS),
        Some(SCORE_MAX_SENTENCES),
        1,
    )?;

    let mut scored: Vec<(usize, f64)> = Vec::with_capacity(indices.len());
    for batch in packer.iter(0) {
        let scores = scorer(&batch)?;
        ensure!(
            scores.len() == batch.len(),
            "scorer returned {} scores for a batch of {}",
            scores.len(),
            batch.len()
        );
        scored.extend(batch.into_iter().zip(scores));
    }

    scored.sort_by(|a, b| a.1.total_cmp(&b.1));
    let skip = dropped_count(scored.len(), percentage);
    let mut kept: Vec<usize> = scored[skip..].iter().map(|&(index, _)| index).collect();
    kept.sort_unstable();
    info!(original = indices.len(), filtered = kept.len(), "score data filter");
    Ok(kept)
}

/// Random filter applied to the training split during task setup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RandomFilter {
    Uniform { percentage: f64 },
    ByLength { percentage: f64 },
}

impl RandomFilter {
    pub fn percentage(&self) -> f64 {
        match *self {
            RandomFilter::Uniform { percentage } | RandomFilter::ByLength { percentage } => percentage,
        }
    }

    pub fn apply<R: Rng + ?Sized>(&self, indices: &[usize], rng: &mut R) -> Result<Vec<usize>> {
        match *self {
            RandomFilter::Uniform { percentage } => filter_random(indices, percentage, rng),
            RandomFilter::ByLength { percentage } => filter_random_by_length(indices, percentage, rng),
        }
    }
}
