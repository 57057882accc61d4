use crate::seed::{effective_seed, stream};
use anyhow::{ensure, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::warn;

/// A `Sampler` defines the strategy for how to iterate and draw items from
/// one or more datasets.
///
/// # Associated type
/// - `Item`: The handle yielded by the iterator
///    - For batch samplers this is a `Vec<usize>` of dataset indices
///    - For multi-corpus policies it is a whole training step
///      ([`StepSample`](crate::policy::StepSample)).
///
/// # Method
/// - `iter(epoch)`: returns the sequence for that epoch. Any randomness is
///   derived from the sampler's base seed and `epoch`, so calling `iter` twice
///   with the same epoch replays the same sequence.
///
/// Implementations must be `Send + Sync` so one sampler can be shared by
/// several workers, each iterating independently.
pub trait Sampler: Send + Sync {
    type Item: Send + Sync;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Self::Item> + Send + '_>;
}

/// ============================================================================
/// Greedily packs an ordered list of indices into batches bounded by a token
/// budget and a sentence budget.
///
/// The cost of a batch is `len(batch) * max(num_tokens)`: every row is padded
/// to the longest example, so padding dominates memory. Indices are consumed
/// in order and never reordered; sort them by length beforehand to get
/// length-bucketed batches.
///
/// When adding the next index would overflow either budget the current batch
/// is closed. If `required_batch_size_multiple > 1` the closed batch is
/// trimmed to `max(m * (len / m), len % m)` and the trimmed tail is carried
/// into the next batch. When the tail plus the next index would itself
/// overflow a budget, the tail is emitted as a batch of its own instead.
///
/// An example whose own cost exceeds `max_tokens` still gets emitted, alone.
///
/// # Arguments:
/// - `indices`: Ordered dataset indices.
/// - `num_tokens`: Token count of an index.
/// - `max_tokens`: Token budget per batch (`None` = unbounded).
/// - `max_sentences`: Sentence budget per batch (`None` = unbounded).
/// - `required_batch_size_multiple`: Preferred batch-length granularity (>= 1).
///
/// # Example
/// ```ignore
/// let num_tokens = [3, 5, 2, 9];
/// let packer = BatchBySize::new(vec![0, 1, 2, 3], move |i| num_tokens[i], Some(10), Some(3), 1)?;
/// let batches: Vec<_> = packer.iter(0).collect();
/// assert_eq!(batches, vec![vec![0, 1], vec![2], vec![3]]);
/// ```
#[derive(Debug, Clone)]
pub struct BatchBySize<F>
where
    F: Fn(usize) -> usize + Send + Sync,
{
    indices: Arc<[usize]>,
    num_tokens: F,
    max_tokens: usize,
    max_sentences: usize,
    size_multiple: usize,
}

impl<F> BatchBySize<F>
where
    F: Fn(usize) -> usize + Send + Sync,
{
    pub fn new(
        indices: Vec<usize>,
        num_tokens: F,
        max_tokens: Option<usize>,
        max_sentences: Option<usize>,
        required_batch_size_multiple: usize,
    ) -> Result<Self> {
        ensure!(
            required_batch_size_multiple > 0,
            "required_batch_size_multiple must be >= 1, but got {}",
            required_batch_size_multiple
        );
        ensure!(
            max_tokens != Some(0),
            "max_tokens must be positive when set"
        );
        ensure!(
            max_sentences != Some(0),
            "max_sentences must be positive when set"
        );
        Ok(Self {
            indices: indices.into(),
            num_tokens,
            max_tokens: max_tokens.unwrap_or(usize::MAX),
            max_sentences: max_sentences.unwrap_or(usize::MAX),
            size_multiple: required_batch_size_multiple,
        })
    }

    /// Number of indices being packed.
    pub fn num_indices(&self) -> usize {
        self.indices.len()
    }
}

/// Convenience constructor mirroring [`BatchBySize::new`].
pub fn batch_by_size<F>(
    indices: Vec<usize>,
    num_tokens_fn: F,
    max_tokens: Option<usize>,
    max_sentences: Option<usize>,
    required_batch_size_multiple: usize,
) -> Result<BatchBySize<F>>
where
    F: Fn(usize) -> usize + Send + Sync,
{
    BatchBySize::new(
        indices,
        num_tokens_fn,
        max_tokens,
        max_sentences,
        required_batch_size_multiple,
    )
}

impl<F> Sampler for BatchBySize<F>
where
    F: Fn(usize) -> usize + Send + Sync,
{
    type Item = Vec<usize>;

    fn iter(&self, _epoch: usize) -> Box<dyn Iterator<Item = Vec<usize>> + Send + '_> {
        Box::new(PackIter {
            packer: self,
            position: 0,
            batch: Vec::new(),
            sample_lens: Vec::new(),
            sample_len: 0,
            pending: None,
        })
    }
}

/// Lazy state of one pass over a [`BatchBySize`].
struct PackIter<'a, F>
where
    F: Fn(usize) -> usize + Send + Sync,
{
    packer: &'a BatchBySize<F>,
    position: usize,
    batch: Vec<usize>,
    // Token counts of `batch` followed by the index being considered.
    sample_lens: Vec<usize>,
    sample_len: usize,
    // Trimmed tail that could not be carried, served before packing resumes.
    pending: Option<Vec<usize>>,
}

impl<F> PackIter<'_, F>
where
    F: Fn(usize) -> usize + Send + Sync,
{
    fn is_batch_full(&self, num_tokens: usize) -> bool {
        if self.batch.is_empty() {
            return false;
        }
        self.batch.len() >= self.packer.max_sentences || num_tokens > self.packer.max_tokens
    }

    /// Whether rows with these token counts fit both budgets together.
    fn fits(&self, lens: &[usize]) -> bool {
        let widest = lens.iter().copied().max().unwrap_or(0);
        lens.len() <= self.packer.max_sentences
            && lens.len().saturating_mul(widest) <= self.packer.max_tokens
    }
}

impl<F> Iterator for PackIter<'_, F>
where
    F: Fn(usize) -> usize + Send + Sync,
{
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if let Some(tail) = self.pending.take() {
            return Some(tail);
        }
        while let Some(&index) = self.packer.indices.get(self.position) {
            self.position += 1;

            let tokens = (self.packer.num_tokens)(index);
            if tokens > self.packer.max_tokens {
                warn!(
                    index,
                    num_tokens = tokens,
                    max_tokens = self.packer.max_tokens,
                    "example exceeds max_tokens and is batched alone"
                );
            }
            self.sample_lens.push(tokens);
            self.sample_len = self.sample_len.max(tokens);

            let cost = (self.batch.len() + 1).saturating_mul(self.sample_len);
            let mut closed = None;
            if self.is_batch_full(cost) {
                let multiple = self.packer.size_multiple;
                let len = self.batch.len();
                let keep = (multiple * (len / multiple)).max(len % multiple);

                let carried = self.batch.split_off(keep);
                closed = Some(std::mem::take(&mut self.batch));
                // Now the token counts of `carried` followed by this index.
                self.sample_lens.drain(..keep);
                if carried.is_empty() || self.fits(&self.sample_lens) {
                    self.batch = carried;
                } else {
                    self.sample_lens.drain(..carried.len());
                    self.pending = Some(carried);
                }
                self.sample_len = self.sample_lens.iter().copied().max().unwrap_or(0);
            }
            self.batch.push(index);

            if closed.is_some() {
                return closed;
            }
        }

        if self.batch.is_empty() {
            None
        } else {
            self.sample_lens.clear();
            self.sample_len = 0;
            Some(std::mem::take(&mut self.batch))
        }
    }
}

/// ============================================================================
/// Replays a fixed list of batches, optionally in a fresh order each epoch.
///
/// Batches are usually precomputed once with [`BatchBySize`]; this sampler
/// then serves them epoch after epoch. With `shuffle = true` the order is a
/// deterministic permutation derived from `base_seed` and the epoch.
///
/// # Example
/// ```ignore
/// let batches: Vec<Vec<usize>> = packer.iter(0).collect();
/// let sampler = EpochBatchSampler::new(batches, true, 42);
/// let epoch1: Vec<_> = sampler.iter(1).collect();
/// ```
#[derive(Debug, Clone)]
pub struct EpochBatchSampler {
    batches: Arc<[Vec<usize>]>,
    shuffle: bool,
    base_seed: u64,
}

impl EpochBatchSampler {
    pub fn new(batches: Vec<Vec<usize>>, shuffle: bool, base_seed: u64) -> Self {
        Self {
            batches: batches.into(),
            shuffle,
            base_seed,
        }
    }

    /// Number of batches served per epoch.
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total number of indices across all batches.
    pub fn num_examples(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }
}

impl Sampler for EpochBatchSampler {
    type Item = Vec<usize>;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = Vec<usize>> + Send + '_> {
        let mut order: Vec<usize> = (0..self.batches.len()).collect();
        if self.shuffle {
            let seed = effective_seed(self.base_seed, &[epoch as u64, stream::BATCH_ORDER]);
            let mut rng = StdRng::seed_from_u64(seed);
            order.shuffle(&mut rng);
        }
        Box::new(order.into_iter().map(move |i| self.batches[i].clone()))
    }
}

/// ============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const TEST_SEED: u64 = 42;

    mod batch_by_size_tests {
        use super::*;

        fn pack(
            num_tokens: &[usize],
            max_tokens: Option<usize>,
            max_sentences: Option<usize>,
            multiple: usize,
        ) -> Vec<Vec<usize>> {
            let lens = num_tokens.to_vec();
            let indices = (0..lens.len()).collect();
            BatchBySize::new(indices, move |i| lens[i], max_tokens, max_sentences, multiple)
                .unwrap()
                .iter(0)
                .collect()
        }

        #[test]
        fn validates_parameters() {
            assert!(BatchBySize::new(vec![0], |_| 1, Some(10), Some(1), 0).is_err());
            assert!(BatchBySize::new(vec![0], |_| 1, Some(0), None, 1).is_err());
            assert!(BatchBySize::new(vec![0], |_| 1, None, Some(0), 1).is_err());
            assert!(BatchBySize::new(vec![0], |_| 1, None, None, 1).is_ok());
        }

        #[test]
        fn packs_by_padded_cost() {
            // [0, 1] costs max(3, 5) * 2 = 10; adding index 2 would cost 15.
            let batches = pack(&[3, 5, 2, 9], Some(10), Some(3), 1);
            assert_eq!(batches, vec![vec![0, 1], vec![2], vec![3]]);
        }

        #[test]
        fn respects_max_sentences() {
            let batches = pack(&[1; 7], None, Some(3), 1);
            assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
        }

        #[test]
        fn oversized_example_is_emitted_alone() {
            let batches = pack(&[2, 2, 50, 2, 2], Some(10), None, 1);
            assert_eq!(batches, vec![vec![0, 1], vec![2], vec![3, 4]]);

            let first = pack(&[50, 1], Some(10), None, 1);
            assert_eq!(first, vec![vec![0], vec![1]]);
        }

        #[test]
        fn closes_on_a_size_multiple_and_carries_the_rest() {
            // Sentence budget 7 with multiple 4: close at 4 and carry 3 forward.
            let batches = pack(&[1; 10], None, Some(7), 4);
            assert_eq!(batches, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7, 8, 9]]);
        }

        #[test]
        fn uncarriable_tail_ships_alone() {
            // [0..5] closes when the wide index 5 arrives. The tail [4] plus 5
            // would cost 2 * 10 > 10, so [0..4] keeps the multiple and [4]
            // goes out by itself.
            let batches = pack(&[1, 1, 1, 1, 1, 10], Some(10), None, 4);
            assert_eq!(batches, vec![vec![0, 1, 2, 3], vec![4], vec![5]]);
        }

        #[test]
        fn middle_batches_are_multiples_when_possible() {
            let lens: Vec<usize> = (0..400).map(|i| 1 + (i * 29 + i / 3) % 31).collect();
            for (max_tokens, max_sentences, multiple) in [(64, 16, 4), (90, 12, 8), (40, 100, 2)] {
                let batches = pack(&lens, Some(max_tokens), Some(max_sentences), multiple);
                let flat: Vec<usize> = batches.iter().flatten().copied().collect();
                assert_eq!(flat, (0..lens.len()).collect::<Vec<_>>());
                // Every batch but the last is a multiple, or shorter than one.
                let (_, closed) = batches.split_last().unwrap();
                for batch in closed {
                    assert!(batch.len() % multiple == 0 || batch.len() < multiple, "{batch:?}");
                }
            }
        }

        #[test]
        fn short_batches_are_kept_whole_when_below_the_multiple() {
            // Token budget only admits two rows; 2 < multiple, so nothing is carried.
            let batches = pack(&[5; 5], Some(10), None, 8);
            assert_eq!(batches, vec![vec![0, 1], vec![2, 3], vec![4]]);
        }

        #[test]
        fn concatenation_equals_input() {
            let lens: Vec<usize> = (0..200).map(|i| 1 + (i * 37) % 23).collect();
            for (max_tokens, max_sentences, multiple) in
                [(64, 8, 1), (64, 8, 4), (30, 100, 2), (1_000, 3, 1), (10, 10, 8)]
            {
                let batches = pack(&lens, Some(max_tokens), Some(max_sentences), multiple);
                let flat: Vec<usize> = batches.iter().flatten().copied().collect();
                assert_eq!(flat, (0..lens.len()).collect::<Vec<_>>());
                assert!(batches.iter().all(|b| !b.is_empty()));
            }
        }

        #[test]
        fn batches_stay_within_budgets() {
            let lens: Vec<usize> = (0..300).map(|i| 1 + (i * 13) % 40).collect();
            let (max_tokens, max_sentences) = (120, 16);
            for multiple in [1, 2, 8] {
                for batch in pack(&lens, Some(max_tokens), Some(max_sentences), multiple) {
                    assert!(batch.len() <= max_sentences);
                    let widest = batch.iter().map(|&i| lens[i]).max().unwrap();
                    assert!(batch.len() == 1 || widest * batch.len() <= max_tokens);
                }
            }
        }

        #[test]
        fn iteration_is_restartable_and_deterministic() {
            let lens: Vec<usize> = (0..50).map(|i| 1 + i % 7).collect();
            let packer = BatchBySize::new((0..50).collect(), move |i| lens[i], Some(20), Some(5), 2).unwrap();
            let first: Vec<_> = packer.iter(0).collect();
            let second: Vec<_> = packer.iter(3).collect();
            assert_eq!(first, second);
        }

        #[test]
        fn empty_input_yields_nothing() {
            assert!(pack(&[], Some(10), Some(2), 1).is_empty());
        }
    }

    mod epoch_batch_sampler_tests {
        use super::*;

        fn batches() -> Vec<Vec<usize>> {
            (0..20).map(|i| vec![2 * i, 2 * i + 1]).collect()
        }

        #[test]
        fn unshuffled_keeps_order() {
            let sampler = EpochBatchSampler::new(batches(), false, TEST_SEED);
            assert_eq!(sampler.iter(5).collect::<Vec<_>>(), batches());
            assert_eq!(sampler.len(), 20);
            assert_eq!(sampler.num_examples(), 40);
        }

        #[test]
        fn shuffles_deterministically_per_epoch() {
            let sampler = EpochBatchSampler::new(batches(), true, TEST_SEED);
            let epoch1: Vec<_> = sampler.iter(1).collect();
            assert_eq!(epoch1, sampler.iter(1).collect::<Vec<_>>());
            assert_ne!(epoch1, sampler.iter(2).collect::<Vec<_>>());

            let seen: HashSet<Vec<usize>> = epoch1.into_iter().collect();
            assert_eq!(seen, batches().into_iter().collect());
        }
    }
}
