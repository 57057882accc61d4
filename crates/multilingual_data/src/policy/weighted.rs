use super::{CyclingStream, PolicyKind, SamplingPolicy, StepSample};
use crate::error::DataError;
use crate::lang_pair::LangPair;
use crate::sampler::{EpochBatchSampler, Sampler};
use crate::seed::{effective_seed, stream};
use anyhow::Result;
use indexmap::IndexMap;
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

/// Draws one language pair per step with probability shaped by corpus size.
///
/// With `q_i` the share of examples held by pair `i`, the distribution is
/// tempered to `t_i ∝ q_i^(1 / datasize_t)` and then flattened to
/// `p_i ∝ t_i^(1 - alpha_p)`. `datasize_t = 1, alpha_p = 0` samples in
/// proportion to size; `alpha_p = 1` is uniform over non-empty pairs.
/// Empty pairs are never drawn.
pub struct FrequencyWeighted {
    streams: IndexMap<LangPair, EpochBatchSampler>,
    datasize_t: f64,
    alpha_p: f64,
    seed: u64,
}

impl FrequencyWeighted {
    pub fn new(
        streams: IndexMap<LangPair, EpochBatchSampler>,
        datasize_t: f64,
        alpha_p: f64,
        seed: u64,
    ) -> Result<Self> {
        check_streams(&streams)?;
        if !(datasize_t.is_finite() && datasize_t > 0.0) {
            return Err(DataError::config(format!("datasize_t must be > 0, got {datasize_t}")).into());
        }
        if !(0.0..=1.0).contains(&alpha_p) {
            return Err(DataError::config(format!("alpha_p must be in [0, 1], got {alpha_p}")).into());
        }
        Ok(Self {
            streams,
            datasize_t,
            alpha_p,
            seed,
        })
    }

    /// Per-pair draw probabilities, in configured pair order.
    pub fn probabilities(&self) -> Vec<f64> {
        let weights: Vec<f64> = size_shares(&self.streams)
            .into_iter()
            .map(|q| {
                if q == 0.0 {
                    0.0
                } else {
                    q.powf(1.0 / self.datasize_t).powf(1.0 - self.alpha_p)
                }
            })
            .collect();
        normalize(weights)
    }
}

impl Sampler for FrequencyWeighted {
    type Item = StepSample;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = StepSample> + Send + '_> {
        weighted_steps(&self.streams, self.probabilities(), self.seed, epoch)
    }
}

impl SamplingPolicy for FrequencyWeighted {
    fn kind(&self) -> PolicyKind {
        PolicyKind::FrequencyWeighted
    }

    fn lang_pairs(&self) -> Vec<LangPair> {
        self.streams.keys().cloned().collect()
    }

    fn steps_per_epoch(&self) -> usize {
        total_batches(&self.streams)
    }
}

/// Like [`FrequencyWeighted`] but the size share of each pair is scaled by
/// its language distance raised to `data_condition`:
/// `p_i ∝ q_i * d_i^data_condition`.
///
/// Distances are expected normalized to sum to one, see
/// [`normalize_lang_distances`]. A positive `data_condition` favours distant
/// pairs, a negative one favours close pairs, zero ignores distance.
pub struct DistanceWeighted {
    streams: IndexMap<LangPair, EpochBatchSampler>,
    distances: Vec<f64>,
    data_condition: f64,
    seed: u64,
}

impl DistanceWeighted {
    pub fn new(
        streams: IndexMap<LangPair, EpochBatchSampler>,
        distances: Vec<f64>,
        data_condition: f64,
        seed: u64,
    ) -> Result<Self> {
        check_streams(&streams)?;
        if distances.len() != streams.len() {
            return Err(DataError::config(format!(
                "got {} language distances for {} language pairs",
                distances.len(),
                streams.len()
            ))
            .into());
        }
        if let Some(bad) = distances.iter().find(|d| !(d.is_finite() && **d > 0.0)) {
            return Err(DataError::config(format!("language distances must be positive, got {bad}")).into());
        }
        if !data_condition.is_finite() {
            return Err(DataError::config("data_condition must be finite").into());
        }
        Ok(Self {
            streams,
            distances,
            data_condition,
            seed,
        })
    }

    pub fn probabilities(&self) -> Vec<f64> {
        let weights = size_shares(&self.streams)
            .into_iter()
            .zip(&self.distances)
            .map(|(q, d)| q * d.powf(self.data_condition))
            .collect();
        normalize(weights)
    }
}

impl Sampler for DistanceWeighted {
    type Item = StepSample;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = StepSample> + Send + '_> {
        weighted_steps(&self.streams, self.probabilities(), self.seed, epoch)
    }
}

impl SamplingPolicy for DistanceWeighted {
    fn kind(&self) -> PolicyKind {
        PolicyKind::DistanceWeighted
    }

    fn lang_pairs(&self) -> Vec<LangPair> {
        self.streams.keys().cloned().collect()
    }

    fn steps_per_epoch(&self) -> usize {
        total_batches(&self.streams)
    }
}

/// Turns raw language distances into weights `exp(t / 1000)`, normalized to sum to one.
pub fn normalize_lang_distances(raw: &[f64]) -> Result<Vec<f64>> {
    if raw.is_empty() {
        return Err(DataError::config("lan_dists must not be empty").into());
    }
    let weights: Vec<f64> = raw.iter().map(|t| (t / 1000.0).exp()).collect();
    let total: f64 = weights.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return Err(DataError::config(format!("lan_dists {raw:?} cannot be normalized")).into());
    }
    Ok(weights.into_iter().map(|w| w / total).collect())
}

fn check_streams(streams: &IndexMap<LangPair, EpochBatchSampler>) -> Result<()> {
    if streams.is_empty() {
        return Err(DataError::config("sampling policy needs at least one language pair").into());
    }
    Ok(())
}

fn total_batches(streams: &IndexMap<LangPair, EpochBatchSampler>) -> usize {
    streams.values().map(EpochBatchSampler::len).sum()
}

fn size_shares(streams: &IndexMap<LangPair, EpochBatchSampler>) -> Vec<f64> {
    let sizes: Vec<f64> = streams.values().map(|s| s.num_examples() as f64).collect();
    let total: f64 = sizes.iter().sum();
    if total == 0.0 {
        return vec![0.0; sizes.len()];
    }
    sizes.into_iter().map(|n| n / total).collect()
}

fn normalize(weights: Vec<f64>) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    if total == 0.0 {
        return weights;
    }
    weights.into_iter().map(|w| w / total).collect()
}

/// One epoch of weighted draws: `total_batches` steps, each a single pair.
fn weighted_steps<'a>(
    streams: &'a IndexMap<LangPair, EpochBatchSampler>,
    probabilities: Vec<f64>,
    seed: u64,
    epoch: usize,
) -> Box<dyn Iterator<Item = StepSample> + Send + 'a> {
    let steps = total_batches(streams);
    if steps == 0 {
        return Box::new(std::iter::empty());
    }
    let dist = match WeightedIndex::new(&probabilities) {
        Ok(dist) => dist,
        Err(err) => {
            warn!(?probabilities, %err, "cannot build sampling distribution, epoch is empty");
            return Box::new(std::iter::empty());
        }
    };
    debug!(epoch, ?probabilities, "sampling distribution");

    Box::new(WeightedSteps {
        pairs: streams.keys().collect(),
        cursors: streams
            .values()
            .map(|stream| CyclingStream::new(stream, epoch))
            .collect(),
        dist,
        rng: StdRng::seed_from_u64(effective_seed(seed, &[epoch as u64, stream::PAIR_DRAW])),
        selected: vec![0; streams.len()],
        remaining: steps,
        epoch,
    })
}

struct WeightedSteps<'a> {
    pairs: Vec<&'a LangPair>,
    cursors: Vec<CyclingStream<'a>>,
    dist: WeightedIndex<f64>,
    rng: StdRng,
    selected: Vec<usize>,
    remaining: usize,
    epoch: usize,
}

impl Iterator for WeightedSteps<'_> {
    type Item = StepSample;

    fn next(&mut self) -> Option<StepSample> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let chosen = self.dist.sample(&mut self.rng);
        self.selected[chosen] += 1;
        let batch = self.cursors[chosen].next()?;

        if self.remaining == 0 {
            debug!(epoch = self.epoch, selected = ?self.selected, "sampling counters at epoch end");
        }
        Some(StepSample::single(self.pairs[chosen].clone(), batch))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::test_utils::make_streams;

    const TEST_SEED: u64 = 42;

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{actual:?} != {expected:?}");
        }
    }

    /// Fraction of steps that went to each pair.
    fn draw_shares(policy: &dyn SamplingPolicy, epoch: usize) -> Vec<f64> {
        let pairs = policy.lang_pairs();
        let mut counts = vec![0usize; pairs.len()];
        let mut steps = 0;
        for step in policy.iter(epoch) {
            assert_eq!(step.len(), 1);
            for (i, pair) in pairs.iter().enumerate() {
                if step.contains(pair) {
                    counts[i] += 1;
                }
            }
            steps += 1;
        }
        counts.into_iter().map(|c| c as f64 / steps as f64).collect()
    }

    mod frequency_weighted_tests {
        use super::*;

        #[test]
        fn proportional_at_unit_temperature() {
            let policy =
                FrequencyWeighted::new(make_streams(&[("en-de", 100), ("en-fr", 900)]), 1.0, 0.0, TEST_SEED)
                    .unwrap();
            assert_close(&policy.probabilities(), &[0.1, 0.9]);
        }

        #[test]
        fn temperature_flattens_distribution() {
            let policy =
                FrequencyWeighted::new(make_streams(&[("en-de", 100), ("en-fr", 900)]), 2.0, 0.0, TEST_SEED)
                    .unwrap();
            let (a, b) = (0.1f64.sqrt(), 0.9f64.sqrt());
            assert_close(&policy.probabilities(), &[a / (a + b), b / (a + b)]);
        }

        #[test]
        fn alpha_one_is_uniform_over_non_empty_pairs() {
            let policy = FrequencyWeighted::new(
                make_streams(&[("en-de", 10), ("en-fr", 990), ("de-fr", 0)]),
                1.0,
                1.0,
                TEST_SEED,
            )
            .unwrap();
            assert_close(&policy.probabilities(), &[0.5, 0.5, 0.0]);
        }

        #[test]
        fn runs_for_total_batches_and_replays_per_epoch() {
            let policy =
                FrequencyWeighted::new(make_streams(&[("en-de", 30), ("en-fr", 70)]), 1.0, 0.0, TEST_SEED)
                    .unwrap();
            assert_eq!(policy.steps_per_epoch(), 100);

            let first: Vec<_> = policy.iter(1).collect();
            assert_eq!(first.len(), 100);
            assert_eq!(first, policy.iter(1).collect::<Vec<_>>());
            assert_ne!(first, policy.iter(2).collect::<Vec<_>>());
        }

        #[test]
        fn draws_follow_probabilities() {
            let policy =
                FrequencyWeighted::new(make_streams(&[("en-de", 500), ("en-fr", 1500)]), 1.0, 0.0, TEST_SEED)
                    .unwrap();
            let shares = draw_shares(&policy, 0);
            assert!((shares[0] - 0.25).abs() < 0.05, "{shares:?}");
        }

        #[test]
        fn rejects_bad_exponents() {
            let streams = || make_streams(&[("en-de", 1)]);
            assert!(FrequencyWeighted::new(streams(), 0.0, 0.0, TEST_SEED).is_err());
            assert!(FrequencyWeighted::new(streams(), 1.0, 1.5, TEST_SEED).is_err());
            assert!(FrequencyWeighted::new(streams(), 1.0, -0.1, TEST_SEED).is_err());
        }

        #[test]
        fn all_empty_yields_no_steps() {
            let policy =
                FrequencyWeighted::new(make_streams(&[("en-de", 0), ("en-fr", 0)]), 1.0, 0.0, TEST_SEED)
                    .unwrap();
            assert_eq!(policy.iter(0).count(), 0);
        }
    }

    mod distance_weighted_tests {
        use super::*;

        #[test]
        fn zero_condition_ignores_distance() {
            let policy = DistanceWeighted::new(
                make_streams(&[("en-de", 200), ("en-fr", 600)]),
                vec![0.9, 0.1],
                0.0,
                TEST_SEED,
            )
            .unwrap();
            assert_close(&policy.probabilities(), &[0.25, 0.75]);
        }

        #[test]
        fn positive_condition_favours_distant_pairs() {
            let streams = || make_streams(&[("en-de", 500), ("en-fr", 500)]);
            let toward = DistanceWeighted::new(streams(), vec![0.8, 0.2], 1.0, TEST_SEED).unwrap();
            assert_close(&toward.probabilities(), &[0.8, 0.2]);

            let away = DistanceWeighted::new(streams(), vec![0.8, 0.2], -1.0, TEST_SEED).unwrap();
            assert_close(&away.probabilities(), &[0.2, 0.8]);

            let shares = draw_shares(&toward, 3);
            assert!(shares[0] > shares[1], "{shares:?}");
        }

        #[test]
        fn distance_count_must_match_pairs() {
            let err = DistanceWeighted::new(make_streams(&[("en-de", 1), ("en-fr", 1)]), vec![1.0], 1.0, TEST_SEED)
                .err()
                .unwrap();
            assert!(matches!(
                err.downcast_ref::<DataError>(),
                Some(DataError::Configuration(_))
            ));
            assert!(DistanceWeighted::new(make_streams(&[("en-de", 1)]), vec![0.0], 1.0, TEST_SEED).is_err());
        }

        #[test]
        fn normalizes_raw_distances() {
            assert_close(&normalize_lang_distances(&[0.0, 0.0]).unwrap(), &[0.5, 0.5]);
            let e = std::f64::consts::E;
            assert_close(&normalize_lang_distances(&[1000.0, 0.0]).unwrap(), &[e / (e + 1.0), 1.0 / (e + 1.0)]);
            assert!(normalize_lang_distances(&[]).is_err());
        }
    }
}
