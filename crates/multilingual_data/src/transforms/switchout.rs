use crate::dictionary::Dictionary;
use crate::minibatch::TranslationBatch;
use crate::seed::with_global_rng;
use crate::transforms::Transform;
use anyhow::{ensure, Result};
use ndarray::{Array2, Zip};
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;
use std::sync::Arc;

/// ===========================================================================
/// SwitchOut: randomly replaces tokens of a padded batch with other
/// vocabulary ids.
///
/// For each row of true length `n`, a corruption count `k` in `0..n` is drawn
/// with logits `-k * tau`, so a larger `tau` concentrates on small counts.
/// Every position that does not hold pad, eos or bos is then corrupted
/// independently with probability `k / n`; the number of replaced tokens is
/// `k` only in expectation.
///
/// A corrupted token `t` becomes `(t + r) mod vocab_len` with `r` drawn
/// uniformly from `0..vocab_len`. Pad positions are never changed. When no
/// position is selected in the whole batch the input is returned unchanged.
///
/// # Arguments
/// - `tokens`: `[batch, max_len]` token ids.
/// - `lengths`: true (unpadded) length of each row.
/// - `tau`: temperature, must be `> 0`.
pub fn switchout<D, R>(
    tokens: &Array2<i64>,
    lengths: &[usize],
    tau: f64,
    dict: &D,
    rng: &mut R,
) -> Result<Array2<i64>>
where
    D: Dictionary + ?Sized,
    R: Rng + ?Sized,
{
    ensure!(tau.is_finite() && tau > 0.0, "switchout tau must be > 0, got {}", tau);
    let (rows, width) = tokens.dim();
    ensure!(
        lengths.len() == rows,
        "switchout got {} lengths for {} rows",
        lengths.len(),
        rows
    );
    ensure!(
        lengths.iter().all(|&len| len <= width),
        "switchout lengths {:?} exceed the batch width {}",
        lengths,
        width
    );
    ensure!(!dict.is_empty(), "switchout needs a non-empty vocabulary");

    let (pad, eos, bos) = (dict.pad(), dict.eos(), dict.bos());
    let mut corrupt = Array2::from_elem((rows, width), false);

    for (row, &len) in lengths.iter().enumerate() {
        if len == 0 {
            continue;
        }
        let weights = (0..len).map(|k| (-(k as f64) * tau).exp());
        let count = WeightedIndex::new(weights)?.sample(rng);
        if count == 0 {
            continue;
        }
        let prob = count as f64 / len as f64;
        for col in 0..width {
            let token = tokens[[row, col]];
            if token == pad || token == eos || token == bos {
                continue;
            }
            corrupt[[row, col]] = rng.random_bool(prob);
        }
    }

    if !corrupt.iter().any(|&c| c) {
        return Ok(tokens.clone());
    }

    let vocab_len = dict.len() as i64;
    let mut sampled = tokens.clone();
    Zip::from(&mut sampled)
        .and(&corrupt)
        .for_each(|token, &selected| {
            if selected {
                let offset = rng.random_range(0..vocab_len);
                *token = (*token + offset).rem_euclid(vocab_len);
            }
        });
    Zip::from(&mut sampled).and(tokens).for_each(|token, &original| {
        if original == pad {
            *token = pad;
        }
    });
    Ok(sampled)
}

/// Applies [`switchout`] to the source side of a batch, drawing from the
/// thread-local generator so an enclosing
/// [`numpy_seed`](crate::seed::numpy_seed) scope makes it reproducible.
pub struct SwitchOut<D: Dictionary> {
    dict: Arc<D>,
    tau: f64,
}

impl<D: Dictionary> SwitchOut<D> {
    pub fn new(dict: Arc<D>, tau: f64) -> Result<Self> {
        ensure!(tau.is_finite() && tau > 0.0, "switchout tau must be > 0, got {}", tau);
        Ok(Self { dict, tau })
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }
}

impl<D: Dictionary> Transform<TranslationBatch, TranslationBatch> for SwitchOut<D> {
    fn apply(&self, mut batch: TranslationBatch) -> Result<TranslationBatch> {
        batch.src_tokens = with_global_rng(|rng| {
            switchout(
                &batch.src_tokens,
                &batch.src_lengths,
                self.tau,
                self.dict.as_ref(),
                rng,
            )
        })?;
        Ok(batch)
    }
}
