use crate::error::DataError;
use crate::minibatch::TranslationBatch;
use crate::seed::with_global_rng;
use crate::transforms::Transform;
use anyhow::{ensure, Result};
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;

#[derive(Debug, Clone)]
enum SourceTag {
    Fixed(i64),
    /// One candidate drawn per sentence.
    Sampled {
        candidates: Vec<i64>,
        dist: WeightedIndex<f64>,
    },
}

/// Swaps end/start markers of a collated batch for language tokens.
///
/// - Source side: the last non-pad token of each row, when it equals the
///   configured eos, becomes the encoder language token. With
///   [`sample_source_eos`](Self::sample_source_eos) the token is drawn per
///   sentence from a list of candidates instead.
/// - Target side: the first non-pad token of each `prev_output_tokens` row,
///   when it equals the configured bos, becomes the decoder language token.
///
/// Works for both left- and right-padded batches.
#[derive(Debug, Clone)]
pub struct LangTokRewrite {
    pad: i64,
    source: Option<(i64, SourceTag)>,
    target: Option<(i64, i64)>,
}

impl LangTokRewrite {
    pub fn new(pad: i64) -> Self {
        Self {
            pad,
            source: None,
            target: None,
        }
    }

    pub fn replace_source_eos(mut self, eos: i64, new_eos: i64) -> Self {
        self.source = Some((eos, SourceTag::Fixed(new_eos)));
        self
    }

    /// Draws the replacement for `eos` per sentence, `candidates[i]` with
    /// probability `probs[i]`.
    pub fn sample_source_eos(mut self, eos: i64, candidates: Vec<i64>, probs: &[f64]) -> Result<Self> {
        ensure!(
            candidates.len() == probs.len(),
            "got {} source tags but {} probabilities",
            candidates.len(),
            probs.len()
        );
        let dist = WeightedIndex::new(probs)?;
        self.source = Some((eos, SourceTag::Sampled { candidates, dist }));
        Ok(self)
    }

    pub fn replace_target_bos(mut self, bos: i64, new_bos: i64) -> Self {
        self.target = Some((bos, new_bos));
        self
    }

    pub fn is_noop(&self) -> bool {
        self.source.is_none() && self.target.is_none()
    }
}

impl Transform<TranslationBatch, TranslationBatch> for LangTokRewrite {
    fn apply(&self, mut batch: TranslationBatch) -> Result<TranslationBatch> {
        let pad = self.pad;

        if let Some((eos, tag)) = &self.source {
            with_global_rng(|rng| {
                for mut row in batch.src_tokens.rows_mut() {
                    let Some(last) = row.iter().rposition(|&t| t != pad) else {
                        continue;
                    };
                    if row[last] != *eos {
                        continue;
                    }
                    row[last] = match tag {
                        SourceTag::Fixed(new_eos) => *new_eos,
                        SourceTag::Sampled { candidates, dist } => candidates[dist.sample(rng)],
                    };
                }
            });
        }

        if let (Some((bos, new_bos)), Some(prev)) = (self.target, batch.prev_output_tokens.as_mut()) {
            for mut row in prev.rows_mut() {
                if let Some(first) = row.iter().position(|&t| t != pad) {
                    if row[first] == bos {
                        row[first] = new_bos;
                    }
                }
            }
        }
        Ok(batch)
    }
}

/// Per-language draw probabilities for the source tag of a sentence whose
/// target language is `current`.
///
/// `current` keeps probability `1 - sample_tag_prob`; the remaining mass is
/// split evenly over the other target languages. With a single target
/// language the current tag is always used.
pub fn tag_sampling_probs(tgt_langs: &[String], current: &str, sample_tag_prob: f64) -> Result<Vec<f64>> {
    if !(0.0..=1.0).contains(&sample_tag_prob) {
        return Err(DataError::config(format!(
            "sample_tag_prob must be in [0, 1], got {sample_tag_prob}"
        ))
        .into());
    }
    let Some(cur) = tgt_langs.iter().position(|lang| lang == current) else {
        return Err(DataError::config(format!(
            "target language {current} is not one of {tgt_langs:?}"
        ))
        .into());
    };
    if tgt_langs.len() == 1 {
        return Ok(vec![1.0]);
    }
    let other = sample_tag_prob / (tgt_langs.len() - 1) as f64;
    let mut probs = vec![other; tgt_langs.len()];
    probs[cur] = 1.0 - sample_tag_prob;
    Ok(probs)
}
