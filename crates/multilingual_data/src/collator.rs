use crate::error::DataError;
use crate::minibatch::TranslationBatch;
use crate::sample::TranslationSample;
use anyhow::{bail, Result};
use ndarray::{s, Array2};
use std::cmp::Reverse;

/// A `Collator` defines how to pad and combine multiple samples into a batch.
pub trait Collator: Send + Sync {
    fn collate(&self, samples: &[TranslationSample]) -> Result<TranslationBatch>;
}

/// Converts a list of 1D token sequences into a padded 2D batch.
///
/// The output width is the longest input. Shorter rows are filled with
/// `pad_idx` on the left (`left_pad`) or on the right.
///
/// With `move_eos_to_beginning`, every sequence must end with `eos_idx`; each
/// row then starts with eos followed by the sequence minus its trailing eos.
/// This is how decoder inputs are derived from targets.
pub fn collate_tokens<S: AsRef<[i64]>>(
    values: &[S],
    pad_idx: i64,
    eos_idx: Option<i64>,
    left_pad: bool,
    move_eos_to_beginning: bool,
) -> Result<Array2<i64>> {
    let width = values.iter().map(|v| v.as_ref().len()).max().unwrap_or(0);
    let mut batch = Array2::from_elem((values.len(), width), pad_idx);

    for (row, value) in values.iter().enumerate() {
        let value = value.as_ref();
        let start = if left_pad { width - value.len() } else { 0 };
        let mut dst = batch.slice_mut(s![row, start..start + value.len()]);

        if move_eos_to_beginning {
            let Some(eos) = eos_idx else {
                bail!(DataError::config(
                    "moving eos to the beginning requires an eos index"
                ));
            };
            match value.last() {
                Some(&last) if last == eos => {}
                found => {
                    return Err(DataError::MalformedSequence {
                        row,
                        eos,
                        found: found.copied(),
                    }
                    .into())
                }
            }
            dst[0] = eos;
            for (d, &v) in dst.iter_mut().skip(1).zip(&value[..value.len() - 1]) {
                *d = v;
            }
        } else {
            for (d, &v) in dst.iter_mut().zip(value) {
                *d = v;
            }
        }
    }
    Ok(batch)
}

/// Returns `sequence` with `tag` inserted at the front.
pub fn prepend_tag(sequence: &[i64], tag: i64) -> Vec<i64> {
    let mut tagged = Vec::with_capacity(sequence.len() + 1);
    tagged.push(tag);
    tagged.extend_from_slice(sequence);
    tagged
}

/// Collates [`TranslationSample`]s into a [`TranslationBatch`].
///
/// Rows are ordered by descending source length. Sources are left-padded and
/// targets right-padded unless configured otherwise.
#[derive(Debug, Clone)]
pub struct LanguagePairCollator {
    pad_idx: i64,
    eos_idx: i64,
    left_pad_source: bool,
    left_pad_target: bool,
}

impl LanguagePairCollator {
    pub fn new(pad_idx: i64, eos_idx: i64) -> Self {
        Self {
            pad_idx,
            eos_idx,
            left_pad_source: true,
            left_pad_target: false,
        }
    }

    pub fn left_pad_source(mut self, left_pad: bool) -> Self {
        self.left_pad_source = left_pad;
        self
    }

    pub fn left_pad_target(mut self, left_pad: bool) -> Self {
        self.left_pad_target = left_pad;
        self
    }

    pub fn pad_idx(&self) -> i64 {
        self.pad_idx
    }

    pub fn eos_idx(&self) -> i64 {
        self.eos_idx
    }

    pub fn is_left_pad_source(&self) -> bool {
        self.left_pad_source
    }
}

impl Collator for LanguagePairCollator {
    fn collate(&self, samples: &[TranslationSample]) -> Result<TranslationBatch> {
        if samples.is_empty() {
            bail!("Cannot collate empty sample list");
        }

        let mut ordered: Vec<&TranslationSample> = samples.iter().collect();
        ordered.sort_by_key(|sample| Reverse(sample.source_len()));

        let sources: Vec<&[i64]> = ordered.iter().map(|s| s.source.as_slice()).collect();
        let src_tokens = collate_tokens(
            &sources,
            self.pad_idx,
            Some(self.eos_idx),
            self.left_pad_source,
            false,
        )?;
        let src_lengths: Vec<usize> = sources.iter().map(|s| s.len()).collect();

        let targets: Option<Vec<&[i64]>> = ordered
            .iter()
            .map(|s| s.target.as_deref())
            .collect();

        let (target, prev_output_tokens, ntokens) = match targets {
            Some(targets) => {
                let target = collate_tokens(
                    &targets,
                    self.pad_idx,
                    Some(self.eos_idx),
                    self.left_pad_target,
                    false,
                )?;
                let prev_output_tokens = collate_tokens(
                    &targets,
                    self.pad_idx,
                    Some(self.eos_idx),
                    self.left_pad_target,
                    true,
                )?;
                let ntokens = targets.iter().map(|t| t.len()).sum();
                (Some(target), Some(prev_output_tokens), ntokens)
            }
            None => (None, None, src_lengths.iter().sum()),
        };

        Ok(TranslationBatch {
            id: ordered.iter().map(|s| s.id).collect(),
            nsentences: ordered.len(),
            ntokens,
            src_tokens,
            src_lengths,
            prev_output_tokens,
            target,
        })
    }
}
