use super::{CyclingStream, PolicyKind, SamplingPolicy, StepSample};
use crate::error::DataError;
use crate::lang_pair::LangPair;
use crate::sampler::{EpochBatchSampler, Sampler};
use anyhow::Result;
use indexmap::IndexMap;

/// Advances every language pair in lockstep, one batch each per step.
///
/// In training mode an epoch lasts as long as the longest stream and shorter
/// streams start over from the top of their epoch order. With an `eval_key`
/// only that pair is iterated and the epoch lasts exactly its length.
///
/// A pair with no batches never contributes; it is absent from every step.
pub struct RoundRobinZip {
    streams: IndexMap<LangPair, EpochBatchSampler>,
    eval_key: Option<LangPair>,
}

impl RoundRobinZip {
    pub fn new(
        streams: IndexMap<LangPair, EpochBatchSampler>,
        eval_key: Option<LangPair>,
    ) -> Result<Self> {
        if streams.is_empty() {
            return Err(DataError::config("round-robin policy needs at least one language pair").into());
        }
        if let Some(key) = &eval_key {
            if !streams.contains_key(key) {
                return Err(DataError::config(format!(
                    "eval key {key} is not one of the configured language pairs"
                ))
                .into());
            }
        }
        Ok(Self { streams, eval_key })
    }

    pub fn eval_key(&self) -> Option<&LangPair> {
        self.eval_key.as_ref()
    }
}

impl Sampler for RoundRobinZip {
    type Item = StepSample;

    fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = StepSample> + Send + '_> {
        if let Some(key) = &self.eval_key {
            let stream = &self.streams[key];
            return Box::new(
                stream
                    .iter(epoch)
                    .map(move |batch| StepSample::single(key.clone(), batch)),
            );
        }

        let steps = self.steps_per_epoch();
        let mut cursors: Vec<(&LangPair, CyclingStream<'_>)> = self
            .streams
            .iter()
            .filter(|(_, stream)| !stream.is_empty())
            .map(|(pair, stream)| (pair, CyclingStream::new(stream, epoch)))
            .collect();

        Box::new((0..steps).map(move |_| {
            let mut step = StepSample::new();
            for (pair, cursor) in cursors.iter_mut() {
                if let Some(batch) = cursor.next() {
                    step.insert((*pair).clone(), batch);
                }
            }
            step
        }))
    }
}

impl SamplingPolicy for RoundRobinZip {
    fn kind(&self) -> PolicyKind {
        PolicyKind::RoundRobin
    }

    fn lang_pairs(&self) -> Vec<LangPair> {
        self.streams.keys().cloned().collect()
    }

    fn steps_per_epoch(&self) -> usize {
        match &self.eval_key {
            Some(key) => self.streams[key].len(),
            None => self.streams.values().map(EpochBatchSampler::len).max().unwrap_or(0),
        }
    }
}
