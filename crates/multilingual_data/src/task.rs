//! Multilingual translation task: dictionaries, per-pair batching and the
//! epoch pipeline.
//!
//! ```text
//!  per pair:  ordered_indices -> [random filter] -> filter_by_size -> batch_by_size
//!                                                                        |
//!  policy:    RoundRobinZip | FrequencyWeighted | DistanceWeighted  <----+
//!                 |
//!  per step:  collate -> LangTokRewrite -> [SwitchOut]  (inside numpy_seed(seed, epoch, step))
//! ```

use crate::collator::{Collator, LanguagePairCollator};
use crate::config::{EncoderLangTok, TaskConfig};
use crate::dataset::{LanguagePairDataset, TokenDataset};
use crate::dictionary::{lang_token, lang_token_index, Dictionary};
use crate::error::DataError;
use crate::lang_pair::LangPair;
use crate::minibatch::{StepBatch, TranslationBatch};
use crate::policy::{
    normalize_lang_distances, DistanceWeighted, FrequencyWeighted, PolicyKind, RoundRobinZip,
    SamplingPolicy,
};
use crate::sampler::{batch_by_size, EpochBatchSampler, Sampler};
use crate::seed::{numpy_seed, stream, with_global_rng};
use crate::size::{filter_by_size, FieldValue, SizeLimit};
use crate::transforms::{tag_sampling_probs, Chain, LangTokRewrite, SwitchOut, Transform};
use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Valid,
    Test,
}

impl Split {
    pub fn is_train(self) -> bool {
        self == Split::Train
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
        })
    }
}

/// Language settings a model was built with; must agree with the task.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelLangConfig {
    pub lang_pairs: Vec<LangPair>,
    pub encoder_langtok: Option<EncoderLangTok>,
    pub decoder_langtok: bool,
}

/// Per-pair batch transform: language tokens, then optional switchout.
type PairTransform<D> = Chain<Option<LangTokRewrite>, Option<SwitchOut<D>>, TranslationBatch>;

struct PairPipeline<D: Dictionary> {
    collator: LanguagePairCollator,
    transform: PairTransform<D>,
}

pub struct MultilingualTask<D: Dictionary> {
    config: TaskConfig,
    dicts: IndexMap<String, Arc<D>>,
    training: bool,
    lang_pairs: Vec<LangPair>,
    lang_distances: Option<Vec<f64>>,
}

impl<D: Dictionary> MultilingualTask<D> {
    /// Validates `config` and prepares one dictionary per language.
    ///
    /// Every language named by a pair needs an entry in `dicts`, and all
    /// dictionaries must agree on pad, eos and unk. When language tokens are
    /// enabled, `__lang__` is added to every dictionary for every language.
    pub fn setup(config: TaskConfig, mut dicts: IndexMap<String, D>) -> Result<Self> {
        config.validate()?;
        let training = config.is_training();

        let mut langs: BTreeSet<String> = config
            .lang_pairs
            .iter()
            .flat_map(|pair| [pair.source.clone(), pair.target.clone()])
            .collect();
        langs.extend(config.source_lang.iter().cloned());
        langs.extend(config.target_lang.iter().cloned());

        let mut reference: Option<(&str, i64, i64, i64)> = None;
        for lang in &langs {
            let dict = dicts
                .get(lang)
                .ok_or_else(|| DataError::config(format!("no dictionary for language {lang}")))?;
            let specials = (dict.pad(), dict.eos(), dict.unk());
            match reference {
                None => reference = Some((lang.as_str(), specials.0, specials.1, specials.2)),
                Some((first, pad, eos, unk)) if (pad, eos, unk) != specials => {
                    return Err(DataError::config(format!(
                        "dictionary for {lang} disagrees with {first} on pad/eos/unk"
                    ))
                    .into());
                }
                Some(_) => {}
            }
        }

        if config.uses_langtok() {
            for lang in &langs {
                if let Some(dict) = dicts.get_mut(lang) {
                    for tagged in &langs {
                        dict.add_symbol(&lang_token(tagged));
                    }
                }
            }
        }
        for lang in &langs {
            if let Some(dict) = dicts.get(lang) {
                info!(lang = %lang, types = dict.len(), "dictionary");
            }
        }

        let lang_pairs = if training {
            config.lang_pairs.clone()
        } else {
            match (&config.source_lang, &config.target_lang) {
                (Some(source), Some(target)) => vec![LangPair::new(source.as_str(), target.as_str())],
                _ => return Err(DataError::config("evaluation needs source_lang and target_lang").into()),
            }
        };

        let lang_distances = match &config.lan_dists {
            Some(raw) => Some(normalize_lang_distances(raw)?),
            None => None,
        };

        let dicts = dicts
            .into_iter()
            .filter(|(lang, _)| langs.contains(lang))
            .map(|(lang, dict)| (lang, Arc::new(dict)))
            .collect();

        Ok(Self {
            config,
            dicts,
            training,
            lang_pairs,
            lang_distances,
        })
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Pairs this task trains on (or the single evaluated direction).
    pub fn lang_pairs(&self) -> &[LangPair] {
        &self.lang_pairs
    }

    pub fn eval_lang_pairs(&self) -> &[LangPair] {
        if self.training {
            self.config.eval_lang_pairs()
        } else {
            &self.lang_pairs
        }
    }

    pub fn dictionary(&self, lang: &str) -> Option<&Arc<D>> {
        self.dicts.get(lang)
    }

    fn dict(&self, lang: &str) -> Result<&Arc<D>> {
        self.dictionary(lang)
            .ok_or_else(|| DataError::config(format!("no dictionary for language {lang}")).into())
    }

    /// Normalized language distances, one per configured pair.
    pub fn lang_distances(&self) -> Option<&[f64]> {
        self.lang_distances.as_deref()
    }

    /// Fails with every mismatch between the task and a model's language setup.
    pub fn check_model_args(&self, model: &ModelLangConfig) -> Result<()> {
        let mut messages = Vec::new();

        let ours: HashSet<&LangPair> = self.config.lang_pairs.iter().collect();
        let theirs: HashSet<&LangPair> = model.lang_pairs.iter().collect();
        if ours.symmetric_difference(&theirs).next().is_some() {
            let listed: Vec<String> = model.lang_pairs.iter().map(ToString::to_string).collect();
            messages.push(format!(
                "--lang-pairs should include all the language pairs [{}].",
                listed.join(", ")
            ));
        }
        if self.config.encoder_langtok != model.encoder_langtok {
            let expected = match model.encoder_langtok {
                Some(EncoderLangTok::Src) => "src",
                Some(EncoderLangTok::Tgt) => "tgt",
                None => "None",
            };
            messages.push(format!("--encoder-langtok should be {expected}."));
        }
        if self.config.decoder_langtok != model.decoder_langtok {
            let not = if model.decoder_langtok { "" } else { "not " };
            messages.push(format!("--decoder-langtok should {not}be set."));
        }

        if messages.is_empty() {
            Ok(())
        } else {
            Err(DataError::config(messages.join(" ")).into())
        }
    }

    /// `(max_source_positions, max_target_positions)` for every pair.
    pub fn max_positions(&self) -> SizeLimit {
        SizeLimit::FieldMap(
            self.lang_pairs
                .iter()
                .map(|pair| (pair.to_string(), self.pair_positions()))
                .collect(),
        )
    }

    fn pair_positions(&self) -> FieldValue {
        FieldValue::Many(vec![
            Some(self.config.max_source_positions),
            Some(self.config.max_target_positions),
        ])
    }

    /// Id replacing the source eos for `src -> tgt`.
    pub fn encoder_langtok(&self, source: &str, target: &str) -> Result<i64> {
        let dict = self.dict(source)?;
        match self.config.encoder_langtok {
            None => Ok(dict.eos()),
            Some(EncoderLangTok::Src) => lang_token_index(dict.as_ref(), source),
            Some(EncoderLangTok::Tgt) => lang_token_index(dict.as_ref(), target),
        }
    }

    /// Id replacing the decoder bos for `target`.
    pub fn decoder_langtok(&self, target: &str) -> Result<i64> {
        let dict = self.dict(target)?;
        if !self.config.decoder_langtok {
            return Ok(dict.eos());
        }
        lang_token_index(dict.as_ref(), target)
    }

    /// Distinct target languages of the configured pairs, in order.
    fn target_langs(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.config
            .lang_pairs
            .iter()
            .filter(|pair| seen.insert(pair.target.as_str()))
            .map(|pair| pair.target.clone())
            .collect()
    }

    /// The language-token rewrite for one pair, or `None` when language
    /// tokens are disabled.
    pub fn langtok_rewrite(&self, pair: &LangPair, split: Split) -> Result<Option<LangTokRewrite>> {
        if !self.config.uses_langtok() {
            return Ok(None);
        }
        let tgt_dict = self.dict(&pair.target)?;
        let mut rewrite = LangTokRewrite::new(tgt_dict.pad());

        if self.config.encoder_langtok.is_some() {
            let tgt_langs = self.target_langs();
            if split.is_train() && self.config.sample_tag_prob > 0.0 && tgt_langs.contains(&pair.target) {
                let probs = tag_sampling_probs(&tgt_langs, &pair.target, self.config.sample_tag_prob)?;
                let candidates = tgt_langs
                    .iter()
                    .map(|target| self.encoder_langtok(&pair.source, target))
                    .collect::<Result<Vec<_>>>()?;
                rewrite = rewrite.sample_source_eos(tgt_dict.eos(), candidates, &probs)?;
            } else {
                let new_eos = self.encoder_langtok(&pair.source, &pair.target)?;
                rewrite = rewrite.replace_source_eos(tgt_dict.eos(), new_eos);
            }
        }
        if self.config.decoder_langtok {
            rewrite = rewrite.replace_target_bos(tgt_dict.eos(), self.decoder_langtok(&pair.target)?);
        }
        Ok(Some(rewrite))
    }

    pub fn collator(&self, pair: &LangPair) -> Result<LanguagePairCollator> {
        let dict = self.dict(&pair.source)?;
        Ok(LanguagePairCollator::new(dict.pad(), dict.eos())
            .left_pad_source(self.config.left_pad_source)
            .left_pad_target(self.config.left_pad_target))
    }

    fn pipeline(&self, pair: &LangPair, split: Split) -> Result<PairPipeline<D>> {
        let switchout = match self.config.switchout_tau {
            Some(tau) if split.is_train() => Some(SwitchOut::new(Arc::clone(self.dict(&pair.source)?), tau)?),
            _ => None,
        };
        Ok(PairPipeline {
            collator: self.collator(pair)?,
            transform: Chain::new(self.langtok_rewrite(pair, split)?, switchout),
        })
    }

    /// Packs one pair's dataset into an epoch batch stream.
    ///
    /// Ordering and the optional random filter run inside
    /// `numpy_seed(seed, epoch, INDEX_ORDER)`.
    pub fn batch_sampler(
        &self,
        pair: &LangPair,
        dataset: &LanguagePairDataset,
        split: Split,
        epoch: usize,
    ) -> Result<EpochBatchSampler> {
        let indices = {
            let _scope = numpy_seed(Some(self.config.seed), &[epoch as u64, stream::INDEX_ORDER]);
            with_global_rng(|rng| -> Result<Vec<usize>> {
                let mut ordered = dataset.ordered_indices(split.is_train().then_some(&mut *rng));
                if let (Some(filter), true) = (self.config.data_filter, split.is_train()) {
                    let keep: HashSet<usize> = filter.apply(&ordered, rng)?.into_iter().collect();
                    ordered.retain(|index| keep.contains(index));
                }
                Ok(ordered)
            })?
        };

        let limit = SizeLimit::FieldTuple(self.pair_positions().as_slice().to_vec());
        let indices = filter_by_size(&indices, dataset, &limit, !self.config.skip_invalid_size_inputs)
            .with_context(|| format!("filtering {split} {pair} by size"))?;

        let batches: Vec<Vec<usize>> = batch_by_size(
            indices,
            |index| dataset.num_tokens(index),
            self.config.max_tokens,
            self.config.max_sentences,
            self.config.required_batch_size_multiple,
        )?
        .iter(epoch)
        .collect();

        info!(
            split = %split,
            pair = %pair,
            examples = dataset.len(),
            batches = batches.len(),
            "loaded language pair"
        );
        Ok(EpochBatchSampler::new(batches, split.is_train(), self.config.seed))
    }

    /// Builds the sampling policy for a split.
    ///
    /// Non-training splits and `round_robin` use [`RoundRobinZip`]; outside
    /// training mode the evaluated direction is the eval key. The training
    /// split otherwise uses the configured weighted policy.
    pub fn build_policy(
        &self,
        split: Split,
        datasets: &IndexMap<LangPair, LanguagePairDataset>,
        epoch: usize,
    ) -> Result<Box<dyn SamplingPolicy>> {
        let pairs = match split {
            Split::Valid => self.eval_lang_pairs(),
            _ => self.lang_pairs(),
        };

        let mut streams = IndexMap::with_capacity(pairs.len());
        for pair in pairs {
            let dataset = datasets
                .get(pair)
                .ok_or_else(|| DataError::config(format!("no {split} dataset for language pair {pair}")))?;
            streams.insert(pair.clone(), self.batch_sampler(pair, dataset, split, epoch)?);
        }

        let kind = if split.is_train() {
            self.config.dataset_type
        } else {
            PolicyKind::RoundRobin
        };
        debug!(split = %split, ?kind, pairs = pairs.len(), "building sampling policy");

        let policy: Box<dyn SamplingPolicy> = match kind {
            PolicyKind::RoundRobin => {
                let eval_key = if self.training { None } else { self.lang_pairs.first().cloned() };
                Box::new(RoundRobinZip::new(streams, eval_key)?)
            }
            PolicyKind::FrequencyWeighted => Box::new(FrequencyWeighted::new(
                streams,
                self.config.datasize_t,
                self.config.alpha_p,
                self.config.seed,
            )?),
            PolicyKind::DistanceWeighted => {
                let distances = self
                    .lang_distances
                    .clone()
                    .ok_or_else(|| DataError::config("dataset_type tcs requires lan_dists"))?;
                Box::new(DistanceWeighted::new(
                    streams,
                    distances,
                    self.config.data_condition,
                    self.config.seed,
                )?)
            }
        };
        Ok(policy)
    }

    /// The single direction named by `source_lang`/`target_lang`.
    pub fn inference_pair(&self) -> Result<LangPair> {
        match (&self.config.source_lang, &self.config.target_lang) {
            (Some(source), Some(target)) => Ok(LangPair::new(source.as_str(), target.as_str())),
            _ => Err(DataError::config("inference needs source_lang and target_lang").into()),
        }
    }

    /// Round-robin over a (usually source-only) dataset of raw inputs for
    /// the evaluated direction, with that direction as the eval key.
    ///
    /// Iterate it with [`epoch_batches`](Self::epoch_batches) and
    /// [`Split::Test`], keying the dataset by [`inference_pair`](Self::inference_pair):
    /// examples keep their order, nothing random is applied and the source
    /// eos still becomes the encoder language token.
    pub fn inference_policy(&self, dataset: &LanguagePairDataset) -> Result<RoundRobinZip> {
        let pair = self.inference_pair()?;
        let stream = self.batch_sampler(&pair, dataset, Split::Test, 0)?;
        let mut streams = IndexMap::with_capacity(1);
        streams.insert(pair.clone(), stream);
        RoundRobinZip::new(streams, Some(pair))
    }

    /// Lazily collates and transforms every step of `epoch`.
    ///
    /// Each step runs inside `numpy_seed(seed, epoch, STEP, step)`, so the random
    /// transforms replay exactly and randomness outside is left alone.
    pub fn epoch_batches<'a>(
        &'a self,
        split: Split,
        policy: &'a dyn SamplingPolicy,
        datasets: &'a IndexMap<LangPair, LanguagePairDataset>,
        epoch: usize,
    ) -> Result<impl Iterator<Item = Result<StepBatch>> + 'a> {
        let mut pipelines = IndexMap::new();
        for pair in policy.lang_pairs() {
            let pipeline = self.pipeline(&pair, split)?;
            pipelines.insert(pair, pipeline);
        }
        let seed = self.config.seed;

        Ok(policy.iter(epoch).enumerate().map(move |(step, sample)| {
            let _scope = numpy_seed(Some(seed), &[epoch as u64, stream::STEP, step as u64]);
            let mut out = StepBatch::default();
            for (pair, indices) in sample.iter() {
                let dataset = datasets
                    .get(pair)
                    .ok_or_else(|| DataError::config(format!("no {split} dataset for language pair {pair}")))?;
                let pipeline = pipelines
                    .get(pair)
                    .ok_or_else(|| anyhow!("policy yielded unknown language pair {pair}"))?;
                let samples = indices
                    .iter()
                    .map(|&index| {
                        dataset
                            .get(index)
                            .ok_or_else(|| anyhow!("index {index} out of range for {pair}"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let batch = pipeline.collator.collate(&samples)?;
                out.insert(pair.clone(), pipeline.transform.apply(batch)?);
            }
            Ok(out)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::Vocabulary;
    use crate::lang_pair::parse_lang_pairs;
    use crate::size::Size;

    fn dicts(langs: &[&str]) -> IndexMap<String, Vocabulary> {
        langs
            .iter()
            .map(|lang| (lang.to_string(), Vocabulary::from_symbols((0..20).map(|i| format!("{lang}{i}")))))
            .collect()
    }

    fn config(pairs: &str) -> TaskConfig {
        TaskConfig::builder().lang_pairs(parse_lang_pairs(pairs).unwrap()).build()
    }

    /// `n` examples of source length `1 + i % 5` and target length `2 + i % 3`, eos-terminated.
    fn dataset(n: usize) -> LanguagePairDataset {
        let seq = |len: usize| {
            let mut tokens: Vec<i64> = (0..len - 1).map(|t| 4 + t as i64).collect();
            tokens.push(2);
            tokens
        };
        let source = (0..n).map(|i| seq(1 + i % 5)).collect();
        let target = (0..n).map(|i| seq(2 + i % 3)).collect();
        LanguagePairDataset::new(source, Some(target)).unwrap()
    }

    mod setup_tests {
        use super::*;

        #[test]
        fn adds_language_tokens_when_enabled() -> Result<()> {
            let config = TaskConfig {
                encoder_langtok: Some(EncoderLangTok::Tgt),
                ..config("en-de,en-fr")
            };
            let task = MultilingualTask::setup(config, dicts(&["de", "en", "fr"]))?;
            for lang in ["de", "en", "fr"] {
                let dict = task.dictionary(lang).unwrap();
                assert_eq!(dict.len(), 24 + 3);
                assert_ne!(dict.index("__fr__"), dict.unk());
            }
            assert_eq!(task.encoder_langtok("en", "fr")?, task.dictionary("en").unwrap().index("__fr__"));
            assert!(task.is_training());
            Ok(())
        }

        #[test]
        fn missing_dictionary_is_a_configuration_error() {
            let err = MultilingualTask::setup(config("en-de"), dicts(&["en"])).err().unwrap();
            assert!(matches!(
                err.downcast_ref::<DataError>(),
                Some(DataError::Configuration(msg)) if msg.contains("de")
            ));
        }

        #[test]
        fn direction_selects_single_pair() -> Result<()> {
            let config = TaskConfig {
                source_lang: Some("en".into()),
                target_lang: Some("fr".into()),
                ..config("en-de,en-fr")
            };
            let task = MultilingualTask::setup(config, dicts(&["de", "en", "fr"]))?;
            assert!(!task.is_training());
            assert_eq!(task.lang_pairs(), &[LangPair::new("en", "fr")]);
            Ok(())
        }

        #[test]
        fn max_positions_lists_every_pair() -> Result<()> {
            let task = MultilingualTask::setup(config("en-de,en-fr"), dicts(&["de", "en", "fr"]))?;
            let SizeLimit::FieldMap(fields) = task.max_positions() else {
                panic!("expected per-pair limits");
            };
            assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["en-de", "en-fr"]);
            assert_eq!(fields["en-de"], FieldValue::Many(vec![Some(1024), Some(1024)]));

            let mut size = IndexMap::new();
            size.insert("en-de".to_string(), FieldValue::Many(vec![Some(2000), Some(3)]));
            assert!(!task.max_positions().admits(&Size::Map(size))?);
            Ok(())
        }
    }

    mod model_args_tests {
        use super::*;

        #[test]
        fn reports_every_mismatch() -> Result<()> {
            let task = MultilingualTask::setup(config("en-de,en-fr"), dicts(&["de", "en", "fr"]))?;
            let matching = ModelLangConfig {
                lang_pairs: parse_lang_pairs("en-fr,en-de")?,
                encoder_langtok: None,
                decoder_langtok: false,
            };
            task.check_model_args(&matching)?;

            let mismatched = ModelLangConfig {
                lang_pairs: parse_lang_pairs("en-de")?,
                encoder_langtok: Some(EncoderLangTok::Src),
                decoder_langtok: true,
            };
            let message = task.check_model_args(&mismatched).unwrap_err().to_string();
            assert!(message.contains("--lang-pairs"));
            assert!(message.contains("--encoder-langtok should be src"));
            assert!(message.contains("--decoder-langtok should be set"));
            Ok(())
        }
    }

    mod pipeline_tests {
        use super::*;

        fn datasets(pairs: &[(&str, usize)]) -> IndexMap<LangPair, LanguagePairDataset> {
            pairs
                .iter()
                .map(|&(pair, n)| (pair.parse().unwrap(), dataset(n)))
                .collect()
        }

        #[test]
        fn batches_respect_budgets_and_cover_every_index() -> Result<()> {
            let config = TaskConfig {
                max_tokens: Some(12),
                max_sentences: Some(4),
                ..config("en-de")
            };
            let task = MultilingualTask::setup(config, dicts(&["de", "en"]))?;
            let data = dataset(40);
            let sampler = task.batch_sampler(&LangPair::new("en", "de"), &data, Split::Train, 1)?;

            let mut seen: Vec<usize> = sampler.iter(1).flatten().collect();
            seen.sort_unstable();
            assert_eq!(seen, (0..40).collect::<Vec<_>>());
            for batch in sampler.iter(1) {
                let widest = batch.iter().map(|&i| data.num_tokens(i)).max().unwrap();
                assert!(batch.len() <= 4 && widest * batch.len() <= 12);
            }
            Ok(())
        }

        #[test]
        fn strict_mode_rejects_oversized_examples() -> Result<()> {
            let config = TaskConfig {
                max_source_positions: 3,
                ..config("en-de")
            };
            let task = MultilingualTask::setup(config.clone(), dicts(&["de", "en"]))?;
            let err = task
                .batch_sampler(&LangPair::new("en", "de"), &dataset(10), Split::Train, 0)
                .unwrap_err();
            assert!(matches!(
                err.downcast_ref::<DataError>(),
                Some(DataError::SizeViolation { .. })
            ));

            let lenient = TaskConfig {
                skip_invalid_size_inputs: true,
                ..config
            };
            let task = MultilingualTask::setup(lenient, dicts(&["de", "en"]))?;
            let sampler = task.batch_sampler(&LangPair::new("en", "de"), &dataset(10), Split::Train, 0)?;
            // Source lengths cycle 1..=5; lengths 4 and 5 are dropped.
            assert_eq!(sampler.num_examples(), 6);
            Ok(())
        }

        #[test]
        fn policy_follows_dataset_type_and_split() -> Result<()> {
            let data = datasets(&[("en-de", 30), ("en-fr", 10)]);
            let config = TaskConfig {
                dataset_type: PolicyKind::FrequencyWeighted,
                max_sentences: Some(5),
                ..config("en-de,en-fr")
            };
            let task = MultilingualTask::setup(config, dicts(&["de", "en", "fr"]))?;

            let train = task.build_policy(Split::Train, &data, 0)?;
            assert_eq!(train.kind(), PolicyKind::FrequencyWeighted);
            assert_eq!(train.steps_per_epoch(), 6 + 2);

            let valid = task.build_policy(Split::Valid, &data, 0)?;
            assert_eq!(valid.kind(), PolicyKind::RoundRobin);
            assert_eq!(valid.steps_per_epoch(), 6);

            let missing = datasets(&[("en-de", 5)]);
            assert!(task.build_policy(Split::Train, &missing, 0).is_err());
            Ok(())
        }

        #[test]
        fn epoch_batches_apply_language_tokens_and_replay() -> Result<()> {
            let data = datasets(&[("en-de", 12), ("en-fr", 8)]);
            let config = TaskConfig {
                encoder_langtok: Some(EncoderLangTok::Tgt),
                decoder_langtok: true,
                switchout_tau: Some(0.2),
                max_sentences: Some(4),
                ..config("en-de,en-fr")
            };
            let task = MultilingualTask::setup(config, dicts(&["de", "en", "fr"]))?;
            let policy = task.build_policy(Split::Train, &data, 0)?;

            let steps: Vec<StepBatch> = task
                .epoch_batches(Split::Train, policy.as_ref(), &data, 0)?
                .collect::<Result<_>>()?;
            assert_eq!(steps.len(), 3);

            let en_de = LangPair::new("en", "de");
            let de_tag = task.dictionary("de").unwrap().index("__de__");
            for step in &steps {
                let batch = step.get(&en_de).unwrap();
                let prev = batch.prev_output_tokens.as_ref().unwrap();
                assert!(prev.column(0).iter().all(|&t| t == de_tag));
                assert_eq!(step.len(), 2);
            }

            let again: Vec<StepBatch> = task
                .epoch_batches(Split::Train, policy.as_ref(), &data, 0)?
                .collect::<Result<_>>()?;
            assert_eq!(steps, again);
            Ok(())
        }

        #[test]
        fn inference_runs_source_only_inputs_in_order() -> Result<()> {
            let config = TaskConfig {
                source_lang: Some("en".into()),
                target_lang: Some("de".into()),
                encoder_langtok: Some(EncoderLangTok::Tgt),
                max_sentences: Some(3),
                ..config("en-de")
            };
            let task = MultilingualTask::setup(config, dicts(&["de", "en"]))?;
            let pair = task.inference_pair()?;
            assert_eq!(pair, LangPair::new("en", "de"));

            let source: Vec<Vec<i64>> = (0..7).map(|i| vec![4 + i, 2]).collect();
            let mut data = IndexMap::new();
            data.insert(pair.clone(), LanguagePairDataset::new(source, None)?);
            let policy = task.inference_policy(&data[&pair])?;
            assert_eq!(policy.eval_key(), Some(&pair));

            let de_tag = task.dictionary("en").unwrap().index("__de__");
            let mut ids = Vec::new();
            for step in task.epoch_batches(Split::Test, &policy, &data, 0)? {
                let step = step?;
                let batch = step.get(&pair).unwrap();
                assert!(batch.target.is_none() && batch.prev_output_tokens.is_none());
                assert!(batch.src_tokens.column(1).iter().all(|&t| t == de_tag));
                ids.extend_from_slice(&batch.id);
            }
            ids.sort_unstable();
            assert_eq!(ids, (0..7).collect::<Vec<_>>());

            let training = MultilingualTask::setup(super::config("en-de"), dicts(&["de", "en"]))?;
            assert!(training.inference_pair().is_err());
            Ok(())
        }

        #[test]
        fn sampled_tags_draw_from_all_targets() -> Result<()> {
            let config = TaskConfig {
                encoder_langtok: Some(EncoderLangTok::Tgt),
                sample_tag_prob: 0.5,
                ..config("en-de,en-fr")
            };
            let task = MultilingualTask::setup(config, dicts(&["de", "en", "fr"]))?;
            let pair = LangPair::new("en", "de");
            assert!(task.langtok_rewrite(&pair, Split::Train)?.is_some());

            let data = datasets(&[("en-de", 200), ("en-fr", 1)]);
            let policy = task.build_policy(Split::Train, &data, 0)?;
            let en = task.dictionary("en").unwrap();
            let (de_tag, fr_tag) = (en.index("__de__"), en.index("__fr__"));

            let mut tags = HashSet::new();
            for step in task.epoch_batches(Split::Train, policy.as_ref(), &data, 0)? {
                let step = step?;
                let batch = step.get(&pair).unwrap();
                // Sources are left-padded, so the tag sits in the last column.
                tags.extend(batch.src_tokens.column(batch.src_tokens.ncols() - 1).iter().copied());
            }
            assert_eq!(tags, HashSet::from([de_tag, fr_tag]));
            Ok(())
        }
    }
}
