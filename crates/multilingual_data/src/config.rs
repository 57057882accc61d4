//! Configuration for the multilingual translation task.
//!
//! The `TaskConfig` struct stores the parameters that control which language
//! pairs are loaded, how they are filtered and batched, and how the training
//! split mixes them.
//!
//! Example:
//! ```ignore
//! let config = TaskConfig::builder()
//!     .lang_pairs(parse_lang_pairs("en-de,en-fr")?)
//!     .dataset_type(PolicyKind::FrequencyWeighted)
//!     .datasize_t(5.0)
//!     .max_tokens(4096)
//!     .encoder_langtok(EncoderLangTok::Tgt)
//!     .build();
//! config.validate()?;
//! ```
//!
//! Configurations can also be read from JSON; absent fields take the
//! defaults of [`TaskConfig::default`].

use crate::error::DataError;
use crate::filter::RandomFilter;
use crate::lang_pair::LangPair;
use crate::policy::PolicyKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which language token replaces the source eos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderLangTok {
    Src,
    Tgt,
}

/// Configuration for MultilingualTask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Language pairs to train on, in order
    pub lang_pairs: Vec<LangPair>,
    /// Pairs used for validation (defaults to `lang_pairs`)
    pub eval_lang_pairs: Option<Vec<LangPair>>,
    /// Set together with `target_lang` to evaluate a single direction
    pub source_lang: Option<String>,
    pub target_lang: Option<String>,
    /// How the training split mixes language pairs
    pub dataset_type: PolicyKind,
    /// Temperature applied to corpus-size shares (`multi`)
    pub datasize_t: f64,
    /// Flattening exponent in `[0, 1]` (`multi`)
    pub alpha_p: f64,
    /// Raw language distances, one per pair (`tcs`)
    pub lan_dists: Option<Vec<f64>>,
    /// Exponent applied to language distances (`tcs`)
    pub data_condition: f64,
    pub encoder_langtok: Option<EncoderLangTok>,
    pub decoder_langtok: bool,
    /// Probability of tagging a training sentence with another target language
    pub sample_tag_prob: f64,
    pub left_pad_source: bool,
    pub left_pad_target: bool,
    pub max_source_positions: usize,
    pub max_target_positions: usize,
    pub max_tokens: Option<usize>,
    pub max_sentences: Option<usize>,
    pub required_batch_size_multiple: usize,
    /// Drop over-long examples with a warning instead of failing
    pub skip_invalid_size_inputs: bool,
    /// Enables switchout on training sources
    pub switchout_tau: Option<f64>,
    /// Optional random filter on the training indices
    pub data_filter: Option<RandomFilter>,
    /// Base seed for shuffling and random transforms
    pub seed: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            lang_pairs: Vec::new(),
            eval_lang_pairs: None,
            source_lang: None,
            target_lang: None,
            dataset_type: PolicyKind::RoundRobin,
            datasize_t: 1.0,
            alpha_p: 0.0,
            lan_dists: None,
            data_condition: 0.0,
            encoder_langtok: None,
            decoder_langtok: false,
            sample_tag_prob: 0.0,
            left_pad_source: true,
            left_pad_target: false,
            max_source_positions: 1024,
            max_target_positions: 1024,
            max_tokens: None,
            max_sentences: None,
            required_batch_size_multiple: 1,
            skip_invalid_size_inputs: false,
            switchout_tau: None,
            data_filter: None,
            seed: 1,
        }
    }
}

impl TaskConfig {
    pub fn builder() -> TaskConfigBuilder {
        TaskConfigBuilder::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("parsing task config")
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading task config {}", path.display()))?;
        Self::from_json(&text)
    }

    /// Training mode unless a single direction was requested.
    pub fn is_training(&self) -> bool {
        self.source_lang.is_none() && self.target_lang.is_none()
    }

    pub fn uses_langtok(&self) -> bool {
        self.encoder_langtok.is_some() || self.decoder_langtok
    }

    pub fn eval_lang_pairs(&self) -> &[LangPair] {
        self.eval_lang_pairs.as_deref().unwrap_or(&self.lang_pairs)
    }

    /// Rejects any inconsistent setting with a [`DataError::Configuration`].
    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| -> Result<()> { Err(DataError::config(message).into()) };

        if self.lang_pairs.is_empty() {
            return fail("--lang-pairs is required".into());
        }
        if self.eval_lang_pairs.as_ref().is_some_and(Vec::is_empty) {
            return fail("eval_lang_pairs must not be empty when set".into());
        }
        if self.source_lang.is_some() != self.target_lang.is_some() {
            return fail("source_lang and target_lang must be set together".into());
        }
        if !(self.datasize_t.is_finite() && self.datasize_t > 0.0) {
            return fail(format!("datasize_t must be > 0, got {}", self.datasize_t));
        }
        for (name, value) in [("alpha_p", self.alpha_p), ("sample_tag_prob", self.sample_tag_prob)] {
            if !(0.0..=1.0).contains(&value) {
                return fail(format!("{name} must be in [0, 1], got {value}"));
            }
        }
        if self.dataset_type == PolicyKind::DistanceWeighted {
            match &self.lan_dists {
                None => return fail("dataset_type tcs requires lan_dists".into()),
                Some(dists) if dists.len() != self.lang_pairs.len() => {
                    return fail(format!(
                        "lan_dists has {} entries for {} language pairs",
                        dists.len(),
                        self.lang_pairs.len()
                    ))
                }
                Some(_) => {}
            }
        }
        if self.max_source_positions == 0 || self.max_target_positions == 0 {
            return fail("max source/target positions must be positive".into());
        }
        if self.max_tokens == Some(0) || self.max_sentences == Some(0) {
            return fail("max_tokens and max_sentences must be positive when set".into());
        }
        if self.required_batch_size_multiple == 0 {
            return fail("required_batch_size_multiple must be >= 1".into());
        }
        if let Some(tau) = self.switchout_tau {
            if !(tau.is_finite() && tau > 0.0) {
                return fail(format!("switchout_tau must be > 0, got {tau}"));
            }
        }
        if let Some(filter) = self.data_filter {
            if !(0.0..=1.0).contains(&filter.percentage()) {
                return fail(format!("data filter percentage must be in [0, 1], got {}", filter.percentage()));
            }
        }
        Ok(())
    }
}

/// Builder for TaskConfig with method chaining
#[derive(Default)]
pub struct TaskConfigBuilder {
    config: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn lang_pairs(mut self, pairs: Vec<LangPair>) -> Self {
        self.config.lang_pairs = pairs;
        self
    }

    pub fn eval_lang_pairs(mut self, pairs: Vec<LangPair>) -> Self {
        self.config.eval_lang_pairs = Some(pairs);
        self
    }

    /// Evaluate a single direction; turns training mode off.
    pub fn direction(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.config.source_lang = Some(source.into());
        self.config.target_lang = Some(target.into());
        self
    }

    pub fn dataset_type(mut self, kind: PolicyKind) -> Self {
        self.config.dataset_type = kind;
        self
    }

    pub fn datasize_t(mut self, t: f64) -> Self {
        self.config.datasize_t = t;
        self
    }

    pub fn alpha_p(mut self, alpha: f64) -> Self {
        self.config.alpha_p = alpha;
        self
    }

    /// Raw distances, normalized by the task as `exp(t / 1000)` shares.
    pub fn lan_dists(mut self, dists: Vec<f64>) -> Self {
        self.config.lan_dists = Some(dists);
        self
    }

    pub fn data_condition(mut self, condition: f64) -> Self {
        self.config.data_condition = condition;
        self
    }

    pub fn encoder_langtok(mut self, langtok: EncoderLangTok) -> Self {
        self.config.encoder_langtok = Some(langtok);
        self
    }

    pub fn decoder_langtok(mut self, enabled: bool) -> Self {
        self.config.decoder_langtok = enabled;
        self
    }

    pub fn sample_tag_prob(mut self, p: f64) -> Self {
        self.config.sample_tag_prob = p;
        self
    }

    pub fn left_pad_source(mut self, left_pad: bool) -> Self {
        self.config.left_pad_source = left_pad;
        self
    }

    pub fn left_pad_target(mut self, left_pad: bool) -> Self {
        self.config.left_pad_target = left_pad;
        self
    }

    pub fn max_positions(mut self, source: usize, target: usize) -> Self {
        self.config.max_source_positions = source;
        self.config.max_target_positions = target;
        self
    }

    pub fn max_tokens(mut self, tokens: usize) -> Self {
        self.config.max_tokens = Some(tokens);
        self
    }

    pub fn max_sentences(mut self, sentences: usize) -> Self {
        self.config.max_sentences = Some(sentences);
        self
    }

    pub fn required_batch_size_multiple(mut self, multiple: usize) -> Self {
        self.config.required_batch_size_multiple = multiple;
        self
    }

    pub fn skip_invalid_size_inputs(mut self, skip: bool) -> Self {
        self.config.skip_invalid_size_inputs = skip;
        self
    }

    pub fn switchout_tau(mut self, tau: f64) -> Self {
        self.config.switchout_tau = Some(tau);
        self
    }

    pub fn data_filter(mut self, filter: RandomFilter) -> Self {
        self.config.data_filter = Some(filter);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn build(self) -> TaskConfig {
        self.config
    }
}
