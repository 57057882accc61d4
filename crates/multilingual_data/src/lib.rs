pub mod collator;
pub mod config;
pub mod dataset;
pub mod dictionary;
pub mod error;
pub mod filter;
mod hash;
pub mod lang_pair;
pub mod minibatch;
pub mod policy;
pub mod sample;
pub mod sampler;
pub mod seed;
pub mod size;
pub mod task;
pub mod text;
pub mod transforms;

pub use collator::{collate_tokens, Collator, LanguagePairCollator};
pub use config::{EncoderLangTok, TaskConfig};
pub use dataset::{LanguagePairDataset, TokenDataset};
pub use dictionary::{Dictionary, Vocabulary};
pub use error::DataError;
pub use lang_pair::LangPair;
pub use minibatch::{StepBatch, TranslationBatch};
pub use policy::{PolicyKind, SamplingPolicy, StepSample};
pub use sample::TranslationSample;
pub use sampler::{batch_by_size, BatchBySize, EpochBatchSampler, Sampler};
pub use seed::numpy_seed;
pub use size::{filter_by_size, Size, SizeLimit};
pub use task::{ModelLangConfig, MultilingualTask, Split};
pub use text::process_bpe_symbol;
pub use transforms::{switchout, Transform};
