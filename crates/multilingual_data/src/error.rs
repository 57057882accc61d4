use crate::size::{Size, SizeLimit};
use thiserror::Error;

/// Typed failures raised by the batching pipeline.
///
/// Library functions return `anyhow::Result`; these variants travel inside the
/// `anyhow::Error` so callers that need to react to a specific failure can use
/// `err.downcast_ref::<DataError>()`.
#[derive(Debug, Error)]
pub enum DataError {
    /// An index exceeded the configured maximum positions while filtering in strict mode.
    #[error(
        "size of sample #{index} is invalid (={size}) since max_positions={limit}, \
         skip this example with skip_invalid_size_inputs"
    )]
    SizeViolation {
        index: usize,
        size: Size,
        limit: SizeLimit,
    },

    /// A sequence did not end with the expected end-of-sequence marker.
    #[error("sequence #{row} must end with eos {eos} to move it to the beginning, found {found:?}")]
    MalformedSequence {
        row: usize,
        eos: i64,
        found: Option<i64>,
    },

    /// Missing or inconsistent setup (language pairs, dictionaries, sampling weights).
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl DataError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        DataError::Configuration(message.into())
    }
}
