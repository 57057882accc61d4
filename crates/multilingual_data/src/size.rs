//! Size descriptions and max-position filtering.
//!
//! A dataset reports the size of each example as a [`Size`] and the task
//! describes what it can handle as a [`SizeLimit`]. Both come in three shapes
//! (scalar, positional tuple, named fields), and every pairing of the two has
//! an explicit comparison rule in [`SizeLimit::admits`].
//!
//! Throughout, a `None` on either side of a comparison means "unconstrained"
//! and always passes.

use crate::dataset::TokenDataset;
use crate::error::DataError;
use anyhow::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Number of dropped ids echoed back in the non-strict warning.
const REPORTED_DROPPED_IDS: usize = 10;

/// The value stored under one named field, either a single count or a
/// positional group of counts (e.g. `(source, target)`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    One(Option<usize>),
    Many(Vec<Option<usize>>),
}

impl FieldValue {
    /// Views the field as a positional sequence.
    pub fn as_slice(&self) -> &[Option<usize>] {
        match self {
            FieldValue::One(value) => std::slice::from_ref(value),
            FieldValue::Many(values) => values,
        }
    }
}

/// Size of a single dataset example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Size {
    /// Plain token count.
    Scalar(usize),
    /// Positional counts, e.g. `(source_len, target_len)`.
    Tuple(Vec<Option<usize>>),
    /// Named counts, e.g. one `(source_len, target_len)` per language pair.
    Map(IndexMap<String, FieldValue>),
}

impl Size {
    /// Source/target length pair as reported by translation datasets.
    pub fn pair(source: usize, target: Option<usize>) -> Self {
        Size::Tuple(vec![Some(source), target])
    }

    /// The first field of a multi-field size (or the scalar itself).
    fn first_field(&self) -> Option<usize> {
        match self {
            Size::Scalar(value) => Some(*value),
            Size::Tuple(values) => values.first().copied().flatten(),
            Size::Map(fields) => fields
                .values()
                .next()
                .and_then(|field| field.as_slice().first().copied().flatten()),
        }
    }
}

/// Maximum positions a consumer accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizeLimit {
    Scalar(usize),
    FieldTuple(Vec<Option<usize>>),
    FieldMap(IndexMap<String, FieldValue>),
}

fn passes(value: Option<usize>, limit: Option<usize>) -> bool {
    match (value, limit) {
        (Some(value), Some(limit)) => value <= limit,
        _ => true,
    }
}

/// Pairwise comparison that stops at the shorter side.
fn zip_passes(values: &[Option<usize>], limits: &[Option<usize>]) -> bool {
    values
        .iter()
        .zip(limits)
        .all(|(&value, &limit)| passes(value, limit))
}

impl SizeLimit {
    /// Returns `true` if an example of the given size fits inside this limit.
    ///
    /// | limit \ size | scalar | tuple | map |
    /// |---|---|---|---|
    /// | scalar | `s <= l` | first field `<= l` | first field `<= l` |
    /// | tuple | `s <= l_i` for every `l_i` | zip | zip over field values |
    /// | map | error | error | zip per shared key |
    ///
    /// A scalar limit against a multi-field size looks at the first field only.
    /// This is legacy behavior kept so filtering decisions stay stable; it is
    /// not a general multi-field comparison.
    pub fn admits(&self, size: &Size) -> Result<bool> {
        let fits = match (self, size) {
            (SizeLimit::Scalar(limit), Size::Scalar(value)) => value <= limit,
            (SizeLimit::Scalar(limit), multi) => passes(multi.first_field(), Some(*limit)),
            (SizeLimit::FieldTuple(limits), Size::Scalar(value)) => {
                limits.iter().all(|&limit| passes(Some(*value), limit))
            }
            (SizeLimit::FieldTuple(limits), Size::Tuple(values)) => zip_passes(values, limits),
            (SizeLimit::FieldTuple(limits), Size::Map(fields)) => {
                fields.values().zip(limits).all(|(field, &limit)| {
                    field.as_slice().iter().all(|&value| passes(value, limit))
                })
            }
            (SizeLimit::FieldMap(limits), Size::Map(fields)) => {
                limits.iter().all(|(key, limit)| match fields.get(key) {
                    Some(field) => zip_passes(field.as_slice(), limit.as_slice()),
                    None => true,
                })
            }
            (SizeLimit::FieldMap(_), other) => {
                return Err(DataError::config(format!(
                    "per-field max_positions={self} cannot be compared with unnamed size {other}"
                ))
                .into());
            }
        };
        Ok(fits)
    }
}

/// Result of splitting indices by whether they fit a [`SizeLimit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizeFilterOutcome {
    /// Indices that fit, in input order.
    pub kept: Vec<usize>,
    /// Indices that were too large, in encounter order.
    pub dropped: Vec<usize>,
}

/// Splits `indices` into those that fit `limit` and those that do not.
pub fn partition_by_size<F>(indices: &[usize], size_of: F, limit: &SizeLimit) -> Result<SizeFilterOutcome>
where
    F: Fn(usize) -> Size,
{
    let mut outcome = SizeFilterOutcome::default();
    for &index in indices {
        if limit.admits(&size_of(index))? {
            outcome.kept.push(index);
        } else {
            outcome.dropped.push(index);
        }
    }
    Ok(outcome)
}

/// Removes indices whose size exceeds `max_positions`.
///
/// With `strict` set, any oversized example fails the call with
/// [`DataError::SizeViolation`] naming the first offender. Otherwise the
/// offenders are dropped and a warning is logged.
pub fn filter_by_size<D>(
    indices: &[usize],
    dataset: &D,
    max_positions: &SizeLimit,
    strict: bool,
) -> Result<Vec<usize>>
where
    D: TokenDataset + ?Sized,
{
    let SizeFilterOutcome { kept, dropped } =
        partition_by_size(indices, |index| dataset.size(index), max_positions)?;

    if let Some(&first) = dropped.first() {
        if strict {
            return Err(DataError::SizeViolation {
                index: first,
                size: dataset.size(first),
                limit: max_positions.clone(),
            }
            .into());
        }
        warn!(
            skipped = dropped.len(),
            max_positions = %max_positions,
            first_ids = ?&dropped[..dropped.len().min(REPORTED_DROPPED_IDS)],
            "samples have invalid sizes and will be skipped"
        );
    }
    Ok(kept)
}

fn fmt_optional(f: &mut fmt::Formatter<'_>, value: Option<usize>) -> fmt::Result {
    match value {
        Some(value) => write!(f, "{value}"),
        None => f.write_str("None"),
    }
}

fn fmt_tuple(f: &mut fmt::Formatter<'_>, values: &[Option<usize>]) -> fmt::Result {
    f.write_str("(")?;
    for (i, &value) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        fmt_optional(f, value)?;
    }
    f.write_str(")")
}

fn fmt_fields(f: &mut fmt::Formatter<'_>, fields: &IndexMap<String, FieldValue>) -> fmt::Result {
    f.write_str("{")?;
    for (i, (key, field)) in fields.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{key}: ")?;
        match field {
            FieldValue::One(value) => fmt_optional(f, *value)?,
            FieldValue::Many(values) => fmt_tuple(f, values)?,
        }
    }
    f.write_str("}")
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Size::Scalar(value) => write!(f, "{value}"),
            Size::Tuple(values) => fmt_tuple(f, values),
            Size::Map(fields) => fmt_fields(f, fields),
        }
    }
}

impl fmt::Display for SizeLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeLimit::Scalar(value) => write!(f, "{value}"),
            SizeLimit::FieldTuple(values) => fmt_tuple(f, values),
            SizeLimit::FieldMap(fields) => fmt_fields(f, fields),
        }
    }
}
