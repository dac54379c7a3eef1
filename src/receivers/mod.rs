//! Implementations of [`Receiver`][crate::receiver::Receiver] provided by
//! the crate.
//!
//! It is possible to opt in to these implementations by enabling
//! the corresponding feature flags. Both are enabled by default.

#[cfg(feature = "file")]
pub mod file;
#[cfg(feature = "memory")]
pub mod memory;

#[cfg(any(feature = "file", feature = "memory"))]
use crate::{extract::OffsetFn, models::Offset};

/// Whether a record lies before the offset a receiver was asked to start
/// at. Records whose offset can not be read are kept, so the reader gets
/// to see them and report them.
#[cfg(any(feature = "file", feature = "memory"))]
fn before_start<T>(offset_fn: &OffsetFn<T>, record: &T, start: Offset) -> bool {
    matches!(offset_fn.apply(record), Ok(offset) if offset < start)
}
