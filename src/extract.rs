//! Caller-supplied functions that derive an offset and an event time from
//! a raw record. Both are stateless and cheap to clone, so a configuration
//! holding them can be copied to every reader.

use chrono::Utc;
use std::{fmt, sync::Arc};

use crate::{
    error::{ExtractionStage, ReadError},
    models::{Offset, Record, Timestamp},
};

type OffsetFnInner<T> = dyn Fn(&T) -> Result<Offset, anyhow::Error> + Send + Sync;
type TimestampFnInner<T> =
    dyn Fn(&T) -> Result<Timestamp, anyhow::Error> + Send + Sync;

/// Derives the [`Offset`] of a record.
pub struct OffsetFn<T>(Arc<OffsetFnInner<T>>);

impl<T> OffsetFn<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&T) -> Result<Offset, anyhow::Error> + Send + Sync + 'static,
    {
        OffsetFn(Arc::new(f))
    }

    pub fn apply(&self, record: &T) -> Result<Offset, anyhow::Error> {
        (self.0)(record)
    }
}

impl<T> Clone for OffsetFn<T> {
    fn clone(&self) -> Self {
        OffsetFn(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for OffsetFn<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OffsetFn")
    }
}

/// Derives the event [`Timestamp`] of a record.
pub struct TimestampFn<T>(Arc<TimestampFnInner<T>>);

impl<T> TimestampFn<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&T) -> Result<Timestamp, anyhow::Error> + Send + Sync + 'static,
    {
        TimestampFn(Arc::new(f))
    }

    /// Stamps every record with the wall-clock time it was pulled.
    /// Used when no timestamp function was configured.
    pub fn arrival_time() -> Self {
        TimestampFn::new(|_| Ok(Utc::now()))
    }

    pub fn apply(&self, record: &T) -> Result<Timestamp, anyhow::Error> {
        (self.0)(record)
    }
}

impl<T> Clone for TimestampFn<T> {
    fn clone(&self) -> Self {
        TimestampFn(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for TimestampFn<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TimestampFn")
    }
}

/// The pair of extractors a reader applies to every pulled record.
pub(crate) struct Extractors<T> {
    offset_fn: OffsetFn<T>,
    timestamp_fn: TimestampFn<T>,
}

impl<T: Record> Extractors<T> {
    pub fn new(offset_fn: OffsetFn<T>, timestamp_fn: TimestampFn<T>) -> Self {
        Extractors {
            offset_fn,
            timestamp_fn,
        }
    }

    /// Computes offset and timestamp of `record`. A failing extractor is
    /// reported with the raw record so the caller can find the culprit.
    pub fn extract(&self, record: &T) -> Result<(Offset, Timestamp), ReadError> {
        let offset = self.offset_fn.apply(record).map_err(|source| {
            ReadError::MalformedRecord {
                raw: format!("{:?}", record),
                stage: ExtractionStage::Offset,
                source,
            }
        })?;
        let timestamp = self.timestamp_fn.apply(record).map_err(|source| {
            ReadError::MalformedRecord {
                raw: format!("{:?}", record),
                stage: ExtractionStage::Timestamp,
                source,
            }
        })?;
        Ok((offset, timestamp))
    }
}
