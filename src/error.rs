//! Error types for every stage of a read: building the configuration,
//! validating it, constructing receivers and pulling records.

use std::fmt;
use thiserror::Error;

use crate::models::Offset;

/// A builder argument was absent or unusable. Raised immediately by the
/// setter that received it.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("{0} can not be empty")]
    MissingArgument(&'static str),
    #[error("{name} is invalid: {reason}")]
    InvalidArgument { name: &'static str, reason: String },
}

/// The configuration is incomplete at the time a reader is requested.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Missing(&'static str),
}

/// A receiver instance could not be created by its factory.
///
/// This is a configuration defect, never a transient fault, so a reader
/// hitting it fails permanently instead of retrying.
#[derive(Debug, Error)]
pub enum ConstructionError {
    #[error("receiver constructor arguments were not supplied")]
    MissingConstructorArgs,
    #[error("receiver could not be constructed")]
    Failed(#[source] anyhow::Error),
}

/// Which extractor rejected a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStage {
    Offset,
    Timestamp,
}

impl fmt::Display for ExtractionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionStage::Offset => f.write_str("offset"),
            ExtractionStage::Timestamp => f.write_str("timestamp"),
        }
    }
}

/// Errors returned by the [`SourceReader`][crate::reader::SourceReader]
/// lifecycle calls.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("reader has not been started")]
    NotStarted,
    #[error("reader has already been started")]
    AlreadyStarted,
    #[error("reader is closed")]
    Closed,
    #[error("reader failed permanently: {0}")]
    Failed(String),
    #[error("failed to start receiver")]
    Construction(#[from] ConstructionError),
    #[error("{stage} extraction failed for record {raw}")]
    MalformedRecord {
        /// Debug rendering of the offending record.
        raw: String,
        stage: ExtractionStage,
        #[source]
        source: anyhow::Error,
    },
}

/// The push side of the bridge buffer was closed while a record was
/// being stored. The record is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("bridge buffer is closed")]
pub struct BufferClosed;

/// Errors loading [`ReaderSettings`][crate::settings::ReaderSettings].
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unable to read settings file")]
    Io(#[from] std::io::Error),
    #[error("error deserializing JSON settings")]
    Json(#[from] serde_json::Error),
    #[cfg(feature = "file")]
    #[error("error deserializing YAML settings")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported settings file type: {0:?}")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Invalid(#[from] ConfigurationError),
}

/// Errors a [`RecordHandler`][crate::processor::RecordHandler] returns to
/// steer the processor.
#[derive(Debug)]
pub enum RecordHandlerError {
    /// Retry handling the same record after the retry delay.
    RecordRetryError(anyhow::Error),
    /// Stop the processor.
    UnrecoverableError(anyhow::Error),
}

/// Errors that stop a [`ReaderProcessor`][crate::processor::ReaderProcessor].
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("unrecoverable error handling record at offset {offset}")]
    UnrecoverableError {
        offset: Offset,
        #[source]
        source: anyhow::Error,
    },
    #[error("checkpoint store failed")]
    Checkpoint(#[source] anyhow::Error),
}
