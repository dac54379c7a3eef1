//! Bridges push-based receivers into a pull-based, checkpointed source.
//!
//! A [`Receiver`][receiver::Receiver] pushes records into a bounded buffer
//! from its own task or thread. A [`SourceReader`][reader::SourceReader]
//! pulls them out one at a time, stamps each with an offset and an event
//! time, and keeps a checkpoint of the last delivered offset. Failed
//! receivers are replaced by fresh instances from a
//! [`ReceiverFactory`][factory::ReceiverFactory], and records they emit
//! again are suppressed by offset.
//!
//! [`ReaderProcessor`][processor::ReaderProcessor] drives a reader end to
//! end, handing records to a handler and committing checkpoints.

pub mod buffer;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod extract;
pub mod factory;
pub mod logger;
pub mod models;
pub mod processor;
pub mod reader;
pub mod receiver;
pub mod receivers;
pub mod settings;

pub use anyhow::anyhow;
pub use async_trait::async_trait;
