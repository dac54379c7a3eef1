/*!
Checkpoint marks and the interface the host uses to persist them.

A [`CheckpointMark`] is the last offset a reader delivered. It is owned by
the [`SourceReader`][crate::reader::SourceReader]; persisting it between
process restarts is the host's job, abstracted by [`CheckpointStore`].
*/

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

use crate::models::Offset;

/// The last offset delivered downstream. Every offset at or below it is
/// treated as already seen and is never redelivered.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct CheckpointMark {
    pub last_offset: Option<Offset>,
}

impl CheckpointMark {
    /// A mark for a reader that has not delivered anything yet.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn at(offset: Offset) -> Self {
        Self {
            last_offset: Some(offset),
        }
    }

    /// The offset a receiver resumes at after this mark. Saturates at
    /// `u64::MAX`, so use [`covers`](Self::covers) to filter duplicates.
    pub fn next_offset(&self) -> Offset {
        match self.last_offset {
            Some(offset) => offset.saturating_add(1),
            None => 0,
        }
    }

    /// Whether `offset` has already been delivered according to this mark.
    pub fn covers(&self, offset: Offset) -> bool {
        self.last_offset.is_some_and(|last| offset <= last)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Durable storage for checkpoint marks, implemented by the host.
///
/// The [`ReaderProcessor`][crate::processor::ReaderProcessor] loads the
/// mark once when it creates its reader and commits a new one after each
/// handled record.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self) -> Result<Option<CheckpointMark>, anyhow::Error>;

    async fn commit(&self, mark: CheckpointMark) -> Result<(), anyhow::Error>;
}

/// A checkpoint store that keeps the latest mark in memory. Clones share
/// the same mark, which makes it handy for watching progress from another
/// task.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    mark: Arc<RwLock<Option<CheckpointMark>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mark(mark: CheckpointMark) -> Self {
        Self {
            mark: Arc::new(RwLock::new(Some(mark))),
        }
    }

    pub fn current(&self) -> Option<CheckpointMark> {
        *self
            .mark
            .read()
            .expect("Should be able to read the checkpoint mark")
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Result<Option<CheckpointMark>, anyhow::Error> {
        Ok(self.current())
    }

    async fn commit(&self, mark: CheckpointMark) -> Result<(), anyhow::Error> {
        self.mark
            .write()
            .expect("Should be able to write the checkpoint mark")
            .replace(mark);
        Ok(())
    }
}
