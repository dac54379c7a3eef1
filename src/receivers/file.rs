use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::task::JoinHandle;

use crate::{
    extract::OffsetFn,
    factory::ReceiverBuilder,
    models::{Offset, Record},
    receiver::{Receiver, Store},
};

use super::before_start;

/// A receiver that replays records loaded from a JSON or YAML file
/// containing an array of records. The file extension decides the format.
#[derive(Debug)]
pub struct FileReceiver<T> {
    records: Arc<Vec<T>>,
    offset_fn: OffsetFn<T>,
    start_offset: Offset,
    handle: Option<JoinHandle<()>>,
}

impl<T> FileReceiver<T>
where
    T: Record + Clone + DeserializeOwned,
{
    pub fn load(
        file_path: impl AsRef<Path>,
        offset_fn: OffsetFn<T>,
    ) -> Result<Self, anyhow::Error> {
        let file_path = file_path.as_ref();
        let file = File::open(file_path).map_err(|error| {
            anyhow::anyhow!("unable to open {}: {error}", file_path.display())
        })?;

        // Determine file extension
        let extension = file_path
            .extension()
            .and_then(std::ffi::OsStr::to_str)
            .unwrap_or("");

        let records: Vec<T> = match extension {
            "json" => serde_json::from_reader(&file)?,
            "yaml" | "yml" => serde_yaml::from_reader(&file)?,
            other => anyhow::bail!("unsupported file type {other:?}"),
        };

        Ok(FileReceiver {
            records: Arc::new(records),
            offset_fn,
            start_offset: 0,
            handle: None,
        })
    }

    /// A factory that loads the file again for every receiver it builds.
    /// A missing or unreadable file fails the build.
    pub fn builder(
        file_path: impl Into<PathBuf>,
        offset_fn: OffsetFn<T>,
    ) -> ReceiverBuilder<Self, (PathBuf, OffsetFn<T>)> {
        ReceiverBuilder::new(|(file_path, offset_fn): (PathBuf, OffsetFn<T>)| {
            Self::load(file_path, offset_fn)
        })
        .with_constructor_args((file_path.into(), offset_fn))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl<T> Receiver<T> for FileReceiver<T>
where
    T: Record + Clone + DeserializeOwned,
{
    fn set_start_offset(&mut self, offset: Offset) {
        self.start_offset = offset;
    }

    async fn on_start(&mut self, store: Store<T>) -> Result<(), anyhow::Error> {
        let records = Arc::clone(&self.records);
        let offset_fn = self.offset_fn.clone();
        let start_offset = self.start_offset;
        let handle = tokio::spawn(async move {
            for record in records.iter() {
                if before_start(&offset_fn, record, start_offset) {
                    continue;
                }
                // Stop replaying if the reader tore this receiver down
                if store.store(record.clone()).await.is_err() {
                    return;
                }
            }
            // Keep the store alive until stopped
            std::future::pending::<()>().await
        });
        self.handle = Some(handle);
        Ok(())
    }

    async fn on_stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}
