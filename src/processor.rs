use async_trait::async_trait;
use std::time::{Duration, Instant};

use crate::{
    checkpoint::CheckpointStore,
    config::ReadConfig,
    error::{ProcessorError, ReadError, RecordHandlerError},
    logger::{DefaultLogger, ReaderLogger},
    models::{Offset, Record, Timestamp},
    reader::{CloseHandle, SourceReader},
};

const RECORD_RETRY_INTERVAL: u64 = 10;

/// A struct that holds the context for a record handler,
/// which is passed to the handler when it is called.
pub struct RecordContext<'a, T> {
    pub value: &'a T,
    pub offset: Offset,
    pub timestamp: Timestamp,
    /// Zero for the first try, counting up with every retry.
    pub attempt: u32,
}

/// A trait that abstracts a record handler.
#[async_trait]
pub trait RecordHandler<T>: Send {
    async fn handle(
        &mut self,
        context: RecordContext<'_, T>,
    ) -> Result<(), RecordHandlerError>;
}

/// Implement RecordHandler for all functions that have the correct signature F
#[async_trait]
impl<T, F> RecordHandler<T> for F
where
    F: for<'a> FnMut(RecordContext<'a, T>) -> Result<(), RecordHandlerError>
        + Send,
    T: Record,
{
    async fn handle(
        &mut self,
        context: RecordContext<'_, T>,
    ) -> Result<(), RecordHandlerError> {
        self(context)
    }
}

/// Drives a [`SourceReader`] the way a host engine would: it starts the
/// reader, hands every delivered record to a [`RecordHandler`] and commits
/// the checkpoint mark after each handled record. It runs until the reader
/// is closed through a [`CloseHandle`] or an error stops it.
pub struct ReaderProcessor<T, H, C> {
    reader: SourceReader<T>,
    handler: H,
    checkpoint_store: C,
    record_retry_delay: Duration,
    last_reported: Instant,
}

impl<T, H, C> ReaderProcessor<T, H, C>
where
    T: Record,
    H: RecordHandler<T>,
    C: CheckpointStore,
{
    pub fn new(reader: SourceReader<T>, handler: H, checkpoint_store: C) -> Self {
        ReaderProcessor {
            reader,
            handler,
            checkpoint_store,
            record_retry_delay: Duration::from_millis(RECORD_RETRY_INTERVAL),
            last_reported: Instant::now(),
        }
    }

    /// Creates a reader from `config`, resumed from the mark found in
    /// `checkpoint_store`, with a [`DefaultLogger`] attached.
    pub async fn from_config(
        config: &ReadConfig<T>,
        handler: H,
        checkpoint_store: C,
    ) -> Result<Self, ProcessorError> {
        let mark = checkpoint_store
            .load()
            .await
            .map_err(ProcessorError::Checkpoint)?;
        let reader = config.create_reader(mark)?.with_logger(
            DefaultLogger::with_custom_report_interval(
                config.settings().report_interval,
            ),
        );
        Ok(Self::new(reader, handler, checkpoint_store))
    }

    pub fn logger(self, logger: impl ReaderLogger + 'static) -> Self {
        ReaderProcessor {
            reader: self.reader.with_logger(logger),
            ..self
        }
    }

    pub fn record_retry_delay_ms(self, record_retry_delay_ms: u64) -> Self {
        ReaderProcessor {
            record_retry_delay: Duration::from_millis(record_retry_delay_ms),
            ..self
        }
    }

    pub fn close_handle(&self) -> CloseHandle<T> {
        self.reader.close_handle()
    }

    pub fn reader(&self) -> &SourceReader<T> {
        &self.reader
    }

    /// Processes records until the reader is closed. The reader is always
    /// closed when this returns.
    pub async fn run(&mut self) -> Result<(), ProcessorError> {
        let result = self.process().await;
        self.reader.close().await;
        result
    }

    async fn process(&mut self) -> Result<(), ProcessorError> {
        match self.reader.start().await {
            Err(ReadError::Closed) => return Ok(()),
            other => other?,
        }
        loop {
            self.report_if_due().await;
            match self.reader.advance().await {
                Ok(true) => self.handle_current().await?,
                Ok(false) => continue,
                // Closed through a close handle.
                Err(ReadError::Closed) => return Ok(()),
                Err(error) => return Err(error.into()),
            }
        }
    }

    async fn handle_current(&mut self) -> Result<(), ProcessorError> {
        let mut attempt = 0;
        // Keep trying to handle the record in case
        // the handler requests this through a RecordHandlerError.
        loop {
            let Some(record) = self.reader.current_record() else {
                return Ok(());
            };
            let offset = record.offset;
            let result = self
                .handler
                .handle(RecordContext {
                    value: &record.value,
                    offset,
                    timestamp: record.timestamp,
                    attempt,
                })
                .await;

            match result {
                Ok(()) => break,
                Err(RecordHandlerError::RecordRetryError(error)) => {
                    if let Some(logger) = self.reader.logger_mut() {
                        logger
                            .record_retry_error(
                                offset,
                                &error,
                                self.record_retry_delay,
                            )
                            .await;
                    }
                    tokio::time::sleep(self.record_retry_delay).await;
                    if self.reader.close_handle().is_closed() {
                        return Ok(());
                    }
                    attempt += 1;
                }
                Err(RecordHandlerError::UnrecoverableError(error)) => {
                    if let Some(logger) = self.reader.logger_mut() {
                        logger.unrecoverable_error(error.as_ref()).await;
                    }
                    return Err(ProcessorError::UnrecoverableError {
                        offset,
                        source: error,
                    });
                }
            }
        }

        let mark = self.reader.checkpoint_mark();
        self.checkpoint_store
            .commit(mark)
            .await
            .map_err(ProcessorError::Checkpoint)?;
        if let Some(logger) = self.reader.logger_mut() {
            logger.checkpoint_committed(&mark).await;
        }
        Ok(())
    }

    async fn report_if_due(&mut self) {
        if let Some(logger) = self.reader.logger_mut() {
            if self.last_reported.elapsed() >= logger.periodic_report_interval()
            {
                logger.periodic_report().await;
                self.last_reported = Instant::now();
            }
        }
    }
}
