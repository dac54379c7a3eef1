/*!
The [`SourceReader`]: a pull-based, checkpointable view over a push-based
[`Receiver`].

A reader owns one receiver instance at a time. The receiver pushes records
into a bounded bridge buffer, and every call to [`SourceReader::advance`]
pulls at most one record from it, derives its offset and timestamp and makes
it the current record.

When the receiver stops or fails, the reader first delivers what it had
already stored, then tears it down and asks the factory for a new instance,
which it tells to resume right after the last delivered offset. Records at or below that
offset are discarded when they arrive again, so the sequence of delivered
offsets stays strictly increasing across restarts. Restarting is retried
without bound; only a factory that can not build a receiver, or an extractor
that rejects a record, ends the read for good.

```text
NotStarted --start--> Running <--> Restarting
                         \            /
                          +-> Failed <
any state --close--> Closed
```
*/

use log::debug;
use std::{fmt, mem, sync::Arc};
use tokio::{
    sync::{watch, Mutex},
    time::Instant,
};

use crate::{
    buffer::{bridge, BridgeBuffer, Pull},
    checkpoint::CheckpointMark,
    error::ReadError,
    extract::Extractors,
    factory::ReceiverFactory,
    logger::{error_chain, ReaderLogger},
    models::{DeliveredRecord, Offset, Record, Timestamp},
    receiver::{self, Receiver, ReceiverState, Store},
    settings::ReaderSettings,
};

/// Publicly visible state of a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderState {
    NotStarted,
    Running,
    Restarting,
    Closed,
    /// The read ended because of an unrecoverable error.
    Failed(String),
}

/// One receiver instance together with the buffer it pushes into.
struct Session<T> {
    generation: u64,
    receiver: Box<dyn Receiver<T>>,
    buffer: BridgeBuffer<T>,
    lifecycle: Arc<watch::Sender<ReceiverState>>,
    signal: watch::Receiver<ReceiverState>,
}

impl<T> Session<T> {
    /// Why the receiver ended its lifetime, if it did.
    fn end_of_life(&self) -> Option<String> {
        match &*self.signal.borrow() {
            ReceiverState::Active => None,
            ReceiverState::Stopped(message) => {
                Some(format!("stopped: {message}"))
            }
            ReceiverState::Failed(message) => Some(format!("failed: {message}")),
            ReceiverState::Shutdown => Some("shut down".to_string()),
        }
    }

    /// Stops the receiver. The buffer is closed before the stop hook runs
    /// so a producer blocked on a full buffer is released and can exit.
    async fn teardown(mut self) {
        self.lifecycle.send_if_modified(|state| {
            if state.is_active() {
                *state = ReceiverState::Shutdown;
                true
            } else {
                false
            }
        });
        let discarded = self.buffer.close();
        if discarded > 0 {
            debug!(
                "discarded {} buffered records of receiver #{}",
                discarded, self.generation
            );
        }
        self.receiver.on_stop().await;
    }
}

enum Phase<T> {
    NotStarted,
    Running(Session<T>),
    Restarting { at: Instant },
    Closed,
    Failed(String),
}

impl<T> Phase<T> {
    fn state(&self) -> ReaderState {
        match self {
            Phase::NotStarted => ReaderState::NotStarted,
            Phase::Running(_) => ReaderState::Running,
            Phase::Restarting { .. } => ReaderState::Restarting,
            Phase::Closed => ReaderState::Closed,
            Phase::Failed(reason) => ReaderState::Failed(reason.clone()),
        }
    }
}

/// State shared between a reader and its close handles.
struct Shared<T> {
    phase: Mutex<Phase<T>>,
    cancel: watch::Sender<bool>,
}

/// Resolves once a close was requested.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|closed| *closed).await;
}

/// Closes a reader from another task, also while `advance` is in flight.
pub struct CloseHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for CloseHandle<T> {
    fn clone(&self) -> Self {
        CloseHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for CloseHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> CloseHandle<T> {
    /// Whether a close was requested.
    pub fn is_closed(&self) -> bool {
        *self.shared.cancel.borrow()
    }

    /// Closes the reader. An in-flight `advance` returns promptly, and the
    /// active receiver's stop hook has returned when this does. Calling it
    /// again is a no-op.
    pub async fn close(&self) {
        self.shared.cancel.send_replace(true);
        let mut phase = self.shared.phase.lock().await;
        if let Phase::Running(session) = mem::replace(&mut *phase, Phase::Closed)
        {
            debug!("closing receiver #{}", session.generation);
            session.teardown().await;
        }
    }
}

/// What the reader last handed out and how far it got.
struct Cursor<T> {
    current: Option<DeliveredRecord<T>>,
    /// Applies only until the first record is delivered.
    start_offset: Offset,
    checkpoint: CheckpointMark,
    watermark: Option<Timestamp>,
}

impl<T> Cursor<T> {
    /// Whether `offset` was delivered before or lies before the start.
    fn already_seen(&self, offset: Offset) -> bool {
        match self.checkpoint.last_offset {
            Some(_) => self.checkpoint.covers(offset),
            None => offset < self.start_offset,
        }
    }

    /// Where a new receiver should pick up.
    fn resume_offset(&self) -> Offset {
        match self.checkpoint.last_offset {
            Some(_) => self.checkpoint.next_offset(),
            None => self.start_offset,
        }
    }
}

/// Reads records of type `T` from a sequence of receivers.
///
/// Created by [`ReadConfig::create_reader`][crate::config::ReadConfig::create_reader].
/// The host calls [`start`](Self::start) once, then [`advance`](Self::advance)
/// repeatedly, and [`close`](Self::close) at the end.
pub struct SourceReader<T> {
    shared: Arc<Shared<T>>,
    factory: Box<dyn ReceiverFactory<T>>,
    extractors: Extractors<T>,
    settings: ReaderSettings,
    cursor: Cursor<T>,
    generation: u64,
    logger: Option<Box<dyn ReaderLogger>>,
}

impl<T: Record> SourceReader<T> {
    pub(crate) fn new(
        factory: Box<dyn ReceiverFactory<T>>,
        extractors: Extractors<T>,
        settings: ReaderSettings,
        checkpoint: Option<CheckpointMark>,
    ) -> Self {
        let checkpoint = checkpoint.unwrap_or_default();
        let start_offset = settings.start_offset;
        let (cancel, _) = watch::channel(false);
        SourceReader {
            shared: Arc::new(Shared {
                phase: Mutex::new(Phase::NotStarted),
                cancel,
            }),
            factory,
            extractors,
            settings,
            cursor: Cursor {
                current: None,
                start_offset,
                checkpoint,
                watermark: None,
            },
            generation: 0,
            logger: None,
        }
    }

    pub fn with_logger(self, logger: impl ReaderLogger + 'static) -> Self {
        SourceReader {
            logger: Some(Box::new(logger)),
            ..self
        }
    }

    pub fn logger_mut(&mut self) -> Option<&mut (dyn ReaderLogger + 'static)> {
        self.logger.as_deref_mut()
    }

    pub fn settings(&self) -> &ReaderSettings {
        &self.settings
    }

    pub fn close_handle(&self) -> CloseHandle<T> {
        CloseHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub async fn state(&self) -> ReaderState {
        self.shared.phase.lock().await.state()
    }

    /// Starts the first receiver. Fails if the factory can not build one.
    pub async fn start(&mut self) -> Result<(), ReadError> {
        let shared = Arc::clone(&self.shared);
        let mut phase = shared.phase.lock().await;
        match &*phase {
            Phase::NotStarted => {}
            Phase::Closed => return Err(ReadError::Closed),
            Phase::Failed(reason) => return Err(ReadError::Failed(reason.clone())),
            Phase::Running(_) | Phase::Restarting { .. } => {
                return Err(ReadError::AlreadyStarted)
            }
        }
        self.launch(&mut phase).await
    }

    /// Pulls the next record. Returns `Ok(true)` when a new current record
    /// is available and `Ok(false)` when nothing arrived within the poll
    /// timeout or while a failed receiver is being replaced. Once a close
    /// was requested it returns [`ReadError::Closed`], even while the close
    /// is still tearing the receiver down.
    pub async fn advance(&mut self) -> Result<bool, ReadError> {
        let shared = Arc::clone(&self.shared);
        let mut cancel = shared.cancel.subscribe();
        let mut phase = tokio::select! {
            biased;
            phase = shared.phase.lock() => phase,
            _ = cancelled(&mut cancel) => return Err(ReadError::Closed),
        };
        let poll_timeout = self.settings.poll_timeout;
        let deadline = Instant::now() + poll_timeout;

        loop {
            let session = match &mut *phase {
                Phase::NotStarted => return Err(ReadError::NotStarted),
                Phase::Closed => return Err(ReadError::Closed),
                Phase::Failed(reason) => {
                    return Err(ReadError::Failed(reason.clone()))
                }
                Phase::Restarting { at } => {
                    let at = *at;
                    if Instant::now() < at {
                        // Never wait longer than a poll for the restart.
                        let wake = at.min(deadline);
                        tokio::select! {
                            biased;
                            _ = cancelled(&mut cancel) => return Err(ReadError::Closed),
                            _ = tokio::time::sleep_until(wake) => {}
                        }
                        if wake < at {
                            return Ok(false);
                        }
                    }
                    self.launch(&mut phase).await?;
                    return Ok(false);
                }
                Phase::Running(session) => session,
            };

            let pulled = match session.end_of_life() {
                // A receiver that ended keeps what it already stored: drain
                // it before replacing the receiver.
                Some(reason) => {
                    session.buffer.seal();
                    match session.buffer.try_pull() {
                        Pull::Record(raw) => Pull::Record(raw),
                        Pull::Empty | Pull::Closed => {
                            self.replace_receiver(&mut phase, reason).await;
                            return Ok(false);
                        }
                    }
                }
                None => {
                    let remaining =
                        deadline.saturating_duration_since(Instant::now());
                    tokio::select! {
                        biased;
                        _ = cancelled(&mut cancel) => return Err(ReadError::Closed),
                        _ = session.signal.changed() => continue,
                        pulled = session.buffer.pull(remaining) => pulled,
                    }
                }
            };

            match pulled {
                Pull::Record(raw) => {
                    let (offset, timestamp) = match self.extractors.extract(&raw)
                    {
                        Ok(extracted) => extracted,
                        Err(error) => {
                            self.fail(&mut phase, &error).await;
                            return Err(error);
                        }
                    };
                    if self.cursor.already_seen(offset) {
                        let resume = self.cursor.resume_offset();
                        if let Some(logger) = self.logger.as_deref_mut() {
                            logger.record_skipped(offset, resume).await;
                        }
                        continue;
                    }
                    self.deliver(DeliveredRecord {
                        value: raw,
                        offset,
                        timestamp,
                    });
                    if let Some(logger) = self.logger.as_deref_mut() {
                        logger.record_delivered(offset, timestamp).await;
                    }
                    return Ok(true);
                }
                Pull::Empty => return Ok(false),
                Pull::Closed => {
                    self.replace_receiver(
                        &mut phase,
                        "dropped its store".to_string(),
                    )
                    .await;
                    return Ok(false);
                }
            }
        }
    }

    /// The record made current by the last successful `advance`.
    pub fn current(&self) -> Option<&T> {
        self.cursor.current.as_ref().map(|record| &record.value)
    }

    pub fn current_record(&self) -> Option<&DeliveredRecord<T>> {
        self.cursor.current.as_ref()
    }

    /// The offset of the current record.
    pub fn current_record_id(&self) -> Option<Offset> {
        self.cursor.current.as_ref().map(|record| record.offset)
    }

    pub fn current_timestamp(&self) -> Option<Timestamp> {
        self.cursor.current.as_ref().map(|record| record.timestamp)
    }

    /// The timestamp of the most recently delivered record, or `None`
    /// before the first one.
    pub fn watermark(&self) -> Option<Timestamp> {
        self.cursor.watermark
    }

    /// The last delivered offset. Offsets at or below it are never
    /// delivered again by this reader or by one resumed from the mark.
    pub fn checkpoint_mark(&self) -> CheckpointMark {
        self.cursor.checkpoint
    }

    /// Stops the active receiver and closes the reader. Idempotent.
    pub async fn close(&mut self) {
        self.close_handle().close().await;
    }

    fn deliver(&mut self, record: DeliveredRecord<T>) {
        self.cursor.checkpoint = CheckpointMark::at(record.offset);
        self.cursor.watermark = Some(record.timestamp);
        self.cursor.current = Some(record);
    }

    /// Builds and starts a new receiver, resuming at the next offset.
    async fn launch(&mut self, phase: &mut Phase<T>) -> Result<(), ReadError> {
        let mut receiver = match self.factory.build() {
            Ok(receiver) => receiver,
            Err(error) => {
                self.fail(phase, &error).await;
                return Err(error.into());
            }
        };
        self.generation += 1;
        let generation = self.generation;
        let start_offset = self.cursor.resume_offset();

        let (sender, buffer) = bridge(self.settings.buffer_capacity);
        let (lifecycle, signal) = receiver::lifecycle();
        receiver.set_start_offset(start_offset);
        let started = receiver
            .on_start(Store::new(sender, Arc::clone(&lifecycle)))
            .await;
        let session = Session {
            generation,
            receiver,
            buffer,
            lifecycle,
            signal,
        };

        match started {
            Ok(()) => {
                *phase = Phase::Running(session);
                if let Some(logger) = self.logger.as_deref_mut() {
                    logger.receiver_started(generation, start_offset).await;
                }
            }
            Err(error) => {
                session.teardown().await;
                self.schedule_restart(phase, format!("failed to start: {error:#}"))
                    .await;
            }
        }
        Ok(())
    }

    /// Tears down the active receiver and schedules its replacement.
    async fn replace_receiver(&mut self, phase: &mut Phase<T>, reason: String) {
        if let Phase::Running(session) =
            mem::replace(phase, Phase::Restarting { at: Instant::now() })
        {
            session.teardown().await;
        }
        self.schedule_restart(phase, reason).await;
    }

    async fn schedule_restart(&mut self, phase: &mut Phase<T>, reason: String) {
        let delay = self.settings.restart_delay;
        *phase = Phase::Restarting {
            at: Instant::now() + delay,
        };
        debug!(
            "receiver #{} will be replaced, resuming after checkpoint {:?}",
            self.generation, self.cursor.checkpoint.last_offset
        );
        if let Some(logger) = self.logger.as_deref_mut() {
            logger.receiver_failed(self.generation, &reason, delay).await;
        }
    }

    /// Ends the read for good.
    async fn fail<E>(&mut self, phase: &mut Phase<T>, error: &E)
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let previous = mem::replace(phase, Phase::Failed(error_chain(error)));
        if let Phase::Running(session) = previous {
            session.teardown().await;
        }
        if let Some(logger) = self.logger.as_deref_mut() {
            logger.unrecoverable_error(error).await;
        }
    }
}

impl<T> fmt::Debug for SourceReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceReader")
            .field("generation", &self.generation)
            .field("resume_offset", &self.cursor.resume_offset())
            .field("checkpoint", &self.cursor.checkpoint)
            .finish()
    }
}
