/*!
The contract between this crate and a push-based receiver.

A [`Receiver`] is started once with a [`Store`] handle and then pushes
records into it whenever it likes, from its own task or thread. It ends its
life by calling [`Store::stop`] or [`Store::report_error`], or by being
stopped from the outside through [`Receiver::on_stop`]. A receiver instance
is never started twice; the reader asks its factory for a fresh one after
every failure.
*/

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

use crate::{buffer::BridgeSender, error::BufferClosed, models::Offset};

/// Lifecycle state of one receiver instance, as seen by the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverState {
    Active,
    /// The receiver ended its lifetime on its own.
    Stopped(String),
    /// The receiver hit an error it can not recover from.
    Failed(String),
    /// The reader stopped the receiver.
    Shutdown,
}

impl ReceiverState {
    pub fn is_active(&self) -> bool {
        matches!(self, ReceiverState::Active)
    }
}

/// A push-based producer of records.
///
/// `on_start` should return quickly: long-running fetching belongs in a
/// task or thread spawned by the receiver, which pushes through the
/// [`Store`]. `on_stop` must not return before that producer has ended.
#[async_trait]
pub trait Receiver<T>: Send {
    /// Tells the receiver the first offset the reader still needs, before
    /// it is started. Receivers that can resume from a position should
    /// start there. The default ignores it; the reader then discards the
    /// records it has already delivered.
    fn set_start_offset(&mut self, _offset: Offset) {}

    async fn on_start(&mut self, store: Store<T>) -> Result<(), anyhow::Error>;

    async fn on_stop(&mut self);
}

/// The handle a receiver pushes records through.
pub struct Store<T> {
    sender: BridgeSender<T>,
    state: Arc<watch::Sender<ReceiverState>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Store {
            sender: self.sender.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Store<T> {
    pub(crate) fn new(
        sender: BridgeSender<T>,
        state: Arc<watch::Sender<ReceiverState>>,
    ) -> Self {
        Store { sender, state }
    }

    /// Stores a record, waiting while the bridge buffer is full.
    /// Fails once the reader has torn this receiver down.
    pub async fn store(&self, record: T) -> Result<(), BufferClosed> {
        self.sender.push(record).await
    }

    /// Like [`Store::store`], for receivers producing on a plain thread.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn blocking_store(&self, record: T) -> Result<(), BufferClosed> {
        self.sender.blocking_push(record)
    }

    /// Ends this receiver's lifetime without an error. The reader restarts
    /// the stream with a new receiver.
    pub fn stop(&self, message: impl Into<String>) {
        self.transition(ReceiverState::Stopped(message.into()));
    }

    /// Ends this receiver's lifetime with an error. The reader restarts
    /// the stream with a new receiver.
    pub fn report_error(&self, message: &str, error: anyhow::Error) {
        self.transition(ReceiverState::Failed(format!("{message}: {error:#}")));
    }

    /// Whether the receiver should stop producing, either because it ended
    /// itself or because the reader tore it down.
    pub fn is_stopped(&self) -> bool {
        !self.state.borrow().is_active() || self.sender.is_closed()
    }

    fn transition(&self, next: ReceiverState) {
        self.state.send_if_modified(|state| {
            if state.is_active() {
                *state = next;
                true
            } else {
                false
            }
        });
    }
}

/// Creates a store for a fresh receiver together with the reader's view
/// of that receiver's state.
pub(crate) fn lifecycle() -> (
    Arc<watch::Sender<ReceiverState>>,
    watch::Receiver<ReceiverState>,
) {
    let (tx, rx) = watch::channel(ReceiverState::Active);
    (Arc::new(tx), rx)
}
