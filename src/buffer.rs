/*!
The bridge buffer between a receiver pushing records and a reader pulling
them.

It is a bounded [`tokio::sync::mpsc::channel`]. Pushing into a full buffer
waits until the reader makes room, which is how backpressure reaches the
receiver: nothing is dropped and nothing is buffered beyond the capacity.
Pulling waits at most for a poll timeout so the reader can look at its
receiver's health and at cancellation in between.

Closing the buffer discards whatever is still queued and fails every
pending and future push with [`BufferClosed`], which releases a producer
that is blocked on a full buffer.
*/

use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::BufferClosed;

/// Creates a bridge buffer holding at most `capacity` records.
///
/// # Panics
///
/// Panics if `capacity` is zero. Configuration rejects a zero capacity
/// long before a buffer is created.
pub fn bridge<T>(capacity: usize) -> (BridgeSender<T>, BridgeBuffer<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (BridgeSender { tx }, BridgeBuffer { rx, capacity })
}

/// Result of pulling from a [`BridgeBuffer`].
#[derive(Debug, PartialEq, Eq)]
pub enum Pull<T> {
    Record(T),
    /// Nothing arrived within the poll timeout.
    Empty,
    /// Every sender is gone and the buffer is drained.
    Closed,
}

/// The push side of the bridge buffer, handed to the receiver.
#[derive(Debug)]
pub struct BridgeSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for BridgeSender<T> {
    fn clone(&self) -> Self {
        BridgeSender {
            tx: self.tx.clone(),
        }
    }
}

impl<T> BridgeSender<T> {
    /// Pushes a record, waiting while the buffer is full.
    pub async fn push(&self, record: T) -> Result<(), BufferClosed> {
        self.tx.send(record).await.map_err(|_| BufferClosed)
    }

    /// Pushes a record from a thread outside the async runtime, blocking
    /// the thread while the buffer is full.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn blocking_push(&self, record: T) -> Result<(), BufferClosed> {
        self.tx.blocking_send(record).map_err(|_| BufferClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Number of records currently queued.
    pub fn occupancy(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// The pull side of the bridge buffer, owned by the reader.
#[derive(Debug)]
pub struct BridgeBuffer<T> {
    rx: mpsc::Receiver<T>,
    capacity: usize,
}

impl<T> BridgeBuffer<T> {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Waits up to `timeout` for the next record.
    pub async fn pull(&mut self, timeout: Duration) -> Pull<T> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(record)) => Pull::Record(record),
            Ok(None) => Pull::Closed,
            Err(_) => Pull::Empty,
        }
    }

    /// Takes the next record if one is queued, without waiting.
    pub fn try_pull(&mut self) -> Pull<T> {
        match self.rx.try_recv() {
            Ok(record) => Pull::Record(record),
            Err(mpsc::error::TryRecvError::Empty) => Pull::Empty,
            Err(mpsc::error::TryRecvError::Disconnected) => Pull::Closed,
        }
    }

    /// Stops accepting pushes while keeping the queued records pullable.
    /// Once they are drained, pulls report [`Pull::Closed`].
    pub fn seal(&mut self) {
        self.rx.close();
    }

    /// Closes the buffer and discards the queued records, returning how
    /// many were discarded. Blocked producers are released with
    /// [`BufferClosed`].
    pub fn close(&mut self) -> usize {
        self.seal();
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }
}
