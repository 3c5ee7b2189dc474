//! Fixed-capacity FIFO queue with cancellable blocking put/get.
//!
//! A full queue blocks its producers (backpressure) instead of dropping
//! items. The channel itself never discards anything; when a put cannot
//! complete the item is handed back inside the error.

use crate::error::SessionError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Create a bounded channel holding at most `capacity` items.
///
/// # Panics
///
/// Panics if `capacity` is zero. Config validation rejects that value
/// before any channel is built.
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (QueueSender { tx }, QueueReceiver { rx })
}

/// Why a put did not complete.
#[derive(Debug, PartialEq, Eq)]
pub enum PutError<T> {
    /// The session was cancelled while waiting for space.
    Cancelled(T),
    /// The consumer is gone.
    Closed(T),
}

impl<T> From<PutError<T>> for SessionError {
    fn from(e: PutError<T>) -> Self {
        match e {
            PutError::Cancelled(_) => SessionError::Cancelled,
            PutError::Closed(_) => SessionError::Channel("outbound queue consumer closed".into()),
        }
    }
}

/// Result of a blocking get.
#[derive(Debug, PartialEq, Eq)]
pub enum Recv<T> {
    /// The oldest queued item.
    Item(T),
    /// Every producer is gone and the queue is empty.
    Closed,
    /// The session was cancelled while waiting.
    Cancelled,
}

/// Producer half. Cheap to clone; one clone per producer.
#[derive(Debug)]
pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Enqueue `item`, waiting while the queue is full.
    ///
    /// Space is reserved before the item moves, so a cancelled or failed
    /// put always returns the item to the caller.
    ///
    /// # Errors
    ///
    /// [`PutError::Cancelled`] if `cancel` fires first, [`PutError::Closed`]
    /// if the consumer has been dropped.
    pub async fn put(&self, item: T, cancel: &CancellationToken) -> Result<(), PutError<T>> {
        if cancel.is_cancelled() {
            return Err(PutError::Cancelled(item));
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(PutError::Cancelled(item)),
            permit = self.tx.reserve() => match permit {
                Ok(permit) => {
                    permit.send(item);
                    Ok(())
                }
                Err(_) => Err(PutError::Closed(item)),
            },
        }
    }

    /// Whether the consumer has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> QueueReceiver<T> {
    /// Dequeue the oldest item, waiting while the queue is empty.
    pub async fn get(&mut self, cancel: &CancellationToken) -> Recv<T> {
        if cancel.is_cancelled() {
            return Recv::Cancelled;
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => Recv::Cancelled,
            item = self.rx.recv() => match item {
                Some(item) => Recv::Item(item),
                None => Recv::Closed,
            },
        }
    }

    /// Dequeue the oldest item without waiting.
    pub fn try_get(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
