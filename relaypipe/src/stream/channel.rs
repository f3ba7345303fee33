//! Single-producer/single-consumer stream with synchronous handoff.
//!
//! Built on a one-slot tokio mpsc channel plus a per-value acknowledgement:
//! `send` returns only after the consumer has taken the value, so a producer
//! can never run ahead of its consumer by more than the value in hand.
//!
//! If a `send` future is dropped while waiting for the acknowledgement, the
//! value stays in the slot and may still be received. This is the single
//! in-flight element that can cross a cancellation boundary.

use crate::errors::SendError;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

struct Handoff<T> {
    value: T,
    ack: oneshot::Sender<()>,
}

/// Create a new open stream.
pub fn stream<T>() -> (StreamSender<T>, StreamReceiver<T>) {
    let (tx, rx) = mpsc::channel(1);
    (StreamSender { tx }, StreamReceiver { rx })
}

/// Producer half of a stream.
///
/// Not `Clone`: a stream has exactly one producer. Closing consumes the
/// sender, and dropping it closes the stream too, so a stream cannot be
/// closed twice or written after close.
pub struct StreamSender<T> {
    tx: mpsc::Sender<Handoff<T>>,
}

impl<T> StreamSender<T> {
    /// Hand `value` to the consumer, waiting until it has been received.
    ///
    /// Fails if the consumer is gone. The value is returned in the error when
    /// it never reached the slot; it is lost if the consumer dropped the
    /// stream while the value was waiting in the slot.
    pub async fn send(&self, value: T) -> Result<(), SendError<T>> {
        let (ack, acked) = oneshot::channel();
        self.tx
            .send(Handoff { value, ack })
            .await
            .map_err(|e| SendError(Some(e.0.value)))?;

        acked.await.map_err(|_| SendError(None))
    }

    /// Close the stream. The consumer sees end-of-stream after draining.
    pub fn close(self) {
        drop(self);
    }

    /// Whether the consumer has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Completes once the consumer has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Second handle onto the same channel, for fan-in coordination only.
    pub(crate) fn fork(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> std::fmt::Debug for StreamSender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSender")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Consumer half of a stream.
pub struct StreamReceiver<T> {
    rx: mpsc::Receiver<Handoff<T>>,
}

impl<T> StreamReceiver<T> {
    /// Receive the next value, or `None` once the producer has closed.
    ///
    /// Cancel safe: dropping the future before it completes loses nothing.
    pub async fn recv(&mut self) -> Option<T> {
        let Handoff { value, ack } = self.rx.recv().await?;
        let _ = ack.send(());
        Some(value)
    }

    /// Drain the stream until the producer closes it.
    pub async fn collect_all(mut self) -> Vec<T> {
        let mut values = Vec::new();
        while let Some(value) = self.recv().await {
            values.push(value);
        }
        values
    }
}

impl<T> Stream for StreamReceiver<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx).map(|handoff| {
            handoff.map(|Handoff { value, ack }| {
                let _ = ack.send(());
                value
            })
        })
    }
}

impl<T> std::fmt::Debug for StreamReceiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReceiver").finish_non_exhaustive()
    }
}

/// Spawn a producer task that sends every item of `iter`, then closes.
///
/// The producer stops early if the consumer goes away.
pub fn from_iter<I>(iter: I) -> StreamReceiver<I::Item>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    let (tx, rx) = stream();
    let iter = iter.into_iter();
    tokio::spawn(async move {
        for value in iter {
            if tx.send(value).await.is_err() {
                tracing::trace!("Source consumer gone, stopping producer");
                break;
            }
        }
    });
    rx
}
