//! Counted "last worker closes" coordination for shared stream outputs.
//!
//! A stage that runs several internal workers still owns a single output
//! stream. Each worker gets a [`FanInSender`]; the stream closes exactly once,
//! when the last of them is dropped. Dropping happens on every exit path,
//! including a worker panic, so a faulting worker cannot leave the output
//! open forever.

use super::channel::StreamSender;
use crate::errors::SendError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct FanInLatch<T> {
    remaining: AtomicUsize,
    closer: Mutex<Option<StreamSender<T>>>,
}

/// Per-worker producer handle onto a shared output stream.
pub struct FanInSender<T> {
    tx: StreamSender<T>,
    latch: Arc<FanInLatch<T>>,
}

impl<T> FanInSender<T> {
    /// Hand `value` to the shared consumer. See [`StreamSender::send`].
    pub async fn send(&self, value: T) -> Result<(), SendError<T>> {
        self.tx.send(value).await
    }

    /// Whether the shared consumer has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Number of workers that still hold a handle.
    pub fn remaining(&self) -> usize {
        self.latch.remaining.load(Ordering::Acquire)
    }
}

impl<T> Drop for FanInSender<T> {
    fn drop(&mut self) {
        if self.latch.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Last worker out: release the owning sender so the stream closes
            // once this handle's own channel reference goes with it.
            let closer = self.latch.closer.lock().take();
            drop(closer);
            tracing::trace!("Last fan-in worker exited, closing shared output");
        }
    }
}

impl<T> StreamSender<T> {
    /// Split this sender into `workers` handles that share the stream.
    ///
    /// The stream closes once every returned handle has been dropped. With
    /// `workers == 0` the stream closes immediately.
    pub fn fan_in(self, workers: usize) -> Vec<FanInSender<T>> {
        if workers == 0 {
            self.close();
            return Vec::new();
        }

        let handles: Vec<StreamSender<T>> = (0..workers).map(|_| self.fork()).collect();
        let latch = Arc::new(FanInLatch {
            remaining: AtomicUsize::new(workers),
            closer: Mutex::new(Some(self)),
        });

        handles
            .into_iter()
            .map(|tx| FanInSender {
                tx,
                latch: Arc::clone(&latch),
            })
            .collect()
    }
}
