//! Cancellation-aware copier placed in front of every stage.
//!
//! A relay races the cancellation signal against each receive and each send,
//! so it never forwards a value after it has observed cancellation and never
//! stays parked on a handoff nobody will complete. Its output closes exactly
//! once, when the copy task returns.

use super::metrics::{HopRecorder, RelayExit};
use crate::signal::CancellationSignal;
use crate::stream::{StreamReceiver, StreamSender, stream};
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

/// Guard `input` with `signal` on a detached task.
///
/// The returned stream yields the input's values in order until either the
/// input closes or the signal fires, then closes.
pub fn relay<T>(input: StreamReceiver<T>, signal: &CancellationSignal) -> StreamReceiver<T>
where
    T: Send + 'static,
{
    let hop = Arc::new(HopRecorder::new(0, "relay"));
    spawn_relay(input, signal.clone(), hop, &TaskTracker::new(), Uuid::nil())
}

pub(crate) fn spawn_relay<T>(
    input: StreamReceiver<T>,
    signal: CancellationSignal,
    hop: Arc<HopRecorder>,
    tracker: &TaskTracker,
    run_id: Uuid,
) -> StreamReceiver<T>
where
    T: Send + 'static,
{
    let (tx, rx) = stream();
    tracker.spawn(async move {
        let cause = forward(input, &tx, &signal, &hop).await;
        hop.record_exit(cause);
        tx.close();

        tracing::trace!(
            run_id = %run_id,
            hop = hop.index(),
            stage = hop.target(),
            forwarded = hop.forwarded(),
            cause = ?cause,
            "Relay closed its output"
        );
    });
    rx
}

async fn forward<T>(
    mut input: StreamReceiver<T>,
    output: &StreamSender<T>,
    signal: &CancellationSignal,
    hop: &HopRecorder,
) -> RelayExit {
    loop {
        let value = tokio::select! {
            biased;
            _ = signal.cancelled() => return RelayExit::Cancelled,
            _ = output.closed() => return RelayExit::DownstreamClosed,
            next = input.recv() => match next {
                Some(value) => value,
                None => return RelayExit::UpstreamClosed,
            },
        };

        // Losing this race may leave the value parked in the output slot,
        // where the consumer can still take it: at most one in flight.
        tokio::select! {
            biased;
            _ = signal.cancelled() => return RelayExit::Cancelled,
            sent = output.send(value) => {
                if sent.is_err() {
                    return RelayExit::DownstreamClosed;
                }
            }
        }
        hop.record_forward();
    }
}
