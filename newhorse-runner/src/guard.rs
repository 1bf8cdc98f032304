// ABOUTME: Stream guard that gives every runner stream exactly one terminal event.
// ABOUTME: Normalizes failures to Error, observes cancellation, and drops upstream on finish.

use crate::error::code_for;
use crate::event::ErrorCode;
use crate::traits::RawEventStream;
use crate::RunnerEvent;
use futures::Stream;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

pin_project! {
    /// Wraps a raw runner stream.
    ///
    /// Guarantees, in order of priority:
    /// - once the token is cancelled the next item is `Stopped` and nothing follows;
    /// - a raw `Err` becomes exactly one `RunnerEvent::Error`;
    /// - a stream that ends without a terminal event yields an `Incomplete` error;
    /// - anything after the first terminal event is discarded.
    ///
    /// The inner stream is dropped as soon as a terminal event is produced, so
    /// upstream processes and connections are released immediately.
    pub struct GuardedStream {
        inner: Option<RawEventStream>,
        #[pin]
        cancelled: WaitForCancellationFutureOwned,
        runner: &'static str,
    }
}

impl GuardedStream {
    pub fn new(inner: RawEventStream, cancel: CancellationToken, runner: &'static str) -> Self {
        Self {
            inner: Some(inner),
            cancelled: cancel.cancelled_owned(),
            runner,
        }
    }
}

impl Stream for GuardedStream {
    type Item = RunnerEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        if this.cancelled.poll(cx).is_ready() {
            tracing::info!(runner = %this.runner, "Cancellation observed, stopping runner");
            *this.inner = None;
            return Poll::Ready(Some(RunnerEvent::Stopped));
        }

        let event = match inner.as_mut().poll_next(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Some(Ok(event))) => event,
            Poll::Ready(Some(Err(e))) => {
                let message = format!("{:#}", e);
                tracing::warn!(runner = %this.runner, error = %message, "Runner failed");
                RunnerEvent::Error {
                    code: code_for(&e),
                    message,
                }
            }
            Poll::Ready(None) => {
                tracing::warn!(runner = %this.runner, "Runner ended without a terminal event");
                RunnerEvent::error(ErrorCode::Incomplete, "Runner ended without a result")
            }
        };

        if event.is_terminal() {
            *this.inner = None;
        }
        Poll::Ready(Some(event))
    }
}

/// Wrap a raw runner stream with the terminal-event guarantees
pub fn guard(inner: RawEventStream, cancel: CancellationToken, runner: &'static str) -> GuardedStream {
    GuardedStream::new(inner, cancel, runner)
}
