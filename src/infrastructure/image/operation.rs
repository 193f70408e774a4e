//! Cancellable, invalidatable fetch operation.
//!
//! State moves `Pending -> Running -> Completed`, or to `Canceled` from either
//! non-terminal state. The first terminal transition wins and is the only one
//! that delivers an event; later attempts are no-ops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::domain::entities::{
    DownloadEvent, DownloadOutcome, ImageRequest, OperationId, OperationState, decode_or_placeholder,
};
use crate::domain::ports::{ImageTransport, TransportOptions};

/// Where a terminal event is delivered.
///
/// The receiving side decides which task observes the result.
#[derive(Debug, Default)]
pub enum CompletionSink {
    /// Send to a long-lived event channel.
    Channel(mpsc::UnboundedSender<DownloadEvent>),
    /// Send to a single waiter.
    Once(oneshot::Sender<DownloadEvent>),
    /// Drop the event.
    #[default]
    Discard,
}

impl CompletionSink {
    fn deliver(self, event: DownloadEvent) {
        let id = event.id.clone();
        let delivered = match self {
            Self::Channel(tx) => tx.send(event).is_ok(),
            Self::Once(tx) => tx.send(event).is_ok(),
            Self::Discard => true,
        };
        if !delivered {
            trace!(id = %id, "Download receiver gone, event dropped");
        }
    }
}

impl From<mpsc::UnboundedSender<DownloadEvent>> for CompletionSink {
    fn from(tx: mpsc::UnboundedSender<DownloadEvent>) -> Self {
        Self::Channel(tx)
    }
}

impl From<oneshot::Sender<DownloadEvent>> for CompletionSink {
    fn from(tx: oneshot::Sender<DownloadEvent>) -> Self {
        Self::Once(tx)
    }
}

struct OperationControl {
    id: OperationId,
    state: AtomicU8,
    invalidated: AtomicBool,
    abort: Notify,
    sink: Mutex<Option<CompletionSink>>,
}

/// Shared control handle for a fetch operation.
#[derive(Clone)]
pub struct OperationHandle {
    control: Arc<OperationControl>,
}

impl std::fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle")
            .field("id", &self.control.id)
            .field("state", &self.state())
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}

impl OperationHandle {
    /// Operation identifier.
    #[must_use]
    pub fn id(&self) -> &OperationId {
        &self.control.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> OperationState {
        OperationState::from_u8(self.control.state.load(Ordering::Acquire))
    }

    /// Returns true once the invalidated flag is set.
    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.control.invalidated.load(Ordering::Acquire)
    }

    /// Returns true if both handles refer to the same operation.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.control, &other.control)
    }

    /// Cancels the operation and delivers [`DownloadOutcome::Canceled`].
    ///
    /// Returns false if the operation had already reached a terminal state.
    pub fn cancel(&self) -> bool {
        let won = self.transition(
            &[OperationState::Pending, OperationState::Running],
            OperationState::Canceled,
        );
        if won {
            self.control.abort.notify_one();
            debug!(id = %self.id(), "Canceled download");
            self.deliver(DownloadOutcome::Canceled);
        }
        won
    }

    /// Marks the result as unwanted. The operation still completes and the
    /// event is delivered with `invalidated` set.
    ///
    /// Returns false if the operation had already reached a terminal state.
    pub fn invalidate(&self) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        self.control.invalidated.store(true, Ordering::Release);
        debug!(id = %self.id(), "Invalidated download");
        true
    }

    fn start(&self) -> bool {
        self.transition(&[OperationState::Pending], OperationState::Running)
    }

    fn complete(&self, outcome: DownloadOutcome) {
        if self.transition(&[OperationState::Running], OperationState::Completed) {
            self.deliver(outcome);
        } else {
            trace!(id = %self.id(), "Result arrived after cancellation, dropped");
        }
    }

    fn transition(&self, from: &[OperationState], to: OperationState) -> bool {
        from.iter().any(|state| {
            self.control
                .state
                .compare_exchange(*state as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
    }

    fn deliver(&self, outcome: DownloadOutcome) {
        let Some(sink) = self.control.sink.lock().take() else {
            warn!(id = %self.id(), "Terminal event already delivered");
            return;
        };
        sink.deliver(DownloadEvent {
            id: self.id().clone(),
            outcome,
            invalidated: self.is_invalidated(),
        });
    }
}

/// One network retrieval plus its control state.
pub struct FetchOperation {
    request: ImageRequest,
    options: TransportOptions,
    handle: OperationHandle,
}

impl std::fmt::Debug for FetchOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOperation")
            .field("url", &self.request.url.as_str())
            .field("handle", &self.handle)
            .field("trust_all_certificates", &self.options.trust_all_certificates)
            .finish_non_exhaustive()
    }
}

impl FetchOperation {
    /// Creates a pending operation.
    #[must_use]
    pub fn new(
        id: OperationId,
        request: ImageRequest,
        options: TransportOptions,
        sink: CompletionSink,
    ) -> Self {
        let control = OperationControl {
            id,
            state: AtomicU8::new(OperationState::Pending as u8),
            invalidated: AtomicBool::new(false),
            abort: Notify::new(),
            sink: Mutex::new(Some(sink)),
        };
        Self {
            request,
            options,
            handle: OperationHandle {
                control: Arc::new(control),
            },
        }
    }

    /// Control handle for cancel and invalidate.
    #[must_use]
    pub fn handle(&self) -> OperationHandle {
        self.handle.clone()
    }

    /// Outgoing request.
    #[must_use]
    pub const fn request(&self) -> &ImageRequest {
        &self.request
    }

    /// Transport settings.
    #[must_use]
    pub const fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Runs the network call and reports its outcome.
    ///
    /// Does nothing if the operation was canceled while queued. Cancellation
    /// during the call drops the transport future.
    pub async fn run(self, transport: Arc<dyn ImageTransport>) {
        let Self {
            request,
            options,
            handle,
        } = self;

        if !handle.start() {
            trace!(id = %handle.id(), "Skipping canceled download");
            return;
        }

        let url = request.url.clone();
        trace!(id = %handle.id(), url = %url, "Download started");

        tokio::select! {
            biased;
            () = handle.control.abort.notified() => {
                debug!(id = %handle.id(), url = %url, "In-flight download aborted");
            }
            result = transport.fetch(request, options) => {
                let outcome = match result {
                    Ok(bytes) => {
                        let for_decode = bytes.clone();
                        let image = tokio::task::spawn_blocking(move || decode_or_placeholder(&for_decode))
                            .await
                            .unwrap_or_else(|e| {
                                warn!(error = %e, "Decode task panicked");
                                image::DynamicImage::new_rgba8(0, 0)
                            });
                        debug!(id = %handle.id(), url = %url, size = bytes.len(), "Download finished");
                        DownloadOutcome::Success { image: Arc::new(image), bytes }
                    }
                    Err(e) => {
                        warn!(id = %handle.id(), url = %url, error = %e, "Download failed");
                        DownloadOutcome::Error(e)
                    }
                };
                handle.complete(outcome);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::RequestCachePolicy;
    use crate::domain::errors::FetchError;
    use crate::domain::ports::mocks::StubTransport;
    use bytes::Bytes;
    use std::time::Duration;

    const URL: &str = "https://example.com/a.png";

    fn operation(sink: impl Into<CompletionSink>) -> FetchOperation {
        let request = ImageRequest::get(
            reqwest::Url::parse(URL).unwrap(),
            RequestCachePolicy::default(),
            Duration::from_secs(5),
        );
        FetchOperation::new(
            OperationId::new("op"),
            request,
            TransportOptions::default(),
            sink.into(),
        )
    }

    #[tokio::test]
    async fn test_success_is_delivered_once() {
        let transport = Arc::new(StubTransport::new());
        transport.respond(URL, Ok(Bytes::from_static(b"bytes")));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let op = operation(tx);
        let handle = op.handle();

        op.run(transport).await;

        let event = rx.recv().await.unwrap();
        assert!(event.outcome.is_success());
        assert!(!event.invalidated);
        assert_eq!(handle.state(), OperationState::Completed);
        assert!(!handle.cancel());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_error_is_reported() {
        let transport = Arc::new(StubTransport::new());
        transport.respond(URL, Err(FetchError::network("down")));
        let (tx, rx) = oneshot::channel();

        operation(tx).run(transport).await;

        let event = rx.await.unwrap();
        assert!(matches!(event.outcome, DownloadOutcome::Error(FetchError::Network { .. })));
    }

    #[tokio::test]
    async fn test_cancel_while_pending_skips_network() {
        let transport = Arc::new(StubTransport::new());
        let (tx, rx) = oneshot::channel();
        let op = operation(tx);

        assert!(op.handle().cancel());
        op.run(transport.clone()).await;

        assert!(matches!(rx.await.unwrap().outcome, DownloadOutcome::Canceled));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_in_flight_suppresses_late_success() {
        let transport = Arc::new(StubTransport::gated());
        transport.respond(URL, Ok(Bytes::from_static(b"late")));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let op = operation(tx);
        let handle = op.handle();

        let task = tokio::spawn(op.run(transport.clone()));
        while transport.calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(handle.cancel());
        transport.release(1);
        task.await.unwrap();

        let event = rx.recv().await.unwrap();
        assert!(matches!(event.outcome, DownloadOutcome::Canceled));
        assert!(rx.try_recv().is_err());
        assert_eq!(handle.state(), OperationState::Canceled);
    }

    #[tokio::test]
    async fn test_invalidated_flag_travels_with_result() {
        let transport = Arc::new(StubTransport::new());
        transport.respond(URL, Ok(Bytes::from_static(b"x")));
        let (tx, rx) = oneshot::channel();
        let op = operation(tx);

        assert!(op.handle().invalidate());
        op.run(transport).await;

        let event = rx.await.unwrap();
        assert!(event.invalidated);
        assert!(event.outcome.is_success());
    }

    #[tokio::test]
    async fn test_concurrent_cancels_deliver_one_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let op = operation(tx);
        let handles: Vec<_> = (0..8).map(|_| op.handle()).collect();

        let wins = futures_util::future::join_all(
            handles
                .into_iter()
                .map(|h| tokio::spawn(async move { h.cancel() })),
        )
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(true)))
        .count();

        assert_eq!(wins, 1);
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }
}
