//! Commands and the rendezvous that carries their outcome back to the caller.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::{HttpError, HttpRequest, HttpResponse, Result};

static NEXT_COMMAND_ID: AtomicU64 = AtomicU64::new(1);

/// A unit of work: a request plus the bookkeeping needed to retry it.
///
/// The request is mutable because redirects retarget it. Signing filters
/// never modify the stored request; they sign a copy on every attempt.
#[derive(Debug)]
pub struct HttpCommand {
    id: u64,
    request: Mutex<HttpRequest>,
    failure_count: AtomicU32,
    redirect_count: AtomicU32,
}

impl HttpCommand {
    /// Wrap a request.
    pub fn new(request: HttpRequest) -> Self {
        Self {
            id: NEXT_COMMAND_ID.fetch_add(1, Ordering::Relaxed),
            request: Mutex::new(request),
            failure_count: AtomicU32::new(0),
            redirect_count: AtomicU32::new(0),
        }
    }

    /// Process-unique command id, used in logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Snapshot of the current request.
    pub fn current_request(&self) -> HttpRequest {
        self.request.lock().clone()
    }

    /// Modify the current request in place.
    pub fn update_request<F>(&self, f: F)
    where
        F: FnOnce(&mut HttpRequest),
    {
        f(&mut self.request.lock());
    }

    /// Request line of the current request.
    pub fn request_line(&self) -> String {
        self.request.lock().request_line()
    }

    /// Whether the current request may be sent again.
    pub fn is_replayable(&self) -> bool {
        self.request.lock().is_replayable()
    }

    /// Record a failed attempt and return the new count.
    pub fn increment_failure_count(&self) -> u32 {
        self.failure_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Failed attempts so far.
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }

    /// Record a followed redirect and return the new count.
    pub fn increment_redirect_count(&self) -> u32 {
        self.redirect_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Redirects followed so far.
    pub fn redirect_count(&self) -> u32 {
        self.redirect_count.load(Ordering::SeqCst)
    }
}

/// Pairs a command with the slot its result is delivered through.
///
/// Exactly one of [`set_response`](Self::set_response),
/// [`set_exception`](Self::set_exception) or [`cancel`](Self::cancel) takes
/// effect; later calls return `false` and do nothing.
#[derive(Debug)]
pub struct CommandRendezvous {
    command: HttpCommand,
    sender: Mutex<Option<oneshot::Sender<Result<HttpResponse>>>>,
}

impl CommandRendezvous {
    /// Create a rendezvous for a request and the future that resolves with its outcome.
    pub fn new(request: HttpRequest) -> (Arc<Self>, ResponseFuture) {
        let (tx, rx) = oneshot::channel();
        let rendezvous = Arc::new(Self {
            command: HttpCommand::new(request),
            sender: Mutex::new(Some(tx)),
        });
        (rendezvous, ResponseFuture { receiver: rx })
    }

    /// The command being executed.
    pub fn command(&self) -> &HttpCommand {
        &self.command
    }

    /// Deliver a response.
    pub fn set_response(&self, response: HttpResponse) -> bool {
        self.complete(Ok(response))
    }

    /// Deliver a failure.
    pub fn set_exception(&self, error: HttpError) -> bool {
        tracing::debug!(
            command = self.command.id(),
            error = %error,
            "Command failed"
        );
        self.complete(Err(error))
    }

    /// Abandon the command. The caller observes [`HttpError::Cancelled`].
    pub fn cancel(&self) -> bool {
        self.complete(Err(HttpError::Cancelled))
    }

    /// Deliver an outcome.
    pub fn complete(&self, result: Result<HttpResponse>) -> bool {
        match self.sender.lock().take() {
            // A dropped receiver still counts as completion.
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Whether an outcome has been delivered.
    pub fn is_done(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Whether the caller has dropped its [`ResponseFuture`].
    pub fn is_abandoned(&self) -> bool {
        self.sender
            .lock()
            .as_ref()
            .is_some_and(oneshot::Sender::is_closed)
    }
}

/// Resolves with the outcome of a submitted command.
#[derive(Debug)]
pub struct ResponseFuture {
    receiver: oneshot::Receiver<Result<HttpResponse>>,
}

impl Future for ResponseFuture {
    type Output = Result<HttpResponse>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(HttpError::Cancelled)))
    }
}
