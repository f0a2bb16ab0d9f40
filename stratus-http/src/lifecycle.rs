//! Lifecycle state machine for long-running components.
//!
//! A component owns a [`LifeCycle`] and a [`Worker`]. Starting the lifecycle
//! runs the worker's loop on the configured [`Executor`] until shutdown is
//! requested, the worker fails, or one of the component's dependencies stops
//! being active.
//!
//! ```text
//! INACTIVE --start--> ACTIVE --shutdown--> SHUTDOWN_REQUEST --> SHUTTING_DOWN --> SHUT_DOWN
//!     \________________________shutdown____________________________________________/
//! ```
//!
//! Status only ever moves forward. An error recorded while running is kept
//! and surfaced to callers of [`LifeCycle::exception_if_not_active`].

use async_trait::async_trait;
use futures::future::select_all;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{HttpError, Result};

/// Lifecycle status, ordered by progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Status {
    /// Created, not started.
    Inactive,
    /// Running its work loop.
    Active,
    /// Shutdown requested; the loop exits after the current unit of work.
    ShutdownRequest,
    /// Releasing resources.
    ShuttingDown,
    /// Terminal.
    ShutDown,
}

impl Status {
    /// Upper-case status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Inactive => "INACTIVE",
            Status::Active => "ACTIVE",
            Status::ShutdownRequest => "SHUTDOWN_REQUEST",
            Status::ShuttingDown => "SHUTTING_DOWN",
            Status::ShutDown => "SHUT_DOWN",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of work a lifecycle runs repeatedly.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Perform one unit of work.
    ///
    /// Returning an error stops the loop and records the error. The future
    /// is dropped at an await point when shutdown is requested, so it must
    /// not leave shared state half-updated across awaits.
    async fn do_work(&self) -> Result<()>;

    /// Release resources once the loop has exited.
    async fn do_shutdown(&self) {}
}

/// Where a lifecycle runs its work loop.
#[derive(Debug, Clone)]
pub enum Executor {
    /// Spawn the loop on a runtime.
    Runtime(Handle),
    /// Run the loop inside the task calling [`LifeCycle::start`].
    ///
    /// `start` then returns only once the component has shut down.
    WithinTask,
}

impl Executor {
    /// The current runtime, or [`Executor::WithinTask`] outside of one.
    pub fn current() -> Self {
        Handle::try_current()
            .map(Executor::Runtime)
            .unwrap_or(Executor::WithinTask)
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::current()
    }
}

struct Inner {
    name: String,
    status: watch::Sender<Status>,
    exception: Mutex<Option<HttpError>>,
    dependencies: Vec<LifeCycle>,
    executor: Executor,
}

/// Shared handle to a component's lifecycle.
#[derive(Clone)]
pub struct LifeCycle {
    inner: Arc<Inner>,
}

impl fmt::Debug for LifeCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifeCycle")
            .field("name", &self.inner.name)
            .field("status", &self.status())
            .finish()
    }
}

impl LifeCycle {
    /// Create an inactive lifecycle.
    ///
    /// `dependencies` must be active when this lifecycle starts; if any of
    /// them leaves the active state later, this lifecycle shuts down too.
    pub fn new(name: impl Into<String>, executor: Executor, dependencies: Vec<LifeCycle>) -> Self {
        let (status, _) = watch::channel(Status::Inactive);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                status,
                exception: Mutex::new(None),
                dependencies,
                executor,
            }),
        }
    }

    /// Component name, used in logs.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current status.
    pub fn status(&self) -> Status {
        *self.inner.status.borrow()
    }

    /// Whether the status is [`Status::Active`].
    pub fn is_active(&self) -> bool {
        self.status() == Status::Active
    }

    /// Last recorded error.
    pub fn exception(&self) -> Option<HttpError> {
        self.inner.exception.lock().clone()
    }

    /// Record an error. Does not change the status.
    pub fn record_exception(&self, error: HttpError) {
        *self.inner.exception.lock() = Some(error);
    }

    /// Dependencies of this lifecycle.
    pub fn dependencies(&self) -> &[LifeCycle] {
        &self.inner.dependencies
    }

    /// Fail unless the lifecycle is active.
    ///
    /// The recorded error, if any, is returned in preference to a generic
    /// state error.
    pub fn exception_if_not_active(&self) -> Result<()> {
        let status = self.status();
        if status == Status::Active {
            return Ok(());
        }
        Err(self.exception().unwrap_or_else(|| {
            HttpError::IllegalState(format!("{} is not active: {}", self.inner.name, status))
        }))
    }

    /// Fail unless every dependency is active.
    pub fn verify_dependencies_are_active(&self) -> Result<()> {
        for dependency in &self.inner.dependencies {
            let status = dependency.status();
            if status != Status::Active {
                return Err(HttpError::IllegalState(format!(
                    "{} depends on {}, which is {}",
                    self.inner.name, dependency.inner.name, status
                )));
            }
        }
        Ok(())
    }

    /// Whether the work loop should run another iteration.
    pub fn should_do_work(&self) -> bool {
        self.is_active()
            && self.inner.exception.lock().is_none()
            && self.verify_dependencies_are_active().is_ok()
    }

    /// Start running `worker`.
    ///
    /// Starting an active lifecycle is an error. Starting one that is past
    /// active is a no-op. If a dependency is not active the status is left
    /// unchanged and the error is returned.
    pub async fn start(&self, worker: Arc<dyn Worker>) -> Result<()> {
        match self.status() {
            Status::Active => {
                return Err(HttpError::IllegalState(format!(
                    "{} is already active",
                    self.inner.name
                )));
            }
            Status::Inactive => {}
            _ => return Ok(()),
        }

        self.verify_dependencies_are_active()?;

        let started = self.inner.status.send_if_modified(|status| {
            if *status == Status::Inactive {
                *status = Status::Active;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(HttpError::IllegalState(format!(
                "{} was started concurrently",
                self.inner.name
            )));
        }

        info!(component = %self.inner.name, "Starting");
        let lifecycle = self.clone();
        match &self.inner.executor {
            Executor::Runtime(handle) => {
                handle.spawn(async move { lifecycle.run(worker).await });
            }
            Executor::WithinTask => lifecycle.run(worker).await,
        }
        Ok(())
    }

    async fn run(self, worker: Arc<dyn Worker>) {
        let mut status = self.inner.status.subscribe();

        while self.should_do_work() {
            tokio::select! {
                biased;
                _ = async {
                    let _ = status.wait_for(|s| *s != Status::Active).await;
                } => break,
                _ = self.dependency_lost() => {
                    warn!(component = %self.inner.name, "Dependency is no longer active");
                    break;
                }
                result = worker.do_work() => {
                    if let Err(e) = result {
                        error!(component = %self.inner.name, error = %e, "Work loop failed");
                        self.record_exception(e);
                        break;
                    }
                }
            }
        }

        self.advance(Status::ShuttingDown);
        debug!(component = %self.inner.name, "Shutting down");
        worker.do_shutdown().await;
        self.advance(Status::ShutDown);
        info!(component = %self.inner.name, "Shut down");
    }

    fn dependency_lost(&self) -> impl Future<Output = ()> + Send + 'static {
        let watchers: Vec<_> = self
            .inner
            .dependencies
            .iter()
            .map(|d| {
                let mut rx = d.inner.status.subscribe();
                Box::pin(async move {
                    let _ = rx.wait_for(|s| *s != Status::Active).await;
                })
            })
            .collect();

        async move {
            if watchers.is_empty() {
                std::future::pending::<()>().await;
            } else {
                select_all(watchers).await;
            }
        }
    }

    /// Move the status forward. Transitions backwards are ignored.
    fn advance(&self, next: Status) -> bool {
        self.inner.status.send_if_modified(|status| {
            if *status < next {
                *status = next;
                true
            } else {
                false
            }
        })
    }

    /// Ask the work loop to stop.
    ///
    /// An inactive lifecycle goes straight to [`Status::ShutDown`].
    pub fn request_shutdown(&self) {
        self.inner.status.send_if_modified(|status| match *status {
            Status::Inactive => {
                *status = Status::ShutDown;
                true
            }
            Status::Active => {
                *status = Status::ShutdownRequest;
                true
            }
            _ => false,
        });
    }

    /// Request shutdown and wait up to `wait` for it to complete.
    pub async fn shutdown(&self, wait: Duration) -> Status {
        self.request_shutdown();
        if tokio::time::timeout(wait, self.wait_for(Status::ShutDown))
            .await
            .is_err()
        {
            warn!(
                component = %self.inner.name,
                status = %self.status(),
                waited = ?wait,
                "Timed out waiting for shutdown"
            );
        }
        self.status()
    }

    /// Wait until the status reaches at least `target`.
    pub async fn wait_for(&self, target: Status) {
        let mut rx = self.inner.status.subscribe();
        let _ = rx.wait_for(|s| *s >= target).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    struct Ticker {
        ticks: AtomicU32,
        fail_after: Option<u32>,
        shut_down: AtomicBool,
    }

    #[async_trait]
    impl Worker for Ticker {
        async fn do_work(&self) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let n = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            match self.fail_after {
                Some(limit) if n >= limit => Err(HttpError::Fatal("worker broke".into())),
                _ => Ok(()),
            }
        }

        async fn do_shutdown(&self) {
            self.shut_down.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_status_ordering() {
        assert!(Status::Inactive < Status::Active);
        assert!(Status::Active < Status::ShutdownRequest);
        assert!(Status::ShuttingDown < Status::ShutDown);
        assert_eq!(Status::ShutdownRequest.to_string(), "SHUTDOWN_REQUEST");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_shutdown() {
        let lifecycle = LifeCycle::new("ticker", Executor::current(), vec![]);
        let worker = Arc::new(Ticker::default());
        lifecycle.start(worker.clone()).await.unwrap();
        assert_eq!(lifecycle.status(), Status::Active);

        tokio::time::sleep(Duration::from_millis(55)).await;
        assert!(worker.ticks.load(Ordering::SeqCst) >= 4);

        let status = lifecycle.shutdown(Duration::from_secs(1)).await;
        assert_eq!(status, Status::ShutDown);
        assert!(worker.shut_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let lifecycle = LifeCycle::new("ticker", Executor::current(), vec![]);
        lifecycle.start(Arc::new(Ticker::default())).await.unwrap();
        let err = lifecycle.start(Arc::new(Ticker::default())).await.unwrap_err();
        assert!(matches!(err, HttpError::IllegalState(_)));
        lifecycle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_start_after_shutdown_is_noop() {
        let lifecycle = LifeCycle::new("ticker", Executor::current(), vec![]);
        lifecycle.request_shutdown();
        assert_eq!(lifecycle.status(), Status::ShutDown);
        lifecycle.start(Arc::new(Ticker::default())).await.unwrap();
        assert_eq!(lifecycle.status(), Status::ShutDown);
    }

    #[tokio::test]
    async fn test_inactive_dependency_blocks_start() {
        let dependency = LifeCycle::new("pool", Executor::current(), vec![]);
        let lifecycle = LifeCycle::new("executor", Executor::current(), vec![dependency]);

        let err = lifecycle.start(Arc::new(Ticker::default())).await.unwrap_err();
        assert!(err.to_string().contains("depends on pool"));
        assert_eq!(lifecycle.status(), Status::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dependency_loss_stops_dependent() {
        let dependency = LifeCycle::new("pool", Executor::current(), vec![]);
        dependency.start(Arc::new(Ticker::default())).await.unwrap();
        let lifecycle = LifeCycle::new("executor", Executor::current(), vec![dependency.clone()]);
        lifecycle.start(Arc::new(Ticker::default())).await.unwrap();

        dependency.request_shutdown();
        lifecycle.wait_for(Status::ShutDown).await;
        assert_eq!(lifecycle.status(), Status::ShutDown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_error_is_recorded() {
        let lifecycle = LifeCycle::new("ticker", Executor::current(), vec![]);
        let worker = Arc::new(Ticker {
            fail_after: Some(2),
            ..Default::default()
        });
        lifecycle.start(worker.clone()).await.unwrap();
        lifecycle.wait_for(Status::ShutDown).await;

        assert!(worker.shut_down.load(Ordering::SeqCst));
        let err = lifecycle.exception_if_not_active().unwrap_err();
        assert!(matches!(err, HttpError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_within_task_runs_inline() {
        let lifecycle = LifeCycle::new("inline", Executor::WithinTask, vec![]);
        let worker = Arc::new(Ticker {
            fail_after: Some(1),
            ..Default::default()
        });
        lifecycle.start(worker.clone()).await.unwrap();
        assert_eq!(lifecycle.status(), Status::ShutDown);
        assert_eq!(worker.ticks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let lifecycle = LifeCycle::new("x", Executor::WithinTask, vec![]);
        assert!(lifecycle.advance(Status::ShuttingDown));
        assert!(!lifecycle.advance(Status::Active));
        assert_eq!(lifecycle.status(), Status::ShuttingDown);
    }
}
