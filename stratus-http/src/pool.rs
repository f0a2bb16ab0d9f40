//! Bounded connection pool for a single endpoint.
//!
//! Every live connection, idle or checked out, holds one permit of the pool's
//! semaphore, so the pool never has more than `max_connections` connections
//! open. A connection gives its permit back only when it is destroyed.
//!
//! Checked-out connections are guarded by [`PooledConnection`], which returns
//! the connection to the idle queue when dropped. A connection is returned or
//! destroyed exactly once.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::config::PoolConfig;
use crate::lifecycle::{Executor, LifeCycle, Status, Worker};
use crate::transport::ConnectionManager;
use crate::{CommandRendezvous, HttpCommand, HttpError, HttpRequest, HttpResponse, Result};

/// Sender side of the executor's command queue.
pub type ResubmitQueue = mpsc::UnboundedSender<Arc<CommandRendezvous>>;

struct Pooled<C> {
    connection: C,
    uses: u32,
    _permit: OwnedSemaphorePermit,
}

/// Pool of connections to one endpoint.
pub struct ConnectionPool<M: ConnectionManager> {
    endpoint: Url,
    manager: Arc<M>,
    config: PoolConfig,
    all_connections: Arc<Semaphore>,
    available: Mutex<VecDeque<Pooled<M::Connection>>>,
    returned: Notify,
    resubmit_queue: ResubmitQueue,
    hit_bottom: AtomicBool,
    session_failures: AtomicU32,
    created: AtomicU64,
    destroyed: AtomicU64,
    lifecycle: LifeCycle,
}

impl<M: ConnectionManager> fmt::Debug for ConnectionPool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("endpoint", &self.endpoint.as_str())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Snapshot of a pool's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Endpoint the pool serves.
    pub endpoint: String,
    /// Lifecycle status.
    pub status: Status,
    /// Configured connection limit.
    pub max_connections: usize,
    /// Open connections, idle or checked out.
    pub live: usize,
    /// Connections waiting in the idle queue.
    pub idle: usize,
    /// Connections currently checked out.
    pub in_use: usize,
    /// Connections opened since the pool started.
    pub created: u64,
    /// Connections destroyed since the pool started.
    pub destroyed: u64,
    /// Whether the pool has ever run out of connections.
    pub saturated: bool,
}

impl<M: ConnectionManager> ConnectionPool<M> {
    /// Create an inactive pool for `endpoint`.
    ///
    /// Commands that fail on a connection and may be replayed are sent to
    /// `resubmit_queue`.
    pub fn new(
        endpoint: Url,
        manager: Arc<M>,
        config: PoolConfig,
        resubmit_queue: ResubmitQueue,
        executor: Executor,
    ) -> Arc<Self> {
        let lifecycle = LifeCycle::new(format!("pool({})", endpoint), executor, Vec::new());
        Arc::new(Self {
            all_connections: Arc::new(Semaphore::new(config.max_connections)),
            available: Mutex::new(VecDeque::with_capacity(config.max_connections)),
            returned: Notify::new(),
            hit_bottom: AtomicBool::new(false),
            session_failures: AtomicU32::new(0),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            endpoint,
            manager,
            config,
            resubmit_queue,
            lifecycle,
        })
    }

    /// Endpoint the pool serves.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The pool's lifecycle.
    pub fn lifecycle(&self) -> &LifeCycle {
        &self.lifecycle
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Start the idle sweep loop and begin handing out connections.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.lifecycle.start(self.clone()).await
    }

    /// Stop the pool and close idle connections.
    pub async fn shutdown(&self) -> Status {
        let status = self.lifecycle.shutdown(self.config.shutdown_timeout).await;
        self.returned.notify_waiters();
        status
    }

    /// Counters for monitoring.
    pub fn stats(&self) -> PoolStats {
        let idle = self.available.lock().len();
        let live = self
            .config
            .max_connections
            .saturating_sub(self.all_connections.available_permits());
        PoolStats {
            endpoint: self.endpoint.to_string(),
            status: self.lifecycle.status(),
            max_connections: self.config.max_connections,
            live,
            idle,
            in_use: live.saturating_sub(idle),
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            saturated: self.hit_bottom.load(Ordering::Relaxed),
        }
    }

    /// Check out a validated connection.
    ///
    /// Waits up to `acquire_timeout` for an idle connection or a free permit.
    /// Connections that fail validation are destroyed and the wait restarts.
    pub async fn get_connection(self: &Arc<Self>) -> Result<PooledConnection<M>> {
        loop {
            self.lifecycle.exception_if_not_active()?;
            self.note_if_saturated();

            let entry = self.poll_available().await?;
            if self.manager.is_valid(&entry.connection) {
                trace!(endpoint = %self.endpoint, uses = entry.uses, "Checked out connection");
                return Ok(PooledConnection {
                    pool: self.clone(),
                    entry: Some(entry),
                });
            }

            debug!(endpoint = %self.endpoint, "Discarding invalid connection");
            self.destroy(entry);
        }
    }

    /// Check out a connection for the command carried by `rendezvous`.
    pub async fn get_handle(
        self: &Arc<Self>,
        rendezvous: Arc<CommandRendezvous>,
    ) -> Result<ConnectionHandle<M>> {
        self.lifecycle.exception_if_not_active()?;
        let connection = self.get_connection().await?;
        trace!(
            endpoint = %self.endpoint,
            command = rendezvous.command().id(),
            "Associated connection with command"
        );
        Ok(ConnectionHandle {
            connection,
            rendezvous,
        })
    }

    fn note_if_saturated(&self) {
        if self.available.lock().is_empty()
            && self.all_connections.available_permits() == 0
            && !self.hit_bottom.swap(true, Ordering::Relaxed)
        {
            warn!(
                endpoint = %self.endpoint,
                max_connections = self.config.max_connections,
                "saturated connection pool"
            );
        }
    }

    async fn poll_available(&self) -> Result<Pooled<M::Connection>> {
        let deadline = Instant::now() + self.config.acquire_timeout;
        loop {
            let notified = self.returned.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(entry) = self.available.lock().pop_front() {
                return Ok(entry);
            }
            if let Ok(permit) = self.all_connections.clone().try_acquire_owned() {
                return self.open(permit).await;
            }
            self.lifecycle.exception_if_not_active()?;

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(HttpError::Timeout {
                    endpoint: self.endpoint.to_string(),
                    waited: self.config.acquire_timeout,
                });
            }
        }
    }

    async fn open(&self, permit: OwnedSemaphorePermit) -> Result<Pooled<M::Connection>> {
        match self.manager.connect(&self.endpoint).await {
            Ok(connection) => {
                self.created.fetch_add(1, Ordering::Relaxed);
                debug!(endpoint = %self.endpoint, "Opened connection");
                Ok(Pooled {
                    connection,
                    uses: 0,
                    _permit: permit,
                })
            }
            Err(e) => {
                drop(permit);
                self.returned.notify_waiters();
                Err(e)
            }
        }
    }

    fn return_connection(&self, mut entry: Pooled<M::Connection>) {
        entry.uses += 1;
        let retire = self.config.max_connection_reuse > 0
            && entry.uses >= self.config.max_connection_reuse;
        if retire || !self.lifecycle.is_active() || !self.manager.is_valid(&entry.connection) {
            trace!(endpoint = %self.endpoint, uses = entry.uses, "Retiring connection");
            self.destroy(entry);
            return;
        }
        self.available.lock().push_back(entry);
        self.returned.notify_waiters();
    }

    fn destroy(&self, entry: Pooled<M::Connection>) {
        let Pooled {
            connection,
            _permit: permit,
            ..
        } = entry;
        self.manager.shutdown_connection(connection);
        drop(permit);
        self.destroyed.fetch_add(1, Ordering::Relaxed);
        self.returned.notify_waiters();
    }

    /// Reset the consecutive failure count after a successful exchange.
    pub fn record_success(&self) {
        self.session_failures.store(0, Ordering::Relaxed);
    }

    /// Handle a transport failure of the command carried by `rendezvous`.
    ///
    /// The failure counts against the pool's session failure budget; once
    /// the budget is exhausted the failure is escalated to a fatal exception.
    /// Otherwise the command is requeued if it may be replayed.
    pub fn resubmit_if_replayable(&self, rendezvous: Arc<CommandRendezvous>, error: HttpError) {
        let failures = self.session_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures > self.config.max_session_failures {
            let fatal = HttpError::Fatal(format!(
                "{} consecutive transport failures, last: {}",
                failures, error
            ));
            self.fail_pool(&rendezvous, fatal);
            return;
        }
        self.requeue_or_fail(rendezvous, error);
    }

    /// Requeue a replayable command, or deliver `error` to it.
    ///
    /// Commands failing on a pool that is no longer active are not requeued.
    /// Does not touch the session failure budget.
    pub fn requeue_or_fail(&self, rendezvous: Arc<CommandRendezvous>, error: HttpError) {
        let command = rendezvous.command();
        let attempts = command.increment_failure_count();
        if !self.lifecycle.is_active() {
            debug!(
                endpoint = %self.endpoint,
                command = command.id(),
                status = %self.lifecycle.status(),
                "Pool is not active, failing command"
            );
            rendezvous.set_exception(error);
            return;
        }
        if !self.manager.is_replayable(command) {
            debug!(command = command.id(), error = %error, "Command is not replayable");
            rendezvous.set_exception(error);
            return;
        }
        if attempts > self.config.max_resubmits {
            warn!(
                command = command.id(),
                attempts,
                error = %error,
                "Command exceeded resubmit limit"
            );
            rendezvous.set_exception(error);
            return;
        }

        debug!(
            endpoint = %self.endpoint,
            command = command.id(),
            attempt = attempts,
            error = %error,
            "Resubmitting command"
        );
        if let Err(mpsc::error::SendError(rendezvous)) = self.resubmit_queue.send(rendezvous) {
            rendezvous.set_exception(HttpError::IllegalState(
                "command queue is closed".to_string(),
            ));
        }
    }

    /// Fail the handle's command and shut the pool down.
    pub fn fatal_exception(&self, handle: ConnectionHandle<M>, error: HttpError) {
        let rendezvous = handle.discard();
        self.fail_pool(&rendezvous, error);
    }

    fn fail_pool(&self, rendezvous: &CommandRendezvous, error: HttpError) {
        error!(
            endpoint = %self.endpoint,
            command = rendezvous.command().id(),
            error = %error,
            "Fatal transport error, shutting down pool"
        );
        self.lifecycle.record_exception(error.clone());
        rendezvous.set_exception(error);
        self.lifecycle.request_shutdown();
        self.returned.notify_waiters();
    }

    fn sweep_idle(&self) {
        let stale: Vec<_> = {
            let mut available = self.available.lock();
            let (valid, stale) = available
                .drain(..)
                .partition::<Vec<_>, _>(|entry| self.manager.is_valid(&entry.connection));
            available.extend(valid);
            stale
        };
        if !stale.is_empty() {
            debug!(endpoint = %self.endpoint, count = stale.len(), "Closing stale connections");
        }
        for entry in stale {
            self.destroy(entry);
        }
    }
}

#[async_trait]
impl<M: ConnectionManager> Worker for ConnectionPool<M> {
    async fn do_work(&self) -> Result<()> {
        tokio::time::sleep(self.config.idle_sweep_interval).await;
        self.sweep_idle();
        Ok(())
    }

    async fn do_shutdown(&self) {
        let idle: Vec<_> = self.available.lock().drain(..).collect();
        for entry in idle {
            self.destroy(entry);
        }
        self.returned.notify_waiters();
    }
}

/// A checked-out connection. Dropping it returns the connection to the pool.
pub struct PooledConnection<M: ConnectionManager> {
    pool: Arc<ConnectionPool<M>>,
    entry: Option<Pooled<M::Connection>>,
}

impl<M: ConnectionManager> fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("endpoint", &self.pool.endpoint.as_str())
            .field("uses", &self.uses())
            .finish()
    }
}

impl<M: ConnectionManager> PooledConnection<M> {
    /// The pool the connection belongs to.
    pub fn pool(&self) -> &Arc<ConnectionPool<M>> {
        &self.pool
    }

    /// Requests served by this connection before the current one.
    pub fn uses(&self) -> u32 {
        self.entry.as_ref().map_or(0, |e| e.uses)
    }

    /// Return the connection to the idle queue.
    pub fn release(mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.return_connection(entry);
        }
    }

    /// Close the connection and free its slot.
    pub fn destroy(mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.destroy(entry);
        }
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        &self
            .entry
            .as_ref()
            .expect("BUG: PooledConnection used after release")
            .connection
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self
            .entry
            .as_mut()
            .expect("BUG: PooledConnection used after release")
            .connection
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.return_connection(entry);
        }
    }
}

/// A connection bound to the command it is about to carry.
pub struct ConnectionHandle<M: ConnectionManager> {
    connection: PooledConnection<M>,
    rendezvous: Arc<CommandRendezvous>,
}

impl<M: ConnectionManager> ConnectionHandle<M> {
    /// The command's rendezvous.
    pub fn rendezvous(&self) -> &Arc<CommandRendezvous> {
        &self.rendezvous
    }

    /// The command.
    pub fn command(&self) -> &HttpCommand {
        self.rendezvous.command()
    }

    /// Send `request` over the connection.
    pub async fn execute(&mut self, request: &HttpRequest) -> Result<HttpResponse> {
        let manager = self.connection.pool.manager.clone();
        manager.execute(&mut *self.connection, request).await
    }

    /// Return the connection to the pool.
    pub fn release(self) -> Arc<CommandRendezvous> {
        let Self {
            connection,
            rendezvous,
        } = self;
        connection.release();
        rendezvous
    }

    /// Close the connection and hand back the rendezvous.
    pub fn discard(self) -> Arc<CommandRendezvous> {
        let Self {
            connection,
            rendezvous,
        } = self;
        connection.destroy();
        rendezvous
    }

    /// Cancel the command and close the connection.
    pub fn cancel(self) -> bool {
        let cancelled = self.rendezvous.cancel();
        self.discard();
        cancelled
    }
}
