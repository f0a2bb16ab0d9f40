//! Executor service: runs commands against pooled connections.
//!
//! Requests are wrapped in a [`CommandRendezvous`] and put on a FIFO queue.
//! The service's worker drains that queue and spawns one task per command.
//! Each attempt of a command:
//!
//! 1. checks the request and runs the filters on a copy of it,
//! 2. checks out a connection from the pool for the request's origin,
//! 3. performs the exchange,
//! 4. dispatches the response: 2xx completes the command, 3xx goes to the
//!    redirect handler, 5xx to the retry handler, anything else fails the
//!    command with a classified error.
//!
//! Transport failures are handed to the pool, which requeues replayable
//! commands on the same queue.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, trace};
use url::Url;

use crate::config::{ExecutorConfig, PoolConfig};
use crate::filters::RequestFilter;
use crate::lifecycle::{Executor, LifeCycle, Status, Worker};
use crate::pool::{ConnectionPool, PoolStats};
use crate::retry::{BackoffLimitedRetryHandler, RedirectionRetryHandler, RetryHandler};
use crate::transport::ConnectionManager;
use crate::{
    CommandRendezvous, HttpCommand, HttpError, HttpRequest, HttpResponse, ResponseError,
    ResponseFuture, Result, wire,
};

type CommandQueue = mpsc::UnboundedReceiver<Arc<CommandRendezvous>>;

enum Dispatch {
    Complete(Result<HttpResponse>),
    Retry,
}

struct Inner<M: ConnectionManager> {
    endpoint: Url,
    manager: Arc<M>,
    primary: Arc<ConnectionPool<M>>,
    pool_config: PoolConfig,
    config: ExecutorConfig,
    filters: Vec<Arc<dyn RequestFilter>>,
    retry_handler: Arc<dyn RetryHandler>,
    redirect_handler: Arc<dyn RetryHandler>,
    pools: Mutex<HashMap<String, Arc<ConnectionPool<M>>>>,
    commands: mpsc::UnboundedSender<Arc<CommandRendezvous>>,
    queue: tokio::sync::Mutex<CommandQueue>,
    permits: Arc<Semaphore>,
    executor: Executor,
    lifecycle: LifeCycle,
}

/// Executes requests against one provider endpoint and whatever endpoints it
/// redirects to.
pub struct HttpCommandExecutorService<M: ConnectionManager> {
    inner: Arc<Inner<M>>,
}

impl<M: ConnectionManager> Clone for HttpCommandExecutorService<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: ConnectionManager> std::fmt::Debug for HttpCommandExecutorService<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCommandExecutorService")
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("status", &self.inner.lifecycle.status())
            .finish()
    }
}

/// Origin key of a URL: `scheme://host:port`.
fn origin_key(url: &Url) -> String {
    format!(
        "{}://{}:{}",
        url.scheme(),
        url.host_str().unwrap_or(""),
        url.port_or_known_default().unwrap_or(0)
    )
}

fn origin_url(url: &Url) -> Url {
    let mut origin = url.clone();
    origin.set_path("/");
    origin.set_query(None);
    origin.set_fragment(None);
    origin
}

impl<M: ConnectionManager> HttpCommandExecutorService<M> {
    /// Create a new service builder.
    pub fn builder(endpoint: Url, manager: M) -> HttpCommandExecutorServiceBuilder<M> {
        HttpCommandExecutorServiceBuilder::new(endpoint, manager)
    }

    /// The primary endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    /// The service's lifecycle.
    pub fn lifecycle(&self) -> &LifeCycle {
        &self.inner.lifecycle
    }

    /// Start the primary pool and the dispatch loop.
    ///
    /// The service runs background loops for its pools and its queue, so it
    /// needs a runtime; [`Executor::WithinTask`] is rejected.
    pub async fn start(&self) -> Result<()> {
        if matches!(self.inner.executor, Executor::WithinTask) {
            return Err(HttpError::IllegalArgument(format!(
                "executor service for {} needs a runtime executor",
                self.inner.endpoint
            )));
        }
        self.inner.primary.start().await?;
        if let Err(e) = self.inner.lifecycle.start(Arc::new(self.clone())).await {
            self.inner.primary.shutdown().await;
            return Err(e);
        }
        info!(endpoint = %self.inner.endpoint, "Executor service started");
        Ok(())
    }

    /// Stop accepting commands, fail queued ones and shut down all pools.
    pub async fn shutdown(&self) -> Status {
        let status = self
            .inner
            .lifecycle
            .shutdown(self.inner.config.shutdown_timeout)
            .await;
        self.shutdown_pools().await;
        status
    }

    /// Queue a request. The returned future resolves with its outcome.
    pub fn submit(&self, request: HttpRequest) -> Result<ResponseFuture> {
        self.inner.lifecycle.exception_if_not_active()?;
        let (rendezvous, future) = CommandRendezvous::new(request);
        debug!(
            command = rendezvous.command().id(),
            request = %rendezvous.command().request_line(),
            "Submitting command"
        );
        self.inner
            .commands
            .send(rendezvous)
            .map_err(|_| HttpError::IllegalState("command queue is closed".to_string()))?;
        Ok(future)
    }

    /// Execute a request and wait for its outcome.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.submit(request)?.await
    }

    /// Counters of every pool the service has opened.
    pub fn pool_stats(&self) -> Vec<PoolStats> {
        let mut stats: Vec<_> = self.inner.pools.lock().values().map(|p| p.stats()).collect();
        stats.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        stats
    }

    async fn pool_for(&self, endpoint: &Url) -> Result<Arc<ConnectionPool<M>>> {
        self.inner.lifecycle.exception_if_not_active()?;
        let key = origin_key(endpoint);
        if let Some(pool) = self.inner.pools.lock().get(&key)
            && pool.lifecycle().is_active()
        {
            return Ok(pool.clone());
        }

        let pool = ConnectionPool::new(
            origin_url(endpoint),
            self.inner.manager.clone(),
            self.inner.pool_config.clone(),
            self.inner.commands.clone(),
            self.inner.executor.clone(),
        );
        pool.start().await?;

        {
            let mut pools = self.inner.pools.lock();
            if let Some(existing) = pools.get(&key)
                && existing.lifecycle().is_active()
            {
                // Lost a race with another command for the same origin.
                pool.lifecycle().request_shutdown();
                return Ok(existing.clone());
            }
            debug!(endpoint = %key, "Opened connection pool");
            pools.insert(key, pool.clone());
        }

        // Shutdown may have collected the pools before this one was inserted.
        if let Err(e) = self.inner.lifecycle.exception_if_not_active() {
            pool.lifecycle().request_shutdown();
            return Err(e);
        }
        Ok(pool)
    }

    async fn shutdown_pools(&self) {
        let pools: Vec<_> = self.inner.pools.lock().values().cloned().collect();
        for pool in pools {
            pool.shutdown().await;
        }
    }

    fn prepare(&self, command: &HttpCommand) -> Result<HttpRequest> {
        let mut request = command.current_request();
        wire::check_request_has_required_properties(&request)?;
        for filter in &self.inner.filters {
            filter.filter(&mut request)?;
        }
        Ok(request)
    }

    async fn invoke(&self, rendezvous: Arc<CommandRendezvous>) {
        if rendezvous.is_abandoned() {
            debug!(command = rendezvous.command().id(), "Caller went away, dropping command");
            return;
        }
        let Ok(_permit) = self.inner.permits.acquire().await else {
            rendezvous.set_exception(HttpError::IllegalState("executor is closed".to_string()));
            return;
        };

        loop {
            let command = rendezvous.command();
            let request = match self.prepare(command) {
                Ok(request) => request,
                Err(e) => {
                    rendezvous.set_exception(e);
                    return;
                }
            };
            let pool = match self.pool_for(request.endpoint()).await {
                Ok(pool) => pool,
                Err(e) => {
                    rendezvous.set_exception(e);
                    return;
                }
            };

            let mut handle = match pool.get_handle(rendezvous.clone()).await {
                Ok(handle) => handle,
                Err(e @ HttpError::Timeout { .. }) => {
                    pool.requeue_or_fail(rendezvous, e);
                    return;
                }
                Err(e @ HttpError::Connection(_)) => {
                    pool.resubmit_if_replayable(rendezvous, e);
                    return;
                }
                Err(e) => {
                    rendezvous.set_exception(e);
                    return;
                }
            };

            wire::log_request(&request);
            match handle.execute(&request).await {
                Ok(response) => {
                    wire::log_response(&request, &response);
                    pool.record_success();
                    handle.release();
                    match self.dispatch(command, &request, response).await {
                        Dispatch::Complete(result) => {
                            rendezvous.complete(result);
                            return;
                        }
                        Dispatch::Retry => {
                            trace!(command = command.id(), "Re-attempting command");
                        }
                    }
                }
                Err(e) if e.is_fatal() => {
                    pool.fatal_exception(handle, e);
                    return;
                }
                Err(e) => {
                    let rendezvous = handle.discard();
                    pool.resubmit_if_replayable(rendezvous, e);
                    return;
                }
            }
        }
    }

    async fn dispatch(
        &self,
        command: &HttpCommand,
        request: &HttpRequest,
        response: HttpResponse,
    ) -> Dispatch {
        let status = response.status();
        if status.is_success() {
            return Dispatch::Complete(Ok(response));
        }

        let retry = if status.is_redirection() {
            self.inner
                .redirect_handler
                .should_retry_request(command, &response)
                .await
        } else if status.is_server_error() {
            self.inner
                .retry_handler
                .should_retry_request(command, &response)
                .await
        } else {
            false
        };

        if retry {
            Dispatch::Retry
        } else {
            let error = ResponseError::from_response(request, &response);
            Dispatch::Complete(Err(error.into()))
        }
    }
}

#[async_trait]
impl<M: ConnectionManager> Worker for HttpCommandExecutorService<M> {
    async fn do_work(&self) -> Result<()> {
        let next = self.inner.queue.lock().await.recv().await;
        let Some(rendezvous) = next else {
            return Err(HttpError::IllegalState("command queue is closed".to_string()));
        };
        let service = self.clone();
        tokio::spawn(async move { service.invoke(rendezvous).await });
        Ok(())
    }

    async fn do_shutdown(&self) {
        let mut pending = 0;
        {
            let mut queue = self.inner.queue.lock().await;
            // Requeues from commands still in flight now fail at the sender.
            queue.close();
            while let Ok(rendezvous) = queue.try_recv() {
                rendezvous.set_exception(HttpError::IllegalState(
                    "executor shut down before the command ran".to_string(),
                ));
                pending += 1;
            }
        }
        if pending > 0 {
            info!(pending, "Failed queued commands on shutdown");
        }
        self.inner.permits.close();
        self.shutdown_pools().await;
    }
}

/// Builder for [`HttpCommandExecutorService`].
pub struct HttpCommandExecutorServiceBuilder<M: ConnectionManager> {
    endpoint: Url,
    manager: M,
    pool_config: PoolConfig,
    config: ExecutorConfig,
    filters: Vec<Arc<dyn RequestFilter>>,
    retry_handler: Option<Arc<dyn RetryHandler>>,
    redirect_handler: Option<Arc<dyn RetryHandler>>,
    executor: Option<Executor>,
}

impl<M: ConnectionManager> HttpCommandExecutorServiceBuilder<M> {
    fn new(endpoint: Url, manager: M) -> Self {
        Self {
            endpoint,
            manager,
            pool_config: PoolConfig::default(),
            config: ExecutorConfig::default(),
            filters: Vec::new(),
            retry_handler: None,
            redirect_handler: None,
            executor: None,
        }
    }

    /// Set the pool configuration used for every endpoint.
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the executor configuration.
    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a request filter. Filters run in the order they are added.
    pub fn filter(mut self, filter: Arc<dyn RequestFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Replace the handler for 5xx responses.
    pub fn retry_handler(mut self, handler: Arc<dyn RetryHandler>) -> Self {
        self.retry_handler = Some(handler);
        self
    }

    /// Replace the handler for 3xx responses.
    pub fn redirect_handler(mut self, handler: Arc<dyn RetryHandler>) -> Self {
        self.redirect_handler = Some(handler);
        self
    }

    /// Choose where lifecycles run. Defaults to the current runtime.
    pub fn executor(mut self, executor: Executor) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Build the service. It must be started before use.
    pub fn build(self) -> HttpCommandExecutorService<M> {
        let backoff = Arc::new(
            BackoffLimitedRetryHandler::new(self.config.max_retries, self.config.retry_delay_start)
                .with_max_delay(self.config.max_retry_delay),
        );
        let retry_handler = self
            .retry_handler
            .unwrap_or_else(|| backoff.clone());
        let redirect_handler = self.redirect_handler.unwrap_or_else(|| {
            Arc::new(RedirectionRetryHandler::new(self.config.max_redirects, backoff))
        });
        let executor = self.executor.unwrap_or_default();
        let (commands, queue) = mpsc::unbounded_channel();
        let manager = Arc::new(self.manager);

        let primary = ConnectionPool::new(
            origin_url(&self.endpoint),
            manager.clone(),
            self.pool_config.clone(),
            commands.clone(),
            executor.clone(),
        );
        let lifecycle = LifeCycle::new(
            format!("executor({})", self.endpoint),
            executor.clone(),
            vec![primary.lifecycle().clone()],
        );
        let mut pools = HashMap::new();
        pools.insert(origin_key(&self.endpoint), primary.clone());

        HttpCommandExecutorService {
            inner: Arc::new(Inner {
                permits: Arc::new(Semaphore::new(self.config.max_concurrent_commands)),
                endpoint: self.endpoint,
                manager,
                primary,
                pool_config: self.pool_config,
                config: self.config,
                filters: self.filters,
                retry_handler,
                redirect_handler,
                pools: Mutex::new(pools),
                commands,
                queue: tokio::sync::Mutex::new(queue),
                executor,
                lifecycle,
            }),
        }
    }
}
