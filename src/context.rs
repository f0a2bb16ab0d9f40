//! Composition root: wires settings, transport, signing and retry handling
//! into a running executor.

use std::sync::Arc;
use stratus_config::{ConfigError, Validate};
use stratus_http::filters::{Clock, RequestFilter, SystemClock};
use stratus_http::retry::RetryHandler;
use stratus_http::{
    ConnectionManager, Executor, HttpCommandExecutorService, HttpRequest, HttpResponse, Method,
    PoolStats, ReqwestConnectionManager, ResponseFuture, Status, Url,
};
use tracing::info;

use crate::{ContextSettings, Credentials, Result, Signer};

/// Assembles a [`RestContext`].
///
/// ```rust,no_run
/// use stratus::{ContextBuilder, Signer};
///
/// # async fn run() -> stratus::Result<()> {
/// let context = ContextBuilder::new()
///     .endpoint("https://myaccount.blob.core.windows.net/")
///     .credentials("myaccount", "c2VjcmV0")
///     .signer(Signer::SharedKeyLite)
///     .build()
///     .await?;
///
/// let request = context.request(stratus::Method::GET, "?comp=list")?;
/// let response = context.execute(request).await?;
/// println!("{}", response.status());
/// context.close().await;
/// # Ok(())
/// # }
/// ```
pub struct ContextBuilder {
    endpoint: Option<String>,
    settings: ContextSettings,
    credentials: Option<Credentials>,
    signer: Signer,
    clock: Option<Arc<dyn Clock>>,
    filters: Vec<Arc<dyn RequestFilter>>,
    retry_handler: Option<Arc<dyn RetryHandler>>,
    redirect_handler: Option<Arc<dyn RetryHandler>>,
    executor: Option<Executor>,
    #[cfg(feature = "log")]
    init_logging: bool,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextBuilder {
    /// A builder with default settings and no credentials.
    pub fn new() -> Self {
        Self {
            endpoint: None,
            settings: ContextSettings::default(),
            credentials: None,
            signer: Signer::default(),
            clock: None,
            filters: Vec::new(),
            retry_handler: None,
            redirect_handler: None,
            executor: None,
            #[cfg(feature = "log")]
            init_logging: false,
        }
    }

    /// Provider endpoint. Takes precedence over [`ContextSettings::endpoint`].
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Replace the settings.
    pub fn settings(mut self, settings: ContextSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Identity and secret handed to the signer.
    pub fn credentials(mut self, identity: impl Into<String>, secret: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(identity, secret));
        self
    }

    /// Signing scheme. Defaults to [`Signer::Anonymous`].
    pub fn signer(mut self, signer: Signer) -> Self {
        self.signer = signer;
        self
    }

    /// Time source for request signatures. Defaults to the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Add a filter. Filters run in the order added, before the signer.
    pub fn filter(mut self, filter: Arc<dyn RequestFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Replace the handler deciding on retries after server errors.
    pub fn retry_handler(mut self, handler: Arc<dyn RetryHandler>) -> Self {
        self.retry_handler = Some(handler);
        self
    }

    /// Replace the handler deciding on redirects.
    pub fn redirect_handler(mut self, handler: Arc<dyn RetryHandler>) -> Self {
        self.redirect_handler = Some(handler);
        self
    }

    /// Runtime the pools and the dispatch loop run on. Must be
    /// [`Executor::Runtime`]; the service refuses to start otherwise.
    pub fn executor(mut self, executor: Executor) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Install the `STRATUS_*` driven log subscriber while building.
    #[cfg(feature = "log")]
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.init_logging = enabled;
        self
    }

    /// Build and start a context over the reqwest transport.
    pub async fn build(self) -> Result<RestContext> {
        let manager = ReqwestConnectionManager::new(self.settings.transport_config());
        self.build_with(manager).await
    }

    /// Build and start a context over a custom transport.
    pub async fn build_with<M: ConnectionManager>(self, manager: M) -> Result<RestContext<M>> {
        #[cfg(feature = "log")]
        if self.init_logging {
            stratus_log::init();
        }

        self.settings.validate()?;
        let endpoint = self
            .endpoint
            .as_deref()
            .or(self.settings.endpoint.as_deref())
            .ok_or_else(|| ConfigError::KeyNotFound("endpoint".to_string()))?;
        let endpoint = Url::parse(endpoint).map_err(stratus_http::HttpError::from)?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let signature = self.signer.filter(self.credentials.as_ref(), clock)?;

        let mut builder = HttpCommandExecutorService::builder(endpoint.clone(), manager)
            .pool_config(self.settings.pool_config())
            .config(self.settings.executor_config());
        for filter in self.filters.into_iter().chain(signature) {
            builder = builder.filter(filter);
        }
        if let Some(handler) = self.retry_handler {
            builder = builder.retry_handler(handler);
        }
        if let Some(handler) = self.redirect_handler {
            builder = builder.redirect_handler(handler);
        }
        if let Some(executor) = self.executor {
            builder = builder.executor(executor);
        }

        let service = builder.build();
        service.start().await?;
        info!(endpoint = %endpoint, signer = ?self.signer, "Context started");

        Ok(RestContext {
            endpoint,
            settings: self.settings,
            signer: self.signer,
            service,
        })
    }
}

/// A started client for one provider endpoint.
pub struct RestContext<M: ConnectionManager = ReqwestConnectionManager> {
    endpoint: Url,
    settings: ContextSettings,
    signer: Signer,
    service: HttpCommandExecutorService<M>,
}

impl<M: ConnectionManager> std::fmt::Debug for RestContext<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestContext")
            .field("endpoint", &self.endpoint.as_str())
            .field("signer", &self.signer)
            .field("status", &self.status())
            .finish()
    }
}

impl<M: ConnectionManager> RestContext<M> {
    /// Provider endpoint requests are resolved against.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Settings the context was built with.
    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    /// Signing scheme in use.
    pub fn signer(&self) -> Signer {
        self.signer
    }

    /// The executor behind this context.
    pub fn service(&self) -> &HttpCommandExecutorService<M> {
        &self.service
    }

    /// Lifecycle status of the executor.
    pub fn status(&self) -> Status {
        self.service.lifecycle().status()
    }

    pub fn is_active(&self) -> bool {
        self.service.lifecycle().is_active()
    }

    /// A request for `path`, resolved against the endpoint.
    pub fn request(&self, method: Method, path: &str) -> stratus_http::Result<HttpRequest> {
        Ok(HttpRequest::new(method, self.endpoint.join(path)?))
    }

    /// Queue a request; the future resolves with its outcome.
    pub fn submit(&self, request: HttpRequest) -> stratus_http::Result<ResponseFuture> {
        self.service.submit(request)
    }

    /// Execute a request and wait for its outcome.
    pub async fn execute(&self, request: HttpRequest) -> stratus_http::Result<HttpResponse> {
        self.service.execute(request).await
    }

    /// Counters of every pool opened so far.
    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.service.pool_stats()
    }

    /// Shut the executor and its pools down. Queued commands fail.
    pub async fn close(&self) -> Status {
        let status = self.service.shutdown().await;
        info!(endpoint = %self.endpoint, status = %status, "Context closed");
        status
    }
}
