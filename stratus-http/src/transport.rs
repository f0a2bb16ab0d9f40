//! Transport connections managed by the pool.

use async_trait::async_trait;
use reqwest::redirect::Policy;
use tracing::debug;
use url::Url;

use crate::config::TransportConfig;
use crate::{HttpCommand, HttpError, HttpRequest, HttpResponse, Result};

/// Opens, validates, closes and drives connections to one kind of endpoint.
///
/// The pool owns connections; the manager only knows how to make and use them.
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    /// A single transport connection.
    type Connection: Send + Sync + 'static;

    /// Open a connection to `endpoint`.
    ///
    /// [`HttpError::Connection`] is treated as transient; any other error is
    /// reported to the caller as is.
    async fn connect(&self, endpoint: &Url) -> Result<Self::Connection>;

    /// Whether a connection can still carry requests.
    fn is_valid(&self, _connection: &Self::Connection) -> bool {
        true
    }

    /// Close a connection that leaves the pool.
    fn shutdown_connection(&self, connection: Self::Connection) {
        drop(connection);
    }

    /// Whether a command may be replayed after a transport failure.
    fn is_replayable(&self, command: &HttpCommand) -> bool {
        command.is_replayable()
    }

    /// Perform one exchange over `connection`.
    async fn execute(
        &self,
        connection: &mut Self::Connection,
        request: &HttpRequest,
    ) -> Result<HttpResponse>;
}

/// A pooled connection backed by its own reqwest client.
#[derive(Debug)]
pub struct ReqwestConnection {
    client: reqwest::Client,
    endpoint: Url,
    broken: bool,
}

impl ReqwestConnection {
    /// Endpoint the connection was opened for.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// [`ConnectionManager`] that speaks HTTP/1.1 through reqwest.
///
/// Each connection is a client with a single idle slot, so pool limits map
/// onto real sockets. Redirects are not followed by reqwest; the executor's
/// redirect handler deals with them.
#[derive(Debug, Clone, Default)]
pub struct ReqwestConnectionManager {
    config: TransportConfig,
}

impl ReqwestConnectionManager {
    /// Create a manager.
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Transport settings.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn build_request(
        client: &reqwest::Client,
        request: &HttpRequest,
    ) -> reqwest::RequestBuilder {
        let mut builder = client
            .request(request.method().clone(), request.endpoint().clone())
            .headers(request.headers().clone());

        if let Some(payload) = request.payload() {
            if let Some(content_type) = payload.content_type() {
                builder = builder.header(http::header::CONTENT_TYPE, content_type);
            }
            if let Some(md5) = payload.content_md5() {
                builder = builder.header("Content-MD5", md5);
            }
            builder = builder.body(payload.data().clone());
        }
        builder
    }
}

fn map_reqwest_error(e: reqwest::Error) -> HttpError {
    if e.is_builder() {
        HttpError::IllegalArgument(e.to_string())
    } else {
        HttpError::Connection(e.to_string())
    }
}

#[async_trait]
impl ConnectionManager for ReqwestConnectionManager {
    type Connection = ReqwestConnection;

    async fn connect(&self, endpoint: &Url) -> Result<ReqwestConnection> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(1)
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.so_timeout)
            .user_agent(&self.config.user_agent)
            .redirect(Policy::none())
            .danger_accept_invalid_certs(self.config.accepts_invalid_certs())
            .build()
            .map_err(|e| HttpError::Fatal(format!("cannot create client: {}", e)))?;

        debug!(endpoint = %endpoint, "Opened connection");
        Ok(ReqwestConnection {
            client,
            endpoint: endpoint.clone(),
            broken: false,
        })
    }

    fn is_valid(&self, connection: &ReqwestConnection) -> bool {
        !connection.broken
    }

    fn shutdown_connection(&self, connection: ReqwestConnection) {
        debug!(endpoint = %connection.endpoint, "Closing connection");
    }

    async fn execute(
        &self,
        connection: &mut ReqwestConnection,
        request: &HttpRequest,
    ) -> Result<HttpResponse> {
        let result = async {
            let response = Self::build_request(&connection.client, request)
                .send()
                .await
                .map_err(map_reqwest_error)?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(map_reqwest_error)?;
            Ok(HttpResponse::new(status, headers, body))
        }
        .await;

        if let Err(HttpError::Connection(_)) = &result {
            connection.broken = true;
        }
        result
    }
}
