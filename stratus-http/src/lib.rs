//! # Stratus HTTP
//!
//! Pooled HTTP command execution for cloud provider REST clients.
//!
//! ## Features
//!
//! - **Lifecycle**: start/stop state machine for background workers with
//!   dependencies between them
//! - **Connection Pool**: bounded per-endpoint pools with validation, reuse
//!   limits, a session failure budget and requeueing of replayable commands
//! - **Request Signing**: Azure SharedKeyLite, AWS query API v2 and basic auth
//!   filters, re-applied on every attempt
//! - **Retry and Redirects**: quadratic backoff for server errors, `Location`
//!   following for redirects
//! - **Error Classification**: provider error documents mapped onto a small
//!   taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stratus_http::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let endpoint = Url::parse("https://myaccount.blob.core.windows.net/")?;
//!     let service = HttpCommandExecutorService::builder(
//!         endpoint,
//!         ReqwestConnectionManager::new(TransportConfig::default()),
//!     )
//!     .filter(Arc::new(SharedKeyAuthentication::new("myaccount", "c2VjcmV0")?))
//!     .build();
//!     service.start().await?;
//!
//!     let request = HttpRequest::get("https://myaccount.blob.core.windows.net/?comp=list")?
//!         .with_header("x-ms-version", "2009-09-19")?;
//!     let response = service.execute(request).await?;
//!     println!("{}", response.status());
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

mod classify;
mod command;
mod error;
mod request;
mod response;

pub mod config;
pub mod executor;
pub mod filters;
pub mod lifecycle;
pub mod pool;
pub mod retry;
pub mod transport;
pub mod wire;

pub use classify::{ErrorKind, ProviderError, classify};
pub use command::{CommandRendezvous, HttpCommand, ResponseFuture};
pub use config::{ExecutorConfig, PoolConfig, TransportConfig};
pub use error::{HttpError, ResponseError, Result};
pub use executor::HttpCommandExecutorService;
pub use lifecycle::{Executor, LifeCycle, Status, Worker};
pub use pool::{ConnectionHandle, ConnectionPool, PoolStats, PooledConnection};
pub use request::{HttpRequest, Payload};
pub use response::HttpResponse;
pub use transport::{ConnectionManager, ReqwestConnection, ReqwestConnectionManager};

// Re-export common types
pub use bytes::Bytes;
pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
pub use url::Url;

/// Prelude for common imports.
///
/// ```
/// use stratus_http::prelude::*;
/// ```
pub mod prelude {
    pub use crate::classify::ErrorKind;
    pub use crate::config::{ExecutorConfig, PoolConfig, TransportConfig};
    pub use crate::error::{HttpError, Result};
    pub use crate::executor::HttpCommandExecutorService;
    pub use crate::filters::{
        BasicAuthentication, QuerySigner, RequestFilter, SharedKeyAuthentication,
    };
    pub use crate::request::{HttpRequest, Payload};
    pub use crate::response::HttpResponse;
    pub use crate::retry::{BackoffStrategy, RetryPolicy, RetryingLoader};
    pub use crate::transport::{ConnectionManager, ReqwestConnectionManager};
    pub use http::{HeaderMap, Method, StatusCode, header};
    pub use url::Url;
}
