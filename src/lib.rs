//! # Stratus
//!
//! Building blocks for multi-cloud REST clients: pooled connections with a
//! lifecycle, request signing, retry and redirect handling, and a provider
//! error taxonomy.
//!
//! A [`RestContext`] is assembled by a [`ContextBuilder`] from
//! [`ContextSettings`] (defaults, a file, or `STRATUS_*` environment
//! variables), [`Credentials`] and a [`Signer`].
//!
//! ```rust,no_run
//! use stratus::prelude::*;
//!
//! # async fn run() -> stratus::Result<()> {
//! let settings = ContextSettings::from_env()?;
//! let context = ContextBuilder::new()
//!     .settings(settings)
//!     .endpoint("https://ec2.us-east-1.amazonaws.com/")
//!     .credentials("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG")
//!     .signer(Signer::QueryV2)
//!     .build()
//!     .await?;
//!
//! let request = context
//!     .request(Method::POST, "/")?
//!     .with_payload(
//!         Payload::new("Action=DescribeRegions&Version=2010-08-31")
//!             .with_content_type("application/x-www-form-urlencoded"),
//!     );
//! let response = context.execute(request).await?;
//! println!("{}", response.text());
//! context.close().await;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod credentials;
pub mod error;
pub mod settings;

pub use context::{ContextBuilder, RestContext};
pub use credentials::{Credentials, Signer};
pub use error::{Error, Result};
pub use settings::{ContextSettings, ENV_PREFIX};

// Re-export member crates
pub use stratus_config as config;
pub use stratus_http as http;
#[cfg(feature = "log")]
pub use stratus_log as log;

pub use stratus_http::{
    ErrorKind, HttpError, HttpRequest, HttpResponse, Method, Payload, StatusCode, Url,
};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{ContextBuilder, ContextSettings, Credentials, RestContext, Signer};
    pub use stratus_http::prelude::*;
}
