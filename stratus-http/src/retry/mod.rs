//! Retry support.
//!
//! Two layers:
//!
//! - [`RetryHandler`]s decide, per command, whether a non-success response
//!   is re-attempted by the executor service.
//! - [`RetryPolicy`] wraps arbitrary fallible operations, such as a
//!   [`Loader`] through [`RetryingLoader`].

mod backoff;
mod handlers;
mod policy;

pub use backoff::BackoffStrategy;
pub use handlers::{BackoffLimitedRetryHandler, RedirectionRetryHandler, RetryHandler};
pub use policy::{Loader, RetryPolicy, RetryPolicyBuilder, RetryingLoader};
