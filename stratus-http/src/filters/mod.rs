//! Request filters.
//!
//! Filters run on every attempt of a command, just before it is written to a
//! connection. They operate on a copy of the command's request, so a retried
//! or redirected command is signed again with a fresh timestamp.

mod basic;
mod clock;
mod query;
mod shared_key;

pub use basic::BasicAuthentication;
pub use clock::{Clock, ManualClock, SystemClock, TimestampCache, iso8601, rfc1123};
pub use query::QuerySigner;
pub use shared_key::SharedKeyAuthentication;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{HttpError, HttpRequest, Result};

type HmacSha256 = Hmac<Sha256>;

/// Target used for string-to-sign logging.
pub const SIGNATURE_LOG_TARGET: &str = "stratus::signature";

/// Mutates an outbound request before it is sent.
pub trait RequestFilter: Send + Sync {
    /// Apply the filter.
    fn filter(&self, request: &mut HttpRequest) -> Result<()>;
}

/// Base64 encoded HMAC-SHA256 of `data`.
pub(crate) fn hmac_sha256_base64(key: &[u8], data: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| HttpError::Signing(format!("invalid key: {}", e)))?;
    mac.update(data.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}
