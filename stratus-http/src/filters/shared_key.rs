//! Azure Storage `SharedKeyLite` authentication.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::{AUTHORIZATION, DATE};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

use super::{Clock, RequestFilter, SIGNATURE_LOG_TARGET, SystemClock, TimestampCache};
use crate::{HttpError, HttpRequest, Result};

const HEADER_PREFIX: &str = "x-ms-";

/// Signs requests with the storage account key.
///
/// The string to sign is
///
/// ```text
/// METHOD\nContent-MD5\nContent-Type\nDate\n
/// x-ms-header:value\n ...
/// /account/path[?comp=value]
/// ```
///
/// and the `Authorization` header becomes `SharedKeyLite account:signature`.
pub struct SharedKeyAuthentication {
    account: String,
    key: Vec<u8>,
    timestamps: TimestampCache,
}

impl std::fmt::Debug for SharedKeyAuthentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeyAuthentication")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

impl SharedKeyAuthentication {
    /// Create a filter from the account name and its base64 encoded key.
    pub fn new(account: impl Into<String>, encoded_key: &str) -> Result<Self> {
        Self::with_clock(account, encoded_key, Arc::new(SystemClock))
    }

    /// Create a filter that reads time from `clock`.
    pub fn with_clock(
        account: impl Into<String>,
        encoded_key: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let key = STANDARD
            .decode(encoded_key.trim())
            .map_err(|e| HttpError::Signing(format!("account key is not base64: {}", e)))?;
        Ok(Self {
            account: account.into(),
            key,
            timestamps: TimestampCache::rfc1123(clock),
        })
    }

    /// Build the canonical string for `request`.
    pub fn string_to_sign(&self, request: &HttpRequest) -> String {
        let payload = request.payload();
        let mut buffer = String::new();
        buffer.push_str(request.method().as_str());
        buffer.push('\n');
        buffer.push_str(payload.and_then(|p| p.content_md5()).unwrap_or(""));
        buffer.push('\n');
        buffer.push_str(payload.and_then(|p| p.content_type()).unwrap_or(""));
        buffer.push('\n');
        buffer.push_str(request.first_header(DATE.as_str()).unwrap_or(""));
        buffer.push('\n');
        self.append_canonicalized_headers(request, &mut buffer);
        self.append_canonicalized_resource(request, &mut buffer);
        buffer
    }

    fn append_canonicalized_headers(&self, request: &HttpRequest, buffer: &mut String) {
        let mut headers: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for (name, value) in request.headers() {
            if !name.as_str().starts_with(HEADER_PREFIX) {
                continue;
            }
            let value = String::from_utf8_lossy(value.as_bytes()).replace('\n', "");
            headers.entry(name.as_str()).or_default().push(value);
        }
        for (name, values) in headers {
            buffer.push_str(name);
            buffer.push(':');
            buffer.push_str(&values.join(","));
            buffer.push('\n');
        }
    }

    fn append_canonicalized_resource(&self, request: &HttpRequest, buffer: &mut String) {
        buffer.push('/');
        buffer.push_str(&self.account);
        buffer.push_str(request.endpoint().path());
        if let Some((_, comp)) = request.endpoint().query_pairs().find(|(k, _)| k == "comp") {
            buffer.push_str("?comp=");
            buffer.push_str(&comp);
        }
    }

    /// Sign a canonical string.
    pub fn sign(&self, string_to_sign: &str) -> Result<String> {
        super::hmac_sha256_base64(&self.key, string_to_sign)
    }
}

impl RequestFilter for SharedKeyAuthentication {
    fn filter(&self, request: &mut HttpRequest) -> Result<()> {
        request.replace_header(DATE, &self.timestamps.get())?;
        let to_sign = self.string_to_sign(request);
        trace!(target: SIGNATURE_LOG_TARGET, account = %self.account, "<< {:?}", to_sign);
        let signature = self.sign(&to_sign)?;
        request.replace_header(
            AUTHORIZATION,
            &format!("SharedKeyLite {}:{}", self.account, signature),
        )
    }
}
