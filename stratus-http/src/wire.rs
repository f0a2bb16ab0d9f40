//! Wire logging and request sanity checks.
//!
//! Enable with `RUST_LOG=stratus::wire=debug`. Lines sent are prefixed with
//! `>>`, lines received with `<<`. Credentials in `Authorization` headers are
//! never written out.

use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HeaderName};
use tracing::{Level, debug, enabled};

use crate::{HttpError, HttpRequest, HttpResponse, Result};

/// Target used for wire logging.
pub const WIRE_LOG_TARGET: &str = "stratus::wire";

const CONTENT_MD5: HeaderName = HeaderName::from_static("content-md5");

const PAYLOAD_HEADERS: [HeaderName; 3] = [CONTENT_TYPE, CONTENT_LENGTH, CONTENT_MD5];

fn redacted<'a>(name: &HeaderName, value: &'a str) -> &'a str {
    if *name == AUTHORIZATION {
        match value.split_once(' ') {
            Some((scheme, _)) => scheme,
            None => "***",
        }
    } else {
        value
    }
}

/// Log an outbound request.
pub fn log_request(request: &HttpRequest) {
    if !enabled!(target: WIRE_LOG_TARGET, Level::DEBUG) {
        return;
    }
    debug!(target: WIRE_LOG_TARGET, ">> {}", request.request_line());
    for (name, value) in request.headers() {
        let value = value.to_str().unwrap_or("<binary>");
        debug!(target: WIRE_LOG_TARGET, ">> {}: {}", name, redacted(name, value));
    }
    if let Some(payload) = request.payload() {
        if let Some(content_type) = payload.content_type() {
            debug!(target: WIRE_LOG_TARGET, ">> Content-Type: {}", content_type);
        }
        debug!(target: WIRE_LOG_TARGET, ">> Content-Length: {}", payload.len());
    }
}

/// Log a received response.
pub fn log_response(request: &HttpRequest, response: &HttpResponse) {
    if !enabled!(target: WIRE_LOG_TARGET, Level::DEBUG) {
        return;
    }
    debug!(
        target: WIRE_LOG_TARGET,
        request = %request.request_line(),
        "<< {}",
        response.status_line()
    );
    for (name, value) in response.headers() {
        debug!(
            target: WIRE_LOG_TARGET,
            "<< {}: {}",
            name,
            value.to_str().unwrap_or("<binary>")
        );
    }
}

/// Reject requests that carry payload metadata as headers.
///
/// Content type, length and MD5 belong on the [`Payload`](crate::Payload);
/// signers read them from there, so a header copy would be signed wrong.
pub fn check_request_has_required_properties(request: &HttpRequest) -> Result<()> {
    for name in &PAYLOAD_HEADERS {
        if request.headers().contains_key(name) {
            return Err(HttpError::IllegalArgument(format!(
                "{} must be set on the payload, not as a header: {}",
                name,
                request.request_line()
            )));
        }
    }
    if let Some(payload) = request.payload()
        && !payload.is_empty()
        && payload.content_type().is_none()
    {
        return Err(HttpError::IllegalArgument(format!(
            "payload has no content type: {}",
            request.request_line()
        )));
    }
    Ok(())
}
