//! Response model.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

use crate::{HttpError, Result};

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpResponse {
    /// Create a response.
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// A response with a status and no headers or body.
    pub fn with_status(status: StatusCode) -> Self {
        Self::new(status, HeaderMap::new(), Bytes::new())
    }

    /// Status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header as a string.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Content type, if the server sent one.
    pub fn content_type(&self) -> Option<&str> {
        self.header(http::header::CONTENT_TYPE.as_str())
    }

    /// Response body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded as UTF-8, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize a JSON body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| HttpError::IllegalArgument(format!("invalid JSON body: {}", e)))
    }

    /// Status is 2xx.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// `HTTP/1.1 <code> <reason>`, used in wire logs.
    pub fn status_line(&self) -> String {
        format!(
            "HTTP/1.1 {} {}",
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or("")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line() {
        let response = HttpResponse::with_status(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.status_line(), "HTTP/1.1 503 Service Unavailable");
        assert!(!response.is_success());
    }

    #[test]
    fn test_json_body() {
        #[derive(serde::Deserialize)]
        struct Account {
            name: String,
        }

        let response = HttpResponse::new(StatusCode::OK, HeaderMap::new(), r#"{"name":"dev"}"#);
        let account: Account = response.json().unwrap();
        assert_eq!(account.name, "dev");
    }

    #[test]
    fn test_invalid_json_body() {
        let response = HttpResponse::new(StatusCode::OK, HeaderMap::new(), "not json");
        assert!(response.json::<serde_json::Value>().is_err());
    }
}
