//! Mapping of provider error responses onto a small taxonomy.
//!
//! Providers report failures through a status code and, usually, an error
//! document carrying a code and a message. XML providers answer with
//! `<Error><Code>..</Code><Message>..</Message></Error>` (optionally wrapped
//! in `<Response><Errors>..</Errors></Response>`), JSON providers with a
//! `code`/`message` object. Both are parsed here and the result is mapped onto
//! [`ErrorKind`] so callers can match on the category rather than the code.

use http::StatusCode;
use serde::Deserialize;
use std::fmt;

use crate::{HttpRequest, HttpResponse, ResponseError};

/// Categories of provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Credentials rejected or operation not permitted.
    Authorization,
    /// The addressed resource does not exist.
    NotFound,
    /// The resource is in a state that forbids the operation.
    IllegalState,
    /// Any other error response.
    HttpResponse,
}

impl ErrorKind {
    /// Stable name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authorization => "authorization",
            ErrorKind::NotFound => "not-found",
            ErrorKind::IllegalState => "illegal-state",
            ErrorKind::HttpResponse => "http-response",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error code and message extracted from a response body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderError {
    /// Provider specific error code.
    pub code: Option<String>,
    /// Human readable message.
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct XmlError {
    #[serde(rename = "Code", default)]
    code: Option<String>,
    #[serde(rename = "Message", default)]
    message: Option<String>,
    #[serde(rename = "Errors", default)]
    errors: Option<XmlErrors>,
}

#[derive(Debug, Default, Deserialize)]
struct XmlErrors {
    #[serde(rename = "Error", default)]
    error: Vec<XmlError>,
}

impl ProviderError {
    /// Parse an error document.
    ///
    /// The content type picks the parser; bodies without a recognised type
    /// are sniffed. Unparseable bodies become the message verbatim.
    pub fn parse(content_type: Option<&str>, body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Self::default();
        }

        let content_type = content_type.unwrap_or("").to_ascii_lowercase();
        let parsed = if content_type.contains("xml") || trimmed.starts_with('<') {
            Self::from_xml(trimmed)
        } else if content_type.contains("json") || trimmed.starts_with('{') {
            Self::from_json(trimmed)
        } else {
            None
        };

        parsed.unwrap_or_else(|| Self {
            code: None,
            message: Some(trimmed.to_string()),
        })
    }

    fn from_xml(text: &str) -> Option<Self> {
        let doc: XmlError = quick_xml::de::from_str(text).ok()?;
        let doc = match doc {
            XmlError { code: None, errors: Some(errors), .. } => {
                errors.error.into_iter().next().unwrap_or_default()
            }
            doc => doc,
        };
        if doc.code.is_none() && doc.message.is_none() {
            return None;
        }
        Some(Self {
            code: doc.code,
            message: doc.message,
        })
    }

    fn from_json(text: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(text).ok()?;
        let object = match value.get("error") {
            Some(inner) if inner.is_object() => inner,
            _ => &value,
        };
        let field = |names: &[&str]| {
            names.iter().find_map(|name| match object.get(*name)? {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        };

        let code = field(&["code", "Code", "errorcode"]);
        let message = field(&["message", "Message", "errortext"]);
        if code.is_none() && message.is_none() {
            return None;
        }
        Some(Self { code, message })
    }
}

/// Map a status and provider code onto the taxonomy.
pub fn classify(status: StatusCode, code: Option<&str>) -> ErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return ErrorKind::Authorization,
        StatusCode::NOT_FOUND => return ErrorKind::NotFound,
        StatusCode::CONFLICT => return ErrorKind::IllegalState,
        _ => {}
    }

    let Some(code) = code else {
        return ErrorKind::HttpResponse;
    };

    match code {
        "AuthFailure"
        | "InvalidAccessKeyId"
        | "SignatureDoesNotMatch"
        | "AuthenticationFailed"
        | "AccessDenied"
        | "UnauthorizedOperation" => ErrorKind::Authorization,
        "ResourceNotFound" => ErrorKind::NotFound,
        c if c.ends_with("NotFound") || c.starts_with("NoSuch") => ErrorKind::NotFound,
        "Conflict" | "BucketNotEmpty" | "IncorrectState" => ErrorKind::IllegalState,
        c if c.ends_with("AlreadyExists") => ErrorKind::IllegalState,
        _ => ErrorKind::HttpResponse,
    }
}

impl ResponseError {
    /// Build a classified error from a non-success response.
    pub fn from_response(request: &HttpRequest, response: &HttpResponse) -> Self {
        let parsed = ProviderError::parse(response.content_type(), response.body());
        let kind = classify(response.status(), parsed.code.as_deref());
        let message = parsed.message.unwrap_or_else(|| {
            response
                .status()
                .canonical_reason()
                .unwrap_or("error response")
                .to_string()
        });
        Self {
            kind,
            status: response.status(),
            code: parsed.code,
            message,
            request_line: request.request_line(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;

    #[test]
    fn test_status_takes_precedence() {
        assert_eq!(classify(StatusCode::UNAUTHORIZED, None), ErrorKind::Authorization);
        assert_eq!(classify(StatusCode::FORBIDDEN, Some("Whatever")), ErrorKind::Authorization);
        assert_eq!(classify(StatusCode::NOT_FOUND, None), ErrorKind::NotFound);
        assert_eq!(classify(StatusCode::CONFLICT, None), ErrorKind::IllegalState);
    }

    #[test]
    fn test_codes_on_bad_request() {
        let status = StatusCode::BAD_REQUEST;
        assert_eq!(classify(status, Some("AuthFailure")), ErrorKind::Authorization);
        assert_eq!(classify(status, Some("InvalidInstanceID.NotFound")), ErrorKind::NotFound);
        assert_eq!(classify(status, Some("NoSuchBucket")), ErrorKind::NotFound);
        assert_eq!(classify(status, Some("IncorrectState")), ErrorKind::IllegalState);
        // Instance state errors are reported as plain response errors.
        assert_eq!(classify(status, Some("IncorrectInstanceState")), ErrorKind::HttpResponse);
        assert_eq!(classify(status, Some("BucketAlreadyExists")), ErrorKind::IllegalState);
        assert_eq!(classify(status, Some("InvalidParameterValue")), ErrorKind::HttpResponse);
        assert_eq!(classify(status, None), ErrorKind::HttpResponse);
    }

    #[test]
    fn test_parse_s3_style_xml() {
        let body = br#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message></Error>"#;
        let parsed = ProviderError::parse(Some("application/xml"), body);
        assert_eq!(parsed.code.as_deref(), Some("NoSuchKey"));
        assert_eq!(parsed.message.as_deref(), Some("The specified key does not exist."));
    }

    #[test]
    fn test_parse_query_api_xml() {
        let body = br#"<Response><Errors><Error><Code>InvalidInstanceID.NotFound</Code><Message>The instance ID 'i-1' does not exist</Message></Error></Errors><RequestID>abc</RequestID></Response>"#;
        let parsed = ProviderError::parse(Some("text/xml"), body);
        assert_eq!(parsed.code.as_deref(), Some("InvalidInstanceID.NotFound"));
    }

    #[test]
    fn test_parse_json() {
        let parsed = ProviderError::parse(
            Some("application/json"),
            br#"{"error":{"code":"ResourceNotFound","message":"gone"}}"#,
        );
        assert_eq!(parsed.code.as_deref(), Some("ResourceNotFound"));
        assert_eq!(parsed.message.as_deref(), Some("gone"));

        let parsed = ProviderError::parse(None, br#"{"errorcode":431,"errortext":"bad id"}"#);
        assert_eq!(parsed.code.as_deref(), Some("431"));
        assert_eq!(parsed.message.as_deref(), Some("bad id"));
    }

    #[test]
    fn test_parse_plain_text() {
        let parsed = ProviderError::parse(Some("text/plain"), b"Service unavailable\n");
        assert_eq!(parsed.code, None);
        assert_eq!(parsed.message.as_deref(), Some("Service unavailable"));
    }

    #[test]
    fn test_response_error_from_response() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, "application/xml".parse().unwrap());
        let response = HttpResponse::new(
            StatusCode::BAD_REQUEST,
            headers,
            "<Error><Code>AuthFailure</Code><Message>denied</Message></Error>",
        );
        let request = HttpRequest::post("https://ec2.us-east-1.amazonaws.com/").unwrap();

        let err = ResponseError::from_response(&request, &response);
        assert_eq!(err.kind, ErrorKind::Authorization);
        assert_eq!(err.code.as_deref(), Some("AuthFailure"));
        assert_eq!(err.message, "denied");
        assert!(err.request_line.starts_with("POST https://ec2"));
    }

    #[test]
    fn test_empty_body_uses_reason_phrase() {
        let response = HttpResponse::with_status(StatusCode::BAD_GATEWAY);
        let request = HttpRequest::get("https://example.com/").unwrap();
        let err = ResponseError::from_response(&request, &response);
        assert_eq!(err.kind, ErrorKind::HttpResponse);
        assert_eq!(err.message, "Bad Gateway");
    }
}
