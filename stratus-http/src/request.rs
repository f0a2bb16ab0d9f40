//! Outbound request model.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use url::Url;

use crate::Result;

/// Request body together with its content metadata.
///
/// Content type, length and MD5 travel with the payload rather than as
/// headers; signing filters and the transport read them from here.
#[derive(Debug, Clone)]
pub struct Payload {
    data: Bytes,
    content_type: Option<String>,
    content_md5: Option<String>,
    repeatable: bool,
}

impl Payload {
    /// Create a repeatable payload.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            content_type: None,
            content_md5: None,
            repeatable: true,
        }
    }

    /// Create a payload that can only be sent once.
    ///
    /// Commands carrying such a payload are never replayed.
    pub fn once(data: impl Into<Bytes>) -> Self {
        Self {
            repeatable: false,
            ..Self::new(data)
        }
    }

    /// Set the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Set the base64 encoded Content-MD5.
    pub fn with_content_md5(mut self, md5: impl Into<String>) -> Self {
        self.content_md5 = Some(md5.into());
        self
    }

    /// Payload bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Content length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Content type, if set.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Content-MD5, if set.
    pub fn content_md5(&self) -> Option<&str> {
        self.content_md5.as_deref()
    }

    /// Whether the payload can be sent more than once.
    pub fn is_repeatable(&self) -> bool {
        self.repeatable
    }
}

/// An HTTP request addressed to a provider endpoint.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    endpoint: Url,
    headers: HeaderMap,
    payload: Option<Payload>,
}

impl HttpRequest {
    /// Create a request.
    pub fn new(method: Method, endpoint: Url) -> Self {
        Self {
            method,
            endpoint,
            headers: HeaderMap::new(),
            payload: None,
        }
    }

    /// Create a request from a URL string.
    pub fn parse(method: Method, endpoint: &str) -> Result<Self> {
        Ok(Self::new(method, Url::parse(endpoint)?))
    }

    /// Create a GET request.
    pub fn get(endpoint: &str) -> Result<Self> {
        Self::parse(Method::GET, endpoint)
    }

    /// Create a POST request.
    pub fn post(endpoint: &str) -> Result<Self> {
        Self::parse(Method::POST, endpoint)
    }

    /// Create a PUT request.
    pub fn put(endpoint: &str) -> Result<Self> {
        Self::parse(Method::PUT, endpoint)
    }

    /// Create a DELETE request.
    pub fn delete(endpoint: &str) -> Result<Self> {
        Self::parse(Method::DELETE, endpoint)
    }

    /// Create a HEAD request.
    pub fn head(endpoint: &str) -> Result<Self> {
        Self::parse(Method::HEAD, endpoint)
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())?;
        let value = HeaderValue::try_from(value.as_ref())?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Attach a payload.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Change the request method.
    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// Target endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Retarget the request.
    pub fn set_endpoint(&mut self, endpoint: Url) {
        self.endpoint = endpoint;
    }

    /// Request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable request headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Payload, if any.
    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Replace the payload.
    pub fn set_payload(&mut self, payload: Option<Payload>) {
        self.payload = payload;
    }

    /// Remove and return the payload.
    pub fn take_payload(&mut self) -> Option<Payload> {
        self.payload.take()
    }

    /// First value of a header as a string.
    pub fn first_header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Replace every value of a header with a single value.
    pub fn replace_header(&mut self, name: HeaderName, value: &str) -> Result<()> {
        self.headers.insert(name, HeaderValue::try_from(value)?);
        Ok(())
    }

    /// Whether the request can be sent again after a failure.
    pub fn is_replayable(&self) -> bool {
        self.payload.as_ref().is_none_or(Payload::is_repeatable)
    }

    /// `METHOD url HTTP/1.1`, used in logs and error messages.
    pub fn request_line(&self) -> String {
        format!("{} {} HTTP/1.1", self.method, self.endpoint)
    }
}
