//! AWS query API signing, signature version 2.

use http::Method;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::sync::Arc;
use tracing::trace;

use super::{Clock, RequestFilter, SIGNATURE_LOG_TARGET, SystemClock, TimestampCache};
use crate::{HttpError, HttpRequest, Payload, Result};

/// RFC 3986 unreserved characters are left alone, everything else is escaped.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

fn encode(value: &str) -> String {
    utf8_percent_encode(value, UNRESERVED).to_string()
}

/// Signs query API requests.
///
/// Parameters are read from the form payload of POST requests and from the
/// query string otherwise. The signer sets `AWSAccessKeyId`, `Timestamp`
/// (unless `Expires` is present), `SignatureVersion` and `SignatureMethod`,
/// then appends `Signature` computed over
///
/// ```text
/// METHOD\nhost\npath\nsorted-encoded-params
/// ```
pub struct QuerySigner {
    access_key: String,
    secret_key: String,
    timestamps: TimestampCache,
}

impl std::fmt::Debug for QuerySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySigner")
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

impl QuerySigner {
    /// Create a signer.
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self::with_clock(access_key, secret_key, Arc::new(SystemClock))
    }

    /// Create a signer that reads time from `clock`.
    pub fn with_clock(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            timestamps: TimestampCache::iso8601(clock),
        }
    }

    fn uses_form(request: &HttpRequest) -> bool {
        request.method() == Method::POST
    }

    fn read_params(request: &HttpRequest) -> Result<Vec<(String, String)>> {
        if Self::uses_form(request) {
            let Some(payload) = request.payload() else {
                return Ok(Vec::new());
            };
            serde_urlencoded::from_bytes(payload.data())
                .map_err(|e| HttpError::IllegalArgument(format!("invalid form payload: {}", e)))
        } else {
            Ok(request.endpoint().query_pairs().into_owned().collect())
        }
    }

    fn set(params: &mut Vec<(String, String)>, name: &str, value: &str) {
        match params.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => params.push((name.to_string(), value.to_string())),
        }
    }

    /// Canonical, sorted and encoded parameter string.
    pub fn canonical_query(params: &[(String, String)]) -> String {
        let mut sorted: Vec<_> = params.iter().collect();
        sorted.sort();
        sorted
            .into_iter()
            .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Build the string to sign for `request` with the given parameters.
    pub fn string_to_sign(request: &HttpRequest, params: &[(String, String)]) -> String {
        let endpoint = request.endpoint();
        let mut host = endpoint.host_str().unwrap_or("").to_ascii_lowercase();
        if let Some(port) = endpoint.port() {
            host = format!("{}:{}", host, port);
        }
        let path = match endpoint.path() {
            "" => "/",
            path => path,
        };
        format!(
            "{}\n{}\n{}\n{}",
            request.method(),
            host,
            path,
            Self::canonical_query(params)
        )
    }

    fn write_params(request: &mut HttpRequest, params: &[(String, String)]) {
        let encoded = params
            .iter()
            .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        if Self::uses_form(request) {
            request.set_payload(Some(
                Payload::new(encoded).with_content_type(FORM_CONTENT_TYPE),
            ));
        } else {
            let mut endpoint = request.endpoint().clone();
            endpoint.set_query(Some(&encoded));
            request.set_endpoint(endpoint);
        }
    }
}

impl RequestFilter for QuerySigner {
    fn filter(&self, request: &mut HttpRequest) -> Result<()> {
        let mut params = Self::read_params(request)?;
        if !params.iter().any(|(k, _)| k == "Action") {
            return Err(HttpError::IllegalArgument(
                "query requests must carry an Action parameter".to_string(),
            ));
        }

        params.retain(|(k, _)| k != "Signature");
        Self::set(&mut params, "SignatureMethod", "HmacSHA256");
        Self::set(&mut params, "SignatureVersion", "2");
        Self::set(&mut params, "AWSAccessKeyId", &self.access_key);
        if !params.iter().any(|(k, _)| k == "Expires") {
            Self::set(&mut params, "Timestamp", &self.timestamps.get());
        }

        let to_sign = Self::string_to_sign(request, &params);
        trace!(target: SIGNATURE_LOG_TARGET, access_key = %self.access_key, "<< {:?}", to_sign);
        let signature = super::hmac_sha256_base64(self.secret_key.as_bytes(), &to_sign)?;
        params.push(("Signature".to_string(), signature));

        Self::write_params(request, &params);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::ManualClock;
    use chrono::{TimeZone, Utc};

    fn signer() -> QuerySigner {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2011, 10, 3, 15, 19, 30).unwrap(),
        ));
        QuerySigner::with_clock("AKIDEXAMPLE", "secret", clock)
    }

    fn form(request: &HttpRequest) -> Vec<(String, String)> {
        serde_urlencoded::from_bytes(request.payload().unwrap().data()).unwrap()
    }

    #[test]
    fn test_encoding_is_rfc3986() {
        assert_eq!(encode("a b*c~d"), "a%20b%2Ac~d");
        assert_eq!(encode("2011-10-03T15:19:30Z"), "2011-10-03T15%3A19%3A30Z");
    }

    #[test]
    fn test_canonical_query_is_sorted() {
        let params = vec![
            ("b".to_string(), "2".to_string()),
            ("Action".to_string(), "Describe".to_string()),
            ("a".to_string(), "x y".to_string()),
        ];
        assert_eq!(QuerySigner::canonical_query(&params), "Action=Describe&a=x%20y&b=2");
    }

    #[test]
    fn test_signs_form_payload() {
        let mut request = HttpRequest::post("https://ec2.us-east-1.amazonaws.com/")
            .unwrap()
            .with_payload(Payload::new("Action=DescribeImages&Version=2010-06-15"));
        signer().filter(&mut request).unwrap();

        let params = form(&request);
        let get = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("AWSAccessKeyId"), Some("AKIDEXAMPLE"));
        assert_eq!(get("SignatureVersion"), Some("2"));
        assert_eq!(get("SignatureMethod"), Some("HmacSHA256"));
        assert_eq!(get("Timestamp"), Some("2011-10-03T15:19:30Z"));
        assert_eq!(
            get("Signature"),
            Some("M/DuTAP7rxAcfJ1TskdR5oiq4eldJb6rLUhzjUGqe2o=")
        );
        assert_eq!(
            request.payload().unwrap().content_type(),
            Some(FORM_CONTENT_TYPE)
        );
    }

    #[test]
    fn test_resigning_replaces_signature() {
        let signer = signer();
        let mut request = HttpRequest::post("https://ec2.us-east-1.amazonaws.com/")
            .unwrap()
            .with_payload(Payload::new("Action=DescribeImages&Version=2010-06-15"));
        signer.filter(&mut request).unwrap();
        let first = form(&request);
        signer.filter(&mut request).unwrap();

        assert_eq!(form(&request), first);
    }

    #[test]
    fn test_signs_query_string_for_get() {
        let mut request = HttpRequest::get(
            "https://sdb.amazonaws.com/?Action=ListDomains&Expires=2011-10-04T00%3A00%3A00Z",
        )
        .unwrap();
        signer().filter(&mut request).unwrap();

        let query: Vec<(String, String)> =
            request.endpoint().query_pairs().into_owned().collect();
        assert!(query.iter().any(|(k, _)| k == "Signature"));
        assert!(!query.iter().any(|(k, _)| k == "Timestamp"));
    }

    #[test]
    fn test_requires_action() {
        let mut request = HttpRequest::post("https://ec2.us-east-1.amazonaws.com/")
            .unwrap()
            .with_payload(Payload::new("Version=2010-06-15"));
        assert!(signer().filter(&mut request).is_err());
    }
}
