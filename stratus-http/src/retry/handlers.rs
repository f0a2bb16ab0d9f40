//! Handlers consulted by the executor when a response is not a success.

use async_trait::async_trait;
use http::header::{HOST, LOCATION};
use http::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::BackoffStrategy;
use crate::{HttpCommand, HttpResponse};

/// Decides whether a command should be attempted again after `response`.
///
/// Handlers may modify the command's request and may sleep before answering.
#[async_trait]
pub trait RetryHandler: Send + Sync {
    /// Whether to re-attempt the command.
    async fn should_retry_request(&self, command: &HttpCommand, response: &HttpResponse) -> bool;
}

/// Retries server errors with a quadratic backoff, up to a fixed limit.
#[derive(Debug, Clone)]
pub struct BackoffLimitedRetryHandler {
    retry_count_limit: u32,
    backoff: BackoffStrategy,
}

impl Default for BackoffLimitedRetryHandler {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(50))
    }
}

impl BackoffLimitedRetryHandler {
    /// Create a handler that sleeps `delay_start × failures²` between attempts.
    pub fn new(retry_count_limit: u32, delay_start: Duration) -> Self {
        Self {
            retry_count_limit,
            backoff: BackoffStrategy::Quadratic {
                start: delay_start,
                max: Duration::from_secs(10),
            },
        }
    }

    /// Cap the delay between attempts.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        if let BackoffStrategy::Quadratic { max, .. } = &mut self.backoff {
            *max = max_delay;
        }
        self
    }

    /// Use a different backoff schedule.
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Configured retry limit.
    pub fn retry_count_limit(&self) -> u32 {
        self.retry_count_limit
    }

    /// Sleep for the delay that follows the `failure_count`th failure.
    pub async fn impose_backoff_delay(&self, failure_count: u32, command_description: &str) {
        let delay = self.backoff.delay_for_attempt(failure_count);
        debug!(
            attempt = failure_count,
            delay_ms = delay.as_millis() as u64,
            command = command_description,
            "Retry backoff"
        );
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl RetryHandler for BackoffLimitedRetryHandler {
    async fn should_retry_request(&self, command: &HttpCommand, response: &HttpResponse) -> bool {
        let failures = command.increment_failure_count();
        if !command.is_replayable() {
            warn!(
                command = command.id(),
                status = response.status().as_u16(),
                "Cannot retry after server error, command is not replayable"
            );
            return false;
        }
        if failures > self.retry_count_limit {
            warn!(
                command = command.id(),
                status = response.status().as_u16(),
                limit = self.retry_count_limit,
                "Cannot retry after server error, command has exceeded retry limit"
            );
            return false;
        }

        self.impose_backoff_delay(failures, &command.request_line())
            .await;
        true
    }
}

/// Follows `Location` redirects, up to a fixed limit.
///
/// A redirect that points at the host and port already being used is
/// treated as a transient server condition and retried with backoff.
#[derive(Debug, Clone)]
pub struct RedirectionRetryHandler {
    retry_count_limit: u32,
    backoff: Arc<BackoffLimitedRetryHandler>,
}

impl RedirectionRetryHandler {
    /// Create a handler.
    pub fn new(retry_count_limit: u32, backoff: Arc<BackoffLimitedRetryHandler>) -> Self {
        Self {
            retry_count_limit,
            backoff,
        }
    }

    fn switches_to_get(status: StatusCode, method: &Method) -> bool {
        match status {
            StatusCode::SEE_OTHER => *method != Method::HEAD,
            StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => {
                *method != Method::GET && *method != Method::HEAD
            }
            _ => false,
        }
    }
}

#[async_trait]
impl RetryHandler for RedirectionRetryHandler {
    async fn should_retry_request(&self, command: &HttpCommand, response: &HttpResponse) -> bool {
        let Some(location) = response.header(LOCATION.as_str()) else {
            return false;
        };
        if !command.is_replayable() {
            error!(
                command = command.id(),
                location,
                "Cannot follow redirect, command is not replayable"
            );
            return false;
        }
        let redirects = command.increment_redirect_count();
        if redirects > self.retry_count_limit {
            error!(
                command = command.id(),
                location,
                limit = self.retry_count_limit,
                "Cannot follow redirect, command has exceeded redirect limit"
            );
            return false;
        }

        let current = command.current_request();
        let target = match current.endpoint().join(location) {
            Ok(target) => target,
            Err(e) => {
                warn!(command = command.id(), location, error = %e, "Invalid redirect location");
                return false;
            }
        };

        let endpoint = current.endpoint();
        if target.host_str() == endpoint.host_str()
            && target.port_or_known_default() == endpoint.port_or_known_default()
        {
            return self.backoff.should_retry_request(command, response).await;
        }

        let to_get = Self::switches_to_get(response.status(), current.method());
        info!(
            command = command.id(),
            status = response.status().as_u16(),
            from = %endpoint,
            to = %target,
            "Following redirect"
        );
        command.update_request(|request| {
            request.set_endpoint(target);
            request.headers_mut().remove(HOST);
            if to_get {
                request.set_method(Method::GET);
                request.set_payload(None);
            }
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HttpRequest, Payload};
    use http::HeaderMap;

    fn redirect(status: StatusCode, location: &str) -> HttpResponse {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, location.parse().unwrap());
        HttpResponse::new(status, headers, "")
    }

    fn handler() -> RedirectionRetryHandler {
        RedirectionRetryHandler::new(
            2,
            Arc::new(BackoffLimitedRetryHandler::new(5, Duration::from_millis(50))),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_limit() {
        let handler = BackoffLimitedRetryHandler::new(2, Duration::from_millis(50));
        let command = HttpCommand::new(HttpRequest::get("https://example.com/").unwrap());
        let response = HttpResponse::with_status(StatusCode::SERVICE_UNAVAILABLE);

        let started = tokio::time::Instant::now();
        assert!(handler.should_retry_request(&command, &response).await);
        assert!(handler.should_retry_request(&command, &response).await);
        assert_eq!(started.elapsed(), Duration::from_millis(50 + 200));

        for _ in 0..3 {
            assert!(!handler.should_retry_request(&command, &response).await);
        }
    }

    #[tokio::test]
    async fn test_backoff_refuses_non_replayable() {
        let handler = BackoffLimitedRetryHandler::default();
        let request = HttpRequest::put("https://example.com/blob")
            .unwrap()
            .with_payload(Payload::once("stream"));
        let command = HttpCommand::new(request);
        let response = HttpResponse::with_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!handler.should_retry_request(&command, &response).await);
    }

    #[tokio::test]
    async fn test_redirect_to_other_host() {
        let command = HttpCommand::new(
            HttpRequest::get("https://s3.amazonaws.com/bucket/key").unwrap(),
        );
        let response = redirect(
            StatusCode::TEMPORARY_REDIRECT,
            "https://bucket.s3-eu-west-1.amazonaws.com/key",
        );

        assert!(handler().should_retry_request(&command, &response).await);
        let request = command.current_request();
        assert_eq!(
            request.endpoint().as_str(),
            "https://bucket.s3-eu-west-1.amazonaws.com/key"
        );
        assert_eq!(request.method(), Method::GET);
        assert_eq!(command.redirect_count(), 1);
    }

    #[tokio::test]
    async fn test_see_other_switches_to_get() {
        let request = HttpRequest::post("https://api.example.com/jobs")
            .unwrap()
            .with_payload(Payload::new("{}"));
        let command = HttpCommand::new(request);
        let response = redirect(StatusCode::SEE_OTHER, "https://status.example.com/jobs/1");

        assert!(handler().should_retry_request(&command, &response).await);
        let request = command.current_request();
        assert_eq!(request.method(), Method::GET);
        assert!(request.payload().is_none());
    }

    #[tokio::test]
    async fn test_temporary_redirect_keeps_method() {
        let request = HttpRequest::put("https://api.example.com/blob")
            .unwrap()
            .with_payload(Payload::new("data"));
        let command = HttpCommand::new(request);
        let response = redirect(StatusCode::TEMPORARY_REDIRECT, "https://other.example.com/blob");

        assert!(handler().should_retry_request(&command, &response).await);
        let request = command.current_request();
        assert_eq!(request.method(), Method::PUT);
        assert!(request.payload().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_host_falls_back_to_backoff() {
        let command = HttpCommand::new(HttpRequest::get("https://example.com/a").unwrap());
        let response = redirect(StatusCode::FOUND, "/b");

        assert!(handler().should_retry_request(&command, &response).await);
        assert_eq!(command.current_request().endpoint().path(), "/a");
        assert_eq!(command.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_redirect_limit() {
        let command = HttpCommand::new(HttpRequest::get("https://a.example.com/").unwrap());
        let handler = handler();
        let found = |host| redirect(StatusCode::FOUND, host);
        let hosts = [
            "https://b.example.com/",
            "https://c.example.com/",
            "https://d.example.com/",
        ];

        assert!(handler.should_retry_request(&command, &found(hosts[0])).await);
        assert!(handler.should_retry_request(&command, &found(hosts[1])).await);
        assert!(!handler.should_retry_request(&command, &found(hosts[2])).await);
        assert!(!handler.should_retry_request(&command, &found(hosts[0])).await);
    }

    #[tokio::test]
    async fn test_missing_location() {
        let command = HttpCommand::new(HttpRequest::get("https://example.com/").unwrap());
        let response = HttpResponse::with_status(StatusCode::MOVED_PERMANENTLY);
        assert!(!handler().should_retry_request(&command, &response).await);
    }
}
