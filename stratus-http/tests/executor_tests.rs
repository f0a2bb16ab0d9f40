//! Executor service tests against a scripted in-memory transport.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use stratus_http::filters::BasicAuthentication;
use stratus_http::{
    ConnectionManager, ErrorKind, Executor, ExecutorConfig, HeaderMap,
    HttpCommandExecutorService, HttpError, HttpRequest, HttpResponse, Payload, PoolConfig,
    Result, Status, StatusCode, Url, header,
};
use tokio_test::{assert_err, assert_ok};

/// Replays canned outcomes in order, then answers 200.
#[derive(Default)]
struct Scripted {
    outcomes: Mutex<VecDeque<Result<HttpResponse>>>,
    seen: Mutex<Vec<HttpRequest>>,
    connects: AtomicUsize,
    latency: Duration,
}

impl Scripted {
    fn with(outcomes: Vec<Result<HttpResponse>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            ..Default::default()
        }
    }
}

struct Shared(Arc<Scripted>);

#[async_trait]
impl ConnectionManager for Shared {
    type Connection = ();

    async fn connect(&self, _endpoint: &Url) -> Result<()> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&self, _connection: &mut (), request: &HttpRequest) -> Result<HttpResponse> {
        if !self.0.latency.is_zero() {
            tokio::time::sleep(self.0.latency).await;
        }
        self.0.seen.lock().push(request.clone());
        self.0
            .outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(HttpResponse::with_status(StatusCode::OK)))
    }
}

fn status(code: StatusCode) -> Result<HttpResponse> {
    Ok(HttpResponse::with_status(code))
}

fn redirect(code: StatusCode, location: &str) -> Result<HttpResponse> {
    let mut headers = HeaderMap::new();
    headers.insert(header::LOCATION, location.parse().unwrap());
    Ok(HttpResponse::new(code, headers, ""))
}

async fn service(
    script: Arc<Scripted>,
    config: ExecutorConfig,
    pool: PoolConfig,
) -> HttpCommandExecutorService<Shared> {
    let service = HttpCommandExecutorService::builder(
        Url::parse("https://api.example.com/").unwrap(),
        Shared(script),
    )
    .config(config)
    .pool_config(pool)
    .filter(Arc::new(BasicAuthentication::new("user", "pass")))
    .build();
    service.start().await.unwrap();
    service
}

async fn default_service(script: Arc<Scripted>) -> HttpCommandExecutorService<Shared> {
    service(script, ExecutorConfig::default(), PoolConfig::default()).await
}

#[tokio::test]
async fn test_successful_command() {
    let script = Arc::new(Scripted::default());
    let service = default_service(script.clone()).await;

    let response = service
        .execute(HttpRequest::get("https://api.example.com/servers").unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let seen = script.seen.lock();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].first_header("authorization").unwrap().starts_with("Basic "));
    drop(seen);

    assert_eq!(service.shutdown().await, Status::ShutDown);
}

#[tokio::test(start_paused = true)]
async fn test_server_error_is_retried() {
    let script = Arc::new(Scripted::with(vec![
        status(StatusCode::SERVICE_UNAVAILABLE),
        status(StatusCode::INTERNAL_SERVER_ERROR),
    ]));
    let service = default_service(script.clone()).await;

    let response = service
        .execute(HttpRequest::get("https://api.example.com/servers").unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(script.seen.lock().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_limit_surfaces_classified_error() {
    let script = Arc::new(Scripted::with(
        (0..10).map(|_| status(StatusCode::SERVICE_UNAVAILABLE)).collect(),
    ));
    let service = service(
        script.clone(),
        ExecutorConfig::builder().max_retries(2).build(),
        PoolConfig::default(),
    )
    .await;

    let err = service
        .execute(HttpRequest::get("https://api.example.com/servers").unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(err.kind(), Some(ErrorKind::HttpResponse));
    assert_eq!(script.seen.lock().len(), 3);
}

#[tokio::test]
async fn test_not_found_is_classified() {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, "application/xml".parse().unwrap());
    let script = Arc::new(Scripted::with(vec![Ok(HttpResponse::new(
        StatusCode::NOT_FOUND,
        headers,
        "<Error><Code>NoSuchKey</Code><Message>missing</Message></Error>",
    ))]));
    let service = default_service(script).await;

    let err = service
        .execute(HttpRequest::get("https://api.example.com/bucket/key").unwrap())
        .await
        .unwrap_err();
    match err {
        HttpError::Response(e) => {
            assert_eq!(e.kind, ErrorKind::NotFound);
            assert_eq!(e.code.as_deref(), Some("NoSuchKey"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_redirect_opens_pool_for_new_origin() {
    let script = Arc::new(Scripted::with(vec![redirect(
        StatusCode::TEMPORARY_REDIRECT,
        "https://eu.api.example.com/servers",
    )]));
    let service = default_service(script.clone()).await;

    let response = service
        .execute(HttpRequest::get("https://api.example.com/servers").unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let seen = script.seen.lock();
    assert_eq!(seen[1].endpoint().host_str(), Some("eu.api.example.com"));
    assert!(seen[1].first_header("authorization").is_some());
    drop(seen);

    let endpoints: Vec<_> = service.pool_stats().into_iter().map(|s| s.endpoint).collect();
    assert_eq!(
        endpoints,
        vec!["https://api.example.com/", "https://eu.api.example.com/"]
    );
}

#[tokio::test]
async fn test_connection_failure_is_resubmitted() {
    let script = Arc::new(Scripted::with(vec![Err(HttpError::Connection(
        "connection reset".into(),
    ))]));
    let service = default_service(script.clone()).await;

    let response = service
        .execute(HttpRequest::get("https://api.example.com/servers").unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(script.seen.lock().len(), 2);
    // The failed connection was destroyed and a new one opened.
    assert_eq!(script.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_non_replayable_failure_reaches_caller() {
    let script = Arc::new(Scripted::with(vec![Err(HttpError::Connection(
        "broken pipe".into(),
    ))]));
    let service = default_service(script.clone()).await;

    let request = HttpRequest::put("https://api.example.com/blob")
        .unwrap()
        .with_payload(Payload::once("stream").with_content_type("application/octet-stream"));
    let err = service.execute(request).await.unwrap_err();
    assert!(matches!(err, HttpError::Connection(_)));
    assert_eq!(script.seen.lock().len(), 1);
}

#[tokio::test]
async fn test_fatal_error_shuts_everything_down() {
    let script = Arc::new(Scripted::with(vec![Err(HttpError::Fatal(
        "handshake failure".into(),
    ))]));
    let service = default_service(script).await;

    let err = service
        .execute(HttpRequest::get("https://api.example.com/servers").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, HttpError::Fatal(_)));

    service.lifecycle().wait_for(Status::ShutDown).await;
    assert!(service
        .submit(HttpRequest::get("https://api.example.com/servers").unwrap())
        .is_err());
}

#[tokio::test]
async fn test_invalid_request_is_rejected_before_dispatch() {
    let script = Arc::new(Scripted::default());
    let service = default_service(script.clone()).await;

    let request = HttpRequest::put("https://api.example.com/blob")
        .unwrap()
        .with_header("Content-Type", "text/plain")
        .unwrap();
    let err = service.execute(request).await.unwrap_err();
    assert!(matches!(err, HttpError::IllegalArgument(_)));
    assert!(script.seen.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_single_connection_serves_concurrent_commands() {
    let script = Arc::new(Scripted {
        latency: Duration::from_millis(100),
        ..Default::default()
    });
    let service = service(
        script.clone(),
        ExecutorConfig::default(),
        PoolConfig::builder().max_connections(1).build(),
    )
    .await;

    let futures: Vec<_> = (0..3)
        .map(|i| {
            service
                .submit(HttpRequest::get(&format!("https://api.example.com/servers/{i}")).unwrap())
                .unwrap()
        })
        .collect();
    for future in futures {
        assert_eq!(future.await.unwrap().status(), StatusCode::OK);
    }

    assert_eq!(script.connects.load(Ordering::SeqCst), 1);
    let stats = &service.pool_stats()[0];
    assert!(stats.saturated);
    assert!(stats.in_use + stats.idle <= stats.max_connections);
}

#[tokio::test]
async fn test_submit_after_shutdown_fails() {
    let service = default_service(Arc::new(Scripted::default())).await;
    service.shutdown().await;

    let err = service
        .submit(HttpRequest::get("https://api.example.com/").unwrap())
        .unwrap_err();
    assert!(matches!(err, HttpError::IllegalState(_)));
    assert!(service.pool_stats().iter().all(|s| s.status == Status::ShutDown));
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_failure_during_shutdown_reaches_caller() {
    let script = Arc::new(Scripted {
        outcomes: Mutex::new(VecDeque::from([Err(HttpError::Connection("reset".into()))])),
        latency: Duration::from_millis(200),
        ..Default::default()
    });
    let service = default_service(script.clone()).await;

    let future = service
        .submit(HttpRequest::get("https://api.example.com/servers").unwrap())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(service.shutdown().await, Status::ShutDown);

    let outcome = assert_ok!(tokio::time::timeout(Duration::from_secs(3), future).await);
    let err = assert_err!(outcome);
    assert!(matches!(err, HttpError::Connection(_)));
    assert_eq!(script.seen.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_shutdown_opens_no_pool() {
    let script = Arc::new(Scripted {
        outcomes: Mutex::new(VecDeque::from([status(StatusCode::SERVICE_UNAVAILABLE)])),
        latency: Duration::from_millis(10),
        ..Default::default()
    });
    let service = service(
        script.clone(),
        ExecutorConfig::builder()
            .retry_delay_start(Duration::from_secs(1))
            .build(),
        PoolConfig::default(),
    )
    .await;

    let future = service
        .submit(HttpRequest::get("https://api.example.com/servers").unwrap())
        .unwrap();
    // The 503 arrives after 10ms; the retry then backs off for a second.
    tokio::time::sleep(Duration::from_millis(100)).await;
    service.shutdown().await;

    let outcome = assert_ok!(tokio::time::timeout(Duration::from_secs(5), future).await);
    let err = assert_err!(outcome);
    assert!(matches!(err, HttpError::IllegalState(_)));
    assert_eq!(script.seen.lock().len(), 1);

    let stats = service.pool_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].status, Status::ShutDown);
}

#[tokio::test(start_paused = true)]
async fn test_queued_commands_fail_on_shutdown() {
    let script = Arc::new(Scripted {
        latency: Duration::from_secs(1),
        ..Default::default()
    });
    let service = service(
        script.clone(),
        ExecutorConfig::builder().max_concurrent_commands(1).build(),
        PoolConfig::builder().max_connections(1).build(),
    )
    .await;

    let futures: Vec<_> = (0..4)
        .map(|i| {
            service
                .submit(HttpRequest::get(&format!("https://api.example.com/servers/{i}")).unwrap())
                .unwrap()
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(100)).await;
    service.shutdown().await;

    for future in futures {
        let outcome = assert_ok!(tokio::time::timeout(Duration::from_secs(5), future).await);
        if let Err(e) = outcome {
            assert!(matches!(e, HttpError::IllegalState(_)), "unexpected error: {e}");
        }
    }
    assert!(service.pool_stats().iter().all(|s| s.status == Status::ShutDown));
}

#[tokio::test]
async fn test_within_task_executor_is_rejected() {
    let service = HttpCommandExecutorService::builder(
        Url::parse("https://api.example.com/").unwrap(),
        Shared(Arc::new(Scripted::default())),
    )
    .executor(Executor::WithinTask)
    .build();

    let started = assert_ok!(tokio::time::timeout(Duration::from_secs(2), service.start()).await);
    assert!(matches!(assert_err!(started), HttpError::IllegalArgument(_)));
    assert_eq!(service.lifecycle().status(), Status::Inactive);
    assert!(service
        .submit(HttpRequest::get("https://api.example.com/").unwrap())
        .is_err());
}

#[tokio::test(start_paused = true)]
async fn test_pool_stays_within_limit_under_load() {
    const MAX: usize = 3;
    let script = Arc::new(Scripted {
        latency: Duration::from_millis(20),
        ..Default::default()
    });
    let service = service(
        script.clone(),
        ExecutorConfig::default(),
        PoolConfig::builder().max_connections(MAX).build(),
    )
    .await;

    let futures: Vec<_> = (0..40)
        .map(|i| {
            service
                .submit(HttpRequest::get(&format!("https://api.example.com/servers/{i}")).unwrap())
                .unwrap()
        })
        .collect();
    let all = futures::future::join_all(futures);
    tokio::pin!(all);

    let mut peak = 0;
    let results = loop {
        tokio::select! {
            results = &mut all => break results,
            _ = tokio::time::sleep(Duration::from_millis(1)) => {
                let stats = &service.pool_stats()[0];
                assert!(stats.live <= MAX, "live connections: {}", stats.live);
                assert!(stats.in_use + stats.idle <= MAX);
                peak = peak.max(stats.live);
            }
        }
    };

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(script.seen.lock().len(), 40);
    assert!(script.connects.load(Ordering::SeqCst) <= MAX);
    assert_eq!(peak, MAX);
    service.shutdown().await;
}
