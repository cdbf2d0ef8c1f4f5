//! Common test utilities for API testing with mocks.
//!
//! The fixture wires a real job store, egress pool, credential store and
//! scheduler around mock backends and serves the router in-process.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use reelfetch_core::{
    testing::{MockAcquisitionBackend, MockCredentialLoader, MockRouteProber},
    AcquisitionConfig, AcquisitionOrchestrator, BackoffConfig, Config, CredentialStore,
    DatabaseConfig, EgressConfig, EgressPool, JobScheduler, JobStatus, JobStore, ServerConfig,
    SqliteDurableTier,
};
use reelfetch_server::state::AppState;

/// Test fixture for API testing with mock dependencies.
///
/// Provides an in-process server with controllable mocks for:
/// - The acquisition backend (MockAcquisitionBackend)
/// - Route probing (MockRouteProber)
/// - Credential loading (MockCredentialLoader)
pub struct TestFixture {
    pub router: Router,
    pub backend: Arc<MockAcquisitionBackend>,
    pub prober: Arc<MockRouteProber>,
    pub loader: Arc<MockCredentialLoader>,
    pub jobs: Arc<JobStore>,
    pub scheduler: Arc<JobScheduler>,
    /// Temporary directory for the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a new test fixture with default mocks and a running scheduler.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
            },
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            acquisition: AcquisitionConfig {
                max_concurrent_jobs: test_config.max_concurrent_jobs,
                backoff: BackoffConfig {
                    initial_backoff_ms: 1,
                    max_backoff_ms: 5,
                    multiplier: 2.0,
                    jitter: false,
                },
                ..Default::default()
            },
            egress: EgressConfig {
                routes: test_config.routes.clone(),
                ..Default::default()
            },
            ..Default::default()
        };

        let durable = SqliteDurableTier::new(&db_path).expect("Failed to create durable tier");
        let jobs = Arc::new(JobStore::new(Arc::new(durable)));

        let prober = Arc::new(MockRouteProber::new());
        let egress = Arc::new(
            EgressPool::from_config(config.egress.clone(), prober.clone())
                .expect("Failed to create egress pool"),
        );

        let loader = Arc::new(test_config.credentials);
        let credentials = Arc::new(CredentialStore::new(
            config.credentials.clone(),
            loader.clone(),
        ));

        let backend = Arc::new(MockAcquisitionBackend::new());
        let orchestrator = Arc::new(AcquisitionOrchestrator::new(
            Arc::clone(&jobs),
            Arc::clone(&egress),
            Arc::clone(&credentials),
            backend.clone(),
            config.acquisition.clone(),
        ));
        let scheduler = Arc::new(JobScheduler::new(Arc::clone(&jobs), orchestrator));
        if test_config.start_scheduler {
            scheduler.start();
        }

        let state = Arc::new(AppState::new(
            config,
            Arc::clone(&jobs),
            Arc::clone(&scheduler),
            egress,
            credentials,
        ));
        let router = reelfetch_server::api::create_router(state);

        Self {
            router,
            backend,
            prober,
            loader,
            jobs,
            scheduler,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// GET returning the raw text body (for non-JSON endpoints).
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    /// Poll the store until the job reaches a terminal status.
    pub async fn wait_for_terminal(&self, job_id: &str) -> JobStatus {
        for _ in 0..200 {
            let job = self.jobs.get_job(job_id).expect("job should exist");
            if job.status.is_terminal() {
                return job.status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", job_id);
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Configuration for test fixture.
pub struct TestConfig {
    pub routes: Vec<String>,
    pub credentials: MockCredentialLoader,
    pub max_concurrent_jobs: usize,
    /// Start the scheduler's dispatcher; off leaves submitted jobs queued.
    pub start_scheduler: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            routes: Vec::new(),
            credentials: MockCredentialLoader::empty(),
            max_concurrent_jobs: 2,
            start_scheduler: true,
        }
    }
}

impl TestConfig {
    pub fn with_routes(routes: &[&str]) -> Self {
        Self {
            routes: routes.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn paused() -> Self {
        Self {
            start_scheduler: false,
            ..Default::default()
        }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}

/// Helper to assert a JSON path equals expected value.
#[macro_export]
macro_rules! assert_json_path {
    ($json:expr, $path:expr, $expected:expr) => {
        let actual = &$json[$path];
        assert_eq!(
            actual, &$expected,
            "Path '{}' expected {:?}, got {:?}",
            $path, $expected, actual
        );
    };
}
