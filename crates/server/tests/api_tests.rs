use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{self, Request, StatusCode};
use tower::ServiceExt;

use sluice_core::{AccountCredential, AccountId};
use sluice_pipeline::{Collaborators, Pipeline, PipelineConfig, PollSettings};
use sluice_server::api::AppState;
use sluice_store::{CredentialStore, StoreError};
use sluice_store_memory::{MemoryConfigStore, MemoryCredentialStore, MemoryObjectStore, MemoryQueue};

// -- Counting credential store ---------------------------------------------

#[derive(Default)]
struct CountingCredentials {
    inner: MemoryCredentialStore,
    lookups: AtomicUsize,
}

#[async_trait]
impl CredentialStore for CountingCredentials {
    async fn get(&self, account_id: &AccountId) -> Result<Option<AccountCredential>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.get(account_id).await
    }

    async fn put(&self, credential: &AccountCredential) -> Result<(), StoreError> {
        self.inner.put(credential).await
    }
}

// -- Helpers --------------------------------------------------------------

struct TestApp {
    state: AppState,
    credentials: Arc<CountingCredentials>,
    objects: Arc<MemoryObjectStore>,
    queue: Arc<MemoryQueue>,
}

async fn build_test_app(max_body_bytes: usize) -> TestApp {
    let credentials = Arc::new(CountingCredentials::default());
    let objects = Arc::new(MemoryObjectStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let collaborators = Collaborators {
        credentials: credentials.clone(),
        configs: Arc::new(MemoryConfigStore::new()),
        objects: objects.clone(),
        queue: queue.clone(),
    };
    let pipeline = Pipeline::new(
        &collaborators,
        PipelineConfig {
            overflow_bucket: "overflow".into(),
            poll: PollSettings {
                wait_time: Duration::ZERO,
                ..PollSettings::default()
            },
            ..PipelineConfig::default()
        },
    );
    credentials
        .put(&AccountCredential::new(
            AccountId::parse("a@x.com").unwrap(),
            "key123",
        ))
        .await
        .unwrap();

    TestApp {
        state: AppState {
            pipeline: Arc::new(pipeline),
            max_body_bytes,
        },
        credentials,
        objects,
        queue,
    }
}

impl TestApp {
    fn router(&self) -> axum::Router {
        sluice_server::api::router(self.state.clone())
    }

    async fn send(&self, method: http::Method, uri: &str, body: String) -> (StatusCode, serde_json::Value) {
        let response = self
            .router()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }

    async fn ingest(&self, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        self.send(http::Method::POST, "/v1/ingest", body.to_string())
            .await
    }
}

// -- Tests ----------------------------------------------------------------

#[tokio::test]
async fn health_returns_ok() {
    let app = build_test_app(1024).await;
    let response = app
        .router()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, serde_json::json!({"status": "ok"}));
}

#[tokio::test]
async fn ingest_queues_inline_payload() {
    let app = build_test_app(10 * 1024 * 1024).await;
    let (status, json) = app
        .ingest(serde_json::json!({
            "accountId": "a@x.com",
            "apiKey": "key123",
            "data": {"key": "value"}
        }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "queued");
    assert_eq!(json["mode"], "inline");
    assert!(json["messageId"].is_string());
    assert!(json.get("externalRef").is_none());
    assert_eq!(app.queue.len().await, 1);
    assert!(app.objects.is_empty());
}

#[tokio::test]
async fn ingest_accepts_legacy_field_names() {
    let app = build_test_app(10 * 1024 * 1024).await;
    let (status, _) = app
        .ingest(serde_json::json!({
            "Email": "a@X.com",
            "APIKey": "key123",
            "Data": [1, 2, 3]
        }))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn ingest_externalizes_large_payload() {
    let app = build_test_app(10 * 1024 * 1024).await;
    let (status, json) = app
        .ingest(serde_json::json!({
            "accountId": "a@x.com",
            "apiKey": "key123",
            "data": {"padding": "x".repeat(300 * 1024)}
        }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["mode"], "overflow");
    let external_ref = json["externalRef"].as_str().unwrap();
    assert!(external_ref.starts_with("s3://overflow/ingestion_data/a@x.com/"));
    assert_eq!(app.objects.keys("overflow").len(), 1);
}

#[tokio::test]
async fn ingest_validation_errors_are_400_without_auth() {
    let app = build_test_app(10 * 1024 * 1024).await;
    let bodies = [
        "not json".to_owned(),
        "[1, 2]".to_owned(),
        serde_json::json!({"apiKey": "key123", "data": 1}).to_string(),
        serde_json::json!({"accountId": "a@x.com", "apiKey": "key123", "data": ""}).to_string(),
    ];
    for body in bodies {
        let (status, json) = app.send(http::Method::POST, "/v1/ingest", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string());
    }
    assert_eq!(app.credentials.lookups.load(Ordering::SeqCst), 0);
    assert!(app.queue.is_empty().await);
}

#[tokio::test]
async fn ingest_wrong_key_is_403() {
    let app = build_test_app(10 * 1024 * 1024).await;
    let (status, json) = app
        .ingest(serde_json::json!({
            "accountId": "a@x.com",
            "apiKey": "nope",
            "data": {"key": "value"}
        }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"], "invalid API key");
    assert!(app.queue.is_empty().await);
}

#[tokio::test]
async fn ingest_rejects_oversized_body() {
    let app = build_test_app(1024).await;
    let (status, _) = app
        .ingest(serde_json::json!({
            "accountId": "a@x.com",
            "apiKey": "key123",
            "data": "x".repeat(4096)
        }))
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(app.queue.is_empty().await);
}

#[tokio::test]
async fn config_update_then_delivery() {
    let app = build_test_app(10 * 1024 * 1024).await;
    let (status, json) = app
        .send(
            http::Method::PUT,
            "/v1/config",
            serde_json::json!({
                "accountId": "a@x.com",
                "apiKey": "key123",
                "destinationRef": "arn:aws:s3:::bucket1",
                "transformExpression": ".key"
            })
            .to_string(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "saved");
    assert_eq!(json["accountId"], "a@x.com");
    assert!(json.get("apiKey").is_none());

    let (status, _) = app
        .ingest(serde_json::json!({
            "accountId": "a@x.com",
            "apiKey": "key123",
            "data": {"key": "value"}
        }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let dispatcher = app.state.pipeline.dispatcher();
    let batch: Vec<_> = dispatcher.queue().poll().await.unwrap().collect();
    let report = dispatcher.process_batch(&batch).await;
    assert_eq!(report.delivered(), 1);
    assert_eq!(app.objects.keys("bucket1").len(), 1);

    let (status, json) = app.send(http::Method::GET, "/metrics", String::new()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["requests_received"], 1);
    assert_eq!(json["routed_inline"], 1);
    assert_eq!(json["delivered"], 1);
}

#[tokio::test]
async fn config_update_rejections() {
    let app = build_test_app(10 * 1024 * 1024).await;
    let base = serde_json::json!({
        "accountId": "a@x.com",
        "apiKey": "key123",
        "destinationRef": "bucket1",
        "transformExpression": "."
    });

    let mut wrong_key = base.clone();
    wrong_key["apiKey"] = "nope".into();
    let (status, _) = app
        .send(http::Method::PUT, "/v1/config", wrong_key.to_string())
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let mut bad_expression = base.clone();
    bad_expression["transformExpression"] = "map(".into();
    let (status, json) = app
        .send(http::Method::PUT, "/v1/config", bad_expression.to_string())
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("transformExpression"));

    let mut missing = base;
    missing["destinationRef"] = serde_json::Value::Null;
    let (status, _) = app
        .send(http::Method::PUT, "/v1/config", missing.to_string())
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
