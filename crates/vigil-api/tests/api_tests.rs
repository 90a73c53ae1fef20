//! Router tests driven with `tower::ServiceExt::oneshot`.

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use futures::stream;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tower::ServiceExt;
use vigil_api::{AppState, build_app};
use vigil_builder::Orchestrator;
use vigil_core::ports::{AggregationProducer, ChunkStream};
use vigil_core::{
    AggregateRow, CacheDefinition, EntityType, Error, OrchestratorConfig, Result, SystemClock,
    UnitSpec,
};
use vigil_db::{MemoryPayloadStore, MemoryRegistry};

struct FixedProducer {
    fail: AtomicBool,
}

#[async_trait]
impl AggregationProducer for FixedProducer {
    async fn produce(
        &self,
        _cache_name: &str,
        _entity_type: EntityType,
        unit: UnitSpec,
    ) -> Result<ChunkStream> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::ProducerFailure("source offline".to_string()));
        }
        let rows = vec![
            AggregateRow::new(format!("{}/a", unit.key()), 3),
            AggregateRow::new(format!("{}/b", unit.key()), 5),
        ];
        Ok(Box::pin(stream::iter(vec![Ok(rows)])))
    }
}

struct TestApp {
    router: Router,
    orchestrator: Arc<Orchestrator>,
}

async fn test_app(fail: bool) -> TestApp {
    let defaults = vec![
        CacheDefinition::new("api-totals", EntityType::ApiCache),
        CacheDefinition::new("page-views", EntityType::PageCache),
    ];
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(MemoryRegistry::new()),
        Arc::new(MemoryPayloadStore::new()),
        Arc::new(FixedProducer {
            fail: AtomicBool::new(fail),
        }),
        Arc::new(SystemClock),
        OrchestratorConfig::default(),
    ));
    orchestrator
        .initialize_defaults(&defaults, true)
        .await
        .expect("initialize");

    let state = Arc::new(AppState::new(Arc::clone(&orchestrator), defaults));
    TestApp {
        router: build_app(state),
        orchestrator,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn admin(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-vigil-role", "admin")
        .header("x-vigil-user", "ops@example.com");
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[tokio::test]
async fn test_health_sets_request_id() {
    let app = test_app(false).await;
    let response = app.router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let (status, _) = send(&app.router, get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_list_caches() {
    let app = test_app(false).await;
    let (status, body) = send(&app.router, get("/api/v1/caches")).await;
    assert_eq!(status, StatusCode::OK);

    let caches = body.as_array().expect("array");
    assert_eq!(caches.len(), 2);
    assert_eq!(caches[0]["name"], "api-totals");
    assert_eq!(caches[0]["status"], "inactive");
    assert_eq!(caches[0]["stale"], true);
}

#[tokio::test]
async fn test_unknown_cache_is_not_found() {
    let app = test_app(false).await;
    let (status, body) = send(&app.router, get("/api/v1/caches/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "cache_not_found");
}

#[tokio::test]
async fn test_cold_start_read_then_hit() {
    let app = test_app(false).await;

    let (status, body) = send(&app.router, get("/api/v1/caches/api-totals")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fromCache"], false);
    assert!(body["payload"]["units"]["all"]["rows"].is_array());

    let (status, body) = send(&app.router, get("/api/v1/caches/api-totals")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fromCache"], true);
    assert_eq!(body["stale"], false);

    let (_, status) = send(&app.router, get("/api/v1/caches/api-totals/status")).await;
    assert_eq!(status["status"], "active");
    assert_eq!(status["cacheHits"], 1);
    assert_eq!(status["cacheMisses"], 1);
}

#[tokio::test]
async fn test_no_data_yet_has_its_own_code() {
    let app = test_app(true).await;
    let (status, body) = send(&app.router, get("/api/v1/caches/page-views")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "no_data_yet");
}

#[tokio::test]
async fn test_refresh_requires_admin_and_cools_down() {
    let app = test_app(false).await;

    let anonymous = Request::post("/api/v1/caches/api-totals/refresh")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.router, anonymous).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let (status, body) = send(
        &app.router,
        admin("POST", "/api/v1/caches/api-totals/refresh", None),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["requestedBy"], "ops@example.com");
    assert_eq!(body["buildStarted"], true);

    let finished = app
        .orchestrator
        .runner()
        .wait("api-totals", std::time::Duration::from_secs(10))
        .await
        .unwrap();
    assert!(finished);

    let (status, body) = send(
        &app.router,
        admin("POST", "/api/v1/caches/api-totals/refresh", None),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "cooldown_active");
    assert_eq!(body["minutesRemaining"], 30);
}

#[tokio::test]
async fn test_processing_status_when_idle() {
    let app = test_app(false).await;
    let (status, body) = send(&app.router, get("/api/v1/caches/page-views/processing")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isProcessing"], false);
    assert_eq!(body["progress"]["percentage"], 0.0);
}

#[tokio::test]
async fn test_invalidate_marks_stale() {
    let app = test_app(false).await;
    send(&app.router, get("/api/v1/caches/api-totals")).await;

    let request = Request::post("/api/v1/caches/api-totals/invalidate?reason=ingest-done")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&app.router, get("/api/v1/caches/api-totals/status")).await;
    assert_eq!(body["stale"], true);
    assert_eq!(body["invalidated"], true);
}

#[tokio::test]
async fn test_usage_rejects_negative_reads() {
    let app = test_app(false).await;
    let request = Request::post("/api/v1/caches/api-totals/usage")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "readsPerHour": -1.0, "sourceMutations": 2 }).to_string(),
        ))
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn test_policy_changes_need_admin() {
    let app = test_app(false).await;
    let update = json!({ "updatePolicy": "manual", "autoRefresh": false });

    let request = Request::put("/api/v1/caches/policy")
        .header("content-type", "application/json")
        .body(Body::from(update.to_string()))
        .unwrap();
    let (status, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &app.router,
        admin("PUT", "/api/v1/caches/policy", Some(update.clone())),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], 2);

    let (status, body) = send(
        &app.router,
        admin(
            "PUT",
            "/api/v1/caches/page-views/policy",
            Some(json!({ "expirationPolicy": "never" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], 1);

    let (_, body) = send(&app.router, get("/api/v1/caches/page-views/status")).await;
    assert_eq!(body["updatePolicy"], "manual");
    assert_eq!(body["expirationPolicy"], "never");
}

#[tokio::test]
async fn test_initialize_cancel_reset_and_errors() {
    let app = test_app(false).await;

    let (status, body) = send(
        &app.router,
        admin("POST", "/api/v1/caches/initialize", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(2));

    let (status, body) = send(
        &app.router,
        admin("POST", "/api/v1/caches/api-totals/cancel", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], false);

    send(&app.router, get("/api/v1/caches/api-totals")).await;
    let (status, body) = send(
        &app.router,
        admin("POST", "/api/v1/caches/api-totals/reset", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "inactive");
    assert_eq!(body["recordCount"], 0);

    let (status, body) = send(&app.router, get("/api/v1/caches/api-totals/errors?limit=5")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}
