//! HTTP aggregation producer against a mock aggregation service.

use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use vigil_cli::HttpAggregationProducer;
use vigil_cli::config::ServerConfig;
use vigil_cli::server::build_orchestrator;
use vigil_core::ports::AggregationProducer;
use vigil_core::{CacheDefinition, EntityType, Error, UnitSpec};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_page(
    server: &MockServer,
    cache: &str,
    entity_type: EntityType,
    unit: &str,
    page: u32,
    body: serde_json::Value,
) {
    Mock::given(method("GET"))
        .and(path(format!("/aggregations/{}", cache)))
        .and(query_param("entityType", entity_type.as_str()))
        .and(query_param("unit", unit))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_pages_become_chunks() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "dt-activity-2025",
        EntityType::HeatMapCache,
        "2025-03",
        0,
        json!({ "rows": [{ "bucket": "2025-03-01", "count": 4 }], "nextPage": 1 }),
    )
    .await;
    mount_page(
        &server,
        "dt-activity-2025",
        EntityType::HeatMapCache,
        "2025-03",
        1,
        json!({ "rows": [{ "bucket": "2025-03-02", "count": 7, "total": 12.5 }], "nextPage": null }),
    )
    .await;

    let producer = HttpAggregationProducer::new(&server.uri(), Duration::from_secs(5)).unwrap();
    let mut chunks = producer
        .produce(
            "dt-activity-2025",
            EntityType::HeatMapCache,
            UnitSpec::Month {
                year: 2025,
                month: 3,
            },
        )
        .await
        .unwrap();

    let first = chunks.next().await.unwrap().unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].bucket, "2025-03-01");
    let second = chunks.next().await.unwrap().unwrap();
    assert_eq!(second[0].total, Some(12.5));
    assert!(chunks.next().await.is_none());
}

#[tokio::test]
async fn test_service_error_is_a_producer_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/aggregations/api-totals"))
        .respond_with(ResponseTemplate::new(500).set_body_string("warehouse unavailable"))
        .mount(&server)
        .await;

    let producer = HttpAggregationProducer::new(&server.uri(), Duration::from_secs(5)).unwrap();
    let mut chunks = producer
        .produce("api-totals", EntityType::ApiCache, UnitSpec::Full)
        .await
        .unwrap();

    match chunks.next().await {
        Some(Err(Error::ProducerFailure(message))) => {
            assert!(message.contains("500"));
            assert!(message.contains("warehouse unavailable"));
        }
        other => panic!("expected producer failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_served_end_to_end_from_memory_store() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "api-totals",
        EntityType::ApiCache,
        "all",
        0,
        json!({ "rows": [{ "bucket": "total", "count": 42 }] }),
    )
    .await;

    let config = ServerConfig {
        producer_url: server.uri(),
        caches: vec![CacheDefinition::new("api-totals", EntityType::ApiCache)],
        ..Default::default()
    };
    let orchestrator = build_orchestrator(&config).await.unwrap();

    let read = orchestrator.get("api-totals").await.unwrap();
    let payload = read.payload.unwrap();
    assert_eq!(payload.record_count(), 1);
    assert_eq!(payload.rows().next().unwrap().count, 42);
}
