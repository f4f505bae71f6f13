//! REST Source Integration Tests
//!
//! Polls a mock HTTP endpoint and runs a REST-fed pipeline end to end.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sluice::adapters::{MemorySink, RestSource, RestSourceConfig};
use sluice::metrics::FETCH_ERRORS;
use sluice::{assemble, MetricsRuntime, PipelineConfig, PluginRegistry, Source};

use common::wait_until;

fn rest_config(server: &MockServer) -> RestSourceConfig {
    RestSourceConfig {
        url: format!("{}/events", server.uri()),
        timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(200),
    }
}

#[tokio::test]
async fn test_buffers_one_batch_per_poll() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "evt-1", "data": "first"},
            "second"
        ])))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let mut source = RestSource::new(rest_config(&server));
    source.connect().await.unwrap();

    let first = source.fetch().await.unwrap().unwrap();
    assert_eq!(first.id, "evt-1");
    assert_eq!(first.data, "first");

    let second = source.fetch().await.unwrap().unwrap();
    assert_eq!(second.data, "second");

    // Empty batch means no data right now
    assert!(source.fetch().await.unwrap().is_none());
    source.disconnect().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn test_server_error_is_fetch_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut source = RestSource::new(rest_config(&server));
    source.connect().await.unwrap();

    let err = source.fetch().await.unwrap_err();
    assert!(err.to_string().contains("503"));

    // A failed poll also waits out the interval
    assert!(source.fetch().await.unwrap().is_none());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_endpoint_is_polled_at_interval() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let mut source = RestSource::new(rest_config(&server));
    source.connect().await.unwrap();

    for _ in 0..20 {
        assert!(source.fetch().await.unwrap().is_none());
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(source.fetch().await.unwrap().is_none());
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_invalid_url_fails_connect() {
    let mut source = RestSource::new(RestSourceConfig {
        url: "not a url".to_string(),
        timeout: Duration::from_secs(1),
        poll_interval: Duration::from_millis(200),
    });

    assert!(source.connect().await.is_err());
    // Disconnect after a failed connect is still fine
    source.disconnect().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rest_pipeline_survives_outage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"id": "r-1", "data": "hello"}, {"id": "r-2", "data": "world"}])),
        )
        .up_to_n_times(1)
        .with_priority(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let primary: MemorySink<String> = MemorySink::new();
    let mut registry = PluginRegistry::with_builtins();
    let handle = primary.clone();
    registry
        .register_sink("MEMORY", move |_, _, _| Ok(Arc::new(handle.clone())))
        .unwrap();

    let config = PipelineConfig::new()
        .with("source.type", "rest")
        .with("source.rest.url", format!("{}/events", server.uri()))
        .with("source.rest.poll_interval_ms", "10")
        .with("sink.type", "memory")
        .with("transform.type", "upper")
        .with("pipeline.idle_backoff_ms", "5")
        .with("pipeline.error_backoff_ms", "5");
    let metrics = MetricsRuntime::enabled();
    let orchestrator = assemble(&config, &registry, metrics.clone()).unwrap();

    orchestrator.start().await.unwrap();
    assert!(wait_until(Duration::from_secs(5), || primary.len() == 2).await);
    orchestrator.stop().await;

    let mut delivered: Vec<(String, String)> = primary
        .payloads()
        .into_iter()
        .map(|p| (p.id, p.data))
        .collect();
    delivered.sort();
    assert_eq!(
        delivered,
        vec![
            ("r-1".to_string(), "HELLO".to_string()),
            ("r-2".to_string(), "WORLD".to_string())
        ]
    );
    assert_eq!(metrics.snapshot().counter(FETCH_ERRORS), 2);
}
