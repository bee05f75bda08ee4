//! Consul HTTP client tests against a fake Consul agent

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use meshwatch_common::{ConsistencyMode, HealthStatus, WatchSpec};
use meshwatch_consul::{
    ConsulClient, ConsulConfig, INDEX_HEADER, RegistryClient, WatchDescriptor, WatchDispatcher,
    WatchError, WatcherConfig,
};

fn client(server: &MockServer) -> ConsulClient {
    ConsulClient::with_base_url(server.uri(), reqwest::Client::new(), Duration::from_secs(5))
}

fn health_body() -> serde_json::Value {
    json!([
        {
            "Node": {"Node": "node-1", "Address": "10.0.0.1"},
            "Service": {"ID": "web-1", "Service": "web", "Tags": ["canary"], "Address": "", "Port": 8080},
            "Checks": [{"Status": "passing"}]
        },
        {
            "Node": {"Node": "node-2", "Address": "10.0.0.2"},
            "Service": {"ID": "web-2", "Service": "web", "Tags": [], "Address": "10.1.0.2", "Port": 8080},
            "Checks": [{"Status": "passing"}, {"Status": "critical"}]
        }
    ])
}

#[tokio::test]
async fn test_health_query_carries_index_and_wait() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/health/service/web"))
        .and(query_param("index", "12"))
        .and(query_param("wait", "5000ms"))
        .and(query_param_is_missing("stale"))
        .and(query_param_is_missing("consistent"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(INDEX_HEADER, "15")
                .set_body_json(health_body()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut descriptor = WatchDescriptor::new("web", &WatchSpec::default());
    descriptor.advance(12);

    let response = client(&server).poll(&descriptor).await.unwrap();
    assert_eq!(response.index, 15);
    assert_eq!(response.instances.len(), 2);
    assert_eq!(response.instances[0].address, "10.0.0.1");
    assert_eq!(response.instances[0].health, HealthStatus::Passing);
    assert_eq!(response.instances[1].address, "10.1.0.2");
    assert_eq!(response.instances[1].health, HealthStatus::Critical);
}

#[tokio::test]
async fn test_service_id_is_a_single_encoded_segment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/health/service/_nomad-task-web"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(INDEX_HEADER, "2")
                .set_body_json(json!([])),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/health/service/web%2Fadmin%3Findex=9"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(INDEX_HEADER, "4")
                .set_body_json(json!([])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let nomad = WatchDescriptor::new("_nomad-task-web", &WatchSpec::default());
    assert_eq!(client.poll(&nomad).await.unwrap().index, 2);

    let tricky = WatchDescriptor::new("web/admin?index=9", &WatchSpec::default());
    let response = client.poll(&tricky).await.unwrap();
    assert_eq!(response.index, 4);
}

#[tokio::test]
async fn test_consistency_and_tags_become_query_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/health/service/web"))
        .and(query_param("stale", ""))
        .and(query_param("tag", "canary"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(INDEX_HEADER, "3")
                .set_body_json(json!([])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let spec = WatchSpec::new(ConsistencyMode::Stale).with_tags(["canary"]);
    let descriptor = WatchDescriptor::new("web", &spec);

    let response = client(&server).poll(&descriptor).await.unwrap();
    assert_eq!(response.index, 3);
    assert!(response.instances.is_empty());
}

#[tokio::test]
async fn test_consistent_mode_query_param() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/health/service/db"))
        .and(query_param("consistent", ""))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(INDEX_HEADER, "1")
                .set_body_json(json!([])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let descriptor = WatchDescriptor::new("db", &WatchSpec::new(ConsistencyMode::Consistent));
    client(&server).poll(&descriptor).await.unwrap();
}

#[tokio::test]
async fn test_missing_index_header_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/health/service/web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let descriptor = WatchDescriptor::new("web", &WatchSpec::default());
    let result = client(&server).poll(&descriptor).await;
    assert!(matches!(result, Err(WatchError::RegistryProtocolError(_))));
}

#[tokio::test]
async fn test_error_status_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/health/service/web"))
        .respond_with(ResponseTemplate::new(500).set_body_string("rpc error"))
        .mount(&server)
        .await;

    let descriptor = WatchDescriptor::new("web", &WatchSpec::default());
    match client(&server).poll(&descriptor).await {
        Err(WatchError::RegistryProtocolError(message)) => assert!(message.contains("500")),
        other => panic!("unexpected result: {:?}", other.map(|r| r.index)),
    }
}

#[tokio::test]
async fn test_malformed_body_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/health/service/web"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(INDEX_HEADER, "9")
                .set_body_string("{not json"),
        )
        .mount(&server)
        .await;

    let descriptor = WatchDescriptor::new("web", &WatchSpec::default());
    let result = client(&server).poll(&descriptor).await;
    assert!(matches!(result, Err(WatchError::RegistryProtocolError(_))));
}

#[tokio::test]
async fn test_read_timeout_is_poll_horizon() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/health/service/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(INDEX_HEADER, "2")
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let watcher = WatcherConfig::default().with_timeouts(1000, 200);
    let dispatcher = WatchDispatcher::new(&watcher).unwrap();
    let client = ConsulClient::with_base_url(
        server.uri(),
        dispatcher.http_client().clone(),
        Duration::from_millis(100),
    );

    let descriptor = WatchDescriptor::new("slow", &WatchSpec::default());
    let started = std::time::Instant::now();
    let result = client.poll(&descriptor).await;
    assert!(matches!(result, Err(WatchError::PollHorizonExpired)));
    // Gave up on the silent connection, not on the delayed response
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_connection_refused_is_dispatch_failure() {
    // Nothing listens on port 1
    let config = ConsulConfig::new("127.0.0.1", 1);
    let dispatcher = WatchDispatcher::new(&config.watcher).unwrap();
    let client = ConsulClient::new(&config, dispatcher.http_client().clone());

    let descriptor = WatchDescriptor::new("web", &WatchSpec::default());
    let result = client.poll(&descriptor).await;
    assert!(matches!(result, Err(WatchError::DispatchTimeout(_))));
}

#[tokio::test]
async fn test_catalog_services() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/catalog/services"))
        .and(query_param("index", "0"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(INDEX_HEADER, "44")
                .set_body_json(json!({
                    "consul": [],
                    "web": ["canary", "v2"]
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (index, services) = client(&server)
        .catalog_services(0, ConsistencyMode::Default)
        .await
        .unwrap();
    assert_eq!(index, 44);
    assert_eq!(services.len(), 2);
    assert_eq!(services["web"], vec!["canary".to_string(), "v2".to_string()]);
}
