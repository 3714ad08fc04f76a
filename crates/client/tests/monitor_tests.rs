//! Health classification and the background connection monitor

use licensedesk_client::{ApiClient, ConnectionMonitor, ConnectionStatus, TokenStore};
use serde_json::json;
use std::net::TcpListener;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(origin: &str) -> ApiClient {
    let store = TokenStore::in_memory();
    store.set_backend_preference(origin).unwrap();
    ApiClient::builder()
        .store(store)
        .timeout(Duration::from_millis(300))
        .build()
        .unwrap()
}

async fn mount_health(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/api/test"))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_healthy_backend_is_connected() {
    let mock_server = MockServer::start().await;
    mount_health(
        &mock_server,
        ResponseTemplate::new(200).set_body_json(json!({"message": "API is working"})),
    )
    .await;

    let state = client_for(&mock_server.uri()).check_connection().await;
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert!(state.last_checked_at.is_some());
}

#[tokio::test]
async fn test_health_probe_sends_token_without_refreshing() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/test"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Token expired"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/user/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "fresh"})))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server.uri());
    client.store().save("access-1", Some("refresh-1"), false).unwrap();

    let state = client.check_connection().await;
    assert_eq!(state.status, ConnectionStatus::Error);
    assert_eq!(state.message.as_deref(), Some("Token expired"));
    assert!(client.store().load().unwrap().is_some());
}

#[tokio::test]
async fn test_subscription_lapse_keeps_session() {
    let mock_server = MockServer::start().await;
    mount_health(
        &mock_server,
        ResponseTemplate::new(403).set_body_json(json!({
            "message": "Subscription expired",
            "subscriptionRequired": true
        })),
    )
    .await;

    let client = client_for(&mock_server.uri());
    client.store().save("access-1", Some("refresh-1"), true).unwrap();

    let state = client.check_connection().await;
    assert_eq!(state.status, ConnectionStatus::SubscriptionExpired);
    assert_eq!(state.message.as_deref(), Some("Subscription expired"));
    assert!(client.store().load().unwrap().is_some());
}

#[tokio::test]
async fn test_server_failure_is_error() {
    let mock_server = MockServer::start().await;
    mount_health(&mock_server, ResponseTemplate::new(500).set_body_string("boom")).await;

    let state = client_for(&mock_server.uri()).check_connection().await;
    assert_eq!(state.status, ConnectionStatus::Error);
}

#[tokio::test]
async fn test_unreachable_backend_is_disconnected() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let state = client_for(&format!("http://127.0.0.1:{port}")).check_connection().await;
    assert_eq!(state.status, ConnectionStatus::Disconnected);
    assert!(state.message.is_some());
}

#[tokio::test]
async fn test_slow_backend_is_disconnected() {
    let mock_server = MockServer::start().await;
    mount_health(
        &mock_server,
        ResponseTemplate::new(200)
            .set_body_json(json!({"message": "API is working"}))
            .set_delay(Duration::from_secs(2)),
    )
    .await;

    let state = client_for(&mock_server.uri()).check_connection().await;
    assert_eq!(state.status, ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_monitor_publishes_transitions() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/test"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    mount_health(
        &mock_server,
        ResponseTemplate::new(200).set_body_json(json!({"message": "API is working"})),
    )
    .await;

    let monitor = ConnectionMonitor::start(client_for(&mock_server.uri()), Duration::from_millis(50));
    assert_eq!(monitor.state().status, ConnectionStatus::Checking);

    let mut states = monitor.subscribe();
    let wait = async {
        states
            .wait_for(|state| state.status == ConnectionStatus::Error)
            .await
            .unwrap();
        states
            .wait_for(|state| state.status == ConnectionStatus::Connected)
            .await
            .unwrap();
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("monitor never reported the recovery");

    assert_eq!(monitor.state().status, ConnectionStatus::Connected);
    monitor.shutdown().await;
}

#[tokio::test]
async fn test_monitor_stops_polling_after_shutdown() {
    let mock_server = MockServer::start().await;
    mount_health(
        &mock_server,
        ResponseTemplate::new(200).set_body_json(json!({"message": "API is working"})),
    )
    .await;

    let monitor = ConnectionMonitor::start(client_for(&mock_server.uri()), Duration::from_millis(20));
    let mut states = monitor.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|state| state.status == ConnectionStatus::Connected),
    )
    .await
    .unwrap()
    .unwrap();

    monitor.shutdown().await;
    let polls = mock_server.received_requests().await.unwrap().len();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(mock_server.received_requests().await.unwrap().len(), polls);
}

#[tokio::test]
async fn test_slow_check_is_not_overlapped_by_next_tick() {
    let mock_server = MockServer::start().await;
    mount_health(
        &mock_server,
        ResponseTemplate::new(200)
            .set_body_json(json!({"message": "API is working"}))
            .set_delay(Duration::from_millis(200)),
    )
    .await;

    let monitor = ConnectionMonitor::start(client_for(&mock_server.uri()), Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(500)).await;
    monitor.shutdown().await;

    // Checks starting at roughly 0, 200 and 400ms; ticks in between are absorbed
    let polls = mock_server.received_requests().await.unwrap().len();
    assert!((2..=3).contains(&polls), "expected sequential checks, saw {polls}");
}
