//! Token refresh behaviour against a mock backend

use futures::future::join_all;
use licensedesk_client::{ApiClient, ClientError, ErrorKind, Resource, TokenStore};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_with_session(server: &MockServer, refresh_token: Option<&str>) -> ApiClient {
    let store = TokenStore::in_memory();
    store.set_backend_preference(&server.uri()).unwrap();
    store.save("stale-token", refresh_token, false).unwrap();
    ApiClient::builder().store(store).build().unwrap()
}

async fn mount_orders(server: &MockServer, fresh_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .and(header("authorization", "Bearer stale-token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Token expired"})))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .and(header("authorization", "Bearer fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .expect(fresh_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_concurrent_unauthorized_requests_share_one_refresh() {
    let mock_server = MockServer::start().await;
    mount_orders(&mock_server, 5).await;

    Mock::given(method("POST"))
        .and(path("/api/user/refresh"))
        .and(body_json(json!({"refreshToken": "refresh-1"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"token": "fresh-token", "refreshToken": "refresh-2"}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_with_session(&mock_server, Some("refresh-1"));
    let requests = (0..5).map(|_| client.list(Resource::Orders));
    let results = join_all(requests).await;

    for result in results {
        assert_eq!(result.unwrap(), json!([{"id": 1}]));
    }
    let session = client.store().load().unwrap().unwrap();
    assert_eq!(session.access_token, "fresh-token");
    assert_eq!(session.refresh_token.as_deref(), Some("refresh-2"));
    assert!(!client.is_refreshing());
}

#[tokio::test]
async fn test_request_after_refresh_reuses_new_token() {
    let mock_server = MockServer::start().await;
    mount_orders(&mock_server, 2).await;

    Mock::given(method("POST"))
        .and(path("/api/user/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "fresh-token"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_with_session(&mock_server, Some("refresh-1"));
    client.list(Resource::Orders).await.unwrap();
    client.list(Resource::Orders).await.unwrap();

    // No rotated refresh token in the response keeps the old one
    let session = client.store().load().unwrap().unwrap();
    assert_eq!(session.refresh_token.as_deref(), Some("refresh-1"));
}

#[tokio::test]
async fn test_rejected_refresh_ends_session_once() {
    let mock_server = MockServer::start().await;
    mount_orders(&mock_server, 0).await;

    Mock::given(method("POST"))
        .and(path("/api/user/refresh"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"message": "Refresh token revoked"}))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let failures = Arc::new(AtomicUsize::new(0));
    let counter = failures.clone();
    let store = TokenStore::in_memory();
    store.set_backend_preference(&mock_server.uri()).unwrap();
    store.save("stale-token", Some("refresh-1"), false).unwrap();
    let client = ApiClient::builder()
        .store(store)
        .on_auth_failed(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .build()
        .unwrap();

    let results = join_all((0..3).map(|_| client.list(Resource::Orders))).await;
    for result in results {
        match result {
            Err(ClientError::AuthExpired(message)) => assert!(message.contains("revoked")),
            other => panic!("Expected AuthExpired, got {other:?}"),
        }
    }

    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert!(client.store().load().unwrap().is_none());
    assert!(client.current_user().unwrap().is_none());
}

#[tokio::test]
async fn test_subscription_marker_on_refresh_keeps_session() {
    let mock_server = MockServer::start().await;
    mount_orders(&mock_server, 0).await;

    Mock::given(method("POST"))
        .and(path("/api/user/refresh"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "message": "Subscription expired",
            "subscriptionRequired": true
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_with_session(&mock_server, Some("refresh-1"));
    let error = client.list(Resource::Orders).await.unwrap_err();

    assert!(error.is_subscription_expired());
    let session = client.store().load().unwrap().unwrap();
    assert_eq!(session.access_token, "stale-token");
}

#[tokio::test]
async fn test_subscription_marker_on_request_skips_refresh() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/licenses"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "message": "Subscription expired",
            "subscriptionRequired": true
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/user/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "fresh-token"})))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = client_with_session(&mock_server, Some("refresh-1"));
    let error = client.list(Resource::Licenses).await.unwrap_err();

    assert!(matches!(error, ClientError::SubscriptionExpired(_)));
    assert!(client.store().load().unwrap().is_some());
}

#[tokio::test]
async fn test_missing_refresh_token_expires_session() {
    let mock_server = MockServer::start().await;
    mount_orders(&mock_server, 0).await;

    Mock::given(method("POST"))
        .and(path("/api/user/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "fresh-token"})))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = client_with_session(&mock_server, None);
    let error = client.list(Resource::Orders).await.unwrap_err();

    assert!(error.is_auth_expired());
    assert!(client.store().load().unwrap().is_none());
}

#[tokio::test]
async fn test_replayed_request_is_not_refreshed_twice() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/software"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Not allowed"})))
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/user/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "fresh-token"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_with_session(&mock_server, Some("refresh-1"));
    let result: Result<Value, _> = client.list(Resource::Software).await;

    assert!(matches!(result, Err(ClientError::AuthExpired(_))));
}

#[tokio::test]
async fn test_unauthenticated_request_is_not_refreshed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Login required"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = TokenStore::in_memory();
    store.set_backend_preference(&mock_server.uri()).unwrap();
    let client = ApiClient::builder().store(store).build().unwrap();

    let error = client.list(Resource::Orders).await.unwrap_err();
    assert!(error.is_auth_expired());
}

#[tokio::test]
async fn test_cancelled_caller_does_not_stall_refresh() {
    let mock_server = MockServer::start().await;
    mount_orders(&mock_server, 1).await;

    Mock::given(method("POST"))
        .and(path("/api/user/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"token": "fresh-token", "refreshToken": "refresh-2"}))
                .set_delay(Duration::from_millis(150)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = TokenStore::in_memory();
    store.set_backend_preference(&mock_server.uri()).unwrap();
    store.save("stale-token", Some("refresh-1"), false).unwrap();
    let client = ApiClient::builder()
        .store(store)
        .timeout(Duration::from_millis(400))
        .build()
        .unwrap();

    // Give up on the first request while its refresh is still outstanding
    let abandoned = tokio::time::timeout(Duration::from_millis(80), client.list(Resource::Orders)).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!client.is_refreshing());
    let session = client.store().load().unwrap().unwrap();
    assert_eq!(session.access_token, "fresh-token");
    assert_eq!(session.refresh_token.as_deref(), Some("refresh-2"));

    assert_eq!(client.list(Resource::Orders).await.unwrap(), json!([{"id": 1}]));
}

#[tokio::test]
async fn test_late_unauthorized_replays_with_stored_token() {
    let mock_server = MockServer::start().await;
    mount_orders(&mock_server, 1).await;

    // This 401 arrives well after the refresh triggered by /api/orders settled
    Mock::given(method("GET"))
        .and(path("/api/licenses"))
        .and(header("authorization", "Bearer stale-token"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"message": "Token expired"}))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/licenses"))
        .and(header("authorization", "Bearer fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 7}])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/user/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"token": "fresh-token"}))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_with_session(&mock_server, Some("refresh-1"));
    let (orders, licenses) = tokio::join!(client.list(Resource::Orders), client.list(Resource::Licenses));

    assert_eq!(orders.unwrap(), json!([{"id": 1}]));
    assert_eq!(licenses.unwrap(), json!([{"id": 7}]));
    assert!(!client.is_refreshing());
}

#[tokio::test]
async fn test_refresh_timeout_ends_session_with_timeout_kind() {
    let mock_server = MockServer::start().await;
    mount_orders(&mock_server, 0).await;

    Mock::given(method("POST"))
        .and(path("/api/user/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"token": "fresh-token"}))
                .set_delay(Duration::from_millis(500)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let failures = Arc::new(AtomicUsize::new(0));
    let counter = failures.clone();
    let store = TokenStore::in_memory();
    store.set_backend_preference(&mock_server.uri()).unwrap();
    store.save("stale-token", Some("refresh-1"), false).unwrap();
    let client = ApiClient::builder()
        .store(store)
        .timeout(Duration::from_millis(150))
        .on_auth_failed(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .build()
        .unwrap();

    let error = client.list(Resource::Orders).await.unwrap_err();

    assert!(matches!(error, ClientError::RefreshFailed { kind: ErrorKind::Timeout, .. }));
    assert_eq!(error.kind(), ErrorKind::Timeout);
    assert!(error.is_auth_expired());
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert!(client.store().load().unwrap().is_none());
}
