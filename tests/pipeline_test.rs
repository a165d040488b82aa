//! End-to-end tests of the request pipeline against a local HTTP server.

use integrations_zscaler::resilience::RateLimitProfile;
use integrations_zscaler::{ApiRequest, ClientConfig, Service, ZscalerClient, ZscalerError};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEST_API_KEY: &str = "abcdefghijkl";

fn private_access(server: &MockServer) -> ClientConfig {
    ClientConfig::builder(Service::Zpa)
        .base_url(server.uri())
        .client_id("client-1")
        .client_secret("secret-1")
        .min_wait(Duration::from_millis(10))
        .max_wait(Duration::from_millis(50))
        .rate_limits(RateLimitProfile::unlimited())
        .background_renewal(false)
        .build()
        .unwrap()
}

fn internet_access(server: &MockServer) -> ClientConfig {
    ClientConfig::builder(Service::Zia)
        .base_url(server.uri())
        .sandbox_url(server.uri())
        .username("admin@example.com")
        .password("hunter2")
        .api_key(TEST_API_KEY)
        .sandbox_token("sandbox-token")
        .min_wait(Duration::from_millis(10))
        .max_wait(Duration::from_millis(50))
        .rate_limits(RateLimitProfile::unlimited())
        .background_renewal(false)
        .build()
        .unwrap()
}

async fn mount_signin(server: &MockServer, expected_logins: u64) {
    Mock::given(method("POST"))
        .and(path("/signin"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("client_id=client-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "zpa-token",
            "token_type": "Bearer",
            "expires_in": "3600"
        })))
        .expect(expected_logins)
        .mount(server)
        .await;
}

async fn mount_session(server: &MockServer, expected_logins: u64) {
    Mock::given(method("POST"))
        .and(path("/authenticatedSession"))
        .and(body_string_contains("admin@example.com"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "JSESSIONID=session-abc; Path=/; Secure; HttpOnly")
                .set_body_json(json!({"authType": "ADMIN_LOGIN"})),
        )
        .expect(expected_logins)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_throttled_requests_are_retried() {
    let server = MockServer::start().await;
    mount_signin(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/mgmtconfig/v1/apps"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/mgmtconfig/v1/apps"))
        .and(header("authorization", "Bearer zpa-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .expect(1)
        .mount(&server)
        .await;

    let client = ZscalerClient::new(private_access(&server)).unwrap();
    let apps: serde_json::Value = client.get("/mgmtconfig/v1/apps").await.unwrap();

    assert_eq!(apps, json!([{"id": 1}]));
}

#[tokio::test]
async fn test_exhausted_retries_report_last_status() {
    let server = MockServer::start().await;
    mount_signin(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/mgmtconfig/v1/apps"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let mut config = private_access(&server);
    config.retry.max_retries = 2;
    let client = ZscalerClient::new(config).unwrap();

    match client.execute(ApiRequest::get("/mgmtconfig/v1/apps")).await {
        Err(ZscalerError::RetriesExhausted { attempts, status, body }) => {
            assert_eq!(attempts, 3);
            assert_eq!(status.map(|s| s.as_u16()), Some(503));
            assert_eq!(body, "maintenance");
        }
        other => panic!("expected exhausted retries, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rejected_login_is_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/signin"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid client"))
        .expect(1)
        .mount(&server)
        .await;

    let client = ZscalerClient::new(private_access(&server)).unwrap();
    let err = client
        .execute(ApiRequest::get("/mgmtconfig/v1/apps"))
        .await
        .unwrap_err();

    assert!(matches!(err, ZscalerError::Authentication(_)));
    assert_eq!(err.status_code().map(|s| s.as_u16()), Some(401));
}

#[tokio::test]
async fn test_cached_get_skips_network_until_write() {
    let server = MockServer::start().await;
    mount_signin(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/mgmtconfig/v1/apps/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7})))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/mgmtconfig/v1/apps/7"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = private_access(&server);
    config.cache.enabled = true;
    let client = ZscalerClient::new(config).unwrap();

    let first = client.execute(ApiRequest::get("/mgmtconfig/v1/apps/7")).await.unwrap();
    let second = client.execute(ApiRequest::get("/mgmtconfig/v1/apps/7")).await.unwrap();
    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.body, second.body);

    client
        .execute(ApiRequest::put("/mgmtconfig/v1/apps/7").with_json(&json!({"id": 7})).unwrap())
        .await
        .unwrap();
    let third = client.execute(ApiRequest::get("/mgmtconfig/v1/apps/7")).await.unwrap();
    assert!(!third.from_cache);
}

#[tokio::test]
async fn test_session_not_valid_triggers_one_new_login() {
    let server = MockServer::start().await;
    mount_session(&server, 2).await;

    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "code": "SESSION_NOT_VALID",
            "message": "Session is not valid"
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .and(header("cookie", "JSESSIONID=session-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let client = ZscalerClient::new(internet_access(&server)).unwrap();
    let users: Vec<serde_json::Value> = client.get("/users").await.unwrap();
    assert!(users.is_empty());
}

#[tokio::test]
async fn test_shutdown_closes_session_once() {
    let server = MockServer::start().await;
    mount_session(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ACTIVE"})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/authenticatedSession"))
        .and(header("cookie", "JSESSIONID=session-abc"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = ZscalerClient::new(internet_access(&server)).unwrap();
    let _: serde_json::Value = client.get("/status").await.unwrap();

    client.shutdown().await;
    client.shutdown().await;
}

#[tokio::test]
async fn test_sandbox_requests_carry_query_token() {
    let server = MockServer::start().await;
    mount_session(&server, 0).await;

    Mock::given(method("POST"))
        .and(path("/zscsb/submit"))
        .and(query_param("api_token", "sandbox-token"))
        .and(query_param("force", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 200})))
        .expect(1)
        .mount(&server)
        .await;

    let client = ZscalerClient::new(internet_access(&server)).unwrap();
    let response = client
        .execute(
            ApiRequest::post("/zscsb/submit")
                .with_query("force", 1)
                .with_body(vec![0u8, 1, 2], "application/octet-stream"),
        )
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 200);
}

#[tokio::test]
async fn test_api_key_exchange_for_client_connector() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/v1/login"))
        .and(body_string_contains("\"apiKey\":\"zcc-key\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jwtToken": "zcc-jwt"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/public/v1/getDevices"))
        .and(header("authorization", "Bearer zcc-jwt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&server)
        .await;

    let config = ClientConfig::builder(Service::Zcc)
        .base_url(server.uri())
        .api_key("zcc-key")
        .api_secret("zcc-secret")
        .rate_limits(RateLimitProfile::unlimited())
        .background_renewal(false)
        .build()
        .unwrap();
    let client = ZscalerClient::new(config).unwrap();

    for _ in 0..2 {
        let devices: Vec<serde_json::Value> = client.get("/public/v1/getDevices").await.unwrap();
        assert!(devices.is_empty());
    }
}

#[tokio::test]
async fn test_fatal_status_carries_request_details() {
    let server = MockServer::start().await;
    mount_signin(&server, 1).await;

    Mock::given(method("DELETE"))
        .and(path("/mgmtconfig/v1/apps/404"))
        .respond_with(ResponseTemplate::new(404).set_body_string("resource.not.found"))
        .expect(1)
        .mount(&server)
        .await;

    let client = ZscalerClient::new(private_access(&server)).unwrap();
    match client.delete("/mgmtconfig/v1/apps/404").await {
        Err(ZscalerError::Api { method, url, status, body }) => {
            assert_eq!(method, "DELETE");
            assert!(url.ends_with("/mgmtconfig/v1/apps/404"));
            assert_eq!(status.as_u16(), 404);
            assert_eq!(body, "resource.not.found");
        }
        other => panic!("expected api error, got {:?}", other),
    }
}
