//! Request execution and retry scenarios against a mock homeserver.

use std::time::Instant;

use reqwest::Client;
use serde_json::{Value, json};
use tokio_test::assert_ok;
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ferrix::{Error, RequestDescriptor, RequestExecutor};

fn executor_for(server: &MockServer) -> RequestExecutor {
    let base = Url::parse(&server.uri()).unwrap();
    RequestExecutor::new(Client::new(), base)
}

#[tokio::test]
async fn successful_response_deserializes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_matrix/client/versions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"versions": ["v1.11"]})))
        .mount(&server)
        .await;

    let executor = executor_for(&server);
    let body: Value = tokio_test::assert_ok!(executor.get("/_matrix/client/versions").await);
    assert_eq!(body["versions"][0], "v1.11");
}

#[tokio::test]
async fn rate_limited_request_is_retried_after_the_suggested_delay() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "errcode": "M_LIMIT_EXCEEDED",
            "error": "Too Many Requests",
            "retry_after_ms": 200
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    let executor = executor_for(&server);
    let started = Instant::now();
    let body: Value = executor.get("/limited").await.unwrap();

    assert_eq!(body["ok"], true);
    // The retry waited out the server-suggested delay before reattempting.
    assert!(started.elapsed().as_millis() >= 200);
}

#[tokio::test]
async fn rate_limit_past_the_ceiling_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "errcode": "M_LIMIT_EXCEEDED",
            "error": "Too Many Requests",
            "retry_after_ms": 10 * 60 * 1000
        })))
        .mount(&server)
        .await;

    let executor = executor_for(&server);
    let started = Instant::now();
    let err = executor.get::<Value>("/limited").await.unwrap_err();

    // Fails without sleeping out the oversized delay.
    assert!(started.elapsed().as_secs() < 5);
    match err {
        Error::RateLimited {
            errcode,
            retry_after_ms,
            ..
        } => {
            assert_eq!(errcode, "M_LIMIT_EXCEEDED");
            assert_eq!(retry_after_ms, Some(10 * 60 * 1000));
        },
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn unauthorized_response_carries_the_flows() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_matrix/client/v3/account/password"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "session": "xyz",
            "flows": [{"stages": ["m.login.password"]}]
        })))
        .mount(&server)
        .await;

    let executor = executor_for(&server);
    let descriptor = RequestDescriptor::post("/_matrix/client/v3/account/password")
        .json_body(&json!({"new_password": "s3cret"}))
        .unwrap();
    let err = executor.execute::<Value>(&descriptor).await.unwrap_err();

    match err {
        Error::AuthenticationRequired(flows) => {
            assert_eq!(flows.session.as_deref(), Some("xyz"));
            assert_eq!(flows.flows[0].stages, ["m.login.password"]);
        },
        other => panic!("expected AuthenticationRequired, got {other:?}"),
    }
}

#[tokio::test]
async fn matrix_error_envelope_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/forbidden"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "errcode": "M_FORBIDDEN",
            "error": "You are not invited to this room."
        })))
        .mount(&server)
        .await;

    let executor = executor_for(&server);
    let err = executor.get::<Value>("/forbidden").await.unwrap_err();

    match err {
        Error::Api {
            status,
            errcode,
            error,
        } => {
            assert_eq!(status, 403);
            assert_eq!(errcode, "M_FORBIDDEN");
            assert_eq!(error, "You are not invited to this room.");
        },
        other => panic!("expected Api, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_error_body_gets_a_synthetic_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let executor = executor_for(&server);
    let err = executor.get::<Value>("/broken").await.unwrap_err();

    match err {
        Error::Api {
            status,
            errcode,
            error,
        } => {
            assert_eq!(status, 502);
            assert_eq!(errcode, "M_INTERNAL");
            assert_eq!(error, "Missing error response.");
        },
        other => panic!("expected Api, got {other:?}"),
    }
}

#[tokio::test]
async fn access_token_is_sent_as_bearer_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/whoami"))
        .and(header("Authorization", "Bearer syt_token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"user_id": "@alice:example.org"})),
        )
        .mount(&server)
        .await;

    let executor = executor_for(&server);
    executor.set_access_token("syt_token".to_string()).await;
    let body: Value = tokio_test::assert_ok!(executor.get("/whoami").await);
    assert_eq!(body["user_id"], "@alice:example.org");
}

#[tokio::test]
async fn path_and_query_parameters_reach_the_wire() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        // Path parameters are percent-encoded on the wire.
        .and(path(
            "/_matrix/client/v3/rooms/%21r%3Aexample.org/typing/%40alice%3Aexample.org",
        ))
        .and(body_json(json!({"typing": true, "timeout": 30000})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let executor = executor_for(&server);
    let descriptor =
        RequestDescriptor::put("/_matrix/client/v3/rooms/{roomId}/typing/{userId}")
            .path_param("roomId", "!r:example.org")
            .path_param("userId", "@alice:example.org")
            .json_body(&json!({"typing": true, "timeout": 30000}))
            .unwrap();
    let _: ferrix::EmptyResponse = executor.execute(&descriptor).await.unwrap();
}
