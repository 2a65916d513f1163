mod common;

use axum::http::StatusCode;
use common::{test_config, TestApp};
use serde_json::json;

#[tokio::test]
async fn health_reports_dependencies() {
    let app = TestApp::new();
    let res = app.request("GET", "/health", None, None).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["status"], "healthy");
    assert_eq!(res.body["checks"]["redis"], "up");
}

#[tokio::test]
async fn openapi_document_lists_auth_routes() {
    let app = TestApp::new();
    let res = app
        .request("GET", "/.well-known/openapi.json", None, None)
        .await;
    assert_eq!(res.status, StatusCode::OK);
    let paths = res.body["paths"].as_object().unwrap();
    for path in ["/auth/otp", "/auth/signin/otp", "/auth/refresh", "/auth/signout", "/auth/me"] {
        assert!(paths.contains_key(path), "missing {}", path);
    }
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = TestApp::new();
    let res = app.request("GET", "/health", None, None).await;
    assert!(res.headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn otp_route_is_rate_limited_per_ip() {
    let mut config = test_config();
    config.rate_limit.otp_attempts = 2;
    let app = TestApp::with_config(config);

    let mut statuses = Vec::new();
    for i in 0..3 {
        let res = app
            .post(
                "/auth/otp",
                json!({ "type": "email", "destination": format!("user{}@example.com", i) }),
            )
            .await;
        statuses.push((res.status, res.headers.contains_key("retry-after")));
    }

    assert_eq!(statuses[0].0, StatusCode::OK);
    assert_eq!(statuses[1].0, StatusCode::OK);
    assert_eq!(statuses[2], (StatusCode::TOO_MANY_REQUESTS, true));
}
