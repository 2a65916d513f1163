mod common;

use axum::http::StatusCode;
use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn email_otp_signs_in_once() {
    let app = TestApp::new();
    let code = app
        .request_code("email", "user@example.com", "user@example.com")
        .await;

    let res = app
        .post(
            "/auth/signin/otp",
            json!({ "login": "user@example.com", "otp": code }),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.body["accessToken"].is_string());
    assert!(res.body["refreshToken"].is_string());
    assert_eq!(app.users.user_count(), 1);

    let replay = app
        .post(
            "/auth/signin/otp",
            json!({ "login": "user@example.com", "otp": code }),
        )
        .await;
    assert_eq!(replay.status, StatusCode::UNAUTHORIZED);
    assert_eq!(replay.body["error"], "otp is invalid");
}

#[tokio::test]
async fn second_request_for_live_code_is_throttled() {
    let app = TestApp::new();
    app.request_code("email", "user@example.com", "user@example.com")
        .await;

    let res = app
        .post(
            "/auth/otp",
            json!({ "type": "email", "destination": "USER@example.com" }),
        )
        .await;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(app.notifier.sent().len(), 1);
}

#[tokio::test]
async fn wrong_code_does_not_burn_the_real_one() {
    let app = TestApp::new();
    let code = app
        .request_code("email", "user@example.com", "user@example.com")
        .await;
    let wrong = if code == "000000" { "111111" } else { "000000" };

    let res = app
        .post(
            "/auth/signin/otp",
            json!({ "login": "user@example.com", "otp": wrong }),
        )
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let res = app
        .post(
            "/auth/signin/otp",
            json!({ "login": "user@example.com", "otp": code }),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
}

#[tokio::test]
async fn sms_login_normalises_phone_numbers() {
    let app = TestApp::new();
    let code = app
        .request_code("sms", "+1 (555) 123-4567", "+15551234567")
        .await;

    let res = app
        .post(
            "/auth/signin/otp",
            json!({ "login": "+15551234567", "otp": code }),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);

    let sent = app.notifier.sent();
    assert_eq!(sent[0].channel, auth_service::models::OtpChannel::Sms);
}

#[tokio::test]
async fn malformed_destination_is_a_validation_error() {
    let app = TestApp::new();

    let res = app
        .post(
            "/auth/otp",
            json!({ "type": "sms", "destination": "5551234" }),
        )
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert!(res.body["messages"][0]
        .as_str()
        .unwrap()
        .starts_with("destination:"));

    let res = app
        .post("/auth/otp", json!({ "type": "email", "destination": "" }))
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert!(app.notifier.sent().is_empty());
}

#[tokio::test]
async fn unknown_login_is_unauthorized() {
    let app = TestApp::new();
    let res = app
        .post(
            "/auth/signin/otp",
            json!({ "login": "nobody@example.com", "otp": "123456" }),
        )
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.users.user_count(), 0);
}

#[tokio::test]
async fn concurrent_requests_issue_a_single_code() {
    let app = TestApp::new();
    let body = json!({ "type": "email", "destination": "user@example.com" });

    let (a, b) = futures::join!(
        app.post("/auth/otp", body.clone()),
        app.post("/auth/otp", body.clone()),
    );

    let mut statuses = [a.status, b.status];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]);
}
