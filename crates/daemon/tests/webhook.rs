#[path = "support/common.rs"]
mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use support::*;

fn webhook_post(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("build request")
}

async fn create_token(app: &TestApp, name: &str) -> (String, String) {
    let resp = send(
        &app.admin,
        post_json("/tokens", serde_json::json!({ "name": name })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    (
        body["id"].as_str().unwrap().to_string(),
        body["token"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn created_tokens_have_the_documented_shape_and_plaintext_once() {
    let app = setup_app();
    let (id, plaintext) = create_token(&app, "ci").await;

    assert_eq!(id.len(), 16);
    assert!(plaintext.starts_with("ts_"));
    assert_eq!(plaintext.len(), 3 + 64);

    // Listing exposes neither plaintext nor hash.
    let resp = send(&app.admin, get("/tokens")).await;
    let raw = body_string(resp).await;
    assert!(!raw.contains(&plaintext));
    assert!(!raw.contains("hash"));
    assert!(!raw.contains("$2"));

    let listed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let list = listed.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["name"], "ci");
    assert!(list[0]["last_used"].is_null());
}

#[tokio::test]
async fn revoke_token_then_404() {
    let app = setup_app();
    let (id, _plaintext) = create_token(&app, "ci").await;

    let resp = send(&app.admin, delete(&format!("/tokens/{id}"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["status"], "revoked");

    let resp = send(&app.admin, delete(&format!("/tokens/{id}"))).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_deploy_requires_a_valid_bearer_token() {
    let app = setup_app();
    add_service(&app.admin, "app1", &["app1.example.com"]).await;
    let (_id, plaintext) = create_token(&app, "ci").await;

    // No header at all.
    let resp = send(&app.webhook, webhook_post("/webhook/deploy/app1", None)).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // Well-formed but wrong token.
    let wrong = format!("ts_{}", "0".repeat(64));
    let resp = send(
        &app.webhook,
        webhook_post("/webhook/deploy/app1", Some(&wrong)),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // Malformed token shape.
    let resp = send(
        &app.webhook,
        webhook_post("/webhook/deploy/app1", Some("not-a-token")),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // None of the failures advanced last_used.
    let doc = app.store.load().await.unwrap();
    assert!(doc.tokens[0].last_used.is_none());

    // The real token deploys and stamps last_used.
    let resp = send(
        &app.webhook,
        webhook_post("/webhook/deploy/app1", Some(&plaintext)),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "deployed");
    assert_eq!(body["service"], "app1");

    let doc = app.store.load().await.unwrap();
    assert!(doc.tokens[0].last_used.is_some());
    assert!(doc.services[0].last_deploy.is_some());
}

#[tokio::test]
async fn webhook_deploy_finds_services_case_insensitively() {
    let app = setup_app();
    add_service(&app.admin, "App1", &["app1.example.com"]).await;
    let (_id, plaintext) = create_token(&app, "ci").await;

    let resp = send(
        &app.webhook,
        webhook_post("/webhook/deploy/app1", Some(&plaintext)),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["service"], "App1");
}

#[tokio::test]
async fn webhook_deploy_rejects_unknown_and_disabled_services() {
    let app = setup_app();
    let (_id, plaintext) = create_token(&app, "ci").await;

    let resp = send(
        &app.webhook,
        webhook_post("/webhook/deploy/ghost", Some(&plaintext)),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    add_service(&app.admin, "app1", &["app1.example.com"]).await;
    let mut doc = app.store.load().await.unwrap();
    doc.services[0].enabled = false;
    app.store.save(doc).await.unwrap();

    let resp = send(
        &app.webhook,
        webhook_post("/webhook/deploy/app1", Some(&plaintext)),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(resp).await["error"]
        .as_str()
        .unwrap()
        .contains("disabled"));
}

#[tokio::test]
async fn webhook_timeout_query_must_be_positive() {
    let app = setup_app();
    add_service(&app.admin, "app1", &["app1.example.com"]).await;
    let (_id, plaintext) = create_token(&app, "ci").await;

    for bad in ["0", "-5", "soon"] {
        let resp = send(
            &app.webhook,
            webhook_post(
                &format!("/webhook/deploy/app1?timeout={bad}"),
                Some(&plaintext),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "timeout={bad}");
    }

    let resp = send(
        &app.webhook,
        webhook_post("/webhook/deploy/app1?timeout=5", Some(&plaintext)),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn webhook_router_exposes_only_the_deploy_hook() {
    let app = setup_app();
    let resp = send(&app.webhook, get("/services")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = send(&app.webhook, get("/status")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_deploy_failure_reports_the_phase() {
    let app = setup_app();
    add_service(&app.admin, "app1", &["app1.example.com"]).await;
    let (_id, plaintext) = create_token(&app, "ci").await;

    // Seed a healthy current bundle, then break health.
    let resp = send(&app.admin, post_json("/deploy", serde_json::json!({}))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    app.compose.set_healthy(false);

    let resp = send(
        &app.webhook,
        webhook_post("/webhook/deploy/app1?timeout=1", Some(&plaintext)),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(resp).await;
    let message = body["error"].as_str().unwrap();
    assert!(message.contains("deploy failed"));
    assert!(message.contains("health check failed"));
}
