#[path = "support/common.rs"]
mod support;

use axum::http::StatusCode;
use support::*;

#[tokio::test]
async fn add_and_list_service_with_defaults() {
    let app = setup_app();

    let created = add_service(&app.admin, "app1", &["app1.example.com"]).await;
    assert_eq!(created["name"], "app1");
    assert!(created["id"].as_str().unwrap().starts_with("app1-"));

    let resp = send(&app.admin, get("/services")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let services = body_json(resp).await;
    let list = services.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["name"], "app1");
    assert_eq!(list[0]["enabled"], true);
    assert_eq!(list[0]["type"], "registry-image");
    assert_eq!(list[0]["resources"]["memory_limit_mb"], 256);
}

#[tokio::test]
async fn hostname_collision_is_conflict_case_insensitive() {
    let app = setup_app();
    add_service(&app.admin, "app1", &["app1.example.com"]).await;

    let resp = send(
        &app.admin,
        post_json(
            "/services",
            serde_json::json!({
                "name": "app2",
                "image": "nginx",
                "internal_port": 81,
                "hostnames": ["APP1.Example.COM"],
            }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = send(&app.admin, get("/services")).await;
    let services = body_json(resp).await;
    assert_eq!(services.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_name_is_conflict_case_insensitive() {
    let app = setup_app();
    add_service(&app.admin, "app1", &[]).await;

    let resp = send(
        &app.admin,
        post_json(
            "/services",
            serde_json::json!({ "name": "APP1", "image": "nginx", "internal_port": 81 }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn invalid_fields_are_rejected_before_any_write() {
    let app = setup_app();
    let cases = [
        serde_json::json!({ "image": "" }),
        serde_json::json!({ "name": "ok", "image": "bad image\nname", "internal_port": 80 }),
        serde_json::json!({ "name": "2bad", "image": "nginx", "internal_port": 80 }),
        serde_json::json!({ "name": "ok", "image": "nginx", "internal_port": 80,
                            "hostnames": ["bad_host.example.com"] }),
        serde_json::json!({ "name": "ok", "image": "nginx", "internal_port": 80,
                            "env": { "BAD-KEY": "v" } }),
        serde_json::json!({ "name": "ok", "image": "nginx", "internal_port": 80,
                            "volumes": ["/etc/passwd:/data"] }),
    ];
    for body in cases {
        let resp = send(&app.admin, post_json("/services", body.clone())).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "payload: {body}");
    }

    let resp = send(&app.admin, get("/services")).await;
    assert_eq!(body_json(resp).await.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn name_and_port_are_derived_from_the_image() {
    let app = setup_app();
    app.compose.set_image_port(Some(8080));

    let resp = send(
        &app.admin,
        post_json(
            "/services",
            serde_json::json!({ "image": "ghcr.io/org/myapp:v1.2" }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let created = body_json(resp).await;
    assert_eq!(created["name"], "myapp");
    assert_eq!(created["internal_port"], 8080);
    assert!(app.compose.pull_calls() >= 1);
}

#[tokio::test]
async fn port_detection_falls_back_to_80() {
    let app = setup_app();
    app.compose.set_image_port(None);

    let resp = send(
        &app.admin,
        post_json("/services", serde_json::json!({ "image": "custom-thing" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["internal_port"], 80);
}

#[tokio::test]
async fn delete_service_then_404() {
    let app = setup_app();
    add_service(&app.admin, "app1", &[]).await;

    let resp = send(&app.admin, delete("/services/App1")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "removed");

    let resp = send(&app.admin, delete("/services/App1")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_service_replaces_fields_and_enforces_uniqueness() {
    let app = setup_app();
    add_service(&app.admin, "app1", &["app1.example.com"]).await;
    add_service(&app.admin, "app2", &["app2.example.com"]).await;

    let resp = send(
        &app.admin,
        put_json(
            "/services/app1",
            serde_json::json!({
                "image": "nginx:1.25",
                "internal_port": 8080,
                "hostnames": ["app1.example.com", "www.example.com"],
            }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let updated = body_json(resp).await;
    assert_eq!(updated["image"], "nginx:1.25");
    assert_eq!(updated["internal_port"], 8080);

    // Hostname owned by app2 is rejected.
    let resp = send(
        &app.admin,
        put_json(
            "/services/app1",
            serde_json::json!({ "hostnames": ["APP2.example.com"] }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // Unknown service is a 404.
    let resp = send(
        &app.admin,
        put_json("/services/ghost", serde_json::json!({ "image": "nginx" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deploy_promotes_and_stamps_last_deploy() {
    let app = setup_app();
    add_service(&app.admin, "app1", &["app1.example.com"]).await;

    let resp = send(
        &app.admin,
        post_json("/deploy", serde_json::json!({ "timeout_ms": 500 })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "deployed");
    assert!(body["time"].as_str().is_some());

    let current = app.state.paths.current_dir();
    assert!(current.join("docker-compose.yml").is_file());

    let doc = app.store.load().await.unwrap();
    assert!(doc.services[0].last_deploy.is_some());
}

#[tokio::test]
async fn deploy_accepts_empty_body() {
    let app = setup_app();
    let resp = send(&app.admin, post_empty("/deploy")).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn failed_health_deploy_reports_rollback() {
    let app = setup_app();
    add_service(&app.admin, "app1", &["app1.example.com"]).await;

    // First deploy succeeds and becomes current.
    let resp = send(&app.admin, post_json("/deploy", serde_json::json!({}))).await;
    assert_eq!(resp.status(), StatusCode::OK);

    app.compose.set_healthy(false);
    let resp = send(
        &app.admin,
        post_json("/deploy", serde_json::json!({ "timeout_ms": 30 })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(resp).await;
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("health check failed, rolled back"));

    // last_deploy untouched by the failed attempt.
    let doc = app.store.load().await.unwrap();
    assert!(doc.services[0].last_deploy.is_some());
}

#[tokio::test]
async fn rollback_without_backups_is_bad_request() {
    let app = setup_app();
    let resp = send(&app.admin, post_empty("/rollback")).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("no backups"));
}

#[tokio::test]
async fn status_reports_counts_and_containers() {
    let app = setup_app();
    add_service(&app.admin, "app1", &[]).await;
    send(&app.admin, post_json("/deploy", serde_json::json!({}))).await;

    let resp = send(&app.admin, get("/status")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service_count"], 1);
    assert_eq!(body["has_cloudflare_token"], false);
    assert_eq!(body["proxy"]["service"], "traefik");
    assert_eq!(body["tunnel"]["service"], "cloudflared");
}

#[tokio::test]
async fn version_reports_build_metadata() {
    let app = setup_app();
    let resp = send(&app.admin, get("/version")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(
        body["version"].as_str().unwrap(),
        env!("CARGO_PKG_VERSION")
    );
    assert!(body["commit"].as_str().is_some());
}

#[tokio::test]
async fn health_reflects_infrastructure_containers() {
    let app = setup_app();
    send(&app.admin, post_json("/deploy", serde_json::json!({}))).await;

    let resp = send(&app.admin, get("/health")).await;
    let body = body_json(resp).await;
    assert_eq!(body["daemon"], "ok");
    assert_eq!(body["proxy"]["running"], true);
    assert_eq!(body["tunnel"]["running"], true);
    assert_eq!(body["healthy"], true);
}

#[tokio::test]
async fn health_reports_missing_containers_before_first_deploy() {
    let app = setup_app();
    let resp = send(&app.admin, get("/health")).await;
    let body = body_json(resp).await;
    assert_eq!(body["healthy"], false);
    assert!(body["proxy"]["error"]
        .as_str()
        .unwrap()
        .contains("not found"));
}

#[tokio::test]
async fn logs_require_a_service_name() {
    let app = setup_app();
    let resp = send(&app.admin, get("/logs")).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn logs_return_compose_output_as_plain_text() {
    let app = setup_app();
    app.compose.set_logs("line one\nline two\n");
    send(&app.admin, post_json("/deploy", serde_json::json!({}))).await;

    let resp = send(&app.admin, get("/logs?service=app1&tail=50")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));
    assert_eq!(body_string(resp).await, "line one\nline two\n");
}

#[tokio::test]
async fn logs_follow_streams_until_backend_finishes() {
    let app = setup_app();
    app.compose.set_logs("streamed line\n");

    let resp = send(&app.admin, get("/logs?service=app1&follow=1")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "streamed line\n");
}

#[tokio::test]
async fn access_log_channels_serve_tails_but_never_follow() {
    let app = setup_app();
    // Generate a couple of admin requests so the ring has content.
    send(&app.admin, get("/status")).await;
    send(&app.admin, get("/version")).await;

    let resp = send(&app.admin, get("/logs?service=api&tail=10")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_string(resp).await;
    assert!(body.contains("GET /status"));

    let resp = send(&app.admin, get("/logs?service=api&follow=1")).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn method_mismatches_are_405() {
    let app = setup_app();
    let resp = send(&app.admin, get("/deploy")).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    let resp = send(&app.admin, post_empty("/status")).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn me_reports_unauthenticated_without_browser_auth() {
    let app = setup_app();
    let resp = send(&app.admin, get("/me")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["authenticated"], false);
}

#[tokio::test]
async fn ui_router_exposes_only_the_read_surface() {
    let app = setup_app();
    let resp = send(&app.ui, get("/status")).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = send(
        &app.ui,
        post_json("/services", serde_json::json!({ "image": "nginx" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    let resp = send(&app.ui, post_empty("/deploy")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn remote_enable_requires_a_hostname_and_persists_settings() {
    let app = setup_app();

    let resp = send(&app.admin, post_json("/remote/enable", serde_json::json!({}))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = send(
        &app.admin,
        post_json(
            "/remote/enable",
            serde_json::json!({ "ui_hostname": "ui.example.com" }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "enabled");
    assert_eq!(body["ui_hostname"], "ui.example.com");

    let doc = app.store.load().await.unwrap();
    assert!(doc.settings.remote.enabled);
    assert_eq!(
        doc.settings.remote.ui_hostname.as_deref(),
        Some("ui.example.com")
    );

    let resp = send(&app.admin, post_empty("/remote/disable")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let doc = app.store.load().await.unwrap();
    assert!(!doc.settings.remote.enabled);
    assert!(doc.settings.remote.ui_hostname.is_none());
}

#[tokio::test]
async fn remote_enable_rejects_invalid_hostnames() {
    let app = setup_app();
    let resp = send(
        &app.admin,
        post_json(
            "/remote/enable",
            serde_json::json!({ "ui_hostname": "bad_host!.example.com" }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn init_requires_an_api_token() {
    let app = setup_app();
    let resp = send(&app.admin, post_json("/init", serde_json::json!({}))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn init_token_round_trips_the_stored_token() {
    let app = setup_app();
    let resp = send(&app.admin, get("/init/token")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["cloudflare_api_token"], "");

    let mut doc = app.store.load().await.unwrap();
    doc.settings.cloudflare_api_token = Some("cf-token".into());
    app.store.save(doc).await.unwrap();

    let resp = send(&app.admin, get("/init/token")).await;
    assert_eq!(body_json(resp).await["cloudflare_api_token"], "cf-token");
}
