//! HTTP-level tests for cookieconsent-gateway: routes, status codes, idempotency

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use cookieconsent_core::{Settings, TableNames, DEFAULT_POPUP_TITLE};
use cookieconsent_gateway::*;
use cookieconsent_store::{install, Database};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> Router {
    let db = Database::open_in_memory(TableNames::default()).unwrap();
    install(&db).unwrap();
    router(Arc::new(GatewayState::new(db, &Settings::default())))
}

fn uninstalled_app() -> Router {
    let db = Database::open_in_memory(TableNames::default()).unwrap();
    router(Arc::new(GatewayState::new(db, &Settings::default())))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    send_with(app, method, uri, body, &[]).await
}

async fn send_with(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    for (k, v) in headers {
        req = req.header(*k, *v);
    }
    let req = match body {
        Some(b) => req
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn cookie(category: &str, name: &str) -> Value {
    json!({
        "category": category,
        "cookieId": name,
        "domain": ".example.com",
        "duration": "1 year",
        "description": "test cookie",
    })
}

// ===========================================================================
// Health
// ===========================================================================

#[tokio::test]
async fn health_reports_version() {
    let (status, body) = send(&app(), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

// ===========================================================================
// Consent
// ===========================================================================

#[tokio::test]
async fn consent_totals_start_at_zero() {
    let (status, body) = send(&app(), Method::GET, "/api/consent", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], 0);
    assert_eq!(body["rejected"], 0);
}

#[tokio::test]
async fn consent_submissions_accumulate() {
    let app = app();
    send(&app, Method::POST, "/api/consent", Some(json!({"accepted": 1}))).await;
    send(&app, Method::POST, "/api/consent", Some(json!({"rejected": 1}))).await;
    let (status, body) =
        send(&app, Method::POST, "/api/consent", Some(json!({"accepted": 1, "rejected": 0}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], 2);
    assert_eq!(body["rejected"], 1);
}

#[tokio::test]
async fn idempotency_key_prevents_double_count() {
    let app = app();
    let headers = [("Idempotency-Key", "visit-123")];
    let body = Some(json!({"accepted": 1}));
    let (_, first) = send_with(&app, Method::POST, "/api/consent", body.clone(), &headers).await;
    let (status, second) = send_with(&app, Method::POST, "/api/consent", body, &headers).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);

    let (_, totals) = send(&app, Method::GET, "/api/consent", None).await;
    assert_eq!(totals["accepted"], 1);
}

#[tokio::test]
async fn replayed_response_is_marked() {
    let app = app();
    let make = || {
        Request::builder()
            .method(Method::POST)
            .uri("/api/consent")
            .header("content-type", "application/json")
            .header("Idempotency-Key", "k")
            .body(Body::from(r#"{"accepted":1}"#))
            .unwrap()
    };
    let first = app.clone().oneshot(make()).await.unwrap();
    assert!(first.headers().get("idempotency-replayed").is_none());
    let second = app.clone().oneshot(make()).await.unwrap();
    assert_eq!(second.headers().get("idempotency-replayed").unwrap(), "true");
}

#[tokio::test]
async fn storage_failure_is_503_with_generic_message() {
    let app = uninstalled_app();
    let (status, body) =
        send(&app, Method::POST, "/api/consent", Some(json!({"accepted": 1}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "storage_unavailable");
    assert!(!body["error"]["message"].as_str().unwrap().contains("no such table"));
}

// ===========================================================================
// Cookies
// ===========================================================================

#[tokio::test]
async fn cookie_crud_lifecycle() {
    let app = app();
    let (status, created) =
        send(&app, Method::POST, "/api/cookies", Some(cookie("analytics", "_ga"))).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_i64().unwrap();
    let uri = format!("/api/cookies/{}", id);

    let (status, fetched) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["cookieId"], "_ga");
    assert_eq!(fetched["category"], "analytics");

    let (status, updated) =
        send(&app, Method::PUT, &uri, Some(cookie("performance", "_gid"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["cookieId"], "_gid");
    assert_eq!(updated["category"], "performance");

    let (status, _) = send(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
    let (status, _) = send(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_domain_is_422_and_persists_nothing() {
    let app = app();
    let mut body = cookie("required", "session");
    body.as_object_mut().unwrap().remove("domain");
    let (status, err) = send(&app, Method::POST, "/api/cookies", Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["error"]["code"], "validation");
    assert_eq!(err["error"]["field"], "domain");

    let (_, list) = send(&app, Method::GET, "/api/cookies", None).await;
    assert_eq!(list.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn list_filters_by_category() {
    let app = app();
    send(&app, Method::POST, "/api/cookies", Some(cookie("analytics", "_ga"))).await;
    send(&app, Method::POST, "/api/cookies", Some(cookie("required", "sid"))).await;
    send(&app, Method::POST, "/api/cookies", Some(cookie("analytics", "_gid"))).await;

    let (status, list) = send(&app, Method::GET, "/api/cookies?category=analytics", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = list
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["cookieId"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["_ga", "_gid"]);

    let (status, _) = send(&app, Method::GET, "/api/cookies?category=marketing", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// ===========================================================================
// Banner and widget
// ===========================================================================

#[tokio::test]
async fn banner_patch_round_trip() {
    let app = app();
    let (status, banner) = send(&app, Method::GET, "/api/banner", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(banner["popupTitle"], DEFAULT_POPUP_TITLE);
    assert_eq!(banner["layout"], "box");

    let (status, patched) = send(
        &app,
        Method::PUT,
        "/api/banner",
        Some(json!({"popupTitle": "Cookies here", "position": "top-center"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["popupTitle"], "Cookies here");
    assert_eq!(patched["position"], "top-center");
    assert_eq!(patched["popupDescription"], banner["popupDescription"]);
}

#[tokio::test]
async fn widget_groups_cookies_with_descriptions() {
    let app = app();
    send(&app, Method::POST, "/api/cookies", Some(cookie("analytics", "_ga"))).await;
    send(&app, Method::POST, "/api/cookies", Some(cookie("required", "sid"))).await;

    let (status, widget) = send(&app, Method::GET, "/api/widget", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(widget["settings"]["enabled"], true);
    let categories = widget["categories"].as_array().unwrap();
    assert_eq!(categories.len(), 2);
    assert_eq!(categories[0]["category"], "required");
    assert_eq!(categories[1]["category"], "analytics");
    assert_eq!(categories[1]["cookies"][0]["cookieId"], "_ga");
    assert_eq!(
        categories[0]["description"],
        widget["banner"]["requiredCookies"]
    );
}
