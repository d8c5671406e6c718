//! HTTP API tests against a running engine with an in-memory printer driver.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::Engine as _;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use printhub_db::{Database, DbConfig};
use printhub_engine::{ConfigStore, Engine, EngineBuilder, MemoryDriver, StationConfig};
use printhub_station::{build_router, AppState, API_KEY_HEADER};

const KEY: &str = "printhub-default-key";

struct TestStation {
    app: Router,
    engine: Engine,
}

async fn station() -> TestStation {
    let mut config = StationConfig::default();
    config.notifications.enabled = false;
    config.printing.retry_delay_ms = 10;
    config.printing.dispatch_poll_interval_ms = 20;

    let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
    let mut engine = EngineBuilder::new(Arc::new(ConfigStore::in_memory(config)))
        .with_database(db)
        .with_driver(Arc::new(MemoryDriver::new()))
        .build()
        .await
        .unwrap();
    engine.start().await.unwrap();

    TestStation {
        app: build_router(AppState::new(engine.control())),
        engine,
    }
}

impl TestStation {
    async fn call(&self, method: &str, uri: &str, key: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let (status, bytes) = self.raw(method, uri, key, body).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn raw(&self, method: &str, uri: &str, key: Option<&str>, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            request = request.header(API_KEY_HEADER, key);
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    /// One printer and a default category pointing at it.
    async fn counter_setup(&self) {
        let (status, _) = self
            .call(
                "POST",
                "/api/printers",
                Some(KEY),
                Some(json!({ "name": "counter", "connection": "memory://" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = self
            .call(
                "POST",
                "/api/categories",
                Some(KEY),
                Some(json!({
                    "name": "receipts",
                    "members": [{ "printer": "counter", "priority": 1 }]
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = self
            .call(
                "PUT",
                "/api/config",
                Some(KEY),
                Some(json!({ "routing": { "default_category": "receipts" } })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["routing"]["default_category"], "receipts");
    }

    async fn wait_for_status(&self, job_id: &str, wanted: &str) -> Value {
        let uri = format!("/api/jobs/{job_id}");
        for _ in 0..200 {
            let (_, job) = self.call("GET", &uri, Some(KEY), None).await;
            if job["status"] == wanted {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {job_id} never reached {wanted}");
    }
}

fn ticket() -> Value {
    json!({
        "fileName": "order-42.txt",
        "content": base64::engine::general_purpose::STANDARD.encode("1x Flat white\n"),
        "metadata": { "orderType": "takeaway" }
    })
}

#[tokio::test]
async fn test_health_needs_no_key() {
    let station = station().await;
    let (status, body) = station.call("GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], true);
}

#[tokio::test]
async fn test_submission_with_wrong_key_is_rejected_without_a_row() {
    let station = station().await;

    let (status, body) = station
        .call("POST", "/api/jobs", Some("not-the-key-at-all"), Some(ticket()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = station.call("POST", "/api/jobs", None, Some(ticket())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, jobs) = station.call("GET", "/api/jobs", Some(KEY), None).await;
    assert_eq!(jobs.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_wrong_key_wins_over_malformed_content() {
    let station = station().await;

    let mut body = ticket();
    body["content"] = json!("!!!not base64!!!");
    let (status, reply) = station
        .call("POST", "/api/jobs", Some("not-the-key-at-all"), Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply["code"], "UNAUTHORIZED");
    assert!(!reply["message"].as_str().unwrap().contains("content"));

    let (status, _) = station.call("POST", "/api/jobs", None, Some(body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_submitted_job_prints_and_lands_in_analytics() {
    let mut station = station().await;
    station.counter_setup().await;

    let (status, receipt) = station.call("POST", "/api/jobs", Some(KEY), Some(ticket())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(receipt["status"], "accepted");

    let job_id = receipt["jobId"].as_str().unwrap().to_string();
    let job = station.wait_for_status(&job_id, "succeeded").await;
    assert_eq!(job["assignedPrinter"], "counter");

    let (status, csv) = station.raw("GET", "/api/analytics?format=csv", Some(KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    let csv = String::from_utf8(csv).unwrap();
    let mut lines = csv.lines();
    assert!(lines.next().unwrap().contains("jobId"));
    assert!(lines.next().unwrap().contains(&job_id));

    let (_, summary) = station
        .call("GET", "/api/analytics/summary", Some(KEY), None)
        .await;
    assert_eq!(summary["total"], 1);
    assert_eq!(summary["succeeded"], 1);

    station.engine.shutdown().await;
}

#[tokio::test]
async fn test_bad_input_is_unprocessable() {
    let station = station().await;

    let mut body = ticket();
    body["content"] = json!("%%% not base64 %%%");
    let (status, _) = station.call("POST", "/api/jobs", Some(KEY), Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let mut body = ticket();
    body["fileName"] = json!("");
    let (status, body) = station.call("POST", "/api/jobs", Some(KEY), Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, _) = station
        .call("GET", "/api/analytics?format=xml", Some(KEY), None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let station = station().await;
    let (status, body) = station
        .call("POST", "/api/jobs/does-not-exist/cancel", Some(KEY), None)
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_api_key_rotation_and_reset() {
    let station = station().await;
    let new_key = "station-key-0123456789abcdef";

    let (status, info) = station
        .call("PUT", "/api/security/api-key", Some(KEY), Some(json!({ "apiKey": new_key })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["isDefault"], false);

    let (status, _) = station.call("GET", "/api/printers", Some(KEY), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = station.call("GET", "/api/printers", Some(new_key), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, info) = station
        .call("DELETE", "/api/security/api-key", Some(new_key), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["isDefault"], true);

    let (status, _) = station.call("GET", "/api/printers", Some(KEY), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_routing_crud_round_trip() {
    let station = station().await;
    station.counter_setup().await;

    let (_, categories) = station.call("GET", "/api/categories", Some(KEY), None).await;
    let category_id = categories[0]["id"].as_str().unwrap().to_string();

    let (status, rule) = station
        .call(
            "POST",
            "/api/rules",
            Some(KEY),
            Some(json!({
                "categoryId": category_id,
                "field": "orderType",
                "pattern": "^take",
                "matchType": "regex",
                "priority": 10
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{rule}");

    let (status, _) = station
        .call(
            "POST",
            "/api/rules",
            Some(KEY),
            Some(json!({
                "categoryId": category_id,
                "field": "orderType",
                "pattern": "([",
                "matchType": "regex"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let rule_uri = format!("/api/rules/{}", rule["id"].as_str().unwrap());
    let (status, _) = station.call("DELETE", &rule_uri, Some(KEY), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, rules) = station.call("GET", "/api/rules", Some(KEY), None).await;
    assert_eq!(rules.as_array().unwrap().len(), 0);
}
