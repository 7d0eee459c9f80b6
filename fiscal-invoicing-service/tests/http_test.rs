//! Integration tests for the HTTP surface.

mod common;

use common::*;
use fiscal_invoicing_service::services::extractor::ExtractionError;
use reqwest::StatusCode;
use serde_json::{json, Value};

fn valid_document() -> Value {
    document("1802498756", json!([item("firma electrónica", "10.00", 3, true)]))
}

#[tokio::test]
async fn health_and_metrics_are_served() {
    let app = spawn_app(FakeExtractor::replying(valid_document())).await;

    let health = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    let body: Value = health.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "fiscal-invoicing-service");

    let ready = app.client.get(app.url("/ready")).send().await.unwrap();
    assert_eq!(ready.status(), StatusCode::OK);

    let metrics = app.client.get(app.url("/metrics")).send().await.unwrap();
    assert_eq!(metrics.status(), StatusCode::OK);
    assert!(metrics.text().await.unwrap().contains("invoicing_"));
}

#[tokio::test]
async fn create_invoice_returns_the_artifact_path() {
    let app = spawn_app(FakeExtractor::replying(valid_document())).await;

    let response = app
        .post_as_tenant("/invoices")
        .body(valid_document().to_string())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], true);
    assert_eq!(
        body["result"],
        format!("suscriptores/7/sri/facturas/ride/{}.pdf", FIRST_ACCESS_KEY)
    );
    assert_eq!(body["invoice"]["access_key"], FIRST_ACCESS_KEY);
    assert_eq!(body["invoice"]["sequence"], "000000345");
}

#[tokio::test]
async fn create_invoice_requires_tenant_headers() {
    let app = spawn_app(FakeExtractor::replying(valid_document())).await;

    let response = app
        .client
        .post(app.url("/invoices"))
        .body(valid_document().to_string())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], false);
    assert!(app.harness.store.snapshot().await.invoices.is_empty());
}

#[tokio::test]
async fn non_numeric_tenant_header_is_a_bad_request() {
    let app = spawn_app(FakeExtractor::replying(valid_document())).await;

    let response = app
        .client
        .post(app.url("/invoices"))
        .header("X-Company-ID", "acme")
        .header("X-User-ID", "3")
        .body(valid_document().to_string())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_document_lists_every_violation() {
    let app = spawn_app(FakeExtractor::replying(valid_document())).await;
    let mut doc = valid_document();
    doc["datos_factura"]["items"][0]["cantidad"] = json!(0);
    doc["datos_factura"]["items"][0]["aplica_iva"] = json!("si");

    let response = app
        .post_as_tenant("/invoices")
        .body(doc.to_string())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], false);
    assert_eq!(body["errors"].as_array().unwrap().len(), 2);
    assert!(app.harness.store.snapshot().await.invoices.is_empty());
}

#[tokio::test]
async fn validate_endpoint_reports_without_persisting() {
    let app = spawn_app(FakeExtractor::replying(valid_document())).await;

    let response = app
        .client
        .post(app.url("/invoices/validate"))
        .body(r#"{"estado_procesamiento":"exitoso"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["valid"], false);
    assert_eq!(body["total_errors"], 1);

    let ok: Value = app
        .client
        .post(app.url("/invoices/validate"))
        .body(valid_document().to_string())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ok["valid"], true);
    assert!(app.harness.store.snapshot().await.invoices.is_empty());
}

#[tokio::test]
async fn chat_message_is_extracted_and_invoiced() {
    let app = spawn_app(FakeExtractor::replying(valid_document())).await;

    let response = app
        .post_as_tenant("/invoices/chat")
        .json(&json!({ "prompt": "  factura a Angel Amores CI 1802498756, 3 firmas a 10  " }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        app.extractor.prompts(),
        vec!["factura a Angel Amores CI 1802498756, 3 firmas a 10".to_string()]
    );
    assert_eq!(app.harness.store.snapshot().await.invoices.len(), 1);
}

#[tokio::test]
async fn voiding_requests_are_refused_before_extraction() {
    let app = spawn_app(FakeExtractor::replying(valid_document())).await;

    let response = app
        .post_as_tenant("/invoices/chat")
        .json(&json!({ "prompt": "Anula la factura 345" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.extractor.prompts().is_empty());
}

#[tokio::test]
async fn empty_prompt_is_rejected() {
    let app = spawn_app(FakeExtractor::replying(valid_document())).await;

    let blank = app
        .post_as_tenant("/invoices/chat")
        .json(&json!({ "prompt": "   " }))
        .send()
        .await
        .unwrap();
    let empty = app
        .post_as_tenant("/invoices/chat")
        .json(&json!({ "prompt": "" }))
        .send()
        .await
        .unwrap();

    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);
    assert_eq!(empty.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(app.extractor.prompts().is_empty());
}

#[tokio::test]
async fn rate_limited_extractor_is_unavailable() {
    let app = spawn_app(FakeExtractor::failing(|| ExtractionError::RateLimited)).await;

    let response = app
        .post_as_tenant("/invoices/chat")
        .json(&json!({ "prompt": "factura 1 firma" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn extractor_api_failure_is_a_bad_gateway() {
    let app = spawn_app(FakeExtractor::failing(|| {
        ExtractionError::Api("upstream returned 500".to_string())
    }))
    .await;

    let response = app
        .post_as_tenant("/invoices/chat")
        .json(&json!({ "prompt": "factura 1 firma" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn telegram_tenant_comes_from_the_channel_reference() {
    let mut doc = valid_document();
    doc["datos_factura"]["id"] = json!("factura50-10007");
    let app = spawn_app(FakeExtractor::replying(doc)).await;

    let response = app
        .client
        .post(app.url("/channels/telegram/invoices"))
        .json(&json!({ "prompt": "factura50-10007 Angel Amores 3 firmas" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let state = app.harness.store.snapshot().await;
    assert_eq!(state.invoices.len(), 1);
    assert_eq!(state.invoices[0].company_id, COMPANY_ID);
    assert_eq!(state.invoices[0].created_by, COMPANY_ID);
}

#[tokio::test]
async fn telegram_without_reference_is_rejected() {
    let app = spawn_app(FakeExtractor::replying(valid_document())).await;

    let response = app
        .client
        .post(app.url("/channels/telegram/invoices"))
        .json(&json!({ "prompt": "Angel Amores 3 firmas" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.harness.store.snapshot().await.invoices.is_empty());
}
