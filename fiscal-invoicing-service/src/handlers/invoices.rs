use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::middleware::TenantContext;
use crate::models::InvoiceRequest;
use crate::services::extractor::ExtractionError;
use crate::services::metrics::VALIDATION_FAILURES_TOTAL;
use crate::services::validator::{self as schema, ValidationReport};
use crate::services::{AssembledInvoice, InvoiceError};
use crate::startup::AppState;
use service_core::error::AppError;

#[derive(Debug, Deserialize, Validate)]
pub struct ChatInvoiceRequest {
    #[validate(length(min = 1, message = "prompt cannot be empty"))]
    pub prompt: String,
}

/// Caller contract: `status` plus the rendered artifact path in `result`.
/// Failures are reported through [`AppError`] with `status: false`.
#[derive(Debug, Serialize)]
pub struct ProcessResult {
    pub status: bool,
    pub result: String,
    pub invoice: AssembledInvoice,
}

impl From<AssembledInvoice> for ProcessResult {
    fn from(invoice: AssembledInvoice) -> Self {
        Self {
            status: true,
            result: invoice.artifact_path.clone(),
            invoice,
        }
    }
}

/// Invoice an already-extracted document for the tenant in the headers.
#[tracing::instrument(skip(state, body), fields(company_id, user_id))]
pub async fn create_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    body: String,
) -> Result<Json<ProcessResult>, AppError> {
    let request = validated_request(&body)?;
    process(&state, &request, tenant).await
}

/// Run the schema validator only.
#[tracing::instrument(skip(body))]
pub async fn validate_invoice(body: String) -> Json<ValidationReport> {
    Json(schema::validate(&body))
}

/// Extract an invoice from a chat message and invoice it for the tenant in
/// the headers.
#[tracing::instrument(skip(state, payload), fields(company_id, user_id))]
pub async fn chat_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Json(payload): Json<ChatInvoiceRequest>,
) -> Result<Json<ProcessResult>, AppError> {
    let json = extract(&state, &payload).await?;
    let request = validated_request(&json)?;
    process(&state, &request, tenant).await
}

/// Telegram channel: the tenant comes from the invoicing reference the
/// extractor found in the message.
#[tracing::instrument(skip(state, payload))]
pub async fn telegram_invoice(
    State(state): State<AppState>,
    Json(payload): Json<ChatInvoiceRequest>,
) -> Result<Json<ProcessResult>, AppError> {
    let json = extract(&state, &payload).await?;
    let request = validated_request(&json)?;

    let tenant = request
        .invoice
        .id
        .as_deref()
        .and_then(TenantContext::from_channel_reference)
        .ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "datos_factura.id must carry the invoicing reference (factura50-XXXXX)"
            ))
        })?;

    process(&state, &request, tenant).await
}

async fn extract(state: &AppState, payload: &ChatInvoiceRequest) -> Result<String, AppError> {
    payload.validate()?;
    let prompt = payload.prompt.trim();
    if prompt.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!("prompt cannot be empty")));
    }
    if prompt
        .get(..5)
        .is_some_and(|head| head.eq_ignore_ascii_case("anula"))
    {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "invoice voiding is not available through chat"
        )));
    }

    state.extractor.extract(prompt).await.map_err(|e| {
        tracing::warn!(error = %e, "Invoice extraction failed");
        match e {
            ExtractionError::NotConfigured(_) | ExtractionError::RateLimited => {
                AppError::ServiceUnavailable
            }
            ExtractionError::InvalidRequest(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            other => AppError::BadGateway(other.to_string()),
        }
    })
}

fn validated_request(json: &str) -> Result<InvoiceRequest, AppError> {
    let report = schema::validate(json);
    if !report.valid {
        VALIDATION_FAILURES_TOTAL.inc();
        tracing::info!(total_errors = report.total_errors, "Extracted document rejected");
        return Err(InvoiceError::Validation(report.errors).into());
    }
    Ok(InvoiceRequest::parse(json)?)
}

async fn process(
    state: &AppState,
    request: &InvoiceRequest,
    tenant: TenantContext,
) -> Result<Json<ProcessResult>, AppError> {
    let span = tracing::Span::current();
    span.record("company_id", tenant.company_id);
    span.record("user_id", tenant.user_id);

    let invoice = state
        .assembler
        .process_invoice(request, tenant.company_id, tenant.user_id)
        .await
        .map_err(|e| {
            tracing::error!(
                company_id = tenant.company_id,
                error = %e,
                "Invoice processing failed"
            );
            AppError::from(e)
        })?;

    Ok(Json(ProcessResult::from(invoice)))
}
