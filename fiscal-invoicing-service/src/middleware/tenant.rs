//! Tenant context for invoicing requests.
//!
//! The company and acting user are never taken from ambient state: HTTP
//! callers send them as `X-Company-ID` / `X-User-ID`, and chat channels
//! derive them from the invoicing reference the extractor returns.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

pub const COMPANY_HEADER: &str = "X-Company-ID";
pub const USER_HEADER: &str = "X-User-ID";

/// Company (tenant) and acting user for one invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantContext {
    pub company_id: i64,
    pub user_id: i64,
}

impl TenantContext {
    pub fn new(company_id: i64, user_id: i64) -> Self {
        Self {
            company_id,
            user_id,
        }
    }

    /// Tenant encoded in a channel reference such as `factura50-10001`:
    /// the last four characters are the company id, which also acts as the
    /// user.
    pub fn from_channel_reference(reference: &str) -> Option<Self> {
        let reference = reference.trim();
        let start = reference.char_indices().rev().nth(3).map(|(i, _)| i)?;
        let company_id: i64 = reference[start..].parse().ok()?;
        (company_id > 0).then(|| Self::new(company_id, company_id))
    }
}

fn header_id(parts: &Parts, name: &str) -> Result<i64, AppError> {
    let raw = parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing {} header", name)))?;

    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Invalid {} header: {:?}", name, raw)))
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let company_id = header_id(parts, COMPANY_HEADER)?;
        let user_id = header_id(parts, USER_HEADER)?;

        let span = tracing::Span::current();
        span.record("company_id", company_id);
        span.record("user_id", user_id);

        Ok(TenantContext::new(company_id, user_id))
    }
}
