//! Resubmission of committed invoices to the tax-authority gateway.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Gateway rejected invoice {invoice_id}: HTTP {status}")]
    Rejected { invoice_id: i64, status: u16 },
}

/// Fire-and-forget handoff of a committed invoice.
#[async_trait]
pub trait TaxAuthoritySubmitter: Send + Sync {
    async fn resubmit(&self, invoice_id: i64, document_type: &str) -> Result<(), SubmissionError>;
}

#[derive(Serialize)]
struct ResubmitRequest<'a> {
    invoice_id: i64,
    document_type: &'a str,
}

/// POSTs `{invoice_id, document_type}` to the gateway.
pub struct HttpTaxAuthoritySubmitter {
    url: String,
    client: Client,
}

impl HttpTaxAuthoritySubmitter {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SubmissionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SubmissionError::Network(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl TaxAuthoritySubmitter for HttpTaxAuthoritySubmitter {
    async fn resubmit(&self, invoice_id: i64, document_type: &str) -> Result<(), SubmissionError> {
        let response = self
            .client
            .post(&self.url)
            .json(&ResubmitRequest {
                invoice_id,
                document_type,
            })
            .send()
            .await
            .map_err(|e| SubmissionError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SubmissionError::Rejected {
                invoice_id,
                status: response.status().as_u16(),
            });
        }
        info!(invoice_id, document_type, "Invoice handed to tax authority gateway");
        Ok(())
    }
}

/// No gateway configured: log and move on.
pub struct DisabledSubmitter;

#[async_trait]
impl TaxAuthoritySubmitter for DisabledSubmitter {
    async fn resubmit(&self, invoice_id: i64, document_type: &str) -> Result<(), SubmissionError> {
        info!(
            invoice_id,
            document_type, "Tax authority resubmission disabled, skipping"
        );
        Ok(())
    }
}
