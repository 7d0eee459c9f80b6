//! Error taxonomy of the invoicing pipeline.

use crate::models::ShortLine;
use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InvoiceError {
    /// Unparsable JSON, or JSON that does not have the invoice shape.
    #[error("{0}")]
    MalformedInput(String),

    /// Schema or business-rule violations, all of them.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Identifying data missing at persistence time.
    #[error("incomplete data: {0}")]
    IncompleteData(String),

    /// The store rejected a write. `message` is the low-level store text.
    #[error("{context}: {message}")]
    Persistence { context: String, message: String },

    /// More than one line asks for more than the catalog holds.
    #[error("insufficient inventory for {} line(s)", .lines.len())]
    InventoryShortfall { lines: Vec<ShortLine> },

    #[error("internal error: {0}")]
    Internal(String),
}

impl InvoiceError {
    pub fn persistence(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        InvoiceError::Persistence {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// Label used on the errors counter.
    pub fn kind(&self) -> &'static str {
        match self {
            InvoiceError::MalformedInput(_) => "malformed_input",
            InvoiceError::Validation(_) => "validation",
            InvoiceError::IncompleteData(_) => "incomplete_data",
            InvoiceError::Persistence { .. } => "persistence",
            InvoiceError::InventoryShortfall { .. } => "inventory_shortfall",
            InvoiceError::Internal(_) => "internal",
        }
    }
}

impl From<InvoiceError> for AppError {
    fn from(err: InvoiceError) -> Self {
        match err {
            InvoiceError::MalformedInput(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            InvoiceError::Validation(errors) => AppError::InvalidPayload(errors),
            InvoiceError::IncompleteData(msg) => {
                AppError::BadRequest(anyhow::anyhow!("incomplete data: {}", msg))
            }
            InvoiceError::InventoryShortfall { lines } => {
                let items: Vec<String> = lines
                    .iter()
                    .map(|l| {
                        format!("{} (requested {}, available {})", l.description, l.requested, l.available)
                    })
                    .collect();
                AppError::Conflict(anyhow::anyhow!(
                    "insufficient inventory: {}",
                    items.join(", ")
                ))
            }
            InvoiceError::Persistence { context, message } => {
                AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, message))
            }
            InvoiceError::Internal(msg) => AppError::InternalError(anyhow::anyhow!(msg)),
        }
    }
}
