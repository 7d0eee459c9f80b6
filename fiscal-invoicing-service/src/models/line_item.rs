//! Invoice line and stock-ledger models for fiscal-invoicing-service.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Kardex direction for stock leaving with a sale.
pub const KARDEX_OUT: &str = "OUT";

/// Line row to insert.
#[derive(Debug, Clone)]
pub struct NewInvoiceLine {
    pub invoice_id: i64,
    pub company_id: i64,
    pub catalog_item_id: i64,
    pub description: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    /// Catalog cost at the moment the line is written.
    pub cost: Decimal,
    pub discount: Decimal,
    pub tax_rate: Decimal,
}

/// Persisted invoice line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct InvoiceLineRecord {
    pub id: i64,
    pub invoice_id: i64,
    pub company_id: i64,
    pub catalog_item_id: i64,
    pub description: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub cost: Decimal,
    pub discount: Decimal,
    pub tax_rate: Decimal,
}

impl InvoiceLineRecord {
    pub fn from_new(id: i64, line: &NewInvoiceLine) -> Self {
        Self {
            id,
            invoice_id: line.invoice_id,
            company_id: line.company_id,
            catalog_item_id: line.catalog_item_id,
            description: line.description.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            cost: line.cost,
            discount: line.discount,
            tax_rate: line.tax_rate,
        }
    }
}

/// Outbound stock movement.
#[derive(Debug, Clone, PartialEq)]
pub struct KardexMovement {
    pub company_id: i64,
    pub catalog_item_id: i64,
    pub invoice_id: i64,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub balance_after: Decimal,
    pub movement_date: NaiveDate,
}

/// A line whose requested quantity exceeds current stock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShortLine {
    pub catalog_item_id: i64,
    pub description: String,
    pub requested: i32,
    pub available: Decimal,
}
