//! Catalog (product/service) master data.

use rust_decimal::Decimal;

/// Image stored on catalog rows created from chat invoices.
pub const PLACEHOLDER_IMAGE: &str = "images/SinFoto.png";

pub const DEFAULT_UNIT_OF_MEASURE: &str = "UNIDAD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItemRef {
    pub id: i64,
    pub code: String,
}

/// Existing catalog row found by code.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub id: i64,
    pub code: String,
    pub stock: Decimal,
    pub cost: Decimal,
}

/// Row to insert for an invoice line without an existing catalog entry.
/// Inventory, cost and the secondary price tiers start at zero.
#[derive(Debug, Clone)]
pub struct NewCatalogItem {
    pub company_id: i64,
    /// `None` means the store assigns the row's own id as its code.
    pub code: Option<String>,
    pub name: String,
    pub price: Decimal,
    pub tax_rate: Decimal,
    pub category_id: i64,
    pub created_by: i64,
}
