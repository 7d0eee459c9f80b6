//! Persistence seam for invoice assembly.
//!
//! One [`StoreTransaction`] spans one whole invoice. Nothing written through
//! it is visible to other transactions until [`StoreTransaction::commit`];
//! dropping it without committing discards every write.
//!
//! Reference lookups (contact email, tax rate, default category, salesperson,
//! zone) follow the "value or zero" convention: a missing row yields the
//! type's zero or empty value, never an error.

pub mod memory;
pub mod postgres;

pub use memory::{FailurePoint, MemoryInvoiceStore};
pub use postgres::PgInvoiceStore;

use crate::models::{
    CatalogEntry, CatalogItemRef, InvoiceSettings, InvoiceTotals, KardexMovement,
    NewCatalogItem, NewInvoiceHeader, NewInvoiceLine, NewParty, PartyDefaults, PartyRef,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// The store refused the operation (constraint, missing row, injected fault).
    #[error("{0}")]
    Rejected(String),
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Open the unit of work for one invoice.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait StoreTransaction: Send {
    async fn find_party(
        &mut self,
        company_id: i64,
        document_number: &str,
    ) -> Result<Option<PartyRef>, StoreError>;

    /// Insert a party and return its id.
    async fn insert_party(&mut self, party: &NewParty) -> Result<i64, StoreError>;

    async fn company_contact_email(&mut self, company_id: i64) -> Result<String, StoreError>;

    async fn party_defaults(&mut self, company_id: i64) -> Result<PartyDefaults, StoreError>;

    async fn company_tax_rate(&mut self, company_id: i64) -> Result<Decimal, StoreError>;

    async fn default_product_category(&mut self, company_id: i64) -> Result<i64, StoreError>;

    async fn find_catalog_item_by_code(
        &mut self,
        company_id: i64,
        code: &str,
    ) -> Result<Option<CatalogEntry>, StoreError>;

    async fn catalog_entry(
        &mut self,
        company_id: i64,
        catalog_item_id: i64,
    ) -> Result<Option<CatalogEntry>, StoreError>;

    /// Insert a catalog row. Without a code, the row's id becomes its code.
    async fn insert_catalog_item(
        &mut self,
        item: &NewCatalogItem,
    ) -> Result<CatalogItemRef, StoreError>;

    /// Company parameters, locked until the transaction ends.
    async fn invoice_settings(
        &mut self,
        company_id: i64,
    ) -> Result<Option<InvoiceSettings>, StoreError>;

    async fn insert_invoice_header(&mut self, header: &NewInvoiceHeader)
        -> Result<i64, StoreError>;

    async fn increment_invoice_sequence(&mut self, company_id: i64) -> Result<(), StoreError>;

    async fn insert_invoice_line(&mut self, line: &NewInvoiceLine) -> Result<i64, StoreError>;

    /// Atomically subtract `quantity` from stock; returns the new stock.
    async fn decrement_stock(
        &mut self,
        company_id: i64,
        catalog_item_id: i64,
        quantity: i32,
    ) -> Result<Decimal, StoreError>;

    async fn append_kardex_out(&mut self, movement: &KardexMovement) -> Result<(), StoreError>;

    async fn update_invoice_totals(
        &mut self,
        company_id: i64,
        invoice_id: i64,
        totals: &InvoiceTotals,
    ) -> Result<(), StoreError>;

    /// Add `amount` to the party's balance and mark it visited.
    async fn add_to_party_balance(
        &mut self,
        company_id: i64,
        party_id: i64,
        amount: Decimal,
    ) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}
