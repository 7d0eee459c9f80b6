//! In-process store for tests and local runs.
//!
//! A transaction holds the store lock for its whole life and works on a copy
//! of the state; commit publishes the copy, rollback or drop discards it.
//! Transactions are therefore serialized, which stands in for the row locks
//! the PostgreSQL store takes on the parameters and catalog rows.

use super::{InvoiceStore, StoreError, StoreTransaction};
use crate::models::{
    CatalogEntry, CatalogItemRef, DocumentType, InvoiceLineRecord, InvoiceRecord,
    InvoiceSettings, InvoiceTotals, KardexMovement, NewCatalogItem, NewInvoiceHeader,
    NewInvoiceLine, NewParty, PartyDefaults, PartyRef, DEFAULT_UNIT_OF_MEASURE,
    PLACEHOLDER_IMAGE,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Write point at which the next transaction fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    PartyInsert,
    /// The n-th catalog insert of the transaction, 1-based.
    CatalogInsert(usize),
    HeaderInsert,
    SequenceIncrement,
    /// The n-th line insert of the transaction, 1-based.
    LineInsert(usize),
    TotalsUpdate,
    BalanceUpdate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompanyRecord {
    pub settings: InvoiceSettings,
    pub contact_email: String,
    pub party_defaults: PartyDefaults,
    pub product_category_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartyRecord {
    pub id: i64,
    pub company_id: i64,
    pub document_type: DocumentType,
    pub document_number: String,
    pub name: String,
    pub trade_name: String,
    pub email: String,
    pub address: String,
    pub city: String,
    pub defaults: PartyDefaults,
    pub visit_frequency_days: i32,
    pub route_enabled: bool,
    pub start_date: NaiveDate,
    pub balance: Decimal,
    pub visited: bool,
    pub created_by: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecord {
    pub id: i64,
    pub company_id: i64,
    pub code: String,
    pub name: String,
    pub image: String,
    pub unit_of_measure: String,
    pub category_id: i64,
    pub cost: Decimal,
    pub stock: Decimal,
    pub price: Decimal,
    pub tax_rate: Decimal,
    pub created_by: i64,
}

/// Whole store contents. Comparable, so a test can assert that a failed
/// invoice left the store exactly as it found it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryState {
    pub companies: BTreeMap<i64, CompanyRecord>,
    pub parties: Vec<PartyRecord>,
    pub catalog: Vec<CatalogRecord>,
    pub invoices: Vec<InvoiceRecord>,
    pub lines: Vec<InvoiceLineRecord>,
    pub kardex: Vec<KardexMovement>,
    last_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn company(&self, company_id: i64) -> Option<&CompanyRecord> {
        self.companies.get(&company_id)
    }
}

#[derive(Default)]
struct Inner {
    state: MemoryState,
    failure: Option<FailurePoint>,
}

#[derive(Clone, Default)]
pub struct MemoryInvoiceStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a company with its parameters and reference defaults.
    pub async fn seed_company(
        &self,
        settings: InvoiceSettings,
        contact_email: &str,
        party_defaults: PartyDefaults,
        product_category_id: i64,
    ) {
        let mut inner = self.inner.lock().await;
        inner.state.companies.insert(
            settings.company_id,
            CompanyRecord {
                settings,
                contact_email: contact_email.to_string(),
                party_defaults,
                product_category_id,
            },
        );
    }

    /// Add a stocked catalog row and return its id.
    pub async fn seed_catalog_item(
        &self,
        company_id: i64,
        code: &str,
        name: &str,
        stock: Decimal,
        cost: Decimal,
    ) -> i64 {
        let mut inner = self.inner.lock().await;
        let id = inner.state.next_id();
        inner.state.catalog.push(CatalogRecord {
            id,
            company_id,
            code: code.to_string(),
            name: name.to_string(),
            image: PLACEHOLDER_IMAGE.to_string(),
            unit_of_measure: DEFAULT_UNIT_OF_MEASURE.to_string(),
            category_id: 0,
            cost,
            stock,
            price: Decimal::ZERO,
            tax_rate: Decimal::ZERO,
            created_by: 0,
        });
        id
    }

    /// Make the next transaction fail at `point`. One-shot.
    pub async fn fail_at(&self, point: FailurePoint) {
        self.inner.lock().await.failure = Some(point);
    }

    pub async fn snapshot(&self) -> MemoryState {
        self.inner.lock().await.state.clone()
    }
}

#[async_trait]
impl InvoiceStore for MemoryInvoiceStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let mut guard = self.inner.clone().lock_owned().await;
        let failure = guard.failure.take();
        let work = guard.state.clone();
        Ok(Box::new(MemoryTransaction {
            guard: Some(guard),
            work,
            failure,
            catalog_inserts: 0,
            line_inserts: 0,
        }))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub struct MemoryTransaction {
    guard: Option<OwnedMutexGuard<Inner>>,
    work: MemoryState,
    failure: Option<FailurePoint>,
    catalog_inserts: usize,
    line_inserts: usize,
}

impl MemoryTransaction {
    fn check(&self, point: FailurePoint) -> Result<(), StoreError> {
        if self.guard.is_none() {
            return Err(StoreError::Rejected("transaction already finished".to_string()));
        }
        if self.failure == Some(point) {
            return Err(StoreError::Rejected(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.guard.is_none() {
            return Err(StoreError::Rejected("transaction already finished".to_string()));
        }
        Ok(())
    }

    fn catalog_mut(
        &mut self,
        company_id: i64,
        catalog_item_id: i64,
    ) -> Result<&mut CatalogRecord, StoreError> {
        self.work
            .catalog
            .iter_mut()
            .find(|c| c.company_id == company_id && c.id == catalog_item_id)
            .ok_or_else(|| {
                StoreError::Rejected(format!("catalog item {} not found", catalog_item_id))
            })
    }
}

fn entry(record: &CatalogRecord) -> CatalogEntry {
    CatalogEntry {
        id: record.id,
        code: record.code.clone(),
        stock: record.stock,
        cost: record.cost,
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn find_party(
        &mut self,
        company_id: i64,
        document_number: &str,
    ) -> Result<Option<PartyRef>, StoreError> {
        self.ensure_open()?;
        Ok(self
            .work
            .parties
            .iter()
            .find(|p| p.company_id == company_id && p.document_number == document_number)
            .map(|p| PartyRef {
                id: p.id,
                name: p.name.clone(),
                email: p.email.clone(),
            }))
    }

    async fn insert_party(&mut self, party: &NewParty) -> Result<i64, StoreError> {
        self.check(FailurePoint::PartyInsert)?;
        let duplicate = self.work.parties.iter().any(|p| {
            p.company_id == party.company_id && p.document_number == party.document_number
        });
        if duplicate {
            return Err(StoreError::Rejected(format!(
                "duplicate key value violates unique constraint \"uq_parties_company_document\" ({})",
                party.document_number
            )));
        }

        let id = self.work.next_id();
        self.work.parties.push(PartyRecord {
            id,
            company_id: party.company_id,
            document_type: party.document_type,
            document_number: party.document_number.clone(),
            name: party.name.clone(),
            trade_name: party.trade_name.clone(),
            email: party.email.clone(),
            address: party.address.clone(),
            city: party.city.clone(),
            defaults: party.defaults,
            visit_frequency_days: party.visit_frequency_days,
            route_enabled: party.route_enabled,
            start_date: party.start_date,
            balance: Decimal::ZERO,
            visited: false,
            created_by: party.created_by,
        });
        debug!(party_id = id, "Party staged");
        Ok(id)
    }

    async fn company_contact_email(&mut self, company_id: i64) -> Result<String, StoreError> {
        self.ensure_open()?;
        Ok(self
            .work
            .company(company_id)
            .map(|c| c.contact_email.clone())
            .unwrap_or_default())
    }

    async fn party_defaults(&mut self, company_id: i64) -> Result<PartyDefaults, StoreError> {
        self.ensure_open()?;
        Ok(self
            .work
            .company(company_id)
            .map(|c| c.party_defaults)
            .unwrap_or_default())
    }

    async fn company_tax_rate(&mut self, company_id: i64) -> Result<Decimal, StoreError> {
        self.ensure_open()?;
        Ok(self
            .work
            .company(company_id)
            .map(|c| c.settings.tax_rate)
            .unwrap_or_default())
    }

    async fn default_product_category(&mut self, company_id: i64) -> Result<i64, StoreError> {
        self.ensure_open()?;
        Ok(self
            .work
            .company(company_id)
            .map(|c| c.product_category_id)
            .unwrap_or_default())
    }

    async fn find_catalog_item_by_code(
        &mut self,
        company_id: i64,
        code: &str,
    ) -> Result<Option<CatalogEntry>, StoreError> {
        self.ensure_open()?;
        Ok(self
            .work
            .catalog
            .iter()
            .find(|c| c.company_id == company_id && c.code == code)
            .map(entry))
    }

    async fn catalog_entry(
        &mut self,
        company_id: i64,
        catalog_item_id: i64,
    ) -> Result<Option<CatalogEntry>, StoreError> {
        self.ensure_open()?;
        Ok(self
            .work
            .catalog
            .iter()
            .find(|c| c.company_id == company_id && c.id == catalog_item_id)
            .map(entry))
    }

    async fn insert_catalog_item(
        &mut self,
        item: &NewCatalogItem,
    ) -> Result<CatalogItemRef, StoreError> {
        self.catalog_inserts += 1;
        self.check(FailurePoint::CatalogInsert(self.catalog_inserts))?;

        let id = self.work.next_id();
        let code = item.code.clone().unwrap_or_else(|| id.to_string());
        self.work.catalog.push(CatalogRecord {
            id,
            company_id: item.company_id,
            code: code.clone(),
            name: item.name.clone(),
            image: PLACEHOLDER_IMAGE.to_string(),
            unit_of_measure: DEFAULT_UNIT_OF_MEASURE.to_string(),
            category_id: item.category_id,
            cost: Decimal::ZERO,
            stock: Decimal::ZERO,
            price: item.price,
            tax_rate: item.tax_rate,
            created_by: item.created_by,
        });
        Ok(CatalogItemRef { id, code })
    }

    async fn invoice_settings(
        &mut self,
        company_id: i64,
    ) -> Result<Option<InvoiceSettings>, StoreError> {
        self.ensure_open()?;
        Ok(self.work.company(company_id).map(|c| c.settings.clone()))
    }

    async fn insert_invoice_header(
        &mut self,
        header: &NewInvoiceHeader,
    ) -> Result<i64, StoreError> {
        self.check(FailurePoint::HeaderInsert)?;
        let duplicate = self.work.invoices.iter().any(|i| {
            i.company_id == header.company_id
                && i.establishment == header.establishment
                && i.emission_point == header.emission_point
                && i.sequence == header.sequence
        });
        if duplicate {
            return Err(StoreError::Rejected(format!(
                "duplicate key value violates unique constraint \"uq_invoices_company_number\" ({}-{}-{})",
                header.establishment, header.emission_point, header.sequence
            )));
        }
        if !self.work.parties.iter().any(|p| p.id == header.party_id) {
            return Err(StoreError::Rejected(format!(
                "party {} does not exist",
                header.party_id
            )));
        }

        let id = self.work.next_id();
        self.work.invoices.push(InvoiceRecord::from_new(id, header));
        Ok(id)
    }

    async fn increment_invoice_sequence(&mut self, company_id: i64) -> Result<(), StoreError> {
        self.check(FailurePoint::SequenceIncrement)?;
        let company = self.work.companies.get_mut(&company_id).ok_or_else(|| {
            StoreError::Rejected(format!("no parameters row for company {}", company_id))
        })?;
        company.settings.next_sequence += 1;
        Ok(())
    }

    async fn insert_invoice_line(&mut self, line: &NewInvoiceLine) -> Result<i64, StoreError> {
        self.line_inserts += 1;
        self.check(FailurePoint::LineInsert(self.line_inserts))?;
        if line.quantity <= 0 || line.unit_price < Decimal::ZERO {
            return Err(StoreError::Rejected(
                "new row for relation \"invoice_lines\" violates check constraint".to_string(),
            ));
        }
        if !self.work.invoices.iter().any(|i| i.id == line.invoice_id) {
            return Err(StoreError::Rejected(format!(
                "invoice {} does not exist",
                line.invoice_id
            )));
        }

        let id = self.work.next_id();
        self.work.lines.push(InvoiceLineRecord::from_new(id, line));
        Ok(id)
    }

    async fn decrement_stock(
        &mut self,
        company_id: i64,
        catalog_item_id: i64,
        quantity: i32,
    ) -> Result<Decimal, StoreError> {
        self.ensure_open()?;
        let item = self.catalog_mut(company_id, catalog_item_id)?;
        item.stock -= Decimal::from(quantity);
        Ok(item.stock)
    }

    async fn append_kardex_out(&mut self, movement: &KardexMovement) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.work.kardex.push(movement.clone());
        Ok(())
    }

    async fn update_invoice_totals(
        &mut self,
        company_id: i64,
        invoice_id: i64,
        totals: &InvoiceTotals,
    ) -> Result<(), StoreError> {
        self.check(FailurePoint::TotalsUpdate)?;
        let invoice = self
            .work
            .invoices
            .iter_mut()
            .find(|i| i.company_id == company_id && i.id == invoice_id)
            .ok_or_else(|| StoreError::Rejected(format!("invoice {} not found", invoice_id)))?;
        invoice.subtotal = totals.subtotal;
        invoice.subtotal_taxed = totals.subtotal_taxed;
        invoice.subtotal_untaxed = totals.subtotal_untaxed;
        invoice.discount = totals.discount;
        Ok(())
    }

    async fn add_to_party_balance(
        &mut self,
        company_id: i64,
        party_id: i64,
        amount: Decimal,
    ) -> Result<(), StoreError> {
        self.check(FailurePoint::BalanceUpdate)?;
        let party = self
            .work
            .parties
            .iter_mut()
            .find(|p| p.company_id == company_id && p.id == party_id)
            .ok_or_else(|| StoreError::Rejected(format!("party {} not found", party_id)))?;
        party.balance += amount;
        party.visited = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let mut guard = self
            .guard
            .take()
            .ok_or_else(|| StoreError::Rejected("transaction already finished".to_string()))?;
        guard.state = std::mem::take(&mut self.work);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.guard = None;
        self.work = MemoryState::default();
        Ok(())
    }
}
