//! Invoice assembly: one transaction from party resolution to commit.
//!
//! Stages run strictly in order:
//!
//! `Begin -> PartyResolved -> ItemsRegistered -> HeaderWritten -> LinesWritten
//! -> TotalsReconciled -> Committed`
//!
//! Any failure before `Committed` rolls the transaction back, so a failed
//! invoice leaves no party, catalog row, header, line, stock movement or
//! sequence increment behind. Resubmission to the tax authority happens only
//! after commit, on its own task, and cannot undo the invoice.

use crate::models::{
    CatalogItemRef, InvoiceRequest, InvoiceSettings, InvoiceStatus, InvoiceTotals, KardexMovement,
    NewInvoiceHeader, NewInvoiceLine, ShortLine, DEFAULT_PAYMENT_METHOD, INVOICE_DOCUMENT_TYPE,
};
use crate::services::access_key::{build_access_key, AccessKeyParts};
use crate::services::catalog::CatalogRegistrar;
use crate::services::error::InvoiceError;
use crate::services::metrics::{ERRORS_TOTAL, INVOICES_TOTAL, INVOICE_AMOUNT_TOTAL};
use crate::services::party::PartyResolver;
use crate::services::store::{InvoiceStore, StoreTransaction};
use crate::services::tax_authority::TaxAuthoritySubmitter;
use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyStage {
    Begin,
    PartyResolved,
    ItemsRegistered,
    HeaderWritten,
    LinesWritten,
    TotalsReconciled,
    Committed,
}

impl fmt::Display for AssemblyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssemblyStage::Begin => "begin",
            AssemblyStage::PartyResolved => "party_resolved",
            AssemblyStage::ItemsRegistered => "items_registered",
            AssemblyStage::HeaderWritten => "header_written",
            AssemblyStage::LinesWritten => "lines_written",
            AssemblyStage::TotalsReconciled => "totals_reconciled",
            AssemblyStage::Committed => "committed",
        };
        f.write_str(name)
    }
}

/// A committed invoice.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledInvoice {
    pub invoice_id: i64,
    pub party_id: i64,
    pub access_key: String,
    pub sequence: String,
    pub totals: InvoiceTotals,
    pub payable: Decimal,
    /// Where the rendered ticket or invoice for this key is published.
    pub artifact_path: String,
}

/// Tenant-independent knobs of the assembler.
#[derive(Debug, Clone)]
pub struct AssemblerSettings {
    pub timezone: Tz,
    pub numeric_code: String,
    pub artifact_root: String,
}

pub struct InvoiceAssembler {
    store: Arc<dyn InvoiceStore>,
    submitter: Arc<dyn TaxAuthoritySubmitter>,
    parties: PartyResolver,
    catalog: CatalogRegistrar,
    settings: AssemblerSettings,
    clock: fn() -> DateTime<Utc>,
}

struct BusinessMoment {
    date: NaiveDate,
    time: NaiveTime,
}

impl InvoiceAssembler {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        submitter: Arc<dyn TaxAuthoritySubmitter>,
        parties: PartyResolver,
        settings: AssemblerSettings,
    ) -> Self {
        Self {
            store,
            submitter,
            parties,
            catalog: CatalogRegistrar::new(),
            settings,
            clock: Utc::now,
        }
    }

    /// Replace the wall clock; used to pin the business date.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn InvoiceStore> {
        &self.store
    }

    /// Persist `request` as one invoice for `company_id`, acting as `user_id`.
    #[instrument(skip(self, request), fields(company_id = %company_id, user_id = %user_id, items = request.invoice.items.len()))]
    pub async fn process_invoice(
        &self,
        request: &InvoiceRequest,
        company_id: i64,
        user_id: i64,
    ) -> Result<AssembledInvoice, InvoiceError> {
        if request.invoice.items.is_empty() {
            return Err(InvoiceError::Validation(vec![
                "items must contain at least one item".to_string(),
            ]));
        }

        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| InvoiceError::persistence("could not open transaction", e))?;

        let mut stage = AssemblyStage::Begin;
        let outcome = self
            .assemble(tx.as_mut(), request, company_id, user_id, &mut stage)
            .await;

        let invoice = match outcome {
            Ok(invoice) => invoice,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                self.record_abort(stage, &err);
                return Err(err);
            }
        };

        if let Err(e) = tx.commit().await {
            let err = InvoiceError::persistence("could not commit invoice", e);
            self.record_abort(stage, &err);
            return Err(err);
        }

        info!(
            stage = %AssemblyStage::Committed,
            invoice_id = invoice.invoice_id,
            access_key = %invoice.access_key,
            payable = %invoice.payable,
            "Invoice committed"
        );
        INVOICES_TOTAL.with_label_values(&["committed"]).inc();
        INVOICE_AMOUNT_TOTAL.inc_by(invoice.payable.to_f64().unwrap_or_default());

        self.spawn_resubmission(invoice.invoice_id);

        Ok(invoice)
    }

    async fn assemble(
        &self,
        tx: &mut dyn StoreTransaction,
        request: &InvoiceRequest,
        company_id: i64,
        user_id: i64,
        stage: &mut AssemblyStage,
    ) -> Result<AssembledInvoice, InvoiceError> {
        let now = self.business_now();
        let items = &request.invoice.items;

        let party = self
            .parties
            .resolve_or_create(tx, company_id, user_id, &request.invoice.client, now.date)
            .await?;
        *stage = AssemblyStage::PartyResolved;

        // Fail fast: the first registration error aborts the invoice.
        let mut catalog_refs = Vec::with_capacity(items.len());
        for item in items {
            let catalog_ref = self.catalog.register(tx, company_id, user_id, item).await?;
            catalog_refs.push(catalog_ref);
        }
        *stage = AssemblyStage::ItemsRegistered;

        let settings = tx
            .invoice_settings(company_id)
            .await
            .map_err(|e| InvoiceError::persistence("could not read invoicing parameters", e))?
            .ok_or_else(|| {
                InvoiceError::IncompleteData(format!(
                    "company {} has no invoicing parameters",
                    company_id
                ))
            })?;

        if settings.inventory_enabled {
            self.check_stock(tx, company_id, request, &catalog_refs).await?;
        }

        let access_key = build_access_key(&AccessKeyParts {
            issue_date: now.date,
            document_type: INVOICE_DOCUMENT_TYPE,
            tax_id: &settings.tax_id,
            environment: &settings.environment,
            establishment: i64::from(settings.establishment),
            emission_point: i64::from(settings.emission_point),
            sequence: settings.next_sequence,
            numeric_code: &self.settings.numeric_code,
            emission_type: &settings.emission_type,
        })
        .map_err(|e| InvoiceError::Internal(format!("could not build access key: {}", e)))?;

        let salesperson_id = tx
            .party_defaults(company_id)
            .await
            .map_err(|e| InvoiceError::persistence("could not read salesperson", e))?
            .salesperson_id;

        let header = NewInvoiceHeader {
            company_id,
            establishment: settings.establishment_code(),
            emission_point: settings.emission_point_code(),
            sequence: settings.sequence_code(),
            issue_date: now.date,
            issue_time: now.time,
            party_id: party.id,
            salesperson_id,
            credit_days: 0,
            payment_method: DEFAULT_PAYMENT_METHOD.to_string(),
            tax_rate: settings.tax_rate,
            environment: settings.environment.clone(),
            access_key: access_key.clone(),
            status: InvoiceStatus::Processed,
            created_by: user_id,
        };
        let invoice_id = tx
            .insert_invoice_header(&header)
            .await
            .map_err(|e| InvoiceError::persistence("could not create invoice", e))?;
        *stage = AssemblyStage::HeaderWritten;

        tx.increment_invoice_sequence(company_id)
            .await
            .map_err(|e| InvoiceError::persistence("could not advance invoice sequence", e))?;

        let totals = self
            .write_lines(tx, &settings, invoice_id, request, &catalog_refs, now.date)
            .await?;
        *stage = AssemblyStage::LinesWritten;

        tx.update_invoice_totals(company_id, invoice_id, &totals)
            .await
            .map_err(|e| InvoiceError::persistence("could not update invoice totals", e))?;
        *stage = AssemblyStage::TotalsReconciled;

        let payable = totals.payable(settings.tax_rate);
        tx.add_to_party_balance(company_id, party.id, payable)
            .await
            .map_err(|e| InvoiceError::persistence("could not update client balance", e))?;

        Ok(AssembledInvoice {
            invoice_id,
            party_id: party.id,
            artifact_path: settings.document_preference.artifact_path(
                &self.settings.artifact_root,
                company_id,
                &access_key,
            ),
            access_key,
            sequence: header.sequence,
            totals,
            payable,
        })
    }

    /// Abort when more than one line asks for more than is in stock.
    async fn check_stock(
        &self,
        tx: &mut dyn StoreTransaction,
        company_id: i64,
        request: &InvoiceRequest,
        catalog_refs: &[CatalogItemRef],
    ) -> Result<(), InvoiceError> {
        let mut short = Vec::new();
        for (item, catalog_ref) in request.invoice.items.iter().zip(catalog_refs) {
            let available = tx
                .catalog_entry(company_id, catalog_ref.id)
                .await
                .map_err(|e| InvoiceError::persistence("could not read stock", e))?
                .map(|entry| entry.stock)
                .unwrap_or_default();
            if Decimal::from(item.quantity) > available {
                short.push(ShortLine {
                    catalog_item_id: catalog_ref.id,
                    description: item.description.clone(),
                    requested: item.quantity,
                    available,
                });
            }
        }

        match short.len() {
            0 => Ok(()),
            1 => {
                warn!(
                    catalog_item_id = short[0].catalog_item_id,
                    requested = short[0].requested,
                    available = %short[0].available,
                    "Single line short on stock, invoicing anyway"
                );
                Ok(())
            }
            _ => Err(InvoiceError::InventoryShortfall { lines: short }),
        }
    }

    async fn write_lines(
        &self,
        tx: &mut dyn StoreTransaction,
        settings: &InvoiceSettings,
        invoice_id: i64,
        request: &InvoiceRequest,
        catalog_refs: &[CatalogItemRef],
        today: NaiveDate,
    ) -> Result<InvoiceTotals, InvoiceError> {
        let company_id = settings.company_id;
        let mut totals = InvoiceTotals::default();

        for (index, (item, catalog_ref)) in request.invoice.items.iter().zip(catalog_refs).enumerate() {
            let cost = tx
                .catalog_entry(company_id, catalog_ref.id)
                .await
                .map_err(|e| InvoiceError::persistence("could not read product cost", e))?
                .map(|entry| entry.cost)
                .unwrap_or_default();
            let discount = Decimal::ZERO;

            let line = NewInvoiceLine {
                invoice_id,
                company_id,
                catalog_item_id: catalog_ref.id,
                description: item.description.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                cost,
                discount,
                tax_rate: settings.line_tax_rate(item.tax_applies),
            };
            tx.insert_invoice_line(&line).await.map_err(|e| {
                InvoiceError::persistence(format!("could not write line #{}", index + 1), e)
            })?;

            if settings.inventory_enabled {
                let balance_after = tx
                    .decrement_stock(company_id, catalog_ref.id, item.quantity)
                    .await
                    .map_err(|e| InvoiceError::persistence("could not update stock", e))?;
                tx.append_kardex_out(&KardexMovement {
                    company_id,
                    catalog_item_id: catalog_ref.id,
                    invoice_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    balance_after,
                    movement_date: today,
                })
                .await
                .map_err(|e| InvoiceError::persistence("could not record stock movement", e))?;
            }

            totals.add_line(item.gross(), discount, item.tax_applies);
        }

        Ok(totals)
    }

    fn business_now(&self) -> BusinessMoment {
        let now = (self.clock)().with_timezone(&self.settings.timezone);
        let time = now.time();
        BusinessMoment {
            date: now.date_naive(),
            time: time.with_nanosecond(0).unwrap_or(time),
        }
    }

    fn record_abort(&self, stage: AssemblyStage, err: &InvoiceError) {
        let outcome = match err {
            InvoiceError::InventoryShortfall { .. } => "shortfall",
            _ => "aborted",
        };
        INVOICES_TOTAL.with_label_values(&[outcome]).inc();
        ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();
        error!(stage = %stage, error = %err, "Invoice aborted and rolled back");
    }

    fn spawn_resubmission(&self, invoice_id: i64) {
        let submitter = Arc::clone(&self.submitter);
        tokio::spawn(async move {
            if let Err(e) = submitter.resubmit(invoice_id, INVOICE_DOCUMENT_TYPE).await {
                warn!(invoice_id, error = %e, "Tax authority resubmission failed");
            }
        });
    }
}
