//! Invoice header model for fiscal-invoicing-service.

use chrono::{NaiveDate, NaiveTime};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Fiscal document type code for a sales invoice.
pub const INVOICE_DOCUMENT_TYPE: &str = "01";

/// Payment-method code stored on chat invoices ("other, with financial system").
pub const DEFAULT_PAYMENT_METHOD: &str = "20";

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    #[serde(rename = "PROCESADA")]
    Processed,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Processed => "PROCESADA",
        }
    }
}

/// Which rendered artifact a tenant hands back to its customers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentPreference {
    Ticket,
    Invoice,
}

impl DocumentPreference {
    /// Anything other than `ticket` (including the legacy `0`) means the
    /// formal invoice rendering.
    pub fn from_setting(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "ticket" => DocumentPreference::Ticket,
            _ => DocumentPreference::Invoice,
        }
    }

    pub fn artifact_path(&self, root: &str, company_id: i64, access_key: &str) -> String {
        let root = root.trim_end_matches('/');
        match self {
            DocumentPreference::Ticket => {
                format!("{}/{}/sri/ticket/{}.pdf", root, company_id, access_key)
            }
            DocumentPreference::Invoice => {
                format!("{}/{}/sri/facturas/ride/{}.pdf", root, company_id, access_key)
            }
        }
    }
}

/// Company fiscal parameters, read (and row-locked) once per invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceSettings {
    pub company_id: i64,
    /// Company RUC.
    pub tax_id: String,
    /// Percentage, e.g. 15 for 15%.
    pub tax_rate: Decimal,
    pub environment: String,
    pub emission_type: String,
    pub establishment: i32,
    pub emission_point: i32,
    /// Value the next invoice takes; incremented after the header is written.
    pub next_sequence: i64,
    pub inventory_enabled: bool,
    pub document_preference: DocumentPreference,
}

impl InvoiceSettings {
    pub fn establishment_code(&self) -> String {
        format!("{:03}", self.establishment)
    }

    pub fn emission_point_code(&self) -> String {
        format!("{:03}", self.emission_point)
    }

    pub fn sequence_code(&self) -> String {
        format!("{:09}", self.next_sequence)
    }

    /// Rate applied to a line given its tax flag.
    pub fn line_tax_rate(&self, tax_applies: bool) -> Decimal {
        if tax_applies {
            self.tax_rate
        } else {
            Decimal::ZERO
        }
    }
}

/// Header row written before any line; totals start at zero.
#[derive(Debug, Clone)]
pub struct NewInvoiceHeader {
    pub company_id: i64,
    pub establishment: String,
    pub emission_point: String,
    pub sequence: String,
    pub issue_date: NaiveDate,
    pub issue_time: NaiveTime,
    pub party_id: i64,
    pub salesperson_id: i64,
    pub credit_days: i32,
    pub payment_method: String,
    pub tax_rate: Decimal,
    pub environment: String,
    pub access_key: String,
    pub status: InvoiceStatus,
    pub created_by: i64,
}

/// Running sums accumulated while lines are written.
///
/// `subtotal` is pre-discount; taxed/untaxed are net of each line's discount,
/// so `subtotal == subtotal_taxed + subtotal_untaxed + discount` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InvoiceTotals {
    pub subtotal: Decimal,
    pub subtotal_taxed: Decimal,
    pub subtotal_untaxed: Decimal,
    pub discount: Decimal,
}

impl InvoiceTotals {
    pub fn add_line(&mut self, gross: Decimal, discount: Decimal, tax_applies: bool) {
        self.subtotal += gross;
        self.discount += discount;
        if tax_applies {
            self.subtotal_taxed += gross - discount;
        } else {
            self.subtotal_untaxed += gross - discount;
        }
    }

    /// Tax on the taxed partition at `rate` percent.
    pub fn tax(&self, rate: Decimal) -> Decimal {
        self.subtotal_taxed * rate / Decimal::ONE_HUNDRED
    }

    /// `subtotal + subtotal_taxed * rate / 100`, rounded to cents.
    pub fn payable(&self, rate: Decimal) -> Decimal {
        (self.subtotal + self.tax(rate))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }
}

/// Persisted invoice header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct InvoiceRecord {
    pub id: i64,
    pub company_id: i64,
    pub establishment: String,
    pub emission_point: String,
    pub sequence: String,
    pub issue_date: NaiveDate,
    pub issue_time: NaiveTime,
    pub party_id: i64,
    pub salesperson_id: i64,
    pub credit_days: i32,
    pub payment_method: String,
    pub subtotal: Decimal,
    pub subtotal_taxed: Decimal,
    pub subtotal_untaxed: Decimal,
    pub discount: Decimal,
    pub tax_rate: Decimal,
    pub environment: String,
    pub access_key: String,
    pub status: String,
    pub created_by: i64,
}

impl InvoiceRecord {
    pub fn from_new(id: i64, header: &NewInvoiceHeader) -> Self {
        Self {
            id,
            company_id: header.company_id,
            establishment: header.establishment.clone(),
            emission_point: header.emission_point.clone(),
            sequence: header.sequence.clone(),
            issue_date: header.issue_date,
            issue_time: header.issue_time,
            party_id: header.party_id,
            salesperson_id: header.salesperson_id,
            credit_days: header.credit_days,
            payment_method: header.payment_method.clone(),
            subtotal: Decimal::ZERO,
            subtotal_taxed: Decimal::ZERO,
            subtotal_untaxed: Decimal::ZERO,
            discount: Decimal::ZERO,
            tax_rate: header.tax_rate,
            environment: header.environment.clone(),
            access_key: header.access_key.clone(),
            status: header.status.as_str().to_string(),
            created_by: header.created_by,
        }
    }

    pub fn totals(&self) -> InvoiceTotals {
        InvoiceTotals {
            subtotal: self.subtotal,
            subtotal_taxed: self.subtotal_taxed,
            subtotal_untaxed: self.subtotal_untaxed,
            discount: self.discount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxed_line_at_fifteen_percent_pays_thirty_four_fifty() {
        let mut totals = InvoiceTotals::default();
        totals.add_line(Decimal::new(30, 0), Decimal::ZERO, true);

        assert_eq!(totals.subtotal_taxed, Decimal::new(30, 0));
        assert_eq!(totals.payable(Decimal::new(15, 0)), Decimal::new(345, 1));
    }

    #[test]
    fn partitions_reconcile_with_subtotal() {
        let mut totals = InvoiceTotals::default();
        totals.add_line(Decimal::new(2000, 2), Decimal::ZERO, true);
        totals.add_line(Decimal::new(1850, 2), Decimal::new(50, 2), false);
        totals.add_line(Decimal::new(333, 2), Decimal::ZERO, false);

        assert_eq!(totals.subtotal, Decimal::new(4183, 2));
        assert_eq!(
            totals.subtotal,
            totals.subtotal_taxed + totals.subtotal_untaxed + totals.discount
        );
    }

    #[test]
    fn payable_rounds_half_cent_away_from_zero() {
        let mut totals = InvoiceTotals::default();
        totals.add_line(Decimal::new(10, 2), Decimal::ZERO, true);
        // 0.10 + 0.015
        assert_eq!(totals.payable(Decimal::new(15, 0)), Decimal::new(12, 2));
    }

    #[test]
    fn untaxed_only_invoice_pays_its_subtotal() {
        let mut totals = InvoiceTotals::default();
        totals.add_line(Decimal::new(18, 0), Decimal::ZERO, false);
        assert_eq!(totals.payable(Decimal::new(15, 0)), Decimal::new(18, 0));
    }

    #[test]
    fn ticket_preference_selects_ticket_path() {
        let pref = DocumentPreference::from_setting("ticket");
        assert_eq!(
            pref.artifact_path("suscriptores/", 7, "KEY"),
            "suscriptores/7/sri/ticket/KEY.pdf"
        );
    }

    #[test]
    fn legacy_zero_preference_selects_formal_invoice() {
        let pref = DocumentPreference::from_setting("0");
        assert_eq!(pref, DocumentPreference::Invoice);
        assert_eq!(
            pref.artifact_path("suscriptores", 7, "KEY"),
            "suscriptores/7/sri/facturas/ride/KEY.pdf"
        );
    }

    #[test]
    fn header_codes_are_zero_padded() {
        let settings = InvoiceSettings {
            company_id: 1,
            tax_id: "1790012345001".into(),
            tax_rate: Decimal::new(15, 0),
            environment: "1".into(),
            emission_type: "1".into(),
            establishment: 1,
            emission_point: 12,
            next_sequence: 345,
            inventory_enabled: false,
            document_preference: DocumentPreference::Invoice,
        };
        assert_eq!(settings.establishment_code(), "001");
        assert_eq!(settings.emission_point_code(), "012");
        assert_eq!(settings.sequence_code(), "000000345");
        assert_eq!(settings.line_tax_rate(false), Decimal::ZERO);
    }
}
