//! Party (client) master data.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Generic "final consumer" document number.
pub const FINAL_CONSUMER_DOCUMENT: &str = "9999999999999";

/// Fiscal identification type, stored by its two-digit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentType {
    /// RUC, 13 digits.
    BusinessTaxId,
    /// Cédula, 10 digits.
    NaturalPersonId,
    Passport,
    FinalConsumer,
}

impl DocumentType {
    pub fn code(&self) -> &'static str {
        match self {
            DocumentType::BusinessTaxId => "04",
            DocumentType::NaturalPersonId => "05",
            DocumentType::Passport => "06",
            DocumentType::FinalConsumer => "07",
        }
    }

    /// Derive the type from the document number's length.
    pub fn from_document(document: &str) -> Self {
        let document = document.trim();
        if document == FINAL_CONSUMER_DOCUMENT {
            return DocumentType::FinalConsumer;
        }
        match document.chars().count() {
            10 => DocumentType::NaturalPersonId,
            13 => DocumentType::BusinessTaxId,
            _ => DocumentType::Passport,
        }
    }
}

/// Resolved party, as the assembler needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartyRef {
    pub id: i64,
    pub name: String,
    pub email: String,
}

/// Company-configured references copied onto every new party.
/// Missing references are 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartyDefaults {
    pub category_id: i64,
    pub salesperson_id: i64,
    pub zone_id: i64,
}

/// Row to insert for a party seen for the first time.
#[derive(Debug, Clone)]
pub struct NewParty {
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
    pub created_by: i64,
}
