//! Domain models for fiscal-invoicing-service.

mod catalog;
mod invoice;
mod line_item;
mod party;
mod request;

pub use catalog::{
    CatalogEntry, CatalogItemRef, NewCatalogItem, DEFAULT_UNIT_OF_MEASURE, PLACEHOLDER_IMAGE,
};
pub use invoice::{
    DocumentPreference, InvoiceRecord, InvoiceSettings, InvoiceStatus, InvoiceTotals,
    NewInvoiceHeader, DEFAULT_PAYMENT_METHOD, INVOICE_DOCUMENT_TYPE,
};
pub use line_item::{InvoiceLineRecord, KardexMovement, NewInvoiceLine, ShortLine, KARDEX_OUT};
pub use party::{DocumentType, NewParty, PartyDefaults, PartyRef, FINAL_CONSUMER_DOCUMENT};
pub use request::{
    ClientInfo, Identification, InvoicePayload, InvoiceRequest, ItemInfo, ProcessingState,
};
pub(crate) use request::numeric;
