//! Services module for fiscal-invoicing-service.

pub mod access_key;
pub mod assembler;
pub mod catalog;
pub mod error;
pub mod extractor;
pub mod metrics;
pub mod party;
pub mod store;
pub mod tax_authority;
pub mod validator;

pub use assembler::{AssembledInvoice, AssemblerSettings, InvoiceAssembler};
pub use error::InvoiceError;
pub use metrics::{get_metrics, init_metrics};
pub use store::{InvoiceStore, MemoryInvoiceStore, PgInvoiceStore};
