//! Request extractors for fiscal-invoicing-service.

pub mod tenant;

pub use tenant::TenantContext;
