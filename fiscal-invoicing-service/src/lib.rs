//! Fiscal Invoicing Service - turns extracted chat purchase requests into
//! persisted, tax-compliant invoices.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
