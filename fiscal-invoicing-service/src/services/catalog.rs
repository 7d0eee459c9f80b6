//! Catalog registration for invoice lines.

use crate::models::{CatalogItemRef, ItemInfo, NewCatalogItem};
use crate::services::error::InvoiceError;
use crate::services::store::StoreTransaction;
use rust_decimal::Decimal;
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogRegistrar;

impl CatalogRegistrar {
    pub fn new() -> Self {
        Self
    }

    /// Catalog row for one line.
    ///
    /// A supplied code that already exists for the company reuses that row.
    /// Otherwise a new row is inserted; without a code, its own id becomes
    /// its code. Lines are never deduplicated by description.
    #[instrument(skip(self, tx, item), fields(company_id = %company_id, description = %item.description))]
    pub async fn register(
        &self,
        tx: &mut dyn StoreTransaction,
        company_id: i64,
        user_id: i64,
        item: &ItemInfo,
    ) -> Result<CatalogItemRef, InvoiceError> {
        let description = item.description.trim();
        if description.is_empty() {
            return Err(InvoiceError::IncompleteData(
                "item description is empty".to_string(),
            ));
        }
        if company_id <= 0 || user_id <= 0 {
            return Err(InvoiceError::IncompleteData(
                "company and user are required".to_string(),
            ));
        }

        if let Some(code) = item.supplied_code() {
            let existing = tx
                .find_catalog_item_by_code(company_id, code)
                .await
                .map_err(|e| InvoiceError::persistence("could not look up product", e))?;
            if let Some(entry) = existing {
                info!(catalog_item_id = entry.id, code = %entry.code, "Existing catalog item reused");
                return Ok(CatalogItemRef {
                    id: entry.id,
                    code: entry.code,
                });
            }
        }

        let tax_rate = if item.tax_applies {
            tx.company_tax_rate(company_id)
                .await
                .map_err(|e| InvoiceError::persistence("could not read tax rate", e))?
        } else {
            Decimal::ZERO
        };
        let category_id = tx
            .default_product_category(company_id)
            .await
            .map_err(|e| InvoiceError::persistence("could not read product category", e))?;

        let new_item = NewCatalogItem {
            company_id,
            code: item.supplied_code().map(str::to_string),
            name: description.to_string(),
            price: item.unit_price,
            tax_rate,
            category_id,
            created_by: user_id,
        };

        tx.insert_catalog_item(&new_item)
            .await
            .map_err(|e| InvoiceError::persistence("could not register product", e))
    }
}
