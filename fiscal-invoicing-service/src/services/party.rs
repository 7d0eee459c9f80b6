//! Client resolution: find a party by its natural key or create it.

use crate::models::{ClientInfo, DocumentType, NewParty, PartyRef};
use crate::services::error::InvoiceError;
use crate::services::store::StoreTransaction;
use chrono::NaiveDate;
use tracing::{info, instrument};

/// Visit cadence stored on new parties, in days.
pub const DEFAULT_VISIT_FREQUENCY_DAYS: i32 = 30;

#[derive(Debug, Clone)]
pub struct PartyResolver {
    fallback_address: String,
    city: String,
}

impl PartyResolver {
    pub fn new(fallback_address: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            fallback_address: fallback_address.into(),
            city: city.into(),
        }
    }

    /// Return the party registered under `(company_id, document number)`,
    /// creating it when absent. An existing party is returned unchanged.
    #[instrument(
        skip(self, tx, client),
        fields(company_id = %company_id, document = %client.identification.number)
    )]
    pub async fn resolve_or_create(
        &self,
        tx: &mut dyn StoreTransaction,
        company_id: i64,
        user_id: i64,
        client: &ClientInfo,
        today: NaiveDate,
    ) -> Result<PartyRef, InvoiceError> {
        let name = client.name.trim();
        let document = client.identification.number.trim();

        if name.is_empty() {
            return Err(InvoiceError::IncompleteData("client name is empty".to_string()));
        }
        if document.is_empty() {
            return Err(InvoiceError::IncompleteData(
                "client document number is empty".to_string(),
            ));
        }
        if company_id <= 0 || user_id <= 0 {
            return Err(InvoiceError::IncompleteData(
                "company and user are required".to_string(),
            ));
        }

        let existing = tx
            .find_party(company_id, document)
            .await
            .map_err(|e| InvoiceError::persistence("could not look up client", e))?;
        if let Some(party) = existing {
            info!(party_id = party.id, "Existing party reused");
            return Ok(party);
        }

        let email = match client.supplied_email() {
            Some(email) => email.to_string(),
            None => tx
                .company_contact_email(company_id)
                .await
                .map_err(|e| InvoiceError::persistence("could not read company email", e))?,
        };
        let defaults = tx
            .party_defaults(company_id)
            .await
            .map_err(|e| InvoiceError::persistence("could not read client defaults", e))?;

        let party = NewParty {
            company_id,
            document_type: DocumentType::from_document(document),
            document_number: document.to_string(),
            name: name.to_string(),
            trade_name: name.to_string(),
            email: email.clone(),
            address: client
                .supplied_address()
                .unwrap_or(self.fallback_address.as_str())
                .to_string(),
            city: self.city.clone(),
            defaults,
            visit_frequency_days: DEFAULT_VISIT_FREQUENCY_DAYS,
            route_enabled: true,
            start_date: today,
            created_by: user_id,
        };

        let id = tx
            .insert_party(&party)
            .await
            .map_err(|e| InvoiceError::persistence("could not register client", e))?;

        info!(
            party_id = id,
            document_type = party.document_type.code(),
            "New party registered"
        );

        Ok(PartyRef {
            id,
            name: party.name,
            email,
        })
    }
}
