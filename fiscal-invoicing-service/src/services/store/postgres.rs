//! PostgreSQL store: one sqlx transaction per invoice.

use super::{InvoiceStore, StoreError, StoreTransaction};
use crate::models::{
    CatalogEntry, CatalogItemRef, DocumentPreference, InvoiceLineRecord, InvoiceRecord,
    InvoiceSettings, InvoiceTotals, KardexMovement, NewCatalogItem, NewInvoiceHeader,
    NewInvoiceLine, NewParty, PartyDefaults, PartyRef, DEFAULT_UNIT_OF_MEASURE, KARDEX_OUT,
    PLACEHOLDER_IMAGE,
};
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Name of the customer category new parties are filed under.
const DEFAULT_CUSTOMER_CATEGORY: &str = "Consumidor Final";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PgInvoiceStore {
    pool: PgPool,
}

impl PgInvoiceStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "fiscal-invoicing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Committed invoice header by access key.
    #[instrument(skip(self), fields(company_id = %company_id))]
    pub async fn invoice_by_access_key(
        &self,
        company_id: i64,
        access_key: &str,
    ) -> Result<Option<InvoiceRecord>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["invoice_by_access_key"])
            .start_timer();

        let invoice = sqlx::query_as::<_, InvoiceRecord>(
            r#"
            SELECT id, company_id, establishment, emission_point, sequence, issue_date, issue_time,
                   party_id, salesperson_id, credit_days, payment_method, subtotal, subtotal_taxed,
                   subtotal_untaxed, discount, tax_rate, environment, access_key, status, created_by
            FROM invoices
            WHERE company_id = $1 AND access_key = $2
            "#,
        )
        .bind(company_id)
        .bind(access_key)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(invoice)
    }

    /// Lines of a committed invoice, in insertion order.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn invoice_lines(
        &self,
        invoice_id: i64,
    ) -> Result<Vec<InvoiceLineRecord>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["invoice_lines"])
            .start_timer();

        let lines = sqlx::query_as::<_, InvoiceLineRecord>(
            r#"
            SELECT id, invoice_id, company_id, catalog_item_id, description, quantity,
                   unit_price, cost, discount, tax_rate
            FROM invoice_lines
            WHERE invoice_id = $1
            ORDER BY id
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(lines)
    }
}

#[async_trait]
impl InvoiceStore for PgInvoiceStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction { tx: Some(tx) }))
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Open invoice transaction. Dropped without commit, sqlx rolls it back.
pub struct PgStoreTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgStoreTransaction {
    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| StoreError::Rejected("transaction already finished".to_string()))
    }
}

#[derive(FromRow)]
struct SettingsRow {
    company_id: i64,
    tax_id: String,
    tax_rate: Decimal,
    environment: String,
    emission_type: String,
    establishment: i32,
    emission_point: i32,
    invoice_sequence: i64,
    inventory_enabled: bool,
    print_document: String,
}

impl From<SettingsRow> for InvoiceSettings {
    fn from(row: SettingsRow) -> Self {
        InvoiceSettings {
            company_id: row.company_id,
            tax_id: row.tax_id,
            tax_rate: row.tax_rate,
            environment: row.environment,
            emission_type: row.emission_type,
            establishment: row.establishment,
            emission_point: row.emission_point,
            next_sequence: row.invoice_sequence,
            inventory_enabled: row.inventory_enabled,
            document_preference: DocumentPreference::from_setting(&row.print_document),
        }
    }
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    #[instrument(skip(self), fields(company_id = %company_id))]
    async fn find_party(
        &mut self,
        company_id: i64,
        document_number: &str,
    ) -> Result<Option<PartyRef>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_party"])
            .start_timer();

        let row: Option<(i64, String, String)> = sqlx::query_as(
            "SELECT id, name, email FROM parties WHERE company_id = $1 AND document_number = $2",
        )
        .bind(company_id)
        .bind(document_number)
        .fetch_optional(self.conn()?)
        .await?;

        timer.observe_duration();
        Ok(row.map(|(id, name, email)| PartyRef { id, name, email }))
    }

    #[instrument(skip(self, party), fields(company_id = %party.company_id))]
    async fn insert_party(&mut self, party: &NewParty) -> Result<i64, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_party"])
            .start_timer();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO parties (company_id, document_type, document_number, name, trade_name,
                                 email, address, city, category_id, salesperson_id, zone_id,
                                 visit_frequency_days, route_enabled, start_date, next_visit,
                                 balance, visited, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14, 0, FALSE, $15)
            RETURNING id
            "#,
        )
        .bind(party.company_id)
        .bind(party.document_type.code())
        .bind(&party.document_number)
        .bind(&party.name)
        .bind(&party.trade_name)
        .bind(&party.email)
        .bind(&party.address)
        .bind(&party.city)
        .bind(party.defaults.category_id)
        .bind(party.defaults.salesperson_id)
        .bind(party.defaults.zone_id)
        .bind(party.visit_frequency_days)
        .bind(party.route_enabled)
        .bind(party.start_date)
        .bind(party.created_by)
        .fetch_one(self.conn()?)
        .await?;

        timer.observe_duration();
        info!(party_id = id, "Party created");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn company_contact_email(&mut self, company_id: i64) -> Result<String, StoreError> {
        let email: Option<String> =
            sqlx::query_scalar("SELECT contact_email FROM companies WHERE company_id = $1")
                .bind(company_id)
                .fetch_optional(self.conn()?)
                .await?;
        Ok(email.unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn party_defaults(&mut self, company_id: i64) -> Result<PartyDefaults, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["party_defaults"])
            .start_timer();

        let (category_id, salesperson_id, zone_id): (Option<i64>, Option<i64>, Option<i64>) =
            sqlx::query_as(
                r#"
                SELECT
                    (SELECT id FROM customer_categories
                      WHERE company_id = $1 AND name = $2 ORDER BY id LIMIT 1),
                    (SELECT id FROM salespeople WHERE company_id = $1 ORDER BY id LIMIT 1),
                    (SELECT id FROM zones WHERE company_id = $1 ORDER BY id LIMIT 1)
                "#,
            )
            .bind(company_id)
            .bind(DEFAULT_CUSTOMER_CATEGORY)
            .fetch_one(self.conn()?)
            .await?;

        timer.observe_duration();
        Ok(PartyDefaults {
            category_id: category_id.unwrap_or_default(),
            salesperson_id: salesperson_id.unwrap_or_default(),
            zone_id: zone_id.unwrap_or_default(),
        })
    }

    #[instrument(skip(self))]
    async fn company_tax_rate(&mut self, company_id: i64) -> Result<Decimal, StoreError> {
        let rate: Option<Decimal> =
            sqlx::query_scalar("SELECT tax_rate FROM company_parameters WHERE company_id = $1")
                .bind(company_id)
                .fetch_optional(self.conn()?)
                .await?;
        Ok(rate.unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn default_product_category(&mut self, company_id: i64) -> Result<i64, StoreError> {
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM product_categories WHERE company_id = $1 ORDER BY id LIMIT 1",
        )
        .bind(company_id)
        .fetch_optional(self.conn()?)
        .await?;
        Ok(id.unwrap_or_default())
    }

    #[instrument(skip(self), fields(company_id = %company_id, code = %code))]
    async fn find_catalog_item_by_code(
        &mut self,
        company_id: i64,
        code: &str,
    ) -> Result<Option<CatalogEntry>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_catalog_item_by_code"])
            .start_timer();

        let row: Option<(i64, String, Decimal, Decimal)> = sqlx::query_as(
            r#"
            SELECT id, code, stock, cost FROM catalog_items
            WHERE company_id = $1 AND code = $2
            ORDER BY id LIMIT 1
            "#,
        )
        .bind(company_id)
        .bind(code)
        .fetch_optional(self.conn()?)
        .await?;

        timer.observe_duration();
        Ok(row.map(|(id, code, stock, cost)| CatalogEntry {
            id,
            code,
            stock,
            cost,
        }))
    }

    #[instrument(skip(self), fields(company_id = %company_id, catalog_item_id = %catalog_item_id))]
    async fn catalog_entry(
        &mut self,
        company_id: i64,
        catalog_item_id: i64,
    ) -> Result<Option<CatalogEntry>, StoreError> {
        let row: Option<(i64, String, Decimal, Decimal)> = sqlx::query_as(
            "SELECT id, code, stock, cost FROM catalog_items WHERE company_id = $1 AND id = $2",
        )
        .bind(company_id)
        .bind(catalog_item_id)
        .fetch_optional(self.conn()?)
        .await?;

        Ok(row.map(|(id, code, stock, cost)| CatalogEntry {
            id,
            code,
            stock,
            cost,
        }))
    }

    #[instrument(skip(self, item), fields(company_id = %item.company_id))]
    async fn insert_catalog_item(
        &mut self,
        item: &NewCatalogItem,
    ) -> Result<CatalogItemRef, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_catalog_item"])
            .start_timer();

        let conn = self.conn()?;
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO catalog_items (company_id, code, name, image, unit_of_measure, category_id,
                                       price1, tax_rate, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(item.company_id)
        .bind(item.code.as_deref().unwrap_or_default())
        .bind(&item.name)
        .bind(PLACEHOLDER_IMAGE)
        .bind(DEFAULT_UNIT_OF_MEASURE)
        .bind(item.category_id)
        .bind(item.price)
        .bind(item.tax_rate)
        .bind(item.created_by)
        .fetch_one(&mut *conn)
        .await?;

        let code = match &item.code {
            Some(code) => code.clone(),
            None => {
                let code = id.to_string();
                sqlx::query("UPDATE catalog_items SET code = $1 WHERE id = $2")
                    .bind(&code)
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
                code
            }
        };

        timer.observe_duration();
        info!(catalog_item_id = id, code = %code, "Catalog item created");
        Ok(CatalogItemRef { id, code })
    }

    #[instrument(skip(self))]
    async fn invoice_settings(
        &mut self,
        company_id: i64,
    ) -> Result<Option<InvoiceSettings>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["invoice_settings"])
            .start_timer();

        let row = sqlx::query_as::<_, SettingsRow>(
            r#"
            SELECT p.company_id, c.tax_id, p.tax_rate, p.environment, p.emission_type,
                   p.establishment, p.emission_point, p.invoice_sequence, p.inventory_enabled,
                   p.print_document
            FROM company_parameters p
            JOIN companies c ON c.company_id = p.company_id
            WHERE p.company_id = $1
            FOR UPDATE OF p
            "#,
        )
        .bind(company_id)
        .fetch_optional(self.conn()?)
        .await?;

        timer.observe_duration();
        Ok(row.map(InvoiceSettings::from))
    }

    #[instrument(skip(self, header), fields(company_id = %header.company_id, access_key = %header.access_key))]
    async fn insert_invoice_header(
        &mut self,
        header: &NewInvoiceHeader,
    ) -> Result<i64, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice_header"])
            .start_timer();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO invoices (company_id, establishment, emission_point, sequence, issue_date,
                                  issue_time, party_id, salesperson_id, credit_days, payment_method,
                                  subtotal, subtotal_taxed, subtotal_untaxed, discount, tax_rate,
                                  environment, access_key, status, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 0, 0, 0, 0, $11, $12, $13, $14, $15)
            RETURNING id
            "#,
        )
        .bind(header.company_id)
        .bind(&header.establishment)
        .bind(&header.emission_point)
        .bind(&header.sequence)
        .bind(header.issue_date)
        .bind(header.issue_time)
        .bind(header.party_id)
        .bind(header.salesperson_id)
        .bind(header.credit_days)
        .bind(&header.payment_method)
        .bind(header.tax_rate)
        .bind(&header.environment)
        .bind(&header.access_key)
        .bind(header.status.as_str())
        .bind(header.created_by)
        .fetch_one(self.conn()?)
        .await?;

        timer.observe_duration();
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn increment_invoice_sequence(&mut self, company_id: i64) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE company_parameters SET invoice_sequence = invoice_sequence + 1 WHERE company_id = $1",
        )
        .bind(company_id)
        .execute(self.conn()?)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Rejected(format!(
                "no parameters row for company {}",
                company_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, line), fields(invoice_id = %line.invoice_id, catalog_item_id = %line.catalog_item_id))]
    async fn insert_invoice_line(&mut self, line: &NewInvoiceLine) -> Result<i64, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice_line"])
            .start_timer();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO invoice_lines (invoice_id, company_id, catalog_item_id, description,
                                       quantity, unit_price, cost, discount, tax_rate)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(line.invoice_id)
        .bind(line.company_id)
        .bind(line.catalog_item_id)
        .bind(&line.description)
        .bind(line.quantity)
        .bind(line.unit_price)
        .bind(line.cost)
        .bind(line.discount)
        .bind(line.tax_rate)
        .fetch_one(self.conn()?)
        .await?;

        timer.observe_duration();
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn decrement_stock(
        &mut self,
        company_id: i64,
        catalog_item_id: i64,
        quantity: i32,
    ) -> Result<Decimal, StoreError> {
        let stock: Option<Decimal> = sqlx::query_scalar(
            r#"
            UPDATE catalog_items SET stock = stock - $3
            WHERE company_id = $1 AND id = $2
            RETURNING stock
            "#,
        )
        .bind(company_id)
        .bind(catalog_item_id)
        .bind(Decimal::from(quantity))
        .fetch_optional(self.conn()?)
        .await?;

        stock.ok_or_else(|| {
            StoreError::Rejected(format!("catalog item {} not found", catalog_item_id))
        })
    }

    #[instrument(skip(self, movement), fields(catalog_item_id = %movement.catalog_item_id))]
    async fn append_kardex_out(&mut self, movement: &KardexMovement) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO kardex_movements (company_id, catalog_item_id, invoice_id, direction,
                                          quantity, unit_price, balance_after, movement_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(movement.company_id)
        .bind(movement.catalog_item_id)
        .bind(movement.invoice_id)
        .bind(KARDEX_OUT)
        .bind(movement.quantity)
        .bind(movement.unit_price)
        .bind(movement.balance_after)
        .bind(movement.movement_date)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, totals))]
    async fn update_invoice_totals(
        &mut self,
        company_id: i64,
        invoice_id: i64,
        totals: &InvoiceTotals,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET subtotal = $3, subtotal_taxed = $4, subtotal_untaxed = $5, discount = $6
            WHERE company_id = $1 AND id = $2
            "#,
        )
        .bind(company_id)
        .bind(invoice_id)
        .bind(totals.subtotal)
        .bind(totals.subtotal_taxed)
        .bind(totals.subtotal_untaxed)
        .bind(totals.discount)
        .execute(self.conn()?)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Rejected(format!("invoice {} not found", invoice_id)));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn add_to_party_balance(
        &mut self,
        company_id: i64,
        party_id: i64,
        amount: Decimal,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE parties SET balance = balance + $3, visited = TRUE
            WHERE company_id = $1 AND id = $2
            "#,
        )
        .bind(company_id)
        .bind(party_id)
        .bind(amount)
        .execute(self.conn()?)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Rejected(format!("party {} not found", party_id)));
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        match self.tx.take() {
            Some(tx) => Ok(tx.commit().await?),
            None => Err(StoreError::Rejected("transaction already finished".to_string())),
        }
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        match self.tx.take() {
            Some(tx) => Ok(tx.rollback().await?),
            None => {
                warn!("Rollback requested on a finished transaction");
                Ok(())
            }
        }
    }
}
