//! Application startup and lifecycle management.

use crate::config::InvoicingConfig;
use crate::handlers::{health_check, invoices, metrics_handler, readiness_check};
use crate::services::extractor::{ChatCompletionExtractor, DisabledExtractor, InvoiceExtractor};
use crate::services::party::PartyResolver;
use crate::services::tax_authority::{
    DisabledSubmitter, HttpTaxAuthoritySubmitter, TaxAuthoritySubmitter,
};
use crate::services::{
    init_metrics, AssemblerSettings, InvoiceAssembler, InvoiceStore, PgInvoiceStore,
};
use axum::{middleware, routing::get, routing::post, Router};
use secrecy::ExposeSecret;
use service_core::config::Config as CommonConfig;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub assembler: Arc<InvoiceAssembler>,
    pub extractor: Arc<dyn InvoiceExtractor>,
}

impl AppState {
    /// Wire the assembler and the outbound clients over `store`.
    pub fn from_config(
        config: &InvoicingConfig,
        store: Arc<dyn InvoiceStore>,
    ) -> Result<Self, AppError> {
        let submitter: Arc<dyn TaxAuthoritySubmitter> = match &config.tax_authority.resubmit_url {
            Some(url) => Arc::new(
                HttpTaxAuthoritySubmitter::new(
                    url.clone(),
                    Duration::from_secs(config.tax_authority.timeout_secs),
                )
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?,
            ),
            None => {
                tracing::info!("Tax authority URL not configured - resubmission will be skipped");
                Arc::new(DisabledSubmitter)
            }
        };

        let extractor: Arc<dyn InvoiceExtractor> = match config.extractor.api_key {
            Some(_) => Arc::new(
                ChatCompletionExtractor::new(config.extractor.clone())
                    .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?,
            ),
            None => {
                tracing::info!("Extractor API key not configured - chat invoicing is disabled");
                Arc::new(DisabledExtractor)
            }
        };

        let business = &config.business;
        let assembler = InvoiceAssembler::new(
            store,
            submitter,
            PartyResolver::new(
                business.fallback_address.clone(),
                business.default_city.clone(),
            ),
            AssemblerSettings {
                timezone: business.timezone,
                numeric_code: business.numeric_code.clone(),
                artifact_root: business.artifact_root.clone(),
            },
        );

        Ok(Self {
            assembler: Arc::new(assembler),
            extractor,
        })
    }
}

/// Build the HTTP router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route("/invoices", post(invoices::create_invoice))
        .route("/invoices/validate", post(invoices::validate_invoice))
        .route("/invoices/chat", post(invoices::chat_invoice))
        .route(
            "/channels/telegram/invoices",
            post(invoices::telegram_invoice),
        )
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: InvoicingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: InvoicingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: InvoicingConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let store = PgInvoiceStore::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            store.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let state = AppState::from_config(&config, Arc::new(store))?;
        Self::with_state(&config.common, state).await
    }

    /// Bind a listener for an already-wired state.
    pub async fn with_state(common: &CommonConfig, state: AppState) -> Result<Self, AppError> {
        init_metrics();

        let addr = common.bind_address();
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(http_port = port, "Fiscal invoicing listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let app = router(self.state);

        tracing::info!(
            service = "fiscal-invoicing-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, app).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
