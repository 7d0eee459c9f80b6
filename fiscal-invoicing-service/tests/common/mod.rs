//! Common test utilities for fiscal-invoicing-service integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use fiscal_invoicing_service::models::{
    DocumentPreference, InvoiceRequest, InvoiceSettings, PartyDefaults,
};
use fiscal_invoicing_service::services::extractor::{ExtractionError, InvoiceExtractor};
use fiscal_invoicing_service::services::party::PartyResolver;
use fiscal_invoicing_service::services::tax_authority::{SubmissionError, TaxAuthoritySubmitter};
use fiscal_invoicing_service::services::{AssemblerSettings, InvoiceAssembler, MemoryInvoiceStore};
use fiscal_invoicing_service::startup::{AppState, Application};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use service_core::config::Config as CommonConfig;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

pub const COMPANY_ID: i64 = 7;
pub const USER_ID: i64 = 3;
pub const CONTACT_EMAIL: &str = "ventas@empresa.ec";
pub const PRODUCT_CATEGORY_ID: i64 = 900;
pub const TAX_ID: &str = "1790012345001";
pub const FIRST_SEQUENCE: i64 = 345;
/// Key for [`TAX_ID`], sequence 345, issued 2026-10-16 in test environment.
pub const FIRST_ACCESS_KEY: &str = "1610202601179001234500110010010000003451234567814";

pub const PARTY_DEFAULTS: PartyDefaults = PartyDefaults {
    category_id: 11,
    salesperson_id: 22,
    zone_id: 33,
};

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,fiscal_invoicing_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// 12:30 on 2026-10-16 in Guayaquil.
pub fn midday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 17, 30, 0).unwrap()
}

/// Already the 17th in UTC, still the 16th in Guayaquil.
pub fn late_evening() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 17, 3, 0, 0).unwrap()
}

pub fn settings() -> InvoiceSettings {
    InvoiceSettings {
        company_id: COMPANY_ID,
        tax_id: TAX_ID.to_string(),
        tax_rate: Decimal::new(15, 0),
        environment: "1".to_string(),
        emission_type: "1".to_string(),
        establishment: 1,
        emission_point: 1,
        next_sequence: FIRST_SEQUENCE,
        inventory_enabled: false,
        document_preference: DocumentPreference::Invoice,
    }
}

/// Records every resubmission request.
#[derive(Default)]
pub struct RecordingSubmitter {
    calls: Mutex<Vec<(i64, String)>>,
}

impl RecordingSubmitter {
    pub fn calls(&self) -> Vec<(i64, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// Wait for the background resubmission to land.
    pub async fn wait_for(&self, count: usize) -> Vec<(i64, String)> {
        for _ in 0..40 {
            let calls = self.calls();
            if calls.len() >= count {
                return calls;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        self.calls()
    }
}

#[async_trait]
impl TaxAuthoritySubmitter for RecordingSubmitter {
    async fn resubmit(&self, invoice_id: i64, document_type: &str) -> Result<(), SubmissionError> {
        self.calls
            .lock()
            .unwrap()
            .push((invoice_id, document_type.to_string()));
        Ok(())
    }
}

/// Extractor with a canned answer.
pub struct FakeExtractor {
    reply: Box<dyn Fn() -> Result<String, ExtractionError> + Send + Sync>,
    prompts: Mutex<Vec<String>>,
}

impl FakeExtractor {
    pub fn replying(document: Value) -> Self {
        let text = document.to_string();
        Self {
            reply: Box::new(move || Ok(text.clone())),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(make: fn() -> ExtractionError) -> Self {
        Self {
            reply: Box::new(move || Err(make())),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl InvoiceExtractor for FakeExtractor {
    async fn extract(&self, prompt: &str) -> Result<String, ExtractionError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.reply)()
    }
}

/// Assembler over a seeded in-memory store.
pub struct Harness {
    pub store: MemoryInvoiceStore,
    pub submitter: Arc<RecordingSubmitter>,
    pub assembler: Arc<InvoiceAssembler>,
}

impl Harness {
    pub async fn process(
        &self,
        request: &InvoiceRequest,
    ) -> Result<fiscal_invoicing_service::services::AssembledInvoice, fiscal_invoicing_service::services::InvoiceError>
    {
        self.assembler
            .process_invoice(request, COMPANY_ID, USER_ID)
            .await
    }
}

pub async fn harness() -> Harness {
    harness_with(settings(), midday).await
}

pub async fn harness_with(settings: InvoiceSettings, clock: fn() -> DateTime<Utc>) -> Harness {
    init_tracing();

    let store = MemoryInvoiceStore::new();
    store
        .seed_company(settings, CONTACT_EMAIL, PARTY_DEFAULTS, PRODUCT_CATEGORY_ID)
        .await;

    let submitter = Arc::new(RecordingSubmitter::default());
    let assembler = InvoiceAssembler::new(
        Arc::new(store.clone()),
        submitter.clone(),
        PartyResolver::new("Ambato", "Ambato"),
        AssemblerSettings {
            timezone: chrono_tz::America::Guayaquil,
            numeric_code: "12345678".to_string(),
            artifact_root: "suscriptores".to_string(),
        },
    )
    .with_clock(clock);

    Harness {
        store,
        submitter,
        assembler: Arc::new(assembler),
    }
}

/// Extractor-shaped document.
pub fn document(client_number: &str, items: Value) -> Value {
    json!({
        "estado_procesamiento": "exitoso",
        "datos_factura": {
            "cliente": {
                "nombre": "Angel Amores",
                "identificacion": { "tipo": "CI", "numero": client_number },
                "email": null,
                "direccion": null
            },
            "items": items
        }
    })
}

pub fn item(description: &str, price: &str, quantity: i64, taxed: bool) -> Value {
    json!({
        "descripcion": description,
        "precio_unitario": price,
        "cantidad": quantity,
        "aplica_iva": taxed
    })
}

pub fn coded_item(code: &str, description: &str, price: &str, quantity: i64, taxed: bool) -> Value {
    let mut value = item(description, price, quantity, taxed);
    value["codigo"] = json!(code);
    value
}

pub fn request(document: Value) -> InvoiceRequest {
    InvoiceRequest::from_value(document).expect("test document must parse")
}

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

/// Running HTTP app over a seeded in-memory store.
pub struct TestApp {
    pub address: String,
    pub harness: Harness,
    pub extractor: Arc<FakeExtractor>,
    pub client: reqwest::Client,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// POST with tenant headers.
    pub fn post_as_tenant(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.url(path))
            .header("X-Company-ID", COMPANY_ID.to_string())
            .header("X-User-ID", USER_ID.to_string())
    }
}

pub async fn spawn_app(extractor: FakeExtractor) -> TestApp {
    let harness = harness().await;
    let extractor = Arc::new(extractor);

    let state = AppState {
        assembler: harness.assembler.clone(),
        extractor: extractor.clone(),
    };
    let app = Application::with_state(&CommonConfig::ephemeral(), state)
        .await
        .expect("Failed to build application");
    let address = format!("http://127.0.0.1:{}", app.port());

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    let client = reqwest::Client::new();
    let mut attempts = 0;
    loop {
        match client.get(format!("{}/health", address)).send().await {
            Ok(_) => break,
            Err(_) if attempts < 20 => {
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(e) => panic!("Server did not come up after 20 attempts: {}", e),
        }
    }

    TestApp {
        address,
        harness,
        extractor,
        client,
    }
}
