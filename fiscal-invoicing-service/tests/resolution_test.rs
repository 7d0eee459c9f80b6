//! Integration tests for party resolution and catalog registration.

mod common;

use chrono::NaiveDate;
use common::*;
use fiscal_invoicing_service::models::{ClientInfo, DocumentType, Identification, ItemInfo};
use fiscal_invoicing_service::services::catalog::CatalogRegistrar;
use fiscal_invoicing_service::services::party::PartyResolver;
use fiscal_invoicing_service::services::store::InvoiceStore;
use fiscal_invoicing_service::services::{InvoiceError, MemoryInvoiceStore};
use rust_decimal::Decimal;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
}

fn client(name: &str, number: &str) -> ClientInfo {
    ClientInfo {
        name: name.to_string(),
        identification: Identification {
            kind: "CI".to_string(),
            number: number.to_string(),
        },
        email: None,
        address: None,
    }
}

fn line(description: &str, code: Option<&str>, taxed: bool) -> ItemInfo {
    ItemInfo {
        description: description.to_string(),
        unit_price: dec("12.50"),
        quantity: 1,
        tax_applies: taxed,
        code: code.map(str::to_string),
    }
}

async fn seeded_store() -> MemoryInvoiceStore {
    let store = MemoryInvoiceStore::new();
    store
        .seed_company(settings(), CONTACT_EMAIL, PARTY_DEFAULTS, PRODUCT_CATEGORY_ID)
        .await;
    store
}

#[tokio::test]
async fn existing_party_is_returned_unchanged() {
    let store = seeded_store().await;
    let resolver = PartyResolver::new("Ambato", "Ambato");

    let mut tx = store.begin().await.unwrap();
    let first = resolver
        .resolve_or_create(tx.as_mut(), COMPANY_ID, USER_ID, &client("Ana Pérez", "1802498756"), today())
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut renamed = client("Ana María Pérez", "1802498756");
    renamed.email = Some("ana@correo.ec".to_string());
    let mut tx = store.begin().await.unwrap();
    let second = resolver
        .resolve_or_create(tx.as_mut(), COMPANY_ID, USER_ID, &renamed, today())
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(first, second);
    let state = store.snapshot().await;
    assert_eq!(state.parties.len(), 1);
    assert_eq!(state.parties[0].name, "Ana Pérez");
    assert_eq!(state.parties[0].email, CONTACT_EMAIL);
}

#[tokio::test]
async fn same_document_in_another_company_is_a_different_party() {
    let store = seeded_store().await;
    let mut other = settings();
    other.company_id = 8;
    store
        .seed_company(other, "otra@empresa.ec", PARTY_DEFAULTS, PRODUCT_CATEGORY_ID)
        .await;
    let resolver = PartyResolver::new("Ambato", "Ambato");
    let who = client("Ana", "1802498756");

    let mut tx = store.begin().await.unwrap();
    let a = resolver
        .resolve_or_create(tx.as_mut(), COMPANY_ID, USER_ID, &who, today())
        .await
        .unwrap();
    let b = resolver
        .resolve_or_create(tx.as_mut(), 8, USER_ID, &who, today())
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_ne!(a.id, b.id);
    assert_eq!(b.email, "otra@empresa.ec");
}

#[tokio::test]
async fn supplied_email_and_address_are_kept() {
    let store = seeded_store().await;
    let resolver = PartyResolver::new("Ambato", "Ambato");
    let mut who = client("Comercial Andes", "1790012345001");
    who.email = Some(" compras@andes.ec ".to_string());
    who.address = Some("Av. Cevallos 123".to_string());

    let mut tx = store.begin().await.unwrap();
    let party = resolver
        .resolve_or_create(tx.as_mut(), COMPANY_ID, USER_ID, &who, today())
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(party.email, "compras@andes.ec");
    let state = store.snapshot().await;
    assert_eq!(state.parties[0].address, "Av. Cevallos 123");
    assert_eq!(state.parties[0].document_type, DocumentType::BusinessTaxId);
}

#[tokio::test]
async fn empty_email_falls_back_to_the_company_contact() {
    let store = seeded_store().await;
    let resolver = PartyResolver::new("Ambato", "Ambato");
    let mut who = client("Ana", "1802498756");
    who.email = Some("".to_string());

    let mut tx = store.begin().await.unwrap();
    let party = resolver
        .resolve_or_create(tx.as_mut(), COMPANY_ID, USER_ID, &who, today())
        .await
        .unwrap();

    assert_eq!(party.email, CONTACT_EMAIL);
}

#[tokio::test]
async fn document_type_follows_the_number() {
    let store = seeded_store().await;
    let resolver = PartyResolver::new("Ambato", "Ambato");

    let mut tx = store.begin().await.unwrap();
    for number in ["A1234567", "9999999999999"] {
        resolver
            .resolve_or_create(tx.as_mut(), COMPANY_ID, USER_ID, &client("X", number), today())
            .await
            .unwrap();
    }
    tx.commit().await.unwrap();

    let types: Vec<DocumentType> = store
        .snapshot()
        .await
        .parties
        .iter()
        .map(|p| p.document_type)
        .collect();
    assert_eq!(types, vec![DocumentType::Passport, DocumentType::FinalConsumer]);
}

#[tokio::test]
async fn missing_identity_is_incomplete() {
    let store = seeded_store().await;
    let resolver = PartyResolver::new("Ambato", "Ambato");
    let mut tx = store.begin().await.unwrap();

    let no_document = resolver
        .resolve_or_create(tx.as_mut(), COMPANY_ID, USER_ID, &client("Ana", "  "), today())
        .await;
    let no_tenant = resolver
        .resolve_or_create(tx.as_mut(), 0, USER_ID, &client("Ana", "1802498756"), today())
        .await;

    assert!(matches!(no_document, Err(InvoiceError::IncompleteData(_))));
    assert!(matches!(no_tenant, Err(InvoiceError::IncompleteData(_))));
}

#[tokio::test]
async fn registered_item_uses_company_rate_only_when_taxed() {
    let store = seeded_store().await;
    let registrar = CatalogRegistrar::new();

    let mut tx = store.begin().await.unwrap();
    let taxed = registrar
        .register(tx.as_mut(), COMPANY_ID, USER_ID, &line("asesoría", None, true))
        .await
        .unwrap();
    let exempt = registrar
        .register(tx.as_mut(), COMPANY_ID, USER_ID, &line("libro", Some("LIB-1"), false))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(taxed.code, taxed.id.to_string());
    assert_eq!(exempt.code, "LIB-1");

    let state = store.snapshot().await;
    assert_eq!(state.catalog[0].tax_rate, dec("15"));
    assert_eq!(state.catalog[1].tax_rate, Decimal::ZERO);
    assert_eq!(state.catalog[0].name, "asesoría");
    assert_eq!(state.catalog[0].stock, Decimal::ZERO);
}

#[tokio::test]
async fn unknown_code_registers_a_new_row_under_that_code() {
    let store = seeded_store().await;
    store
        .seed_catalog_item(COMPANY_ID, "P-001", "Firma", dec("3"), dec("1"))
        .await;
    let registrar = CatalogRegistrar::new();

    let mut tx = store.begin().await.unwrap();
    let item = registrar
        .register(tx.as_mut(), COMPANY_ID, USER_ID, &line("otro", Some("P-002"), true))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(item.code, "P-002");
    assert_eq!(store.snapshot().await.catalog.len(), 2);
}

#[tokio::test]
async fn blank_description_is_incomplete() {
    let store = seeded_store().await;
    let registrar = CatalogRegistrar::new();
    let mut tx = store.begin().await.unwrap();

    let result = registrar
        .register(tx.as_mut(), COMPANY_ID, USER_ID, &line(" ", None, true))
        .await;

    assert!(matches!(result, Err(InvoiceError::IncompleteData(_))));
}

#[tokio::test]
async fn rolled_back_registration_is_discarded() {
    let store = seeded_store().await;
    let before = store.snapshot().await;
    let registrar = CatalogRegistrar::new();

    let mut tx = store.begin().await.unwrap();
    registrar
        .register(tx.as_mut(), COMPANY_ID, USER_ID, &line("asesoría", None, true))
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(store.snapshot().await, before);
}
