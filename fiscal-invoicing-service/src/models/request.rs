//! Extracted invoice request, as produced by the language-model extractor.
//!
//! Wire keys follow the extractor's output format (`estado_procesamiento`,
//! `datos_factura`, ...). Field-level tolerance here is deliberately wider than
//! what the validator accepts: a document that passed validation always parses.

use crate::services::error::InvoiceError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Decimal places stored for unit prices and every total derived from them.
pub const PRICE_SCALE: u32 = 4;

/// Outcome the extractor reported for its own run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingState {
    #[serde(rename = "exitoso", alias = "success")]
    Success,
    #[serde(rename = "error")]
    Error,
    #[serde(other)]
    Unknown,
}

/// Top-level extracted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRequest {
    #[serde(rename = "estado_procesamiento")]
    pub processing_state: ProcessingState,
    #[serde(rename = "datos_factura")]
    pub invoice: InvoicePayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoicePayload {
    /// Channel reference such as `factura50-10001`; only present on the
    /// Telegram channel.
    #[serde(default, deserialize_with = "de_opt_text")]
    pub id: Option<String>,
    #[serde(rename = "cliente")]
    pub client: ClientInfo,
    pub items: Vec<ItemInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(rename = "nombre", deserialize_with = "de_text")]
    pub name: String,
    #[serde(rename = "identificacion")]
    pub identification: Identification,
    #[serde(default, deserialize_with = "de_opt_text")]
    pub email: Option<String>,
    #[serde(rename = "direccion", default, deserialize_with = "de_opt_text")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identification {
    /// Declared kind (`CI`, `RUC`). Informational only: the stored document
    /// type is derived from the number itself.
    #[serde(rename = "tipo", deserialize_with = "de_text")]
    pub kind: String,
    #[serde(rename = "numero", deserialize_with = "de_text")]
    pub number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemInfo {
    #[serde(rename = "descripcion", deserialize_with = "de_text")]
    pub description: String,
    #[serde(rename = "precio_unitario", deserialize_with = "de_price")]
    pub unit_price: Decimal,
    #[serde(rename = "cantidad", deserialize_with = "de_quantity")]
    pub quantity: i32,
    #[serde(rename = "aplica_iva")]
    pub tax_applies: bool,
    /// Existing catalog code, when the caller knows it.
    #[serde(rename = "codigo", default, deserialize_with = "de_opt_text")]
    pub code: Option<String>,
}

impl InvoiceRequest {
    /// Parse a document that already passed [`crate::services::validator`].
    pub fn parse(json: &str) -> Result<Self, InvoiceError> {
        serde_json::from_str(json)
            .map_err(|e| InvoiceError::MalformedInput(format!("invalid JSON: {}", e)))
    }

    pub fn from_value(value: Value) -> Result<Self, InvoiceError> {
        serde_json::from_value(value)
            .map_err(|e| InvoiceError::MalformedInput(format!("invalid JSON: {}", e)))
    }
}

impl ClientInfo {
    /// Email, treating an empty string the same as an absent one.
    pub fn supplied_email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }

    pub fn supplied_address(&self) -> Option<&str> {
        self.address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }
}

impl ItemInfo {
    pub fn supplied_code(&self) -> Option<&str> {
        self.code.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    /// `unit_price * quantity`.
    pub fn gross(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Numeric value of a JSON scalar, accepting numeric strings.
pub(crate) fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

fn de_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string, found {}",
            other
        ))),
    }
}

fn de_opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected a string, found {}",
            other
        ))),
    }
}

fn de_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let parsed = match &value {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s),
        _ => None,
    };
    parsed.ok_or_else(|| serde::de::Error::custom(format!("expected a number, found {}", value)))
}

/// Unit prices are held at [`PRICE_SCALE`], the scale the store persists.
fn de_price<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    de_decimal(deserializer)
        .map(|price| price.round_dp_with_strategy(PRICE_SCALE, RoundingStrategy::MidpointAwayFromZero))
}

fn de_quantity<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    numeric(&value)
        .filter(|f| f.fract() == 0.0 && *f >= i32::MIN as f64 && *f <= i32::MAX as f64)
        .map(|f| f as i32)
        .ok_or_else(|| {
            serde::de::Error::custom(format!("expected a whole number, found {}", value))
        })
}
