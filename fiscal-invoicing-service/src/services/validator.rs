//! Schema and business-rule validation of extracted invoice documents.
//!
//! Validation never fails: every problem becomes a message in the report, and
//! all independent checks run so a caller can fix the document in one pass.
//! Messages name the wire keys and the 1-based item number.

use crate::models::numeric;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

static TEXT_CHARSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9\s\-_.,@áéíóúÁÉÍÓÚñÑ]+$").expect("charset regex compiles")
});

/// Verdict plus every error found, in check order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub total_errors: usize,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            total_errors: errors.len(),
            errors,
        }
    }
}

/// Validate raw JSON text.
pub fn validate(json: &str) -> ValidationReport {
    match serde_json::from_str::<Value>(json) {
        Ok(value) => validate_value(&value),
        Err(e) => ValidationReport::from_errors(vec![format!("invalid JSON: {}", e)]),
    }
}

/// Validate an already-parsed document.
pub fn validate_value(document: &Value) -> ValidationReport {
    let mut errors = Vec::new();

    let invoice = match (
        present(document.get("estado_procesamiento")),
        present(document.get("datos_factura")),
    ) {
        (Some(_), Some(invoice)) => invoice,
        _ => {
            errors.push("missing primary fields: estado_procesamiento and datos_factura are required".to_string());
            return ValidationReport::from_errors(errors);
        }
    };

    check_client(invoice, &mut errors);
    check_items(invoice, &mut errors);

    ValidationReport::from_errors(errors)
}

fn check_client(invoice: &Value, errors: &mut Vec<String>) {
    let Some(client) = present(invoice.get("cliente")) else {
        errors.push("cliente is required".to_string());
        return;
    };

    match client.get("nombre") {
        Some(name) if !is_blank(name) => {
            if !in_charset(name) {
                errors.push("cliente.nombre contains characters that are not allowed".to_string());
            }
        }
        _ => errors.push("cliente.nombre is required".to_string()),
    }

    let Some(identification) = present(client.get("identificacion")) else {
        errors.push("cliente.identificacion is required".to_string());
        return;
    };
    if identification.get("tipo").is_none_or(is_blank) {
        errors.push("cliente.identificacion.tipo is required".to_string());
    }
    if identification.get("numero").is_none_or(is_blank) {
        errors.push("cliente.identificacion.numero is required".to_string());
    }
}

fn check_items(invoice: &Value, errors: &mut Vec<String>) {
    let items = match invoice.get("items") {
        Some(Value::Array(items)) => items,
        _ => {
            errors.push("items is required and must be an array".to_string());
            return;
        }
    };
    if items.is_empty() {
        errors.push("items must contain at least one item".to_string());
        return;
    }

    for (index, item) in items.iter().enumerate() {
        let n = index + 1;
        match item {
            Value::Object(fields) => check_item(n, fields, errors),
            _ => errors.push(format!("item #{} must be an object", n)),
        }
    }
}

fn check_item(n: usize, item: &Map<String, Value>, errors: &mut Vec<String>) {
    match item.get("descripcion") {
        Some(description) if !is_blank(description) => {
            if !in_charset(description) {
                errors.push(format!(
                    "descripcion of item #{} contains characters that are not allowed",
                    n
                ));
            }
        }
        _ => errors.push(format!("descripcion of item #{} is required", n)),
    }

    match present(item.get("precio_unitario")) {
        None => errors.push(format!("precio_unitario of item #{} is required", n)),
        Some(price) => match numeric(price) {
            None => errors.push(format!("precio_unitario of item #{} must be numeric", n)),
            Some(p) if p < 0.0 => errors.push(format!(
                "precio_unitario of item #{} must be greater than or equal to 0",
                n
            )),
            Some(_) => {}
        },
    }

    match present(item.get("cantidad")) {
        None => errors.push(format!("cantidad of item #{} is required", n)),
        Some(quantity) => match numeric(quantity) {
            None => errors.push(format!("cantidad of item #{} must be numeric", n)),
            Some(q) if q <= 0.0 => {
                errors.push(format!("cantidad of item #{} must be greater than 0", n))
            }
            Some(q) if q.fract() != 0.0 => {
                errors.push(format!("cantidad of item #{} must be a whole number", n))
            }
            Some(_) => {}
        },
    }

    match present(item.get("aplica_iva")) {
        None => errors.push(format!("aplica_iva of item #{} is required", n)),
        Some(Value::Bool(_)) => {}
        Some(_) => errors.push(format!("aplica_iva of item #{} must be a boolean", n)),
    }
}

/// A key that is absent or JSON `null` is not present.
fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

/// Values a required text field may not take: null, false, "", "0", 0,
/// and empty arrays or objects.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty() || s == "0",
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

fn in_charset(value: &Value) -> bool {
    match value {
        Value::String(s) => TEXT_CHARSET.is_match(s),
        Value::Number(n) => TEXT_CHARSET.is_match(&n.to_string()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_document() -> Value {
        json!({
            "estado_procesamiento": "exitoso",
            "datos_factura": {
                "cliente": {
                    "nombre": "Angel Amores",
                    "identificacion": { "tipo": "CI", "numero": "1802498756" },
                    "email": "angel@example.com"
                },
                "items": [
                    { "descripcion": "firma electrónica", "precio_unitario": 30, "cantidad": 1, "aplica_iva": true },
                    { "descripcion": "plan anual", "precio_unitario": "12.50", "cantidad": 2, "aplica_iva": false }
                ]
            }
        })
    }

    #[test]
    fn accepts_well_formed_document() {
        let report = validate(&valid_document().to_string());
        assert!(report.valid, "{:?}", report.errors);
        assert_eq!(report.total_errors, 0);
    }

    #[test]
    fn unparsable_text_is_single_error() {
        let report = validate("{not json");
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("invalid JSON: "));
    }

    #[test]
    fn missing_primary_fields_stops_early() {
        let report = validate(r#"{"datos_factura": {"items": []}}"#);
        assert_eq!(report.total_errors, 1);
        assert!(report.errors[0].starts_with("missing primary fields"));

        let report = validate(r#"{"estado_procesamiento": "exitoso", "datos_factura": null}"#);
        assert_eq!(report.total_errors, 1);
    }

    #[test]
    fn missing_tax_flag_reports_exactly_that_field() {
        let mut doc = valid_document();
        doc["datos_factura"]["items"][1]
            .as_object_mut()
            .unwrap()
            .remove("aplica_iva");

        let report = validate_value(&doc);
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["aplica_iva of item #2 is required".to_string()]);
    }

    #[test]
    fn reports_every_missing_field_not_only_the_first() {
        let doc = json!({
            "estado_procesamiento": "exitoso",
            "datos_factura": {
                "cliente": { "identificacion": { "tipo": "CI", "numero": "1802498756" } },
                "items": [ {} ]
            }
        });

        let report = validate_value(&doc);
        assert_eq!(
            report.errors,
            vec![
                "cliente.nombre is required",
                "descripcion of item #1 is required",
                "precio_unitario of item #1 is required",
                "cantidad of item #1 is required",
                "aplica_iva of item #1 is required",
            ]
        );
    }

    #[test]
    fn truthy_tax_flags_are_not_booleans() {
        let mut doc = valid_document();
        doc["datos_factura"]["items"][0]["aplica_iva"] = json!(1);
        doc["datos_factura"]["items"][1]["aplica_iva"] = json!("true");

        let report = validate_value(&doc);
        assert_eq!(report.total_errors, 2);
        assert!(report.errors.iter().all(|e| e.ends_with("must be a boolean")));
    }

    #[test]
    fn numeric_rules_on_price_and_quantity() {
        let mut doc = valid_document();
        doc["datos_factura"]["items"][0]["precio_unitario"] = json!(-1);
        doc["datos_factura"]["items"][0]["cantidad"] = json!(0);
        doc["datos_factura"]["items"][1]["precio_unitario"] = json!("abc");
        doc["datos_factura"]["items"][1]["cantidad"] = json!(1.5);

        let report = validate_value(&doc);
        assert_eq!(
            report.errors,
            vec![
                "precio_unitario of item #1 must be greater than or equal to 0",
                "cantidad of item #1 must be greater than 0",
                "precio_unitario of item #2 must be numeric",
                "cantidad of item #2 must be a whole number",
            ]
        );
    }

    #[test]
    fn charset_rejects_symbols_but_allows_spanish_letters() {
        let mut doc = valid_document();
        doc["datos_factura"]["cliente"]["nombre"] = json!("Ñandú Peña, S.A.");
        doc["datos_factura"]["items"][0]["descripcion"] = json!("cable <script>");

        let report = validate_value(&doc);
        assert_eq!(
            report.errors,
            vec!["descripcion of item #1 contains characters that are not allowed"]
        );
    }

    #[test]
    fn empty_items_and_blank_identification() {
        let doc = json!({
            "estado_procesamiento": "exitoso",
            "datos_factura": {
                "cliente": { "nombre": "Ana", "identificacion": { "tipo": "", "numero": "" } },
                "items": []
            }
        });

        let report = validate_value(&doc);
        assert_eq!(
            report.errors,
            vec![
                "cliente.identificacion.tipo is required",
                "cliente.identificacion.numero is required",
                "items must contain at least one item",
            ]
        );
    }

    #[test]
    fn validation_is_idempotent() {
        let text = r#"{"estado_procesamiento":"exitoso","datos_factura":{"cliente":{},"items":"x"}}"#;
        assert_eq!(validate(text), validate(text));
    }
}
