//! Fiscal access key (clave de acceso) generation.
//!
//! Layout, 49 digits:
//!
//! | field          | width |
//! |----------------|-------|
//! | issue date     | 8 (ddmmyyyy) |
//! | document type  | 2     |
//! | company RUC    | 13    |
//! | environment    | 1     |
//! | establishment  | 3     |
//! | emission point | 3     |
//! | sequence       | 9     |
//! | numeric code   | 8     |
//! | emission type  | 1     |
//! | verifier digit | 1     |

use chrono::{Datelike, NaiveDate};
use thiserror::Error;

pub const ACCESS_KEY_LENGTH: usize = 49;

/// Default 8-digit numeric code.
pub const DEFAULT_NUMERIC_CODE: &str = "12345678";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessKeyError {
    #[error("{field} must be {width} digit(s), got {value:?}")]
    InvalidField {
        field: &'static str,
        width: usize,
        value: String,
    },

    #[error("{field} {value} does not fit in {width} digits")]
    OutOfRange {
        field: &'static str,
        width: usize,
        value: i64,
    },
}

/// Inputs of one access key.
#[derive(Debug, Clone)]
pub struct AccessKeyParts<'a> {
    pub issue_date: NaiveDate,
    pub document_type: &'a str,
    pub tax_id: &'a str,
    pub environment: &'a str,
    pub establishment: i64,
    pub emission_point: i64,
    pub sequence: i64,
    pub numeric_code: &'a str,
    pub emission_type: &'a str,
}

/// Build the 49-character access key. Pure: equal parts give equal keys.
pub fn build_access_key(parts: &AccessKeyParts<'_>) -> Result<String, AccessKeyError> {
    let date = parts.issue_date;
    let mut key = String::with_capacity(ACCESS_KEY_LENGTH);

    key.push_str(&format!("{:02}{:02}{:04}", date.day(), date.month(), date.year()));
    key.push_str(digits("document_type", parts.document_type, 2)?);
    key.push_str(digits("tax_id", parts.tax_id, 13)?);
    key.push_str(digits("environment", parts.environment, 1)?);
    key.push_str(&padded("establishment", parts.establishment, 3)?);
    key.push_str(&padded("emission_point", parts.emission_point, 3)?);
    key.push_str(&padded("sequence", parts.sequence, 9)?);
    key.push_str(digits("numeric_code", parts.numeric_code, 8)?);
    key.push_str(digits("emission_type", parts.emission_type, 1)?);

    let check = verifier_digit(&key);
    key.push(char::from(b'0' + check));
    Ok(key)
}

/// Modulus-11 check digit over a string of ASCII digits.
///
/// Weights 2..=7 cycle from the rightmost digit. A result of 11 maps to 0
/// and 10 maps to 1. Non-digit characters are ignored.
pub fn verifier_digit(digits: &str) -> u8 {
    let sum: u32 = digits
        .bytes()
        .rev()
        .filter(u8::is_ascii_digit)
        .zip((2u32..=7).cycle())
        .map(|(d, weight)| u32::from(d - b'0') * weight)
        .sum();

    match 11 - sum % 11 {
        11 => 0,
        10 => 1,
        d => d as u8,
    }
}

/// True when `key` has the access-key shape and its last digit checks.
pub fn is_valid_access_key(key: &str) -> bool {
    if key.len() != ACCESS_KEY_LENGTH || !key.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let (body, check) = key.split_at(ACCESS_KEY_LENGTH - 1);
    check.as_bytes()[0] - b'0' == verifier_digit(body)
}

fn digits<'a>(field: &'static str, value: &'a str, width: usize) -> Result<&'a str, AccessKeyError> {
    let value = value.trim();
    if value.len() == width && value.bytes().all(|b| b.is_ascii_digit()) {
        Ok(value)
    } else {
        Err(AccessKeyError::InvalidField {
            field,
            width,
            value: value.to_string(),
        })
    }
}

fn padded(field: &'static str, value: i64, width: usize) -> Result<String, AccessKeyError> {
    let rendered = format!("{:0width$}", value, width = width);
    if value < 0 || rendered.len() != width {
        return Err(AccessKeyError::OutOfRange {
            field,
            width,
            value,
        });
    }
    Ok(rendered)
}
