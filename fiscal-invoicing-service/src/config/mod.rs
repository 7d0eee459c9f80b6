//! Configuration module for fiscal-invoicing-service.

use chrono_tz::Tz;
use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct InvoicingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub business: BusinessConfig,
    pub extractor: ExtractorConfig,
    pub tax_authority: TaxAuthorityConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Defaults applied to every tenant's invoices.
#[derive(Debug, Clone)]
pub struct BusinessConfig {
    /// Zone whose calendar day is the invoice's issue date.
    pub timezone: Tz,
    pub fallback_address: String,
    pub default_city: String,
    /// 8-digit numeric code embedded in access keys.
    pub numeric_code: String,
    pub artifact_root: String,
}

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub api_url: String,
    /// Chat extraction is disabled when unset.
    pub api_key: Option<Secret<String>>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct TaxAuthorityConfig {
    /// Resubmission is disabled when unset.
    pub resubmit_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::America::Guayaquil,
            fallback_address: "Ambato".to_string(),
            default_city: "Ambato".to_string(),
            numeric_code: "12345678".to_string(),
            artifact_root: "suscriptores".to_string(),
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.deepseek.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "deepseek-chat".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            timeout_secs: 30,
        }
    }
}

impl InvoicingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let business_defaults = BusinessConfig::default();
        let extractor_defaults = ExtractorConfig::default();

        let timezone = match env::var("BUSINESS_TIMEZONE") {
            Ok(name) => name.parse::<Tz>().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("BUSINESS_TIMEZONE {:?}: {}", name, e))
            })?,
            Err(_) => business_defaults.timezone,
        };

        let numeric_code = env_or("ACCESS_KEY_NUMERIC_CODE", &business_defaults.numeric_code);
        if numeric_code.len() != 8 || !numeric_code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ACCESS_KEY_NUMERIC_CODE must be 8 digits"
            )));
        }

        Ok(Self {
            common,
            service_name: env_or("SERVICE_NAME", "fiscal-invoicing-service"),
            log_level: env_or("LOG_LEVEL", "info"),
            otlp_endpoint: env_opt("OTLP_ENDPOINT"),
            database: DatabaseConfig {
                url: Secret::new(env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS", 2),
            },
            business: BusinessConfig {
                timezone,
                fallback_address: env_or("FALLBACK_ADDRESS", &business_defaults.fallback_address),
                default_city: env_or("DEFAULT_CITY", &business_defaults.default_city),
                numeric_code,
                artifact_root: env_or("ARTIFACT_ROOT", &business_defaults.artifact_root),
            },
            extractor: ExtractorConfig {
                api_url: env_or("EXTRACTOR_API_URL", &extractor_defaults.api_url),
                api_key: env_opt("EXTRACTOR_API_KEY").map(Secret::new),
                model: env_or("EXTRACTOR_MODEL", &extractor_defaults.model),
                max_tokens: env_parse("EXTRACTOR_MAX_TOKENS", extractor_defaults.max_tokens),
                temperature: env_parse("EXTRACTOR_TEMPERATURE", extractor_defaults.temperature),
                timeout_secs: env_parse("EXTRACTOR_TIMEOUT_SECS", extractor_defaults.timeout_secs),
            },
            tax_authority: TaxAuthorityConfig {
                resubmit_url: env_opt("TAX_AUTHORITY_RESUBMIT_URL"),
                timeout_secs: env_parse("TAX_AUTHORITY_TIMEOUT_SECS", 10),
            },
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
