//! Language-model extraction of invoice documents from chat text.
//!
//! The model is asked for the JSON document the validator checks; nothing
//! here trusts its output.

use crate::config::ExtractorConfig;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Extractor not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Model returned no content")]
    EmptyResponse,
}

/// Turns a customer message into invoice-shaped JSON text.
#[async_trait]
pub trait InvoiceExtractor: Send + Sync {
    async fn extract(&self, prompt: &str) -> Result<String, ExtractionError>;
}

const INSTRUCTIONS: &str = r#"Role: you extract invoicing data from a customer's message for an Ecuadorian invoicing system.

Extract: the invoicing id when present (format factura50-XXXXX), client name, identification number (CI has 10 digits, RUC has 13), email, address, and every product or service with its unit price, quantity and whether IVA applies.

Rules:
- Quantity defaults to 1; quantities written in words become numbers ("dos mouse" is cantidad 2, descripcion "mouse").
- "mas IVA" after a base price means aplica_iva true.
- "IVA incluido" means unit price = price / 1.15 rounded to 3 decimals, and aplica_iva true.
- IVA "cero", "0", "exento" or "no aplica" means aplica_iva false.
- Without any mention of IVA, aplica_iva is true.
- A missing address is "Ambato"; a missing email is null.

Answer with the JSON document only, no commentary:
{"estado_procesamiento":"exitoso","datos_factura":{"id":"String or null","cliente":{"nombre":"String","identificacion":{"tipo":"CI or RUC","numero":"String"},"email":"String or null","direccion":"String"},"items":[{"descripcion":"String","precio_unitario":Number,"cantidad":Integer,"aplica_iva":Boolean}]}}
When required data is missing answer:
{"estado_procesamiento":"error","mensajes_error":["..."],"campos_faltantes_obligatorios":["..."]}

Customer message:
"#;

/// Full prompt sent to the model for one customer message.
pub fn build_prompt(message: &str) -> String {
    format!("{}\"\"\"{}\"\"\"", INSTRUCTIONS, message.trim())
}

/// Strip Markdown code fences and a leading `json` tag from model output.
pub fn strip_code_fences(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        body = rest;
        if let Some(end) = body.rfind("```") {
            body = &body[..end];
        }
    }
    let body = body.trim();
    body.strip_prefix("json")
        .or_else(|| body.strip_prefix("JSON"))
        .unwrap_or(body)
        .trim()
}

/// OpenAI-style chat-completions client (DeepSeek by default).
pub struct ChatCompletionExtractor {
    config: ExtractorConfig,
    client: Client,
}

impl ChatCompletionExtractor {
    pub fn new(config: ExtractorConfig) -> Result<Self, ExtractionError> {
        if config.api_key.is_none() {
            return Err(ExtractionError::NotConfigured(
                "EXTRACTOR_API_KEY is not set".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExtractionError::Network(e.to_string()))?;

        Ok(Self { config, client })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl InvoiceExtractor for ChatCompletionExtractor {
    async fn extract(&self, prompt: &str) -> Result<String, ExtractionError> {
        if prompt.trim().is_empty() {
            return Err(ExtractionError::InvalidRequest("empty message".to_string()));
        }
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| ExtractionError::NotConfigured("EXTRACTOR_API_KEY is not set".to_string()))?;

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: build_prompt(prompt),
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        };

        tracing::debug!(
            model = %self.config.model,
            prompt_len = prompt.len(),
            "Sending extraction request"
        );

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(api_key.expose_secret())
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractionError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                return Err(ExtractionError::RateLimited);
            }

            return Err(ExtractionError::Api(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::Api(format!("Failed to parse response: {}", e)))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ExtractionError::EmptyResponse)?;

        let json = strip_code_fences(&content);
        if json.is_empty() {
            return Err(ExtractionError::EmptyResponse);
        }
        Ok(json.to_string())
    }
}

/// Used when no API key is configured.
pub struct DisabledExtractor;

#[async_trait]
impl InvoiceExtractor for DisabledExtractor {
    async fn extract(&self, _prompt: &str) -> Result<String, ExtractionError> {
        Err(ExtractionError::NotConfigured(
            "chat extraction is disabled".to_string(),
        ))
    }
}
