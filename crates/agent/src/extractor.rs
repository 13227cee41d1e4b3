//! Pulls invoice fields out of free text through the completion gateway.
//!
//! Model output is scraped with an ordered list of strategies; the first
//! candidate that parses as a JSON object wins.

use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use payplan_core::domain::message::{Intent, Message, MISSING_INVOICE};
use payplan_core::money::parse_amount;

use crate::llm::{GatewayFailure, LlmClient};
use crate::prompts::EXTRACTION_PROMPT;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error(transparent)]
    Gateway(#[from] GatewayFailure),
    #[error("could not parse extraction response: {reason}")]
    Malformed { reason: String, raw_response: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedFields {
    pub invoice_number: String,
    pub total_amount: Decimal,
    pub payment_amount: Decimal,
    pub installment_count: u32,
    pub specific_installment: Option<u32>,
}

impl Default for ExtractedFields {
    fn default() -> Self {
        Self {
            invoice_number: MISSING_INVOICE.to_string(),
            total_amount: Decimal::ZERO,
            payment_amount: Decimal::ZERO,
            installment_count: 1,
            specific_installment: None,
        }
    }
}

impl ExtractedFields {
    /// Copies the fields into the message; a plan starts fully pending.
    pub fn apply_to(self, message: &mut Message) {
        let data = &mut message.data;
        data.invoice_number = self.invoice_number;
        data.total_amount = self.total_amount;
        data.payment_amount = self.payment_amount;
        data.installment_count = self.installment_count;
        data.specific_installment = self.specific_installment;
        if message.intent == Some(Intent::Plan) {
            data.pending_amount = data.total_amount;
        }
    }
}

pub struct DataExtractor {
    llm: Arc<dyn LlmClient>,
}

impl DataExtractor {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn extract(&self, user_input: &str) -> Result<ExtractedFields, ExtractionError> {
        let raw_response = self.llm.complete(EXTRACTION_PROMPT, user_input).await.into_result()?;

        match parse_extraction(&raw_response) {
            Ok(fields) => {
                info!(
                    event_name = "agent.extractor.extracted",
                    invoice = %fields.invoice_number,
                    installments = fields.installment_count,
                    "fields extracted"
                );
                Ok(fields)
            }
            Err(reason) => {
                warn!(event_name = "agent.extractor.malformed", reason = %reason, "extraction response could not be parsed");
                Err(ExtractionError::Malformed { reason, raw_response })
            }
        }
    }
}

fn fenced_block() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fenced block pattern compiles")
    })
}

fn brace_object() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("brace pattern compiles"))
}

/// Fenced block first, then the widest brace span, then the raw text.
pub fn candidates(response: &str) -> Vec<String> {
    let trimmed = response.trim();
    let mut found = Vec::with_capacity(3);
    if let Some(block) = fenced_block().captures(trimmed).and_then(|c| c.get(1)) {
        found.push(block.as_str().to_string());
    }
    if let Some(span) = brace_object().find(trimmed) {
        found.push(span.as_str().to_string());
    }
    found.push(trimmed.to_string());
    found
}

pub fn parse_extraction(response: &str) -> Result<ExtractedFields, String> {
    let mut last_error = String::from("empty response");
    for candidate in candidates(response) {
        let normalized = candidate.replace('\'', "\"");
        match serde_json::from_str::<Value>(&normalized) {
            Ok(Value::Object(object)) => return Ok(fields_from(&object)),
            Ok(_) => last_error = "response is not a JSON object".to_string(),
            Err(error) => last_error = error.to_string(),
        }
    }
    Err(last_error)
}

fn fields_from(object: &Map<String, Value>) -> ExtractedFields {
    let defaults = ExtractedFields::default();
    ExtractedFields {
        invoice_number: object
            .get("numero_factura")
            .and_then(text_value)
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.invoice_number),
        total_amount: object.get("monto_total").and_then(decimal_value).unwrap_or(defaults.total_amount),
        payment_amount: object.get("monto_abono").and_then(decimal_value).unwrap_or(defaults.payment_amount),
        installment_count: object
            .get("fracciones")
            .and_then(count_value)
            .unwrap_or(defaults.installment_count),
        specific_installment: object.get("cuota_especifica").and_then(count_value).filter(|n| *n > 0),
    }
}

fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn decimal_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => {
            let text = number.to_string();
            Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text)).ok()
        }
        Value::String(text) => parse_amount(text),
        _ => None,
    }
}

fn count_value(value: &Value) -> Option<u32> {
    let amount = decimal_value(value)?;
    if !amount.fract().is_zero() {
        return None;
    }
    amount.to_u32()
}
