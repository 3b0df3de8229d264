//! Ticket input decoding.
//!
//! Scanners hand over either a bare code, a base64-wrapped JSON object, or a
//! raw JSON object; the objects carry the code under `ticket_code`.

use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::Value as JsonValue;

use crate::tickets::error::{TicketError, TicketRejection};

const MAX_CODE_LEN: usize = 64;

/// How the code was presented. Stored on the audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    Base64Json,
    Json,
    Bare,
}

impl InputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputFormat::Base64Json => "base64_json",
            InputFormat::Json => "json",
            InputFormat::Bare => "bare",
        }
    }
}

impl std::str::FromStr for InputFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "base64_json" => Ok(InputFormat::Base64Json),
            "json" => Ok(InputFormat::Json),
            "bare" => Ok(InputFormat::Bare),
            other => Err(format!("unknown input format: {}", other)),
        }
    }
}

pub fn decode_ticket_input(raw: &str) -> Result<(String, InputFormat), TicketError> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(malformed());
    }

    if let Some(code) = from_base64_json(input) {
        return validated(code).map(|c| (c, InputFormat::Base64Json));
    }

    if input.starts_with('{') {
        let value: JsonValue = serde_json::from_str(input).map_err(|_| malformed())?;
        let code = code_field(&value).ok_or_else(malformed)?;
        return validated(code).map(|c| (c, InputFormat::Json));
    }

    validated(input.to_string()).map(|c| (c, InputFormat::Bare))
}

fn from_base64_json(input: &str) -> Option<String> {
    let bytes = [STANDARD, URL_SAFE]
        .iter()
        .find_map(|engine| engine.decode(input).ok())
        .or_else(|| URL_SAFE_NO_PAD.decode(input).ok())?;
    let value: JsonValue = serde_json::from_slice(&bytes).ok()?;
    code_field(&value)
}

fn code_field(value: &JsonValue) -> Option<String> {
    value
        .get("ticket_code")
        .and_then(JsonValue::as_str)
        .map(|s| s.trim().to_string())
}

fn validated(code: String) -> Result<String, TicketError> {
    if code.is_empty()
        || code.len() > MAX_CODE_LEN
        || !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(malformed());
    }
    Ok(code)
}

fn malformed() -> TicketError {
    TicketError::Validation(TicketRejection::MalformedInput)
}
