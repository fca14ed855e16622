use std::env;
use std::error::Error as StdError;

use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::StatusCode;
use serde_json::Value;

pub(crate) const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const ERROR_TEXT_MAX_CHARS: usize = 512;
const FALLBACK_ERROR_MESSAGE: &str = "Unknown error";

/// Why a JSON-over-HTTPS call did not yield a usable JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HttpFailure {
    Transport(String),
    Status { status: u16, message: String },
    InvalidJson(String),
}

pub(crate) fn first_non_empty_env(keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Ok(value) = env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

pub(crate) fn api_base_from_env(keys: &[&str]) -> String {
    first_non_empty_env(keys)
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
}

/// POSTs `payload` with the credential as the `key` query parameter.
pub(crate) fn post_json(
    http: &HttpClient,
    endpoint: &str,
    api_key: &str,
    payload: &Value,
) -> Result<Value, HttpFailure> {
    let response = http
        .post(endpoint)
        .query(&[("key", api_key)])
        .json(payload)
        .send()
        .map_err(|err| HttpFailure::Transport(error_chain_text(&err, ERROR_TEXT_MAX_CHARS)))?;
    response_json_or_failure(response)
}

fn response_json_or_failure(response: HttpResponse) -> Result<Value, HttpFailure> {
    let status = response.status();
    let body = response
        .text()
        .map_err(|err| HttpFailure::Transport(error_chain_text(&err, ERROR_TEXT_MAX_CHARS)))?;
    if !status.is_success() {
        return Err(HttpFailure::Status {
            status: status.as_u16(),
            message: upstream_error_message(status, &body),
        });
    }
    serde_json::from_str(&body).map_err(|err| HttpFailure::InvalidJson(err.to_string()))
}

/// Upstream `error.message` if the body carries one, then the HTTP reason
/// phrase, then a fixed fallback.
pub fn upstream_error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|payload| {
            payload
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|message| !message.is_empty())
                .map(|message| truncate_text(message, ERROR_TEXT_MAX_CHARS))
        })
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string())
}

fn error_chain_text(err: &(dyn StdError + 'static), max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(cause) = current {
        let text = cause.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty() && parts.last().map(String::as_str) != Some(trimmed) {
            parts.push(trimmed.to_string());
        }
        current = cause.source();
    }
    if parts.is_empty() {
        return FALLBACK_ERROR_MESSAGE.to_string();
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
