//! Transport failure classification.
//!
//! Every way a call can fail is reduced here, once, to a [`DomainError`]:
//!
//! | Failure | `status_code` | Extras |
//! |---------|---------------|--------|
//! | Non-2xx response | response status | field errors (4xx), retry-after (429) |
//! | Connection / timeout | `None` | message keeps the transport cause |
//! | Undecodable 2xx body | response status | - |
//!
//! Nothing downstream rewrites the result; retry decisions and batch
//! aggregation read it as-is.

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde_json::Value;

use fanout_types::{DomainError, FieldError};

/// Error bodies beyond this are cut before parsing.
pub(crate) const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

const MAX_MESSAGE_CHARS: usize = 500;

/// Raw failure as observed at the transport boundary.
#[derive(Debug)]
pub enum TransportFailure {
    /// The server answered with a non-success status.
    Status {
        status: StatusCode,
        headers: HeaderMap,
        body: String,
    },
    /// No usable response: connect error, timeout, or a broken body stream.
    Network(reqwest::Error),
    /// A success status whose body is not valid JSON.
    Decode { status: StatusCode, message: String },
}

/// Reduce a transport failure to the shared error shape.
#[must_use]
pub fn classify(failure: &TransportFailure) -> DomainError {
    match failure {
        TransportFailure::Status {
            status,
            headers,
            body,
        } => classify_status(*status, headers, body),
        TransportFailure::Network(error) => DomainError::transport(network_message(error)),
        TransportFailure::Decode { status, message } => {
            DomainError::new(status.as_u16(), format!("invalid response body: {message}"))
        }
    }
}

fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> DomainError {
    let payload: Option<Value> = serde_json::from_str(body).ok();

    let message = payload
        .as_ref()
        .and_then(extract_error_message)
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty() && payload.is_none()).then(|| truncate(trimmed, MAX_MESSAGE_CHARS))
        })
        .unwrap_or_else(|| default_message(status));

    let mut error = DomainError::new(status.as_u16(), message);

    if status.is_client_error()
        && status != StatusCode::TOO_MANY_REQUESTS
        && let Some(payload) = payload.as_ref()
    {
        error = error.with_field_errors(extract_field_errors(payload));
    }

    if status == StatusCode::TOO_MANY_REQUESTS
        && let Some(seconds) =
            parse_retry_after(headers).or_else(|| payload.as_ref().and_then(body_retry_after))
    {
        error = error.with_retry_after(seconds);
    }

    error
}

fn network_message(error: &reqwest::Error) -> String {
    let kind = if error.is_timeout() {
        "request timed out"
    } else if error.is_connect() {
        "connection failed"
    } else if error.is_body() || error.is_decode() {
        "failed to read response body"
    } else {
        "request failed"
    };
    format!("{kind}: {error}")
}

fn default_message(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("HTTP {} {reason}", status.as_u16()),
        None => format!("HTTP {}", status.as_u16()),
    }
}

/// Pull a human-readable message out of a JSON error body.
#[must_use]
pub fn extract_error_message(payload: &Value) -> Option<String> {
    payload
        .pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| payload.pointer("/message").and_then(Value::as_str))
        .or_else(|| payload.pointer("/error").and_then(Value::as_str))
        .or_else(|| payload.pointer("/errors/0/message").and_then(Value::as_str))
        .or_else(|| payload.pointer("/detail").and_then(Value::as_str))
        .or_else(|| payload.as_str())
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(|message| truncate(message, MAX_MESSAGE_CHARS))
}

/// Field-level validation errors.
///
/// Accepts either a list of objects:
/// `{"errors": [{"field": "title", "message": "is required"}]}`
/// or a map of field to message(s):
/// `{"errors": {"title": ["is required", "is too short"]}}`.
/// The list may also sit under `error.errors`.
#[must_use]
pub fn extract_field_errors(payload: &Value) -> Vec<FieldError> {
    let errors = payload
        .get("errors")
        .or_else(|| payload.pointer("/error/errors"));

    match errors {
        Some(Value::Array(items)) => items.iter().filter_map(field_error_from_object).collect(),
        Some(Value::Object(map)) => map
            .iter()
            .flat_map(|(field, messages)| {
                let messages: Vec<String> = match messages {
                    Value::String(message) => vec![message.clone()],
                    Value::Array(list) => list
                        .iter()
                        .filter_map(Value::as_str)
                        .map(ToString::to_string)
                        .collect(),
                    _ => Vec::new(),
                };
                messages
                    .into_iter()
                    .map(move |message| FieldError::new(field.clone(), message))
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn field_error_from_object(item: &Value) -> Option<FieldError> {
    let field = ["field", "path", "param", "property"]
        .iter()
        .find_map(|name| match item.get(*name)? {
            Value::String(field) => Some(field.clone()),
            Value::Array(segments) => Some(
                segments
                    .iter()
                    .map(|segment| match segment {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("."),
            ),
            _ => None,
        })?;
    let message = item
        .get("message")
        .or_else(|| item.get("msg"))
        .and_then(Value::as_str)
        .unwrap_or("invalid value");
    Some(FieldError::new(field, message))
}

/// Parse `Retry-After-Ms` or `Retry-After` into whole seconds.
///
/// Millisecond hints are rounded up so the hint is never shortened. HTTP-date
/// values are not supported and yield `None`.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    if let Some(val) = headers.get("retry-after-ms")
        && let Ok(s) = val.to_str()
        && let Ok(ms) = s.trim().parse::<f64>()
        && ms.is_finite()
        && ms >= 0.0
    {
        return Some((ms / 1000.0).ceil() as u64);
    }

    if let Some(val) = headers.get("retry-after")
        && let Ok(s) = val.to_str()
    {
        let s = s.trim();
        if let Ok(secs) = s.parse::<u64>() {
            return Some(secs);
        }
        if let Ok(secs) = s.parse::<f64>()
            && secs.is_finite()
            && secs >= 0.0
        {
            return Some(secs.ceil() as u64);
        }
    }

    None
}

fn body_retry_after(payload: &Value) -> Option<u64> {
    ["/retry_after", "/retryAfter", "/error/retry_after", "/error/retryAfter"]
        .iter()
        .find_map(|pointer| {
            let value = payload.pointer(pointer)?;
            value.as_u64().or_else(|| {
                value
                    .as_f64()
                    .filter(|secs| secs.is_finite() && *secs >= 0.0)
                    .map(|secs| secs.ceil() as u64)
            })
        })
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
