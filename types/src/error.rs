//! Structured remote-call failure.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single field-level validation failure reported by the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// The one error shape every failed call is reduced to.
///
/// Built once at the transport boundary and never modified afterwards: the
/// fields are private and there are no setters, only consuming builders used
/// during construction. Retry, batch aggregation and caller-facing responses
/// all carry the same value.
///
/// A missing `status_code` means the request never produced an HTTP response
/// (connection refused, timeout, ...), unless `empty_result` is set: then the
/// call succeeded but carried no payload.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
#[serde(rename_all = "camelCase")]
pub struct DomainError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    field_errors: Option<Vec<FieldError>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "is_false")]
    empty_result: bool,
}

fn is_false(value: &bool) -> bool {
    !value
}

impl DomainError {
    pub const EMPTY_RESULT_MESSAGE: &'static str = "operation returned an empty result";

    /// Error for an HTTP response with the given status.
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(status_code),
            message: message.into(),
            field_errors: None,
            retry_after_seconds: None,
            empty_result: false,
        }
    }

    /// Error for a failure that produced no HTTP response.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status_code: None,
            message: message.into(),
            field_errors: None,
            retry_after_seconds: None,
            empty_result: false,
        }
    }

    /// Synthetic error for a successful call that returned nothing.
    #[must_use]
    pub fn empty_result() -> Self {
        Self {
            empty_result: true,
            ..Self::transport(Self::EMPTY_RESULT_MESSAGE)
        }
    }

    /// An empty list is stored as `None` so it is omitted when serialized.
    #[must_use]
    pub fn with_field_errors(mut self, field_errors: Vec<FieldError>) -> Self {
        self.field_errors = if field_errors.is_empty() {
            None
        } else {
            Some(field_errors)
        };
        self
    }

    #[must_use]
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_seconds = Some(seconds);
        self
    }

    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn field_errors(&self) -> Option<&[FieldError]> {
        self.field_errors.as_deref()
    }

    #[must_use]
    pub const fn retry_after_seconds(&self) -> Option<u64> {
        self.retry_after_seconds
    }

    /// No HTTP response was received.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        self.status_code.is_none() && !self.empty_result
    }

    /// Synthetic failure for a successful call without a payload.
    #[must_use]
    pub const fn is_empty_result(&self) -> bool {
        self.empty_result
    }

    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status_code.is_some_and(|s| (400..500).contains(&s))
    }

    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code.is_some_and(|s| (500..600).contains(&s))
    }
}
