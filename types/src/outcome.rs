//! Batch units of work and their terminal results.

use std::fmt;

use serde::Serialize;

use crate::DomainError;

/// One keyed unit of work in a batch.
///
/// `call` is a factory: nothing happens until the executor invokes it, so a
/// batch rejected up front has no side effects.
pub struct Operation<K, F> {
    pub key: K,
    pub call: F,
}

impl<K, F> Operation<K, F> {
    pub fn new(key: K, call: F) -> Self {
        Self { key, call }
    }
}

impl<K: fmt::Debug, F> fmt::Debug for Operation<K, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Why an operation was rejected.
///
/// Structured remote failures keep their full shape; anything else (a panic,
/// a caller-side error) is reduced to its string form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Rejection {
    Domain(DomainError),
    Other(String),
}

impl Rejection {
    #[must_use]
    pub fn as_domain_error(&self) -> Option<&DomainError> {
        match self {
            Self::Domain(err) => Some(err),
            Self::Other(_) => None,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain(err) => write!(f, "{err}"),
            Self::Other(reason) => f.write_str(reason),
        }
    }
}

impl From<DomainError> for Rejection {
    fn from(err: DomainError) -> Self {
        Self::Domain(err)
    }
}

impl From<String> for Rejection {
    fn from(reason: String) -> Self {
        Self::Other(reason)
    }
}

impl From<&str> for Rejection {
    fn from(reason: &str) -> Self {
        Self::Other(reason.to_string())
    }
}

/// Terminal result of one operation. There is no intermediate state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome<K, V> {
    Fulfilled { key: K, value: V },
    Rejected { key: K, reason: Rejection },
}

impl<K, V> Outcome<K, V> {
    #[must_use]
    pub fn key(&self) -> &K {
        match self {
            Self::Fulfilled { key, .. } | Self::Rejected { key, .. } => key,
        }
    }

    #[must_use]
    pub const fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled { .. })
    }

    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}
