//! Core domain types for fanout.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer: the gateway constructs [`DomainError`]s,
//! the executor produces [`Outcome`]s, and the processor consumes both.

mod error;
mod outcome;

pub use error::{DomainError, FieldError};
pub use outcome::{Operation, Outcome, Rejection};

use thiserror::Error;

// ============================================================================
// Executor Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidExecutorConfig {
    #[error("max_batch_size must be at least 1")]
    ZeroBatchSize,
    #[error("max_concurrent_requests must be at least 1")]
    ZeroConcurrency,
    #[error("max_concurrent_requests must be at most {max}")]
    ConcurrencyTooLarge { max: usize },
}

/// Validated executor limits.
///
/// Existence of a value is the proof of its validity: both ceilings are
/// at least 1, and the concurrency ceiling fits in a tokio semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    max_batch_size: usize,
    max_concurrent_requests: usize,
}

impl ExecutorConfig {
    pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;
    pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 5;
    /// Same value as `tokio::sync::Semaphore::MAX_PERMITS`.
    pub const MAX_CONCURRENT_REQUESTS: usize = usize::MAX >> 3;

    pub fn new(
        max_batch_size: usize,
        max_concurrent_requests: usize,
    ) -> Result<Self, InvalidExecutorConfig> {
        if max_batch_size == 0 {
            return Err(InvalidExecutorConfig::ZeroBatchSize);
        }
        if max_concurrent_requests == 0 {
            return Err(InvalidExecutorConfig::ZeroConcurrency);
        }
        if max_concurrent_requests > Self::MAX_CONCURRENT_REQUESTS {
            return Err(InvalidExecutorConfig::ConcurrencyTooLarge {
                max: Self::MAX_CONCURRENT_REQUESTS,
            });
        }
        Ok(Self {
            max_batch_size,
            max_concurrent_requests,
        })
    }

    /// Largest number of operations accepted in one batch.
    #[must_use]
    pub const fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Largest number of operations allowed in flight at once.
    #[must_use]
    pub const fn max_concurrent_requests(&self) -> usize {
        self.max_concurrent_requests
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_batch_size: Self::DEFAULT_MAX_BATCH_SIZE,
            max_concurrent_requests: Self::DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }
}

// ============================================================================
// Payload presence
// ============================================================================

/// Type-aware emptiness check for successful payloads.
///
/// A fulfilled outcome whose payload reports `is_absent() == true` is treated
/// as a failure by the batch processor. Only an explicit "nothing" counts:
/// `false`, `0`, `""`, `[]` and `{}` are all legitimate answers.
pub trait Payload {
    fn is_absent(&self) -> bool;
}

impl Payload for serde_json::Value {
    fn is_absent(&self) -> bool {
        self.is_null()
    }
}

impl<T> Payload for Option<T> {
    fn is_absent(&self) -> bool {
        self.is_none()
    }
}

/// Unit is an explicit acknowledgement (e.g. a completed delete).
impl Payload for () {
    fn is_absent(&self) -> bool {
        false
    }
}
