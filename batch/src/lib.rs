//! Batch fan-out for fanout.
//!
//! - [`BatchExecutor`] runs up to `max_batch_size` keyed operations with at
//!   most `max_concurrent_requests` in flight, returning outcomes in input
//!   order.
//! - [`process_outcomes`] / [`process_outcomes_with`] split those outcomes
//!   into successful and failed items for the caller.

mod executor;
mod processor;

pub use executor::BatchExecutor;
pub use processor::{
    BatchResponse, BatchResult, BatchSummary, FailedItem, SuccessfulItem, process_outcomes,
    process_outcomes_with,
};

use thiserror::Error;

/// Batch-level configuration failure. Raised before any operation starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("batch {label:?} has {size} operations, more than the maximum of {max}")]
    BatchTooLarge {
        label: String,
        size: usize,
        max: usize,
    },
    #[error("batch {label:?} contains key {key} more than once")]
    DuplicateKey { label: String, key: String },
}
