//! Splits executor outcomes into successful and failed items.

use fanout_types::{DomainError, Outcome, Payload, Rejection};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuccessfulItem<K, D> {
    pub key: K,
    pub data: D,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItem<K> {
    pub key: K,
    pub error: DomainError,
}

/// Counts reported alongside a batch response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Every input key lands in exactly one of the two buckets, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult<K, D> {
    pub successful: Vec<SuccessfulItem<K, D>>,
    pub failed: Vec<FailedItem<K>>,
}

impl<K, D> BatchResult<K, D> {
    #[must_use]
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.successful.len() + self.failed.len(),
            successful: self.successful.len(),
            failed: self.failed.len(),
        }
    }

    #[must_use]
    pub fn into_response(self) -> BatchResponse<K, D> {
        BatchResponse {
            summary: self.summary(),
            successful: self.successful,
            failed: self.failed,
        }
    }
}

/// Caller-facing shape of a processed batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResponse<K, D> {
    pub summary: BatchSummary,
    pub successful: Vec<SuccessfulItem<K, D>>,
    pub failed: Vec<FailedItem<K>>,
}

/// Partition outcomes, passing fulfilled values through unchanged.
pub fn process_outcomes<K, V>(outcomes: Vec<Outcome<K, V>>) -> BatchResult<K, V>
where
    V: Payload,
{
    process_outcomes_with(outcomes, |value| value)
}

/// Partition outcomes, applying `projector` to each present fulfilled value.
///
/// A fulfilled value that [`Payload::is_absent`] becomes a failure with
/// [`DomainError::empty_result`]; the projector never sees it. Rejections
/// keep their [`DomainError`] as-is; any other reason is carried as the
/// message of a status-less error.
pub fn process_outcomes_with<K, V, D, P>(
    outcomes: Vec<Outcome<K, V>>,
    mut projector: P,
) -> BatchResult<K, D>
where
    V: Payload,
    P: FnMut(V) -> D,
{
    let mut successful = Vec::new();
    let mut failed = Vec::new();

    for outcome in outcomes {
        match outcome {
            Outcome::Fulfilled { key, value } if value.is_absent() => {
                failed.push(FailedItem {
                    key,
                    error: DomainError::empty_result(),
                });
            }
            Outcome::Fulfilled { key, value } => {
                successful.push(SuccessfulItem {
                    key,
                    data: projector(value),
                });
            }
            Outcome::Rejected { key, reason } => {
                let error = match reason {
                    Rejection::Domain(error) => error,
                    Rejection::Other(reason) => DomainError::transport(reason),
                };
                failed.push(FailedItem { key, error });
            }
        }
    }

    BatchResult { successful, failed }
}
