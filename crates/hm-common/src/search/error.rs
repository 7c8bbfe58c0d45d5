use thiserror::Error;

use crate::index::{IndexError, StoreError};
use crate::scoring::ScoreDomainError;

#[derive(Debug, Error)]
pub enum SearchError {
    /// Rejected user input.
    #[error("invalid search criteria: {0}")]
    InvalidCriteria(String),
    /// Index and system of record have diverged.
    #[error("{} index hit(s) missing from the system of record", .missing.len())]
    DataConsistency { missing: Vec<String> },
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    ScoreDomain(#[from] ScoreDomainError),
}

impl SearchError {
    pub fn invalid(message: impl Into<String>) -> Self {
        SearchError::InvalidCriteria(message.into())
    }
}
