//! Error types for the container deposit ledger.

use crate::{ContainerType, PartyId};
use thiserror::Error;

/// Broad classification used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is wrong; nothing was attempted.
    Validation,
    /// A referenced entity does not exist.
    NotFound,
    /// The database refused the transaction; retrying may succeed.
    Transient,
    /// Anything else.
    Internal,
}

/// Main error type for ledger operations.
#[derive(Error, Debug)]
pub enum DepotError {
    /// Unknown container type name.
    #[error("Invalid container type: {0}")]
    InvalidContainerType(String),

    /// Unknown operation kind.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Quantity is zero, negative or out of range.
    #[error("Invalid quantity {quantity} for {container_type}")]
    InvalidQuantity {
        container_type: ContainerType,
        quantity: i64,
    },

    /// Movement request carries no positive quantity.
    #[error("Movement has no container quantities")]
    EmptyMovement,

    /// Malformed balance scope (time window or batch).
    #[error("Invalid balance scope: {0}")]
    InvalidScope(String),

    /// Malformed pagination.
    #[error("Invalid page: {0}")]
    InvalidPage(String),

    /// Party does not exist.
    #[error("Party not found: {0}")]
    PartyNotFound(PartyId),

    /// Container catalog row missing.
    #[error("Catalog entry not found: {0}")]
    CatalogEntryNotFound(String),

    /// Deadlock, serialization failure or lock wait timeout.
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    /// Timeout.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Persisted data violates a ledger invariant.
    #[error("Corrupt ledger data: {0}")]
    Corrupt(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DepotError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DepotError::InvalidContainerType(_)
            | DepotError::InvalidOperation(_)
            | DepotError::InvalidQuantity { .. }
            | DepotError::EmptyMovement
            | DepotError::InvalidScope(_)
            | DepotError::InvalidPage(_) => ErrorKind::Validation,
            DepotError::PartyNotFound(_) | DepotError::CatalogEntryNotFound(_) => {
                ErrorKind::NotFound
            }
            DepotError::TransactionConflict(_) | DepotError::Timeout(_) => ErrorKind::Transient,
            DepotError::Database(_)
            | DepotError::Corrupt(_)
            | DepotError::Configuration(_)
            | DepotError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            DepotError::InvalidContainerType(_) => "INVALID_CONTAINER_TYPE",
            DepotError::InvalidOperation(_) => "INVALID_OPERATION",
            DepotError::InvalidQuantity { .. } => "INVALID_QUANTITY",
            DepotError::EmptyMovement => "EMPTY_MOVEMENT",
            DepotError::InvalidScope(_) => "INVALID_SCOPE",
            DepotError::InvalidPage(_) => "INVALID_PAGE",
            DepotError::PartyNotFound(_) => "PARTY_NOT_FOUND",
            DepotError::CatalogEntryNotFound(_) => "CATALOG_ENTRY_NOT_FOUND",
            DepotError::TransactionConflict(_) => "TRANSACTION_CONFLICT",
            DepotError::Timeout(_) => "TIMEOUT",
            DepotError::Database(_) => "DATABASE_ERROR",
            DepotError::Corrupt(_) => "CORRUPT_DATA",
            DepotError::Configuration(_) => "CONFIGURATION_ERROR",
            DepotError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, DepotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(DepotError::EmptyMovement.kind(), ErrorKind::Validation);
        assert_eq!(
            DepotError::PartyNotFound(PartyId::new(3)).kind(),
            ErrorKind::NotFound
        );
        assert!(DepotError::TransactionConflict("deadlock".into()).is_retryable());
        assert!(!DepotError::Database("syntax".into()).is_retryable());
    }

    #[test]
    fn test_quantity_message() {
        let err = DepotError::InvalidQuantity {
            container_type: ContainerType::Bucket,
            quantity: -2,
        };
        assert_eq!(err.to_string(), "Invalid quantity -2 for bucket");
        assert_eq!(err.error_code(), "INVALID_QUANTITY");
    }
}
