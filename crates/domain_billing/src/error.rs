//! Billing domain errors
//!
//! Every domain rule violation is a typed, recoverable value. Callers branch
//! on [`BillingError::kind`]; only [`ErrorKind::Failure`] is eligible for a
//! transparent retry.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use core_kernel::{AccountId, CoreError, MoneyError, PortError, TemporalError};

use crate::entry::SourceType;

/// Coarse classification of billing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input or a violated business rule; fix the input
    Validation,
    /// Unknown entity within the caller's tenant
    NotFound,
    /// Uniqueness collision or rejected mutation of a write-once record
    Conflict,
    /// No resolved tenant
    Unauthorized,
    /// Cancelled by the caller before commit
    Cancelled,
    /// Unexpected infrastructure fault
    Failure,
}

/// Errors that can occur in the billing domain
#[derive(Debug, Error)]
pub enum BillingError {
    /// Malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transaction is not balanced
    #[error("Unbalanced transaction: debits={debits}, credits={credits}")]
    UnbalancedTransaction {
        debits: Decimal,
        credits: Decimal,
    },

    /// Posting attempted against an inactive account
    #[error("Account {0} is inactive and cannot receive transactions")]
    AccountInactive(AccountId),

    /// On-demand invoice request found nothing to bill
    #[error("No unbilled charges for account {account_id} in period {start}..{end}")]
    NoUnbilledCharges {
        account_id: AccountId,
        start: NaiveDate,
        end: NaiveDate,
    },

    /// Entity not found in the caller's tenant
    #[error("{entity} not found: {id}")]
    NotFound {
        entity: String,
        id: String,
    },

    /// The idempotency key was already recorded
    #[error("Duplicate transaction: {source_type} {source_reference_id} already recorded for account {account_id}")]
    DuplicateTransaction {
        account_id: AccountId,
        source_type: SourceType,
        source_reference_id: String,
    },

    /// Other uniqueness conflicts (account name, invoice number, billed entry)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The store refused to modify a write-once record
    #[error("Immutable record: {0}")]
    Immutable(String),

    /// No resolved tenant
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Cancelled before commit
    #[error("Operation cancelled before commit")]
    Cancelled,

    /// Arithmetic failure
    #[error("Calculation error: {0}")]
    Calculation(#[from] MoneyError),

    /// Unexpected storage fault
    #[error("Storage failure: {0}")]
    Storage(#[source] PortError),

    /// Unexpected non-storage fault
    #[error("Failure: {0}")]
    Failure(String),
}

impl BillingError {
    /// Creates a Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation(message.into())
    }

    /// Creates a NotFound error
    pub fn not_found(entity: impl Into<String>, id: impl std::fmt::Display) -> Self {
        BillingError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Classifies the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::Validation(_)
            | BillingError::UnbalancedTransaction { .. }
            | BillingError::AccountInactive(_)
            | BillingError::NoUnbilledCharges { .. } => ErrorKind::Validation,
            BillingError::NotFound { .. } => ErrorKind::NotFound,
            BillingError::DuplicateTransaction { .. }
            | BillingError::Conflict(_)
            | BillingError::Immutable(_) => ErrorKind::Conflict,
            BillingError::Unauthorized(_) => ErrorKind::Unauthorized,
            BillingError::Cancelled => ErrorKind::Cancelled,
            BillingError::Calculation(_)
            | BillingError::Storage(_)
            | BillingError::Failure(_) => ErrorKind::Failure,
        }
    }

    /// Only infrastructure faults may be retried transparently
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Failure
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<PortError> for BillingError {
    fn from(error: PortError) -> Self {
        match error {
            PortError::NotFound { entity_type, id } => BillingError::NotFound {
                entity: entity_type,
                id,
            },
            PortError::Validation { message, .. } => BillingError::Validation(message),
            PortError::Conflict { message } => BillingError::Conflict(message),
            PortError::Immutable { entity_type, id } => {
                BillingError::Immutable(format!("{} {}", entity_type, id))
            }
            inactive @ PortError::Inactive { .. } => BillingError::Validation(inactive.to_string()),
            PortError::Unauthorized { message } => BillingError::Unauthorized(message),
            PortError::Cancelled => BillingError::Cancelled,
            other => BillingError::Storage(other),
        }
    }
}

impl From<CoreError> for BillingError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::Money(e) => BillingError::Calculation(e),
            CoreError::Temporal(e) => e.into(),
            CoreError::Validation(msg) => BillingError::Validation(msg),
            CoreError::Unauthorized(msg) => BillingError::Unauthorized(msg),
        }
    }
}

impl From<TemporalError> for BillingError {
    fn from(error: TemporalError) -> Self {
        BillingError::Validation(error.to_string())
    }
}

impl From<validator::ValidationErrors> for BillingError {
    fn from(errors: validator::ValidationErrors) -> Self {
        BillingError::Validation(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_conflict_maps_to_conflict_kind() {
        let error: BillingError = PortError::conflict("duplicate").into();
        assert_eq!(error.kind(), ErrorKind::Conflict);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_connection_failure_is_retryable() {
        let error: BillingError = PortError::connection("reset by peer").into();
        assert_eq!(error.kind(), ErrorKind::Failure);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_cancellation_is_not_retryable() {
        let error: BillingError = PortError::Cancelled.into();
        assert_eq!(error.kind(), ErrorKind::Cancelled);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_inactive_target_is_a_validation_failure() {
        let error: BillingError = PortError::inactive("Account", "acc-1").into();
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_core_errors_keep_their_kind() {
        let unauthorized: BillingError = CoreError::unauthorized("no tenant").into();
        assert_eq!(unauthorized.kind(), ErrorKind::Unauthorized);

        let invalid: BillingError = CoreError::validation("bad period").into();
        assert_eq!(invalid.kind(), ErrorKind::Validation);
    }
}
