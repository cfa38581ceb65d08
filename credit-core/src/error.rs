//! Error taxonomy for the credit ledger.

use thiserror::Error;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Domain errors returned by the ledger engine and its stores.
///
/// Input and state variants are deterministic and safe to surface to
/// callers verbatim; infrastructure failures are carried by [`Store`]
/// and surfaced opaquely at the RPC boundary.
///
/// [`Store`]: LedgerError::Store
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Available balance is below the requested amount.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// No reservation with the given id exists on the account.
    #[error("unknown reservation")]
    UnknownReservation,

    /// A reservation with the given id already exists on the account.
    #[error("reservation already exists")]
    ReservationExists,

    /// The reservation is no longer active.
    #[error("reservation closed")]
    ReservationClosed,

    /// An entry with this idempotency key already exists on the account.
    ///
    /// Well-behaved clients treat this as success for a retried operation:
    /// the prior commit is authoritative.
    #[error("duplicate idempotency key")]
    DuplicateIdempotencyKey,

    /// Tenant id failed validation.
    #[error("invalid tenant id: {0}")]
    InvalidTenantId(String),

    /// User id failed validation.
    #[error("invalid user id: {0}")]
    InvalidUserId(String),

    /// Ledger id failed validation.
    #[error("invalid ledger id: {0}")]
    InvalidLedgerId(String),

    /// Reservation id failed validation.
    #[error("invalid reservation id: {0}")]
    InvalidReservationId(String),

    /// Idempotency key failed validation.
    #[error("invalid idempotency key: {0}")]
    InvalidIdempotencyKey(String),

    /// Amount failed validation, or a capture amount did not match the
    /// reservation.
    #[error("invalid amount cents: {0}")]
    InvalidAmountCents(String),

    /// Metadata is not a valid JSON document.
    #[error("invalid metadata json: {0}")]
    InvalidMetadataJson(String),

    /// Listing limit is outside the accepted range.
    #[error("invalid list limit: {0}")]
    InvalidListLimit(i64),

    /// Service wiring or configuration is unusable.
    #[error("invalid service config: {0}")]
    InvalidServiceConfig(String),

    /// Infrastructure failure from the persistence layer.
    #[error(transparent)]
    Store(#[from] OperationError),
}

impl LedgerError {
    /// Whether the caller may retry the operation as-is and expect it to
    /// succeed (today: serialization conflicts surfaced by the store).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Store(op) if op.code() == StoreErrorCode::SerializationConflict
        )
    }
}

/// Classifies infrastructure failures surfaced by store adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorCode {
    /// Query or connection failure.
    Database,
    /// Failed to open a transaction.
    BeginTransaction,
    /// Failed to commit a transaction.
    CommitTransaction,
    /// The database aborted the transaction to preserve isolation;
    /// the caller may retry.
    SerializationConflict,
}

/// Wraps a raw driver error with the failing operation and subject.
///
/// Store adapters translate recognizable constraint violations into the
/// matching [`LedgerError`] variant and wrap everything else here, keeping
/// the underlying cause available through `source()`.
#[derive(Error, Debug)]
#[error("store operation {operation} failed for {subject}: {source}")]
pub struct OperationError {
    operation: &'static str,
    subject: String,
    code: StoreErrorCode,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl OperationError {
    /// Wraps a driver error.
    pub fn new(
        operation: &'static str,
        subject: impl Into<String>,
        code: StoreErrorCode,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            operation,
            subject: subject.into(),
            code,
            source: source.into(),
        }
    }

    /// The store operation that failed.
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// The account, reservation, or resource the operation targeted.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The failure classification.
    pub fn code(&self) -> StoreErrorCode {
        self.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_conflicts_are_retryable() {
        let conflict = LedgerError::Store(OperationError::new(
            "create_reservation",
            "acct-1",
            StoreErrorCode::SerializationConflict,
            "could not serialize access",
        ));
        assert!(conflict.is_retryable());

        let plain = LedgerError::Store(OperationError::new(
            "insert_entry",
            "acct-1",
            StoreErrorCode::Database,
            "connection reset",
        ));
        assert!(!plain.is_retryable());
        assert!(!LedgerError::InsufficientFunds.is_retryable());
    }

    #[test]
    fn operation_error_preserves_context() {
        let err = OperationError::new(
            "sum_total",
            "acct-9",
            StoreErrorCode::Database,
            "timeout",
        );
        assert_eq!(err.operation(), "sum_total");
        assert_eq!(err.subject(), "acct-9");
        assert_eq!(err.code(), StoreErrorCode::Database);
        assert!(err.to_string().contains("sum_total"));
    }
}
