//! Operation-log sink.
//!
//! Observability, not durability: the append-only entries table is the
//! audit trail. A configured sink receives one callback per engine
//! operation, after the enclosing transaction has committed or failed, so
//! its latency never holds database locks.

use crate::error::LedgerError;
use crate::types::{AccountRef, IdempotencyKey, MetadataJson, ReservationId};

/// Receives one record per engine operation. Implementations must be safe
/// for concurrent invocation and must not block; hand off to a channel or
/// task if delivery is slow.
pub trait OperationSink: Send + Sync {
    /// Records the outcome of one operation.
    fn record(&self, record: &OperationRecord<'_>);
}

/// Outcome of a single engine operation.
#[derive(Debug)]
pub struct OperationRecord<'a> {
    /// Operation name (`grant`, `reserve`, `capture`, `release`, `spend`,
    /// `balance`, `list_entries`).
    pub operation: &'static str,
    /// Account triple the operation addressed.
    pub account: &'a AccountRef,
    /// Reservation involved, when the operation has one.
    pub reservation_id: Option<&'a ReservationId>,
    /// Client-supplied amount, for operations that carry one.
    pub amount_cents: Option<i64>,
    /// Idempotency key, for mutations.
    pub idempotency_key: Option<&'a IdempotencyKey>,
    /// Metadata, for mutations.
    pub metadata: Option<&'a MetadataJson>,
    /// Error that surfaced, if the operation failed.
    pub error: Option<&'a LedgerError>,
}

impl OperationRecord<'_> {
    /// `"ok"` or `"error"`.
    pub fn status(&self) -> &'static str {
        if self.error.is_none() {
            "ok"
        } else {
            "error"
        }
    }
}

/// Sink that emits structured `tracing` events: info on success, warn on
/// failure (with the full error chain in the `error` field).
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OperationSink for TracingSink {
    fn record(&self, record: &OperationRecord<'_>) {
        match record.error {
            None => tracing::info!(
                operation = record.operation,
                tenant = record.account.tenant.as_str(),
                user = record.account.user.as_str(),
                ledger = record.account.ledger.as_str(),
                reservation_id = record.reservation_id.map(ReservationId::as_str),
                amount_cents = record.amount_cents,
                idempotency_key = record.idempotency_key.map(IdempotencyKey::as_str),
                status = record.status(),
                "ledger operation"
            ),
            Some(error) => tracing::warn!(
                operation = record.operation,
                tenant = record.account.tenant.as_str(),
                user = record.account.user.as_str(),
                ledger = record.account.ledger.as_str(),
                reservation_id = record.reservation_id.map(ReservationId::as_str),
                amount_cents = record.amount_cents,
                idempotency_key = record.idempotency_key.map(IdempotencyKey::as_str),
                status = record.status(),
                error = %error,
                "ledger operation failed"
            ),
        }
    }
}
