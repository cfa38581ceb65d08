//! Ledger engine.
//!
//! Domain logic over a [`LedgerStore`]: grant, reserve, capture, release,
//! spend, balance, and entry listing. Every mutation runs inside exactly
//! one store transaction; on any error the transaction is rolled back and
//! no partial effects remain observable. The engine keeps no mutable
//! state of its own; correctness under concurrency comes entirely from
//! the store's transactions and row locks.

use std::sync::Arc;

use crate::error::LedgerError;
use crate::oplog::{OperationRecord, OperationSink};
use crate::store::{LedgerStore, LedgerTx};
use crate::types::{
    AccountRef, Balance, Entry, EntryType, IdempotencyKey, MetadataJson, NewEntry, NewReservation,
    PositiveAmountCents, ReservationId, ReservationStatus,
};

const OPERATION_BALANCE: &str = "balance";
const OPERATION_GRANT: &str = "grant";
const OPERATION_RESERVE: &str = "reserve";
const OPERATION_CAPTURE: &str = "capture";
const OPERATION_RELEASE: &str = "release";
const OPERATION_SPEND: &str = "spend";
const OPERATION_LIST_ENTRIES: &str = "list_entries";

const IDEMPOTENCY_SUFFIX_REVERSE: &str = "reverse";
const IDEMPOTENCY_SUFFIX_SPEND: &str = "spend";

/// Injected clock: seconds since the Unix epoch.
///
/// The engine never reads a global clock; expiry evaluation and entry
/// timestamps are deterministic under an injected test clock.
pub type ClockFn = Arc<dyn Fn() -> i64 + Send + Sync>;

/// The ledger engine.
///
/// Stateless apart from its injected collaborators; safe to share across
/// request workers behind an `Arc`.
pub struct LedgerService<S: LedgerStore> {
    store: S,
    clock: ClockFn,
    sink: Option<Arc<dyn OperationSink>>,
}

impl<S: LedgerStore> LedgerService<S> {
    /// Wires an engine over a store and a clock.
    pub fn new(store: S, clock: ClockFn) -> Self {
        Self {
            store,
            clock,
            sink: None,
        }
    }

    /// Attaches an operation-log sink, invoked once per operation after
    /// its transaction resolves.
    pub fn with_operation_sink(mut self, sink: Arc<dyn OperationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Returns total and available (total minus active holds) for the
    /// account, evaluated at the current clock.
    pub async fn balance(&self, account: &AccountRef) -> Result<Balance, LedgerError> {
        let outcome = self.balance_inner(account).await;
        self.record(OperationRecord {
            operation: OPERATION_BALANCE,
            account,
            reservation_id: None,
            amount_cents: None,
            idempotency_key: None,
            metadata: None,
            error: outcome.as_ref().err(),
        });
        outcome
    }

    async fn balance_inner(&self, account: &AccountRef) -> Result<Balance, LedgerError> {
        let account_id = self.store.get_or_create_account(account).await?;
        let now = (self.clock)();
        let total = self.store.sum_total(account_id, now).await?;
        let holds = self.store.sum_active_holds(account_id, now).await?;
        Ok(Balance {
            total_cents: total,
            available_cents: total - holds,
        })
    }

    /// Appends a positive grant, optionally expiring at
    /// `expires_at_unix`.
    pub async fn grant(
        &self,
        account: &AccountRef,
        amount: PositiveAmountCents,
        idempotency_key: &IdempotencyKey,
        expires_at_unix: Option<i64>,
        metadata: &MetadataJson,
    ) -> Result<(), LedgerError> {
        let outcome = self
            .grant_inner(account, amount, idempotency_key, expires_at_unix, metadata)
            .await;
        self.record(OperationRecord {
            operation: OPERATION_GRANT,
            account,
            reservation_id: None,
            amount_cents: Some(amount.get()),
            idempotency_key: Some(idempotency_key),
            metadata: Some(metadata),
            error: outcome.as_ref().err(),
        });
        outcome
    }

    async fn grant_inner(
        &self,
        account: &AccountRef,
        amount: PositiveAmountCents,
        idempotency_key: &IdempotencyKey,
        expires_at_unix: Option<i64>,
        metadata: &MetadataJson,
    ) -> Result<(), LedgerError> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let account_id = tx.get_or_create_account(account).await?;
            tx.insert_entry(NewEntry {
                account_id,
                entry_type: EntryType::Grant,
                amount: amount.credit(),
                reservation_id: None,
                idempotency_key: idempotency_key.clone(),
                expires_at_unix,
                metadata: metadata.clone(),
                created_at_unix: (self.clock)(),
            })
            .await
        }
        .await;
        finish(tx, result).await
    }

    /// Places a hold on the available balance.
    ///
    /// Fails with [`LedgerError::InsufficientFunds`] when
    /// `total − active holds < amount`, and with
    /// [`LedgerError::ReservationExists`] when the reservation id is
    /// already taken on this account.
    pub async fn reserve(
        &self,
        account: &AccountRef,
        amount: PositiveAmountCents,
        reservation_id: &ReservationId,
        idempotency_key: &IdempotencyKey,
        metadata: &MetadataJson,
    ) -> Result<(), LedgerError> {
        let outcome = self
            .reserve_inner(account, amount, reservation_id, idempotency_key, metadata)
            .await;
        self.record(OperationRecord {
            operation: OPERATION_RESERVE,
            account,
            reservation_id: Some(reservation_id),
            amount_cents: Some(amount.get()),
            idempotency_key: Some(idempotency_key),
            metadata: Some(metadata),
            error: outcome.as_ref().err(),
        });
        outcome
    }

    async fn reserve_inner(
        &self,
        account: &AccountRef,
        amount: PositiveAmountCents,
        reservation_id: &ReservationId,
        idempotency_key: &IdempotencyKey,
        metadata: &MetadataJson,
    ) -> Result<(), LedgerError> {
        let mut tx = self.store.begin().await?;
        let result = async {
            // The account upsert leaves the row locked, serializing
            // concurrent reserve/spend on the same account.
            let account_id = tx.get_or_create_account(account).await?;
            let now = (self.clock)();
            let total = tx.sum_total(account_id, now).await?;
            let holds = tx.sum_active_holds(account_id, now).await?;
            if total - holds < amount.get() {
                return Err(LedgerError::InsufficientFunds);
            }
            tx.create_reservation(NewReservation {
                account_id,
                reservation_id: reservation_id.clone(),
                amount,
                status: ReservationStatus::Active,
            })
            .await?;
            tx.insert_entry(NewEntry {
                account_id,
                entry_type: EntryType::Hold,
                amount: amount.debit(),
                reservation_id: Some(reservation_id.clone()),
                idempotency_key: idempotency_key.clone(),
                expires_at_unix: None,
                metadata: metadata.clone(),
                created_at_unix: now,
            })
            .await
        }
        .await;
        finish(tx, result).await
    }

    /// Finalizes a reservation into a spend.
    ///
    /// The supplied amount must equal the reserved amount. Writes a
    /// reverse-hold and a spend entry under keys derived from
    /// `idempotency_key` (`:reverse` / `:spend`), so a retried capture
    /// collides on whichever write the transaction hits first.
    pub async fn capture(
        &self,
        account: &AccountRef,
        reservation_id: &ReservationId,
        idempotency_key: &IdempotencyKey,
        amount: PositiveAmountCents,
        metadata: &MetadataJson,
    ) -> Result<(), LedgerError> {
        let outcome = self
            .capture_inner(account, reservation_id, idempotency_key, amount, metadata)
            .await;
        self.record(OperationRecord {
            operation: OPERATION_CAPTURE,
            account,
            reservation_id: Some(reservation_id),
            amount_cents: Some(amount.get()),
            idempotency_key: Some(idempotency_key),
            metadata: Some(metadata),
            error: outcome.as_ref().err(),
        });
        outcome
    }

    async fn capture_inner(
        &self,
        account: &AccountRef,
        reservation_id: &ReservationId,
        idempotency_key: &IdempotencyKey,
        amount: PositiveAmountCents,
        metadata: &MetadataJson,
    ) -> Result<(), LedgerError> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let account_id = tx.get_or_create_account(account).await?;
            let reservation = tx.get_reservation(account_id, reservation_id).await?;
            if reservation.status != ReservationStatus::Active {
                return Err(LedgerError::ReservationClosed);
            }
            if reservation.amount_cents != amount.get() {
                return Err(LedgerError::InvalidAmountCents(
                    "capture amount mismatch".to_owned(),
                ));
            }
            tx.update_reservation_status(
                account_id,
                reservation_id,
                ReservationStatus::Active,
                ReservationStatus::Captured,
            )
            .await?;
            let now = (self.clock)();
            tx.insert_entry(NewEntry {
                account_id,
                entry_type: EntryType::ReverseHold,
                amount: amount.credit(),
                reservation_id: Some(reservation_id.clone()),
                idempotency_key: idempotency_key.derive(IDEMPOTENCY_SUFFIX_REVERSE),
                expires_at_unix: None,
                metadata: metadata.clone(),
                created_at_unix: now,
            })
            .await?;
            tx.insert_entry(NewEntry {
                account_id,
                entry_type: EntryType::Spend,
                amount: amount.debit(),
                reservation_id: Some(reservation_id.clone()),
                idempotency_key: idempotency_key.derive(IDEMPOTENCY_SUFFIX_SPEND),
                expires_at_unix: None,
                metadata: metadata.clone(),
                created_at_unix: now,
            })
            .await
        }
        .await;
        finish(tx, result).await
    }

    /// Cancels an active reservation, restoring the full reserved amount
    /// to the available balance via a reverse-hold entry.
    pub async fn release(
        &self,
        account: &AccountRef,
        reservation_id: &ReservationId,
        idempotency_key: &IdempotencyKey,
        metadata: &MetadataJson,
    ) -> Result<(), LedgerError> {
        let outcome = self
            .release_inner(account, reservation_id, idempotency_key, metadata)
            .await;
        self.record(OperationRecord {
            operation: OPERATION_RELEASE,
            account,
            reservation_id: Some(reservation_id),
            amount_cents: None,
            idempotency_key: Some(idempotency_key),
            metadata: Some(metadata),
            error: outcome.as_ref().err(),
        });
        outcome
    }

    async fn release_inner(
        &self,
        account: &AccountRef,
        reservation_id: &ReservationId,
        idempotency_key: &IdempotencyKey,
        metadata: &MetadataJson,
    ) -> Result<(), LedgerError> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let account_id = tx.get_or_create_account(account).await?;
            let reservation = tx.get_reservation(account_id, reservation_id).await?;
            if reservation.status != ReservationStatus::Active {
                return Err(LedgerError::ReservationClosed);
            }
            tx.update_reservation_status(
                account_id,
                reservation_id,
                ReservationStatus::Active,
                ReservationStatus::Released,
            )
            .await?;
            let reserved = PositiveAmountCents::new(reservation.amount_cents)?;
            tx.insert_entry(NewEntry {
                account_id,
                entry_type: EntryType::ReverseHold,
                amount: reserved.credit(),
                reservation_id: Some(reservation_id.clone()),
                idempotency_key: idempotency_key.clone(),
                expires_at_unix: None,
                metadata: metadata.clone(),
                created_at_unix: (self.clock)(),
            })
            .await
        }
        .await;
        finish(tx, result).await
    }

    /// Debits the available balance immediately, without a reservation.
    pub async fn spend(
        &self,
        account: &AccountRef,
        amount: PositiveAmountCents,
        idempotency_key: &IdempotencyKey,
        metadata: &MetadataJson,
    ) -> Result<(), LedgerError> {
        let outcome = self
            .spend_inner(account, amount, idempotency_key, metadata)
            .await;
        self.record(OperationRecord {
            operation: OPERATION_SPEND,
            account,
            reservation_id: None,
            amount_cents: Some(amount.get()),
            idempotency_key: Some(idempotency_key),
            metadata: Some(metadata),
            error: outcome.as_ref().err(),
        });
        outcome
    }

    async fn spend_inner(
        &self,
        account: &AccountRef,
        amount: PositiveAmountCents,
        idempotency_key: &IdempotencyKey,
        metadata: &MetadataJson,
    ) -> Result<(), LedgerError> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let account_id = tx.get_or_create_account(account).await?;
            let now = (self.clock)();
            let total = tx.sum_total(account_id, now).await?;
            let holds = tx.sum_active_holds(account_id, now).await?;
            if total - holds < amount.get() {
                return Err(LedgerError::InsufficientFunds);
            }
            tx.insert_entry(NewEntry {
                account_id,
                entry_type: EntryType::Spend,
                amount: amount.debit(),
                reservation_id: None,
                idempotency_key: idempotency_key.clone(),
                expires_at_unix: None,
                metadata: metadata.clone(),
                created_at_unix: now,
            })
            .await
        }
        .await;
        finish(tx, result).await
    }

    /// Lists the account's entries created strictly before `before_unix`,
    /// newest first, bounded by `limit`.
    pub async fn list_entries(
        &self,
        account: &AccountRef,
        before_unix: i64,
        limit: i64,
    ) -> Result<Vec<Entry>, LedgerError> {
        let outcome = self.list_entries_inner(account, before_unix, limit).await;
        self.record(OperationRecord {
            operation: OPERATION_LIST_ENTRIES,
            account,
            reservation_id: None,
            amount_cents: None,
            idempotency_key: None,
            metadata: None,
            error: outcome.as_ref().err(),
        });
        outcome
    }

    async fn list_entries_inner(
        &self,
        account: &AccountRef,
        before_unix: i64,
        limit: i64,
    ) -> Result<Vec<Entry>, LedgerError> {
        let account_id = self.store.get_or_create_account(account).await?;
        self.store.list_entries(account_id, before_unix, limit).await
    }

    fn record(&self, record: OperationRecord<'_>) {
        if let Some(sink) = &self.sink {
            sink.record(&record);
        }
    }
}

/// Commits on success; rolls back on error without masking it.
async fn finish<T: LedgerTx>(tx: T, result: Result<(), LedgerError>) -> Result<(), LedgerError> {
    match result {
        Ok(()) => tx.commit().await,
        Err(error) => {
            let _ = tx.rollback().await;
            Err(error)
        }
    }
}
