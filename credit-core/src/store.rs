//! Persistence contract consumed by the ledger engine.
//!
//! The contract is split along the pool/transaction boundary of the
//! backing database. [`LedgerStore`] serves reads outside any transaction
//! and opens transactions; [`LedgerTx`] is the handle an engine operation
//! drives for its single atomic unit of work, consumed by `commit` or
//! `rollback`. Dropping an uncommitted handle must roll the transaction
//! back, which is how cancellation (future drop) leaves no partial effects.
//!
//! Uniqueness is enforced by the storage layer and surfaced as domain
//! errors: a duplicate `(account, idempotency_key)` insert fails with
//! [`LedgerError::DuplicateIdempotencyKey`], a reservation primary-key
//! collision with [`LedgerError::ReservationExists`], a missing reservation
//! with [`LedgerError::UnknownReservation`], and a conditional status
//! update that matches no row with [`LedgerError::ReservationClosed`].

use async_trait::async_trait;

use crate::error::LedgerError;
use crate::types::{
    AccountId, AccountRef, Entry, NewEntry, NewReservation, Reservation, ReservationId,
    ReservationStatus,
};

/// Pool-level store: reads outside transactions plus transaction entry.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Transaction handle type.
    type Tx: LedgerTx;

    /// Opens a transaction. All writes of one engine operation go through
    /// the returned handle and become visible atomically on commit.
    async fn begin(&self) -> Result<Self::Tx, LedgerError>;

    /// Resolves the account for the triple, creating it if absent.
    /// Idempotent; returns a stable id.
    async fn get_or_create_account(&self, account: &AccountRef) -> Result<AccountId, LedgerError>;

    /// Net of grant and spend deltas whose expiry is absent or strictly
    /// after `at_unix`. Hold and reverse-hold entries never contribute.
    async fn sum_total(&self, account_id: AccountId, at_unix: i64) -> Result<i64, LedgerError>;

    /// Sum of amounts across the account's `active` reservations.
    async fn sum_active_holds(&self, account_id: AccountId, at_unix: i64)
        -> Result<i64, LedgerError>;

    /// Entries created strictly before `before_unix`, newest first
    /// (ties broken by insertion order), at most `limit` rows.
    async fn list_entries(
        &self,
        account_id: AccountId,
        before_unix: i64,
        limit: i64,
    ) -> Result<Vec<Entry>, LedgerError>;
}

/// Transaction-level store: the full mutation surface.
///
/// Reads made through a handle see a snapshot consistent with the
/// transaction's own writes. `get_reservation` must take a row-level
/// exclusive lock so racing capture/release attempts on one reservation
/// serialize; `get_or_create_account` must leave the account row locked
/// so concurrent reserve/spend on one account serialize as well.
#[async_trait]
pub trait LedgerTx: Send {
    /// Resolves (and locks) the account for the triple, creating it if
    /// absent.
    async fn get_or_create_account(
        &mut self,
        account: &AccountRef,
    ) -> Result<AccountId, LedgerError>;

    /// Appends an entry. Fails with
    /// [`LedgerError::DuplicateIdempotencyKey`] when `(account, key)`
    /// collides with an existing entry.
    async fn insert_entry(&mut self, entry: NewEntry) -> Result<(), LedgerError>;

    /// As [`LedgerStore::sum_total`], within the transaction snapshot.
    async fn sum_total(&mut self, account_id: AccountId, at_unix: i64) -> Result<i64, LedgerError>;

    /// As [`LedgerStore::sum_active_holds`], within the transaction
    /// snapshot.
    async fn sum_active_holds(
        &mut self,
        account_id: AccountId,
        at_unix: i64,
    ) -> Result<i64, LedgerError>;

    /// Creates a reservation. Fails with
    /// [`LedgerError::ReservationExists`] on a primary-key collision.
    async fn create_reservation(&mut self, reservation: NewReservation)
        -> Result<(), LedgerError>;

    /// Reads a reservation under a row-level exclusive lock. Fails with
    /// [`LedgerError::UnknownReservation`] when absent.
    async fn get_reservation(
        &mut self,
        account_id: AccountId,
        reservation_id: &ReservationId,
    ) -> Result<Reservation, LedgerError>;

    /// Conditionally moves a reservation from `from` to `to`. Fails with
    /// [`LedgerError::ReservationClosed`] when the current status is not
    /// `from`. This conditional update is the sole synchronization point
    /// for racing transitions on one reservation.
    async fn update_reservation_status(
        &mut self,
        account_id: AccountId,
        reservation_id: &ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    ) -> Result<(), LedgerError>;

    /// Commits the transaction.
    async fn commit(self) -> Result<(), LedgerError>;

    /// Rolls the transaction back, discarding all writes.
    async fn rollback(self) -> Result<(), LedgerError>;
}
