//! In-memory reference store.
//!
//! Implements the full store contract over process-local state guarded by
//! one async mutex. A transaction takes the lock, works on a snapshot of
//! the state, and publishes the snapshot on commit; rollback (or drop)
//! discards it. The single lock gives serializable isolation, so this
//! store doubles as an executable model of the contract for engine and
//! adapter-free integration tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::store::{LedgerStore, LedgerTx};
use crate::types::{
    AccountId, AccountRef, Entry, EntryType, NewEntry, NewReservation, Reservation, ReservationId,
    ReservationStatus,
};

#[derive(Debug, Default, Clone)]
struct MemoryState {
    accounts: HashMap<(String, String, String), AccountId>,
    entries: Vec<Entry>,
    reservations: HashMap<(AccountId, String), Reservation>,
}

impl MemoryState {
    fn get_or_create_account(&mut self, account: &AccountRef) -> AccountId {
        let key = (
            account.tenant.as_str().to_owned(),
            account.user.as_str().to_owned(),
            account.ledger.as_str().to_owned(),
        );
        *self
            .accounts
            .entry(key)
            .or_insert_with(|| AccountId::new(Uuid::new_v4()))
    }

    fn insert_entry(&mut self, entry: NewEntry) -> Result<(), LedgerError> {
        let duplicate = self.entries.iter().any(|existing| {
            existing.account_id == entry.account_id
                && existing.idempotency_key == entry.idempotency_key.as_str()
        });
        if duplicate {
            return Err(LedgerError::DuplicateIdempotencyKey);
        }
        self.entries.push(Entry {
            entry_id: Uuid::new_v4(),
            account_id: entry.account_id,
            entry_type: entry.entry_type,
            amount_cents: entry.amount.get(),
            reservation_id: entry
                .reservation_id
                .map(|reservation| reservation.as_str().to_owned()),
            idempotency_key: entry.idempotency_key.as_str().to_owned(),
            expires_at_unix: entry.expires_at_unix,
            metadata_json: entry.metadata.as_str().to_owned(),
            created_at_unix: entry.created_at_unix,
        });
        Ok(())
    }

    fn sum_total(&self, account_id: AccountId, at_unix: i64) -> i64 {
        self.entries
            .iter()
            .filter(|entry| entry.account_id == account_id)
            .filter(|entry| {
                !matches!(entry.entry_type, EntryType::Hold | EntryType::ReverseHold)
            })
            .filter(|entry| entry.expires_at_unix.map_or(true, |expiry| expiry > at_unix))
            .map(|entry| entry.amount_cents)
            .sum()
    }

    fn sum_active_holds(&self, account_id: AccountId) -> i64 {
        self.reservations
            .values()
            .filter(|reservation| {
                reservation.account_id == account_id
                    && reservation.status == ReservationStatus::Active
            })
            .map(|reservation| reservation.amount_cents)
            .sum()
    }

    fn create_reservation(&mut self, reservation: NewReservation) -> Result<(), LedgerError> {
        let key = (
            reservation.account_id,
            reservation.reservation_id.as_str().to_owned(),
        );
        if self.reservations.contains_key(&key) {
            return Err(LedgerError::ReservationExists);
        }
        self.reservations.insert(
            key,
            Reservation {
                account_id: reservation.account_id,
                reservation_id: reservation.reservation_id.as_str().to_owned(),
                amount_cents: reservation.amount.get(),
                status: reservation.status,
            },
        );
        Ok(())
    }

    fn get_reservation(
        &self,
        account_id: AccountId,
        reservation_id: &ReservationId,
    ) -> Result<Reservation, LedgerError> {
        self.reservations
            .get(&(account_id, reservation_id.as_str().to_owned()))
            .cloned()
            .ok_or(LedgerError::UnknownReservation)
    }

    fn update_reservation_status(
        &mut self,
        account_id: AccountId,
        reservation_id: &ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    ) -> Result<(), LedgerError> {
        match self
            .reservations
            .get_mut(&(account_id, reservation_id.as_str().to_owned()))
        {
            Some(reservation) if reservation.status == from => {
                reservation.status = to;
                Ok(())
            }
            _ => Err(LedgerError::ReservationClosed),
        }
    }

    fn list_entries(&self, account_id: AccountId, before_unix: i64, limit: i64) -> Vec<Entry> {
        let mut rows: Vec<(usize, &Entry)> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| {
                entry.account_id == account_id && entry.created_at_unix < before_unix
            })
            .collect();
        // Newest first; insertion order breaks created_at ties.
        rows.sort_by(|left, right| {
            right
                .1
                .created_at_unix
                .cmp(&left.1.created_at_unix)
                .then(right.0.cmp(&left.0))
        });
        rows.into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, entry)| entry.clone())
            .collect()
    }
}

/// Store backed by process-local state.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a reservation, for inspection in tests.
    pub async fn reservation_snapshot(
        &self,
        account_id: AccountId,
        reservation_id: &ReservationId,
    ) -> Option<Reservation> {
        self.state
            .lock()
            .await
            .reservations
            .get(&(account_id, reservation_id.as_str().to_owned()))
            .cloned()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, LedgerError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTx { guard, working })
    }

    async fn get_or_create_account(&self, account: &AccountRef) -> Result<AccountId, LedgerError> {
        Ok(self.state.lock().await.get_or_create_account(account))
    }

    async fn sum_total(&self, account_id: AccountId, at_unix: i64) -> Result<i64, LedgerError> {
        Ok(self.state.lock().await.sum_total(account_id, at_unix))
    }

    async fn sum_active_holds(
        &self,
        account_id: AccountId,
        _at_unix: i64,
    ) -> Result<i64, LedgerError> {
        Ok(self.state.lock().await.sum_active_holds(account_id))
    }

    async fn list_entries(
        &self,
        account_id: AccountId,
        before_unix: i64,
        limit: i64,
    ) -> Result<Vec<Entry>, LedgerError> {
        Ok(self
            .state
            .lock()
            .await
            .list_entries(account_id, before_unix, limit))
    }
}

/// Open transaction over [`MemoryStore`].
///
/// Holds the store lock for its whole lifetime; the engine opens one
/// transaction per operation and never calls back into the pool-level
/// store while it is open.
#[derive(Debug)]
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn get_or_create_account(
        &mut self,
        account: &AccountRef,
    ) -> Result<AccountId, LedgerError> {
        Ok(self.working.get_or_create_account(account))
    }

    async fn insert_entry(&mut self, entry: NewEntry) -> Result<(), LedgerError> {
        self.working.insert_entry(entry)
    }

    async fn sum_total(&mut self, account_id: AccountId, at_unix: i64) -> Result<i64, LedgerError> {
        Ok(self.working.sum_total(account_id, at_unix))
    }

    async fn sum_active_holds(
        &mut self,
        account_id: AccountId,
        _at_unix: i64,
    ) -> Result<i64, LedgerError> {
        Ok(self.working.sum_active_holds(account_id))
    }

    async fn create_reservation(
        &mut self,
        reservation: NewReservation,
    ) -> Result<(), LedgerError> {
        self.working.create_reservation(reservation)
    }

    async fn get_reservation(
        &mut self,
        account_id: AccountId,
        reservation_id: &ReservationId,
    ) -> Result<Reservation, LedgerError> {
        self.working.get_reservation(account_id, reservation_id)
    }

    async fn update_reservation_status(
        &mut self,
        account_id: AccountId,
        reservation_id: &ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    ) -> Result<(), LedgerError> {
        self.working
            .update_reservation_status(account_id, reservation_id, from, to)
    }

    async fn commit(self) -> Result<(), LedgerError> {
        let MemoryTx { mut guard, working } = self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        Ok(())
    }
}
