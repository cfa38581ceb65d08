//! Credit ledger domain engine.
//!
//! An authoritative, append-only double-entry ledger tracking per-user
//! credit balances across tenants and ledger namespaces, with two-phase
//! spending via reservations (hold/capture/release).
//!
//! # Architecture
//!
//! - **Append-only**: balances are derived from immutable entries, never
//!   materialized; the entries table is the audit trail.
//! - **One transaction per operation**: every mutation is atomic; partial
//!   effects are never observable.
//! - **Idempotent under retry**: duplicate `(account, idempotency_key)`
//!   writes are rejected by the store, and a rejection means the prior
//!   commit is authoritative.
//! - **Injected collaborators**: store, clock, and operation-log sink are
//!   supplied by the caller; the engine holds no mutable state.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod error;
pub mod memory;
pub mod oplog;
pub mod service;
pub mod store;
pub mod types;

pub use error::{LedgerError, OperationError, Result, StoreErrorCode};
pub use memory::MemoryStore;
pub use oplog::{OperationRecord, OperationSink, TracingSink};
pub use service::{ClockFn, LedgerService};
pub use store::{LedgerStore, LedgerTx};
pub use types::{
    AccountId, AccountRef, Balance, Entry, EntryAmountCents, EntryType, IdempotencyKey, LedgerId,
    MetadataJson, NewEntry, NewReservation, PositiveAmountCents, Reservation, ReservationId,
    ReservationStatus, TenantId, UserId,
};
