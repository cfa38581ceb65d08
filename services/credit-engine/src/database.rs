//! PostgreSQL store adapter.
//!
//! Maps the store contract onto the `accounts` / `ledger_entries` /
//! `reservations` schema. Uniqueness is enforced by database constraints
//! and translated into domain errors by matching unique-violation
//! constraint names; everything unrecognized is wrapped in an
//! [`OperationError`] that preserves the driver cause.
//!
//! Concurrency: the account upsert uses `ON CONFLICT DO UPDATE`, which
//! takes the account row lock for the rest of the transaction — racing
//! reserve/spend transactions on one account queue there before reading
//! sums. The reservation read uses `SELECT ... FOR UPDATE` so capture and
//! release attempts on one reservation serialize on the row.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use credit_core::{
    AccountId, AccountRef, Entry, EntryType, LedgerError, LedgerStore, LedgerTx, NewEntry,
    NewReservation, OperationError, Reservation, ReservationId, ReservationStatus, StoreErrorCode,
};

const CONSTRAINT_ENTRIES_IDEMPOTENCY_KEY: &str = "ledger_entries_account_id_idempotency_key_key";
const CONSTRAINT_RESERVATIONS_PRIMARY: &str = "reservations_pkey";

const PG_UNIQUE_VIOLATION: &str = "23505";
const PG_SERIALIZATION_FAILURE: &str = "40001";

// The DO UPDATE arm is a no-op write whose purpose is the RETURNING row
// and the row lock it leaves behind.
const SQL_UPSERT_ACCOUNT: &str = r#"
    insert into accounts (tenant_id, user_id, ledger_id)
    values ($1, $2, $3)
    on conflict (tenant_id, user_id, ledger_id)
    do update set tenant_id = excluded.tenant_id
    returning account_id
"#;

const SQL_INSERT_ENTRY: &str = r#"
    insert into ledger_entries (
        account_id, entry_type, amount_cents, reservation_id,
        idempotency_key, expires_at, metadata, created_at
    )
    values ($1, $2, $3, $4, $5, $6, $7::jsonb, $8)
"#;

const SQL_SUM_TOTAL: &str = r#"
    select coalesce(sum(amount_cents), 0)::bigint
    from ledger_entries
    where account_id = $1
      and (expires_at is null or expires_at > $2)
      and entry_type <> 'hold'
      and entry_type <> 'reverse_hold'
"#;

const SQL_SUM_ACTIVE_HOLDS: &str = r#"
    select coalesce(sum(amount_cents), 0)::bigint
    from reservations
    where account_id = $1 and status = 'active'
"#;

const SQL_INSERT_RESERVATION: &str = r#"
    insert into reservations (account_id, reservation_id, amount_cents, status)
    values ($1, $2, $3, $4)
"#;

const SQL_SELECT_RESERVATION_FOR_UPDATE: &str = r#"
    select account_id, reservation_id, amount_cents, status
    from reservations
    where account_id = $1 and reservation_id = $2
    for update
"#;

const SQL_UPDATE_RESERVATION_STATUS: &str = r#"
    update reservations
    set status = $4, updated_at = now()
    where account_id = $1 and reservation_id = $2 and status = $3
"#;

const SQL_LIST_ENTRIES_BEFORE: &str = r#"
    select
        entry_id,
        account_id,
        entry_type,
        amount_cents,
        reservation_id,
        idempotency_key,
        expires_at,
        metadata::text,
        created_at
    from ledger_entries
    where account_id = $1 and created_at < $2
    order by created_at desc, entry_seq desc
    limit $3
"#;

type EntryRow = (
    Uuid,
    Uuid,
    String,
    i64,
    Option<String>,
    String,
    Option<i64>,
    String,
    i64,
);

/// Pool-backed store (autocommit reads plus transaction entry).
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects a bounded pool to the database.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout_secs: u64,
    ) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(acquire_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|error| store_error("connect", "pool", error))?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies pending schema migrations.
    pub async fn run_migrations(&self) -> Result<(), LedgerError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|error| {
                LedgerError::Store(OperationError::new(
                    "migrate",
                    "schema",
                    StoreErrorCode::Database,
                    error,
                ))
            })
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    type Tx = PgStoreTx;

    async fn begin(&self) -> Result<PgStoreTx, LedgerError> {
        let tx = self.pool.begin().await.map_err(|error| {
            LedgerError::Store(OperationError::new(
                "begin",
                "transaction",
                StoreErrorCode::BeginTransaction,
                error,
            ))
        })?;
        Ok(PgStoreTx { tx })
    }

    async fn get_or_create_account(&self, account: &AccountRef) -> Result<AccountId, LedgerError> {
        let account_id: Uuid = sqlx::query_scalar(SQL_UPSERT_ACCOUNT)
            .bind(account.tenant.as_str())
            .bind(account.user.as_str())
            .bind(account.ledger.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|error| store_error("get_or_create_account", account.to_string(), error))?;
        Ok(AccountId::new(account_id))
    }

    async fn sum_total(&self, account_id: AccountId, at_unix: i64) -> Result<i64, LedgerError> {
        sqlx::query_scalar(SQL_SUM_TOTAL)
            .bind(account_id.as_uuid())
            .bind(at_unix)
            .fetch_one(&self.pool)
            .await
            .map_err(|error| store_error("sum_total", account_id.to_string(), error))
    }

    async fn sum_active_holds(
        &self,
        account_id: AccountId,
        _at_unix: i64,
    ) -> Result<i64, LedgerError> {
        sqlx::query_scalar(SQL_SUM_ACTIVE_HOLDS)
            .bind(account_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|error| store_error("sum_active_holds", account_id.to_string(), error))
    }

    async fn list_entries(
        &self,
        account_id: AccountId,
        before_unix: i64,
        limit: i64,
    ) -> Result<Vec<Entry>, LedgerError> {
        let rows: Vec<EntryRow> = sqlx::query_as(SQL_LIST_ENTRIES_BEFORE)
            .bind(account_id.as_uuid())
            .bind(before_unix)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| store_error("list_entries", account_id.to_string(), error))?;
        rows.into_iter().map(entry_from_row).collect()
    }
}

/// Store handle over an open transaction.
#[derive(Debug)]
pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgStoreTx {
    async fn get_or_create_account(
        &mut self,
        account: &AccountRef,
    ) -> Result<AccountId, LedgerError> {
        let account_id: Uuid = sqlx::query_scalar(SQL_UPSERT_ACCOUNT)
            .bind(account.tenant.as_str())
            .bind(account.user.as_str())
            .bind(account.ledger.as_str())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|error| store_error("get_or_create_account", account.to_string(), error))?;
        Ok(AccountId::new(account_id))
    }

    async fn insert_entry(&mut self, entry: NewEntry) -> Result<(), LedgerError> {
        let result = sqlx::query(SQL_INSERT_ENTRY)
            .bind(entry.account_id.as_uuid())
            .bind(entry.entry_type.as_str())
            .bind(entry.amount.get())
            .bind(
                entry
                    .reservation_id
                    .as_ref()
                    .map(|reservation| reservation.as_str().to_owned()),
            )
            .bind(entry.idempotency_key.as_str())
            .bind(entry.expires_at_unix)
            .bind(entry.metadata.as_str())
            .bind(entry.created_at_unix)
            .execute(&mut *self.tx)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(error) if is_unique_violation(&error, CONSTRAINT_ENTRIES_IDEMPOTENCY_KEY) => {
                Err(LedgerError::DuplicateIdempotencyKey)
            }
            Err(error) => Err(store_error(
                "insert_entry",
                entry.account_id.to_string(),
                error,
            )),
        }
    }

    async fn sum_total(&mut self, account_id: AccountId, at_unix: i64) -> Result<i64, LedgerError> {
        sqlx::query_scalar(SQL_SUM_TOTAL)
            .bind(account_id.as_uuid())
            .bind(at_unix)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|error| store_error("sum_total", account_id.to_string(), error))
    }

    async fn sum_active_holds(
        &mut self,
        account_id: AccountId,
        _at_unix: i64,
    ) -> Result<i64, LedgerError> {
        sqlx::query_scalar(SQL_SUM_ACTIVE_HOLDS)
            .bind(account_id.as_uuid())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|error| store_error("sum_active_holds", account_id.to_string(), error))
    }

    async fn create_reservation(
        &mut self,
        reservation: NewReservation,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(SQL_INSERT_RESERVATION)
            .bind(reservation.account_id.as_uuid())
            .bind(reservation.reservation_id.as_str())
            .bind(reservation.amount.get())
            .bind(reservation.status.as_str())
            .execute(&mut *self.tx)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(error) if is_unique_violation(&error, CONSTRAINT_RESERVATIONS_PRIMARY) => {
                Err(LedgerError::ReservationExists)
            }
            Err(error) => Err(store_error(
                "create_reservation",
                reservation.account_id.to_string(),
                error,
            )),
        }
    }

    async fn get_reservation(
        &mut self,
        account_id: AccountId,
        reservation_id: &ReservationId,
    ) -> Result<Reservation, LedgerError> {
        let row: Option<(Uuid, String, i64, String)> =
            sqlx::query_as(SQL_SELECT_RESERVATION_FOR_UPDATE)
                .bind(account_id.as_uuid())
                .bind(reservation_id.as_str())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|error| store_error("get_reservation", account_id.to_string(), error))?;
        let (account_uuid, reservation_id, amount_cents, status) =
            row.ok_or(LedgerError::UnknownReservation)?;
        let status = ReservationStatus::parse(&status).ok_or_else(|| {
            LedgerError::Store(OperationError::new(
                "get_reservation",
                account_id.to_string(),
                StoreErrorCode::Database,
                format!("unrecognized reservation status {status:?}"),
            ))
        })?;
        Ok(Reservation {
            account_id: AccountId::new(account_uuid),
            reservation_id,
            amount_cents,
            status,
        })
    }

    async fn update_reservation_status(
        &mut self,
        account_id: AccountId,
        reservation_id: &ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(SQL_UPDATE_RESERVATION_STATUS)
            .bind(account_id.as_uuid())
            .bind(reservation_id.as_str())
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|error| {
                store_error("update_reservation_status", account_id.to_string(), error)
            })?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::ReservationClosed);
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), LedgerError> {
        self.tx.commit().await.map_err(|error| {
            LedgerError::Store(OperationError::new(
                "commit",
                "transaction",
                StoreErrorCode::CommitTransaction,
                error,
            ))
        })
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        self.tx.rollback().await.map_err(|error| {
            LedgerError::Store(OperationError::new(
                "rollback",
                "transaction",
                StoreErrorCode::Database,
                error,
            ))
        })
    }
}

fn entry_from_row(row: EntryRow) -> Result<Entry, LedgerError> {
    let (
        entry_id,
        account_uuid,
        entry_type,
        amount_cents,
        reservation_id,
        idempotency_key,
        expires_at_unix,
        metadata_json,
        created_at_unix,
    ) = row;
    let entry_type = EntryType::parse(&entry_type).ok_or_else(|| {
        LedgerError::Store(OperationError::new(
            "list_entries",
            entry_id.to_string(),
            StoreErrorCode::Database,
            format!("unrecognized entry type {entry_type:?}"),
        ))
    })?;
    Ok(Entry {
        entry_id,
        account_id: AccountId::new(account_uuid),
        entry_type,
        amount_cents,
        reservation_id,
        idempotency_key,
        expires_at_unix,
        metadata_json,
        created_at_unix,
    })
}

fn is_unique_violation(error: &sqlx::Error, constraint: &str) -> bool {
    if let sqlx::Error::Database(db_error) = error {
        return db_error.code().as_deref() == Some(PG_UNIQUE_VIOLATION)
            && db_error.constraint() == Some(constraint);
    }
    false
}

fn store_error(
    operation: &'static str,
    subject: impl Into<String>,
    source: sqlx::Error,
) -> LedgerError {
    let code = match &source {
        sqlx::Error::Database(db_error)
            if db_error.code().as_deref() == Some(PG_SERIALIZATION_FAILURE) =>
        {
            StoreErrorCode::SerializationConflict
        }
        _ => StoreErrorCode::Database,
    };
    LedgerError::Store(OperationError::new(operation, subject, code, source))
}
