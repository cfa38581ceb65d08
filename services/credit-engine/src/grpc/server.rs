//! gRPC adapter: decodes requests into validated value types, invokes the
//! engine, and maps domain errors to wire status codes.
//!
//! Status messages are stable snake_case tokens (`insufficient_funds`,
//! `unknown_reservation`, ...) so clients can match without parsing prose.
//! Infrastructure failures surface as an opaque `internal` status; the
//! cause is logged, never sent to the caller.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use credit_core::{
    AccountRef, ClockFn, Entry, IdempotencyKey, LedgerError, LedgerService, LedgerStore,
    MetadataJson, PositiveAmountCents, ReservationId,
};

use super::proto::credit_service_server::CreditService;
use super::proto::{
    BalanceRequest, BalanceResponse, CaptureRequest, Empty, Entry as EntryMessage, GrantRequest,
    ListEntriesRequest, ListEntriesResponse, ReleaseRequest, ReserveRequest, SpendRequest,
};

const DEFAULT_LIST_ENTRIES_LIMIT: i64 = 50;
const MAX_LIST_ENTRIES_LIMIT: i64 = 200;

/// Exposes a [`LedgerService`] over gRPC.
///
/// Generic over the store so the full surface runs against the in-memory
/// store in tests and PostgreSQL in production.
pub struct CreditGrpcServer<S: LedgerStore> {
    service: Arc<LedgerService<S>>,
    clock: ClockFn,
}

impl<S: LedgerStore> CreditGrpcServer<S> {
    /// Wires the adapter. The clock supplies the default `before` cutoff
    /// for entry listing.
    pub fn new(service: Arc<LedgerService<S>>, clock: ClockFn) -> Self {
        Self { service, clock }
    }
}

#[tonic::async_trait]
impl<S: LedgerStore + 'static> CreditService for CreditGrpcServer<S> {
    async fn get_balance(
        &self,
        request: Request<BalanceRequest>,
    ) -> Result<Response<BalanceResponse>, Status> {
        let request = request.into_inner();
        let account = decode_account(&request.tenant_id, &request.user_id, &request.ledger_id)?;
        let balance = self
            .service
            .balance(&account)
            .await
            .map_err(|error| map_to_status(&error))?;
        Ok(Response::new(BalanceResponse {
            total_cents: balance.total_cents,
            available_cents: balance.available_cents,
        }))
    }

    async fn grant(&self, request: Request<GrantRequest>) -> Result<Response<Empty>, Status> {
        let request = request.into_inner();
        let account = decode_account(&request.tenant_id, &request.user_id, &request.ledger_id)?;
        let amount = decode_amount(request.amount_cents)?;
        let idempotency_key = decode_idempotency_key(&request.idempotency_key)?;
        let metadata = decode_metadata(&request.metadata_json)?;
        let expires_at_unix = if request.expires_at_unix_utc == 0 {
            None
        } else {
            Some(request.expires_at_unix_utc)
        };
        self.service
            .grant(&account, amount, &idempotency_key, expires_at_unix, &metadata)
            .await
            .map_err(|error| map_to_status(&error))?;
        Ok(Response::new(Empty {}))
    }

    async fn reserve(&self, request: Request<ReserveRequest>) -> Result<Response<Empty>, Status> {
        let request = request.into_inner();
        let account = decode_account(&request.tenant_id, &request.user_id, &request.ledger_id)?;
        let amount = decode_amount(request.amount_cents)?;
        let reservation_id = decode_reservation_id(&request.reservation_id)?;
        let idempotency_key = decode_idempotency_key(&request.idempotency_key)?;
        let metadata = decode_metadata(&request.metadata_json)?;
        self.service
            .reserve(&account, amount, &reservation_id, &idempotency_key, &metadata)
            .await
            .map_err(|error| map_to_status(&error))?;
        Ok(Response::new(Empty {}))
    }

    async fn capture(&self, request: Request<CaptureRequest>) -> Result<Response<Empty>, Status> {
        let request = request.into_inner();
        let account = decode_account(&request.tenant_id, &request.user_id, &request.ledger_id)?;
        let reservation_id = decode_reservation_id(&request.reservation_id)?;
        let idempotency_key = decode_idempotency_key(&request.idempotency_key)?;
        let amount = decode_amount(request.amount_cents)?;
        let metadata = decode_metadata(&request.metadata_json)?;
        self.service
            .capture(&account, &reservation_id, &idempotency_key, amount, &metadata)
            .await
            .map_err(|error| map_to_status(&error))?;
        Ok(Response::new(Empty {}))
    }

    async fn release(&self, request: Request<ReleaseRequest>) -> Result<Response<Empty>, Status> {
        let request = request.into_inner();
        let account = decode_account(&request.tenant_id, &request.user_id, &request.ledger_id)?;
        let reservation_id = decode_reservation_id(&request.reservation_id)?;
        let idempotency_key = decode_idempotency_key(&request.idempotency_key)?;
        let metadata = decode_metadata(&request.metadata_json)?;
        self.service
            .release(&account, &reservation_id, &idempotency_key, &metadata)
            .await
            .map_err(|error| map_to_status(&error))?;
        Ok(Response::new(Empty {}))
    }

    async fn spend(&self, request: Request<SpendRequest>) -> Result<Response<Empty>, Status> {
        let request = request.into_inner();
        let account = decode_account(&request.tenant_id, &request.user_id, &request.ledger_id)?;
        let amount = decode_amount(request.amount_cents)?;
        let idempotency_key = decode_idempotency_key(&request.idempotency_key)?;
        let metadata = decode_metadata(&request.metadata_json)?;
        self.service
            .spend(&account, amount, &idempotency_key, &metadata)
            .await
            .map_err(|error| map_to_status(&error))?;
        Ok(Response::new(Empty {}))
    }

    async fn list_entries(
        &self,
        request: Request<ListEntriesRequest>,
    ) -> Result<Response<ListEntriesResponse>, Status> {
        let request = request.into_inner();
        let account = decode_account(&request.tenant_id, &request.user_id, &request.ledger_id)?;
        let limit = normalize_list_limit(request.limit)?;
        let before_unix = if request.before_unix_utc == 0 {
            (self.clock)()
        } else {
            request.before_unix_utc
        };
        let entries = self
            .service
            .list_entries(&account, before_unix, limit)
            .await
            .map_err(|error| map_to_status(&error))?;
        Ok(Response::new(ListEntriesResponse {
            entries: entries.into_iter().map(entry_to_message).collect(),
        }))
    }
}

fn decode_account(tenant: &str, user: &str, ledger: &str) -> Result<AccountRef, Status> {
    AccountRef::new(tenant, user, ledger).map_err(|error| map_to_status(&error))
}

fn decode_amount(amount_cents: i64) -> Result<PositiveAmountCents, Status> {
    PositiveAmountCents::new(amount_cents).map_err(|error| map_to_status(&error))
}

fn decode_reservation_id(raw: &str) -> Result<ReservationId, Status> {
    ReservationId::new(raw).map_err(|error| map_to_status(&error))
}

fn decode_idempotency_key(raw: &str) -> Result<IdempotencyKey, Status> {
    IdempotencyKey::new(raw).map_err(|error| map_to_status(&error))
}

fn decode_metadata(raw: &str) -> Result<MetadataJson, Status> {
    MetadataJson::new(raw).map_err(|error| map_to_status(&error))
}

fn normalize_list_limit(limit: i32) -> Result<i64, Status> {
    if limit <= 0 {
        return Ok(DEFAULT_LIST_ENTRIES_LIMIT);
    }
    let limit = i64::from(limit);
    if limit > MAX_LIST_ENTRIES_LIMIT {
        return Err(map_to_status(&LedgerError::InvalidListLimit(limit)));
    }
    Ok(limit)
}

fn entry_to_message(entry: Entry) -> EntryMessage {
    EntryMessage {
        entry_id: entry.entry_id.to_string(),
        account_id: entry.account_id.to_string(),
        r#type: entry.entry_type.as_str().to_owned(),
        amount_cents: entry.amount_cents,
        reservation_id: entry.reservation_id.unwrap_or_default(),
        idempotency_key: entry.idempotency_key,
        expires_at_unix_utc: entry.expires_at_unix.unwrap_or(0),
        metadata_json: entry.metadata_json,
        created_unix_utc: entry.created_at_unix,
    }
}

fn map_to_status(error: &LedgerError) -> Status {
    match error {
        LedgerError::InvalidTenantId(_) => Status::invalid_argument("invalid_tenant_id"),
        LedgerError::InvalidUserId(_) => Status::invalid_argument("invalid_user_id"),
        LedgerError::InvalidLedgerId(_) => Status::invalid_argument("invalid_ledger_id"),
        LedgerError::InvalidReservationId(_) => {
            Status::invalid_argument("invalid_reservation_id")
        }
        LedgerError::InvalidIdempotencyKey(_) => {
            Status::invalid_argument("invalid_idempotency_key")
        }
        LedgerError::InvalidAmountCents(_) => Status::invalid_argument("invalid_amount_cents"),
        LedgerError::InvalidMetadataJson(_) => Status::invalid_argument("invalid_metadata_json"),
        LedgerError::InvalidListLimit(_) => Status::invalid_argument("invalid_list_limit"),
        LedgerError::InsufficientFunds => Status::failed_precondition("insufficient_funds"),
        LedgerError::ReservationClosed => Status::failed_precondition("reservation_closed"),
        LedgerError::UnknownReservation => Status::not_found("unknown_reservation"),
        LedgerError::DuplicateIdempotencyKey => {
            Status::already_exists("duplicate_idempotency_key")
        }
        LedgerError::ReservationExists => Status::already_exists("reservation_exists"),
        LedgerError::InvalidServiceConfig(_) | LedgerError::Store(_) => {
            tracing::error!(error = %error, "internal ledger failure");
            Status::internal("internal_error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn limit_normalization_defaults_and_caps() {
        assert_eq!(normalize_list_limit(0).unwrap(), DEFAULT_LIST_ENTRIES_LIMIT);
        assert_eq!(normalize_list_limit(-7).unwrap(), DEFAULT_LIST_ENTRIES_LIMIT);
        assert_eq!(normalize_list_limit(1).unwrap(), 1);
        assert_eq!(normalize_list_limit(200).unwrap(), 200);

        let over = normalize_list_limit(201).unwrap_err();
        assert_eq!(over.code(), Code::InvalidArgument);
        assert_eq!(over.message(), "invalid_list_limit");
    }

    #[test]
    fn domain_errors_map_to_expected_codes() {
        let cases = [
            (LedgerError::InsufficientFunds, Code::FailedPrecondition, "insufficient_funds"),
            (LedgerError::ReservationClosed, Code::FailedPrecondition, "reservation_closed"),
            (LedgerError::UnknownReservation, Code::NotFound, "unknown_reservation"),
            (
                LedgerError::DuplicateIdempotencyKey,
                Code::AlreadyExists,
                "duplicate_idempotency_key",
            ),
            (LedgerError::ReservationExists, Code::AlreadyExists, "reservation_exists"),
            (
                LedgerError::InvalidUserId("empty value".to_owned()),
                Code::InvalidArgument,
                "invalid_user_id",
            ),
            (
                LedgerError::InvalidAmountCents("capture amount mismatch".to_owned()),
                Code::InvalidArgument,
                "invalid_amount_cents",
            ),
            (
                LedgerError::InvalidMetadataJson("must be valid json".to_owned()),
                Code::InvalidArgument,
                "invalid_metadata_json",
            ),
        ];
        for (error, code, message) in cases {
            let status = map_to_status(&error);
            assert_eq!(status.code(), code, "{error}");
            assert_eq!(status.message(), message, "{error}");
        }
    }

    #[test]
    fn infrastructure_errors_are_opaque() {
        let error = LedgerError::Store(credit_core::OperationError::new(
            "sum_total",
            "acct",
            credit_core::StoreErrorCode::Database,
            "connection refused",
        ));
        let status = map_to_status(&error);
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "internal_error");
    }
}
