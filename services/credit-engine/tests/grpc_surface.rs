//! End-to-end tests of the gRPC adapter over the in-memory store.
//!
//! These call the generated service trait directly, exercising request
//! decoding, engine dispatch, and status mapping without a network or a
//! database.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tonic::{Code, Request};

use credit_core::{ClockFn, LedgerService, MemoryStore};
use credit_engine::grpc::proto::credit_service_server::CreditService;
use credit_engine::grpc::proto::{
    BalanceRequest, CaptureRequest, GrantRequest, ListEntriesRequest, ReleaseRequest,
    ReserveRequest, SpendRequest,
};
use credit_engine::grpc::server::CreditGrpcServer;

const TENANT: &str = "acme";
const USER: &str = "u1";
const LEDGER: &str = "main";

fn server_at(start: i64) -> (CreditGrpcServer<MemoryStore>, Arc<AtomicI64>) {
    let now = Arc::new(AtomicI64::new(start));
    let handle = Arc::clone(&now);
    let clock: ClockFn = Arc::new(move || now.load(Ordering::SeqCst));
    let service = Arc::new(LedgerService::new(MemoryStore::new(), Arc::clone(&clock)));
    (CreditGrpcServer::new(service, clock), handle)
}

fn server() -> CreditGrpcServer<MemoryStore> {
    server_at(1000).0
}

fn grant_request(amount_cents: i64, key: &str) -> GrantRequest {
    GrantRequest {
        tenant_id: TENANT.to_owned(),
        user_id: USER.to_owned(),
        ledger_id: LEDGER.to_owned(),
        amount_cents,
        idempotency_key: key.to_owned(),
        expires_at_unix_utc: 0,
        metadata_json: String::new(),
    }
}

fn spend_request(amount_cents: i64, key: &str) -> SpendRequest {
    SpendRequest {
        tenant_id: TENANT.to_owned(),
        user_id: USER.to_owned(),
        ledger_id: LEDGER.to_owned(),
        amount_cents,
        idempotency_key: key.to_owned(),
        metadata_json: String::new(),
    }
}

fn reserve_request(amount_cents: i64, reservation: &str, key: &str) -> ReserveRequest {
    ReserveRequest {
        tenant_id: TENANT.to_owned(),
        user_id: USER.to_owned(),
        ledger_id: LEDGER.to_owned(),
        amount_cents,
        reservation_id: reservation.to_owned(),
        idempotency_key: key.to_owned(),
        metadata_json: String::new(),
    }
}

fn capture_request(amount_cents: i64, reservation: &str, key: &str) -> CaptureRequest {
    CaptureRequest {
        tenant_id: TENANT.to_owned(),
        user_id: USER.to_owned(),
        ledger_id: LEDGER.to_owned(),
        reservation_id: reservation.to_owned(),
        idempotency_key: key.to_owned(),
        amount_cents,
        metadata_json: String::new(),
    }
}

fn balance_request() -> BalanceRequest {
    BalanceRequest {
        tenant_id: TENANT.to_owned(),
        user_id: USER.to_owned(),
        ledger_id: LEDGER.to_owned(),
    }
}

async fn balance_of(server: &CreditGrpcServer<MemoryStore>) -> (i64, i64) {
    let response = server
        .get_balance(Request::new(balance_request()))
        .await
        .unwrap()
        .into_inner();
    (response.total_cents, response.available_cents)
}

#[tokio::test]
async fn grant_spend_and_retry_over_rpc() {
    let server = server();

    server
        .grant(Request::new(grant_request(2000, "boot:u1")))
        .await
        .unwrap();
    assert_eq!(balance_of(&server).await, (2000, 2000));

    server
        .spend(Request::new(spend_request(500, "s1")))
        .await
        .unwrap();
    assert_eq!(balance_of(&server).await, (1500, 1500));

    let retry = server
        .spend(Request::new(spend_request(500, "s1")))
        .await
        .unwrap_err();
    assert_eq!(retry.code(), Code::AlreadyExists);
    assert_eq!(retry.message(), "duplicate_idempotency_key");
    assert_eq!(balance_of(&server).await, (1500, 1500));
}

#[tokio::test]
async fn insufficient_funds_is_failed_precondition() {
    let server = server();

    server
        .grant(Request::new(grant_request(1000, "g1")))
        .await
        .unwrap();
    let status = server
        .spend(Request::new(spend_request(1500, "s2")))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::FailedPrecondition);
    assert_eq!(status.message(), "insufficient_funds");
    assert_eq!(balance_of(&server).await, (1000, 1000));
}

#[tokio::test]
async fn reserve_capture_flow_over_rpc() {
    let server = server();

    server
        .grant(Request::new(grant_request(1000, "g1")))
        .await
        .unwrap();
    server
        .reserve(Request::new(reserve_request(300, "r1", "h1")))
        .await
        .unwrap();
    assert_eq!(balance_of(&server).await, (1000, 700));

    server
        .capture(Request::new(capture_request(300, "r1", "c1")))
        .await
        .unwrap();
    assert_eq!(balance_of(&server).await, (700, 700));

    let closed = server
        .capture(Request::new(capture_request(300, "r1", "c2")))
        .await
        .unwrap_err();
    assert_eq!(closed.code(), Code::FailedPrecondition);
    assert_eq!(closed.message(), "reservation_closed");

    let entries = server
        .list_entries(Request::new(ListEntriesRequest {
            tenant_id: TENANT.to_owned(),
            user_id: USER.to_owned(),
            ledger_id: LEDGER.to_owned(),
            before_unix_utc: 2000,
            limit: 0,
        }))
        .await
        .unwrap()
        .into_inner()
        .entries;

    let mut keyed: Vec<(String, String, i64)> = entries
        .iter()
        .map(|entry| {
            (
                entry.idempotency_key.clone(),
                entry.r#type.clone(),
                entry.amount_cents,
            )
        })
        .collect();
    keyed.sort();
    assert_eq!(
        keyed,
        vec![
            ("c1:reverse".to_owned(), "reverse_hold".to_owned(), 300),
            ("c1:spend".to_owned(), "spend".to_owned(), -300),
            ("g1".to_owned(), "grant".to_owned(), 1000),
            ("h1".to_owned(), "hold".to_owned(), -300),
        ]
    );
}

#[tokio::test]
async fn release_restores_available_over_rpc() {
    let server = server();

    server
        .grant(Request::new(grant_request(1000, "g1")))
        .await
        .unwrap();
    server
        .reserve(Request::new(reserve_request(400, "r2", "h2")))
        .await
        .unwrap();
    assert_eq!(balance_of(&server).await, (1000, 600));

    server
        .release(Request::new(ReleaseRequest {
            tenant_id: TENANT.to_owned(),
            user_id: USER.to_owned(),
            ledger_id: LEDGER.to_owned(),
            reservation_id: "r2".to_owned(),
            idempotency_key: "rel2".to_owned(),
            metadata_json: String::new(),
        }))
        .await
        .unwrap();
    assert_eq!(balance_of(&server).await, (1000, 1000));
}

#[tokio::test]
async fn capture_amount_mismatch_is_invalid_argument() {
    let server = server();

    server
        .grant(Request::new(grant_request(1000, "g1")))
        .await
        .unwrap();
    server
        .reserve(Request::new(reserve_request(400, "r3", "h3")))
        .await
        .unwrap();

    let mismatch = server
        .capture(Request::new(capture_request(100, "r3", "c3")))
        .await
        .unwrap_err();
    assert_eq!(mismatch.code(), Code::InvalidArgument);
    assert_eq!(mismatch.message(), "invalid_amount_cents");

    // Reservation still active, hold still in force.
    assert_eq!(balance_of(&server).await, (1000, 600));
}

#[tokio::test]
async fn unknown_reservation_is_not_found() {
    let server = server();
    let status = server
        .capture(Request::new(capture_request(100, "ghost", "c1")))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
    assert_eq!(status.message(), "unknown_reservation");
}

#[tokio::test]
async fn duplicate_reservation_is_already_exists() {
    let server = server();
    server
        .grant(Request::new(grant_request(1000, "g1")))
        .await
        .unwrap();
    server
        .reserve(Request::new(reserve_request(100, "r1", "h1")))
        .await
        .unwrap();
    let duplicate = server
        .reserve(Request::new(reserve_request(100, "r1", "h2")))
        .await
        .unwrap_err();
    assert_eq!(duplicate.code(), Code::AlreadyExists);
    assert_eq!(duplicate.message(), "reservation_exists");
}

#[tokio::test]
async fn invalid_request_fields_are_invalid_argument() {
    let server = server();

    let blank_user = server
        .get_balance(Request::new(BalanceRequest {
            tenant_id: TENANT.to_owned(),
            user_id: "   ".to_owned(),
            ledger_id: LEDGER.to_owned(),
        }))
        .await
        .unwrap_err();
    assert_eq!(blank_user.code(), Code::InvalidArgument);
    assert_eq!(blank_user.message(), "invalid_user_id");

    let zero_amount = server
        .grant(Request::new(grant_request(0, "g1")))
        .await
        .unwrap_err();
    assert_eq!(zero_amount.code(), Code::InvalidArgument);
    assert_eq!(zero_amount.message(), "invalid_amount_cents");

    let mut bad_metadata = grant_request(100, "g2");
    bad_metadata.metadata_json = "{not json".to_owned();
    let status = server.grant(Request::new(bad_metadata)).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(status.message(), "invalid_metadata_json");
}

#[tokio::test]
async fn grant_expiry_is_respected_over_rpc() {
    let (server, now) = server_at(1000);

    let mut request = grant_request(1000, "g1");
    request.expires_at_unix_utc = 1500;
    server.grant(Request::new(request)).await.unwrap();

    now.store(1400, Ordering::SeqCst);
    assert_eq!(balance_of(&server).await, (1000, 1000));

    now.store(1600, Ordering::SeqCst);
    assert_eq!(balance_of(&server).await, (0, 0));
}

#[tokio::test]
async fn list_limit_above_maximum_is_rejected() {
    let server = server();
    let status = server
        .list_entries(Request::new(ListEntriesRequest {
            tenant_id: TENANT.to_owned(),
            user_id: USER.to_owned(),
            ledger_id: LEDGER.to_owned(),
            before_unix_utc: 0,
            limit: 201,
        }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(status.message(), "invalid_list_limit");
}

#[tokio::test]
async fn zero_cutoff_defaults_to_the_current_clock() {
    let (server, now) = server_at(1000);

    server
        .grant(Request::new(grant_request(100, "g1")))
        .await
        .unwrap();

    // Entries are listed strictly before the cutoff; at clock == creation
    // time nothing qualifies yet.
    let at_creation = server
        .list_entries(Request::new(ListEntriesRequest {
            tenant_id: TENANT.to_owned(),
            user_id: USER.to_owned(),
            ledger_id: LEDGER.to_owned(),
            before_unix_utc: 0,
            limit: 0,
        }))
        .await
        .unwrap()
        .into_inner()
        .entries;
    assert!(at_creation.is_empty());

    now.store(1001, Ordering::SeqCst);
    let later = server
        .list_entries(Request::new(ListEntriesRequest {
            tenant_id: TENANT.to_owned(),
            user_id: USER.to_owned(),
            ledger_id: LEDGER.to_owned(),
            before_unix_utc: 0,
            limit: 0,
        }))
        .await
        .unwrap()
        .into_inner()
        .entries;
    assert_eq!(later.len(), 1);
    assert_eq!(later[0].idempotency_key, "g1");
    assert_eq!(later[0].expires_at_unix_utc, 0);
    assert_eq!(later[0].created_unix_utc, 1000);
}
