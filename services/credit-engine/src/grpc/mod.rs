//! gRPC surface for the credit ledger.

pub mod server;

/// Generated protobuf types for `credit.v1`.
pub mod proto {
    tonic::include_proto!("credit.v1");
}
