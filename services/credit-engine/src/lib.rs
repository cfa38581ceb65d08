//! Credit engine service crate.
//!
//! Hosts the credit ledger engine from `credit-core` behind a gRPC
//! surface, persisting to PostgreSQL. The domain logic lives in the core
//! crate; this crate contributes the SQL store adapter, the RPC adapter,
//! configuration, and the process bootstrap.

#![forbid(unsafe_code)]

pub mod config;
pub mod database;
pub mod grpc;

pub use config::Config;
pub use database::PgStore;
