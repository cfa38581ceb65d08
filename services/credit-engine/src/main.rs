use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dotenv::dotenv;
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

use credit_core::{ClockFn, LedgerService, TracingSink};
use credit_engine::config::Config;
use credit_engine::database::PgStore;
use credit_engine::grpc::proto::credit_service_server::CreditServiceServer;
use credit_engine::grpc::server::CreditGrpcServer;

#[tokio::main]
async fn main() {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .json()
        .init();

    info!("Starting credit engine...");

    let config = Config::from_env().expect("Failed to load configuration");
    config.validate().expect("Invalid configuration");

    let store = PgStore::connect(
        &config.database.url,
        config.database.max_connections,
        config.database.acquire_timeout_secs,
    )
    .await
    .expect("Failed to connect to database");
    store
        .run_migrations()
        .await
        .expect("Failed to run migrations");

    info!("Database connected and migrated");

    let clock: ClockFn = Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_secs() as i64
    });
    let service = Arc::new(
        LedgerService::new(store, Arc::clone(&clock)).with_operation_sink(Arc::new(TracingSink)),
    );
    let grpc = CreditGrpcServer::new(service, clock);

    let listen_addr = config
        .grpc
        .listen_addr
        .parse()
        .expect("Invalid listen address");

    info!("gRPC server listening on {}", listen_addr);

    Server::builder()
        .add_service(CreditServiceServer::new(grpc))
        .serve_with_shutdown(listen_addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .expect("gRPC server failed");
}
