//! Durable writer process: consumes the event log and persists issuance
//! history into Postgres.
//!
//! Exit codes: 0 clean shutdown, 1 fatal startup error, 2 configuration
//! error.

use couponing::config::Config;
use couponing::db::CouponDatabase;
use couponing::writer::DurableWriter;
use std::process::ExitCode;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "couponing=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting durable writer");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::from(2);
        }
    };

    let db = match CouponDatabase::connect(&config.postgres).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "database unreachable");
            return ExitCode::from(1);
        }
    };
    if let Err(e) = db.migrate().await {
        error!(error = %e, "schema migration failed");
        return ExitCode::from(1);
    }

    let writer = match DurableWriter::new(&config.kafka, db) {
        Ok(writer) => writer,
        Err(e) => {
            error!(error = %e, "failed to create consumer");
            return ExitCode::from(1);
        }
    };

    tokio::select! {
        () = writer.run() => {
            error!("consumer loop ended unexpectedly");
            ExitCode::from(1)
        }
        () = shutdown_signal() => {
            info!("durable writer stopped");
            ExitCode::SUCCESS
        }
    }
}

/// Graceful shutdown on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
