//! Coupon issuance HTTP server.
//!
//! Exit codes: 0 clean shutdown, 1 fatal startup error (store, log or
//! database unreachable at init), 2 configuration error.

use couponing::config::Config;
use couponing::db::CouponDatabase;
use couponing::producer::KafkaLogProducer;
use couponing::server::{build_router, AppState};
use couponing::store::RedisDecisionStore;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "couponing=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting coupon issuance server");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::from(2);
        }
    };
    info!(
        redis_url = %config.redis.url,
        kafka_brokers = %config.kafka.brokers,
        topic = %config.kafka.topic,
        "configuration loaded"
    );

    let store = match RedisDecisionStore::connect(&config.redis.url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "decision store unreachable");
            return ExitCode::from(1);
        }
    };

    let producer = match KafkaLogProducer::new(&config.kafka) {
        Ok(producer) => Arc::new(producer),
        Err(e) => {
            error!(error = %e, "event log producer could not be created");
            return ExitCode::from(1);
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

    let state = AppState::new(store, producer, db, &config.issuance);
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(address = %addr, error = %e, "failed to bind");
            return ExitCode::from(1);
        }
    };
    info!(address = %addr, "server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        return ExitCode::from(1);
    }

    info!("server stopped");
    ExitCode::SUCCESS
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
