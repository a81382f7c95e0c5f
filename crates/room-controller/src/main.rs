//! Room Controller
//!
//! Entry point for the Hearth live audio rooms platform. Serves the REST
//! room API, WebSocket fan-out, and media signaling relay from one process.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Install Prometheus metrics recorder
//! 3. Connect the Postgres pool (rooms from before a restart are pulled back
//!    into the registry lazily, on first lookup)
//! 4. Spawn the connection hub task
//! 5. Spawn the temporary-room expiry sweeper
//! 6. Bind the HTTP/WebSocket listener and flip readiness
//! 7. Wait for shutdown signal, then cancel the root token and join tasks

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // startup orchestration reads better unsplit

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use room_controller::config::Config;
use room_controller::hub::ConnectionHub;
use room_controller::observability::{init_metrics_recorder, HealthState};
use room_controller::policy::{AccessPolicy, AllowAll};
use room_controller::registry::RoomRegistry;
use room_controller::routes::{self, AppState};
use room_controller::signaling::{SignalingRelay, StaticDescriptorEndpoint};
use room_controller::storage::{PgRoomStore, RoomStore};
use room_controller::tasks::start_room_sweeper;
use secrecy::ExposeSecret;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Server-side statement timeout appended to the connection URL.
const QUERY_TIMEOUT_SECS: u32 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    info!("Starting Room Controller");

    let config = Config::from_env().map_err(|e| {
        error!(error = %e, "configuration rejected");
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        room_ttl_secs = config.room_ttl.as_secs(),
        sweep_interval_secs = config.sweep_interval.as_secs(),
        pong_timeout_secs = config.pong_timeout.as_secs(),
        outbound_queue = config.outbound_queue,
        max_message_bytes = config.max_message_bytes,
        mixer_descriptor_set = config.mixer_descriptor.is_some(),
        "Configuration loaded successfully"
    );

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, bind_address = %config.bind_address, "invalid bind address");
        e
    })?;

    // Recorder first: everything after this line may record.
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Prometheus recorder install failed");
        e
    })?;

    let health_state = Arc::new(HealthState::new());

    let db_pool = connect_pool(&config).await.map_err(|e| {
        error!(error = %e, "database connection failed");
        e
    })?;
    info!("Database connection established");

    let store: Arc<dyn RoomStore> = Arc::new(PgRoomStore::new(db_pool));
    let policy: Arc<dyn AccessPolicy> = Arc::new(AllowAll);
    let registry = Arc::new(RoomRegistry::new(Arc::clone(&store), Arc::clone(&policy)));
    info!("Room registry initialized");

    // Root cancellation token: cancelling it stops the hub, the sweeper,
    // and every in-flight connection session
    let shutdown_token = CancellationToken::new();

    let (hub, hub_task) = ConnectionHub::spawn(
        config.outbound_queue,
        config.drain_timeout,
        shutdown_token.child_token(),
    );
    info!("Connection hub started");

    let relay = Arc::new(SignalingRelay::new(Arc::new(StaticDescriptorEndpoint::new(
        config.mixer_descriptor.clone(),
    ))));

    let sweeper_task = tokio::spawn(start_room_sweeper(
        Arc::clone(&registry),
        hub.clone(),
        config.room_ttl,
        config.sweep_interval,
        shutdown_token.child_token(),
    ));
    info!("Room sweeper started");

    let state = Arc::new(AppState {
        config,
        registry,
        hub,
        relay,
        store,
        policy,
        health: Arc::clone(&health_state),
    });
    let app = routes::build_routes(state, metrics_handle);

    // Bind before flipping readiness, so a bind failure never looks ready.
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind server");
        e
    })?;

    health_state.set_ready();
    info!("Room Controller listening on {}", addr);

    let serve_shutdown_token = shutdown_token.clone();
    let serve_health = Arc::clone(&health_state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Stop advertising readiness before tearing anything down, then
            // cancel the root token. Cancellation closes every live
            // WebSocket session, which lets the connection drain complete.
            serve_health.set_not_ready();
            serve_shutdown_token.cancel();
        })
        .await?;

    // Join background tasks; the hub drains in-flight writes before exiting
    info!("Waiting for background tasks to stop...");
    if let Err(e) = hub_task.await {
        warn!(error = %e, "Connection hub task join error");
    }
    if let Err(e) = sweeper_task.await {
        warn!(error = %e, "Room sweeper task join error");
    }

    info!("Room Controller shutdown complete");

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Open the Postgres pool. The URL gains a server-side statement timeout so
/// a wedged query cannot hold a pool slot forever; sizing assumes a single
/// controller instance serving interactive traffic.
async fn connect_pool(config: &Config) -> Result<PgPool, sqlx::Error> {
    let url = add_query_timeout(config.database_url.expose_secret(), QUERY_TIMEOUT_SECS);
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&url)
        .await
}

/// Resolves when SIGINT or SIGTERM arrives.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("SIGINT received, starting graceful shutdown"),
                _ = sigterm.recv() => info!("SIGTERM received, starting graceful shutdown"),
            }
        }
        Err(err) => {
            error!(error = %err, "cannot watch SIGTERM, falling back to SIGINT only");
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("SIGINT received, starting graceful shutdown"),
                Err(err) => error!(error = %err, "signal handler failed, shutting down"),
            }
        }
    }
}

/// Resolves when Ctrl-C arrives. Non-unix targets have no SIGTERM.
#[cfg(not(unix))]
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("SIGINT received, starting graceful shutdown"),
        Err(err) => error!(error = %err, "signal handler failed, shutting down"),
    }
}

/// Append a `statement_timeout` to the connection URL so no query can run
/// unbounded on the server side.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}options=-c%20statement_timeout%3D{}s",
        url, separator, timeout_secs
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_add_query_timeout_picks_the_separator() {
        assert_eq!(
            add_query_timeout("postgres://localhost/hearth", 5),
            "postgres://localhost/hearth?options=-c%20statement_timeout%3D5s"
        );
        assert_eq!(
            add_query_timeout("postgres://localhost/hearth?sslmode=require", 5),
            "postgres://localhost/hearth?sslmode=require&options=-c%20statement_timeout%3D5s"
        );
    }
}
