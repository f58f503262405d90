//! # Audio Socket Relay - Main Application Entry Point
//!
//! Starts the Actix-web server hosting the `/ws` streaming endpoint, the health and
//! metrics endpoints and the embedded browser client.
//!
//! ## Startup:
//! 1. **Loads configuration** from `.env`, `config.toml` and `APP_` environment variables
//! 2. **Sets up logging** with `tracing` (`RUST_LOG` overrides the default filter)
//! 3. **Builds shared state**: registry, transcription backend, chunk pipeline
//! 4. **Serves** until SIGINT/SIGTERM, then stops gracefully

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use audio_socket_relay::{middleware, routes, AppConfig, AppState};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once a shutdown signal has been received.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    // it's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!(
        backend = %config.transcription.backend,
        unknown_format_policy = %config.audio.unknown_format_policy,
        max_connections = config.performance.max_connections,
        "Configuration loaded"
    );
    for warning in config.startup_warnings() {
        warn!("{}", warning);
    }

    let app_state = web::Data::new(AppState::new(config.clone())?);
    let bind_addr = config.bind_address();

    setup_signal_handlers()?;

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .configure(routes::configure)
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` wins; otherwise debug for this crate and info for actix.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audio_socket_relay=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Flip [`SHUTDOWN_SIGNAL`] on SIGTERM or SIGINT.
fn setup_signal_handlers() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });

    Ok(())
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
