//! # Voice Relay Backend - Main Application Entry Point
//!
//! Entry point for the voice-relay server: browser audio arrives over a
//! WebSocket, is buffered and segmented by voice activity, transcribed,
//! answered by a language model, synthesized back to audio, and streamed to
//! the client.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML file + environment variables)
//! - **state**: shared metrics and runtime configuration
//! - **audio**: voice-activity classification and utterance segmentation
//! - **session**: per-connection state and the connection registry
//! - **services**: the external transcribe/respond/synthesize collaborators
//! - **relay**: the pipeline driver connecting all of the above
//! - **websocket**: one actor per connected client
//! - **health / handlers / middleware**: the HTTP operational surface
//!
//! All collaborators are constructed once here and injected explicitly, so
//! every seam can be substituted with a test double.

mod audio;      // Voice-activity classification and segmentation
mod config;     // Configuration management (config.rs)
mod error;      // Error handling types (error.rs)
mod handlers;   // HTTP request handlers (handlers/ directory)
mod health;     // Health check endpoints (health.rs)
mod middleware; // Custom middleware (middleware/ directory)
mod protocol;   // WebSocket message envelope
mod relay;      // Pipeline driver
mod services;   // External collaborators
mod session;    // Session state and connection registry
mod state;      // Application state management (state.rs)
mod websocket;  // WebSocket connection actor

use crate::audio::classifier::EnergyClassifier;
use crate::relay::RelayPipeline;
use crate::services::{HttpResponder, HttpSynthesizer, HttpTranscriber};
use crate::session::registry::ConnectionRegistry;
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal, set by the signal handlers and polled by main.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging**
/// 3. **Validates configuration** — an invalid configuration is fatal, and
///    the error lists every violation found
/// 4. **Builds the dependency graph**: classifier → registry → collaborators
///    → pipeline, each constructed once and shared
/// 5. **Runs the HTTP server** with the WebSocket and REST routes
/// 6. **Handles graceful shutdown** on SIGTERM/SIGINT
#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let config = AppConfig::load()?;
    init_tracing(&config)?;

    // Fatal on invalid configuration; the error enumerates every violation.
    if let Err(err) = config.validate() {
        error!("{}", err);
        return Err(err);
    }

    info!("Starting voice-relay-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{}, {}Hz audio, {}ms frames",
        config.server.host,
        config.server.port,
        config.audio.sample_rate,
        config.audio.frame_duration_ms
    );

    // Dependency construction: everything the pipeline needs is built once
    // and injected, never reached for globally.
    let app_state = AppState::new(config.clone());
    let classifier = Arc::new(EnergyClassifier::new(config.audio.frame_bytes()));
    let registry = Arc::new(ConnectionRegistry::new(config.audio.clone(), classifier));
    let relay = Arc::new(RelayPipeline::new(
        registry.clone(),
        Arc::new(HttpTranscriber::new(&config.services, &config.audio)),
        Arc::new(HttpResponder::new(&config.services)),
        Arc::new(HttpSynthesizer::new(&config.services, &config.audio)),
        app_state.clone(),
    ));

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::from(registry.clone()))
            .app_data(web::Data::from(relay.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            // The voice transport
            .route("/ws", web::get().to(websocket::voice_websocket))
            // Operational REST surface
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config)),
            )
            // Also provide health check at root level for convenience
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Wait for either the server to finish OR a shutdown signal.
    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
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

/// Initialize the tracing system.
///
/// ## Environment Variables:
/// `RUST_LOG` wins when set. Otherwise the default level comes from the
/// configuration, bumped to `debug` when the debug flag is on.
fn init_tracing(config: &AppConfig) -> Result<()> {
    let level = if config.server.debug {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let default_filter = format!("voice_relay_backend={},actix_web=info", level);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Install SIGTERM/SIGINT handlers that flip the global shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag without busy-waiting.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
