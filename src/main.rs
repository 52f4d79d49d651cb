//! # Voice Session Backend - Main Application Entry Point
//!
//! A WebSocket service for push-to-talk voice conversations. A client streams
//! compressed audio fragments over `/ws`, says "stop", and gets back a
//! transcript, a synthesized spoken reply and a completion marker.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: every connection is served without blocking a thread
//! - **actors**: each WebSocket connection is an actix actor that owns its session
//! - **trait objects**: decoder, recognizer, synthesizer and storage are injected
//!   as `Arc<dyn Trait>` so tests can swap in stubs
//! - **Result<T, E>**: errors are propagated with `?` up to `main`
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, config.toml, environment)
//! - **state**: shared pipeline and metrics
//! - **protocol**: the JSON messages exchanged over the socket
//! - **audio**: session buffer, session state machine, PCM helpers
//! - **adapters**: decoder, transcriber, synthesizer and artifact store
//! - **pipeline**: decode → transcribe → synthesize → encode for one recording
//! - **websocket**: the per-connection actor and the `/ws` upgrade handler
//! - **health / handlers / middleware**: operational HTTP surface
//! - **error**: HTTP error responses and the domain error taxonomy

mod adapters;
mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod pipeline;
mod protocol;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use adapters::{
    ArtifactStore, FallbackSynthesizer, FsArtifactStore, HttpSynthesizer, HttpTranscriber, NoopArtifactStore,
    SymphoniaDecoder, Synthesizer,
};
use anyhow::Result;
use config::AppConfig;
use pipeline::ResponsePipeline;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging**
/// 3. **Builds the speech collaborators once** and shares them with every connection
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** when receiving system signals
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.server.host,
        port = config.server.port,
        idle_timeout_secs = config.session.idle_timeout_secs,
        max_session_bytes = config.session.max_session_bytes,
        "Configuration loaded"
    );

    let pipeline = Arc::new(build_pipeline(&config)?);
    let app_state = AppState::new(config.clone(), pipeline);
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
            // Middleware executes in reverse order of registration
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .route("/", web::get().to(health::welcome))
            .route("/ws", web::get().to(websocket::voice_websocket))
            .route("/health", web::get().to(health::health_check))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config)),
            )
            .default_service(web::route().to(handlers::not_found))
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

/// Construct the decoder, speech adapters and artifact store from configuration.
fn build_pipeline(config: &AppConfig) -> Result<ResponsePipeline> {
    let timeout = Duration::from_secs(config.speech.request_timeout_secs);

    let transcriber = HttpTranscriber::new(&config.speech.transcriber_url, &config.speech.language, timeout)?;
    info!(url = %transcriber.url(), "Speech recognition endpoint configured");

    let primary = HttpSynthesizer::new("primary", &config.speech.synthesizer_url, timeout)?;
    info!(url = %primary.url(), "Speech synthesis endpoint configured");

    let fallback: Option<Arc<dyn Synthesizer>> = match &config.speech.fallback_synthesizer_url {
        Some(url) => {
            let fallback = HttpSynthesizer::new("fallback", url, timeout)?;
            info!(url = %fallback.url(), "Fallback synthesis endpoint configured");
            Some(Arc::new(fallback))
        }
        None => None,
    };

    let store: Arc<dyn ArtifactStore> = if config.storage.enabled {
        let store = FsArtifactStore::new(&config.storage.recordings_dir);
        info!(dir = %store.dir().display(), "Saving session recordings");
        Arc::new(store)
    } else {
        Arc::new(NoopArtifactStore)
    };

    Ok(ResponsePipeline::new(
        Arc::new(SymphoniaDecoder::new()),
        Arc::new(transcriber),
        Arc::new(FallbackSynthesizer::new(Arc::new(primary), fallback)),
        store,
        config.decoder.strategies(),
    ))
}

/// Initialize tracing.
///
/// ## Environment Variables:
/// - `RUST_LOG`: filter directives, e.g. "voice_session_backend=trace"
/// - If not set, defaults to "voice_session_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_session_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Listen for SIGTERM / SIGINT and raise the shutdown flag.
#[cfg(unix)]
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Could not install signal handlers, graceful shutdown disabled");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

#[cfg(not(unix))]
fn setup_signal_handlers() {
    tokio::spawn(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C"),
            Err(e) => {
                warn!(error = %e, "Could not install Ctrl+C handler, graceful shutdown disabled");
                return;
            }
        }
        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
