//! HTTP and websocket server for the satellite feed

pub mod state;
pub mod ws;

use axum::extract::State;
use axum::http::HeaderValue;
use axum::{routing::get, Json, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::timeout;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::TrackerConfig;
use crate::error::{Error, Result};
use crate::session::ShutdownOutcome;
use state::AppState;

/// Satellite feed server
pub struct TrackerServer {
    config: TrackerConfig,
    state: AppState,
}

impl TrackerServer {
    /// Create a new server, running startup loading
    pub async fn new(config: TrackerConfig) -> Result<Self> {
        let state = AppState::new(config.clone()).await?;
        Ok(Self { config, state })
    }

    /// Create a server around prepared state
    pub fn with_state(state: AppState) -> Self {
        Self {
            config: state.config().clone(),
            state,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness))
            .route("/api/info", get(info))
            .route("/ws", get(ws::ws_upgrade))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(self.cors_layer())
    }

    fn cors_layer(&self) -> CorsLayer {
        let origins = &self.config.server.allowed_origins;
        if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
            return CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
        }

        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                    None
                }
            })
            .collect();
        CorsLayer::new()
            .allow_origin(parsed)
            .allow_methods(Any)
            .allow_headers(Any)
    }

    /// Start the server and run until SIGTERM/SIGINT, then drain
    pub async fn start(self) -> Result<ShutdownOutcome> {
        self.start_with_shutdown(shutdown_signal()).await
    }

    /// Start the server and run until `signal` resolves, then drain
    pub async fn start_with_shutdown<F>(self, signal: F) -> Result<ShutdownOutcome>
    where
        F: Future<Output = ()> + Send,
    {
        let addr: SocketAddr = self
            .address()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("Failed to bind: {}", e)))?;

        tracing::info!("Starting satellite feed on http://{}", addr);
        tracing::info!("Push channel: ws://{}/ws", addr);

        self.serve(listener, signal).await
    }

    /// Serve on an already bound listener
    ///
    /// On `signal`: stop accepting sessions, disconnect the live ones and give everything the
    /// configured grace period before aborting.
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> Result<ShutdownOutcome>
    where
        F: Future<Output = ()> + Send,
    {
        let router = self.build_router();
        let (trigger, mut triggered) = watch::channel(false);

        let mut server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = triggered.wait_for(|stop| *stop).await;
                })
                .await
        });

        tokio::select! {
            _ = signal => {}
            result = &mut server => {
                return match result {
                    Ok(Ok(())) => Ok(ShutdownOutcome::Graceful),
                    Ok(Err(e)) => Err(Error::Internal(format!("Server error: {}", e))),
                    Err(e) => Err(Error::Internal(format!("Server task failed: {}", e))),
                };
            }
        }

        tracing::info!("Shutdown requested, draining sessions");
        let started = Instant::now();
        let grace = self.config.scheduler.shutdown_grace();
        self.state.set_ready(false);
        let _ = trigger.send(true);

        let outcome = self.state.sessions().shutdown(grace).await;

        let remaining = grace.saturating_sub(started.elapsed());
        match timeout(remaining, &mut server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::error!("Server error during shutdown: {}", e),
            Ok(Err(e)) => tracing::error!("Server task failed during shutdown: {}", e),
            Err(_) => {
                tracing::warn!("HTTP server did not stop within the grace period");
                server.abort();
                return Ok(ShutdownOutcome::Forced(0));
            }
        }

        tracing::info!("Shutdown complete ({:?})", outcome);
        Ok(outcome)
    }

    /// Get the server address
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }
}

/// Resolves on SIGTERM or SIGINT
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                    _ = sigint.recv() => tracing::info!("Received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("Failed to register signal handlers ({}), falling back to Ctrl-C", e);
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl-C");
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Readiness check endpoint
async fn readiness(State(state): State<AppState>) -> Result<&'static str> {
    if state.is_ready() {
        Ok("READY")
    } else if state.sessions().is_accepting() {
        Err(Error::unavailable("feed state is still loading"))
    } else {
        Err(Error::unavailable("shutting down"))
    }
}

/// Feed info endpoint
async fn info(State(state): State<AppState>) -> Json<serde_json::Value> {
    let engine = state.engine();
    let catalog = engine.catalog().snapshot();

    Json(serde_json::json!({
        "name": "sat-tracker",
        "version": env!("CARGO_PKG_VERSION"),
        "catalog": {
            "source": catalog.source().map(|path| path.display().to_string()),
            "records": catalog.len(),
        },
        "facilities": engine.facilities().len(),
        "observer": engine.observer().map(|observer| *observer.location()),
        "sessions": state.sessions().len(),
        "events": {
            "server": crate::types::event::SATELLITE_UPDATE,
            "client": crate::types::event::VIEWPORT_UPDATE,
        }
    }))
}
