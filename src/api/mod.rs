//! HTTP surface of the gateway: `/health` and the `/ws` voice socket

pub mod health;
pub mod websocket;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::session::SessionDeps;
use crate::Result;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Collaborators handed to every new session
    pub deps: SessionDeps,
    sessions: Arc<AtomicUsize>,
}

impl ApiState {
    #[must_use]
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            deps,
            sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sessions currently connected
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }

    /// Count a session for as long as the guard lives
    #[must_use]
    pub fn track_session(&self) -> SessionGuard {
        self.sessions.fetch_add(1, Ordering::Relaxed);
        SessionGuard {
            sessions: Arc::clone(&self.sessions),
        }
    }
}

/// Decrements the active session count on drop
pub struct SessionGuard {
    sessions: Arc<AtomicUsize>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Build the router with all routes
pub fn router(state: Arc<ApiState>) -> Router {
    // Overlays and dashboards connect from arbitrary local origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(health::router(Arc::clone(&state)))
        .merge(websocket::router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    bind: String,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(deps: SessionDeps, server: &ServerConfig) -> Self {
        Self {
            state: Arc::new(ApiState::new(deps)),
            bind: server.bind.clone(),
            port: server.port,
        }
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.bind, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind {addr}: {e}")))?;

        tracing::info!(addr = %addr, "voice gateway listening");

        axum::serve(listener, router(self.state))
            .await
            .map_err(|e| crate::Error::Transport(format!("server error: {e}")))?;

        Ok(())
    }
}
