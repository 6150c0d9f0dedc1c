//! HTTP server for deskmated

use crate::config::HostConfig;
use crate::routes;
use crate::turn::TurnEngine;
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Application state shared across handlers
pub struct AppState {
    pub engine: Arc<TurnEngine>,
    /// Handed to the embedded pod so it trusts the same origins
    pub host: HostConfig,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(engine: TurnEngine, host: HostConfig) -> Self {
        Self {
            engine: Arc::new(engine),
            host,
            start_time: Instant::now(),
        }
    }
}

/// Full router with tracing, without binding
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::health_routes())
        .merge(routes::host_routes())
        .merge(routes::chat_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server until ctrl-c
pub async fn run(state: AppState, bind: &str, throttle_window: Duration) -> Result<()> {
    let state = Arc::new(state);

    let sweeper = Arc::clone(&state.engine);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(throttle_window.max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            sweeper.throttle().cleanup();
            debug!("Throttle sweep: {} active keys", sweeper.throttle().key_count());
        }
    });

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("  Listening on http://{}", bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;
    Ok(())
}
