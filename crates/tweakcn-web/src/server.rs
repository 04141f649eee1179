//! Main web server setup and startup.
//!
//! [`WebServer`] composes the Axum router, registers all routes, and serves
//! until ctrl-c.  Shutdown cancels the state's root token, which aborts every
//! in-flight turn before the listener closes.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::Method;
use axum::routing::{get, post};
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::WebConfig;
use crate::api;
use crate::rate_limit::FixedWindowLimiter;
use crate::state::AppState;

/// Build the Axum router with all routes registered.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/api/generate-theme", post(api::generate_theme))
        .route("/api/enhance-prompt", post(api::enhance_prompt))
        .route("/api/health", get(api::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// The tweakcn AI web server.
pub struct WebServer {
    config: WebConfig,
    state: Arc<AppState>,
    limiter: Option<Arc<FixedWindowLimiter>>,
}

impl WebServer {
    /// Create a new web server.
    ///
    /// `limiter` is the in-process rate limiter behind the state's gate, if
    /// any; its expired windows are purged periodically.
    pub fn new(
        config: WebConfig,
        state: Arc<AppState>,
        limiter: Option<Arc<FixedWindowLimiter>>,
    ) -> Self {
        Self {
            config,
            state,
            limiter,
        }
    }

    /// Return the `host:port` string this server will bind to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.bind_addr, self.config.port)
    }

    /// Start the server and block until it is shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot be bound.
    pub async fn start(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = self.addr();
        let shutdown = self.state.shutdown.clone();
        let router = router(Arc::clone(&self.state));

        if let Some(limiter) = self.limiter {
            tokio::spawn(purge_windows(limiter, shutdown.clone()));
        }

        tracing::info!(
            addr = %addr,
            provider = %self.state.provider.provider_name(),
            model = %self.state.provider.model_id(),
            "starting web server"
        );

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "failed to listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
                tracing::info!("shutting down, aborting in-flight turns");
                shutdown.cancel();
            })
            .await?;

        Ok(())
    }
}

/// Drop finished rate-limit windows once per window until shutdown.
async fn purge_windows(
    limiter: Arc<FixedWindowLimiter>,
    shutdown: tokio_util::sync::CancellationToken,
) {
    let period = limiter.window().max(Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {
                limiter.purge_expired(Utc::now().timestamp_millis());
            }
        }
    }
}
