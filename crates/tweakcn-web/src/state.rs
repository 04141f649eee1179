//! Shared application state for the web server.
//!
//! [`AppState`] is built once at startup, wrapped in an `Arc` and shared by
//! every handler.  The model behind both turns has already been wrapped by
//! the observability layer, so handlers never decide about tracing.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tweakcn_ai::{EnhanceTurn, ProviderConfig, ThemeTurn};
use tweakcn_store::Database;

use crate::gate::AccessGate;

/// Shared state accessible from every Axum handler.
#[derive(Clone)]
pub struct AppState {
    /// Tool-augmented theme conversation.
    pub theme: ThemeTurn,

    /// Prompt enhancement.
    pub enhance: EnhanceTurn,

    /// Session, rate-limit and subscription checks.
    pub gate: AccessGate,

    /// The provider/model every call is made against.
    pub provider: Arc<ProviderConfig>,

    /// Database handle, used for health checks.
    pub db: Database,

    /// Cancelled on shutdown.  Every request's token is a child of it.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// A fresh cancellation token for one request.
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}
