//! HTTP surface of the tweakcn AI backend.
//!
//! This crate exposes the AI runtime over HTTP.  It includes:
//!
//! - `POST /api/generate-theme`: the tool-augmented theme conversation,
//!   streamed as a UI message stream.
//! - `POST /api/enhance-prompt`: prompt rewriting, streamed word by word.
//! - `GET /api/health`: database and provider status.
//!
//! Every AI route passes through the [`AccessGate`] (session lookup, IP rate
//! limit, subscription quota) before any model is called.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod gate;
pub mod rate_limit;
pub mod server;
pub mod state;
pub mod stream;

pub use config::AppConfig;
pub use error::{ApiError, ApiResult};
pub use gate::AccessGate;
pub use server::{WebServer, router};
pub use state::AppState;

/// Web server configuration.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// The address to bind the HTTP server to.
    pub bind_addr: String,
    /// The port to listen on.
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            port: 3000,
        }
    }
}
