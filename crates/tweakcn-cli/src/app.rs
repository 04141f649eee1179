//! Startup wiring: turns a resolved [`AppConfig`] into shared server state.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tweakcn_ai::{
    EnhanceTurn, LanguageModel, LlmClient, Observability, ThemeSchema, ThemeTool, ThemeTurn,
    ToolRegistry,
};
use tweakcn_store::{Database, UsageStore};
use tweakcn_web::auth::{AnonymousSessions, RemoteSessionResolver, SessionResolver};
use tweakcn_web::rate_limit::FixedWindowLimiter;
use tweakcn_web::{AccessGate, AppConfig, AppState};

/// Build the state every handler shares, plus the rate limiter so the
/// server can purge it.
pub async fn build_state(
    config: &AppConfig,
) -> Result<(Arc<AppState>, Arc<FixedWindowLimiter>)> {
    let db = Database::open_and_migrate(config.database_path.clone())
        .await
        .context("failed to open database")?;
    info!(path = %config.database_path.display(), "store initialized");
    let usage = Arc::new(UsageStore::new(db.clone(), config.free_request_limit));

    let provider = Arc::new(config.ai.provider.clone());
    let observability = Observability::new(config.ai.tracing, config.ai.env);

    let client = LlmClient::new(config.ai.request_timeout).context("failed to build LLM client")?;
    let model: Arc<dyn LanguageModel> = observability.wrap(Arc::new(client));

    let schema = Arc::new(ThemeSchema::new().context("failed to compile theme schema")?);
    let tools = ToolRegistry::new().with(Arc::new(ThemeTool::new(
        Arc::clone(&model),
        Arc::clone(&provider),
        observability,
        schema,
    )));
    info!(tools = tools.len(), "tools registered");

    let theme = ThemeTurn::new(
        Arc::clone(&model),
        Arc::clone(&provider),
        observability,
        tools,
    )
    .with_ledger(usage.clone());
    let enhance = EnhanceTurn::new(model, Arc::clone(&provider), observability);

    let sessions: Arc<dyn SessionResolver> = match &config.auth_session_url {
        Some(url) => {
            info!(url = %url, "resolving sessions remotely");
            Arc::new(RemoteSessionResolver::new(url.clone()))
        }
        None => {
            tracing::warn!("AUTH_SESSION_URL is not set, every caller is anonymous");
            Arc::new(AnonymousSessions)
        }
    };
    let limiter = Arc::new(FixedWindowLimiter::from_config(&config.rate_limit));
    let gate = AccessGate::new(sessions, limiter.clone(), usage, config.ai.env);

    let state = Arc::new(AppState {
        theme,
        enhance,
        gate,
        provider,
        db,
        shutdown: CancellationToken::new(),
    });
    Ok((state, limiter))
}
