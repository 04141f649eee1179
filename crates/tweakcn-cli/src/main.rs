//! CLI entry point for the tweakcn AI backend.
//!
//! This binary provides the `tweakcn` command with subcommands for serving
//! the AI routes, checking the resolved configuration, and managing
//! subscriptions in the local usage store.

mod app;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tweakcn_store::{Database, UsageStore};
use tweakcn_web::{AppConfig, WebConfig, WebServer};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// tweakcn AI backend.
#[derive(Parser)]
#[command(
    name = "tweakcn",
    version,
    about = "tweakcn AI backend: streamed theme generation and prompt enhancement"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve {
        /// Address to bind.
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,

        /// Port to listen on.
        #[arg(long, default_value_t = 3000)]
        port: u16,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },

    /// Resolve the configuration and print it, failing on errors.
    Config,

    /// Manage subscriptions in the local usage store.
    Subscription {
        #[command(subcommand)]
        action: SubscriptionAction,
    },
}

#[derive(Subcommand)]
enum SubscriptionAction {
    /// Give a user unlimited AI requests.
    Grant {
        user_id: String,

        /// Subscription length in days.  Open-ended when omitted.
        #[arg(long)]
        days: Option<i64>,
    },

    /// Cancel a user's subscription.
    Revoke { user_id: String },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal in production.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            port,
            log_json,
        } => {
            init_tracing("info", log_json);
            cmd_serve(WebConfig {
                bind_addr: bind,
                port,
            })
            .await
        }
        Commands::Config => {
            init_tracing("warn", false);
            cmd_config()
        }
        Commands::Subscription { action } => {
            init_tracing("warn", false);
            cmd_subscription(action).await
        }
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn cmd_serve(web: WebConfig) -> Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    info!(
        provider = %config.ai.provider.provider_name(),
        model = %config.ai.provider.model_id(),
        env = %config.ai.env,
        tracing = config.ai.tracing,
        "configuration resolved"
    );

    let (state, limiter) = app::build_state(&config).await?;
    WebServer::new(web, state, Some(limiter))
        .start()
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("web server failed")
}

fn cmd_config() -> Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;

    println!();
    println!("  tweakcn AI v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("  Provider:         {}", config.ai.provider.provider_name());
    println!("  Model:            {}", config.ai.provider.model_id());
    println!("  Environment:      {}", config.ai.env);
    println!("  Tracing:          {}", config.ai.tracing);
    println!(
        "  Request timeout:  {}s",
        config.ai.request_timeout.as_secs()
    );
    println!(
        "  Rate limit:       {} per {}s",
        config.rate_limit.requests,
        config.rate_limit.window.as_secs()
    );
    println!("  Free requests:    {} per month", config.free_request_limit);
    println!("  Database:         {}", config.database_path.display());
    println!(
        "  Session endpoint: {}",
        config.auth_session_url.as_deref().unwrap_or("(none, all callers anonymous)")
    );
    println!();

    Ok(())
}

async fn cmd_subscription(action: SubscriptionAction) -> Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    let db = Database::open_and_migrate(config.database_path.clone())
        .await
        .context("failed to open database")?;
    let store = UsageStore::new(db, config.free_request_limit);

    match action {
        SubscriptionAction::Grant { user_id, days } => {
            let expires_at = days.map(|d| Utc::now() + ChronoDuration::days(d));
            store
                .grant_subscription(&user_id, expires_at)
                .await
                .context("failed to grant subscription")?;
            match expires_at {
                Some(at) => println!("granted subscription to {user_id} until {at}"),
                None => println!("granted subscription to {user_id}"),
            }
        }
        SubscriptionAction::Revoke { user_id } => {
            store
                .revoke_subscription(&user_id)
                .await
                .context("failed to revoke subscription")?;
            println!("revoked subscription of {user_id}");
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
fn init_tracing(default_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }
}
