//! # tweakcn-store
//!
//! Storage engine for the tweakcn AI backend.
//!
//! Provides SQLite-backed persistence for the two pieces of state the AI
//! routes depend on: the per-user usage ledger (one row per completed
//! generation) and subscription records that lift the free-tier quota.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  SubscriptionService  /  UsageLedger     │  (traits consumed by the
//! │                                          │   web and ai crates)
//! ├─────────────────────────────────────────┤
//! │  UsageStore (quota + ledger on SQLite)   │
//! ├─────────────────────────────────────────┤
//! │  Database (rusqlite WAL)                 │
//! │  Migrations (versioned, transactional)   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use tweakcn_store::{Database, UsageStore, SubscriptionService};
//!
//! let db = Database::open_and_migrate("data/tweakcn.db").await?;
//! let usage = UsageStore::new(db.clone(), 10);
//! let check = usage.check(Some("user_123")).await?;
//! ```

pub mod db;
pub mod error;
pub mod migration;
pub mod usage;

// ── re-exports ───────────────────────────────────────────────────────

pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use usage::{
    SubscriptionCheck, SubscriptionService, UsageLedger, UsageRecord, UsageStore,
    UsageSummary,
};
