//! levelup - student progression update engine
//!
//! Applies XP, currency and game-state mutations to classroom rosters with
//! optimistic concurrency, per-item batch failure isolation and at-most-once
//! application of retried requests.
//!
//! ## Components
//!
//! - **Engine**: mutation applier, idempotency guard, single and batch
//!   orchestrators, class membership index
//! - **Store**: versioned document store with optimistic transactions
//!   (in-memory or MongoDB)
//! - **Roster**: class and student creation, archival
//! - **Server**: JSON-over-HTTP surface

pub mod config;
pub mod db;
pub mod engine;
pub mod routes;
pub mod runtime;
pub mod server;
pub mod services;
pub mod types;

pub use config::Args;
pub use runtime::EngineRuntime;
pub use server::{run, AppState};
pub use types::{EngineError, FailureReason, Result};
