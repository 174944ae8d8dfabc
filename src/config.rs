//! Configuration for levelup
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::engine::{EngineConfig, MembershipStrategy};

/// Which record store backs the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Mongo,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(StoreBackend::Memory),
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            other => Err(format!(
                "unknown store backend '{}' (expected 'memory' or 'mongo')",
                other
            )),
        }
    }
}

/// levelup - student progression update engine
#[derive(Parser, Debug, Clone)]
#[command(name = "levelup")]
#[command(about = "Concurrent XP, currency and game-state updates for classroom rosters")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Record store backend (memory, mongo)
    #[arg(long, env = "STORE_BACKEND", default_value = "memory")]
    pub store_backend: StoreBackend,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "levelup")]
    pub mongodb_db: String,

    /// Students per batch sub-batch transaction
    #[arg(long, env = "SUB_BATCH_SIZE", default_value = "50")]
    pub sub_batch_size: usize,

    /// Sub-batch transactions issued per second
    #[arg(long, env = "TXN_RATE_PER_SEC", default_value = "20")]
    pub txn_rate_per_sec: f64,

    /// Sub-batch transactions that may be issued back to back
    #[arg(long, env = "TXN_BURST", default_value = "1")]
    pub txn_burst: u32,

    /// Retries for a sub-batch whose transaction hit a conflict (0 = none)
    #[arg(long, env = "SUB_BATCH_RETRIES", default_value = "0")]
    pub sub_batch_retries: u32,

    /// How class rosters are read (indexed, scan-students)
    #[arg(long, env = "MEMBERSHIP_STRATEGY", default_value = "indexed")]
    pub membership_strategy: MembershipStrategy,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.sub_batch_size == 0 {
            return Err("SUB_BATCH_SIZE must be at least 1".to_string());
        }

        if !self.txn_rate_per_sec.is_finite() || self.txn_rate_per_sec <= 0.0 {
            return Err("TXN_RATE_PER_SEC must be a positive number".to_string());
        }

        if self.txn_burst == 0 {
            return Err("TXN_BURST must be at least 1".to_string());
        }

        if !matches!(self.log_format.as_str(), "text" | "json") {
            return Err("LOG_FORMAT must be 'text' or 'json'".to_string());
        }

        if self.store_backend == StoreBackend::Mongo && self.mongodb_uri.is_empty() {
            return Err("MONGODB_URI is required for the mongo backend".to_string());
        }

        Ok(())
    }

    /// Engine tuning derived from the arguments
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            sub_batch_size: self.sub_batch_size,
            txn_rate_per_sec: self.txn_rate_per_sec,
            txn_burst: self.txn_burst,
            sub_batch_retries: self.sub_batch_retries,
            membership_strategy: self.membership_strategy,
        }
    }

    pub fn json_logs(&self) -> bool {
        self.log_format == "json"
    }
}
