//! Configuration for Bursar
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use uuid::Uuid;

/// Bursar - role & currency ledger service for the Dumaxia platform
#[derive(Parser, Debug, Clone)]
#[command(name = "bursar")]
#[command(about = "Role & currency ledger service for the Dumaxia education platform")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory ledger allowed, insecure JWT secret)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "bursar")]
    pub mongodb_db: String,

    /// JWT secret for token verification (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// JWT token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "3600")]
    pub jwt_expiry_seconds: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Ledger write timeout in milliseconds
    #[arg(long, env = "LEDGER_TIMEOUT_MS", default_value = "5000")]
    pub ledger_timeout_ms: u64,

    /// Claions credited to a freshly created account
    #[arg(long, env = "SIGNUP_BONUS_CLAIONS", default_value = "100")]
    pub signup_bonus_claions: i64,

    /// URL of the content-generation service
    /// (e.g., "http://localhost:8091/generate")
    /// Requests to POST /generate-content are forwarded here
    #[arg(long, env = "GENERATE_URL")]
    pub generate_url: Option<String>,

    /// Content-generation request timeout in milliseconds
    #[arg(long, env = "GENERATE_TIMEOUT_MS", default_value = "30000")]
    pub generate_timeout_ms: u64,
}

impl Args {
    /// Get effective JWT secret (uses default in dev mode)
    pub fn jwt_secret(&self) -> String {
        if self.dev_mode {
            self.jwt_secret
                .clone()
                .unwrap_or_else(|| "dev-only-insecure-secret".to_string())
        } else {
            self.jwt_secret
                .clone()
                .expect("JWT_SECRET is required in production mode")
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if self.signup_bonus_claions < 0 {
            return Err("SIGNUP_BONUS_CLAIONS must not be negative".to_string());
        }

        Ok(())
    }
}
