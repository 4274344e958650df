//! Bursar - role & currency ledger service for the Dumaxia platform

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bursar::{
    config::Args,
    db::MongoClient,
    ledger::{LedgerStore, MemoryLedger, MongoLedger, ProductCatalog, PurchaseAuthority},
    server,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("bursar={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Bursar - Dumaxia ledger service");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Signup bonus: {} Claions", args.signup_bonus_claions);
    match &args.generate_url {
        Some(url) => info!("Content generation: {}", url),
        None => info!("Content generation: disabled"),
    }
    info!("======================================");

    // Connect to MongoDB (optional in dev mode)
    let mongo = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            Some(client)
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using in-memory ledger): {}", e);
                None
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    // Build the ledger store
    let (store, backend): (Arc<dyn LedgerStore>, &'static str) = match mongo {
        Some(client) => match MongoLedger::new(client).await {
            Ok(ledger) => (Arc::new(ledger), "mongodb"),
            Err(e) => {
                error!("Ledger initialization failed: {}", e);
                std::process::exit(1);
            }
        },
        None => (Arc::new(MemoryLedger::new()), "memory"),
    };
    info!("Ledger store ready ({})", backend);

    // The purchase authority is the sole writer of roles and balances
    let authority = PurchaseAuthority::new(
        store,
        ProductCatalog::builtin(),
        Duration::from_millis(args.ledger_timeout_ms),
    );

    // Create application state
    let state = match server::AppState::new(args, authority, backend) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to initialize application state: {}", e);
            std::process::exit(1);
        }
    };

    // Run the server
    if let Err(e) = server::run(state).await {
        error!("Server error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}
