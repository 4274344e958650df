//! Bursar - role & currency ledger service for the Dumaxia platform
//!
//! Bursar owns the only stateful core of the platform: account roles
//! (visitor → student → teacher → admin → owner), Claion/Claint
//! balances, and the purchase flow that converts currency into role
//! upgrades and shop items.
//!
//! ## Services
//!
//! - **Ledger**: versioned account store with an append-only purchase
//!   audit trail (MongoDB in production, in-memory in dev mode)
//! - **Purchase authority**: the transactional validate → debit →
//!   apply → audit pipeline, the sole writer of roles and balances
//! - **Permission resolver**: pure role → capability mapping with
//!   per-account overrides
//! - **Gateway**: the HTTP surface the web client consumes, including
//!   the content-generation proxy

pub mod auth;
pub mod config;
pub mod db;
pub mod ledger;
pub mod routes;
pub mod server;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{BursarError, Result};
