//! The role & currency ledger
//!
//! Catalog, store contract, and the transactional purchase authority.

pub mod catalog;
pub mod mongo;
pub mod purchase;
pub mod store;

pub use catalog::{Product, ProductCatalog, ProductEffect};
pub use mongo::MongoLedger;
pub use purchase::{PurchaseAuthority, PurchaseError, PurchaseOutcome};
pub use store::{LedgerStore, MemoryLedger, StoreError};
