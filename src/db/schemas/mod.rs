//! Database schemas for Bursar
//!
//! Defines MongoDB document structures for accounts, purchase records,
//! and capability overrides.

mod account;
mod metadata;
mod permission_override;
mod purchase;

pub use account::{AccountDoc, CurrencyUnit, TimedRole, ACCOUNT_COLLECTION};
pub use metadata::Metadata;
pub use permission_override::{PermissionOverrideDoc, PERMISSION_COLLECTION};
pub use purchase::{PurchaseRecordDoc, PURCHASE_COLLECTION};
