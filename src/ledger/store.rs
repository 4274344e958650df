//! Ledger store contract and the in-memory implementation
//!
//! The store owns account and purchase-record persistence. The trait
//! keeps the purchase authority independent of the backing database:
//! production runs [`MongoLedger`](crate::ledger::MongoLedger), dev mode
//! and unit tests run [`MemoryLedger`].

use async_trait::async_trait;
use bson::DateTime;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::auth::Capability;
use crate::db::schemas::{AccountDoc, PurchaseRecordDoc};

/// Storage-layer failures, classified for retry decisions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The version check failed: another writer got there first.
    /// Callers re-read, re-validate, and retry.
    #[error("account version conflict")]
    Conflict,

    /// The account does not exist
    #[error("account not found")]
    NotFound,

    /// Transient backend failure (timeout, lost connection). Safe to
    /// retry a bounded number of times.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// Non-transient backend failure. Not retried.
    #[error("ledger failure: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether a retry may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict | StoreError::Unavailable(_))
    }
}

/// Persistence contract consumed by the purchase authority and routes
///
/// Writes to `role` and balances go through `compare_and_swap` or
/// `commit_purchase`; both check the account's version so concurrent
/// writers serialize instead of double-spending.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Fetch an account snapshot
    async fn get_account(&self, user_id: &str) -> Result<Option<AccountDoc>, StoreError>;

    /// Fetch an account, creating it with signup defaults if absent.
    /// Idempotent: concurrent callers converge on one document.
    async fn ensure_account(
        &self,
        user_id: &str,
        display_name: &str,
        signup_bonus_claions: i64,
    ) -> Result<AccountDoc, StoreError>;

    /// Replace the account state if its stored version still equals
    /// `expected_version`. `account.version` must already carry the new
    /// version. Returns the stored state on success.
    async fn compare_and_swap(
        &self,
        expected_version: i64,
        account: AccountDoc,
    ) -> Result<AccountDoc, StoreError>;

    /// Atomically: replace the account state (version-checked, as
    /// `compare_and_swap`) AND append a purchase record. Either both
    /// happen or neither does.
    async fn commit_purchase(
        &self,
        expected_version: i64,
        account: AccountDoc,
        record: PurchaseRecordDoc,
    ) -> Result<AccountDoc, StoreError>;

    /// Update the display name. Bumps the version so in-flight purchase
    /// transactions notice and re-read.
    async fn update_display_name(
        &self,
        user_id: &str,
        display_name: &str,
    ) -> Result<AccountDoc, StoreError>;

    /// List accounts for the admin panel, newest first
    async fn list_accounts(&self, limit: i64) -> Result<Vec<AccountDoc>, StoreError>;

    /// A user's purchase audit trail, newest first
    async fn purchase_history(
        &self,
        user_id: &str,
    ) -> Result<Vec<PurchaseRecordDoc>, StoreError>;

    /// Capability overrides for an account (external `user_permissions`
    /// table; unknown capability names already filtered out)
    async fn overrides_for(&self, user_id: &str)
        -> Result<Vec<(Capability, bool)>, StoreError>;
}

/// In-memory ledger for dev mode and tests
///
/// One mutex serializes every operation, which makes `commit_purchase`
/// trivially atomic and gives the same serializability the MongoDB
/// implementation gets from version-checked writes.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<String, AccountDoc>,
    purchases: Vec<PurchaseRecordDoc>,
    overrides: HashMap<String, Vec<(Capability, bool)>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account directly (tests and dev fixtures)
    pub fn seed_account(&self, account: AccountDoc) {
        let mut state = self.state.lock().unwrap();
        state.accounts.insert(account.user_id.clone(), account);
    }

    /// Seed a capability override (tests and dev fixtures)
    pub fn seed_override(&self, user_id: &str, capability: Capability, is_allowed: bool) {
        let mut state = self.state.lock().unwrap();
        state
            .overrides
            .entry(user_id.to_string())
            .or_default()
            .push((capability, is_allowed));
    }

    /// Number of stored purchase records (tests)
    pub fn purchase_count(&self) -> usize {
        self.state.lock().unwrap().purchases.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn get_account(&self, user_id: &str) -> Result<Option<AccountDoc>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.accounts.get(user_id).cloned())
    }

    async fn ensure_account(
        &self,
        user_id: &str,
        display_name: &str,
        signup_bonus_claions: i64,
    ) -> Result<AccountDoc, StoreError> {
        let mut state = self.state.lock().unwrap();
        let account = state
            .accounts
            .entry(user_id.to_string())
            .or_insert_with(|| {
                AccountDoc::new(
                    user_id.to_string(),
                    display_name.to_string(),
                    signup_bonus_claions,
                )
            });
        Ok(account.clone())
    }

    async fn compare_and_swap(
        &self,
        expected_version: i64,
        account: AccountDoc,
    ) -> Result<AccountDoc, StoreError> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .accounts
            .get_mut(&account.user_id)
            .ok_or(StoreError::NotFound)?;

        if stored.version != expected_version {
            return Err(StoreError::Conflict);
        }

        let mut account = account;
        account.metadata.touch();
        *stored = account.clone();
        Ok(account)
    }

    async fn commit_purchase(
        &self,
        expected_version: i64,
        account: AccountDoc,
        record: PurchaseRecordDoc,
    ) -> Result<AccountDoc, StoreError> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .accounts
            .get_mut(&account.user_id)
            .ok_or(StoreError::NotFound)?;

        if stored.version != expected_version {
            return Err(StoreError::Conflict);
        }

        let mut account = account;
        account.metadata.touch();
        *stored = account.clone();
        state.purchases.push(record);
        Ok(account)
    }

    async fn update_display_name(
        &self,
        user_id: &str,
        display_name: &str,
    ) -> Result<AccountDoc, StoreError> {
        let mut state = self.state.lock().unwrap();
        let stored = state.accounts.get_mut(user_id).ok_or(StoreError::NotFound)?;

        stored.display_name = display_name.to_string();
        stored.version += 1;
        stored.metadata.touch();
        Ok(stored.clone())
    }

    async fn list_accounts(&self, limit: i64) -> Result<Vec<AccountDoc>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut accounts: Vec<AccountDoc> = state.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| {
            let a_created = a.metadata.created_at.unwrap_or(DateTime::MIN);
            let b_created = b.metadata.created_at.unwrap_or(DateTime::MIN);
            b_created.cmp(&a_created)
        });
        accounts.truncate(limit.max(0) as usize);
        Ok(accounts)
    }

    async fn purchase_history(
        &self,
        user_id: &str,
    ) -> Result<Vec<PurchaseRecordDoc>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut records: Vec<PurchaseRecordDoc> = state
            .purchases
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.reverse();
        Ok(records)
    }

    async fn overrides_for(
        &self,
        user_id: &str,
    ) -> Result<Vec<(Capability, bool)>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.overrides.get(user_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    #[tokio::test]
    async fn test_ensure_account_is_idempotent() {
        let ledger = MemoryLedger::new();

        let first = ledger.ensure_account("u1", "Someone", 100).await.unwrap();
        assert_eq!(first.role, Role::Visitor);
        assert_eq!(first.claions, 100);

        // Second call returns the existing account untouched
        let second = ledger.ensure_account("u1", "Other Name", 9999).await.unwrap();
        assert_eq!(second.display_name, "Someone");
        assert_eq!(second.claions, 100);
        assert_eq!(second.version, first.version);
    }

    #[tokio::test]
    async fn test_cas_rejects_stale_version() {
        let ledger = MemoryLedger::new();
        let account = ledger.ensure_account("u1", "Someone", 100).await.unwrap();

        let mut update = account.clone();
        update.claions = 50;
        update.version = account.version + 1;
        ledger.compare_and_swap(account.version, update).await.unwrap();

        // Replaying against the old version must conflict
        let mut stale = account.clone();
        stale.claions = 0;
        stale.version = account.version + 1;
        let err = ledger
            .compare_and_swap(account.version, stale)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Conflict);
        assert!(err.is_transient());

        let stored = ledger.get_account("u1").await.unwrap().unwrap();
        assert_eq!(stored.claions, 50);
    }

    #[tokio::test]
    async fn test_commit_purchase_writes_both_or_neither() {
        let ledger = MemoryLedger::new();
        let account = ledger.ensure_account("u1", "Someone", 100).await.unwrap();

        let mut update = account.clone();
        update.claions = 0;
        update.role = Role::Student;
        update.version = account.version + 1;
        let record = PurchaseRecordDoc::new(
            "u1".into(),
            "StudentRole".into(),
            100,
            crate::db::schemas::CurrencyUnit::Claions,
            Some(Role::Student),
            "role:student".into(),
        );

        ledger
            .commit_purchase(account.version, update.clone(), record.clone())
            .await
            .unwrap();
        assert_eq!(ledger.purchase_count(), 1);

        // A conflicting commit leaves no orphaned audit record
        let err = ledger
            .commit_purchase(account.version, update, record)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Conflict);
        assert_eq!(ledger.purchase_count(), 1);
    }

    #[tokio::test]
    async fn test_overrides_feed_the_resolver() {
        let ledger = MemoryLedger::new();
        ledger.ensure_account("u1", "Someone", 0).await.unwrap();
        ledger.seed_override("u1", Capability::CreateContent, true);

        let overrides = ledger.overrides_for("u1").await.unwrap();
        let caps = crate::auth::resolve(Role::Visitor, &overrides);
        assert!(caps.contains(&Capability::CreateContent));

        // Accounts without rows get role defaults only
        assert!(ledger.overrides_for("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_display_name_update_bumps_version() {
        let ledger = MemoryLedger::new();
        let account = ledger.ensure_account("u1", "Someone", 0).await.unwrap();

        let updated = ledger.update_display_name("u1", "New Name").await.unwrap();
        assert_eq!(updated.display_name, "New Name");
        assert_eq!(updated.version, account.version + 1);

        let err = ledger
            .update_display_name("missing", "x")
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound);
    }
}
