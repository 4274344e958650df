//! Purchase authority
//!
//! The only writer of roles and balances. Validates a purchase against
//! the catalog and the account's current state, then debits, applies the
//! effect, and appends the audit record in one atomic store commit.
//!
//! Concurrency: each attempt reads a versioned snapshot and commits with
//! a compare-and-swap, so two simultaneous purchases against one account
//! serialize; the loser re-reads and re-validates against the winner's
//! state. Transient store failures and lost races share one bounded
//! retry budget.
//!
//! There is no idempotency key: resubmitting an identical request is a
//! new, independent purchase.

use bson::DateTime;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::Role;
use crate::db::schemas::{AccountDoc, CurrencyUnit, PurchaseRecordDoc, TimedRole};
use crate::ledger::catalog::{Product, ProductCatalog, ProductEffect};
use crate::ledger::store::{LedgerStore, StoreError};

/// Attempts per purchase, shared by version conflicts and transient
/// store failures
const MAX_ATTEMPTS: u32 = 3;

/// Terminal purchase failures, reported to the caller verbatim
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PurchaseError {
    /// The account id does not resolve to a ledger account
    #[error("Profile not found")]
    Unauthorized,

    /// The product name is not in the catalog
    #[error("Invalid product")]
    UnknownProduct,

    /// The purchased role would not be an upgrade over the current one
    #[error("Current role '{current}' already meets or exceeds '{requested}'")]
    NoOpUpgrade { current: Role, requested: Role },

    /// The relevant balance cannot cover the cost
    #[error("Insufficient {unit}: {shortfall} more needed")]
    InsufficientFunds {
        unit: CurrencyUnit,
        shortfall: i64,
    },

    /// The store failed; `transient` signals whether a caller-side retry
    /// could succeed
    #[error("Failed to process purchase")]
    Storage { transient: bool },
}

impl From<StoreError> for PurchaseError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => PurchaseError::Unauthorized,
            other => PurchaseError::Storage {
                transient: other.is_transient(),
            },
        }
    }
}

/// Result of a successful purchase. `account` is the authoritative
/// post-purchase state; callers overwrite any cached copy with it.
#[derive(Debug, Clone)]
pub struct PurchaseOutcome {
    pub account: AccountDoc,
    pub new_role: Option<Role>,
    pub message: String,
}

/// The transactional purchase engine
pub struct PurchaseAuthority {
    store: Arc<dyn LedgerStore>,
    catalog: ProductCatalog,
    write_timeout: Duration,
}

impl PurchaseAuthority {
    pub fn new(store: Arc<dyn LedgerStore>, catalog: ProductCatalog, write_timeout: Duration) -> Self {
        Self {
            store,
            catalog,
            write_timeout,
        }
    }

    pub fn catalog(&self) -> &ProductCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Purchase `product_name` for the account `user_id`.
    ///
    /// Validation order (first failure wins): account exists → product
    /// exists → effect is applicable → funds suffice. Failures are
    /// terminal and leave the account untouched.
    pub async fn purchase(
        &self,
        user_id: &str,
        product_name: &str,
    ) -> Result<PurchaseOutcome, PurchaseError> {
        let mut last_storage_err = PurchaseError::Storage { transient: true };

        for attempt in 1..=MAX_ATTEMPTS {
            let account = self
                .timed(self.store.get_account(user_id))
                .await??
                .ok_or(PurchaseError::Unauthorized)?;

            let (candidate, record, outcome_role, message) =
                self.prepare(&account, product_name)?;

            match self
                .timed(
                    self.store
                        .commit_purchase(account.version, candidate, record),
                )
                .await?
            {
                Ok(stored) => {
                    info!(
                        user_id = %user_id,
                        product = %product_name,
                        new_role = %stored.role,
                        claions = stored.claions,
                        claints = stored.claints,
                        "Purchase committed"
                    );
                    return Ok(PurchaseOutcome {
                        account: stored,
                        new_role: outcome_role,
                        message,
                    });
                }
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    warn!(
                        user_id = %user_id,
                        product = %product_name,
                        attempt,
                        error = %e,
                        "Purchase commit failed, retrying"
                    );
                    last_storage_err = e.into();
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_storage_err)
    }

    /// Validate a purchase against a snapshot and build the state the
    /// commit should install. Pure with respect to the store.
    fn prepare(
        &self,
        account: &AccountDoc,
        product_name: &str,
    ) -> Result<(AccountDoc, PurchaseRecordDoc, Option<Role>, String), PurchaseError> {
        let now = DateTime::now();

        // Fold lazy timed-role expiry into the working copy. Nothing is
        // persisted unless the purchase itself commits; a failed
        // validation must leave the stored account byte-for-byte intact.
        let mut candidate = account.clone();
        candidate.expire_timed_role(now);

        let product = self
            .catalog
            .find(product_name)
            .ok_or(PurchaseError::UnknownProduct)?;

        // Applicability: a role grant must be a strict upgrade over the
        // effective role. Repurchases and downgrades are refused before
        // any debit.
        let target_role = match product.effect {
            ProductEffect::GrantRole { role } | ProductEffect::TemporaryRole { role, .. } => {
                if role <= candidate.role {
                    return Err(PurchaseError::NoOpUpgrade {
                        current: candidate.role,
                        requested: role,
                    });
                }
                Some(role)
            }
            _ => None,
        };

        // Funds
        let balance = candidate.balance(product.currency);
        if balance < product.cost {
            return Err(PurchaseError::InsufficientFunds {
                unit: product.currency,
                shortfall: product.cost - balance,
            });
        }

        // Debit, then apply the effect
        *candidate.balance_mut(product.currency) -= product.cost;

        let effect_summary = match &product.effect {
            ProductEffect::GrantRole { role } => {
                // A permanent grant supersedes any active timer
                candidate.timed_role = None;
                candidate.role = *role;
                format!("role:{}", role)
            }
            ProductEffect::TemporaryRole { role, duration_secs } => {
                candidate.timed_role = Some(TimedRole {
                    prior: candidate.role,
                    expires_at: DateTime::from_millis(
                        now.timestamp_millis() + duration_secs * 1000,
                    ),
                });
                candidate.role = *role;
                format!("timed_role:{}:{}s", role, duration_secs)
            }
            ProductEffect::GrantCurrency { amount, unit } => {
                *candidate.balance_mut(*unit) += amount;
                format!("currency:{}:{}", unit.as_str(), amount)
            }
            ProductEffect::Cosmetic { item_id } => format!("cosmetic:{}", item_id),
        };

        candidate.version = account.version + 1;

        let record = PurchaseRecordDoc::new(
            account.user_id.clone(),
            product.name.to_string(),
            product.cost,
            product.currency,
            target_role,
            effect_summary,
        );

        let message = purchase_message(product, target_role);
        Ok((candidate, record, target_role, message))
    }

    /// Administrative role grant. Goes through the same version-checked
    /// write path as purchases; capability checks (ManageUserRoles, no
    /// self-change) are enforced by the caller, which has the actor's
    /// resolved capabilities at hand.
    pub async fn set_role(
        &self,
        target_user_id: &str,
        new_role: Role,
    ) -> Result<AccountDoc, PurchaseError> {
        for attempt in 1..=MAX_ATTEMPTS {
            let account = self
                .timed(self.store.get_account(target_user_id))
                .await??
                .ok_or(PurchaseError::Unauthorized)?;

            let mut candidate = account.clone();
            candidate.expire_timed_role(DateTime::now());
            // An explicit grant replaces any active timer outright
            candidate.timed_role = None;
            candidate.role = new_role;
            candidate.version = account.version + 1;

            match self
                .timed(self.store.compare_and_swap(account.version, candidate))
                .await?
            {
                Ok(stored) => {
                    info!(user_id = %target_user_id, role = %new_role, "Administrative role grant");
                    return Ok(stored);
                }
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    warn!(user_id = %target_user_id, attempt, error = %e, "Role grant lost a write race, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(PurchaseError::Storage { transient: true })
    }

    /// Persist a lapsed timed role observed on a read path. Best effort:
    /// losing the version race just means another writer already
    /// materialized it (or will), so conflicts fall back to a re-read.
    pub async fn reconcile_expiry(&self, account: AccountDoc) -> AccountDoc {
        let now = DateTime::now();
        if !account.timed_role_expired(now) {
            return account;
        }

        let mut candidate = account.clone();
        candidate.expire_timed_role(now);
        candidate.version = account.version + 1;

        match self
            .store
            .compare_and_swap(account.version, candidate.clone())
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                if !e.is_transient() {
                    warn!(user_id = %account.user_id, error = %e, "Failed to persist timed-role expiry");
                }
                match self.store.get_account(&account.user_id).await {
                    Ok(Some(mut fresh)) => {
                        fresh.expire_timed_role(DateTime::now());
                        fresh
                    }
                    _ => candidate,
                }
            }
        }
    }

    /// Apply the ledger write timeout; elapsing counts as a transient
    /// storage failure rather than hanging the caller
    async fn timed<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<Result<T, StoreError>, PurchaseError> {
        match tokio::time::timeout(self.write_timeout, fut).await {
            Ok(result) => Ok(result),
            Err(_) => Err(PurchaseError::Storage { transient: true }),
        }
    }
}

fn purchase_message(product: &Product, new_role: Option<Role>) -> String {
    match new_role {
        Some(role) => format!(
            "Successfully purchased {}! Your new role is {}.",
            product.name, role
        ),
        None => format!("Successfully purchased {}!", product.name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Capability;
    use crate::ledger::store::MemoryLedger;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn authority(ledger: Arc<MemoryLedger>) -> PurchaseAuthority {
        PurchaseAuthority::new(ledger, ProductCatalog::builtin(), Duration::from_secs(5))
    }

    fn seeded(user_id: &str, role: Role, claions: i64, claints: i64) -> Arc<MemoryLedger> {
        let ledger = Arc::new(MemoryLedger::new());
        let mut account = AccountDoc::new(user_id.into(), "Test User".into(), 0);
        account.role = role;
        account.claions = claions;
        account.claints = claints;
        ledger.seed_account(account);
        ledger
    }

    #[tokio::test]
    async fn test_exact_balance_purchase_succeeds() {
        // Scenario A: student with exactly the product's cost
        let ledger = seeded("u1", Role::Student, 5000, 0);
        let authority = authority(Arc::clone(&ledger));

        let outcome = authority.purchase("u1", "DumaxiaPro").await.unwrap();
        assert_eq!(outcome.account.role, Role::Admin);
        assert_eq!(outcome.account.claions, 0);
        assert_eq!(outcome.new_role, Some(Role::Admin));
        assert_eq!(
            outcome.message,
            "Successfully purchased DumaxiaPro! Your new role is admin."
        );
        assert_eq!(ledger.purchase_count(), 1);

        let stored = ledger.get_account("u1").await.unwrap().unwrap();
        assert_eq!(stored.role, Role::Admin);
        assert_eq!(stored.claions, 0);
    }

    #[tokio::test]
    async fn test_one_claion_short_fails_cleanly() {
        // Scenario B: same product, balance short by one
        let ledger = seeded("u1", Role::Student, 4999, 0);
        let authority = authority(Arc::clone(&ledger));
        let before = ledger.get_account("u1").await.unwrap().unwrap();

        let err = authority.purchase("u1", "DumaxiaPro").await.unwrap_err();
        assert_eq!(
            err,
            PurchaseError::InsufficientFunds {
                unit: CurrencyUnit::Claions,
                shortfall: 1,
            }
        );

        // State byte-for-byte unchanged, no audit record
        let after = ledger.get_account("u1").await.unwrap().unwrap();
        assert_eq!(after.claions, before.claions);
        assert_eq!(after.role, before.role);
        assert_eq!(after.version, before.version);
        assert_eq!(ledger.purchase_count(), 0);
    }

    #[tokio::test]
    async fn test_owner_buying_admin_is_noop_upgrade() {
        // Scenario C: current role already exceeds the product's target
        let ledger = seeded("u1", Role::Owner, 1_000_000, 0);
        let authority = authority(Arc::clone(&ledger));

        let err = authority.purchase("u1", "DumaxiaPro").await.unwrap_err();
        assert_eq!(
            err,
            PurchaseError::NoOpUpgrade {
                current: Role::Owner,
                requested: Role::Admin,
            }
        );
        assert_eq!(ledger.purchase_count(), 0);
    }

    #[tokio::test]
    async fn test_repurchase_of_current_role_refused() {
        let ledger = seeded("u1", Role::Admin, 100_000, 0);
        let authority = authority(Arc::clone(&ledger));

        let err = authority.purchase("u1", "AdminRole").await.unwrap_err();
        assert!(matches!(err, PurchaseError::NoOpUpgrade { .. }));

        let stored = ledger.get_account("u1").await.unwrap().unwrap();
        assert_eq!(stored.claions, 100_000);
    }

    #[tokio::test]
    async fn test_unknown_product_rejected_before_any_write() {
        // Scenario D
        let ledger = seeded("u1", Role::Student, 5000, 0);
        let authority = authority(Arc::clone(&ledger));

        let err = authority.purchase("u1", "DoesNotExist").await.unwrap_err();
        assert_eq!(err, PurchaseError::UnknownProduct);

        let stored = ledger.get_account("u1").await.unwrap().unwrap();
        assert_eq!(stored.claions, 5000);
        assert_eq!(stored.version, 1);
        assert_eq!(ledger.purchase_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_account_is_unauthorized() {
        let ledger = Arc::new(MemoryLedger::new());
        let authority = authority(ledger);

        let err = authority.purchase("ghost", "DumaxiaPro").await.unwrap_err();
        assert_eq!(err, PurchaseError::Unauthorized);
    }

    #[tokio::test]
    async fn test_validation_order_product_before_funds() {
        // An unknown product on a broke account reports UnknownProduct,
        // not InsufficientFunds: first failure wins
        let ledger = seeded("u1", Role::Visitor, 0, 0);
        let authority = authority(ledger);

        let err = authority.purchase("u1", "NotAProduct").await.unwrap_err();
        assert_eq!(err, PurchaseError::UnknownProduct);
    }

    #[tokio::test]
    async fn test_currency_exchange_credits_claions() {
        let ledger = seeded("u1", Role::Student, 0, 10);
        let authority = authority(Arc::clone(&ledger));

        let outcome = authority.purchase("u1", "ClaionPack").await.unwrap();
        assert_eq!(outcome.account.claints, 0);
        assert_eq!(outcome.account.claions, 1000);
        assert_eq!(outcome.new_role, None);
        assert_eq!(outcome.account.role, Role::Student);
        assert_eq!(ledger.purchase_count(), 1);
    }

    #[tokio::test]
    async fn test_cosmetic_purchase_only_debits() {
        let ledger = seeded("u1", Role::Teacher, 1000, 0);
        let authority = authority(Arc::clone(&ledger));

        let outcome = authority.purchase("u1", "ChannelBanner").await.unwrap();
        assert_eq!(outcome.account.claions, 700);
        assert_eq!(outcome.account.role, Role::Teacher);
        assert_eq!(outcome.message, "Successfully purchased ChannelBanner!");
    }

    #[tokio::test]
    async fn test_owner_timer_stores_prior_role() {
        let ledger = seeded("u1", Role::Student, 0, 50);
        let authority = authority(Arc::clone(&ledger));

        let outcome = authority.purchase("u1", "OwnerTimer").await.unwrap();
        assert_eq!(outcome.account.role, Role::Owner);
        assert_eq!(outcome.account.claints, 0);

        let timed = outcome.account.timed_role.expect("timed grant recorded");
        assert_eq!(timed.prior, Role::Student);
        assert!(timed.expires_at > DateTime::now());
    }

    #[tokio::test]
    async fn test_expired_timer_reverts_before_validation() {
        // Account looks like an owner, but the timer lapsed: purchases
        // validate against the reverted role and clear the grant
        let ledger = Arc::new(MemoryLedger::new());
        let mut account = AccountDoc::new("u1".into(), "Test User".into(), 0);
        account.role = Role::Owner;
        account.claions = 500;
        account.timed_role = Some(TimedRole {
            prior: Role::Student,
            expires_at: DateTime::from_millis(1_000),
        });
        ledger.seed_account(account);
        let authority = authority(Arc::clone(&ledger));

        let outcome = authority.purchase("u1", "TeacherRole").await.unwrap();
        assert_eq!(outcome.account.role, Role::Teacher);
        assert!(outcome.account.timed_role.is_none());
        assert_eq!(outcome.account.claions, 0);
    }

    #[tokio::test]
    async fn test_concurrent_purchases_cannot_double_spend() {
        // Two requests each costing more than half the balance: at most
        // one may succeed, whatever the interleaving
        let ledger = seeded("u1", Role::Student, 5000, 0);
        let authority = Arc::new(authority(Arc::clone(&ledger)));

        let a = {
            let authority = Arc::clone(&authority);
            tokio::spawn(async move { authority.purchase("u1", "DumaxiaPro").await })
        };
        let b = {
            let authority = Arc::clone(&authority);
            tokio::spawn(async move { authority.purchase("u1", "DumaxiaPro").await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1, "exactly one purchase may win: {:?}", results);

        let stored = ledger.get_account("u1").await.unwrap().unwrap();
        assert_eq!(stored.claions, 0);
        assert_eq!(stored.role, Role::Admin);
        assert_eq!(ledger.purchase_count(), 1);
    }

    #[tokio::test]
    async fn test_resubmission_is_a_new_purchase() {
        // Without an idempotency key, replaying the request debits again
        let ledger = seeded("u1", Role::Visitor, 1000, 0);
        let authority = authority(Arc::clone(&ledger));

        authority.purchase("u1", "ChannelBanner").await.unwrap();
        authority.purchase("u1", "ChannelBanner").await.unwrap();

        let stored = ledger.get_account("u1").await.unwrap().unwrap();
        assert_eq!(stored.claions, 400);
        assert_eq!(ledger.purchase_count(), 2);
    }

    #[tokio::test]
    async fn test_admin_set_role_writes_through_cas() {
        let ledger = seeded("target", Role::Student, 0, 0);
        let authority = authority(Arc::clone(&ledger));

        let stored = authority.set_role("target", Role::Teacher).await.unwrap();
        assert_eq!(stored.role, Role::Teacher);
        assert_eq!(stored.version, 2);

        let err = authority.set_role("ghost", Role::Teacher).await.unwrap_err();
        assert_eq!(err, PurchaseError::Unauthorized);
    }

    #[tokio::test]
    async fn test_reconcile_expiry_persists_reversion() {
        let ledger = Arc::new(MemoryLedger::new());
        let mut account = AccountDoc::new("u1".into(), "Test User".into(), 0);
        account.role = Role::Owner;
        account.timed_role = Some(TimedRole {
            prior: Role::Teacher,
            expires_at: DateTime::from_millis(1_000),
        });
        ledger.seed_account(account.clone());
        let authority = authority(Arc::clone(&ledger));

        let reconciled = authority.reconcile_expiry(account).await;
        assert_eq!(reconciled.role, Role::Teacher);
        assert!(reconciled.timed_role.is_none());

        // Reversion is durable, not just in the returned copy
        let stored = ledger.get_account("u1").await.unwrap().unwrap();
        assert_eq!(stored.role, Role::Teacher);
        assert!(stored.timed_role.is_none());
    }

    /// Ledger wrapper that injects transient commit failures
    struct FlakyLedger {
        inner: Arc<MemoryLedger>,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl LedgerStore for FlakyLedger {
        async fn get_account(&self, user_id: &str) -> Result<Option<AccountDoc>, StoreError> {
            self.inner.get_account(user_id).await
        }

        async fn ensure_account(
            &self,
            user_id: &str,
            display_name: &str,
            signup_bonus_claions: i64,
        ) -> Result<AccountDoc, StoreError> {
            self.inner
                .ensure_account(user_id, display_name, signup_bonus_claions)
                .await
        }

        async fn compare_and_swap(
            &self,
            expected_version: i64,
            account: AccountDoc,
        ) -> Result<AccountDoc, StoreError> {
            self.inner.compare_and_swap(expected_version, account).await
        }

        async fn commit_purchase(
            &self,
            expected_version: i64,
            account: AccountDoc,
            record: PurchaseRecordDoc,
        ) -> Result<AccountDoc, StoreError> {
            if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            }).is_ok()
            {
                return Err(StoreError::Unavailable("injected timeout".into()));
            }
            self.inner
                .commit_purchase(expected_version, account, record)
                .await
        }

        async fn update_display_name(
            &self,
            user_id: &str,
            display_name: &str,
        ) -> Result<AccountDoc, StoreError> {
            self.inner.update_display_name(user_id, display_name).await
        }

        async fn list_accounts(&self, limit: i64) -> Result<Vec<AccountDoc>, StoreError> {
            self.inner.list_accounts(limit).await
        }

        async fn purchase_history(
            &self,
            user_id: &str,
        ) -> Result<Vec<PurchaseRecordDoc>, StoreError> {
            self.inner.purchase_history(user_id).await
        }

        async fn overrides_for(
            &self,
            user_id: &str,
        ) -> Result<Vec<(Capability, bool)>, StoreError> {
            self.inner.overrides_for(user_id).await
        }
    }

    #[tokio::test]
    async fn test_transient_failures_retried_within_bound() {
        let inner = seeded("u1", Role::Student, 5000, 0);
        let flaky = Arc::new(FlakyLedger {
            inner: Arc::clone(&inner),
            failures_left: AtomicU32::new(2),
        });
        let authority =
            PurchaseAuthority::new(flaky, ProductCatalog::builtin(), Duration::from_secs(5));

        // Two injected failures, third attempt lands
        let outcome = authority.purchase("u1", "DumaxiaPro").await.unwrap();
        assert_eq!(outcome.account.role, Role::Admin);
        assert_eq!(inner.purchase_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let inner = seeded("u1", Role::Student, 5000, 0);
        let flaky = Arc::new(FlakyLedger {
            inner: Arc::clone(&inner),
            failures_left: AtomicU32::new(3),
        });
        let authority =
            PurchaseAuthority::new(flaky, ProductCatalog::builtin(), Duration::from_secs(5));

        let err = authority.purchase("u1", "DumaxiaPro").await.unwrap_err();
        assert_eq!(err, PurchaseError::Storage { transient: true });

        // No partial state: balance intact, no audit record
        let stored = inner.get_account("u1").await.unwrap().unwrap();
        assert_eq!(stored.claions, 5000);
        assert_eq!(inner.purchase_count(), 0);
    }
}
