//! Account document schema
//!
//! One document per user: role, currency balances, and the optimistic
//! concurrency version. The `role`, `claions`, and `claints` fields are
//! written only through the purchase authority (the administrative grant
//! path included), never ad hoc.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for accounts
pub const ACCOUNT_COLLECTION: &str = "accounts";

/// Currency units held by an account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurrencyUnit {
    /// Primary currency, earned and spent on roles and shop items
    #[default]
    Claions,
    /// Secondary currency, spent on timed grants and exchanges
    Claints,
}

impl CurrencyUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            CurrencyUnit::Claions => "Claions",
            CurrencyUnit::Claints => "Claints",
        }
    }
}

impl std::fmt::Display for CurrencyUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An active temporary role grant.
///
/// While present, `AccountDoc::role` holds the granted role; `prior` is
/// the role to restore once `expires_at` passes. Expiry is applied
/// lazily by readers, so the struct must carry everything reversion
/// needs.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TimedRole {
    /// Role held immediately before the grant
    pub prior: Role,
    /// When the grant lapses
    pub expires_at: DateTime,
}

/// Account document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AccountDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Stable account id from the identity provider
    pub user_id: String,

    /// Display name, mutable, no uniqueness constraint
    #[serde(default)]
    pub display_name: String,

    /// Current role (the granted role while a timed grant is active)
    #[serde(default)]
    pub role: Role,

    /// Primary currency balance, never negative
    #[serde(default)]
    pub claions: i64,

    /// Secondary currency balance, never negative
    #[serde(default)]
    pub claints: i64,

    /// Optimistic concurrency token, incremented on every write
    #[serde(default = "default_version")]
    pub version: i64,

    /// Active temporary role grant, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timed_role: Option<TimedRole>,
}

fn default_version() -> i64 {
    1
}

impl AccountDoc {
    /// Create a fresh account with signup defaults
    pub fn new(user_id: String, display_name: String, signup_bonus_claions: i64) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            user_id,
            display_name,
            role: Role::Visitor,
            claions: signup_bonus_claions,
            claints: 0,
            version: 1,
            timed_role: None,
        }
    }

    /// Balance in the given currency unit
    pub fn balance(&self, unit: CurrencyUnit) -> i64 {
        match unit {
            CurrencyUnit::Claions => self.claions,
            CurrencyUnit::Claints => self.claints,
        }
    }

    /// Mutable balance in the given currency unit
    pub fn balance_mut(&mut self, unit: CurrencyUnit) -> &mut i64 {
        match unit {
            CurrencyUnit::Claions => &mut self.claions,
            CurrencyUnit::Claints => &mut self.claints,
        }
    }

    /// Whether the active timed grant (if any) has lapsed at `now`
    pub fn timed_role_expired(&self, now: DateTime) -> bool {
        self.timed_role
            .as_ref()
            .is_some_and(|t| now >= t.expires_at)
    }

    /// The role the account effectively holds at `now`, with lazy expiry
    /// applied. Does not mutate; callers that observe an expired grant
    /// persist the reversion through the ledger.
    pub fn effective_role(&self, now: DateTime) -> Role {
        match &self.timed_role {
            Some(t) if now >= t.expires_at => t.prior,
            _ => self.role,
        }
    }

    /// Revert an expired timed grant in place. Returns true if anything
    /// changed; the caller is responsible for persisting.
    pub fn expire_timed_role(&mut self, now: DateTime) -> bool {
        match self.timed_role {
            Some(ref t) if now >= t.expires_at => {
                self.role = t.prior;
                self.timed_role = None;
                true
            }
            _ => false,
        }
    }
}

impl IntoIndexes for AccountDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on user_id
            (
                doc! { "user_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("user_id_unique".to_string())
                        .build(),
                ),
            ),
            // Index on role for admin listings
            (
                doc! { "role": 1 },
                Some(IndexOptions::builder().name("role_index".to_string()).build()),
            ),
        ]
    }
}

impl MutMetadata for AccountDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_account_defaults() {
        let acct = AccountDoc::new("u1".into(), "Someone".into(), 100);
        assert_eq!(acct.role, Role::Visitor);
        assert_eq!(acct.claions, 100);
        assert_eq!(acct.claints, 0);
        assert_eq!(acct.version, 1);
        assert!(acct.timed_role.is_none());
    }

    #[test]
    fn test_effective_role_reverts_to_prior() {
        let mut acct = AccountDoc::new("u1".into(), "Someone".into(), 0);
        acct.role = Role::Owner;
        acct.timed_role = Some(TimedRole {
            prior: Role::Teacher,
            expires_at: DateTime::from_millis(1_000),
        });

        // Before expiry the granted role holds
        assert_eq!(acct.effective_role(DateTime::from_millis(999)), Role::Owner);

        // At and after expiry the prior role holds, not a hardcoded default
        assert_eq!(acct.effective_role(DateTime::from_millis(1_000)), Role::Teacher);
        assert_eq!(acct.effective_role(DateTime::from_millis(5_000)), Role::Teacher);

        // In-place expiry clears the grant and restores prior
        assert!(acct.expire_timed_role(DateTime::from_millis(1_000)));
        assert_eq!(acct.role, Role::Teacher);
        assert!(acct.timed_role.is_none());

        // Idempotent once cleared
        assert!(!acct.expire_timed_role(DateTime::from_millis(2_000)));
    }

    #[test]
    fn test_balance_by_unit() {
        let mut acct = AccountDoc::new("u1".into(), "Someone".into(), 500);
        acct.claints = 7;
        assert_eq!(acct.balance(CurrencyUnit::Claions), 500);
        assert_eq!(acct.balance(CurrencyUnit::Claints), 7);

        *acct.balance_mut(CurrencyUnit::Claints) -= 7;
        assert_eq!(acct.claints, 0);
    }
}
