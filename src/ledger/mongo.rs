//! MongoDB-backed ledger store
//!
//! Account writes are version-checked `find_one_and_update` calls, so
//! concurrent purchases serialize instead of double-spending. The
//! purchase commit (account update + audit insert) runs inside a
//! session transaction: either both documents change or neither does.

use async_trait::async_trait;
use bson::{doc, DateTime, Document};
use mongodb::error::{ErrorKind, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT};
use mongodb::options::{FindOptions, ReturnDocument};
use tracing::warn;

use crate::auth::Capability;
use crate::db::mongo::MongoCollection;
use crate::db::schemas::{
    AccountDoc, PermissionOverrideDoc, PurchaseRecordDoc, ACCOUNT_COLLECTION,
    PERMISSION_COLLECTION, PURCHASE_COLLECTION,
};
use crate::db::MongoClient;
use crate::ledger::store::{LedgerStore, StoreError};

/// Production ledger store over MongoDB
#[derive(Clone)]
pub struct MongoLedger {
    mongo: MongoClient,
    accounts: MongoCollection<AccountDoc>,
    purchases: MongoCollection<PurchaseRecordDoc>,
    overrides: MongoCollection<PermissionOverrideDoc>,
}

impl MongoLedger {
    /// Create the ledger; collection construction applies indexes up
    /// front so the unique user_id constraint exists before traffic
    pub async fn new(mongo: MongoClient) -> Result<Self, StoreError> {
        let accounts = mongo
            .collection::<AccountDoc>(ACCOUNT_COLLECTION)
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let purchases = mongo
            .collection::<PurchaseRecordDoc>(PURCHASE_COLLECTION)
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let overrides = mongo
            .collection::<PermissionOverrideDoc>(PERMISSION_COLLECTION)
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        Ok(Self {
            mongo,
            accounts,
            purchases,
            overrides,
        })
    }

    /// Build the `$set`/`$unset` update that replaces the mutable
    /// account state and advances the version
    fn account_update(account: &AccountDoc) -> Result<Document, StoreError> {
        let role = bson::to_bson(&account.role)
            .map_err(|e| StoreError::Internal(format!("serialize role: {}", e)))?;

        let mut set = doc! {
            "display_name": &account.display_name,
            "role": role,
            "claions": account.claions,
            "claints": account.claints,
            "version": account.version,
            "metadata.updated_at": DateTime::now(),
        };

        let update = match &account.timed_role {
            Some(timed) => {
                let timed = bson::to_bson(timed)
                    .map_err(|e| StoreError::Internal(format!("serialize timed role: {}", e)))?;
                set.insert("timed_role", timed);
                doc! { "$set": set }
            }
            None => doc! { "$set": set, "$unset": { "timed_role": "" } },
        };

        Ok(update)
    }

    /// Distinguish a missing account from a lost version race after a
    /// conditional update matched nothing
    async fn conflict_or_missing(&self, user_id: &str) -> StoreError {
        match self.get_account(user_id).await {
            Ok(Some(_)) => StoreError::Conflict,
            Ok(None) => StoreError::NotFound,
            Err(e) => e,
        }
    }
}

/// Map a driver error onto the retry taxonomy
fn classify(e: mongodb::error::Error) -> StoreError {
    if e.contains_label(TRANSIENT_TRANSACTION_ERROR)
        || e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
    {
        return StoreError::Unavailable(e.to_string());
    }

    match &*e.kind {
        ErrorKind::Io(_)
        | ErrorKind::ServerSelection { .. }
        | ErrorKind::ConnectionPoolCleared { .. } => StoreError::Unavailable(e.to_string()),
        _ => StoreError::Internal(e.to_string()),
    }
}

#[async_trait]
impl LedgerStore for MongoLedger {
    async fn get_account(&self, user_id: &str) -> Result<Option<AccountDoc>, StoreError> {
        self.accounts
            .inner()
            .find_one(doc! { "user_id": user_id, "metadata.is_deleted": { "$ne": true } })
            .await
            .map_err(classify)
    }

    async fn ensure_account(
        &self,
        user_id: &str,
        display_name: &str,
        signup_bonus_claions: i64,
    ) -> Result<AccountDoc, StoreError> {
        if let Some(existing) = self.get_account(user_id).await? {
            return Ok(existing);
        }

        let fresh = AccountDoc::new(
            user_id.to_string(),
            display_name.to_string(),
            signup_bonus_claions,
        );

        match self.accounts.insert_one(fresh.clone()).await {
            Ok(_) => Ok(fresh),
            Err(e) => {
                // A concurrent first contact may have won the insert race
                // on the unique user_id index; the stored document wins.
                if let Some(existing) = self.get_account(user_id).await? {
                    Ok(existing)
                } else {
                    Err(StoreError::Internal(e.to_string()))
                }
            }
        }
    }

    async fn compare_and_swap(
        &self,
        expected_version: i64,
        account: AccountDoc,
    ) -> Result<AccountDoc, StoreError> {
        let filter = doc! {
            "user_id": &account.user_id,
            "version": expected_version,
            "metadata.is_deleted": { "$ne": true },
        };
        let update = Self::account_update(&account)?;

        let updated = self
            .accounts
            .inner()
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await
            .map_err(classify)?;

        match updated {
            Some(stored) => Ok(stored),
            None => Err(self.conflict_or_missing(&account.user_id).await),
        }
    }

    async fn commit_purchase(
        &self,
        expected_version: i64,
        account: AccountDoc,
        record: PurchaseRecordDoc,
    ) -> Result<AccountDoc, StoreError> {
        let filter = doc! {
            "user_id": &account.user_id,
            "version": expected_version,
            "metadata.is_deleted": { "$ne": true },
        };
        let update = Self::account_update(&account)?;

        let mut session = self
            .mongo
            .inner()
            .start_session()
            .await
            .map_err(classify)?;
        session.start_transaction().await.map_err(classify)?;

        let updated = match self
            .accounts
            .inner()
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .session(&mut session)
            .await
        {
            Ok(u) => u,
            Err(e) => {
                abort_quietly(&mut session).await;
                return Err(classify(e));
            }
        };

        let Some(stored) = updated else {
            abort_quietly(&mut session).await;
            return Err(self.conflict_or_missing(&account.user_id).await);
        };

        if let Err(e) = self
            .purchases
            .inner()
            .insert_one(&record)
            .session(&mut session)
            .await
        {
            abort_quietly(&mut session).await;
            return Err(classify(e));
        }

        session.commit_transaction().await.map_err(classify)?;
        Ok(stored)
    }

    async fn update_display_name(
        &self,
        user_id: &str,
        display_name: &str,
    ) -> Result<AccountDoc, StoreError> {
        let updated = self
            .accounts
            .inner()
            .find_one_and_update(
                doc! { "user_id": user_id, "metadata.is_deleted": { "$ne": true } },
                doc! {
                    "$set": {
                        "display_name": display_name,
                        "metadata.updated_at": DateTime::now(),
                    },
                    "$inc": { "version": 1_i64 },
                },
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(classify)?;

        updated.ok_or(StoreError::NotFound)
    }

    async fn list_accounts(&self, limit: i64) -> Result<Vec<AccountDoc>, StoreError> {
        let options = FindOptions::builder()
            .sort(doc! { "metadata.created_at": -1 })
            .limit(limit)
            .build();

        self.accounts
            .find_many(doc! {}, Some(options))
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))
    }

    async fn purchase_history(
        &self,
        user_id: &str,
    ) -> Result<Vec<PurchaseRecordDoc>, StoreError> {
        let options = FindOptions::builder()
            .sort(doc! { "metadata.created_at": -1 })
            .build();

        self.purchases
            .find_many(doc! { "user_id": user_id }, Some(options))
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))
    }

    async fn overrides_for(
        &self,
        user_id: &str,
    ) -> Result<Vec<(Capability, bool)>, StoreError> {
        let rows = self
            .overrides
            .find_many(doc! { "user_id": user_id }, None)
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        Ok(rows.iter().filter_map(|r| r.as_override()).collect())
    }
}

async fn abort_quietly(session: &mut mongodb::ClientSession) {
    if let Err(e) = session.abort_transaction().await {
        warn!("Failed to abort ledger transaction: {}", e);
    }
}
