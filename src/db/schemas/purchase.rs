//! Purchase audit record schema
//!
//! Append-only: rows are inserted inside a successful purchase
//! transaction and never updated afterwards.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::{CurrencyUnit, Metadata};

/// Collection name for purchase records
pub const PURCHASE_COLLECTION: &str = "purchases";

/// One completed purchase
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PurchaseRecordDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at doubles as processed_at)
    #[serde(default)]
    pub metadata: Metadata,

    /// Buyer's account id
    pub user_id: String,

    /// Catalog key of the purchased product
    pub product_name: String,

    /// Amount actually charged
    pub cost: i64,

    /// Currency unit the cost was charged in
    pub currency: CurrencyUnit,

    /// Role granted by the purchase, when the effect changed the role
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_role: Option<Role>,

    /// Short description of the applied effect, for non-role purchases
    pub effect: String,
}

impl PurchaseRecordDoc {
    pub fn new(
        user_id: String,
        product_name: String,
        cost: i64,
        currency: CurrencyUnit,
        new_role: Option<Role>,
        effect: String,
    ) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            user_id,
            product_name,
            cost,
            currency,
            new_role,
            effect,
        }
    }
}

impl IntoIndexes for PurchaseRecordDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Per-user history lookups, newest first
            (
                doc! { "user_id": 1, "metadata.created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("user_history_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for PurchaseRecordDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
