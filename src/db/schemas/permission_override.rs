//! Per-account capability override schema
//!
//! The `user_permissions` table is owned by platform tooling outside this
//! service; the permission resolver only reads it. A row overrides the
//! role-derived default for exactly one capability, in either direction.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::auth::Capability;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for capability overrides
pub const PERMISSION_COLLECTION: &str = "user_permissions";

/// One capability override for one account
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PermissionOverrideDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Account the override applies to
    pub user_id: String,

    /// Capability name being overridden. Kept as the raw string because
    /// the table is shared with tooling that writes permission types this
    /// service does not model; unknown names are skipped on read.
    pub capability: String,

    /// true grants the capability, false revokes it
    #[serde(default)]
    pub is_allowed: bool,

    /// Account id of whoever granted the override, if recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted_by: Option<String>,
}

impl PermissionOverrideDoc {
    /// Parse into a (capability, allowed) pair, skipping unknown names
    pub fn as_override(&self) -> Option<(Capability, bool)> {
        Capability::parse(&self.capability).map(|c| (c, self.is_allowed))
    }
}

impl IntoIndexes for PermissionOverrideDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "user_id": 1 },
            Some(
                IndexOptions::builder()
                    .name("override_user_index".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for PermissionOverrideDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
