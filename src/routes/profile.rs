//! Profile endpoints
//!
//! The client facade's session surface. Every response carries the
//! authoritative ledger snapshot; the UI replaces its cached profile
//! with it instead of mutating local state.
//!
//! - `GET /profile/me`           - snapshot + resolved capabilities
//! - `PUT /profile/display-name` - rename
//! - `GET /profile/purchases`    - the caller's audit trail

use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::auth::{resolve, Capability, Role};
use crate::db::schemas::{AccountDoc, CurrencyUnit, PurchaseRecordDoc};
use crate::ledger::StoreError;
use crate::routes::{
    authenticate, error_response, json_response, parse_json_body, BoxBody, ErrorResponse,
};
use crate::server::AppState;

const MAX_DISPLAY_NAME_LEN: usize = 100;

/// Authoritative account snapshot returned by every profile-touching call
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
    pub claions: i64,
    pub claints: i64,
    pub capabilities: Vec<Capability>,
    /// Present while a timed role grant is active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timed_role_expires_at: Option<String>,
}

impl ProfileResponse {
    pub fn from_account(account: &AccountDoc, capabilities: Vec<Capability>) -> Self {
        Self {
            user_id: account.user_id.clone(),
            display_name: account.display_name.clone(),
            role: account.role,
            claions: account.claions,
            claints: account.claints,
            capabilities,
            timed_role_expires_at: account
                .timed_role
                .as_ref()
                .and_then(|t| t.expires_at.try_to_rfc3339_string().ok()),
        }
    }
}

/// Resolve the account's capabilities, tolerating an unreachable
/// override table (role defaults apply)
pub(crate) async fn resolved_capabilities(
    state: &AppState,
    account: &AccountDoc,
) -> Vec<Capability> {
    let overrides = match state.authority.store().overrides_for(&account.user_id).await {
        Ok(o) => o,
        Err(e) => {
            warn!(user_id = %account.user_id, error = %e, "Override lookup failed, using role defaults");
            Vec::new()
        }
    };
    resolve(account.role, &overrides)
}

fn store_error_response(e: StoreError) -> Response<BoxBody> {
    match e {
        StoreError::NotFound => error_response(
            StatusCode::NOT_FOUND,
            "Profile not found",
            Some("NOT_FOUND"),
        ),
        other => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("Database error: {}", other),
            Some("DB_ERROR"),
        ),
    }
}

/// GET /profile/me
///
/// Creates the account with signup defaults on first contact, applies
/// lazy timed-role expiry, and returns the snapshot.
pub async fn handle_me(req: Request<Incoming>, state: Arc<AppState>) -> Response<BoxBody> {
    let claims = match authenticate(&req, &state) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let display_name = claims
        .display_name
        .clone()
        .unwrap_or_else(|| claims.identifier.clone());

    let account = match state
        .authority
        .store()
        .ensure_account(&claims.sub, &display_name, state.args.signup_bonus_claions)
        .await
    {
        Ok(a) => a,
        Err(e) => return store_error_response(e),
    };

    let account = state.authority.reconcile_expiry(account).await;
    let capabilities = resolved_capabilities(&state, &account).await;

    json_response(
        StatusCode::OK,
        &ProfileResponse::from_account(&account, capabilities),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateDisplayNameRequest {
    display_name: String,
}

/// PUT /profile/display-name
pub async fn handle_update_display_name(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let claims = match authenticate(&req, &state) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let body: UpdateDisplayNameRequest = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                &ErrorResponse {
                    error: format!("Invalid JSON body: {}", e),
                    code: None,
                },
            )
        }
    };

    let display_name = body.display_name.trim();
    if display_name.is_empty() || display_name.len() > MAX_DISPLAY_NAME_LEN {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Display name must be between 1 and 100 characters",
            Some("INVALID_DISPLAY_NAME"),
        );
    }

    let account = match state
        .authority
        .store()
        .update_display_name(&claims.sub, display_name)
        .await
    {
        Ok(a) => a,
        Err(e) => return store_error_response(e),
    };

    let account = state.authority.reconcile_expiry(account).await;
    let capabilities = resolved_capabilities(&state, &account).await;

    json_response(
        StatusCode::OK,
        &ProfileResponse::from_account(&account, capabilities),
    )
}

/// One row of the caller's purchase history
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseView {
    product_name: String,
    cost: i64,
    currency: CurrencyUnit,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_role: Option<Role>,
    effect: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    processed_at: Option<String>,
}

impl From<&PurchaseRecordDoc> for PurchaseView {
    fn from(record: &PurchaseRecordDoc) -> Self {
        Self {
            product_name: record.product_name.clone(),
            cost: record.cost,
            currency: record.currency,
            new_role: record.new_role,
            effect: record.effect.clone(),
            processed_at: record
                .metadata
                .created_at
                .and_then(|d| d.try_to_rfc3339_string().ok()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseHistoryResponse {
    purchases: Vec<PurchaseView>,
}

/// GET /profile/purchases
pub async fn handle_purchase_history(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let claims = match authenticate(&req, &state) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let records = match state.authority.store().purchase_history(&claims.sub).await {
        Ok(r) => r,
        Err(e) => return store_error_response(e),
    };

    json_response(
        StatusCode::OK,
        &PurchaseHistoryResponse {
            purchases: records.iter().map(PurchaseView::from).collect(),
        },
    )
}
