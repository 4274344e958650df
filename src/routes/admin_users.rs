//! Admin panel endpoints for user management
//!
//! ## Endpoints
//!
//! - `GET /admin/users` - list accounts with roles and balances
//! - `PUT /admin/users/{id}/role` - administrative role grant
//!
//! ## Authorization
//!
//! The listing needs `AccessAdminPanel` (every role except owner; owners
//! use their own surface, which also routes here with `OwnerControls`).
//! Role changes need `ManageUserRoles`, and never apply to the caller's
//! own account: an admin cannot elevate themselves outside the purchase
//! path.

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::auth::{Capability, Claims, Role};
use crate::db::schemas::AccountDoc;
use crate::ledger::PurchaseError;
use crate::routes::profile::resolved_capabilities;
use crate::routes::{
    authenticate, error_response, json_response, parse_json_body, BoxBody, ErrorResponse,
};
use crate::server::AppState;

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 200;

/// Account summary for the admin panel listing
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
    pub claions: i64,
    pub claints: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl From<&AccountDoc> for UserSummary {
    fn from(account: &AccountDoc) -> Self {
        Self {
            user_id: account.user_id.clone(),
            display_name: account.display_name.clone(),
            role: account.role,
            claions: account.claions,
            claints: account.claints,
            created_at: account
                .metadata
                .created_at
                .and_then(|d| d.try_to_rfc3339_string().ok()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UsersResponse {
    users: Vec<UserSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRoleRequest {
    role: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRoleResponse {
    success: bool,
    message: String,
    user: UserSummary,
}

/// Authenticate the caller and check one capability against their
/// resolved set (role defaults plus overrides)
pub(crate) async fn require_capability(
    req: &Request<Incoming>,
    state: &AppState,
    capability: Capability,
) -> Result<Claims, Response<BoxBody>> {
    let claims = authenticate(req, state)?;

    let display_name = claims
        .display_name
        .clone()
        .unwrap_or_else(|| claims.identifier.clone());

    let account = state
        .authority
        .store()
        .ensure_account(&claims.sub, &display_name, state.args.signup_bonus_claions)
        .await
        .map_err(|e| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("Database error: {}", e),
                Some("DB_ERROR"),
            )
        })?;

    let account = state.authority.reconcile_expiry(account).await;
    let capabilities = resolved_capabilities(state, &account).await;

    if !capabilities.contains(&capability) {
        return Err(error_response(
            StatusCode::FORBIDDEN,
            &format!("{} permission required", capability),
            Some("FORBIDDEN"),
        ));
    }

    Ok(claims)
}

/// Main handler for /admin/users/* routes
pub async fn handle_admin_users_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    path: &str,
) -> Response<BoxBody> {
    let method = req.method().clone();
    let subpath = path.strip_prefix("/admin/users").unwrap_or("").to_string();

    match (method, subpath.as_str()) {
        // GET /admin/users - list accounts
        (Method::GET, "") | (Method::GET, "/") => handle_list_users(req, state).await,

        // PUT /admin/users/{id}/role - administrative role grant
        (Method::PUT, p) if p.ends_with("/role") => {
            let target = p
                .trim_start_matches('/')
                .trim_end_matches("/role")
                .to_string();
            if target.is_empty() {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "Missing user id in path",
                    None,
                );
            }
            handle_update_role(req, state, &target).await
        }

        _ => json_response(
            StatusCode::NOT_FOUND,
            &ErrorResponse {
                error: "Admin endpoint not found".into(),
                code: None,
            },
        ),
    }
}

/// GET /admin/users
async fn handle_list_users(req: Request<Incoming>, state: Arc<AppState>) -> Response<BoxBody> {
    let limit = parse_limit(req.uri().query());

    if let Err(resp) = require_capability(&req, &state, Capability::AccessAdminPanel).await {
        // Owners don't hold AccessAdminPanel; their controls surface is
        // allowed to read the same listing
        if require_capability(&req, &state, Capability::OwnerControls)
            .await
            .is_err()
        {
            return resp;
        }
    }

    match state.authority.store().list_accounts(limit).await {
        Ok(accounts) => json_response(
            StatusCode::OK,
            &UsersResponse {
                users: accounts.iter().map(UserSummary::from).collect(),
            },
        ),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("Database error: {}", e),
            Some("DB_ERROR"),
        ),
    }
}

/// PUT /admin/users/{id}/role
async fn handle_update_role(
    req: Request<Incoming>,
    state: Arc<AppState>,
    target_user_id: &str,
) -> Response<BoxBody> {
    let claims = match require_capability(&req, &state, Capability::ManageUserRoles).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    // Self-role-change is refused regardless of privilege
    if claims.sub == target_user_id {
        return error_response(
            StatusCode::FORBIDDEN,
            "You cannot change your own role",
            Some("SELF_ROLE_CHANGE"),
        );
    }

    let body: UpdateRoleRequest = match parse_json_body(req).await {
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

    let Some(new_role) = Role::parse(&body.role) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!("Invalid role: {}", body.role),
            Some("INVALID_ROLE"),
        );
    };

    match state.authority.set_role(target_user_id, new_role).await {
        Ok(account) => {
            info!(
                actor = %claims.sub,
                target = %target_user_id,
                role = %new_role,
                "Admin role update"
            );
            json_response(
                StatusCode::OK,
                &UpdateRoleResponse {
                    success: true,
                    message: format!("User role has been updated to {}.", new_role),
                    user: UserSummary::from(&account),
                },
            )
        }
        Err(PurchaseError::Unauthorized) => error_response(
            StatusCode::NOT_FOUND,
            "Profile not found",
            Some("NOT_FOUND"),
        ),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &e.to_string(),
            Some("STORAGE_ERROR"),
        ),
    }
}

fn parse_limit(query: Option<&str>) -> i64 {
    let mut limit = DEFAULT_LIST_LIMIT;

    if let Some(q) = query {
        for pair in q.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                if key == "limit" {
                    let value = urlencoding::decode(value).unwrap_or_default();
                    limit = value.parse().unwrap_or(DEFAULT_LIST_LIMIT);
                }
            }
        }
    }

    limit.clamp(1, MAX_LIST_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_limit() {
        assert_eq!(parse_limit(None), DEFAULT_LIST_LIMIT);
        assert_eq!(parse_limit(Some("limit=10")), 10);
        assert_eq!(parse_limit(Some("search=x&limit=25")), 25);
        assert_eq!(parse_limit(Some("limit=junk")), DEFAULT_LIST_LIMIT);
        // Clamped to sane bounds
        assert_eq!(parse_limit(Some("limit=100000")), MAX_LIST_LIMIT);
        assert_eq!(parse_limit(Some("limit=0")), 1);
    }
}
