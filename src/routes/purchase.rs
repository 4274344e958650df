//! Purchase endpoint
//!
//! `POST /purchase-role` - exchange Claions or Claints for a product.
//! The body names the product; the buyer is whoever the bearer token
//! says. The response carries the authoritative post-purchase balances,
//! which the client must adopt wholesale (no optimistic local debits).

use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::Role;
use crate::ledger::PurchaseError;
use crate::routes::{
    authenticate, error_response, json_response, parse_json_body, BoxBody, ErrorResponse,
};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseRequest {
    product_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseResponse {
    success: bool,
    message: String,
    new_role: Role,
    remaining_claions: i64,
    remaining_claints: i64,
}

/// POST /purchase-role
pub async fn handle_purchase_role(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let claims = match authenticate(&req, &state) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let body: PurchaseRequest = match parse_json_body(req).await {
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

    match state.authority.purchase(&claims.sub, &body.product_name).await {
        Ok(outcome) => json_response(
            StatusCode::OK,
            &PurchaseResponse {
                success: true,
                message: outcome.message,
                new_role: outcome.account.role,
                remaining_claions: outcome.account.claions,
                remaining_claints: outcome.account.claints,
            },
        ),
        Err(e) => purchase_error_response(e),
    }
}

/// Map the purchase taxonomy onto HTTP statuses. Every failure is
/// terminal and reported verbatim; nothing downgrades to a default.
fn purchase_error_response(e: PurchaseError) -> Response<BoxBody> {
    let (status, code) = match &e {
        PurchaseError::Unauthorized => (StatusCode::NOT_FOUND, "PROFILE_NOT_FOUND"),
        PurchaseError::UnknownProduct => (StatusCode::BAD_REQUEST, "UNKNOWN_PRODUCT"),
        PurchaseError::NoOpUpgrade { .. } => (StatusCode::BAD_REQUEST, "NO_OP_UPGRADE"),
        PurchaseError::InsufficientFunds { .. } => {
            (StatusCode::BAD_REQUEST, "INSUFFICIENT_FUNDS")
        }
        PurchaseError::Storage { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
    };

    error_response(status, &e.to_string(), Some(code))
}
