//! HTTP routes for Bursar

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::auth::extract_token_from_header;
use crate::auth::Claims;
use crate::server::AppState;
use crate::types::BursarError;

pub mod admin_users;
pub mod generate;
pub mod health;
pub mod profile;
pub mod purchase;
pub mod shop;

pub use admin_users::handle_admin_users_request;
pub use generate::handle_generate_content;
pub use health::{health_check, readiness_check, version_info};
pub use profile::{
    handle_me, handle_purchase_history, handle_update_display_name, ProfileResponse,
};
pub use purchase::handle_purchase_role;
pub use shop::handle_list_products;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Error payload shared by every route
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .body(full_body(json))
        .unwrap()
}

pub(crate) fn error_response(
    status: StatusCode,
    error: &str,
    code: Option<&str>,
) -> Response<BoxBody> {
    json_response(
        status,
        &ErrorResponse {
            error: error.to_string(),
            code: code.map(|c| c.to_string()),
        },
    )
}

pub(crate) fn cors_preflight() -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .header("Access-Control-Max-Age", "86400")
        .body(empty_body())
        .unwrap()
}

pub(crate) fn not_found_response(path: &str) -> Response<BoxBody> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(full_body(body.to_string()))
        .unwrap()
}

pub(crate) fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub(crate) fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Read and deserialize a JSON request body (bounded)
pub(crate) async fn parse_json_body<T: for<'de> Deserialize<'de>>(
    req: Request<Incoming>,
) -> Result<T, BursarError> {
    let body = req
        .collect()
        .await
        .map_err(|e| BursarError::Http(format!("Failed to read body: {}", e)))?;

    let bytes = body.to_bytes();
    if bytes.len() > 10240 {
        return Err(BursarError::Http("Request body too large".into()));
    }

    serde_json::from_slice(&bytes).map_err(|e| BursarError::Http(format!("Invalid JSON: {}", e)))
}

pub(crate) fn get_auth_header(req: &Request<Incoming>) -> Option<&str> {
    req.headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// Verify the bearer token and extract its claims.
/// 401 for a missing or invalid token; the account itself may still not
/// exist (that is the ledger's call, reported as 404 downstream).
pub(crate) fn authenticate(
    req: &Request<Incoming>,
    state: &AppState,
) -> Result<Claims, Response<BoxBody>> {
    let token = match extract_token_from_header(get_auth_header(req)) {
        Some(t) => t,
        None => {
            return Err(error_response(
                StatusCode::UNAUTHORIZED,
                "Authorization required",
                Some("NO_TOKEN"),
            ))
        }
    };

    let result = state.jwt.verify_token(token);
    if !result.valid {
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            "Invalid authentication",
            Some("INVALID_TOKEN"),
        ));
    }

    // verify_token guarantees claims on the valid path
    Ok(result.claims.unwrap())
}
