//! Content-generation proxy
//!
//! `POST /generate-content` - forwards a prompt to the platform's
//! AI content-generation service and relays the generated text. The
//! service is opaque to us: a failure comes back to the user as one
//! generic error and is never retried here.
//!
//! Gated on `CreateContent`, the same capability that gates the upload
//! dialog this feeds.

use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::auth::Capability;
use crate::routes::admin_users::require_capability;
use crate::routes::{error_response, json_response, parse_json_body, BoxBody, ErrorResponse};
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    prompt: String,
    content_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct GenerateResponse {
    content: String,
}

/// POST /generate-content
pub async fn handle_generate_content(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let claims = match require_capability(&req, &state, Capability::CreateContent).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let Some(generate_url) = state.args.generate_url.clone() else {
        return error_response(
            StatusCode::NOT_IMPLEMENTED,
            "Content generation is not enabled",
            Some("NOT_ENABLED"),
        );
    };

    let body: GenerateRequest = match parse_json_body(req).await {
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

    if body.prompt.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Prompt must not be empty",
            Some("EMPTY_PROMPT"),
        );
    }

    let result = state
        .http_client
        .post(&generate_url)
        .timeout(Duration::from_millis(state.args.generate_timeout_ms))
        .json(&body)
        .send()
        .await;

    let response = match result {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            warn!(user_id = %claims.sub, status = %r.status(), "Content generation upstream error");
            return error_response(
                StatusCode::BAD_GATEWAY,
                "Failed to generate content",
                Some("GENERATION_FAILED"),
            );
        }
        Err(e) => {
            warn!(user_id = %claims.sub, error = %e, "Content generation request failed");
            return error_response(
                StatusCode::BAD_GATEWAY,
                "Failed to generate content",
                Some("GENERATION_FAILED"),
            );
        }
    };

    match response.json::<GenerateResponse>().await {
        Ok(generated) => json_response(StatusCode::OK, &generated),
        Err(e) => {
            warn!(user_id = %claims.sub, error = %e, "Content generation returned malformed body");
            error_response(
                StatusCode::BAD_GATEWAY,
                "Failed to generate content",
                Some("GENERATION_FAILED"),
            )
        }
    }
}
