//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling; routing is a
//! plain `match` over method and path.

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::auth::JwtValidator;
use crate::config::Args;
use crate::ledger::PurchaseAuthority;
use crate::routes;
use crate::routes::BoxBody;
use crate::types::BursarError;

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Token validator for the identity provider's bearer tokens
    pub jwt: JwtValidator,
    /// The one writer of roles and balances
    pub authority: PurchaseAuthority,
    /// "mongodb" or "memory", for probes and the startup banner
    pub ledger_backend: &'static str,
    /// Outbound client for the content-generation service
    pub http_client: reqwest::Client,
    /// Process start, for uptime reporting
    pub started: Instant,
}

impl AppState {
    pub fn new(
        args: Args,
        authority: PurchaseAuthority,
        ledger_backend: &'static str,
    ) -> Result<Self, BursarError> {
        let jwt = if args.dev_mode && args.jwt_secret.is_none() {
            JwtValidator::new_dev()
        } else {
            JwtValidator::new(args.jwt_secret(), args.jwt_expiry_seconds)?
        };

        Ok(Self {
            args,
            jwt,
            authority,
            ledger_backend,
            http_client: reqwest::Client::new(),
            started: Instant::now(),
        })
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<(), BursarError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Bursar listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - insecure JWT secret allowed");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        // Liveness probe - returns 200 if bursar is running
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            routes::health_check(Arc::clone(&state))
        }

        // Readiness probe - returns 200 only if the ledger store responds
        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            routes::readiness_check(Arc::clone(&state)).await
        }

        // Version info for deployment verification
        (Method::GET, "/version") => routes::version_info(),

        // CORS preflight
        (Method::OPTIONS, _) => routes::cors_preflight(),

        // The purchase authority's endpoint
        (Method::POST, "/purchase-role") => {
            routes::handle_purchase_role(req, Arc::clone(&state)).await
        }

        // Public product catalog
        (Method::GET, "/shop/products") => routes::handle_list_products(Arc::clone(&state)),

        // Session facade: authoritative account snapshot
        (Method::GET, "/profile/me") => routes::handle_me(req, Arc::clone(&state)).await,
        (Method::PUT, "/profile/display-name") => {
            routes::handle_update_display_name(req, Arc::clone(&state)).await
        }
        (Method::GET, "/profile/purchases") => {
            routes::handle_purchase_history(req, Arc::clone(&state)).await
        }

        // Admin panel user management
        (_, p) if p.starts_with("/admin/users") => {
            routes::handle_admin_users_request(req, Arc::clone(&state), p).await
        }

        // Opaque AI content-generation proxy
        (Method::POST, "/generate-content") => {
            routes::handle_generate_content(req, Arc::clone(&state)).await
        }

        // Not found
        _ => routes::not_found_response(&path),
    };

    Ok(response)
}
