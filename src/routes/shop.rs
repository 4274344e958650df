//! Shop catalog endpoint
//!
//! `GET /shop/products` - the public product listing the shop dialog
//! renders. No authentication: prices are not a secret.

use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::ledger::Product;
use crate::routes::{json_response, BoxBody};
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProductListResponse<'a> {
    products: &'a [Product],
}

/// GET /shop/products
pub fn handle_list_products(state: Arc<AppState>) -> Response<BoxBody> {
    json_response(
        StatusCode::OK,
        &ProductListResponse {
            products: state.authority.catalog().products(),
        },
    )
}
