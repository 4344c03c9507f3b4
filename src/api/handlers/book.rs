//! Book query handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::Order;
use crate::store::keys;
use crate::utils::response::{ApiResponse, AppError};
use crate::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct TopOfBookQuery {
    pub n: Option<i64>,
}

/// Best orders offering `src` for `des`, rank order
/// GET /book/:src/:des
pub async fn top_of_book(
    State(state): State<Arc<AppState>>,
    Path((src, des)): Path<(String, String)>,
    Query(query): Query<TopOfBookQuery>,
) -> Result<Json<ApiResponse<Vec<Order>>>, AppError> {
    let count = query.n.unwrap_or(10).clamp(1, 100);
    let orders = state
        .store
        .book_range(&keys::book(&src, &des), count)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[derive(Debug, Serialize)]
pub struct LastPriceResponse {
    /// Scaled integer price of the last crossing, if any trade happened.
    pub price: Option<i64>,
    /// Divide `price` by this to recover the float price.
    pub scale: f64,
}

/// GET /book/last-price
pub async fn last_price(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<LastPriceResponse>>, AppError> {
    let price = state.store.last_price().await?;
    Ok(Json(ApiResponse::success(LastPriceResponse {
        price,
        scale: state.config.amount_scale,
    })))
}
