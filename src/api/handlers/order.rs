//! Order API handlers.
//!
//! The REST surface is intentionally thin: submission and cancellation
//! only enqueue work for the background pipeline, the probes report
//! which terminal set an order has reached so clients can stop polling.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::metrics;
use crate::models::{Order, OrderStatus};
use crate::store::{keys, Store};
use crate::utils::response::{ApiResponse, AppError};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOrderRequest {
    pub account: String,
    pub src_currency: String,
    pub src_count: f64,
    pub des_currency: String,
    pub des_count: f64,
    #[serde(default)]
    pub is_buy_all: bool,
    /// Unix seconds; 0 or absent means no expiry.
    #[serde(default)]
    pub expired_time: i64,
}

#[derive(Debug, Serialize)]
pub struct SubmitOrderResponse {
    pub uuid: String,
}

fn validate_currency(code: &str, field: &str) -> Result<(), AppError> {
    if code.is_empty() {
        return Err(AppError::bad_request(&format!("{} must not be empty", field)));
    }
    if code.contains(':') {
        return Err(AppError::bad_request(&format!(
            "{} must not contain ':'",
            field
        )));
    }
    Ok(())
}

/// Create a new order
/// POST /orders
pub async fn submit_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitOrderRequest>,
) -> Result<Json<ApiResponse<SubmitOrderResponse>>, AppError> {
    if req.account.is_empty() {
        return Err(AppError::bad_request("account must not be empty"));
    }
    validate_currency(&req.src_currency, "srcCurrency")?;
    validate_currency(&req.des_currency, "desCurrency")?;
    if req.src_currency == req.des_currency {
        return Err(AppError::bad_request(
            "srcCurrency and desCurrency must differ",
        ));
    }
    if !(req.src_count > 0.0) {
        return Err(AppError::bad_request("srcCount must be greater than 0"));
    }
    if !(req.des_count > 0.0) {
        return Err(AppError::bad_request("desCount must be greater than 0"));
    }
    if req.expired_time < 0 {
        return Err(AppError::bad_request("expiredTime must not be negative"));
    }

    let order = Order::new(
        &req.account,
        &req.src_currency,
        req.src_count,
        &req.des_currency,
        req.des_count,
        req.is_buy_all,
        req.expired_time,
        chrono::Utc::now().timestamp(),
    );

    state.store.submit(&order).await?;
    metrics::record_order_submitted();
    tracing::info!(
        uuid = %order.uuid,
        account = %order.account,
        pair = %format!("{}:{}", order.src_currency, order.des_currency),
        "order accepted"
    );

    Ok(Json(ApiResponse::success(SubmitOrderResponse {
        uuid: order.uuid,
    })))
}

/// Get an order by id
/// GET /orders/:uuid
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Json<ApiResponse<Order>>, AppError> {
    let order = state.store.get_order(&uuid).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Request cancellation of a booked order
/// POST /orders/:uuid/cancel
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Json<ApiResponse<SubmitOrderResponse>>, AppError> {
    if !state.store.request_cancel(&uuid).await? {
        // Only orders currently sitting in a book can be cancelled.
        return Err(AppError::bad_request("order cannot be cancelled"));
    }
    tracing::info!(%uuid, "cancellation requested");
    Ok(Json(ApiResponse::success(SubmitOrderResponse { uuid })))
}

#[derive(Debug, Serialize)]
pub struct ProbeResponse {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Report whether a submitted order has been booked, has failed its
/// balance lock, or is still in flight
/// GET /orders/:uuid/status
pub async fn order_status(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Json<ApiResponse<ProbeResponse>>, AppError> {
    let raw = state.store.raw();

    if raw.set_contains(keys::PEND_SUCCESS, &uuid).await? {
        return Ok(Json(ApiResponse::success(ProbeResponse {
            state: "booked",
            reason: None,
        })));
    }

    if raw.set_contains(keys::PEND_FAIL, &uuid).await? {
        let reason = state.store.get_order(&uuid).await?.metadata;

        // A lock-failed order never entered the system; purge it in the
        // background once the failure has been reported.
        let store = state.store.clone();
        let purge_uuid = uuid.clone();
        tokio::spawn(async move {
            if let Err(e) = store.clear_failed_order(&purge_uuid).await {
                tracing::warn!(uuid = %purge_uuid, "failed to purge dead order: {}", e);
            }
        });

        return Ok(Json(ApiResponse::success(ProbeResponse {
            state: "failed",
            reason: Some(reason),
        })));
    }

    Ok(Json(ApiResponse::success(ProbeResponse {
        state: "pending",
        reason: None,
    })))
}

/// Report the outcome of a cancellation request
/// GET /orders/:uuid/cancel-status
pub async fn cancel_status(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Json<ApiResponse<ProbeResponse>>, AppError> {
    let raw = state.store.raw();

    if raw.set_contains(keys::CANCEL_SUCCESS, &uuid).await? {
        return Ok(Json(ApiResponse::success(ProbeResponse {
            state: "cancelled",
            reason: None,
        })));
    }

    if raw.set_contains(keys::CANCEL_FAIL, &uuid).await? {
        let reason = state.store.get_order(&uuid).await?.metadata;
        return Ok(Json(ApiResponse::success(ProbeResponse {
            state: "failed",
            reason: Some(reason),
        })));
    }

    Ok(Json(ApiResponse::success(ProbeResponse {
        state: "pending",
        reason: None,
    })))
}

#[derive(Debug, Deserialize, Default)]
pub struct ListOrdersQuery {
    /// Numeric status code filter (0 live, 1 finished, 2 expired,
    /// 3 cancelled).
    pub status: Option<u8>,
    pub limit: Option<usize>,
}

/// All orders an account has touched, most recently booked first
/// GET /accounts/:account/orders
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Path(account): Path<String>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ApiResponse<Vec<Order>>>, AppError> {
    let status_filter = match query.status {
        Some(code) => Some(
            OrderStatus::from_code(code)
                .ok_or_else(|| AppError::bad_request("unknown status code"))?,
        ),
        None => None,
    };

    let mut orders = state.store.orders_by_user(&account).await?;
    if let Some(status) = status_filter {
        orders.retain(|o| o.status == status);
    }
    orders.truncate(query.limit.unwrap_or(50).clamp(1, 200));

    Ok(Json(ApiResponse::success(orders)))
}
