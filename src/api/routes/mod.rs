use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers;
use crate::AppState;

pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        // Orders
        .route("/orders", post(handlers::order::submit_order))
        .route("/orders/:uuid", get(handlers::order::get_order))
        .route("/orders/:uuid/cancel", post(handlers::order::cancel_order))
        .route("/orders/:uuid/status", get(handlers::order::order_status))
        .route(
            "/orders/:uuid/cancel-status",
            get(handlers::order::cancel_status),
        )
        // Account history
        .route("/accounts/:account/orders", get(handlers::order::list_orders))
        // Books
        .route("/book/last-price", get(handlers::book::last_price))
        .route("/book/:src/:des", get(handlers::book::top_of_book))
}
