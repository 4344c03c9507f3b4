//! Prometheus metrics for the order pipeline.

#![allow(dead_code)]

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Metric names as constants for consistency
pub mod names {
    pub const ORDERS_SUBMITTED_TOTAL: &str = "currex_orders_submitted_total";
    pub const ORDERS_BOOKED_TOTAL: &str = "currex_orders_booked_total";
    pub const LOCKS_FAILED_TOTAL: &str = "currex_locks_failed_total";
    pub const MATCHES_TOTAL: &str = "currex_matches_total";
    pub const SETTLEMENTS_TOTAL: &str = "currex_settlements_total";
    pub const EXPIRATIONS_TOTAL: &str = "currex_expirations_total";
    pub const CANCELLATIONS_TOTAL: &str = "currex_cancellations_total";
    pub const CANCEL_FAILURES_TOTAL: &str = "currex_cancel_failures_total";
    pub const LEDGER_BATCHES_TOTAL: &str = "currex_ledger_batches_total";
    pub const LEDGER_EVENTS_TOTAL: &str = "currex_ledger_events_total";
}

/// Label keys
pub mod labels {
    pub const METHOD: &str = "method";
    pub const PAIR: &str = "pair";
}

/// Initialize the Prometheus exporter; the handle renders `/metrics`.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

pub fn record_order_submitted() {
    counter!(names::ORDERS_SUBMITTED_TOTAL).increment(1);
}

pub fn record_order_booked() {
    counter!(names::ORDERS_BOOKED_TOTAL).increment(1);
}

pub fn record_lock_failed() {
    counter!(names::LOCKS_FAILED_TOTAL).increment(1);
}

pub fn record_match(pair: &str) {
    counter!(names::MATCHES_TOTAL, labels::PAIR => pair.to_string()).increment(1);
}

pub fn record_settlement() {
    counter!(names::SETTLEMENTS_TOTAL).increment(1);
}

pub fn record_expiration() {
    counter!(names::EXPIRATIONS_TOTAL).increment(1);
}

pub fn record_cancellation() {
    counter!(names::CANCELLATIONS_TOTAL).increment(1);
}

pub fn record_cancel_failure() {
    counter!(names::CANCEL_FAILURES_TOTAL).increment(1);
}

/// One batched invocation sent to the ledger (`lock`, `expire`,
/// `cancel` or `exchange`).
pub fn record_ledger_batch(method: &str) {
    counter!(names::LEDGER_BATCHES_TOTAL, labels::METHOD => method.to_string()).increment(1);
}

pub fn record_ledger_event() {
    counter!(names::LEDGER_EVENTS_TOTAL).increment(1);
}
