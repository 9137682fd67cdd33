//! Prometheus metrics
//!
//! Counters and gauges recorded by the tracker, the lifecycle adapter
//! and the bridge. The embedding application owns the exporter endpoint;
//! this module only registers and records.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, Counter, CounterVec, GaugeVec,
};

lazy_static! {
    pub static ref EVENTS_PUBLISHED: CounterVec = register_counter_vec!(
        "met_wallet_events_published_total",
        "Core bus events published by name",
        &["event"]
    )
    .unwrap();

    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "met_wallet_transactions_submitted_total",
        "Transactions broadcast per chain",
        &["chain"]
    )
    .unwrap();

    pub static ref TX_RECEIPTED: Counter = register_counter!(
        "met_wallet_transactions_receipted_total",
        "Submissions that reached their terminal receipt"
    )
    .unwrap();

    pub static ref TX_FAILED: Counter = register_counter!(
        "met_wallet_transactions_failed_total",
        "Submissions that terminated with an error"
    )
    .unwrap();

    pub static ref TX_MERGED: Counter = register_counter!(
        "met_wallet_ledger_merges_total",
        "Ledger merge operations performed by the tracker"
    )
    .unwrap();

    pub static ref BRIDGE_EXPORTS: Counter = register_counter!(
        "met_wallet_bridge_exports_total",
        "Export (burn) transactions broadcast"
    )
    .unwrap();

    pub static ref BRIDGE_IMPORTS: Counter = register_counter!(
        "met_wallet_bridge_imports_total",
        "Import (mint) transactions broadcast"
    )
    .unwrap();

    pub static ref CHAIN_HEAD: GaugeVec = register_gauge_vec!(
        "met_wallet_chain_head_block",
        "Latest block number seen per chain",
        &["chain"]
    )
    .unwrap();
}

pub fn record_event_published(event: &str) {
    EVENTS_PUBLISHED.with_label_values(&[event]).inc();
}

pub fn record_tx_submitted(chain: &str) {
    TX_SUBMITTED.with_label_values(&[chain]).inc();
}

pub fn record_tx_receipted() {
    TX_RECEIPTED.inc();
}

pub fn record_tx_failed() {
    TX_FAILED.inc();
}

pub fn record_tx_merged() {
    TX_MERGED.inc();
}

pub fn record_bridge_export() {
    BRIDGE_EXPORTS.inc();
}

pub fn record_bridge_import() {
    BRIDGE_IMPORTS.inc();
}

pub fn record_block_seen(chain: &str, number: u64) {
    CHAIN_HEAD.with_label_values(&[chain]).set(number as f64);
}
