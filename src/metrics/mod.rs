//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Transactions sent, boosted and confirmed per signer
//! - Nonce fixes and gas price cap hits
//! - Chain head and in-flight store size

use axum::{routing::get, Router};
use ethers::types::Address;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Encoder, Gauge,
    GaugeVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    pub static ref CHAIN_BLOCK_HEIGHT: Gauge = register_gauge!(
        "metarelay_chain_block_height",
        "Last observed head block number"
    )
    .unwrap();

    pub static ref TX_SENT: CounterVec = register_counter_vec!(
        "metarelay_transactions_sent_total",
        "Total transactions broadcast, by signer and server action",
        &["signer", "action"]
    )
    .unwrap();

    pub static ref TX_BOOSTED: CounterVec = register_counter_vec!(
        "metarelay_transactions_boosted_total",
        "Total repriced rebroadcasts, by signer",
        &["signer"]
    )
    .unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "metarelay_transactions_confirmed_total",
        "Total rows pruned after deep confirmation, by signer",
        &["signer"]
    )
    .unwrap();

    pub static ref NONCE_FIXES: CounterVec = register_counter_vec!(
        "metarelay_nonce_fixes_total",
        "Times the chain pending count overtook the local counter, by signer",
        &["signer"]
    )
    .unwrap();

    pub static ref GAS_PRICE_CAPPED: CounterVec = register_counter_vec!(
        "metarelay_gas_price_capped_total",
        "Boosts clamped at the configured maximum gas price",
        &[]
    )
    .unwrap();

    pub static ref BROADCAST_FAILURES: CounterVec = register_counter_vec!(
        "metarelay_broadcast_failures_total",
        "Broadcasts that errored or returned a mismatching hash",
        &[]
    )
    .unwrap();

    pub static ref INFLIGHT_TRANSACTIONS: GaugeVec = register_gauge_vec!(
        "metarelay_inflight_transactions",
        "In-flight rows currently persisted, by signer",
        &["signer"]
    )
    .unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

// Helper functions to record metrics

pub fn record_block_height(block_number: u64) {
    CHAIN_BLOCK_HEIGHT.set(block_number as f64);
}

pub fn record_tx_sent(signer: Address, action: &str) {
    TX_SENT
        .with_label_values(&[&format!("{:#x}", signer), action])
        .inc();
}

pub fn record_boost(signer: Address) {
    TX_BOOSTED
        .with_label_values(&[&format!("{:#x}", signer)])
        .inc();
}

pub fn record_confirmed(signer: Address, pruned: u64) {
    TX_CONFIRMED
        .with_label_values(&[&format!("{:#x}", signer)])
        .inc_by(pruned as f64);
}

pub fn record_nonce_fix(signer: Address) {
    NONCE_FIXES
        .with_label_values(&[&format!("{:#x}", signer)])
        .inc();
}

pub fn record_gas_price_capped() {
    GAS_PRICE_CAPPED.with_label_values(&[]).inc();
}

pub fn record_broadcast_failure() {
    BROADCAST_FAILURES.with_label_values(&[]).inc();
}

pub fn record_inflight(signer: Address, rows: usize) {
    INFLIGHT_TRANSACTIONS
        .with_label_values(&[&format!("{:#x}", signer)])
        .set(rows as f64);
}
