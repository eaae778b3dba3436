//! HTTP API for health checks, status and monitoring
//!
//! Read-only. The relay's user-facing submission endpoint lives elsewhere;
//! this surface exists for operators and probes.

use crate::chain::ChainInteractor;
use crate::config::ApiConfig;
use crate::tx::{StoredTransaction, TransactionManager, TxStore};

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub chain: Arc<dyn ChainInteractor>,
    pub store: Arc<TxStore>,
    pub manager: Arc<TransactionManager>,
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .route("/transactions", get(get_transactions))
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Head block plus per-signer in-flight counts
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let block_number = match state.chain.block_number().await {
        Ok(block) => Some(block),
        Err(_) => None,
    };

    let mut signers = Vec::new();
    for signer in state.manager.signers() {
        let in_flight = match state.store.get_all_by_signer(signer).await {
            Ok(rows) => rows.len(),
            Err(_) => {
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(StatusResponse {
                        block_number,
                        signers: Vec::new(),
                    }),
                );
            }
        };
        crate::metrics::record_inflight(signer, in_flight);
        signers.push(SignerStatus {
            signer: format!("{:#x}", signer),
            in_flight,
        });
    }

    (StatusCode::OK, Json(StatusResponse { block_number, signers }))
}

/// Dump of the in-flight transaction store
async fn get_transactions(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_all().await {
        Ok(rows) => (StatusCode::OK, Json(TransactionsResponse { transactions: rows })),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(TransactionsResponse {
                transactions: Vec::new(),
            }),
        ),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct SignerStatus {
    signer: String,
    in_flight: usize,
}

#[derive(Serialize)]
struct StatusResponse {
    block_number: Option<u64>,
    signers: Vec<SignerStatus>,
}

#[derive(Serialize)]
struct TransactionsResponse {
    transactions: Vec<StoredTransaction>,
}
