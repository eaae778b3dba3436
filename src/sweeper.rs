//! Periodic confirmation and repricing sweeps
//!
//! One loop owns both `reap_confirmed` and `boost_pending` and runs them
//! sequentially per tick, which is what keeps those two operations from ever
//! overlapping for a signer.

use crate::chain::ChainInteractor;
use crate::tx::TransactionManager;

use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

pub struct Sweeper {
    chain: Arc<dyn ChainInteractor>,
    manager: Arc<TransactionManager>,
    sweep_interval_ms: u64,
    shutdown: Arc<RwLock<bool>>,
}

impl Sweeper {
    pub fn new(
        chain: Arc<dyn ChainInteractor>,
        manager: Arc<TransactionManager>,
        sweep_interval_ms: u64,
    ) -> Self {
        Self {
            chain,
            manager,
            sweep_interval_ms,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Main sweep loop
    pub async fn run(&self) {
        let mut tick = interval(Duration::from_millis(self.sweep_interval_ms));
        info!("Sweeper started");

        loop {
            tick.tick().await;

            if *self.shutdown.read().await {
                break;
            }

            let block_number = match self.chain.block_number().await {
                Ok(block) => block,
                Err(e) => {
                    warn!("Failed to fetch head block, skipping sweep: {}", e);
                    continue;
                }
            };
            crate::metrics::record_block_height(block_number);

            if let Err(e) = self.manager.reap_confirmed(block_number).await {
                error!("Confirmation sweep failed: {}", e);
            }

            for signer in self.manager.signers() {
                match self.manager.boost_pending(signer, block_number).await {
                    Ok(boosted) if !boosted.is_empty() => {
                        info!(
                            signer = ?signer,
                            count = boosted.len(),
                            block_number,
                            "boosted stale transactions"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(signer = ?signer, "Boost sweep failed: {}", e);
                    }
                }
            }
        }

        info!("Sweeper stopped");
    }

    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }
}
