//! Deposit-discovery loop (SPEC_FULL.md §3): periodically scans the vault
//! tracker for `Deposited` events and feeds them into the deposit ledger via
//! `Store::insert_deposit_if_missing`, closing the loop implied by C4's
//! "append-only deposit discovery" responsibility. Runs alongside
//! [`crate::bundle_proposer::BundleProposer`], not inside it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::chain_gateway::{BlockRange, ChainGateway};
use crate::store::Store;

pub struct DepositWatcher {
    chain: Arc<ChainGateway>,
    store: Arc<dyn Store>,
    poll: Duration,
    last_scanned_block: AtomicU64,
}

impl DepositWatcher {
    pub fn new(chain: Arc<ChainGateway>, store: Arc<dyn Store>, poll: Duration, start_block: u64) -> Self {
        DepositWatcher {
            chain,
            store,
            poll,
            last_scanned_block: AtomicU64::new(start_block),
        }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("deposit watcher shutting down");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.scan_once().await {
                        tracing::warn!(error = %e, "deposit scan failed; will retry next poll");
                    }
                }
            }
        }
    }

    async fn scan_once(&self) -> Result<(), crate::chain_gateway::ChainGatewayError> {
        let from = self.last_scanned_block.load(Ordering::SeqCst);
        let to = from + 2_000;
        let deposits = self.chain.list_transfers(BlockRange { from, to }).await?;
        for deposit in &deposits {
            match self
                .store
                .insert_deposit_if_missing(
                    &deposit.tx_hash,
                    &deposit.transfer_uid,
                    deposit.chain_id,
                    &deposit.depositor,
                    &deposit.token,
                    deposit.amount,
                )
                .await
            {
                Ok(id) => tracing::debug!(deposit_id = id, transfer_uid = %deposit.transfer_uid, "deposit discovered"),
                Err(e) => tracing::warn!(error = %e, transfer_uid = %deposit.transfer_uid, "failed to record deposit"),
            }
        }
        self.last_scanned_block.store(to, Ordering::SeqCst);
        Ok(())
    }
}
