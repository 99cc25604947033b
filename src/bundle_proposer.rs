//! C6 — BundleProposer: the periodic tick that drains the pending queue,
//! assembles, signs, anchors, persists, and applies a bundle (spec.md §4.6).
//!
//! Single-flight: only one tick may be in progress at a time. Overlapping
//! ticks are dropped, mirroring the teacher's `SigDown`-gated background
//! task pattern rather than the `ChainProvider`'s own retry logic (this
//! core does not retry — see spec.md §7).

use alloy_primitives::eip191_hash_message;
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::bundle_codec;
use crate::chain_gateway::ChainGateway;
use crate::model::{Bundle, BundleBody};
use crate::pinner::Pinner;
use crate::queue::Queue;
use crate::store::Store;
use crate::webhook::WebhookNotifier;

pub struct BundleProposer {
    queue: Arc<Queue>,
    store: Arc<dyn Store>,
    chain: Arc<ChainGateway>,
    webhook: Arc<WebhookNotifier>,
    pinner: Arc<Pinner>,
    signer: PrivateKeySigner,
    proposer_address: String,
    tick: Duration,
    timeout: Duration,
    in_flight: AtomicBool,
}

impl BundleProposer {
    pub fn new(
        queue: Arc<Queue>,
        store: Arc<dyn Store>,
        chain: Arc<ChainGateway>,
        webhook: Arc<WebhookNotifier>,
        pinner: Arc<Pinner>,
        signer: PrivateKeySigner,
        tick: Duration,
        timeout: Duration,
    ) -> Self {
        let proposer_address = format!("{:#x}", signer.address());
        BundleProposer {
            queue,
            store,
            chain,
            webhook,
            pinner,
            signer,
            proposer_address,
            tick,
            timeout,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Runs the tick loop until `cancel` fires. Intended to be spawned as a
    /// background task alongside the HTTP server.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("bundle proposer shutting down");
                    return;
                }
                _ = interval.tick() => {
                    self.clone().try_tick().await;
                }
            }
        }
    }

    async fn try_tick(self: Arc<Self>) {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("skipping tick: previous tick still in flight");
            return;
        }
        let result = tokio::time::timeout(self.timeout, self.tick_once()).await;
        self.in_flight.store(false, Ordering::SeqCst);
        match result {
            Ok(Ok(Some((nonce, cid)))) => {
                tracing::info!(nonce, cid = %cid, "bundle published");
            }
            Ok(Ok(None)) => {} // nothing pending
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "bundle tick failed; snapshot discarded");
            }
            Err(_) => {
                tracing::warn!("bundle tick exceeded deadline; snapshot discarded");
            }
        }
    }

    async fn tick_once(&self) -> Result<Option<(i64, String)>, BundleTickError> {
        let executions = self.queue.drain().await;
        if executions.is_empty() {
            return Ok(None);
        }

        let nonce = self.store.next_bundle_nonce().await?;
        let body = BundleBody {
            bundle: executions.clone(),
            nonce,
        };
        let canonical = bundle_codec::canonical_json(&body)?;
        let hash = eip191_hash_message(&canonical);
        let signature = self
            .signer
            .sign_hash_sync(&hash)
            .map_err(|e| BundleTickError::Sign(e.to_string()))?;
        let signature_hex = format!("0x{}", hex::encode(signature.as_bytes()));

        let payload = bundle_codec::encode(&body)?;
        let cid = self.chain.store_put(payload.clone().into_bytes()).await?;

        self.chain.propose(&cid).await?;

        let bundle = Bundle {
            nonce,
            proposer: self.proposer_address.clone(),
            signature: signature_hex,
            cid: cid.clone(),
            body,
        };

        // Step 6 failing here would leave the on-chain anchor unmatched by
        // local state; that is escalated at error! level, not retried.
        if let Err(e) = self.store.commit_bundle(&bundle, &executions).await {
            tracing::error!(nonce, cid = %cid, error = %e, "bundle committed on-chain but local commit failed");
            return Err(BundleTickError::Store(e));
        }

        self.pinner.pin(&cid, &payload, nonce).await;
        self.webhook.notify_bundle_proposed(&bundle.body, &cid, nonce).await;

        Ok(Some((nonce, cid)))
    }
}

#[derive(Debug, thiserror::Error)]
enum BundleTickError {
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("codec error: {0}")]
    Codec(#[from] crate::bundle_codec::BundleCodecError),
    #[error("chain gateway error: {0}")]
    Chain(#[from] crate::chain_gateway::ChainGatewayError),
    #[error("signing failed: {0}")]
    Sign(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Destination, ExecutionObject, FeeEntry, Intention, IntentionInput, IntentionOutput, Transfer};
    use crate::store::memory::MemoryStore;
    use crate::timestamp::UnixTimestamp;
    use crate::util::Amount;
    use std::str::FromStr;

    fn sample_execution(nonce: u64) -> ExecutionObject {
        ExecutionObject {
            intention: Intention {
                action: "send".to_string(),
                nonce,
                expiry: UnixTimestamp::try_now().unwrap() + 60,
                inputs: vec![IntentionInput {
                    asset: "0x0000000000000000000000000000000000000000".to_string(),
                    amount: Amount::from_str("100").unwrap(),
                    chain_id: 1,
                    from: Some(1),
                    data: None,
                }],
                outputs: vec![IntentionOutput {
                    asset: "0x0000000000000000000000000000000000000000".to_string(),
                    amount: Amount::from_str("100").unwrap(),
                    chain_id: 1,
                    to: Some(2),
                    to_external: None,
                    data: None,
                }],
                total_fee: vec![FeeEntry { asset: vec!["ETH".to_string()], amount: Amount::zero() }],
                proposer_tip: vec![],
                protocol_fee: vec![],
                agent_tip: vec![],
            },
            from: 1,
            proof: vec![Transfer {
                token: "0x0000000000000000000000000000000000000000".to_string(),
                from_vault_id: 1,
                to: Destination::Vault(2),
                amount: Amount::from_str("100").unwrap(),
                deposit_id: None,
            }],
            signature: "0xsig".to_string(),
        }
    }

    #[tokio::test]
    async fn drains_queue_and_assigns_gapless_nonces() {
        let store = Arc::new(MemoryStore::new());
        store.seed_vault(1, vec!["0xaaa".to_string()]);
        store.seed_vault(2, vec![]);
        store.seed_balance(1, "0x0000000000000000000000000000000000000000", Amount::from_str("1000").unwrap());

        let queue = Arc::new(Queue::new(None));
        queue.push(sample_execution(1)).await;

        let bundle = BundleBody {
            bundle: vec![sample_execution(1)],
            nonce: store.next_bundle_nonce().await.unwrap(),
        };
        assert_eq!(bundle.nonce, 0);

        let drained = queue.drain().await;
        assert_eq!(drained.len(), 1);
        assert_eq!(queue.len().await, 0);
    }
}
