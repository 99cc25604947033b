//! `ProposerService`: owns the queue, the store, the chain gateway, and the
//! background tasks — the "Module-level global state" redesign from spec.md
//! §9, injected into the HTTP layer instead of living as process globals.

use alloy_signer_local::PrivateKeySigner;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::bundle_proposer::BundleProposer;
use crate::chain_gateway::ChainGateway;
use crate::config::Config;
use crate::deposit_watcher::DepositWatcher;
use crate::intention_handler::IntentionHandler;
use crate::name_resolver::{NameRegistry, NameResolver, NameResolverError};
use crate::pinner::Pinner;
use crate::queue::Queue;
use crate::store::Store;
use crate::store::postgres::PgStore;
use crate::webhook::WebhookNotifier;

/// Placeholder `NameRegistry`: no on-chain or off-chain name directory is
/// wired up yet, so every lookup unconditionally reports not-found.
struct ChainNameRegistry;

#[async_trait::async_trait]
impl NameRegistry for ChainNameRegistry {
    async fn lookup(&self, _name: &str) -> Result<Option<String>, NameResolverError> {
        Ok(None)
    }
}

pub struct ProposerService {
    pub store: Arc<dyn Store>,
    pub chain: Arc<ChainGateway>,
    pub intention_handler: Arc<IntentionHandler>,
    pub bundle_proposer: Arc<BundleProposer>,
    pub deposit_watcher: Arc<DepositWatcher>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("chain gateway initialization failed: {0}")]
    Chain(#[from] crate::chain_gateway::ChainGatewayError),
    #[error("invalid signer key: {0}")]
    Signer(String),
}

impl ProposerService {
    pub async fn try_new(config: &Config) -> Result<Self, ServiceError> {
        let store: Arc<dyn Store> = Arc::new(PgStore::connect(&config.db_url).await?);

        let chain = Arc::new(
            ChainGateway::try_new(
                &config.rpc_url(),
                &config.proposer_key,
                &config.bundle_tracker_address,
                &config.vault_tracker_address,
                &config.store_url,
            )
            .await?,
        );

        let name_resolver = Arc::new(NameResolver::new(
            Arc::new(ChainNameRegistry),
            Duration::from_millis(config.name_cache_ttl_ms),
        ));
        let queue = Arc::new(Queue::new(config.queue_cap));

        let intention_handler = Arc::new(IntentionHandler::new(
            store.clone(),
            chain.clone(),
            name_resolver,
            queue.clone(),
            config.auto_seed_vaults,
        ));

        let signer = PrivateKeySigner::from_str(&config.proposer_key)
            .map_err(|e| ServiceError::Signer(e.to_string()))?;
        let webhook = Arc::new(WebhookNotifier::new(
            config.webhook_url.clone(),
            config.webhook_secret.clone(),
        ));
        let pinner = Arc::new(Pinner::new(chain.clone(), config.pin_enabled));

        let bundle_proposer = Arc::new(BundleProposer::new(
            queue,
            store.clone(),
            chain.clone(),
            webhook,
            pinner,
            signer,
            Duration::from_millis(config.tick_ms),
            Duration::from_millis(config.bundle_timeout_ms),
        ));

        let deposit_watcher = Arc::new(DepositWatcher::new(
            chain.clone(),
            store.clone(),
            Duration::from_millis(config.deposit_poll_ms),
            0,
        ));

        Ok(ProposerService {
            store,
            chain,
            intention_handler,
            bundle_proposer,
            deposit_watcher,
        })
    }

    /// Spawns the background tick and deposit-discovery tasks. Returns their
    /// join handles so callers can await clean shutdown alongside the HTTP server.
    pub fn spawn_background_tasks(&self, cancel: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        let proposer = self.bundle_proposer.clone();
        let proposer_cancel = cancel.clone();
        let proposer_handle = tokio::spawn(async move {
            proposer.run(proposer_cancel).await;
        });

        let watcher = self.deposit_watcher.clone();
        let watcher_handle = tokio::spawn(async move {
            watcher.run(cancel).await;
        });

        vec![proposer_handle, watcher_handle]
    }
}
