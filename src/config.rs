//! Configuration for the proposer node (spec.md §6 "Required configuration").
//!
//! Loaded the way the teacher's facilitator does: CLI args (env-overridable
//! via `clap`'s `env` attribute) layered over defaults, with a `.env` file
//! loaded via `dotenvy` before parsing. Missing/invalid required values are a
//! startup-time [`ConfigError`] — the process exits non-zero rather than
//! starting with an invalid wallet or unreachable database.

use clap::Parser;
use std::net::IpAddr;

#[derive(Parser, Debug, Clone)]
#[command(name = "vault-proposer")]
#[command(about = "Proposer node for the vault intention-settlement protocol")]
pub struct Config {
    /// HTTP bind host.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// HTTP bind port.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// The proposer's canonical on-chain address. Must match `proposer_key`.
    #[arg(long, env = "PROPOSER_ADDRESS")]
    pub proposer_address: String,

    /// The proposer's private key (hex, 0x-prefixed), used to sign bundles
    /// and to submit on-chain transactions.
    #[arg(long, env = "PROPOSER_KEY")]
    pub proposer_key: String,

    /// Address of the on-chain bundle tracker contract.
    #[arg(long, env = "BUNDLE_TRACKER_ADDRESS")]
    pub bundle_tracker_address: String,

    /// Address of the on-chain vault tracker contract.
    #[arg(long, env = "VAULT_TRACKER_ADDRESS")]
    pub vault_tracker_address: String,

    /// JSON-RPC endpoint for the target chain.
    #[arg(long, env = "CHAIN_RPC_URL")]
    pub chain_rpc_url: String,

    /// API key appended to `chain_rpc_url`, if the provider requires one.
    #[arg(long, env = "CHAIN_API_KEY")]
    pub chain_api_key: Option<String>,

    /// Content-addressed store (IPFS) base URL.
    #[arg(long, env = "STORE_URL")]
    pub store_url: String,

    /// Postgres connection string.
    #[arg(long, env = "DB_URL")]
    pub db_url: String,

    /// Bundle-proposer tick period, in milliseconds.
    #[arg(long, env = "TICK_MS", default_value_t = 10_000)]
    pub tick_ms: u64,

    /// Per-tick deadline; a tick exceeding this is aborted and its snapshot discarded.
    #[arg(long, env = "BUNDLE_TIMEOUT_MS", default_value_t = 30_000)]
    pub bundle_timeout_ms: u64,

    /// Name-resolution cache TTL, in milliseconds.
    #[arg(long, env = "NAME_CACHE_TTL_MS", default_value_t = 3_600_000)]
    pub name_cache_ttl_ms: u64,

    /// Optional webhook endpoint notified after each successful bundle publish.
    #[arg(long, env = "WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// HMAC secret used to sign webhook payloads. Required if `webhook_url` is set.
    #[arg(long, env = "WEBHOOK_SECRET")]
    pub webhook_secret: Option<String>,

    /// Whether to pin published bundles to long-term storage.
    #[arg(long, env = "PIN_ENABLED", default_value_t = false)]
    pub pin_enabled: bool,

    /// Deposit-discovery poll period, in milliseconds.
    #[arg(long, env = "DEPOSIT_POLL_MS", default_value_t = 15_000)]
    pub deposit_poll_ms: u64,

    /// Optional cap on the pending-execution queue; submissions past this fail with `QueueFull`.
    #[arg(long, env = "QUEUE_CAP")]
    pub queue_cap: Option<usize>,

    /// Enqueue a zero-amount seed execution after every `CreateVault` (see SPEC_FULL.md §3).
    #[arg(long, env = "AUTO_SEED_VAULTS", default_value_t = false)]
    pub auto_seed_vaults: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("webhook_secret is required when webhook_url is set")]
    MissingWebhookSecret,
    #[error("proposer_address is not a canonical 20-byte hex address: {0}")]
    InvalidProposerAddress(String),
}

impl Config {
    /// Loads `.env` (if present), then parses CLI args/env vars, then validates
    /// cross-field invariants not expressible via `clap` alone.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let config = Config::parse();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.webhook_url.is_some() && self.webhook_secret.is_none() {
            return Err(ConfigError::MissingWebhookSecret);
        }
        crate::validator::validate_address(&self.proposer_address)
            .map_err(|_| ConfigError::InvalidProposerAddress(self.proposer_address.clone()))?;
        Ok(())
    }

    pub fn rpc_url(&self) -> String {
        match &self.chain_api_key {
            Some(key) => format!("{}{}", self.chain_rpc_url, key),
            None => self.chain_rpc_url.clone(),
        }
    }
}
