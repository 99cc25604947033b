//! C7 — ChainGateway: the proposer's one doorway onto the L2 tracker contracts
//! and the content-addressed store. Mirrors the teacher's `EvmProvider`
//! (`chain/evm.rs`): a composed Alloy provider plus a small, stable,
//! error-total surface — no partial state ever escapes a failed call.

use alloy_network::EthereumWallet;
use alloy_primitives::{Address, U256};
use alloy_provider::{Provider, ProviderBuilder, RootProvider};
use alloy_rpc_types_eth::{Filter, TransactionReceipt};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{SolEvent, sol};
use alloy_transport::TransportError;
use std::str::FromStr;
use std::time::Duration;

use crate::util::Amount;

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IBundleTracker {
        function propose(string calldata cid) external;
    }
}

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IVaultTracker {
        function createVault(address controller) external returns (uint256);
        function nextVaultId() external view returns (uint256);
        function getTokenDecimals(address token) external view returns (uint8);

        event Deposited(address indexed depositor, address indexed token, uint256 amount, bytes32 transferUid, uint256 indexed chainId);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChainGatewayError {
    #[error("rpc transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("contract call failed: {0}")]
    Contract(String),
    #[error("content store request failed: {0}")]
    ContentStore(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Narrow seam for checking on-chain vault existence, so callers that only
/// need this one fact (`IntentionHandler`'s admission path) can be exercised
/// against a fake in tests instead of a live RPC-backed `ChainGateway`.
#[async_trait::async_trait]
pub trait VaultOracle: Send + Sync {
    async fn next_vault_id(&self) -> Result<u64, ChainGatewayError>;
}

#[async_trait::async_trait]
impl VaultOracle for ChainGateway {
    async fn next_vault_id(&self) -> Result<u64, ChainGatewayError> {
        ChainGateway::next_vault_id(self).await
    }
}

/// A range of blocks to scan for deposit events.
#[derive(Debug, Clone, Copy)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

type InnerFiller = alloy_provider::fillers::JoinFill<
    alloy_provider::fillers::GasFiller,
    alloy_provider::fillers::JoinFill<
        alloy_provider::fillers::BlobGasFiller,
        alloy_provider::fillers::JoinFill<
            alloy_provider::fillers::NonceFiller,
            alloy_provider::fillers::ChainIdFiller,
        >,
    >,
>;

type EvmProvider = alloy_provider::fillers::FillProvider<
    alloy_provider::fillers::JoinFill<
        alloy_provider::fillers::JoinFill<alloy_provider::Identity, InnerFiller>,
        alloy_provider::fillers::WalletFiller<EthereumWallet>,
    >,
    RootProvider,
>;

pub struct ChainGateway {
    provider: EvmProvider,
    bundle_tracker: Address,
    vault_tracker: Address,
    content_store_url: String,
    http: reqwest::Client,
}

impl ChainGateway {
    pub async fn try_new(
        rpc_url: &str,
        private_key: &str,
        bundle_tracker: &str,
        vault_tracker: &str,
        content_store_url: &str,
    ) -> Result<Self, ChainGatewayError> {
        let signer = PrivateKeySigner::from_str(private_key)
            .map_err(|e| ChainGatewayError::InvalidAddress(e.to_string()))?;
        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .connect_http(
                rpc_url
                    .parse()
                    .map_err(|_| ChainGatewayError::InvalidAddress(rpc_url.to_string()))?,
            );
        let bundle_tracker = parse_address(bundle_tracker)?;
        let vault_tracker = parse_address(vault_tracker)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ChainGatewayError::ContentStore(e.to_string()))?;
        Ok(ChainGateway {
            provider,
            bundle_tracker,
            vault_tracker,
            content_store_url: content_store_url.to_string(),
            http,
        })
    }

    /// Submits `propose(cid)` on the bundle tracker and awaits the receipt.
    pub async fn propose(&self, cid: &str) -> Result<String, ChainGatewayError> {
        let tracker = IBundleTracker::new(self.bundle_tracker, &self.provider);
        let receipt: TransactionReceipt = tracker
            .propose(cid.to_string())
            .send()
            .await
            .map_err(|e| ChainGatewayError::Contract(e.to_string()))?
            .get_receipt()
            .await
            .map_err(|e| ChainGatewayError::Contract(e.to_string()))?;
        Ok(format!("{:#x}", receipt.transaction_hash))
    }

    pub async fn next_vault_id(&self) -> Result<u64, ChainGatewayError> {
        let tracker = IVaultTracker::new(self.vault_tracker, &self.provider);
        let id: U256 = tracker
            .nextVaultId()
            .call()
            .await
            .map_err(|e| ChainGatewayError::Contract(e.to_string()))?;
        Ok(id.to::<u64>())
    }

    pub async fn create_vault(&self, controller: &str) -> Result<String, ChainGatewayError> {
        let controller = parse_address(controller)?;
        let tracker = IVaultTracker::new(self.vault_tracker, &self.provider);
        let receipt: TransactionReceipt = tracker
            .createVault(controller)
            .send()
            .await
            .map_err(|e| ChainGatewayError::Contract(e.to_string()))?
            .get_receipt()
            .await
            .map_err(|e| ChainGatewayError::Contract(e.to_string()))?;
        Ok(format!("{:#x}", receipt.transaction_hash))
    }

    /// Decimals for `token`; the zero address stands for the chain's native asset (18).
    pub async fn get_token_decimals(&self, token: &str) -> Result<u8, ChainGatewayError> {
        let address = parse_address(token)?;
        if address == Address::ZERO {
            return Ok(18);
        }
        let tracker = IVaultTracker::new(self.vault_tracker, &self.provider);
        tracker
            .getTokenDecimals(address)
            .call()
            .await
            .map_err(|e| ChainGatewayError::Contract(e.to_string()))
    }

    /// Scans `Deposited` events emitted by the vault tracker within `range`.
    /// Used only by the deposit-discovery loop (`DepositWatcher`).
    pub async fn list_transfers(&self, range: BlockRange) -> Result<Vec<DiscoveredDeposit>, ChainGatewayError> {
        let filter = Filter::new()
            .address(self.vault_tracker)
            .from_block(range.from)
            .to_block(range.to)
            .event_signature(IVaultTracker::Deposited::SIGNATURE_HASH);
        let logs = self.provider.get_logs(&filter).await?;
        let mut deposits = Vec::with_capacity(logs.len());
        for log in logs {
            let tx_hash = log
                .transaction_hash
                .map(|h| format!("{h:#x}"))
                .unwrap_or_default();
            let decoded = log
                .log_decode::<IVaultTracker::Deposited>()
                .map_err(|e| ChainGatewayError::Contract(e.to_string()))?;
            let event = decoded.inner.data;
            deposits.push(DiscoveredDeposit {
                tx_hash,
                transfer_uid: format!("{:#x}", event.transferUid),
                chain_id: event.chainId.to::<u64>(),
                depositor: format!("{:#x}", event.depositor),
                token: format!("{:#x}", event.token),
                amount: Amount(rust_decimal::Decimal::from_str(&event.amount.to_string())
                    .unwrap_or(rust_decimal::Decimal::ZERO)),
            });
        }
        Ok(deposits)
    }

    pub async fn store_put(&self, bytes: Vec<u8>) -> Result<String, ChainGatewayError> {
        let form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(bytes).file_name("bundle.gz.b64"));
        let response = self
            .http
            .post(format!("{}/api/v0/add", self.content_store_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ChainGatewayError::ContentStore(e.to_string()))?
            .error_for_status()
            .map_err(|e| ChainGatewayError::ContentStore(e.to_string()))?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChainGatewayError::ContentStore(e.to_string()))?;
        body.get("Hash")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ChainGatewayError::ContentStore("missing Hash in response".to_string()))
    }

    pub async fn store_initialized(&self) -> Result<bool, ChainGatewayError> {
        let response = self
            .http
            .post(format!("{}/api/v0/id", self.content_store_url))
            .send()
            .await;
        Ok(response.map(|r| r.status().is_success()).unwrap_or(false))
    }

    /// Whether `cid` is known to the content store. Used by the per-cid
    /// status query (spec.md §6 "content-store status by cid").
    pub async fn store_status(&self, cid: &str) -> Result<bool, ChainGatewayError> {
        let response = self
            .http
            .post(format!("{}/api/v0/object/stat", self.content_store_url))
            .query(&[("arg", cid)])
            .send()
            .await;
        Ok(response.map(|r| r.status().is_success()).unwrap_or(false))
    }
}

/// A raw deposit event, before `DepositLedger::insert_deposit_if_missing` assigns it a local id.
#[derive(Debug, Clone)]
pub struct DiscoveredDeposit {
    pub tx_hash: String,
    pub transfer_uid: String,
    pub chain_id: u64,
    pub depositor: String,
    pub token: String,
    pub amount: Amount,
}

fn parse_address(value: &str) -> Result<Address, ChainGatewayError> {
    Address::from_str(value).map_err(|_| ChainGatewayError::InvalidAddress(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_address_normalizes_checksum_input() {
        let addr = parse_address("0xAbCdEf0123456789abcdef0123456789ABCDEF01").unwrap();
        assert_eq!(format!("{addr:#x}"), "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn parse_address_rejects_malformed() {
        assert!(parse_address("not-an-address").is_err());
    }
}
