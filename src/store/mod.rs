//! C3/C4 — Store: the transactional persistence boundary, and DepositLedger:
//! append-only deposit discovery + partial-assignment accounting.
//!
//! `Store` is a trait so `IntentionHandler`/`BundleProposer` can be exercised
//! against [`memory::MemoryStore`] in tests without a database. [`postgres::PgStore`]
//! is the production implementation backed by `sqlx`.
//!
//! All vault/token identifiers are compared case-insensitively; amounts are
//! fixed-precision decimals (see [`crate::util::Amount`]).

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::model::{Bundle, CidRecord, Deposit, DepositId, ExecutionObject, Vault, VaultId};
use crate::util::Amount;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("balance would go negative for vault {vault} token {token}")]
    NegativeBalance { vault: VaultId, token: String },
    #[error("vault {0} does not exist")]
    UnknownVault(VaultId),
    #[error("deposit {0} does not exist")]
    UnknownDeposit(DepositId),
    #[error("assignment amount {amount} exceeds remaining {remaining} on deposit {deposit_id}")]
    DepositOverAssign {
        deposit_id: DepositId,
        amount: String,
        remaining: String,
    },
    #[error("assignment amount must be positive")]
    NonPositiveAssignment,
    #[error("bundle nonce {0} already committed")]
    DuplicateBundleNonce(i64),
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// A deposit's remaining (unassigned) amount, returned by lookups that scan for fill candidates.
#[derive(Debug, Clone, Copy)]
pub struct RemainingDeposit {
    pub deposit_id: DepositId,
    pub remaining: Amount,
}

#[async_trait]
pub trait Store: Send + Sync {
    // -- Balances --
    async fn get_balance(&self, vault: VaultId, token: &str) -> Result<Amount, StoreError>;
    async fn set_balance(&self, vault: VaultId, token: &str, amount: Amount) -> Result<(), StoreError>;
    /// Increment-only credit (used for deposit assignment and external inflows).
    async fn credit(&self, vault: VaultId, token: &str, amount: Amount) -> Result<(), StoreError>;
    /// Atomic: decrement `from` by `amount` (fail if it would go negative), increment `to`.
    async fn apply_transfer(
        &self,
        from: VaultId,
        to: VaultId,
        token: &str,
        amount: Amount,
    ) -> Result<(), StoreError>;

    // -- Vaults / controllers --
    async fn get_vault(&self, vault: VaultId) -> Result<Option<Vault>, StoreError>;
    async fn create_vault(&self, initial_controller: &str) -> Result<VaultId, StoreError>;
    async fn get_controllers(&self, vault: VaultId) -> Result<Vec<String>, StoreError>;
    async fn add_controller(&self, vault: VaultId, controller: &str) -> Result<(), StoreError>;
    async fn remove_controller(&self, vault: VaultId, controller: &str) -> Result<(), StoreError>;
    async fn set_rules(&self, vault: VaultId, rules: Option<&str>) -> Result<(), StoreError>;
    async fn list_vaults_for(&self, controller: &str) -> Result<Vec<VaultId>, StoreError>;
    async fn get_vault_nonce(&self, vault: VaultId) -> Result<u64, StoreError>;
    /// Update-only; silently no-ops (with a `warn!`) if the vault row is missing (§9 open question).
    async fn set_vault_nonce(&self, vault: VaultId, nonce: u64) -> Result<(), StoreError>;

    // -- Bundles / CIDs --
    async fn next_bundle_nonce(&self) -> Result<i64, StoreError>;
    async fn get_bundle(&self, nonce: i64) -> Result<Option<Bundle>, StoreError>;
    async fn list_bundles(&self) -> Result<Vec<Bundle>, StoreError>;
    async fn get_cid(&self, nonce: i64) -> Result<Option<CidRecord>, StoreError>;

    // -- Deposits / assignments (C4) --
    async fn insert_deposit_if_missing(
        &self,
        tx_hash: &str,
        transfer_uid: &str,
        chain_id: u64,
        depositor: &str,
        token: &str,
        amount: Amount,
    ) -> Result<DepositId, StoreError>;
    async fn get_deposit(&self, deposit_id: DepositId) -> Result<Option<Deposit>, StoreError>;
    async fn remaining(&self, deposit_id: DepositId) -> Result<Amount, StoreError>;
    /// `exclude` skips deposit ids the caller has already fully earmarked
    /// locally within the same resolution, before those earmarks are durably
    /// persisted as assignment events (see `IntentionHandler::handle_assign_deposit`).
    async fn find_next_with_remaining(
        &self,
        depositor: &str,
        token: &str,
        chain_id: u64,
        exclude: &[DepositId],
    ) -> Result<Option<RemainingDeposit>, StoreError>;
    async fn find_with_sufficient_remaining(
        &self,
        depositor: &str,
        token: &str,
        chain_id: u64,
        min: Amount,
        exclude: &[DepositId],
    ) -> Result<Option<RemainingDeposit>, StoreError>;
    /// Transactional: lock the deposit row, recompute remaining, reject overdraw,
    /// insert the assignment event, and set `assigned_at` if now fully assigned.
    async fn assign(
        &self,
        deposit_id: DepositId,
        amount: Amount,
        credited_vault: VaultId,
    ) -> Result<(), StoreError>;

    /// Step 6 of the bundle-proposer tick (spec.md §4.6): one transaction that
    /// applies every execution's transfer/assignment, persists the bundle and
    /// CID rows, and advances each touched vault's nonce. Idempotent keyed by
    /// bundle nonce and CID so a retried commit after a crash is a no-op.
    async fn commit_bundle(
        &self,
        bundle: &Bundle,
        executions: &[ExecutionObject],
    ) -> Result<(), StoreError>;
}
