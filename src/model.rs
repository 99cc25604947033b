//! Core data model: vaults, balances, intentions, executions, deposits, bundles.
//!
//! Types here are pure data — no I/O, no validation logic (that lives in
//! [`crate::validator`]). Addresses are plain lowercase-hex `String`s rather
//! than a newtype: the protocol treats them as opaque canonical identifiers
//! compared case-insensitively at the store boundary, not as EVM-specific
//! values the rest of the pipeline needs to manipulate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::timestamp::UnixTimestamp;
use crate::util::Amount;

pub type VaultId = i64;
pub type BundleNonce = i64;
pub type DepositId = i64;
pub type AssignmentId = i64;

/// A controller- or recipient-side output destination: either an internal
/// vault id or an external address/name (resolved by the time validation runs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Destination {
    Vault(VaultId),
    External(String),
}

/// One leg of an intention's `inputs[]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentionInput {
    pub asset: String,
    pub amount: Amount,
    pub chain_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<VaultId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// One leg of an intention's `outputs[]`. Exactly one of `to`/`to_external` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentionOutput {
    pub asset: String,
    pub amount: Amount,
    pub chain_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<VaultId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_external: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl IntentionOutput {
    pub fn destination_count(&self) -> usize {
        self.to.is_some() as usize + self.to_external.is_some() as usize
    }
}

/// A fee annotation attached to an intention (`totalFee`, `proposerTip`, …).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeEntry {
    pub asset: Vec<String>,
    pub amount: Amount,
}

/// The tagged union of intention actions. Spec.md's "free-form `action` label"
/// is parsed into this closed enum; anything not recognized becomes `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum IntentionAction {
    Send,
    Swap,
    AssignDeposit,
    CreateVault,
    #[serde(untagged)]
    Custom(String),
}

impl IntentionAction {
    pub fn from_label(label: &str) -> Self {
        match label {
            "send" | "Send" | "transfer" | "Transfer" => IntentionAction::Send,
            "swap" | "Swap" => IntentionAction::Swap,
            "AssignDeposit" | "assignDeposit" | "assign_deposit" => IntentionAction::AssignDeposit,
            "CreateVault" | "createVault" | "create_vault" => IntentionAction::CreateVault,
            other => IntentionAction::Custom(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            IntentionAction::Send => "send",
            IntentionAction::Swap => "swap",
            IntentionAction::AssignDeposit => "AssignDeposit",
            IntentionAction::CreateVault => "CreateVault",
            IntentionAction::Custom(s) => s.as_str(),
        }
    }
}

/// A submitted, signed intention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intention {
    pub action: String,
    pub nonce: u64,
    pub expiry: UnixTimestamp,
    pub inputs: Vec<IntentionInput>,
    pub outputs: Vec<IntentionOutput>,
    #[serde(default)]
    pub total_fee: Vec<FeeEntry>,
    #[serde(default)]
    pub proposer_tip: Vec<FeeEntry>,
    #[serde(default)]
    pub protocol_fee: Vec<FeeEntry>,
    #[serde(default)]
    pub agent_tip: Vec<FeeEntry>,
}

impl Intention {
    pub fn action_kind(&self) -> IntentionAction {
        IntentionAction::from_label(&self.action)
    }
}

/// A single transfer implied by an intention, as committed into a bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub token: String,
    pub from_vault_id: VaultId,
    pub to: Destination,
    pub amount: Amount,
    /// Present only for `AssignDeposit` proofs: the deposit being drawn down.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposit_id: Option<DepositId>,
}

/// The result of processing one submitted intention: what actually gets bundled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionObject {
    pub intention: Intention,
    pub from: VaultId,
    pub proof: Vec<Transfer>,
    pub signature: String,
}

/// An externally observed transfer into the vault tracker contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposit {
    pub id: DepositId,
    pub tx_hash: String,
    pub transfer_uid: String,
    pub chain_id: u64,
    pub depositor: String,
    pub token: String,
    pub amount: Amount,
    pub assigned_at: Option<UnixTimestamp>,
}

/// Partial or full crediting of a deposit to a vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentEvent {
    pub id: AssignmentId,
    pub deposit_id: DepositId,
    pub amount: Amount,
    pub credited_vault: VaultId,
    pub created_at: UnixTimestamp,
}

/// A sequence of executions plus the global bundle nonce — the unsigned bundle body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleBody {
    pub bundle: Vec<ExecutionObject>,
    pub nonce: BundleNonce,
}

/// A persisted, signed, anchored bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub nonce: BundleNonce,
    pub proposer: String,
    pub signature: String,
    pub cid: String,
    pub body: BundleBody,
}

/// Maps a content identifier to the bundle it represents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CidRecord {
    pub cid: String,
    pub nonce: BundleNonce,
    pub proposer: String,
}

/// A vault's persisted state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vault {
    pub id: VaultId,
    pub controllers: Vec<String>,
    pub rules: Option<String>,
    pub nonce: u64,
}

/// A `(vault, token) -> balance` snapshot, keyed for map-based responses.
pub type BalancesByToken = HashMap<String, Amount>;
