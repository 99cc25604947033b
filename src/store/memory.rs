//! An in-memory [`Store`] test double, mirroring the transactional semantics
//! of [`super::postgres::PgStore`] without a database. Used by
//! `IntentionHandler`/`BundleProposer` unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{RemainingDeposit, Store, StoreError};
use crate::model::{
    AssignmentEvent, Bundle, BundleBody, CidRecord, Deposit, DepositId, ExecutionObject, Transfer,
    Vault, VaultId,
};
use crate::timestamp::UnixTimestamp;
use crate::util::Amount;

#[derive(Default, Clone)]
struct Inner {
    balances: HashMap<(VaultId, String), Amount>,
    vaults: HashMap<VaultId, Vault>,
    next_vault_id: VaultId,
    bundles: HashMap<i64, Bundle>,
    cids: HashMap<i64, CidRecord>,
    deposits: HashMap<DepositId, Deposit>,
    next_deposit_id: DepositId,
    assignments: HashMap<DepositId, Vec<AssignmentEvent>>,
    next_assignment_id: i64,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore {
            inner: Mutex::new(Inner {
                next_vault_id: 1,
                next_deposit_id: 1,
                next_assignment_id: 1,
                ..Default::default()
            }),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: seed a vault with a fixed id, controllers, and nonce.
    pub fn seed_vault(&self, id: VaultId, controllers: Vec<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.vaults.insert(
            id,
            Vault {
                id,
                controllers,
                rules: None,
                nonce: 0,
            },
        );
        if id >= inner.next_vault_id {
            inner.next_vault_id = id + 1;
        }
    }

    pub fn seed_balance(&self, vault: VaultId, token: &str, amount: Amount) {
        let mut inner = self.inner.lock().unwrap();
        inner.balances.insert((vault, token.to_lowercase()), amount);
    }

    /// Test helper: seed a deposit with a fixed id, already fully unassigned.
    pub fn seed_deposit(&self, depositor: &str, token: &str, chain_id: u64, amount: Amount) -> DepositId {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_deposit_id;
        inner.next_deposit_id += 1;
        inner.deposits.insert(
            id,
            Deposit {
                id,
                tx_hash: format!("0xseed{id}"),
                transfer_uid: format!("seed-{id}"),
                chain_id,
                depositor: depositor.to_lowercase(),
                token: token.to_lowercase(),
                amount,
                assigned_at: None,
            },
        );
        id
    }
}

fn key(vault: VaultId, token: &str) -> (VaultId, String) {
    (vault, token.to_lowercase())
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_balance(&self, vault: VaultId, token: &str) -> Result<Amount, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(*inner.balances.get(&key(vault, token)).unwrap_or(&Amount::zero()))
    }

    async fn set_balance(&self, vault: VaultId, token: &str, amount: Amount) -> Result<(), StoreError> {
        if amount.0.is_sign_negative() {
            return Err(StoreError::NegativeBalance {
                vault,
                token: token.to_string(),
            });
        }
        let mut inner = self.inner.lock().unwrap();
        inner.balances.insert(key(vault, token), amount);
        Ok(())
    }

    async fn credit(&self, vault: VaultId, token: &str, amount: Amount) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.balances.entry(key(vault, token)).or_insert_with(Amount::zero);
        *entry = entry.checked_add(amount);
        Ok(())
    }

    async fn apply_transfer(
        &self,
        from: VaultId,
        to: VaultId,
        token: &str,
        amount: Amount,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let from_key = key(from, token);
        let from_balance = *inner.balances.get(&from_key).unwrap_or(&Amount::zero());
        let new_from = from_balance.checked_sub(amount).ok_or(StoreError::NegativeBalance {
            vault: from,
            token: token.to_string(),
        })?;
        inner.balances.insert(from_key, new_from);
        let to_key = key(to, token);
        let to_balance = *inner.balances.get(&to_key).unwrap_or(&Amount::zero());
        inner.balances.insert(to_key, to_balance.checked_add(amount));
        Ok(())
    }

    async fn get_vault(&self, vault: VaultId) -> Result<Option<Vault>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.vaults.get(&vault).cloned())
    }

    async fn create_vault(&self, initial_controller: &str) -> Result<VaultId, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_vault_id;
        inner.next_vault_id += 1;
        inner.vaults.insert(
            id,
            Vault {
                id,
                controllers: vec![initial_controller.to_lowercase()],
                rules: None,
                nonce: 0,
            },
        );
        Ok(id)
    }

    async fn get_controllers(&self, vault: VaultId) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.vaults.get(&vault).map(|v| v.controllers.clone()).unwrap_or_default())
    }

    async fn add_controller(&self, vault: VaultId, controller: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let v = inner.vaults.get_mut(&vault).ok_or(StoreError::UnknownVault(vault))?;
        let controller = controller.to_lowercase();
        if !v.controllers.contains(&controller) {
            v.controllers.push(controller);
        }
        Ok(())
    }

    async fn remove_controller(&self, vault: VaultId, controller: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let v = inner.vaults.get_mut(&vault).ok_or(StoreError::UnknownVault(vault))?;
        v.controllers.retain(|c| c != &controller.to_lowercase());
        Ok(())
    }

    async fn set_rules(&self, vault: VaultId, rules: Option<&str>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let v = inner.vaults.get_mut(&vault).ok_or(StoreError::UnknownVault(vault))?;
        v.rules = rules.map(|s| s.to_string());
        Ok(())
    }

    async fn list_vaults_for(&self, controller: &str) -> Result<Vec<VaultId>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let controller = controller.to_lowercase();
        Ok(inner
            .vaults
            .values()
            .filter(|v| v.controllers.contains(&controller))
            .map(|v| v.id)
            .collect())
    }

    async fn get_vault_nonce(&self, vault: VaultId) -> Result<u64, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.vaults.get(&vault).map(|v| v.nonce).unwrap_or(0))
    }

    async fn set_vault_nonce(&self, vault: VaultId, nonce: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.vaults.get_mut(&vault) {
            Some(v) => v.nonce = nonce,
            None => tracing::warn!(vault, nonce, "set_vault_nonce: no such vault row, no-op"),
        }
        Ok(())
    }

    async fn next_bundle_nonce(&self) -> Result<i64, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.bundles.keys().max().map(|n| n + 1).unwrap_or(0))
    }

    async fn get_bundle(&self, nonce: i64) -> Result<Option<Bundle>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.bundles.get(&nonce).cloned())
    }

    async fn list_bundles(&self) -> Result<Vec<Bundle>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut bundles: Vec<_> = inner.bundles.values().cloned().collect();
        bundles.sort_by_key(|b| b.nonce);
        Ok(bundles)
    }

    async fn get_cid(&self, nonce: i64) -> Result<Option<CidRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.cids.get(&nonce).cloned())
    }

    async fn insert_deposit_if_missing(
        &self,
        tx_hash: &str,
        transfer_uid: &str,
        chain_id: u64,
        depositor: &str,
        token: &str,
        amount: Amount,
    ) -> Result<DepositId, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.deposits.values().find(|d| d.transfer_uid == transfer_uid) {
            return Ok(existing.id);
        }
        let id = inner.next_deposit_id;
        inner.next_deposit_id += 1;
        inner.deposits.insert(
            id,
            Deposit {
                id,
                tx_hash: tx_hash.to_string(),
                transfer_uid: transfer_uid.to_string(),
                chain_id,
                depositor: depositor.to_lowercase(),
                token: token.to_lowercase(),
                amount,
                assigned_at: None,
            },
        );
        Ok(id)
    }

    async fn get_deposit(&self, deposit_id: DepositId) -> Result<Option<Deposit>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.deposits.get(&deposit_id).cloned())
    }

    async fn remaining(&self, deposit_id: DepositId) -> Result<Amount, StoreError> {
        let inner = self.inner.lock().unwrap();
        let deposit = inner.deposits.get(&deposit_id).ok_or(StoreError::UnknownDeposit(deposit_id))?;
        let assigned = inner
            .assignments
            .get(&deposit_id)
            .map(|events| events.iter().fold(Amount::zero(), |acc, e| acc.checked_add(e.amount)))
            .unwrap_or_else(Amount::zero);
        Ok(deposit.amount.checked_sub(assigned).unwrap_or_else(Amount::zero))
    }

    async fn find_next_with_remaining(
        &self,
        depositor: &str,
        token: &str,
        chain_id: u64,
        exclude: &[DepositId],
    ) -> Result<Option<RemainingDeposit>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let depositor = depositor.to_lowercase();
        let token = token.to_lowercase();
        let mut candidates: Vec<_> = inner
            .deposits
            .values()
            .filter(|d| d.depositor == depositor && d.token == token && d.chain_id == chain_id && !exclude.contains(&d.id))
            .collect();
        candidates.sort_by_key(|d| d.id);
        for d in candidates {
            let assigned = inner
                .assignments
                .get(&d.id)
                .map(|events| events.iter().fold(Amount::zero(), |acc, e| acc.checked_add(e.amount)))
                .unwrap_or_else(Amount::zero);
            let remaining = d.amount.checked_sub(assigned).unwrap_or_else(Amount::zero);
            if !remaining.is_zero() {
                return Ok(Some(RemainingDeposit {
                    deposit_id: d.id,
                    remaining,
                }));
            }
        }
        Ok(None)
    }

    async fn find_with_sufficient_remaining(
        &self,
        depositor: &str,
        token: &str,
        chain_id: u64,
        min: Amount,
        exclude: &[DepositId],
    ) -> Result<Option<RemainingDeposit>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let depositor = depositor.to_lowercase();
        let token = token.to_lowercase();
        let mut candidates: Vec<_> = inner
            .deposits
            .values()
            .filter(|d| d.depositor == depositor && d.token == token && d.chain_id == chain_id && !exclude.contains(&d.id))
            .collect();
        candidates.sort_by_key(|d| d.id);
        for d in candidates {
            let assigned = inner
                .assignments
                .get(&d.id)
                .map(|events| events.iter().fold(Amount::zero(), |acc, e| acc.checked_add(e.amount)))
                .unwrap_or_else(Amount::zero);
            let remaining = d.amount.checked_sub(assigned).unwrap_or_else(Amount::zero);
            if remaining >= min {
                return Ok(Some(RemainingDeposit {
                    deposit_id: d.id,
                    remaining,
                }));
            }
        }
        Ok(None)
    }

    async fn assign(&self, deposit_id: DepositId, amount: Amount, credited_vault: VaultId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if amount.is_zero() {
            return Err(StoreError::NonPositiveAssignment);
        }
        let deposit = inner
            .deposits
            .get(&deposit_id)
            .cloned()
            .ok_or(StoreError::UnknownDeposit(deposit_id))?;
        let assigned_so_far = inner
            .assignments
            .get(&deposit_id)
            .map(|events| events.iter().fold(Amount::zero(), |acc, e| acc.checked_add(e.amount)))
            .unwrap_or_else(Amount::zero);
        let remaining = deposit.amount.checked_sub(assigned_so_far).unwrap_or_else(Amount::zero);
        if amount > remaining {
            return Err(StoreError::DepositOverAssign {
                deposit_id,
                amount: amount.to_string(),
                remaining: remaining.to_string(),
            });
        }
        let assignment_id = inner.next_assignment_id;
        inner.next_assignment_id += 1;
        let now = UnixTimestamp::try_now().map_err(|e| StoreError::Backend(e.to_string()))?;
        inner.assignments.entry(deposit_id).or_default().push(AssignmentEvent {
            id: assignment_id,
            deposit_id,
            amount,
            credited_vault,
            created_at: now,
        });
        let new_total = assigned_so_far.checked_add(amount);
        if new_total == deposit.amount {
            if let Some(d) = inner.deposits.get_mut(&deposit_id) {
                d.assigned_at = Some(now);
            }
        }
        Ok(())
    }

    /// All-or-nothing: every transfer in every execution, plus the bundle/cid
    /// rows, land together or not at all. Mirrors `PgStore::commit_bundle`'s
    /// single `sqlx::Transaction` by applying every mutation to a clone of
    /// `Inner` and only swapping it in on full success.
    async fn commit_bundle(&self, bundle: &Bundle, executions: &[ExecutionObject]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.bundles.contains_key(&bundle.nonce) {
            return Ok(()); // idempotent
        }

        let mut working = inner.clone();
        commit_bundle_into(&mut working, bundle, executions)?;
        *inner = working;
        Ok(())
    }
}

fn assign_tx(inner: &mut Inner, deposit_id: DepositId, amount: Amount, credited_vault: VaultId) -> Result<(), StoreError> {
    if amount.is_zero() {
        return Err(StoreError::NonPositiveAssignment);
    }
    let deposit = inner.deposits.get(&deposit_id).cloned().ok_or(StoreError::UnknownDeposit(deposit_id))?;
    let assigned_so_far = inner
        .assignments
        .get(&deposit_id)
        .map(|events| events.iter().fold(Amount::zero(), |acc, e| acc.checked_add(e.amount)))
        .unwrap_or_else(Amount::zero);
    let remaining = deposit.amount.checked_sub(assigned_so_far).unwrap_or_else(Amount::zero);
    if amount > remaining {
        return Err(StoreError::DepositOverAssign {
            deposit_id,
            amount: amount.to_string(),
            remaining: remaining.to_string(),
        });
    }
    let assignment_id = inner.next_assignment_id;
    inner.next_assignment_id += 1;
    let now = UnixTimestamp::try_now().map_err(|e| StoreError::Backend(e.to_string()))?;
    inner.assignments.entry(deposit_id).or_default().push(AssignmentEvent {
        id: assignment_id,
        deposit_id,
        amount,
        credited_vault,
        created_at: now,
    });
    let new_total = assigned_so_far.checked_add(amount);
    if new_total == deposit.amount {
        if let Some(d) = inner.deposits.get_mut(&deposit_id) {
            d.assigned_at = Some(now);
        }
    }
    Ok(())
}

fn credit_tx(inner: &mut Inner, vault: VaultId, token: &str, amount: Amount) {
    let entry = inner.balances.entry(key(vault, token)).or_insert_with(Amount::zero);
    *entry = entry.checked_add(amount);
}

fn apply_transfer_tx(inner: &mut Inner, from: VaultId, to: VaultId, token: &str, amount: Amount) -> Result<(), StoreError> {
    let from_key = key(from, token);
    let from_balance = *inner.balances.get(&from_key).unwrap_or(&Amount::zero());
    let new_from = from_balance.checked_sub(amount).ok_or(StoreError::NegativeBalance {
        vault: from,
        token: token.to_string(),
    })?;
    inner.balances.insert(from_key, new_from);
    let to_key = key(to, token);
    let to_balance = *inner.balances.get(&to_key).unwrap_or(&Amount::zero());
    inner.balances.insert(to_key, to_balance.checked_add(amount));
    Ok(())
}

fn debit_external_tx(inner: &mut Inner, from: VaultId, token: &str, amount: Amount) -> Result<(), StoreError> {
    let from_key = key(from, token);
    let balance = *inner.balances.get(&from_key).unwrap_or(&Amount::zero());
    let new_balance = balance
        .checked_sub(amount)
        .ok_or(StoreError::NegativeBalance { vault: from, token: token.to_string() })?;
    inner.balances.insert(from_key, new_balance);
    Ok(())
}

fn set_vault_nonce_tx(inner: &mut Inner, vault: VaultId, nonce: u64) {
    match inner.vaults.get_mut(&vault) {
        Some(v) => v.nonce = nonce,
        None => tracing::warn!(vault, nonce, "set_vault_nonce: no such vault row, no-op"),
    }
}

fn commit_bundle_into(inner: &mut Inner, bundle: &Bundle, executions: &[ExecutionObject]) -> Result<(), StoreError> {
    for execution in executions {
        for transfer in &execution.proof {
            match &transfer.to {
                crate::model::Destination::Vault(to_vault) => {
                    if let Some(deposit_id) = transfer.deposit_id {
                        assign_tx(inner, deposit_id, transfer.amount, *to_vault)?;
                        credit_tx(inner, *to_vault, &transfer.token, transfer.amount);
                    } else {
                        apply_transfer_tx(inner, transfer.from_vault_id, *to_vault, &transfer.token, transfer.amount)?;
                    }
                }
                crate::model::Destination::External(_) => {
                    debit_external_tx(inner, transfer.from_vault_id, &transfer.token, transfer.amount)?;
                }
            }
        }
        set_vault_nonce_tx(inner, execution.from, execution.intention.nonce);
    }
    inner.bundles.insert(
        bundle.nonce,
        Bundle {
            nonce: bundle.nonce,
            proposer: bundle.proposer.clone(),
            signature: bundle.signature.clone(),
            cid: bundle.cid.clone(),
            body: BundleBody {
                bundle: executions.to_vec(),
                nonce: bundle.nonce,
            },
        },
    );
    inner.cids.insert(
        bundle.nonce,
        CidRecord {
            cid: bundle.cid.clone(),
            nonce: bundle.nonce,
            proposer: bundle.proposer.clone(),
        },
    );
    Ok(())
}
