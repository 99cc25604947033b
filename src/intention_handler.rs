//! C5 — IntentionHandler: the six-step submission pipeline (spec.md §4.5).
//!
//! Errors at any step reject the submission with no state change: nothing is
//! written to the store and nothing is pushed onto the pending queue.

use alloy_primitives::{Signature, eip191_hash_message};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::chain_gateway::VaultOracle;
use crate::error::AppError;
use crate::model::{
    Destination, ExecutionObject, Intention, IntentionAction, IntentionInput, Transfer, VaultId,
};
use crate::name_resolver::NameResolver;
use crate::queue::Queue;
use crate::store::Store;
use crate::timestamp::UnixTimestamp;
use crate::validator;

/// The wire shape of `submitIntention` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentionSubmission {
    pub intention: Intention,
    pub signature: String,
    pub controller: String,
}

pub struct IntentionHandler {
    store: Arc<dyn Store>,
    chain: Arc<dyn VaultOracle>,
    name_resolver: Arc<NameResolver>,
    queue: Arc<Queue>,
    auto_seed_on_create_vault: bool,
}

impl IntentionHandler {
    pub fn new(
        store: Arc<dyn Store>,
        chain: Arc<dyn VaultOracle>,
        name_resolver: Arc<NameResolver>,
        queue: Arc<Queue>,
        auto_seed_on_create_vault: bool,
    ) -> Self {
        IntentionHandler {
            store,
            chain,
            name_resolver,
            queue,
            auto_seed_on_create_vault,
        }
    }

    /// Confirms `vault` has been minted on the vault tracker (spec.md §4.1:
    /// "`to` must be a known on-chain vault id... enforced before admission").
    /// `next_vault_id` is the id the tracker would assign next, so every
    /// already-minted vault satisfies `1 <= vault < next_vault_id`.
    async fn ensure_vault_exists(&self, vault: VaultId) -> Result<(), AppError> {
        let next_vault_id = self.chain.next_vault_id().await?;
        if vault < 1 || vault as u64 >= next_vault_id {
            return Err(AppError::UnknownVault(vault));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, submission), fields(action = %submission.intention.action))]
    pub async fn handle(&self, submission: IntentionSubmission) -> Result<ExecutionObject, AppError> {
        // Step 1: format pre-check. Only the envelope, not the (possibly unresolved) body.
        let signature = validator::validate_signature(&submission.signature)?;
        let controller = validator::validate_address(&submission.controller)?;

        // Step 2: signature verification, over the canonical serialization of the
        // *original*, pre-mutation intention.
        self.verify_signature(&submission.intention, &signature, &controller)?;

        // Step 3: name resolution mutates a working copy in place.
        let mut intention = submission.intention;
        self.resolve_names(&mut intention).await?;

        // Step 4: full structural/semantic validation on the resolved intention.
        let intention = validator::validate_intention(&intention)?;

        // CreateVault bypasses the balance-admission path entirely.
        if intention.action_kind() == IntentionAction::CreateVault {
            return self.handle_create_vault(intention, &signature, &controller).await;
        }

        // AssignDeposit bypasses the balance check (§4.5 special case).
        if intention.action_kind() == IntentionAction::AssignDeposit {
            return self.handle_assign_deposit(intention, &signature, &controller).await;
        }

        // Step 5: authorization and admission.
        let now = UnixTimestamp::try_now().map_err(|e| AppError::Internal(e.to_string()))?;
        if intention.expiry <= now {
            return Err(AppError::IntentionExpired(intention.expiry.seconds_since_epoch()));
        }

        let from_vault = self.resolve_source_vault(&intention.inputs, &controller).await?;

        for input in &intention.inputs {
            let balance = self.store.get_balance(from_vault, &input.asset).await?;
            if balance < input.amount {
                return Err(AppError::InsufficientBalance {
                    vault: from_vault,
                    token: input.asset.clone(),
                    have: balance.to_string(),
                    need: input.amount.to_string(),
                });
            }
        }

        // Step 6: proof generation.
        let mut proof = Vec::with_capacity(intention.outputs.len());
        for output in &intention.outputs {
            let to = if let Some(vault) = output.to {
                self.ensure_vault_exists(vault).await?;
                Destination::Vault(vault)
            } else {
                Destination::External(output.to_external.clone().expect("exactly one destination, checked in validation"))
            };
            proof.push(Transfer {
                token: output.asset.clone(),
                from_vault_id: from_vault,
                to,
                amount: output.amount,
                deposit_id: None,
            });
        }

        let execution = ExecutionObject {
            intention,
            from: from_vault,
            proof,
            signature,
        };

        if !self.queue.push(execution.clone()).await {
            return Err(AppError::QueueFull);
        }
        Ok(execution)
    }

    fn verify_signature(&self, intention: &Intention, signature: &str, controller: &str) -> Result<(), AppError> {
        let canonical = serde_json::to_vec(intention).map_err(|e| AppError::Internal(e.to_string()))?;
        let hash = eip191_hash_message(&canonical);
        let bytes = hex::decode(signature.trim_start_matches("0x")).map_err(|_| AppError::SignatureInvalid)?;
        let sig = Signature::from_raw(&bytes).map_err(|_| AppError::SignatureInvalid)?;
        let recovered = sig
            .recover_address_from_prehash(&hash)
            .map_err(|_| AppError::SignatureInvalid)?;
        if format!("{recovered:#x}") != controller {
            return Err(AppError::SignatureInvalid);
        }
        Ok(())
    }

    async fn resolve_names(&self, intention: &mut Intention) -> Result<(), AppError> {
        for output in intention.outputs.iter_mut() {
            if let Some(name) = &output.to_external {
                if !name.starts_with("0x") {
                    let resolved = self
                        .name_resolver
                        .resolve(name)
                        .await?
                        .ok_or_else(|| AppError::NameUnresolved(name.clone()))?;
                    output.to_external = Some(resolved);
                }
            }
        }
        Ok(())
    }

    async fn resolve_source_vault(&self, inputs: &[IntentionInput], controller: &str) -> Result<VaultId, AppError> {
        let mut resolved: Option<VaultId> = None;
        for input in inputs {
            let vault = match input.from {
                Some(vault) => vault,
                None => {
                    let controlled = self.store.list_vaults_for(controller).await?;
                    match controlled.len() {
                        0 => return Err(AppError::NoVault),
                        1 => controlled[0],
                        _ => return Err(AppError::AmbiguousVault),
                    }
                }
            };
            match resolved {
                None => resolved = Some(vault),
                Some(existing) if existing != vault => return Err(AppError::MultiSourceUnsupported),
                Some(_) => {}
            }
        }
        let vault = resolved.ok_or(AppError::NoVault)?;
        let controllers = self.store.get_controllers(vault).await?;
        if !controllers.iter().any(|c| c == controller) {
            return Err(AppError::Unauthorized(vault));
        }
        Ok(vault)
    }

    async fn handle_create_vault(
        &self,
        intention: Intention,
        signature: &str,
        controller: &str,
    ) -> Result<ExecutionObject, AppError> {
        let vault_id = self.store.create_vault(controller).await?;
        tracing::info!(vault_id, controller, "vault created");

        let mut proof = Vec::new();
        if self.auto_seed_on_create_vault {
            proof.push(Transfer {
                token: "0x0000000000000000000000000000000000000000".to_string(),
                from_vault_id: vault_id,
                to: Destination::Vault(vault_id),
                amount: crate::util::Amount::zero(),
                deposit_id: None,
            });
        }

        let execution = ExecutionObject {
            intention,
            from: vault_id,
            proof,
            signature: signature.to_string(),
        };
        if !self.queue.push(execution.clone()).await {
            return Err(AppError::QueueFull);
        }
        Ok(execution)
    }

    async fn handle_assign_deposit(
        &self,
        intention: Intention,
        signature: &str,
        controller: &str,
    ) -> Result<ExecutionObject, AppError> {
        let now = UnixTimestamp::try_now().map_err(|e| AppError::Internal(e.to_string()))?;
        if intention.expiry <= now {
            return Err(AppError::IntentionExpired(intention.expiry.seconds_since_epoch()));
        }

        let mut proof = Vec::with_capacity(intention.inputs.len());
        // Deposits are only marked spent in the store once their owning bundle
        // commits, so a naive re-query on every loop iteration can offer the
        // same not-yet-persisted deposit twice. Track locally, per deposit id,
        // how much of it this resolution has already earmarked, and once a
        // deposit's local availability hits zero exclude it from further
        // lookups so the next iteration is forced onto a different one.
        let mut reserved = std::collections::HashMap::<i64, crate::util::Amount>::new();
        for (input, output) in intention.inputs.iter().zip(intention.outputs.iter()) {
            let credited_vault = output.to.expect("checked by validate_assign_deposit_policy");
            self.ensure_vault_exists(credited_vault).await?;
            let mut remaining_needed = input.amount;
            let mut legs = Vec::new();
            let mut exhausted = Vec::new();
            loop {
                if remaining_needed.is_zero() {
                    break;
                }
                let candidate = self
                    .store
                    .find_with_sufficient_remaining(controller, &input.asset, input.chain_id, remaining_needed, &exhausted)
                    .await?
                    .or(
                        self.store
                            .find_next_with_remaining(controller, &input.asset, input.chain_id, &exhausted)
                            .await?,
                    );
                let candidate = candidate.ok_or_else(|| AppError::DepositInsufficient(input.asset.clone()))?;
                let already_reserved = reserved.get(&candidate.deposit_id).copied().unwrap_or_else(crate::util::Amount::zero);
                let available = candidate.remaining.checked_sub(already_reserved).unwrap_or_else(crate::util::Amount::zero);
                let take = if available < remaining_needed { available } else { remaining_needed };
                legs.push(Transfer {
                    token: input.asset.clone(),
                    from_vault_id: 0,
                    to: Destination::Vault(credited_vault),
                    amount: take,
                    deposit_id: Some(candidate.deposit_id),
                });
                reserved.insert(candidate.deposit_id, already_reserved.checked_add(take));
                if take == available {
                    exhausted.push(candidate.deposit_id);
                }
                remaining_needed = remaining_needed.checked_sub(take).unwrap_or_else(crate::util::Amount::zero);
                if legs.len() > 64 {
                    return Err(AppError::DepositInsufficient(input.asset.clone()));
                }
            }
            proof.extend(legs);
        }

        // No source vault: funds are drawn from deposits, not a vault balance.
        let execution = ExecutionObject {
            intention,
            from: 0,
            proof,
            signature: signature.to_string(),
        };
        if !self.queue.push(execution.clone()).await {
            return Err(AppError::QueueFull);
        }
        Ok(execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FeeEntry, IntentionOutput};
    use crate::name_resolver::{NameRegistry, NameResolverError};
    use crate::store::memory::MemoryStore;
    use crate::util::Amount;
    use alloy_primitives::eip191_hash_message;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;
    use std::time::Duration;

    struct NoopRegistry;

    #[async_trait::async_trait]
    impl NameRegistry for NoopRegistry {
        async fn lookup(&self, _name: &str) -> Result<Option<String>, NameResolverError> {
            Ok(None)
        }
    }

    /// Reports every vault id below `next` as minted; used in place of a
    /// live `ChainGateway` in these unit tests.
    struct FakeVaultOracle {
        next: u64,
    }

    #[async_trait::async_trait]
    impl crate::chain_gateway::VaultOracle for FakeVaultOracle {
        async fn next_vault_id(&self) -> Result<u64, crate::chain_gateway::ChainGatewayError> {
            Ok(self.next)
        }
    }

    fn handler(store: Arc<MemoryStore>) -> IntentionHandler {
        handler_with_next_vault_id(store, 1000)
    }

    fn handler_with_next_vault_id(store: Arc<MemoryStore>, next_vault_id: u64) -> IntentionHandler {
        let resolver = Arc::new(NameResolver::new(Arc::new(NoopRegistry), Duration::from_secs(3600)));
        let queue = Arc::new(Queue::new(None));
        let chain = Arc::new(FakeVaultOracle { next: next_vault_id });
        IntentionHandler::new(store, chain, resolver, queue, false)
    }

    fn sign(signer: &PrivateKeySigner, intention: &Intention) -> String {
        let bytes = serde_json::to_vec(intention).unwrap();
        let hash = eip191_hash_message(&bytes);
        let sig = signer.sign_hash_sync(&hash).unwrap();
        format!("0x{}", hex::encode(sig.as_bytes()))
    }

    #[tokio::test]
    async fn happy_path_transfer_enqueues_execution() {
        let signer = PrivateKeySigner::random();
        let controller = format!("{:#x}", signer.address());

        let store = Arc::new(MemoryStore::new());
        store.seed_vault(1, vec![controller.clone()]);
        store.seed_vault(2, vec![]);
        store.seed_balance(1, "0x0000000000000000000000000000000000000000", Amount::from_str("1000").unwrap());

        let intention = Intention {
            action: "send".to_string(),
            nonce: 1,
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
            total_fee: vec![FeeEntry {
                asset: vec!["ETH".to_string()],
                amount: Amount::zero(),
            }],
            proposer_tip: vec![],
            protocol_fee: vec![],
            agent_tip: vec![],
        };
        let signature = sign(&signer, &intention);

        let handler = handler(store);
        let result = handler
            .handle(IntentionSubmission {
                intention,
                signature,
                controller,
            })
            .await
            .unwrap();
        assert_eq!(result.from, 1);
        assert_eq!(result.proof.len(), 1);
    }

    #[tokio::test]
    async fn wrong_signer_is_rejected() {
        let signer = PrivateKeySigner::random();
        let other = PrivateKeySigner::random();
        let controller = format!("{:#x}", signer.address());

        let store = Arc::new(MemoryStore::new());
        store.seed_vault(1, vec![controller.clone()]);

        let intention = Intention {
            action: "send".to_string(),
            nonce: 1,
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
            total_fee: vec![],
            proposer_tip: vec![],
            protocol_fee: vec![],
            agent_tip: vec![],
        };
        let signature = sign(&other, &intention);

        let handler = handler(store);
        let err = handler
            .handle(IntentionSubmission {
                intention,
                signature,
                controller,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SignatureInvalid));
    }

    #[tokio::test]
    async fn expired_intention_is_rejected() {
        let signer = PrivateKeySigner::random();
        let controller = format!("{:#x}", signer.address());
        let store = Arc::new(MemoryStore::new());
        store.seed_vault(1, vec![controller.clone()]);

        let intention = Intention {
            action: "send".to_string(),
            nonce: 1,
            expiry: UnixTimestamp(1),
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
            total_fee: vec![],
            proposer_tip: vec![],
            protocol_fee: vec![],
            agent_tip: vec![],
        };
        let signature = sign(&signer, &intention);
        let handler = handler(store);
        let err = handler
            .handle(IntentionSubmission { intention, signature, controller })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::IntentionExpired(_)));
    }

    #[tokio::test]
    async fn assign_deposit_splits_across_multiple_deposits_without_double_spend() {
        let signer = PrivateKeySigner::random();
        let controller = format!("{:#x}", signer.address());
        let token = "0x0000000000000000000000000000000000000000";

        let store = Arc::new(MemoryStore::new());
        store.seed_vault(7, vec![controller.clone()]);
        let d1 = store.seed_deposit(&controller, token, 1, Amount::from_str("500").unwrap());
        let d2 = store.seed_deposit(&controller, token, 1, Amount::from_str("600").unwrap());

        let intention = Intention {
            action: "AssignDeposit".to_string(),
            nonce: 1,
            expiry: UnixTimestamp::try_now().unwrap() + 60,
            inputs: vec![IntentionInput {
                asset: token.to_string(),
                amount: Amount::from_str("1000").unwrap(),
                chain_id: 1,
                from: None,
                data: None,
            }],
            outputs: vec![IntentionOutput {
                asset: token.to_string(),
                amount: Amount::from_str("1000").unwrap(),
                chain_id: 1,
                to: Some(7),
                to_external: None,
                data: None,
            }],
            total_fee: vec![],
            proposer_tip: vec![],
            protocol_fee: vec![],
            agent_tip: vec![],
        };
        let signature = sign(&signer, &intention);

        let handler = handler(store);
        let result = handler
            .handle(IntentionSubmission {
                intention,
                signature,
                controller,
            })
            .await
            .unwrap();

        assert_eq!(result.proof.len(), 2);
        let leg_for = |id| result.proof.iter().find(|t| t.deposit_id == Some(id)).unwrap();
        assert_eq!(leg_for(d1).amount, Amount::from_str("500").unwrap());
        assert_eq!(leg_for(d2).amount, Amount::from_str("500").unwrap());
        let total: Amount = result
            .proof
            .iter()
            .fold(Amount::zero(), |acc, t| acc.checked_add(t.amount));
        assert_eq!(total, Amount::from_str("1000").unwrap());
    }

    #[tokio::test]
    async fn assign_deposit_rejects_unknown_vault() {
        let signer = PrivateKeySigner::random();
        let controller = format!("{:#x}", signer.address());
        let token = "0x0000000000000000000000000000000000000000";

        let store = Arc::new(MemoryStore::new());
        store.seed_deposit(&controller, token, 1, Amount::from_str("500").unwrap());

        let intention = Intention {
            action: "AssignDeposit".to_string(),
            nonce: 1,
            expiry: UnixTimestamp::try_now().unwrap() + 60,
            inputs: vec![IntentionInput {
                asset: token.to_string(),
                amount: Amount::from_str("500").unwrap(),
                chain_id: 1,
                from: None,
                data: None,
            }],
            outputs: vec![IntentionOutput {
                asset: token.to_string(),
                amount: Amount::from_str("500").unwrap(),
                chain_id: 1,
                to: Some(999),
                to_external: None,
                data: None,
            }],
            total_fee: vec![],
            proposer_tip: vec![],
            protocol_fee: vec![],
            agent_tip: vec![],
        };
        let signature = sign(&signer, &intention);

        let handler = handler_with_next_vault_id(store, 5);
        let err = handler
            .handle(IntentionSubmission {
                intention,
                signature,
                controller,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnknownVault(999)));
    }
}
