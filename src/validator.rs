//! C1 — Validator: pure structural and semantic checks on intentions, bundles,
//! addresses, and signatures. No I/O; every function returns a normalized copy
//! or a [`ValidationError`].

use once_cell::sync::Lazy;
use regex::Regex;
use std::str::FromStr;

use crate::model::{Intention, IntentionAction};
use crate::util::Amount;

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid {field}='{value}' ({context})")]
pub struct ValidationError {
    pub field: String,
    pub value: String,
    pub context: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, value: impl Into<String>, context: impl Into<String>) -> Self {
        ValidationError {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }
}

static HEX_ADDRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(0x)?[0-9a-fA-F]{40}$").expect("regex"));
static HEX_SIGNATURE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(0x)?[0-9a-fA-F]{130}$").expect("regex"));

/// Accepts canonical 20-byte hex (with or without `0x` prefix); returns lowercase hex with prefix.
pub fn validate_address(value: &str) -> Result<String, ValidationError> {
    if !HEX_ADDRESS.is_match(value) {
        return Err(ValidationError::new(
            "address",
            value,
            "must be 20-byte hex, with or without 0x prefix",
        ));
    }
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    Ok(format!("0x{}", stripped.to_lowercase()))
}

/// Accepts a 65-byte hex signature (EIP-191-style r||s||v); rejects any other length/alphabet.
pub fn validate_signature(value: &str) -> Result<String, ValidationError> {
    if !HEX_SIGNATURE.is_match(value) {
        return Err(ValidationError::new(
            "signature",
            value,
            "must be 65-byte hex (130 hex chars), with or without 0x prefix",
        ));
    }
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    Ok(format!("0x{}", stripped.to_lowercase()))
}

/// `^\d{1,60}(\.\d{0,18})?$`, non-negative.
pub fn validate_amount(value: &str) -> Result<Amount, ValidationError> {
    Amount::from_str(value)
        .map_err(|e| ValidationError::new("amount", value, e.to_string()))
}

/// Non-negative integer id/nonce.
pub fn validate_nonzero_id(field: &str, value: i64) -> Result<i64, ValidationError> {
    if value < 0 {
        return Err(ValidationError::new(field, value.to_string(), "must be non-negative"));
    }
    Ok(value)
}

/// Full structural validation of an intention. Returns a normalized copy.
///
/// Does not perform authorization/admission (§4.5 step 5) — only the
/// structural/semantic contracts of §4.1.
pub fn validate_intention(intention: &Intention) -> Result<Intention, ValidationError> {
    if intention.action.trim().is_empty() {
        return Err(ValidationError::new("action", &intention.action, "must be non-empty"));
    }
    if intention.inputs.is_empty() {
        return Err(ValidationError::new("inputs", "[]", "must be non-empty"));
    }
    if intention.outputs.is_empty() {
        return Err(ValidationError::new("outputs", "[]", "must be non-empty"));
    }

    let mut normalized = intention.clone();

    for input in normalized.inputs.iter_mut() {
        input.asset = validate_address_or_symbol(&input.asset)?;
        if input.amount.is_zero() {
            return Err(ValidationError::new("inputs[].amount", input.amount.to_string(), "zero-amount transfers are rejected"));
        }
    }

    for output in normalized.outputs.iter_mut() {
        let count = output.destination_count();
        if count != 1 {
            return Err(ValidationError::new(
                "outputs[]",
                format!("to={:?} to_external={:?}", output.to, output.to_external),
                "exactly one of `to`/`to_external` must be set",
            ));
        }
        output.asset = validate_address_or_symbol(&output.asset)?;
        if output.amount.is_zero() {
            return Err(ValidationError::new("outputs[].amount", output.amount.to_string(), "zero-amount transfers are rejected"));
        }
        if let Some(external) = &output.to_external {
            // Addresses are validated; unresolved human names are left for the NameResolver
            // and re-validated after resolution (§4.5 step 3/4).
            if external.starts_with("0x") {
                output.to_external = Some(validate_address(external)?);
            }
        }
    }

    for fee_list in [
        &normalized.total_fee,
        &normalized.proposer_tip,
        &normalized.protocol_fee,
        &normalized.agent_tip,
    ] {
        for fee in fee_list {
            if fee.asset.is_empty() {
                return Err(ValidationError::new("fee.asset", "[]", "must list at least one symbol"));
            }
        }
    }

    if normalized.action_kind() == IntentionAction::AssignDeposit {
        validate_assign_deposit_policy(&normalized)?;
    }

    Ok(normalized)
}

/// Addresses appearing in asset/token fields may be canonical hex or an
/// unresolved human name; only hex values are normalized here.
fn validate_address_or_symbol(value: &str) -> Result<String, ValidationError> {
    if value.starts_with("0x") {
        validate_address(value)
    } else {
        Ok(value.to_string())
    }
}

/// Structural policy for `AssignDeposit` intentions (§4.1):
/// - `|inputs| == |outputs|`
/// - per-index asset/amount/chain_id equality
/// - outputs use `to` (vault id) only
/// - all fees must be zero
///
/// On-chain existence of the target vault id is not checked here — this
/// module does no I/O. That check runs at the admission boundary in
/// `IntentionHandler` (step 5), against `ChainGateway::next_vault_id`.
pub fn validate_assign_deposit_policy(intention: &Intention) -> Result<(), ValidationError> {
    if intention.inputs.len() != intention.outputs.len() {
        return Err(ValidationError::new(
            "inputs/outputs",
            format!("{}/{}", intention.inputs.len(), intention.outputs.len()),
            "AssignDeposit requires |inputs| == |outputs|",
        ));
    }
    for (i, (input, output)) in intention.inputs.iter().zip(intention.outputs.iter()).enumerate() {
        if input.asset != output.asset || input.amount != output.amount || input.chain_id != output.chain_id {
            return Err(ValidationError::new(
                format!("inputs[{i}]/outputs[{i}]"),
                "mismatch",
                "AssignDeposit requires per-index asset/amount/chain_id equality",
            ));
        }
        if output.to.is_none() || output.to_external.is_some() {
            return Err(ValidationError::new(
                format!("outputs[{i}]"),
                "to_external set or to missing",
                "AssignDeposit outputs must use `to` (vault id) only",
            ));
        }
    }
    for fee in &intention.total_fee {
        if !fee.amount.is_zero() {
            return Err(ValidationError::new("totalFee.amount", fee.amount.to_string(), "AssignDeposit requires zero fees"));
        }
    }
    if !intention.proposer_tip.is_empty() || !intention.protocol_fee.is_empty() {
        return Err(ValidationError::new(
            "proposerTip/protocolFee",
            "non-empty",
            "AssignDeposit requires all fees to be zero/empty",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FeeEntry, IntentionInput, IntentionOutput};

    fn sample_intention() -> Intention {
        Intention {
            action: "send".to_string(),
            nonce: 1,
            expiry: crate::timestamp::UnixTimestamp(9_999_999_999),
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
                amount: Amount::from_str("0").unwrap(),
            }],
            proposer_tip: vec![],
            protocol_fee: vec![],
            agent_tip: vec![],
        }
    }

    #[test]
    fn validates_happy_path_intention() {
        assert!(validate_intention(&sample_intention()).is_ok());
    }

    #[test]
    fn rejects_dual_destination_output() {
        let mut intention = sample_intention();
        intention.outputs[0].to_external = Some("0x1111111111111111111111111111111111111111".to_string());
        assert!(validate_intention(&intention).is_err());
    }

    #[test]
    fn rejects_zero_amount() {
        let mut intention = sample_intention();
        intention.inputs[0].amount = Amount::from_str("0").unwrap();
        assert!(validate_intention(&intention).is_err());
    }

    #[test]
    fn address_normalizes_to_lowercase_with_prefix() {
        let addr = validate_address("ABCDEF0123456789ABCDEF0123456789ABCDEF01").unwrap();
        assert_eq!(addr, "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn assign_deposit_rejects_nonzero_fee() {
        let mut intention = sample_intention();
        intention.action = "AssignDeposit".to_string();
        intention.outputs[0].to_external = None;
        intention.outputs[0].to = Some(7);
        intention.total_fee[0].amount = Amount::from_str("1").unwrap();
        assert!(validate_intention(&intention).is_err());
    }
}
