//! Confirmation collector.
//!
//! Orchestrators attach their validator's EVM signature to outgoing
//! artifacts. Signatures are stored as submitted; recovering the signer from
//! the signature is left to the relayer, which checks them before use.

use cosmwasm_std::{Addr, Binary, DepsMut, MessageInfo, Order, Response, StdResult, Storage};

use common::ChainId;

use crate::address_codec::normalize_evm_address;
use crate::error::ContractError;
use crate::keeper::Keepers;
use crate::params::load_chain_params;
use crate::state::{
    OutgoingTxRef, SignerSetTx, DELEGATE_KEYS, EVM_SIGNATURES, LAST_OBSERVED_SIGNER_SET,
    LATEST_SIGNER_SET_TX_NONCE, OUTGOING_TXS,
};

use super::delegate::bonded_validator_for;
use super::signer_set::load_signer_set_tx;

/// Length of an `r ++ s ++ v` EVM signature
pub const SIGNATURE_LEN: usize = 65;

/// Execute handler for storing a validator's signature over an outgoing artifact
pub fn execute_submit_confirmation(
    deps: DepsMut,
    info: MessageInfo,
    keepers: &mut Keepers,
    chain_id: ChainId,
    artifact: OutgoingTxRef,
    evm_signer: String,
    signature: Binary,
) -> Result<Response, ContractError> {
    load_chain_params(deps.storage, chain_id)?;
    let (validator, _) = bonded_validator_for(deps.storage, &*keepers.staking, &info.sender)?;

    let artifact = normalize_artifact(artifact)?;
    let index = artifact.store_index();
    if !OUTGOING_TXS.has(deps.storage, (chain_id, index.as_slice())) {
        return Err(ContractError::UnknownArtifact { chain_id });
    }

    let keys = DELEGATE_KEYS.load(deps.storage, &validator)?;
    let evm_signer = normalize_evm_address(&evm_signer)?;
    if evm_signer != keys.evm_address {
        return Err(ContractError::InvalidSignature {
            reason: format!(
                "signer {} is not the registered EVM address of {}",
                evm_signer, validator
            ),
        });
    }
    validate_signature_shape(&signature)?;

    let key = (chain_id, index.as_slice(), &validator);
    if EVM_SIGNATURES.has(deps.storage, key) {
        return Err(ContractError::DuplicateConfirmation {
            validator: validator.to_string(),
        });
    }
    EVM_SIGNATURES.save(deps.storage, key, &signature)?;

    Ok(Response::new()
        .add_attribute("method", "submit_confirmation")
        .add_attribute("chain_id", chain_id.to_string())
        .add_attribute("artifact", artifact.kind())
        .add_attribute("validator", validator))
}

/// Lowercase the token contract of a batch reference so it matches the
/// stored batch.
pub fn normalize_artifact(artifact: OutgoingTxRef) -> Result<OutgoingTxRef, ContractError> {
    Ok(match artifact {
        OutgoingTxRef::Batch {
            token_contract,
            batch_nonce,
        } => OutgoingTxRef::Batch {
            token_contract: normalize_evm_address(&token_contract)?,
            batch_nonce,
        },
        other => other,
    })
}

/// Check length and recovery id of an `r ++ s ++ v` signature.
pub fn validate_signature_shape(signature: &Binary) -> Result<(), ContractError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(ContractError::InvalidSignature {
            reason: format!(
                "expected {} bytes, got {}",
                SIGNATURE_LEN,
                signature.len()
            ),
        });
    }
    let v = signature[SIGNATURE_LEN - 1];
    if v != 27 && v != 28 {
        return Err(ContractError::InvalidSignature {
            reason: format!("recovery id must be 27 or 28, got {}", v),
        });
    }
    Ok(())
}

/// Validators that confirmed an artifact and their signatures, ascending by validator.
pub fn confirmations(
    storage: &dyn Storage,
    chain_id: ChainId,
    store_index: &[u8],
) -> StdResult<Vec<(Addr, Binary)>> {
    EVM_SIGNATURES
        .prefix((chain_id, store_index))
        .range(storage, None, None, Order::Ascending)
        .collect()
}

pub fn delete_confirmations(
    storage: &mut dyn Storage,
    chain_id: ChainId,
    store_index: &[u8],
) -> StdResult<()> {
    for (validator, _) in confirmations(storage, chain_id, store_index)? {
        EVM_SIGNATURES.remove(storage, (chain_id, store_index, &validator));
    }
    Ok(())
}

/// Signer set whose members must sign outgoing artifacts: the one last
/// installed on the EVM side, or the latest created before any was observed.
pub fn reference_signer_set(
    storage: &dyn Storage,
    chain_id: ChainId,
) -> StdResult<Option<SignerSetTx>> {
    if let Some(observed) = LAST_OBSERVED_SIGNER_SET.may_load(storage, chain_id)? {
        return Ok(Some(observed));
    }
    match LATEST_SIGNER_SET_TX_NONCE.may_load(storage, chain_id)? {
        Some(nonce) => load_signer_set_tx(storage, chain_id, nonce),
        None => Ok(None),
    }
}

/// Power of confirming signers and total power of the reference signer set.
pub fn confirmation_power(
    storage: &dyn Storage,
    chain_id: ChainId,
    artifact: &OutgoingTxRef,
) -> StdResult<(u64, u64)> {
    let signer_set = match reference_signer_set(storage, chain_id)? {
        Some(set) => set,
        None => return Ok((0, 0)),
    };

    let mut confirmed = 0u64;
    for (validator, _) in confirmations(storage, chain_id, &artifact.store_index())? {
        if let Some(keys) = DELEGATE_KEYS.may_load(storage, &validator)? {
            confirmed = confirmed.saturating_add(signer_set.power_of(&keys.evm_address));
        }
    }
    Ok((confirmed, signer_set.total_power()))
}

/// Whether confirming signers hold at least 2/3 of the reference signer set's power.
pub fn is_confirmed(
    storage: &dyn Storage,
    chain_id: ChainId,
    artifact: &OutgoingTxRef,
) -> StdResult<bool> {
    let (confirmed, total) = confirmation_power(storage, chain_id, artifact)?;
    Ok(reaches_quorum(confirmed, total))
}

/// At least 2/3 of a non-empty signer set.
pub fn reaches_quorum(confirmed: u64, total: u64) -> bool {
    total > 0 && (confirmed as u128) * 3 >= (total as u128) * 2
}
