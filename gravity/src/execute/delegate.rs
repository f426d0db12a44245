//! Delegate key handlers.
//!
//! A validator delegates two keys: an orchestrator account that submits
//! claims and confirmations, and the EVM address its signatures come from.
//! Both are unique across validators. A validator owes batch, contract call
//! and claim duties from the height its keys were first set.

use cosmwasm_std::{Addr, Api, DepsMut, Env, MessageInfo, Response, StdResult, Storage};

use crate::address_codec::normalize_evm_address;
use crate::error::ContractError;
use crate::keeper::{Keepers, StakingKeeper};
use crate::state::{
    DelegateKeys, DELEGATE_KEYS, DELEGATE_KEYS_HEIGHT, EVM_ADDRESS_VALIDATOR,
    ORCHESTRATOR_VALIDATOR,
};

/// Execute handler for binding delegate keys to the sending validator
pub fn execute_set_delegate_keys(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    keepers: &mut Keepers,
    orchestrator: String,
    evm_address: String,
) -> Result<Response, ContractError> {
    let validator = info.sender;
    if keepers.staking.validator_power(&validator) == 0 {
        return Err(ContractError::ValidatorNotBonded {
            validator: validator.to_string(),
        });
    }

    let keys = set_delegate_keys(
        deps.storage,
        deps.api,
        env.block.height,
        validator,
        &orchestrator,
        &evm_address,
    )?;

    Ok(Response::new()
        .add_attribute("method", "set_delegate_keys")
        .add_attribute("validator", keys.validator)
        .add_attribute("orchestrator", keys.orchestrator)
        .add_attribute("evm_address", keys.evm_address))
}

/// Validate and store delegate keys, replacing any previous keys of the validator.
pub fn set_delegate_keys(
    storage: &mut dyn Storage,
    api: &dyn Api,
    height: u64,
    validator: Addr,
    orchestrator: &str,
    evm_address: &str,
) -> Result<DelegateKeys, ContractError> {
    let orchestrator = api
        .addr_validate(orchestrator)
        .map_err(|e| ContractError::InvalidAddress {
            reason: e.to_string(),
        })?;
    let evm_address = normalize_evm_address(evm_address)?;

    if let Some(owner) = ORCHESTRATOR_VALIDATOR.may_load(storage, &orchestrator)? {
        if owner != validator {
            return Err(ContractError::DelegateKeyInUse {
                key: orchestrator.to_string(),
            });
        }
    }
    if let Some(owner) = EVM_ADDRESS_VALIDATOR.may_load(storage, &evm_address)? {
        if owner != validator {
            return Err(ContractError::DelegateKeyInUse { key: evm_address });
        }
    }

    if let Some(previous) = DELEGATE_KEYS.may_load(storage, &validator)? {
        ORCHESTRATOR_VALIDATOR.remove(storage, &previous.orchestrator);
        EVM_ADDRESS_VALIDATOR.remove(storage, &previous.evm_address);
    }

    let keys = DelegateKeys {
        validator: validator.clone(),
        orchestrator: orchestrator.clone(),
        evm_address: evm_address.clone(),
    };
    DELEGATE_KEYS.save(storage, &validator, &keys)?;
    ORCHESTRATOR_VALIDATOR.save(storage, &orchestrator, &validator)?;
    EVM_ADDRESS_VALIDATOR.save(storage, &evm_address, &validator)?;
    if !DELEGATE_KEYS_HEIGHT.has(storage, &validator) {
        DELEGATE_KEYS_HEIGHT.save(storage, &validator, &height)?;
    }

    Ok(keys)
}

/// Whether `validator` had delegate keys at `height`. Keys carried over
/// from a migration have no recorded height and count from genesis.
pub fn keys_registered_by(
    storage: &dyn Storage,
    validator: &Addr,
    height: u64,
) -> StdResult<bool> {
    match DELEGATE_KEYS_HEIGHT.may_load(storage, validator)? {
        Some(registered) => Ok(registered <= height),
        None => Ok(DELEGATE_KEYS.has(storage, validator)),
    }
}

/// Resolve the validator behind an orchestrator and require it to be bonded.
///
/// Returns the validator and its current consensus power.
pub fn bonded_validator_for(
    storage: &dyn Storage,
    staking: &dyn StakingKeeper,
    orchestrator: &Addr,
) -> Result<(Addr, u64), ContractError> {
    let validator = ORCHESTRATOR_VALIDATOR
        .may_load(storage, orchestrator)?
        .ok_or_else(|| ContractError::UnknownOrchestrator {
            orchestrator: orchestrator.to_string(),
        })?;

    let power = staking.validator_power(&validator);
    if power == 0 {
        return Err(ContractError::ValidatorNotBonded {
            validator: validator.to_string(),
        });
    }
    Ok((validator, power))
}
