//! Event applier.
//!
//! [`precheck_event`] is read-only and decides whether an accepted event can
//! be applied, including the bank balances it spends. [`apply_event`]
//! performs the state and bank changes; any error it returns aborts the
//! message, so every failure a caller can provoke is caught by the precheck.

use cosmwasm_std::{Coin, Deps, DepsMut, Env, Storage};

use common::ChainId;

use crate::address_codec::normalize_evm_address;
use crate::denom::{erc20_to_denom, parse_voucher_denom, set_cosmos_originated_denom};
use crate::error::ContractError;
use crate::keeper::{BankKeeper, Keepers};
use crate::state::{
    outgoing_txs_with_prefix, DepositEvent, EvmEvent, OutgoingTx, OutgoingTxRef, SignerSetTx,
    DENOM_TO_ERC20, ERC20_TO_DENOM, LAST_OBSERVED_SIGNER_SET, MODULE_NAME, OUTGOING_TXS,
    SIGNER_SET_TX_PREFIX,
};

use super::contract_call::contract_call_executed;
use super::pool::{batch_executed, delete_outgoing_tx};
use super::signer_set::load_signer_set_tx;

fn application_error(reason: impl Into<String>) -> ContractError {
    ContractError::ApplicationError {
        reason: reason.into(),
    }
}

/// Check that every reference of the event resolves and its effects are allowed.
pub fn precheck_event(
    deps: Deps,
    bank: &dyn BankKeeper,
    chain_id: ChainId,
    event: &EvmEvent,
) -> Result<(), ContractError> {
    match event {
        EvmEvent::Deposit(deposit) => precheck_deposit(deps, bank, chain_id, deposit),
        EvmEvent::BatchExecuted(executed) => {
            let index = OutgoingTxRef::Batch {
                token_contract: executed.token_contract.clone(),
                batch_nonce: executed.batch_nonce,
            }
            .store_index();
            if !OUTGOING_TXS.has(deps.storage, (chain_id, index.as_slice())) {
                return Err(application_error(format!(
                    "batch {} for {} not found",
                    executed.batch_nonce, executed.token_contract
                )));
            }
            Ok(())
        }
        EvmEvent::ContractCallExecuted(executed) => {
            let index = OutgoingTxRef::ContractCall {
                invalidation_scope: executed.invalidation_scope.clone(),
                invalidation_nonce: executed.invalidation_nonce,
            }
            .store_index();
            if !OUTGOING_TXS.has(deps.storage, (chain_id, index.as_slice())) {
                return Err(application_error(format!(
                    "contract call {} not found",
                    executed.invalidation_nonce
                )));
            }
            Ok(())
        }
        EvmEvent::SignerSetUpdated(updated) => {
            if updated.members.is_empty() {
                return Err(application_error("signer set has no members"));
            }
            if let Some(observed) = LAST_OBSERVED_SIGNER_SET.may_load(deps.storage, chain_id)? {
                if updated.signer_set_nonce <= observed.nonce {
                    return Err(application_error(format!(
                        "signer set {} is not newer than observed {}",
                        updated.signer_set_nonce, observed.nonce
                    )));
                }
            }
            Ok(())
        }
        EvmEvent::Erc20Deployed(deployed) => {
            if deployed.cosmos_denom.is_empty()
                || parse_voucher_denom(&deployed.cosmos_denom).is_some()
            {
                return Err(application_error(format!(
                    "{} cannot be registered as cosmos-originated",
                    deployed.cosmos_denom
                )));
            }
            if DENOM_TO_ERC20.has(deps.storage, (chain_id, deployed.cosmos_denom.as_str())) {
                return Err(application_error(format!(
                    "denom {} already has an ERC20",
                    deployed.cosmos_denom
                )));
            }
            if ERC20_TO_DENOM.has(deps.storage, (chain_id, deployed.token_contract.as_str())) {
                return Err(application_error(format!(
                    "ERC20 {} already represents a denom",
                    deployed.token_contract
                )));
            }
            Ok(())
        }
    }
}

/// Apply an accepted event. Callers run [`precheck_event`] first.
pub fn apply_event(
    deps: DepsMut,
    env: &Env,
    keepers: &mut Keepers,
    chain_id: ChainId,
    event: &EvmEvent,
) -> Result<(), ContractError> {
    match event {
        EvmEvent::Deposit(deposit) => apply_deposit(deps, keepers, chain_id, deposit),
        EvmEvent::BatchExecuted(executed) => {
            batch_executed(
                deps.storage,
                chain_id,
                &executed.token_contract,
                executed.batch_nonce,
            )?;
            Ok(())
        }
        EvmEvent::ContractCallExecuted(executed) => contract_call_executed(
            deps.storage,
            chain_id,
            executed.invalidation_scope.as_slice(),
            executed.invalidation_nonce,
        ),
        EvmEvent::SignerSetUpdated(updated) => {
            let height = load_signer_set_tx(deps.storage, chain_id, updated.signer_set_nonce)?
                .map(|tx| tx.height)
                .unwrap_or(env.block.height);

            LAST_OBSERVED_SIGNER_SET.save(
                deps.storage,
                chain_id,
                &SignerSetTx {
                    nonce: updated.signer_set_nonce,
                    height,
                    signers: updated.members.clone(),
                    chain_id,
                },
            )?;
            delete_signer_sets_before(deps.storage, chain_id, updated.signer_set_nonce)?;
            Ok(())
        }
        EvmEvent::Erc20Deployed(deployed) => {
            set_cosmos_originated_denom(
                deps.storage,
                chain_id,
                &deployed.cosmos_denom,
                &deployed.token_contract,
            )?;
            Ok(())
        }
    }
}

/// A deposit of a cosmos-originated token unlocks coins the module escrowed
/// earlier; the module must still hold them.
fn precheck_deposit(
    deps: Deps,
    bank: &dyn BankKeeper,
    chain_id: ChainId,
    deposit: &DepositEvent,
) -> Result<(), ContractError> {
    if deposit.amount.is_zero() {
        return Err(application_error("deposit amount is zero"));
    }
    deps.api
        .addr_validate(&deposit.cosmos_receiver)
        .map_err(|e| application_error(format!("invalid receiver: {}", e)))?;

    let (cosmos_originated, denom) =
        erc20_to_denom(deps.storage, chain_id, &deposit.token_contract)?;
    if cosmos_originated {
        let escrowed = bank
            .get_all_balances(&bank.module_address(MODULE_NAME))
            .into_iter()
            .find(|coin| coin.denom == denom)
            .map(|coin| coin.amount)
            .unwrap_or_default();
        if escrowed < deposit.amount {
            return Err(application_error(format!(
                "module holds {}{}, cannot unlock {}",
                escrowed, denom, deposit.amount
            )));
        }
    }
    Ok(())
}

fn apply_deposit(
    deps: DepsMut,
    keepers: &mut Keepers,
    chain_id: ChainId,
    deposit: &DepositEvent,
) -> Result<(), ContractError> {
    let receiver = deps.api.addr_validate(&deposit.cosmos_receiver)?;
    let (cosmos_originated, denom) =
        erc20_to_denom(deps.storage, chain_id, &deposit.token_contract)?;
    let coins = vec![Coin::new(deposit.amount.u128(), denom)];

    if !cosmos_originated {
        keepers.bank.mint_coins(MODULE_NAME, &coins)?;
    }
    keepers
        .bank
        .send_coins_from_module_to_account(MODULE_NAME, &receiver, &coins)?;
    Ok(())
}

fn delete_signer_sets_before(
    storage: &mut dyn Storage,
    chain_id: ChainId,
    nonce: u64,
) -> Result<(), ContractError> {
    for (_, tx) in outgoing_txs_with_prefix(storage, chain_id, &[SIGNER_SET_TX_PREFIX])? {
        if let OutgoingTx::SignerSet(set) = &tx {
            if set.nonce < nonce {
                delete_outgoing_tx(storage, &tx)?;
            }
        }
    }
    Ok(())
}

/// Canonical form of the event: EVM addresses lowercased, so that
/// differently-cased reports of one event share a claim hash.
pub fn normalize_event(event: EvmEvent) -> Result<EvmEvent, ContractError> {
    Ok(match event {
        EvmEvent::Deposit(mut deposit) => {
            deposit.token_contract = normalize_evm_address(&deposit.token_contract)?;
            deposit.evm_sender = normalize_evm_address(&deposit.evm_sender)?;
            EvmEvent::Deposit(deposit)
        }
        EvmEvent::BatchExecuted(mut executed) => {
            executed.token_contract = normalize_evm_address(&executed.token_contract)?;
            EvmEvent::BatchExecuted(executed)
        }
        EvmEvent::ContractCallExecuted(executed) => EvmEvent::ContractCallExecuted(executed),
        EvmEvent::Erc20Deployed(mut deployed) => {
            deployed.token_contract = normalize_evm_address(&deployed.token_contract)?;
            EvmEvent::Erc20Deployed(deployed)
        }
        EvmEvent::SignerSetUpdated(mut updated) => {
            for member in updated.members.iter_mut() {
                member.evm_address = normalize_evm_address(&member.evm_address)?;
            }
            EvmEvent::SignerSetUpdated(updated)
        }
    })
}
