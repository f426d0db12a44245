//! Send-to-EVM pool and batch builder.
//!
//! Unbatched transfers live in `SEND_TO_EVMS` keyed by id and in
//! `UNBATCHED_FEE_INDEX` keyed by fee priority. [`add_to_pool`] and
//! [`remove_from_pool`] are the only writers of either map.

use std::collections::BTreeSet;

use cosmwasm_std::{
    Addr, Coin, DepsMut, Env, Event, MessageInfo, Order, Response, StdResult, Storage, Uint128,
};

use common::{ChainId, Erc20Token};

use crate::address_codec::normalize_evm_address;
use crate::denom::{denom_to_erc20, erc20_to_denom};
use crate::error::ContractError;
use crate::keeper::Keepers;
use crate::params::{load_chain_params, ChainParams};
use crate::state::{
    batch_scope_prefix, fee_index_suffix, increment_counter, outgoing_txs_with_prefix, BatchTx,
    OutgoingTx, SendToEvm, LAST_OUTGOING_BATCH_NONCE, LAST_SEND_TO_EVM_ID,
    LATEST_EVM_BLOCK_HEIGHT, MODULE_NAME, OUTGOING_TXS, SEND_TO_EVMS, UNBATCHED_FEE_INDEX,
};

use super::confirm::delete_confirmations;

// ============================================================================
// Message Handlers
// ============================================================================

/// Execute handler for queueing a transfer to an EVM chain
pub fn execute_send_to_evm(
    deps: DepsMut,
    info: MessageInfo,
    keepers: &mut Keepers,
    chain_id: ChainId,
    evm_recipient: String,
    amount: Coin,
    bridge_fee: Coin,
) -> Result<Response, ContractError> {
    load_chain_params(deps.storage, chain_id)?;
    let evm_recipient = normalize_evm_address(&evm_recipient)?;

    let id = create_send_to_evm(
        deps.storage,
        keepers,
        &info.sender,
        chain_id,
        evm_recipient.clone(),
        &amount,
        &bridge_fee,
    )?;

    Ok(Response::new()
        .add_attribute("method", "send_to_evm")
        .add_attribute("chain_id", chain_id.to_string())
        .add_attribute("id", id.to_string())
        .add_attribute("sender", info.sender)
        .add_attribute("evm_recipient", evm_recipient)
        .add_attribute("amount", amount.to_string())
        .add_attribute("bridge_fee", bridge_fee.to_string()))
}

/// Execute handler for withdrawing an unbatched transfer
pub fn execute_cancel_send_to_evm(
    deps: DepsMut,
    info: MessageInfo,
    keepers: &mut Keepers,
    chain_id: ChainId,
    id: u64,
) -> Result<Response, ContractError> {
    load_chain_params(deps.storage, chain_id)?;
    let refund = cancel_send_to_evm(deps.storage, keepers, chain_id, id, &info.sender)?;

    Ok(Response::new()
        .add_attribute("method", "cancel_send_to_evm")
        .add_attribute("chain_id", chain_id.to_string())
        .add_attribute("id", id.to_string())
        .add_attribute("refund", refund.to_string()))
}

/// Execute handler for building a batch on demand
pub fn execute_request_batch(
    deps: DepsMut,
    env: Env,
    chain_id: ChainId,
    denom: String,
) -> Result<Response, ContractError> {
    let params = load_chain_params(deps.storage, chain_id)?;
    let (_, token_contract) = denom_to_erc20(deps.storage, chain_id, &denom)?;

    let batch = build_batch(
        deps.storage,
        &env,
        &params,
        chain_id,
        &token_contract,
        params.batch_max_elements,
    )?;

    Ok(Response::new()
        .add_attribute("method", "request_batch")
        .add_event(batch_created_event(&batch)))
}

// ============================================================================
// Pool Operations
// ============================================================================

/// Escrow `amount + fee` from `sender` and add a pool entry. Returns the entry id.
///
/// Externally-originated vouchers are burned once escrowed; cosmos-originated
/// coins stay locked in the module account.
pub fn create_send_to_evm(
    storage: &mut dyn Storage,
    keepers: &mut Keepers,
    sender: &Addr,
    chain_id: ChainId,
    evm_recipient: String,
    amount: &Coin,
    fee: &Coin,
) -> Result<u64, ContractError> {
    if amount.denom != fee.denom {
        return Err(ContractError::InvalidAmount {
            reason: format!(
                "fee denom {} does not match amount denom {}",
                fee.denom, amount.denom
            ),
        });
    }
    if amount.amount.is_zero() {
        return Err(ContractError::InvalidAmount {
            reason: "amount must be positive".to_string(),
        });
    }
    let total = amount
        .amount
        .checked_add(fee.amount)
        .map_err(|e| ContractError::InvalidAmount {
            reason: e.to_string(),
        })?;

    let (cosmos_originated, token_contract) = denom_to_erc20(storage, chain_id, &amount.denom)?;
    let escrow = vec![Coin::new(total.u128(), amount.denom.clone())];

    match keepers.accounts.sender_module(sender) {
        Some(module) => keepers
            .bank
            .send_coins_from_module_to_module(module, MODULE_NAME, &escrow)?,
        None => keepers
            .bank
            .send_coins_from_account_to_module(sender, MODULE_NAME, &escrow)?,
    }
    if !cosmos_originated {
        keepers.bank.burn_coins(MODULE_NAME, &escrow)?;
    }

    let id = increment_counter(storage, &LAST_SEND_TO_EVM_ID, chain_id)?;
    add_to_pool(
        storage,
        &SendToEvm {
            id,
            sender: sender.clone(),
            evm_recipient,
            erc20_token: Erc20Token::new(token_contract.clone(), amount.amount),
            erc20_fee: Erc20Token::new(token_contract, fee.amount),
            chain_id,
        },
    )?;

    Ok(id)
}

/// Remove an unbatched entry and refund `amount + fee` to its sender.
///
/// Batched entries are not in the pool and yield `NotFound`.
pub fn cancel_send_to_evm(
    storage: &mut dyn Storage,
    keepers: &mut Keepers,
    chain_id: ChainId,
    id: u64,
    sender: &Addr,
) -> Result<Coin, ContractError> {
    let entry = SEND_TO_EVMS
        .may_load(storage, (chain_id, id))?
        .ok_or_else(|| ContractError::NotFound {
            what: format!("send to evm {} on chain {}", id, chain_id),
        })?;

    if entry.sender != *sender {
        return Err(ContractError::Unauthorized {
            reason: "can't cancel a transfer you didn't send".to_string(),
        });
    }

    let (cosmos_originated, denom) =
        erc20_to_denom(storage, chain_id, &entry.erc20_token.contract)?;
    let refund = Coin::new(
        (entry.erc20_token.amount + entry.erc20_fee.amount).u128(),
        denom,
    );
    let refund_coins = vec![refund.clone()];

    if !cosmos_originated {
        keepers.bank.mint_coins(MODULE_NAME, &refund_coins)?;
    }
    keepers
        .bank
        .send_coins_from_module_to_account(MODULE_NAME, sender, &refund_coins)?;

    remove_from_pool(storage, &entry)?;
    Ok(refund)
}

/// Store an entry in the pool and its fee index.
pub fn add_to_pool(storage: &mut dyn Storage, entry: &SendToEvm) -> StdResult<()> {
    SEND_TO_EVMS.save(storage, (entry.chain_id, entry.id), entry)?;
    let suffix = fee_index_suffix(entry.erc20_fee.amount, entry.id);
    UNBATCHED_FEE_INDEX.save(
        storage,
        (
            entry.chain_id,
            entry.erc20_token.contract.as_str(),
            suffix.as_slice(),
        ),
        &entry.id,
    )
}

/// Delete an entry from the pool and its fee index.
pub fn remove_from_pool(storage: &mut dyn Storage, entry: &SendToEvm) -> StdResult<()> {
    SEND_TO_EVMS.remove(storage, (entry.chain_id, entry.id));
    let suffix = fee_index_suffix(entry.erc20_fee.amount, entry.id);
    UNBATCHED_FEE_INDEX.remove(
        storage,
        (
            entry.chain_id,
            entry.erc20_token.contract.as_str(),
            suffix.as_slice(),
        ),
    );
    Ok(())
}

/// Token contracts with at least one unbatched entry, ascending.
pub fn pooled_contracts(storage: &dyn Storage, chain_id: ChainId) -> StdResult<Vec<String>> {
    let mut contracts = BTreeSet::new();
    for item in SEND_TO_EVMS
        .prefix(chain_id)
        .range(storage, None, None, Order::Ascending)
    {
        let (_, entry) = item?;
        contracts.insert(entry.erc20_token.contract);
    }
    Ok(contracts.into_iter().collect())
}

// ============================================================================
// Batches
// ============================================================================

/// Move up to `max_elements` entries of `token_contract` into a new batch,
/// highest fee first and oldest id first among equal fees.
pub fn build_batch(
    storage: &mut dyn Storage,
    env: &Env,
    params: &ChainParams,
    chain_id: ChainId,
    token_contract: &str,
    max_elements: u32,
) -> Result<BatchTx, ContractError> {
    let ids: Vec<u64> = UNBATCHED_FEE_INDEX
        .prefix((chain_id, token_contract))
        .range(storage, None, None, Order::Ascending)
        .take(max_elements as usize)
        .map(|item| item.map(|(_, id)| id))
        .collect::<StdResult<_>>()?;

    if ids.is_empty() {
        return Err(ContractError::EmptyBatch {
            chain_id,
            token_contract: token_contract.to_string(),
        });
    }

    let mut transactions = Vec::with_capacity(ids.len());
    for id in ids {
        let entry = SEND_TO_EVMS.load(storage, (chain_id, id))?;
        remove_from_pool(storage, &entry)?;
        transactions.push(entry);
    }

    let batch = BatchTx {
        batch_nonce: increment_counter(storage, &LAST_OUTGOING_BATCH_NONCE, chain_id)?,
        timeout: evm_timeout_height(storage, env, params, chain_id)?,
        transactions,
        token_contract: token_contract.to_string(),
        height: env.block.height,
        chain_id,
    };

    let tx = OutgoingTx::Batch(batch.clone());
    OUTGOING_TXS.save(storage, (chain_id, tx.store_index().as_slice()), &tx)?;

    Ok(batch)
}

/// Return the entries of a batch to the pool and delete it with its
/// confirmations. Nothing is refunded.
pub fn cancel_batch(storage: &mut dyn Storage, batch: &BatchTx) -> StdResult<()> {
    for entry in &batch.transactions {
        add_to_pool(storage, entry)?;
    }
    delete_outgoing_tx(storage, &OutgoingTx::Batch(batch.clone()))
}

/// Finalize an executed batch. Older batches of the same contract can no
/// longer execute on the EVM side; their entries go back to the pool.
pub fn batch_executed(
    storage: &mut dyn Storage,
    chain_id: ChainId,
    token_contract: &str,
    batch_nonce: u64,
) -> Result<BatchTx, ContractError> {
    let mut executed = None;
    for batch in batches_for_contract(storage, chain_id, token_contract)? {
        if batch.batch_nonce < batch_nonce {
            cancel_batch(storage, &batch)?;
        } else if batch.batch_nonce == batch_nonce {
            executed = Some(batch);
        }
    }

    let executed = executed.ok_or_else(|| ContractError::ApplicationError {
        reason: format!(
            "batch {} for {} not found on chain {}",
            batch_nonce, token_contract, chain_id
        ),
    })?;
    delete_outgoing_tx(storage, &OutgoingTx::Batch(executed.clone()))?;
    Ok(executed)
}

/// Batches of one token contract, ascending by nonce.
pub fn batches_for_contract(
    storage: &dyn Storage,
    chain_id: ChainId,
    token_contract: &str,
) -> StdResult<Vec<BatchTx>> {
    Ok(
        outgoing_txs_with_prefix(storage, chain_id, &batch_scope_prefix(token_contract))?
            .into_iter()
            .filter_map(|(_, tx)| match tx {
                OutgoingTx::Batch(batch) => Some(batch),
                _ => None,
            })
            .collect(),
    )
}

/// Delete an outgoing artifact and every confirmation of it.
pub fn delete_outgoing_tx(storage: &mut dyn Storage, tx: &OutgoingTx) -> StdResult<()> {
    let index = tx.store_index();
    OUTGOING_TXS.remove(storage, (tx.chain_id(), index.as_slice()));
    delete_confirmations(storage, tx.chain_id(), &index)
}

/// EVM block height after which a batch created now is no longer executable.
///
/// The current EVM height is projected from the last observed one using the
/// average block times of both chains.
pub fn evm_timeout_height(
    storage: &dyn Storage,
    env: &Env,
    params: &ChainParams,
    chain_id: ChainId,
) -> StdResult<u64> {
    let projected = match LATEST_EVM_BLOCK_HEIGHT.may_load(storage, chain_id)? {
        Some(latest) => {
            let cosmos_blocks = env.block.height.saturating_sub(latest.cosmos_height);
            let elapsed_evm_blocks = Uint128::from(cosmos_blocks)
                .multiply_ratio(params.average_block_time, params.average_evm_block_time);
            latest
                .evm_height
                .saturating_add(elapsed_evm_blocks.u128().min(u64::MAX as u128) as u64)
        }
        None => 0,
    };
    let blocks_to_add = params.target_evm_tx_timeout / params.average_evm_block_time;
    Ok(projected.saturating_add(blocks_to_add))
}

pub fn batch_created_event(batch: &BatchTx) -> Event {
    Event::new("gravity_batch_created")
        .add_attribute("chain_id", batch.chain_id.to_string())
        .add_attribute("token_contract", batch.token_contract.clone())
        .add_attribute("batch_nonce", batch.batch_nonce.to_string())
        .add_attribute("tx_count", batch.transactions.len().to_string())
        .add_attribute("timeout", batch.timeout.to_string())
        .add_attribute("total_fee", batch.total_fee().to_string())
}
