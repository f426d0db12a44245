//! End-of-block driver.
//!
//! Runs once per block for every tracked chain, in this order:
//! 1. tally attestations at the next eligible nonce
//! 2. prune attestations past the retention window
//! 3. slash validators that missed signer set, batch, contract call or claim duties
//! 4. create a new signer set if the validator set moved
//! 5. build batches for token contracts not blocked by an unconfirmed batch
//! 6. expire batches and contract calls past their EVM timeout

use cosmwasm_std::{Addr, Decimal, DepsMut, Env, Event, Order, Response, StdResult, Storage};

use common::ChainId;

use crate::error::ContractError;
use crate::execute::{
    batch_created_event, batches_for_contract, build_batch, cancel_batch, confirmations,
    delete_outgoing_tx, is_confirmed, keys_registered_by, maybe_update_signer_set,
    pooled_contracts, signer_set_created_event, tally_attestations,
};
use crate::keeper::{Keepers, StakingKeeper};
use crate::params::ChainParams;
use crate::state::{
    load_counter, outgoing_txs_with_prefix, tracked_chains, OutgoingTx, ATTESTATIONS,
    BATCH_TX_PREFIX, CHAIN_PARAMS, CONTRACT_CALL_TX_PREFIX, EVM_ADDRESS_VALIDATOR,
    LAST_OBSERVED_EVENT_NONCE, LAST_SLASHED_EVENT_NONCE, LAST_SLASHED_OUTGOING_TX_HEIGHT,
    LAST_SLASHED_SIGNER_SET_NONCE, LATEST_EVM_BLOCK_HEIGHT, SIGNER_SET_TX_PREFIX,
};

/// End-of-block entry point. Errors here are bugs, not user faults.
pub fn end_block(
    mut deps: DepsMut,
    env: Env,
    keepers: &mut Keepers,
) -> Result<Response, ContractError> {
    let mut response = Response::new()
        .add_attribute("method", "end_block")
        .add_attribute("height", env.block.height.to_string());

    for chain_id in tracked_chains(deps.storage)? {
        let params = CHAIN_PARAMS.load(deps.storage, chain_id)?;
        let events = end_block_chain(deps.branch(), &env, keepers, &params, chain_id)?;
        response = response.add_events(events);
    }
    Ok(response)
}

fn end_block_chain(
    mut deps: DepsMut,
    env: &Env,
    keepers: &mut Keepers,
    params: &ChainParams,
    chain_id: ChainId,
) -> Result<Vec<Event>, ContractError> {
    let mut events = tally_attestations(deps.branch(), env, keepers, chain_id)?;

    prune_attestations(deps.storage, env, params, chain_id)?;

    events.extend(slash_signer_set_duties(
        deps.storage,
        env,
        keepers.staking,
        params,
        chain_id,
    )?);
    events.extend(slash_outgoing_tx_duties(
        deps.storage,
        env,
        keepers.staking,
        params,
        chain_id,
    )?);
    events.extend(slash_claim_duties(
        deps.storage,
        env,
        keepers.staking,
        params,
        chain_id,
    )?);

    if let Some(tx) =
        maybe_update_signer_set(deps.storage, env, &*keepers.staking, params, chain_id)?
    {
        events.push(signer_set_created_event(&tx));
    }

    for token_contract in pooled_contracts(deps.storage, chain_id)? {
        let mut blocked = false;
        for batch in batches_for_contract(deps.storage, chain_id, &token_contract)? {
            if !is_confirmed(deps.storage, chain_id, &OutgoingTx::Batch(batch).reference())? {
                blocked = true;
                break;
            }
        }
        if blocked {
            continue;
        }
        let batch = build_batch(
            deps.storage,
            env,
            params,
            chain_id,
            &token_contract,
            params.batch_max_elements,
        )?;
        events.push(batch_created_event(&batch));
    }

    expire_outgoing_txs(deps.storage, chain_id)?;

    Ok(events)
}

// ============================================================================
// Pruning & Expiry
// ============================================================================

/// Delete accepted attestations observed at least `attestation_retention_window`
/// blocks ago, and unaccepted ones created that long ago. Unaccepted
/// attestations are dropped without being applied.
pub fn prune_attestations(
    storage: &mut dyn Storage,
    env: &Env,
    params: &ChainParams,
    chain_id: ChainId,
) -> StdResult<usize> {
    let height = env.block.height;
    let mut expired: Vec<(u64, Vec<u8>)> = vec![];
    for item in ATTESTATIONS
        .sub_prefix(chain_id)
        .range(storage, None, None, Order::Ascending)
    {
        let ((nonce, hash), attestation) = item?;
        let since = if attestation.accepted {
            attestation.observed_height.unwrap_or(attestation.height)
        } else {
            attestation.height
        };
        if since.saturating_add(params.attestation_retention_window) <= height {
            expired.push((nonce, hash));
        }
    }

    for (nonce, hash) in &expired {
        ATTESTATIONS.remove(storage, (chain_id, *nonce, hash.as_slice()));
    }
    if !expired.is_empty() {
        tracing::debug!(chain_id, pruned = expired.len(), "pruned attestations");
    }
    Ok(expired.len())
}

/// Return the entries of timed-out batches to the pool and drop timed-out
/// contract calls. Nothing expires before an EVM height has been observed.
pub fn expire_outgoing_txs(storage: &mut dyn Storage, chain_id: ChainId) -> StdResult<()> {
    let evm_height = match LATEST_EVM_BLOCK_HEIGHT.may_load(storage, chain_id)? {
        Some(latest) => latest.evm_height,
        None => return Ok(()),
    };

    for (_, tx) in outgoing_txs_with_prefix(storage, chain_id, &[BATCH_TX_PREFIX])? {
        if let OutgoingTx::Batch(batch) = tx {
            if batch.timeout < evm_height {
                tracing::debug!(
                    chain_id,
                    batch_nonce = batch.batch_nonce,
                    timeout = batch.timeout,
                    "batch timed out"
                );
                cancel_batch(storage, &batch)?;
            }
        }
    }

    for (_, tx) in outgoing_txs_with_prefix(storage, chain_id, &[CONTRACT_CALL_TX_PREFIX])? {
        if let OutgoingTx::ContractCall(call) = &tx {
            if call.timeout < evm_height {
                tracing::debug!(
                    chain_id,
                    invalidation_nonce = call.invalidation_nonce,
                    "contract call timed out"
                );
                delete_outgoing_tx(storage, &tx)?;
            }
        }
    }
    Ok(())
}

// ============================================================================
// Slashing
// ============================================================================

fn slash_event(chain_id: ChainId, validator: &Addr, duty: &str, infraction_height: u64) -> Event {
    Event::new("gravity_slash")
        .add_attribute("chain_id", chain_id.to_string())
        .add_attribute("validator", validator.to_string())
        .add_attribute("duty", duty)
        .add_attribute("infraction_height", infraction_height.to_string())
}

fn slash_and_jail(
    staking: &mut dyn StakingKeeper,
    validator: &Addr,
    infraction_height: u64,
    fraction: Decimal,
) -> StdResult<bool> {
    let power = staking.validator_power(validator);
    if power == 0 {
        return Ok(false);
    }
    staking.slash(validator, infraction_height, power, fraction)?;
    staking.jail(validator)?;
    Ok(true)
}

/// Whether an artifact or attestation at `height` has left the signing window.
fn window_closed(height: u64, window: u64, current: u64) -> bool {
    height.saturating_add(window) <= current
}

/// Slash members of each signer set that did not confirm it within
/// `signed_signer_set_txs_window` blocks.
fn slash_signer_set_duties(
    storage: &mut dyn Storage,
    env: &Env,
    staking: &mut dyn StakingKeeper,
    params: &ChainParams,
    chain_id: ChainId,
) -> StdResult<Vec<Event>> {
    let last_slashed = load_counter(storage, &LAST_SLASHED_SIGNER_SET_NONCE, chain_id)?;
    let mut events = vec![];

    for (index, tx) in outgoing_txs_with_prefix(storage, chain_id, &[SIGNER_SET_TX_PREFIX])? {
        let set = match tx {
            OutgoingTx::SignerSet(set) => set,
            _ => continue,
        };
        if set.nonce <= last_slashed {
            continue;
        }
        if !window_closed(set.height, params.signed_signer_set_txs_window, env.block.height) {
            break;
        }

        let confirmed: Vec<Addr> = confirmations(storage, chain_id, &index)?
            .into_iter()
            .map(|(validator, _)| validator)
            .collect();
        for signer in &set.signers {
            let validator = match EVM_ADDRESS_VALIDATOR.may_load(storage, &signer.evm_address)? {
                Some(validator) => validator,
                None => continue,
            };
            if confirmed.contains(&validator) {
                continue;
            }
            if slash_and_jail(
                staking,
                &validator,
                set.height,
                params.slash_fraction_signer_set_tx,
            )? {
                events.push(slash_event(chain_id, &validator, "signer_set", set.height));
            }
        }
        LAST_SLASHED_SIGNER_SET_NONCE.save(storage, chain_id, &set.nonce)?;
    }
    Ok(events)
}

/// Slash bonded validators that did not confirm a batch or contract call
/// within `signed_batches_window` blocks. Validators whose delegate keys
/// were set after the artifact was created owe nothing for it.
fn slash_outgoing_tx_duties(
    storage: &mut dyn Storage,
    env: &Env,
    staking: &mut dyn StakingKeeper,
    params: &ChainParams,
    chain_id: ChainId,
) -> StdResult<Vec<Event>> {
    let last_slashed = load_counter(storage, &LAST_SLASHED_OUTGOING_TX_HEIGHT, chain_id)?;
    let mut due: Vec<(Vec<u8>, u64, &'static str)> = vec![];
    for prefix in [BATCH_TX_PREFIX, CONTRACT_CALL_TX_PREFIX] {
        for (index, tx) in outgoing_txs_with_prefix(storage, chain_id, &[prefix])? {
            let height = tx.height();
            if height > last_slashed
                && window_closed(height, params.signed_batches_window, env.block.height)
            {
                due.push((index, height, tx.reference().kind()));
            }
        }
    }
    if due.is_empty() {
        return Ok(vec![]);
    }
    due.sort_by_key(|(_, height, _)| *height);

    let mut events = vec![];
    let mut max_height = last_slashed;
    for (index, height, kind) in due {
        let confirmed: Vec<Addr> = confirmations(storage, chain_id, &index)?
            .into_iter()
            .map(|(validator, _)| validator)
            .collect();
        for validator in staking.bonded_validators() {
            if confirmed.contains(&validator.operator)
                || !keys_registered_by(storage, &validator.operator, height)?
            {
                continue;
            }
            if slash_and_jail(staking, &validator.operator, height, params.slash_fraction_batch)? {
                events.push(slash_event(chain_id, &validator.operator, kind, height));
            }
        }
        max_height = max_height.max(height);
    }
    LAST_SLASHED_OUTGOING_TX_HEIGHT.save(storage, chain_id, &max_height)?;
    Ok(events)
}

/// Slash bonded validators that did not vote for an accepted attestation
/// within `signed_claims_window` blocks of its observation, counting only
/// validators whose delegate keys were set by the observation height.
fn slash_claim_duties(
    storage: &mut dyn Storage,
    env: &Env,
    staking: &mut dyn StakingKeeper,
    params: &ChainParams,
    chain_id: ChainId,
) -> StdResult<Vec<Event>> {
    let last_slashed = load_counter(storage, &LAST_SLASHED_EVENT_NONCE, chain_id)?;
    let last_observed = load_counter(storage, &LAST_OBSERVED_EVENT_NONCE, chain_id)?;
    let mut events = vec![];

    for nonce in (last_slashed + 1)..=last_observed {
        let accepted = ATTESTATIONS
            .prefix((chain_id, nonce))
            .range(storage, None, None, Order::Ascending)
            .filter_map(|item| match item {
                Ok((_, attestation)) if attestation.accepted => Some(Ok(attestation)),
                Ok(_) => None,
                Err(err) => Some(Err(err)),
            })
            .next()
            .transpose()?;
        let attestation = match accepted {
            Some(attestation) => attestation,
            // Pruned before its window closed; nothing left to check against
            None => {
                LAST_SLASHED_EVENT_NONCE.save(storage, chain_id, &nonce)?;
                continue;
            }
        };
        let observed_height = attestation.observed_height.unwrap_or(attestation.height);
        if !window_closed(observed_height, params.signed_claims_window, env.block.height) {
            break;
        }

        for validator in staking.bonded_validators() {
            if attestation.votes.contains(&validator.operator)
                || !keys_registered_by(storage, &validator.operator, observed_height)?
            {
                continue;
            }
            if slash_and_jail(
                staking,
                &validator.operator,
                observed_height,
                params.slash_fraction_claim,
            )? {
                events.push(slash_event(chain_id, &validator.operator, "claim", observed_height));
            }
        }
        LAST_SLASHED_EVENT_NONCE.save(storage, chain_id, &nonce)?;
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_closed() {
        assert!(!window_closed(10, 5, 14));
        assert!(window_closed(10, 5, 15));
        assert!(!window_closed(u64::MAX - 1, 5, u64::MAX));
    }
}
