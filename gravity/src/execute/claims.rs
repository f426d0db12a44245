//! Claim / attestation engine.
//!
//! Orchestrators vote for events they saw on an EVM chain. Votes for an
//! identical event at one nonce aggregate in a single [`Attestation`]. The
//! attestation at `last observed + 1` whose voters hold at least 2/3 of the
//! bonded power is accepted and applied, after which the next nonce is tried.

use cosmwasm_std::{DepsMut, Env, Event, MessageInfo, Order, Response, StdResult, Storage};

use common::ChainId;

use crate::error::ContractError;
use crate::hash::{bytes32_to_hex, claim_hash};
use crate::keeper::{Keepers, StakingKeeper};
use crate::params::load_chain_params;
use crate::state::{
    load_counter, Attestation, EvmEvent, LatestEvmBlockHeight, ATTESTATIONS,
    LAST_EVENT_NONCE_BY_VALIDATOR, LAST_OBSERVED_EVENT_NONCE, LATEST_EVM_BLOCK_HEIGHT,
};

use super::apply::{apply_event, normalize_event, precheck_event};
use super::delegate::bonded_validator_for;

/// Execute handler for an orchestrator's vote on an EVM event
pub fn execute_submit_claim(
    mut deps: DepsMut,
    env: Env,
    info: MessageInfo,
    keepers: &mut Keepers,
    chain_id: ChainId,
    event: EvmEvent,
) -> Result<Response, ContractError> {
    load_chain_params(deps.storage, chain_id)?;
    let (validator, _) = bonded_validator_for(deps.storage, &*keepers.staking, &info.sender)?;
    let event = normalize_event(event)?;

    let last_nonce = LAST_EVENT_NONCE_BY_VALIDATOR
        .may_load(deps.storage, (chain_id, &validator))?
        .unwrap_or_default();
    let expected = last_nonce + 1;
    if event.event_nonce() != expected {
        return Err(ContractError::InvalidNonce {
            expected,
            got: event.event_nonce(),
        });
    }

    let hash = claim_hash(&event)?;
    let key = (chain_id, expected, hash.as_slice());
    let mut attestation = match ATTESTATIONS.may_load(deps.storage, key)? {
        Some(attestation) => attestation,
        None => Attestation {
            event,
            votes: vec![],
            accepted: false,
            height: env.block.height,
            observed_height: None,
            apply_error: None,
        },
    };
    if attestation.votes.contains(&validator) {
        return Err(ContractError::DuplicateVote {
            validator: validator.to_string(),
        });
    }
    attestation.votes.push(validator.clone());
    let event_type = attestation.event.type_name();

    ATTESTATIONS.save(deps.storage, key, &attestation)?;
    LAST_EVENT_NONCE_BY_VALIDATOR.save(deps.storage, (chain_id, &validator), &expected)?;

    let observations = tally_attestations(deps.branch(), &env, keepers, chain_id)?;

    Ok(Response::new()
        .add_attribute("method", "submit_claim")
        .add_attribute("chain_id", chain_id.to_string())
        .add_attribute("event_type", event_type)
        .add_attribute("event_nonce", expected.to_string())
        .add_attribute("claim_hash", bytes32_to_hex(&hash))
        .add_attribute("validator", validator)
        .add_attribute("observed", observations.len().to_string())
        .add_events(observations))
}

/// Accept every attestation that has reached quorum at the next eligible
/// nonce, in nonce order. Returns one observation event per acceptance.
pub fn tally_attestations(
    mut deps: DepsMut,
    env: &Env,
    keepers: &mut Keepers,
    chain_id: ChainId,
) -> Result<Vec<Event>, ContractError> {
    let mut events = vec![];
    loop {
        let next = load_counter(deps.storage, &LAST_OBSERVED_EVENT_NONCE, chain_id)? + 1;
        let winner = quorum_attestation(deps.storage, &*keepers.staking, chain_id, next)?;
        match winner {
            Some((hash, attestation)) => {
                events.push(observe(deps.branch(), env, keepers, chain_id, hash, attestation)?);
            }
            None => break,
        }
    }
    Ok(events)
}

/// First unaccepted attestation at `nonce`, by ascending claim hash, whose
/// voters hold at least 2/3 of the bonded power.
fn quorum_attestation(
    storage: &dyn Storage,
    staking: &dyn StakingKeeper,
    chain_id: ChainId,
    nonce: u64,
) -> StdResult<Option<(Vec<u8>, Attestation)>> {
    let total = staking.total_bonded_power() as u128;
    if total == 0 {
        return Ok(None);
    }

    for item in ATTESTATIONS
        .prefix((chain_id, nonce))
        .range(storage, None, None, Order::Ascending)
    {
        let (hash, attestation) = item?;
        if attestation.accepted {
            continue;
        }
        let power: u128 = attestation
            .votes
            .iter()
            .map(|v| staking.validator_power(v) as u128)
            .sum();
        if power * 3 >= total * 2 {
            return Ok(Some((hash, attestation)));
        }
    }
    Ok(None)
}

/// Latch acceptance, advance the observed nonce and apply the event.
///
/// An event that fails the precheck still counts as observed; the reason is
/// kept on the attestation and reported in a `gravity_observation_failed` event.
fn observe(
    mut deps: DepsMut,
    env: &Env,
    keepers: &mut Keepers,
    chain_id: ChainId,
    hash: Vec<u8>,
    mut attestation: Attestation,
) -> Result<Event, ContractError> {
    let nonce = attestation.event.event_nonce();
    attestation.accepted = true;
    attestation.observed_height = Some(env.block.height);
    LAST_OBSERVED_EVENT_NONCE.save(deps.storage, chain_id, &nonce)?;

    let evm_height = attestation.event.evm_height();
    let latest = LATEST_EVM_BLOCK_HEIGHT.may_load(deps.storage, chain_id)?;
    if latest.map_or(true, |l| evm_height > l.evm_height) {
        LATEST_EVM_BLOCK_HEIGHT.save(
            deps.storage,
            chain_id,
            &LatestEvmBlockHeight {
                evm_height,
                cosmos_height: env.block.height,
            },
        )?;
    }

    let hash_hex = format!("0x{}", hex::encode(&hash));
    let precheck = precheck_event(deps.as_ref(), &*keepers.bank, chain_id, &attestation.event);
    match precheck {
        Ok(()) => {
            apply_event(deps.branch(), env, keepers, chain_id, &attestation.event)?;
            tracing::info!(
                chain_id,
                event_nonce = nonce,
                event_type = attestation.event.type_name(),
                "attestation observed"
            );
        }
        Err(err) => {
            tracing::warn!(
                chain_id,
                event_nonce = nonce,
                error = %err,
                "observed event could not be applied"
            );
            attestation.apply_error = Some(err.to_string());
        }
    }
    ATTESTATIONS.save(deps.storage, (chain_id, nonce, hash.as_slice()), &attestation)?;

    let event_name = if attestation.apply_error.is_some() {
        "gravity_observation_failed"
    } else {
        "gravity_observation"
    };
    let mut event = Event::new(event_name)
        .add_attribute("chain_id", chain_id.to_string())
        .add_attribute("event_type", attestation.event.type_name())
        .add_attribute("event_nonce", nonce.to_string())
        .add_attribute("claim_hash", hash_hex);
    if let Some(reason) = &attestation.apply_error {
        event = event.add_attribute("apply_error", reason.clone());
    }
    Ok(event)
}
