//! Query handlers for the Gravity bridge module.
//!
//! This module contains all query message handlers for retrieving module state.

use cosmwasm_std::{Addr, Binary, Deps, Order, StdError, StdResult};
use cw_storage_plus::Bound;

use common::{ChainId, Erc20Token};

use crate::address_codec::normalize_evm_address;
use crate::denom::{denom_to_erc20, erc20_to_denom};
use crate::execute::{
    confirmation_power, confirmations, latest_signer_set, load_signer_set_tx, normalize_artifact,
    reaches_quorum,
};
use crate::hash::outgoing_tx_digest;
use crate::msg::{
    AttestationResponse, AttestationsResponse, BatchFeesResponse, BatchTxsResponse,
    ChainParamsResponse, ConfirmationEntry, ConfirmationsResponse, ContractCallTxsResponse,
    DenomToErc20Response, DigestResponse, Erc20ToDenomResponse, IsConfirmedResponse,
    NonceResponse, SendToEvmsResponse, SignerSetTxsResponse, TrackedChainsResponse,
};
use crate::state::{
    load_counter, outgoing_txs_with_prefix, tracked_chains, BatchTx, DelegateKeys,
    LatestEvmBlockHeight, OutgoingTx, OutgoingTxRef, SignerSetTx, ATTESTATIONS, BATCH_TX_PREFIX,
    CHAIN_PARAMS, CONTRACT_CALL_TX_PREFIX, DELEGATE_KEYS, EVM_ADDRESS_VALIDATOR,
    LAST_EVENT_NONCE_BY_VALIDATOR, LAST_OBSERVED_EVENT_NONCE, LAST_OBSERVED_SIGNER_SET,
    LATEST_EVM_BLOCK_HEIGHT, ORCHESTRATOR_VALIDATOR, OUTGOING_TXS, SEND_TO_EVMS,
    SIGNER_SET_TX_PREFIX, UNBATCHED_FEE_INDEX,
};

const DEFAULT_LIMIT: u32 = 30;
const MAX_LIMIT: u32 = 100;

fn chain_not_supported(chain_id: ChainId) -> StdError {
    StdError::generic_err(format!("Chain not supported: {}", chain_id))
}

// ============================================================================
// Parameters & Nonces
// ============================================================================

pub fn query_chain_params(deps: Deps, chain_id: ChainId) -> StdResult<ChainParamsResponse> {
    let params = CHAIN_PARAMS
        .may_load(deps.storage, chain_id)?
        .ok_or_else(|| chain_not_supported(chain_id))?;
    Ok(ChainParamsResponse { chain_id, params })
}

pub fn query_tracked_chains(deps: Deps) -> StdResult<TrackedChainsResponse> {
    Ok(TrackedChainsResponse {
        chain_ids: tracked_chains(deps.storage)?,
    })
}

pub fn query_last_observed_event_nonce(deps: Deps, chain_id: ChainId) -> StdResult<NonceResponse> {
    Ok(NonceResponse {
        nonce: load_counter(deps.storage, &LAST_OBSERVED_EVENT_NONCE, chain_id)?,
    })
}

pub fn query_last_event_nonce_by_validator(
    deps: Deps,
    chain_id: ChainId,
    validator: String,
) -> StdResult<NonceResponse> {
    let validator = deps.api.addr_validate(&validator)?;
    Ok(NonceResponse {
        nonce: LAST_EVENT_NONCE_BY_VALIDATOR
            .may_load(deps.storage, (chain_id, &validator))?
            .unwrap_or_default(),
    })
}

pub fn query_latest_evm_block_height(
    deps: Deps,
    chain_id: ChainId,
) -> StdResult<Option<LatestEvmBlockHeight>> {
    LATEST_EVM_BLOCK_HEIGHT.may_load(deps.storage, chain_id)
}

// ============================================================================
// Attestations
// ============================================================================

pub fn query_attestation(
    deps: Deps,
    chain_id: ChainId,
    event_nonce: u64,
    claim_hash: Binary,
) -> StdResult<Option<AttestationResponse>> {
    Ok(ATTESTATIONS
        .may_load(deps.storage, (chain_id, event_nonce, claim_hash.as_slice()))?
        .map(|attestation| AttestationResponse {
            chain_id,
            claim_hash,
            attestation,
        }))
}

pub fn query_attestations(
    deps: Deps,
    chain_id: ChainId,
    start_after_nonce: Option<u64>,
    limit: Option<u32>,
) -> StdResult<AttestationsResponse> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT) as usize;
    // Every key at the start nonce sorts after (nonce, []), so start at the next nonce.
    let start = match start_after_nonce.map(|nonce| nonce.checked_add(1)) {
        Some(None) => {
            return Ok(AttestationsResponse {
                attestations: vec![],
            })
        }
        Some(Some(next)) => Some(Bound::inclusive((next, &[][..]))),
        None => None,
    };

    let attestations = ATTESTATIONS
        .sub_prefix(chain_id)
        .range(deps.storage, start, None, Order::Ascending)
        .take(limit)
        .map(|item| {
            item.map(|((_, hash), attestation)| AttestationResponse {
                chain_id,
                claim_hash: Binary::from(hash),
                attestation,
            })
        })
        .collect::<StdResult<Vec<_>>>()?;

    Ok(AttestationsResponse { attestations })
}

// ============================================================================
// Pool & Batches
// ============================================================================

pub fn query_unbatched_send_to_evms(
    deps: Deps,
    chain_id: ChainId,
    sender: Option<String>,
    start_after: Option<u64>,
    limit: Option<u32>,
) -> StdResult<SendToEvmsResponse> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT) as usize;
    let sender: Option<Addr> = sender
        .map(|s| deps.api.addr_validate(&s))
        .transpose()?;
    let start = start_after.map(Bound::exclusive);

    let send_to_evms = SEND_TO_EVMS
        .prefix(chain_id)
        .range(deps.storage, start, None, Order::Ascending)
        .filter(|item| match (item, &sender) {
            (Ok((_, entry)), Some(sender)) => entry.sender == *sender,
            _ => true,
        })
        .take(limit)
        .map(|item| item.map(|(_, entry)| entry))
        .collect::<StdResult<Vec<_>>>()?;

    Ok(SendToEvmsResponse { send_to_evms })
}

/// Sum of unbatched fees per token contract, highest total first.
pub fn query_batch_fees(deps: Deps, chain_id: ChainId) -> StdResult<BatchFeesResponse> {
    let mut fees: Vec<Erc20Token> = vec![];
    for item in UNBATCHED_FEE_INDEX
        .sub_prefix(chain_id)
        .range(deps.storage, None, None, Order::Ascending)
    {
        let ((contract, _), id) = item?;
        let entry = SEND_TO_EVMS.load(deps.storage, (chain_id, id))?;
        match fees.iter_mut().find(|f| f.contract == contract) {
            Some(total) => {
                *total = total
                    .checked_add(&entry.erc20_fee)
                    .ok_or_else(|| StdError::generic_err("batch fee total overflows"))?;
            }
            None => fees.push(Erc20Token::new(contract, entry.erc20_fee.amount)),
        }
    }
    fees.sort_by(|a, b| b.amount.cmp(&a.amount).then_with(|| a.contract.cmp(&b.contract)));
    Ok(BatchFeesResponse { fees })
}

pub fn query_batch_tx(
    deps: Deps,
    chain_id: ChainId,
    token_contract: String,
    batch_nonce: u64,
) -> StdResult<Option<BatchTx>> {
    let token_contract = normalize_evm_address(&token_contract)
        .map_err(|e| StdError::generic_err(e.to_string()))?;
    let index = OutgoingTxRef::Batch {
        token_contract,
        batch_nonce,
    }
    .store_index();
    Ok(
        match OUTGOING_TXS.may_load(deps.storage, (chain_id, index.as_slice()))? {
            Some(OutgoingTx::Batch(batch)) => Some(batch),
            _ => None,
        },
    )
}

pub fn query_batch_txs(deps: Deps, chain_id: ChainId) -> StdResult<BatchTxsResponse> {
    let batches = outgoing_txs_with_prefix(deps.storage, chain_id, &[BATCH_TX_PREFIX])?
        .into_iter()
        .filter_map(|(_, tx)| match tx {
            OutgoingTx::Batch(batch) => Some(batch),
            _ => None,
        })
        .collect();
    Ok(BatchTxsResponse { batches })
}

// ============================================================================
// Signer Sets & Contract Calls
// ============================================================================

pub fn query_signer_set_tx(
    deps: Deps,
    chain_id: ChainId,
    nonce: u64,
) -> StdResult<Option<SignerSetTx>> {
    load_signer_set_tx(deps.storage, chain_id, nonce)
}

pub fn query_latest_signer_set_tx(deps: Deps, chain_id: ChainId) -> StdResult<Option<SignerSetTx>> {
    latest_signer_set(deps.storage, chain_id)
}

pub fn query_last_observed_signer_set_tx(
    deps: Deps,
    chain_id: ChainId,
) -> StdResult<Option<SignerSetTx>> {
    LAST_OBSERVED_SIGNER_SET.may_load(deps.storage, chain_id)
}

pub fn query_signer_set_txs(deps: Deps, chain_id: ChainId) -> StdResult<SignerSetTxsResponse> {
    let signer_sets = outgoing_txs_with_prefix(deps.storage, chain_id, &[SIGNER_SET_TX_PREFIX])?
        .into_iter()
        .filter_map(|(_, tx)| match tx {
            OutgoingTx::SignerSet(set) => Some(set),
            _ => None,
        })
        .collect();
    Ok(SignerSetTxsResponse { signer_sets })
}

pub fn query_contract_call_txs(
    deps: Deps,
    chain_id: ChainId,
) -> StdResult<ContractCallTxsResponse> {
    let calls = outgoing_txs_with_prefix(deps.storage, chain_id, &[CONTRACT_CALL_TX_PREFIX])?
        .into_iter()
        .filter_map(|(_, tx)| match tx {
            OutgoingTx::ContractCall(call) => Some(call),
            _ => None,
        })
        .collect();
    Ok(ContractCallTxsResponse { calls })
}

// ============================================================================
// Confirmations
// ============================================================================

fn query_artifact(artifact: OutgoingTxRef) -> StdResult<OutgoingTxRef> {
    normalize_artifact(artifact).map_err(|e| StdError::generic_err(e.to_string()))
}

pub fn query_confirmations(
    deps: Deps,
    chain_id: ChainId,
    artifact: OutgoingTxRef,
) -> StdResult<ConfirmationsResponse> {
    let artifact = query_artifact(artifact)?;
    let confirmations = confirmations(deps.storage, chain_id, &artifact.store_index())?
        .into_iter()
        .map(|(validator, signature)| ConfirmationEntry {
            validator,
            signature,
        })
        .collect();
    Ok(ConfirmationsResponse { confirmations })
}

pub fn query_is_confirmed(
    deps: Deps,
    chain_id: ChainId,
    artifact: OutgoingTxRef,
) -> StdResult<IsConfirmedResponse> {
    let artifact = query_artifact(artifact)?;
    let (confirmed_power, total_power) = confirmation_power(deps.storage, chain_id, &artifact)?;
    Ok(IsConfirmedResponse {
        confirmed: reaches_quorum(confirmed_power, total_power),
        confirmed_power,
        total_power,
    })
}

pub fn query_outgoing_tx_digest(
    deps: Deps,
    chain_id: ChainId,
    artifact: OutgoingTxRef,
) -> StdResult<DigestResponse> {
    let artifact = query_artifact(artifact)?;
    let params = CHAIN_PARAMS
        .may_load(deps.storage, chain_id)?
        .ok_or_else(|| chain_not_supported(chain_id))?;
    let tx = OUTGOING_TXS
        .may_load(deps.storage, (chain_id, artifact.store_index().as_slice()))?
        .ok_or_else(|| StdError::not_found(format!("{} artifact", artifact.kind())))?;
    Ok(DigestResponse {
        digest: Binary::from(outgoing_tx_digest(&params.gravity_id, &tx)?.to_vec()),
    })
}

// ============================================================================
// Denoms & Delegation
// ============================================================================

pub fn query_denom_to_erc20(
    deps: Deps,
    chain_id: ChainId,
    denom: String,
) -> StdResult<DenomToErc20Response> {
    let (cosmos_originated, erc20) = denom_to_erc20(deps.storage, chain_id, &denom)
        .map_err(|e| StdError::generic_err(e.to_string()))?;
    Ok(DenomToErc20Response {
        erc20,
        cosmos_originated,
    })
}

pub fn query_erc20_to_denom(
    deps: Deps,
    chain_id: ChainId,
    erc20: String,
) -> StdResult<Erc20ToDenomResponse> {
    let erc20 =
        normalize_evm_address(&erc20).map_err(|e| StdError::generic_err(e.to_string()))?;
    let (cosmos_originated, denom) = erc20_to_denom(deps.storage, chain_id, &erc20)?;
    Ok(Erc20ToDenomResponse {
        denom,
        cosmos_originated,
    })
}

pub fn query_delegate_keys_by_validator(
    deps: Deps,
    validator: String,
) -> StdResult<Option<DelegateKeys>> {
    let validator = deps.api.addr_validate(&validator)?;
    DELEGATE_KEYS.may_load(deps.storage, &validator)
}

pub fn query_delegate_keys_by_orchestrator(
    deps: Deps,
    orchestrator: String,
) -> StdResult<Option<DelegateKeys>> {
    let orchestrator = deps.api.addr_validate(&orchestrator)?;
    match ORCHESTRATOR_VALIDATOR.may_load(deps.storage, &orchestrator)? {
        Some(validator) => DELEGATE_KEYS.may_load(deps.storage, &validator),
        None => Ok(None),
    }
}

pub fn query_delegate_keys_by_evm_address(
    deps: Deps,
    evm_address: String,
) -> StdResult<Option<DelegateKeys>> {
    let evm_address =
        normalize_evm_address(&evm_address).map_err(|e| StdError::generic_err(e.to_string()))?;
    match EVM_ADDRESS_VALIDATOR.may_load(deps.storage, &evm_address)? {
        Some(validator) => DELEGATE_KEYS.may_load(deps.storage, &validator),
        None => Ok(None),
    }
}
