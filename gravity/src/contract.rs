//! Gravity Bridge Module - Entry Points
//!
//! The host chain drives the module through these functions, passing its
//! bank and staking keepers alongside the usual `deps`/`env`/`info`.
//! The implementation is modularized into:
//! - `execute/` - Execute message handlers
//! - `end_block` - Per-block housekeeping
//! - `query` - Query message handlers
//! - `migrate` - Store migrations

use std::collections::BTreeSet;

use cosmwasm_std::{to_json_binary, Binary, Deps, DepsMut, Env, MessageInfo, Response, StdResult};
use cw2::set_contract_version;

use crate::address_codec::normalize_evm_address;
use crate::denom::{parse_voucher_denom, set_cosmos_originated_denom};
use crate::error::ContractError;
use crate::execute::{
    execute_cancel_send_to_evm, execute_request_batch, execute_send_to_evm,
    execute_set_delegate_keys, execute_submit_claim, execute_submit_confirmation,
    set_delegate_keys,
};
use crate::keeper::Keepers;
use crate::migrate::migrate_v1_to_v2;
use crate::msg::{ExecuteMsg, InstantiateMsg, MigrateMsg, QueryMsg};
use crate::query::{
    query_attestation, query_attestations, query_batch_fees, query_batch_tx, query_batch_txs,
    query_chain_params, query_confirmations, query_contract_call_txs,
    query_delegate_keys_by_evm_address, query_delegate_keys_by_orchestrator,
    query_delegate_keys_by_validator, query_denom_to_erc20, query_erc20_to_denom,
    query_is_confirmed, query_last_event_nonce_by_validator, query_last_observed_event_nonce,
    query_last_observed_signer_set_tx, query_latest_evm_block_height, query_latest_signer_set_tx,
    query_outgoing_tx_digest, query_signer_set_tx, query_signer_set_txs, query_tracked_chains,
    query_unbatched_send_to_evms,
};
use crate::state::{CHAIN_PARAMS, CONTRACT_NAME, CONTRACT_VERSION, DENOM_TO_ERC20, ERC20_TO_DENOM};

pub use crate::end_block::end_block;

// ============================================================================
// Instantiate
// ============================================================================

/// Initialize module state from genesis.
pub fn instantiate(
    deps: DepsMut,
    env: Env,
    _info: MessageInfo,
    msg: InstantiateMsg,
) -> Result<Response, ContractError> {
    set_contract_version(deps.storage, CONTRACT_NAME, CONTRACT_VERSION)?;

    if msg.chains.is_empty() {
        return Err(ContractError::InvalidParams {
            reason: "At least one chain required".to_string(),
        });
    }

    let mut seen = BTreeSet::new();
    for chain in &msg.chains {
        if !seen.insert(chain.chain_id) {
            return Err(ContractError::InvalidParams {
                reason: format!("chain {} configured twice", chain.chain_id),
            });
        }
        chain.params.validate()?;
        CHAIN_PARAMS.save(deps.storage, chain.chain_id, &chain.params)?;
    }

    for entry in &msg.delegate_keys {
        let validator = deps.api.addr_validate(&entry.validator)?;
        set_delegate_keys(
            deps.storage,
            deps.api,
            env.block.height,
            validator,
            &entry.orchestrator,
            &entry.evm_address,
        )?;
    }

    for entry in &msg.erc20_to_denoms {
        if !CHAIN_PARAMS.has(deps.storage, entry.chain_id) {
            return Err(ContractError::ChainNotSupported {
                chain_id: entry.chain_id,
            });
        }
        if entry.denom.is_empty() || parse_voucher_denom(&entry.denom).is_some() {
            return Err(ContractError::InvalidParams {
                reason: format!("{} cannot be registered as cosmos-originated", entry.denom),
            });
        }
        let erc20 = normalize_evm_address(&entry.erc20)?;
        if DENOM_TO_ERC20.has(deps.storage, (entry.chain_id, entry.denom.as_str()))
            || ERC20_TO_DENOM.has(deps.storage, (entry.chain_id, erc20.as_str()))
        {
            return Err(ContractError::InvalidParams {
                reason: format!(
                    "duplicate ERC20 mapping for {} on chain {}",
                    entry.denom, entry.chain_id
                ),
            });
        }
        set_cosmos_originated_denom(deps.storage, entry.chain_id, &entry.denom, &erc20)?;
    }

    Ok(Response::new()
        .add_attribute("method", "instantiate")
        .add_attribute("chain_count", msg.chains.len().to_string())
        .add_attribute("delegate_key_count", msg.delegate_keys.len().to_string())
        .add_attribute("erc20_mapping_count", msg.erc20_to_denoms.len().to_string()))
}

// ============================================================================
// Execute
// ============================================================================

pub fn execute(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    keepers: &mut Keepers,
    msg: ExecuteMsg,
) -> Result<Response, ContractError> {
    match msg {
        // Delegation
        ExecuteMsg::SetDelegateKeys {
            orchestrator,
            evm_address,
        } => execute_set_delegate_keys(deps, env, info, keepers, orchestrator, evm_address),

        // Orchestrator duties
        ExecuteMsg::SubmitClaim { chain_id, event } => {
            execute_submit_claim(deps, env, info, keepers, chain_id, event)
        }
        ExecuteMsg::SubmitConfirmation {
            chain_id,
            artifact,
            evm_signer,
            signature,
        } => execute_submit_confirmation(
            deps, info, keepers, chain_id, artifact, evm_signer, signature,
        ),

        // Outgoing transfers
        ExecuteMsg::SendToEvm {
            chain_id,
            evm_recipient,
            amount,
            bridge_fee,
        } => execute_send_to_evm(
            deps,
            info,
            keepers,
            chain_id,
            evm_recipient,
            amount,
            bridge_fee,
        ),
        ExecuteMsg::CancelSendToEvm { chain_id, id } => {
            execute_cancel_send_to_evm(deps, info, keepers, chain_id, id)
        }
        ExecuteMsg::RequestBatch { chain_id, denom } => {
            execute_request_batch(deps, env, chain_id, denom)
        }
    }
}

// ============================================================================
// Query
// ============================================================================

pub fn query(deps: Deps, _env: Env, msg: QueryMsg) -> StdResult<Binary> {
    match msg {
        // Parameters & nonces
        QueryMsg::ChainParams { chain_id } => to_json_binary(&query_chain_params(deps, chain_id)?),
        QueryMsg::TrackedChains {} => to_json_binary(&query_tracked_chains(deps)?),
        QueryMsg::LastObservedEventNonce { chain_id } => {
            to_json_binary(&query_last_observed_event_nonce(deps, chain_id)?)
        }
        QueryMsg::LastEventNonceByValidator {
            chain_id,
            validator,
        } => to_json_binary(&query_last_event_nonce_by_validator(
            deps, chain_id, validator,
        )?),
        QueryMsg::LatestEvmBlockHeight { chain_id } => {
            to_json_binary(&query_latest_evm_block_height(deps, chain_id)?)
        }

        // Attestations
        QueryMsg::Attestation {
            chain_id,
            event_nonce,
            claim_hash,
        } => to_json_binary(&query_attestation(deps, chain_id, event_nonce, claim_hash)?),
        QueryMsg::Attestations {
            chain_id,
            start_after_nonce,
            limit,
        } => to_json_binary(&query_attestations(
            deps,
            chain_id,
            start_after_nonce,
            limit,
        )?),

        // Pool & batches
        QueryMsg::UnbatchedSendToEvms {
            chain_id,
            sender,
            start_after,
            limit,
        } => to_json_binary(&query_unbatched_send_to_evms(
            deps,
            chain_id,
            sender,
            start_after,
            limit,
        )?),
        QueryMsg::BatchFees { chain_id } => to_json_binary(&query_batch_fees(deps, chain_id)?),
        QueryMsg::BatchTx {
            chain_id,
            token_contract,
            batch_nonce,
        } => to_json_binary(&query_batch_tx(deps, chain_id, token_contract, batch_nonce)?),
        QueryMsg::BatchTxs { chain_id } => to_json_binary(&query_batch_txs(deps, chain_id)?),

        // Signer sets & contract calls
        QueryMsg::SignerSetTx { chain_id, nonce } => {
            to_json_binary(&query_signer_set_tx(deps, chain_id, nonce)?)
        }
        QueryMsg::LatestSignerSetTx { chain_id } => {
            to_json_binary(&query_latest_signer_set_tx(deps, chain_id)?)
        }
        QueryMsg::LastObservedSignerSetTx { chain_id } => {
            to_json_binary(&query_last_observed_signer_set_tx(deps, chain_id)?)
        }
        QueryMsg::SignerSetTxs { chain_id } => {
            to_json_binary(&query_signer_set_txs(deps, chain_id)?)
        }
        QueryMsg::ContractCallTxs { chain_id } => {
            to_json_binary(&query_contract_call_txs(deps, chain_id)?)
        }

        // Confirmations
        QueryMsg::Confirmations { chain_id, artifact } => {
            to_json_binary(&query_confirmations(deps, chain_id, artifact)?)
        }
        QueryMsg::IsConfirmed { chain_id, artifact } => {
            to_json_binary(&query_is_confirmed(deps, chain_id, artifact)?)
        }
        QueryMsg::OutgoingTxDigest { chain_id, artifact } => {
            to_json_binary(&query_outgoing_tx_digest(deps, chain_id, artifact)?)
        }

        // Denoms & delegation
        QueryMsg::DenomToErc20 { chain_id, denom } => {
            to_json_binary(&query_denom_to_erc20(deps, chain_id, denom)?)
        }
        QueryMsg::Erc20ToDenom { chain_id, erc20 } => {
            to_json_binary(&query_erc20_to_denom(deps, chain_id, erc20)?)
        }
        QueryMsg::DelegateKeysByValidator { validator } => {
            to_json_binary(&query_delegate_keys_by_validator(deps, validator)?)
        }
        QueryMsg::DelegateKeysByOrchestrator { orchestrator } => {
            to_json_binary(&query_delegate_keys_by_orchestrator(deps, orchestrator)?)
        }
        QueryMsg::DelegateKeysByEvmAddress { evm_address } => {
            to_json_binary(&query_delegate_keys_by_evm_address(deps, evm_address)?)
        }
    }
}

// ============================================================================
// Migrate
// ============================================================================

/// Upgrade the store to the current layout. A store already at the current
/// version is left untouched.
pub fn migrate(deps: DepsMut, _env: Env, _msg: MigrateMsg) -> Result<Response, ContractError> {
    let stored = cw2::get_contract_version(deps.storage)?;
    if stored.contract != CONTRACT_NAME {
        return Err(ContractError::MigrationError {
            reason: format!("cannot migrate from contract {}", stored.contract),
        });
    }

    let mut response = Response::new()
        .add_attribute("method", "migrate")
        .add_attribute("from_version", stored.version.clone())
        .add_attribute("version", CONTRACT_VERSION);

    if stored.version.starts_with("1.") {
        let migrated = migrate_v1_to_v2(deps.storage)?;
        response = response.add_attribute("migrated_entries", migrated.to_string());
    } else if stored.version != CONTRACT_VERSION {
        return Err(ContractError::MigrationError {
            reason: format!("unsupported store version {}", stored.version),
        });
    }

    set_contract_version(deps.storage, CONTRACT_NAME, CONTRACT_VERSION)?;
    Ok(response)
}
