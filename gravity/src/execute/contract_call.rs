//! Contract call creation.
//!
//! Other modules ask the bridge to perform arbitrary calls on the EVM side.
//! Calls are grouped by invalidation scope; executing a call invalidates every
//! call with a lower nonce in the same scope.

use cosmwasm_std::{Binary, Env, StdResult, Storage};

use common::{ChainId, Erc20Token};

use crate::address_codec::normalize_evm_address;
use crate::error::ContractError;
use crate::params::load_chain_params;
use crate::state::{
    contract_call_scope_prefix, outgoing_txs_with_prefix, ContractCallTx, OutgoingTx,
    MAX_INVALIDATION_SCOPE_LEN, OUTGOING_TXS,
};

use super::pool::{delete_outgoing_tx, evm_timeout_height};

/// Arguments of [`create_contract_call_tx`]
pub struct ContractCallRequest {
    pub invalidation_scope: Binary,
    pub invalidation_nonce: u64,
    pub address: String,
    pub payload: Binary,
    pub tokens: Vec<Erc20Token>,
    pub fees: Vec<Erc20Token>,
    /// EVM timeout height; the chain's default horizon when `None`
    pub timeout: Option<u64>,
}

/// Store a contract call awaiting signatures, replacing one with the same
/// scope and nonce.
pub fn create_contract_call_tx(
    storage: &mut dyn Storage,
    env: &Env,
    chain_id: ChainId,
    request: ContractCallRequest,
) -> Result<ContractCallTx, ContractError> {
    let params = load_chain_params(storage, chain_id)?;
    if request.invalidation_scope.is_empty() {
        return Err(ContractError::InvalidParams {
            reason: "invalidation scope cannot be empty".to_string(),
        });
    }
    if request.invalidation_scope.len() > MAX_INVALIDATION_SCOPE_LEN {
        return Err(ContractError::InvalidParams {
            reason: format!(
                "invalidation scope is {} bytes, at most {} allowed",
                request.invalidation_scope.len(),
                MAX_INVALIDATION_SCOPE_LEN
            ),
        });
    }
    let address = normalize_evm_address(&request.address)?;

    let timeout = match request.timeout {
        Some(timeout) => timeout,
        None => evm_timeout_height(storage, env, &params, chain_id)?,
    };

    let call = ContractCallTx {
        invalidation_scope: request.invalidation_scope,
        invalidation_nonce: request.invalidation_nonce,
        address,
        payload: request.payload,
        timeout,
        tokens: normalize_tokens(request.tokens)?,
        fees: normalize_tokens(request.fees)?,
        height: env.block.height,
        chain_id,
    };
    let tx = OutgoingTx::ContractCall(call.clone());
    OUTGOING_TXS.save(storage, (chain_id, tx.store_index().as_slice()), &tx)?;
    Ok(call)
}

fn normalize_tokens(tokens: Vec<Erc20Token>) -> Result<Vec<Erc20Token>, ContractError> {
    let mut out = Vec::with_capacity(tokens.len());
    for token in tokens {
        out.push(Erc20Token::new(
            normalize_evm_address(&token.contract)?,
            token.amount,
        ));
    }
    Ok(out)
}

/// Contract calls in one invalidation scope, ascending by nonce.
pub fn contract_calls_in_scope(
    storage: &dyn Storage,
    chain_id: ChainId,
    scope: &[u8],
) -> StdResult<Vec<ContractCallTx>> {
    Ok(
        outgoing_txs_with_prefix(storage, chain_id, &contract_call_scope_prefix(scope))?
            .into_iter()
            .filter_map(|(_, tx)| match tx {
                OutgoingTx::ContractCall(call) => Some(call),
                _ => None,
            })
            .collect(),
    )
}

/// Delete an executed call and every older call in its scope.
pub fn contract_call_executed(
    storage: &mut dyn Storage,
    chain_id: ChainId,
    scope: &[u8],
    nonce: u64,
) -> Result<(), ContractError> {
    let calls = contract_calls_in_scope(storage, chain_id, scope)?;
    if !calls.iter().any(|c| c.invalidation_nonce == nonce) {
        return Err(ContractError::ApplicationError {
            reason: format!("contract call {} not found on chain {}", nonce, chain_id),
        });
    }
    for call in calls.into_iter().filter(|c| c.invalidation_nonce <= nonce) {
        delete_outgoing_tx(storage, &OutgoingTx::ContractCall(call))?;
    }
    Ok(())
}
