//! State definitions for the Gravity bridge module
//!
//! Every entity that belongs to a counterparty chain is keyed by its
//! [`ChainId`] first, so state of different EVM chains never shares a key.
//! The u32 chain id is encoded big-endian by `cw_storage_plus`, giving the
//! `{namespace}{chain-id}{suffix}` layout.

use cosmwasm_schema::cw_serde;
use cosmwasm_std::{Addr, Binary, Order, StdResult, Storage, Uint128};
use cw_storage_plus::{Bound, Map};

use common::{ChainId, Erc20Token, EvmSigner};

use crate::params::ChainParams;

// ============================================================================
// Constants
// ============================================================================

/// Contract name for cw2 migration info
pub const CONTRACT_NAME: &str = "crates.io:gravity";

/// Contract version for cw2 migration info (v2.0.0 = multi-chain key layout)
pub const CONTRACT_VERSION: &str = "2.0.0";

/// Module account that escrows outgoing funds and mints vouchers.
pub const MODULE_NAME: &str = "gravity";

/// Store index prefix for signer set artifacts
pub const SIGNER_SET_TX_PREFIX: u8 = 0x01;

/// Store index prefix for batch artifacts
pub const BATCH_TX_PREFIX: u8 = 0x02;

/// Store index prefix for contract call artifacts
pub const CONTRACT_CALL_TX_PREFIX: u8 = 0x03;

// ============================================================================
// Delegate Keys
// ============================================================================

/// Keys a validator delegates to its orchestrator.
#[cw_serde]
pub struct DelegateKeys {
    /// Validator operator address
    pub validator: Addr,
    /// Cosmos account that submits claims and confirmations
    pub orchestrator: Addr,
    /// EVM address the validator signs outgoing artifacts with
    pub evm_address: String,
}

// ============================================================================
// EVM Events (claims)
// ============================================================================

/// Tokens locked in the EVM bridge contract for a Cosmos receiver.
#[cw_serde]
pub struct DepositEvent {
    pub event_nonce: u64,
    pub evm_height: u64,
    pub token_contract: String,
    pub amount: Uint128,
    pub evm_sender: String,
    pub cosmos_receiver: String,
}

/// A batch was submitted to and executed by the EVM bridge contract.
#[cw_serde]
pub struct BatchExecutedEvent {
    pub event_nonce: u64,
    pub evm_height: u64,
    pub token_contract: String,
    pub batch_nonce: u64,
}

/// A contract call was executed by the EVM bridge contract.
#[cw_serde]
pub struct ContractCallExecutedEvent {
    pub event_nonce: u64,
    pub evm_height: u64,
    pub invalidation_scope: Binary,
    pub invalidation_nonce: u64,
}

/// An ERC20 representing a Cosmos denom was deployed through the bridge contract.
#[cw_serde]
pub struct Erc20DeployedEvent {
    pub event_nonce: u64,
    pub evm_height: u64,
    pub cosmos_denom: String,
    pub token_contract: String,
    pub erc20_name: String,
    pub erc20_symbol: String,
    pub erc20_decimals: u8,
}

/// The EVM bridge contract switched to a new signer set.
#[cw_serde]
pub struct SignerSetUpdatedEvent {
    pub event_nonce: u64,
    pub evm_height: u64,
    pub signer_set_nonce: u64,
    pub members: Vec<EvmSigner>,
}

/// Events observed on an EVM chain that orchestrators attest to.
#[cw_serde]
pub enum EvmEvent {
    Deposit(DepositEvent),
    BatchExecuted(BatchExecutedEvent),
    ContractCallExecuted(ContractCallExecutedEvent),
    Erc20Deployed(Erc20DeployedEvent),
    SignerSetUpdated(SignerSetUpdatedEvent),
}

impl EvmEvent {
    pub fn event_nonce(&self) -> u64 {
        match self {
            EvmEvent::Deposit(e) => e.event_nonce,
            EvmEvent::BatchExecuted(e) => e.event_nonce,
            EvmEvent::ContractCallExecuted(e) => e.event_nonce,
            EvmEvent::Erc20Deployed(e) => e.event_nonce,
            EvmEvent::SignerSetUpdated(e) => e.event_nonce,
        }
    }

    pub fn evm_height(&self) -> u64 {
        match self {
            EvmEvent::Deposit(e) => e.evm_height,
            EvmEvent::BatchExecuted(e) => e.evm_height,
            EvmEvent::ContractCallExecuted(e) => e.evm_height,
            EvmEvent::Erc20Deployed(e) => e.evm_height,
            EvmEvent::SignerSetUpdated(e) => e.evm_height,
        }
    }

    /// Stable type tag, also the domain separator of the claim hash.
    pub fn type_name(&self) -> &'static str {
        match self {
            EvmEvent::Deposit(_) => "deposit",
            EvmEvent::BatchExecuted(_) => "batch_executed",
            EvmEvent::ContractCallExecuted(_) => "contract_call_executed",
            EvmEvent::Erc20Deployed(_) => "erc20_deployed",
            EvmEvent::SignerSetUpdated(_) => "signer_set_updated",
        }
    }
}

// ============================================================================
// Attestations
// ============================================================================

/// Aggregated votes for one claimed event.
#[cw_serde]
pub struct Attestation {
    pub event: EvmEvent,
    /// Validators that claimed this exact event, in vote order
    pub votes: Vec<Addr>,
    /// Latches to true once; never reset
    pub accepted: bool,
    /// Cosmos height at which the first vote was recorded
    pub height: u64,
    /// Cosmos height at which the attestation was accepted
    pub observed_height: Option<u64>,
    /// Set when the accepted event could not be applied
    pub apply_error: Option<String>,
}

/// Highest EVM block height observed through accepted events.
#[cw_serde]
pub struct LatestEvmBlockHeight {
    pub evm_height: u64,
    pub cosmos_height: u64,
}

// ============================================================================
// Outgoing Pool & Artifacts
// ============================================================================

/// A pending transfer from Cosmos to an EVM chain.
#[cw_serde]
pub struct SendToEvm {
    pub id: u64,
    pub sender: Addr,
    pub evm_recipient: String,
    pub erc20_token: Erc20Token,
    pub erc20_fee: Erc20Token,
    pub chain_id: ChainId,
}

/// A fee-ordered set of transfers of one token, signed as a unit.
#[cw_serde]
pub struct BatchTx {
    pub batch_nonce: u64,
    /// EVM block height after which the batch can no longer execute
    pub timeout: u64,
    pub transactions: Vec<SendToEvm>,
    pub token_contract: String,
    pub height: u64,
    pub chain_id: ChainId,
}

impl BatchTx {
    pub fn total_fee(&self) -> Uint128 {
        self.transactions
            .iter()
            .fold(Uint128::zero(), |acc, tx| acc + tx.erc20_fee.amount)
    }
}

/// Snapshot of the validator set as it must be installed on the EVM side.
#[cw_serde]
pub struct SignerSetTx {
    pub nonce: u64,
    pub height: u64,
    pub signers: Vec<EvmSigner>,
    pub chain_id: ChainId,
}

impl SignerSetTx {
    pub fn total_power(&self) -> u64 {
        self.signers.iter().map(|s| s.power).sum()
    }

    pub fn power_of(&self, evm_address: &str) -> u64 {
        self.signers
            .iter()
            .filter(|s| s.evm_address == evm_address)
            .map(|s| s.power)
            .sum()
    }
}

/// An arbitrary call the EVM bridge contract performs, replaced by nonce
/// within its invalidation scope.
#[cw_serde]
pub struct ContractCallTx {
    pub invalidation_scope: Binary,
    pub invalidation_nonce: u64,
    pub address: String,
    pub payload: Binary,
    pub timeout: u64,
    pub tokens: Vec<Erc20Token>,
    pub fees: Vec<Erc20Token>,
    pub height: u64,
    pub chain_id: ChainId,
}

/// Anything awaiting validator signatures before it can be relayed.
#[cw_serde]
pub enum OutgoingTx {
    SignerSet(SignerSetTx),
    Batch(BatchTx),
    ContractCall(ContractCallTx),
}

impl OutgoingTx {
    pub fn reference(&self) -> OutgoingTxRef {
        match self {
            OutgoingTx::SignerSet(tx) => OutgoingTxRef::SignerSet { nonce: tx.nonce },
            OutgoingTx::Batch(tx) => OutgoingTxRef::Batch {
                token_contract: tx.token_contract.clone(),
                batch_nonce: tx.batch_nonce,
            },
            OutgoingTx::ContractCall(tx) => OutgoingTxRef::ContractCall {
                invalidation_scope: tx.invalidation_scope.clone(),
                invalidation_nonce: tx.invalidation_nonce,
            },
        }
    }

    pub fn store_index(&self) -> Vec<u8> {
        self.reference().store_index()
    }

    pub fn height(&self) -> u64 {
        match self {
            OutgoingTx::SignerSet(tx) => tx.height,
            OutgoingTx::Batch(tx) => tx.height,
            OutgoingTx::ContractCall(tx) => tx.height,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        match self {
            OutgoingTx::SignerSet(tx) => tx.chain_id,
            OutgoingTx::Batch(tx) => tx.chain_id,
            OutgoingTx::ContractCall(tx) => tx.chain_id,
        }
    }
}

/// Identifies one outgoing artifact within a chain.
#[cw_serde]
pub enum OutgoingTxRef {
    SignerSet {
        nonce: u64,
    },
    Batch {
        token_contract: String,
        batch_nonce: u64,
    },
    ContractCall {
        invalidation_scope: Binary,
        invalidation_nonce: u64,
    },
}

impl OutgoingTxRef {
    /// Key suffix of the artifact: type prefix byte, type specific scope,
    /// big-endian nonce. Nonces sort ascending within a scope.
    pub fn store_index(&self) -> Vec<u8> {
        match self {
            OutgoingTxRef::SignerSet { nonce } => {
                let mut key = vec![SIGNER_SET_TX_PREFIX];
                key.extend_from_slice(&nonce.to_be_bytes());
                key
            }
            OutgoingTxRef::Batch {
                token_contract,
                batch_nonce,
            } => {
                let mut key = batch_scope_prefix(token_contract);
                key.extend_from_slice(&batch_nonce.to_be_bytes());
                key
            }
            OutgoingTxRef::ContractCall {
                invalidation_scope,
                invalidation_nonce,
            } => {
                let mut key = contract_call_scope_prefix(invalidation_scope);
                key.extend_from_slice(&invalidation_nonce.to_be_bytes());
                key
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutgoingTxRef::SignerSet { .. } => "signer_set",
            OutgoingTxRef::Batch { .. } => "batch",
            OutgoingTxRef::ContractCall { .. } => "contract_call",
        }
    }
}

/// Common prefix of every batch for `token_contract`.
pub fn batch_scope_prefix(token_contract: &str) -> Vec<u8> {
    let mut key = vec![BATCH_TX_PREFIX];
    key.extend_from_slice(token_contract.as_bytes());
    key
}

/// Longest invalidation scope whose length fits the two-byte key prefix.
pub const MAX_INVALIDATION_SCOPE_LEN: usize = u16::MAX as usize;

/// Common prefix of every contract call in `scope`. The scope is length
/// prefixed so that one scope is never a prefix of another. Scopes are at
/// most [`MAX_INVALIDATION_SCOPE_LEN`] bytes long.
pub fn contract_call_scope_prefix(scope: &[u8]) -> Vec<u8> {
    let mut key = vec![CONTRACT_CALL_TX_PREFIX];
    key.extend_from_slice(&(scope.len() as u16).to_be_bytes());
    key.extend_from_slice(scope);
    key
}

// ============================================================================
// Storage: Configuration & Delegation
// ============================================================================

/// Per-chain parameters. The key set is the set of tracked chains.
pub const CHAIN_PARAMS: Map<ChainId, ChainParams> = Map::new("chain_params");

/// Key: validator operator address, Value: delegated keys
pub const DELEGATE_KEYS: Map<&Addr, DelegateKeys> = Map::new("delegate_keys");

/// Key: validator operator address, Value: height its delegate keys were first set
pub const DELEGATE_KEYS_HEIGHT: Map<&Addr, u64> = Map::new("delegate_keys_height");

/// Key: orchestrator address, Value: validator operator address
pub const ORCHESTRATOR_VALIDATOR: Map<&Addr, Addr> = Map::new("orchestrator_validator");

/// Key: normalized EVM address, Value: validator operator address
pub const EVM_ADDRESS_VALIDATOR: Map<&str, Addr> = Map::new("evm_address_validator");

// ============================================================================
// Storage: Attestations & Nonces
// ============================================================================

/// Key: (chain, event nonce, claim hash)
pub const ATTESTATIONS: Map<(ChainId, u64, &[u8]), Attestation> = Map::new("attestations");

pub const LAST_OBSERVED_EVENT_NONCE: Map<ChainId, u64> = Map::new("last_observed_event_nonce");

/// Key: (chain, validator)
pub const LAST_EVENT_NONCE_BY_VALIDATOR: Map<(ChainId, &Addr), u64> =
    Map::new("last_event_nonce_by_validator");

pub const LATEST_EVM_BLOCK_HEIGHT: Map<ChainId, LatestEvmBlockHeight> =
    Map::new("latest_evm_block_height");

// ============================================================================
// Storage: Outgoing Artifacts & Signatures
// ============================================================================

/// Key: (chain, artifact store index)
pub const OUTGOING_TXS: Map<(ChainId, &[u8]), OutgoingTx> = Map::new("outgoing_txs");

/// Key: (chain, artifact store index, validator), Value: 65-byte signature
pub const EVM_SIGNATURES: Map<(ChainId, &[u8], &Addr), Binary> = Map::new("evm_signatures");

pub const LATEST_SIGNER_SET_TX_NONCE: Map<ChainId, u64> = Map::new("latest_signer_set_tx_nonce");

pub const LAST_OBSERVED_SIGNER_SET: Map<ChainId, SignerSetTx> =
    Map::new("last_observed_signer_set");

pub const LAST_OUTGOING_BATCH_NONCE: Map<ChainId, u64> = Map::new("last_outgoing_batch_nonce");

// ============================================================================
// Storage: Send-to-EVM Pool
// ============================================================================

/// Unbatched pool entries. Key: (chain, pool id)
pub const SEND_TO_EVMS: Map<(ChainId, u64), SendToEvm> = Map::new("send_to_evms");

/// Secondary index over [`SEND_TO_EVMS`] ordering entries for batch selection.
///
/// Key: (chain, token contract, [`fee_index_suffix`]), Value: pool id. Every
/// write or delete of a pool entry updates both maps in the same call; an
/// entry is in the pool if and only if it is present in both.
pub const UNBATCHED_FEE_INDEX: Map<(ChainId, &str, &[u8]), u64> =
    Map::new("unbatched_fee_index");

pub const LAST_SEND_TO_EVM_ID: Map<ChainId, u64> = Map::new("last_send_to_evm_id");

/// Inverted fee followed by id: ascending key order is highest fee first,
/// then oldest id first.
pub fn fee_index_suffix(fee: Uint128, id: u64) -> Vec<u8> {
    let mut suffix = Vec::with_capacity(24);
    suffix.extend_from_slice(&(u128::MAX - fee.u128()).to_be_bytes());
    suffix.extend_from_slice(&id.to_be_bytes());
    suffix
}

// ============================================================================
// Storage: Denom Registry
// ============================================================================

/// Cosmos-originated denoms. Key: (chain, denom), Value: ERC20 contract
pub const DENOM_TO_ERC20: Map<(ChainId, &str), String> = Map::new("denom_to_erc20");

/// Key: (chain, ERC20 contract), Value: cosmos denom
pub const ERC20_TO_DENOM: Map<(ChainId, &str), String> = Map::new("erc20_to_denom");

// ============================================================================
// Storage: Slashing Bookkeeping
// ============================================================================

pub const LAST_SLASHED_SIGNER_SET_NONCE: Map<ChainId, u64> =
    Map::new("last_slashed_signer_set_nonce");

pub const LAST_SLASHED_OUTGOING_TX_HEIGHT: Map<ChainId, u64> =
    Map::new("last_slashed_outgoing_tx_height");

pub const LAST_SLASHED_EVENT_NONCE: Map<ChainId, u64> = Map::new("last_slashed_event_nonce");

// ============================================================================
// Helpers
// ============================================================================

/// Load a per-chain counter, defaulting to zero.
pub fn load_counter(
    storage: &dyn Storage,
    map: &Map<ChainId, u64>,
    chain_id: ChainId,
) -> StdResult<u64> {
    Ok(map.may_load(storage, chain_id)?.unwrap_or_default())
}

/// Increment a per-chain counter and return the new value.
pub fn increment_counter(
    storage: &mut dyn Storage,
    map: &Map<ChainId, u64>,
    chain_id: ChainId,
) -> StdResult<u64> {
    let next = load_counter(storage, map, chain_id)? + 1;
    map.save(storage, chain_id, &next)?;
    Ok(next)
}

/// Tracked chains, ascending.
pub fn tracked_chains(storage: &dyn Storage) -> StdResult<Vec<ChainId>> {
    CHAIN_PARAMS
        .keys(storage, None, None, Order::Ascending)
        .collect()
}

/// Outgoing artifacts of a chain whose store index starts with `prefix`,
/// ascending by store index.
pub fn outgoing_txs_with_prefix(
    storage: &dyn Storage,
    chain_id: ChainId,
    prefix: &[u8],
) -> StdResult<Vec<(Vec<u8>, OutgoingTx)>> {
    let end = prefix_end(prefix);
    OUTGOING_TXS
        .prefix(chain_id)
        .range(
            storage,
            Some(Bound::inclusive(prefix)),
            end.as_deref().map(Bound::exclusive),
            Order::Ascending,
        )
        .collect()
}

/// Smallest key greater than every key starting with `prefix`.
fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_index_orders_high_fee_then_low_id() {
        let a = fee_index_suffix(Uint128::new(5), 3);
        let b = fee_index_suffix(Uint128::new(5), 1);
        let c = fee_index_suffix(Uint128::new(3), 4);
        let d = fee_index_suffix(Uint128::new(1), 2);

        let mut keys = vec![d.clone(), c.clone(), a.clone(), b.clone()];
        keys.sort();
        assert_eq!(keys, vec![b, a, c, d]);
    }

    #[test]
    fn test_store_index_prefixes_do_not_collide() {
        let signer_set = OutgoingTxRef::SignerSet { nonce: 7 }.store_index();
        let batch = OutgoingTxRef::Batch {
            token_contract: "0xabc".to_string(),
            batch_nonce: 7,
        }
        .store_index();
        let call = OutgoingTxRef::ContractCall {
            invalidation_scope: Binary::from(b"scope".to_vec()),
            invalidation_nonce: 7,
        }
        .store_index();

        assert_eq!(signer_set[0], SIGNER_SET_TX_PREFIX);
        assert_eq!(batch[0], BATCH_TX_PREFIX);
        assert_eq!(call[0], CONTRACT_CALL_TX_PREFIX);
        assert!(batch.starts_with(&batch_scope_prefix("0xabc")));
    }

    #[test]
    fn test_contract_call_scopes_are_length_prefixed() {
        let short = contract_call_scope_prefix(b"ab");
        let long = contract_call_scope_prefix(b"abc");
        assert!(!long.starts_with(&short));
    }

    #[test]
    fn test_prefix_end() {
        assert_eq!(prefix_end(&[0x02, 0x10]), Some(vec![0x02, 0x11]));
        assert_eq!(prefix_end(&[0x02, 0xff]), Some(vec![0x03]));
        assert_eq!(prefix_end(&[0xff]), None);
    }

    #[test]
    fn test_batch_index_nonce_order() {
        let one = OutgoingTxRef::Batch {
            token_contract: "0xabc".to_string(),
            batch_nonce: 1,
        }
        .store_index();
        let two = OutgoingTxRef::Batch {
            token_contract: "0xabc".to_string(),
            batch_nonce: 256,
        }
        .store_index();
        assert!(one < two);
    }
}
