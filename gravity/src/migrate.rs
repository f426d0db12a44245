//! Store migration from the single-chain (v1) layout.
//!
//! v1 tracked exactly one EVM chain, Ethereum mainnet, and kept its state
//! in unscoped keys. Migrating re-keys every entity under
//! [`ETHEREUM_CHAIN_ID`] and deletes the old keys. Delegate keys were
//! already chain independent and are left in place.

use std::collections::BTreeMap;

use cosmwasm_std::{Addr, Binary, Order, StdResult, Storage};

use common::{ChainId, EvmSigner, ETHEREUM_CHAIN_ID};

use crate::address_codec::normalize_evm_address;
use crate::error::ContractError;
use crate::execute::add_to_pool;
use crate::params::{ChainParams, DEFAULT_ATTESTATION_RETENTION_WINDOW};
use crate::state::{
    Attestation, BatchTx, ContractCallTx, LatestEvmBlockHeight, OutgoingTx, SendToEvm,
    SignerSetTx, ATTESTATIONS, CHAIN_PARAMS, DENOM_TO_ERC20, ERC20_TO_DENOM, EVM_SIGNATURES,
    LAST_EVENT_NONCE_BY_VALIDATOR, LAST_OBSERVED_EVENT_NONCE, LAST_OBSERVED_SIGNER_SET,
    LAST_OUTGOING_BATCH_NONCE, LAST_SEND_TO_EVM_ID, LAST_SLASHED_EVENT_NONCE,
    LAST_SLASHED_OUTGOING_TX_HEIGHT, LAST_SLASHED_SIGNER_SET_NONCE, LATEST_EVM_BLOCK_HEIGHT,
    LATEST_SIGNER_SET_TX_NONCE, OUTGOING_TXS,
};

/// v1 storage layout and record shapes.
pub mod v1 {
    use cosmwasm_schema::cw_serde;
    use cosmwasm_std::{Addr, Binary, Decimal};
    use cw_storage_plus::{Item, Map};

    use common::Erc20Token;

    use crate::state::EvmEvent;

    #[cw_serde]
    pub struct Params {
        pub gravity_id: String,
        pub contract_source_hash: String,
        pub signed_signer_set_txs_window: u64,
        pub signed_batches_window: u64,
        pub ethereum_signatures_window: u64,
        pub target_eth_tx_timeout: u64,
        pub average_block_time: u64,
        pub average_ethereum_block_time: u64,
        pub slash_fraction_signer_set_tx: Decimal,
        pub slash_fraction_batch: Decimal,
        pub slash_fraction_ethereum_signature: Decimal,
        pub slash_fraction_conflicting_ethereum_signature: Decimal,
    }

    #[cw_serde]
    pub struct EthereumSigner {
        pub power: u64,
        pub ethereum_address: String,
    }

    #[cw_serde]
    pub struct SignerSetTx {
        pub nonce: u64,
        pub height: u64,
        pub signers: Vec<EthereumSigner>,
    }

    #[cw_serde]
    pub struct SendToEthereum {
        pub id: u64,
        pub sender: Addr,
        pub ethereum_recipient: String,
        pub erc20_token: Erc20Token,
        pub erc20_fee: Erc20Token,
    }

    #[cw_serde]
    pub struct BatchTx {
        pub batch_nonce: u64,
        pub timeout: u64,
        pub transactions: Vec<SendToEthereum>,
        pub token_contract: String,
        pub height: u64,
    }

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
    }

    #[cw_serde]
    pub enum OutgoingTx {
        SignerSet(SignerSetTx),
        Batch(BatchTx),
        ContractCall(ContractCallTx),
    }

    #[cw_serde]
    pub struct EthereumEventVoteRecord {
        pub event: EvmEvent,
        pub votes: Vec<Addr>,
        pub accepted: bool,
        pub height: u64,
    }

    #[cw_serde]
    pub struct LatestEthereumBlockHeight {
        pub ethereum_height: u64,
        pub cosmos_height: u64,
    }

    pub const PARAMS: Item<Params> = Item::new("params");

    pub const LAST_OBSERVED_EVENT_NONCE: Item<u64> = Item::new("last_observed_event_nonce");
    pub const LATEST_SIGNER_SET_TX_NONCE: Item<u64> = Item::new("latest_signer_set_tx_nonce");
    pub const LAST_SLASHED_OUTGOING_TX_BLOCK: Item<u64> =
        Item::new("last_slashed_outgoing_tx_block");
    pub const LAST_SLASHED_SIGNER_SET_TX_NONCE: Item<u64> =
        Item::new("last_slashed_signer_set_tx_nonce");
    pub const LAST_OUTGOING_BATCH_NONCE: Item<u64> = Item::new("last_outgoing_batch_nonce");
    pub const LAST_SEND_TO_ETHEREUM_ID: Item<u64> = Item::new("last_send_to_ethereum_id");
    pub const LAST_ETHEREUM_BLOCK_HEIGHT: Item<LatestEthereumBlockHeight> =
        Item::new("last_ethereum_block_height");
    pub const LAST_OBSERVED_SIGNER_SET: Item<SignerSetTx> = Item::new("last_observed_signer_set");

    /// Key: validator
    pub const LAST_EVENT_NONCE_BY_VALIDATOR: Map<&Addr, u64> =
        Map::new("last_event_nonce_by_validator");

    /// Key: (event nonce, claim hash)
    pub const ETHEREUM_EVENT_VOTE_RECORDS: Map<(u64, &[u8]), EthereumEventVoteRecord> =
        Map::new("ethereum_event_vote_records");

    /// Key: artifact store index
    pub const OUTGOING_TXS: Map<&[u8], OutgoingTx> = Map::new("outgoing_tx");

    /// Key: (artifact store index, validator)
    pub const ETHEREUM_SIGNATURES: Map<(&[u8], &Addr), Binary> = Map::new("ethereum_signatures");

    /// Key: pool id
    pub const SEND_TO_ETHEREUMS: Map<u64, SendToEthereum> = Map::new("send_to_ethereum");

    /// Key: denom, Value: ERC20 contract
    pub const DENOM_TO_ERC20: Map<&str, String> = Map::new("denom_to_erc20");

    /// Key: ERC20 contract, Value: denom
    pub const ERC20_TO_DENOM: Map<&str, String> = Map::new("erc20_to_denom");
}

fn migration_error(reason: impl Into<String>) -> ContractError {
    ContractError::MigrationError {
        reason: reason.into(),
    }
}

fn normalize(addr: &str) -> Result<String, ContractError> {
    normalize_evm_address(addr)
        .map_err(|e| migration_error(format!("invalid EVM address {}: {}", addr, e)))
}

/// Re-key v1 state under Ethereum mainnet. Returns the number of migrated records.
pub fn migrate_v1_to_v2(storage: &mut dyn Storage) -> Result<usize, ContractError> {
    tracing::info!("beginning store migration");
    let chain_id = ETHEREUM_CHAIN_ID;
    let mut migrated = 0usize;

    migrate_params(storage, chain_id)?;
    migrated += migrate_counters(storage, chain_id)?;
    migrated += migrate_event_nonces_by_validator(storage, chain_id)?;
    migrated += migrate_attestations(storage, chain_id)?;
    migrated += migrate_send_to_evms(storage, chain_id)?;
    migrated += migrate_outgoing_txs(storage, chain_id)?;
    migrated += migrate_denoms(storage, chain_id)?;

    tracing::info!(migrated, "store migration complete");
    Ok(migrated)
}

fn migrate_params(storage: &mut dyn Storage, chain_id: ChainId) -> Result<(), ContractError> {
    let old = v1::PARAMS
        .may_load(storage)?
        .ok_or_else(|| migration_error("v1 params not found"))?;
    v1::PARAMS.remove(storage);

    let params = ChainParams {
        gravity_id: old.gravity_id,
        contract_source_hash: old.contract_source_hash,
        signed_signer_set_txs_window: old.signed_signer_set_txs_window,
        signed_batches_window: old.signed_batches_window,
        signed_claims_window: old.ethereum_signatures_window,
        target_evm_tx_timeout: old.target_eth_tx_timeout,
        average_block_time: old.average_block_time,
        average_evm_block_time: old.average_ethereum_block_time,
        slash_fraction_signer_set_tx: old.slash_fraction_signer_set_tx,
        slash_fraction_batch: old.slash_fraction_batch,
        slash_fraction_claim: old.slash_fraction_ethereum_signature,
        slash_fraction_conflicting_claim: old.slash_fraction_conflicting_ethereum_signature,
        attestation_retention_window: DEFAULT_ATTESTATION_RETENTION_WINDOW
            .max(old.ethereum_signatures_window.saturating_mul(2)),
        ..ChainParams::default()
    };
    params.validate()?;
    CHAIN_PARAMS.save(storage, chain_id, &params)?;
    Ok(())
}

fn migrate_counters(storage: &mut dyn Storage, chain_id: ChainId) -> StdResult<usize> {
    let mut migrated = 0;
    for (old, new) in [
        (&v1::LAST_OBSERVED_EVENT_NONCE, &LAST_OBSERVED_EVENT_NONCE),
        (&v1::LATEST_SIGNER_SET_TX_NONCE, &LATEST_SIGNER_SET_TX_NONCE),
        (
            &v1::LAST_SLASHED_OUTGOING_TX_BLOCK,
            &LAST_SLASHED_OUTGOING_TX_HEIGHT,
        ),
        (
            &v1::LAST_SLASHED_SIGNER_SET_TX_NONCE,
            &LAST_SLASHED_SIGNER_SET_NONCE,
        ),
        (&v1::LAST_OUTGOING_BATCH_NONCE, &LAST_OUTGOING_BATCH_NONCE),
        (&v1::LAST_SEND_TO_ETHEREUM_ID, &LAST_SEND_TO_EVM_ID),
    ] {
        if let Some(value) = old.may_load(storage)? {
            old.remove(storage);
            new.save(storage, chain_id, &value)?;
            migrated += 1;
        }
    }

    // v1 did not slash missed claims; nothing before the migration is due.
    let last_observed = LAST_OBSERVED_EVENT_NONCE
        .may_load(storage, chain_id)?
        .unwrap_or_default();
    LAST_SLASHED_EVENT_NONCE.save(storage, chain_id, &last_observed)?;

    if let Some(old) = v1::LAST_ETHEREUM_BLOCK_HEIGHT.may_load(storage)? {
        v1::LAST_ETHEREUM_BLOCK_HEIGHT.remove(storage);
        LATEST_EVM_BLOCK_HEIGHT.save(
            storage,
            chain_id,
            &LatestEvmBlockHeight {
                evm_height: old.ethereum_height,
                cosmos_height: old.cosmos_height,
            },
        )?;
        migrated += 1;
    }
    Ok(migrated)
}

fn migrate_event_nonces_by_validator(
    storage: &mut dyn Storage,
    chain_id: ChainId,
) -> StdResult<usize> {
    let entries: Vec<(Addr, u64)> = v1::LAST_EVENT_NONCE_BY_VALIDATOR
        .range(storage, None, None, Order::Ascending)
        .collect::<StdResult<_>>()?;
    for (validator, nonce) in &entries {
        v1::LAST_EVENT_NONCE_BY_VALIDATOR.remove(storage, validator);
        LAST_EVENT_NONCE_BY_VALIDATOR.save(storage, (chain_id, validator), nonce)?;
    }
    Ok(entries.len())
}

fn migrate_attestations(storage: &mut dyn Storage, chain_id: ChainId) -> StdResult<usize> {
    let records: Vec<((u64, Vec<u8>), v1::EthereumEventVoteRecord)> =
        v1::ETHEREUM_EVENT_VOTE_RECORDS
            .range(storage, None, None, Order::Ascending)
            .collect::<StdResult<_>>()?;
    for ((nonce, hash), record) in &records {
        v1::ETHEREUM_EVENT_VOTE_RECORDS.remove(storage, (*nonce, hash.as_slice()));
        let attestation = Attestation {
            event: record.event.clone(),
            votes: record.votes.clone(),
            accepted: record.accepted,
            height: record.height,
            observed_height: record.accepted.then_some(record.height),
            apply_error: None,
        };
        ATTESTATIONS.save(storage, (chain_id, *nonce, hash.as_slice()), &attestation)?;
    }
    Ok(records.len())
}

fn send_to_evm_from_v1(
    old: &v1::SendToEthereum,
    chain_id: ChainId,
) -> Result<SendToEvm, ContractError> {
    let mut erc20_token = old.erc20_token.clone();
    erc20_token.contract = normalize(&erc20_token.contract)?;
    let mut erc20_fee = old.erc20_fee.clone();
    erc20_fee.contract = normalize(&erc20_fee.contract)?;
    Ok(SendToEvm {
        id: old.id,
        sender: old.sender.clone(),
        evm_recipient: normalize(&old.ethereum_recipient)?,
        erc20_token,
        erc20_fee,
        chain_id,
    })
}

fn migrate_send_to_evms(
    storage: &mut dyn Storage,
    chain_id: ChainId,
) -> Result<usize, ContractError> {
    let entries: Vec<(u64, v1::SendToEthereum)> = v1::SEND_TO_ETHEREUMS
        .range(storage, None, None, Order::Ascending)
        .collect::<StdResult<_>>()?;
    for (id, old) in &entries {
        v1::SEND_TO_ETHEREUMS.remove(storage, *id);
        add_to_pool(storage, &send_to_evm_from_v1(old, chain_id)?)?;
    }
    Ok(entries.len())
}

fn signer_set_from_v1(
    old: &v1::SignerSetTx,
    chain_id: ChainId,
) -> Result<SignerSetTx, ContractError> {
    let signers = old
        .signers
        .iter()
        .map(|s| {
            Ok(EvmSigner {
                evm_address: normalize(&s.ethereum_address)?,
                power: s.power,
            })
        })
        .collect::<Result<Vec<_>, ContractError>>()?;
    Ok(SignerSetTx {
        nonce: old.nonce,
        height: old.height,
        signers,
        chain_id,
    })
}

fn outgoing_tx_from_v1(
    old: &v1::OutgoingTx,
    chain_id: ChainId,
) -> Result<OutgoingTx, ContractError> {
    Ok(match old {
        v1::OutgoingTx::SignerSet(set) => OutgoingTx::SignerSet(signer_set_from_v1(set, chain_id)?),
        v1::OutgoingTx::Batch(batch) => OutgoingTx::Batch(BatchTx {
            batch_nonce: batch.batch_nonce,
            timeout: batch.timeout,
            transactions: batch
                .transactions
                .iter()
                .map(|tx| send_to_evm_from_v1(tx, chain_id))
                .collect::<Result<Vec<_>, ContractError>>()?,
            token_contract: normalize(&batch.token_contract)?,
            height: batch.height,
            chain_id,
        }),
        v1::OutgoingTx::ContractCall(call) => OutgoingTx::ContractCall(ContractCallTx {
            invalidation_scope: call.invalidation_scope.clone(),
            invalidation_nonce: call.invalidation_nonce,
            address: normalize(&call.address)?,
            payload: call.payload.clone(),
            timeout: call.timeout,
            tokens: call.tokens.clone(),
            fees: call.fees.clone(),
            height: call.height,
            chain_id,
        }),
    })
}

/// Outgoing artifacts, their signatures and the last observed signer set.
/// Store indexes are recomputed, so signatures follow their artifact to the
/// new index; signatures of artifacts that no longer exist are dropped.
fn migrate_outgoing_txs(
    storage: &mut dyn Storage,
    chain_id: ChainId,
) -> Result<usize, ContractError> {
    let txs: Vec<(Vec<u8>, v1::OutgoingTx)> = v1::OUTGOING_TXS
        .range(storage, None, None, Order::Ascending)
        .collect::<StdResult<_>>()?;

    let mut new_indexes: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    for (old_index, old) in &txs {
        v1::OUTGOING_TXS.remove(storage, old_index.as_slice());
        let tx = outgoing_tx_from_v1(old, chain_id)?;
        let index = tx.store_index();
        OUTGOING_TXS.save(storage, (chain_id, index.as_slice()), &tx)?;
        new_indexes.insert(old_index.clone(), index);
    }

    let signatures: Vec<((Vec<u8>, Addr), Binary)> = v1::ETHEREUM_SIGNATURES
        .range(storage, None, None, Order::Ascending)
        .collect::<StdResult<_>>()?;
    let mut dropped = 0usize;
    for ((old_index, validator), signature) in &signatures {
        v1::ETHEREUM_SIGNATURES.remove(storage, (old_index.as_slice(), validator));
        match new_indexes.get(old_index) {
            Some(index) => {
                EVM_SIGNATURES.save(storage, (chain_id, index.as_slice(), validator), signature)?
            }
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::warn!(dropped, "dropped signatures of missing artifacts");
    }

    if let Some(observed) = v1::LAST_OBSERVED_SIGNER_SET.may_load(storage)? {
        v1::LAST_OBSERVED_SIGNER_SET.remove(storage);
        let observed = signer_set_from_v1(&observed, chain_id)?;
        LAST_OBSERVED_SIGNER_SET.save(storage, chain_id, &observed)?;
    }

    Ok(txs.len() + signatures.len() - dropped)
}

fn migrate_denoms(storage: &mut dyn Storage, chain_id: ChainId) -> Result<usize, ContractError> {
    let denoms: Vec<(String, String)> = v1::DENOM_TO_ERC20
        .range(storage, None, None, Order::Ascending)
        .collect::<StdResult<_>>()?;
    let erc20s: Vec<(String, String)> = v1::ERC20_TO_DENOM
        .range(storage, None, None, Order::Ascending)
        .collect::<StdResult<_>>()?;

    for (denom, erc20) in &denoms {
        v1::DENOM_TO_ERC20.remove(storage, denom);
        DENOM_TO_ERC20.save(storage, (chain_id, denom.as_str()), &normalize(erc20)?)?;
    }
    for (erc20, denom) in &erc20s {
        v1::ERC20_TO_DENOM.remove(storage, erc20);
        ERC20_TO_DENOM.save(storage, (chain_id, normalize(erc20)?.as_str()), denom)?;
    }
    Ok(denoms.len() + erc20s.len())
}
