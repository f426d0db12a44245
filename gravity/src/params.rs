//! Per-chain parameter registry
//!
//! Each tracked EVM chain carries its own [`ChainParams`]. Times are in
//! milliseconds, windows in Cosmos blocks.

use cosmwasm_schema::cw_serde;
use cosmwasm_std::{Decimal, Storage};

use common::ChainId;

use crate::error::ContractError;
use crate::state::CHAIN_PARAMS;

/// Default signing window for signer set, batch and claim duties
pub const DEFAULT_SIGNED_WINDOW: u64 = 10_000;

/// Default time a batch stays executable on the EVM side (12 hours)
pub const DEFAULT_TARGET_EVM_TX_TIMEOUT: u64 = 43_200_000;

/// Default Cosmos block time in ms
pub const DEFAULT_AVERAGE_BLOCK_TIME: u64 = 5_000;

/// Default EVM block time in ms
pub const DEFAULT_AVERAGE_EVM_BLOCK_TIME: u64 = 15_000;

/// Default number of blocks an attestation is kept
pub const DEFAULT_ATTESTATION_RETENTION_WINDOW: u64 = 20_000;

/// Default maximum number of transfers in one batch
pub const DEFAULT_BATCH_MAX_ELEMENTS: u32 = 100;

#[cw_serde]
pub struct ChainParams {
    /// Bridge identifier mixed into every signed digest
    pub gravity_id: String,
    /// Hash of the deployed bridge contract source
    pub contract_source_hash: String,
    pub signed_signer_set_txs_window: u64,
    pub signed_batches_window: u64,
    pub signed_claims_window: u64,
    pub target_evm_tx_timeout: u64,
    pub average_block_time: u64,
    pub average_evm_block_time: u64,
    pub slash_fraction_signer_set_tx: Decimal,
    pub slash_fraction_batch: Decimal,
    pub slash_fraction_claim: Decimal,
    /// Recorded for operators; conflicting claims are not slashed yet
    pub slash_fraction_conflicting_claim: Decimal,
    pub attestation_retention_window: u64,
    pub batch_max_elements: u32,
    /// Fraction of total normalized power that must move before a new signer set is created
    pub signer_set_power_change_threshold: Decimal,
}

impl ChainParams {
    pub fn with_gravity_id(gravity_id: impl Into<String>) -> Self {
        Self {
            gravity_id: gravity_id.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ContractError> {
        if self.gravity_id.trim().is_empty() {
            return Err(invalid("gravity_id cannot be empty"));
        }
        if self.signed_signer_set_txs_window == 0
            || self.signed_batches_window == 0
            || self.signed_claims_window == 0
        {
            return Err(invalid("signing windows must be positive"));
        }
        if self.average_block_time == 0 || self.average_evm_block_time == 0 {
            return Err(invalid("average block times must be positive"));
        }
        if self.target_evm_tx_timeout == 0 {
            return Err(invalid("target_evm_tx_timeout must be positive"));
        }
        // Claim slashing reads accepted attestations, so they must outlive the window.
        if self.signed_claims_window >= self.attestation_retention_window {
            return Err(invalid(
                "signed_claims_window must be less than attestation_retention_window",
            ));
        }
        if self.batch_max_elements == 0 {
            return Err(invalid("batch_max_elements must be positive"));
        }
        for (name, fraction) in [
            ("slash_fraction_signer_set_tx", self.slash_fraction_signer_set_tx),
            ("slash_fraction_batch", self.slash_fraction_batch),
            ("slash_fraction_claim", self.slash_fraction_claim),
            (
                "slash_fraction_conflicting_claim",
                self.slash_fraction_conflicting_claim,
            ),
            (
                "signer_set_power_change_threshold",
                self.signer_set_power_change_threshold,
            ),
        ] {
            if fraction > Decimal::one() {
                return Err(invalid(&format!("{} cannot exceed 1", name)));
            }
        }
        Ok(())
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            gravity_id: "gravity".to_string(),
            contract_source_hash: String::new(),
            signed_signer_set_txs_window: DEFAULT_SIGNED_WINDOW,
            signed_batches_window: DEFAULT_SIGNED_WINDOW,
            signed_claims_window: DEFAULT_SIGNED_WINDOW,
            target_evm_tx_timeout: DEFAULT_TARGET_EVM_TX_TIMEOUT,
            average_block_time: DEFAULT_AVERAGE_BLOCK_TIME,
            average_evm_block_time: DEFAULT_AVERAGE_EVM_BLOCK_TIME,
            slash_fraction_signer_set_tx: Decimal::permille(1),
            slash_fraction_batch: Decimal::permille(1),
            slash_fraction_claim: Decimal::permille(1),
            slash_fraction_conflicting_claim: Decimal::permille(1),
            attestation_retention_window: DEFAULT_ATTESTATION_RETENTION_WINDOW,
            batch_max_elements: DEFAULT_BATCH_MAX_ELEMENTS,
            signer_set_power_change_threshold: Decimal::percent(5),
        }
    }
}

fn invalid(reason: &str) -> ContractError {
    ContractError::InvalidParams {
        reason: reason.to_string(),
    }
}

/// Load the parameters of a tracked chain.
pub fn load_chain_params(
    storage: &dyn Storage,
    chain_id: ChainId,
) -> Result<ChainParams, ContractError> {
    CHAIN_PARAMS
        .may_load(storage, chain_id)?
        .ok_or(ContractError::ChainNotSupported { chain_id })
}
