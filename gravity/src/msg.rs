//! Message types for the Gravity bridge module
//!
//! This module defines the genesis shape, the messages orchestrators and users
//! submit, and the query interface with its responses.

use cosmwasm_schema::{cw_serde, QueryResponses};
use cosmwasm_std::{Addr, Binary, Coin};

use common::{ChainId, Erc20Token};

use crate::params::ChainParams;
use crate::state::{
    Attestation, BatchTx, ContractCallTx, DelegateKeys, EvmEvent, LatestEvmBlockHeight,
    OutgoingTxRef, SendToEvm, SignerSetTx,
};

// ============================================================================
// Instantiate & Migrate
// ============================================================================

/// Migrate message
#[cw_serde]
pub struct MigrateMsg {}

/// Parameters of one tracked chain at genesis
#[cw_serde]
pub struct ChainConfig {
    pub chain_id: ChainId,
    pub params: ChainParams,
}

/// A cosmos-originated denom already deployed as an ERC20
#[cw_serde]
pub struct Erc20ToDenomEntry {
    pub chain_id: ChainId,
    pub erc20: String,
    pub denom: String,
}

/// Delegate keys registered at genesis
#[cw_serde]
pub struct DelegateKeysEntry {
    pub validator: String,
    pub orchestrator: String,
    pub evm_address: String,
}

/// Instantiate message (genesis state)
#[cw_serde]
pub struct InstantiateMsg {
    /// Tracked chains; at least one is required
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub delegate_keys: Vec<DelegateKeysEntry>,
    #[serde(default)]
    pub erc20_to_denoms: Vec<Erc20ToDenomEntry>,
}

// ============================================================================
// Execute Messages
// ============================================================================

/// Execute messages
#[cw_serde]
pub enum ExecuteMsg {
    // ========================================================================
    // Delegation
    // ========================================================================
    /// Bind an orchestrator account and an EVM signing address to a validator.
    ///
    /// Authorization: the validator operator itself
    SetDelegateKeys {
        orchestrator: String,
        evm_address: String,
    },

    // ========================================================================
    // Orchestrator Duties
    // ========================================================================
    /// Vote that `event` happened on `chain_id`.
    ///
    /// Authorization: registered orchestrator of a bonded validator
    SubmitClaim { chain_id: ChainId, event: EvmEvent },

    /// Provide the validator's EVM signature over an outgoing artifact.
    ///
    /// Authorization: registered orchestrator of a bonded validator
    SubmitConfirmation {
        chain_id: ChainId,
        artifact: OutgoingTxRef,
        /// EVM address that produced `signature`
        evm_signer: String,
        /// 65 bytes: r ++ s ++ v
        signature: Binary,
    },

    // ========================================================================
    // Outgoing Transfers
    // ========================================================================
    /// Queue a transfer to an EVM chain. `amount` and `bridge_fee` share a denom.
    SendToEvm {
        chain_id: ChainId,
        evm_recipient: String,
        amount: Coin,
        bridge_fee: Coin,
    },

    /// Withdraw an unbatched transfer and refund amount plus fee.
    ///
    /// Authorization: original sender
    CancelSendToEvm { chain_id: ChainId, id: u64 },

    /// Build a batch for the ERC20 representing `denom` right away.
    RequestBatch { chain_id: ChainId, denom: String },
}

// ============================================================================
// Query Messages
// ============================================================================

#[cw_serde]
#[derive(QueryResponses)]
pub enum QueryMsg {
    // ========================================================================
    // Parameters & Nonces
    // ========================================================================
    #[returns(ChainParamsResponse)]
    ChainParams { chain_id: ChainId },

    #[returns(TrackedChainsResponse)]
    TrackedChains {},

    #[returns(NonceResponse)]
    LastObservedEventNonce { chain_id: ChainId },

    #[returns(NonceResponse)]
    LastEventNonceByValidator { chain_id: ChainId, validator: String },

    #[returns(Option<LatestEvmBlockHeight>)]
    LatestEvmBlockHeight { chain_id: ChainId },

    // ========================================================================
    // Attestations
    // ========================================================================
    #[returns(Option<AttestationResponse>)]
    Attestation {
        chain_id: ChainId,
        event_nonce: u64,
        /// 32-byte claim hash
        claim_hash: Binary,
    },

    /// Attestations ordered by event nonce
    #[returns(AttestationsResponse)]
    Attestations {
        chain_id: ChainId,
        start_after_nonce: Option<u64>,
        limit: Option<u32>,
    },

    // ========================================================================
    // Pool & Batches
    // ========================================================================
    #[returns(SendToEvmsResponse)]
    UnbatchedSendToEvms {
        chain_id: ChainId,
        sender: Option<String>,
        start_after: Option<u64>,
        limit: Option<u32>,
    },

    /// Total unbatched fees per token contract
    #[returns(BatchFeesResponse)]
    BatchFees { chain_id: ChainId },

    #[returns(Option<BatchTx>)]
    BatchTx {
        chain_id: ChainId,
        token_contract: String,
        batch_nonce: u64,
    },

    #[returns(BatchTxsResponse)]
    BatchTxs { chain_id: ChainId },

    // ========================================================================
    // Signer Sets & Contract Calls
    // ========================================================================
    #[returns(Option<SignerSetTx>)]
    SignerSetTx { chain_id: ChainId, nonce: u64 },

    #[returns(Option<SignerSetTx>)]
    LatestSignerSetTx { chain_id: ChainId },

    #[returns(Option<SignerSetTx>)]
    LastObservedSignerSetTx { chain_id: ChainId },

    #[returns(SignerSetTxsResponse)]
    SignerSetTxs { chain_id: ChainId },

    #[returns(ContractCallTxsResponse)]
    ContractCallTxs { chain_id: ChainId },

    // ========================================================================
    // Confirmations
    // ========================================================================
    #[returns(ConfirmationsResponse)]
    Confirmations {
        chain_id: ChainId,
        artifact: OutgoingTxRef,
    },

    #[returns(IsConfirmedResponse)]
    IsConfirmed {
        chain_id: ChainId,
        artifact: OutgoingTxRef,
    },

    /// Digest orchestrators sign for an artifact
    #[returns(DigestResponse)]
    OutgoingTxDigest {
        chain_id: ChainId,
        artifact: OutgoingTxRef,
    },

    // ========================================================================
    // Denoms & Delegation
    // ========================================================================
    #[returns(DenomToErc20Response)]
    DenomToErc20 { chain_id: ChainId, denom: String },

    #[returns(Erc20ToDenomResponse)]
    Erc20ToDenom { chain_id: ChainId, erc20: String },

    #[returns(Option<DelegateKeys>)]
    DelegateKeysByValidator { validator: String },

    #[returns(Option<DelegateKeys>)]
    DelegateKeysByOrchestrator { orchestrator: String },

    #[returns(Option<DelegateKeys>)]
    DelegateKeysByEvmAddress { evm_address: String },
}

// ============================================================================
// Query Responses
// ============================================================================

#[cw_serde]
pub struct ChainParamsResponse {
    pub chain_id: ChainId,
    pub params: ChainParams,
}

#[cw_serde]
pub struct TrackedChainsResponse {
    pub chain_ids: Vec<ChainId>,
}

#[cw_serde]
pub struct NonceResponse {
    pub nonce: u64,
}

#[cw_serde]
pub struct AttestationResponse {
    pub chain_id: ChainId,
    pub claim_hash: Binary,
    pub attestation: Attestation,
}

#[cw_serde]
pub struct AttestationsResponse {
    pub attestations: Vec<AttestationResponse>,
}

#[cw_serde]
pub struct SendToEvmsResponse {
    pub send_to_evms: Vec<SendToEvm>,
}

#[cw_serde]
pub struct BatchFeesResponse {
    pub fees: Vec<Erc20Token>,
}

#[cw_serde]
pub struct BatchTxsResponse {
    pub batches: Vec<BatchTx>,
}

#[cw_serde]
pub struct SignerSetTxsResponse {
    pub signer_sets: Vec<SignerSetTx>,
}

#[cw_serde]
pub struct ContractCallTxsResponse {
    pub calls: Vec<ContractCallTx>,
}

#[cw_serde]
pub struct ConfirmationEntry {
    pub validator: Addr,
    pub signature: Binary,
}

#[cw_serde]
pub struct ConfirmationsResponse {
    pub confirmations: Vec<ConfirmationEntry>,
}

#[cw_serde]
pub struct IsConfirmedResponse {
    pub confirmed: bool,
    /// Power of confirming signers within the reference signer set
    pub confirmed_power: u64,
    pub total_power: u64,
}

#[cw_serde]
pub struct DigestResponse {
    pub digest: Binary,
}

#[cw_serde]
pub struct DenomToErc20Response {
    pub erc20: String,
    pub cosmos_originated: bool,
}

#[cw_serde]
pub struct Erc20ToDenomResponse {
    pub denom: String,
    pub cosmos_originated: bool,
}
