//! Error types for the Gravity bridge module
//!
//! Every execute handler returns `Result<Response, ContractError>`. An error
//! aborts only the message that raised it; the surrounding ledger discards
//! whatever that message wrote.

use cosmwasm_std::StdError;
use thiserror::Error;

use common::ChainId;

#[derive(Error, Debug, PartialEq)]
pub enum ContractError {
    #[error("{0}")]
    Std(#[from] StdError),

    // ========================================================================
    // Claim / Attestation Errors
    // ========================================================================

    #[error("Invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },

    #[error("Duplicate vote: validator {validator} already voted for this attestation")]
    DuplicateVote { validator: String },

    #[error("Event application failed: {reason}")]
    ApplicationError { reason: String },

    // ========================================================================
    // Pool / Batch Errors
    // ========================================================================

    #[error("Denom {denom} has no ERC20 representation on chain {chain_id}")]
    UnregisteredDenom { chain_id: ChainId, denom: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("No transactions available to batch for {token_contract} on chain {chain_id}")]
    EmptyBatch {
        chain_id: ChainId,
        token_contract: String,
    },

    #[error("Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    // ========================================================================
    // Confirmation Errors
    // ========================================================================

    #[error("Unknown outgoing artifact on chain {chain_id}")]
    UnknownArtifact { chain_id: ChainId },

    #[error("Duplicate confirmation: validator {validator} already signed this artifact")]
    DuplicateConfirmation { validator: String },

    #[error("Invalid signature: {reason}")]
    InvalidSignature { reason: String },

    // ========================================================================
    // Authorization Errors
    // ========================================================================

    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("Unknown orchestrator: {orchestrator} is not a registered delegate")]
    UnknownOrchestrator { orchestrator: String },

    #[error("Validator not bonded: {validator}")]
    ValidatorNotBonded { validator: String },

    #[error("Delegate key already in use: {key}")]
    DelegateKeyInUse { key: String },

    // ========================================================================
    // Configuration Errors
    // ========================================================================

    #[error("Chain not supported: {chain_id}")]
    ChainNotSupported { chain_id: ChainId },

    #[error("Invalid address: {reason}")]
    InvalidAddress { reason: String },

    #[error("Invalid params: {reason}")]
    InvalidParams { reason: String },

    #[error("Migration failed: {reason}")]
    MigrationError { reason: String },
}
