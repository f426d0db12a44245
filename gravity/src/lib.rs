//! Gravity Bridge Module - Multi-Chain Cosmos <-> EVM Bridging
//!
//! This module moves tokens between a Cosmos chain and any number of EVM
//! chains. Every piece of bridge state is scoped by the EVM chain id it
//! belongs to.
//!
//! # Incoming Flow (Attestation)
//! 1. Orchestrators observe an event on an EVM chain and `SubmitClaim` it
//! 2. Identical claims at one event nonce aggregate into an attestation
//! 3. Once voters hold 2/3 of the bonded power the attestation is accepted
//! 4. Accepted events are applied in nonce order (deposits mint or unlock)
//!
//! # Outgoing Flow (Batching)
//! 1. Users `SendToEvm`, escrowing amount plus bridge fee in the pool
//! 2. Batches take the highest-fee transfers of one token contract
//! 3. Orchestrators sign batches, signer sets and contract calls
//! 4. A relayer submits signed artifacts; a claim reports their execution
//!
//! # Housekeeping
//! `end_block` tallies attestations, prunes old ones, slashes validators
//! that missed their duties, snapshots the signer set and expires batches.

pub mod address_codec;
pub mod contract;
pub mod denom;
pub mod end_block;
pub mod error;
pub mod execute;
pub mod hash;
pub mod keeper;
pub mod migrate;
pub mod msg;
pub mod params;
mod query;
pub mod state;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use crate::error::ContractError;
pub use crate::hash::keccak256;
pub use crate::keeper::{BankKeeper, Keepers, ModuleAccounts, StakingKeeper};
