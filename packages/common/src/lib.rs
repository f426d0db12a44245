//! Common - Shared Types for the Gravity Bridge Module
//!
//! Wire types shared between the on-chain module and the off-chain
//! orchestrators that observe EVM chains and relay outgoing artifacts.

pub mod chain;
pub mod token;

pub use chain::{ChainId, AVALANCHE_C_CHAIN_ID, ETHEREUM_CHAIN_ID};
pub use token::{Erc20Token, EvmSigner};
