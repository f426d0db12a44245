//! EVM chain identifiers.
//!
//! Every piece of bridge state is namespaced by the numeric EVM chain id of
//! the counterparty chain it belongs to.

/// Numeric EVM chain id (EIP-155).
pub type ChainId = u32;

/// Ethereum mainnet. Legacy single-chain state is migrated under this id.
pub const ETHEREUM_CHAIN_ID: ChainId = 1;

/// Avalanche C-Chain.
pub const AVALANCHE_C_CHAIN_ID: ChainId = 43114;
