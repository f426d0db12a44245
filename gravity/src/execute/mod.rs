//! Execute handlers for the Gravity bridge module.
//!
//! This module contains all execute message handlers, organized by category:
//! - `delegate` - Validator delegate key registration
//! - `claims` - Claim ingestion and attestation tally
//! - `apply` - Application of accepted EVM events
//! - `pool` - Send-to-EVM pool, cancellation and batch building
//! - `signer_set` - Signer set snapshots
//! - `confirm` - Validator signatures over outgoing artifacts
//! - `contract_call` - Contract call artifacts requested by other modules

mod apply;
mod claims;
mod confirm;
mod contract_call;
mod delegate;
mod pool;
mod signer_set;

pub use apply::*;
pub use claims::*;
pub use confirm::*;
pub use contract_call::*;
pub use delegate::*;
pub use pool::*;
pub use signer_set::*;
