//! Hash computation for claims and outgoing artifacts
//!
//! # Claim hash
//! ```text
//! keccak256("gravity/" ++ event type ++ "/v1" ++ json(event))
//! ```
//! The submitting validator is not part of the preimage, so identical
//! observations by different validators land on the same attestation. The
//! type tag versions the encoding per variant.
//!
//! # Outgoing digest
//! ```text
//! keccak256(gravity_id ++ "/" ++ kind ++ "/checkpoint" ++ chain_id (4 bytes BE) ++ json(tx))
//! ```
//! Orchestrators sign this digest; it binds the artifact to one bridge
//! deployment on one chain.

use cosmwasm_std::{to_json_vec, StdResult};
use tiny_keccak::{Hasher, Keccak};

use crate::state::{EvmEvent, OutgoingTx};

/// Version tag appended to every claim domain
pub const CLAIM_HASH_VERSION: &str = "v1";

/// Compute keccak256 hash of arbitrary data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Domain separator of a claim type
pub fn claim_domain(event: &EvmEvent) -> String {
    format!("gravity/{}/{}", event.type_name(), CLAIM_HASH_VERSION)
}

/// Deterministic identity of an observed event
pub fn claim_hash(event: &EvmEvent) -> StdResult<[u8; 32]> {
    let mut hasher = Keccak::v256();
    hasher.update(claim_domain(event).as_bytes());
    hasher.update(&to_json_vec(event)?);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    Ok(output)
}

/// Digest validators sign over an outgoing artifact
pub fn outgoing_tx_digest(gravity_id: &str, tx: &OutgoingTx) -> StdResult<[u8; 32]> {
    let kind = tx.reference().kind();
    let mut hasher = Keccak::v256();
    hasher.update(gravity_id.as_bytes());
    hasher.update(b"/");
    hasher.update(kind.as_bytes());
    hasher.update(b"/checkpoint");
    hasher.update(&tx.chain_id().to_be_bytes());
    hasher.update(&to_json_vec(tx)?);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    Ok(output)
}

/// Format a 32-byte hash as 0x-prefixed hex
pub fn bytes32_to_hex(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}
