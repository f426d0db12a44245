//! EVM address handling
//!
//! Addresses are stored in canonical form: `0x` followed by 40 lowercase hex
//! characters. Input may be all lowercase, all uppercase, or mixed case; a
//! mixed-case address must carry a valid EIP-55 checksum.

use crate::error::ContractError;
use crate::hash::keccak256;

/// Length of a raw EVM address
pub const EVM_ADDRESS_LEN: usize = 20;

/// Parse an EVM address string into its raw 20 bytes.
pub fn parse_evm_address(addr: &str) -> Result<[u8; EVM_ADDRESS_LEN], ContractError> {
    let body = addr
        .strip_prefix("0x")
        .or_else(|| addr.strip_prefix("0X"))
        .ok_or_else(|| invalid(addr, "missing 0x prefix"))?;

    if body.len() != EVM_ADDRESS_LEN * 2 {
        return Err(invalid(addr, "expected 40 hex characters"));
    }

    let decoded = hex::decode(body).map_err(|_| invalid(addr, "not hex"))?;
    let mut bytes = [0u8; EVM_ADDRESS_LEN];
    bytes.copy_from_slice(&decoded);

    let has_lower = body.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = body.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper && to_checksum_address(&bytes)[2..] != *body {
        return Err(invalid(addr, "bad EIP-55 checksum"));
    }

    Ok(bytes)
}

/// Canonical storage form of an EVM address.
pub fn normalize_evm_address(addr: &str) -> Result<String, ContractError> {
    parse_evm_address(addr).map(|bytes| format!("0x{}", hex::encode(bytes)))
}

/// EIP-55 mixed-case checksum encoding.
pub fn to_checksum_address(bytes: &[u8; EVM_ADDRESS_LEN]) -> String {
    let lower = hex::encode(bytes);
    let hash = keccak256(lower.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn invalid(addr: &str, reason: &str) -> ContractError {
    ContractError::InvalidAddress {
        reason: format!("{}: {}", addr, reason),
    }
}
