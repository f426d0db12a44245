//! Token and signer types as they appear on the EVM side of the bridge.

use cosmwasm_schema::cw_serde;
use cosmwasm_std::Uint128;

/// An amount of an ERC20 token, identified by its contract address.
///
/// `contract` is always a normalized `0x`-prefixed hex address.
#[cw_serde]
pub struct Erc20Token {
    pub contract: String,
    pub amount: Uint128,
}

impl Erc20Token {
    pub fn new(contract: impl Into<String>, amount: impl Into<Uint128>) -> Self {
        Self {
            contract: contract.into(),
            amount: amount.into(),
        }
    }

    /// Sum of two amounts of the same token.
    pub fn checked_add(&self, other: &Erc20Token) -> Option<Erc20Token> {
        if self.contract != other.contract {
            return None;
        }
        let amount = self.amount.checked_add(other.amount).ok()?;
        Some(Erc20Token {
            contract: self.contract.clone(),
            amount,
        })
    }
}

/// A member of a signer set: EVM address plus power normalized to `u32::MAX`.
#[cw_serde]
pub struct EvmSigner {
    pub evm_address: String,
    pub power: u64,
}
