//! Denom ↔ ERC20 resolution
//!
//! Cosmos-originated assets are registered explicitly in `DENOM_TO_ERC20` /
//! `ERC20_TO_DENOM` and are locked in the module account while bridged.
//! Every other ERC20 is represented by a voucher denom that is minted on
//! deposit and burned on withdrawal:
//!
//! - Ethereum (chain 1): `gravity0x<contract>`
//! - any other chain:   `gravity<chain_id>/0x<contract>`

use cosmwasm_std::{StdResult, Storage};

use common::{ChainId, ETHEREUM_CHAIN_ID};

use crate::address_codec::normalize_evm_address;
use crate::error::ContractError;
use crate::state::{DENOM_TO_ERC20, ERC20_TO_DENOM};

/// Prefix of every voucher denom
pub const VOUCHER_PREFIX: &str = "gravity";

/// Voucher denom of an externally-originated ERC20.
pub fn voucher_denom(chain_id: ChainId, token_contract: &str) -> String {
    if chain_id == ETHEREUM_CHAIN_ID {
        format!("{}{}", VOUCHER_PREFIX, token_contract)
    } else {
        format!("{}{}/{}", VOUCHER_PREFIX, chain_id, token_contract)
    }
}

/// Split a voucher denom into its chain and canonical contract address.
pub fn parse_voucher_denom(denom: &str) -> Option<(ChainId, String)> {
    let rest = denom.strip_prefix(VOUCHER_PREFIX)?;
    let (chain_id, contract) = if rest.starts_with("0x") {
        (ETHEREUM_CHAIN_ID, rest)
    } else {
        let (chain, contract) = rest.split_once('/')?;
        let chain_id: ChainId = chain.parse().ok()?;
        // Ethereum vouchers never carry an explicit chain id
        if chain_id == ETHEREUM_CHAIN_ID {
            return None;
        }
        (chain_id, contract)
    };
    normalize_evm_address(contract)
        .ok()
        .map(|contract| (chain_id, contract))
}

/// Resolve the ERC20 a denom is bridged as on `chain_id`.
///
/// Returns `(cosmos_originated, token_contract)`. A registered cosmos
/// denom wins over voucher parsing.
pub fn denom_to_erc20(
    storage: &dyn Storage,
    chain_id: ChainId,
    denom: &str,
) -> Result<(bool, String), ContractError> {
    if let Some(erc20) = DENOM_TO_ERC20.may_load(storage, (chain_id, denom))? {
        return Ok((true, erc20));
    }
    match parse_voucher_denom(denom) {
        Some((voucher_chain, contract)) if voucher_chain == chain_id => Ok((false, contract)),
        _ => Err(ContractError::UnregisteredDenom {
            chain_id,
            denom: denom.to_string(),
        }),
    }
}

/// Resolve the Cosmos denom of an ERC20 on `chain_id`.
///
/// Returns `(cosmos_originated, denom)`; unknown contracts map to their
/// voucher denom.
pub fn erc20_to_denom(
    storage: &dyn Storage,
    chain_id: ChainId,
    token_contract: &str,
) -> StdResult<(bool, String)> {
    Ok(
        match ERC20_TO_DENOM.may_load(storage, (chain_id, token_contract))? {
            Some(denom) => (true, denom),
            None => (false, voucher_denom(chain_id, token_contract)),
        },
    )
}

/// Register a cosmos-originated denom ↔ ERC20 pair in both directions.
pub fn set_cosmos_originated_denom(
    storage: &mut dyn Storage,
    chain_id: ChainId,
    denom: &str,
    token_contract: &str,
) -> StdResult<()> {
    DENOM_TO_ERC20.save(storage, (chain_id, denom), &token_contract.to_string())?;
    ERC20_TO_DENOM.save(storage, (chain_id, token_contract), &denom.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosmwasm_std::testing::MockStorage;

    const TOKEN: &str = "0x0bc529c00c6401aef6d220be8c6ea1667f6ad93e";

    #[test]
    fn test_voucher_denom_format() {
        assert_eq!(
            voucher_denom(1, TOKEN),
            "gravity0x0bc529c00c6401aef6d220be8c6ea1667f6ad93e"
        );
        assert_eq!(
            voucher_denom(43114, TOKEN),
            "gravity43114/0x0bc529c00c6401aef6d220be8c6ea1667f6ad93e"
        );
    }

    #[test]
    fn test_parse_voucher_denom() {
        assert_eq!(
            parse_voucher_denom(&voucher_denom(43114, TOKEN)),
            Some((43114, TOKEN.to_string()))
        );
        assert_eq!(
            parse_voucher_denom(&voucher_denom(1, TOKEN)),
            Some((1, TOKEN.to_string()))
        );
        assert_eq!(parse_voucher_denom("uatom"), None);
        assert_eq!(
            parse_voucher_denom("gravity1/0x0bc529c00c6401aef6d220be8c6ea1667f6ad93e"),
            None
        );
        assert_eq!(parse_voucher_denom("gravity0x1234"), None);
    }

    #[test]
    fn test_voucher_on_wrong_chain_is_unregistered() {
        let storage = MockStorage::new();
        let err = denom_to_erc20(&storage, 43114, &voucher_denom(1, TOKEN)).unwrap_err();
        assert_eq!(
            err,
            ContractError::UnregisteredDenom {
                chain_id: 43114,
                denom: voucher_denom(1, TOKEN),
            }
        );
    }

    #[test]
    fn test_cosmos_originated_takes_priority() {
        let mut storage = MockStorage::new();
        set_cosmos_originated_denom(&mut storage, 1, "uatom", TOKEN).unwrap();

        assert_eq!(
            denom_to_erc20(&storage, 1, "uatom").unwrap(),
            (true, TOKEN.to_string())
        );
        assert_eq!(
            erc20_to_denom(&storage, 1, TOKEN).unwrap(),
            (true, "uatom".to_string())
        );
        // Same contract on another chain is still a voucher
        assert_eq!(
            erc20_to_denom(&storage, 43114, TOKEN).unwrap(),
            (false, voucher_denom(43114, TOKEN))
        );
    }
}
