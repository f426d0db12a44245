//! Signer-set tracker.
//!
//! A signer set is the bonded validator set as the EVM bridge contract sees
//! it: registered EVM addresses with power normalized so the set sums to
//! roughly `u32::MAX`.

use std::collections::BTreeMap;

use cosmwasm_std::{Decimal, Env, Event, StdResult, Storage, Uint128};

use common::{ChainId, EvmSigner};

use crate::error::ContractError;
use crate::keeper::StakingKeeper;
use crate::params::ChainParams;
use crate::state::{
    increment_counter, OutgoingTx, OutgoingTxRef, SignerSetTx, DELEGATE_KEYS,
    LAST_OBSERVED_SIGNER_SET, LATEST_SIGNER_SET_TX_NONCE, OUTGOING_TXS,
};

/// Normalized total power of a signer set
pub const NORMALIZED_POWER: u64 = u32::MAX as u64;

/// Current bonded validators that registered an EVM address, normalized and
/// ordered by power descending then address ascending.
pub fn current_signers(
    storage: &dyn Storage,
    staking: &dyn StakingKeeper,
) -> StdResult<Vec<EvmSigner>> {
    let mut raw = Vec::new();
    let mut total: u128 = 0;
    for validator in staking.bonded_validators() {
        if validator.power == 0 {
            continue;
        }
        if let Some(keys) = DELEGATE_KEYS.may_load(storage, &validator.operator)? {
            total += validator.power as u128;
            raw.push((keys.evm_address, validator.power));
        }
    }
    if total == 0 {
        return Ok(vec![]);
    }

    let mut signers: Vec<EvmSigner> = raw
        .into_iter()
        .map(|(evm_address, power)| EvmSigner {
            evm_address,
            power: Uint128::from(power)
                .multiply_ratio(NORMALIZED_POWER, total)
                .u128() as u64,
        })
        .collect();
    signers.sort_by(|a, b| {
        b.power
            .cmp(&a.power)
            .then_with(|| a.evm_address.cmp(&b.evm_address))
    });
    Ok(signers)
}

/// Sum of absolute per-address power differences as a fraction of the
/// normalized total.
pub fn power_diff(current: &[EvmSigner], previous: &[EvmSigner]) -> Decimal {
    let mut powers: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
    for signer in current {
        powers.entry(signer.evm_address.as_str()).or_default().0 += signer.power;
    }
    for signer in previous {
        powers.entry(signer.evm_address.as_str()).or_default().1 += signer.power;
    }
    let diff: u128 = powers
        .values()
        .map(|(now, before)| now.abs_diff(*before) as u128)
        .sum();
    Decimal::from_ratio(diff, NORMALIZED_POWER)
}

fn same_members(current: &[EvmSigner], previous: &[EvmSigner]) -> bool {
    let mut a: Vec<&str> = current.iter().map(|s| s.evm_address.as_str()).collect();
    let mut b: Vec<&str> = previous.iter().map(|s| s.evm_address.as_str()).collect();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

pub fn load_signer_set_tx(
    storage: &dyn Storage,
    chain_id: ChainId,
    nonce: u64,
) -> StdResult<Option<SignerSetTx>> {
    let index = OutgoingTxRef::SignerSet { nonce }.store_index();
    Ok(
        match OUTGOING_TXS.may_load(storage, (chain_id, index.as_slice()))? {
            Some(OutgoingTx::SignerSet(tx)) => Some(tx),
            _ => None,
        },
    )
}

/// Latest signer set created for the chain, falling back to the last observed one.
pub fn latest_signer_set(
    storage: &dyn Storage,
    chain_id: ChainId,
) -> StdResult<Option<SignerSetTx>> {
    if let Some(nonce) = LATEST_SIGNER_SET_TX_NONCE.may_load(storage, chain_id)? {
        if let Some(tx) = load_signer_set_tx(storage, chain_id, nonce)? {
            return Ok(Some(tx));
        }
    }
    LAST_OBSERVED_SIGNER_SET.may_load(storage, chain_id)
}

/// Create a new signer set when none exists, when membership changed, or
/// when power moved by more than the chain's threshold.
pub fn maybe_update_signer_set(
    storage: &mut dyn Storage,
    env: &Env,
    staking: &dyn StakingKeeper,
    params: &ChainParams,
    chain_id: ChainId,
) -> Result<Option<SignerSetTx>, ContractError> {
    let signers = current_signers(storage, staking)?;
    if signers.is_empty() {
        return Ok(None);
    }

    let needs_update = match latest_signer_set(storage, chain_id)? {
        None => true,
        Some(latest) => {
            !same_members(&signers, &latest.signers)
                || power_diff(&signers, &latest.signers) > params.signer_set_power_change_threshold
        }
    };
    if !needs_update {
        return Ok(None);
    }

    let tx = SignerSetTx {
        nonce: increment_counter(storage, &LATEST_SIGNER_SET_TX_NONCE, chain_id)?,
        height: env.block.height,
        signers,
        chain_id,
    };
    let outgoing = OutgoingTx::SignerSet(tx.clone());
    OUTGOING_TXS.save(
        storage,
        (chain_id, outgoing.store_index().as_slice()),
        &outgoing,
    )?;
    Ok(Some(tx))
}

pub fn signer_set_created_event(tx: &SignerSetTx) -> Event {
    Event::new("gravity_signer_set_created")
        .add_attribute("chain_id", tx.chain_id.to_string())
        .add_attribute("nonce", tx.nonce.to_string())
        .add_attribute("signers", tx.signers.len().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(address: &str, power: u64) -> EvmSigner {
        EvmSigner {
            evm_address: address.to_string(),
            power,
        }
    }

    #[test]
    fn test_power_diff_identical_sets() {
        let set = vec![signer("0xa", 100), signer("0xb", 200)];
        assert_eq!(power_diff(&set, &set), Decimal::zero());
    }

    #[test]
    fn test_power_diff_counts_both_sides() {
        let quarter = NORMALIZED_POWER / 4;
        let before = vec![signer("0xa", 2 * quarter), signer("0xb", 2 * quarter)];
        let after = vec![signer("0xa", 3 * quarter), signer("0xb", quarter)];
        assert_eq!(power_diff(&after, &before), Decimal::from_ratio(2 * quarter, NORMALIZED_POWER));
    }

    #[test]
    fn test_membership_ignores_order() {
        let a = vec![signer("0xa", 1), signer("0xb", 2)];
        let b = vec![signer("0xb", 2), signer("0xa", 1)];
        assert!(same_members(&a, &b));
        assert!(!same_members(&a, &a[..1]));
    }
}
