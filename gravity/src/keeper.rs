//! Collaborator interfaces of the bridge module
//!
//! Balances and validator power are owned by other modules of the host
//! chain. Handlers reach them through the traits below, bundled into a
//! [`Keepers`] context that the host passes to every call.

use std::collections::BTreeMap;

use cosmwasm_schema::cw_serde;
use cosmwasm_std::{Addr, Coin, Decimal, StdResult};

/// Bank module operations used by the bridge.
///
/// Any error returned here is fatal to the message being executed.
pub trait BankKeeper {
    fn mint_coins(&mut self, module: &str, amount: &[Coin]) -> StdResult<()>;

    fn burn_coins(&mut self, module: &str, amount: &[Coin]) -> StdResult<()>;

    fn send_coins_from_account_to_module(
        &mut self,
        sender: &Addr,
        module: &str,
        amount: &[Coin],
    ) -> StdResult<()>;

    fn send_coins_from_module_to_account(
        &mut self,
        module: &str,
        recipient: &Addr,
        amount: &[Coin],
    ) -> StdResult<()>;

    fn send_coins_from_module_to_module(
        &mut self,
        sender_module: &str,
        recipient_module: &str,
        amount: &[Coin],
    ) -> StdResult<()>;

    /// Account that holds the coins of a module account.
    fn module_address(&self, module: &str) -> Addr;

    fn get_all_balances(&self, address: &Addr) -> Vec<Coin>;
}

/// A bonded validator and its consensus power.
#[cw_serde]
pub struct BondedValidator {
    pub operator: Addr,
    pub power: u64,
}

/// Staking module operations used by the bridge.
pub trait StakingKeeper {
    /// Sum of the consensus power of all bonded validators.
    fn total_bonded_power(&self) -> u64;

    /// Consensus power of `validator`, zero unless bonded.
    fn validator_power(&self, validator: &Addr) -> u64;

    /// Bonded validators ordered by power, highest first.
    fn bonded_validators(&self) -> Vec<BondedValidator>;

    fn slash(
        &mut self,
        validator: &Addr,
        infraction_height: u64,
        power: u64,
        fraction: Decimal,
    ) -> StdResult<()>;

    fn jail(&mut self, validator: &Addr) -> StdResult<()>;
}

/// Accounts owned by other modules that may send into the bridge.
///
/// Transfers from a registered account are escrowed module-to-module
/// instead of account-to-module.
#[cw_serde]
#[derive(Default)]
pub struct ModuleAccounts {
    /// Key: account address, Value: module name
    pub sender_modules: BTreeMap<String, String>,
}

impl ModuleAccounts {
    pub fn with_sender_module(
        mut self,
        account: impl Into<String>,
        module: impl Into<String>,
    ) -> Self {
        self.sender_modules.insert(account.into(), module.into());
        self
    }

    pub fn sender_module(&self, account: &Addr) -> Option<&str> {
        self.sender_modules.get(account.as_str()).map(String::as_str)
    }
}

/// Execution context handed to every state-changing entry point.
pub struct Keepers<'a> {
    pub bank: &'a mut dyn BankKeeper,
    pub staking: &'a mut dyn StakingKeeper,
    pub accounts: &'a ModuleAccounts,
}

impl<'a> Keepers<'a> {
    pub fn new(
        bank: &'a mut dyn BankKeeper,
        staking: &'a mut dyn StakingKeeper,
        accounts: &'a ModuleAccounts,
    ) -> Self {
        Self {
            bank,
            staking,
            accounts,
        }
    }
}
