//! In-memory keepers and a test harness.
//!
//! [`TestEnv`] plays the host chain: it owns storage, bank and staking
//! state, drives the entry points, and discards everything a failed call
//! wrote, the way the host discards a failed message.

use std::collections::{BTreeMap, BTreeSet};

use cosmwasm_std::testing::{
    mock_dependencies, mock_env, mock_info, MockApi, MockQuerier, MockStorage,
};
use cosmwasm_std::{
    from_json, Addr, BankMsg, Coin, CosmosMsg, Decimal, Env, Order, OwnedDeps, Record, Response,
    StdError, StdResult, Storage, Uint128,
};
use cw_multi_test::{App, BankSudo, Executor, SudoMsg};
use serde::de::DeserializeOwned;

use crate::contract;
use crate::error::ContractError;
use crate::keeper::{BankKeeper, BondedValidator, Keepers, ModuleAccounts, StakingKeeper};
use crate::msg::{ExecuteMsg, InstantiateMsg, QueryMsg};

// ============================================================================
// Bank
// ============================================================================

/// Bank keeper backed by the cw-multi-test bank module. Module accounts
/// live at `module/{name}`.
#[derive(Default)]
pub struct MockBank {
    app: App,
}

pub fn module_address(module: &str) -> String {
    format!("module/{}", module)
}

/// The bank module rejects zero-amount coins and empty transfers.
fn non_zero(amount: &[Coin]) -> Vec<Coin> {
    amount
        .iter()
        .filter(|coin| !coin.amount.is_zero())
        .cloned()
        .collect()
}

impl MockBank {
    /// Credit `address` with freshly minted coins.
    pub fn fund(&mut self, address: &str, coins: &[Coin]) {
        self.mint(address, coins).expect("mint into test account");
    }

    pub fn balance(&self, address: &str, denom: &str) -> Uint128 {
        self.app
            .wrap()
            .query_balance(address, denom)
            .map(|coin| coin.amount)
            .unwrap_or_default()
    }

    pub fn module_balance(&self, module: &str, denom: &str) -> Uint128 {
        self.balance(&module_address(module), denom)
    }

    pub fn supply(&self, denom: &str) -> Uint128 {
        self.app
            .wrap()
            .query_supply(denom)
            .map(|coin| coin.amount)
            .unwrap_or_default()
    }

    fn mint(&mut self, address: &str, amount: &[Coin]) -> StdResult<()> {
        let amount = non_zero(amount);
        if amount.is_empty() {
            return Ok(());
        }
        self.app
            .sudo(SudoMsg::Bank(BankSudo::Mint {
                to_address: address.to_string(),
                amount,
            }))
            .map(|_| ())
            .map_err(|err| StdError::generic_err(err.to_string()))
    }

    fn dispatch(&mut self, sender: &str, msg: BankMsg) -> StdResult<()> {
        self.app
            .execute(Addr::unchecked(sender), CosmosMsg::Bank(msg))
            .map(|_| ())
            .map_err(|err| StdError::generic_err(format!("{}: {}", sender, err)))
    }

    fn transfer(&mut self, from: &str, to: &str, amount: &[Coin]) -> StdResult<()> {
        let amount = non_zero(amount);
        if amount.is_empty() {
            return Ok(());
        }
        self.dispatch(
            from,
            BankMsg::Send {
                to_address: to.to_string(),
                amount,
            },
        )
    }

    fn snapshot(&self) -> Vec<Record> {
        self.app
            .storage()
            .range(None, None, Order::Ascending)
            .collect()
    }

    fn restore(&mut self, records: Vec<Record>) {
        restore_storage(self.app.storage_mut(), records);
    }
}

impl BankKeeper for MockBank {
    fn mint_coins(&mut self, module: &str, amount: &[Coin]) -> StdResult<()> {
        self.mint(&module_address(module), amount)
    }

    fn burn_coins(&mut self, module: &str, amount: &[Coin]) -> StdResult<()> {
        let amount = non_zero(amount);
        if amount.is_empty() {
            return Ok(());
        }
        self.dispatch(&module_address(module), BankMsg::Burn { amount })
    }

    fn send_coins_from_account_to_module(
        &mut self,
        sender: &Addr,
        module: &str,
        amount: &[Coin],
    ) -> StdResult<()> {
        self.transfer(sender.as_str(), &module_address(module), amount)
    }

    fn send_coins_from_module_to_account(
        &mut self,
        module: &str,
        recipient: &Addr,
        amount: &[Coin],
    ) -> StdResult<()> {
        self.transfer(&module_address(module), recipient.as_str(), amount)
    }

    fn send_coins_from_module_to_module(
        &mut self,
        sender_module: &str,
        recipient_module: &str,
        amount: &[Coin],
    ) -> StdResult<()> {
        self.transfer(
            &module_address(sender_module),
            &module_address(recipient_module),
            amount,
        )
    }

    fn module_address(&self, module: &str) -> Addr {
        Addr::unchecked(module_address(module))
    }

    fn get_all_balances(&self, address: &Addr) -> Vec<Coin> {
        self.app
            .wrap()
            .query_all_balances(address)
            .unwrap_or_default()
    }
}

// ============================================================================
// Staking
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct Slash {
    pub validator: Addr,
    pub infraction_height: u64,
    pub power: u64,
    pub fraction: Decimal,
}

/// Validator powers. Jailed validators keep their entry but have no power.
#[derive(Clone, Debug, Default)]
pub struct MockStaking {
    powers: BTreeMap<String, u64>,
    jailed: BTreeSet<String>,
    pub slashes: Vec<Slash>,
}

impl MockStaking {
    pub fn bond(&mut self, validator: &str, power: u64) {
        self.powers.insert(validator.to_string(), power);
        self.jailed.remove(validator);
    }

    pub fn unbond(&mut self, validator: &str) {
        self.powers.remove(validator);
    }

    pub fn is_jailed(&self, validator: &str) -> bool {
        self.jailed.contains(validator)
    }
}

impl StakingKeeper for MockStaking {
    fn total_bonded_power(&self) -> u64 {
        self.bonded_validators().iter().map(|v| v.power).sum()
    }

    fn validator_power(&self, validator: &Addr) -> u64 {
        if self.jailed.contains(validator.as_str()) {
            return 0;
        }
        self.powers.get(validator.as_str()).copied().unwrap_or_default()
    }

    fn bonded_validators(&self) -> Vec<BondedValidator> {
        let mut validators: Vec<BondedValidator> = self
            .powers
            .iter()
            .filter(|(operator, power)| **power > 0 && !self.jailed.contains(*operator))
            .map(|(operator, power)| BondedValidator {
                operator: Addr::unchecked(operator),
                power: *power,
            })
            .collect();
        validators.sort_by(|a, b| b.power.cmp(&a.power).then_with(|| a.operator.cmp(&b.operator)));
        validators
    }

    fn slash(
        &mut self,
        validator: &Addr,
        infraction_height: u64,
        power: u64,
        fraction: Decimal,
    ) -> StdResult<()> {
        let cut = (Uint128::from(power) * fraction).u128() as u64;
        if let Some(current) = self.powers.get_mut(validator.as_str()) {
            *current = current.saturating_sub(cut);
        }
        self.slashes.push(Slash {
            validator: validator.clone(),
            infraction_height,
            power,
            fraction,
        });
        Ok(())
    }

    fn jail(&mut self, validator: &Addr) -> StdResult<()> {
        self.jailed.insert(validator.to_string());
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct TestEnv {
    pub deps: OwnedDeps<MockStorage, MockApi, MockQuerier>,
    pub env: Env,
    pub bank: MockBank,
    pub staking: MockStaking,
    pub accounts: ModuleAccounts,
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            deps: mock_dependencies(),
            env: mock_env(),
            bank: MockBank::default(),
            staking: MockStaking::default(),
            accounts: ModuleAccounts::default(),
        }
    }

    pub fn instantiate(&mut self, msg: InstantiateMsg) -> Result<Response, ContractError> {
        contract::instantiate(
            self.deps.as_mut(),
            self.env.clone(),
            mock_info("cosmos1genesis000000000001", &[]),
            msg,
        )
    }

    /// Run one message. On error, storage and keeper state are restored.
    pub fn execute(&mut self, sender: &str, msg: ExecuteMsg) -> Result<Response, ContractError> {
        let checkpoint = self.checkpoint();
        let mut keepers = Keepers::new(&mut self.bank, &mut self.staking, &self.accounts);
        let result = contract::execute(
            self.deps.as_mut(),
            self.env.clone(),
            mock_info(sender, &[]),
            &mut keepers,
            msg,
        );
        if result.is_err() {
            self.restore(checkpoint);
        }
        result
    }

    /// Run end-of-block processing at the current height.
    pub fn end_block(&mut self) -> Result<Response, ContractError> {
        let checkpoint = self.checkpoint();
        let mut keepers = Keepers::new(&mut self.bank, &mut self.staking, &self.accounts);
        let result = contract::end_block(self.deps.as_mut(), self.env.clone(), &mut keepers);
        if result.is_err() {
            self.restore(checkpoint);
        }
        result
    }

    pub fn query<T: DeserializeOwned>(&self, msg: QueryMsg) -> StdResult<T> {
        from_json(contract::query(self.deps.as_ref(), self.env.clone(), msg)?)
    }

    pub fn next_block(&mut self) {
        self.set_height(self.env.block.height + 1);
    }

    pub fn set_height(&mut self, height: u64) {
        let blocks = height.saturating_sub(self.env.block.height);
        self.env.block.height = height;
        self.env.block.time = self.env.block.time.plus_seconds(blocks * 5);
    }

    /// Bond a validator and register its delegate keys.
    pub fn add_validator(
        &mut self,
        validator: &str,
        orchestrator: &str,
        evm_address: &str,
        power: u64,
    ) -> Result<Response, ContractError> {
        self.staking.bond(validator, power);
        self.execute(
            validator,
            ExecuteMsg::SetDelegateKeys {
                orchestrator: orchestrator.to_string(),
                evm_address: evm_address.to_string(),
            },
        )
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            storage: self
                .deps
                .storage
                .range(None, None, Order::Ascending)
                .collect(),
            bank: self.bank.snapshot(),
            staking: self.staking.clone(),
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        restore_storage(&mut self.deps.storage, checkpoint.storage);
        self.bank.restore(checkpoint.bank);
        self.staking = checkpoint.staking;
    }
}

/// State a failed call is rolled back to.
struct Checkpoint {
    storage: Vec<Record>,
    bank: Vec<Record>,
    staking: MockStaking,
}

/// Replace the whole content of `storage` with `records`.
fn restore_storage(storage: &mut dyn Storage, records: Vec<Record>) {
    let keys: Vec<Vec<u8>> = storage
        .range(None, None, Order::Ascending)
        .map(|(key, _)| key)
        .collect();
    for key in keys {
        storage.remove(&key);
    }
    for (key, value) in records {
        storage.set(&key, &value);
    }
}
