//! Attestation engine tests: nonce gating, quorum, application of deposits
//! and isolation between chains.

use cosmwasm_std::{Addr, Binary, Uint128};

use common::{AVALANCHE_C_CHAIN_ID, ETHEREUM_CHAIN_ID};
use gravity::denom::voucher_denom;
use gravity::hash::claim_hash;
use gravity::msg::{
    AttestationResponse, AttestationsResponse, ChainConfig, ExecuteMsg, InstantiateMsg,
    NonceResponse, QueryMsg,
};
use gravity::params::ChainParams;
use gravity::state::{Attestation, DepositEvent, EvmEvent, LatestEvmBlockHeight, ATTESTATIONS};
use gravity::testing::TestEnv;
use gravity::ContractError;

// ============================================================================
// Test Setup
// ============================================================================

const VALIDATORS: [(&str, &str, &str); 4] = [
    (
        "cosmos1validator0000000001",
        "cosmos1orchestrator000000001",
        "0x1111111111111111111111111111111111111111",
    ),
    (
        "cosmos1validator0000000002",
        "cosmos1orchestrator000000002",
        "0x2222222222222222222222222222222222222222",
    ),
    (
        "cosmos1validator0000000003",
        "cosmos1orchestrator000000003",
        "0x3333333333333333333333333333333333333333",
    ),
    (
        "cosmos1validator0000000004",
        "cosmos1orchestrator000000004",
        "0x4444444444444444444444444444444444444444",
    ),
];

const TOKEN: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
const EVM_SENDER: &str = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed";
const RECEIVER: &str = "cosmos1receiver00000000001";

fn setup() -> TestEnv {
    let mut t = TestEnv::new();
    t.instantiate(InstantiateMsg {
        chains: vec![
            ChainConfig {
                chain_id: ETHEREUM_CHAIN_ID,
                params: ChainParams::default(),
            },
            ChainConfig {
                chain_id: AVALANCHE_C_CHAIN_ID,
                params: ChainParams::with_gravity_id("gravity-avalanche"),
            },
        ],
        delegate_keys: vec![],
        erc20_to_denoms: vec![],
    })
    .unwrap();
    for (validator, orchestrator, evm_address) in VALIDATORS {
        t.add_validator(validator, orchestrator, evm_address, 10).unwrap();
    }
    t
}

fn deposit(nonce: u64, amount: u128, evm_sender: &str) -> EvmEvent {
    EvmEvent::Deposit(DepositEvent {
        event_nonce: nonce,
        evm_height: 1_000 + nonce,
        token_contract: TOKEN.to_string(),
        amount: Uint128::new(amount),
        evm_sender: evm_sender.to_string(),
        cosmos_receiver: RECEIVER.to_string(),
    })
}

fn claim(
    t: &mut TestEnv,
    validator: usize,
    chain_id: u32,
    event: EvmEvent,
) -> Result<cosmwasm_std::Response, ContractError> {
    t.execute(
        VALIDATORS[validator].1,
        ExecuteMsg::SubmitClaim { chain_id, event },
    )
}

fn last_observed(t: &TestEnv, chain_id: u32) -> u64 {
    let res: NonceResponse = t
        .query(QueryMsg::LastObservedEventNonce { chain_id })
        .unwrap();
    res.nonce
}

fn voucher_balance(t: &TestEnv, chain_id: u32) -> Uint128 {
    t.bank.balance(RECEIVER, &voucher_denom(chain_id, TOKEN))
}

// ============================================================================
// Quorum
// ============================================================================

#[test]
fn test_deposit_applies_exactly_once_at_quorum() {
    let mut t = setup();
    let event = deposit(1, 100, EVM_SENDER);

    claim(&mut t, 0, ETHEREUM_CHAIN_ID, event.clone()).unwrap();
    claim(&mut t, 1, ETHEREUM_CHAIN_ID, event.clone()).unwrap();
    assert_eq!(voucher_balance(&t, ETHEREUM_CHAIN_ID), Uint128::zero());
    assert_eq!(last_observed(&t, ETHEREUM_CHAIN_ID), 0);

    let res = claim(&mut t, 2, ETHEREUM_CHAIN_ID, event.clone()).unwrap();
    assert!(res.events.iter().any(|e| e.ty == "gravity_observation"));
    assert_eq!(voucher_balance(&t, ETHEREUM_CHAIN_ID), Uint128::new(100));
    assert_eq!(last_observed(&t, ETHEREUM_CHAIN_ID), 1);

    // A late vote is recorded but applies nothing
    let res = claim(&mut t, 3, ETHEREUM_CHAIN_ID, event.clone()).unwrap();
    assert!(res.events.is_empty());
    assert_eq!(voucher_balance(&t, ETHEREUM_CHAIN_ID), Uint128::new(100));

    let hash = claim_hash(&event).unwrap();
    let att: Option<AttestationResponse> = t
        .query(QueryMsg::Attestation {
            chain_id: ETHEREUM_CHAIN_ID,
            event_nonce: 1,
            claim_hash: Binary::from(hash.to_vec()),
        })
        .unwrap();
    let att = att.unwrap().attestation;
    assert!(att.accepted);
    assert_eq!(att.votes.len(), 4);
    assert_eq!(att.observed_height, Some(t.env.block.height));
    assert_eq!(att.apply_error, None);
}

#[test]
fn test_latest_evm_height_follows_accepted_events() {
    let mut t = setup();
    for validator in 0..3 {
        claim(&mut t, validator, ETHEREUM_CHAIN_ID, deposit(1, 5, EVM_SENDER)).unwrap();
    }

    let latest: Option<LatestEvmBlockHeight> = t
        .query(QueryMsg::LatestEvmBlockHeight {
            chain_id: ETHEREUM_CHAIN_ID,
        })
        .unwrap();
    assert_eq!(
        latest,
        Some(LatestEvmBlockHeight {
            evm_height: 1_001,
            cosmos_height: t.env.block.height,
        })
    );
}

#[test]
fn test_checksummed_addresses_share_an_attestation() {
    let mut t = setup();
    claim(
        &mut t,
        0,
        ETHEREUM_CHAIN_ID,
        deposit(1, 100, "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"),
    )
    .unwrap();
    claim(&mut t, 1, ETHEREUM_CHAIN_ID, deposit(1, 100, EVM_SENDER)).unwrap();
    claim(&mut t, 2, ETHEREUM_CHAIN_ID, deposit(1, 100, EVM_SENDER)).unwrap();

    assert_eq!(voucher_balance(&t, ETHEREUM_CHAIN_ID), Uint128::new(100));
}

#[test]
fn test_split_votes_block_the_nonce() {
    let mut t = setup();
    for nonce in 1..=4 {
        for validator in 0..4 {
            claim(&mut t, validator, ETHEREUM_CHAIN_ID, deposit(nonce, 1, EVM_SENDER)).unwrap();
        }
    }
    assert_eq!(last_observed(&t, ETHEREUM_CHAIN_ID), 4);
    let before = voucher_balance(&t, ETHEREUM_CHAIN_ID);

    let other_sender = "0x9999999999999999999999999999999999999999";
    claim(&mut t, 0, ETHEREUM_CHAIN_ID, deposit(5, 50, EVM_SENDER)).unwrap();
    claim(&mut t, 1, ETHEREUM_CHAIN_ID, deposit(5, 50, EVM_SENDER)).unwrap();
    claim(&mut t, 2, ETHEREUM_CHAIN_ID, deposit(5, 50, other_sender)).unwrap();
    claim(&mut t, 3, ETHEREUM_CHAIN_ID, deposit(5, 50, other_sender)).unwrap();
    assert_eq!(last_observed(&t, ETHEREUM_CHAIN_ID), 4);

    // Nonce 6 gathers full power but cannot be accepted past the gap
    for validator in 0..4 {
        claim(&mut t, validator, ETHEREUM_CHAIN_ID, deposit(6, 70, EVM_SENDER)).unwrap();
    }
    t.next_block();
    t.end_block().unwrap();

    assert_eq!(last_observed(&t, ETHEREUM_CHAIN_ID), 4);
    assert_eq!(voucher_balance(&t, ETHEREUM_CHAIN_ID), before);

    let all: AttestationsResponse = t
        .query(QueryMsg::Attestations {
            chain_id: ETHEREUM_CHAIN_ID,
            start_after_nonce: Some(4),
            limit: None,
        })
        .unwrap();
    assert_eq!(all.attestations.len(), 3);
    assert!(all.attestations.iter().all(|a| !a.attestation.accepted));
}

#[test]
fn test_attestations_page_after_last_nonce_is_empty() {
    let mut t = setup();
    for validator in 0..3 {
        claim(&mut t, validator, ETHEREUM_CHAIN_ID, deposit(1, 5, EVM_SENDER)).unwrap();
    }

    let res: AttestationsResponse = t
        .query(QueryMsg::Attestations {
            chain_id: ETHEREUM_CHAIN_ID,
            start_after_nonce: Some(u64::MAX),
            limit: None,
        })
        .unwrap();
    assert!(res.attestations.is_empty());
}

#[test]
fn test_power_gained_later_is_picked_up_by_end_block() {
    let mut t = setup();
    t.staking.bond(VALIDATORS[0].0, 40);

    // 40 of 70 is short of quorum
    claim(&mut t, 0, ETHEREUM_CHAIN_ID, deposit(1, 100, EVM_SENDER)).unwrap();
    assert_eq!(last_observed(&t, ETHEREUM_CHAIN_ID), 0);

    // 40 of 60 after another validator unbonds
    t.staking.unbond(VALIDATORS[3].0);
    t.next_block();
    t.end_block().unwrap();
    assert_eq!(last_observed(&t, ETHEREUM_CHAIN_ID), 1);
    assert_eq!(voucher_balance(&t, ETHEREUM_CHAIN_ID), Uint128::new(100));
}

// ============================================================================
// Nonce Gating & Authorization
// ============================================================================

#[test]
fn test_claims_must_be_sequential_per_validator() {
    let mut t = setup();

    let err = claim(&mut t, 0, ETHEREUM_CHAIN_ID, deposit(2, 100, EVM_SENDER)).unwrap_err();
    assert_eq!(err, ContractError::InvalidNonce { expected: 1, got: 2 });

    claim(&mut t, 0, ETHEREUM_CHAIN_ID, deposit(1, 100, EVM_SENDER)).unwrap();
    let err = claim(&mut t, 0, ETHEREUM_CHAIN_ID, deposit(1, 100, EVM_SENDER)).unwrap_err();
    assert_eq!(err, ContractError::InvalidNonce { expected: 2, got: 1 });

    let res: NonceResponse = t
        .query(QueryMsg::LastEventNonceByValidator {
            chain_id: ETHEREUM_CHAIN_ID,
            validator: VALIDATORS[0].0.to_string(),
        })
        .unwrap();
    assert_eq!(res.nonce, 1);
}

#[test]
fn test_second_vote_from_same_validator_rejected() {
    let mut t = setup();
    let event = deposit(1, 100, EVM_SENDER);
    let hash = claim_hash(&event).unwrap();
    // A vote recorded without advancing the validator's nonce
    ATTESTATIONS
        .save(
            &mut t.deps.storage,
            (ETHEREUM_CHAIN_ID, 1, hash.as_slice()),
            &Attestation {
                event: event.clone(),
                votes: vec![Addr::unchecked(VALIDATORS[0].0)],
                accepted: false,
                height: t.env.block.height,
                observed_height: None,
                apply_error: None,
            },
        )
        .unwrap();

    let err = claim(&mut t, 0, ETHEREUM_CHAIN_ID, event).unwrap_err();
    assert_eq!(
        err,
        ContractError::DuplicateVote {
            validator: VALIDATORS[0].0.to_string(),
        }
    );
}

#[test]
fn test_claim_from_unknown_orchestrator_rejected() {
    let mut t = setup();
    let err = t
        .execute(
            "cosmos1stranger0000000001",
            ExecuteMsg::SubmitClaim {
                chain_id: ETHEREUM_CHAIN_ID,
                event: deposit(1, 100, EVM_SENDER),
            },
        )
        .unwrap_err();
    assert!(matches!(err, ContractError::UnknownOrchestrator { .. }));
}

#[test]
fn test_claim_from_unbonded_validator_rejected() {
    let mut t = setup();
    t.staking.unbond(VALIDATORS[0].0);
    let err = claim(&mut t, 0, ETHEREUM_CHAIN_ID, deposit(1, 100, EVM_SENDER)).unwrap_err();
    assert!(matches!(err, ContractError::ValidatorNotBonded { .. }));
}

#[test]
fn test_claim_on_untracked_chain_rejected() {
    let mut t = setup();
    let err = claim(&mut t, 0, 56, deposit(1, 100, EVM_SENDER)).unwrap_err();
    assert_eq!(err, ContractError::ChainNotSupported { chain_id: 56 });
}

// ============================================================================
// Failed Application
// ============================================================================

#[test]
fn test_zero_deposit_is_observed_but_not_applied() {
    let mut t = setup();
    let mut res = None;
    for validator in 0..3 {
        res = Some(claim(&mut t, validator, ETHEREUM_CHAIN_ID, deposit(1, 0, EVM_SENDER)).unwrap());
    }
    let res = res.unwrap();
    let failed = res
        .events
        .iter()
        .find(|e| e.ty == "gravity_observation_failed")
        .expect("failure event");
    assert!(failed.attributes.iter().any(|a| a.key == "apply_error"));

    // The nonce still advances so the chain is not stuck
    assert_eq!(last_observed(&t, ETHEREUM_CHAIN_ID), 1);
    for validator in 0..3 {
        claim(&mut t, validator, ETHEREUM_CHAIN_ID, deposit(2, 10, EVM_SENDER)).unwrap();
    }
    assert_eq!(last_observed(&t, ETHEREUM_CHAIN_ID), 2);
    assert_eq!(voucher_balance(&t, ETHEREUM_CHAIN_ID), Uint128::new(10));
}

// ============================================================================
// Chain Isolation
// ============================================================================

#[test]
fn test_chains_track_nonces_independently() {
    let mut t = setup();
    for validator in 0..3 {
        claim(&mut t, validator, ETHEREUM_CHAIN_ID, deposit(1, 100, EVM_SENDER)).unwrap();
        claim(&mut t, validator, AVALANCHE_C_CHAIN_ID, deposit(1, 7, EVM_SENDER)).unwrap();
    }

    assert_eq!(last_observed(&t, ETHEREUM_CHAIN_ID), 1);
    assert_eq!(last_observed(&t, AVALANCHE_C_CHAIN_ID), 1);
    assert_eq!(voucher_balance(&t, ETHEREUM_CHAIN_ID), Uint128::new(100));
    assert_eq!(voucher_balance(&t, AVALANCHE_C_CHAIN_ID), Uint128::new(7));
    assert_ne!(
        voucher_denom(ETHEREUM_CHAIN_ID, TOKEN),
        voucher_denom(AVALANCHE_C_CHAIN_ID, TOKEN)
    );
}
