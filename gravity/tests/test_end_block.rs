//! End-of-block tests: pruning, slashing, automatic batching and expiry.

use cosmwasm_std::{coin, Binary, Decimal, Uint128};

use common::ETHEREUM_CHAIN_ID;
use gravity::denom::voucher_denom;
use gravity::msg::{
    AttestationsResponse, BatchTxsResponse, ChainConfig, ExecuteMsg, InstantiateMsg, NonceResponse,
    QueryMsg, SendToEvmsResponse,
};
use gravity::params::ChainParams;
use gravity::state::{DepositEvent, EvmEvent, OutgoingTxRef};
use gravity::testing::TestEnv;

// ============================================================================
// Test Setup
// ============================================================================

const VALIDATORS: [(&str, &str, &str); 3] = [
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
];

/// Bonds and registers keys after the first duties were created
const LATE_VALIDATOR: (&str, &str, &str) = (
    "cosmos1validator0000000004",
    "cosmos1orchestrator000000004",
    "0x4444444444444444444444444444444444444444",
);

const TOKEN: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
const RECIPIENT: &str = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed";
const USER: &str = "cosmos1user00000000000001";

const WINDOW: u64 = 10;
const RETENTION: u64 = 20;

fn setup() -> TestEnv {
    let mut t = TestEnv::new();
    t.instantiate(InstantiateMsg {
        chains: vec![ChainConfig {
            chain_id: ETHEREUM_CHAIN_ID,
            params: ChainParams {
                signed_signer_set_txs_window: WINDOW,
                signed_batches_window: WINDOW,
                signed_claims_window: WINDOW,
                attestation_retention_window: RETENTION,
                ..ChainParams::default()
            },
        }],
        delegate_keys: vec![],
        erc20_to_denoms: vec![],
    })
    .unwrap();
    for (validator, orchestrator, evm_address) in VALIDATORS {
        t.add_validator(validator, orchestrator, evm_address, 10).unwrap();
    }
    t.bank
        .fund(USER, &[coin(1_000, voucher_denom(ETHEREUM_CHAIN_ID, TOKEN))]);
    t
}

fn deposit(event_nonce: u64, evm_height: u64, amount: u128) -> EvmEvent {
    EvmEvent::Deposit(DepositEvent {
        event_nonce,
        evm_height,
        token_contract: TOKEN.to_string(),
        amount: Uint128::new(amount),
        evm_sender: RECIPIENT.to_string(),
        cosmos_receiver: USER.to_string(),
    })
}

fn claim(t: &mut TestEnv, validator: usize, event: EvmEvent) {
    t.execute(
        VALIDATORS[validator].1,
        ExecuteMsg::SubmitClaim {
            chain_id: ETHEREUM_CHAIN_ID,
            event,
        },
    )
    .unwrap();
}

fn confirm(t: &mut TestEnv, validator: usize, artifact: OutgoingTxRef) {
    let mut signature = vec![0xcd; 65];
    signature[64] = 28;
    t.execute(
        VALIDATORS[validator].1,
        ExecuteMsg::SubmitConfirmation {
            chain_id: ETHEREUM_CHAIN_ID,
            artifact,
            evm_signer: VALIDATORS[validator].2.to_string(),
            signature: Binary::from(signature),
        },
    )
    .unwrap();
}

fn send(t: &mut TestEnv, amount: u128, fee: u128) {
    let denom = voucher_denom(ETHEREUM_CHAIN_ID, TOKEN);
    t.execute(
        USER,
        ExecuteMsg::SendToEvm {
            chain_id: ETHEREUM_CHAIN_ID,
            evm_recipient: RECIPIENT.to_string(),
            amount: coin(amount, &denom),
            bridge_fee: coin(fee, &denom),
        },
    )
    .unwrap();
}

fn batch_nonces(t: &TestEnv) -> Vec<u64> {
    let res: BatchTxsResponse = t
        .query(QueryMsg::BatchTxs {
            chain_id: ETHEREUM_CHAIN_ID,
        })
        .unwrap();
    res.batches.into_iter().map(|b| b.batch_nonce).collect()
}

fn unbatched(t: &TestEnv) -> Vec<u64> {
    let res: SendToEvmsResponse = t
        .query(QueryMsg::UnbatchedSendToEvms {
            chain_id: ETHEREUM_CHAIN_ID,
            sender: None,
            start_after: None,
            limit: None,
        })
        .unwrap();
    res.send_to_evms.into_iter().map(|s| s.id).collect()
}

fn attestation_count(t: &TestEnv) -> usize {
    let res: AttestationsResponse = t
        .query(QueryMsg::Attestations {
            chain_id: ETHEREUM_CHAIN_ID,
            start_after_nonce: None,
            limit: None,
        })
        .unwrap();
    res.attestations.len()
}

fn batch(nonce: u64) -> OutgoingTxRef {
    OutgoingTxRef::Batch {
        token_contract: TOKEN.to_string(),
        batch_nonce: nonce,
    }
}

// ============================================================================
// Pruning
// ============================================================================

#[test]
fn test_attestations_pruned_after_retention_window() {
    let mut t = setup();
    let start = t.env.block.height;

    for validator in 0..3 {
        claim(&mut t, validator, deposit(1, 100, 5));
    }
    // Lone vote at nonce 2 never reaches quorum
    claim(&mut t, 0, deposit(2, 101, 5));
    assert_eq!(attestation_count(&t), 2);

    t.set_height(start + RETENTION - 1);
    t.end_block().unwrap();
    assert_eq!(attestation_count(&t), 2);

    t.set_height(start + RETENTION);
    t.end_block().unwrap();
    assert_eq!(attestation_count(&t), 0);

    // Pruning never rewinds the observed nonce
    let res: NonceResponse = t
        .query(QueryMsg::LastObservedEventNonce {
            chain_id: ETHEREUM_CHAIN_ID,
        })
        .unwrap();
    assert_eq!(res.nonce, 1);
    assert!(t.staking.slashes.is_empty());
}

// ============================================================================
// Slashing
// ============================================================================

#[test]
fn test_missing_signer_set_confirmation_is_slashed() {
    let mut t = setup();
    let created = t.env.block.height;
    t.end_block().unwrap();
    confirm(&mut t, 0, OutgoingTxRef::SignerSet { nonce: 1 });
    confirm(&mut t, 1, OutgoingTxRef::SignerSet { nonce: 1 });

    t.set_height(created + WINDOW - 1);
    t.end_block().unwrap();
    assert!(t.staking.slashes.is_empty());

    t.set_height(created + WINDOW);
    let res = t.end_block().unwrap();
    assert_eq!(t.staking.slashes.len(), 1);
    let slash = &t.staking.slashes[0];
    assert_eq!(slash.validator.as_str(), VALIDATORS[2].0);
    assert_eq!(slash.infraction_height, created);
    assert_eq!(slash.fraction, Decimal::permille(1));
    assert!(t.staking.is_jailed(VALIDATORS[2].0));

    let slash_event = res
        .events
        .iter()
        .find(|e| e.ty == "gravity_slash")
        .unwrap();
    assert!(slash_event
        .attributes
        .iter()
        .any(|a| a.key == "duty" && a.value == "signer_set"));

    // Each signer set is judged once
    t.next_block();
    t.end_block().unwrap();
    assert_eq!(t.staking.slashes.len(), 1);
}

#[test]
fn test_missing_batch_confirmation_is_slashed() {
    let mut t = setup();
    let created = t.env.block.height;
    send(&mut t, 100, 1);
    t.execute(
        USER,
        ExecuteMsg::RequestBatch {
            chain_id: ETHEREUM_CHAIN_ID,
            denom: voucher_denom(ETHEREUM_CHAIN_ID, TOKEN),
        },
    )
    .unwrap();
    t.end_block().unwrap();

    for validator in 0..3 {
        confirm(&mut t, validator, OutgoingTxRef::SignerSet { nonce: 1 });
    }
    confirm(&mut t, 0, batch(1));
    confirm(&mut t, 1, batch(1));

    t.set_height(created + WINDOW);
    let res = t.end_block().unwrap();
    assert_eq!(t.staking.slashes.len(), 1);
    assert_eq!(t.staking.slashes[0].validator.as_str(), VALIDATORS[2].0);
    assert_eq!(t.staking.slashes[0].infraction_height, created);
    assert!(res.events.iter().any(|e| e.ty == "gravity_slash"
        && e.attributes.iter().any(|a| a.key == "duty" && a.value == "batch")));
}

#[test]
fn test_missing_claim_is_slashed() {
    let mut t = setup();
    let observed = t.env.block.height;
    claim(&mut t, 0, deposit(1, 100, 5));
    claim(&mut t, 1, deposit(1, 100, 5));

    t.set_height(observed + WINDOW - 1);
    t.end_block().unwrap();
    // Only the signer set created by this end block exists; its window is still open
    assert!(t.staking.slashes.is_empty());

    t.set_height(observed + WINDOW);
    let res = t.end_block().unwrap();
    assert_eq!(t.staking.slashes.len(), 1);
    assert_eq!(t.staking.slashes[0].validator.as_str(), VALIDATORS[2].0);
    assert_eq!(t.staking.slashes[0].infraction_height, observed);
    assert!(t.staking.is_jailed(VALIDATORS[2].0));
    assert!(res.events.iter().any(|e| e.ty == "gravity_slash"
        && e.attributes.iter().any(|a| a.key == "duty" && a.value == "claim")));
}

#[test]
fn test_unbonded_validator_is_not_slashed() {
    let mut t = setup();
    let observed = t.env.block.height;
    claim(&mut t, 0, deposit(1, 100, 5));
    claim(&mut t, 1, deposit(1, 100, 5));
    t.staking.unbond(VALIDATORS[2].0);

    t.set_height(observed + WINDOW);
    t.end_block().unwrap();
    assert!(t.staking.slashes.is_empty());
}

#[test]
fn test_validator_joining_after_batch_is_not_slashed_for_it() {
    let mut t = setup();
    let created = t.env.block.height;
    send(&mut t, 100, 1);
    t.execute(
        USER,
        ExecuteMsg::RequestBatch {
            chain_id: ETHEREUM_CHAIN_ID,
            denom: voucher_denom(ETHEREUM_CHAIN_ID, TOKEN),
        },
    )
    .unwrap();
    t.end_block().unwrap();
    for validator in 0..3 {
        confirm(&mut t, validator, OutgoingTxRef::SignerSet { nonce: 1 });
    }
    confirm(&mut t, 0, batch(1));
    confirm(&mut t, 1, batch(1));

    t.next_block();
    let (validator, orchestrator, evm_address) = LATE_VALIDATOR;
    t.add_validator(validator, orchestrator, evm_address, 10).unwrap();

    t.set_height(created + WINDOW);
    t.end_block().unwrap();
    assert_eq!(t.staking.slashes.len(), 1);
    assert_eq!(t.staking.slashes[0].validator.as_str(), VALIDATORS[2].0);
    assert!(!t.staking.is_jailed(LATE_VALIDATOR.0));
}

#[test]
fn test_validator_joining_after_observation_is_not_slashed_for_claim() {
    let mut t = setup();
    let observed = t.env.block.height;
    claim(&mut t, 0, deposit(1, 100, 5));
    claim(&mut t, 1, deposit(1, 100, 5));

    t.next_block();
    let (validator, orchestrator, evm_address) = LATE_VALIDATOR;
    t.add_validator(validator, orchestrator, evm_address, 10).unwrap();

    t.set_height(observed + WINDOW);
    t.end_block().unwrap();
    assert_eq!(t.staking.slashes.len(), 1);
    assert_eq!(t.staking.slashes[0].validator.as_str(), VALIDATORS[2].0);
    assert!(!t.staking.is_jailed(LATE_VALIDATOR.0));
}

// ============================================================================
// Batching & Expiry
// ============================================================================

#[test]
fn test_unconfirmed_batch_blocks_automatic_batching() {
    let mut t = setup();
    send(&mut t, 100, 2);
    send(&mut t, 100, 1);
    t.end_block().unwrap();
    assert_eq!(batch_nonces(&t), vec![1]);
    assert!(unbatched(&t).is_empty());

    send(&mut t, 100, 3);
    t.next_block();
    t.end_block().unwrap();
    assert_eq!(batch_nonces(&t), vec![1]);
    assert_eq!(unbatched(&t), vec![3]);

    confirm(&mut t, 0, batch(1));
    confirm(&mut t, 1, batch(1));
    t.next_block();
    let res = t.end_block().unwrap();
    assert_eq!(batch_nonces(&t), vec![1, 2]);
    assert!(unbatched(&t).is_empty());
    assert!(res.events.iter().any(|e| e.ty == "gravity_batch_created"));
}

#[test]
fn test_timed_out_batch_returns_to_pool() {
    let mut t = setup();
    send(&mut t, 100, 1);
    t.execute(
        USER,
        ExecuteMsg::RequestBatch {
            chain_id: ETHEREUM_CHAIN_ID,
            denom: voucher_denom(ETHEREUM_CHAIN_ID, TOKEN),
        },
    )
    .unwrap();
    assert_eq!(batch_nonces(&t), vec![1]);

    // No EVM height observed yet: nothing expires
    t.end_block().unwrap();
    assert_eq!(batch_nonces(&t), vec![1]);

    // Batch timeout is 0 + 12h / 15s = 2880
    t.next_block();
    for validator in 0..3 {
        claim(&mut t, validator, deposit(1, 2_880, 5));
    }
    t.end_block().unwrap();
    assert_eq!(batch_nonces(&t), vec![1]);

    t.next_block();
    for validator in 0..3 {
        claim(&mut t, validator, deposit(2, 2_881, 5));
    }
    t.end_block().unwrap();
    assert!(batch_nonces(&t).is_empty());
    assert_eq!(unbatched(&t), vec![1]);
}
