//! Delegate keys, signer set snapshots and confirmation tests.

use cosmwasm_std::Binary;

use common::ETHEREUM_CHAIN_ID;
use gravity::msg::{
    ChainConfig, ConfirmationsResponse, DigestResponse, ExecuteMsg, InstantiateMsg,
    IsConfirmedResponse, QueryMsg, SignerSetTxsResponse,
};
use gravity::params::ChainParams;
use gravity::state::{DelegateKeys, EvmEvent, OutgoingTxRef, SignerSetTx, SignerSetUpdatedEvent};
use gravity::testing::TestEnv;
use gravity::ContractError;

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

fn setup() -> TestEnv {
    let mut t = TestEnv::new();
    t.instantiate(InstantiateMsg {
        chains: vec![ChainConfig {
            chain_id: ETHEREUM_CHAIN_ID,
            params: ChainParams::default(),
        }],
        delegate_keys: vec![],
        erc20_to_denoms: vec![],
    })
    .unwrap();
    for (validator, orchestrator, evm_address) in VALIDATORS {
        t.add_validator(validator, orchestrator, evm_address, 10).unwrap();
    }
    t
}

fn signature(v: u8) -> Binary {
    let mut bytes = vec![0xab; 65];
    bytes[64] = v;
    Binary::from(bytes)
}

fn confirm(
    t: &mut TestEnv,
    validator: usize,
    artifact: OutgoingTxRef,
) -> Result<cosmwasm_std::Response, ContractError> {
    t.execute(
        VALIDATORS[validator].1,
        ExecuteMsg::SubmitConfirmation {
            chain_id: ETHEREUM_CHAIN_ID,
            artifact,
            evm_signer: VALIDATORS[validator].2.to_string(),
            signature: signature(27),
        },
    )
}

fn signer_sets(t: &TestEnv) -> Vec<SignerSetTx> {
    let res: SignerSetTxsResponse = t
        .query(QueryMsg::SignerSetTxs {
            chain_id: ETHEREUM_CHAIN_ID,
        })
        .unwrap();
    res.signer_sets
}

fn is_confirmed(t: &TestEnv, artifact: OutgoingTxRef) -> IsConfirmedResponse {
    t.query(QueryMsg::IsConfirmed {
        chain_id: ETHEREUM_CHAIN_ID,
        artifact,
    })
    .unwrap()
}

// ============================================================================
// Delegate Keys
// ============================================================================

#[test]
fn test_delegate_keys_resolve_in_every_direction() {
    let t = setup();
    let expected = DelegateKeys {
        validator: cosmwasm_std::Addr::unchecked(VALIDATORS[0].0),
        orchestrator: cosmwasm_std::Addr::unchecked(VALIDATORS[0].1),
        evm_address: VALIDATORS[0].2.to_string(),
    };

    let by_validator: Option<DelegateKeys> = t
        .query(QueryMsg::DelegateKeysByValidator {
            validator: VALIDATORS[0].0.to_string(),
        })
        .unwrap();
    let by_orchestrator: Option<DelegateKeys> = t
        .query(QueryMsg::DelegateKeysByOrchestrator {
            orchestrator: VALIDATORS[0].1.to_string(),
        })
        .unwrap();
    let by_evm: Option<DelegateKeys> = t
        .query(QueryMsg::DelegateKeysByEvmAddress {
            evm_address: VALIDATORS[0].2.to_string(),
        })
        .unwrap();

    assert_eq!(by_validator, Some(expected.clone()));
    assert_eq!(by_orchestrator, Some(expected.clone()));
    assert_eq!(by_evm, Some(expected));
}

#[test]
fn test_delegate_keys_are_unique() {
    let mut t = setup();
    t.staking.bond("cosmos1validator0000000009", 10);

    let err = t
        .execute(
            "cosmos1validator0000000009",
            ExecuteMsg::SetDelegateKeys {
                orchestrator: VALIDATORS[0].1.to_string(),
                evm_address: "0x9999999999999999999999999999999999999999".to_string(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, ContractError::DelegateKeyInUse { .. }));

    let err = t
        .execute(
            "cosmos1validator0000000009",
            ExecuteMsg::SetDelegateKeys {
                orchestrator: "cosmos1orchestrator000000009".to_string(),
                evm_address: VALIDATORS[1].2.to_string(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, ContractError::DelegateKeyInUse { .. }));
}

#[test]
fn test_rotating_keys_releases_old_ones() {
    let mut t = setup();
    t.execute(
        VALIDATORS[0].0,
        ExecuteMsg::SetDelegateKeys {
            orchestrator: "cosmos1orchestrator000000099".to_string(),
            evm_address: "0x9999999999999999999999999999999999999999".to_string(),
        },
    )
    .unwrap();

    let old: Option<DelegateKeys> = t
        .query(QueryMsg::DelegateKeysByOrchestrator {
            orchestrator: VALIDATORS[0].1.to_string(),
        })
        .unwrap();
    assert_eq!(old, None);

    // The released orchestrator can be taken by another validator
    t.staking.bond("cosmos1validator0000000009", 10);
    t.execute(
        "cosmos1validator0000000009",
        ExecuteMsg::SetDelegateKeys {
            orchestrator: VALIDATORS[0].1.to_string(),
            evm_address: VALIDATORS[0].2.to_string(),
        },
    )
    .unwrap();
}

#[test]
fn test_unbonded_validator_cannot_set_keys() {
    let mut t = setup();
    let err = t
        .execute(
            "cosmos1validator0000000009",
            ExecuteMsg::SetDelegateKeys {
                orchestrator: "cosmos1orchestrator000000009".to_string(),
                evm_address: "0x9999999999999999999999999999999999999999".to_string(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, ContractError::ValidatorNotBonded { .. }));
}

#[test]
fn test_invalid_evm_address_rejected() {
    let mut t = setup();
    let err = t
        .execute(
            VALIDATORS[0].0,
            ExecuteMsg::SetDelegateKeys {
                orchestrator: VALIDATORS[0].1.to_string(),
                evm_address: "0x1234".to_string(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, ContractError::InvalidAddress { .. }));
}

// ============================================================================
// Signer Sets
// ============================================================================

#[test]
fn test_first_end_block_snapshots_the_validator_set() {
    let mut t = setup();
    let res = t.end_block().unwrap();
    assert!(res.events.iter().any(|e| e.ty == "gravity_signer_set_created"));

    let sets = signer_sets(&t);
    assert_eq!(sets.len(), 1);
    let set = &sets[0];
    assert_eq!(set.nonce, 1);
    assert_eq!(set.height, t.env.block.height);
    assert_eq!(set.signers.len(), 3);
    assert!(set.signers.iter().all(|s| s.power == u32::MAX as u64 / 3));
    // Equal power orders by address
    assert_eq!(set.signers[0].evm_address, VALIDATORS[0].2);
}

#[test]
fn test_signer_set_follows_power_changes() {
    let mut t = setup();
    t.end_block().unwrap();

    // Unchanged set: no new snapshot
    t.next_block();
    t.end_block().unwrap();
    assert_eq!(signer_sets(&t).len(), 1);

    // 10/10/10 -> 11/10/10 moves less than 5% of normalized power
    t.staking.bond(VALIDATORS[0].0, 11);
    t.next_block();
    t.end_block().unwrap();
    assert_eq!(signer_sets(&t).len(), 1);

    // 10/10/10 -> 20/10/10 moves well past it
    t.staking.bond(VALIDATORS[0].0, 20);
    t.next_block();
    t.end_block().unwrap();
    let sets = signer_sets(&t);
    assert_eq!(sets.len(), 2);
    assert_eq!(sets[1].nonce, 2);
    assert_eq!(sets[1].signers[0].evm_address, VALIDATORS[0].2);

    // Membership change always snapshots
    t.staking.unbond(VALIDATORS[2].0);
    t.next_block();
    t.end_block().unwrap();
    let sets = signer_sets(&t);
    assert_eq!(sets.len(), 3);
    assert_eq!(sets[2].signers.len(), 2);
}

#[test]
fn test_observed_signer_set_prunes_older_ones() {
    let mut t = setup();
    t.end_block().unwrap();
    t.staking.bond(VALIDATORS[0].0, 20);
    t.next_block();
    t.end_block().unwrap();
    assert_eq!(signer_sets(&t).len(), 2);

    let observed = signer_sets(&t)[1].clone();
    for (_, orchestrator, _) in VALIDATORS {
        t.execute(
            orchestrator,
            ExecuteMsg::SubmitClaim {
                chain_id: ETHEREUM_CHAIN_ID,
                event: EvmEvent::SignerSetUpdated(SignerSetUpdatedEvent {
                    event_nonce: 1,
                    evm_height: 300,
                    signer_set_nonce: observed.nonce,
                    members: observed.signers.clone(),
                }),
            },
        )
        .unwrap();
    }

    let last: Option<SignerSetTx> = t
        .query(QueryMsg::LastObservedSignerSetTx {
            chain_id: ETHEREUM_CHAIN_ID,
        })
        .unwrap();
    assert_eq!(last, Some(observed.clone()));

    let remaining = signer_sets(&t);
    assert_eq!(remaining, vec![observed]);
}

// ============================================================================
// Confirmations
// ============================================================================

#[test]
fn test_confirmations_reach_two_thirds() {
    let mut t = setup();
    t.end_block().unwrap();
    let artifact = OutgoingTxRef::SignerSet { nonce: 1 };

    confirm(&mut t, 0, artifact.clone()).unwrap();
    assert!(!is_confirmed(&t, artifact.clone()).confirmed);

    confirm(&mut t, 1, artifact.clone()).unwrap();
    let res = is_confirmed(&t, artifact.clone());
    assert!(res.confirmed);
    assert_eq!(res.total_power, 3 * (u32::MAX as u64 / 3));

    let res: ConfirmationsResponse = t
        .query(QueryMsg::Confirmations {
            chain_id: ETHEREUM_CHAIN_ID,
            artifact,
        })
        .unwrap();
    assert_eq!(res.confirmations.len(), 2);
    assert_eq!(res.confirmations[0].signature, signature(27));
}

#[test]
fn test_confirmation_validation() {
    let mut t = setup();
    t.end_block().unwrap();
    let artifact = OutgoingTxRef::SignerSet { nonce: 1 };

    let err = confirm(&mut t, 0, OutgoingTxRef::SignerSet { nonce: 7 }).unwrap_err();
    assert_eq!(
        err,
        ContractError::UnknownArtifact {
            chain_id: ETHEREUM_CHAIN_ID
        }
    );

    // Signer must be the validator's registered EVM address
    let err = t
        .execute(
            VALIDATORS[0].1,
            ExecuteMsg::SubmitConfirmation {
                chain_id: ETHEREUM_CHAIN_ID,
                artifact: artifact.clone(),
                evm_signer: VALIDATORS[1].2.to_string(),
                signature: signature(27),
            },
        )
        .unwrap_err();
    assert!(matches!(err, ContractError::InvalidSignature { .. }));

    let err = t
        .execute(
            VALIDATORS[0].1,
            ExecuteMsg::SubmitConfirmation {
                chain_id: ETHEREUM_CHAIN_ID,
                artifact: artifact.clone(),
                evm_signer: VALIDATORS[0].2.to_string(),
                signature: signature(3),
            },
        )
        .unwrap_err();
    assert!(matches!(err, ContractError::InvalidSignature { .. }));

    confirm(&mut t, 0, artifact.clone()).unwrap();
    let err = confirm(&mut t, 0, artifact).unwrap_err();
    assert!(matches!(err, ContractError::DuplicateConfirmation { .. }));
}

#[test]
fn test_digest_is_stable_and_scoped_by_artifact() {
    let mut t = setup();
    t.end_block().unwrap();
    t.staking.bond(VALIDATORS[0].0, 20);
    t.next_block();
    t.end_block().unwrap();

    let digest = |t: &TestEnv, nonce: u64| -> Binary {
        let res: DigestResponse = t
            .query(QueryMsg::OutgoingTxDigest {
                chain_id: ETHEREUM_CHAIN_ID,
                artifact: OutgoingTxRef::SignerSet { nonce },
            })
            .unwrap();
        res.digest
    };

    let first = digest(&t, 1);
    assert_eq!(first.len(), 32);
    assert_eq!(first, digest(&t, 1));
    assert_ne!(first, digest(&t, 2));

    assert!(t
        .query::<DigestResponse>(QueryMsg::OutgoingTxDigest {
            chain_id: ETHEREUM_CHAIN_ID,
            artifact: OutgoingTxRef::SignerSet { nonce: 9 },
        })
        .is_err());
}
