//! Tests for the challenge protocol.

use crate::helpers::{demo_chain, demo_input};
use rollup_core::hasher::hash_leaf;
use rollup_core::proofs::{OP_LEAF, OP_PARENT};
use rollup_core::{
    verify_challenge, ChallengeInput, ChallengeLimits, ChallengeOutcome, ChallengeState,
    ChallengeVerifier, ContractRegistry, CoreError, Generator, H256, WitnessEncoding,
};

fn verify(input: ChallengeInput) -> Result<ChallengeOutcome, CoreError> {
    verify_challenge(Some(input), &ContractRegistry::builtin(), ChallengeLimits::default())
}

fn flip(hash: &H256) -> H256 {
    let mut bytes: [u8; 32] = (*hash).into();
    bytes[0] ^= 0x01;
    bytes.into()
}

fn assert_verified(generator: &Generator, number: u64, tx_index: u32) {
    let input = demo_input(generator, number, tx_index);
    let block = generator.block(number).unwrap();
    match verify(input).unwrap() {
        ChallengeOutcome::Verified { post_checkpoint, .. } => {
            assert_eq!(post_checkpoint, block.receipts[tx_index as usize].post_checkpoint);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

/// Every transaction of the demo chain replays to its committed checkpoint.
#[test]
fn test_every_transaction_verifies() {
    let generator = demo_chain();
    for number in 1..=2u64 {
        let block = generator.block(number).unwrap();
        assert!(block.rejected.is_empty());
        for tx_index in 0..block.transactions.len() as u32 {
            assert_verified(&generator, number, tx_index);
        }
    }
}

/// Tests a replay that reads block hashes and archived data.
#[test]
fn test_witness_carries_block_hashes_and_data() {
    let generator = demo_chain();

    // Archive store in block 1 stamps with the genesis hash
    let store = demo_input(&generator, 1, 2);
    assert_eq!(store.witness.block_hashes.len(), 1);
    assert_eq!(store.witness.block_hashes[0].number, 0);
    assert_eq!(store.witness.block_hashes[0].hash, generator.block(0).unwrap().hash());
    assert!(!store.witness.block_hashes_proof.is_empty());

    // Archive read in block 2 loads the blob stored in block 1
    let read = demo_input(&generator, 2, 1);
    assert_eq!(read.witness.load_data.len(), 1);
    assert_eq!(read.witness.load_data[0].data, rollup_cli::demo_challenge::DEMO_BLOB.to_vec());
    assert!(read.witness.block_hashes.is_empty());
    assert!(matches!(verify(read).unwrap(), ChallengeOutcome::Verified { .. }));
}

/// Tests that the account creation replay reproduces the new account count.
#[test]
fn test_create_account_replay() {
    let generator = demo_chain();
    let input = demo_input(&generator, 1, 1);
    assert_eq!(input.witness.account_count, 5);
    assert!(matches!(verify(input).unwrap(), ChallengeOutcome::Verified { .. }));
    assert_eq!(generator.block(1).unwrap().raw.post_account.count, 6);
}

/// Corrupting any byte of the kv state proof fails the challenge.
#[test]
fn test_corrupted_kv_proof_fails() {
    let generator = demo_chain();
    for (number, tx_index) in [(1u64, 0u32), (1, 1), (1, 2), (2, 3)] {
        let input = demo_input(&generator, number, tx_index);
        for offset in 0..input.witness.kv_state_proof.len() {
            let mut tampered = input.clone();
            tampered.witness.kv_state_proof[offset] ^= 0x01;
            let err = verify(tampered).unwrap_err();
            assert_ne!(err.exit_code(), 0, "proof byte {} of tx {}/{}", offset, number, tx_index);
        }
    }
}

/// Corrupting any byte of a witness key or value fails the challenge.
#[test]
fn test_corrupted_kv_pair_fails() {
    let generator = demo_chain();
    for (number, tx_index) in [(1u64, 0u32), (1, 1), (2, 1)] {
        let input = demo_input(&generator, number, tx_index);
        for index in 0..input.witness.kv_state.len() {
            for byte in 0..32 {
                let mut tampered = input.clone();
                let mut key: [u8; 32] = tampered.witness.kv_state[index].key.into();
                key[byte] ^= 0x01;
                tampered.witness.kv_state[index].key = key.into();
                assert!(verify(tampered).is_err(), "key byte {} of pair {}", byte, index);

                let mut tampered = input.clone();
                let mut value: [u8; 32] = tampered.witness.kv_state[index].value.into();
                value[byte] ^= 0x01;
                tampered.witness.kv_state[index].value = value.into();
                assert!(verify(tampered).is_err(), "value byte {} of pair {}", byte, index);
            }
        }
    }
}

/// A block committing to a wrong checkpoint fails even when the disputed
/// block hash matches the tampered block.
#[test]
fn test_tampered_checkpoint_list_fails() {
    let generator = demo_chain();
    let registry = ContractRegistry::builtin();
    let input = demo_input(&generator, 1, 1);
    assert_eq!(input.witness.raw_block.state_checkpoint_list.len(), 3);

    // Index 0 is the pre-state of tx 1, index 1 its post-state
    for index in 0..2 {
        let mut tampered = input.clone();
        let list = &mut tampered.witness.raw_block.state_checkpoint_list;
        list[index] = flip(&list[index]);
        tampered.target.block_hash = tampered.witness.raw_block.hash();

        let mut verifier = ChallengeVerifier::new(&registry, ChallengeLimits::default());
        let err = verifier.run(Some(tampered)).unwrap_err();
        assert!(matches!(err, CoreError::CheckpointMismatch { .. }), "checkpoint {}", index);
        assert_eq!(err.exit_code(), 80);
        assert_eq!(verifier.state(), ChallengeState::Rejected);
    }

    // A checkpoint of another transaction does not matter
    let mut tampered = input;
    let list = &mut tampered.witness.raw_block.state_checkpoint_list;
    list[2] = flip(&list[2]);
    tampered.target.block_hash = tampered.witness.raw_block.hash();
    assert!(matches!(verify(tampered).unwrap(), ChallengeOutcome::Verified { .. }));
}

/// A witness cannot claim that a key present in the pre-state is absent.
#[test]
fn test_forged_absent_key_fails() {
    let generator = demo_chain();
    let mut forged_any = false;
    for number in 1..=2u64 {
        let block = generator.block(number).unwrap();
        for tx_index in 0..block.transactions.len() as u32 {
            let input = demo_input(&generator, number, tx_index);
            let first = input
                .witness
                .kv_state
                .iter()
                .min_by_key(|pair| pair.key)
                .cloned()
                .unwrap();
            if first.value.is_zero() || input.witness.kv_state_proof.first() != Some(&OP_LEAF) {
                continue;
            }

            let mut tampered = input.clone();
            for pair in tampered.witness.kv_state.iter_mut().filter(|pair| pair.key == first.key) {
                pair.value = H256::zero();
            }
            let mut proof = vec![OP_LEAF, OP_PARENT, 0];
            proof.extend_from_slice(hash_leaf(&first.key, &first.value).as_slice());
            proof.extend_from_slice(&input.witness.kv_state_proof[1..]);
            tampered.witness.kv_state_proof = proof;

            assert!(verify(tampered).is_err(), "tx {}/{}", number, tx_index);
            forged_any = true;
        }
    }
    assert!(forged_any);
}

/// Corrupting the block hash proof fails the challenge.
#[test]
fn test_corrupted_block_hash_proof_fails() {
    let generator = demo_chain();
    let input = demo_input(&generator, 2, 3);
    assert!(!input.witness.block_hashes_proof.is_empty());
    for offset in 0..input.witness.block_hashes_proof.len() {
        let mut tampered = input.clone();
        tampered.witness.block_hashes_proof[offset] ^= 0x01;
        assert!(verify(tampered).is_err());
    }

    let mut tampered = input.clone();
    tampered.witness.block_hashes[0].hash = flip(&tampered.witness.block_hashes[0].hash);
    assert_eq!(verify(tampered).unwrap_err().exit_code(), 60);

    let mut tampered = input;
    tampered.block_merkle_root = flip(&tampered.block_merkle_root);
    assert_eq!(verify(tampered).unwrap_err().exit_code(), 60);
}

/// Tests tampering with the transaction and its inclusion proof.
#[test]
fn test_transaction_tampering() {
    let generator = demo_chain();
    let input = demo_input(&generator, 1, 0);

    let mut tampered = input.clone();
    tampered.witness.tx_proof[0] = flip(&tampered.witness.tx_proof[0]);
    assert!(matches!(verify(tampered).unwrap_err(), CoreError::TxProof(_)));

    let mut tampered = input.clone();
    tampered.witness.l2tx.args.push(0);
    assert!(matches!(verify(tampered).unwrap_err(), CoreError::TxProof(_)));

    // The proof is for index 0
    let mut tampered = input.clone();
    tampered.target.tx_index = 1;
    assert!(matches!(verify(tampered).unwrap_err(), CoreError::TxProof(_)));

    let mut tampered = input;
    tampered.target.tx_index = 99;
    assert!(matches!(verify(tampered).unwrap_err(), CoreError::InvalidData(_)));
}

/// Tests witnesses that do not match the disputed block.
#[test]
fn test_block_mismatch() {
    let generator = demo_chain();
    let input = demo_input(&generator, 1, 0);

    let mut tampered = input.clone();
    tampered.target.block_hash = generator.block(2).unwrap().hash();
    let err = verify(tampered).unwrap_err();
    assert!(matches!(err, CoreError::BlockHashMismatch { .. }));
    assert_eq!(err.exit_code(), 62);

    let mut tampered = input;
    tampered.witness.raw_block.timestamp += 1;
    assert!(matches!(verify(tampered).unwrap_err(), CoreError::BlockHashMismatch { .. }));
}

/// Tests tampering with the replay outputs and side inputs.
#[test]
fn test_replay_tampering() {
    let generator = demo_chain();

    let mut tampered = demo_input(&generator, 1, 0);
    tampered.witness.return_data_hash = flip(&tampered.witness.return_data_hash);
    assert_eq!(verify(tampered).unwrap_err().exit_code(), 81);

    let mut tampered = demo_input(&generator, 1, 0);
    tampered.witness.account_count += 1;
    assert!(matches!(verify(tampered).unwrap_err(), CoreError::CheckpointMismatch { .. }));

    let mut tampered = demo_input(&generator, 2, 1);
    tampered.witness.load_data.clear();
    assert!(verify(tampered).is_err());

    let mut tampered = demo_input(&generator, 2, 1);
    tampered.witness.load_data[0].data.push(0);
    assert!(verify(tampered).is_err());
}

/// Tests the limits enforced while loading a witness.
#[test]
fn test_witness_limits() {
    let generator = demo_chain();
    let input = demo_input(&generator, 1, 0);
    let registry = ContractRegistry::builtin();

    let limits = ChallengeLimits { max_kv_pairs: 1, ..ChallengeLimits::default() };
    let err = verify_challenge(Some(input.clone()), &registry, limits).unwrap_err();
    assert!(matches!(err, CoreError::Capacity { .. }));
    assert_eq!(err.exit_code(), 70);

    let limits = ChallengeLimits { max_proof_size: 1, ..ChallengeLimits::default() };
    assert!(matches!(
        verify_challenge(Some(input), &registry, limits).unwrap_err(),
        CoreError::Capacity { .. }
    ));

    // Block hashes outside the window
    let mut tampered = demo_input(&generator, 1, 2);
    tampered.witness.block_hashes[0].number = 1;
    assert!(matches!(verify(tampered).unwrap_err(), CoreError::InvalidData(_)));

    // The window shrinks with the configured depth
    let input = demo_input(&generator, 2, 3);
    let limits = ChallengeLimits { block_hash_depth: 0, ..ChallengeLimits::default() };
    assert!(matches!(
        verify_challenge(Some(input), &registry, limits).unwrap_err(),
        CoreError::InvalidData(_)
    ));
}

/// Tests the verifier state machine.
#[test]
fn test_verifier_states() {
    let generator = demo_chain();
    let registry = ContractRegistry::builtin();

    let mut verifier = ChallengeVerifier::new(&registry, ChallengeLimits::default());
    assert_eq!(verifier.state(), ChallengeState::AwaitingChallenge);
    assert_eq!(verifier.run(None).unwrap(), ChallengeOutcome::NoChallenge);
    assert_eq!(verifier.state(), ChallengeState::AwaitingChallenge);

    verifier.run(Some(demo_input(&generator, 1, 0))).unwrap();
    assert_eq!(verifier.state(), ChallengeState::PostVerified);
    assert!(matches!(
        verifier.run(Some(demo_input(&generator, 1, 0))).unwrap_err(),
        CoreError::FatalContext(_)
    ));

    let mut verifier = ChallengeVerifier::new(&registry, ChallengeLimits::default());
    let mut tampered = demo_input(&generator, 1, 0);
    tampered.witness.return_data_hash = H256::zero();
    assert!(verifier.run(Some(tampered)).is_err());
    assert_eq!(verifier.state(), ChallengeState::Rejected);
}

/// Tests that encoded inputs verify after decoding.
#[test]
fn test_encoded_input_round_trip() {
    let generator = demo_chain();
    let input = demo_input(&generator, 2, 3);
    for encoding in [WitnessEncoding::Json, WitnessEncoding::Bincode] {
        let data = input.encode(encoding).unwrap();
        let decoded = ChallengeInput::decode(&data, encoding).unwrap();
        assert_eq!(decoded, input);
        assert!(matches!(verify(decoded).unwrap(), ChallengeOutcome::Verified { .. }));
    }
}
