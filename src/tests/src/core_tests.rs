//! Tests for the core crate.

use rand::Rng;
use rollup_core::checkpoint;
use rollup_core::errors::{CoreError, ProofError};
use rollup_core::overlay::StateOverlay;
use rollup_core::proofs;
use rollup_core::smt::{State, SMT};
use rollup_core::H256;

fn random_h256(rng: &mut impl Rng) -> H256 {
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes);
    bytes.into()
}

fn h(byte: u8) -> H256 {
    [byte; 32].into()
}

/// A tree of random leaves and a random subset of its keys.
fn random_tree(size: usize, targets: usize) -> (SMT, Vec<(H256, H256)>) {
    let mut rng = rand::thread_rng();
    let mut smt = SMT::new();
    let mut pairs = Vec::new();
    for _ in 0..size {
        let key = random_h256(&mut rng);
        let value = random_h256(&mut rng);
        smt.update_raw(key, value).unwrap();
        pairs.push((key, value));
    }
    pairs.truncate(targets);
    pairs.sort_by_key(|(key, _)| *key);
    (smt, pairs)
}

/// Tests that the proof compiled for a key set reproduces the tree root.
#[test]
fn test_proof_reproduces_root() {
    let (smt, leaves) = random_tree(64, 9);
    let keys: Vec<H256> = leaves.iter().map(|(key, _)| *key).collect();
    let proof = smt.merkle_proof(&keys).unwrap();

    assert_eq!(proofs::calculate_root(&leaves, &proof).unwrap(), smt.root());
    // Evaluation is deterministic
    assert_eq!(
        proofs::calculate_root(&leaves, &proof).unwrap(),
        proofs::calculate_root(&leaves, &proof).unwrap()
    );
}

/// Tests that flipping any single byte of a proof over present keys fails.
#[test]
fn test_flipped_proof_byte_fails() {
    let (smt, leaves) = random_tree(32, 4);
    let keys: Vec<H256> = leaves.iter().map(|(key, _)| *key).collect();
    let proof = smt.merkle_proof(&keys).unwrap();
    let root = smt.root();

    for offset in 0..proof.len() {
        let mut tampered = proof.clone();
        tampered[offset] ^= 0x01;
        assert!(
            proofs::verify(&root, &leaves, &tampered).is_err(),
            "flipped byte {} still verifies",
            offset
        );
    }
}

/// Tests that flipping any single byte of a leaf fails.
#[test]
fn test_flipped_leaf_byte_fails() {
    let (smt, leaves) = random_tree(16, 3);
    let keys: Vec<H256> = leaves.iter().map(|(key, _)| *key).collect();
    let proof = smt.merkle_proof(&keys).unwrap();
    let root = smt.root();

    for index in 0..leaves.len() {
        for byte in 0..64 {
            let mut tampered = leaves.clone();
            let (key, value) = tampered[index];
            let mut raw = [0u8; 64];
            raw[..32].copy_from_slice(key.as_slice());
            raw[32..].copy_from_slice(value.as_slice());
            raw[byte] ^= 0x01;
            let mut new_key = [0u8; 32];
            let mut new_value = [0u8; 32];
            new_key.copy_from_slice(&raw[..32]);
            new_value.copy_from_slice(&raw[32..]);
            tampered[index] = (new_key.into(), new_value.into());
            tampered.sort_by_key(|(key, _)| *key);

            assert!(proofs::verify(&root, &tampered, &proof).is_err());
        }
    }
}

/// Tests proofs of keys that are not in the tree.
#[test]
fn test_absent_keys() {
    let (smt, _) = random_tree(20, 0);
    let mut rng = rand::thread_rng();
    let mut leaves: Vec<(H256, H256)> = (0..3).map(|_| (random_h256(&mut rng), H256::zero())).collect();
    leaves.sort_by_key(|(key, _)| *key);
    let keys: Vec<H256> = leaves.iter().map(|(key, _)| *key).collect();
    let proof = smt.merkle_proof(&keys).unwrap();

    proofs::verify(&smt.root(), &leaves, &proof).unwrap();

    // Claiming a value for an absent key fails
    let mut claimed = leaves.clone();
    claimed[1].1 = h(7);
    assert!(proofs::verify(&smt.root(), &claimed, &proof).is_err());
}

/// Tests that a key in the tree cannot be proven absent by replaying its own
/// leaf hash as a sibling.
#[test]
fn test_present_key_cannot_be_proven_absent() {
    let (mut smt, _) = random_tree(19, 0);
    let key = h(0x11);
    let value = h(0x5a);
    smt.update_raw(key, value).unwrap();
    smt.set_account_count(20).unwrap();
    let root = smt.root();
    let expected = smt.calculate_checkpoint().unwrap();

    let honest = smt.merkle_proof(&[key]).unwrap();
    proofs::verify(&root, &[(key, value)], &honest).unwrap();

    let mut forged = vec![proofs::OP_LEAF, proofs::OP_PARENT, 0];
    forged.extend_from_slice(rollup_core::hasher::hash_leaf(&key, &value).as_slice());
    forged.extend_from_slice(&honest[1..]);
    assert!(proofs::verify(&root, &[(key, H256::zero())], &forged).is_err());

    let mut overlay = StateOverlay::new(4);
    overlay.insert(key, H256::zero()).unwrap();
    assert!(checkpoint::verify(&expected, &mut overlay, &forged, 20).is_err());

    // The honest proof does not prove absence either
    assert!(proofs::verify(&root, &[(key, H256::zero())], &honest).is_err());
}

/// Tests that a proof stays valid once the proven keys change.
#[test]
fn test_proof_covers_updated_values() {
    let (mut smt, leaves) = random_tree(24, 5);
    let keys: Vec<H256> = leaves.iter().map(|(key, _)| *key).collect();
    let proof = smt.merkle_proof(&keys).unwrap();

    let updated: Vec<(H256, H256)> = leaves.iter().map(|(key, _)| (*key, h(0xab))).collect();
    for (key, value) in &updated {
        smt.update_raw(*key, *value).unwrap();
    }
    proofs::verify(&smt.root(), &updated, &proof).unwrap();
}

/// Tests that a checkpoint binds both the root and the account count.
#[test]
fn test_checkpoint_binds_count() {
    let (mut smt, leaves) = random_tree(10, 2);
    smt.set_account_count(10).unwrap();
    let keys: Vec<H256> = leaves.iter().map(|(key, _)| *key).collect();
    let proof = smt.merkle_proof(&keys).unwrap();
    let expected = smt.calculate_checkpoint().unwrap();
    assert_eq!(expected, checkpoint::commit(&smt.root(), 10));

    let mut overlay = StateOverlay::new(8);
    for (key, value) in &leaves {
        overlay.insert(*key, *value).unwrap();
    }
    checkpoint::verify(&expected, &mut overlay, &proof, 10).unwrap();

    let err = checkpoint::verify(&expected, &mut overlay, &proof, 11).unwrap_err();
    assert!(matches!(err, CoreError::CheckpointMismatch { .. }));
    assert_eq!(err.exit_code(), 80);
}

/// Overwrite at capacity: the latest value wins.
#[test]
fn test_overwrite_at_capacity() {
    let mut overlay = StateOverlay::new(2);
    overlay.insert(h(1), h(1)).unwrap();
    overlay.insert(h(2), h(2)).unwrap();
    overlay.insert(h(1), h(3)).unwrap();

    assert_eq!(overlay.fetch(&h(1)).unwrap(), h(3));
    overlay.normalize();
    assert_eq!(overlay.leaves(), vec![(h(1), h(3)), (h(2), h(2))]);

    // A third distinct key does not fit
    let err = overlay.insert(h(4), h(4)).unwrap_err();
    assert!(matches!(err, CoreError::Capacity { .. }));
}

/// Raw duplicates: normalization keeps the earliest pair.
#[test]
fn test_normalize_keeps_earliest_duplicate() {
    let mut overlay = StateOverlay::new(4);
    overlay.push_pair(h(1), h(10)).unwrap();
    overlay.push_pair(h(2), h(20)).unwrap();
    overlay.push_pair(h(1), h(11)).unwrap();

    overlay.normalize();
    assert_eq!(overlay.leaves(), vec![(h(1), h(10)), (h(2), h(20))]);
    assert!(overlay.is_normalized());
}

/// Tests that normalization is idempotent.
#[test]
fn test_normalize_idempotent() {
    let mut rng = rand::thread_rng();
    let mut overlay = StateOverlay::new(64);
    for _ in 0..40 {
        let key = h(rng.gen_range(0..16));
        overlay.push_pair(key, random_h256(&mut rng)).unwrap();
    }
    overlay.normalize();
    let once = overlay.leaves();
    overlay.normalize();
    assert_eq!(overlay.leaves(), once);
    assert!(once.windows(2).all(|pair| pair[0].0 < pair[1].0));
}

/// Tests malformed proofs.
#[test]
fn test_malformed_proofs() {
    let leaves = vec![(h(1), h(2))];
    assert_eq!(
        proofs::calculate_root(&leaves, &[]).unwrap_err(),
        ProofError::UnusedLeaves
    );
    assert_eq!(
        proofs::calculate_root(&leaves, &[0x00]).unwrap_err(),
        ProofError::InvalidOpcode { opcode: 0x00, offset: 0 }
    );
    assert_eq!(
        proofs::calculate_root(&leaves, &[proofs::OP_LEAF, proofs::OP_PARENT, 3]).unwrap_err(),
        ProofError::Truncated { offset: 1 }
    );
    assert_eq!(
        proofs::calculate_root(&leaves, &[proofs::OP_LEAF, proofs::OP_LEAF]).unwrap_err(),
        ProofError::MissingLeaf { provided: 1 }
    );

    let overflow = vec![proofs::OP_LEAF; proofs::STACK_CAPACITY + 1];
    let many: Vec<(H256, H256)> = (0..=proofs::STACK_CAPACITY as u8).map(|i| (h(i), h(i))).collect();
    assert_eq!(
        proofs::calculate_root(&many, &overflow).unwrap_err(),
        ProofError::StackOverflow { capacity: proofs::STACK_CAPACITY }
    );
}
