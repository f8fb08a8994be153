//! Tests for the cli crate.

use rollup_cli::{challenge, checkpoint, demo_challenge, verify_proof, CliError, VerifierConfig};
use rollup_core::checkpoint::commit;
use rollup_core::smt::{State, SMT};
use rollup_core::{ChallengeOutcome, CoreError, KVPair, WitnessEncoding, H256};
use tempfile::tempdir;

/// Tests the configuration file round trip.
#[test]
fn test_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("verifier.json");

    let mut config = VerifierConfig::default();
    config.witness_encoding = WitnessEncoding::Bincode;
    config.limits.max_kv_pairs = 16;
    config.to_file(&path).unwrap();
    assert_eq!(VerifierConfig::from_file(&path).unwrap(), config);

    // Missing fields fall back to defaults
    std::fs::write(&path, r#"{ "log_filter": "debug" }"#).unwrap();
    let partial = VerifierConfig::from_file(&path).unwrap();
    assert_eq!(partial.log_filter, "debug");
    assert_eq!(partial.witness_encoding, WitnessEncoding::Json);
    assert_eq!(partial.limits.max_kv_pairs, 1024);
}

/// Tests the checkpoint command.
#[test]
fn test_checkpoint_command() {
    let root: H256 = [3u8; 32].into();
    let text = format!("0x{}", hex::encode(root.as_slice()));
    assert_eq!(checkpoint::run(&text, 7).unwrap(), commit(&root, 7));

    let err = checkpoint::run("0x1234", 7).unwrap_err();
    assert!(matches!(err, CliError::InvalidArgument(_)));
    assert_eq!(err.exit_code(), 5);
    assert!(matches!(checkpoint::run("zz", 7).unwrap_err(), CliError::HexError(_)));
}

/// Tests the verify-proof command.
#[test]
fn test_verify_proof_command() {
    let mut smt = SMT::new();
    for i in 1..=8u8 {
        smt.update_raw([i; 32].into(), [i + 100; 32].into()).unwrap();
    }
    let leaves = vec![
        KVPair::new([2u8; 32].into(), [102u8; 32].into()),
        KVPair::new([5u8; 32].into(), [105u8; 32].into()),
    ];
    let keys: Vec<H256> = leaves.iter().map(|pair| pair.key).collect();
    let proof = hex::encode(smt.merkle_proof(&keys).unwrap());
    let root = hex::encode(smt.root().as_slice());

    let dir = tempdir().unwrap();
    let path = dir.path().join("leaves.json");
    std::fs::write(&path, serde_json::to_string(&leaves).unwrap()).unwrap();

    let config = VerifierConfig::default();
    assert_eq!(verify_proof::run(&config, &path, &proof, None).unwrap(), smt.root());
    verify_proof::run(&config, &path, &proof, Some(&root)).unwrap();

    let other = hex::encode([9u8; 32]);
    let err = verify_proof::run(&config, &path, &proof, Some(&other)).unwrap_err();
    assert_eq!(err.exit_code(), 60);
}

/// Tests that a written demo challenge verifies in both encodings.
#[test]
fn test_demo_challenge_verifies() {
    let dir = tempdir().unwrap();
    let config = VerifierConfig::default();

    for encoding in [WitnessEncoding::Json, WitnessEncoding::Bincode] {
        let path = dir.path().join(format!("challenge.{}", encoding));
        let summary = demo_challenge::run(&config, &path, Some(1), 2, None, Some(encoding)).unwrap();
        assert_eq!(summary.block_number, 1);
        assert_eq!(summary.size, std::fs::metadata(&path).unwrap().len() as usize);
        assert!(summary.corrupted.is_none());

        let outcome = challenge::run(&config, Some(path.as_path()), Some(encoding)).unwrap();
        assert!(matches!(outcome, ChallengeOutcome::Verified { .. }));
    }
}

/// Tests that a corrupted demo challenge fails with the core exit code.
#[test]
fn test_corrupted_demo_challenge_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("challenge.bin");
    let config = VerifierConfig {
        witness_encoding: WitnessEncoding::Bincode,
        ..VerifierConfig::default()
    };

    let clean = demo_challenge::run(&config, &path, None, 0, None, None).unwrap();
    // The last bytes hold the return data hash
    demo_challenge::run(&config, &path, None, 0, Some(clean.size - 1), None).unwrap();

    let err = challenge::run(&config, Some(path.as_path()), None).unwrap_err();
    match &err {
        CliError::Core(CoreError::ReturnDataMismatch { .. }) => {}
        other => panic!("unexpected error {}", other),
    }
    assert_eq!(err.exit_code(), 81);

    let err = demo_challenge::run(&config, &path, None, 0, Some(clean.size), None).unwrap_err();
    assert!(matches!(err, CliError::InvalidArgument(_)));
    assert!(err.to_string().contains(&format!("{} byte input", clean.size)));
}

/// Tests the challenge command without an input.
#[test]
fn test_no_challenge() {
    let config = VerifierConfig::default();
    assert_eq!(challenge::run(&config, None, None).unwrap(), ChallengeOutcome::NoChallenge);

    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing.json");
    let err = challenge::run(&config, Some(missing.as_path()), None).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}
