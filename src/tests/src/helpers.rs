//! Shared fixtures.

use rollup_cli::demo_challenge::build_demo_chain;
use rollup_core::{build_challenge_input, ChallengeInput, Generator};

/// Challenge input for `tx_index` of block `number` of the demo chain.
pub fn demo_input(generator: &Generator, number: u64, tx_index: u32) -> ChallengeInput {
    let block_hash = generator.block(number).unwrap().hash();
    build_challenge_input(generator, &block_hash, tx_index).unwrap()
}

/// The demo chain.
pub fn demo_chain() -> Generator {
    build_demo_chain().unwrap()
}
