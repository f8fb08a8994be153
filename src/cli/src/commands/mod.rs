//! Commands for the rollup CLI.

pub mod challenge;
pub mod checkpoint;
pub mod demo_challenge;
pub mod verify_proof;
