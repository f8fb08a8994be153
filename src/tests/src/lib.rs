//! Integration tests for the rollup state layer.

pub mod challenge_tests;
pub mod cli_tests;
pub mod core_tests;
pub mod helpers;
