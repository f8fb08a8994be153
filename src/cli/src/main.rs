//! Command line verifier for rollup checkpoints, proofs and challenges.

use anyhow::Result;
use colored::Colorize;
use rollup_cli::commands::{challenge, checkpoint, demo_challenge, verify_proof};
use rollup_cli::{CliError, VerifierConfig};
use rollup_core::{ChallengeOutcome, CoreError, WitnessEncoding};
use std::path::PathBuf;
use structopt::StructOpt;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Command line arguments for the rollup verifier.
#[derive(Debug, StructOpt)]
#[structopt(name = "rollup", about = "Optimistic rollup state verifier")]
struct Opt {
    /// Path to the configuration file
    #[structopt(short, long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Encoding of challenge input files (json or bincode)
    #[structopt(short, long)]
    encoding: Option<WitnessEncoding>,

    /// Subcommand to run
    #[structopt(subcommand)]
    cmd: Command,
}

/// Subcommands for the rollup verifier.
#[derive(Debug, StructOpt)]
enum Command {
    /// Compute the checkpoint of a state root and account count
    #[structopt(name = "checkpoint")]
    Checkpoint {
        /// State root in hex
        #[structopt(long)]
        root: String,

        /// Number of accounts
        #[structopt(long)]
        count: u32,
    },

    /// Evaluate a compact merkle proof over a set of leaves
    #[structopt(name = "verify-proof")]
    VerifyProof {
        /// JSON file with the leaves
        #[structopt(long, parse(from_os_str))]
        leaves: PathBuf,

        /// Proof in hex
        #[structopt(long)]
        proof: String,

        /// Root the proof must evaluate to
        #[structopt(long)]
        root: Option<String>,
    },

    /// Verify a challenge input
    #[structopt(name = "challenge")]
    Challenge {
        /// Challenge input file; nothing is verified without one
        #[structopt(long, parse(from_os_str))]
        input: Option<PathBuf>,
    },

    /// Write a challenge input disputing a transaction of a demo chain
    #[structopt(name = "demo-challenge")]
    DemoChallenge {
        /// Output file
        #[structopt(long, parse(from_os_str))]
        output: PathBuf,

        /// Block number (defaults to the tip)
        #[structopt(long)]
        block: Option<u64>,

        /// Index of the disputed transaction
        #[structopt(long, default_value = "0")]
        tx_index: u32,

        /// Flip the byte at this offset of the written input
        #[structopt(long)]
        corrupt_byte: Option<usize>,
    },
}

fn main() {
    if let Err(err) = run() {
        error!("{:#}", err);
        eprintln!("{} {:#}", "Error:".red(), err);
        let code = if let Some(cli_error) = err.downcast_ref::<CliError>() {
            cli_error.exit_code()
        } else if let Some(core_error) = err.downcast_ref::<CoreError>() {
            core_error.exit_code()
        } else {
            1
        };
        std::process::exit(code);
    }
}

fn run() -> Result<()> {
    // Parse command line arguments
    let opt = Opt::from_args();

    // Load configuration
    let config = match &opt.config {
        Some(path) => VerifierConfig::from_file(path)?,
        None => VerifierConfig::default(),
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Run the appropriate command
    match opt.cmd {
        Command::Checkpoint { root, count } => {
            let checkpoint = checkpoint::run(&root, count)?;
            println!("{} 0x{}", "Checkpoint:".green(), hex::encode(checkpoint.as_slice()));
        }
        Command::VerifyProof { leaves, proof, root } => {
            let computed = verify_proof::run(&config, &leaves, &proof, root.as_deref())?;
            println!("{} 0x{}", "Proof root:".green(), hex::encode(computed.as_slice()));
            if root.is_some() {
                println!("{}", "Proof verified".green());
            }
        }
        Command::Challenge { input } => {
            match challenge::run(&config, input.as_deref(), opt.encoding)? {
                ChallengeOutcome::NoChallenge => {
                    println!("{}", "No challenge input, nothing to verify".yellow());
                }
                ChallengeOutcome::Verified { post_checkpoint, return_data_hash } => {
                    info!("Challenge rejected, the disputed transaction is valid");
                    println!("{}", "Transaction verified".green());
                    println!("  {} 0x{}", "Post checkpoint:".green(), hex::encode(post_checkpoint.as_slice()));
                    println!("  {} 0x{}", "Return data hash:".green(), hex::encode(return_data_hash.as_slice()));
                }
            }
        }
        Command::DemoChallenge { output, block, tx_index, corrupt_byte } => {
            let summary = demo_challenge::run(&config, &output, block, tx_index, corrupt_byte, opt.encoding)?;
            println!(
                "{} {} ({} bytes)",
                "Challenge input written:".green(),
                summary.output.display(),
                summary.size
            );
            println!(
                "  {} #{} 0x{} tx {}",
                "Block:".green(),
                summary.block_number,
                hex::encode(summary.block_hash.as_slice()),
                summary.tx_index
            );
            if let Some(offset) = summary.corrupted {
                println!("  {} {}", "Corrupted byte:".red(), offset);
            }
        }
    }

    Ok(())
}
