//! CLI Module
//!
//! Command-line interface for the inscript pipeline.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Inscript - layered obfuscation pipeline with integrity-checked envelopes
#[derive(Parser, Debug)]
#[command(name = "inscript-cli")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Pipeline settings file (JSON)
    #[arg(short, long, global = true)]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Encrypt a JSON payload into an envelope
    #[command(name = "encrypt")]
    Encrypt {
        /// Security level (1-3)
        #[arg(short, long, default_value_t = 3)]
        level: u8,

        /// Seed for reproducible envelopes
        #[arg(long)]
        seed: Option<u64>,

        /// Payload file (stdin when omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Envelope output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decrypt an envelope back into its JSON payload
    #[command(name = "decrypt")]
    Decrypt {
        /// Security level used to encrypt
        #[arg(short, long, default_value_t = 3)]
        level: u8,

        /// Envelope file (stdin when omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Payload output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check an envelope's version and outer checksum
    #[command(name = "verify")]
    Verify {
        /// Envelope file (stdin when omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Show layers and advisor availability
    #[command(name = "status")]
    Status,

    /// Serve one advisor bridge request on stdin/stdout
    #[command(name = "advisor")]
    Advisor,
}
