//! Command-line argument parsing for rfpbuddy
//!
//! Provides clap-based CLI with subcommands and verbosity control.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

use crate::types::{Feedback, ProviderMode};

/// rfpbuddy - Answer RFP requirements with a mixture of language models
#[derive(Parser, Debug)]
#[command(name = "rfpbuddy")]
#[command(version)]
#[command(about = "Bulk RFP response generation with multi-provider synthesis", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level: -q (quiet), default (normal), -v (verbose), -vv (very verbose)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (only errors and the final summary)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Answer every requirement of a stored batch
    Batch {
        /// Workspace JSON file holding requirements, responses and embeddings
        #[arg(value_name = "WORKSPACE")]
        workspace: PathBuf,

        /// Batch id inside the workspace
        #[arg(short, long)]
        batch_id: String,

        /// Provider mode: moa, openai, anthropic (claude), deepseek
        #[arg(short, long, default_value = "moa")]
        mode: ProviderMode,

        /// Requirements processed in parallel (config default when omitted)
        #[arg(short = 'n', long)]
        concurrency: Option<usize>,

        /// Caller scope; at most one batch runs per scope
        #[arg(long, default_value = "default")]
        scope: String,
    },

    /// Answer one requirement
    Generate {
        #[arg(value_name = "WORKSPACE")]
        workspace: PathBuf,

        /// Requirement id
        #[arg(long)]
        id: u64,

        #[arg(short, long, default_value = "moa")]
        mode: ProviderMode,
    },

    /// Record reviewer feedback on a stored response
    Feedback {
        #[arg(value_name = "WORKSPACE")]
        workspace: PathBuf,

        #[arg(long)]
        response_id: Uuid,

        /// Numeric rating
        #[arg(long, allow_negative_numbers = true)]
        rating: Option<i32>,

        /// positive or negative
        #[arg(long)]
        feedback: Option<Feedback>,
    },

    /// Display current configuration
    Config {
        /// Write the default configuration to the config path
        #[arg(long)]
        init: bool,
    },
}

/// Verbosity level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    VeryVerbose,
}

impl Args {
    /// Get verbosity level based on flags
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::VeryVerbose,
            }
        }
    }
}

impl Verbosity {
    /// Log level this verbosity maps to, if it overrides the configured one
    pub fn log_level(&self) -> Option<&'static str> {
        match self {
            Verbosity::Quiet => Some("error"),
            Verbosity::Normal => None,
            Verbosity::Verbose => Some("debug"),
            Verbosity::VeryVerbose => Some("trace"),
        }
    }

    /// Check if should show progress bars
    pub fn show_progress(&self) -> bool {
        !matches!(self, Verbosity::Quiet)
    }
}
