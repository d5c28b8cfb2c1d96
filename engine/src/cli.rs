//! CLI interface for Quill
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for driving the writing engine.

use clap::{Parser, Subcommand};
use quill_sdk::types::UserTier;
use std::path::PathBuf;

/// Quill creative-writing engine
///
/// Turns a writing request into a draft through query understanding,
/// memory retrieval, planning, drafting and consistency checking.
#[derive(Parser, Debug)]
#[command(name = "quill")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the full pipeline for one request
    Run {
        /// Request text (overrides the query in --request)
        #[arg(short, long)]
        query: Option<String>,

        /// Service tier (standard, regular, vip)
        #[arg(short, long, default_value = "standard")]
        tier: UserTier,

        /// JSON file holding a full request with context and options
        #[arg(short, long, value_name = "FILE")]
        request: Option<PathBuf>,

        /// JSON corpus backing the hybrid retriever
        #[arg(long, value_name = "FILE")]
        kb: Option<PathBuf>,
    },

    /// Run the deterministic checker on an existing draft
    Check {
        /// Draft text file
        #[arg(short, long, value_name = "FILE")]
        draft: PathBuf,

        /// JSON request the draft answers (must_include, must_avoid, ...)
        #[arg(short, long, value_name = "FILE")]
        request: Option<PathBuf>,

        /// Service tier (standard, regular, vip)
        #[arg(short, long, default_value = "standard")]
        tier: UserTier,

        /// Length budget (defaults to the tier ceiling)
        #[arg(long)]
        max_length: Option<usize>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Check configuration and provider availability
    Doctor,
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Print the configuration file path
    Path,

    /// Validate configuration file
    Validate,
}
