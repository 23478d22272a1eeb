//! Command-line interface definitions for the `hangar` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `hangar` binary.
#[derive(Debug, Parser)]
#[command(
    name = "hangar",
    about = "Reconcile, provision, and configure EC2 instances from a desired-state document",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run a deployment described by a desired-state document.
    #[command(
        name = "deploy",
        about = "Run a deployment described by a desired-state document"
    )]
    Deploy(DeployCommand),
}

/// Arguments for the `hangar deploy` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DeployCommand {
    /// Path to the JSON desired-state document.
    #[arg(value_name = "DOCUMENT")]
    pub(crate) document: String,
    /// Skip reconciliation and provisioning and configure the instances
    /// recorded in the state file.
    #[arg(long)]
    pub(crate) reuse_state: bool,
    /// Stop after the provisioned instances are recorded.
    #[arg(long)]
    pub(crate) skip_configuration: bool,
    /// Override the state file path from configuration.
    #[arg(long, value_name = "PATH")]
    pub(crate) state_file: Option<String>,
}
