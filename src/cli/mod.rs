//! Command-line interface definitions for the `osbak` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `osbak` binary.
#[derive(Debug, Parser)]
#[command(
    name = "osbak",
    about = "Snapshot OpenStack volumes and instances, and purge expired snapshots",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Snapshot every usable block-storage volume and wait for completion.
    #[command(name = "volumes", about = "Create snapshots of usable volumes")]
    Volumes,
    /// Create an image of every usable compute instance.
    #[command(name = "instances", about = "Create images of usable instances")]
    Instances,
    /// Delete generated snapshots and images past the retention window.
    #[command(name = "purge", about = "Delete expired generated snapshots")]
    Purge(PurgeCommand),
}

/// Arguments for the `osbak purge` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct PurgeCommand {
    /// Report what would be deleted without issuing any deletes.
    #[arg(long)]
    pub(crate) dry_run: bool,
}
