//! Binary entry point for the osbak CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use osbak::{
    BackupConfig, InstanceSnapshotOrchestrator, OpenStackProvider, OrchestratorError,
    RetentionSweeper, SnapshotRunReport, VolumeSnapshotOrchestrator,
};

mod cli;
use cli::{Cli, PurgeCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error(transparent)]
    Operation(#[from] OrchestratorError),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let config =
        BackupConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let policy = config
        .policy()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let provider = Arc::new(
        OpenStackProvider::connect(&config)
            .await
            .map_err(|err| CliError::Provider(err.to_string()))?,
    );

    match cli {
        Cli::Volumes => {
            let report = VolumeSnapshotOrchestrator::new(provider, policy)
                .run()
                .await?;
            log_snapshot_report("volume snapshot batch complete", &report);
        }
        Cli::Instances => {
            let report = InstanceSnapshotOrchestrator::new(provider, policy)
                .run()
                .await?;
            log_snapshot_report("instance snapshot batch complete", &report);
        }
        Cli::Purge(PurgeCommand { dry_run }) => {
            let summary = RetentionSweeper::new(provider, policy)
                .dry_run(dry_run)
                .sweep()
                .await?;
            info!(
                volume_snapshots = summary.volume_snapshots_deleted,
                images = summary.images_deleted,
                failed_deletes = summary.failures.len(),
                dry_run,
                "retention sweep complete"
            );
        }
    }
    Ok(())
}

/// Per-unit failures are contained and already logged; they do not change
/// the process exit code.
fn log_snapshot_report(message: &str, report: &SnapshotRunReport) {
    info!(
        dispatched = report.dispatched,
        succeeded = report.succeeded,
        unconfirmed = report.unconfirmed,
        failed = report.failures.len(),
        "{message}"
    );
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use osbak::UnitFailure;

    #[test]
    fn write_error_renders_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::Config(String::from("missing OSBAK_AUTH_URL"));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(
            rendered.contains("configuration error: missing OSBAK_AUTH_URL"),
            "rendered: {rendered}"
        );
    }

    #[test]
    fn operation_errors_pass_through_unchanged() {
        let err = CliError::from(OrchestratorError::ListFailed {
            resource: "volumes",
            message: String::from("boom"),
        });
        assert_eq!(err.to_string(), "failed to list volumes: boom");
    }

    #[test]
    fn unit_failures_do_not_panic_report_logging() {
        let report = SnapshotRunReport {
            dispatched: 2,
            succeeded: 1,
            unconfirmed: 0,
            failures: vec![UnitFailure {
                resource_id: String::from("vol-bad"),
                message: String::from("create failed"),
            }],
        };
        log_snapshot_report("test", &report);
    }
}
