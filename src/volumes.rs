//! Volume snapshot orchestration.
//!
//! Lists usable volumes, fans one create-and-wait unit out per volume through
//! the bounded pool, and returns once every unit has completed. A failed unit
//! is logged and recorded on the report; it never stalls the barrier or its
//! siblings.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::BackupPolicy;
use crate::fanout;
use crate::provider::{CloudProvider, Volume, snapshot_name};
use crate::report::{OrchestratorError, SnapshotRunReport, UnitFailure, UnitOutcome};

/// Creates one snapshot per usable volume and waits for each to complete.
#[derive(Debug)]
pub struct VolumeSnapshotOrchestrator<P> {
    provider: Arc<P>,
    policy: BackupPolicy,
}

impl<P> VolumeSnapshotOrchestrator<P>
where
    P: CloudProvider + Send + Sync + 'static,
{
    /// Creates a new orchestrator over the shared provider session.
    #[must_use]
    pub fn new(provider: Arc<P>, policy: BackupPolicy) -> Self {
        Self { provider, policy }
    }

    /// Runs the batch: list, fan out, wait for every unit.
    ///
    /// Re-running creates fresh snapshots with new timestamps; creation is
    /// deliberately not idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ListFailed`] when the volume listing
    /// fails; no snapshots are attempted in that case.
    pub async fn run(&self) -> Result<SnapshotRunReport, OrchestratorError> {
        let volumes = self
            .provider
            .list_volumes(&self.policy.volume_status)
            .await
            .map_err(|err| OrchestratorError::ListFailed {
                resource: "volumes",
                message: err.to_string(),
            })?;
        info!(count = volumes.len(), "volumes eligible for snapshot");

        let mut report = SnapshotRunReport {
            dispatched: volumes.len(),
            ..SnapshotRunReport::default()
        };
        let outcomes = fanout::run_all(self.policy.concurrency, volumes, |volume| {
            snapshot_volume(Arc::clone(&self.provider), self.policy.clone(), volume)
        })
        .await;

        for outcome in outcomes {
            if let UnitOutcome::Failed(failure) = &outcome {
                warn!(
                    volume = %failure.resource_id,
                    error = %failure.message,
                    "volume snapshot unit failed"
                );
            }
            report.record(outcome);
        }
        info!(
            succeeded = report.succeeded,
            failed = report.failures.len(),
            "volume snapshot run finished"
        );
        Ok(report)
    }
}

/// One unit of work: create a snapshot of `volume` and wait for it to reach
/// the usable status.
async fn snapshot_volume<P>(provider: Arc<P>, policy: BackupPolicy, volume: Volume) -> UnitOutcome
where
    P: CloudProvider,
{
    let name = snapshot_name(
        &policy.snapshot_prefix,
        &volume.id,
        Utc::now(),
        &policy.timestamp_format,
    );
    info!(volume = %volume.id, name = %name, "creating volume snapshot");

    let snapshot = match provider.create_volume_snapshot(&volume.id, &name).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            return UnitOutcome::Failed(UnitFailure {
                resource_id: volume.id,
                message: format!("create failed: {err}"),
            });
        }
    };

    match wait_for_snapshot_status(provider.as_ref(), &snapshot.id, &policy).await {
        Ok(()) => UnitOutcome::Succeeded {
            resource_id: volume.id,
        },
        Err(message) => UnitOutcome::Failed(UnitFailure {
            resource_id: volume.id,
            message,
        }),
    }
}

/// Polls the snapshot until it reaches the usable status or the bounded wait
/// elapses.
async fn wait_for_snapshot_status<P>(
    provider: &P,
    snapshot_id: &str,
    policy: &BackupPolicy,
) -> Result<(), String>
where
    P: CloudProvider,
{
    let deadline = Instant::now() + policy.snapshot_wait;
    loop {
        let snapshot = provider
            .get_volume_snapshot(snapshot_id)
            .await
            .map_err(|err| format!("status read failed: {err}"))?;

        if snapshot.status.eq_ignore_ascii_case(&policy.volume_status) {
            return Ok(());
        }

        if Instant::now() > deadline {
            return Err(format!(
                "snapshot {snapshot_id} did not reach '{}' within {}s",
                policy.volume_status,
                policy.snapshot_wait.as_secs()
            ));
        }

        sleep(policy.poll_interval).await;
    }
}
