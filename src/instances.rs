//! Instance snapshot orchestration.
//!
//! Mirrors the volume path, but status confirmation uses an explicit bounded
//! retry loop: a fixed number of attempts at a constant interval, no backoff.
//! Exhausting the budget is an outcome, not an error; the image usually
//! finishes on the provider's side regardless.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::BackupPolicy;
use crate::fanout;
use crate::provider::{CloudProvider, Server, snapshot_name};
use crate::report::{OrchestratorError, SnapshotRunReport, UnitFailure, UnitOutcome};

/// Image status that counts as confirmation. Comparison is case-insensitive.
pub const IMAGE_ACTIVE_STATUS: &str = "active";

/// State of the bounded image-status poll.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PollState {
    /// Still waiting; `remaining` checks are left in the budget.
    Polling {
        /// Checks left before the poll is declared exhausted.
        remaining: u32,
    },
    /// The image reported the active status.
    Confirmed,
    /// The budget ran out without observing the active status.
    Exhausted,
}

/// Advances the poll state machine after one status read.
///
/// `remaining` is the budget *including* the check that produced
/// `observed_status`, so a budget of two performs exactly two checks.
#[must_use]
pub fn next_state(remaining: u32, observed_status: &str) -> PollState {
    if observed_status.eq_ignore_ascii_case(IMAGE_ACTIVE_STATUS) {
        PollState::Confirmed
    } else if remaining <= 1 {
        PollState::Exhausted
    } else {
        PollState::Polling {
            remaining: remaining - 1,
        }
    }
}

/// Creates one image per usable server and polls each until active or the
/// retry budget is spent.
#[derive(Debug)]
pub struct InstanceSnapshotOrchestrator<P> {
    provider: Arc<P>,
    policy: BackupPolicy,
}

impl<P> InstanceSnapshotOrchestrator<P>
where
    P: CloudProvider + Send + Sync + 'static,
{
    /// Creates a new orchestrator over the shared provider session.
    #[must_use]
    pub fn new(provider: Arc<P>, policy: BackupPolicy) -> Self {
        Self { provider, policy }
    }

    /// Runs the batch: list servers, fan out, wait for every unit.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ListFailed`] when the server listing
    /// fails; no images are attempted in that case.
    pub async fn run(&self) -> Result<SnapshotRunReport, OrchestratorError> {
        let servers = self
            .provider
            .list_servers(&self.policy.server_status)
            .await
            .map_err(|err| OrchestratorError::ListFailed {
                resource: "servers",
                message: err.to_string(),
            })?;
        info!(count = servers.len(), "instances eligible for snapshot");

        let mut report = SnapshotRunReport {
            dispatched: servers.len(),
            ..SnapshotRunReport::default()
        };
        let outcomes = fanout::run_all(self.policy.concurrency, servers, |server| {
            snapshot_server(Arc::clone(&self.provider), self.policy.clone(), server)
        })
        .await;

        for outcome in outcomes {
            match &outcome {
                UnitOutcome::Failed(failure) => warn!(
                    server = %failure.resource_id,
                    error = %failure.message,
                    "instance snapshot unit failed"
                ),
                UnitOutcome::Unconfirmed { resource_id } => {
                    warn!(server = %resource_id, "image poll exhausted, retry budget spent");
                }
                UnitOutcome::Succeeded { .. } => {}
            }
            report.record(outcome);
        }
        info!(
            succeeded = report.succeeded,
            unconfirmed = report.unconfirmed,
            failed = report.failures.len(),
            "instance snapshot run finished"
        );
        Ok(report)
    }
}

/// One unit of work: request an image of `server` and poll it until active.
async fn snapshot_server<P>(provider: Arc<P>, policy: BackupPolicy, server: Server) -> UnitOutcome
where
    P: CloudProvider,
{
    let name = snapshot_name(
        &policy.snapshot_prefix,
        &server.name,
        Utc::now(),
        &policy.timestamp_format,
    );
    info!(server = %server.id, name = %name, "creating instance image");

    let image_id = match provider.create_server_image(&server.id, &name).await {
        Ok(image_id) => image_id,
        Err(err) => {
            return UnitOutcome::Failed(UnitFailure {
                resource_id: server.id,
                message: format!("create failed: {err}"),
            });
        }
    };

    match confirm_image_active(provider.as_ref(), &image_id, &policy).await {
        Ok(PollState::Confirmed) => UnitOutcome::Succeeded {
            resource_id: server.id,
        },
        Ok(_) => UnitOutcome::Unconfirmed {
            resource_id: server.id,
        },
        Err(message) => UnitOutcome::Failed(UnitFailure {
            resource_id: server.id,
            message,
        }),
    }
}

/// Polls the image status until it is active or the attempt budget is spent.
///
/// Returns the terminal [`PollState`]; a zero budget is exhausted without
/// performing any checks.
async fn confirm_image_active<P>(
    provider: &P,
    image_id: &str,
    policy: &BackupPolicy,
) -> Result<PollState, String>
where
    P: CloudProvider,
{
    let mut remaining = policy.poll_attempts;
    while remaining > 0 {
        let image = provider
            .get_image(image_id)
            .await
            .map_err(|err| format!("status read failed: {err}"))?;
        debug!(image = %image_id, status = %image.status, remaining, "image status check");

        match next_state(remaining, &image.status) {
            PollState::Confirmed => return Ok(PollState::Confirmed),
            PollState::Exhausted => return Ok(PollState::Exhausted),
            PollState::Polling { remaining: left } => {
                remaining = left;
                sleep(policy.poll_interval).await;
            }
        }
    }
    Ok(PollState::Exhausted)
}
