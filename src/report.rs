//! Run reports returned by the orchestrators and the retention sweeper.
//!
//! Counts are surfaced to the caller rather than only logged, so a
//! scheduler can alert on partial runs and on contained per-unit failures.

use thiserror::Error;

/// Outcome of one snapshot unit (create plus status confirmation).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UnitOutcome {
    /// The snapshot or image reached the usable status.
    Succeeded {
        /// Identifier of the source volume or server.
        resource_id: String,
    },
    /// The poll budget ran out before the usable status was observed. The
    /// snapshot may still complete later; this is not an error.
    Unconfirmed {
        /// Identifier of the source volume or server.
        resource_id: String,
    },
    /// The unit failed; the failure was contained and siblings continued.
    Failed(UnitFailure),
}

/// A contained failure from a single snapshot unit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnitFailure {
    /// Identifier of the source volume or server.
    pub resource_id: String,
    /// Human readable failure description.
    pub message: String,
}

/// Aggregate result of one orchestrator run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SnapshotRunReport {
    /// Number of units dispatched (one per listed resource).
    pub dispatched: usize,
    /// Units whose snapshot reached the usable status.
    pub succeeded: usize,
    /// Units whose poll budget was exhausted without confirmation.
    pub unconfirmed: usize,
    /// Contained per-unit failures.
    pub failures: Vec<UnitFailure>,
}

impl SnapshotRunReport {
    /// Folds a unit outcome into the report.
    pub fn record(&mut self, outcome: UnitOutcome) {
        match outcome {
            UnitOutcome::Succeeded { .. } => self.succeeded += 1,
            UnitOutcome::Unconfirmed { .. } => self.unconfirmed += 1,
            UnitOutcome::Failed(failure) => self.failures.push(failure),
        }
    }

    /// Returns `true` when no unit failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A delete that failed during the retention sweep. The sweep continues past
/// these.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SweepFailure {
    /// Identifier of the snapshot or image that could not be deleted.
    pub resource_id: String,
    /// Human readable failure description.
    pub message: String,
}

/// Aggregate result of one retention sweep.
///
/// Deletion counts equal the number of eligible items identified by the
/// filter; failed deletes are additionally listed in `failures`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SweepSummary {
    /// Volume snapshots eligible for deletion in this pass.
    pub volume_snapshots_deleted: usize,
    /// Instance images eligible for deletion in this pass.
    pub images_deleted: usize,
    /// Deletes that failed; the sweep continued past them.
    pub failures: Vec<SweepFailure>,
}

/// Fatal error aborting an orchestrator run or sweep pass.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OrchestratorError {
    /// Raised when the initial resource listing fails; no partial processing
    /// happens in that case.
    #[error("failed to list {resource}: {message}")]
    ListFailed {
        /// Resource kind being listed (for example `volumes`).
        resource: &'static str,
        /// Provider error description.
        message: String,
    },
}
