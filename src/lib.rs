//! Core library for the osbak scheduled backup utility.
//!
//! The crate snapshots OpenStack block-storage volumes and compute
//! instances, waits for each snapshot to complete, and purges generated
//! snapshots past a retention window. An external scheduler runs the three
//! operations in sequence; authentication happens once per batch.

pub mod config;
pub mod fanout;
pub mod instances;
pub mod openstack;
pub mod provider;
pub mod report;
pub mod retention;
pub mod test_support;
pub mod volumes;

pub use config::{BackupConfig, BackupPolicy, ConfigError};
pub use instances::{IMAGE_ACTIVE_STATUS, InstanceSnapshotOrchestrator, PollState, next_state};
pub use openstack::{OpenStackError, OpenStackProvider, OpenStackSession};
pub use provider::{
    CloudProvider, ProviderFuture, Server, ServerImage, Volume, VolumeSnapshot, snapshot_name,
};
pub use report::{
    OrchestratorError, SnapshotRunReport, SweepFailure, SweepSummary, UnitFailure, UnitOutcome,
};
pub use retention::{RetentionSweeper, eligible_for_deletion};
pub use volumes::VolumeSnapshotOrchestrator;
