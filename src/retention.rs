//! Age-based retention sweep for generated snapshots and images.
//!
//! Two sequential passes: volume snapshots, then instance images. The name
//! prefix is the sole eligibility criterion besides age; resources without it
//! are never touched. Delete failures are collected and reported, never
//! fatal to the sweep.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::config::BackupPolicy;
use crate::instances::IMAGE_ACTIVE_STATUS;
use crate::provider::CloudProvider;
use crate::report::{OrchestratorError, SweepFailure, SweepSummary};

/// Returns `true` when a snapshot or image should be purged.
///
/// Eligibility requires both the generated-name prefix and an age of at
/// least the retention window.
#[must_use]
pub fn eligible_for_deletion(
    name: &str,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    prefix: &str,
    retention: Duration,
) -> bool {
    name.starts_with(prefix) && now.signed_duration_since(created_at) >= retention
}

/// Deletes generated snapshots and images past the retention window.
#[derive(Debug)]
pub struct RetentionSweeper<P> {
    provider: Arc<P>,
    policy: BackupPolicy,
    dry_run: bool,
}

impl<P> RetentionSweeper<P>
where
    P: CloudProvider,
{
    /// Creates a new sweeper over the shared provider session.
    #[must_use]
    pub fn new(provider: Arc<P>, policy: BackupPolicy) -> Self {
        Self {
            provider,
            policy,
            dry_run: false,
        }
    }

    /// Reports eligible resources without issuing any deletes.
    #[must_use]
    pub const fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Runs both passes and returns the deletion counts.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ListFailed`] when either listing fails.
    /// Individual delete failures are collected on the summary instead.
    pub async fn sweep(&self) -> Result<SweepSummary, OrchestratorError> {
        let retention = Duration::hours(i64::from(self.policy.retention_hours));
        let now = Utc::now();
        let mut summary = SweepSummary::default();

        let snapshots = self
            .provider
            .list_volume_snapshots(&self.policy.volume_status)
            .await
            .map_err(|err| OrchestratorError::ListFailed {
                resource: "volume snapshots",
                message: err.to_string(),
            })?;
        info!(count = snapshots.len(), "volume snapshots found");

        for snapshot in &snapshots {
            if !eligible_for_deletion(
                &snapshot.name,
                snapshot.created_at,
                now,
                &self.policy.snapshot_prefix,
                retention,
            ) {
                continue;
            }
            summary.volume_snapshots_deleted += 1;
            info!(snapshot = %snapshot.id, name = %snapshot.name, dry_run = self.dry_run, "retention window exceeded");
            if self.dry_run {
                continue;
            }
            if let Err(err) = self.provider.delete_volume_snapshot(&snapshot.id).await {
                warn!(snapshot = %snapshot.id, error = %err, "volume snapshot delete failed");
                summary.failures.push(SweepFailure {
                    resource_id: snapshot.id.clone(),
                    message: err.to_string(),
                });
            }
        }
        info!(
            deleted = summary.volume_snapshots_deleted,
            "volume snapshot pass finished"
        );

        let images = self
            .provider
            .list_images(IMAGE_ACTIVE_STATUS)
            .await
            .map_err(|err| OrchestratorError::ListFailed {
                resource: "images",
                message: err.to_string(),
            })?;
        info!(count = images.len(), "instance images found");

        for image in &images {
            if !eligible_for_deletion(
                &image.name,
                image.created_at,
                now,
                &self.policy.snapshot_prefix,
                retention,
            ) {
                continue;
            }
            summary.images_deleted += 1;
            info!(image = %image.id, name = %image.name, dry_run = self.dry_run, "retention window exceeded");
            if self.dry_run {
                continue;
            }
            if let Err(err) = self.provider.delete_image(&image.id).await {
                warn!(image = %image.id, error = %err, "image delete failed");
                summary.failures.push(SweepFailure {
                    resource_id: image.id.clone(),
                    message: err.to_string(),
                });
            }
        }
        info!(deleted = summary.images_deleted, "image pass finished");

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn at(days_ago: i64, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(days_ago)
    }

    #[rstest]
    #[case("snap_myvol_20230101", 400, false)]
    #[case("snapshot_myvol_20230101", 15, true)]
    #[case("snapshot_myvol_20230101", 10, false)]
    #[case("snapshot_myvol_20230101", 14, true)]
    fn eligibility_requires_prefix_and_age(
        #[case] name: &str,
        #[case] age_days: i64,
        #[case] expected: bool,
    ) {
        let now = Utc::now();
        let eligible = eligible_for_deletion(
            name,
            at(age_days, now),
            now,
            "snapshot_",
            Duration::hours(336),
        );
        assert_eq!(eligible, expected, "name {name}, age {age_days}d");
    }
}
