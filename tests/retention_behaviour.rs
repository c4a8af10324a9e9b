//! Behavioural tests for the retention sweeper.

use std::sync::Arc;

use chrono::{Duration, Utc};

use osbak::test_support::{FakeProvider, fast_policy};
use osbak::{OrchestratorError, RetentionSweeper};

fn sweeper(provider: &Arc<FakeProvider>) -> RetentionSweeper<FakeProvider> {
    RetentionSweeper::new(Arc::clone(provider), fast_policy())
}

fn days_ago(days: i64) -> chrono::DateTime<Utc> {
    Utc::now() - Duration::days(days)
}

#[tokio::test]
async fn deletes_only_prefixed_resources_past_retention() {
    let provider = Arc::new(FakeProvider::new());
    // Old but not ours: never touched regardless of age.
    provider.push_existing_volume_snapshot("snap-1", "snap_myvol_20230101", days_ago(400));
    // Ours and expired.
    provider.push_existing_volume_snapshot("snap-2", "snapshot_myvol_20230101", days_ago(15));
    // Ours but fresh.
    provider.push_existing_volume_snapshot("snap-3", "snapshot_myvol_20230601", days_ago(10));

    let summary = sweeper(&provider).sweep().await.expect("sweep succeeds");

    assert_eq!(summary.volume_snapshots_deleted, 1);
    assert_eq!(summary.images_deleted, 0);
    assert!(summary.failures.is_empty());
    assert_eq!(provider.deleted_ids(), vec!["snap-2"]);
}

#[tokio::test]
async fn counts_volume_and_image_passes_independently() {
    let provider = Arc::new(FakeProvider::new());
    provider.push_existing_volume_snapshot("snap-1", "snapshot_a_1", days_ago(20));
    provider.push_existing_volume_snapshot("snap-2", "snapshot_b_1", days_ago(21));
    provider.push_existing_image("img-1", "snapshot_web_1", days_ago(30));
    provider.push_existing_image("img-2", "golden-image", days_ago(300));

    let summary = sweeper(&provider).sweep().await.expect("sweep succeeds");

    assert_eq!(summary.volume_snapshots_deleted, 2);
    assert_eq!(summary.images_deleted, 1);
    let deleted = provider.deleted_ids();
    assert_eq!(deleted, vec!["snap-1", "snap-2", "img-1"]);
}

#[tokio::test]
async fn delete_failures_do_not_abort_the_sweep() {
    let provider = Arc::new(FakeProvider::new());
    provider.push_existing_volume_snapshot("snap-1", "snapshot_a_1", days_ago(20));
    provider.push_existing_volume_snapshot("snap-2", "snapshot_b_1", days_ago(20));
    provider.push_existing_image("img-1", "snapshot_web_1", days_ago(20));
    provider.fail_delete("snap-1");

    let summary = sweeper(&provider).sweep().await.expect("sweep succeeds");

    // Counts reflect the eligible set; the failed delete is surfaced
    // separately.
    assert_eq!(summary.volume_snapshots_deleted, 2);
    assert_eq!(summary.images_deleted, 1);
    assert_eq!(summary.failures.len(), 1);
    let failure = summary.failures.first().expect("one failure");
    assert_eq!(failure.resource_id, "snap-1");

    // The sweep carried on past the failure.
    assert!(provider.deleted_ids().contains(&String::from("snap-2")));
    assert!(provider.deleted_ids().contains(&String::from("img-1")));
}

#[tokio::test]
async fn dry_run_reports_without_deleting() {
    let provider = Arc::new(FakeProvider::new());
    provider.push_existing_volume_snapshot("snap-1", "snapshot_a_1", days_ago(20));
    provider.push_existing_image("img-1", "snapshot_web_1", days_ago(20));

    let summary = sweeper(&provider)
        .dry_run(true)
        .sweep()
        .await
        .expect("sweep succeeds");

    assert_eq!(summary.volume_snapshots_deleted, 1);
    assert_eq!(summary.images_deleted, 1);
    assert!(provider.deleted_ids().is_empty());
}

#[tokio::test]
async fn snapshot_list_failure_aborts_before_any_delete() {
    let provider = Arc::new(FakeProvider::new());
    provider.push_existing_volume_snapshot("snap-1", "snapshot_a_1", days_ago(20));
    provider.fail_list_volume_snapshots();

    let err = sweeper(&provider).sweep().await.expect_err("listing fails");

    assert!(matches!(
        err,
        OrchestratorError::ListFailed { resource, .. } if resource == "volume snapshots"
    ));
    assert!(provider.deleted_ids().is_empty());
}

#[tokio::test]
async fn image_list_failure_aborts_the_second_pass() {
    let provider = Arc::new(FakeProvider::new());
    provider.push_existing_volume_snapshot("snap-1", "snapshot_a_1", days_ago(20));
    provider.fail_list_images();

    let err = sweeper(&provider).sweep().await.expect_err("listing fails");

    assert!(matches!(
        err,
        OrchestratorError::ListFailed { resource, .. } if resource == "images"
    ));
    // The volume pass already ran.
    assert_eq!(provider.deleted_ids(), vec!["snap-1"]);
}
