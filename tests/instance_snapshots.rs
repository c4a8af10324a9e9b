//! Behavioural tests for the instance snapshot orchestrator.

use std::sync::Arc;

use osbak::test_support::{FakeCall, FakeProvider, fast_policy};
use osbak::{InstanceSnapshotOrchestrator, OrchestratorError};

fn orchestrator(provider: &Arc<FakeProvider>) -> InstanceSnapshotOrchestrator<FakeProvider> {
    InstanceSnapshotOrchestrator::new(Arc::clone(provider), fast_policy())
}

#[tokio::test]
async fn creates_one_image_per_usable_server_named_after_it() {
    let provider = Arc::new(FakeProvider::new());
    provider.push_server("srv-1", "web-frontend", "ACTIVE");
    provider.push_server("srv-2", "db-primary", "ACTIVE");

    let report = orchestrator(&provider).run().await.expect("run succeeds");

    assert_eq!(report.dispatched, 2);
    assert_eq!(report.succeeded, 2);

    let names = provider.created_image_names();
    assert_eq!(names.len(), 2);
    assert!(
        names
            .iter()
            .any(|name| name.starts_with("snapshot_web-frontend_")),
        "names: {names:?}"
    );
    assert!(
        names
            .iter()
            .any(|name| name.starts_with("snapshot_db-primary_")),
        "names: {names:?}"
    );
}

#[tokio::test]
async fn zero_servers_returns_immediately() {
    let provider = Arc::new(FakeProvider::new());

    let report = orchestrator(&provider).run().await.expect("run succeeds");

    assert_eq!(report.dispatched, 0);
    assert_eq!(
        provider.calls(),
        vec![FakeCall::ListServers {
            status: String::from("ACTIVE")
        }]
    );
}

#[tokio::test]
async fn list_failure_aborts_the_operation() {
    let provider = Arc::new(FakeProvider::new());
    provider.push_server("srv-1", "web", "ACTIVE");
    provider.fail_list_servers();

    let err = orchestrator(&provider)
        .run()
        .await
        .expect_err("listing fails");

    assert!(matches!(err, OrchestratorError::ListFailed { resource, .. } if resource == "servers"));
    assert!(provider.created_image_names().is_empty());
}

#[tokio::test]
async fn slow_image_confirms_once_it_reports_active() {
    let provider = Arc::new(FakeProvider::new());
    provider.push_server("srv-1", "web", "ACTIVE");
    provider.script_image_statuses("image-of-srv-1", &["queued", "saving", "ACTIVE"]);

    let report = orchestrator(&provider).run().await.expect("run succeeds");

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.unconfirmed, 0);
    let checks = provider
        .calls()
        .into_iter()
        .filter(|call| matches!(call, FakeCall::GetImage { .. }))
        .count();
    assert_eq!(checks, 3);
}

#[tokio::test]
async fn exhausted_polls_are_reported_but_not_failures() {
    let provider = Arc::new(FakeProvider::new());
    provider.push_server("srv-1", "web", "ACTIVE");
    provider.push_server("srv-2", "db", "ACTIVE");
    provider.hold_image_status("image-of-srv-1", "saving");
    let mut policy = fast_policy();
    policy.poll_attempts = 2;

    let orchestrator = InstanceSnapshotOrchestrator::new(Arc::clone(&provider), policy);
    let report = orchestrator.run().await.expect("run succeeds");

    assert_eq!(report.dispatched, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.unconfirmed, 1);
    assert!(report.is_clean());
}

#[tokio::test]
async fn create_failures_are_contained_per_unit() {
    let provider = Arc::new(FakeProvider::new());
    provider.push_server("srv-1", "web", "ACTIVE");
    provider.push_server("srv-2", "db", "ACTIVE");
    provider.fail_create_for_server("srv-2");

    let report = orchestrator(&provider).run().await.expect("run succeeds");

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failures.len(), 1);
    let failure = report.failures.first().expect("one failure");
    assert_eq!(failure.resource_id, "srv-2");
}
