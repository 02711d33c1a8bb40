//! Integration tests for data transfers

use ada_orchestrator::test_utils::{seed_data_source, seed_template, TestHarness};
use ada_orchestrator::transfer::rsync_command;
use ada_orchestrator::{
    Actor, DataSource, JobState, Machine, MachineState, OrchestratorError, TransferSettings,
};
use ada_provider::BackendKind;

struct Fixture {
    harness: TestHarness,
    source: DataSource,
    machine: Machine,
}

async fn fixture() -> Fixture {
    let harness = TestHarness::new().await;
    seed_template(&harness.store, BackendKind::Docker, "workspace", "physics").await;
    let source = seed_data_source(&harness.store, "data01.example.org", "/data/run42", &["alice"]).await;
    let machine = harness
        .provisioned_machine("workspace", &Actor::user("alice"))
        .await;
    assert_eq!(machine.state, MachineState::Ready);

    Fixture {
        harness,
        source,
        machine,
    }
}

async fn job_count(harness: &TestHarness) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM data_transfer_jobs")
        .fetch_one(harness.store.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_transfer_copies_source_onto_machine() {
    let Fixture {
        harness,
        source,
        machine,
    } = fixture().await;
    let alice = Actor::user("alice");

    let job = harness
        .transfers
        .start_transfer(&source.id, &machine.id, &alice)
        .await
        .expect("Failed to start transfer");
    assert_eq!(job.state, JobState::Running);
    assert_eq!(job.finish_date, None);

    harness.registry.wait_for(&job.id).await;
    let done = harness.store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(done.state, JobState::Done);
    assert!(done.finish_date.is_some());
    assert_eq!(done.error_message, None);

    let calls = harness.executor.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].user, "root");
    assert_eq!(calls[0].host, "data01.example.org");
    assert_eq!(
        calls[0].command,
        rsync_command("/data/run42", "ubuntu", "172.18.0.7", "")
    );

    let copied = harness
        .transfers
        .copied_sources(&machine.id, &alice)
        .await
        .unwrap();
    assert_eq!(copied, vec!["data01.example.org:/data/run42"]);
}

#[tokio::test]
async fn test_transfer_settings_shape_the_command() {
    let Fixture {
        harness,
        source,
        machine,
    } = fixture().await;

    let transfers = harness.transfers.clone().with_settings(TransferSettings {
        source_user: "datamover".to_string(),
        dest_user: "scientist".to_string(),
        dest_dir: "incoming".to_string(),
    });
    let job = transfers
        .start_transfer(&source.id, &machine.id, &Actor::user("alice"))
        .await
        .unwrap();
    harness.registry.wait_for(&job.id).await;

    let calls = harness.executor.calls();
    assert_eq!(calls[0].user, "datamover");
    assert!(calls[0].command.ends_with("/data/run42 scientist@172.18.0.7:incoming"));
}

#[tokio::test]
async fn test_failed_copy_marks_job_failed() {
    let Fixture {
        harness,
        source,
        machine,
    } = fixture().await;
    harness.executor.fail_with("rsync error: some files could not be transferred (code 23)");
    let alice = Actor::user("alice");

    let job = harness
        .transfers
        .start_transfer(&source.id, &machine.id, &alice)
        .await
        .unwrap();
    harness.registry.wait_for(&job.id).await;

    let failed = harness.store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(failed.state, JobState::Failed);
    assert!(failed.finish_date.is_some());
    assert!(failed.error_message.unwrap().contains("code 23"));

    assert!(harness
        .transfers
        .copied_sources(&machine.id, &alice)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_source_not_granted_is_forbidden() {
    let Fixture {
        harness,
        source,
        machine,
    } = fixture().await;
    let bob = Actor::user("bob");
    harness.machines.accept_share(&machine.token, &bob).await.unwrap();

    let result = harness
        .transfers
        .start_transfer(&source.id, &machine.id, &bob)
        .await;
    assert!(matches!(result, Err(OrchestratorError::Forbidden(_))));
    assert_eq!(job_count(&harness).await, 0);
    assert!(harness.executor.calls().is_empty());
}

#[tokio::test]
async fn test_foreign_machine_is_forbidden() {
    let Fixture {
        harness,
        machine,
        ..
    } = fixture().await;
    let shared_source =
        seed_data_source(&harness.store, "data02.example.org", "/data/public", &["alice", "bob"]).await;

    let result = harness
        .transfers
        .start_transfer(&shared_source.id, &machine.id, &Actor::user("bob"))
        .await;
    assert!(matches!(result, Err(OrchestratorError::Forbidden(_))));
    assert_eq!(job_count(&harness).await, 0);
}

#[tokio::test]
async fn test_missing_source_or_machine() {
    let Fixture {
        harness,
        source,
        machine,
    } = fixture().await;
    let alice = Actor::user("alice");

    let result = harness
        .transfers
        .start_transfer("no-such-source", &machine.id, &alice)
        .await;
    assert!(matches!(result, Err(OrchestratorError::NotFound(_))));

    let result = harness
        .transfers
        .start_transfer(&source.id, "no-such-machine", &alice)
        .await;
    assert!(matches!(result, Err(OrchestratorError::NotFound(_))));
    assert_eq!(job_count(&harness).await, 0);
}

#[tokio::test]
async fn test_machine_must_be_ready() {
    let Fixture {
        harness,
        source,
        ..
    } = fixture().await;
    let alice = Actor::user("alice");
    harness.backends.docker.gate.close();
    let provisioning = harness
        .machines
        .create_machine("workspace", &alice)
        .await
        .unwrap();

    let result = harness
        .transfers
        .start_transfer(&source.id, &provisioning.id, &alice)
        .await;
    assert!(matches!(result, Err(OrchestratorError::Forbidden(_))));
    assert_eq!(job_count(&harness).await, 0);

    harness.backends.docker.gate.release();
    harness.registry.wait_idle().await;
}

#[tokio::test]
async fn test_unsafe_source_directory_is_rejected() {
    let Fixture {
        harness,
        machine,
        ..
    } = fixture().await;
    let source = seed_data_source(
        &harness.store,
        "data01.example.org",
        "/data/run42; rm -rf ~",
        &["alice"],
    )
    .await;

    let result = harness
        .transfers
        .start_transfer(&source.id, &machine.id, &Actor::user("alice"))
        .await;
    assert!(matches!(result, Err(OrchestratorError::Validation(_))));
    assert_eq!(job_count(&harness).await, 0);
}

#[tokio::test]
async fn test_admin_may_transfer_anywhere() {
    let Fixture {
        harness,
        source,
        machine,
    } = fixture().await;

    let job = harness
        .transfers
        .start_transfer(&source.id, &machine.id, &Actor::admin("root"))
        .await
        .unwrap();
    harness.registry.wait_for(&job.id).await;
    assert_eq!(job.user, "root");
}

#[tokio::test]
async fn test_dismiss_twice_is_a_no_op() {
    let Fixture {
        harness,
        source,
        machine,
    } = fixture().await;
    let alice = Actor::user("alice");

    let job = harness
        .transfers
        .start_transfer(&source.id, &machine.id, &alice)
        .await
        .unwrap();
    harness.registry.wait_for(&job.id).await;
    assert_eq!(harness.transfers.list_visible_jobs(&alice).await.unwrap().len(), 1);

    let result = harness
        .transfers
        .dismiss_transfer(&job.id, &Actor::user("bob"))
        .await;
    assert!(matches!(result, Err(OrchestratorError::Forbidden(_))));

    let hidden = harness.transfers.dismiss_transfer(&job.id, &alice).await.unwrap();
    assert_eq!(hidden.state, JobState::Hidden);
    let again = harness.transfers.dismiss_transfer(&job.id, &alice).await.unwrap();
    assert_eq!(again.state, JobState::Hidden);
    assert_eq!(again.finish_date, hidden.finish_date);

    assert!(harness.transfers.list_visible_jobs(&alice).await.unwrap().is_empty());
    assert!(matches!(
        harness.transfers.dismiss_transfer("no-such-job", &alice).await,
        Err(OrchestratorError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_dismissed_running_job_keeps_running() {
    let Fixture {
        harness,
        source,
        machine,
    } = fixture().await;
    let alice = Actor::user("alice");
    harness.executor.hold();

    let job = harness
        .transfers
        .start_transfer(&source.id, &machine.id, &alice)
        .await
        .unwrap();
    let hidden = harness.transfers.dismiss_transfer(&job.id, &alice).await.unwrap();
    assert_eq!(hidden.state, JobState::Hidden);
    assert_eq!(hidden.finish_date, None);
    assert!(harness.registry.is_active(&job.id));

    harness.executor.release();
    harness.registry.wait_for(&job.id).await;

    let finished = harness.store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(finished.state, JobState::Hidden);
    assert!(finished.finish_date.is_some());
    assert_eq!(
        harness
            .transfers
            .copied_sources(&machine.id, &alice)
            .await
            .unwrap(),
        vec!["data01.example.org:/data/run42"]
    );
}

#[tokio::test]
async fn test_reconcile_fails_running_jobs() {
    let Fixture {
        harness,
        source,
        machine,
    } = fixture().await;
    let alice = Actor::user("alice");
    harness.executor.hold();

    let job = harness
        .transfers
        .start_transfer(&source.id, &machine.id, &alice)
        .await
        .unwrap();

    let report = harness.machines.reconcile().await.unwrap();
    assert_eq!(report.failed_jobs, 1);

    let failed = harness.store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(failed.state, JobState::Failed);
    assert!(failed.finish_date.is_some());

    // The interrupted copy finishing later doesn't overwrite the outcome
    harness.executor.release();
    harness.registry.wait_for(&job.id).await;
    let after = harness.store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(after.state, JobState::Failed);
}

#[tokio::test]
async fn test_reconcile_fails_dismissed_running_job() {
    let Fixture {
        harness,
        source,
        machine,
    } = fixture().await;
    let alice = Actor::user("alice");
    harness.executor.hold();

    let job = harness
        .transfers
        .start_transfer(&source.id, &machine.id, &alice)
        .await
        .unwrap();
    harness.transfers.dismiss_transfer(&job.id, &alice).await.unwrap();

    let report = harness.machines.reconcile().await.unwrap();
    assert_eq!(report.failed_jobs, 1);

    let failed = harness.store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(failed.state, JobState::Hidden);
    assert!(failed.finish_date.is_some());
    assert_eq!(
        failed.error_message.as_deref(),
        Some("transfer interrupted by restart")
    );

    harness.executor.release();
    harness.registry.wait_for(&job.id).await;
    let after = harness.store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(after.state, JobState::Hidden);
    assert_eq!(after.finish_date, failed.finish_date);
    assert_eq!(after.error_message, failed.error_message);
}

#[tokio::test]
async fn test_data_sources_listed_per_user() {
    let Fixture { harness, .. } = fixture().await;
    seed_data_source(&harness.store, "data02.example.org", "/data/other", &["bob"]).await;

    let alice = harness
        .transfers
        .list_data_sources(&Actor::user("alice"))
        .await
        .unwrap();
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].location(), "data01.example.org:/data/run42");

    let admin = harness
        .transfers
        .list_data_sources(&Actor::admin("root"))
        .await
        .unwrap();
    assert_eq!(admin.len(), 2);
}
