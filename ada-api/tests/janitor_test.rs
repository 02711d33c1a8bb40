//! Integration tests for the janitor expiry sweep

use ada_api::janitor::cleanup_expired_machines;
use ada_orchestrator::test_utils::{seed_template, TestHarness};
use ada_orchestrator::{Actor, ExpiryRule, MachineState};
use ada_provider::BackendKind;

fn rule(group: &str, max_age_hours: u32) -> ExpiryRule {
    ExpiryRule {
        group: group.to_string(),
        max_age_hours,
    }
}

#[tokio::test]
async fn test_janitor_destroys_expired_machines() {
    let harness = TestHarness::new().await;
    seed_template(&harness.store, BackendKind::Docker, "workspace", "physics").await;
    let machine = harness
        .provisioned_machine("workspace", &Actor::user("alice"))
        .await;

    cleanup_expired_machines(&harness.machines, &[rule("physics", 0)], false)
        .await
        .expect("Sweep failed");
    harness.registry.wait_idle().await;

    assert_eq!(harness.machine(&machine.id).await.state, MachineState::Deleted);
    assert!(harness
        .backends
        .docker
        .calls
        .contains(&format!("rm {}", machine.name)));
}

#[tokio::test]
async fn test_janitor_ignores_young_machines() {
    let harness = TestHarness::new().await;
    seed_template(&harness.store, BackendKind::Docker, "workspace", "physics").await;
    let machine = harness
        .provisioned_machine("workspace", &Actor::user("alice"))
        .await;

    cleanup_expired_machines(&harness.machines, &[rule("physics", 24)], false)
        .await
        .unwrap();
    harness.registry.wait_idle().await;

    assert_eq!(harness.machine(&machine.id).await.state, MachineState::Ready);
}

#[tokio::test]
async fn test_janitor_dry_run_keeps_machines() {
    let harness = TestHarness::new().await;
    seed_template(&harness.store, BackendKind::Docker, "workspace", "physics").await;
    let machine = harness
        .provisioned_machine("workspace", &Actor::user("alice"))
        .await;

    cleanup_expired_machines(&harness.machines, &[rule("physics", 0)], true)
        .await
        .unwrap();

    assert_eq!(harness.machine(&machine.id).await.state, MachineState::Ready);
    assert!(harness.registry.is_empty());
}
