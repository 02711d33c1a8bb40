//! Integration tests for the SQLite store

use ada_orchestrator::test_utils::{create_test_db, seed_data_source, seed_template};
use ada_orchestrator::{
    Machine, MachineState, NewProvider, NewTemplate, OperationFilters, OperationStatus,
    OperationType, OrchestratorError, Store,
};
use ada_provider::BackendKind;
use chrono::Utc;
use serde_json::json;

async fn store_with_machine(state: MachineState) -> (Store, Machine) {
    let store = Store::new(create_test_db().await);
    let template = seed_template(&store, BackendKind::Docker, "workspace", "physics").await;

    let now = Utc::now();
    let machine = Machine {
        id: "m-1".to_string(),
        name: "alice-62EDjx".to_string(),
        display_name: "alice-62EDjx".to_string(),
        ip: String::new(),
        hostname: String::new(),
        token: "Q3F9kTQ3F9kTQ3F9".to_string(),
        state,
        owner: "alice".to_string(),
        shared_with: Vec::new(),
        template_id: template.id,
        created_at: now,
        updated_at: now,
        error_message: None,
    };
    store.insert_machine(&machine).await.expect("Failed to insert machine");
    (store, machine)
}

#[tokio::test]
async fn test_state_writes_refuse_illegal_edges() {
    for from in MachineState::ALL {
        for to in MachineState::ALL {
            let (store, machine) = store_with_machine(from).await;
            let result = store.set_machine_state(&machine.id, from, to, None).await;

            if from.can_transition_to(to) {
                assert!(result.unwrap(), "{from} -> {to}");
                assert_eq!(store.get_machine(&machine.id).await.unwrap().unwrap().state, to);
            } else {
                assert!(
                    matches!(result, Err(OrchestratorError::Invariant(_))),
                    "{from} -> {to}"
                );
                assert_eq!(store.get_machine(&machine.id).await.unwrap().unwrap().state, from);
            }
        }
    }
}

#[tokio::test]
async fn test_state_write_checks_current_state() {
    let (store, machine) = store_with_machine(MachineState::Ready).await;

    let moved = store
        .set_machine_state(&machine.id, MachineState::Provisioning, MachineState::Failed, Some("late"))
        .await
        .unwrap();
    assert!(!moved);

    let after = store.get_machine(&machine.id).await.unwrap().unwrap();
    assert_eq!(after.state, MachineState::Ready);
    assert_eq!(after.error_message, None);
}

#[tokio::test]
async fn test_complete_provisioning_writes_address_and_state_together() {
    let (store, machine) = store_with_machine(MachineState::Provisioning).await;

    assert!(store
        .complete_provisioning(&machine.id, "10.0.0.5", "vm5.example.org")
        .await
        .unwrap());
    let ready = store.get_machine(&machine.id).await.unwrap().unwrap();
    assert_eq!(ready.state, MachineState::Ready);
    assert_eq!(ready.ip, "10.0.0.5");
    assert_eq!(ready.hostname, "vm5.example.org");

    // Only from PROVISIONING
    assert!(!store
        .complete_provisioning(&machine.id, "10.0.0.6", "")
        .await
        .unwrap());
    let still = store.get_machine(&machine.id).await.unwrap().unwrap();
    assert_eq!(still.ip, "10.0.0.5");
}

#[tokio::test]
async fn test_template_extra_data_round_trip() {
    let store = Store::new(create_test_db().await);
    let extra_data = json!({
        "flavor_name": "c2.large",
        "network_uuid": "5be315b7-7ebd-4254-97fe-18c1df501538",
        "vol_size": 200,
        "security_groups": [{"name": "HTTP"}, "SSH"],
        "nested": {"deeper": {"list": [1, 2.5, null, true, "x"], "empty": {}}},
        "unicode": "Grüße"
    });
    let provider_data = json!({
        "auth_url": "https://keystone.example.org:5000/v3",
        "username": "svc",
        "password": "secret",
        "project_name": "portal",
        "extra": {"regions": ["a", "b"]}
    });

    store
        .upsert_provider(&NewProvider {
            name: "cloud".to_string(),
            kind: BackendKind::OpenStack,
            customer: "stfc".to_string(),
            provider_data: provider_data.clone(),
        })
        .await
        .unwrap();
    let template = store
        .upsert_template(&NewTemplate {
            name: "ubuntu".to_string(),
            kind: BackendKind::OpenStack,
            image: "ubuntu-22.04".to_string(),
            description: Some("Ubuntu".to_string()),
            cpu_limit_cores: None,
            memory_limit_gb: None,
            group_name: "physics".to_string(),
            provider: "cloud".to_string(),
            extra_data: extra_data.clone(),
        })
        .await
        .unwrap();

    let loaded = store.get_template(&template.id).await.unwrap().unwrap();
    assert_eq!(loaded.extra_data, extra_data);
    assert_eq!(loaded.kind, BackendKind::OpenStack);
    assert_eq!(loaded.cpu_limit_cores, None);

    let provider = store.get_provider(&loaded.provider_id).await.unwrap().unwrap();
    assert_eq!(provider.provider_data, provider_data);

    // Credentials never leave through serialization
    let serialized = serde_json::to_value(&provider).unwrap();
    assert!(serialized.get("provider_data").is_none());
}

#[tokio::test]
async fn test_upsert_template_updates_in_place() {
    let store = Store::new(create_test_db().await);
    let first = seed_template(&store, BackendKind::Docker, "workspace", "physics").await;
    let second = seed_template(&store, BackendKind::Docker, "workspace", "biology").await;

    assert_eq!(first.id, second.id);
    assert_eq!(second.group_name, "biology");
    assert_eq!(store.list_templates().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_template_with_unknown_provider() {
    let store = Store::new(create_test_db().await);
    let result = store
        .upsert_template(&NewTemplate {
            name: "orphan".to_string(),
            kind: BackendKind::Docker,
            image: "img".to_string(),
            description: None,
            cpu_limit_cores: None,
            memory_limit_gb: None,
            group_name: String::new(),
            provider: "missing".to_string(),
            extra_data: json!({}),
        })
        .await;
    assert!(matches!(result, Err(OrchestratorError::NotFound(_))));
}

#[tokio::test]
async fn test_data_source_users_are_replaced() {
    let store = Store::new(create_test_db().await);
    let first = seed_data_source(&store, "data01", "/data/run42", &["alice", "bob"]).await;
    assert_eq!(first.users, vec!["alice", "bob"]);

    let second = seed_data_source(&store, "data01", "/data/run42", &["carol"]).await;
    assert_eq!(second.id, first.id);
    assert_eq!(second.users, vec!["carol"]);

    assert!(store.list_data_sources(Some("alice")).await.unwrap().is_empty());
    assert_eq!(store.list_data_sources(Some("carol")).await.unwrap().len(), 1);
    assert_eq!(store.list_data_sources(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_shares_and_token_reset() {
    let (store, machine) = store_with_machine(MachineState::Ready).await;

    store.add_share(&machine.id, "bob").await.unwrap();
    store.add_share(&machine.id, "bob").await.unwrap();
    store.add_share(&machine.id, "carol").await.unwrap();
    let shared = store.get_machine(&machine.id).await.unwrap().unwrap();
    assert_eq!(shared.shared_with, vec!["bob", "carol"]);
    assert_eq!(store.list_machines_for("carol").await.unwrap().len(), 1);

    store.reset_shares(&machine.id, "NEWTOKENNEWTOKEN").await.unwrap();
    let reset = store.get_machine(&machine.id).await.unwrap().unwrap();
    assert!(reset.shared_with.is_empty());
    assert_eq!(reset.token, "NEWTOKENNEWTOKEN");
    assert!(store.get_machine_by_token(&machine.token).await.unwrap().is_none());
}

#[tokio::test]
async fn test_operation_filters() {
    let (store, machine) = store_with_machine(MachineState::Ready).await;

    let create = store
        .record_operation(&machine.id, OperationType::Create, OperationStatus::Running)
        .await
        .unwrap();
    store
        .finish_operation(&create, OperationStatus::Success, None)
        .await
        .unwrap();
    store
        .record_operation(&machine.id, OperationType::Destroy, OperationStatus::Running)
        .await
        .unwrap();

    let all = store
        .list_operations(&OperationFilters::default(), None)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    let running = store
        .list_operations(
            &OperationFilters {
                status: Some(OperationStatus::Running),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].operation_type, OperationType::Destroy);

    let bobs = store
        .list_operations(&OperationFilters::default(), Some("bob"))
        .await
        .unwrap();
    assert!(bobs.is_empty());

    let closed = store
        .close_operations(&machine.id, OperationType::Destroy, OperationStatus::Failed, Some("x"))
        .await
        .unwrap();
    assert_eq!(closed, 1);
}
