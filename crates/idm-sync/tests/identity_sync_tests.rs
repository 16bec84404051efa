//! Identity Synchronization Tests
//!
//! Identity runs through the engine: situation policies, default role,
//! workflows, extended attributes and account updates.

mod common;

use idm_connector::{AttributeSet, Uid};
use serde_json::json;

use common::Harness;
use idm_sync::model::{Identity, IdentityContract, IdentityFilter, IdentityRoleFilter, Role};
use idm_sync::services::{FormDefinition, FormOwner, FormService};
use idm_sync::{
    AttributeMapping, CasePolicy, EntityField, EntityKind, IdentitySyncOptions, LinkedAction,
    MissingAccountAction, MissingEntityAction, OperationResult, Repository, SyncActionType,
    SyncConfig, SyncKindConfig, UnlinkedAction,
};

const CLASS: &str = "person";

fn config(harness: &Harness, options: IdentitySyncOptions) -> SyncConfig {
    SyncConfig::new(
        "hr-persons",
        harness.system,
        CLASS,
        SyncKindConfig::Identity(options),
        vec![
            AttributeMapping::entity("login", EntityField::Username).as_uid(),
            AttributeMapping::entity("first", EntityField::FirstName),
            AttributeMapping::entity("mail", EntityField::Email)
                .with_transform_from("attributeValue.to_lower()"),
            AttributeMapping::extended("site", "site"),
        ],
        "login",
    )
    .with_reconciliation(true)
}

fn person(harness: &Harness, login: &str, first: &str) {
    harness.put(
        CLASS,
        login,
        AttributeSet::new()
            .with("first", first)
            .with("mail", format!("{}@EXAMPLE.ORG", login.to_uppercase()))
            .with("site", "Brno"),
    );
}

async fn identity(harness: &Harness, username: &str) -> Option<Identity> {
    harness
        .store
        .identities
        .find_one(&IdentityFilter::by_username(username))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_create_maps_fields_and_extended_attributes() {
    let harness = Harness::new();
    person(&harness, "alice", "Alice");
    let id = harness
        .save_config(config(&harness, IdentitySyncOptions::default()))
        .await;

    let summary = harness.engine.process(id).await.unwrap();

    assert!(!summary.contains_error());
    let alice = identity(&harness, "alice").await.unwrap();
    assert_eq!(alice.first_name.as_deref(), Some("Alice"));
    assert_eq!(alice.email.as_deref(), Some("alice@example.org"));

    let eav = harness
        .services
        .forms
        .get_values(
            FormOwner::new(EntityKind::Identity, alice.id),
            &FormDefinition::main(EntityKind::Identity),
        )
        .await
        .unwrap();
    assert_eq!(eav.get("site"), Some(&json!("Brno")));

    let items = harness.items(summary.log.id, SyncActionType::CreateEntity).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].entity, Some(alice.id));
    assert_eq!(items[0].display_name.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_default_role_cannot_be_granted_on_create() {
    let harness = Harness::new();
    let role = harness.store.roles.save(Role::new("employee")).await.unwrap();
    person(&harness, "alice", "Alice");
    let options = IdentitySyncOptions {
        default_role: Some(role.id),
        ..IdentitySyncOptions::default()
    };
    let id = harness.save_config(config(&harness, options)).await;

    let summary = harness.engine.process(id).await.unwrap();

    assert!(!summary.contains_error());
    let items = harness.items(summary.log.id, SyncActionType::CreateEntity).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].result, OperationResult::Warning);
    assert!(items[0].message.contains("no contract"));
    assert!(identity(&harness, "alice").await.is_some());
}

#[tokio::test]
async fn test_default_role_granted_on_prime_contract_when_linking() {
    let harness = Harness::new();
    let role = harness.store.roles.save(Role::new("employee")).await.unwrap();
    let alice = harness.store.identities.save(Identity::new("alice")).await.unwrap();
    let mut contract = IdentityContract::new(alice.id);
    contract.main = true;
    contract.valid_from = Some(common::day(-30));
    let contract = harness.store.contracts.save(contract).await.unwrap();
    person(&harness, "alice", "Alice");
    let options = IdentitySyncOptions {
        default_role: Some(role.id),
        start_auto_role_rec: true,
    };
    let id = harness.save_config(config(&harness, options)).await;

    let summary = harness.engine.process(id).await.unwrap();

    assert_eq!(
        harness
            .count(summary.log.id, SyncActionType::Link, OperationResult::Success)
            .await,
        1
    );
    let assignments = harness
        .store
        .identity_roles
        .find(&IdentityRoleFilter {
            identity: Some(alice.id),
            ..IdentityRoleFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].contract, contract.id);
    assert_eq!(assignments[0].role, role.id);
    assert_eq!(assignments[0].valid_from, Some(common::day(-30)));
    assert_eq!(harness.automatic_roles.recalculated(), vec![alice.id]);

    // A second run updates the linked identity without a duplicate assignment.
    let summary = harness.engine.process(id).await.unwrap();
    assert_eq!(summary.count(SyncActionType::UpdateEntity), 1);
    assert_eq!(
        harness
            .store
            .identity_roles
            .count(&IdentityRoleFilter {
                identity: Some(alice.id),
                ..IdentityRoleFilter::default()
            })
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_workflow_replaces_the_action() {
    let harness = Harness::new();
    person(&harness, "alice", "Alice");
    let mut config = config(&harness, IdentitySyncOptions::default());
    config.missing_entity =
        CasePolicy::new(MissingEntityAction::CreateEntity).with_workflow("approve-new-identity");
    let id = harness.save_config(config).await;

    let summary = harness.engine.process(id).await.unwrap();

    assert_eq!(
        harness
            .count(summary.log.id, SyncActionType::CreateEntity, OperationResult::Wf)
            .await,
        1
    );
    assert!(identity(&harness, "alice").await.is_none());
    let started = harness.workflows.started();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].definition_key, "approve-new-identity");
    assert_eq!(started[0].variables["situation"], json!("missing_entity"));
    assert_eq!(started[0].variables["uid"], json!("alice"));
}

#[tokio::test]
async fn test_ignored_missing_entity_is_logged_under_its_action() {
    let harness = Harness::new();
    person(&harness, "alice", "Alice");
    let id = harness
        .save_config(
            config(&harness, IdentitySyncOptions::default())
                .with_missing_entity(MissingEntityAction::Ignore),
        )
        .await;

    let summary = harness.engine.process(id).await.unwrap();

    assert_eq!(
        harness
            .count(summary.log.id, SyncActionType::MissingEntity, OperationResult::Ignore)
            .await,
        1
    );
    assert!(identity(&harness, "alice").await.is_none());
}

#[tokio::test]
async fn test_link_and_update_entity() {
    let harness = Harness::new();
    harness.store.identities.save(Identity::new("alice")).await.unwrap();
    person(&harness, "alice", "Alice");
    let id = harness
        .save_config(
            config(&harness, IdentitySyncOptions::default())
                .with_unlinked(UnlinkedAction::LinkAndUpdateEntity),
        )
        .await;

    let summary = harness.engine.process(id).await.unwrap();

    assert_eq!(summary.count(SyncActionType::LinkAndUpdateEntity), 1);
    let alice = identity(&harness, "alice").await.unwrap();
    assert_eq!(alice.first_name.as_deref(), Some("Alice"));
    let account = harness
        .store
        .find_account(harness.system, "alice", EntityKind::Identity)
        .await
        .unwrap();
    assert!(account.is_some());
}

#[tokio::test]
async fn test_update_account_pushes_entity_values() {
    let harness = Harness::new();
    person(&harness, "alice", "Alice");
    let id = harness
        .save_config(config(&harness, IdentitySyncOptions::default()))
        .await;
    harness.engine.process(id).await.unwrap();

    let mut alice = identity(&harness, "alice").await.unwrap();
    alice.first_name = Some("Alicia".into());
    harness.store.identities.save(alice).await.unwrap();
    let mut config = harness.config(id).await;
    config.linked = CasePolicy::new(LinkedAction::UpdateAccount);
    harness.save_config(config).await;

    let summary = harness.engine.process(id).await.unwrap();

    assert!(!summary.contains_error());
    assert_eq!(summary.count(SyncActionType::UpdateAccount), 1);
    let row = harness
        .connector
        .attributes(CLASS, &Uid::from_value("alice"))
        .unwrap();
    assert_eq!(row.get_string("first"), Some("Alicia"));
    assert_eq!(row.get_string("site"), Some("Brno"));
}

#[tokio::test]
async fn test_missing_account_deletes_identity() {
    let harness = Harness::new();
    person(&harness, "alice", "Alice");
    person(&harness, "bob", "Bob");
    let id = harness
        .save_config(
            config(&harness, IdentitySyncOptions::default())
                .with_missing_account(MissingAccountAction::DeleteEntity),
        )
        .await;
    harness.engine.process(id).await.unwrap();

    harness.connector.remove(CLASS, &Uid::from_value("bob"));
    let summary = harness.engine.process(id).await.unwrap();

    assert_eq!(summary.count(SyncActionType::DeleteEntity), 1);
    assert!(identity(&harness, "bob").await.is_none());
    assert!(identity(&harness, "alice").await.is_some());
    assert!(harness
        .store
        .find_account(harness.system, "bob", EntityKind::Identity)
        .await
        .unwrap()
        .is_none());
}
