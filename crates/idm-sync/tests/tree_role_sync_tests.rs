//! Hierarchy and Role Synchronization Tests
//!
//! Organization trees and role catalogues read as a whole batch and ordered
//! parent first, and roles placed into catalogues with members and a
//! forwarded attribute.

mod common;

use std::collections::BTreeMap;

use idm_connector::{AttributeSet, AttributeValue, Filter, Uid};
use idm_core::SystemId;
use serde_json::json;
use uuid::Uuid;

use common::Harness;
use idm_sync::model::{
    Identity, IdentityContract, IdentityRoleFilter, Role, RoleCatalogue, RoleCatalogueFilter,
    RoleCatalogueRole, RoleCatalogueRoleFilter, RoleFilter, RoleSystemAttributeFilter,
    RoleSystemFilter, TreeNode, TreeNodeFilter, TreeType,
};
use idm_sync::services::{
    ConfigurationService, FormDefinition, FormOwner, FormService, PROPERTY_DEFAULT_TREE_TYPE,
};
use idm_sync::{
    AttributeMapping, CatalogueSyncOptions, EntityField, EntityKind, MissingAccountAction,
    OperationResult, Repository, RoleSyncOptions, SyncActionType, SyncConfig, SyncKindConfig,
    SyncLogStore, TreeSyncOptions, UnlinkedAction,
};

const NODE: &str = "node";
const FOLDER: &str = "folder";
const GROUP: &str = "group";

fn hierarchy_mappings() -> Vec<AttributeMapping> {
    vec![
        AttributeMapping::entity("id", EntityField::ExternalId).as_uid(),
        AttributeMapping::entity("code", EntityField::Code),
        AttributeMapping::entity("name", EntityField::Name),
        AttributeMapping::entity("parent", EntityField::Parent),
    ]
}

fn hierarchy_row(harness: &Harness, class: &str, uid: &str, code: &str, parent: Option<&str>) {
    let mut attributes = AttributeSet::new()
        .with("code", code)
        .with("name", format!("{code} unit"));
    if let Some(parent) = parent {
        attributes.set("parent", parent);
    }
    harness.put(class, uid, attributes);
}

/// Rows listed children first by UID.
fn three_levels(harness: &Harness, class: &str) {
    hierarchy_row(harness, class, "a-leaf", "LEAF", Some("b-mid"));
    hierarchy_row(harness, class, "b-mid", "MID", Some("c-root"));
    hierarchy_row(harness, class, "c-root", "ROOT", None);
}

// =============================================================================
// Organization tree
// =============================================================================

async fn tree_type(harness: &Harness) -> Uuid {
    harness
        .store
        .tree_types
        .save(TreeType::new("ORG"))
        .await
        .unwrap()
        .id
}

fn tree_config(harness: &Harness, options: TreeSyncOptions) -> SyncConfig {
    SyncConfig::new(
        "org-tree",
        harness.system,
        NODE,
        SyncKindConfig::Tree(options),
        hierarchy_mappings(),
        "id",
    )
    .with_reconciliation(true)
}

async fn node(harness: &Harness, code: &str) -> TreeNode {
    harness
        .store
        .tree_nodes
        .find_one(&TreeNodeFilter {
            code: Some(code.to_string()),
            ..TreeNodeFilter::default()
        })
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_tree_created_parent_first() {
    let harness = Harness::new();
    let tree_type = tree_type(&harness).await;
    three_levels(&harness, NODE);
    let id = harness
        .save_config(tree_config(
            &harness,
            TreeSyncOptions {
                tree_type: Some(tree_type),
                ..TreeSyncOptions::default()
            },
        ))
        .await;

    let summary = harness.engine.process(id).await.unwrap();

    assert!(!summary.contains_error());
    assert_eq!(summary.count(SyncActionType::CreateEntity), 3);
    let root = node(&harness, "ROOT").await;
    let mid = node(&harness, "MID").await;
    let leaf = node(&harness, "LEAF").await;
    assert_eq!(root.parent, None);
    assert_eq!(mid.parent, Some(root.id));
    assert_eq!(leaf.parent, Some(mid.id));
    assert_eq!(leaf.tree_type, tree_type);
    assert_eq!(leaf.name, "LEAF unit");
}

#[tokio::test]
async fn test_tree_parent_resolved_through_account_on_rerun() {
    let harness = Harness::new();
    let tree_type = tree_type(&harness).await;
    three_levels(&harness, NODE);
    let id = harness
        .save_config(tree_config(
            &harness,
            TreeSyncOptions {
                tree_type: Some(tree_type),
                ..TreeSyncOptions::default()
            },
        ))
        .await;
    harness.engine.process(id).await.unwrap();

    // Only the new child is read; its parent resolves through the root's account.
    hierarchy_row(&harness, NODE, "d-new", "NEW", Some("c-root"));
    let config = harness
        .config(id)
        .await
        .with_reconciliation(false)
        .with_custom_filter(Some(Filter::eq("code", "NEW")), None);
    harness.save_config(config).await;
    let summary = harness.engine.process(id).await.unwrap();

    assert!(!summary.contains_error());
    assert_eq!(summary.count(SyncActionType::CreateEntity), 1);
    assert_eq!(summary.counts.len(), 1);
    let root = node(&harness, "ROOT").await;
    assert_eq!(node(&harness, "NEW").await.parent, Some(root.id));
}

#[tokio::test]
async fn test_tree_type_from_configuration_property() {
    let harness = Harness::new();
    let tree_type = tree_type(&harness).await;
    harness
        .configuration
        .set_value(PROPERTY_DEFAULT_TREE_TYPE, &tree_type.to_string())
        .await
        .unwrap();
    hierarchy_row(&harness, NODE, "c-root", "ROOT", None);
    let id = harness
        .save_config(tree_config(&harness, TreeSyncOptions::default()))
        .await;

    let summary = harness.engine.process(id).await.unwrap();

    assert!(!summary.contains_error());
    assert_eq!(node(&harness, "ROOT").await.tree_type, tree_type);
}

#[tokio::test]
async fn test_tree_without_type_fails_items() {
    let harness = Harness::new();
    hierarchy_row(&harness, NODE, "c-root", "ROOT", None);
    let id = harness
        .save_config(tree_config(&harness, TreeSyncOptions::default()))
        .await;

    let summary = harness.engine.process(id).await.unwrap();

    assert!(summary.contains_error());
    let items = harness.items(summary.log.id, SyncActionType::CreateEntity).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].result, OperationResult::Error);
    assert!(items[0].message.contains("no tree type configured"));
}

#[tokio::test]
async fn test_roots_filter_detaches_in_batch_parent() {
    let harness = Harness::new();
    let tree_type = tree_type(&harness).await;
    three_levels(&harness, NODE);
    let id = harness
        .save_config(tree_config(
            &harness,
            TreeSyncOptions {
                tree_type: Some(tree_type),
                roots_filter_script: Some(r#"account.code == "MID""#.to_string()),
            },
        ))
        .await;

    let summary = harness.engine.process(id).await.unwrap();

    assert!(!summary.contains_error());
    let mid = node(&harness, "MID").await;
    assert_eq!(mid.parent, None);
    assert_eq!(node(&harness, "LEAF").await.parent, Some(mid.id));
    assert_eq!(node(&harness, "ROOT").await.parent, None);
}

#[tokio::test]
async fn test_roots_filter_error_fails_only_its_object() {
    let harness = Harness::new();
    let tree_type = tree_type(&harness).await;
    three_levels(&harness, NODE);
    let id = harness
        .save_config(tree_config(
            &harness,
            TreeSyncOptions {
                tree_type: Some(tree_type),
                roots_filter_script: Some(
                    r#"if account.code == "MID" { 42 } else { false }"#.to_string(),
                ),
            },
        ))
        .await;

    let summary = harness.engine.process(id).await.unwrap();

    assert!(summary.contains_error());
    assert!(!summary.log.running);
    let failed = harness.items(summary.log.id, SyncActionType::Unknown).await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].identifier, "b-mid");
    assert_eq!(failed[0].result, OperationResult::Error);
    assert!(failed[0].message.contains("roots filter"));

    // The root is created; the leaf's parent was rejected and does not resolve.
    assert_eq!(node(&harness, "ROOT").await.parent, None);
    assert_eq!(
        harness
            .store
            .tree_nodes
            .count(&TreeNodeFilter::default())
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        harness
            .count(summary.log.id, SyncActionType::CreateEntity, OperationResult::Error)
            .await,
        1
    );
}

#[tokio::test]
async fn test_missing_tree_account_keeps_node_with_children() {
    let harness = Harness::new();
    let tree_type = tree_type(&harness).await;
    three_levels(&harness, NODE);
    let config = tree_config(
        &harness,
        TreeSyncOptions {
            tree_type: Some(tree_type),
            ..TreeSyncOptions::default()
        },
    )
    .with_missing_account(MissingAccountAction::DeleteEntity);
    let id = harness.save_config(config).await;
    harness.engine.process(id).await.unwrap();

    harness.connector.remove(NODE, &Uid::from_value("b-mid"));
    let summary = harness.engine.process(id).await.unwrap();

    assert!(summary.contains_error());
    assert_eq!(
        harness
            .count(summary.log.id, SyncActionType::DeleteEntity, OperationResult::Error)
            .await,
        1
    );
    node(&harness, "MID").await;
}

// =============================================================================
// Role catalogue
// =============================================================================

#[tokio::test]
async fn test_role_catalogue_created_parent_first() {
    let harness = Harness::new();
    three_levels(&harness, FOLDER);
    let id = harness
        .save_config(SyncConfig::new(
            "catalogue",
            harness.system,
            FOLDER,
            SyncKindConfig::RoleCatalogue(CatalogueSyncOptions::default()),
            hierarchy_mappings(),
            "id",
        ))
        .await;

    let summary = harness.engine.process(id).await.unwrap();

    assert!(!summary.contains_error());
    let folders = harness
        .store
        .role_catalogues
        .find(&RoleCatalogueFilter::default())
        .await
        .unwrap();
    let by_code: BTreeMap<&str, &RoleCatalogue> =
        folders.iter().map(|f| (f.code.as_str(), f)).collect();
    assert_eq!(by_code.len(), 3);
    assert_eq!(by_code["ROOT"].parent, None);
    assert_eq!(by_code["MID"].parent, Some(by_code["ROOT"].id));
    assert_eq!(by_code["LEAF"].parent, Some(by_code["MID"].id));
}

// =============================================================================
// Roles
// =============================================================================

fn role_config(harness: &Harness, options: RoleSyncOptions) -> SyncConfig {
    SyncConfig::new(
        "ad-groups",
        harness.system,
        GROUP,
        SyncKindConfig::Role(options),
        vec![
            AttributeMapping::entity("dn", EntityField::ExternalId).as_uid(),
            AttributeMapping::entity("cn", EntityField::Code),
            AttributeMapping::entity("description", EntityField::Description),
        ],
        "dn",
    )
}

fn group(harness: &Harness, dn: &str, cn: &str, members: &[&str]) {
    let members = members
        .iter()
        .map(|m| AttributeValue::from(*m))
        .collect::<Vec<_>>();
    harness.put(
        GROUP,
        dn,
        AttributeSet::new()
            .with("dn", dn)
            .with("cn", cn)
            .with("description", format!("{cn} group"))
            .with("member", AttributeValue::Array(members)),
    );
}

async fn role(harness: &Harness, code: &str) -> Role {
    harness
        .store
        .roles
        .find_one(&RoleFilter {
            code: Some(code.to_string()),
            ..RoleFilter::default()
        })
        .await
        .unwrap()
        .unwrap()
}

/// Identity with a prime contract and an employee number in its extended attributes.
async fn employee(harness: &Harness, username: &str, number: &str) -> Uuid {
    let identity = harness
        .store
        .identities
        .save(Identity::new(username))
        .await
        .unwrap();
    let mut contract = IdentityContract::new(identity.id);
    contract.main = true;
    harness.store.contracts.save(contract).await.unwrap();
    harness
        .services
        .forms
        .save_values(
            FormOwner::new(EntityKind::Identity, identity.id),
            &FormDefinition::main(EntityKind::Identity),
            BTreeMap::from([("employeeNumber".to_string(), json!(number))]),
        )
        .await
        .unwrap();
    identity.id
}

#[tokio::test]
async fn test_role_placed_by_dn_path() {
    let harness = Harness::new();
    group(&harness, "CN=Devs,OU=Dev,OU=IT,DC=corp", "Devs", &[]);
    let options = RoleSyncOptions {
        catalogue_attribute: Some("dn".to_string()),
        ..RoleSyncOptions::default()
    };
    let id = harness.save_config(role_config(&harness, options)).await;

    let summary = harness.engine.process(id).await.unwrap();

    assert!(!summary.contains_error());
    let devs = role(&harness, "Devs").await;
    assert_eq!(devs.description.as_deref(), Some("Devs group"));
    let it = harness
        .store
        .role_catalogues
        .find_one(&RoleCatalogueFilter {
            roots_only: true,
            code: Some("IT".to_string()),
            ..RoleCatalogueFilter::default()
        })
        .await
        .unwrap()
        .unwrap();
    let dev = harness
        .store
        .role_catalogues
        .find_one(&RoleCatalogueFilter {
            parent: Some(it.id),
            code: Some("Dev".to_string()),
            ..RoleCatalogueFilter::default()
        })
        .await
        .unwrap()
        .unwrap();
    let links = harness
        .store
        .catalogue_roles
        .find(&RoleCatalogueRoleFilter {
            role: Some(devs.id),
            catalogue: None,
        })
        .await
        .unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].catalogue, dev.id);
}

#[tokio::test]
async fn test_role_moved_to_one_catalogue_removes_other_links() {
    let harness = Harness::new();
    let old = harness
        .store
        .role_catalogues
        .save(RoleCatalogue::new("OLD"))
        .await
        .unwrap();
    let target = harness
        .store
        .role_catalogues
        .save(RoleCatalogue::new("ALL"))
        .await
        .unwrap();
    let existing = harness.store.roles.save(Role::new("Devs")).await.unwrap();
    harness
        .store
        .catalogue_roles
        .save(RoleCatalogueRole::new(existing.id, old.id))
        .await
        .unwrap();
    group(&harness, "CN=Devs,DC=corp", "Devs", &[]);
    let mut config = role_config(
        &harness,
        RoleSyncOptions {
            all_to_one_catalogue: Some(target.id),
            remove_catalogue_links: true,
            ..RoleSyncOptions::default()
        },
    );
    config.correlation_attribute = "cn".to_string();
    let id = harness
        .save_config(config.with_unlinked(UnlinkedAction::LinkAndUpdateEntity))
        .await;

    let summary = harness.engine.process(id).await.unwrap();

    assert!(!summary.contains_error());
    assert_eq!(summary.count(SyncActionType::LinkAndUpdateEntity), 1);
    let links = harness
        .store
        .catalogue_roles
        .find(&RoleCatalogueRoleFilter {
            role: Some(existing.id),
            catalogue: None,
        })
        .await
        .unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].catalogue, target.id);
}

#[tokio::test]
async fn test_role_members_assigned_and_removed() {
    let harness = Harness::new();
    let alice = employee(&harness, "alice", "E-1").await;
    let bob = employee(&harness, "bob", "E-2").await;
    group(&harness, "CN=Devs,DC=corp", "Devs", &["E-1", "E-2", "E-9"]);
    let options = RoleSyncOptions {
        members_attribute: Some("member".to_string()),
        member_identifier_attribute: Some("employeeNumber".to_string()),
        remove_members: true,
        ..RoleSyncOptions::default()
    };
    let id = harness
        .save_config(role_config(&harness, options).with_reconciliation(true))
        .await;

    let summary = harness.engine.process(id).await.unwrap();

    let items = harness.items(summary.log.id, SyncActionType::CreateEntity).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].result, OperationResult::Warning);
    assert!(items[0].message.contains("Member 'E-9'"));
    let devs = role(&harness, "Devs").await;
    let members = |identity: Uuid| IdentityRoleFilter {
        identity: Some(identity),
        role: Some(devs.id),
        ..IdentityRoleFilter::default()
    };
    assert_eq!(harness.store.identity_roles.count(&members(alice)).await.unwrap(), 1);
    assert_eq!(harness.store.identity_roles.count(&members(bob)).await.unwrap(), 1);

    group(&harness, "CN=Devs,DC=corp", "Devs", &["E-1"]);
    let summary = harness.engine.process(id).await.unwrap();

    assert!(!summary.contains_error());
    assert_eq!(harness.store.identity_roles.count(&members(alice)).await.unwrap(), 1);
    assert_eq!(harness.store.identity_roles.count(&members(bob)).await.unwrap(), 0);
}

#[tokio::test]
async fn test_differential_sync_applies_member_changes_of_unchanged_role() {
    let harness = Harness::new();
    let alice = employee(&harness, "alice", "E-1").await;
    let bob = employee(&harness, "bob", "E-2").await;
    group(&harness, "CN=Devs,DC=corp", "Devs", &["E-1"]);
    let options = RoleSyncOptions {
        members_attribute: Some("member".to_string()),
        member_identifier_attribute: Some("employeeNumber".to_string()),
        ..RoleSyncOptions::default()
    };
    let id = harness
        .save_config(
            role_config(&harness, options)
                .with_reconciliation(true)
                .with_differential_sync(true),
        )
        .await;
    harness.engine.process(id).await.unwrap();

    // Unchanged row: the update is skipped.
    let summary = harness.engine.process(id).await.unwrap();
    let items = harness.items(summary.log.id, SyncActionType::UpdateEntity).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].result, OperationResult::Ignore);

    group(&harness, "CN=Devs,DC=corp", "Devs", &["E-1", "E-2"]);
    let summary = harness.engine.process(id).await.unwrap();

    let items = harness.items(summary.log.id, SyncActionType::UpdateEntity).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].result, OperationResult::Success);
    assert!(items[0].message.contains("changed members"));
    let devs = role(&harness, "Devs").await;
    for identity in [alice, bob] {
        let assigned = harness
            .store
            .identity_roles
            .count(&IdentityRoleFilter {
                identity: Some(identity),
                role: Some(devs.id),
                ..IdentityRoleFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(assigned, 1);
    }
}

#[tokio::test]
async fn test_role_forwarded_to_system_attribute() {
    let harness = Harness::new();
    let ldap = SystemId::new();
    group(&harness, "CN=Devs,DC=corp", "Devs", &[]);
    let options = RoleSyncOptions {
        forward_to_system: Some(ldap),
        forward_attribute: Some("memberOf".to_string()),
        ..RoleSyncOptions::default()
    };
    let id = harness.save_config(role_config(&harness, options)).await;

    harness.engine.process(id).await.unwrap();

    let devs = role(&harness, "Devs").await;
    let role_system = harness
        .store
        .role_systems
        .find_one(&RoleSystemFilter {
            role: Some(devs.id),
            system: Some(ldap),
        })
        .await
        .unwrap()
        .unwrap();
    let attributes = harness
        .store
        .role_system_attributes
        .find(&RoleSystemAttributeFilter {
            role_system: Some(role_system.id),
            name: None,
        })
        .await
        .unwrap();
    assert_eq!(attributes.len(), 1);
    assert_eq!(attributes[0].name, "memberOf");
    assert_eq!(attributes[0].value, "Devs");
}
