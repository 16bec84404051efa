//! Organization tree and role catalogue synchronization.
//!
//! Both kinds are hierarchies read as a whole batch: the roots filter runs
//! over every object first, then objects are processed parents before
//! children so a parent UID read in the same run already resolves to an
//! entity.

use async_trait::async_trait;
use idm_connector::{AttributeSet, AttributeValue, ConnectorObject};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{apply_bool, apply_string, Draft, EntityHandler, PreparedBatch};
use crate::config::SyncKindConfig;
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::mapping::{MappedValues, MappingResolver, UID_ATTRIBUTE};
use crate::model::{RoleCatalogue, TreeNode};
use crate::services::PROPERTY_DEFAULT_TREE_TYPE;
use crate::store::{IdmStore, Repository, SyncEntity};
use crate::types::EntityField;
use crate::value::{as_string, as_uuid};

/// Order objects so every parent precedes its children.
///
/// Objects whose parent is not part of the batch, or which are listed in
/// `roots`, start the order. Objects left unreached (parent cycles) follow
/// in their original order.
pub fn order_parent_first(
    objects: Vec<ConnectorObject>,
    parent_attribute: Option<&str>,
    roots: &HashSet<String>,
) -> Vec<ConnectorObject> {
    let Some(parent_attribute) = parent_attribute else {
        return objects;
    };
    let uids: HashSet<String> = objects.iter().map(|o| o.uid.value().to_string()).collect();
    let parent_of = |object: &ConnectorObject| -> Option<String> {
        if roots.contains(object.uid.value()) {
            return None;
        }
        object
            .attributes
            .get(parent_attribute)
            .and_then(AttributeValue::as_text)
            .filter(|parent| uids.contains(parent) && parent != object.uid.value())
    };

    let mut children: HashMap<String, Vec<usize>> = HashMap::new();
    let mut queue = VecDeque::new();
    for (index, object) in objects.iter().enumerate() {
        match parent_of(object) {
            Some(parent) => children.entry(parent).or_default().push(index),
            None => queue.push_back(index),
        }
    }

    let mut order = Vec::with_capacity(objects.len());
    let mut placed = vec![false; objects.len()];
    while let Some(index) = queue.pop_front() {
        if placed[index] {
            continue;
        }
        placed[index] = true;
        order.push(index);
        if let Some(next) = children.get(objects[index].uid.value()) {
            queue.extend(next.iter().copied());
        }
    }
    let cycles = placed.iter().filter(|p| !**p).count();
    if cycles > 0 {
        debug!(objects = cycles, "Objects in parent cycles appended last");
    }
    order.extend((0..objects.len()).filter(|i| !placed[*i]));

    let mut slots: Vec<Option<ConnectorObject>> = objects.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect()
}

/// Source attribute holding the parent UID.
fn parent_attribute(ctx: &SyncContext) -> Option<String> {
    ctx.resolver()
        .by_field(EntityField::Parent)
        .map(|mapping| mapping.name.clone())
}

fn attributes_from_json(value: &Value) -> AttributeSet {
    let mut attributes = AttributeSet::new();
    if let Value::Object(map) = value {
        for (name, value) in map {
            if name != UID_ATTRIBUTE {
                attributes.set(name.clone(), AttributeValue::from_json(value));
            }
        }
    }
    attributes
}

/// Run the roots filter over the batch and order it parent first. Objects
/// the filter fails on are rejected.
async fn prepare_hierarchy(
    ctx: &SyncContext,
    objects: Vec<ConnectorObject>,
) -> SyncResult<PreparedBatch> {
    let parent_attribute = parent_attribute(ctx);
    let mut roots = HashSet::new();
    let mut batch = PreparedBatch::default();

    let objects = match ctx.config.kind.roots_filter_script() {
        None => objects,
        Some(script) => {
            let uids: HashSet<String> =
                objects.iter().map(|o| o.uid.value().to_string()).collect();
            let mut filtered = Vec::with_capacity(objects.len());
            for mut object in objects {
                let account = MappingResolver::ic_attributes(&object);
                let decision = match ctx.scripts.roots_filter(script, &account, &ctx.system) {
                    Ok(decision) => decision,
                    Err(e) => {
                        let error = SyncError::from(e);
                        warn!(uid = %object.uid, error = %error, "Roots filter failed");
                        batch.reject(object.uid.value(), &error);
                        continue;
                    }
                };
                object.attributes = attributes_from_json(&decision.attributes);
                if decision.is_root {
                    // A root keeps only a parent outside the batch (an existing node).
                    if let Some(attribute) = parent_attribute.as_deref() {
                        let in_batch = object
                            .attributes
                            .get(attribute)
                            .and_then(AttributeValue::as_text)
                            .is_some_and(|parent| uids.contains(&parent));
                        if in_batch {
                            object.attributes.remove(attribute);
                        }
                    }
                    roots.insert(object.uid.value().to_string());
                }
                filtered.push(object);
            }
            info!(objects = filtered.len(), roots = roots.len(), "Roots filter applied");
            filtered
        }
    };

    batch.objects = order_parent_first(objects, parent_attribute.as_deref(), &roots);
    Ok(batch)
}

/// Resolve a parent reference: an entity id, a UID processed in this run, or
/// a UID linked through an account.
async fn resolve_parent<E: SyncEntity>(
    ctx: &SyncContext,
    repository: &dyn Repository<E>,
    reference: &str,
) -> SyncResult<Uuid> {
    if let Some(id) = as_uuid(reference) {
        if repository.get(id).await?.is_some() {
            return Ok(id);
        }
    }
    if let Some(id) = ctx.resolved(reference) {
        return Ok(id);
    }
    if let Some(account) = ctx
        .store
        .find_account(ctx.config.system, reference, E::KIND)
        .await?
    {
        if let Some(join) = ctx.store.join_of_account(&account).await? {
            return Ok(join.entity);
        }
    }
    Err(SyncError::unresolved("parent", reference))
}

/// Mapped parent applied to `target`. A node can not be its own parent.
async fn apply_parent<E: SyncEntity>(
    ctx: &SyncContext,
    repository: &dyn Repository<E>,
    mapped: &MappedValues,
    own_id: Uuid,
    target: &mut Option<Uuid>,
) -> SyncResult<()> {
    let Some(value) = mapped.get(EntityField::Parent) else {
        return Ok(());
    };
    *target = match as_string(value) {
        None => None,
        Some(reference) => {
            let parent = resolve_parent(ctx, repository, &reference).await?;
            if parent == own_id {
                return Err(SyncError::mapping(
                    EntityField::Parent.as_str(),
                    "node can not be its own parent",
                ));
            }
            Some(parent)
        }
    };
    Ok(())
}

fn required_code(mapped: &MappedValues, existing: Option<&str>) -> SyncResult<String> {
    mapped
        .get(EntityField::Code)
        .and_then(as_string)
        .or_else(|| existing.map(str::to_string))
        .ok_or_else(|| SyncError::mapping(EntityField::Code.as_str(), "code is required"))
}

pub struct TreeHandler;

impl TreeHandler {
    async fn tree_type(ctx: &SyncContext) -> SyncResult<Uuid> {
        if let SyncKindConfig::Tree(options) = &ctx.config.kind {
            if let Some(tree_type) = options.tree_type {
                return Ok(tree_type);
            }
        }
        ctx.services
            .configuration
            .get_uuid(PROPERTY_DEFAULT_TREE_TYPE)
            .await?
            .ok_or_else(|| SyncError::configuration("no tree type configured"))
    }
}

#[async_trait]
impl EntityHandler for TreeHandler {
    type Entity = TreeNode;

    fn repository<'s>(&self, store: &'s IdmStore) -> &'s dyn Repository<TreeNode> {
        store.tree_nodes.as_ref()
    }

    async fn build(
        &self,
        ctx: &SyncContext,
        mapped: &MappedValues,
        existing: Option<&TreeNode>,
    ) -> SyncResult<Draft<TreeNode>> {
        let code = required_code(mapped, existing.map(|n| n.code.as_str()))?;
        let mut node = match existing {
            Some(node) => node.clone(),
            None => TreeNode::new(Self::tree_type(ctx).await?, code.clone()),
        };
        node.code = code;
        if let Some(name) = mapped.get(EntityField::Name).and_then(as_string) {
            node.name = name;
        }
        apply_bool(mapped, EntityField::Disabled, &mut node.disabled)?;
        apply_string(mapped, EntityField::ExternalId, &mut node.external_id);
        apply_parent(ctx, ctx.store.tree_nodes.as_ref(), mapped, node.id, &mut node.parent).await?;

        Ok(Draft::new(node, mapped, existing.is_none()))
    }

    async fn delete(&self, ctx: &SyncContext, entity: &TreeNode) -> SyncResult<()> {
        ctx.store.delete_tree_node(entity.id).await?;
        Ok(())
    }

    fn reads_whole_batch(&self) -> bool {
        true
    }

    async fn prepare_batch(
        &self,
        ctx: &SyncContext,
        objects: Vec<ConnectorObject>,
    ) -> SyncResult<PreparedBatch> {
        prepare_hierarchy(ctx, objects).await
    }
}

pub struct RoleCatalogueHandler;

#[async_trait]
impl EntityHandler for RoleCatalogueHandler {
    type Entity = RoleCatalogue;

    fn repository<'s>(&self, store: &'s IdmStore) -> &'s dyn Repository<RoleCatalogue> {
        store.role_catalogues.as_ref()
    }

    async fn build(
        &self,
        ctx: &SyncContext,
        mapped: &MappedValues,
        existing: Option<&RoleCatalogue>,
    ) -> SyncResult<Draft<RoleCatalogue>> {
        let code = required_code(mapped, existing.map(|c| c.code.as_str()))?;
        let mut folder = existing
            .cloned()
            .unwrap_or_else(|| RoleCatalogue::new(code.clone()));
        folder.code = code;
        if let Some(name) = mapped.get(EntityField::Name).and_then(as_string) {
            folder.name = name;
        }
        apply_string(mapped, EntityField::Description, &mut folder.description);
        apply_string(mapped, EntityField::ExternalId, &mut folder.external_id);
        apply_parent(
            ctx,
            ctx.store.role_catalogues.as_ref(),
            mapped,
            folder.id,
            &mut folder.parent,
        )
        .await?;

        Ok(Draft::new(folder, mapped, existing.is_none()))
    }

    async fn delete(&self, ctx: &SyncContext, entity: &RoleCatalogue) -> SyncResult<()> {
        ctx.store.delete_role_catalogue(entity.id).await?;
        Ok(())
    }

    fn reads_whole_batch(&self) -> bool {
        true
    }

    async fn prepare_batch(
        &self,
        ctx: &SyncContext,
        objects: Vec<ConnectorObject>,
    ) -> SyncResult<PreparedBatch> {
        prepare_hierarchy(ctx, objects).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SyncConfig, TreeSyncOptions};
    use crate::mapping::AttributeMapping;
    use crate::model::TreeType;
    use crate::types::{OperationResult, SyncActionType};
    use idm_connector::Uid;
    use idm_core::SystemId;

    fn object(uid: &str, parent: Option<&str>) -> ConnectorObject {
        let mut attributes = AttributeSet::new().with("code", uid);
        if let Some(parent) = parent {
            attributes.set("parent", parent);
        }
        ConnectorObject::new(Uid::from_value(uid), "node", attributes)
    }

    fn uids(objects: &[ConnectorObject]) -> Vec<&str> {
        objects.iter().map(|o| o.uid.value()).collect()
    }

    fn context(roots_filter_script: Option<&str>) -> SyncContext {
        let config = SyncConfig::new(
            "tree",
            SystemId::new(),
            "node",
            SyncKindConfig::Tree(TreeSyncOptions {
                tree_type: None,
                roots_filter_script: roots_filter_script.map(str::to_string),
            }),
            vec![
                AttributeMapping::entity("code", EntityField::Code).as_uid(),
                AttributeMapping::entity("parent", EntityField::Parent),
            ],
            "code",
        );
        SyncContext::for_tests(config)
    }

    #[test]
    fn test_parents_come_first() {
        let objects = vec![
            object("leaf", Some("mid")),
            object("mid", Some("root")),
            object("root", None),
            object("orphan", Some("elsewhere")),
        ];
        let ordered = order_parent_first(objects, Some("parent"), &HashSet::new());
        assert_eq!(uids(&ordered), vec!["root", "orphan", "mid", "leaf"]);
    }

    #[test]
    fn test_cycles_are_appended() {
        let objects = vec![
            object("a", Some("b")),
            object("b", Some("a")),
            object("root", None),
        ];
        let ordered = order_parent_first(objects, Some("parent"), &HashSet::new());
        assert_eq!(uids(&ordered), vec!["root", "a", "b"]);

        let roots = HashSet::from(["b".to_string()]);
        let objects = vec![object("a", Some("b")), object("b", Some("a"))];
        let ordered = order_parent_first(objects, Some("parent"), &roots);
        assert_eq!(uids(&ordered), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_roots_filter_grafts_under_existing_node() {
        let ctx = context(Some(
            r#"
            if account.code == "IT" {
                account.parent = "ext-root";
                true
            } else {
                false
            }
            "#,
        ));
        let objects = vec![object("DEV", Some("IT")), object("IT", Some("DEV"))];

        let prepared = prepare_hierarchy(&ctx, objects).await.unwrap().objects;

        assert_eq!(uids(&prepared), vec!["IT", "DEV"]);
        assert_eq!(prepared[0].attributes.get_string("parent"), Some("ext-root"));
        assert!(!prepared[0].attributes.has(UID_ATTRIBUTE));
    }

    #[tokio::test]
    async fn test_roots_filter_failure_rejects_object() {
        let ctx = context(Some(
            r#"
            if account.code == "BAD" {
                throw "broken row";
            }
            false
            "#,
        ));
        let objects = vec![
            object("IT", None),
            object("BAD", Some("IT")),
            object("DEV", Some("IT")),
        ];

        let prepared = prepare_hierarchy(&ctx, objects).await.unwrap();

        assert_eq!(uids(&prepared.objects), vec!["IT", "DEV"]);
        assert_eq!(prepared.rejected.len(), 1);
        let (uid, outcome) = &prepared.rejected[0];
        assert_eq!(uid, "BAD");
        assert_eq!(outcome.action, SyncActionType::Unknown);
        assert_eq!(outcome.result, OperationResult::Error);
        assert!(outcome.message.contains("Script error"));
    }

    #[tokio::test]
    async fn test_parent_resolution() {
        let ctx = context(None);
        let tree_type = ctx.store.tree_types.save(TreeType::new("ORG")).await.unwrap();
        let root = ctx
            .store
            .tree_nodes
            .save(TreeNode::new(tree_type.id, "root"))
            .await
            .unwrap();
        ctx.remember_resolved("ROOT-UID", root.id);

        let repository = ctx.store.tree_nodes.as_ref();
        assert_eq!(
            resolve_parent(&ctx, repository, &root.id.to_string()).await.unwrap(),
            root.id
        );
        assert_eq!(resolve_parent(&ctx, repository, "ROOT-UID").await.unwrap(), root.id);
        assert!(matches!(
            resolve_parent(&ctx, repository, "nowhere").await,
            Err(SyncError::Unresolved { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_tree_type_is_configuration_error() {
        let ctx = context(None);
        let mut mapped = MappedValues::new();
        mapped.insert(crate::types::FieldRef::Entity(EntityField::Code), Value::from("IT"));
        let err = TreeHandler.build(&ctx, &mapped, None).await.unwrap_err();
        assert!(err.is_configuration());
    }
}
