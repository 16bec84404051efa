//! Role synchronization: catalogue placement, members and forwarding.

use async_trait::async_trait;
use idm_connector::{AttributeValue, ConnectorObject};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

use super::{apply_bool, apply_string, prime_contract, Draft, EntityHandler, SaveEvent};
use crate::config::{RoleSyncOptions, SyncKindConfig};
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::mapping::MappedValues;
use crate::model::{
    IdentityRole, IdentityRoleFilter, Role, RoleCatalogue, RoleCatalogueFilter, RoleCatalogueRole,
    RoleCatalogueRoleFilter, RoleSystem, RoleSystemAttribute, RoleSystemAttributeFilter,
    RoleSystemFilter,
};
use crate::services::FormDefinition;
use crate::store::{IdmStore, Repository};
use crate::types::{EntityField, EntityKind};
use crate::value::as_string;

/// Catalogue folder codes from a DN-like value, top folder first.
///
/// `OU=Dev,OU=IT,DC=corp` yields `["IT", "Dev"]`; a value without `=` is a
/// slash separated path.
pub(crate) fn catalogue_path(value: &str) -> Vec<String> {
    if value.contains('=') {
        let mut path: Vec<String> = value
            .split(',')
            .filter_map(|part| part.split_once('='))
            .filter(|(key, _)| key.trim().eq_ignore_ascii_case("OU"))
            .map(|(_, folder)| folder.trim().to_string())
            .filter(|folder| !folder.is_empty())
            .collect();
        path.reverse();
        path
    } else {
        value
            .split('/')
            .map(str::trim)
            .filter(|folder| !folder.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn object_strings(object: &ConnectorObject, attribute: &str) -> Vec<String> {
    let values: Vec<String> = match object.attributes.get(attribute) {
        Some(AttributeValue::Array(items)) => items.iter().filter_map(AttributeValue::as_text).collect(),
        Some(value) => value.as_text().into_iter().collect(),
        None => Vec::new(),
    };
    values.into_iter().filter(|s| !s.is_empty()).collect()
}

/// Catalogue folder a role object belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// No placement configured for the object.
    Keep,
    Folder(Uuid),
    /// Part of the folder path does not exist yet.
    NewFolders,
}

pub struct RoleHandler;

impl RoleHandler {
    fn options(ctx: &SyncContext) -> RoleSyncOptions {
        match &ctx.config.kind {
            SyncKindConfig::Role(options) => options.clone(),
            _ => RoleSyncOptions::default(),
        }
    }

    async fn find_folder(
        store: &IdmStore,
        parent: Option<Uuid>,
        code: &str,
    ) -> SyncResult<Option<Uuid>> {
        Ok(store
            .role_catalogues
            .find_one(&RoleCatalogueFilter {
                parent,
                roots_only: parent.is_none(),
                code: Some(code.to_string()),
                ..RoleCatalogueFilter::default()
            })
            .await?
            .map(|folder| folder.id))
    }

    /// Folder for `code` under `parent`, created when missing.
    async fn ensure_folder(
        store: &IdmStore,
        parent: Option<Uuid>,
        code: &str,
    ) -> SyncResult<Uuid> {
        if let Some(folder) = Self::find_folder(store, parent, code).await? {
            return Ok(folder);
        }
        let mut folder = RoleCatalogue::new(code);
        folder.parent = parent;
        let folder = store.role_catalogues.save(folder).await?;
        debug!(folder = %folder.id, code = %code, "Catalogue folder created");
        Ok(folder.id)
    }

    async fn target_catalogue(
        ctx: &SyncContext,
        options: &RoleSyncOptions,
        object: &ConnectorObject,
    ) -> SyncResult<Option<Uuid>> {
        if let Some(catalogue) = options.all_to_one_catalogue {
            if ctx.store.role_catalogues.get(catalogue).await?.is_none() {
                return Err(SyncError::unresolved("catalogue", catalogue.to_string()));
            }
            return Ok(Some(catalogue));
        }
        let path = Self::object_path(options, object);
        if path.is_empty() {
            return Ok(options.catalogue_root);
        }
        let mut parent = options.catalogue_root;
        for code in &path {
            parent = Some(Self::ensure_folder(&ctx.store, parent, code).await?);
        }
        Ok(parent)
    }

    fn object_path(options: &RoleSyncOptions, object: &ConnectorObject) -> Vec<String> {
        options
            .catalogue_attribute
            .as_deref()
            .and_then(|attribute| object.attributes.get(attribute))
            .and_then(AttributeValue::as_text)
            .map(|value| catalogue_path(&value))
            .unwrap_or_default()
    }

    /// Placement of the object without creating folders.
    async fn placement(
        ctx: &SyncContext,
        options: &RoleSyncOptions,
        object: &ConnectorObject,
    ) -> SyncResult<Placement> {
        if let Some(catalogue) = options.all_to_one_catalogue {
            return Ok(Placement::Folder(catalogue));
        }
        let mut parent = options.catalogue_root;
        for code in &Self::object_path(options, object) {
            match Self::find_folder(&ctx.store, parent, code).await? {
                Some(folder) => parent = Some(folder),
                None => return Ok(Placement::NewFolders),
            }
        }
        Ok(parent.map_or(Placement::Keep, Placement::Folder))
    }

    async fn catalogue_changed(
        ctx: &SyncContext,
        options: &RoleSyncOptions,
        role: &Role,
        object: &ConnectorObject,
    ) -> SyncResult<bool> {
        let catalogue = match Self::placement(ctx, options, object).await? {
            Placement::Keep => return Ok(false),
            Placement::NewFolders => return Ok(true),
            Placement::Folder(catalogue) => catalogue,
        };
        let links = ctx
            .store
            .catalogue_roles
            .find(&RoleCatalogueRoleFilter {
                role: Some(role.id),
                catalogue: None,
            })
            .await?;
        Ok(!links.iter().any(|l| l.catalogue == catalogue)
            || (options.remove_catalogue_links && links.iter().any(|l| l.catalogue != catalogue)))
    }

    /// Identities owning the member identifiers. Unknown identifiers are
    /// returned separately.
    async fn member_owners(
        ctx: &SyncContext,
        identifier: &str,
        members: Vec<String>,
    ) -> SyncResult<(Vec<(String, Uuid)>, Vec<String>)> {
        let definition = FormDefinition::main(EntityKind::Identity);
        let mut owners = Vec::new();
        let mut unknown = Vec::new();
        for member in members {
            let found = ctx
                .services
                .forms
                .find_owners(
                    EntityKind::Identity,
                    &definition,
                    identifier,
                    &Value::String(member.clone()),
                )
                .await?;
            if found.is_empty() {
                unknown.push(member);
            } else {
                owners.extend(found.into_iter().map(|identity| (member.clone(), identity)));
            }
        }
        Ok((owners, unknown))
    }

    async fn members_changed(
        ctx: &SyncContext,
        options: &RoleSyncOptions,
        role: &Role,
        object: &ConnectorObject,
    ) -> SyncResult<bool> {
        let (Some(members_attribute), Some(identifier)) = (
            options.members_attribute.as_deref(),
            options.member_identifier_attribute.as_deref(),
        ) else {
            return Ok(false);
        };
        let (owners, _) =
            Self::member_owners(ctx, identifier, object_strings(object, members_attribute)).await?;
        let members: HashSet<Uuid> = owners.into_iter().map(|(_, identity)| identity).collect();
        let assignments = ctx
            .store
            .identity_roles
            .find(&IdentityRoleFilter {
                role: Some(role.id),
                ..IdentityRoleFilter::default()
            })
            .await?;
        let assigned: HashSet<Uuid> = assignments.iter().map(|a| a.identity).collect();
        Ok(members.iter().any(|identity| !assigned.contains(identity))
            || (options.remove_members
                && assignments
                    .iter()
                    .any(|a| !a.automatic && !members.contains(&a.identity))))
    }

    async fn forward_changed(
        ctx: &SyncContext,
        options: &RoleSyncOptions,
        role: &Role,
    ) -> SyncResult<bool> {
        let Some(system) = options.forward_to_system else {
            return Ok(false);
        };
        let Some(role_system) = ctx
            .store
            .role_systems
            .find_one(&RoleSystemFilter {
                role: Some(role.id),
                system: Some(system),
            })
            .await?
        else {
            return Ok(true);
        };
        let Some(name) = options.forward_attribute.as_deref() else {
            return Ok(false);
        };
        let attribute = ctx
            .store
            .role_system_attributes
            .find_one(&RoleSystemAttributeFilter {
                role_system: Some(role_system.id),
                name: Some(name.to_string()),
            })
            .await?;
        Ok(attribute.map_or(true, |attribute| attribute.value != role.code))
    }

    async fn place_in_catalogue(
        ctx: &SyncContext,
        options: &RoleSyncOptions,
        role: &Role,
        object: &ConnectorObject,
    ) -> SyncResult<()> {
        let Some(catalogue) = Self::target_catalogue(ctx, options, object).await? else {
            return Ok(());
        };
        let links = ctx
            .store
            .catalogue_roles
            .find(&RoleCatalogueRoleFilter {
                role: Some(role.id),
                catalogue: None,
            })
            .await?;
        if !links.iter().any(|l| l.catalogue == catalogue) {
            ctx.store
                .catalogue_roles
                .save(RoleCatalogueRole::new(role.id, catalogue))
                .await?;
        }
        if options.remove_catalogue_links {
            for link in links.iter().filter(|l| l.catalogue != catalogue) {
                ctx.store.catalogue_roles.delete(link.id).await?;
            }
        }
        Ok(())
    }

    async fn sync_members(
        ctx: &SyncContext,
        options: &RoleSyncOptions,
        role: &Role,
        object: &ConnectorObject,
    ) -> SyncResult<Vec<String>> {
        let (Some(members_attribute), Some(identifier)) = (
            options.members_attribute.as_deref(),
            options.member_identifier_attribute.as_deref(),
        ) else {
            return Ok(Vec::new());
        };
        let (owners, unknown) =
            Self::member_owners(ctx, identifier, object_strings(object, members_attribute)).await?;
        let mut warnings: Vec<String> = unknown
            .iter()
            .map(|member| format!("Member '{member}' of role '{}' not found", role.code))
            .collect();
        let mut members = HashSet::new();

        for (member, identity) in owners {
            members.insert(identity);
            let assigned = ctx
                .store
                .identity_roles
                .count(&IdentityRoleFilter {
                    identity: Some(identity),
                    role: Some(role.id),
                    ..IdentityRoleFilter::default()
                })
                .await?;
            if assigned > 0 {
                continue;
            }
            let Some(contract) = prime_contract(&ctx.store, identity).await? else {
                warnings.push(format!(
                    "Member '{member}' has no contract, role '{}' not assigned",
                    role.code
                ));
                continue;
            };
            ctx.store
                .identity_roles
                .save(IdentityRole::new(identity, contract.id, role.id))
                .await?;
            info!(identity = %identity, role = %role.id, "Role assigned to member");
        }

        if options.remove_members {
            let assignments = ctx
                .store
                .identity_roles
                .find(&IdentityRoleFilter {
                    role: Some(role.id),
                    ..IdentityRoleFilter::default()
                })
                .await?;
            for assignment in assignments
                .into_iter()
                .filter(|a| !a.automatic && !members.contains(&a.identity))
            {
                ctx.store.identity_roles.delete(assignment.id).await?;
                info!(identity = %assignment.identity, role = %role.id, "Role removed from former member");
            }
        }
        Ok(warnings)
    }

    /// Provision the role to the forward system through a merged attribute.
    async fn forward(ctx: &SyncContext, options: &RoleSyncOptions, role: &Role) -> SyncResult<()> {
        let Some(system) = options.forward_to_system else {
            return Ok(());
        };
        let role_system = match ctx
            .store
            .role_systems
            .find_one(&RoleSystemFilter {
                role: Some(role.id),
                system: Some(system),
            })
            .await?
        {
            Some(role_system) => role_system,
            None => ctx.store.role_systems.save(RoleSystem::new(role.id, system)).await?,
        };
        let Some(name) = options.forward_attribute.as_deref() else {
            return Ok(());
        };
        let existing = ctx
            .store
            .role_system_attributes
            .find_one(&RoleSystemAttributeFilter {
                role_system: Some(role_system.id),
                name: Some(name.to_string()),
            })
            .await?;
        match existing {
            Some(attribute) if attribute.value == role.code => {}
            Some(mut attribute) => {
                attribute.value = role.code.clone();
                ctx.store.role_system_attributes.save(attribute).await?;
            }
            None => {
                ctx.store
                    .role_system_attributes
                    .save(RoleSystemAttribute::new(role_system.id, name, role.code.clone()))
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EntityHandler for RoleHandler {
    type Entity = Role;

    fn repository<'s>(&self, store: &'s IdmStore) -> &'s dyn Repository<Role> {
        store.roles.as_ref()
    }

    async fn build(
        &self,
        _ctx: &SyncContext,
        mapped: &MappedValues,
        existing: Option<&Role>,
    ) -> SyncResult<Draft<Role>> {
        let code = mapped
            .get(EntityField::Code)
            .and_then(as_string)
            .or_else(|| existing.map(|r| r.code.clone()))
            .ok_or_else(|| SyncError::mapping(EntityField::Code.as_str(), "code is required"))?;
        let mut role = existing.cloned().unwrap_or_else(|| Role::new(code.clone()));
        role.code = code;
        if let Some(name) = mapped.get(EntityField::Name).and_then(as_string) {
            role.name = name;
        }
        apply_string(mapped, EntityField::Description, &mut role.description);
        apply_string(mapped, EntityField::ExternalId, &mut role.external_id);
        apply_bool(mapped, EntityField::Disabled, &mut role.disabled)?;

        Ok(Draft::new(role, mapped, existing.is_none()))
    }

    async fn related_changes(
        &self,
        ctx: &SyncContext,
        entity: &Role,
        object: &ConnectorObject,
    ) -> SyncResult<Vec<String>> {
        let options = Self::options(ctx);
        let mut related = Vec::new();
        if Self::catalogue_changed(ctx, &options, entity, object).await? {
            related.push("catalogue".to_string());
        }
        if Self::members_changed(ctx, &options, entity, object).await? {
            related.push("members".to_string());
        }
        if Self::forward_changed(ctx, &options, entity).await? {
            related.push("forwarding".to_string());
        }
        Ok(related)
    }

    async fn after_save(
        &self,
        ctx: &SyncContext,
        event: SaveEvent<'_, Role>,
    ) -> SyncResult<Vec<String>> {
        let options = Self::options(ctx);
        Self::place_in_catalogue(ctx, &options, event.entity, event.object).await?;
        let warnings = Self::sync_members(ctx, &options, event.entity, event.object).await?;
        Self::forward(ctx, &options, event.entity).await?;
        Ok(warnings)
    }

    async fn delete(&self, ctx: &SyncContext, entity: &Role) -> SyncResult<()> {
        ctx.store.delete_role(entity.id).await?;
        Ok(())
    }
}
