//! Identity synchronization.

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use super::{apply_bool, apply_string, prime_contract, Draft, EntityHandler, SaveEvent};
use crate::config::SyncKindConfig;
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::mapping::MappedValues;
use crate::model::{Identity, IdentityRole, IdentityRoleFilter};
use crate::store::{IdmStore, Repository};
use crate::types::{EntityField, SyncActionType};
use crate::value::as_string;

pub struct IdentityHandler;

impl IdentityHandler {
    fn default_role(ctx: &SyncContext) -> Option<Uuid> {
        match &ctx.config.kind {
            SyncKindConfig::Identity(options) => options.default_role,
            _ => None,
        }
    }

    /// Grant the default role on the prime contract with the contract's validity.
    async fn grant_default_role(
        &self,
        ctx: &SyncContext,
        identity: &Identity,
    ) -> SyncResult<Vec<String>> {
        let Some(role) = Self::default_role(ctx) else {
            return Ok(Vec::new());
        };
        if ctx.store.roles.get(role).await?.is_none() {
            return Err(SyncError::unresolved("default role", role.to_string()));
        }
        let Some(contract) = prime_contract(&ctx.store, identity.id).await? else {
            return Ok(vec![format!(
                "Default role not granted: identity '{}' has no contract",
                identity.username
            )]);
        };

        let existing = ctx
            .store
            .identity_roles
            .find_one(&IdentityRoleFilter {
                identity: Some(identity.id),
                contract: Some(contract.id),
                role: Some(role),
            })
            .await?;
        let mut assignment = match existing {
            Some(current)
                if current.valid_from == contract.valid_from
                    && current.valid_till == contract.valid_till =>
            {
                return Ok(Vec::new());
            }
            Some(current) => current,
            None => IdentityRole::new(identity.id, contract.id, role),
        };
        assignment.valid_from = contract.valid_from;
        assignment.valid_till = contract.valid_till;
        ctx.store.identity_roles.save(assignment).await?;
        info!(identity = %identity.id, role = %role, contract = %contract.id, "Default role granted");
        Ok(Vec::new())
    }

    async fn recalculate_automatic_roles(&self, ctx: &SyncContext, identity: Uuid) -> SyncResult<()> {
        if ctx.flags.start_auto_role_rec {
            ctx.services.automatic_roles.recalculate(identity).await?;
        } else {
            debug!(identity = %identity, "Automatic role recalculation skipped");
        }
        Ok(())
    }
}

#[async_trait]
impl EntityHandler for IdentityHandler {
    type Entity = Identity;

    fn repository<'s>(&self, store: &'s IdmStore) -> &'s dyn Repository<Identity> {
        store.identities.as_ref()
    }

    async fn build(
        &self,
        _ctx: &SyncContext,
        mapped: &MappedValues,
        existing: Option<&Identity>,
    ) -> SyncResult<Draft<Identity>> {
        let mut identity = existing
            .cloned()
            .unwrap_or_else(|| Identity::new(String::new()));
        if let Some(username) = mapped.get(EntityField::Username).and_then(as_string) {
            identity.username = username;
        }
        if identity.username.is_empty() {
            return Err(SyncError::mapping(
                EntityField::Username.as_str(),
                "username is required",
            ));
        }
        apply_string(mapped, EntityField::FirstName, &mut identity.first_name);
        apply_string(mapped, EntityField::LastName, &mut identity.last_name);
        apply_string(mapped, EntityField::Email, &mut identity.email);
        apply_string(mapped, EntityField::Phone, &mut identity.phone);
        apply_string(mapped, EntityField::Description, &mut identity.description);
        apply_string(mapped, EntityField::ExternalId, &mut identity.external_id);
        apply_bool(mapped, EntityField::Disabled, &mut identity.disabled)?;

        Ok(Draft::new(identity, mapped, existing.is_none()))
    }

    async fn after_save(
        &self,
        ctx: &SyncContext,
        event: SaveEvent<'_, Identity>,
    ) -> SyncResult<Vec<String>> {
        let mut warnings = Vec::new();
        if event.action == SyncActionType::CreateEntity {
            // No contract exists for a new identity yet.
            if let Some(role) = Self::default_role(ctx) {
                warnings.push(format!(
                    "Default role {role} cannot be granted to new identity '{}': no contract exists yet",
                    event.entity.username
                ));
            }
        } else {
            warnings.extend(self.grant_default_role(ctx, event.entity).await?);
        }
        self.recalculate_automatic_roles(ctx, event.entity.id).await?;
        Ok(warnings)
    }

    async fn after_link(&self, ctx: &SyncContext, entity: &Identity) -> SyncResult<Vec<String>> {
        let warnings = self.grant_default_role(ctx, entity).await?;
        self.recalculate_automatic_roles(ctx, entity.id).await?;
        Ok(warnings)
    }

    async fn delete(&self, ctx: &SyncContext, entity: &Identity) -> SyncResult<()> {
        ctx.store.delete_identity(entity.id).await?;
        Ok(())
    }
}
