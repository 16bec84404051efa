//! Classification of connector objects against local entities.

use idm_core::IdmResult;
use tracing::debug;

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::mapping::MappedValues;
use crate::model::EntityAccount;
use crate::services::FormDefinition;
use crate::store::{FieldMatch, Repository, SyncEntity};
use crate::types::{FieldRef, SyncSituation};
use crate::value::as_strings;

/// Outcome of correlating one connector object.
#[derive(Debug, Clone)]
pub struct Correlation<E> {
    pub situation: SyncSituation,
    pub entity: Option<E>,
    /// Existing join when the object is LINKED.
    pub join: Option<EntityAccount>,
}

impl<E> Correlation<E> {
    fn missing() -> Self {
        Self {
            situation: SyncSituation::MissingEntity,
            entity: None,
            join: None,
        }
    }
}

/// Classify a connector object as LINKED, UNLINKED or MISSING_ENTITY.
///
/// An account already joined to an entity of the synchronized kind wins over
/// correlation. Otherwise entities whose correlation field equals the mapped
/// value are looked up; more than one match is an error.
pub async fn correlate<E: SyncEntity>(
    ctx: &SyncContext,
    repository: &dyn Repository<E>,
    definition: &FormDefinition,
    uid: &str,
    mapped: &MappedValues,
) -> SyncResult<Correlation<E>> {
    let system = ctx.config.system;

    if let Some(account) = ctx.store.find_account(system, uid, E::KIND).await? {
        if let Some(join) = ctx.store.join_of_account(&account).await? {
            if let Some(entity) = repository.get(join.entity).await? {
                debug!(uid = %uid, entity = %join.entity, "Linked through existing account");
                return Ok(Correlation {
                    situation: SyncSituation::Linked,
                    entity: Some(entity),
                    join: Some(join),
                });
            }
        }
    }

    let mapping = ctx.config.correlation_mapping().ok_or_else(|| {
        SyncError::configuration(format!(
            "correlation attribute '{}' is not mapped",
            ctx.config.correlation_attribute
        ))
    })?;
    let Some(value) = mapped.value(&mapping.target) else {
        return Ok(Correlation::missing());
    };
    if as_strings(value).is_empty() {
        debug!(uid = %uid, "Correlation value is empty");
        return Ok(Correlation::missing());
    }

    let mut candidates = match &mapping.target {
        FieldRef::Entity(field) => {
            repository
                .find(&E::filter_by(FieldMatch::new(*field, value.clone())))
                .await?
        }
        FieldRef::Extended(code) => {
            let owners = ctx
                .services
                .forms
                .find_owners(E::KIND, definition, code, value)
                .await?;
            load_all(repository, owners).await?
        }
    };

    match candidates.len() {
        0 => Ok(Correlation::missing()),
        1 => {
            let entity = candidates.remove(0);
            let join = ctx
                .store
                .entity_account(entity.id(), system, E::KIND)
                .await?
                .filter(|(account, _)| account.uid == uid)
                .map(|(_, join)| join);
            let situation = if join.is_some() {
                SyncSituation::Linked
            } else {
                SyncSituation::Unlinked
            };
            Ok(Correlation {
                situation,
                entity: Some(entity),
                join,
            })
        }
        count => Err(SyncError::AmbiguousCorrelation {
            uid: uid.to_string(),
            count,
        }),
    }
}

async fn load_all<E: SyncEntity>(
    repository: &dyn Repository<E>,
    ids: Vec<uuid::Uuid>,
) -> IdmResult<Vec<E>> {
    let mut entities = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(entity) = repository.get(id).await? {
            entities.push(entity);
        }
    }
    Ok(entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IdentitySyncOptions, SyncConfig, SyncKindConfig};
    use crate::mapping::AttributeMapping;
    use crate::model::Identity;
    use crate::script::RhaiScriptEvaluator;
    use crate::services::{FormOwner, SyncServices};
    use crate::store::IdmStore;
    use crate::types::{EntityField, EntityKind};
    use chrono::NaiveDate;
    use idm_connector::InMemoryConnector;
    use idm_core::SystemId;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn context(mapping: Vec<AttributeMapping>, correlation: &str) -> SyncContext {
        let config = SyncConfig::new(
            "users",
            SystemId::new(),
            "user",
            SyncKindConfig::Identity(IdentitySyncOptions::default()),
            mapping,
            correlation,
        );
        SyncContext::new(
            config,
            Arc::new(InMemoryConnector::new("ad")),
            IdmStore::in_memory(),
            SyncServices::in_memory(),
            Arc::new(RhaiScriptEvaluator::new()),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
        )
    }

    fn by_username() -> SyncContext {
        context(
            vec![AttributeMapping::entity("login", EntityField::Username).as_uid()],
            "login",
        )
    }

    fn mapped(field: EntityField, value: serde_json::Value) -> MappedValues {
        let mut values = MappedValues::new();
        values.insert(FieldRef::Entity(field), value);
        values
    }

    #[tokio::test]
    async fn test_no_match_is_missing_entity() {
        let ctx = by_username();
        let definition = FormDefinition::main(EntityKind::Identity);
        let result = correlate(
            &ctx,
            ctx.store.identities.as_ref(),
            &definition,
            "john",
            &mapped(EntityField::Username, json!("john")),
        )
        .await
        .unwrap();
        assert_eq!(result.situation, SyncSituation::MissingEntity);
        assert!(result.entity.is_none());
    }

    #[tokio::test]
    async fn test_single_match_unlinked_then_linked() {
        let ctx = by_username();
        let definition = FormDefinition::main(EntityKind::Identity);
        let john = ctx.store.identities.save(Identity::new("john")).await.unwrap();
        let values = mapped(EntityField::Username, json!("john"));

        let result = correlate(&ctx, ctx.store.identities.as_ref(), &definition, "john", &values)
            .await
            .unwrap();
        assert_eq!(result.situation, SyncSituation::Unlinked);
        assert_eq!(result.entity.map(|e| e.id), Some(john.id));

        ctx.store
            .link(ctx.config.system, "john", EntityKind::Identity, john.id)
            .await
            .unwrap();
        let result = correlate(&ctx, ctx.store.identities.as_ref(), &definition, "john", &values)
            .await
            .unwrap();
        assert_eq!(result.situation, SyncSituation::Linked);
        assert!(result.join.is_some());
    }

    #[tokio::test]
    async fn test_account_wins_over_correlation_value() {
        let ctx = by_username();
        let definition = FormDefinition::main(EntityKind::Identity);
        let john = ctx.store.identities.save(Identity::new("john")).await.unwrap();
        ctx.store
            .link(ctx.config.system, "u-1", EntityKind::Identity, john.id)
            .await
            .unwrap();

        let result = correlate(
            &ctx,
            ctx.store.identities.as_ref(),
            &definition,
            "u-1",
            &mapped(EntityField::Username, json!("renamed")),
        )
        .await
        .unwrap();
        assert_eq!(result.situation, SyncSituation::Linked);
    }

    #[tokio::test]
    async fn test_extended_attribute_ambiguity() {
        let ctx = context(
            vec![
                AttributeMapping::entity("login", EntityField::Username).as_uid(),
                AttributeMapping::extended("personal_no", "personal_number"),
            ],
            "personal_no",
        );
        let definition = FormDefinition::main(EntityKind::Identity);
        for name in ["a", "b"] {
            let identity = ctx.store.identities.save(Identity::new(name)).await.unwrap();
            ctx.services
                .forms
                .save_values(
                    FormOwner::new(EntityKind::Identity, identity.id),
                    &definition,
                    BTreeMap::from([("personal_number".to_string(), json!("42"))]),
                )
                .await
                .unwrap();
        }

        let mut values = MappedValues::new();
        values.insert(FieldRef::Extended("personal_number".into()), json!("42"));
        let err = correlate(&ctx, ctx.store.identities.as_ref(), &definition, "x", &values)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::AmbiguousCorrelation { count: 2, .. }));
    }
}
