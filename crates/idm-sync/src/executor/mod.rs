//! Entity-type executors.
//!
//! Each entity kind implements [`EntityHandler`]: how an entity is built from
//! mapped values, what defaults apply and what follows a save. The generic
//! [`EntityExecutor`] drives one connector object through correlation, the
//! reconciliation policy and the decided action, and exposes the result as a
//! [`SyncExecutor`] selected by kind from the [`ExecutorRegistry`].

mod contract;
mod identity;
mod role;
mod slice;
mod tree;

pub use contract::ContractHandler;
pub use identity::IdentityHandler;
pub use role::RoleHandler;
pub use slice::{recalculate_group, ContractSliceHandler};
pub use tree::{order_parent_first, RoleCatalogueHandler, TreeHandler};

use async_trait::async_trait;
use chrono::NaiveDate;
use idm_connector::{ConnectorObject, Uid};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::SyncContext;
use crate::correlation::correlate;
use crate::error::{SyncError, SyncResult};
use crate::mapping::MappedValues;
use crate::model::{Account, ContractFilter, EntityAccount, IdentityContract, IdentityFilter};
use crate::policy::{decide, extended_differences, guarantees_differ, ChangeSet, Decision};
use crate::services::{FormDefinition, FormOwner};
use crate::store::{IdmStore, Record, Repository, SyncEntity};
use crate::types::{EntityField, EntityKind, FieldRef, OperationResult, SyncActionType, SyncSituation};
use crate::value::{as_bool, as_date, as_string, as_uuid};

/// Result of processing one connector object or missing account.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemOutcome {
    pub action: SyncActionType,
    pub result: OperationResult,
    pub entity: Option<Uuid>,
    pub display_name: Option<String>,
    pub message: String,
}

impl ItemOutcome {
    pub fn new(action: SyncActionType) -> Self {
        Self {
            action,
            result: OperationResult::Success,
            entity: None,
            display_name: None,
            message: String::new(),
        }
    }

    fn describe<E: SyncEntity>(&mut self, entity: &E) {
        self.entity = Some(entity.id());
        self.display_name = Some(entity.display_name());
    }

    fn note(&mut self, line: impl AsRef<str>) {
        if !self.message.is_empty() {
            self.message.push('\n');
        }
        self.message.push_str(line.as_ref());
    }

    /// Record warnings; any warning turns a success into WARNING.
    fn warn_all(&mut self, warnings: Vec<String>) {
        for warning in warnings {
            self.result = self.result.merge(OperationResult::Warning);
            self.note(warning);
        }
    }

    fn fail(&mut self, error: &SyncError) {
        self.result = OperationResult::Error;
        self.note(error.to_string());
    }
}

/// Batch ordered for processing.
#[derive(Debug, Default)]
pub struct PreparedBatch {
    pub objects: Vec<ConnectorObject>,
    /// Objects dropped while preparing the batch, by UID.
    pub rejected: Vec<(String, ItemOutcome)>,
}

impl PreparedBatch {
    pub fn new(objects: Vec<ConnectorObject>) -> Self {
        Self {
            objects,
            rejected: Vec::new(),
        }
    }

    /// Drop an object that failed preparation; it is logged as an error.
    pub fn reject(&mut self, uid: impl Into<String>, error: &SyncError) {
        let mut outcome = ItemOutcome::new(SyncActionType::Unknown);
        outcome.fail(error);
        self.rejected.push((uid.into(), outcome));
    }
}

/// Entity candidate produced from mapped values.
#[derive(Debug, Clone)]
pub struct Draft<E> {
    pub entity: E,
    /// Guarantee identities when mapped or defaulted.
    pub guarantees: Option<Vec<Uuid>>,
    pub extended: BTreeMap<String, Value>,
    pub warnings: Vec<String>,
    pub created: bool,
}

impl<E> Draft<E> {
    pub fn new(entity: E, mapped: &MappedValues, created: bool) -> Self {
        Self {
            entity,
            guarantees: None,
            extended: mapped.extended.clone(),
            warnings: Vec::new(),
            created,
        }
    }
}

/// A saved entity handed to [`EntityHandler::after_save`].
#[derive(Debug)]
pub struct SaveEvent<'a, E> {
    pub entity: &'a E,
    pub previous: Option<&'a E>,
    pub guarantees: Option<&'a [Uuid]>,
    pub object: &'a ConnectorObject,
    pub action: SyncActionType,
}

/// Kind-specific part of synchronization.
#[async_trait]
pub trait EntityHandler: Send + Sync + 'static {
    type Entity: SyncEntity;

    fn repository<'s>(&self, store: &'s IdmStore) -> &'s dyn Repository<Self::Entity>;

    /// Form definition holding the extended attributes of the entity.
    fn form_definition(&self) -> FormDefinition {
        FormDefinition::main(Self::Entity::KIND)
    }

    /// Build the entity from mapped values over the existing one.
    async fn build(
        &self,
        ctx: &SyncContext,
        mapped: &MappedValues,
        existing: Option<&Self::Entity>,
    ) -> SyncResult<Draft<Self::Entity>>;

    async fn apply_defaults(
        &self,
        _ctx: &SyncContext,
        _draft: &mut Draft<Self::Entity>,
    ) -> SyncResult<()> {
        Ok(())
    }

    /// Persisted guarantees, compared by the differential diff.
    async fn current_guarantees(
        &self,
        _ctx: &SyncContext,
        _entity: &Self::Entity,
    ) -> SyncResult<Vec<Uuid>> {
        Ok(Vec::new())
    }

    /// Names of related state `after_save` would change for this object.
    /// A differential update runs when any is reported.
    async fn related_changes(
        &self,
        _ctx: &SyncContext,
        _entity: &Self::Entity,
        _object: &ConnectorObject,
    ) -> SyncResult<Vec<String>> {
        Ok(Vec::new())
    }

    /// Follow-up of a save. Returns warnings.
    async fn after_save(
        &self,
        _ctx: &SyncContext,
        _event: SaveEvent<'_, Self::Entity>,
    ) -> SyncResult<Vec<String>> {
        Ok(Vec::new())
    }

    /// Follow-up of a new link. Returns warnings.
    async fn after_link(
        &self,
        _ctx: &SyncContext,
        _entity: &Self::Entity,
    ) -> SyncResult<Vec<String>> {
        Ok(Vec::new())
    }

    /// Whether entity state can be pushed to the account.
    fn supports_account_update(&self) -> bool {
        true
    }

    async fn delete(&self, ctx: &SyncContext, entity: &Self::Entity) -> SyncResult<()>;

    /// The batch must be read completely before processing.
    fn reads_whole_batch(&self) -> bool {
        false
    }

    async fn prepare_batch(
        &self,
        _ctx: &SyncContext,
        objects: Vec<ConnectorObject>,
    ) -> SyncResult<PreparedBatch> {
        Ok(PreparedBatch::new(objects))
    }

    async fn after_batch(&self, _ctx: &SyncContext) -> SyncResult<()> {
        Ok(())
    }
}

/// Object-level executor of one entity kind.
#[async_trait]
pub trait SyncExecutor: Send + Sync {
    fn kind(&self) -> EntityKind;

    fn reads_whole_batch(&self) -> bool;

    async fn prepare_batch(
        &self,
        ctx: &SyncContext,
        objects: Vec<ConnectorObject>,
    ) -> SyncResult<PreparedBatch>;

    /// Process one connector object. Errors are reported in the outcome.
    async fn process_object(&self, ctx: &SyncContext, object: &ConnectorObject) -> ItemOutcome;

    /// Handle an account not read in this run: its linked entity goes
    /// through the missing-account policy, an account without a link is
    /// removed. Errors are reported in the outcome.
    async fn process_missing_account(&self, ctx: &SyncContext, account: &Account) -> ItemOutcome;

    async fn after_batch(&self, ctx: &SyncContext) -> SyncResult<()>;
}

/// Executor driving an [`EntityHandler`].
pub struct EntityExecutor<H> {
    handler: H,
}

impl<H: EntityHandler> EntityExecutor<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    fn owner(id: Uuid) -> FormOwner {
        FormOwner::new(H::Entity::KIND, id)
    }

    async fn run_object(
        &self,
        ctx: &SyncContext,
        object: &ConnectorObject,
        outcome: &mut ItemOutcome,
    ) -> SyncResult<()> {
        let uid = object.uid.value();
        let mapped = ctx.resolver().inbound(object)?;
        let repository = self.handler.repository(&ctx.store);
        let definition = self.handler.form_definition();

        let correlation = correlate(ctx, repository, &definition, uid, &mapped).await?;
        if let Some(entity) = &correlation.entity {
            outcome.describe(entity);
            ctx.remember_resolved(uid, entity.id());
        }

        let decision = decide(&ctx.config, correlation.situation);
        outcome.action = decision.log_action();
        debug!(
            uid = %uid,
            situation = %decision.situation,
            action = %decision.action,
            "Connector object classified"
        );

        if let Some(key) = &decision.workflow_key {
            let variables = json!({
                "configId": ctx.config.id.to_string(),
                "situation": decision.situation.as_str(),
                "action": decision.action.as_str(),
                "uid": uid,
                "entityId": correlation.entity.as_ref().map(|e| e.id().to_string()),
                "attributes": mapped.to_json(),
            });
            return self.start_workflow(ctx, key, variables, outcome).await;
        }

        let entity = correlation.entity;
        match decision.action {
            SyncActionType::Ignore => {
                outcome.result = OperationResult::Ignore;
            }
            SyncActionType::CreateEntity => {
                self.create(ctx, object, &mapped, outcome).await?;
            }
            SyncActionType::UpdateEntity => {
                let entity = Self::require(entity, &decision)?;
                self.update(ctx, object, &mapped, entity, decision.action, outcome)
                    .await?;
            }
            SyncActionType::Link => {
                let entity = Self::require(entity, &decision)?;
                self.link(ctx, uid, &entity, outcome).await?;
            }
            SyncActionType::LinkAndUpdateEntity => {
                let entity = Self::require(entity, &decision)?;
                self.link(ctx, uid, &entity, outcome).await?;
                self.update(ctx, object, &mapped, entity, decision.action, outcome)
                    .await?;
            }
            SyncActionType::LinkAndUpdateAccount => {
                let entity = Self::require(entity, &decision)?;
                self.link(ctx, uid, &entity, outcome).await?;
                self.update_account(ctx, &object.uid, &entity, outcome).await?;
            }
            SyncActionType::UpdateAccount => {
                let entity = Self::require(entity, &decision)?;
                self.update_account(ctx, &object.uid, &entity, outcome).await?;
            }
            SyncActionType::Unlink => {
                self.unlink(ctx, uid, correlation.join, outcome).await?;
            }
            other => {
                return Err(SyncError::internal(format!(
                    "action {other} is not valid for situation {}",
                    decision.situation
                )))
            }
        }
        Ok(())
    }

    fn require(entity: Option<H::Entity>, decision: &Decision) -> SyncResult<H::Entity> {
        entity.ok_or_else(|| {
            SyncError::internal(format!(
                "{} without a correlated entity",
                decision.situation
            ))
        })
    }

    async fn start_workflow(
        &self,
        ctx: &SyncContext,
        key: &str,
        variables: Value,
        outcome: &mut ItemOutcome,
    ) -> SyncResult<()> {
        let process = ctx.services.workflows.start_process(key, variables).await?;
        outcome.result = OperationResult::Wf;
        outcome.note(format!("Workflow '{key}' started as process {process}"));
        Ok(())
    }

    async fn save_extended(
        &self,
        ctx: &SyncContext,
        entity: Uuid,
        values: &BTreeMap<String, Value>,
    ) -> SyncResult<()> {
        if values.is_empty() {
            return Ok(());
        }
        ctx.services
            .forms
            .save_values(Self::owner(entity), &self.handler.form_definition(), values.clone())
            .await?;
        Ok(())
    }

    async fn create(
        &self,
        ctx: &SyncContext,
        object: &ConnectorObject,
        mapped: &MappedValues,
        outcome: &mut ItemOutcome,
    ) -> SyncResult<()> {
        let mut draft = self.handler.build(ctx, mapped, None).await?;
        self.handler.apply_defaults(ctx, &mut draft).await?;

        let saved = self
            .handler
            .repository(&ctx.store)
            .save(draft.entity.clone())
            .await?;
        outcome.describe(&saved);
        ctx.remember_resolved(object.uid.value(), saved.id());
        self.save_extended(ctx, saved.id(), &draft.extended).await?;

        let mut warnings = std::mem::take(&mut draft.warnings);
        warnings.extend(
            self.handler
                .after_save(
                    ctx,
                    SaveEvent {
                        entity: &saved,
                        previous: None,
                        guarantees: draft.guarantees.as_deref(),
                        object,
                        action: SyncActionType::CreateEntity,
                    },
                )
                .await?,
        );

        if ctx.config.reconciliation {
            ctx.store
                .link(ctx.config.system, object.uid.value(), H::Entity::KIND, saved.id())
                .await?;
        }

        info!(uid = %object.uid, entity = %saved.id(), kind = %H::Entity::KIND, "Entity created");
        outcome.warn_all(warnings);
        Ok(())
    }

    async fn changes(
        &self,
        ctx: &SyncContext,
        existing: &H::Entity,
        draft: &Draft<H::Entity>,
        object: &ConnectorObject,
    ) -> SyncResult<ChangeSet> {
        let current_guarantees = self.handler.current_guarantees(ctx, existing).await?;
        let current_extended = if draft.extended.is_empty() {
            BTreeMap::new()
        } else {
            ctx.services
                .forms
                .get_values(Self::owner(existing.id()), &self.handler.form_definition())
                .await?
        };
        Ok(ChangeSet {
            entity: draft.entity != *existing,
            guarantees: guarantees_differ(&current_guarantees, draft.guarantees.as_deref()),
            extended: extended_differences(&current_extended, &draft.extended),
            related: self.handler.related_changes(ctx, existing, object).await?,
        })
    }

    async fn update(
        &self,
        ctx: &SyncContext,
        object: &ConnectorObject,
        mapped: &MappedValues,
        existing: H::Entity,
        action: SyncActionType,
        outcome: &mut ItemOutcome,
    ) -> SyncResult<()> {
        let mut draft = self.handler.build(ctx, mapped, Some(&existing)).await?;
        self.handler.apply_defaults(ctx, &mut draft).await?;

        if ctx.config.differential_sync {
            let changes = self.changes(ctx, &existing, &draft, object).await?;
            if changes.is_empty() {
                debug!(uid = %object.uid, entity = %existing.id(), "No changes, update skipped");
                if action == SyncActionType::UpdateEntity {
                    outcome.result = OperationResult::Ignore;
                }
                outcome.note("Entity is up to date");
                return Ok(());
            }
            outcome.note(changes.to_string());
        }

        let saved = self
            .handler
            .repository(&ctx.store)
            .save(draft.entity.clone())
            .await?;
        outcome.describe(&saved);
        self.save_extended(ctx, saved.id(), &draft.extended).await?;

        let mut warnings = std::mem::take(&mut draft.warnings);
        warnings.extend(
            self.handler
                .after_save(
                    ctx,
                    SaveEvent {
                        entity: &saved,
                        previous: Some(&existing),
                        guarantees: draft.guarantees.as_deref(),
                        object,
                        action,
                    },
                )
                .await?,
        );
        debug!(uid = %object.uid, entity = %saved.id(), "Entity updated");
        outcome.warn_all(warnings);
        Ok(())
    }

    async fn link(
        &self,
        ctx: &SyncContext,
        uid: &str,
        entity: &H::Entity,
        outcome: &mut ItemOutcome,
    ) -> SyncResult<()> {
        ctx.store
            .link(ctx.config.system, uid, H::Entity::KIND, entity.id())
            .await?;
        let warnings = self.handler.after_link(ctx, entity).await?;
        outcome.warn_all(warnings);
        Ok(())
    }

    async fn unlink(
        &self,
        ctx: &SyncContext,
        uid: &str,
        join: Option<EntityAccount>,
        outcome: &mut ItemOutcome,
    ) -> SyncResult<()> {
        if let Some(join) = join {
            ctx.store.unlink(&join).await?;
            outcome.note(format!("Account '{uid}' unlinked"));
        } else if let Some(account) = ctx
            .store
            .find_account(ctx.config.system, uid, H::Entity::KIND)
            .await?
        {
            ctx.store.delete_account(account.id).await?;
            outcome.note(format!("Orphan account '{uid}' removed"));
        }
        Ok(())
    }

    /// Current entity state in mapped form, for outbound mapping.
    async fn entity_values(&self, ctx: &SyncContext, entity: &H::Entity) -> SyncResult<MappedValues> {
        let extended = ctx
            .services
            .forms
            .get_values(Self::owner(entity.id()), &self.handler.form_definition())
            .await?;
        let mut values = MappedValues::new();
        for mapping in &ctx.config.mapping {
            let value = match &mapping.target {
                FieldRef::Entity(field) => entity.field(*field),
                FieldRef::Extended(code) => extended.get(code).cloned().unwrap_or(Value::Null),
            };
            values.insert(mapping.target.clone(), value);
        }
        Ok(values)
    }

    async fn update_account(
        &self,
        ctx: &SyncContext,
        uid: &Uid,
        entity: &H::Entity,
        outcome: &mut ItemOutcome,
    ) -> SyncResult<()> {
        if !self.handler.supports_account_update() {
            outcome.result = outcome.result.merge(OperationResult::Warning);
            outcome.note(format!(
                "Account update is not supported for {}",
                H::Entity::KIND
            ));
            return Ok(());
        }
        let values = self.entity_values(ctx, entity).await?;
        let delta = ctx.resolver().outbound(&values)?;
        if delta.is_empty() {
            outcome.note("Nothing to push to the account");
            return Ok(());
        }
        let attributes = delta.affected_attributes().join(", ");
        ctx.connector
            .update(&ctx.config.object_class, uid, delta)
            .await?;
        outcome.note(format!("Account updated: {attributes}"));
        Ok(())
    }

    async fn run_missing_account(
        &self,
        ctx: &SyncContext,
        account: &Account,
        outcome: &mut ItemOutcome,
    ) -> SyncResult<()> {
        let Some(join) = ctx.store.join_of_account(account).await? else {
            ctx.store.delete_account(account.id).await?;
            outcome.note(format!("Account '{}' without entity removed", account.uid));
            return Ok(());
        };
        let join = &join;
        let decision = decide(&ctx.config, SyncSituation::MissingAccount);
        outcome.action = decision.log_action();

        let Some(entity) = self
            .handler
            .repository(&ctx.store)
            .get(join.entity)
            .await?
        else {
            ctx.store.unlink(join).await?;
            outcome.result = OperationResult::Warning;
            outcome.note(format!("Entity {} no longer exists, join removed", join.entity));
            return Ok(());
        };
        outcome.describe(&entity);

        if let Some(key) = &decision.workflow_key {
            let variables = json!({
                "configId": ctx.config.id.to_string(),
                "situation": decision.situation.as_str(),
                "action": decision.action.as_str(),
                "uid": account.uid,
                "entityId": entity.id().to_string(),
            });
            return self.start_workflow(ctx, key, variables, outcome).await;
        }

        match decision.action {
            SyncActionType::Ignore => outcome.result = OperationResult::Ignore,
            SyncActionType::DeleteEntity => {
                self.handler.delete(ctx, &entity).await?;
                info!(uid = %account.uid, entity = %entity.id(), "Entity deleted, account is missing");
            }
            SyncActionType::Unlink => {
                ctx.store.unlink(join).await?;
                outcome.note(format!("Account '{}' unlinked", account.uid));
            }
            other => {
                return Err(SyncError::internal(format!(
                    "action {other} is not valid for a missing account"
                )))
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<H: EntityHandler> SyncExecutor for EntityExecutor<H> {
    fn kind(&self) -> EntityKind {
        H::Entity::KIND
    }

    fn reads_whole_batch(&self) -> bool {
        self.handler.reads_whole_batch()
    }

    async fn prepare_batch(
        &self,
        ctx: &SyncContext,
        objects: Vec<ConnectorObject>,
    ) -> SyncResult<PreparedBatch> {
        self.handler.prepare_batch(ctx, objects).await
    }

    async fn process_object(&self, ctx: &SyncContext, object: &ConnectorObject) -> ItemOutcome {
        let mut outcome = ItemOutcome::new(SyncActionType::Unknown);
        if let Err(e) = self.run_object(ctx, object, &mut outcome).await {
            warn!(uid = %object.uid, action = %outcome.action, error = %e, "Synchronization item failed");
            outcome.fail(&e);
        }
        outcome
    }

    async fn process_missing_account(&self, ctx: &SyncContext, account: &Account) -> ItemOutcome {
        let mut outcome = ItemOutcome::new(SyncActionType::MissingAccount);
        if let Err(e) = self.run_missing_account(ctx, account, &mut outcome).await {
            warn!(uid = %account.uid, error = %e, "Missing account item failed");
            outcome.fail(&e);
        }
        outcome
    }

    async fn after_batch(&self, ctx: &SyncContext) -> SyncResult<()> {
        self.handler.after_batch(ctx).await
    }
}

/// Executors by entity kind.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<EntityKind, Arc<dyn SyncExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the executors of all entity kinds.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EntityExecutor::new(IdentityHandler)));
        registry.register(Arc::new(EntityExecutor::new(ContractHandler)));
        registry.register(Arc::new(EntityExecutor::new(ContractSliceHandler)));
        registry.register(Arc::new(EntityExecutor::new(TreeHandler)));
        registry.register(Arc::new(EntityExecutor::new(RoleCatalogueHandler)));
        registry.register(Arc::new(EntityExecutor::new(RoleHandler)));
        registry
    }

    pub fn register(&mut self, executor: Arc<dyn SyncExecutor>) {
        self.executors.insert(executor.kind(), executor);
    }

    pub fn get(&self, kind: EntityKind) -> Option<Arc<dyn SyncExecutor>> {
        self.executors.get(&kind).cloned()
    }
}

// ── Shared building helpers ───────────────────────────────────────────────

pub(crate) fn apply_string(mapped: &MappedValues, field: EntityField, target: &mut Option<String>) {
    if let Some(value) = mapped.get(field) {
        *target = as_string(value);
    }
}

pub(crate) fn apply_bool(mapped: &MappedValues, field: EntityField, target: &mut bool) -> SyncResult<()> {
    if let Some(value) = mapped.get(field) {
        *target = as_bool(field, value)?.unwrap_or(false);
    }
    Ok(())
}

pub(crate) fn apply_date(
    mapped: &MappedValues,
    field: EntityField,
    target: &mut Option<NaiveDate>,
) -> SyncResult<()> {
    if let Some(value) = mapped.get(field) {
        *target = as_date(field, value)?;
    }
    Ok(())
}

/// Identity referenced by id or username.
pub(crate) async fn resolve_identity(ctx: &SyncContext, reference: &str) -> SyncResult<Option<Uuid>> {
    if let Some(id) = as_uuid(reference) {
        if ctx.store.identities.get(id).await?.is_some() {
            return Ok(Some(id));
        }
    }
    Ok(ctx
        .store
        .identities
        .find_one(&IdentityFilter::by_username(reference))
        .await?
        .map(|identity| identity.id))
}

/// Contract roles are granted on: the main contract, else the earliest one.
pub(crate) async fn prime_contract(
    store: &IdmStore,
    identity: Uuid,
) -> SyncResult<Option<IdentityContract>> {
    let mut contracts = store
        .contracts
        .find(&ContractFilter {
            identity: Some(identity),
            ..ContractFilter::default()
        })
        .await?;
    contracts.sort_by(|a, b| {
        b.main
            .cmp(&a.main)
            .then_with(|| a.valid_from.cmp(&b.valid_from))
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(contracts.into_iter().next())
}
