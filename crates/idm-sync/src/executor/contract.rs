//! Contract synchronization and the contract building shared with slices.

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    apply_bool, apply_date, apply_string, resolve_identity, Draft, EntityHandler, SaveEvent,
};
use crate::config::ContractSyncOptions;
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::mapping::MappedValues;
use crate::model::{
    ContractGuarantee, ContractGuaranteeFilter, ContractState, IdentityContract, TreeNodeFilter,
};
use crate::services::{HrProcess, HrTask, PROPERTY_DEFAULT_TREE_TYPE};
use crate::store::{IdmStore, Repository};
use crate::types::EntityField;
use crate::value::{as_string, as_strings, as_uuid};

/// Fields contracts and slices are built from.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ContractValues {
    pub identity: Option<Uuid>,
    pub position: Option<String>,
    pub work_position: Option<Uuid>,
    pub main: bool,
    pub valid_from: Option<NaiveDate>,
    pub valid_till: Option<NaiveDate>,
    pub state: Option<ContractState>,
    pub description: Option<String>,
    pub external_id: Option<String>,
}

impl ContractValues {
    pub fn of_contract(contract: &IdentityContract) -> Self {
        Self {
            identity: Some(contract.identity),
            position: contract.position.clone(),
            work_position: contract.work_position,
            main: contract.main,
            valid_from: contract.valid_from,
            valid_till: contract.valid_till,
            state: contract.state,
            description: contract.description.clone(),
            external_id: contract.external_id.clone(),
        }
    }

    fn apply_to(self, contract: &mut IdentityContract) {
        if let Some(identity) = self.identity {
            contract.identity = identity;
        }
        contract.position = self.position;
        contract.work_position = self.work_position;
        contract.main = self.main;
        contract.valid_from = self.valid_from;
        contract.valid_till = self.valid_till;
        contract.state = self.state;
        contract.description = self.description;
        contract.external_id = self.external_id;
    }
}

pub(crate) fn contract_options(ctx: &SyncContext) -> ContractSyncOptions {
    ctx.config
        .kind
        .contract_options()
        .cloned()
        .unwrap_or_default()
}

/// Apply mapped values over `base`, resolving owner, work position and leaders.
pub(crate) async fn resolve_values(
    ctx: &SyncContext,
    options: &ContractSyncOptions,
    mapped: &MappedValues,
    mut values: ContractValues,
) -> SyncResult<(ContractValues, Option<Vec<Uuid>>)> {
    if let Some(owner) = mapped.get(EntityField::Identity).and_then(as_string) {
        let identity = resolve_identity(ctx, &owner)
            .await?
            .ok_or_else(|| SyncError::unresolved("identity", &owner))?;
        values.identity = Some(identity);
    }
    if values.identity.is_none() {
        return Err(SyncError::mapping(
            EntityField::Identity.as_str(),
            "owner identity is required",
        ));
    }

    apply_string(mapped, EntityField::Position, &mut values.position);
    apply_string(mapped, EntityField::Description, &mut values.description);
    apply_string(mapped, EntityField::ExternalId, &mut values.external_id);
    apply_bool(mapped, EntityField::Main, &mut values.main)?;
    apply_date(mapped, EntityField::ValidFrom, &mut values.valid_from)?;
    apply_date(mapped, EntityField::ValidTill, &mut values.valid_till)?;

    if let Some(state) = mapped.get(EntityField::State) {
        values.state = match as_string(state) {
            None => None,
            Some(text) => Some(
                text.parse::<ContractState>()
                    .map_err(|e| SyncError::mapping(EntityField::State.as_str(), e))?,
            ),
        };
    }

    if let Some(work_position) = mapped.get(EntityField::WorkPosition) {
        values.work_position = match as_string(work_position) {
            None => options.default_tree_node,
            Some(reference) => Some(resolve_work_position(ctx, options, &reference).await?),
        };
    }

    let guarantees = resolve_guarantees(ctx, options, mapped).await?;
    Ok((values, guarantees))
}

/// Tree node referenced by id or by code in the default tree type.
async fn resolve_work_position(
    ctx: &SyncContext,
    options: &ContractSyncOptions,
    reference: &str,
) -> SyncResult<Uuid> {
    if let Some(id) = as_uuid(reference) {
        if ctx.store.tree_nodes.get(id).await?.is_some() {
            return Ok(id);
        }
    }
    let tree_type = match options.default_tree_type {
        Some(tree_type) => Some(tree_type),
        None => {
            ctx.services
                .configuration
                .get_uuid(PROPERTY_DEFAULT_TREE_TYPE)
                .await?
        }
    };
    let node = ctx
        .store
        .tree_nodes
        .find_one(&TreeNodeFilter {
            tree_type,
            code: Some(reference.to_string()),
            ..TreeNodeFilter::default()
        })
        .await?;
    if let Some(node) = node {
        return Ok(node.id);
    }
    match options.default_tree_node {
        Some(default) => {
            warn!(work_position = %reference, default = %default, "Unknown work position, default node used");
            Ok(default)
        }
        None => Err(SyncError::unresolved("work position", reference)),
    }
}

/// Leaders referenced by id or username. `None` when leaders are not mapped.
async fn resolve_guarantees(
    ctx: &SyncContext,
    options: &ContractSyncOptions,
    mapped: &MappedValues,
) -> SyncResult<Option<Vec<Uuid>>> {
    let Some(value) = mapped.get(EntityField::Guarantees) else {
        return Ok(None);
    };
    let mut leaders = Vec::new();
    for reference in as_strings(value) {
        match resolve_identity(ctx, &reference).await? {
            Some(leader) => leaders.push(leader),
            None => match options.default_leader {
                Some(default) => {
                    warn!(leader = %reference, default = %default, "Unknown leader, default leader used");
                    leaders.push(default);
                }
                None => return Err(SyncError::unresolved("leader", reference)),
            },
        }
    }
    if leaders.is_empty() {
        leaders.extend(options.default_leader);
    }
    leaders.sort();
    leaders.dedup();
    Ok(Some(leaders))
}

/// Defaults for values left empty after building.
pub(crate) fn apply_contract_defaults(
    options: &ContractSyncOptions,
    values: &mut ContractValues,
    guarantees: &mut Option<Vec<Uuid>>,
    created: bool,
) {
    if values.work_position.is_none() {
        values.work_position = options.default_tree_node;
    }
    if created && guarantees.is_none() {
        if let Some(leader) = options.default_leader {
            *guarantees = Some(vec![leader]);
        }
    }
}

/// Make the contract guarantees equal `wanted` by adding and removing only the difference.
pub(crate) async fn sync_contract_guarantees(
    ctx: &SyncContext,
    contract: Uuid,
    wanted: &[Uuid],
) -> SyncResult<()> {
    let current = ctx
        .store
        .contract_guarantees
        .find(&ContractGuaranteeFilter {
            contract: Some(contract),
            guarantee: None,
        })
        .await?;
    for guarantee in &current {
        if !wanted.contains(&guarantee.guarantee) {
            ctx.store.contract_guarantees.delete(guarantee.id).await?;
        }
    }
    for leader in wanted {
        if !current.iter().any(|g| g.guarantee == *leader) {
            ctx.store
                .contract_guarantees
                .save(ContractGuarantee::new(contract, *leader))
                .await?;
        }
    }
    Ok(())
}

pub(crate) async fn contract_guarantees(ctx: &SyncContext, contract: Uuid) -> SyncResult<Vec<Uuid>> {
    Ok(ctx
        .store
        .contract_guarantees
        .find(&ContractGuaranteeFilter {
            contract: Some(contract),
            guarantee: None,
        })
        .await?
        .into_iter()
        .map(|g| g.guarantee)
        .collect())
}

/// Schedule the HR processes over the contracts touched in this run.
pub(crate) async fn schedule_hr_tasks(ctx: &SyncContext) -> SyncResult<()> {
    if !ctx.flags.schedule_hr_tasks {
        debug!("HR processes are not started by this synchronization");
        return Ok(());
    }
    let contracts = ctx.touched_contracts();
    if contracts.is_empty() {
        return Ok(());
    }
    for process in HrProcess::all() {
        ctx.services
            .scheduler
            .schedule(HrTask {
                process,
                contracts: contracts.clone(),
            })
            .await?;
    }
    info!(contracts = contracts.len(), "HR processes scheduled after synchronization");
    Ok(())
}

pub struct ContractHandler;

#[async_trait]
impl EntityHandler for ContractHandler {
    type Entity = IdentityContract;

    fn repository<'s>(&self, store: &'s IdmStore) -> &'s dyn Repository<IdentityContract> {
        store.contracts.as_ref()
    }

    async fn build(
        &self,
        ctx: &SyncContext,
        mapped: &MappedValues,
        existing: Option<&IdentityContract>,
    ) -> SyncResult<Draft<IdentityContract>> {
        let options = contract_options(ctx);
        let mut contract = existing
            .cloned()
            .unwrap_or_else(|| IdentityContract::new(Uuid::nil()));
        let base = if existing.is_some() {
            ContractValues::of_contract(&contract)
        } else {
            ContractValues::default()
        };
        let (values, guarantees) = resolve_values(ctx, &options, mapped, base).await?;
        values.apply_to(&mut contract);

        let mut draft = Draft::new(contract, mapped, existing.is_none());
        draft.guarantees = guarantees;
        Ok(draft)
    }

    async fn apply_defaults(
        &self,
        ctx: &SyncContext,
        draft: &mut Draft<IdentityContract>,
    ) -> SyncResult<()> {
        let options = contract_options(ctx);
        let mut values = ContractValues::of_contract(&draft.entity);
        apply_contract_defaults(&options, &mut values, &mut draft.guarantees, draft.created);
        values.apply_to(&mut draft.entity);
        Ok(())
    }

    async fn current_guarantees(
        &self,
        ctx: &SyncContext,
        entity: &IdentityContract,
    ) -> SyncResult<Vec<Uuid>> {
        contract_guarantees(ctx, entity.id).await
    }

    async fn after_save(
        &self,
        ctx: &SyncContext,
        event: SaveEvent<'_, IdentityContract>,
    ) -> SyncResult<Vec<String>> {
        if let Some(wanted) = event.guarantees {
            sync_contract_guarantees(ctx, event.entity.id, wanted).await?;
        }
        // HR processes never run inline during synchronization.
        ctx.touch_contract(event.entity.id);
        Ok(Vec::new())
    }

    async fn delete(&self, ctx: &SyncContext, entity: &IdentityContract) -> SyncResult<()> {
        ctx.store.delete_contract(entity.id).await?;
        Ok(())
    }

    async fn after_batch(&self, ctx: &SyncContext) -> SyncResult<()> {
        schedule_hr_tasks(ctx).await
    }
}
