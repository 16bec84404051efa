//! Contract slice synchronization and the slice-to-contract recalculation.

use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::{debug, info};
use uuid::Uuid;

use super::contract::{
    apply_contract_defaults, contract_options, resolve_values, schedule_hr_tasks,
    sync_contract_guarantees, ContractValues,
};
use super::{Draft, EntityHandler, SaveEvent};
use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::mapping::MappedValues;
use crate::model::{
    ContractFilter, ContractSlice, IdentityContract, SliceFilter, SliceGuarantee,
    SliceGuaranteeFilter,
};
use crate::services::{FormDefinition, FormOwner};
use crate::store::{IdmStore, Repository};
use crate::temporal::{self, SliceSpan};
use crate::types::{EntityField, EntityKind};
use crate::value::as_string;

fn slice_values(slice: &ContractSlice) -> ContractValues {
    ContractValues {
        identity: Some(slice.identity),
        position: slice.position.clone(),
        work_position: slice.work_position,
        main: slice.main,
        valid_from: slice.valid_from,
        valid_till: slice.valid_till,
        state: slice.state,
        description: slice.description.clone(),
        external_id: slice.external_id.clone(),
    }
}

fn apply_values(values: ContractValues, slice: &mut ContractSlice) {
    if let Some(identity) = values.identity {
        slice.identity = identity;
    }
    slice.position = values.position;
    slice.work_position = values.work_position;
    slice.main = values.main;
    slice.valid_from = values.valid_from;
    slice.valid_till = values.valid_till;
    slice.state = values.state;
    slice.description = values.description;
    slice.external_id = values.external_id;
}

async fn group_slices(
    store: &IdmStore,
    identity: Uuid,
    code: &str,
) -> SyncResult<Vec<ContractSlice>> {
    Ok(store
        .slices
        .find(&SliceFilter {
            identity: Some(identity),
            contract_code: Some(code.to_string()),
            ..SliceFilter::default()
        })
        .await?)
}

/// Another slice of the same contract starts after `slice`.
async fn has_successor(store: &IdmStore, slice: &ContractSlice) -> SyncResult<bool> {
    let Some(code) = slice.contract_code.as_deref() else {
        return Ok(false);
    };
    Ok(group_slices(store, slice.identity, code)
        .await?
        .iter()
        .filter(|other| other.id != slice.id)
        .filter_map(|other| other.valid_from)
        .any(|from| slice.valid_from.map_or(true, |own| own < from)))
}

async fn slice_guarantees(store: &IdmStore, slice: Uuid) -> SyncResult<Vec<SliceGuarantee>> {
    Ok(store
        .slice_guarantees
        .find(&SliceGuaranteeFilter { slice: Some(slice) })
        .await?)
}

async fn sync_slice_guarantees(store: &IdmStore, slice: Uuid, wanted: &[Uuid]) -> SyncResult<()> {
    let current = slice_guarantees(store, slice).await?;
    for guarantee in &current {
        if !wanted.contains(&guarantee.guarantee) {
            store.slice_guarantees.delete(guarantee.id).await?;
        }
    }
    for leader in wanted {
        if !current.iter().any(|g| g.guarantee == *leader) {
            store
                .slice_guarantees
                .save(SliceGuarantee::new(slice, *leader))
                .await?;
        }
    }
    Ok(())
}

/// Persist new bounds of the given spans onto their slices.
async fn store_spans(
    store: &IdmStore,
    slices: &[ContractSlice],
    spans: &[SliceSpan],
    using: Option<Uuid>,
    parent: Option<Uuid>,
) -> SyncResult<()> {
    for span in spans {
        let Some(slice) = slices.iter().find(|s| s.id == span.id) else {
            continue;
        };
        let mut updated = slice.clone();
        updated.valid_from = span.valid_from;
        updated.valid_till = span.valid_till;
        updated.using_as_contract = using == Some(slice.id);
        updated.dirty = false;
        if parent.is_some() {
            updated.parent_contract = parent;
        }
        if updated != *slice {
            debug!(slice = %slice.id, valid_till = ?updated.valid_till, "Slice bounds recalculated");
            store.slices.save(updated).await?;
        }
    }
    Ok(())
}

/// Recalculate the slices of one contract group and the contract they control.
///
/// Slice bounds are normalized, the slice valid today becomes the one used as
/// contract and its fields, leaders and extended attributes are copied onto
/// the parent contract. The contract is created when the group has none.
/// Returns the parent contract, `None` when the group has no slices.
pub async fn recalculate_group(
    ctx: &SyncContext,
    identity: Uuid,
    code: &str,
) -> SyncResult<Option<Uuid>> {
    let slices = group_slices(&ctx.store, identity, code).await?;
    if slices.is_empty() {
        debug!(identity = %identity, contract_code = %code, "Group has no slices left");
        return Ok(None);
    }

    let mut spans: Vec<SliceSpan> = slices.iter().map(ContractSlice::span).collect();
    temporal::normalize(&mut spans);
    let using = temporal::select_using(&spans, ctx.today);
    let (valid_from, valid_till) = temporal::group_validity(&spans);

    let existing = ctx
        .store
        .contracts
        .find_one(&ContractFilter {
            identity: Some(identity),
            external_id: Some(code.to_string()),
            ..ContractFilter::default()
        })
        .await?;
    let mut contract = existing.clone().unwrap_or_else(|| {
        let mut contract = IdentityContract::new(identity);
        contract.external_id = Some(code.to_string());
        contract
    });
    contract.controlled_by_slices = true;
    contract.valid_from = valid_from;
    contract.valid_till = valid_till;

    let using_slice = using.and_then(|id| slices.iter().find(|s| s.id == id));
    if let Some(slice) = using_slice {
        contract.position = slice.position.clone();
        contract.work_position = slice.work_position;
        contract.main = slice.main;
        contract.state = slice.state;
        contract.description = slice.description.clone();
    }

    let contract = if existing.as_ref() == Some(&contract) {
        contract
    } else {
        ctx.store.contracts.save(contract).await?
    };
    store_spans(&ctx.store, &slices, &spans, using, Some(contract.id)).await?;

    if let Some(slice) = using_slice {
        let leaders: Vec<Uuid> = slice_guarantees(&ctx.store, slice.id)
            .await?
            .into_iter()
            .map(|g| g.guarantee)
            .collect();
        sync_contract_guarantees(ctx, contract.id, &leaders).await?;

        let definition = FormDefinition::main(EntityKind::Contract);
        let values = ctx
            .services
            .forms
            .get_values(FormOwner::new(EntityKind::ContractSlice, slice.id), &definition)
            .await?;
        if !values.is_empty() {
            ctx.services
                .forms
                .save_values(FormOwner::new(EntityKind::Contract, contract.id), &definition, values)
                .await?;
        }
    }

    ctx.touch_contract(contract.id);
    info!(
        identity = %identity,
        contract_code = %code,
        contract = %contract.id,
        slices = slices.len(),
        using = ?using,
        "Contract recalculated from slices"
    );
    Ok(Some(contract.id))
}

pub struct ContractSliceHandler;

#[async_trait]
impl EntityHandler for ContractSliceHandler {
    type Entity = ContractSlice;

    fn repository<'s>(&self, store: &'s IdmStore) -> &'s dyn Repository<ContractSlice> {
        store.slices.as_ref()
    }

    /// Slices keep their extended attributes in the contract definition.
    fn form_definition(&self) -> FormDefinition {
        FormDefinition::main(EntityKind::Contract)
    }

    async fn build(
        &self,
        ctx: &SyncContext,
        mapped: &MappedValues,
        existing: Option<&ContractSlice>,
    ) -> SyncResult<Draft<ContractSlice>> {
        let options = contract_options(ctx);
        let mut slice = existing
            .cloned()
            .unwrap_or_else(|| ContractSlice::new(Uuid::nil()));
        let base = if existing.is_some() {
            slice_values(&slice)
        } else {
            ContractValues::default()
        };
        let previous_till = base.valid_till;
        let (values, guarantees) = resolve_values(ctx, &options, mapped, base).await?;
        apply_values(values, &mut slice);
        if let Some(code) = mapped.get(EntityField::ContractCode) {
            slice.contract_code = as_string(code);
        }

        // A bound closed by recalculation holds while a successor exists.
        if slice.valid_till.is_none()
            && previous_till.is_some()
            && has_successor(&ctx.store, &slice).await?
        {
            slice.valid_till = previous_till;
        }

        let mut draft = Draft::new(slice, mapped, existing.is_none());
        draft.guarantees = guarantees;
        Ok(draft)
    }

    async fn apply_defaults(
        &self,
        ctx: &SyncContext,
        draft: &mut Draft<ContractSlice>,
    ) -> SyncResult<()> {
        let options = contract_options(ctx);
        let mut values = slice_values(&draft.entity);
        apply_contract_defaults(&options, &mut values, &mut draft.guarantees, draft.created);
        apply_values(values, &mut draft.entity);
        if !ctx.flags.recalculate_slices && draft.entity.contract_code.is_some() {
            draft.entity.dirty = true;
        }
        Ok(())
    }

    async fn current_guarantees(
        &self,
        ctx: &SyncContext,
        entity: &ContractSlice,
    ) -> SyncResult<Vec<Uuid>> {
        Ok(slice_guarantees(&ctx.store, entity.id)
            .await?
            .into_iter()
            .map(|g| g.guarantee)
            .collect())
    }

    async fn after_save(
        &self,
        ctx: &SyncContext,
        event: SaveEvent<'_, ContractSlice>,
    ) -> SyncResult<Vec<String>> {
        if let Some(wanted) = event.guarantees {
            sync_slice_guarantees(&ctx.store, event.entity.id, wanted).await?;
        }
        let Some(code) = event.entity.contract_code.as_deref() else {
            debug!(slice = %event.entity.id, "Slice has no contract code, not recalculated");
            return Ok(Vec::new());
        };
        if ctx.flags.recalculate_slices {
            recalculate_group(ctx, event.entity.identity, code).await?;
            // A slice moved to another group leaves its old group to recalculate.
            if let Some(previous) = event.previous {
                let moved = previous.identity != event.entity.identity
                    || previous.contract_code.as_deref() != Some(code);
                if moved {
                    if let Some(old_code) = previous.contract_code.as_deref() {
                        recalculate_group(ctx, previous.identity, old_code).await?;
                    }
                }
            }
        } else {
            debug!(slice = %event.entity.id, "Recalculation disabled, slice left dirty");
        }
        Ok(Vec::new())
    }

    fn supports_account_update(&self) -> bool {
        false
    }

    async fn delete(&self, ctx: &SyncContext, entity: &ContractSlice) -> SyncResult<()> {
        let Some(code) = entity.contract_code.clone() else {
            ctx.store.delete_slice(entity.id).await?;
            return Ok(());
        };

        let siblings = group_slices(&ctx.store, entity.identity, &code).await?;
        let mut spans: Vec<SliceSpan> = siblings.iter().map(ContractSlice::span).collect();
        ctx.store.delete_slice(entity.id).await?;

        if ctx.flags.recalculate_slices {
            temporal::remove(&mut spans, entity.id);
            let remaining: Vec<ContractSlice> = siblings
                .into_iter()
                .filter(|s| s.id != entity.id)
                .collect();
            store_spans(&ctx.store, &remaining, &spans, None, None).await?;
            recalculate_group(ctx, entity.identity, &code).await?;
        } else {
            for mut sibling in siblings.into_iter().filter(|s| s.id != entity.id) {
                sibling.dirty = true;
                ctx.store.slices.save(sibling).await?;
            }
        }
        Ok(())
    }

    async fn after_batch(&self, ctx: &SyncContext) -> SyncResult<()> {
        if ctx.flags.recalculate_slices {
            let dirty = ctx
                .store
                .slices
                .find(&SliceFilter {
                    dirty: Some(true),
                    ..SliceFilter::default()
                })
                .await?;
            let groups: BTreeSet<(Uuid, String)> = dirty
                .into_iter()
                .filter_map(|s| s.contract_code.map(|code| (s.identity, code)))
                .collect();
            if !groups.is_empty() {
                info!(groups = groups.len(), "Recalculating dirty slice groups");
            }
            for (identity, code) in groups {
                recalculate_group(ctx, identity, &code).await?;
            }
        }
        schedule_hr_tasks(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContractSyncOptions, SyncConfig, SyncKindConfig};
    use crate::mapping::AttributeMapping;
    use crate::model::{ContractGuaranteeFilter, Identity};
    use chrono::{Days, NaiveDate};
    use idm_core::SystemId;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn context(recalculate: bool) -> SyncContext {
        let config = SyncConfig::new(
            "slices",
            SystemId::new(),
            "slice",
            SyncKindConfig::ContractSlice(ContractSyncOptions::default()),
            vec![AttributeMapping::entity("id", EntityField::ExternalId).as_uid()],
            "id",
        )
        .with_start_of_hr_processes(recalculate);
        SyncContext::for_tests(config)
    }

    fn day(ctx: &SyncContext, offset: i64) -> NaiveDate {
        if offset >= 0 {
            ctx.today + Days::new(offset as u64)
        } else {
            ctx.today - Days::new((-offset) as u64)
        }
    }

    async fn slice(
        ctx: &SyncContext,
        identity: Uuid,
        position: &str,
        from: i64,
    ) -> ContractSlice {
        let mut slice = ContractSlice::new(identity);
        slice.contract_code = Some("C-1".into());
        slice.position = Some(position.into());
        slice.valid_from = Some(day(ctx, from));
        ctx.store.slices.save(slice).await.unwrap()
    }

    #[tokio::test]
    async fn test_recalculate_creates_contract_from_current_slice() {
        let ctx = context(true);
        let john = ctx.store.identities.save(Identity::new("john")).await.unwrap();
        let leader = ctx.store.identities.save(Identity::new("boss")).await.unwrap();
        let old = slice(&ctx, john.id, "Junior", -20).await;
        let current = slice(&ctx, john.id, "Senior", -10).await;
        ctx.store
            .slice_guarantees
            .save(SliceGuarantee::new(current.id, leader.id))
            .await
            .unwrap();
        ctx.services
            .forms
            .save_values(
                FormOwner::new(EntityKind::ContractSlice, current.id),
                &FormDefinition::main(EntityKind::Contract),
                BTreeMap::from([("site".to_string(), json!("Brno"))]),
            )
            .await
            .unwrap();

        let contract = recalculate_group(&ctx, john.id, "C-1").await.unwrap().unwrap();

        let contract = ctx.store.contracts.get(contract).await.unwrap().unwrap();
        assert!(contract.controlled_by_slices);
        assert_eq!(contract.position.as_deref(), Some("Senior"));
        assert_eq!(contract.valid_from, Some(day(&ctx, -20)));
        assert_eq!(contract.valid_till, None);

        let old = ctx.store.slices.get(old.id).await.unwrap().unwrap();
        assert_eq!(old.valid_till, Some(day(&ctx, -11)));
        assert!(!old.using_as_contract);
        assert_eq!(old.parent_contract, Some(contract.id));
        let current = ctx.store.slices.get(current.id).await.unwrap().unwrap();
        assert!(current.using_as_contract);

        let leaders = ctx
            .store
            .contract_guarantees
            .find(&ContractGuaranteeFilter {
                contract: Some(contract.id),
                guarantee: None,
            })
            .await
            .unwrap();
        assert_eq!(leaders.len(), 1);
        assert_eq!(leaders[0].guarantee, leader.id);

        let eav = ctx
            .services
            .forms
            .get_values(
                FormOwner::new(EntityKind::Contract, contract.id),
                &FormDefinition::main(EntityKind::Contract),
            )
            .await
            .unwrap();
        assert_eq!(eav.get("site"), Some(&json!("Brno")));
        assert_eq!(ctx.touched_contracts(), vec![contract.id]);
    }

    #[tokio::test]
    async fn test_no_current_slice_keeps_group_validity() {
        let ctx = context(true);
        let john = ctx.store.identities.save(Identity::new("john")).await.unwrap();
        slice(&ctx, john.id, "Future", 5).await;

        let contract = recalculate_group(&ctx, john.id, "C-1").await.unwrap().unwrap();
        let contract = ctx.store.contracts.get(contract).await.unwrap().unwrap();
        assert_eq!(contract.valid_from, Some(day(&ctx, 5)));
        assert_eq!(contract.position, None);
    }

    #[tokio::test]
    async fn test_delete_last_slice_reopens_predecessor() {
        let ctx = context(true);
        let john = ctx.store.identities.save(Identity::new("john")).await.unwrap();
        let first = slice(&ctx, john.id, "Junior", -20).await;
        let last = slice(&ctx, john.id, "Senior", -10).await;
        recalculate_group(&ctx, john.id, "C-1").await.unwrap();
        let last = ctx.store.slices.get(last.id).await.unwrap().unwrap();

        ContractSliceHandler.delete(&ctx, &last).await.unwrap();

        let first = ctx.store.slices.get(first.id).await.unwrap().unwrap();
        assert_eq!(first.valid_till, None);
        assert!(first.using_as_contract);
        assert!(ctx.store.slices.get(last.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dirty_groups_recalculated_after_batch() {
        let ctx = context(true);
        let john = ctx.store.identities.save(Identity::new("john")).await.unwrap();
        let mut first = slice(&ctx, john.id, "Junior", -20).await;
        first.dirty = true;
        ctx.store.slices.save(first.clone()).await.unwrap();
        slice(&ctx, john.id, "Senior", -10).await;

        ContractSliceHandler.after_batch(&ctx).await.unwrap();

        let first = ctx.store.slices.get(first.id).await.unwrap().unwrap();
        assert!(!first.dirty);
        assert_eq!(first.valid_till, Some(day(&ctx, -11)));
        assert_eq!(
            ctx.store
                .slices
                .count(&SliceFilter {
                    dirty: Some(true),
                    ..SliceFilter::default()
                })
                .await
                .unwrap(),
            0
        );
    }
}
