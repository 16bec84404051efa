use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::contract::{contract_field, ContractFields, ContractState};
use crate::store::{criterion, FieldMatch, Record, SyncEntity};
use crate::temporal::SliceSpan;
use crate::types::{EntityField, EntityKind};
use crate::value::from_string;

/// Time-bounded segment of a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractSlice {
    pub id: Uuid,
    /// Owner identity.
    pub identity: Uuid,
    /// Groups the slices of one logical contract.
    pub contract_code: Option<String>,
    pub parent_contract: Option<Uuid>,
    pub position: Option<String>,
    pub work_position: Option<Uuid>,
    pub main: bool,
    pub valid_from: Option<NaiveDate>,
    pub valid_till: Option<NaiveDate>,
    pub state: Option<ContractState>,
    pub description: Option<String>,
    pub external_id: Option<String>,
    /// The slice currently copied onto the parent contract.
    pub using_as_contract: bool,
    /// Saved while recalculation was off; boundaries may be stale.
    pub dirty: bool,
}

impl ContractSlice {
    pub fn new(identity: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            contract_code: None,
            parent_contract: None,
            position: None,
            work_position: None,
            main: false,
            valid_from: None,
            valid_till: None,
            state: None,
            description: None,
            external_id: None,
            using_as_contract: false,
            dirty: false,
        }
    }

    /// Temporal view of the slice.
    #[must_use]
    pub fn span(&self) -> SliceSpan {
        SliceSpan::new(self.id, self.valid_from, self.valid_till)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SliceFilter {
    pub identity: Option<Uuid>,
    pub contract_code: Option<String>,
    pub parent_contract: Option<Uuid>,
    pub dirty: Option<bool>,
    pub field: Option<FieldMatch>,
}

impl Record for ContractSlice {
    type Filter = SliceFilter;
    const NAME: &'static str = "ContractSlice";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &SliceFilter) -> bool {
        criterion(&filter.identity, &self.identity)
            && filter
                .contract_code
                .as_ref()
                .map_or(true, |code| self.contract_code.as_ref() == Some(code))
            && filter
                .parent_contract
                .map_or(true, |p| self.parent_contract == Some(p))
            && criterion(&filter.dirty, &self.dirty)
            && filter.field.as_ref().map_or(true, |f| f.matches(self))
    }
}

impl SyncEntity for ContractSlice {
    const KIND: EntityKind = EntityKind::ContractSlice;

    fn field(&self, field: EntityField) -> Value {
        match field {
            EntityField::ContractCode => from_string(self.contract_code.as_deref()),
            other => contract_field(
                other,
                ContractFields {
                    identity: self.identity,
                    position: self.position.as_deref(),
                    work_position: self.work_position,
                    main: self.main,
                    valid_from: self.valid_from,
                    valid_till: self.valid_till,
                    state: self.state,
                    description: self.description.as_deref(),
                    external_id: self.external_id.as_deref(),
                },
            ),
        }
    }

    fn display_name(&self) -> String {
        self.position
            .clone()
            .or_else(|| self.description.clone())
            .unwrap_or_else(|| self.id.to_string())
    }

    fn filter_by(field: FieldMatch) -> SliceFilter {
        SliceFilter {
            field: Some(field),
            ..SliceFilter::default()
        }
    }
}

/// Leader of a contract slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceGuarantee {
    pub id: Uuid,
    pub slice: Uuid,
    pub guarantee: Uuid,
}

impl SliceGuarantee {
    pub fn new(slice: Uuid, guarantee: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            slice,
            guarantee,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SliceGuaranteeFilter {
    pub slice: Option<Uuid>,
}

impl Record for SliceGuarantee {
    type Filter = SliceGuaranteeFilter;
    const NAME: &'static str = "SliceGuarantee";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &SliceGuaranteeFilter) -> bool {
        criterion(&filter.slice, &self.slice)
    }
}
