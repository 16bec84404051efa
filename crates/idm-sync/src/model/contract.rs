use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::store::{criterion, FieldMatch, Record, SyncEntity};
use crate::types::{EntityField, EntityKind};
use crate::value::{from_date, from_string, from_uuid};

/// Explicit contract state. An absent state means the contract follows its validity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractState {
    Disabled,
    Excluded,
}

impl ContractState {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractState::Disabled => "DISABLED",
            ContractState::Excluded => "EXCLUDED",
        }
    }
}

impl fmt::Display for ContractState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ContractState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DISABLED" => Ok(ContractState::Disabled),
            "EXCLUDED" => Ok(ContractState::Excluded),
            _ => Err(format!("Unknown contract state: {s}")),
        }
    }
}

/// Working contract of an identity.
///
/// When `controlled_by_slices` is set the contract is the materialized state
/// of its currently used slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityContract {
    pub id: Uuid,
    pub identity: Uuid,
    pub position: Option<String>,
    pub work_position: Option<Uuid>,
    pub main: bool,
    pub valid_from: Option<NaiveDate>,
    pub valid_till: Option<NaiveDate>,
    pub state: Option<ContractState>,
    pub description: Option<String>,
    pub external_id: Option<String>,
    pub controlled_by_slices: bool,
}

impl IdentityContract {
    pub fn new(identity: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            position: None,
            work_position: None,
            main: false,
            valid_from: None,
            valid_till: None,
            state: None,
            description: None,
            external_id: None,
            controlled_by_slices: false,
        }
    }

    /// Whether the validity window contains the given day.
    #[must_use]
    pub fn is_valid_on(&self, day: NaiveDate) -> bool {
        self.valid_from.map_or(true, |from| from <= day)
            && self.valid_till.map_or(true, |till| day <= till)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContractFilter {
    pub identity: Option<Uuid>,
    pub external_id: Option<String>,
    pub field: Option<FieldMatch>,
}

impl Record for IdentityContract {
    type Filter = ContractFilter;
    const NAME: &'static str = "IdentityContract";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &ContractFilter) -> bool {
        criterion(&filter.identity, &self.identity)
            && filter
                .external_id
                .as_ref()
                .map_or(true, |code| self.external_id.as_ref() == Some(code))
            && filter.field.as_ref().map_or(true, |f| f.matches(self))
    }
}

impl SyncEntity for IdentityContract {
    const KIND: EntityKind = EntityKind::Contract;

    fn field(&self, field: EntityField) -> Value {
        contract_field(
            field,
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
        )
    }

    fn display_name(&self) -> String {
        self.position
            .clone()
            .or_else(|| self.external_id.clone())
            .unwrap_or_else(|| self.id.to_string())
    }

    fn filter_by(field: FieldMatch) -> ContractFilter {
        ContractFilter {
            field: Some(field),
            ..ContractFilter::default()
        }
    }
}

/// Borrowed view of the fields contracts and slices share.
pub(crate) struct ContractFields<'a> {
    pub identity: Uuid,
    pub position: Option<&'a str>,
    pub work_position: Option<Uuid>,
    pub main: bool,
    pub valid_from: Option<NaiveDate>,
    pub valid_till: Option<NaiveDate>,
    pub state: Option<ContractState>,
    pub description: Option<&'a str>,
    pub external_id: Option<&'a str>,
}

pub(crate) fn contract_field(field: EntityField, c: ContractFields<'_>) -> Value {
    match field {
        EntityField::Identity => Value::String(c.identity.to_string()),
        EntityField::Position => from_string(c.position),
        EntityField::WorkPosition => from_uuid(c.work_position),
        EntityField::Main => Value::Bool(c.main),
        EntityField::ValidFrom => from_date(c.valid_from),
        EntityField::ValidTill => from_date(c.valid_till),
        EntityField::State => from_string(c.state.as_ref().map(ContractState::as_str)),
        EntityField::Description => from_string(c.description),
        EntityField::ExternalId => from_string(c.external_id),
        _ => Value::Null,
    }
}

/// Leader of a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractGuarantee {
    pub id: Uuid,
    pub contract: Uuid,
    /// The guaranteeing identity.
    pub guarantee: Uuid,
}

impl ContractGuarantee {
    pub fn new(contract: Uuid, guarantee: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            contract,
            guarantee,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContractGuaranteeFilter {
    pub contract: Option<Uuid>,
    pub guarantee: Option<Uuid>,
}

impl Record for ContractGuarantee {
    type Filter = ContractGuaranteeFilter;
    const NAME: &'static str = "ContractGuarantee";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &ContractGuaranteeFilter) -> bool {
        criterion(&filter.contract, &self.contract) && criterion(&filter.guarantee, &self.guarantee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_window() {
        let mut contract = IdentityContract::new(Uuid::new_v4());
        let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert!(contract.is_valid_on(day));

        contract.valid_till = NaiveDate::from_ymd_opt(2024, 5, 31);
        assert!(!contract.is_valid_on(day));
    }

    #[test]
    fn test_state_field_is_canonical() {
        let mut contract = IdentityContract::new(Uuid::new_v4());
        assert_eq!(contract.field(EntityField::State), Value::Null);
        contract.state = Some(ContractState::Excluded);
        assert_eq!(
            contract.field(EntityField::State),
            Value::String("EXCLUDED".into())
        );
        assert_eq!("disabled".parse::<ContractState>(), Ok(ContractState::Disabled));
    }
}
