//! Reconciliation policy: which action a situation leads to, and whether an
//! update changes anything.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::types::{SyncActionType, SyncSituation};
use crate::value::values_equal;

/// Action decided for one situation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub situation: SyncSituation,
    pub action: SyncActionType,
    /// Workflow started instead of applying the action.
    pub workflow_key: Option<String>,
}

impl Decision {
    /// Action type the item is logged under. IGNORE decisions are logged
    /// under their situation.
    #[must_use]
    pub fn log_action(&self) -> SyncActionType {
        if self.action == SyncActionType::Ignore {
            self.situation.action_type()
        } else {
            self.action
        }
    }
}

/// Look up the configured action of a situation.
#[must_use]
pub fn decide(config: &SyncConfig, situation: SyncSituation) -> Decision {
    let (action, workflow_key) = match situation {
        SyncSituation::Linked => (
            config.linked.action.action_type(),
            config.linked.workflow_key.clone(),
        ),
        SyncSituation::Unlinked => (
            config.unlinked.action.action_type(),
            config.unlinked.workflow_key.clone(),
        ),
        SyncSituation::MissingEntity => (
            config.missing_entity.action.action_type(),
            config.missing_entity.workflow_key.clone(),
        ),
        SyncSituation::MissingAccount => (
            config.missing_account.action.action_type(),
            config.missing_account.workflow_key.clone(),
        ),
    };
    Decision {
        situation,
        action,
        workflow_key,
    }
}

/// Differences between persisted and newly mapped state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub entity: bool,
    pub guarantees: bool,
    /// Extended attribute codes whose value differs.
    pub extended: Vec<String>,
    /// Out-of-entity state the handler keeps in step, such as role members.
    pub related: Vec<String>,
}

impl ChangeSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.entity && !self.guarantees && self.extended.is_empty() && self.related.is_empty()
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.entity {
            parts.push("fields".to_string());
        }
        if self.guarantees {
            parts.push("guarantees".to_string());
        }
        parts.extend(self.extended.iter().map(|code| format!("eav:{code}")));
        parts.extend(self.related.iter().cloned());
        if parts.is_empty() {
            write!(f, "no changes")
        } else {
            write!(f, "changed {}", parts.join(", "))
        }
    }
}

/// Compare guarantee sets. `None` means guarantees are not mapped.
#[must_use]
pub fn guarantees_differ(current: &[Uuid], wanted: Option<&[Uuid]>) -> bool {
    let Some(wanted) = wanted else {
        return false;
    };
    let mut current = current.to_vec();
    let mut wanted = wanted.to_vec();
    current.sort();
    current.dedup();
    wanted.sort();
    wanted.dedup();
    current != wanted
}

/// Mapped extended attribute codes whose persisted value differs.
#[must_use]
pub fn extended_differences(
    current: &BTreeMap<String, Value>,
    mapped: &BTreeMap<String, Value>,
) -> Vec<String> {
    mapped
        .iter()
        .filter(|(code, value)| !values_equal(current.get(*code).unwrap_or(&Value::Null), value))
        .map(|(code, _)| code.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        IdentitySyncOptions, LinkedAction, MissingAccountAction, SyncKindConfig,
    };
    use crate::mapping::AttributeMapping;
    use crate::types::EntityField;
    use idm_core::SystemId;
    use serde_json::json;

    fn config() -> SyncConfig {
        SyncConfig::new(
            "users",
            SystemId::new(),
            "user",
            SyncKindConfig::Identity(IdentitySyncOptions::default()),
            vec![AttributeMapping::entity("login", EntityField::Username).as_uid()],
            "login",
        )
    }

    #[test]
    fn test_decide_defaults() {
        let config = config();
        assert_eq!(
            decide(&config, SyncSituation::MissingEntity).action,
            SyncActionType::CreateEntity
        );
        assert_eq!(
            decide(&config, SyncSituation::Linked).action,
            SyncActionType::UpdateEntity
        );
        assert_eq!(decide(&config, SyncSituation::Unlinked).action, SyncActionType::Link);
    }

    #[test]
    fn test_ignore_is_logged_under_situation() {
        let config = config().with_missing_account(MissingAccountAction::Ignore);
        let decision = decide(&config, SyncSituation::MissingAccount);
        assert_eq!(decision.action, SyncActionType::Ignore);
        assert_eq!(decision.log_action(), SyncActionType::MissingAccount);

        let config = config.with_linked(LinkedAction::Unlink);
        assert_eq!(
            decide(&config, SyncSituation::Linked).log_action(),
            SyncActionType::Unlink
        );
    }

    #[test]
    fn test_workflow_key_is_carried() {
        let mut config = config();
        config.linked = config.linked.clone().with_workflow("approve-update");
        let decision = decide(&config, SyncSituation::Linked);
        assert_eq!(decision.workflow_key.as_deref(), Some("approve-update"));
    }

    #[test]
    fn test_guarantee_and_extended_diff() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(!guarantees_differ(&[a, b], Some(&[b, a])));
        assert!(guarantees_differ(&[a], Some(&[a, b])));
        assert!(!guarantees_differ(&[a], None));

        let current = BTreeMap::from([("dept".to_string(), json!("IT"))]);
        let mapped = BTreeMap::from([
            ("dept".to_string(), json!(["IT"])),
            ("cost".to_string(), Value::Null),
            ("site".to_string(), json!("Brno")),
        ]);
        assert_eq!(extended_differences(&current, &mapped), vec!["site".to_string()]);

        let changes = ChangeSet {
            entity: false,
            guarantees: true,
            extended: vec!["site".into()],
            related: Vec::new(),
        };
        assert!(!changes.is_empty());
        assert_eq!(changes.to_string(), "changed guarantees, eav:site");

        let changes = ChangeSet {
            related: vec!["members".into()],
            ..ChangeSet::default()
        };
        assert!(!changes.is_empty());
        assert_eq!(changes.to_string(), "changed members");
        assert!(ChangeSet::default().is_empty());
    }
}
