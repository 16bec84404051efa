//! Repository bundle with cascade rules.

use idm_core::{IdmError, IdmResult, SystemId};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::{InMemoryRepository, Repository};
use crate::model::{
    Account, AccountFilter, ContractFilter, ContractGuarantee, ContractGuaranteeFilter,
    ContractSlice, EntityAccount, EntityAccountFilter, Identity, IdentityContract, IdentityRole,
    IdentityRoleFilter, Role, RoleCatalogue, RoleCatalogueFilter, RoleCatalogueRole,
    RoleCatalogueRoleFilter, RoleSystem, RoleSystemAttribute, RoleSystemAttributeFilter,
    RoleSystemFilter, SliceFilter, SliceGuarantee, SliceGuaranteeFilter, TreeNode, TreeNodeFilter,
    TreeType,
};
use crate::types::EntityKind;

/// All repositories the engine reads and writes.
#[derive(Clone)]
pub struct IdmStore {
    pub identities: Arc<dyn Repository<Identity>>,
    pub contracts: Arc<dyn Repository<IdentityContract>>,
    pub contract_guarantees: Arc<dyn Repository<ContractGuarantee>>,
    pub slices: Arc<dyn Repository<ContractSlice>>,
    pub slice_guarantees: Arc<dyn Repository<SliceGuarantee>>,
    pub tree_types: Arc<dyn Repository<TreeType>>,
    pub tree_nodes: Arc<dyn Repository<TreeNode>>,
    pub role_catalogues: Arc<dyn Repository<RoleCatalogue>>,
    pub roles: Arc<dyn Repository<Role>>,
    pub catalogue_roles: Arc<dyn Repository<RoleCatalogueRole>>,
    pub identity_roles: Arc<dyn Repository<IdentityRole>>,
    pub role_systems: Arc<dyn Repository<RoleSystem>>,
    pub role_system_attributes: Arc<dyn Repository<RoleSystemAttribute>>,
    pub accounts: Arc<dyn Repository<Account>>,
    pub entity_accounts: Arc<dyn Repository<EntityAccount>>,
}

impl IdmStore {
    /// Store backed entirely by in-memory repositories.
    pub fn in_memory() -> Self {
        Self {
            identities: Arc::new(InMemoryRepository::new()),
            contracts: Arc::new(InMemoryRepository::new()),
            contract_guarantees: Arc::new(InMemoryRepository::new()),
            slices: Arc::new(InMemoryRepository::new()),
            slice_guarantees: Arc::new(InMemoryRepository::new()),
            tree_types: Arc::new(InMemoryRepository::new()),
            tree_nodes: Arc::new(InMemoryRepository::new()),
            role_catalogues: Arc::new(InMemoryRepository::new()),
            roles: Arc::new(InMemoryRepository::new()),
            catalogue_roles: Arc::new(InMemoryRepository::new()),
            identity_roles: Arc::new(InMemoryRepository::new()),
            role_systems: Arc::new(InMemoryRepository::new()),
            role_system_attributes: Arc::new(InMemoryRepository::new()),
            accounts: Arc::new(InMemoryRepository::new()),
            entity_accounts: Arc::new(InMemoryRepository::new()),
        }
    }

    // ── Accounts ──────────────────────────────────────────────────────────

    /// Account of the given kind on a system, by UID.
    pub async fn find_account(
        &self,
        system: SystemId,
        uid: &str,
        kind: EntityKind,
    ) -> IdmResult<Option<Account>> {
        self.accounts
            .find_one(&AccountFilter {
                system: Some(system),
                uid: Some(uid.to_string()),
                kind: Some(kind),
            })
            .await
    }

    /// All accounts of one kind on a system.
    pub async fn accounts_of(&self, system: SystemId, kind: EntityKind) -> IdmResult<Vec<Account>> {
        self.accounts
            .find(&AccountFilter::of_system(system, kind))
            .await
    }

    /// Join of an account to an entity of the account's kind.
    pub async fn join_of_account(&self, account: &Account) -> IdmResult<Option<EntityAccount>> {
        self.entity_accounts
            .find_one(&EntityAccountFilter {
                account: Some(account.id),
                entity: None,
                kind: Some(account.kind),
            })
            .await
    }

    /// The account (and its join) linking an entity to a system.
    pub async fn entity_account(
        &self,
        entity: Uuid,
        system: SystemId,
        kind: EntityKind,
    ) -> IdmResult<Option<(Account, EntityAccount)>> {
        let joins = self
            .entity_accounts
            .find(&EntityAccountFilter {
                account: None,
                entity: Some(entity),
                kind: Some(kind),
            })
            .await?;
        for join in joins {
            if let Some(account) = self.accounts.get(join.account).await? {
                if account.system == system {
                    return Ok(Some((account, join)));
                }
            }
        }
        Ok(None)
    }

    /// Link an entity to the account `(system, uid)`, creating the account when needed.
    ///
    /// An entity holds at most one account per system.
    pub async fn link(
        &self,
        system: SystemId,
        uid: &str,
        kind: EntityKind,
        entity: Uuid,
    ) -> IdmResult<EntityAccount> {
        if let Some((account, join)) = self.entity_account(entity, system, kind).await? {
            if account.uid == uid {
                return Ok(join);
            }
            return Err(IdmError::constraint(format!(
                "{kind} {entity} already has account '{}' on system {system}",
                account.uid
            )));
        }

        let account = match self.find_account(system, uid, kind).await? {
            Some(account) => account,
            None => self.accounts.save(Account::new(system, uid, kind)).await?,
        };
        if let Some(other) = self.join_of_account(&account).await? {
            return Err(IdmError::constraint(format!(
                "account '{uid}' is already linked to {kind} {}",
                other.entity
            )));
        }

        debug!(system = %system, uid = %uid, kind = %kind, entity = %entity, "Linking account");
        self.entity_accounts
            .save(EntityAccount::new(account.id, entity, kind))
            .await
    }

    /// Remove a join; the account goes with it when nothing else references it.
    pub async fn unlink(&self, join: &EntityAccount) -> IdmResult<()> {
        self.entity_accounts.delete(join.id).await?;
        let remaining = self
            .entity_accounts
            .count(&EntityAccountFilter {
                account: Some(join.account),
                ..EntityAccountFilter::default()
            })
            .await?;
        if remaining == 0 && self.accounts.get(join.account).await?.is_some() {
            self.accounts.delete(join.account).await?;
        }
        Ok(())
    }

    /// Delete an account; its joins cascade, the entities stay.
    pub async fn delete_account(&self, account: Uuid) -> IdmResult<()> {
        let joins = self
            .entity_accounts
            .find(&EntityAccountFilter {
                account: Some(account),
                ..EntityAccountFilter::default()
            })
            .await?;
        for join in joins {
            self.entity_accounts.delete(join.id).await?;
        }
        self.accounts.delete(account).await
    }

    /// Delete the joins of an entity together with their accounts.
    async fn delete_entity_accounts(&self, entity: Uuid, kind: EntityKind) -> IdmResult<()> {
        let joins = self
            .entity_accounts
            .find(&EntityAccountFilter {
                account: None,
                entity: Some(entity),
                kind: Some(kind),
            })
            .await?;
        for join in joins {
            self.unlink(&join).await?;
        }
        Ok(())
    }

    // ── Entity deletion ───────────────────────────────────────────────────

    /// Delete an identity with its contracts, slices, roles and accounts.
    pub async fn delete_identity(&self, id: Uuid) -> IdmResult<()> {
        let slices = self
            .slices
            .find(&SliceFilter {
                identity: Some(id),
                ..SliceFilter::default()
            })
            .await?;
        for slice in slices {
            self.delete_slice(slice.id).await?;
        }
        let contracts = self
            .contracts
            .find(&ContractFilter {
                identity: Some(id),
                ..ContractFilter::default()
            })
            .await?;
        for contract in contracts {
            self.delete_contract(contract.id).await?;
        }
        let led = self
            .contract_guarantees
            .find(&ContractGuaranteeFilter {
                contract: None,
                guarantee: Some(id),
            })
            .await?;
        for guarantee in led {
            self.contract_guarantees.delete(guarantee.id).await?;
        }
        self.delete_entity_accounts(id, EntityKind::Identity).await?;
        self.identities.delete(id).await
    }

    /// Delete a contract with its guarantees, roles, slices and accounts.
    pub async fn delete_contract(&self, id: Uuid) -> IdmResult<()> {
        let slices = self
            .slices
            .find(&SliceFilter {
                parent_contract: Some(id),
                ..SliceFilter::default()
            })
            .await?;
        for slice in slices {
            self.delete_slice(slice.id).await?;
        }
        let guarantees = self
            .contract_guarantees
            .find(&ContractGuaranteeFilter {
                contract: Some(id),
                guarantee: None,
            })
            .await?;
        for guarantee in guarantees {
            self.contract_guarantees.delete(guarantee.id).await?;
        }
        let roles = self
            .identity_roles
            .find(&IdentityRoleFilter {
                contract: Some(id),
                ..IdentityRoleFilter::default()
            })
            .await?;
        for role in roles {
            self.identity_roles.delete(role.id).await?;
        }
        self.delete_entity_accounts(id, EntityKind::Contract).await?;
        self.contracts.delete(id).await
    }

    /// Delete a slice with its guarantees and accounts. Siblings stay untouched.
    pub async fn delete_slice(&self, id: Uuid) -> IdmResult<()> {
        let guarantees = self
            .slice_guarantees
            .find(&SliceGuaranteeFilter { slice: Some(id) })
            .await?;
        for guarantee in guarantees {
            self.slice_guarantees.delete(guarantee.id).await?;
        }
        self.delete_entity_accounts(id, EntityKind::ContractSlice)
            .await?;
        self.slices.delete(id).await
    }

    /// Delete a tree node. Nodes with children are refused.
    pub async fn delete_tree_node(&self, id: Uuid) -> IdmResult<()> {
        let children = self
            .tree_nodes
            .count(&TreeNodeFilter {
                parent: Some(id),
                ..TreeNodeFilter::default()
            })
            .await?;
        if children > 0 {
            return Err(IdmError::constraint(format!(
                "tree node {id} has {children} children"
            )));
        }
        self.delete_entity_accounts(id, EntityKind::Tree).await?;
        self.tree_nodes.delete(id).await
    }

    /// Delete a catalogue folder. Folders with children are refused.
    pub async fn delete_role_catalogue(&self, id: Uuid) -> IdmResult<()> {
        let children = self
            .role_catalogues
            .count(&RoleCatalogueFilter {
                parent: Some(id),
                ..RoleCatalogueFilter::default()
            })
            .await?;
        if children > 0 {
            return Err(IdmError::constraint(format!(
                "role catalogue {id} has {children} children"
            )));
        }
        let links = self
            .catalogue_roles
            .find(&RoleCatalogueRoleFilter {
                role: None,
                catalogue: Some(id),
            })
            .await?;
        for link in links {
            self.catalogue_roles.delete(link.id).await?;
        }
        self.delete_entity_accounts(id, EntityKind::RoleCatalogue)
            .await?;
        self.role_catalogues.delete(id).await
    }

    /// Delete a role with its catalogue links, assignments and system mappings.
    pub async fn delete_role(&self, id: Uuid) -> IdmResult<()> {
        let links = self
            .catalogue_roles
            .find(&RoleCatalogueRoleFilter {
                role: Some(id),
                catalogue: None,
            })
            .await?;
        for link in links {
            self.catalogue_roles.delete(link.id).await?;
        }
        let assigned = self
            .identity_roles
            .find(&IdentityRoleFilter {
                role: Some(id),
                ..IdentityRoleFilter::default()
            })
            .await?;
        for assignment in assigned {
            self.identity_roles.delete(assignment.id).await?;
        }
        let systems = self
            .role_systems
            .find(&RoleSystemFilter {
                role: Some(id),
                system: None,
            })
            .await?;
        for role_system in systems {
            let attributes = self
                .role_system_attributes
                .find(&RoleSystemAttributeFilter {
                    role_system: Some(role_system.id),
                    name: None,
                })
                .await?;
            for attribute in attributes {
                self.role_system_attributes.delete(attribute.id).await?;
            }
            self.role_systems.delete(role_system.id).await?;
        }
        self.delete_entity_accounts(id, EntityKind::Role).await?;
        self.roles.delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContractSlice, Identity};

    #[tokio::test]
    async fn test_link_reuses_account_and_rejects_second_uid() {
        let store = IdmStore::in_memory();
        let system = SystemId::new();
        let identity = store.identities.save(Identity::new("john")).await.unwrap();

        let first = store
            .link(system, "john", EntityKind::Identity, identity.id)
            .await
            .unwrap();
        let again = store
            .link(system, "john", EntityKind::Identity, identity.id)
            .await
            .unwrap();
        assert_eq!(first.id, again.id);

        let err = store
            .link(system, "john2", EntityKind::Identity, identity.id)
            .await
            .unwrap_err();
        assert!(matches!(err, IdmError::ConstraintViolation { .. }));
    }

    #[tokio::test]
    async fn test_unlink_removes_orphan_account() {
        let store = IdmStore::in_memory();
        let system = SystemId::new();
        let identity = store.identities.save(Identity::new("john")).await.unwrap();
        let join = store
            .link(system, "john", EntityKind::Identity, identity.id)
            .await
            .unwrap();

        store.unlink(&join).await.unwrap();
        assert!(store
            .find_account(system, "john", EntityKind::Identity)
            .await
            .unwrap()
            .is_none());
        assert!(store.identities.get(identity.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_slice_cascades_to_its_account_only() {
        let store = IdmStore::in_memory();
        let system = SystemId::new();
        let owner = store.identities.save(Identity::new("john")).await.unwrap();
        let one = store.slices.save(ContractSlice::new(owner.id)).await.unwrap();
        let two = store.slices.save(ContractSlice::new(owner.id)).await.unwrap();
        store
            .link(system, "1", EntityKind::ContractSlice, one.id)
            .await
            .unwrap();
        store
            .link(system, "2", EntityKind::ContractSlice, two.id)
            .await
            .unwrap();

        store.delete_slice(one.id).await.unwrap();

        let accounts = store
            .accounts_of(system, EntityKind::ContractSlice)
            .await
            .unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].uid, "2");
        assert_eq!(
            store
                .entity_accounts
                .count(&EntityAccountFilter::default())
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_delete_account_keeps_entity() {
        let store = IdmStore::in_memory();
        let system = SystemId::new();
        let owner = store.identities.save(Identity::new("john")).await.unwrap();
        let slice = store.slices.save(ContractSlice::new(owner.id)).await.unwrap();
        let join = store
            .link(system, "1", EntityKind::ContractSlice, slice.id)
            .await
            .unwrap();

        store.delete_account(join.account).await.unwrap();
        assert!(store.slices.get(slice.id).await.unwrap().is_some());
        assert!(store
            .entity_account(slice.id, system, EntityKind::ContractSlice)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_tree_node_with_children_is_not_deleted() {
        let store = IdmStore::in_memory();
        let tree_type = store.tree_types.save(TreeType::new("ORG")).await.unwrap();
        let root = store
            .tree_nodes
            .save(TreeNode::new(tree_type.id, "root"))
            .await
            .unwrap();
        let mut child = TreeNode::new(tree_type.id, "child");
        child.parent = Some(root.id);
        store.tree_nodes.save(child).await.unwrap();

        assert!(store.delete_tree_node(root.id).await.is_err());
    }
}
