//! Local entities and link records touched by synchronization.

mod account;
mod contract;
mod identity;
mod role;
mod slice;
mod tree;

pub use account::{Account, AccountFilter, EntityAccount, EntityAccountFilter};
pub use contract::{
    ContractFilter, ContractGuarantee, ContractGuaranteeFilter, ContractState, IdentityContract,
};
pub use identity::{Identity, IdentityFilter};
pub use role::{
    IdentityRole, IdentityRoleFilter, Role, RoleCatalogue, RoleCatalogueFilter, RoleCatalogueRole,
    RoleCatalogueRoleFilter, RoleFilter, RoleSystem, RoleSystemAttribute,
    RoleSystemAttributeFilter, RoleSystemFilter,
};
pub use slice::{ContractSlice, SliceFilter, SliceGuarantee, SliceGuaranteeFilter};
pub use tree::{TreeNode, TreeNodeFilter, TreeType, TreeTypeFilter};
