//! # Synchronization Engine
//!
//! Reconciles identities, contracts, contract slices, organization trees,
//! role catalogues and roles held by the IdM platform with the records of
//! connector-backed external systems.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   page   ┌──────────────┐   mapped   ┌──────────────┐
//! │  Connector  │─────────►│   Mapping    │───────────►│ Correlation  │
//! │  (search)   │          │   Resolver   │            │              │
//! └─────────────┘          └──────────────┘            └──────┬───────┘
//!                                                             │ situation
//!                          ┌──────────────┐            ┌──────▼───────┐
//!                          │   Executor   │◄───────────│    Policy    │
//!                          │  (per kind)  │   action   │              │
//!                          └──────┬───────┘            └──────────────┘
//!                                 │
//!                ┌────────────────┼─────────────────┐
//!                ▼                ▼                 ▼
//!         ┌────────────┐   ┌─────────────┐   ┌─────────────┐
//!         │  IdmStore  │   │  Services   │   │  Sync Log   │
//!         └────────────┘   └─────────────┘   └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use idm_sync::{SyncEngine, InMemorySyncConfigStore, InMemorySyncLogStore, IdmStore, SyncServices};
//!
//! let engine = SyncEngine::new(configs, IdmStore::in_memory(), SyncServices::in_memory(), logs)
//!     .with_connector(system_id, connector);
//! let summary = engine.process(config_id).await?;
//! assert!(!summary.contains_error());
//! ```

pub mod config;
pub mod context;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod executor;
pub mod log;
pub mod logging;
pub mod mapping;
pub mod model;
pub mod policy;
pub mod script;
pub mod services;
pub mod settings;
pub mod store;
pub mod temporal;
pub mod transaction;
pub mod types;
pub mod value;

pub use config::{
    CasePolicy, CatalogueSyncOptions, ContractSyncOptions, IdentitySyncOptions,
    InMemorySyncConfigStore, LinkedAction, MissingAccountAction, MissingEntityAction,
    RoleSyncOptions, SyncConfig, SyncConfigStore, SyncKindConfig, TreeSyncOptions, UnlinkedAction,
};
pub use context::{SyncConnector, SyncContext, SyncFlags};
pub use engine::{CancellationHandle, SyncEngine, SyncRunSummary, DEFAULT_PAGE_SIZE};
pub use error::{SyncError, SyncResult};
pub use executor::{ExecutorRegistry, ItemOutcome, PreparedBatch, SyncExecutor};
pub use log::{
    InMemorySyncLogStore, PgSyncLogStore, SyncActionLog, SyncItemLog, SyncLog, SyncLogStore,
    SyncLogWriter,
};
pub use mapping::{AttributeMapping, MappedValues, MappingResolver};
pub use script::{RhaiEvaluatorConfig, RhaiScriptEvaluator, ScriptError, ScriptEvaluator};
pub use services::SyncServices;
pub use settings::{EngineSettings, SettingsError};
pub use store::{IdmStore, InMemoryRepository, Repository};
pub use transaction::{ImmediateTransactionRunner, TransactionRunner};
pub use types::{EntityField, EntityKind, FieldRef, OperationResult, SyncActionType, SyncSituation};
