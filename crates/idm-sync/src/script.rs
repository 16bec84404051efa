//! Transformation and roots-filter scripts.
//!
//! Mapping scripts are stored as text on the mapping and evaluated through a
//! pluggable [`ScriptEvaluator`]. The default evaluator runs Rhai in a fresh,
//! resource-limited engine per evaluation.

use rhai::{Dynamic, Engine, Scope};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Script failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScriptError {
    #[error("compilation failed: {message}")]
    Compile { message: String },

    #[error("evaluation failed: {message}")]
    Runtime { message: String },

    #[error("unexpected result: {message}")]
    InvalidResult { message: String },
}

/// Variables bound for a transformation script.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    /// Value of the mapped attribute (`attributeValue`).
    pub attribute_value: &'a Value,
    /// All attributes of the connector object (`icAttributes`).
    pub ic_attributes: &'a Value,
    /// The system being synchronized (`system`).
    pub system: &'a Value,
}

/// Outcome of a roots filter.
#[derive(Debug, Clone, PartialEq)]
pub struct RootsDecision {
    pub is_root: bool,
    /// Attributes after the script ran; the script may rewrite them.
    pub attributes: Value,
}

/// Evaluator of mapping scripts.
pub trait ScriptEvaluator: Send + Sync {
    /// Evaluate a transformation, returning the mapped value.
    fn transform(&self, script: &str, context: &TransformContext<'_>) -> Result<Value, ScriptError>;

    /// Evaluate a roots filter bound with a mutable `account` map and `system`.
    fn roots_filter(
        &self,
        script: &str,
        account: &Value,
        system: &Value,
    ) -> Result<RootsDecision, ScriptError>;
}

/// Limits of the Rhai sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RhaiEvaluatorConfig {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for RhaiEvaluatorConfig {
    fn default() -> Self {
        Self {
            max_operations: 100_000,
            max_call_levels: 64,
            max_string_size: 65_536,
            max_array_size: 10_000,
            max_map_size: 10_000,
        }
    }
}

/// Rhai-backed evaluator.
#[derive(Debug, Clone, Default)]
pub struct RhaiScriptEvaluator {
    config: RhaiEvaluatorConfig,
}

impl RhaiScriptEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: RhaiEvaluatorConfig) -> Self {
        Self { config }
    }

    fn create_engine(&self) -> Engine {
        let mut engine = Engine::new();

        engine.set_max_operations(self.config.max_operations);
        engine.set_max_call_levels(self.config.max_call_levels);
        engine.set_max_string_size(self.config.max_string_size);
        engine.set_max_array_size(self.config.max_array_size);
        engine.set_max_map_size(self.config.max_map_size);
        engine.set_strict_variables(true);

        engine.register_fn("log_info", |msg: &str| {
            info!(script_log = %msg, "Mapping script log");
        });
        engine.register_fn("log_warn", |msg: &str| {
            warn!(script_log = %msg, "Mapping script warning");
        });

        engine
    }

    fn to_dynamic(value: &Value) -> Result<Dynamic, ScriptError> {
        rhai::serde::to_dynamic(value).map_err(|e| ScriptError::Runtime {
            message: format!("cannot bind value: {e}"),
        })
    }

    fn eval(&self, script: &str, scope: &mut Scope<'static>) -> Result<Dynamic, ScriptError> {
        let engine = self.create_engine();
        let ast = engine
            .compile_with_scope(scope, script)
            .map_err(|e| ScriptError::Compile {
                message: e.to_string(),
            })?;
        engine
            .eval_ast_with_scope::<Dynamic>(scope, &ast)
            .map_err(|e| ScriptError::Runtime {
                message: e.to_string(),
            })
    }
}

impl ScriptEvaluator for RhaiScriptEvaluator {
    fn transform(&self, script: &str, context: &TransformContext<'_>) -> Result<Value, ScriptError> {
        let mut scope = Scope::new();
        scope.push_constant_dynamic("attributeValue", Self::to_dynamic(context.attribute_value)?);
        scope.push_constant_dynamic("icAttributes", Self::to_dynamic(context.ic_attributes)?);
        scope.push_constant_dynamic("system", Self::to_dynamic(context.system)?);

        let result = self.eval(script, &mut scope)?;
        if result.is_unit() {
            return Ok(Value::Null);
        }
        rhai::serde::from_dynamic::<Value>(&result).map_err(|e| ScriptError::InvalidResult {
            message: e.to_string(),
        })
    }

    fn roots_filter(
        &self,
        script: &str,
        account: &Value,
        system: &Value,
    ) -> Result<RootsDecision, ScriptError> {
        let mut scope = Scope::new();
        scope.push_dynamic("account", Self::to_dynamic(account)?);
        scope.push_constant_dynamic("system", Self::to_dynamic(system)?);

        let result = self.eval(script, &mut scope)?;
        let is_root = result
            .as_bool()
            .map_err(|type_name| ScriptError::InvalidResult {
                message: format!("roots filter must return a bool, got {type_name}"),
            })?;

        let attributes = scope
            .get_value::<Dynamic>("account")
            .and_then(|d| rhai::serde::from_dynamic::<Value>(&d).ok())
            .unwrap_or_else(|| account.clone());

        debug!(is_root, "Roots filter evaluated");
        Ok(RootsDecision {
            is_root,
            attributes,
        })
    }
}
