//! Scripts implemented in Rust and registered by name.
//!
//! A query or fetch script of kind `native` carries the registered name as its
//! code. Registration happens once at startup; lookups never discover
//! implementations at runtime.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::ScriptBindings;
use crate::error::StorageError;

/// A named Rust implementation usable wherever a script is accepted.
///
/// `statement` serves query bodies; `evaluate` serves predicates, parameter
/// values, injections and hints. Implementations override what they support.
pub trait NativeScript: Send + Sync {
    fn statement(&self, criteria: &Value, context: &Value) -> Result<(String, Vec<Value>), StorageError> {
        let _ = (criteria, context);
        Err("native script does not produce statements".into())
    }

    fn evaluate(&self, bindings: &ScriptBindings<'_>) -> Result<Value, StorageError> {
        let _ = bindings;
        Err("native script does not support evaluation".into())
    }
}

/// Adapts a closure into a statement-producing [`NativeScript`].
pub struct StatementFn<F>(pub F);

impl<F> NativeScript for StatementFn<F>
where
    F: Fn(&Value, &Value) -> Result<(String, Vec<Value>), StorageError> + Send + Sync,
{
    fn statement(&self, criteria: &Value, context: &Value) -> Result<(String, Vec<Value>), StorageError> {
        (self.0)(criteria, context)
    }
}

/// Adapts a closure into an evaluating [`NativeScript`].
pub struct EvaluateFn<F>(pub F);

pub fn statement_fn<F>(f: F) -> StatementFn<F>
where
    F: Fn(&Value, &Value) -> Result<(String, Vec<Value>), StorageError> + Send + Sync,
{
    StatementFn(f)
}

pub fn evaluate_fn<F>(f: F) -> EvaluateFn<F>
where
    F: Fn(&ScriptBindings<'_>) -> Result<Value, StorageError> + Send + Sync,
{
    EvaluateFn(f)
}

impl<F> NativeScript for EvaluateFn<F>
where
    F: Fn(&ScriptBindings<'_>) -> Result<Value, StorageError> + Send + Sync,
{
    fn evaluate(&self, bindings: &ScriptBindings<'_>) -> Result<Value, StorageError> {
        (self.0)(bindings)
    }
}

#[derive(Default, Clone)]
pub struct NativeRegistry {
    scripts: HashMap<String, Arc<dyn NativeScript>>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, script: impl NativeScript + 'static) {
        self.scripts.insert(name.into(), Arc::new(script));
    }

    pub fn with(mut self, name: impl Into<String>, script: impl NativeScript + 'static) -> Self {
        self.register(name, script);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NativeScript>> {
        self.scripts.get(name.trim()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scripts.contains_key(name.trim())
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

impl fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.scripts.keys().collect();
        names.sort();
        f.debug_struct("NativeRegistry").field("scripts", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_lookup() {
        let registry = NativeRegistry::new()
            .with(
                "users.by_id",
                statement_fn(|criteria, _| {
                    Ok(("SELECT * FROM users WHERE id = ?".to_string(), vec![criteria["id"].clone()]))
                }),
            )
            .with("always", evaluate_fn(|_| Ok(json!(true))));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(" users.by_id "));
        assert!(registry.get("missing").is_none());

        let script = registry.get("users.by_id").unwrap();
        let (sql, args) = script.statement(&json!({"id": 4}), &Value::Null).unwrap();
        assert_eq!(sql, "SELECT * FROM users WHERE id = ?");
        assert_eq!(args, vec![json!(4)]);

        let always = registry.get("always").unwrap();
        assert!(always.statement(&Value::Null, &Value::Null).is_err());
    }
}
