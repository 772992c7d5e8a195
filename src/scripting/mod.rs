//! Script evaluation for query bodies and their auxiliary scripts.
//!
//! Query bodies produce statement text plus bound values and are handled by
//! the querier builders. Everything else (fetch predicates, parameter
//! scripts, injection scripts, hint scripts) goes through [`ScriptRunner`],
//! which accepts `lua` and `native` scripts.

pub mod conversion;
pub mod lua;
pub mod native;
pub mod template;

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::error::{QueryError, QueryResult};
use crate::mapping::{Script, ScriptKind};
use crate::value::{to_bool, Row};

pub use lua::LuaScript;
pub use native::{evaluate_fn, statement_fn, NativeRegistry, NativeScript};
pub use template::Template;

/// Values visible to an auxiliary script.
#[derive(Debug, Clone, Copy)]
pub struct ScriptBindings<'a> {
    pub criteria: &'a Value,
    pub context: &'a Value,
    pub rows: Option<&'a [Row]>,
    pub fetched: Option<&'a [Row]>,
}

impl<'a> ScriptBindings<'a> {
    pub fn new(criteria: &'a Value, context: &'a Value) -> Self {
        Self {
            criteria,
            context,
            rows: None,
            fetched: None,
        }
    }

    pub fn with_rows(mut self, rows: &'a [Row]) -> Self {
        self.rows = Some(rows);
        self
    }

    pub fn with_fetched(mut self, fetched: &'a [Row]) -> Self {
        self.fetched = Some(fetched);
        self
    }
}

/// Evaluates auxiliary scripts. Lua chunks are syntax-checked once and
/// cached by source text; clones share the cache.
#[derive(Debug, Clone, Default)]
pub struct ScriptRunner {
    natives: Arc<NativeRegistry>,
    lua_cache: Arc<DashMap<String, Arc<LuaScript>>>,
}

impl ScriptRunner {
    pub fn new(natives: Arc<NativeRegistry>) -> Self {
        Self {
            natives,
            lua_cache: Arc::new(DashMap::new()),
        }
    }

    pub fn natives(&self) -> &Arc<NativeRegistry> {
        &self.natives
    }

    pub fn cached_scripts(&self) -> usize {
        self.lua_cache.len()
    }

    fn lua(&self, query: &str, code: &str) -> QueryResult<Arc<LuaScript>> {
        if let Some(script) = self.lua_cache.get(code) {
            return Ok(script.value().clone());
        }
        let compiled = Arc::new(LuaScript::compile(query, code).map_err(|e| QueryError::script(query, e))?);
        let entry = self.lua_cache.entry(code.to_string()).or_insert(compiled);
        Ok(entry.value().clone())
    }

    /// Evaluate `script` on behalf of `query` (used in error messages).
    pub fn evaluate(&self, query: &str, script: &Script, bindings: &ScriptBindings<'_>) -> QueryResult<Value> {
        match script.kind() {
            ScriptKind::Lua => self
                .lua(query, script.code())?
                .evaluate(bindings)
                .map_err(|e| QueryError::script(query, e)),
            ScriptKind::Native => {
                let native = self.natives.get(script.code().trim()).ok_or_else(|| {
                    QueryError::script(
                        query,
                        format!("No native script registered as '{}'", script.code().trim()),
                    )
                })?;
                native
                    .evaluate(bindings)
                    .map_err(|e| QueryError::script(query, e.to_string()))
            }
            other => Err(QueryError::script(
                query,
                format!("Script kind '{}' cannot be evaluated here", other),
            )),
        }
    }

    /// Evaluate a predicate script to a boolean.
    pub fn test(&self, query: &str, script: &Script, bindings: &ScriptBindings<'_>) -> QueryResult<bool> {
        self.evaluate(query, script, bindings).map(|v| to_bool(&v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_runner_dispatches_by_kind() {
        let natives = NativeRegistry::new().with(
            "has_rows",
            evaluate_fn(|b| Ok(json!(b.rows.is_some_and(|r| !r.is_empty())))),
        );
        let runner = ScriptRunner::new(Arc::new(natives));
        let criteria = json!({"limit": 3});
        let rows = vec![Row::new()];
        let bindings = ScriptBindings::new(&criteria, &Value::Null).with_rows(&rows);

        let lua = Script::new(ScriptKind::Lua, "return p.limit * 2");
        assert_eq!(runner.evaluate("q", &lua, &bindings).unwrap(), json!(6));

        let native = Script::new(ScriptKind::Native, "has_rows");
        assert!(runner.test("q", &native, &bindings).unwrap());

        let missing = Script::new(ScriptKind::Native, "nope");
        let err = runner.test("q", &missing, &bindings).unwrap_err();
        assert!(err.to_string().contains("No native script registered as 'nope'"));

        let template = Script::new(ScriptKind::Template, "{{ x }}");
        assert!(runner.evaluate("q", &template, &bindings).is_err());
    }

    #[test]
    fn test_lua_scripts_compiled_once() {
        let runner = ScriptRunner::default();
        let shared = runner.clone();
        let criteria = json!({"n": 2});
        let bindings = ScriptBindings::new(&criteria, &Value::Null);
        let script = Script::new(ScriptKind::Lua, "return p.n + 1");

        for _ in 0..3 {
            assert_eq!(runner.evaluate("q", &script, &bindings).unwrap(), json!(3));
        }
        assert_eq!(shared.evaluate("other", &script, &bindings).unwrap(), json!(3));
        assert_eq!(runner.cached_scripts(), 1);

        let broken = Script::new(ScriptKind::Lua, "return (");
        assert!(runner.evaluate("q", &broken, &bindings).is_err());
        assert_eq!(runner.cached_scripts(), 1);
    }
}
