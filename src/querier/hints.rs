//! Result hints: post-processing applied to rows after fetch injection.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::Querier;
use crate::convert::{convert_value, ParamType};
use crate::error::{QueryError, QueryResult};
use crate::mapping::QueryHint;
use crate::scripting::conversion::json_to_rows;
use crate::scripting::{ScriptBindings, ScriptRunner};
use crate::value::Row;

pub const RESULT_FIELD_CONVERT: &str = "result-field-convert";
pub const RESULT_AGGREGATION: &str = "result-aggregation";

pub trait ResultHintHandler: Send + Sync {
    fn handle(&self, querier: &Querier, hint: &QueryHint, rows: &mut Vec<Row>) -> QueryResult<()>;
}

/// Dispatches hints to handlers by key. A hint carrying a script is run
/// through that script regardless of its key.
pub struct HintRegistry {
    handlers: HashMap<String, Arc<dyn ResultHintHandler>>,
    runner: ScriptRunner,
}

impl HintRegistry {
    /// A registry with the built-in handlers.
    pub fn new(runner: ScriptRunner) -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
            runner,
        };
        registry.register(RESULT_FIELD_CONVERT, FieldConvertHandler);
        registry.register(RESULT_AGGREGATION, AggregationHandler);
        registry
    }

    pub fn register(&mut self, key: impl Into<String>, handler: impl ResultHintHandler + 'static) {
        self.register_shared(key, Arc::new(handler));
    }

    /// Register a handler, replacing any built-in one under the same key.
    pub fn register_shared(&mut self, key: impl Into<String>, handler: Arc<dyn ResultHintHandler>) {
        self.handlers.insert(key.into(), handler);
    }

    pub(crate) fn apply(&self, querier: &Querier, rows: &mut Vec<Row>) -> QueryResult<()> {
        for hint in querier.query().hints() {
            if let Some(script) = hint.script() {
                let parameter = querier.parameter();
                let bindings =
                    ScriptBindings::new(&parameter.criteria, &parameter.context).with_rows(rows.as_slice());
                let result = self.runner.evaluate(&querier.name(), script, &bindings)?;
                if !result.is_null() {
                    *rows = json_to_rows(result).ok_or_else(|| {
                        QueryError::script(
                            &querier.name(),
                            format!("hint '{}' script must return a list of rows", hint.key()),
                        )
                    })?;
                }
                continue;
            }
            match self.handlers.get(hint.key()) {
                Some(handler) => handler.handle(querier, hint, rows)?,
                None => tracing::debug!(
                    "No handler for hint '{}' on {}, ignoring",
                    hint.key(),
                    querier.name()
                ),
            }
        }
        Ok(())
    }
}

impl Default for HintRegistry {
    fn default() -> Self {
        Self::new(ScriptRunner::default())
    }
}

impl fmt::Debug for HintRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.handlers.keys().collect();
        keys.sort();
        f.debug_struct("HintRegistry").field("handlers", &keys).finish()
    }
}

/// Converts the named fields of each row to `target-type`.
pub struct FieldConvertHandler;

impl ResultHintHandler for FieldConvertHandler {
    fn handle(&self, querier: &Querier, hint: &QueryHint, rows: &mut Vec<Row>) -> QueryResult<()> {
        let Some(target) = hint.parameter("target-type").first() else {
            return Ok(());
        };
        let ty: ParamType = target.parse()?;
        for field in hint.parameter("field-name") {
            for row in rows.iter_mut() {
                if let Some(slot) = row.get_mut(field) {
                    *slot = convert_value(slot, ty).map_err(|e| {
                        QueryError::Conversion(format!(
                            "{}: result field '{}': {}",
                            querier.name(),
                            field,
                            e
                        ))
                    })?;
                }
            }
        }
        Ok(())
    }
}

/// Collapses rows that agree on every non-aggregated field, collecting the
/// aggregated fields of each into a list under `aggs-name`.
pub struct AggregationHandler;

impl ResultHintHandler for AggregationHandler {
    fn handle(&self, _querier: &Querier, hint: &QueryHint, rows: &mut Vec<Row>) -> QueryResult<()> {
        let fields = hint.parameter("aggs-field-names");
        let Some(name) = hint.parameter("aggs-name").first() else {
            return Ok(());
        };
        if fields.is_empty() {
            return Ok(());
        }

        let mut grouped: Vec<(Row, Vec<Value>)> = Vec::new();
        for row in rows.drain(..) {
            let mut key = Map::new();
            let mut item = Map::new();
            for (k, v) in row {
                if fields.contains(&k) {
                    item.insert(k, v);
                } else {
                    key.insert(k, v);
                }
            }
            let item = Value::Object(item);
            match grouped.iter_mut().find(|(existing, _)| *existing == key) {
                Some((_, items)) => items.push(item),
                None => grouped.push((key, vec![item])),
            }
        }

        rows.extend(grouped.into_iter().map(|(mut key, items)| {
            key.insert(name.clone(), Value::Array(items));
            key
        }));
        Ok(())
    }
}
