//! Query execution entry points.
//!
//! Every operation follows the same pipeline: resolve a querier, normalize its
//! bound values, run the statement through the [`Executor`], inject fetch
//! queries into the rows, apply result hints, and shape the result.

mod fetch;
pub mod stream;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{EngineConfig, SizeViolation};
use crate::dialect::{AnsiDialect, Dialect};
use crate::error::{QueryError, QueryResult};
use crate::executor::Executor;
use crate::mapping::QueryMappings;
use crate::querier::{
    BuilderContext, BuilderRegistry, HintRegistry, Querier, QuerierResolver, QueryParameter,
    ResultHintHandler,
};
use crate::scripting::{NativeRegistry, ScriptRunner};
use crate::statement::{normalize_positional, Normalized};
use crate::value::Row;

pub use stream::{Backoff, QueryStream};

/// One page of rows plus the total row count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedList {
    pub offset: usize,
    pub limit: usize,
    pub total: usize,
    pub rows: Vec<Row>,
}

/// One page of rows plus whether more follow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forwarding {
    pub offset: usize,
    pub limit: usize,
    pub has_next: bool,
    pub rows: Vec<Row>,
}

pub struct QueryServiceBuilder {
    mappings: QueryMappings,
    executor: Arc<dyn Executor>,
    dialect: Arc<dyn Dialect>,
    natives: NativeRegistry,
    registry: BuilderRegistry,
    hint_handlers: Vec<(String, Arc<dyn ResultHintHandler>)>,
    config: EngineConfig,
}

impl QueryServiceBuilder {
    pub fn dialect(mut self, dialect: Arc<dyn Dialect>) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn natives(mut self, natives: NativeRegistry) -> Self {
        self.natives = natives;
        self
    }

    pub fn registry(mut self, registry: BuilderRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Handle result hints keyed `key` with `handler`.
    pub fn hint(mut self, key: impl Into<String>, handler: impl ResultHintHandler + 'static) -> Self {
        self.hint_handlers.push((key.into(), Arc::new(handler)));
        self
    }

    /// Assemble the service and start its resolver.
    pub fn build(self) -> QueryService {
        let natives = Arc::new(self.natives);
        let runner = ScriptRunner::new(natives.clone());
        let mut hints = HintRegistry::new(runner.clone());
        for (key, handler) in self.hint_handlers {
            hints.register_shared(key, handler);
        }
        let context = BuilderContext {
            natives,
            hints: Arc::new(hints),
        };
        let resolver = QuerierResolver::new(Arc::new(self.mappings), self.registry, context);
        resolver.init();
        QueryService {
            resolver: Arc::new(resolver),
            executor: self.executor,
            dialect: self.dialect,
            runner,
            config: self.config,
        }
    }
}

pub struct QueryService {
    resolver: Arc<QuerierResolver>,
    executor: Arc<dyn Executor>,
    dialect: Arc<dyn Dialect>,
    runner: ScriptRunner,
    config: EngineConfig,
}

impl QueryService {
    pub fn builder(mappings: QueryMappings, executor: Arc<dyn Executor>) -> QueryServiceBuilder {
        QueryServiceBuilder {
            mappings,
            executor,
            dialect: Arc::new(AnsiDialect),
            natives: NativeRegistry::new(),
            registry: BuilderRegistry::default(),
            hint_handlers: Vec::new(),
            config: EngineConfig::default(),
        }
    }

    pub fn resolver(&self) -> &Arc<QuerierResolver> {
        &self.resolver
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn shutdown(&self) {
        self.resolver.shutdown();
    }

    /// Fetch a single row, or `None`.
    pub fn get(&self, name: &str, parameter: QueryParameter) -> QueryResult<Option<Row>> {
        let mut path = vec![name.to_string()];
        self.get_inner(name, parameter, &mut path)
    }

    /// Fetch every row, bounded by the query's maximum select size.
    pub fn select(&self, name: &str, parameter: QueryParameter) -> QueryResult<Vec<Row>> {
        let mut path = vec![name.to_string()];
        self.select_inner(name, parameter, None, &mut path)
    }

    /// Fetch the page at `parameter.offset` / `parameter.limit` with a total.
    pub fn page(&self, name: &str, parameter: QueryParameter) -> QueryResult<PagedList> {
        let mut path = vec![name.to_string()];
        self.page_inner(name, parameter, &mut path)
    }

    /// Fetch the page at `parameter.offset` / `parameter.limit` and whether
    /// more rows follow.
    pub fn forward(&self, name: &str, parameter: QueryParameter) -> QueryResult<Forwarding> {
        let mut path = vec![name.to_string()];
        self.forward_inner(name, parameter, &mut path)
    }

    /// Iterate every row through repeated forwards.
    pub fn stream(&self, name: &str, parameter: QueryParameter) -> QueryStream<'_> {
        QueryStream::new(self, name, parameter)
    }

    fn prepare(&self, querier: &Querier) -> QueryResult<Normalized> {
        let normalized = if querier.is_normalized() {
            Normalized {
                statement: querier.script().to_string(),
                args: querier.script_parameter().to_vec(),
            }
        } else {
            normalize_positional(querier.script(), querier.script_parameter())?
        };
        tracing::debug!(
            "Executing {}: {} [{} args]",
            querier.name(),
            normalized.statement,
            normalized.args.len()
        );
        Ok(normalized)
    }

    /// Run fetch injection, then result hints.
    fn complete(&self, querier: &Querier, rows: &mut Vec<Row>, path: &mut Vec<String>) -> QueryResult<()> {
        self.inject_fetches(querier, rows, path)?;
        querier.handle_result_hints(rows)
    }

    fn get_inner(&self, name: &str, parameter: QueryParameter, path: &mut Vec<String>) -> QueryResult<Option<Row>> {
        let querier = self.resolver.resolve(name, parameter)?;
        let normalized = self.prepare(&querier)?;
        let timeout = self.config.timeout(querier.query());
        let row = self
            .executor
            .get(&normalized.statement, timeout, &normalized.args)
            .map_err(|e| QueryError::execution(name, e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut rows = vec![row];
        self.complete(&querier, &mut rows, path)?;
        Ok(rows.into_iter().next())
    }

    pub(crate) fn select_inner(
        &self,
        name: &str,
        parameter: QueryParameter,
        max_size: Option<usize>,
        path: &mut Vec<String>,
    ) -> QueryResult<Vec<Row>> {
        let querier = self.resolver.resolve(name, parameter)?;
        let normalized = self.prepare(&querier)?;
        let query = querier.query();
        let max = max_size.unwrap_or_else(|| self.config.max_select_size(query));
        let timeout = self.config.timeout(query);

        let mut rows = self
            .executor
            .select(
                &normalized.statement,
                max.saturating_add(1),
                timeout,
                &normalized.args,
            )
            .map_err(|e| QueryError::execution(name, e))?;

        if rows.len() > max {
            match self.config.size_violation {
                SizeViolation::Raise => {
                    return Err(QueryError::SizeExceeded {
                        query: name.to_string(),
                        max,
                    });
                }
                SizeViolation::Truncate => {
                    tracing::warn!(
                        "Result of {} exceeds the maximum size of {}, truncating",
                        name,
                        max
                    );
                    rows.truncate(max);
                }
            }
        }

        self.complete(&querier, &mut rows, path)?;
        Ok(rows)
    }

    fn page_inner(&self, name: &str, parameter: QueryParameter, path: &mut Vec<String>) -> QueryResult<PagedList> {
        let querier = self.resolver.resolve(name, parameter)?;
        let normalized = self.prepare(&querier)?;
        let query = querier.query();
        let offset = querier.parameter().offset.unwrap_or(0);
        let limit = self.config.limit(query, querier.parameter().limit);
        let timeout = self.config.timeout(query);

        let statement = self
            .dialect
            .get_limit_sql(&normalized.statement, offset, limit, query.hints());
        let mut rows = self
            .executor
            .select(&statement, limit, timeout, &normalized.args)
            .map_err(|e| QueryError::execution(name, e))?;
        rows.truncate(limit);

        let size = rows.len();
        // A short page tells the total without a count query
        let total = if size < limit {
            offset + size
        } else {
            let statement = self.dialect.get_count_sql(&normalized.statement, query.hints());
            let row = self
                .executor
                .get(&statement, timeout, &normalized.args)
                .map_err(|e| QueryError::execution(name, e))?;
            row.as_ref()
                .and_then(|r| r.get(self.dialect.total_field()))
                .and_then(count_value)
                .unwrap_or(0)
        };

        self.complete(&querier, &mut rows, path)?;
        Ok(PagedList {
            offset,
            limit,
            total,
            rows,
        })
    }

    pub(crate) fn forward_inner(
        &self,
        name: &str,
        parameter: QueryParameter,
        path: &mut Vec<String>,
    ) -> QueryResult<Forwarding> {
        let querier = self.resolver.resolve(name, parameter)?;
        let normalized = self.prepare(&querier)?;
        let query = querier.query();
        let offset = querier.parameter().offset.unwrap_or(0);
        let limit = self.config.limit(query, querier.parameter().limit);
        let timeout = self.config.timeout(query);

        let statement =
            self.dialect
                .get_limit_sql(&normalized.statement, offset, limit + 1, query.hints());
        let mut rows = self
            .executor
            .select(&statement, limit + 1, timeout, &normalized.args)
            .map_err(|e| QueryError::execution(name, e))?;

        let has_next = rows.len() > limit;
        if has_next {
            rows.truncate(limit);
        }

        self.complete(&querier, &mut rows, path)?;
        Ok(Forwarding {
            offset,
            limit,
            has_next,
            rows,
        })
    }
}

fn count_value(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
            .map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
