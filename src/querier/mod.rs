//! Queriers and the builders that produce them.
//!
//! A [`QuerierBuilder`] is created once per query and cached by the
//! [`QuerierResolver`]; each call to [`QuerierBuilder::build`] yields a fresh
//! [`Querier`] holding the converted parameter, the statement text and its
//! bound values.

pub mod builders;
pub mod hints;
pub mod resolver;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QueryError, QueryResult};
use crate::mapping::{Query, ScriptKind};
use crate::scripting::NativeRegistry;
use crate::value::Row;

pub use builders::{LiteralBuilder, LuaBuilder, NativeBuilder, TemplateBuilder};
pub use hints::{HintRegistry, ResultHintHandler};
pub use resolver::QuerierResolver;

/// Caller-supplied parameter for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParameter {
    /// Criteria the query body is evaluated against.
    #[serde(default)]
    pub criteria: Value,
    /// Ambient values (tenant, user, ...) visible to scripts as `ctx`.
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl QueryParameter {
    pub fn new(criteria: Value) -> Self {
        Self {
            criteria,
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A query bound to one parameter, ready to execute.
#[derive(Clone)]
pub struct Querier {
    query: Arc<Query>,
    parameter: QueryParameter,
    script: String,
    script_parameter: Vec<Value>,
    hints: Arc<HintRegistry>,
    normalized: bool,
}

impl Querier {
    pub(crate) fn new(
        query: Arc<Query>,
        parameter: QueryParameter,
        script: String,
        script_parameter: Vec<Value>,
        hints: Arc<HintRegistry>,
    ) -> QueryResult<Self> {
        if script.trim().is_empty() {
            return Err(QueryError::build(
                &query.versioned_name(),
                "script produced an empty statement",
            ));
        }
        Ok(Self {
            query,
            parameter,
            script,
            script_parameter,
            hints,
            normalized: false,
        })
    }

    /// Mark the bound values as already expanded into the statement.
    pub(crate) fn normalized(mut self) -> Self {
        self.normalized = true;
        self
    }

    /// Whether collection values were already expanded at build time.
    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    pub fn query(&self) -> &Arc<Query> {
        &self.query
    }

    pub fn name(&self) -> String {
        self.query.versioned_name()
    }

    /// The parameter after schema conversion.
    pub fn parameter(&self) -> &QueryParameter {
        &self.parameter
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn script_parameter(&self) -> &[Value] {
        &self.script_parameter
    }

    /// Apply the query's result hints to fetched-and-injected rows.
    pub fn handle_result_hints(&self, rows: &mut Vec<Row>) -> QueryResult<()> {
        self.hints.apply(self, rows)
    }
}

impl fmt::Debug for Querier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Querier")
            .field("query", &self.name())
            .field("script", &self.script)
            .field("script_parameter", &self.script_parameter)
            .finish()
    }
}

/// Turns a query plus a runtime parameter into a [`Querier`].
pub trait QuerierBuilder: Send + Sync {
    fn query(&self) -> &Arc<Query>;

    fn build(&self, parameter: QueryParameter) -> QueryResult<Querier>;
}

/// Shared services handed to builder factories.
#[derive(Debug, Clone, Default)]
pub struct BuilderContext {
    pub natives: Arc<NativeRegistry>,
    pub hints: Arc<HintRegistry>,
}

pub type BuilderFactory = fn(Arc<Query>, &BuilderContext) -> QueryResult<Arc<dyn QuerierBuilder>>;

/// Maps script kinds to builder factories.
#[derive(Clone)]
pub struct BuilderRegistry {
    factories: HashMap<ScriptKind, BuilderFactory>,
}

impl BuilderRegistry {
    /// A registry with no factories.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: ScriptKind, factory: BuilderFactory) {
        self.factories.insert(kind, factory);
    }

    pub fn with(mut self, kind: ScriptKind, factory: BuilderFactory) -> Self {
        self.register(kind, factory);
        self
    }

    pub fn supports(&self, kind: ScriptKind) -> bool {
        self.factories.contains_key(&kind)
    }

    pub fn create(&self, query: Arc<Query>, context: &BuilderContext) -> QueryResult<Arc<dyn QuerierBuilder>> {
        let kind = query.script().kind();
        let factory = self.factories.get(&kind).ok_or_else(|| {
            QueryError::build(
                &query.versioned_name(),
                format!("no builder registered for script kind '{}'", kind),
            )
        })?;
        factory(query, context)
    }
}

impl Default for BuilderRegistry {
    fn default() -> Self {
        Self::empty()
            .with(ScriptKind::Template, TemplateBuilder::create)
            .with(ScriptKind::Lua, LuaBuilder::create)
            .with(ScriptKind::Native, NativeBuilder::create)
            .with(ScriptKind::Literal, LiteralBuilder::create)
    }
}

impl fmt::Debug for BuilderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<_> = self.factories.keys().map(|k| k.to_string()).collect();
        f.debug_struct("BuilderRegistry").field("kinds", &kinds).finish()
    }
}
