//! One builder per script kind.
//!
//! All builders share the same three steps: convert the criteria with the
//! query's parameter schema, evaluate the body into statement text plus bound
//! values, and package both into a [`Querier`]. They differ only in the middle
//! step.

use std::sync::Arc;

use serde_json::Value;

use super::{BuilderContext, Querier, QuerierBuilder, QueryParameter};
use crate::convert::convert_criteria;
use crate::error::{QueryError, QueryResult};
use crate::mapping::Query;
use crate::querier::HintRegistry;
use crate::scripting::{LuaScript, NativeScript, Template};
use crate::statement::{normalize_named, normalize_positional};

fn convert_parameter(query: &Query, mut parameter: QueryParameter) -> QueryResult<QueryParameter> {
    let criteria = std::mem::take(&mut parameter.criteria);
    parameter.criteria = convert_criteria(query.parameter_types(), criteria)?;
    Ok(parameter)
}

fn assemble(
    query: &Arc<Query>,
    hints: &Arc<HintRegistry>,
    parameter: QueryParameter,
    (script, args): (String, Vec<Value>),
) -> QueryResult<Querier> {
    tracing::debug!(
        "Built querier for {} with {} bound values",
        query.versioned_name(),
        args.len()
    );
    Querier::new(query.clone(), parameter, script, args, hints.clone())
}

/// Builds from a template parsed once at construction.
pub struct TemplateBuilder {
    query: Arc<Query>,
    template: Template,
    hints: Arc<HintRegistry>,
}

impl TemplateBuilder {
    pub fn create(query: Arc<Query>, context: &BuilderContext) -> QueryResult<Arc<dyn QuerierBuilder>> {
        let template = Template::compile(query.script().code())
            .map_err(|e| QueryError::build(&query.versioned_name(), e.to_string()))?;
        Ok(Arc::new(Self {
            query,
            template,
            hints: context.hints.clone(),
        }))
    }
}

impl QuerierBuilder for TemplateBuilder {
    fn query(&self) -> &Arc<Query> {
        &self.query
    }

    fn build(&self, parameter: QueryParameter) -> QueryResult<Querier> {
        let parameter = convert_parameter(&self.query, parameter)?;
        let rendered = self
            .template
            .render(&parameter.criteria)
            .map_err(|e| QueryError::build(&self.query.versioned_name(), e.to_string()))?;
        assemble(&self.query, &self.hints, parameter, rendered)
    }
}

/// Builds by running a Lua chunk that returns `sql[, params]`.
pub struct LuaBuilder {
    query: Arc<Query>,
    script: LuaScript,
    hints: Arc<HintRegistry>,
}

impl LuaBuilder {
    pub fn create(query: Arc<Query>, context: &BuilderContext) -> QueryResult<Arc<dyn QuerierBuilder>> {
        let name = query.versioned_name();
        let script = LuaScript::compile(&name, query.script().code())
            .map_err(|e| QueryError::build(&name, e))?;
        Ok(Arc::new(Self {
            query,
            script,
            hints: context.hints.clone(),
        }))
    }
}

impl QuerierBuilder for LuaBuilder {
    fn query(&self) -> &Arc<Query> {
        &self.query
    }

    fn build(&self, parameter: QueryParameter) -> QueryResult<Querier> {
        let parameter = convert_parameter(&self.query, parameter)?;
        let output = self
            .script
            .statement(&parameter.criteria, &parameter.context)
            .map_err(|e| QueryError::script(&self.query.versioned_name(), e))?;
        assemble(&self.query, &self.hints, parameter, output)
    }
}

/// Builds through a registered Rust implementation.
pub struct NativeBuilder {
    query: Arc<Query>,
    native: Arc<dyn NativeScript>,
    hints: Arc<HintRegistry>,
}

impl NativeBuilder {
    pub fn create(query: Arc<Query>, context: &BuilderContext) -> QueryResult<Arc<dyn QuerierBuilder>> {
        let name = query.script().code().trim().to_string();
        let native = context.natives.get(&name).ok_or_else(|| {
            QueryError::build(
                &query.versioned_name(),
                format!("no native script registered as '{}'", name),
            )
        })?;
        Ok(Arc::new(Self {
            query,
            native,
            hints: context.hints.clone(),
        }))
    }
}

impl QuerierBuilder for NativeBuilder {
    fn query(&self) -> &Arc<Query> {
        &self.query
    }

    fn build(&self, parameter: QueryParameter) -> QueryResult<Querier> {
        let parameter = convert_parameter(&self.query, parameter)?;
        let output = self
            .native
            .statement(&parameter.criteria, &parameter.context)
            .map_err(|e| QueryError::script(&self.query.versioned_name(), e.to_string()))?;
        assemble(&self.query, &self.hints, parameter, output)
    }
}

/// Uses the body as statement text, binding `:name` placeholders from the
/// criteria object (or `?` placeholders from a criteria array).
pub struct LiteralBuilder {
    query: Arc<Query>,
    hints: Arc<HintRegistry>,
}

impl LiteralBuilder {
    pub fn create(query: Arc<Query>, context: &BuilderContext) -> QueryResult<Arc<dyn QuerierBuilder>> {
        // Reject malformed placeholders up front
        crate::statement::parse_statement(query.script().code())
            .map_err(|e| QueryError::build(&query.versioned_name(), e.to_string()))?;
        Ok(Arc::new(Self {
            query,
            hints: context.hints.clone(),
        }))
    }
}

impl QuerierBuilder for LiteralBuilder {
    fn query(&self) -> &Arc<Query> {
        &self.query
    }

    fn build(&self, parameter: QueryParameter) -> QueryResult<Querier> {
        let parameter = convert_parameter(&self.query, parameter)?;
        let statement = self.query.script().code();
        let normalized = match &parameter.criteria {
            Value::Array(items) => normalize_positional(statement, items),
            criteria => normalize_named(statement, criteria),
        }
        .map_err(|e| QueryError::build(&self.query.versioned_name(), e.to_string()))?;
        assemble(
            &self.query,
            &self.hints,
            parameter,
            (normalized.statement, normalized.args),
        )
        .map(Querier::normalized)
    }
}
