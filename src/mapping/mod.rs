//! Query mapping model.
//!
//! Queries are described by mutable [`definition`] values while mappings load,
//! then validated and frozen into the read-only types of this module. A frozen
//! [`Query`] is only ever handed out behind an `Arc`.

pub mod builder;
pub mod definition;
mod validate;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::convert::ParamType;

pub use builder::{DescriptorFormat, MappingBuilder};
pub use definition::{
    FetchQueryDefinition, FetchQueryParameterDefinition, MappingDefinition, QueryDefinition,
    QueryHintDefinition, ScriptDefinition,
};

/// Join a query name and version into the identity used for lookups.
pub fn versioned_name(name: &str, version: &str) -> String {
    let version = version.trim();
    if version.is_empty() {
        name.trim().to_string()
    } else {
        format!("{}:{}", name.trim(), version)
    }
}

/// How a [`Script`] is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    /// Template text with `{{ }}` / `{% %}` directives.
    #[serde(alias = "tpl", alias = "fm")]
    Template,
    /// Embedded Lua chunk.
    #[serde(alias = "js", alias = "script")]
    Lua,
    /// Rust implementation registered by name.
    #[serde(alias = "bean", alias = "cdi")]
    Native,
    /// Statement text used as-is, with `:name` placeholders.
    #[serde(alias = "sql", alias = "raw")]
    Literal,
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScriptKind::Template => "template",
            ScriptKind::Lua => "lua",
            ScriptKind::Native => "native",
            ScriptKind::Literal => "literal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    kind: ScriptKind,
    code: String,
}

impl Script {
    pub fn new(kind: ScriptKind, code: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
        }
    }

    pub fn kind(&self) -> ScriptKind {
        self.kind
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn is_valid(&self) -> bool {
        !self.code.trim().is_empty()
    }
}

/// Storage family a query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    #[default]
    Sql,
    Mongodb,
    Elastic,
    Cassandra,
}

/// Where a fetch-query parameter takes its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParameterSource {
    /// A path into the parent query's criteria.
    #[serde(alias = "P")]
    ParentParameter,
    /// A path into each parent result row.
    #[serde(alias = "R")]
    ParentResultField,
    /// A literal value.
    #[serde(alias = "C")]
    Constant,
    /// A script evaluated against the parent criteria and rows.
    #[serde(alias = "S")]
    Script,
}

impl ParameterSource {
    pub fn requires_source_name(self) -> bool {
        matches!(
            self,
            ParameterSource::ParentParameter | ParameterSource::ParentResultField
        )
    }
}

#[derive(Debug, Clone)]
pub struct FetchQueryParameter {
    pub(crate) name: String,
    pub(crate) source: ParameterSource,
    pub(crate) source_name: Option<String>,
    pub(crate) value: Option<Value>,
    pub(crate) convert_type: Option<ParamType>,
    pub(crate) script: Option<Script>,
    pub(crate) distinct: bool,
    pub(crate) single_as_list: bool,
}

impl FetchQueryParameter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> ParameterSource {
        self.source
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source_name.as_deref()
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Type the resolved value is converted to before binding.
    pub fn convert_type(&self) -> Option<ParamType> {
        self.convert_type
    }

    pub fn script(&self) -> Option<&Script> {
        self.script.as_ref()
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn is_single_as_list(&self) -> bool {
        self.single_as_list
    }
}

#[derive(Debug, Clone)]
pub struct FetchQuery {
    pub(crate) reference_name: String,
    pub(crate) reference_version: String,
    pub(crate) inject_property_name: Option<String>,
    pub(crate) injection_script: Option<Script>,
    pub(crate) parameters: Vec<FetchQueryParameter>,
    pub(crate) multi_records: bool,
    pub(crate) max_fetch_size: usize,
    pub(crate) predicate_script: Option<Script>,
    pub(crate) eager_inject: bool,
}

impl FetchQuery {
    pub fn reference_name(&self) -> &str {
        &self.reference_name
    }

    pub fn reference_version(&self) -> &str {
        &self.reference_version
    }

    /// Identity of the referenced query, as used by the resolver.
    pub fn versioned_reference(&self) -> String {
        versioned_name(&self.reference_name, &self.reference_version)
    }

    pub fn inject_property_name(&self) -> Option<&str> {
        self.inject_property_name.as_deref()
    }

    pub fn injection_script(&self) -> Option<&Script> {
        self.injection_script.as_ref()
    }

    pub fn parameters(&self) -> &[FetchQueryParameter] {
        &self.parameters
    }

    pub fn is_multi_records(&self) -> bool {
        self.multi_records
    }

    pub fn max_fetch_size(&self) -> usize {
        self.max_fetch_size
    }

    pub fn predicate_script(&self) -> Option<&Script> {
        self.predicate_script.as_ref()
    }

    pub fn is_eager_inject(&self) -> bool {
        self.eager_inject
    }
}

#[derive(Debug, Clone)]
pub struct QueryHint {
    pub(crate) key: String,
    pub(crate) parameters: BTreeMap<String, Vec<String>>,
    pub(crate) script: Option<Script>,
}

impl QueryHint {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            parameters: BTreeMap::new(),
            script: None,
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, values: Vec<String>) -> Self {
        self.parameters.insert(name.into(), values);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn parameters(&self) -> &BTreeMap<String, Vec<String>> {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> &[String] {
        self.parameters.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn script(&self) -> Option<&Script> {
        self.script.as_ref()
    }
}

/// A validated, immutable named query.
#[derive(Debug, Clone)]
pub struct Query {
    pub(crate) name: String,
    pub(crate) version: String,
    pub(crate) description: Option<String>,
    pub(crate) result_class: Option<String>,
    pub(crate) result_set_mapping: Option<String>,
    pub(crate) cache: bool,
    pub(crate) cache_result_set_metadata: bool,
    pub(crate) kind: QueryType,
    pub(crate) script: Script,
    pub(crate) fetch_queries: Vec<FetchQuery>,
    pub(crate) hints: Vec<QueryHint>,
    pub(crate) parameter_types: BTreeMap<String, ParamType>,
    pub(crate) properties: BTreeMap<String, String>,
}

impl Query {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn versioned_name(&self) -> String {
        versioned_name(&self.name, &self.version)
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn result_class(&self) -> Option<&str> {
        self.result_class.as_deref()
    }

    pub fn result_set_mapping(&self) -> Option<&str> {
        self.result_set_mapping.as_deref()
    }

    pub fn is_cache(&self) -> bool {
        self.cache
    }

    pub fn is_cache_result_set_metadata(&self) -> bool {
        self.cache_result_set_metadata
    }

    pub fn kind(&self) -> QueryType {
        self.kind
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn fetch_queries(&self) -> &[FetchQuery] {
        &self.fetch_queries
    }

    pub fn hints(&self) -> &[QueryHint] {
        &self.hints
    }

    pub fn parameter_types(&self) -> &BTreeMap<String, ParamType> {
        &self.parameter_types
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Parse a property value, ignoring absent or malformed entries.
    pub fn property<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.properties.get(key).and_then(|v| v.trim().parse().ok())
    }
}

/// The frozen set of queries served by the engine, keyed by versioned name.
#[derive(Debug, Default)]
pub struct QueryMappings {
    queries: BTreeMap<String, Arc<Query>>,
}

impl QueryMappings {
    pub(crate) fn new(queries: BTreeMap<String, Arc<Query>>) -> Self {
        Self { queries }
    }

    pub fn get_query(&self, name: &str) -> Option<Arc<Query>> {
        self.queries.get(name).cloned()
    }

    pub fn get_queries(&self) -> impl Iterator<Item = &Arc<Query>> {
        self.queries.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.queries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
