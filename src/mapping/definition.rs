//! Mutable query definitions.
//!
//! These mirror the attributes of a mapping descriptor (kebab-case keys) and
//! are what TOML/JSON descriptor files deserialize into. They are converted to
//! the frozen model by [`MappingBuilder::build`](super::MappingBuilder::build).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ParameterSource, QueryType, ScriptKind};

fn default_true() -> bool {
    true
}

fn default_max_fetch_size() -> usize {
    1024
}

fn default_source() -> ParameterSource {
    ParameterSource::ParentParameter
}

/// One descriptor document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MappingDefinition {
    #[serde(default, rename = "query")]
    pub queries: Vec<QueryDefinition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScriptDefinition {
    #[serde(rename = "type")]
    pub kind: Option<ScriptKind>,
    #[serde(default)]
    pub code: Option<String>,
    /// File path resolved relative to the descriptor at load time.
    #[serde(default)]
    pub src: Option<String>,
}

impl ScriptDefinition {
    pub fn new(kind: ScriptKind, code: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            code: Some(code.into()),
            src: None,
        }
    }

    pub(crate) fn code_str(&self) -> &str {
        self.code.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FetchQueryParameterDefinition {
    pub name: String,
    #[serde(default = "default_source")]
    pub source: ParameterSource,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default, rename = "type")]
    pub param_type: Option<String>,
    #[serde(default)]
    pub script: Option<ScriptDefinition>,
    #[serde(default)]
    pub distinct: bool,
    #[serde(default)]
    pub single_as_list: bool,
}

impl FetchQueryParameterDefinition {
    pub fn new(name: impl Into<String>, source: ParameterSource) -> Self {
        Self {
            name: name.into(),
            source,
            source_name: None,
            value: None,
            param_type: None,
            script: None,
            distinct: false,
            single_as_list: false,
        }
    }

    pub fn source_name(mut self, path: impl Into<String>) -> Self {
        self.source_name = Some(path.into());
        self
    }

    pub fn value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn script(mut self, script: ScriptDefinition) -> Self {
        self.script = Some(script);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn single_as_list(mut self) -> Self {
        self.single_as_list = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FetchQueryDefinition {
    pub reference_query: String,
    #[serde(default)]
    pub reference_query_version: String,
    #[serde(default)]
    pub reference_query_type: Option<QueryType>,
    #[serde(default)]
    pub inject_property_name: Option<String>,
    #[serde(default)]
    pub injection_script: Option<ScriptDefinition>,
    #[serde(default, rename = "parameter")]
    pub parameters: Vec<FetchQueryParameterDefinition>,
    #[serde(default = "default_true")]
    pub multi_records: bool,
    #[serde(default = "default_max_fetch_size")]
    pub max_fetch_size: usize,
    #[serde(default)]
    pub predicate_script: Option<ScriptDefinition>,
    #[serde(default = "default_true")]
    pub eager_inject: bool,
}

impl FetchQueryDefinition {
    pub fn new(reference_query: impl Into<String>) -> Self {
        Self {
            reference_query: reference_query.into(),
            reference_query_version: String::new(),
            reference_query_type: None,
            inject_property_name: None,
            injection_script: None,
            parameters: Vec::new(),
            multi_records: true,
            max_fetch_size: default_max_fetch_size(),
            predicate_script: None,
            eager_inject: true,
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.reference_query_version = version.into();
        self
    }

    pub fn inject_into(mut self, property: impl Into<String>) -> Self {
        self.inject_property_name = Some(property.into());
        self
    }

    pub fn injection_script(mut self, script: ScriptDefinition) -> Self {
        self.injection_script = Some(script);
        self
    }

    pub fn parameter(mut self, parameter: FetchQueryParameterDefinition) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn single_record(mut self) -> Self {
        self.multi_records = false;
        self
    }

    pub fn max_fetch_size(mut self, size: usize) -> Self {
        self.max_fetch_size = size;
        self
    }

    pub fn predicate(mut self, script: ScriptDefinition) -> Self {
        self.predicate_script = Some(script);
        self
    }

    pub fn lazy(mut self) -> Self {
        self.eager_inject = false;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QueryHintDefinition {
    pub key: String,
    #[serde(default, rename = "parameter")]
    pub parameters: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub script: Option<ScriptDefinition>,
}

impl QueryHintDefinition {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn parameter<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn script(mut self, script: ScriptDefinition) -> Self {
        self.script = Some(script);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QueryDefinition {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub result_class: Option<String>,
    #[serde(default)]
    pub result_set_mapping: Option<String>,
    #[serde(default)]
    pub cache: bool,
    #[serde(default)]
    pub cache_result_set_metadata: bool,
    #[serde(default)]
    pub query_type: QueryType,
    #[serde(default)]
    pub script: ScriptDefinition,
    #[serde(default, rename = "fetch-query")]
    pub fetch_queries: Vec<FetchQueryDefinition>,
    #[serde(default, rename = "hint")]
    pub hints: Vec<QueryHintDefinition>,
    /// Criteria field name -> type name (see [`ParamType`](crate::convert::ParamType)).
    #[serde(default)]
    pub parameter_types: BTreeMap<String, String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl QueryDefinition {
    pub fn new(name: impl Into<String>, kind: ScriptKind, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: ScriptDefinition::new(kind, code),
            ..Default::default()
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn fetch(mut self, fetch: FetchQueryDefinition) -> Self {
        self.fetch_queries.push(fetch);
        self
    }

    pub fn hint(mut self, hint: QueryHintDefinition) -> Self {
        self.hints.push(hint);
        self
    }

    pub fn parameter_type(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.parameter_types.insert(name.into(), ty.into());
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}
