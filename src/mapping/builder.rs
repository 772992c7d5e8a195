//! Loading and freezing query mappings.
//!
//! `MappingBuilder` collects definitions from descriptor files (TOML or JSON)
//! or from code, validates the merged set and freezes it into
//! [`QueryMappings`]. Load failures (unreadable files, bad syntax, missing
//! script sources) are recorded as problems alongside validation failures.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use super::definition::{
    FetchQueryDefinition, MappingDefinition, QueryDefinition, QueryHintDefinition,
    ScriptDefinition,
};
use super::validate::validate_definitions;
use super::{
    versioned_name, FetchQuery, FetchQueryParameter, Query, QueryHint, QueryMappings, Script,
    ScriptKind,
};
use crate::convert::ParamType;
use crate::error::{QueryError, QueryResult};

/// Descriptor syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorFormat {
    Toml,
    Json,
}

impl DescriptorFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "toml" => Some(DescriptorFormat::Toml),
            "json" => Some(DescriptorFormat::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct MappingBuilder {
    definitions: Vec<(String, QueryDefinition)>,
    load_problems: Vec<String>,
}

impl MappingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single definition built in code.
    pub fn query(mut self, definition: QueryDefinition) -> Self {
        self.add_query("<code>", definition);
        self
    }

    pub fn add_query(&mut self, origin: &str, definition: QueryDefinition) {
        self.definitions.push((origin.to_string(), definition));
    }

    pub fn add_mapping(&mut self, origin: &str, mapping: MappingDefinition) {
        for definition in mapping.queries {
            self.add_query(origin, definition);
        }
    }

    /// Parse descriptor text. Script `src` locators are resolved against `base_dir`.
    pub fn load_str(
        &mut self,
        origin: &str,
        text: &str,
        format: DescriptorFormat,
        base_dir: Option<&Path>,
    ) -> &mut Self {
        let parsed: Result<MappingDefinition, String> = match format {
            DescriptorFormat::Toml => toml::from_str(text).map_err(|e| e.to_string()),
            DescriptorFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
        };
        match parsed {
            Ok(mut mapping) => {
                for definition in &mut mapping.queries {
                    resolve_sources(definition, origin, base_dir, &mut self.load_problems);
                }
                tracing::debug!("Loaded {} queries from {}", mapping.queries.len(), origin);
                self.add_mapping(origin, mapping);
            }
            Err(e) => self
                .load_problems
                .push(format!("[{}] cannot parse descriptor: {}", origin, e)),
        }
        self
    }

    /// Load a `.toml` or `.json` descriptor file.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> &mut Self {
        let path = path.as_ref();
        let origin = path.display().to_string();
        let Some(format) = DescriptorFormat::from_path(path) else {
            self.load_problems
                .push(format!("[{}] unsupported descriptor extension", origin));
            return self;
        };
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let base_dir = path.parent();
                self.load_str(&origin, &text, format, base_dir)
            }
            Err(e) => {
                self.load_problems
                    .push(format!("[{}] cannot read descriptor: {}", origin, e));
                self
            }
        }
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Every load and validation problem, without failing.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = self.load_problems.clone();
        problems.extend(validate_definitions(&self.definitions));
        problems
    }

    /// Validate and freeze. Fails with every problem found.
    pub fn build(self) -> QueryResult<QueryMappings> {
        let problems = self.validate();
        if !problems.is_empty() {
            return Err(QueryError::Mapping(problems));
        }
        let mut queries = BTreeMap::new();
        for (_, definition) in self.definitions {
            let query = freeze_query(definition);
            queries.insert(query.versioned_name(), Arc::new(query));
        }
        tracing::info!("Query mappings ready with {} queries", queries.len());
        Ok(QueryMappings::new(queries))
    }
}

fn resolve_sources(
    definition: &mut QueryDefinition,
    origin: &str,
    base_dir: Option<&Path>,
    problems: &mut Vec<String>,
) {
    let id = versioned_name(&definition.name, &definition.version);
    let mut scripts: Vec<&mut ScriptDefinition> = vec![&mut definition.script];
    for fetch in &mut definition.fetch_queries {
        scripts.extend(fetch.injection_script.as_mut());
        scripts.extend(fetch.predicate_script.as_mut());
        for param in &mut fetch.parameters {
            scripts.extend(param.script.as_mut());
        }
    }
    for hint in &mut definition.hints {
        scripts.extend(hint.script.as_mut());
    }

    for script in scripts {
        let Some(src) = script.src.as_deref() else {
            continue;
        };
        if script.code.as_deref().is_some_and(|c| !c.trim().is_empty()) {
            continue;
        }
        let path = match base_dir {
            Some(dir) => dir.join(src),
            None => Path::new(src).to_path_buf(),
        };
        match std::fs::read_to_string(&path) {
            Ok(code) => script.code = Some(code),
            Err(e) => problems.push(format!(
                "[{}] query '{}' cannot read script source {}: {}",
                origin,
                id,
                path.display(),
                e
            )),
        }
    }
}

fn freeze_script(script: ScriptDefinition) -> Script {
    Script::new(
        script.kind.unwrap_or(ScriptKind::Literal),
        script.code.unwrap_or_default(),
    )
}

fn freeze_fetch(fetch: FetchQueryDefinition) -> FetchQuery {
    FetchQuery {
        reference_name: fetch.reference_query.trim().to_string(),
        reference_version: fetch.reference_query_version.trim().to_string(),
        inject_property_name: fetch
            .inject_property_name
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty()),
        injection_script: fetch.injection_script.map(freeze_script),
        parameters: fetch
            .parameters
            .into_iter()
            .map(|p| FetchQueryParameter {
                name: p.name,
                source: p.source,
                source_name: p.source_name.map(|s| s.trim().to_string()),
                value: p.value,
                convert_type: p.param_type.and_then(|t| t.parse::<ParamType>().ok()),
                script: p.script.map(freeze_script),
                distinct: p.distinct,
                single_as_list: p.single_as_list,
            })
            .collect(),
        multi_records: fetch.multi_records,
        max_fetch_size: fetch.max_fetch_size,
        predicate_script: fetch.predicate_script.map(freeze_script),
        eager_inject: fetch.eager_inject,
    }
}

fn freeze_hint(hint: QueryHintDefinition) -> QueryHint {
    QueryHint {
        key: hint.key.trim().to_string(),
        parameters: hint.parameters,
        script: hint.script.map(freeze_script),
    }
}

fn freeze_query(definition: QueryDefinition) -> Query {
    Query {
        name: definition.name.trim().to_string(),
        version: definition.version.trim().to_string(),
        description: definition.description,
        result_class: definition.result_class,
        result_set_mapping: definition.result_set_mapping,
        cache: definition.cache,
        cache_result_set_metadata: definition.cache_result_set_metadata,
        kind: definition.query_type,
        script: freeze_script(definition.script),
        fetch_queries: definition.fetch_queries.into_iter().map(freeze_fetch).collect(),
        hints: definition.hints.into_iter().map(freeze_hint).collect(),
        parameter_types: definition
            .parameter_types
            .into_iter()
            .filter_map(|(name, ty)| ty.parse::<ParamType>().ok().map(|ty| (name, ty)))
            .collect(),
        properties: definition.properties,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{FetchQueryParameterDefinition, ParameterSource};

    fn users() -> QueryDefinition {
        QueryDefinition::new("users", ScriptKind::Literal, "SELECT * FROM users")
    }

    #[test]
    fn test_build_freezes_queries() {
        let mappings = MappingBuilder::new()
            .query(users())
            .query(QueryDefinition::new("users", ScriptKind::Literal, "SELECT 2").version("2"))
            .build()
            .unwrap();

        assert_eq!(mappings.len(), 2);
        assert!(mappings.get_query("users").is_some());
        assert_eq!(mappings.get_query("users:2").unwrap().version(), "2");
    }

    #[test]
    fn test_duplicate_and_blank_script_reported_together() {
        let problems = MappingBuilder::new()
            .query(users())
            .query(users())
            .query(QueryDefinition::new("empty", ScriptKind::Template, "   "))
            .validate();

        assert_eq!(problems.len(), 2, "{:?}", problems);
        assert!(problems[0].contains("duplicate query 'users'"));
        assert!(problems[1].contains("'empty' script is empty"));
    }

    #[test]
    fn test_self_reference_rejected() {
        let err = MappingBuilder::new()
            .query(users().fetch(FetchQueryDefinition::new("users").inject_into("children")))
            .build()
            .unwrap_err();

        match err {
            QueryError::Mapping(problems) => {
                assert!(problems.iter().any(|p| p.contains("references itself")));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_fetch_parameter_rules() {
        let orders = QueryDefinition::new("orders", ScriptKind::Literal, "SELECT * FROM orders");
        let fetch = FetchQueryDefinition::new("orders")
            .inject_into("orders")
            .injection_script(ScriptDefinition::new(ScriptKind::Lua, "return rows"))
            .parameter(FetchQueryParameterDefinition::new(
                "userId",
                ParameterSource::ParentResultField,
            ))
            .parameter(FetchQueryParameterDefinition::new("kind", ParameterSource::Constant));

        let problems = MappingBuilder::new()
            .query(orders)
            .query(users().fetch(fetch))
            .validate();

        assert!(problems.iter().any(|p| p.contains("exactly one of")));
        assert!(problems.iter().any(|p| p.contains("'userId' requires a source-name")));
        assert!(problems.iter().any(|p| p.contains("'kind' is constant but has no value")));
    }

    #[test]
    fn test_unknown_reference_reported() {
        let problems = MappingBuilder::new()
            .query(users().fetch(FetchQueryDefinition::new("missing").inject_into("x")))
            .validate();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("references an unknown query"));
    }

    #[test]
    fn test_load_toml_descriptor() {
        let text = r#"
            [[query]]
            name = "users.byId"
            parameter-types = { id = "long" }
            properties = { timeout = "5" }
            script = { type = "literal", code = "SELECT * FROM users WHERE id = :id" }

            [[query.fetch-query]]
            reference-query = "orders.byUser"
            inject-property-name = "orders"
            max-fetch-size = 50

            [[query.fetch-query.parameter]]
            name = "userId"
            source = "R"
            source-name = "id"
            single-as-list = true

            [[query]]
            name = "orders.byUser"
            script = { type = "template", code = "SELECT * FROM orders WHERE user_id IN ({{ sp(userId) }})" }
        "#;

        let mut builder = MappingBuilder::new();
        builder.load_str("inline.toml", text, DescriptorFormat::Toml, None);
        let mappings = builder.build().unwrap();

        let query = mappings.get_query("users.byId").unwrap();
        assert_eq!(query.parameter_types().get("id"), Some(&ParamType::Integer));
        assert_eq!(query.property::<u64>("timeout"), Some(5));
        let fetch = &query.fetch_queries()[0];
        assert_eq!(fetch.max_fetch_size(), 50);
        assert!(fetch.is_multi_records());
        assert!(fetch.is_eager_inject());
        assert_eq!(fetch.parameters()[0].source(), ParameterSource::ParentResultField);
        assert!(fetch.parameters()[0].is_single_as_list());
    }

    #[test]
    fn test_parse_failure_is_a_problem() {
        let mut builder = MappingBuilder::new();
        builder.load_str("bad.json", "{ not json", DescriptorFormat::Json, None);
        let problems = builder.validate();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].starts_with("[bad.json] cannot parse descriptor"));
    }
}
