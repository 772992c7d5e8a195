//! Fetch query orchestration.
//!
//! Each declared fetch query runs once per parent batch: its parameters are
//! gathered from the parent criteria and rows, the referenced query is
//! selected through the same service, and the fetched rows are injected back
//! into the parents.

use serde_json::{Map, Value};

use super::QueryService;
use crate::convert::convert_value;
use crate::error::{QueryError, QueryResult};
use crate::mapping::{FetchQuery, FetchQueryParameter, ParameterSource};
use crate::querier::{Querier, QueryParameter};
use crate::scripting::conversion::json_to_rows;
use crate::scripting::ScriptBindings;
use crate::value::{get_field_value, get_row_path, push_unique, set_path, value_matches, Row};

impl QueryService {
    pub(super) fn inject_fetches(
        &self,
        querier: &Querier,
        rows: &mut Vec<Row>,
        path: &mut Vec<String>,
    ) -> QueryResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let owner = querier.name();
        for fetch in querier.query().fetch_queries() {
            self.inject_fetch(&owner, querier, fetch, rows, path)?;
        }
        Ok(())
    }

    fn inject_fetch(
        &self,
        owner: &str,
        querier: &Querier,
        fetch: &FetchQuery,
        rows: &mut Vec<Row>,
        path: &mut Vec<String>,
    ) -> QueryResult<()> {
        let reference = fetch.versioned_reference();
        if !fetch.is_eager_inject() {
            tracing::debug!("Skipping lazy fetch {} of {}", reference, owner);
            return Ok(());
        }

        let parameter = querier.parameter();
        let bindings =
            ScriptBindings::new(&parameter.criteria, &parameter.context).with_rows(rows.as_slice());
        if let Some(predicate) = fetch.predicate_script() {
            if !self.runner.test(owner, predicate, &bindings)? {
                tracing::debug!("Predicate skipped fetch {} of {}", reference, owner);
                return Ok(());
            }
        }

        let mut criteria = Map::new();
        for fetch_parameter in fetch.parameters() {
            let value = self.resolve_parameter(owner, fetch_parameter, &bindings, rows.as_slice())?;
            set_path(&mut criteria, fetch_parameter.name(), value);
        }

        if path.contains(&reference) {
            let mut cycle = path.clone();
            cycle.push(reference);
            return Err(QueryError::FetchCycle(cycle));
        }

        let child = QueryParameter::new(Value::Object(criteria)).with_context(parameter.context.clone());
        path.push(reference.clone());
        let fetched = self.select_inner(&reference, child, Some(fetch.max_fetch_size()), path);
        path.pop();
        let fetched = fetched?;
        tracing::debug!(
            "Fetched {} rows from {} for {} parent rows of {}",
            fetched.len(),
            reference,
            rows.len(),
            owner
        );

        if let Some(script) = fetch.injection_script() {
            let bindings = ScriptBindings::new(&parameter.criteria, &parameter.context)
                .with_rows(rows.as_slice())
                .with_fetched(&fetched);
            let result = self.runner.evaluate(owner, script, &bindings)?;
            if !result.is_null() {
                *rows = json_to_rows(result).ok_or_else(|| {
                    QueryError::script(
                        owner,
                        format!("injection script for {} must return a list of rows", reference),
                    )
                })?;
            }
            return Ok(());
        }

        let Some(property) = fetch.inject_property_name() else {
            return Ok(());
        };
        let keys: Vec<&FetchQueryParameter> = fetch
            .parameters()
            .iter()
            .filter(|p| p.source() == ParameterSource::ParentResultField)
            .collect();

        for row in rows.iter_mut() {
            let mut matched = fetched.iter().filter(|f| matches_parent(row, f, &keys));
            let value = if fetch.is_multi_records() {
                Value::Array(matched.map(|f| Value::Object(f.clone())).collect())
            } else {
                matched
                    .next()
                    .map(|f| Value::Object(f.clone()))
                    .unwrap_or(Value::Null)
            };
            set_path(row, property, value);
        }
        Ok(())
    }

    fn resolve_parameter(
        &self,
        owner: &str,
        parameter: &FetchQueryParameter,
        bindings: &ScriptBindings<'_>,
        rows: &[Row],
    ) -> QueryResult<Value> {
        let source_name = parameter.source_name().unwrap_or_default();
        let mut value = match parameter.source() {
            ParameterSource::ParentParameter => get_field_value(bindings.criteria, source_name),
            ParameterSource::ParentResultField => {
                let mut values = Vec::with_capacity(rows.len());
                for row in rows {
                    match get_row_path(row, source_name) {
                        None | Some(Value::Null) => {}
                        Some(v) => push_unique(&mut values, v.clone(), parameter.is_distinct()),
                    }
                }
                if rows.len() == 1 {
                    values.pop().unwrap_or(Value::Null)
                } else {
                    Value::Array(values)
                }
            }
            ParameterSource::Constant => parameter.value().cloned().unwrap_or(Value::Null),
            ParameterSource::Script => match parameter.script() {
                Some(script) => self.runner.evaluate(owner, script, bindings)?,
                None => Value::Null,
            },
        };

        if parameter.is_distinct() {
            if let Value::Array(items) = value {
                let mut unique = Vec::with_capacity(items.len());
                for item in items {
                    push_unique(&mut unique, item, true);
                }
                value = Value::Array(unique);
            }
        }
        if let Some(ty) = parameter.convert_type() {
            value = convert_value(&value, ty).map_err(|e| {
                QueryError::Conversion(format!(
                    "{}: fetch parameter '{}': {}",
                    owner,
                    parameter.name(),
                    e
                ))
            })?;
        }
        if parameter.is_single_as_list() && !value.is_array() && !value.is_null() {
            value = Value::Array(vec![value]);
        }
        Ok(value)
    }
}

/// A fetched row belongs to a parent when, for every result-field parameter,
/// the fetched field named after the parameter equals (or is contained in)
/// the parent's source value. Fetched rows without that field match all.
fn matches_parent(parent: &Row, fetched: &Row, keys: &[&FetchQueryParameter]) -> bool {
    static NULL: Value = Value::Null;
    keys.iter().all(|key| {
        let Some(needle) = get_row_path(fetched, key.name()) else {
            return true;
        };
        let source = key
            .source_name()
            .and_then(|name| get_row_path(parent, name))
            .unwrap_or(&NULL);
        value_matches(source, needle)
    })
}
