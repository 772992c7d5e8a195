//! Bind parameter normalization.
//!
//! Statements reach the executor with positional `?` placeholders and a flat
//! argument list. A placeholder bound to an array expands to one `?` per
//! element (`IN (?)` with `[1, 2, 3]` becomes `IN (?,?,?)`); scalars pass
//! through. Named placeholders are always rewritten to positional form.
//! Fixed-index placeholders (`?2`) are never rewritten.

use serde_json::Value;

use super::lexer::{parse_statement, ParsedStatement, Placeholder};
use crate::error::{QueryError, QueryResult};
use crate::value::get_path;

/// Statement text plus the flattened, ordered arguments it binds.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub statement: String,
    pub args: Vec<Value>,
}

/// Expand collection-valued arguments of a positional statement.
///
/// Statements using fixed-index placeholders are returned unchanged, since
/// expansion would shift the indices they refer to; mixing them with plain
/// `?` placeholders is rejected.
pub fn normalize_positional(statement: &str, args: &[Value]) -> QueryResult<Normalized> {
    let unchanged = || Normalized {
        statement: statement.to_string(),
        args: args.to_vec(),
    };
    if !args.iter().any(Value::is_array) {
        return Ok(unchanged());
    }

    let parsed = parse_statement(statement)?;
    if parsed.has_named() {
        return Err(QueryError::Statement(
            "Statement mixes named and positional placeholders".to_string(),
        ));
    }
    if parsed.has_indexed() {
        if parsed.has_positional() {
            return Err(QueryError::Statement(
                "Statement mixes fixed-index and positional placeholders".to_string(),
            ));
        }
        return Ok(unchanged());
    }
    if parsed.placeholders.len() != args.len() {
        return Err(QueryError::Statement(format!(
            "Statement has {} placeholders but {} arguments were bound",
            parsed.placeholders.len(),
            args.len()
        )));
    }

    Ok(rewrite(&parsed, |index, _| args[index].clone()))
}

/// Rewrite `:name` placeholders to positional form, binding each from `source`
/// by (dotted) path. Missing values bind as null.
pub fn normalize_named(statement: &str, source: &Value) -> QueryResult<Normalized> {
    let parsed = parse_statement(statement)?;
    if parsed.has_positional() || parsed.has_indexed() {
        return Err(QueryError::Statement(
            "Statement mixes named and positional placeholders".to_string(),
        ));
    }
    Ok(rewrite(&parsed, |_, placeholder| match placeholder {
        Placeholder::Named(name) => {
            let value = get_path(source, name).cloned();
            if value.is_none() {
                tracing::debug!("No value bound for :{}, using null", name);
            }
            value.unwrap_or(Value::Null)
        }
        _ => Value::Null,
    }))
}

fn rewrite<F>(parsed: &ParsedStatement<'_>, mut value_of: F) -> Normalized
where
    F: FnMut(usize, &Placeholder) -> Value,
{
    let text = parsed.text;
    let mut statement = String::with_capacity(text.len() + 16);
    let mut args = Vec::with_capacity(parsed.placeholders.len());
    let mut last = 0;

    for (index, node) in parsed.placeholders.iter().enumerate() {
        statement.push_str(&text[last..node.span.start]);
        last = node.span.end;
        match value_of(index, &node.placeholder) {
            // An empty collection still needs one bind so the statement stays valid
            Value::Array(items) if items.is_empty() => {
                statement.push('?');
                args.push(Value::Null);
            }
            Value::Array(items) => {
                statement.push_str(&vec!["?"; items.len()].join(","));
                args.extend(items);
            }
            scalar => {
                statement.push('?');
                args.push(scalar);
            }
        }
    }
    statement.push_str(&text[last..]);

    Normalized { statement, args }
}
