//! Template rendering and expression evaluation.

use std::cmp::Ordering;

use serde_json::{json, Value};

use super::{BinaryOp, Expr, Node};
use crate::error::{QueryError, QueryResult};
use crate::value::{
    compare_values, get_field_value, number_from_f64, safe_regex, to_bool, to_text, values_equal,
};

pub(super) struct Renderer<'a> {
    criteria: &'a Value,
    scopes: Vec<(String, Value)>,
    output: String,
    args: Vec<Value>,
}

impl<'a> Renderer<'a> {
    pub(super) fn new(criteria: &'a Value) -> Self {
        Self {
            criteria,
            scopes: Vec::new(),
            output: String::new(),
            args: Vec::new(),
        }
    }

    pub(super) fn finish(self) -> (String, Vec<Value>) {
        (self.output, self.args)
    }

    pub(super) fn render_nodes(&mut self, nodes: &[Node]) -> QueryResult<()> {
        for node in nodes {
            match node {
                Node::Text(text) => self.output.push_str(text),
                Node::Output(expr) => {
                    let value = self.evaluate(expr)?;
                    self.output.push_str(&to_text(&value));
                }
                Node::If {
                    branches,
                    otherwise,
                } => {
                    let mut taken = false;
                    for (condition, body) in branches {
                        if to_bool(&self.evaluate(condition)?) {
                            self.render_nodes(body)?;
                            taken = true;
                            break;
                        }
                    }
                    if !taken {
                        self.render_nodes(otherwise)?;
                    }
                }
                Node::For {
                    variable,
                    iterable,
                    body,
                } => {
                    let items = match self.evaluate(iterable)? {
                        Value::Null => Vec::new(),
                        Value::Array(items) => items,
                        Value::Object(map) => map
                            .into_iter()
                            .map(|(key, value)| json!({"key": key, "value": value}))
                            .collect(),
                        scalar => vec![scalar],
                    };
                    let count = items.len();
                    for (index, item) in items.into_iter().enumerate() {
                        let info = json!({
                            "index": index + 1,
                            "index0": index,
                            "first": index == 0,
                            "last": index + 1 == count,
                            "length": count,
                        });
                        self.scopes.push(("loop".to_string(), info));
                        self.scopes.push((variable.clone(), item));
                        let result = self.render_nodes(body);
                        self.scopes.truncate(self.scopes.len() - 2);
                        result?;
                    }
                }
            }
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Value {
        if let Some((_, value)) = self.scopes.iter().rev().find(|(n, _)| n == name) {
            return value.clone();
        }
        if name == "p" {
            return self.criteria.clone();
        }
        get_field_value(self.criteria, name)
    }

    fn evaluate(&mut self, expr: &Expr) -> QueryResult<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Variable(name) => Ok(self.lookup(name)),
            Expr::Field(base, field) => {
                let base = self.evaluate(base)?;
                Ok(get_field_value(&base, field))
            }
            Expr::Index(base, index) => {
                let base = self.evaluate(base)?;
                let index = self.evaluate(index)?;
                Ok(match (&base, &index) {
                    (Value::Array(items), Value::Number(n)) => n
                        .as_u64()
                        .and_then(|i| items.get(i as usize).cloned())
                        .unwrap_or(Value::Null),
                    (Value::Object(map), Value::String(key)) => {
                        map.get(key).cloned().unwrap_or(Value::Null)
                    }
                    _ => Value::Null,
                })
            }
            Expr::Array(items) => items
                .iter()
                .map(|item| self.evaluate(item))
                .collect::<QueryResult<Vec<_>>>()
                .map(Value::Array),
            Expr::Not(inner) => Ok(Value::Bool(!to_bool(&self.evaluate(inner)?))),
            Expr::Binary(left, op, right) => self.evaluate_binary(left, *op, right),
            Expr::Call(name, args) => {
                let args = args
                    .iter()
                    .map(|arg| self.evaluate(arg))
                    .collect::<QueryResult<Vec<_>>>()?;
                self.call(name, args)
            }
        }
    }

    fn evaluate_binary(&mut self, left: &Expr, op: BinaryOp, right: &Expr) -> QueryResult<Value> {
        // Short-circuit before evaluating the right side
        match op {
            BinaryOp::And => {
                let l = self.evaluate(left)?;
                if !to_bool(&l) {
                    return Ok(Value::Bool(false));
                }
                return Ok(Value::Bool(to_bool(&self.evaluate(right)?)));
            }
            BinaryOp::Or => {
                let l = self.evaluate(left)?;
                if to_bool(&l) {
                    return Ok(Value::Bool(true));
                }
                return Ok(Value::Bool(to_bool(&self.evaluate(right)?)));
            }
            _ => {}
        }

        let l = self.evaluate(left)?;
        let r = self.evaluate(right)?;
        let result = match op {
            BinaryOp::Equal => Value::Bool(values_equal(&l, &r)),
            BinaryOp::NotEqual => Value::Bool(!values_equal(&l, &r)),
            BinaryOp::LessThan => Value::Bool(compare_values(&l, &r) == Ordering::Less),
            BinaryOp::LessThanOrEqual => Value::Bool(compare_values(&l, &r) != Ordering::Greater),
            BinaryOp::GreaterThan => Value::Bool(compare_values(&l, &r) == Ordering::Greater),
            BinaryOp::GreaterThanOrEqual => Value::Bool(compare_values(&l, &r) != Ordering::Less),
            BinaryOp::In => Value::Bool(contains(&r, &l)),
            BinaryOp::NotIn => Value::Bool(!contains(&r, &l)),
            BinaryOp::Add => add(l, r),
            BinaryOp::And | BinaryOp::Or => Value::Null,
        };
        Ok(result)
    }

    fn call(&mut self, name: &str, args: Vec<Value>) -> QueryResult<Value> {
        let arg = |index: usize| args.get(index).cloned().unwrap_or(Value::Null);
        match name {
            "sp" => {
                if args.len() != 1 {
                    return Err(QueryError::Template(
                        "sp() takes exactly one argument".to_string(),
                    ));
                }
                self.args.push(arg(0));
                Ok(Value::String("?".to_string()))
            }
            "empty" => Ok(Value::Bool(!to_bool(&arg(0)))),
            "len" => Ok(Value::from(match arg(0) {
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                Value::String(s) => s.chars().count(),
                Value::Null => 0,
                _ => 1,
            })),
            "like" => {
                let value = arg(0);
                if value.is_null() {
                    return Ok(Value::Null);
                }
                Ok(Value::String(format!("%{}%", to_text(&value))))
            }
            "upper" => Ok(Value::String(to_text(&arg(0)).to_uppercase())),
            "lower" => Ok(Value::String(to_text(&arg(0)).to_lowercase())),
            "matches" => {
                let pattern = to_text(&arg(1));
                let regex = safe_regex(&pattern)
                    .map_err(|e| QueryError::Template(format!("Invalid regex: {}", e)))?;
                Ok(Value::Bool(regex.is_match(&to_text(&arg(0)))))
            }
            "join" => {
                let separator = match args.get(1) {
                    Some(sep) => to_text(sep),
                    None => ",".to_string(),
                };
                Ok(Value::String(match arg(0) {
                    Value::Array(items) => items
                        .iter()
                        .map(to_text)
                        .collect::<Vec<_>>()
                        .join(&separator),
                    other => to_text(&other),
                }))
            }
            "default" => {
                let value = arg(0);
                Ok(if value.is_null() { arg(1) } else { value })
            }
            other => Err(QueryError::Template(format!(
                "Unknown function '{}'",
                other
            ))),
        }
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::String(s) => s.contains(&to_text(needle)),
        Value::Object(map) => map.contains_key(&to_text(needle)),
        _ => false,
    }
}

fn add(left: Value, right: Value) -> Value {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Value::from(a.saturating_add(b)),
            _ => Value::Number(number_from_f64(
                a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0),
            )),
        },
        (Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Value::Array(a)
        }
        (l, r) => Value::String(format!("{}{}", to_text(&l), to_text(&r))),
    }
}
