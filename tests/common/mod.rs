//! Common test utilities for engine tests
//!
//! Provides shared helpers for:
//! - An in-memory executor that records every statement it runs
//! - Seeded tables (users, orders, memberships)
//! - Building a service over a set of query definitions

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use namedql::mapping::{MappingBuilder, QueryDefinition};
use namedql::{Executor, QueryService, Row, StorageError};
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Value};

/// One statement seen by the executor.
#[derive(Debug, Clone)]
pub struct Call {
    pub statement: String,
    pub args: Vec<Value>,
}

/// Executes the small statement shapes used by the fixtures:
/// `SELECT * FROM <table> [WHERE <col> = ? | <col> > ? | <col> IN (?,..) [AND ..]]`
/// optionally wrapped by `LIMIT`/`OFFSET` or a `COUNT(*)`.
pub struct MemoryExecutor {
    tables: HashMap<String, Vec<Row>>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<u32>,
    condition: Regex,
    limit: Regex,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(0),
            condition: Regex::new(r"(\w+)\s*(=|>|IN)\s*(\((?:\?,?)+\)|\?)").unwrap(),
            limit: Regex::new(r"LIMIT (\d+)(?: OFFSET (\d+))?").unwrap(),
        }
    }

    pub fn with_table(mut self, name: &str, rows: Value) -> Self {
        self.tables.insert(name.to_string(), rows_of(rows));
        self
    }

    /// Make the next `n` statements fail.
    pub fn fail_next(&self, n: u32) {
        *self.failures.lock() = n;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_matching(&self, needle: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.statement.contains(needle))
            .collect()
    }

    pub fn count_calls(&self) -> usize {
        self.calls_matching("COUNT(*)").len()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn run(&self, statement: &str, args: &[Value]) -> Result<Vec<Row>, StorageError> {
        self.calls.lock().push(Call {
            statement: statement.to_string(),
            args: args.to_vec(),
        });
        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err("connection reset".into());
            }
        }

        let from = statement.rfind("FROM ").ok_or("statement has no FROM")?;
        let table: String = statement[from + 5..]
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        let data = self
            .tables
            .get(&table)
            .ok_or_else(|| format!("no such table: {}", table))?;

        let where_clause = statement[from..].split(" WHERE ").nth(1).unwrap_or("");
        let mut remaining = args.iter();
        let mut filters: Vec<(String, String, Vec<Value>)> = Vec::new();
        for cap in self.condition.captures_iter(where_clause) {
            let count = cap[3].matches('?').count();
            let values: Vec<Value> = remaining.by_ref().take(count).cloned().collect();
            filters.push((cap[1].to_string(), cap[2].to_string(), values));
        }

        let mut rows: Vec<Row> = data
            .iter()
            .filter(|row| {
                filters.iter().all(|(col, op, values)| {
                    let field = row.get(col).unwrap_or(&Value::Null);
                    match op.as_str() {
                        ">" => field.as_f64() > values.first().and_then(Value::as_f64),
                        _ => values.iter().any(|v| v == field),
                    }
                })
            })
            .cloned()
            .collect();

        if statement.starts_with("SELECT COUNT(*)") {
            let mut row = Row::new();
            row.insert("total_".to_string(), json!(rows.len()));
            return Ok(vec![row]);
        }

        if let Some(cap) = self.limit.captures(statement) {
            let limit: usize = cap[1].parse()?;
            let offset: usize = cap.get(2).map_or(Ok(0), |m| m.as_str().parse())?;
            rows = rows.into_iter().skip(offset).take(limit).collect();
        }
        Ok(rows)
    }
}

impl Executor for MemoryExecutor {
    fn get(&self, statement: &str, _timeout: Option<Duration>, args: &[Value]) -> Result<Option<Row>, StorageError> {
        Ok(self.run(statement, args)?.into_iter().next())
    }

    fn select(
        &self,
        statement: &str,
        expect_rows: usize,
        _timeout: Option<Duration>,
        args: &[Value],
    ) -> Result<Vec<Row>, StorageError> {
        let mut rows = self.run(statement, args)?;
        if expect_rows > 0 {
            rows.truncate(expect_rows);
        }
        Ok(rows)
    }
}

pub fn rows_of(value: Value) -> Vec<Row> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(row) => Some(row),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// 17 users: ids 1..=10 in `eng`, 11..=17 in `ops`.
pub fn users() -> Value {
    Value::Array(
        (1..=17)
            .map(|id| {
                json!({
                    "id": id,
                    "name": format!("user{}", id),
                    "dept": if id <= 10 { "eng" } else { "ops" },
                })
            })
            .collect(),
    )
}

/// Six orders, one per user 1..=6, plus a second order for user 1.
pub fn orders() -> Value {
    let mut orders: Vec<Value> = (1..=6)
        .map(|id| json!({"id": 100 + id, "user_id": id, "total": id * 10}))
        .collect();
    orders.push(json!({"id": 107, "user_id": 1, "total": 5}));
    Value::Array(orders)
}

pub fn seeded_executor() -> MemoryExecutor {
    MemoryExecutor::new()
        .with_table("users", users())
        .with_table("orders", orders())
        .with_table(
            "memberships",
            json!([
                {"id": 1, "group_id": 7, "user_id": 2},
                {"id": 2, "group_id": 7, "user_id": 2},
                {"id": 3, "group_id": 7, "user_id": 5}
            ]),
        )
}

pub fn create_service(
    definitions: Vec<QueryDefinition>,
    executor: Arc<MemoryExecutor>,
) -> QueryService {
    let mut builder = MappingBuilder::new();
    for definition in definitions {
        builder.add_query("<test>", definition);
    }
    let mappings = builder.build().expect("mappings should validate");
    QueryService::builder(mappings, executor).build()
}
