//! Storage-family specific statement rewriting.

use crate::mapping::QueryHint;

/// Field under which a count statement returns the total.
pub const TOTAL_FIELD: &str = "total_";

pub trait Dialect: Send + Sync {
    /// Restrict `statement` to `limit` rows starting at `offset`.
    fn get_limit_sql(&self, statement: &str, offset: usize, limit: usize, hints: &[QueryHint]) -> String;

    /// Count the rows `statement` would return, as [`TOTAL_FIELD`].
    fn get_count_sql(&self, statement: &str, hints: &[QueryHint]) -> String;

    fn total_field(&self) -> &str {
        TOTAL_FIELD
    }
}

/// `LIMIT`/`OFFSET` dialect understood by most SQL engines.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiDialect;

fn trim_statement(statement: &str) -> &str {
    statement.trim().trim_end_matches(';').trim_end()
}

impl Dialect for AnsiDialect {
    fn get_limit_sql(&self, statement: &str, offset: usize, limit: usize, _hints: &[QueryHint]) -> String {
        let statement = trim_statement(statement);
        if offset == 0 {
            format!("{} LIMIT {}", statement, limit)
        } else {
            format!("{} LIMIT {} OFFSET {}", statement, limit, offset)
        }
    }

    fn get_count_sql(&self, statement: &str, _hints: &[QueryHint]) -> String {
        format!(
            "SELECT COUNT(*) AS {} FROM ({}) AS count_",
            TOTAL_FIELD,
            trim_statement(statement)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_sql() {
        let d = AnsiDialect;
        assert_eq!(d.get_limit_sql("SELECT * FROM t;", 0, 10, &[]), "SELECT * FROM t LIMIT 10");
        assert_eq!(
            d.get_limit_sql("SELECT * FROM t", 20, 10, &[]),
            "SELECT * FROM t LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn test_count_sql() {
        assert_eq!(
            AnsiDialect.get_count_sql(" SELECT * FROM t WHERE a = ? ", &[]),
            "SELECT COUNT(*) AS total_ FROM (SELECT * FROM t WHERE a = ?) AS count_"
        );
    }
}
