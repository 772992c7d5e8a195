use thiserror::Error;

/// Boxed failure raised by external collaborators (executors, dialects).
pub type StorageError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Query '{0}' not found")]
    QueryNotFound(String),

    #[error("Invalid query mapping: {}", .0.join("; "))]
    Mapping(Vec<String>),

    #[error("Failed to build querier for '{query}': {message}")]
    Build { query: String, message: String },

    #[error("Script error in '{query}': {message}")]
    Script { query: String, message: String },

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Statement error: {0}")]
    Statement(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Execution of '{query}' failed: {source}")]
    Execution {
        query: String,
        #[source]
        source: StorageError,
    },

    #[error("Result of '{query}' exceeds the maximum size of {max}")]
    SizeExceeded { query: String, max: usize },

    #[error("Fetch cycle detected: {}", .0.join(" -> "))]
    FetchCycle(Vec<String>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Querier resolver is not running")]
    Shutdown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Coarse classification of [`QueryError`], used where callers need to match
/// on the kind of failure without inspecting its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    QueryNotFound,
    Mapping,
    Build,
    Script,
    Conversion,
    Statement,
    Template,
    Execution,
    SizeExceeded,
    FetchCycle,
    Config,
    Shutdown,
    Io,
    Json,
    Toml,
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::QueryNotFound(_) => ErrorKind::QueryNotFound,
            QueryError::Mapping(_) => ErrorKind::Mapping,
            QueryError::Build { .. } => ErrorKind::Build,
            QueryError::Script { .. } => ErrorKind::Script,
            QueryError::Conversion(_) => ErrorKind::Conversion,
            QueryError::Statement(_) => ErrorKind::Statement,
            QueryError::Template(_) => ErrorKind::Template,
            QueryError::Execution { .. } => ErrorKind::Execution,
            QueryError::SizeExceeded { .. } => ErrorKind::SizeExceeded,
            QueryError::FetchCycle(_) => ErrorKind::FetchCycle,
            QueryError::Config(_) => ErrorKind::Config,
            QueryError::Shutdown => ErrorKind::Shutdown,
            QueryError::Io(_) => ErrorKind::Io,
            QueryError::Json(_) => ErrorKind::Json,
            QueryError::Toml(_) => ErrorKind::Toml,
        }
    }

    pub(crate) fn build(query: &str, message: impl Into<String>) -> Self {
        QueryError::Build {
            query: query.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn script(query: &str, message: impl Into<String>) -> Self {
        QueryError::Script {
            query: query.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn execution(query: &str, source: StorageError) -> Self {
        QueryError::Execution {
            query: query.to_string(),
            source,
        }
    }
}

pub type QueryResult<T> = Result<T, QueryError>;

impl serde::Serialize for QueryError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = QueryError::QueryNotFound("users.list".to_string());
        assert_eq!(err.to_string(), "Query 'users.list' not found");

        let err = QueryError::build("users.list", "script produced no statement");
        assert_eq!(
            err.to_string(),
            "Failed to build querier for 'users.list': script produced no statement"
        );

        let err = QueryError::Mapping(vec!["first".to_string(), "second".to_string()]);
        assert_eq!(err.to_string(), "Invalid query mapping: first; second");

        let err = QueryError::FetchCycle(vec!["a".to_string(), "b".to_string(), "a".to_string()]);
        assert_eq!(err.to_string(), "Fetch cycle detected: a -> b -> a");

        let err = QueryError::SizeExceeded {
            query: "orders".to_string(),
            max: 10,
        };
        assert_eq!(
            err.to_string(),
            "Result of 'orders' exceeds the maximum size of 10"
        );
    }

    #[test]
    fn test_execution_error_keeps_source() {
        let cause: StorageError = "connection reset".into();
        let err = QueryError::execution("orders", cause);
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert_eq!(err.to_string(), "Execution of 'orders' failed: connection reset");
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("connection reset"));
    }

    #[test]
    fn test_error_serializes_as_string() {
        let err = QueryError::Shutdown;
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json, serde_json::json!("Querier resolver is not running"));
    }
}
