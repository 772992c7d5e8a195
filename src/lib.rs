pub mod config;
pub mod convert;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod mapping;
pub mod querier;
pub mod scripting;
pub mod service;
pub mod statement;
pub mod value;

pub use config::{EngineConfig, SizeViolation, StreamConfig};
pub use dialect::{AnsiDialect, Dialect};
pub use error::{ErrorKind, QueryError, QueryResult, StorageError};
pub use executor::{Executor, RowStream};
pub use mapping::{MappingBuilder, Query, QueryMappings, ScriptKind};
pub use querier::{Querier, QuerierBuilder, QuerierResolver, QueryParameter, ResultHintHandler};
pub use scripting::{NativeRegistry, NativeScript};
pub use service::{Backoff, Forwarding, PagedList, QueryService, QueryStream};
pub use value::Row;
