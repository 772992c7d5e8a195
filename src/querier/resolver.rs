use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use super::{BuilderContext, BuilderRegistry, Querier, QuerierBuilder, QueryParameter};
use crate::error::{QueryError, QueryResult};
use crate::mapping::{Query, QueryMappings};

/// Resolves query names to queriers, caching one builder per name.
///
/// The cache lives between [`init`](Self::init) and
/// [`shutdown`](Self::shutdown); resolving outside that window fails with
/// [`QueryError::Shutdown`].
pub struct QuerierResolver {
    mappings: RwLock<Arc<QueryMappings>>,
    registry: BuilderRegistry,
    context: BuilderContext,
    builders: DashMap<String, Arc<dyn QuerierBuilder>>,
    running: AtomicBool,
}

impl QuerierResolver {
    pub fn new(mappings: Arc<QueryMappings>, registry: BuilderRegistry, context: BuilderContext) -> Self {
        Self {
            mappings: RwLock::new(mappings),
            registry,
            context,
            builders: DashMap::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn init(&self) {
        self.builders.clear();
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            "Querier resolver started with {} queries",
            self.mappings.read().len()
        );
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let cached = self.builders.len();
        self.builders.clear();
        tracing::info!("Querier resolver stopped, dropped {} cached builders", cached);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Swap in a new mapping set and drop every cached builder.
    pub fn reload(&self, mappings: Arc<QueryMappings>) {
        *self.mappings.write() = mappings;
        self.builders.clear();
        tracing::info!("Query mappings reloaded, builder cache cleared");
    }

    pub fn mappings(&self) -> Arc<QueryMappings> {
        self.mappings.read().clone()
    }

    pub fn query(&self, name: &str) -> QueryResult<Arc<Query>> {
        self.mappings
            .read()
            .get_query(name)
            .ok_or_else(|| QueryError::QueryNotFound(name.to_string()))
    }

    /// The cached builder for `name`, creating it on first use.
    ///
    /// Concurrent first resolutions may each create a builder; only the first
    /// one inserted is kept and returned to every caller.
    pub fn builder(&self, name: &str) -> QueryResult<Arc<dyn QuerierBuilder>> {
        if !self.is_running() {
            return Err(QueryError::Shutdown);
        }
        if let Some(builder) = self.builders.get(name) {
            return Ok(builder.value().clone());
        }

        let query = self.query(name)?;
        let created = self.registry.create(query, &self.context)?;
        tracing::debug!("Created querier builder for {}", name);
        let entry = self.builders.entry(name.to_string()).or_insert(created);
        Ok(entry.value().clone())
    }

    pub fn resolve(&self, name: &str, parameter: QueryParameter) -> QueryResult<Querier> {
        self.builder(name)?.build(parameter)
    }

    pub fn cached_builders(&self) -> usize {
        self.builders.len()
    }
}
