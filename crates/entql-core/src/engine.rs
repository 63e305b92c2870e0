//! The rewrite pipeline entry point.
//!
//! A [`RewriteEngine`] holds the process-wide read-only state (schema,
//! criterion registry, configuration) plus the optional parse cache. It is
//! `Send + Sync` and meant to be shared by every caller thread.

use crate::analyzer::{self, ExpressionPosition};
use crate::binder::{Binder, BoundQuery};
use crate::cache::{CacheStats, ParseCache};
use crate::catalog::EntitySchema;
use crate::config::EngineConfig;
use crate::criteria::CriterionRegistry;
use crate::error::RewriteResult;
use crate::params::ParameterMap;
use crate::security::SecurityContext;
use crate::serializer::{self, SerializedQuery};
use crate::transform::Transformer;
use entql_lang::{parse_with_depth, Query};
use std::sync::Arc;
use tracing::instrument;

/// Output of the whole pipeline.
#[derive(Debug, Clone)]
pub struct RewrittenQuery {
    /// Final query text.
    pub text: String,
    /// Caller parameters, then criterion parameters.
    pub parameters: ParameterMap,
    /// Transformed model, for position lookups.
    pub model: BoundQuery,
}

/// Lex, parse, bind, transform and serialize queries.
pub struct RewriteEngine {
    schema: Arc<dyn EntitySchema>,
    registry: Arc<CriterionRegistry>,
    config: EngineConfig,
    cache: Option<ParseCache>,
}

impl RewriteEngine {
    pub fn new(
        schema: Arc<dyn EntitySchema>,
        registry: Arc<CriterionRegistry>,
        config: EngineConfig,
    ) -> RewriteResult<Self> {
        config.validate()?;
        let cache = config.parse_cache_capacity.map(ParseCache::new);
        Ok(Self {
            schema,
            registry,
            config,
            cache,
        })
    }

    pub fn schema(&self) -> &dyn EntitySchema {
        self.schema.as_ref()
    }

    pub fn registry(&self) -> &CriterionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Parse `text`, through the parse cache when one is configured.
    pub fn parse(&self, text: &str) -> RewriteResult<Arc<Query>> {
        let depth = self.config.max_subquery_depth;
        let parse = |source: &str| parse_with_depth(source, depth);
        let query = match &self.cache {
            Some(cache) => cache.get_or_parse(text, parse)?,
            None => Arc::new(parse(text)?),
        };
        Ok(query)
    }

    /// Resolve `query` against the schema.
    pub fn bind(&self, query: Arc<Query>, parameters: ParameterMap) -> RewriteResult<BoundQuery> {
        Binder::new(self.schema.as_ref()).bind(query, parameters)
    }

    /// Apply the registered criteria for `security`.
    pub fn transform(
        &self,
        bound: &BoundQuery,
        security: &SecurityContext,
    ) -> RewriteResult<BoundQuery> {
        Transformer::new(self.schema.as_ref(), &self.registry)
            .with_options(self.config.transform_options())
            .transform(bound, security)
    }

    pub fn serialize(&self, bound: &BoundQuery) -> RewriteResult<SerializedQuery> {
        serializer::serialize(bound)
    }

    /// Run the whole pipeline on one query.
    #[instrument(skip_all, fields(principal = %security.principal, len = text.len()))]
    pub fn rewrite(
        &self,
        text: &str,
        parameters: ParameterMap,
        security: &SecurityContext,
    ) -> RewriteResult<RewrittenQuery> {
        let query = self.parse(text)?;
        let bound = self.bind(query, parameters)?;
        let model = self.transform(&bound, security)?;
        let SerializedQuery { text, parameters } = self.serialize(&model)?;

        tracing::debug!(
            criteria = model.applied_criteria().len(),
            parameters = parameters.len(),
            "rewrote query"
        );
        Ok(RewrittenQuery {
            text,
            parameters,
            model,
        })
    }

    /// Select-list position of the path written as `target`.
    pub fn position_of(
        &self,
        bound: &BoundQuery,
        target: &str,
    ) -> RewriteResult<Option<ExpressionPosition>> {
        analyzer::position_of_text(bound, target)
    }

    /// Parse cache statistics, when caching is enabled.
    pub fn cache_stats(&self) -> Option<&CacheStats> {
        self.cache.as_ref().map(ParseCache::stats)
    }
}

impl std::fmt::Debug for RewriteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewriteEngine")
            .field("entities", &self.schema.entity_names())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}
