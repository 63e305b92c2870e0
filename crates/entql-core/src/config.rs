//! Engine configuration.

use crate::error::{RewriteError, RewriteResult};
use crate::transform::TransformOptions;
use entql_lang::DEFAULT_MAX_SUBQUERY_DEPTH;
use serde::Deserialize;

/// Default number of parsed queries kept in the parse cache.
pub const DEFAULT_PARSE_CACHE_CAPACITY: usize = 1024;

/// Default prefix of criterion parameter names.
pub const DEFAULT_CRITERION_PARAMETER_PREFIX: &str = "criterion_";

/// Rewrite engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum cached parse trees. None disables the parse cache.
    pub parse_cache_capacity: Option<usize>,

    /// Prefix namespacing every criterion parameter.
    pub criterion_parameter_prefix: String,

    /// Subquery nesting accepted by the parser.
    pub max_subquery_depth: usize,

    /// Apply criteria to joined ranges.
    pub apply_to_joins: bool,

    /// Apply criteria to ranges of caller-written subqueries.
    pub apply_to_subqueries: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parse_cache_capacity: Some(DEFAULT_PARSE_CACHE_CAPACITY),
            criterion_parameter_prefix: DEFAULT_CRITERION_PARAMETER_PREFIX.to_string(),
            max_subquery_depth: DEFAULT_MAX_SUBQUERY_DEPTH,
            apply_to_joins: true,
            apply_to_subqueries: true,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> RewriteResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RewriteError::config(format!("invalid engine configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the parse cache capacity.
    pub fn with_parse_cache_capacity(mut self, capacity: usize) -> Self {
        self.parse_cache_capacity = Some(capacity);
        self
    }

    /// Disable the parse cache.
    pub fn without_parse_cache(mut self) -> Self {
        self.parse_cache_capacity = None;
        self
    }

    /// Set the criterion parameter prefix.
    pub fn with_criterion_parameter_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.criterion_parameter_prefix = prefix.into();
        self
    }

    pub fn with_max_subquery_depth(mut self, depth: usize) -> Self {
        self.max_subquery_depth = depth;
        self
    }

    pub fn with_apply_to_joins(mut self, enabled: bool) -> Self {
        self.apply_to_joins = enabled;
        self
    }

    pub fn with_apply_to_subqueries(mut self, enabled: bool) -> Self {
        self.apply_to_subqueries = enabled;
        self
    }

    /// Check that the prefix yields valid parameter names.
    pub fn validate(&self) -> RewriteResult<()> {
        let prefix = &self.criterion_parameter_prefix;
        let valid = prefix
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(RewriteError::config(format!(
                "criterion parameter prefix '{}' is not a valid identifier",
                prefix
            )));
        }
        if self.parse_cache_capacity == Some(0) {
            return Err(RewriteError::config(
                "parse cache capacity must be positive; use null to disable caching",
            ));
        }
        Ok(())
    }

    pub(crate) fn transform_options(&self) -> TransformOptions {
        TransformOptions {
            parameter_prefix: self.criterion_parameter_prefix.clone(),
            apply_to_joins: self.apply_to_joins,
            apply_to_subqueries: self.apply_to_subqueries,
        }
    }
}
