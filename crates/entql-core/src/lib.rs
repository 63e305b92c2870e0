//! Query rewriting for ENTQL.
//!
//! This crate turns caller-written entity queries into queries that carry
//! the tenant, soft-delete and row-level constraints of the caller's
//! security context:
//!
//! - [`catalog`]: the entity schema queries are bound against
//! - [`binder`]: alias and attribute path resolution
//! - [`criteria`]: pluggable predicate contributors and their registry
//! - [`transform`]: injection of criterion fragments
//! - [`serializer`]: final text plus ordered parameters
//! - [`analyzer`]: select-list position lookups
//! - [`cache`]: concurrent parse cache
//! - [`engine`]: the pipeline entry point
//!
//! # Example
//!
//! ```rust
//! use entql_core::catalog::{AttributeDef, EntityDef, SchemaBundle, ScalarType};
//! use entql_core::criteria::{CriterionRegistry, TenantCriterion};
//! use entql_core::{EngineConfig, ParameterMap, RewriteEngine, SecurityContext};
//! use std::sync::Arc;
//!
//! let schema = SchemaBundle::from_entities([EntityDef::new("Customer", "id")
//!     .with_attribute(AttributeDef::scalar("id", ScalarType::Uuid))
//!     .with_attribute(AttributeDef::scalar("name", ScalarType::String))
//!     .with_attribute(AttributeDef::scalar("tenantId", ScalarType::String))
//!     .with_tenant("tenantId")])
//! .unwrap();
//! let registry = CriterionRegistry::builder()
//!     .register(TenantCriterion::new())
//!     .build()
//!     .unwrap();
//! let engine = RewriteEngine::new(Arc::new(schema), Arc::new(registry), EngineConfig::default())
//!     .unwrap();
//!
//! let out = engine
//!     .rewrite(
//!         "select e from Customer e where e.name = :name",
//!         ParameterMap::new().with("name", "Alice"),
//!         &SecurityContext::new("alice").with_tenant("acme"),
//!     )
//!     .unwrap();
//! assert_eq!(
//!     out.text,
//!     "select e from Customer e where (e.name = :name) and \
//!      (:criterion_tenantId = 'NO_TENANT' or e.tenantId = :criterion_tenantId)"
//! );
//! ```

pub mod analyzer;
pub mod binder;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod criteria;
pub mod engine;
pub mod error;
pub mod params;
pub mod security;
pub mod serializer;
pub mod transform;
pub mod value;

pub use analyzer::ExpressionPosition;
pub use binder::{Binder, BoundQuery, RangeBinding, RangeKind};
pub use cache::{CacheStats, ParseCache};
pub use catalog::{EntitySchema, SchemaBundle};
pub use config::EngineConfig;
pub use criteria::{Criterion, CriterionContext, CriterionRegistry};
pub use engine::{RewriteEngine, RewrittenQuery};
pub use error::{RewriteError, RewriteResult};
pub use params::{ParameterBinding, ParameterMap, ParameterOrigin};
pub use security::SecurityContext;
pub use serializer::SerializedQuery;
pub use transform::{TransformOptions, Transformer};
pub use value::Value;
