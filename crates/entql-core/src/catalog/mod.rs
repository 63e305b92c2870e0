//! Entity schema for binding queries.
//!
//! The schema maps entity-type names to attribute descriptors and resolves
//! dotted reference paths. It is built once at startup and read-only afterwards.

mod attribute;
mod entity;
mod schema;
mod types;

pub use attribute::{AttributeDef, AttributeKind, Cardinality};
pub use entity::{EntityDef, LifecycleRules};
pub use schema::{EntitySchema, PathResolutionError, PathType, ResolvedPath, SchemaBundle, NO_VALUE_SENTINEL};
pub use types::ScalarType;
