//! Schema lookup and reference-path resolution.

use super::{AttributeDef, AttributeKind, EntityDef, ScalarType};
use crate::error::{RewriteError, RewriteResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Tenant value used when the security context carries no tenant.
pub const NO_VALUE_SENTINEL: &str = "NO_TENANT";

/// Why a path failed to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathResolutionError {
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("entity '{entity}' has no attribute '{attribute}'")]
    UnknownAttribute { entity: String, attribute: String },

    #[error("'{entity}.{attribute}' is a scalar and cannot be navigated further")]
    ScalarNotTraversable { entity: String, attribute: String },

    #[error("'{entity}.{attribute}' is collection-valued; join it to navigate further")]
    CollectionNotTraversable { entity: String, attribute: String },
}

/// Type at the end of a resolved path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathType {
    /// An entity instance, or a collection of them.
    Entity { name: String, collection: bool },
    /// A scalar value.
    Scalar(ScalarType),
}

/// The attribute chain a path navigates through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Entity the path starts from.
    pub root_entity: String,
    /// One descriptor per segment, in order.
    pub attributes: Vec<AttributeDef>,
    pub terminal: PathType,
}

impl ResolvedPath {
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self.terminal {
            PathType::Scalar(ty) => Some(ty),
            PathType::Entity { .. } => None,
        }
    }

    /// Entity reached by the path, if it ends on a reference.
    pub fn entity(&self) -> Option<&str> {
        match &self.terminal {
            PathType::Entity { name, .. } => Some(name),
            PathType::Scalar(_) => None,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.terminal, PathType::Entity { collection: true, .. })
    }
}

/// Read-only catalog of entity types.
///
/// Implementations are built once at startup and shared across threads.
pub trait EntitySchema: Send + Sync {
    /// Look up an entity by name.
    fn entity(&self, name: &str) -> Option<&EntityDef>;

    /// All entity names.
    fn entity_names(&self) -> Vec<&str>;

    /// Value that stands for "no tenant" in unauthenticated or system contexts.
    fn no_value_sentinel(&self) -> &str {
        NO_VALUE_SENTINEL
    }

    /// Resolve `segments` starting from `entity`.
    ///
    /// Every segment except the last must be a single-valued reference.
    fn resolve_path(
        &self,
        entity: &str,
        segments: &[&str],
    ) -> Result<ResolvedPath, PathResolutionError> {
        let root = self
            .entity(entity)
            .ok_or_else(|| PathResolutionError::UnknownEntity(entity.to_string()))?;

        let mut owner = root;
        let mut attributes = Vec::with_capacity(segments.len());
        let mut terminal = PathType::Entity {
            name: root.name.clone(),
            collection: false,
        };

        for (i, segment) in segments.iter().enumerate() {
            let attr = owner.attribute(segment).ok_or_else(|| {
                PathResolutionError::UnknownAttribute {
                    entity: owner.name.clone(),
                    attribute: segment.to_string(),
                }
            })?;
            let last = i + 1 == segments.len();

            match &attr.kind {
                AttributeKind::Scalar(ty) => {
                    if !last {
                        return Err(PathResolutionError::ScalarNotTraversable {
                            entity: owner.name.clone(),
                            attribute: attr.name.clone(),
                        });
                    }
                    terminal = PathType::Scalar(*ty);
                }
                AttributeKind::Reference(target) => {
                    if !last && attr.is_collection() {
                        return Err(PathResolutionError::CollectionNotTraversable {
                            entity: owner.name.clone(),
                            attribute: attr.name.clone(),
                        });
                    }
                    let target_def = self
                        .entity(target)
                        .ok_or_else(|| PathResolutionError::UnknownEntity(target.clone()))?;
                    terminal = PathType::Entity {
                        name: target.clone(),
                        collection: attr.is_collection(),
                    };
                    owner = target_def;
                }
            }
            attributes.push(attr.clone());
        }

        Ok(ResolvedPath {
            root_entity: root.name.clone(),
            attributes,
            terminal,
        })
    }
}

/// In-memory schema, loadable from JSON.
#[derive(Debug, Clone)]
pub struct SchemaBundle {
    entities: BTreeMap<String, EntityDef>,
    no_value_sentinel: String,
}

#[derive(Deserialize)]
struct SchemaFile {
    entities: Vec<EntityDef>,
    #[serde(default)]
    no_value_sentinel: Option<String>,
}

impl SchemaBundle {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            no_value_sentinel: NO_VALUE_SENTINEL.to_string(),
        }
    }

    /// Add an entity, replacing any previous one with the same name.
    pub fn with_entity(mut self, entity: EntityDef) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    pub fn with_no_value_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.no_value_sentinel = sentinel.into();
        self
    }

    /// Build a validated schema; duplicate entity names are rejected.
    pub fn from_entities(entities: impl IntoIterator<Item = EntityDef>) -> RewriteResult<Self> {
        let mut schema = Self::new();
        for entity in entities {
            if schema.entities.contains_key(&entity.name) {
                return Err(RewriteError::config(format!(
                    "entity '{}' is defined more than once",
                    entity.name
                )));
            }
            schema = schema.with_entity(entity);
        }
        schema.validate()?;
        Ok(schema)
    }

    /// Load and validate a schema from its JSON form.
    ///
    /// ```json
    /// { "no_value_sentinel": "NO_TENANT",
    ///   "entities": [ { "name": "Customer", "identity_attribute": "id", "attributes": [...],
    ///                   "lifecycle": { "tenant_attribute": "tenantId" } } ] }
    /// ```
    pub fn from_json(json: &str) -> RewriteResult<Self> {
        let file: SchemaFile = serde_json::from_str(json)
            .map_err(|e| RewriteError::config(format!("invalid schema JSON: {}", e)))?;
        let mut schema = Self::from_entities(file.entities)?;
        if let Some(sentinel) = file.no_value_sentinel {
            schema.no_value_sentinel = sentinel;
        }
        Ok(schema)
    }

    /// Check references and lifecycle attributes.
    pub fn validate(&self) -> RewriteResult<()> {
        for entity in self.entities.values() {
            if entity.identity().is_none() {
                return Err(RewriteError::config(format!(
                    "entity '{}' has no identity attribute '{}'",
                    entity.name, entity.identity_attribute
                )));
            }

            for attr in &entity.attributes {
                if let AttributeKind::Reference(target) = &attr.kind {
                    if !self.entities.contains_key(target) {
                        return Err(RewriteError::config(format!(
                            "attribute '{}.{}' references unknown entity '{}'",
                            entity.name, attr.name, target
                        )));
                    }
                }
            }

            if let Some(name) = entity.tenant_attribute() {
                match entity.attribute(name) {
                    Some(attr) if attr.scalar_type().is_some() && !attr.is_collection() => {}
                    _ => {
                        return Err(RewriteError::config(format!(
                            "tenant attribute '{}' of entity '{}' must be a single scalar attribute",
                            name, entity.name
                        )))
                    }
                }
            }

            if let Some(name) = entity.soft_delete_attribute() {
                match entity.attribute(name) {
                    Some(attr) if attr.nullable && attr.scalar_type().is_some() => {}
                    _ => {
                        return Err(RewriteError::config(format!(
                            "soft-delete attribute '{}' of entity '{}' must be a nullable scalar attribute",
                            name, entity.name
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl Default for SchemaBundle {
    fn default() -> Self {
        Self::new()
    }
}

impl EntitySchema for SchemaBundle {
    fn entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.get(name)
    }

    fn entity_names(&self) -> Vec<&str> {
        self.entities.keys().map(|s| s.as_str()).collect()
    }

    fn no_value_sentinel(&self) -> &str {
        &self.no_value_sentinel
    }
}
