//! Attribute definitions for entities.

use super::types::ScalarType;
use serde::{Deserialize, Serialize};

/// What an attribute holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    /// A scalar value.
    Scalar(ScalarType),
    /// A reference to another entity, by entity name.
    Reference(String),
}

/// Whether an attribute holds one value or many.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    #[default]
    Single,
    Collection,
}

/// An attribute definition within an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDef {
    /// Attribute name.
    pub name: String,
    /// Scalar type or referenced entity.
    pub kind: AttributeKind,
    /// Single value or collection.
    #[serde(default)]
    pub cardinality: Cardinality,
    /// Whether the attribute may be null.
    #[serde(default)]
    pub nullable: bool,
}

impl AttributeDef {
    /// A required scalar attribute.
    pub fn scalar(name: impl Into<String>, ty: ScalarType) -> Self {
        Self {
            name: name.into(),
            kind: AttributeKind::Scalar(ty),
            cardinality: Cardinality::Single,
            nullable: false,
        }
    }

    /// A single-valued reference to `entity`.
    pub fn reference(name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: AttributeKind::Reference(entity.into()),
            cardinality: Cardinality::Single,
            nullable: false,
        }
    }

    /// A collection-valued reference to `entity`.
    pub fn collection(name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: AttributeKind::Reference(entity.into()),
            cardinality: Cardinality::Collection,
            nullable: false,
        }
    }

    /// Mark the attribute nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Name of the target type: the scalar type name or the referenced entity.
    pub fn target(&self) -> &str {
        match &self.kind {
            AttributeKind::Scalar(ty) => ty.name(),
            AttributeKind::Reference(entity) => entity,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, AttributeKind::Reference(_))
    }

    pub fn is_collection(&self) -> bool {
        self.cardinality == Cardinality::Collection
    }

    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self.kind {
            AttributeKind::Scalar(ty) => Some(ty),
            AttributeKind::Reference(_) => None,
        }
    }
}
