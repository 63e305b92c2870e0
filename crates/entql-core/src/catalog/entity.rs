//! Entity definitions.

use super::attribute::AttributeDef;
use serde::{Deserialize, Serialize};

/// An entity type and its attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDef {
    /// Entity name (unique within schema).
    pub name: String,
    /// Name of the identity attribute.
    pub identity_attribute: String,
    /// Attribute definitions.
    #[serde(default)]
    pub attributes: Vec<AttributeDef>,
    /// Lifecycle rules.
    #[serde(default)]
    pub lifecycle: LifecycleRules,
}

/// Lifecycle rules for an entity.
///
/// These drive the built-in tenant and soft-delete criteria.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LifecycleRules {
    /// Attribute holding the deletion marker; null means live.
    #[serde(default)]
    pub soft_delete_attribute: Option<String>,
    /// Attribute holding the owning tenant identifier.
    #[serde(default)]
    pub tenant_attribute: Option<String>,
}

impl EntityDef {
    /// Create a new entity definition.
    pub fn new(name: impl Into<String>, identity_attribute: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity_attribute: identity_attribute.into(),
            attributes: Vec::new(),
            lifecycle: LifecycleRules::default(),
        }
    }

    /// Add an attribute to the entity.
    pub fn with_attribute(mut self, attribute: AttributeDef) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Add multiple attributes.
    pub fn with_attributes(mut self, attributes: impl IntoIterator<Item = AttributeDef>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    /// Filter deleted rows through `attribute`.
    pub fn with_soft_delete(mut self, attribute: impl Into<String>) -> Self {
        self.lifecycle.soft_delete_attribute = Some(attribute.into());
        self
    }

    /// Scope rows to a tenant through `attribute`.
    pub fn with_tenant(mut self, attribute: impl Into<String>) -> Self {
        self.lifecycle.tenant_attribute = Some(attribute.into());
        self
    }

    /// Get an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn identity(&self) -> Option<&AttributeDef> {
        self.attribute(&self.identity_attribute)
    }

    pub fn soft_delete_attribute(&self) -> Option<&str> {
        self.lifecycle.soft_delete_attribute.as_deref()
    }

    pub fn tenant_attribute(&self) -> Option<&str> {
        self.lifecycle.tenant_attribute.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ScalarType;

    #[test]
    fn test_entity_builder() {
        let entity = EntityDef::new("Customer", "id")
            .with_attribute(AttributeDef::scalar("id", ScalarType::Uuid))
            .with_attribute(AttributeDef::scalar("name", ScalarType::String))
            .with_attribute(AttributeDef::scalar("deletedAt", ScalarType::Timestamp).nullable())
            .with_soft_delete("deletedAt")
            .with_tenant("tenantId");

        assert_eq!(entity.name, "Customer");
        assert_eq!(entity.attributes.len(), 3);
        assert_eq!(entity.identity().map(|a| a.name.as_str()), Some("id"));
        assert_eq!(entity.soft_delete_attribute(), Some("deletedAt"));
        assert_eq!(entity.tenant_attribute(), Some("tenantId"));
        assert!(entity.attribute("ssn").is_none());
    }

    #[test]
    fn test_lifecycle_defaults_from_json() {
        let entity: EntityDef =
            serde_json::from_str(r#"{"name": "Tag", "identity_attribute": "id"}"#).unwrap();
        assert!(entity.attributes.is_empty());
        assert_eq!(entity.lifecycle, LifecycleRules::default());
    }
}
