//! Pluggable predicate contributors.
//!
//! A criterion decides whether it applies to an entity type and, for each
//! range of such a type, contributes a predicate fragment written against
//! the range's alias plus the parameter values the fragment references.
//! Criteria are registered once at startup and are read-only afterwards.

mod exists;
mod row_level;
mod soft_delete;
mod tenant;

pub use exists::ExistsCriterion;
pub use row_level::{RowFilter, RowLevelCriterion};
pub use soft_delete::SoftDeleteCriterion;
pub use tenant::TenantCriterion;

use crate::catalog::{EntityDef, EntitySchema};
use crate::error::{RewriteError, RewriteResult};
use crate::security::SecurityContext;
use crate::value::Value;
use entql_lang::{Expr, Predicate};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// What a criterion adds for one range.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub predicate: Predicate,
    /// Values for the parameter markers the predicate introduces.
    pub parameters: Vec<(String, Value)>,
}

impl Contribution {
    pub fn new(predicate: Predicate) -> Self {
        Self {
            predicate,
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }
}

/// Everything a criterion may look at while contributing.
pub struct CriterionContext<'a> {
    alias: &'a str,
    entity: &'a EntityDef,
    schema: &'a dyn EntitySchema,
    security: &'a SecurityContext,
    parameter_prefix: &'a str,
}

impl<'a> CriterionContext<'a> {
    pub fn new(
        alias: &'a str,
        entity: &'a EntityDef,
        schema: &'a dyn EntitySchema,
        security: &'a SecurityContext,
        parameter_prefix: &'a str,
    ) -> Self {
        Self {
            alias,
            entity,
            schema,
            security,
            parameter_prefix,
        }
    }

    /// Alias of the range being constrained.
    pub fn alias(&self) -> &str {
        self.alias
    }

    pub fn entity(&self) -> &EntityDef {
        self.entity
    }

    pub fn schema(&self) -> &dyn EntitySchema {
        self.schema
    }

    pub fn security(&self) -> &SecurityContext {
        self.security
    }

    /// Namespaced parameter name, e.g. `tenantId` -> `criterion_tenantId`.
    pub fn parameter(&self, local: &str) -> String {
        format!("{}{}", self.parameter_prefix, local)
    }

    /// Path `<alias>.<attribute>` on the constrained range.
    pub fn attribute(&self, attribute: &str) -> Expr {
        Expr::path(self.alias, [attribute])
    }

    /// The constrained range itself, as a bare alias path.
    pub fn range(&self) -> Expr {
        Expr::path(self.alias, Vec::<String>::new())
    }
}

/// A named predicate contributor.
pub trait Criterion: Send + Sync {
    /// Unique name within a registry.
    fn name(&self) -> &str;

    /// Whether ranges of `entity` must be constrained.
    fn applies_to(&self, entity: &EntityDef) -> bool;

    /// Build the fragment for one range; `None` contributes nothing.
    fn contribute(&self, ctx: &CriterionContext<'_>) -> RewriteResult<Option<Contribution>>;
}

type ApplicabilityFn = dyn Fn(&EntityDef) -> bool + Send + Sync;
type ContributionFn = dyn Fn(&CriterionContext<'_>) -> RewriteResult<Option<Contribution>> + Send + Sync;

/// A criterion built from closures.
pub struct FnCriterion {
    name: String,
    applies: Box<ApplicabilityFn>,
    contribute: Box<ContributionFn>,
}

impl FnCriterion {
    pub fn new<A, C>(name: impl Into<String>, applies: A, contribute: C) -> Self
    where
        A: Fn(&EntityDef) -> bool + Send + Sync + 'static,
        C: Fn(&CriterionContext<'_>) -> RewriteResult<Option<Contribution>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            applies: Box::new(applies),
            contribute: Box::new(contribute),
        }
    }
}

impl Criterion for FnCriterion {
    fn name(&self) -> &str {
        &self.name
    }

    fn applies_to(&self, entity: &EntityDef) -> bool {
        (self.applies)(entity)
    }

    fn contribute(&self, ctx: &CriterionContext<'_>) -> RewriteResult<Option<Contribution>> {
        (self.contribute)(ctx)
    }
}

impl fmt::Debug for FnCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCriterion").field("name", &self.name).finish()
    }
}

/// Ordered, immutable set of criteria.
#[derive(Clone, Default)]
pub struct CriterionRegistry {
    criteria: Vec<Arc<dyn Criterion>>,
}

impl CriterionRegistry {
    pub fn builder() -> CriterionRegistryBuilder {
        CriterionRegistryBuilder::default()
    }

    /// A registry with no criteria.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Criteria in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Criterion>> {
        self.criteria.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Criterion>> {
        self.criteria.iter().find(|c| c.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.criteria.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }
}

impl fmt::Debug for CriterionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriterionRegistry")
            .field("criteria", &self.names())
            .finish()
    }
}

/// Collects criteria before freezing them into a [`CriterionRegistry`].
#[derive(Default)]
pub struct CriterionRegistryBuilder {
    criteria: Vec<Arc<dyn Criterion>>,
}

impl CriterionRegistryBuilder {
    pub fn register(mut self, criterion: impl Criterion + 'static) -> Self {
        self.criteria.push(Arc::new(criterion));
        self
    }

    pub fn register_arc(mut self, criterion: Arc<dyn Criterion>) -> Self {
        self.criteria.push(criterion);
        self
    }

    /// Freeze the registry; duplicate names are rejected.
    pub fn build(self) -> RewriteResult<CriterionRegistry> {
        let mut seen = HashSet::new();
        for criterion in &self.criteria {
            if !seen.insert(criterion.name().to_string()) {
                return Err(RewriteError::config(format!(
                    "criterion '{}' is registered more than once",
                    criterion.name()
                )));
            }
        }
        Ok(CriterionRegistry {
            criteria: self.criteria,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AttributeDef, SchemaBundle, ScalarType};

    fn customer() -> EntityDef {
        EntityDef::new("Customer", "id")
            .with_attribute(AttributeDef::scalar("id", ScalarType::Uuid))
            .with_attribute(AttributeDef::scalar("active", ScalarType::Bool))
    }

    #[test]
    fn test_fn_criterion() {
        let active = FnCriterion::new(
            "active-only",
            |e: &EntityDef| e.attribute("active").is_some(),
            |ctx: &CriterionContext<'_>| {
                Ok(Some(Contribution::new(Predicate::eq(
                    ctx.attribute("active"),
                    Expr::param(ctx.parameter("active")),
                ))
                .with_parameter(ctx.parameter("active"), true)))
            },
        );

        let schema = SchemaBundle::from_entities([customer()]).unwrap();
        let entity = customer();
        let security = SecurityContext::anonymous();
        let ctx = CriterionContext::new("c", &entity, &schema, &security, "criterion_");

        assert!(active.applies_to(&entity));
        let contribution = active.contribute(&ctx).unwrap().unwrap();
        assert_eq!(contribution.predicate.to_string(), "c.active = :criterion_active");
        assert_eq!(
            contribution.parameters,
            vec![("criterion_active".to_string(), Value::Bool(true))]
        );
    }

    #[test]
    fn test_registry_rejects_duplicate_names() {
        let err = CriterionRegistry::builder()
            .register(SoftDeleteCriterion::new())
            .register(SoftDeleteCriterion::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, RewriteError::Config(_)));
    }

    #[test]
    fn test_registry_keeps_order() {
        let registry = CriterionRegistry::builder()
            .register(TenantCriterion::new())
            .register(SoftDeleteCriterion::new())
            .build()
            .unwrap();
        assert_eq!(registry.names(), vec!["tenant", "soft-delete"]);
        assert!(registry.get("tenant").is_some());
        assert!(CriterionRegistry::empty().is_empty());
    }
}
