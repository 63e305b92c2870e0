//! Row-level security policies.

use super::{Contribution, Criterion, CriterionContext};
use crate::catalog::EntityDef;
use crate::error::{RewriteError, RewriteResult};
use crate::value::Value;
use entql_lang::{Expr, InSource, Predicate, Spanned};
use serde::{Deserialize, Serialize};

/// Row filter that can reference security-context attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowFilter {
    /// Entity attribute equals a context attribute value.
    /// Example: `region = context.region`
    AttributeEq {
        attribute: String,
        context_attribute: String,
    },
    /// Entity attribute is one of the values in a context attribute.
    AttributeIn {
        attribute: String,
        context_attribute: String,
    },
    /// All conditions must be true.
    And(Vec<RowFilter>),
    /// At least one condition must be true.
    Or(Vec<RowFilter>),
}

impl RowFilter {
    pub fn attribute_eq(attribute: impl Into<String>, context_attribute: impl Into<String>) -> Self {
        RowFilter::AttributeEq {
            attribute: attribute.into(),
            context_attribute: context_attribute.into(),
        }
    }

    pub fn attribute_in(attribute: impl Into<String>, context_attribute: impl Into<String>) -> Self {
        RowFilter::AttributeIn {
            attribute: attribute.into(),
            context_attribute: context_attribute.into(),
        }
    }
}

/// Row-level security policy for one entity type.
///
/// Each context attribute the filter reads becomes a parameter named
/// `<prefix><policy>_<context attribute>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowLevelCriterion {
    /// Policy name (unique identifier).
    pub name: String,
    /// Target entity type.
    pub entity: String,
    pub filter: RowFilter,
    /// Context attribute that, when `true`, bypasses the policy.
    #[serde(default)]
    pub bypass_attribute: Option<String>,
}

impl RowLevelCriterion {
    pub fn new(name: impl Into<String>, entity: impl Into<String>, filter: RowFilter) -> Self {
        Self {
            name: name.into(),
            entity: entity.into(),
            filter,
            bypass_attribute: None,
        }
    }

    /// Set a bypass attribute.
    pub fn with_bypass(mut self, context_attribute: impl Into<String>) -> Self {
        self.bypass_attribute = Some(context_attribute.into());
        self
    }

    /// Check if the context can bypass this policy.
    fn can_bypass(&self, ctx: &CriterionContext<'_>) -> bool {
        let security = ctx.security();
        if security.is_admin() {
            return true;
        }
        match &self.bypass_attribute {
            Some(attr) => matches!(security.attribute(attr), Some(Value::Bool(true))),
            None => false,
        }
    }

    fn parameter_name(&self, ctx: &CriterionContext<'_>, context_attribute: &str) -> String {
        let local: String = format!("{}_{}", self.name, context_attribute)
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        ctx.parameter(&local)
    }

    fn context_value<'c>(
        &self,
        ctx: &'c CriterionContext<'_>,
        context_attribute: &str,
    ) -> RewriteResult<&'c Value> {
        ctx.security()
            .attribute(context_attribute)
            .ok_or_else(|| RewriteError::Criterion {
                criterion: self.name.clone(),
                message: format!("missing context attribute: {}", context_attribute),
            })
    }

    fn compile(
        &self,
        filter: &RowFilter,
        ctx: &CriterionContext<'_>,
        parameters: &mut Vec<(String, Value)>,
    ) -> RewriteResult<Predicate> {
        match filter {
            RowFilter::AttributeEq {
                attribute,
                context_attribute,
            } => {
                let value = self.context_value(ctx, context_attribute)?.clone();
                let param = self.parameter_name(ctx, context_attribute);
                push_unique(parameters, &param, value);
                Ok(Predicate::eq(ctx.attribute(attribute), Expr::param(param)))
            }
            RowFilter::AttributeIn {
                attribute,
                context_attribute,
            } => {
                let value = match self.context_value(ctx, context_attribute)? {
                    Value::List(items) => Value::List(items.clone()),
                    single => Value::List(vec![single.clone()]),
                };
                let param = self.parameter_name(ctx, context_attribute);
                push_unique(parameters, &param, value);
                Ok(Predicate::In {
                    expr: ctx.attribute(attribute),
                    source: InSource::Parameter(Spanned::synthetic(param)),
                    negated: false,
                })
            }
            RowFilter::And(filters) => Ok(Predicate::and(
                filters
                    .iter()
                    .map(|f| self.compile(f, ctx, parameters))
                    .collect::<RewriteResult<Vec<_>>>()?,
            )),
            RowFilter::Or(filters) => Ok(Predicate::or(
                filters
                    .iter()
                    .map(|f| self.compile(f, ctx, parameters))
                    .collect::<RewriteResult<Vec<_>>>()?,
            )),
        }
    }
}

fn push_unique(parameters: &mut Vec<(String, Value)>, name: &str, value: Value) {
    if !parameters.iter().any(|(n, _)| n == name) {
        parameters.push((name.to_string(), value));
    }
}

impl Criterion for RowLevelCriterion {
    fn name(&self) -> &str {
        &self.name
    }

    fn applies_to(&self, entity: &EntityDef) -> bool {
        entity.name == self.entity
    }

    fn contribute(&self, ctx: &CriterionContext<'_>) -> RewriteResult<Option<Contribution>> {
        if self.can_bypass(ctx) {
            return Ok(None);
        }
        let mut parameters = Vec::new();
        let predicate = self.compile(&self.filter, ctx, &mut parameters)?;
        Ok(Some(Contribution {
            predicate,
            parameters,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AttributeDef, SchemaBundle, ScalarType};
    use crate::security::SecurityContext;

    fn document() -> EntityDef {
        EntityDef::new("Document", "id")
            .with_attribute(AttributeDef::scalar("id", ScalarType::Uuid))
            .with_attribute(AttributeDef::scalar("region", ScalarType::String))
            .with_attribute(AttributeDef::scalar("ownerId", ScalarType::String))
    }

    fn contribute(
        policy: &RowLevelCriterion,
        security: &SecurityContext,
    ) -> RewriteResult<Option<Contribution>> {
        let entity = document();
        let schema = SchemaBundle::from_entities([entity.clone()]).unwrap();
        let ctx = CriterionContext::new("d", &entity, &schema, security, "criterion_");
        policy.contribute(&ctx)
    }

    #[test]
    fn test_attribute_eq_policy() {
        let policy = RowLevelCriterion::new(
            "region",
            "Document",
            RowFilter::attribute_eq("region", "region"),
        );
        let security = SecurityContext::new("bob").with_attribute("region", "EU");

        let contribution = contribute(&policy, &security).unwrap().unwrap();
        assert_eq!(
            contribution.predicate.to_string(),
            "d.region = :criterion_region_region"
        );
        assert_eq!(
            contribution.parameters,
            vec![("criterion_region_region".to_string(), Value::from("EU"))]
        );
    }

    #[test]
    fn test_combined_policy() {
        let policy = RowLevelCriterion::new(
            "doc-access",
            "Document",
            RowFilter::Or(vec![
                RowFilter::attribute_eq("ownerId", "user_id"),
                RowFilter::attribute_in("region", "regions"),
            ]),
        );
        let security = SecurityContext::new("bob")
            .with_attribute("user_id", "u-1")
            .with_attribute("regions", vec![Value::from("EU"), Value::from("US")]);

        let contribution = contribute(&policy, &security).unwrap().unwrap();
        assert_eq!(
            contribution.predicate.to_string(),
            "d.ownerId = :criterion_doc_access_user_id or d.region in :criterion_doc_access_regions"
        );
        assert_eq!(contribution.parameters.len(), 2);
    }

    #[test]
    fn test_admin_and_bypass_attribute() {
        let policy = RowLevelCriterion::new(
            "region",
            "Document",
            RowFilter::attribute_eq("region", "region"),
        )
        .with_bypass("auditor");

        assert!(contribute(&policy, &SecurityContext::system()).unwrap().is_none());

        let auditor = SecurityContext::new("carol").with_attribute("auditor", true);
        assert!(contribute(&policy, &auditor).unwrap().is_none());
    }

    #[test]
    fn test_missing_context_attribute() {
        let policy = RowLevelCriterion::new(
            "region",
            "Document",
            RowFilter::attribute_eq("region", "region"),
        );
        let err = contribute(&policy, &SecurityContext::new("dave")).unwrap_err();
        assert!(err.to_string().contains("missing context attribute: region"));
    }

    #[test]
    fn test_policy_from_json() {
        let policy: RowLevelCriterion = serde_json::from_str(
            r#"{"name": "own", "entity": "Document",
                "filter": {"attribute_eq": {"attribute": "ownerId", "context_attribute": "user_id"}}}"#,
        )
        .unwrap();
        assert_eq!(policy.filter, RowFilter::attribute_eq("ownerId", "user_id"));
        assert!(policy.bypass_attribute.is_none());
    }
}
