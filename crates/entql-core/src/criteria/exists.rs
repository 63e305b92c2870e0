//! Membership criteria expressed as correlated `exists` subqueries.

use super::{Contribution, Criterion, CriterionContext};
use crate::catalog::EntityDef;
use crate::error::{RewriteError, RewriteResult};
use crate::value::Value;
use entql_lang::{Expr, Predicate, Query};

/// Restricts a range to rows the caller is a member of.
///
/// For a range `d` of the target entity this contributes
///
/// ```text
/// exists (select m from Membership m where m.document = d and m.userId = :criterion_<name>_<attr>)
/// ```
///
/// where the member value comes from a security-context attribute.
#[derive(Debug, Clone)]
pub struct ExistsCriterion {
    name: String,
    target_entity: String,
    membership_entity: String,
    /// Reference attribute on the membership entity pointing at the target.
    reference_attribute: String,
    /// Membership attribute compared against the context value.
    member_attribute: String,
    context_attribute: String,
    preferred_alias: String,
}

impl ExistsCriterion {
    pub fn new(
        name: impl Into<String>,
        target_entity: impl Into<String>,
        membership_entity: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target_entity: target_entity.into(),
            membership_entity: membership_entity.into(),
            reference_attribute: "target".to_string(),
            member_attribute: "principal".to_string(),
            context_attribute: "principal".to_string(),
            preferred_alias: "m".to_string(),
        }
    }

    /// Membership attribute that references the constrained entity.
    pub fn with_reference(mut self, attribute: impl Into<String>) -> Self {
        self.reference_attribute = attribute.into();
        self
    }

    /// Membership attribute matched against `context_attribute`.
    pub fn with_member(
        mut self,
        attribute: impl Into<String>,
        context_attribute: impl Into<String>,
    ) -> Self {
        self.member_attribute = attribute.into();
        self.context_attribute = context_attribute.into();
        self
    }

    /// Alias the subquery's range is declared with, before uniquification.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.preferred_alias = alias.into();
        self
    }

    /// Subquery alias that cannot shadow the correlated range.
    fn subquery_alias(&self, outer: &str) -> String {
        if self.preferred_alias != outer {
            return self.preferred_alias.clone();
        }
        (1..)
            .map(|n| format!("{}{}", self.preferred_alias, n))
            .find(|candidate| candidate != outer)
            .unwrap_or_else(|| format!("{}_", self.preferred_alias))
    }
}

impl Criterion for ExistsCriterion {
    fn name(&self) -> &str {
        &self.name
    }

    fn applies_to(&self, entity: &EntityDef) -> bool {
        entity.name == self.target_entity
    }

    fn contribute(&self, ctx: &CriterionContext<'_>) -> RewriteResult<Option<Contribution>> {
        if ctx.security().is_admin() {
            return Ok(None);
        }
        let value = ctx
            .security()
            .attribute(&self.context_attribute)
            .cloned()
            .or_else(|| {
                (self.context_attribute == "principal")
                    .then(|| Value::from(ctx.security().principal.clone()))
            })
            .ok_or_else(|| RewriteError::Criterion {
                criterion: self.name.clone(),
                message: format!("missing context attribute: {}", self.context_attribute),
            })?;

        let alias = self.subquery_alias(ctx.alias());
        let param = ctx.parameter(&format!("{}_{}", self.name, self.context_attribute).replace(
            |c: char| !c.is_ascii_alphanumeric(),
            "_",
        ));
        let subquery = Query::select_from(self.membership_entity.clone(), alias.clone()).with_filter(
            Predicate::and(vec![
                Predicate::eq(
                    Expr::path(alias.clone(), [self.reference_attribute.as_str()]),
                    ctx.range(),
                ),
                Predicate::eq(
                    Expr::path(alias, [self.member_attribute.as_str()]),
                    Expr::param(param.clone()),
                ),
            ]),
        );

        Ok(Some(
            Contribution::new(Predicate::exists(subquery)).with_parameter(param, value),
        ))
    }
}
