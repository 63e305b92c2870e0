//! Soft-delete filtering.

use super::{Contribution, Criterion, CriterionContext};
use crate::catalog::EntityDef;
use crate::error::RewriteResult;
use entql_lang::Predicate;

/// Hides soft-deleted rows: `<alias>.<deletedAttr> is null`.
#[derive(Debug, Clone)]
pub struct SoftDeleteCriterion {
    name: String,
}

impl SoftDeleteCriterion {
    pub fn new() -> Self {
        Self {
            name: "soft-delete".to_string(),
        }
    }
}

impl Default for SoftDeleteCriterion {
    fn default() -> Self {
        Self::new()
    }
}

impl Criterion for SoftDeleteCriterion {
    fn name(&self) -> &str {
        &self.name
    }

    fn applies_to(&self, entity: &EntityDef) -> bool {
        entity.soft_delete_attribute().is_some()
    }

    fn contribute(&self, ctx: &CriterionContext<'_>) -> RewriteResult<Option<Contribution>> {
        Ok(ctx
            .entity()
            .soft_delete_attribute()
            .map(|attr| Contribution::new(Predicate::is_null(ctx.attribute(attr)))))
    }
}
