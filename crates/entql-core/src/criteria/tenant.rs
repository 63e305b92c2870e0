//! Multi-tenant scoping.

use super::{Contribution, Criterion, CriterionContext};
use crate::catalog::EntityDef;
use crate::error::RewriteResult;
use entql_lang::{Expr, Predicate};

/// Restricts tenant-owned entities to the context's tenant.
///
/// Contributes `(:p = '<sentinel>' or <alias>.<tenantAttr> = :p)` where `:p`
/// is bound to the context tenant, or to the sentinel when there is none.
/// The sentinel branch admits every row for system and unauthenticated
/// callers.
#[derive(Debug, Clone)]
pub struct TenantCriterion {
    name: String,
    parameter: String,
}

impl TenantCriterion {
    pub fn new() -> Self {
        Self {
            name: "tenant".to_string(),
            parameter: "tenantId".to_string(),
        }
    }

    /// Override the local parameter name (before prefixing).
    pub fn with_parameter(mut self, local: impl Into<String>) -> Self {
        self.parameter = local.into();
        self
    }
}

impl Default for TenantCriterion {
    fn default() -> Self {
        Self::new()
    }
}

impl Criterion for TenantCriterion {
    fn name(&self) -> &str {
        &self.name
    }

    fn applies_to(&self, entity: &EntityDef) -> bool {
        entity.tenant_attribute().is_some()
    }

    fn contribute(&self, ctx: &CriterionContext<'_>) -> RewriteResult<Option<Contribution>> {
        let Some(attribute) = ctx.entity().tenant_attribute() else {
            return Ok(None);
        };
        let sentinel = ctx.schema().no_value_sentinel();
        let param = ctx.parameter(&self.parameter);
        let tenant = ctx.security().tenant_or(sentinel).to_string();

        let predicate = Predicate::or(vec![
            Predicate::eq(Expr::param(&param), Expr::string(sentinel)),
            Predicate::eq(ctx.attribute(attribute), Expr::param(&param)),
        ]);
        Ok(Some(Contribution::new(predicate).with_parameter(param, tenant)))
    }
}
