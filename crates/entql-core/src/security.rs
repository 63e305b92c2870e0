//! Security context handed to criteria.
//!
//! The context carries the identity, tenant and attributes that criterion
//! contribution functions read when building their predicates.

use crate::value::Value;
use std::collections::HashMap;

/// Per-call security and tenancy information.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityContext {
    /// Identity of the caller.
    pub principal: String,
    /// Current tenant; `None` means the schema's no-value sentinel applies.
    pub tenant: Option<String>,
    /// Attributes for row-level policies (e.g. user_id, region, role).
    pub attributes: HashMap<String, Value>,
    /// Admin contexts bypass row-level policies.
    pub admin: bool,
}

impl SecurityContext {
    /// Create a context for `principal` with no tenant.
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            tenant: None,
            attributes: HashMap::new(),
            admin: false,
        }
    }

    /// Context used by the platform itself.
    pub fn system() -> Self {
        Self::new("system").as_admin()
    }

    /// Create an anonymous context with no tenant and no attributes.
    pub fn anonymous() -> Self {
        Self::new("anonymous")
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Set an attribute for row-level policy evaluation.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn as_admin(mut self) -> Self {
        self.admin = true;
        self
    }

    /// Get an attribute value for row-level policy evaluation.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn is_admin(&self) -> bool {
        self.admin
    }

    pub fn is_anonymous(&self) -> bool {
        self.principal == "anonymous"
    }

    /// Tenant identifier, or `sentinel` when the context has none.
    pub fn tenant_or<'a>(&'a self, sentinel: &'a str) -> &'a str {
        self.tenant.as_deref().unwrap_or(sentinel)
    }
}

impl Default for SecurityContext {
    fn default() -> Self {
        Self::anonymous()
    }
}
