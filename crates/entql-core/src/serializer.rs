//! Rendering of bound models to query text plus parameters.

use crate::binder::BoundQuery;
use crate::error::{RewriteError, RewriteResult};
use crate::params::{ParameterMap, ParameterOrigin};

/// Final query text and the parameters it references.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedQuery {
    pub text: String,
    /// Caller parameters in their original order, then criterion parameters.
    pub parameters: ParameterMap,
}

/// Render `bound` to text.
///
/// Every parameter marker in the tree must have a value. Parameters nothing
/// references are dropped.
pub fn serialize(bound: &BoundQuery) -> RewriteResult<SerializedQuery> {
    let query = bound.query();
    let supplied = bound.parameters();

    let markers = query.parameters();
    if let Some(missing) = markers.iter().find(|m| !supplied.contains(&m.value)) {
        return Err(RewriteError::UnboundParameter {
            name: missing.value.clone(),
            span: missing.span,
        });
    }

    let referenced = |name: &str| markers.iter().any(|m| m.value == name);
    let mut parameters = ParameterMap::new();
    let caller_first = supplied
        .iter()
        .filter(|(_, b)| b.origin == ParameterOrigin::Caller)
        .chain(
            supplied
                .iter()
                .filter(|(_, b)| b.origin != ParameterOrigin::Caller),
        );
    for (name, binding) in caller_first {
        if referenced(name) {
            parameters.insert(name, binding.clone());
        }
    }

    Ok(SerializedQuery {
        text: query.to_string(),
        parameters,
    })
}
