//! Select-list position lookups.
//!
//! Callers that filter or sort on a select-list column ask which item
//! projects a given attribute path and whether that item is an aggregate.
//! Aggregate columns cannot be constrained in `where`.

use crate::binder::BoundQuery;
use crate::error::{RewriteError, RewriteResult};
use entql_lang::{parse_path, Expr, JoinTarget, PathExpr, Query};
use std::collections::HashMap;

/// Where a path is projected in the select list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpressionPosition {
    /// Zero-based select item index.
    pub index: usize,
    pub is_aggregate: bool,
}

/// Position of the select item projecting `target`, if any.
///
/// Paths through path-joined aliases are compared by the navigation they
/// denote, so `select c.name from Order o join o.customer c` matches the
/// target `o.customer.name`. Only bare paths and aggregates over a path
/// match; scalar function calls never do.
pub fn position_of(
    bound: &BoundQuery,
    target: &PathExpr,
) -> RewriteResult<Option<ExpressionPosition>> {
    if bound.range(target.alias()).is_none() {
        return Err(RewriteError::UnresolvedPath {
            alias: target.alias().to_string(),
            path: target.attribute_path(),
            reason: format!("alias '{}' is not declared", target.alias()),
            span: target.alias.span,
        });
    }

    let query = bound.query();
    let joins = path_joins(query);
    let wanted = canonical(target, &joins);

    let position = query
        .select
        .iter()
        .enumerate()
        .find_map(|(index, item)| {
            let (path, is_aggregate) = match &item.expr {
                Expr::Path(path) => (path, false),
                Expr::Aggregate(call) => (call.argument.as_path()?, true),
                _ => return None,
            };
            (canonical(path, &joins) == wanted).then_some(ExpressionPosition {
                index,
                is_aggregate,
            })
        });
    Ok(position)
}

/// [`position_of`] for a target written as text, e.g. `"e.id"`.
pub fn position_of_text(
    bound: &BoundQuery,
    target: &str,
) -> RewriteResult<Option<ExpressionPosition>> {
    let path = parse_path(target)?;
    position_of(bound, &path)
}

/// Path-joined aliases of the top level, mapped to the path they join.
fn path_joins(query: &Query) -> HashMap<&str, &PathExpr> {
    query
        .from
        .joins
        .iter()
        .filter_map(|join| match &join.target {
            JoinTarget::Path(path) => Some((join.alias.value.as_str(), path)),
            JoinTarget::Entity(_) => None,
        })
        .collect()
}

/// Root alias and full attribute chain of `path`.
fn canonical(path: &PathExpr, joins: &HashMap<&str, &PathExpr>) -> (String, Vec<String>) {
    let tail: Vec<String> = path.attribute_names().into_iter().map(str::to_string).collect();
    match joins.get(path.alias()) {
        // join paths only reference earlier aliases, so this terminates
        Some(joined) if joined.alias() != path.alias() => {
            let (root, mut chain) = canonical(joined, joins);
            chain.extend(tail);
            (root, chain)
        }
        _ => (path.alias().to_string(), tail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::Binder;
    use crate::catalog::{AttributeDef, EntityDef, SchemaBundle, ScalarType};
    use crate::params::ParameterMap;
    use entql_lang::parse;
    use std::sync::Arc;

    fn bind(source: &str) -> BoundQuery {
        let schema = SchemaBundle::from_entities([
            EntityDef::new("OrderLine", "id")
                .with_attribute(AttributeDef::scalar("id", ScalarType::Int64))
                .with_attribute(AttributeDef::scalar("quantity", ScalarType::Int32))
                .with_attribute(AttributeDef::reference("product", "Product")),
            EntityDef::new("Product", "id")
                .with_attribute(AttributeDef::scalar("id", ScalarType::Int64))
                .with_attribute(AttributeDef::scalar("name", ScalarType::String)),
        ])
        .unwrap();
        Binder::new(&schema)
            .bind(Arc::new(parse(source).unwrap()), ParameterMap::new())
            .unwrap()
    }

    #[test]
    fn test_aggregate_item() {
        let bound = bind("select count(e.id) from OrderLine e");
        assert_eq!(
            position_of_text(&bound, "e.id").unwrap(),
            Some(ExpressionPosition {
                index: 0,
                is_aggregate: true
            })
        );
    }

    #[test]
    fn test_plain_items_and_misses() {
        let bound = bind("select e.quantity, e.product.name, upper(e.product.name) from OrderLine e");
        assert_eq!(
            position_of_text(&bound, "e.product.name").unwrap(),
            Some(ExpressionPosition {
                index: 1,
                is_aggregate: false
            })
        );
        assert_eq!(position_of_text(&bound, "e.id").unwrap(), None);
    }

    #[test]
    fn test_join_aliases_are_expanded() {
        let bound = bind("select p.name, sum(e.quantity) from OrderLine e join e.product p group by p.name");
        assert_eq!(
            position_of_text(&bound, "e.product.name").unwrap().map(|p| p.index),
            Some(0)
        );
        assert_eq!(
            position_of_text(&bound, "e.quantity").unwrap(),
            Some(ExpressionPosition {
                index: 1,
                is_aggregate: true
            })
        );
    }

    #[test]
    fn test_unknown_alias() {
        let bound = bind("select e from OrderLine e");
        assert!(matches!(
            position_of_text(&bound, "x.id"),
            Err(RewriteError::UnresolvedPath { ref alias, .. }) if alias == "x"
        ));
        assert!(matches!(position_of_text(&bound, "e."), Err(RewriteError::Lang(_))));
    }
}
