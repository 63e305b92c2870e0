//! Criterion injection.
//!
//! The transformer asks every registered criterion whether it applies to
//! each range of a bound query and conjoins the contributed fragments into
//! a new tree. The input model is never modified; the output is bound again
//! so every injected path is validated against the schema.

use crate::binder::{Annotations, Binder, BoundQuery};
use crate::catalog::EntitySchema;
use crate::criteria::{Criterion, CriterionContext, CriterionRegistry};
use crate::error::{RewriteError, RewriteResult};
use crate::params::{ParameterBinding, ParameterMap, ParameterOrigin};
use crate::security::SecurityContext;
use crate::value::Value;
use entql_lang::{InSource, JoinKind, Predicate, Query};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Where criteria are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOptions {
    /// Prefix namespacing every criterion parameter.
    pub parameter_prefix: String,
    /// Constrain joined ranges, not only roots.
    pub apply_to_joins: bool,
    /// Constrain ranges of caller-written subqueries.
    pub apply_to_subqueries: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            parameter_prefix: "criterion_".to_string(),
            apply_to_joins: true,
            apply_to_subqueries: true,
        }
    }
}

/// Injects criterion fragments into bound queries.
pub struct Transformer<'a> {
    schema: &'a dyn EntitySchema,
    registry: &'a CriterionRegistry,
    options: TransformOptions,
}

impl<'a> Transformer<'a> {
    pub fn new(schema: &'a dyn EntitySchema, registry: &'a CriterionRegistry) -> Self {
        Self {
            schema,
            registry,
            options: TransformOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TransformOptions) -> Self {
        self.options = options;
        self
    }

    /// Apply every criterion not yet applied to `bound`.
    ///
    /// Returns a new model; a model that already carries every registered
    /// criterion comes back unchanged.
    pub fn transform(
        &self,
        bound: &BoundQuery,
        security: &SecurityContext,
    ) -> RewriteResult<BoundQuery> {
        let active: Vec<&Arc<dyn Criterion>> = self
            .registry
            .iter()
            .filter(|c| !bound.is_applied(c.name()))
            .collect();
        if active.is_empty() {
            return Ok(bound.clone());
        }

        let mut state = RewriteState {
            bound,
            security,
            active: &active,
            taken: bound.aliases().map(str::to_string).collect(),
            markers: bound
                .query()
                .parameters()
                .into_iter()
                .map(|p| p.value.clone())
                .collect(),
            parameters: bound.parameters().clone(),
            injected: bound
                .ranges()
                .iter()
                .filter_map(|r| Some((r.alias.clone(), r.injected_by.clone()?)))
                .collect(),
        };

        let query = self.rewrite_level(bound.query().clone(), &mut state)?;

        let mut applied = bound.applied_criteria().clone();
        applied.extend(active.iter().map(|c| c.name().to_string()));
        let annotations = Annotations {
            applied_criteria: applied,
            injected: state.injected,
        };
        Binder::new(self.schema).bind_annotated(Arc::new(query), state.parameters, annotations)
    }

    /// Constrain the ranges declared by one query level, then recurse into
    /// the caller-written subqueries of that level.
    fn rewrite_level(&self, query: Query, state: &mut RewriteState<'_>) -> RewriteResult<Query> {
        let mut query = query;

        let mut where_fragments =
            self.fragments(&query.from.root.alias.value, state)?;
        let mut on_fragments: Vec<Vec<Predicate>> = Vec::with_capacity(query.from.joins.len());
        for join in &query.from.joins {
            let fragments = if self.options.apply_to_joins {
                self.fragments(&join.alias.value, state)?
            } else {
                Vec::new()
            };
            match join.kind {
                JoinKind::Inner => {
                    where_fragments.extend(fragments);
                    on_fragments.push(Vec::new());
                }
                JoinKind::Left => on_fragments.push(fragments),
            }
        }

        if self.options.apply_to_subqueries {
            for join in &mut query.from.joins {
                if let Some(condition) = join.condition.take() {
                    join.condition = Some(self.rewrite_subqueries(condition, state)?);
                }
            }
            if let Some(filter) = query.filter.take() {
                query.filter = Some(self.rewrite_subqueries(filter, state)?);
            }
            if let Some(having) = query.having.take() {
                query.having = Some(self.rewrite_subqueries(having, state)?);
            }
        }

        for (join, fragments) in query.from.joins.iter_mut().zip(on_fragments) {
            join.condition = conjoin(join.condition.take(), fragments);
        }
        query.filter = conjoin(query.filter.take(), where_fragments);
        Ok(query)
    }

    fn rewrite_subqueries(
        &self,
        predicate: Predicate,
        state: &mut RewriteState<'_>,
    ) -> RewriteResult<Predicate> {
        map_subqueries(predicate, &mut |subquery| {
            if state.injected.contains_key(&subquery.from.root.alias.value) {
                Ok(subquery)
            } else {
                self.rewrite_level(subquery, state)
            }
        })
    }

    /// Fragments of every active criterion for the range declared as `alias`.
    fn fragments(
        &self,
        alias: &str,
        state: &mut RewriteState<'_>,
    ) -> RewriteResult<Vec<Predicate>> {
        let (bound, security, active) = (state.bound, state.security, state.active);
        let Some(range) = bound.range(alias) else {
            return Ok(Vec::new());
        };
        if range.injected_by.is_some() {
            return Ok(Vec::new());
        }
        let entity = self.schema.entity(&range.entity).ok_or_else(|| {
            RewriteError::config(format!("entity '{}' vanished from the schema", range.entity))
        })?;

        let mut out = Vec::new();
        for criterion in active.iter().copied() {
            if !criterion.applies_to(entity) {
                continue;
            }
            let ctx = CriterionContext::new(
                alias,
                entity,
                self.schema,
                security,
                &self.options.parameter_prefix,
            );
            let Some(contribution) = criterion.contribute(&ctx)? else {
                continue;
            };

            for (name, value) in contribution.parameters {
                state.claim(criterion.name(), name, value)?;
            }
            let predicate = map_subqueries(contribution.predicate, &mut |subquery| {
                state.uniquify(subquery, criterion.name())
            })?;

            tracing::debug!(
                criterion = criterion.name(),
                alias,
                entity = %entity.name,
                "applied criterion"
            );
            out.push(predicate);
        }
        Ok(out)
    }
}

/// Mutable bookkeeping for one transformation.
struct RewriteState<'t> {
    bound: &'t BoundQuery,
    security: &'t SecurityContext,
    active: &'t [&'t Arc<dyn Criterion>],
    /// Every alias declared anywhere in the tree being built.
    taken: HashSet<String>,
    /// Parameter markers written in the input text.
    markers: HashSet<String>,
    parameters: ParameterMap,
    /// Injected range alias -> criterion name.
    injected: HashMap<String, String>,
}

impl RewriteState<'_> {
    /// Reserve parameter `name` for `criterion`.
    fn claim(&mut self, criterion: &str, name: String, value: Value) -> RewriteResult<()> {
        let conflict = |owner: String| RewriteError::CriterionConflict {
            criterion: criterion.to_string(),
            parameter: name.clone(),
            owner,
        };

        match self.parameters.get(&name) {
            Some(existing) => match &existing.origin {
                ParameterOrigin::Criterion(owner) if owner == criterion => {
                    if existing.value != value {
                        return Err(conflict(existing.origin.to_string()));
                    }
                    return Ok(());
                }
                origin => return Err(conflict(origin.to_string())),
            },
            None if self.markers.contains(&name) => {
                return Err(conflict(ParameterOrigin::Caller.to_string()))
            }
            None => {}
        }

        self.parameters
            .insert(name, ParameterBinding::criterion(criterion, value));
        Ok(())
    }

    /// Rename every alias `subquery` declares that is already taken.
    ///
    /// The whole mapping is chosen first and applied in one pass, so a fresh
    /// name never lands on another alias the subquery declares.
    fn uniquify(&mut self, subquery: Query, criterion: &str) -> RewriteResult<Query> {
        let declared: Vec<String> = subquery
            .declared_aliases()
            .map(|a| a.value.clone())
            .collect();

        let mut reserved: HashSet<String> = declared.iter().cloned().collect();
        let mut renames = Vec::new();
        let mut finals = Vec::with_capacity(declared.len());
        for alias in declared {
            if self.taken.contains(&alias) {
                let fresh = self.fresh_alias(&alias, &reserved);
                tracing::trace!(criterion, from = %alias, to = %fresh, "renamed injected alias");
                reserved.insert(fresh.clone());
                renames.push((alias, fresh.clone()));
                finals.push(fresh);
            } else {
                finals.push(alias);
            }
        }
        let mut subquery = subquery.rename_aliases(&renames);

        for alias in finals {
            self.taken.insert(alias.clone());
            self.injected.insert(alias, criterion.to_string());
        }

        for join in &mut subquery.from.joins {
            if let Some(condition) = join.condition.take() {
                join.condition = Some(self.uniquify_nested(condition, criterion)?);
            }
        }
        if let Some(filter) = subquery.filter.take() {
            subquery.filter = Some(self.uniquify_nested(filter, criterion)?);
        }
        if let Some(having) = subquery.having.take() {
            subquery.having = Some(self.uniquify_nested(having, criterion)?);
        }
        Ok(subquery)
    }

    fn uniquify_nested(&mut self, predicate: Predicate, criterion: &str) -> RewriteResult<Predicate> {
        map_subqueries(predicate, &mut |q| self.uniquify(q, criterion))
    }

    /// `alias` with its numeric suffix replaced by the first free one.
    fn fresh_alias(&self, alias: &str, reserved: &HashSet<String>) -> String {
        let stem = match alias.trim_end_matches(|c: char| c.is_ascii_digit()) {
            "" => alias,
            stem => stem,
        };
        let mut n = 1usize;
        loop {
            let candidate = format!("{}{}", stem, n);
            if !self.taken.contains(&candidate) && !reserved.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Conjoin `existing` with `fragments`.
///
/// With two or more conjuncts every operand is parenthesized, so the
/// caller's predicate keeps its own grouping in the printed text.
fn conjoin(existing: Option<Predicate>, fragments: Vec<Predicate>) -> Option<Predicate> {
    if fragments.is_empty() {
        return existing;
    }
    let conjuncts: Vec<Predicate> = existing.into_iter().chain(fragments).collect();
    if conjuncts.len() == 1 {
        return conjuncts.into_iter().next();
    }
    Some(Predicate::And(
        conjuncts
            .into_iter()
            .map(|p| match p {
                group @ Predicate::Group(_) => group,
                other => Predicate::group(other),
            })
            .collect(),
    ))
}

/// Rebuild `predicate`, passing each subquery at this level through `f`.
///
/// Subqueries nested inside those subqueries are left to `f`.
pub(crate) fn map_subqueries<F>(predicate: Predicate, f: &mut F) -> RewriteResult<Predicate>
where
    F: FnMut(Query) -> RewriteResult<Query>,
{
    Ok(match predicate {
        Predicate::And(ps) => Predicate::And(
            ps.into_iter()
                .map(|p| map_subqueries(p, f))
                .collect::<RewriteResult<_>>()?,
        ),
        Predicate::Or(ps) => Predicate::Or(
            ps.into_iter()
                .map(|p| map_subqueries(p, f))
                .collect::<RewriteResult<_>>()?,
        ),
        Predicate::Not(p) => Predicate::Not(Box::new(map_subqueries(*p, f)?)),
        Predicate::Group(p) => Predicate::Group(Box::new(map_subqueries(*p, f)?)),
        Predicate::In {
            expr,
            source: InSource::Subquery(q),
            negated,
        } => Predicate::In {
            expr,
            source: InSource::Subquery(Box::new(f(*q)?)),
            negated,
        },
        Predicate::Exists { subquery, negated } => Predicate::Exists {
            subquery: Box::new(f(*subquery)?),
            negated,
        },
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AttributeDef, EntityDef, SchemaBundle, ScalarType};
    use crate::criteria::{
        Contribution, ExistsCriterion, FnCriterion, SoftDeleteCriterion, TenantCriterion,
    };
    use entql_lang::{parse, Expr};
    use pretty_assertions::assert_eq;

    fn schema() -> SchemaBundle {
        SchemaBundle::from_entities([
            EntityDef::new("Customer", "id")
                .with_attribute(AttributeDef::scalar("id", ScalarType::Uuid))
                .with_attribute(AttributeDef::scalar("name", ScalarType::String))
                .with_attribute(AttributeDef::scalar("tenantId", ScalarType::String))
                .with_attribute(AttributeDef::scalar("deletedAt", ScalarType::Timestamp).nullable())
                .with_attribute(AttributeDef::collection("orders", "Order"))
                .with_tenant("tenantId")
                .with_soft_delete("deletedAt"),
            EntityDef::new("Order", "id")
                .with_attribute(AttributeDef::scalar("id", ScalarType::Uuid))
                .with_attribute(AttributeDef::scalar("total", ScalarType::Decimal))
                .with_attribute(AttributeDef::reference("customer", "Customer"))
                .with_attribute(AttributeDef::scalar("deletedAt", ScalarType::Timestamp).nullable())
                .with_soft_delete("deletedAt"),
            EntityDef::new("Membership", "id")
                .with_attribute(AttributeDef::scalar("id", ScalarType::Uuid))
                .with_attribute(AttributeDef::reference("customer", "Customer"))
                .with_attribute(AttributeDef::scalar("userId", ScalarType::String)),
        ])
        .unwrap()
    }

    fn transform(
        registry: &CriterionRegistry,
        source: &str,
        params: ParameterMap,
        security: &SecurityContext,
    ) -> RewriteResult<BoundQuery> {
        let schema = schema();
        let bound = Binder::new(&schema).bind(Arc::new(parse(source).unwrap()), params)?;
        Transformer::new(&schema, registry).transform(&bound, security)
    }

    fn soft_delete() -> CriterionRegistry {
        CriterionRegistry::builder()
            .register(SoftDeleteCriterion::new())
            .build()
            .unwrap()
    }

    #[test]
    fn test_fragment_is_conjoined_with_where() {
        let out = transform(
            &soft_delete(),
            "select e from Customer e where e.name = :name",
            ParameterMap::new().with("name", "Alice"),
            &SecurityContext::anonymous(),
        )
        .unwrap();
        assert_eq!(
            out.query().to_string(),
            "select e from Customer e where (e.name = :name) and (e.deletedAt is null)"
        );
        assert!(out.is_applied("soft-delete"));
    }

    #[test]
    fn test_fragment_becomes_the_whole_where() {
        let out = transform(
            &soft_delete(),
            "select e from Customer e order by e.name",
            ParameterMap::new(),
            &SecurityContext::anonymous(),
        )
        .unwrap();
        assert_eq!(
            out.query().to_string(),
            "select e from Customer e where e.deletedAt is null order by e.name"
        );
    }

    #[test]
    fn test_original_grouping_is_kept() {
        let out = transform(
            &soft_delete(),
            "select e from Customer e where e.name = :a or e.name = :b",
            ParameterMap::new().with("a", "x").with("b", "y"),
            &SecurityContext::anonymous(),
        )
        .unwrap();
        assert_eq!(
            out.query().to_string(),
            "select e from Customer e where (e.name = :a or e.name = :b) and (e.deletedAt is null)"
        );
    }

    #[test]
    fn test_inner_and_left_joins() {
        let inner = transform(
            &soft_delete(),
            "select o from Order o join o.customer c",
            ParameterMap::new(),
            &SecurityContext::anonymous(),
        )
        .unwrap();
        assert_eq!(
            inner.query().to_string(),
            "select o from Order o join o.customer c where (o.deletedAt is null) and (c.deletedAt is null)"
        );

        let left = transform(
            &soft_delete(),
            "select o from Order o left join o.customer c",
            ParameterMap::new(),
            &SecurityContext::anonymous(),
        )
        .unwrap();
        assert_eq!(
            left.query().to_string(),
            "select o from Order o left join o.customer c on c.deletedAt is null where o.deletedAt is null"
        );
    }

    #[test]
    fn test_caller_subqueries_are_constrained() {
        let out = transform(
            &soft_delete(),
            "select c from Customer c where exists (select o from Order o where o.customer = c)",
            ParameterMap::new(),
            &SecurityContext::anonymous(),
        )
        .unwrap();
        assert_eq!(
            out.query().to_string(),
            "select c from Customer c where (exists (select o from Order o where (o.customer = c) and (o.deletedAt is null))) and (c.deletedAt is null)"
        );
    }

    #[test]
    fn test_tenant_parameter_is_shared_across_ranges() {
        let registry = CriterionRegistry::builder()
            .register(TenantCriterion::new())
            .build()
            .unwrap();
        let out = transform(
            &registry,
            "select a from Customer a join Customer b on b.name = a.name",
            ParameterMap::new(),
            &SecurityContext::new("alice").with_tenant("acme"),
        )
        .unwrap();

        assert_eq!(out.parameters().len(), 1);
        assert_eq!(
            out.parameters().value("criterion_tenantId"),
            Some(&Value::from("acme"))
        );
        assert_eq!(out.query().to_string().matches(":criterion_tenantId").count(), 4);
    }

    #[test]
    fn test_injected_aliases_are_renamed() {
        let registry = CriterionRegistry::builder()
            .register(
                ExistsCriterion::new("members", "Customer", "Membership")
                    .with_reference("customer")
                    .with_member("userId", "user_id"),
            )
            .build()
            .unwrap();
        let out = transform(
            &registry,
            "select e from Customer e join Customer m on m.name = e.name",
            ParameterMap::new(),
            &SecurityContext::new("bob").with_attribute("user_id", "u-1"),
        )
        .unwrap();

        let text = out.query().to_string();
        assert!(text.contains("exists (select m1 from Membership m1 where m1.customer = e and"));
        assert!(text.contains("exists (select m2 from Membership m2 where m2.customer = m and"));

        let aliases: Vec<&str> = out.aliases().collect();
        let unique: HashSet<&str> = aliases.iter().copied().collect();
        assert_eq!(aliases.len(), unique.len());
        assert_eq!(out.range("m1").and_then(|r| r.injected_by.as_deref()), Some("members"));
        assert_eq!(out.range("m").and_then(|r| r.injected_by.as_deref()), None);
    }

    #[test]
    fn test_injected_subquery_with_two_ranges_keeps_them_apart() {
        let pair = FnCriterion::new(
            "pair",
            |e: &EntityDef| e.name == "Customer",
            |ctx: &CriterionContext<'_>| {
                if ctx.alias() != "e" {
                    return Ok(None);
                }
                let source = format!(
                    "select x from Customer x where exists \
                     (select m from Order m join m.customer m1 where m1 = {})",
                    ctx.alias()
                );
                let fragment = parse(&source).unwrap().filter.unwrap();
                Ok(Some(Contribution::new(fragment)))
            },
        );
        let registry = CriterionRegistry::builder().register(pair).build().unwrap();
        let out = transform(
            &registry,
            "select e from Customer e join Customer m on m.name = e.name",
            ParameterMap::new(),
            &SecurityContext::anonymous(),
        )
        .unwrap();

        assert_eq!(
            out.query().to_string(),
            "select e from Customer e join Customer m on m.name = e.name \
             where exists (select m2 from Order m2 join m2.customer m1 where m1 = e)"
        );
        assert_eq!(out.range("m2").and_then(|r| r.injected_by.as_deref()), Some("pair"));
        assert_eq!(out.range("m1").and_then(|r| r.injected_by.as_deref()), Some("pair"));
        assert_eq!(out.range("m").and_then(|r| r.injected_by.as_deref()), None);
    }

    #[test]
    fn test_second_pass_is_a_no_op() {
        let schema = schema();
        let registry = CriterionRegistry::builder()
            .register(TenantCriterion::new())
            .register(SoftDeleteCriterion::new())
            .build()
            .unwrap();
        let bound = Binder::new(&schema)
            .bind(
                Arc::new(parse("select e from Customer e").unwrap()),
                ParameterMap::new(),
            )
            .unwrap();
        let transformer = Transformer::new(&schema, &registry);
        let security = SecurityContext::new("alice").with_tenant("acme");

        let once = transformer.transform(&bound, &security).unwrap();
        let twice = transformer.transform(&once, &security).unwrap();
        assert_eq!(once.query().to_string(), twice.query().to_string());
        assert_eq!(once.parameters(), twice.parameters());
    }

    #[test]
    fn test_caller_owned_parameter_conflicts() {
        let registry = CriterionRegistry::builder()
            .register(TenantCriterion::new())
            .build()
            .unwrap();
        let err = transform(
            &registry,
            "select e from Customer e where e.name = :criterion_tenantId",
            ParameterMap::new().with("criterion_tenantId", "x"),
            &SecurityContext::anonymous(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RewriteError::CriterionConflict { ref owner, .. } if owner == "the caller"
        ));
    }

    #[test]
    fn test_two_criteria_sharing_a_parameter_conflict() {
        let shadow = FnCriterion::new(
            "shadow",
            |e: &EntityDef| e.name == "Customer",
            |ctx: &CriterionContext<'_>| {
                Ok(Some(
                    Contribution::new(Predicate::eq(
                        ctx.attribute("tenantId"),
                        Expr::param(ctx.parameter("tenantId")),
                    ))
                    .with_parameter(ctx.parameter("tenantId"), "other"),
                ))
            },
        );
        let registry = CriterionRegistry::builder()
            .register(TenantCriterion::new())
            .register(shadow)
            .build()
            .unwrap();
        let err = transform(
            &registry,
            "select e from Customer e",
            ParameterMap::new(),
            &SecurityContext::anonymous(),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "criterion 'shadow' contributes parameter ':criterion_tenantId' already owned by criterion 'tenant'"
        );
    }

    #[test]
    fn test_injected_paths_are_validated() {
        let broken = FnCriterion::new(
            "broken",
            |_: &EntityDef| true,
            |ctx: &CriterionContext<'_>| {
                Ok(Some(Contribution::new(Predicate::is_null(
                    ctx.attribute("missing"),
                ))))
            },
        );
        let registry = CriterionRegistry::builder().register(broken).build().unwrap();
        let err = transform(
            &registry,
            "select e from Customer e",
            ParameterMap::new(),
            &SecurityContext::anonymous(),
        )
        .unwrap_err();
        assert!(matches!(err, RewriteError::UnresolvedPath { .. }));
    }
}
