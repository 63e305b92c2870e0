//! Binding of parsed queries against the entity schema.
//!
//! Binding is a lookup pass: it never changes the shape of the AST. It
//! produces a [`BoundQuery`] that pairs the tree with an alias table and a
//! resolution for every attribute path reachable from it.

use crate::catalog::{EntitySchema, PathType, ResolvedPath, ScalarType};
use crate::error::{RewriteError, RewriteResult};
use crate::params::ParameterMap;
use crate::transform::map_subqueries;
use entql_lang::{
    Expr, InSource, JoinKind, JoinTarget, PathExpr, Predicate, Query, Span, Spanned,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Key identifying a path expression in the resolution table.
///
/// Aliases are unique across a whole query, so alias plus attribute chain
/// identifies the navigation regardless of where the path appears.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathKey {
    pub alias: String,
    pub attributes: Vec<String>,
}

impl PathKey {
    pub fn of(path: &PathExpr) -> Self {
        Self {
            alias: path.alias.value.clone(),
            attributes: path.attributes.iter().map(|a| a.value.clone()).collect(),
        }
    }
}

/// How a range entered the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeKind {
    /// The FROM clause's root range.
    Root,
    /// A joined range.
    Join(JoinKind),
}

/// One entry of the alias table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeBinding {
    pub alias: String,
    pub entity: String,
    pub kind: RangeKind,
    /// 0 for the outermost query, 1 for its subqueries, and so on.
    pub depth: usize,
    /// Criterion that introduced the range, if any.
    pub injected_by: Option<String>,
    pub span: Span,
}

/// A query AST with its alias table, path resolutions and parameters.
#[derive(Debug, Clone)]
pub struct BoundQuery {
    query: Arc<Query>,
    ranges: Vec<RangeBinding>,
    paths: HashMap<PathKey, ResolvedPath>,
    parameters: ParameterMap,
    applied_criteria: BTreeSet<String>,
}

impl BoundQuery {
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn query_arc(&self) -> Arc<Query> {
        Arc::clone(&self.query)
    }

    /// Alias table in declaration order.
    pub fn ranges(&self) -> &[RangeBinding] {
        &self.ranges
    }

    pub fn range(&self, alias: &str) -> Option<&RangeBinding> {
        self.ranges.iter().find(|r| r.alias == alias)
    }

    /// Resolution for a path that appears in the query.
    pub fn resolution(&self, path: &PathExpr) -> Option<&ResolvedPath> {
        self.paths.get(&PathKey::of(path))
    }

    pub fn resolutions(&self) -> impl Iterator<Item = (&PathKey, &ResolvedPath)> {
        self.paths.iter()
    }

    pub fn parameters(&self) -> &ParameterMap {
        &self.parameters
    }

    /// Names of the criteria already applied to this model.
    pub fn applied_criteria(&self) -> &BTreeSet<String> {
        &self.applied_criteria
    }

    pub fn is_applied(&self, criterion: &str) -> bool {
        self.applied_criteria.contains(criterion)
    }

    /// Every alias in the model, including criterion-injected ranges.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.ranges.iter().map(|r| r.alias.as_str())
    }
}

/// Carried over when a transformed query is bound again.
#[derive(Debug, Clone, Default)]
pub(crate) struct Annotations {
    pub applied_criteria: BTreeSet<String>,
    /// Injected range alias -> criterion name.
    pub injected: HashMap<String, String>,
}

/// Resolves queries against an [`EntitySchema`].
pub struct Binder<'s> {
    schema: &'s dyn EntitySchema,
}

impl<'s> Binder<'s> {
    pub fn new(schema: &'s dyn EntitySchema) -> Self {
        Self { schema }
    }

    /// Bind `query` with the caller's parameters.
    ///
    /// Subqueries that reuse an alias of an earlier sibling subquery are
    /// given a fresh alias first, so every range in the model has its own.
    pub fn bind(&self, query: Arc<Query>, parameters: ParameterMap) -> RewriteResult<BoundQuery> {
        let query = disambiguate_siblings(query)?;
        self.bind_annotated(query, parameters, Annotations::default())
    }

    pub(crate) fn bind_annotated(
        &self,
        query: Arc<Query>,
        mut parameters: ParameterMap,
        annotations: Annotations,
    ) -> RewriteResult<BoundQuery> {
        let mut state = BindState {
            schema: self.schema,
            scopes: Vec::new(),
            ranges: Vec::new(),
            paths: HashMap::new(),
            parameter_types: Vec::new(),
            injected: &annotations.injected,
        };
        state.bind_query(&query, 0)?;

        for (name, ty) in &state.parameter_types {
            parameters.set_declared_type(name, *ty);
        }

        Ok(BoundQuery {
            query,
            ranges: state.ranges,
            paths: state.paths,
            parameters,
            applied_criteria: annotations.applied_criteria,
        })
    }
}

struct BindState<'a> {
    schema: &'a dyn EntitySchema,
    /// Innermost scope last; each scope maps alias -> entity.
    scopes: Vec<Vec<(String, String)>>,
    ranges: Vec<RangeBinding>,
    paths: HashMap<PathKey, ResolvedPath>,
    parameter_types: Vec<(String, ScalarType)>,
    injected: &'a HashMap<String, String>,
}

impl BindState<'_> {
    fn bind_query(&mut self, query: &Query, depth: usize) -> RewriteResult<()> {
        self.scopes.push(Vec::new());
        let result = self.bind_query_in_scope(query, depth);
        self.scopes.pop();
        result
    }

    fn bind_query_in_scope(&mut self, query: &Query, depth: usize) -> RewriteResult<()> {
        let root = &query.from.root;
        if self.schema.entity(&root.entity.value).is_none() {
            return Err(RewriteError::UnresolvedPath {
                alias: root.alias.value.clone(),
                path: String::new(),
                reason: format!("unknown entity '{}'", root.entity.value),
                span: root.entity.span,
            });
        }
        self.declare(&root.alias, &root.entity.value, RangeKind::Root, depth)?;

        for join in &query.from.joins {
            let entity = match &join.target {
                JoinTarget::Path(path) => {
                    let resolved = self.resolve(path)?;
                    match &resolved.terminal {
                        PathType::Entity { name, .. } => name.clone(),
                        PathType::Scalar(_) => {
                            return Err(unresolved(
                                path,
                                "a scalar attribute cannot be joined".to_string(),
                            ))
                        }
                    }
                }
                JoinTarget::Entity(name) => {
                    if self.schema.entity(&name.value).is_none() {
                        return Err(RewriteError::UnresolvedPath {
                            alias: join.alias.value.clone(),
                            path: String::new(),
                            reason: format!("unknown entity '{}'", name.value),
                            span: name.span,
                        });
                    }
                    name.value.clone()
                }
            };
            self.declare(&join.alias, &entity, RangeKind::Join(join.kind), depth)?;
        }

        for item in &query.select {
            self.bind_expr(&item.expr)?;
        }
        for join in &query.from.joins {
            if let Some(cond) = &join.condition {
                self.bind_predicate(cond, depth)?;
            }
        }
        if let Some(filter) = &query.filter {
            self.bind_predicate(filter, depth)?;
        }
        for expr in &query.group_by {
            self.bind_expr(expr)?;
        }
        if let Some(having) = &query.having {
            self.bind_predicate(having, depth)?;
        }
        for item in &query.order_by {
            self.bind_expr(&item.expr)?;
        }
        Ok(())
    }

    fn declare(
        &mut self,
        alias: &Spanned<String>,
        entity: &str,
        kind: RangeKind,
        depth: usize,
    ) -> RewriteResult<()> {
        if self.ranges.iter().any(|r| r.alias == alias.value) {
            return Err(RewriteError::AliasCollision {
                alias: alias.value.clone(),
                span: alias.span,
            });
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((alias.value.clone(), entity.to_string()));
        }
        self.ranges.push(RangeBinding {
            alias: alias.value.clone(),
            entity: entity.to_string(),
            kind,
            depth,
            injected_by: self.injected.get(&alias.value).cloned(),
            span: alias.span,
        });
        Ok(())
    }

    /// Entity of `alias` in the nearest enclosing scope that declares it.
    fn lookup(&self, alias: &str) -> Option<&str> {
        self.scopes.iter().rev().find_map(|scope| {
            scope
                .iter()
                .find(|(a, _)| a == alias)
                .map(|(_, entity)| entity.as_str())
        })
    }

    fn resolve(&mut self, path: &PathExpr) -> RewriteResult<ResolvedPath> {
        let entity = self
            .lookup(path.alias())
            .ok_or_else(|| {
                unresolved(path, format!("alias '{}' is not declared in this scope", path.alias()))
            })?
            .to_string();

        let segments = path.attribute_names();
        let resolved = self
            .schema
            .resolve_path(&entity, &segments)
            .map_err(|e| unresolved(path, e.to_string()))?;

        self.paths.insert(PathKey::of(path), resolved.clone());
        Ok(resolved)
    }

    fn bind_expr(&mut self, expr: &Expr) -> RewriteResult<Option<ResolvedPath>> {
        match expr {
            Expr::Path(path) => self.resolve(path).map(Some),
            Expr::Aggregate(call) => {
                self.bind_expr(&call.argument)?;
                Ok(None)
            }
            Expr::Function(call) => {
                for arg in &call.arguments {
                    self.bind_expr(arg)?;
                }
                Ok(None)
            }
            Expr::Literal(_) | Expr::Parameter(_) => Ok(None),
        }
    }

    /// Record the scalar type a parameter is compared against.
    fn note_parameter(&mut self, param: &Expr, against: &Option<ResolvedPath>) {
        if let (Expr::Parameter(name), Some(resolved)) = (param, against) {
            if let Some(ty) = resolved.scalar_type() {
                self.parameter_types.push((name.value.clone(), ty));
            }
        }
    }

    fn bind_predicate(&mut self, pred: &Predicate, depth: usize) -> RewriteResult<()> {
        match pred {
            Predicate::And(ps) | Predicate::Or(ps) => {
                for p in ps {
                    self.bind_predicate(p, depth)?;
                }
            }
            Predicate::Not(p) | Predicate::Group(p) => self.bind_predicate(p, depth)?,
            Predicate::Comparison { left, right, .. } => {
                let l = self.bind_expr(left)?;
                let r = self.bind_expr(right)?;
                self.note_parameter(right, &l);
                self.note_parameter(left, &r);
            }
            Predicate::In { expr, source, .. } => {
                let resolved = self.bind_expr(expr)?;
                match source {
                    InSource::List(items) => {
                        for item in items {
                            self.bind_expr(item)?;
                            self.note_parameter(item, &resolved);
                        }
                    }
                    InSource::Parameter(name) => {
                        if let Some(ty) = resolved.as_ref().and_then(|r| r.scalar_type()) {
                            self.parameter_types.push((name.value.clone(), ty));
                        }
                    }
                    InSource::Subquery(query) => self.bind_query(query, depth + 1)?,
                }
            }
            Predicate::Between { expr, low, high, .. } => {
                let resolved = self.bind_expr(expr)?;
                self.bind_expr(low)?;
                self.bind_expr(high)?;
                self.note_parameter(low, &resolved);
                self.note_parameter(high, &resolved);
            }
            Predicate::IsNull { expr, .. } => {
                self.bind_expr(expr)?;
            }
            Predicate::Like { expr, pattern, .. } => {
                let resolved = self.bind_expr(expr)?;
                self.bind_expr(pattern)?;
                self.note_parameter(pattern, &resolved);
            }
            Predicate::Exists { subquery, .. } => self.bind_query(subquery, depth + 1)?,
        }
        Ok(())
    }
}

fn collect_aliases<'q>(query: &'q Query, out: &mut Vec<&'q str>) {
    out.extend(query.declared_aliases().map(|a| a.value.as_str()));
    for subquery in query.subqueries() {
        collect_aliases(subquery, out);
    }
}

/// Rename aliases that repeat one declared by an already closed sibling scope.
///
/// Aliases repeated within one level or shadowing an enclosing range are left
/// alone for [`BindState::declare`] to reject.
fn disambiguate_siblings(query: Arc<Query>) -> RewriteResult<Arc<Query>> {
    let mut declared = Vec::new();
    collect_aliases(&query, &mut declared);
    let taken: HashSet<String> = declared.iter().map(|a| a.to_string()).collect();
    if taken.len() == declared.len() {
        return Ok(query);
    }

    let mut renamer = SiblingRenamer {
        taken,
        closed: HashSet::new(),
        enclosing: Vec::new(),
        renamed: false,
    };
    let rewritten = renamer.level(Query::clone(&query))?;
    Ok(if renamer.renamed {
        Arc::new(rewritten)
    } else {
        query
    })
}

struct SiblingRenamer {
    /// Every alias in the tree plus the fresh ones handed out.
    taken: HashSet<String>,
    /// Aliases of scopes that have been left.
    closed: HashSet<String>,
    /// Original and final aliases of each open scope, innermost last.
    enclosing: Vec<Vec<(String, String)>>,
    renamed: bool,
}

impl SiblingRenamer {
    fn level(&mut self, query: Query) -> RewriteResult<Query> {
        let mut renames = Vec::new();
        let mut scope: Vec<(String, String)> = Vec::new();
        for alias in query.declared_aliases() {
            let name = &alias.value;
            let visible = scope
                .iter()
                .chain(self.enclosing.iter().flatten())
                .any(|(original, fresh)| original == name || fresh == name);
            let fresh = if !visible && self.closed.contains(name) {
                let fresh = self.fresh_alias(name);
                tracing::trace!(from = %name, to = %fresh, "renamed sibling alias");
                renames.push((name.clone(), fresh.clone()));
                fresh
            } else {
                name.clone()
            };
            scope.push((name.clone(), fresh));
        }
        self.renamed |= !renames.is_empty();
        let mut query = query.rename_aliases(&renames);

        self.enclosing.push(scope);
        let result = self.nested(&mut query);
        let scope = self.enclosing.pop().unwrap_or_default();
        result?;
        self.closed.extend(scope.into_iter().map(|(_, fresh)| fresh));
        Ok(query)
    }

    fn nested(&mut self, query: &mut Query) -> RewriteResult<()> {
        for join in &mut query.from.joins {
            if let Some(condition) = join.condition.take() {
                join.condition = Some(map_subqueries(condition, &mut |q| self.level(q))?);
            }
        }
        if let Some(filter) = query.filter.take() {
            query.filter = Some(map_subqueries(filter, &mut |q| self.level(q))?);
        }
        if let Some(having) = query.having.take() {
            query.having = Some(map_subqueries(having, &mut |q| self.level(q))?);
        }
        Ok(())
    }

    fn fresh_alias(&mut self, alias: &str) -> String {
        let stem = match alias.trim_end_matches(|c: char| c.is_ascii_digit()) {
            "" => alias,
            stem => stem,
        };
        let mut n = 1usize;
        loop {
            let candidate = format!("{}{}", stem, n);
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

fn unresolved(path: &PathExpr, reason: String) -> RewriteError {
    RewriteError::UnresolvedPath {
        alias: path.alias().to_string(),
        path: path.attribute_path(),
        reason,
        span: path.span,
    }
}
