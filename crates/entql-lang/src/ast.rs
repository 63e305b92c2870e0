//! Abstract Syntax Tree types for the query language.
//!
//! The tree is purely syntactic: attribute paths are sequences of names
//! rooted at an alias and carry no type information. Rewrites never mutate a
//! tree in place; they consume a clone and build a new one.

use crate::span::{Span, Spanned};

/// A complete `select` statement, or a subquery nested inside one.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub distinct: bool,
    pub select: Vec<SelectItem>,
    pub from: FromClause,
    pub filter: Option<Predicate>,
    pub group_by: Vec<Expr>,
    pub having: Option<Predicate>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<Spanned<u64>>,
    pub offset: Option<Spanned<u64>>,
    pub span: Span,
}

impl Query {
    /// Minimal `select <alias> from <entity> <alias>` query with no source span.
    pub fn select_from(entity: impl Into<String>, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        Query {
            distinct: false,
            select: vec![SelectItem {
                expr: Expr::Path(PathExpr::new(alias.clone(), Vec::<String>::new())),
                alias: None,
                span: Span::SYNTHETIC,
            }],
            from: FromClause {
                root: RangeRef {
                    entity: Spanned::synthetic(entity.into()),
                    alias: Spanned::synthetic(alias),
                },
                joins: Vec::new(),
            },
            filter: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            span: Span::SYNTHETIC,
        }
    }

    pub fn with_filter(mut self, filter: Predicate) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Every alias declared by this query level (root first, then joins).
    pub fn declared_aliases(&self) -> impl Iterator<Item = &Spanned<String>> {
        std::iter::once(&self.from.root.alias).chain(self.from.joins.iter().map(|j| &j.alias))
    }

    /// Subqueries nested directly in this query level's predicates.
    pub fn subqueries(&self) -> Vec<&Query> {
        let mut out = Vec::new();
        for join in &self.from.joins {
            if let Some(cond) = &join.condition {
                cond.collect_subqueries(&mut out);
            }
        }
        if let Some(filter) = &self.filter {
            filter.collect_subqueries(&mut out);
        }
        if let Some(having) = &self.having {
            having.collect_subqueries(&mut out);
        }
        out
    }

    /// Every parameter marker in the query, including subqueries, in textual order.
    pub fn parameters(&self) -> Vec<&Spanned<String>> {
        let mut out = Vec::new();
        for item in &self.select {
            item.expr.collect_parameters(&mut out);
        }
        for join in &self.from.joins {
            if let Some(cond) = &join.condition {
                cond.collect_parameters(&mut out);
            }
        }
        if let Some(filter) = &self.filter {
            filter.collect_parameters(&mut out);
        }
        for expr in &self.group_by {
            expr.collect_parameters(&mut out);
        }
        if let Some(having) = &self.having {
            having.collect_parameters(&mut out);
        }
        for item in &self.order_by {
            item.expr.collect_parameters(&mut out);
        }
        out
    }

    /// Rename alias `from` to `to` in declarations and path roots.
    pub fn rename_alias(self, from: &str, to: &str) -> Query {
        self.rename_aliases(&[(from.to_string(), to.to_string())])
    }

    /// Apply every `(old, new)` rename in one pass.
    ///
    /// Declarations at this level and paths rooted at a renamed alias are
    /// rewritten. A nested subquery that declares one of the old names
    /// shadows it, so paths inside that subquery keep the name.
    pub fn rename_aliases(self, renames: &[(String, String)]) -> Query {
        if renames.is_empty() {
            return self;
        }
        let rename_decl = |alias: Spanned<String>| match renamed(renames, &alias.value) {
            Some(to) => Spanned::new(to.to_string(), alias.span),
            None => alias,
        };
        let mut rename_path = |path: PathExpr| path.rename_roots(renames);

        Query {
            distinct: self.distinct,
            select: self
                .select
                .into_iter()
                .map(|item| SelectItem {
                    expr: item.expr.map_paths(&mut rename_path),
                    ..item
                })
                .collect(),
            from: FromClause {
                root: RangeRef {
                    entity: self.from.root.entity,
                    alias: rename_decl(self.from.root.alias),
                },
                joins: self
                    .from
                    .joins
                    .into_iter()
                    .map(|join| JoinRange {
                        kind: join.kind,
                        target: match join.target {
                            JoinTarget::Path(p) => JoinTarget::Path(p.rename_roots(renames)),
                            other => other,
                        },
                        alias: rename_decl(join.alias),
                        condition: join.condition.map(|c| c.rename_aliases(renames)),
                        span: join.span,
                    })
                    .collect(),
            },
            filter: self.filter.map(|f| f.rename_aliases(renames)),
            group_by: self
                .group_by
                .into_iter()
                .map(|e| e.map_paths(&mut rename_path))
                .collect(),
            having: self.having.map(|h| h.rename_aliases(renames)),
            order_by: self
                .order_by
                .into_iter()
                .map(|item| OrderItem {
                    expr: item.expr.map_paths(&mut rename_path),
                    ..item
                })
                .collect(),
            limit: self.limit,
            offset: self.offset,
            span: self.span,
        }
    }

    /// Rename `renames` inside this query used as a nested subquery.
    fn rename_nested(self, renames: &[(String, String)]) -> Query {
        let visible: Vec<(String, String)> = renames
            .iter()
            .filter(|(from, _)| !self.declared_aliases().any(|a| &a.value == from))
            .cloned()
            .collect();
        self.rename_aliases(&visible)
    }
}

/// New name for `alias`, if it is renamed.
fn renamed<'r>(renames: &'r [(String, String)], alias: &str) -> Option<&'r str> {
    renames
        .iter()
        .find(|(from, _)| from == alias)
        .map(|(_, to)| to.as_str())
}

/// The FROM clause: exactly one root range plus explicit joins.
#[derive(Debug, Clone, PartialEq)]
pub struct FromClause {
    pub root: RangeRef,
    pub joins: Vec<JoinRange>,
}

/// An entity type bound to an alias.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeRef {
    pub entity: Spanned<String>,
    pub alias: Spanned<String>,
}

/// A joined range.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRange {
    pub kind: JoinKind,
    pub target: JoinTarget,
    pub alias: Spanned<String>,
    /// Required for entity targets; optional extra condition for path targets.
    pub condition: Option<Predicate>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

/// What a join navigates to.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinTarget {
    /// Implicit join along a reference path, e.g. `join e.orders o`.
    Path(PathExpr),
    /// Explicit entity join, e.g. `join Order o on o.customer = e`.
    Entity(Spanned<String>),
}

/// One projected expression.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<Spanned<String>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    pub direction: SortDirection,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// A dotted attribute chain rooted at an alias: `alias.attr1.attr2`.
///
/// A bare alias is a path with no attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    pub alias: Spanned<String>,
    pub attributes: Vec<Spanned<String>>,
    pub span: Span,
}

impl PathExpr {
    /// Build a path with no source location.
    pub fn new<I, S>(alias: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PathExpr {
            alias: Spanned::synthetic(alias.into()),
            attributes: attributes
                .into_iter()
                .map(|a| Spanned::synthetic(a.into()))
                .collect(),
            span: Span::SYNTHETIC,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias.value
    }

    /// Attribute names without spans.
    pub fn attribute_names(&self) -> Vec<&str> {
        self.attributes.iter().map(|a| a.value.as_str()).collect()
    }

    /// Dotted attribute chain without the alias, e.g. `customer.name`.
    pub fn attribute_path(&self) -> String {
        self.attribute_names().join(".")
    }

    pub fn rename_root(self, from: &str, to: &str) -> PathExpr {
        self.rename_roots(&[(from.to_string(), to.to_string())])
    }

    /// Rename the root alias if it appears in `renames`.
    pub fn rename_roots(self, renames: &[(String, String)]) -> PathExpr {
        match renamed(renames, &self.alias.value) {
            Some(to) => PathExpr {
                alias: Spanned::new(to.to_string(), self.alias.span),
                ..self
            },
            None => self,
        }
    }
}

/// Value expressions usable in select items, predicates and ordering.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Path(PathExpr),
    Literal(Spanned<Literal>),
    /// Named parameter marker, stored without the colon.
    Parameter(Spanned<String>),
    Aggregate(AggregateCall),
    Function(FunctionCall),
}

impl Expr {
    pub fn path<I, S>(alias: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Expr::Path(PathExpr::new(alias, attributes))
    }

    pub fn param(name: impl Into<String>) -> Self {
        Expr::Parameter(Spanned::synthetic(name.into()))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expr::Literal(Spanned::synthetic(Literal::String(value.into())))
    }

    pub fn span(&self) -> Span {
        match self {
            Expr::Path(p) => p.span,
            Expr::Literal(l) => l.span,
            Expr::Parameter(p) => p.span,
            Expr::Aggregate(a) => a.span,
            Expr::Function(f) => f.span,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Expr::Aggregate(_))
    }

    pub fn as_path(&self) -> Option<&PathExpr> {
        match self {
            Expr::Path(p) => Some(p),
            _ => None,
        }
    }

    /// Apply `f` to every path in this expression, rebuilding the tree.
    pub fn map_paths<F: FnMut(PathExpr) -> PathExpr>(self, f: &mut F) -> Expr {
        match self {
            Expr::Path(p) => Expr::Path(f(p)),
            Expr::Aggregate(call) => Expr::Aggregate(AggregateCall {
                argument: Box::new(call.argument.map_paths(f)),
                ..call
            }),
            Expr::Function(call) => Expr::Function(FunctionCall {
                arguments: call.arguments.into_iter().map(|a| a.map_paths(f)).collect(),
                ..call
            }),
            other => other,
        }
    }

    /// Visit every path in this expression.
    pub fn for_each_path<'a, F: FnMut(&'a PathExpr)>(&'a self, f: &mut F) {
        match self {
            Expr::Path(p) => f(p),
            Expr::Aggregate(call) => call.argument.for_each_path(f),
            Expr::Function(call) => call.arguments.iter().for_each(|a| a.for_each_path(f)),
            Expr::Literal(_) | Expr::Parameter(_) => {}
        }
    }

    fn collect_parameters<'a>(&'a self, out: &mut Vec<&'a Spanned<String>>) {
        match self {
            Expr::Parameter(p) => out.push(p),
            Expr::Aggregate(call) => call.argument.collect_parameters(out),
            Expr::Function(call) => call.arguments.iter().for_each(|a| a.collect_parameters(out)),
            Expr::Path(_) | Expr::Literal(_) => {}
        }
    }
}

/// `count`, `sum`, `avg`, `min` or `max` applied to one argument.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateCall {
    pub function: AggregateFunction,
    pub distinct: bool,
    pub argument: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    /// Recognise an aggregate by (case-insensitive) function name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(AggregateFunction::Count),
            "sum" => Some(AggregateFunction::Sum),
            "avg" => Some(AggregateFunction::Avg),
            "min" => Some(AggregateFunction::Min),
            "max" => Some(AggregateFunction::Max),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }
}

/// Any non-aggregate function call, e.g. `upper(e.name)`.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: Spanned<String>,
    pub arguments: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(f64),
    String(String),
}

impl Literal {
    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::Null => "null",
            Literal::Bool(_) => "bool",
            Literal::Int(_) => "int",
            Literal::Decimal(_) => "decimal",
            Literal::String(_) => "string",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
        }
    }
}

/// Right-hand side of an `in` predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum InSource {
    /// `in (a, b, :c)`
    List(Vec<Expr>),
    /// `in :values` with a collection-valued parameter.
    Parameter(Spanned<String>),
    /// `in (select ...)`
    Subquery(Box<Query>),
}

/// Boolean condition tree.
///
/// A comparison against a parameter marker is a [`Predicate::Comparison`]
/// with an [`Expr::Parameter`] operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    /// Explicit parentheses, kept so the printer reproduces them.
    Group(Box<Predicate>),
    Comparison {
        left: Expr,
        op: ComparisonOp,
        right: Expr,
    },
    In {
        expr: Expr,
        source: InSource,
        negated: bool,
    },
    Between {
        expr: Expr,
        low: Expr,
        high: Expr,
        negated: bool,
    },
    IsNull {
        expr: Expr,
        negated: bool,
    },
    Like {
        expr: Expr,
        pattern: Expr,
        escape: Option<Spanned<String>>,
        negated: bool,
    },
    Exists {
        subquery: Box<Query>,
        negated: bool,
    },
}

impl Predicate {
    /// Conjunction; a single operand is returned unwrapped.
    pub fn and(mut operands: Vec<Predicate>) -> Self {
        if operands.len() == 1 {
            if let Some(only) = operands.pop() {
                return only;
            }
        }
        Predicate::And(operands)
    }

    /// Disjunction; a single operand is returned unwrapped.
    pub fn or(mut operands: Vec<Predicate>) -> Self {
        if operands.len() == 1 {
            if let Some(only) = operands.pop() {
                return only;
            }
        }
        Predicate::Or(operands)
    }

    pub fn group(inner: Predicate) -> Self {
        Predicate::Group(Box::new(inner))
    }

    pub fn negate(inner: Predicate) -> Self {
        Predicate::Not(Box::new(inner))
    }

    pub fn compare(left: Expr, op: ComparisonOp, right: Expr) -> Self {
        Predicate::Comparison { left, op, right }
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Self::compare(left, ComparisonOp::Eq, right)
    }

    pub fn is_null(expr: Expr) -> Self {
        Predicate::IsNull {
            expr,
            negated: false,
        }
    }

    pub fn exists(subquery: Query) -> Self {
        Predicate::Exists {
            subquery: Box::new(subquery),
            negated: false,
        }
    }

    /// Every parameter marker reachable from this predicate, subqueries included.
    pub fn parameters(&self) -> Vec<&Spanned<String>> {
        let mut out = Vec::new();
        self.collect_parameters(&mut out);
        out
    }

    fn collect_parameters<'a>(&'a self, out: &mut Vec<&'a Spanned<String>>) {
        match self {
            Predicate::And(ps) | Predicate::Or(ps) => {
                ps.iter().for_each(|p| p.collect_parameters(out))
            }
            Predicate::Not(p) | Predicate::Group(p) => p.collect_parameters(out),
            Predicate::Comparison { left, right, .. } => {
                left.collect_parameters(out);
                right.collect_parameters(out);
            }
            Predicate::In { expr, source, .. } => {
                expr.collect_parameters(out);
                match source {
                    InSource::List(items) => items.iter().for_each(|e| e.collect_parameters(out)),
                    InSource::Parameter(p) => out.push(p),
                    InSource::Subquery(q) => out.extend(q.parameters()),
                }
            }
            Predicate::Between {
                expr, low, high, ..
            } => {
                expr.collect_parameters(out);
                low.collect_parameters(out);
                high.collect_parameters(out);
            }
            Predicate::IsNull { expr, .. } => expr.collect_parameters(out),
            Predicate::Like { expr, pattern, .. } => {
                expr.collect_parameters(out);
                pattern.collect_parameters(out);
            }
            Predicate::Exists { subquery, .. } => out.extend(subquery.parameters()),
        }
    }

    fn collect_subqueries<'a>(&'a self, out: &mut Vec<&'a Query>) {
        match self {
            Predicate::And(ps) | Predicate::Or(ps) => {
                ps.iter().for_each(|p| p.collect_subqueries(out))
            }
            Predicate::Not(p) | Predicate::Group(p) => p.collect_subqueries(out),
            Predicate::In {
                source: InSource::Subquery(q),
                ..
            } => out.push(q),
            Predicate::Exists { subquery, .. } => out.push(subquery),
            _ => {}
        }
    }

    /// Visit every path at this query level (subqueries are not entered).
    pub fn for_each_path<'a, F: FnMut(&'a PathExpr)>(&'a self, f: &mut F) {
        match self {
            Predicate::And(ps) | Predicate::Or(ps) => ps.iter().for_each(|p| p.for_each_path(f)),
            Predicate::Not(p) | Predicate::Group(p) => p.for_each_path(f),
            Predicate::Comparison { left, right, .. } => {
                left.for_each_path(f);
                right.for_each_path(f);
            }
            Predicate::In { expr, source, .. } => {
                expr.for_each_path(f);
                if let InSource::List(items) = source {
                    items.iter().for_each(|e| e.for_each_path(f));
                }
            }
            Predicate::Between {
                expr, low, high, ..
            } => {
                expr.for_each_path(f);
                low.for_each_path(f);
                high.for_each_path(f);
            }
            Predicate::IsNull { expr, .. } => expr.for_each_path(f),
            Predicate::Like { expr, pattern, .. } => {
                expr.for_each_path(f);
                pattern.for_each_path(f);
            }
            Predicate::Exists { .. } => {}
        }
    }

    /// Rename alias `from` to `to` everywhere, including nested subqueries
    /// that do not redeclare it.
    pub fn rename_alias(self, from: &str, to: &str) -> Predicate {
        self.rename_aliases(&[(from.to_string(), to.to_string())])
    }

    /// Apply every `(old, new)` rename in one pass; see [`Query::rename_aliases`].
    pub fn rename_aliases(self, renames: &[(String, String)]) -> Predicate {
        let mut rename = |path: PathExpr| path.rename_roots(renames);
        match self {
            Predicate::And(ps) => {
                Predicate::And(ps.into_iter().map(|p| p.rename_aliases(renames)).collect())
            }
            Predicate::Or(ps) => {
                Predicate::Or(ps.into_iter().map(|p| p.rename_aliases(renames)).collect())
            }
            Predicate::Not(p) => Predicate::Not(Box::new(p.rename_aliases(renames))),
            Predicate::Group(p) => Predicate::Group(Box::new(p.rename_aliases(renames))),
            Predicate::Comparison { left, op, right } => Predicate::Comparison {
                left: left.map_paths(&mut rename),
                op,
                right: right.map_paths(&mut rename),
            },
            Predicate::In {
                expr,
                source,
                negated,
            } => Predicate::In {
                expr: expr.map_paths(&mut rename),
                source: match source {
                    InSource::List(items) => {
                        InSource::List(items.into_iter().map(|e| e.map_paths(&mut rename)).collect())
                    }
                    InSource::Subquery(q) => InSource::Subquery(Box::new(q.rename_nested(renames))),
                    param @ InSource::Parameter(_) => param,
                },
                negated,
            },
            Predicate::Between {
                expr,
                low,
                high,
                negated,
            } => Predicate::Between {
                expr: expr.map_paths(&mut rename),
                low: low.map_paths(&mut rename),
                high: high.map_paths(&mut rename),
                negated,
            },
            Predicate::IsNull { expr, negated } => Predicate::IsNull {
                expr: expr.map_paths(&mut rename),
                negated,
            },
            Predicate::Like {
                expr,
                pattern,
                escape,
                negated,
            } => Predicate::Like {
                expr: expr.map_paths(&mut rename),
                pattern: pattern.map_paths(&mut rename),
                escape,
                negated,
            },
            Predicate::Exists { subquery, negated } => Predicate::Exists {
                subquery: Box::new(subquery.rename_nested(renames)),
                negated,
            },
        }
    }
}
