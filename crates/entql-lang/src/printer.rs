//! Rendering of AST nodes back to query text.
//!
//! Output uses lowercase keywords and single spaces. Explicit [`Predicate::Group`]
//! nodes are always parenthesized; everywhere else parentheses are added only
//! where operator precedence would otherwise change the tree on re-parse.

use crate::ast::*;
use crate::lexer::is_keyword;
use std::fmt;

/// Binding strength of a predicate node; higher binds tighter.
fn precedence(pred: &Predicate) -> u8 {
    match pred {
        Predicate::Or(ps) if ps.len() > 1 => 1,
        Predicate::And(ps) if ps.len() > 1 => 2,
        Predicate::Not(_) => 3,
        _ => 4,
    }
}

/// Write `pred`, wrapping it in parentheses if it binds looser than `min`.
fn write_operand(f: &mut fmt::Formatter<'_>, pred: &Predicate, min: u8) -> fmt::Result {
    if precedence(pred) < min {
        write!(f, "({})", pred)
    } else {
        write!(f, "{}", pred)
    }
}

/// Write an identifier, quoting it if it is reserved or not a plain name.
pub fn write_ident(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    if needs_quoting(name) {
        write!(f, "\"{}\"", name.replace('"', "\"\""))
    } else {
        f.write_str(name)
    }
}

/// Write an entity name; reserved words are accepted unquoted in that position.
fn write_entity(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    if is_plain(name) {
        f.write_str(name)
    } else {
        write!(f, "\"{}\"", name.replace('"', "\"\""))
    }
}

fn needs_quoting(name: &str) -> bool {
    !is_plain(name) || is_keyword(name)
}

fn is_plain(name: &str) -> bool {
    let mut chars = name.chars();
    let plain_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    plain_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("select ")?;
        if self.distinct {
            f.write_str("distinct ")?;
        }
        write_list(f, &self.select)?;
        write!(f, " from {}", self.from.root)?;
        for join in &self.from.joins {
            write!(f, " {}", join)?;
        }
        if let Some(filter) = &self.filter {
            write!(f, " where {}", filter)?;
        }
        if !self.group_by.is_empty() {
            f.write_str(" group by ")?;
            write_list(f, &self.group_by)?;
        }
        if let Some(having) = &self.having {
            write!(f, " having {}", having)?;
        }
        if !self.order_by.is_empty() {
            f.write_str(" order by ")?;
            write_list(f, &self.order_by)?;
        }
        if let Some(limit) = &self.limit {
            write!(f, " limit {}", limit.value)?;
        }
        if let Some(offset) = &self.offset {
            write!(f, " offset {}", offset.value)?;
        }
        Ok(())
    }
}

impl fmt::Display for SelectItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if let Some(alias) = &self.alias {
            f.write_str(" as ")?;
            write_ident(f, &alias.value)?;
        }
        Ok(())
    }
}

impl fmt::Display for RangeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_entity(f, &self.entity.value)?;
        f.write_str(" ")?;
        write_ident(f, &self.alias.value)
    }
}

impl fmt::Display for JoinRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            JoinKind::Inner => f.write_str("join ")?,
            JoinKind::Left => f.write_str("left join ")?,
        }
        match &self.target {
            JoinTarget::Path(path) => write!(f, "{}", path)?,
            JoinTarget::Entity(entity) => write_entity(f, &entity.value)?,
        }
        f.write_str(" ")?;
        write_ident(f, &self.alias.value)?;
        if let Some(condition) = &self.condition {
            write!(f, " on {}", condition)?;
        }
        Ok(())
    }
}

impl fmt::Display for OrderItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if self.direction == SortDirection::Desc {
            f.write_str(" desc")?;
        }
        Ok(())
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_ident(f, &self.alias.value)?;
        for attr in &self.attributes {
            f.write_str(".")?;
            write_ident(f, &attr.value)?;
        }
        Ok(())
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("null"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Decimal(d) => {
                // keep a fractional part so the value re-lexes as a decimal
                let text = d.to_string();
                if text.contains('.') {
                    f.write_str(&text)
                } else {
                    write!(f, "{}.0", text)
                }
            }
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Path(path) => write!(f, "{}", path),
            Expr::Literal(lit) => write!(f, "{}", lit.value),
            Expr::Parameter(name) => write!(f, ":{}", name.value),
            Expr::Aggregate(call) => {
                write!(f, "{}(", call.function.name())?;
                if call.distinct {
                    f.write_str("distinct ")?;
                }
                write!(f, "{})", call.argument)
            }
            Expr::Function(call) => {
                write!(f, "{}(", call.name.value)?;
                write_list(f, &call.arguments)?;
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

fn not_kw(negated: bool) -> &'static str {
    if negated {
        "not "
    } else {
        ""
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::And(ps) | Predicate::Or(ps) if ps.is_empty() => {
                // neutral elements
                if matches!(self, Predicate::And(_)) {
                    f.write_str("1 = 1")
                } else {
                    f.write_str("1 = 0")
                }
            }
            Predicate::And(ps) => {
                for (i, p) in ps.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" and ")?;
                    }
                    write_operand(f, p, 2)?;
                }
                Ok(())
            }
            Predicate::Or(ps) => {
                for (i, p) in ps.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" or ")?;
                    }
                    write_operand(f, p, 1)?;
                }
                Ok(())
            }
            Predicate::Not(inner) => {
                f.write_str("not ")?;
                write_operand(f, inner, 3)
            }
            Predicate::Group(inner) => write!(f, "({})", inner),
            Predicate::Comparison { left, op, right } => write!(f, "{} {} {}", left, op, right),
            Predicate::In {
                expr,
                source,
                negated,
            } => {
                write!(f, "{} {}in ", expr, not_kw(*negated))?;
                match source {
                    InSource::List(items) => {
                        f.write_str("(")?;
                        write_list(f, items)?;
                        f.write_str(")")
                    }
                    InSource::Parameter(name) => write!(f, ":{}", name.value),
                    InSource::Subquery(query) => write!(f, "({})", query),
                }
            }
            Predicate::Between {
                expr,
                low,
                high,
                negated,
            } => write!(f, "{} {}between {} and {}", expr, not_kw(*negated), low, high),
            Predicate::IsNull { expr, negated } => {
                write!(f, "{} is {}null", expr, not_kw(*negated))
            }
            Predicate::Like {
                expr,
                pattern,
                escape,
                negated,
            } => {
                write!(f, "{} {}like {}", expr, not_kw(*negated), pattern)?;
                if let Some(escape) = escape {
                    write!(f, " escape {}", Literal::String(escape.value.clone()))?;
                }
                Ok(())
            }
            Predicate::Exists { subquery, negated } => {
                write!(f, "{}exists ({})", not_kw(*negated), subquery)
            }
        }
    }
}
