//! ENTQL Query Language
//!
//! This crate provides the lexer, parser and printer for ENTQL, an
//! entity-oriented query language in the JPQL family. Queries navigate typed
//! attribute paths rooted at range aliases rather than raw tables.
//!
//! # Query Language Syntax
//!
//! ```text
//! select e from Customer e where e.name = :name
//! select distinct o from Customer c join c.orders o where o.total > 100
//! select c from Customer c left join Address a on a.owner = c
//! select count(e.id), e.region from Customer e group by e.region
//! select c from Customer c where exists (select o from Order o where o.customer = c)
//! select e from Customer e order by e.name desc limit 10 offset 20
//! ```
//!
//! Keywords are case-insensitive. `-- ...` and `/* ... */` comments are
//! ignored without shifting the offsets reported for later tokens.
//!
//! # Usage
//!
//! ```rust
//! use entql_lang::parse;
//!
//! let query = parse("select e from Customer e where e.name = :name").unwrap();
//! assert_eq!(query.from.root.entity.value, "Customer");
//!
//! // Printing a query yields text that parses back to the same tree.
//! assert_eq!(
//!     query.to_string(),
//!     "select e from Customer e where e.name = :name"
//! );
//! ```

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod printer;
pub mod span;

// Re-export main types
pub use ast::{
    AggregateCall, AggregateFunction, ComparisonOp, Expr, FromClause, FunctionCall, InSource,
    JoinKind, JoinRange, JoinTarget, Literal, OrderItem, PathExpr, Predicate, Query, RangeRef,
    SelectItem, SortDirection,
};
pub use error::{LangError, LexError, ParseError, UnsupportedConstruct};
pub use lexer::{SpannedToken, Token, TokenKind};
pub use parser::{parse_with_depth, Parser, DEFAULT_MAX_SUBQUERY_DEPTH};
pub use span::{Span, Spanned};

/// Parse a source string into a query AST.
///
/// # Example
///
/// ```rust
/// use entql_lang::parse;
///
/// let query = parse("select e from Customer e").unwrap();
/// assert!(query.filter.is_none());
/// ```
pub fn parse(source: &str) -> Result<Query, LangError> {
    parser::parse(source)
}

/// Tokenize a source string without parsing it.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, LexError> {
    lexer::tokenize(source)
}

/// Parse a standalone attribute path such as `e.customer.name`.
pub fn parse_path(source: &str) -> Result<PathExpr, LangError> {
    parser::parse_path(source)
}
