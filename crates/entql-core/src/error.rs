//! Error types for the rewrite pipeline.

use entql_lang::error::render_with_source;
use entql_lang::{LangError, Span};
use thiserror::Error;

/// Failures produced while rewriting a single query.
///
/// The first problem encountered is reported; stages run in the order
/// lex, parse, bind, transform, serialize.
#[derive(Debug, Clone, Error)]
pub enum RewriteError {
    /// Lexing, parsing, or an unsupported construct.
    #[error("{0}")]
    Lang(#[from] LangError),

    /// An alias or attribute path does not resolve against the schema.
    #[error("unresolved path '{}': {reason}", display_path(.alias, .path))]
    UnresolvedPath {
        alias: String,
        /// Dotted attribute chain after the alias; empty for a bare alias.
        path: String,
        reason: String,
        span: Span,
    },

    /// A caller-declared alias is declared more than once.
    #[error("alias '{alias}' is declared more than once")]
    AliasCollision { alias: String, span: Span },

    /// A criterion contributed a parameter name that is already taken.
    #[error("criterion '{criterion}' contributes parameter ':{parameter}' already owned by {owner}")]
    CriterionConflict {
        criterion: String,
        parameter: String,
        owner: String,
    },

    /// The query uses a parameter marker the caller supplied no value for.
    #[error("no value supplied for parameter ':{name}'")]
    UnboundParameter { name: String, span: Span },

    /// A criterion's contribution function failed.
    #[error("criterion '{criterion}' failed: {message}")]
    Criterion { criterion: String, message: String },

    /// Invalid engine, schema, or registry configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

fn display_path(alias: &str, path: &str) -> String {
    if path.is_empty() {
        alias.to_string()
    } else {
        format!("{}.{}", alias, path)
    }
}

impl RewriteError {
    /// Location in the query text, when the error points at one.
    pub fn span(&self) -> Option<Span> {
        let span = match self {
            RewriteError::Lang(e) => e.span(),
            RewriteError::UnresolvedPath { span, .. }
            | RewriteError::AliasCollision { span, .. }
            | RewriteError::UnboundParameter { span, .. } => *span,
            _ => return None,
        };
        (!span.is_synthetic()).then_some(span)
    }

    /// Render the error against the original query text.
    pub fn format_with_source(&self, source: &str) -> String {
        match self {
            RewriteError::Lang(e) => e.format_with_source(source),
            other => render_with_source(
                &other.to_string(),
                other.span().unwrap_or(Span::SYNTHETIC),
                None,
                source,
            ),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        RewriteError::Config(message.into())
    }
}

/// Result type for rewrite operations.
pub type RewriteResult<T> = Result<T, RewriteError>;
