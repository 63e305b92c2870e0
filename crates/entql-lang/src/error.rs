//! Error types for lexing and parsing.

use crate::span::{offset_to_line_col, Span};
use thiserror::Error;

/// Malformed character sequence in the query text.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct LexError {
    pub message: String,
    /// Location of the offending input; `span.start` is the reported offset.
    pub span: Span,
}

impl LexError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }

    /// Byte offset into the original text.
    pub fn offset(&self) -> usize {
        self.span.start
    }
}

/// Grammar violation: the parser wanted one thing and saw another.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("expected {expected}, found {found}")]
pub struct ParseError {
    /// Human readable description of what the grammar allows here.
    pub expected: String,
    /// Description of the token actually encountered.
    pub found: String,
    pub span: Span,
    /// Optional hint for fixing the error.
    pub hint: Option<String>,
}

impl ParseError {
    pub fn new(expected: impl Into<String>, found: impl Into<String>, span: Span) -> Self {
        Self {
            expected: expected.into(),
            found: found.into(),
            span,
            hint: None,
        }
    }

    /// Add a hint to the error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn offset(&self) -> usize {
        self.span.start
    }
}

/// Syntactically valid input that uses a construct the engine does not support.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("unsupported construct: {construct}")]
pub struct UnsupportedConstruct {
    pub construct: String,
    pub span: Span,
}

impl UnsupportedConstruct {
    pub fn new(construct: impl Into<String>, span: Span) -> Self {
        Self {
            construct: construct.into(),
            span,
        }
    }
}

/// Any failure produced while turning text into an AST.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LangError {
    #[error("lex error: {0}")]
    Lex(#[from] LexError),
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("{0}")]
    Unsupported(#[from] UnsupportedConstruct),
}

impl LangError {
    pub fn span(&self) -> Span {
        match self {
            LangError::Lex(e) => e.span,
            LangError::Parse(e) => e.span,
            LangError::Unsupported(e) => e.span,
        }
    }

    /// Render the error with the offending source line and a caret marker.
    pub fn format_with_source(&self, source: &str) -> String {
        let hint = match self {
            LangError::Parse(e) => e.hint.as_deref(),
            _ => None,
        };
        render_with_source(&self.to_string(), self.span(), hint, source)
    }
}

/// Shared renderer for errors that point into the query text.
pub fn render_with_source(message: &str, span: Span, hint: Option<&str>, source: &str) -> String {
    let mut result = format!("error: {}\n", message);
    if span.is_synthetic() {
        return result;
    }

    let (line, col) = offset_to_line_col(source, span.start);
    result.push_str(&format!("  --> line {}:{}\n", line, col));

    if let Some(source_line) = source.lines().nth(line - 1) {
        result.push_str(&format!("   |\n{:3}| {}\n   |", line, source_line));
        for _ in 0..col {
            result.push(' ');
        }
        result.push('^');

        let remaining = source_line.chars().count().saturating_sub(col);
        for _ in 1..span.len().min(remaining + 1) {
            result.push('~');
        }
        result.push('\n');
    }

    if let Some(hint) = hint {
        result.push_str(&format!("   = hint: {}\n", hint));
    }

    result
}
