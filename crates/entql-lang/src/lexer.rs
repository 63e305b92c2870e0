//! Lexer for the ENTQL query language using logos.

use crate::error::LexError;
use crate::span::Span;
use logos::Logos;
use std::fmt;

/// Reasons the logos automaton can reject input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LexErrorKind {
    #[default]
    UnrecognizedCharacter,
    NumberOutOfRange,
}

/// Token types for the query language.
///
/// Keywords are matched case-insensitively. Aggregate and scalar function
/// names are plain identifiers; the parser recognises them by the following
/// `(`.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexErrorKind)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"--[^\n]*")]
#[logos(skip r"/\*([^*]|\*+[^*/])*\*+/")]
pub enum Token {
    // Clause keywords
    #[token("select", ignore(ascii_case))]
    Select,
    #[token("distinct", ignore(ascii_case))]
    Distinct,
    #[token("from", ignore(ascii_case))]
    From,
    #[token("as", ignore(ascii_case))]
    As,
    #[token("join", ignore(ascii_case))]
    Join,
    #[token("inner", ignore(ascii_case))]
    Inner,
    #[token("left", ignore(ascii_case))]
    Left,
    #[token("outer", ignore(ascii_case))]
    Outer,
    #[token("on", ignore(ascii_case))]
    On,
    #[token("where", ignore(ascii_case))]
    Where,
    #[token("group", ignore(ascii_case))]
    Group,
    #[token("having", ignore(ascii_case))]
    Having,
    #[token("order", ignore(ascii_case))]
    Order,
    #[token("by", ignore(ascii_case))]
    By,
    #[token("asc", ignore(ascii_case))]
    Asc,
    #[token("desc", ignore(ascii_case))]
    Desc,
    #[token("limit", ignore(ascii_case))]
    Limit,
    #[token("offset", ignore(ascii_case))]
    Offset,

    // Predicate keywords
    #[token("and", ignore(ascii_case))]
    And,
    #[token("or", ignore(ascii_case))]
    Or,
    #[token("not", ignore(ascii_case))]
    Not,
    #[token("in", ignore(ascii_case))]
    In,
    #[token("between", ignore(ascii_case))]
    Between,
    #[token("is", ignore(ascii_case))]
    Is,
    #[token("like", ignore(ascii_case))]
    Like,
    #[token("escape", ignore(ascii_case))]
    Escape,
    #[token("exists", ignore(ascii_case))]
    Exists,

    // Literal keywords
    #[token("null", ignore(ascii_case))]
    Null,
    #[token("true", ignore(ascii_case))]
    True,
    #[token("false", ignore(ascii_case))]
    False,

    // Comparison operators
    #[token("=")]
    Eq,
    #[token("<>")]
    #[token("!=")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("-")]
    Minus,

    // Punctuation
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_$]*", |lex| lex.slice().to_string())]
    Ident(String),

    /// Double-quoted identifier; `""` escapes a quote.
    #[regex(r#""([^"]|"")*""#, |lex| unquote(lex.slice(), '"'))]
    QuotedIdent(String),

    /// Named parameter marker `:name`, stored without the colon.
    #[regex(r":[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice()[1..].to_string())]
    Param(String),

    /// Single-quoted string; `''` escapes a quote.
    #[regex(r"'([^']|'')*'", |lex| unquote(lex.slice(), '\''))]
    Str(String),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().map_err(|_| LexErrorKind::NumberOutOfRange))]
    Int(i64),

    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().map_err(|_| LexErrorKind::NumberOutOfRange))]
    Decimal(f64),

    // Never surfaced: converted to a LexError by the Lexer.
    #[regex(r"'([^']|'')*", priority = 1)]
    UnterminatedString,
    #[regex(r#""([^"]|"")*"#, priority = 1)]
    UnterminatedQuotedIdent,
    #[regex(r"/\*([^*]|\*+[^*/])*\**", priority = 1)]
    UnterminatedComment,
}

/// Coarse token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Keyword,
    Identifier,
    Parameter,
    Literal,
    Operator,
    Punctuation,
}

impl Token {
    pub fn kind(&self) -> TokenKind {
        match self {
            Token::Ident(_) | Token::QuotedIdent(_) => TokenKind::Identifier,
            Token::Param(_) => TokenKind::Parameter,
            Token::Str(_) | Token::Int(_) | Token::Decimal(_) => TokenKind::Literal,
            Token::Eq
            | Token::Ne
            | Token::Le
            | Token::Ge
            | Token::Lt
            | Token::Gt
            | Token::Minus => TokenKind::Operator,
            Token::Dot | Token::Comma | Token::LParen | Token::RParen => TokenKind::Punctuation,
            Token::UnterminatedString
            | Token::UnterminatedQuotedIdent
            | Token::UnterminatedComment => TokenKind::Punctuation,
            _ => TokenKind::Keyword,
        }
    }

    /// Canonical lowercase spelling of a keyword token.
    pub fn keyword_text(&self) -> Option<&'static str> {
        let text = match self {
            Token::Select => "select",
            Token::Distinct => "distinct",
            Token::From => "from",
            Token::As => "as",
            Token::Join => "join",
            Token::Inner => "inner",
            Token::Left => "left",
            Token::Outer => "outer",
            Token::On => "on",
            Token::Where => "where",
            Token::Group => "group",
            Token::Having => "having",
            Token::Order => "order",
            Token::By => "by",
            Token::Asc => "asc",
            Token::Desc => "desc",
            Token::Limit => "limit",
            Token::Offset => "offset",
            Token::And => "and",
            Token::Or => "or",
            Token::Not => "not",
            Token::In => "in",
            Token::Between => "between",
            Token::Is => "is",
            Token::Like => "like",
            Token::Escape => "escape",
            Token::Exists => "exists",
            Token::Null => "null",
            Token::True => "true",
            Token::False => "false",
            _ => return None,
        };
        Some(text)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(kw) = self.keyword_text() {
            return write!(f, "keyword '{}'", kw.to_ascii_uppercase());
        }
        match self {
            Token::Ident(name) | Token::QuotedIdent(name) => write!(f, "identifier '{}'", name),
            Token::Param(name) => write!(f, "parameter ':{}'", name),
            Token::Str(s) => write!(f, "string '{}'", s),
            Token::Int(i) => write!(f, "number {}", i),
            Token::Decimal(d) => write!(f, "number {}", d),
            Token::Eq => write!(f, "'='"),
            Token::Ne => write!(f, "'<>'"),
            Token::Le => write!(f, "'<='"),
            Token::Ge => write!(f, "'>='"),
            Token::Lt => write!(f, "'<'"),
            Token::Gt => write!(f, "'>'"),
            Token::Minus => write!(f, "'-'"),
            Token::Dot => write!(f, "'.'"),
            Token::Comma => write!(f, "','"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            _ => write!(f, "{:?}", self),
        }
    }
}

/// Strip the surrounding quotes and collapse doubled quote characters.
fn unquote(raw: &str, quote: char) -> String {
    let inner = &raw[1..raw.len() - 1];
    let doubled: String = [quote, quote].iter().collect();
    inner.replace(&doubled, &quote.to_string())
}

/// A token with its span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

impl SpannedToken {
    /// The exact source text of this token.
    pub fn lexeme<'a>(&self, source: &'a str) -> &'a str {
        &source[self.span.start..self.span.end]
    }
}

/// Lexer that produces spanned tokens or the first lexical error.
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
    failed: bool,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
            failed: false,
        }
    }

    pub fn source(&self) -> &'source str {
        self.inner.source()
    }

    fn error_for(&self, kind: LexErrorKind, span: Span) -> LexError {
        match kind {
            LexErrorKind::UnrecognizedCharacter => {
                let ch = self.inner.slice().chars().next().unwrap_or('?');
                LexError::new(format!("unrecognized character '{}'", ch), span)
            }
            LexErrorKind::NumberOutOfRange => LexError::new(
                format!("numeric literal '{}' is out of range", self.inner.slice()),
                span,
            ),
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<SpannedToken, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let result = self.inner.next()?;
        let span: Span = self.inner.span().into();

        let item = match result {
            Ok(Token::UnterminatedString) => {
                Err(LexError::new("unterminated string literal", span))
            }
            Ok(Token::UnterminatedQuotedIdent) => {
                Err(LexError::new("unterminated quoted identifier", span))
            }
            Ok(Token::UnterminatedComment) => Err(LexError::new("unterminated comment", span)),
            Ok(token) => Ok(SpannedToken { token, span }),
            Err(kind) => Err(self.error_for(kind, span)),
        };
        self.failed = item.is_err();
        Some(item)
    }
}

/// Tokenize a source string, stopping at the first lexical error.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, LexError> {
    Lexer::new(source).collect()
}

/// Whether `word` lexes as exactly one reserved keyword.
pub fn is_keyword(word: &str) -> bool {
    let mut lex = Token::lexer(word);
    match (lex.next(), lex.next()) {
        (Some(Ok(token)), None) => token.keyword_text().is_some(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_simple_query() {
        assert_eq!(
            tokens("select e from Customer e"),
            vec![
                Token::Select,
                Token::Ident("e".into()),
                Token::From,
                Token::Ident("Customer".into()),
                Token::Ident("e".into()),
            ]
        );
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(
            tokens("SELECT Distinct e FROM"),
            vec![
                Token::Select,
                Token::Distinct,
                Token::Ident("e".into()),
                Token::From
            ]
        );
    }

    #[test]
    fn test_parameter_marker_is_single_token() {
        let toks = tokenize("e.name = :name").unwrap();
        assert_eq!(toks.len(), 5);
        assert_eq!(toks[4].token, Token::Param("name".into()));
        assert_eq!(toks[4].token.kind(), TokenKind::Parameter);
        assert_eq!(toks[4].span, Span::new(9, 14));
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            tokens("= <> != < <= > >="),
            vec![
                Token::Eq,
                Token::Ne,
                Token::Ne,
                Token::Lt,
                Token::Le,
                Token::Gt,
                Token::Ge
            ]
        );
    }

    #[test]
    fn test_string_literal_with_doubled_quote() {
        assert_eq!(tokens("'it''s'"), vec![Token::Str("it's".into())]);
        assert_eq!(tokens("''"), vec![Token::Str(String::new())]);
    }

    #[test]
    fn test_quoted_identifier() {
        assert_eq!(tokens(r#""order""#), vec![Token::QuotedIdent("order".into())]);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens("42 3.5"),
            vec![Token::Int(42), Token::Decimal(3.5)]
        );
    }

    #[test]
    fn test_comments_do_not_shift_offsets() {
        let source = "select /* projection */ e -- trailing\nfrom Customer e";
        let toks = tokenize(source).unwrap();
        assert_eq!(toks[1].token, Token::Ident("e".into()));
        assert_eq!(toks[1].span.start, source.find(" e ").unwrap() + 1);
        assert_eq!(toks[2].token, Token::From);
        assert_eq!(toks[2].lexeme(source), "from");
        assert_eq!(toks[2].span.start, source.find("from").unwrap());
    }

    #[test]
    fn test_unterminated_string_reports_opening_offset() {
        let err = tokenize("select e from Customer e where e.name = 'open").unwrap_err();
        assert_eq!(err.message, "unterminated string literal");
        assert_eq!(err.offset(), 40);
    }

    #[test]
    fn test_unterminated_quoted_identifier() {
        let err = tokenize(r#"select "e from Customer e"#).unwrap_err();
        assert_eq!(err.message, "unterminated quoted identifier");
        assert_eq!(err.offset(), 7);
    }

    #[test]
    fn test_unterminated_comment() {
        let err = tokenize("select e /* never closed").unwrap_err();
        assert_eq!(err.message, "unterminated comment");
        assert_eq!(err.offset(), 9);
    }

    #[test]
    fn test_unrecognized_character() {
        let err = tokenize("select e from Customer e where e.id = #1").unwrap_err();
        assert!(err.message.contains("'#'"));
        assert_eq!(err.offset(), 38);
    }

    #[test]
    fn test_integer_overflow() {
        let err = tokenize("99999999999999999999999").unwrap_err();
        assert!(err.message.contains("out of range"));
    }

    #[test]
    fn test_token_kinds() {
        let toks = tokenize("select e.id , 'x' = :p").unwrap();
        let kinds: Vec<TokenKind> = toks.iter().map(|t| t.token.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Keyword,
                TokenKind::Identifier,
                TokenKind::Punctuation,
                TokenKind::Identifier,
                TokenKind::Punctuation,
                TokenKind::Literal,
                TokenKind::Operator,
                TokenKind::Parameter,
            ]
        );
    }

    #[test]
    fn test_is_keyword() {
        assert!(is_keyword("order"));
        assert!(is_keyword("SELECT"));
        assert!(!is_keyword("orders"));
        assert!(!is_keyword("count"));
        assert!(!is_keyword("order by"));
    }
}
