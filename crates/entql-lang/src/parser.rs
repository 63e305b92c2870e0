//! Recursive descent parser for the query language.

use crate::ast::*;
use crate::error::{LangError, ParseError, UnsupportedConstruct};
use crate::lexer::{tokenize, SpannedToken, Token};
use crate::span::{Span, Spanned};

type ParseResult<T> = Result<T, LangError>;

/// Default number of subquery levels allowed below the outermost query.
pub const DEFAULT_MAX_SUBQUERY_DEPTH: usize = 1;

/// Parser for the ENTQL query language.
pub struct Parser<'source> {
    tokens: Vec<SpannedToken>,
    pos: usize,
    source: &'source str,
    depth: usize,
    max_subquery_depth: usize,
}

impl<'source> Parser<'source> {
    /// Tokenize `source` and prepare to parse it.
    pub fn new(source: &'source str) -> Result<Self, LangError> {
        Ok(Self {
            tokens: tokenize(source)?,
            pos: 0,
            source,
            depth: 0,
            max_subquery_depth: DEFAULT_MAX_SUBQUERY_DEPTH,
        })
    }

    pub fn with_max_subquery_depth(mut self, depth: usize) -> Self {
        self.max_subquery_depth = depth;
        self
    }

    /// Parse a complete query; trailing input is an error.
    pub fn parse_query(&mut self) -> ParseResult<Query> {
        let query = self.parse_select()?;
        self.expect_end("end of query")?;
        Ok(query)
    }

    /// Parse a standalone attribute path such as `e.customer.name`.
    pub fn parse_path_only(&mut self) -> ParseResult<PathExpr> {
        let alias = self.expect_ident("alias")?;
        let path = self.parse_path_tail(alias)?;
        self.expect_end("end of path")?;
        Ok(path)
    }

    // ------------------------------------------------------------------
    // Statement structure
    // ------------------------------------------------------------------

    fn parse_select(&mut self) -> ParseResult<Query> {
        let start = self.expect_token(Token::Select, "SELECT")?.span;
        let distinct = self.eat(&Token::Distinct).is_some();

        let mut select = vec![self.parse_select_item()?];
        while self.eat(&Token::Comma).is_some() {
            select.push(self.parse_select_item()?);
        }

        self.expect_token(Token::From, "FROM")?;
        let root = self.parse_range()?;

        let mut joins = Vec::new();
        while self.at_join() {
            joins.push(self.parse_join()?);
        }

        let filter = if self.eat(&Token::Where).is_some() {
            Some(self.parse_predicate()?)
        } else {
            None
        };

        let mut group_by = Vec::new();
        if self.eat(&Token::Group).is_some() {
            self.expect_token(Token::By, "BY")?;
            group_by.push(self.parse_expr()?);
            while self.eat(&Token::Comma).is_some() {
                group_by.push(self.parse_expr()?);
            }
        }

        let having = if self.eat(&Token::Having).is_some() {
            Some(self.parse_predicate()?)
        } else {
            None
        };

        let mut order_by = Vec::new();
        if self.eat(&Token::Order).is_some() {
            self.expect_token(Token::By, "BY")?;
            order_by.push(self.parse_order_item()?);
            while self.eat(&Token::Comma).is_some() {
                order_by.push(self.parse_order_item()?);
            }
        }

        let limit = if self.eat(&Token::Limit).is_some() {
            Some(self.parse_count("LIMIT")?)
        } else {
            None
        };
        let offset = if self.eat(&Token::Offset).is_some() {
            Some(self.parse_count("OFFSET")?)
        } else {
            None
        };

        Ok(Query {
            distinct,
            select,
            from: FromClause { root, joins },
            filter,
            group_by,
            having,
            order_by,
            limit,
            offset,
            span: start.merge(self.previous_span()),
        })
    }

    fn parse_select_item(&mut self) -> ParseResult<SelectItem> {
        let expr = self.parse_expr()?;
        let alias = self.parse_optional_alias()?;
        let span = match &alias {
            Some(a) => expr.span().merge(a.span),
            None => expr.span(),
        };
        Ok(SelectItem { expr, alias, span })
    }

    /// `[AS] ident`, where the identifier is optional unless AS was written.
    fn parse_optional_alias(&mut self) -> ParseResult<Option<Spanned<String>>> {
        if self.eat(&Token::As).is_some() {
            return Ok(Some(self.expect_ident("alias")?));
        }
        if self.at_ident() {
            return Ok(Some(self.expect_ident("alias")?));
        }
        Ok(None)
    }

    fn parse_range(&mut self) -> ParseResult<RangeRef> {
        let entity = self.expect_entity_name("entity name")?;
        self.eat(&Token::As);
        let alias = self.expect_ident("range alias").map_err(|e| match e {
            LangError::Parse(p) => {
                LangError::Parse(p.with_hint("every range needs an alias, e.g. 'from Customer c'"))
            }
            other => other,
        })?;
        Ok(RangeRef { entity, alias })
    }

    fn at_join(&self) -> bool {
        matches!(
            self.peek_token(),
            Some(Token::Join) | Some(Token::Inner) | Some(Token::Left)
        )
    }

    fn parse_join(&mut self) -> ParseResult<JoinRange> {
        let start = self.current_span();
        let kind = match self.peek_token() {
            Some(Token::Left) => {
                self.advance();
                self.eat(&Token::Outer);
                JoinKind::Left
            }
            Some(Token::Inner) => {
                self.advance();
                JoinKind::Inner
            }
            _ => JoinKind::Inner,
        };
        self.expect_token(Token::Join, "JOIN")?;

        let head_is_keyword = self
            .peek_token()
            .is_some_and(|t| t.keyword_text().is_some());
        let head = self.expect_entity_name("join target")?;
        let target = if !head_is_keyword && self.peek_token() == Some(&Token::Dot) {
            JoinTarget::Path(self.parse_path_tail(head)?)
        } else {
            JoinTarget::Entity(head)
        };

        self.eat(&Token::As);
        let alias = self.expect_ident("join alias")?;

        let condition = if self.eat(&Token::On).is_some() {
            Some(self.parse_predicate()?)
        } else {
            None
        };

        if condition.is_none() {
            if let JoinTarget::Entity(entity) = &target {
                let (found, span) = self.describe_current();
                return Err(ParseError::new("ON", found, span)
                    .with_hint(format!(
                        "a join to entity '{}' needs an ON condition",
                        entity.value
                    ))
                    .into());
            }
        }

        Ok(JoinRange {
            kind,
            target,
            alias,
            condition,
            span: start.merge(self.previous_span()),
        })
    }

    fn parse_order_item(&mut self) -> ParseResult<OrderItem> {
        let expr = self.parse_expr()?;
        let direction = match self.peek_token() {
            Some(Token::Asc) => {
                self.advance();
                SortDirection::Asc
            }
            Some(Token::Desc) => {
                self.advance();
                SortDirection::Desc
            }
            _ => SortDirection::Asc,
        };
        let span = expr.span().merge(self.previous_span());
        Ok(OrderItem {
            expr,
            direction,
            span,
        })
    }

    fn parse_count(&mut self, clause: &str) -> ParseResult<Spanned<u64>> {
        match self.peek().cloned() {
            Some(SpannedToken {
                token: Token::Int(n),
                span,
            }) => {
                self.advance();
                Ok(Spanned::new(n as u64, span))
            }
            _ => {
                let (found, span) = self.describe_current();
                Err(ParseError::new(format!("non-negative integer after {}", clause), found, span)
                    .into())
            }
        }
    }

    /// Parse a subquery that starts at the current `SELECT`.
    fn parse_subquery(&mut self) -> ParseResult<Query> {
        let span = self.current_span();
        if self.depth >= self.max_subquery_depth {
            return Err(UnsupportedConstruct::new(
                format!(
                    "subquery nested more than {} level(s) deep",
                    self.max_subquery_depth
                ),
                span,
            )
            .into());
        }
        self.depth += 1;
        let result = self.parse_select();
        self.depth -= 1;
        result
    }

    // ------------------------------------------------------------------
    // Predicates
    // ------------------------------------------------------------------

    fn parse_predicate(&mut self) -> ParseResult<Predicate> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> ParseResult<Predicate> {
        let mut operands = vec![self.parse_and()?];
        while self.eat(&Token::Or).is_some() {
            operands.push(self.parse_and()?);
        }
        Ok(Predicate::or(operands))
    }

    fn parse_and(&mut self) -> ParseResult<Predicate> {
        let mut operands = vec![self.parse_not()?];
        while self.eat(&Token::And).is_some() {
            operands.push(self.parse_not()?);
        }
        Ok(Predicate::and(operands))
    }

    fn parse_not(&mut self) -> ParseResult<Predicate> {
        if self.eat(&Token::Not).is_some() {
            if self.peek_token() == Some(&Token::Exists) {
                return match self.parse_atom()? {
                    Predicate::Exists { subquery, negated } => Ok(Predicate::Exists {
                        subquery,
                        negated: !negated,
                    }),
                    other => Ok(Predicate::negate(other)),
                };
            }
            return Ok(Predicate::negate(self.parse_not()?));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> ParseResult<Predicate> {
        match self.peek_token() {
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_predicate()?;
                self.expect_token(Token::RParen, "')'")?;
                Ok(Predicate::group(inner))
            }
            Some(Token::Exists) => {
                self.advance();
                self.expect_token(Token::LParen, "'(' after EXISTS")?;
                let subquery = self.parse_subquery()?;
                self.expect_token(Token::RParen, "')'")?;
                Ok(Predicate::Exists {
                    subquery: Box::new(subquery),
                    negated: false,
                })
            }
            _ => {
                let expr = self.parse_expr()?;
                self.parse_comparison_tail(expr)
            }
        }
    }

    fn parse_comparison_tail(&mut self, expr: Expr) -> ParseResult<Predicate> {
        let op = match self.peek_token() {
            Some(Token::Eq) => Some(ComparisonOp::Eq),
            Some(Token::Ne) => Some(ComparisonOp::Ne),
            Some(Token::Lt) => Some(ComparisonOp::Lt),
            Some(Token::Le) => Some(ComparisonOp::Le),
            Some(Token::Gt) => Some(ComparisonOp::Gt),
            Some(Token::Ge) => Some(ComparisonOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let right = self.parse_expr()?;
            return Ok(Predicate::Comparison {
                left: expr,
                op,
                right,
            });
        }

        if self.eat(&Token::Is).is_some() {
            let negated = self.eat(&Token::Not).is_some();
            self.expect_token(Token::Null, "NULL")?;
            return Ok(Predicate::IsNull { expr, negated });
        }

        let negated = self.eat(&Token::Not).is_some();
        match self.peek_token() {
            Some(Token::In) => {
                self.advance();
                let source = self.parse_in_source()?;
                Ok(Predicate::In {
                    expr,
                    source,
                    negated,
                })
            }
            Some(Token::Between) => {
                self.advance();
                let low = self.parse_expr()?;
                self.expect_token(Token::And, "AND")?;
                let high = self.parse_expr()?;
                Ok(Predicate::Between {
                    expr,
                    low,
                    high,
                    negated,
                })
            }
            Some(Token::Like) => {
                self.advance();
                let pattern = self.parse_expr()?;
                let escape = if self.eat(&Token::Escape).is_some() {
                    Some(self.expect_string("escape character")?)
                } else {
                    None
                };
                Ok(Predicate::Like {
                    expr,
                    pattern,
                    escape,
                    negated,
                })
            }
            _ => {
                let expected = if negated {
                    "IN, BETWEEN or LIKE"
                } else {
                    "comparison operator"
                };
                let (found, span) = self.describe_current();
                Err(ParseError::new(expected, found, span).into())
            }
        }
    }

    fn parse_in_source(&mut self) -> ParseResult<InSource> {
        if let Some(SpannedToken {
            token: Token::Param(name),
            span,
        }) = self.peek().cloned()
        {
            self.advance();
            return Ok(InSource::Parameter(Spanned::new(name, span)));
        }

        self.expect_token(Token::LParen, "'(' or parameter after IN")?;
        if self.peek_token() == Some(&Token::Select) {
            let subquery = self.parse_subquery()?;
            self.expect_token(Token::RParen, "')'")?;
            return Ok(InSource::Subquery(Box::new(subquery)));
        }

        let mut items = vec![self.parse_expr()?];
        while self.eat(&Token::Comma).is_some() {
            items.push(self.parse_expr()?);
        }
        self.expect_token(Token::RParen, "')'")?;
        Ok(InSource::List(items))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        let Some(tok) = self.peek().cloned() else {
            return Err(ParseError::new("expression", "end of input", self.end_span()).into());
        };

        match tok.token {
            Token::Ident(name) if self.peek_token_at(1) == Some(&Token::LParen) => {
                self.advance();
                self.parse_call(Spanned::new(name, tok.span))
            }
            Token::Ident(_) | Token::QuotedIdent(_) => {
                let alias = self.expect_ident("expression")?;
                Ok(Expr::Path(self.parse_path_tail(alias)?))
            }
            Token::Param(name) => {
                self.advance();
                Ok(Expr::Parameter(Spanned::new(name, tok.span)))
            }
            Token::Str(s) => {
                self.advance();
                Ok(literal(Literal::String(s), tok.span))
            }
            Token::Int(n) => {
                self.advance();
                Ok(literal(Literal::Int(n), tok.span))
            }
            Token::Decimal(d) => {
                self.advance();
                Ok(literal(Literal::Decimal(d), tok.span))
            }
            Token::True => {
                self.advance();
                Ok(literal(Literal::Bool(true), tok.span))
            }
            Token::False => {
                self.advance();
                Ok(literal(Literal::Bool(false), tok.span))
            }
            Token::Null => {
                self.advance();
                Ok(literal(Literal::Null, tok.span))
            }
            Token::Minus => {
                self.advance();
                match self.peek().cloned() {
                    Some(SpannedToken {
                        token: Token::Int(n),
                        span,
                    }) => {
                        self.advance();
                        Ok(literal(Literal::Int(-n), tok.span.merge(span)))
                    }
                    Some(SpannedToken {
                        token: Token::Decimal(d),
                        span,
                    }) => {
                        self.advance();
                        Ok(literal(Literal::Decimal(-d), tok.span.merge(span)))
                    }
                    _ => {
                        let (found, span) = self.describe_current();
                        Err(ParseError::new("number after '-'", found, span).into())
                    }
                }
            }
            other => {
                let mut err = ParseError::new("expression", other.to_string(), tok.span);
                if other == Token::Eq {
                    err = err.with_hint("use '=' for equality comparison");
                }
                Err(err.into())
            }
        }
    }

    /// `name(...)` where the name has already been consumed.
    fn parse_call(&mut self, name: Spanned<String>) -> ParseResult<Expr> {
        self.expect_token(Token::LParen, "'('")?;
        let distinct = self.eat(&Token::Distinct).is_some();

        let mut arguments = Vec::new();
        if self.peek_token() != Some(&Token::RParen) {
            arguments.push(self.parse_expr()?);
            while self.eat(&Token::Comma).is_some() {
                arguments.push(self.parse_expr()?);
            }
        }
        let close = self.expect_token(Token::RParen, "')'")?;
        let span = name.span.merge(close.span);

        match AggregateFunction::from_name(&name.value) {
            Some(function) => {
                if arguments.len() != 1 {
                    return Err(ParseError::new(
                        "exactly one argument",
                        format!("{} arguments", arguments.len()),
                        span,
                    )
                    .with_hint(format!("{} takes a single expression", function.name()))
                    .into());
                }
                let argument = arguments.remove(0);
                Ok(Expr::Aggregate(AggregateCall {
                    function,
                    distinct,
                    argument: Box::new(argument),
                    span,
                }))
            }
            None if distinct => Err(ParseError::new(
                "argument",
                "keyword 'DISTINCT'",
                name.span,
            )
            .with_hint("DISTINCT is only allowed inside aggregate calls")
            .into()),
            None => Ok(Expr::Function(FunctionCall {
                name,
                arguments,
                span,
            })),
        }
    }

    /// Consume `.attr` segments following an already-parsed alias.
    fn parse_path_tail(&mut self, alias: Spanned<String>) -> ParseResult<PathExpr> {
        let mut span = alias.span;
        let mut attributes = Vec::new();
        while self.eat(&Token::Dot).is_some() {
            let attr = self.expect_attribute_name()?;
            span = span.merge(attr.span);
            attributes.push(attr);
        }
        Ok(PathExpr {
            alias,
            attributes,
            span,
        })
    }

    /// Attribute names may be any identifier, including reserved words.
    fn expect_attribute_name(&mut self) -> ParseResult<Spanned<String>> {
        match self.peek().cloned() {
            Some(SpannedToken {
                token: Token::Ident(name) | Token::QuotedIdent(name),
                span,
            }) => {
                self.advance();
                Ok(Spanned::new(name, span))
            }
            Some(tok) if tok.token.keyword_text().is_some() => {
                self.advance();
                Ok(Spanned::new(tok.lexeme(self.source).to_string(), tok.span))
            }
            _ => {
                let (found, span) = self.describe_current();
                Err(ParseError::new("attribute name", found, span).into())
            }
        }
    }

    /// Entity names may collide with reserved words, e.g. `from Order o`.
    fn expect_entity_name(&mut self, description: &str) -> ParseResult<Spanned<String>> {
        match self.peek().cloned() {
            Some(tok) if tok.token.keyword_text().is_some() => {
                self.advance();
                Ok(Spanned::new(tok.lexeme(self.source).to_string(), tok.span))
            }
            _ => self.expect_ident(description),
        }
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> Option<&SpannedToken> {
        self.tokens.get(self.pos)
    }

    fn peek_token(&self) -> Option<&Token> {
        self.peek().map(|t| &t.token)
    }

    fn peek_token_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|t| &t.token)
    }

    fn advance(&mut self) -> Option<SpannedToken> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token) -> Option<SpannedToken> {
        if self.peek_token() == Some(expected) {
            self.advance()
        } else {
            None
        }
    }

    fn at_ident(&self) -> bool {
        matches!(
            self.peek_token(),
            Some(Token::Ident(_)) | Some(Token::QuotedIdent(_))
        )
    }

    fn expect_token(&mut self, expected: Token, description: &str) -> ParseResult<SpannedToken> {
        if let Some(tok) = self.eat(&expected) {
            return Ok(tok);
        }
        let (found, span) = self.describe_current();
        Err(ParseError::new(description, found, span).into())
    }

    fn expect_ident(&mut self, description: &str) -> ParseResult<Spanned<String>> {
        match self.peek().cloned() {
            Some(SpannedToken {
                token: Token::Ident(name) | Token::QuotedIdent(name),
                span,
            }) => {
                self.advance();
                Ok(Spanned::new(name, span))
            }
            Some(tok) if tok.token.keyword_text().is_some() => Err(ParseError::new(
                description,
                tok.token.to_string(),
                tok.span,
            )
            .with_hint(format!(
                "'{}' is reserved; quote it as \"{}\" to use it as a name",
                tok.lexeme(self.source),
                tok.lexeme(self.source)
            ))
            .into()),
            _ => {
                let (found, span) = self.describe_current();
                Err(ParseError::new(description, found, span).into())
            }
        }
    }

    fn expect_string(&mut self, description: &str) -> ParseResult<Spanned<String>> {
        match self.peek().cloned() {
            Some(SpannedToken {
                token: Token::Str(s),
                span,
            }) => {
                self.advance();
                Ok(Spanned::new(s, span))
            }
            _ => {
                let (found, span) = self.describe_current();
                Err(ParseError::new(description, found, span).into())
            }
        }
    }

    fn expect_end(&self, description: &str) -> ParseResult<()> {
        match self.peek() {
            None => Ok(()),
            Some(tok) => {
                Err(ParseError::new(description, tok.token.to_string(), tok.span).into())
            }
        }
    }

    /// Description and span of the current token, or end of input.
    fn describe_current(&self) -> (String, Span) {
        match self.peek() {
            Some(tok) => (tok.token.to_string(), tok.span),
            None => ("end of input".to_string(), self.end_span()),
        }
    }

    fn current_span(&self) -> Span {
        self.peek().map(|t| t.span).unwrap_or_else(|| self.end_span())
    }

    fn previous_span(&self) -> Span {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|t| t.span)
            .unwrap_or(Span::point(0))
    }

    fn end_span(&self) -> Span {
        Span::point(self.source.len())
    }
}

fn literal(value: Literal, span: Span) -> Expr {
    Expr::Literal(Spanned::new(value, span))
}

/// Parse a query with the default subquery depth.
pub fn parse(source: &str) -> Result<Query, LangError> {
    Parser::new(source)?.parse_query()
}

/// Parse a query allowing `max_subquery_depth` levels of nested subqueries.
pub fn parse_with_depth(source: &str, max_subquery_depth: usize) -> Result<Query, LangError> {
    Parser::new(source)?
        .with_max_subquery_depth(max_subquery_depth)
        .parse_query()
}

/// Parse a standalone path expression.
pub fn parse_path(source: &str) -> Result<PathExpr, LangError> {
    Parser::new(source)?.parse_path_only()
}
