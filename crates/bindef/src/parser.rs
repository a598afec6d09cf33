//! Parsing of token streams into expression trees.

use codespan::Span;

use crate::diagnostics::{ErrorKind, LangError};
use crate::lexer::{Token, TokenKind};

/// An expression tree node. Every node covers a source span.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Token),
    Unary {
        op: Token,
        expr: Box<Expr>,
    },
    Binary {
        op: Token,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// A map literal; entries are kept in source order and duplicate keys
    /// are permitted.
    Map {
        entries: Vec<(Expr, Expr)>,
        span: Span,
    },
    List {
        items: Vec<Expr>,
        span: Span,
    },
    /// Attribute access, `target.name`.
    Attr {
        target: Box<Expr>,
        name: Token,
    },
    /// Subscript access, `target[index]`.
    Subscript {
        target: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    /// Function application, `callee(args...)`.
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },
}

impl Expr {
    /// The source region this expression covers.
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal(token) => token.span,
            Expr::Unary { op, expr } => Span::new(op.span.start(), expr.span().end()),
            Expr::Binary { left, right, .. } => {
                Span::new(left.span().start(), right.span().end())
            }
            Expr::Map { span, .. } | Expr::List { span, .. } => *span,
            Expr::Attr { target, name } => Span::new(target.span().start(), name.span.end()),
            Expr::Subscript { span, .. } | Expr::Call { span, .. } => *span,
        }
    }
}

/// Parse a token stream into a single expression.
pub fn parse(tokens: Vec<Token>) -> Result<Expr, LangError> {
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expr()?;

    match parser.cursor() {
        None => Ok(expr),
        Some(token) => Err(LangError::new(
            ErrorKind::Syntax,
            token.span,
            format!("unexpected {} after expression", token.kind),
        )),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Parser {
        Parser { tokens, pos: 0 }
    }

    fn cursor(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn cursor_kind(&self) -> Option<TokenKind> {
        self.cursor().map(|token| token.kind)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    /// A zero-width span just past the given position, for errors that point
    /// at a missing token.
    fn span_after(&self, span: Span) -> Span {
        let at = span.end().to_usize();
        Span::new(at as u32, (at + 1) as u32)
    }

    /// The span to blame when the input ends unexpectedly.
    fn eof_span(&self) -> Span {
        match self.tokens.last() {
            Some(token) => self.span_after(token.span),
            None => Span::new(0u32, 0u32),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, LangError> {
        self.parse_logical_or()
    }

    /// One precedence level: fold left-associative binary operators drawn
    /// from `ops` over the next-tighter level.
    fn parse_level(
        &mut self,
        ops: &[TokenKind],
        next: fn(&mut Parser) -> Result<Expr, LangError>,
    ) -> Result<Expr, LangError> {
        let mut left = next(self)?;

        while let Some(token) = self.cursor() {
            if !ops.contains(&token.kind) {
                break;
            }
            let op = token.clone();
            self.advance();
            let right = next(self)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_logical_or(&mut self) -> Result<Expr, LangError> {
        self.parse_level(&[TokenKind::LogicalOr], Parser::parse_logical_and)
    }

    fn parse_logical_and(&mut self) -> Result<Expr, LangError> {
        self.parse_level(&[TokenKind::LogicalAnd], Parser::parse_comparison)
    }

    fn parse_comparison(&mut self) -> Result<Expr, LangError> {
        self.parse_level(
            &[
                TokenKind::Equals,
                TokenKind::NotEq,
                TokenKind::Lt,
                TokenKind::LtEq,
                TokenKind::Gt,
                TokenKind::GtEq,
            ],
            Parser::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, LangError> {
        self.parse_level(
            &[
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::BitOr,
                TokenKind::BitXor,
            ],
            Parser::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, LangError> {
        self.parse_level(
            &[
                TokenKind::Mul,
                TokenKind::Pow,
                TokenKind::Div,
                TokenKind::Modulo,
                TokenKind::Shl,
                TokenKind::Shr,
                TokenKind::BitAnd,
            ],
            Parser::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Expr, LangError> {
        if let Some(token) = self.cursor() {
            if matches!(
                token.kind,
                TokenKind::Plus | TokenKind::Minus | TokenKind::BitNot | TokenKind::Not
            ) {
                let op = token.clone();
                self.advance();
                let expr = self.parse_unary()?;
                return Ok(Expr::Unary {
                    op,
                    expr: Box::new(expr),
                });
            }
        }

        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, LangError> {
        let mut left = self.parse_primary()?;

        loop {
            match self.cursor_kind() {
                Some(TokenKind::LBracket) => {
                    self.advance();
                    let index = self.parse_expr()?;
                    let end = match self.cursor() {
                        Some(token) if token.kind == TokenKind::RBracket => token.span.end(),
                        _ => {
                            return Err(LangError::new(
                                ErrorKind::Syntax,
                                self.span_after(index.span()),
                                "expected closing bracket for subscript access",
                            ));
                        }
                    };
                    self.advance();
                    left = Expr::Subscript {
                        span: Span::new(left.span().start(), end),
                        target: Box::new(left),
                        index: Box::new(index),
                    };
                }
                Some(TokenKind::LParen) => {
                    let start = left.span().start();
                    self.advance();

                    let mut args = Vec::new();
                    while !matches!(self.cursor_kind(), None | Some(TokenKind::RParen)) {
                        let arg = self.parse_expr()?;
                        let arg_span = arg.span();
                        args.push(arg);

                        match self.cursor_kind() {
                            Some(TokenKind::Comma) => self.advance(),
                            Some(TokenKind::RParen) => {}
                            _ => {
                                return Err(LangError::new(
                                    ErrorKind::Syntax,
                                    self.span_after(arg_span),
                                    "expected closing paren in argument list",
                                ));
                            }
                        }
                    }

                    let end = match self.cursor() {
                        Some(token) => token.span.end(),
                        None => {
                            return Err(LangError::new(
                                ErrorKind::Syntax,
                                self.eof_span(),
                                "expected closing paren in argument list",
                            ));
                        }
                    };
                    self.advance();
                    left = Expr::Call {
                        span: Span::new(start, end),
                        callee: Box::new(left),
                        args,
                    };
                }
                Some(TokenKind::Dot) => {
                    self.advance();
                    match self.cursor() {
                        Some(token) if token.kind == TokenKind::Identifier => {
                            let name = token.clone();
                            self.advance();
                            left = Expr::Attr {
                                target: Box::new(left),
                                name,
                            };
                        }
                        _ => {
                            return Err(LangError::new(
                                ErrorKind::Syntax,
                                self.span_after(left.span()),
                                "expected identifier after dot",
                            ));
                        }
                    }
                }
                _ => break,
            }
        }

        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, LangError> {
        let token = match self.cursor() {
            Some(token) => token.clone(),
            None => {
                return Err(LangError::new(
                    ErrorKind::Syntax,
                    self.eof_span(),
                    "unexpected end of input",
                ));
            }
        };

        match token.kind {
            TokenKind::Integer
            | TokenKind::Float
            | TokenKind::Identifier
            | TokenKind::String
            | TokenKind::Keyword => {
                self.advance();
                Ok(Expr::Literal(token))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                match self.cursor_kind() {
                    Some(TokenKind::RParen) => {
                        self.advance();
                        Ok(expr)
                    }
                    _ => Err(LangError::new(
                        ErrorKind::Syntax,
                        self.span_after(expr.span()),
                        "expected closing parenthesis",
                    )),
                }
            }
            TokenKind::LBrace => self.parse_map(token.span.start().to_usize()),
            TokenKind::LBracket => self.parse_list(token.span.start().to_usize()),
            kind => Err(LangError::new(
                ErrorKind::Syntax,
                token.span,
                format!("unexpected {}", kind),
            )),
        }
    }

    fn parse_map(&mut self, start: usize) -> Result<Expr, LangError> {
        self.advance();

        let mut entries = Vec::new();
        loop {
            match self.cursor_kind() {
                Some(TokenKind::RBrace) => break,
                Some(_) => {}
                None => {
                    return Err(LangError::new(
                        ErrorKind::Syntax,
                        self.eof_span(),
                        "expected closing brace for mapping",
                    ));
                }
            }

            let key = self.parse_expr()?;

            match self.cursor_kind() {
                Some(TokenKind::Colon) => self.advance(),
                _ => {
                    return Err(LangError::new(
                        ErrorKind::Syntax,
                        self.span_after(key.span()),
                        "expected colon after key in mapping",
                    ));
                }
            }

            let value = self.parse_expr()?;
            let value_span = value.span();
            entries.push((key, value));

            match self.cursor_kind() {
                Some(TokenKind::Comma) => self.advance(),
                Some(TokenKind::RBrace) => {}
                _ => {
                    return Err(LangError::new(
                        ErrorKind::Syntax,
                        self.span_after(value_span),
                        "expected closing brace for mapping",
                    ));
                }
            }
        }

        let end = match self.cursor() {
            Some(token) => token.span.end(),
            None => {
                return Err(LangError::new(
                    ErrorKind::Syntax,
                    self.eof_span(),
                    "expected closing brace for mapping",
                ));
            }
        };
        self.advance();

        Ok(Expr::Map {
            entries,
            span: Span::new(start as u32, end),
        })
    }

    fn parse_list(&mut self, start: usize) -> Result<Expr, LangError> {
        self.advance();

        let mut items = Vec::new();
        loop {
            match self.cursor_kind() {
                Some(TokenKind::RBracket) => break,
                Some(_) => {}
                None => {
                    return Err(LangError::new(
                        ErrorKind::Syntax,
                        self.eof_span(),
                        "expected closing bracket or comma for list",
                    ));
                }
            }

            let item = self.parse_expr()?;
            let item_span = item.span();
            items.push(item);

            match self.cursor_kind() {
                Some(TokenKind::Comma) => self.advance(),
                Some(TokenKind::RBracket) => {}
                _ => {
                    return Err(LangError::new(
                        ErrorKind::Syntax,
                        self.span_after(item_span),
                        "expected closing bracket or comma for list",
                    ));
                }
            }
        }

        let end = match self.cursor() {
            Some(token) => token.span.end(),
            None => {
                return Err(LangError::new(
                    ErrorKind::Syntax,
                    self.eof_span(),
                    "expected closing bracket or comma for list",
                ));
            }
        };
        self.advance();

        Ok(Expr::List {
            items,
            span: Span::new(start as u32, end),
        })
    }
}
