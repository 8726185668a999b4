//! Hand-written Pratt parser over the token stream.
//!
//! Precedence, loosest to tightest:
//!
//! ```text
//! or
//! and
//! not                      (prefix)
//! == != < <= > >=          (non-associative)
//! + -
//! * / // %
//! - +                      (prefix)
//! **                       (right-associative, exponent may be signed)
//! atom                     number | name | name(args) | (expr)
//! ```

use crate::ast::{BinaryOp, Expr, Function, UnaryOp};
use crate::error::{ParseError, ParseErrorKind};
use crate::lexer::{tokenize, Token};
use std::ops::Range;

/// Operand precedence for prefix `not`: it binds looser than comparisons.
const NOT_OPERAND_PREC: u8 = 30;

/// Deepest allowed nesting, counted both as parser recursion (parentheses,
/// prefix operators, call arguments) and as syntax tree height.
pub const MAX_DEPTH: usize = 256;

/// An expression and the height of its tree.
type Parsed = (Expr, usize);

/// Token stream with lookahead and byte-span tracking.
struct TokenStream<'src> {
    tokens: &'src [(Token, Range<usize>)],
    pos: usize,
    source_len: usize,
    depth: usize,
}

impl<'src> TokenStream<'src> {
    fn new(tokens: &'src [(Token, Range<usize>)], source_len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            source_len,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(tok, _)| tok)
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos).map(|(tok, _)| tok);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Span of the current token, or an empty span at end of input.
    fn current_span(&self) -> Range<usize> {
        match self.tokens.get(self.pos) {
            Some((_, span)) => span.clone(),
            None => self.source_len..self.source_len,
        }
    }

    fn expect(&mut self, expected: Token, context: &str) -> Result<(), ParseError> {
        if self.peek() == Some(&expected) {
            self.advance();
            Ok(())
        } else {
            Err(ParseError::unexpected(
                self.peek(),
                &format!("{} (expected {})", context, expected),
                self.current_span(),
            ))
        }
    }

    /// Run one level of recursive descent. Errors abort the whole parse, so
    /// the counter only needs restoring on success.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_DEPTH {
            return Err(ParseError::too_deep(self.current_span()));
        }
        self.depth += 1;
        let result = parse(self)?;
        self.depth -= 1;
        Ok(result)
    }

    /// Height of a new node over children of height `child`.
    fn node_height(&self, child: usize) -> Result<usize, ParseError> {
        if child >= MAX_DEPTH {
            return Err(ParseError::too_deep(self.current_span()));
        }
        Ok(child + 1)
    }
}

/// Parse a complete formula.
pub fn parse(source: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(ParseError::empty());
    }

    let mut stream = TokenStream::new(&tokens, source.len());
    let (expr, _) = parse_pratt(&mut stream, 0)?;

    if !stream.at_end() {
        return Err(ParseError::unexpected(
            stream.peek(),
            "after end of expression",
            stream.current_span(),
        ));
    }

    Ok(expr)
}

/// Binary operator metadata: (precedence, op). All binary levels here are
/// left-associative; `**` is handled separately in `parse_power`.
fn binary_op_info(token: &Token) -> Option<(u8, BinaryOp)> {
    match token {
        Token::Or => Some((10, BinaryOp::Or)),
        Token::And => Some((20, BinaryOp::And)),
        Token::EqEq => Some((40, BinaryOp::Eq)),
        Token::BangEq => Some((40, BinaryOp::Ne)),
        Token::Lt => Some((40, BinaryOp::Lt)),
        Token::LtEq => Some((40, BinaryOp::Le)),
        Token::Gt => Some((40, BinaryOp::Gt)),
        Token::GtEq => Some((40, BinaryOp::Ge)),
        Token::Plus => Some((50, BinaryOp::Add)),
        Token::Minus => Some((50, BinaryOp::Sub)),
        Token::Star => Some((60, BinaryOp::Mul)),
        Token::Slash => Some((60, BinaryOp::Div)),
        Token::SlashSlash => Some((60, BinaryOp::FloorDiv)),
        Token::Percent => Some((60, BinaryOp::Mod)),
        _ => None,
    }
}

fn parse_pratt(stream: &mut TokenStream, min_prec: u8) -> Result<Parsed, ParseError> {
    stream.nested(|stream| {
        let (mut left, mut height) = parse_prefix(stream)?;
        let mut after_comparison = false;

        while let Some(token) = stream.peek() {
            let Some((prec, op)) = binary_op_info(token) else {
                break;
            };
            if prec < min_prec {
                break;
            }

            if op.is_comparison() && after_comparison {
                return Err(ParseError::new(
                    ParseErrorKind::InvalidSyntax,
                    "chained comparisons are not supported",
                    stream.current_span(),
                ));
            }

            stream.advance();
            let (right, right_height) = parse_pratt(stream, prec + 1)?;
            after_comparison = op.is_comparison();

            // A long `a + b + c ...` chain grows the tree without recursing.
            height = stream.node_height(height.max(right_height))?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok((left, height))
    })
}

fn parse_prefix(stream: &mut TokenStream) -> Result<Parsed, ParseError> {
    match stream.peek() {
        Some(Token::Not) => {
            stream.advance();
            let (operand, height) = parse_pratt(stream, NOT_OPERAND_PREC)?;
            Ok((
                Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                stream.node_height(height)?,
            ))
        }
        _ => parse_unary(stream),
    }
}

fn parse_unary(stream: &mut TokenStream) -> Result<Parsed, ParseError> {
    let op = match stream.peek() {
        Some(Token::Minus) => UnaryOp::Neg,
        Some(Token::Plus) => UnaryOp::Pos,
        _ => return parse_power(stream),
    };
    stream.advance();

    let (operand, height) = stream.nested(parse_unary)?;
    Ok((
        Expr::Unary {
            op,
            operand: Box::new(operand),
        },
        stream.node_height(height)?,
    ))
}

fn parse_power(stream: &mut TokenStream) -> Result<Parsed, ParseError> {
    let (base, base_height) = parse_atom(stream)?;

    if stream.peek() == Some(&Token::StarStar) {
        stream.advance();
        // Exponent is a full unary expression, so `2 ** -1` and `2 ** 3 ** 2`
        // (right-associative) both work.
        let (exponent, exponent_height) = stream.nested(parse_unary)?;
        return Ok((
            Expr::Binary {
                op: BinaryOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            },
            stream.node_height(base_height.max(exponent_height))?,
        ));
    }

    Ok((base, base_height))
}

fn parse_atom(stream: &mut TokenStream) -> Result<Parsed, ParseError> {
    let span = stream.current_span();
    let parsed = match stream.advance().cloned() {
        Some(Token::Number(value)) => (Expr::Number(value), 1),
        Some(Token::Ident(name)) => {
            if stream.peek() == Some(&Token::LParen) {
                parse_call(stream, &name, span)?
            } else {
                (Expr::Variable(name), 1)
            }
        }
        Some(Token::LParen) => {
            let inner = parse_pratt(stream, 0)?;
            stream.expect(Token::RParen, "to close parenthesis")?;
            inner
        }
        other => return Err(ParseError::unexpected(other.as_ref(), "in expression", span)),
    };

    if stream.peek() == Some(&Token::LParen) {
        return Err(ParseError::new(
            ParseErrorKind::InvalidSyntax,
            "only whitelisted functions can be called",
            stream.current_span(),
        ));
    }

    Ok(parsed)
}

fn parse_call(stream: &mut TokenStream, name: &str, span: Range<usize>) -> Result<Parsed, ParseError> {
    let function = Function::from_name(name).ok_or_else(|| {
        ParseError::new(
            ParseErrorKind::UnknownFunction,
            format!("unknown function `{}`", name),
            span.clone(),
        )
    })?;

    stream.expect(Token::LParen, "after function name")?;

    let mut args = Vec::new();
    let mut height = 0;
    while stream.peek() != Some(&Token::RParen) {
        let (arg, arg_height) = parse_pratt(stream, 0)?;
        args.push(arg);
        height = height.max(arg_height);

        if stream.peek() != Some(&Token::RParen) {
            stream.expect(Token::Comma, "between arguments")?;
        }
    }
    stream.expect(Token::RParen, "to close argument list")?;

    if !function.arity().accepts(args.len()) {
        return Err(ParseError::new(
            ParseErrorKind::ArityMismatch,
            format!(
                "`{}` takes {}, got {}",
                function.name(),
                function.arity(),
                args.len()
            ),
            span,
        ));
    }

    Ok((Expr::Call { function, args }, stream.node_height(height)?))
}
