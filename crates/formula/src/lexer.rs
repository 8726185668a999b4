//! Tokenization of formula source text using logos.

use crate::error::ParseError;
use logos::Logos;
use std::fmt;
use std::ops::Range;

/// Formula token.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    // === Literals ===
    /// Numeric literal (`3`, `2.5`, `.5`, `1e-3`).
    #[regex(r"([0-9]+(\.[0-9]*)?|\.[0-9]+)([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    /// Identifier (variable, constant, or function name).
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // === Keywords ===
    /// Keyword `and`
    #[token("and")]
    And,
    /// Keyword `or`
    #[token("or")]
    Or,
    /// Keyword `not`
    #[token("not")]
    Not,

    // === Operators ===
    /// `+`
    #[token("+")]
    Plus,
    /// `-`
    #[token("-")]
    Minus,
    /// `*`
    #[token("*")]
    Star,
    /// `**`
    #[token("**")]
    StarStar,
    /// `/`
    #[token("/")]
    Slash,
    /// `//`
    #[token("//")]
    SlashSlash,
    /// `%`
    #[token("%")]
    Percent,
    /// `==`
    #[token("==")]
    EqEq,
    /// `!=`
    #[token("!=")]
    BangEq,
    /// `<`
    #[token("<")]
    Lt,
    /// `<=`
    #[token("<=")]
    LtEq,
    /// `>`
    #[token(">")]
    Gt,
    /// `>=`
    #[token(">=")]
    GtEq,

    // === Delimiters ===
    /// `(`
    #[token("(")]
    LParen,
    /// `)`
    #[token(")")]
    RParen,
    /// `,`
    #[token(",")]
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {}", n),
            Token::Ident(name) => write!(f, "identifier `{}`", name),
            Token::And => f.write_str("`and`"),
            Token::Or => f.write_str("`or`"),
            Token::Not => f.write_str("`not`"),
            Token::Plus => f.write_str("`+`"),
            Token::Minus => f.write_str("`-`"),
            Token::Star => f.write_str("`*`"),
            Token::StarStar => f.write_str("`**`"),
            Token::Slash => f.write_str("`/`"),
            Token::SlashSlash => f.write_str("`//`"),
            Token::Percent => f.write_str("`%`"),
            Token::EqEq => f.write_str("`==`"),
            Token::BangEq => f.write_str("`!=`"),
            Token::Lt => f.write_str("`<`"),
            Token::LtEq => f.write_str("`<=`"),
            Token::Gt => f.write_str("`>`"),
            Token::GtEq => f.write_str("`>=`"),
            Token::LParen => f.write_str("`(`"),
            Token::RParen => f.write_str("`)`"),
            Token::Comma => f.write_str("`,`"),
        }
    }
}

/// Tokenize a formula, pairing every token with its byte span.
///
/// Fails on the first character sequence that is not part of the grammar.
pub fn tokenize(source: &str) -> Result<Vec<(Token, Range<usize>)>, ParseError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push((token, lexer.span())),
            Err(()) => return Err(ParseError::invalid_character(lexer.slice(), lexer.span())),
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|(tok, _)| tok)
            .collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("3 2.5 .5 1e-3 4."),
            vec![
                Token::Number(3.0),
                Token::Number(2.5),
                Token::Number(0.5),
                Token::Number(0.001),
                Token::Number(4.0),
            ]
        );
    }

    #[test]
    fn test_keywords_vs_identifiers() {
        assert_eq!(
            kinds("and android not notable or order"),
            vec![
                Token::And,
                Token::Ident("android".into()),
                Token::Not,
                Token::Ident("notable".into()),
                Token::Or,
                Token::Ident("order".into()),
            ]
        );
    }

    #[test]
    fn test_multi_char_operators() {
        assert_eq!(
            kinds("a ** b // c <= d"),
            vec![
                Token::Ident("a".into()),
                Token::StarStar,
                Token::Ident("b".into()),
                Token::SlashSlash,
                Token::Ident("c".into()),
                Token::LtEq,
                Token::Ident("d".into()),
            ]
        );
    }

    #[test]
    fn test_spans_are_byte_offsets() {
        let tokens = tokenize("x + yy").unwrap();
        assert_eq!(tokens[0].1, 0..1);
        assert_eq!(tokens[1].1, 2..3);
        assert_eq!(tokens[2].1, 4..6);
    }

    #[test]
    fn test_rejects_foreign_characters() {
        let err = tokenize("x + __import__('os')").unwrap_err();
        assert_eq!(err.kind, crate::ParseErrorKind::InvalidCharacter);
        assert_eq!(err.span, 15..16);
    }
}
