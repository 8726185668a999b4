//! Formula error types.

use std::ops::Range;
use thiserror::Error;

/// Category of parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The formula contains no tokens.
    Empty,

    /// A character sequence that is not part of the grammar (quotes, brackets,
    /// attribute access, ...).
    InvalidCharacter,

    /// A token appeared where the grammar does not allow it.
    UnexpectedToken,

    /// Input ended while an expression was incomplete (e.g. `x +`).
    UnexpectedEof,

    /// Call to a function outside the whitelist.
    UnknownFunction,

    /// Whitelisted function called with the wrong number of arguments.
    ArityMismatch,

    /// Nesting or operator chains deeper than the parser allows.
    TooDeep,

    /// Structurally invalid construct (chained comparison, calling a
    /// non-function, ...).
    InvalidSyntax,
}

/// Parse error with the byte span where it was detected.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} at {span:?}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Range<usize>,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(kind: ParseErrorKind, message: impl Into<String>, span: Range<usize>) -> Self {
        Self {
            kind,
            span,
            message: message.into(),
        }
    }

    pub(crate) fn empty() -> Self {
        Self::new(ParseErrorKind::Empty, "formula is empty", 0..0)
    }

    pub(crate) fn too_deep(span: Range<usize>) -> Self {
        Self::new(
            ParseErrorKind::TooDeep,
            format!("formula nests deeper than {} levels", crate::parser::MAX_DEPTH),
            span,
        )
    }

    pub(crate) fn invalid_character(slice: &str, span: Range<usize>) -> Self {
        Self::new(
            ParseErrorKind::InvalidCharacter,
            format!("invalid character sequence {:?}", slice),
            span,
        )
    }

    pub(crate) fn unexpected(found: Option<&crate::Token>, context: &str, span: Range<usize>) -> Self {
        match found {
            Some(token) => Self::new(
                ParseErrorKind::UnexpectedToken,
                format!("unexpected {} {}", token, context),
                span,
            ),
            None => Self::new(
                ParseErrorKind::UnexpectedEof,
                format!("unexpected end of formula {}", context),
                span,
            ),
        }
    }
}

/// Runtime failure while evaluating a parsed formula against an environment.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    /// Identifier not present in the environment.
    #[error("name `{0}` is not defined")]
    UndefinedName(String),

    /// Right operand of `/`, `//` or `%` was zero.
    #[error("division by zero")]
    DivisionByZero,

    /// Finite arguments produced NaN (e.g. `sqrt(-1)`, `ln(-2)`).
    #[error("math domain error in `{0}`")]
    Domain(&'static str),

    /// The formula evaluated to infinity or NaN.
    #[error("result {0} is not a finite number")]
    NonFinite(f64),
}

/// Either stage of formula processing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),
}
