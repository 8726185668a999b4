//! Whitelisted formula language for Monte Carlo models.
//!
//! Model formulas are arithmetic expressions over named constants and sampled
//! variables. They are parsed into a small syntax tree that can only express:
//!
//! - numeric literals and identifiers
//! - arithmetic (`+ - * / // % **`), comparisons and `and`/`or`/`not`
//! - calls to a fixed set of math functions ([`Function`])
//!
//! Identifiers resolve exclusively against the [`Environment`] passed to
//! [`Formula::evaluate`]. There is no attribute access, no indexing, no string
//! literals and no way to reach anything outside the environment, so a
//! formula that parses is safe to evaluate.
//!
//! # Example
//!
//! ```
//! use montecarlo_formula::{Formula, Overlay};
//! use std::collections::BTreeMap;
//!
//! let formula = Formula::parse("x + y").unwrap();
//! let constants = BTreeMap::from([("y".to_string(), 2.0)]);
//! let scenario = BTreeMap::from([("x".to_string(), 3.0), ("y".to_string(), 99.0)]);
//!
//! // Scenario values shadow constants.
//! let value = formula.evaluate(&Overlay::new(&scenario, &constants)).unwrap();
//! assert_eq!(value, 102.0);
//! ```

mod ast;
mod error;
mod eval;
mod lexer;
mod parser;

pub use ast::{Arity, BinaryOp, Expr, Function, UnaryOp};
pub use error::{EvaluationError, FormulaError, ParseError, ParseErrorKind};
pub use eval::{Environment, Overlay};
pub use lexer::{tokenize, Token};
pub use parser::MAX_DEPTH;

use std::collections::BTreeSet;
use std::fmt;

/// A parsed formula together with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    /// Parse formula source text.
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let expr = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// Original source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parsed syntax tree.
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Names the formula reads from its environment, sorted.
    ///
    /// Function names are not included.
    pub fn free_identifiers(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.expr.collect_identifiers(&mut names);
        names
    }

    /// Evaluate against `env`.
    ///
    /// Fails if a name is missing, on division by zero, on a math domain
    /// error, or if the result is not finite.
    pub fn evaluate<E: Environment + ?Sized>(&self, env: &E) -> Result<f64, EvaluationError> {
        let value = eval::evaluate(&self.expr, env)?;
        if !value.is_finite() {
            return Err(EvaluationError::NonFinite(value));
        }
        Ok(value)
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse and evaluate in one step.
pub fn evaluate<E: Environment + ?Sized>(source: &str, env: &E) -> Result<f64, FormulaError> {
    let formula = Formula::parse(source)?;
    Ok(formula.evaluate(env)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn env(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_scenario_overrides_constant() {
        let constants = env(&[("y", 2.0)]);
        let scenario = env(&[("x", 3.0), ("y", 99.0)]);
        let value = evaluate("x+y", &Overlay::new(&scenario, &constants)).unwrap();
        assert_eq!(value, 102.0);
    }

    #[test]
    fn test_constant_used_when_scenario_lacks_name() {
        let constants = env(&[("y", 2.0)]);
        let scenario = env(&[("x", 3.0)]);
        let value = evaluate("x+y", &Overlay::new(&scenario, &constants)).unwrap();
        assert_eq!(value, 5.0);
    }

    #[test]
    fn test_arithmetic() {
        let e = env(&[("a", 7.0), ("b", 2.0)]);
        assert_eq!(evaluate("a / b", &e).unwrap(), 3.5);
        assert_eq!(evaluate("a // b", &e).unwrap(), 3.0);
        assert_eq!(evaluate("a % b", &e).unwrap(), 1.0);
        assert_eq!(evaluate("-a % b", &e).unwrap(), 1.0);
        assert_eq!(evaluate("a ** b", &e).unwrap(), 49.0);
        assert_eq!(evaluate("-b ** 2", &e).unwrap(), -4.0);
        assert_eq!(evaluate("b ** -1", &e).unwrap(), 0.5);
        assert_eq!(evaluate("2 ** 3 ** 2", &e).unwrap(), 512.0);
        assert_eq!(evaluate("(a - b) * 2", &e).unwrap(), 10.0);
    }

    #[test]
    fn test_functions() {
        let e = env(&[("x", -4.0)]);
        assert_eq!(evaluate("abs(x)", &e).unwrap(), 4.0);
        assert_eq!(evaluate("sqrt(abs(x))", &e).unwrap(), 2.0);
        assert_eq!(evaluate("max(x, 1, 3)", &e).unwrap(), 3.0);
        assert_eq!(evaluate("min(x, 1, 3)", &e).unwrap(), -4.0);
        assert_eq!(evaluate("pow(2, 10)", &e).unwrap(), 1024.0);
        assert_eq!(evaluate("floor(2.7) + ceil(2.1)", &e).unwrap(), 5.0);
        assert!((evaluate("log(exp(1.5))", &e).unwrap() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_comparisons_and_booleans() {
        let e = env(&[("x", 3.0), ("y", 5.0)]);
        assert_eq!(evaluate("x < y", &e).unwrap(), 1.0);
        assert_eq!(evaluate("x >= y", &e).unwrap(), 0.0);
        assert_eq!(evaluate("x < y and y < 10", &e).unwrap(), 1.0);
        assert_eq!(evaluate("x > y or y > 10", &e).unwrap(), 0.0);
        assert_eq!(evaluate("not x == y", &e).unwrap(), 1.0);
        assert_eq!(evaluate("(x < y) * 100", &e).unwrap(), 100.0);
    }

    #[test]
    fn test_short_circuit_skips_undefined_names() {
        let e = env(&[("x", 0.0)]);
        assert_eq!(evaluate("x and missing", &e).unwrap(), 0.0);
        assert_eq!(evaluate("1 or missing", &e).unwrap(), 1.0);
    }

    #[test]
    fn test_undefined_name() {
        let err = evaluate("x + z", &env(&[("x", 1.0)])).unwrap_err();
        assert_eq!(
            err,
            FormulaError::Evaluation(EvaluationError::UndefinedName("z".into()))
        );
    }

    #[test]
    fn test_division_by_zero() {
        let e = env(&[("x", 1.0), ("zero", 0.0)]);
        for source in ["x / zero", "x // zero", "x % zero"] {
            assert_eq!(
                evaluate(source, &e).unwrap_err(),
                FormulaError::Evaluation(EvaluationError::DivisionByZero),
                "{}",
                source
            );
        }
    }

    #[test]
    fn test_domain_and_overflow_errors() {
        let e = env(&[("x", -1.0)]);
        assert_eq!(
            evaluate("sqrt(x)", &e).unwrap_err(),
            FormulaError::Evaluation(EvaluationError::Domain("sqrt"))
        );
        assert_eq!(
            evaluate("x ** 0.5", &e).unwrap_err(),
            FormulaError::Evaluation(EvaluationError::Domain("**"))
        );
        assert!(matches!(
            evaluate("exp(1000)", &e).unwrap_err(),
            FormulaError::Evaluation(EvaluationError::NonFinite(_))
        ));
    }

    #[test]
    fn test_intermediate_non_finite_values_fail() {
        let e = env(&[("zero", 0.0), ("big", 1e308)]);
        // The pole is caught before `1 / -inf` can hide it as -0.0.
        assert_eq!(
            evaluate("1 / ln(zero)", &e).unwrap_err(),
            FormulaError::Evaluation(EvaluationError::Domain("ln"))
        );
        assert_eq!(
            evaluate("1 / log10(0)", &e).unwrap_err(),
            FormulaError::Evaluation(EvaluationError::Domain("log10"))
        );
        assert!(matches!(
            evaluate("1 / (big * 10)", &e).unwrap_err(),
            FormulaError::Evaluation(EvaluationError::NonFinite(_))
        ));
        assert!(matches!(
            evaluate("(big * 10) > 0", &e).unwrap_err(),
            FormulaError::Evaluation(EvaluationError::NonFinite(_))
        ));
    }

    #[test]
    fn test_zero_to_negative_power_is_division_by_zero() {
        let e = env(&[("zero", 0.0)]);
        for source in ["zero ** -1", "pow(zero, -2)", "1 / 0 ** -1"] {
            assert_eq!(
                evaluate(source, &e).unwrap_err(),
                FormulaError::Evaluation(EvaluationError::DivisionByZero),
                "{}",
                source
            );
        }
        assert_eq!(evaluate("zero ** 0", &e).unwrap(), 1.0);
    }

    #[test]
    fn test_malformed_formula_is_parse_error() {
        assert!(matches!(
            evaluate("x+", &env(&[("x", 1.0)])).unwrap_err(),
            FormulaError::Parse(_)
        ));
    }

    #[test]
    fn test_free_identifiers_exclude_functions() {
        let formula = Formula::parse("sqrt(a) + max(b, c) * a - 2").unwrap();
        let names: Vec<String> = formula.free_identifiers().into_iter().collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_display_is_source() {
        let formula = Formula::parse("x * 2").unwrap();
        assert_eq!(formula.to_string(), "x * 2");
        assert_eq!(formula.source(), "x * 2");
    }
}
