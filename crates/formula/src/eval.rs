//! Formula evaluation against a name→value environment.

use crate::ast::{BinaryOp, Expr, Function, UnaryOp};
use crate::error::EvaluationError;
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashMap};

/// Source of identifier values during evaluation.
///
/// This is the only thing a formula can observe.
pub trait Environment {
    fn lookup(&self, name: &str) -> Option<f64>;
}

impl Environment for HashMap<String, f64> {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl Environment for BTreeMap<String, f64> {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl Environment for IndexMap<String, f64> {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl<E: Environment + ?Sized> Environment for &E {
    fn lookup(&self, name: &str) -> Option<f64> {
        (**self).lookup(name)
    }
}

/// Two environments layered on top of each other: names in `top` shadow
/// names in `base`.
#[derive(Debug, Clone, Copy)]
pub struct Overlay<T, B> {
    top: T,
    base: B,
}

impl<T: Environment, B: Environment> Overlay<T, B> {
    pub fn new(top: T, base: B) -> Self {
        Self { top, base }
    }
}

impl<T: Environment, B: Environment> Environment for Overlay<T, B> {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.top.lookup(name).or_else(|| self.base.lookup(name))
    }
}

fn truth(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Reject a non-finite arithmetic result. Inputs are always finite, since
/// every subexpression is checked as it is produced.
fn finite(value: f64) -> Result<f64, EvaluationError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EvaluationError::NonFinite(value))
    }
}

/// `base ** exponent`, for both the operator and `pow()`.
fn power(base: f64, exponent: f64, name: &'static str) -> Result<f64, EvaluationError> {
    if base == 0.0 && exponent < 0.0 {
        return Err(EvaluationError::DivisionByZero);
    }
    let result = base.powf(exponent);
    if result.is_nan() {
        return Err(EvaluationError::Domain(name));
    }
    finite(result)
}

fn call(function: Function, args: &[f64]) -> Result<f64, EvaluationError> {
    if function == Function::Pow {
        return power(args[0], args[1], function.name());
    }
    let result = function.apply(args);
    match function {
        _ if result.is_nan() => Err(EvaluationError::Domain(function.name())),
        // Logarithms reach infinity only at their pole, `ln(0)`.
        Function::Ln | Function::Log10 | Function::Log2 if result.is_infinite() => {
            Err(EvaluationError::Domain(function.name()))
        }
        _ => finite(result),
    }
}

/// Evaluate an expression tree.
///
/// Every intermediate value is finite: a node that would produce infinity or
/// NaN fails right there instead of propagating.
pub fn evaluate<E: Environment + ?Sized>(expr: &Expr, env: &E) -> Result<f64, EvaluationError> {
    match expr {
        Expr::Number(value) => Ok(*value),
        Expr::Variable(name) => env
            .lookup(name)
            .ok_or_else(|| EvaluationError::UndefinedName(name.clone())),
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, env)?;
            Ok(match op {
                UnaryOp::Neg => -value,
                UnaryOp::Pos => value,
                UnaryOp::Not => truth(value == 0.0),
            })
        }
        Expr::Binary { op, left, right } => evaluate_binary(*op, left, right, env),
        Expr::Call { function, args } => {
            let values = args
                .iter()
                .map(|arg| evaluate(arg, env))
                .collect::<Result<Vec<_>, _>>()?;
            call(*function, &values)
        }
    }
}

fn evaluate_binary<E: Environment + ?Sized>(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    env: &E,
) -> Result<f64, EvaluationError> {
    // Boolean operators short-circuit.
    match op {
        BinaryOp::And => {
            let lhs = evaluate(left, env)?;
            if lhs == 0.0 {
                return Ok(0.0);
            }
            return Ok(truth(evaluate(right, env)? != 0.0));
        }
        BinaryOp::Or => {
            let lhs = evaluate(left, env)?;
            if lhs != 0.0 {
                return Ok(1.0);
            }
            return Ok(truth(evaluate(right, env)? != 0.0));
        }
        _ => {}
    }

    let lhs = evaluate(left, env)?;
    let rhs = evaluate(right, env)?;

    let value = match op {
        BinaryOp::Add => finite(lhs + rhs)?,
        BinaryOp::Sub => finite(lhs - rhs)?,
        BinaryOp::Mul => finite(lhs * rhs)?,
        BinaryOp::Div => {
            if rhs == 0.0 {
                return Err(EvaluationError::DivisionByZero);
            }
            finite(lhs / rhs)?
        }
        BinaryOp::FloorDiv => {
            if rhs == 0.0 {
                return Err(EvaluationError::DivisionByZero);
            }
            finite((lhs / rhs).floor())?
        }
        BinaryOp::Mod => {
            if rhs == 0.0 {
                return Err(EvaluationError::DivisionByZero);
            }
            // Result takes the sign of the divisor.
            finite(lhs - rhs * (lhs / rhs).floor())?
        }
        BinaryOp::Pow => power(lhs, rhs, "**")?,
        BinaryOp::Eq => truth(lhs == rhs),
        BinaryOp::Ne => truth(lhs != rhs),
        BinaryOp::Lt => truth(lhs < rhs),
        BinaryOp::Le => truth(lhs <= rhs),
        BinaryOp::Gt => truth(lhs > rhs),
        BinaryOp::Ge => truth(lhs >= rhs),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    };

    Ok(value)
}
