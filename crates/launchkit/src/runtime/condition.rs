//! Guards deciding whether an action executes

use crate::config::{LaunchContext, Substitution, SubstitutionError};
use std::fmt;

/// A boolean-valued substitution attached to an action
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Execute when the expression is truthy
    If(Substitution),
    /// Execute when the expression is not truthy
    Unless(Substitution),
}

impl Condition {
    /// Resolve the expression and decide
    pub fn evaluate(&self, ctx: &LaunchContext) -> Result<bool, SubstitutionError> {
        match self {
            Condition::If(expr) => Ok(is_truthy(&expr.resolve(ctx)?)),
            Condition::Unless(expr) => Ok(!is_truthy(&expr.resolve(ctx)?)),
        }
    }

    pub fn expression(&self) -> &Substitution {
        match self {
            Condition::If(expr) | Condition::Unless(expr) => expr,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::If(expr) => write!(f, "if {}", expr),
            Condition::Unless(expr) => write!(f, "unless {}", expr),
        }
    }
}

/// Truthy values: `true`, `1`, `yes` (case-insensitive). Everything else is false.
pub fn is_truthy(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1" || value.eq_ignore_ascii_case("yes")
}

/// Whether an action guarded by `guard` should run; no guard means always
pub fn should_execute(
    guard: Option<&Condition>,
    ctx: &LaunchContext,
) -> Result<bool, SubstitutionError> {
    match guard {
        None => Ok(true),
        Some(condition) => condition.evaluate(ctx),
    }
}
