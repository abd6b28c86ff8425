//! C1: Condition Evaluator.
//!
//! Pure, total evaluation of a [`Predicate`] tree against a context map.
//! Missing variables and malformed trees both evaluate to `false` rather
//! than erroring: a `runCondition` is advisory, not a contract.

use crate::model::Predicate;
use serde_json::Value;
use std::collections::HashMap;

/// Evaluate `predicate` against `context`. Never panics, never errors.
pub fn evaluate(predicate: &Predicate, context: &HashMap<String, Value>) -> bool {
    match predicate {
        Predicate::And { and } => and.iter().all(|p| evaluate(p, context)),
        Predicate::Or { or } => or.iter().any(|p| evaluate(p, context)),
        Predicate::Not { not } => !evaluate(not, context),
        Predicate::Equals { var, equals } => context
            .get(var)
            .map(|actual| lenient_eq(actual, equals))
            .unwrap_or(false),
        Predicate::Gt { var, gt } => context
            .get(var)
            .and_then(|actual| compare_numeric(actual, gt))
            .map(|ord| ord == std::cmp::Ordering::Greater)
            .unwrap_or(false),
        Predicate::Lt { var, lt } => context
            .get(var)
            .and_then(|actual| compare_numeric(actual, lt))
            .map(|ord| ord == std::cmp::Ordering::Less)
            .unwrap_or(false),
    }
}

/// Scalar equality that is case-insensitive for strings and numerically
/// tolerant across JSON's integer/float split.
fn lenient_eq(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(a), Value::String(b)) => a.eq_ignore_ascii_case(b),
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Bool(a), Value::Bool(b)) => a == b,
        // Cross-type scalars: compare their string renderings case-insensitively.
        (Value::String(a), Value::Number(b)) | (Value::Number(b), Value::String(a)) => {
            a.eq_ignore_ascii_case(&b.to_string())
        }
        _ => actual == expected,
    }
}

fn compare_numeric(actual: &Value, literal: &Value) -> Option<std::cmp::Ordering> {
    let a = actual.as_f64()?;
    let b = literal.as_f64()?;
    a.partial_cmp(&b)
}
