//! Value-level operator semantics.
//!
//! Every operator consumes and produces [`Value`]s. An error operand makes
//! the operator emit that error unchanged (left operand first); the recover
//! operator is the only one with its own error handling and lives in the
//! evaluators. All arithmetic is checked `rust_decimal` arithmetic.
//!
//! Edge cases follow the engine's contract: division by zero is an error
//! value, array reads out of range and missing object keys are `Undefined`,
//! and operators over incompatible types report the operator symbol and the
//! offending type names.

use rust_decimal::Decimal;

use arbiter_core::ast::{BinaryOp, UnaryOp};
use arbiter_core::Value;

pub fn apply_unary(op: UnaryOp, operand: &Value) -> Value {
    if let Value::Error(_) = operand {
        return operand.clone();
    }
    match (op, operand) {
        (UnaryOp::Not, Value::Bool(b)) => Value::Bool(!b),
        (UnaryOp::Neg, Value::Number(n)) => Value::Number(-n),
        _ => incompatible_unary(op, operand),
    }
}

pub fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    if let Value::Error(_) = left {
        return left.clone();
    }
    if let Value::Error(_) = right {
        return right.clone();
    }
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::Number(a), Value::Number(b)) => checked(a.checked_add(*b), "addition overflow"),
            (Value::Text(a), Value::Text(b)) => Value::text(format!("{}{}", a, b)),
            _ => incompatible(op, left, right),
        },
        BinaryOp::Sub => numeric(op, left, right, |a, b| {
            checked(a.checked_sub(b), "subtraction overflow")
        }),
        BinaryOp::Mul => numeric(op, left, right, |a, b| {
            checked(a.checked_mul(b), "multiplication overflow")
        }),
        BinaryOp::Div => numeric(op, left, right, |a, b| {
            if b.is_zero() {
                Value::error("division by zero")
            } else {
                checked(a.checked_div(b), "division overflow")
            }
        }),
        BinaryOp::Rem => numeric(op, left, right, |a, b| {
            if b.is_zero() {
                Value::error("division by zero")
            } else {
                checked(a.checked_rem(b), "remainder overflow")
            }
        }),
        BinaryOp::Eq => Value::Bool(left == right),
        BinaryOp::Ne => Value::Bool(left != right),
        BinaryOp::Lt => compare(op, left, right, |o| o.is_lt()),
        BinaryOp::Le => compare(op, left, right, |o| o.is_le()),
        BinaryOp::Gt => compare(op, left, right, |o| o.is_gt()),
        BinaryOp::Ge => compare(op, left, right, |o| o.is_ge()),
        BinaryOp::And => boolean(op, left, right, |a, b| a && b),
        BinaryOp::Or => boolean(op, left, right, |a, b| a || b),
    }
}

/// `object.field`: missing keys read as `Undefined`.
pub fn field_access(object: &Value, field: &str) -> Value {
    match object {
        Value::Error(_) => object.clone(),
        Value::Object(entries) => entries.get(field).cloned().unwrap_or(Value::Undefined),
        other => Value::error(format!(
            "cannot access field '{}' on {}",
            field,
            other.type_name()
        )),
    }
}

/// `target[index]`: array reads out of range are `Undefined`, object reads
/// go by key text.
pub fn index_value(target: &Value, index: &Value) -> Value {
    if let Value::Error(_) = target {
        return target.clone();
    }
    if let Value::Error(_) = index {
        return index.clone();
    }
    match (target, index) {
        (Value::Array(items), Value::Number(n)) => {
            if !n.fract().is_zero() {
                return Value::error(format!("invalid array index: {}", n));
            }
            match decimal_to_index(n) {
                // Negative and past-the-end indexes are out-of-range reads.
                Some(i) => items.get(i).cloned().unwrap_or(Value::Undefined),
                None => Value::Undefined,
            }
        }
        (Value::Object(entries), Value::Text(key)) => {
            entries.get(key.as_str()).cloned().unwrap_or(Value::Undefined)
        }
        _ => Value::error(format!(
            "cannot index {} with {}",
            target.type_name(),
            index.type_name()
        )),
    }
}

fn decimal_to_index(n: &Decimal) -> Option<usize> {
    use rust_decimal::prelude::ToPrimitive;
    if n.is_sign_negative() && !n.is_zero() {
        return None;
    }
    // Past-usize indexes are simply out of range.
    Some(n.trunc().to_usize().unwrap_or(usize::MAX))
}

fn numeric(op: BinaryOp, left: &Value, right: &Value, f: impl Fn(Decimal, Decimal) -> Value) -> Value {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => f(*a, *b),
        _ => incompatible(op, left, right),
    }
}

fn compare(
    op: BinaryOp,
    left: &Value,
    right: &Value,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> Value {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Value::Bool(accept(a.cmp(b))),
        (Value::Text(a), Value::Text(b)) => Value::Bool(accept(a.cmp(b))),
        _ => incompatible(op, left, right),
    }
}

fn boolean(op: BinaryOp, left: &Value, right: &Value, f: impl Fn(bool, bool) -> bool) -> Value {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => Value::Bool(f(*a, *b)),
        _ => incompatible(op, left, right),
    }
}

fn checked(result: Option<Decimal>, message: &str) -> Value {
    match result {
        Some(n) => Value::Number(n),
        None => Value::error(message),
    }
}

fn incompatible(op: BinaryOp, left: &Value, right: &Value) -> Value {
    Value::error(format!(
        "operator '{}' not applicable to {} and {}",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

fn incompatible_unary(op: UnaryOp, operand: &Value) -> Value {
    Value::error(format!(
        "operator '{}' not applicable to {}",
        op.symbol(),
        operand.type_name()
    ))
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_core::value::ObjectBuilder;
    use std::str::FromStr;

    fn num(s: &str) -> Value {
        Value::Number(Decimal::from_str(s).unwrap())
    }

    #[test]
    fn decimal_arithmetic() {
        assert_eq!(apply_binary(BinaryOp::Add, &num("0.1"), &num("0.2")), num("0.3"));
        assert_eq!(apply_binary(BinaryOp::Mul, &num("1.5"), &num("4")), num("6.0"));
        assert_eq!(apply_binary(BinaryOp::Sub, &num("1"), &num("3")), num("-2"));
    }

    #[test]
    fn division_by_zero_is_an_error_value() {
        assert_eq!(
            apply_binary(BinaryOp::Div, &num("1"), &num("0")),
            Value::error("division by zero")
        );
        assert_eq!(
            apply_binary(BinaryOp::Rem, &num("1"), &num("0")),
            Value::error("division by zero")
        );
    }

    #[test]
    fn error_operands_propagate_left_first() {
        let left = Value::error("left broke");
        let right = Value::error("right broke");
        assert_eq!(apply_binary(BinaryOp::Add, &left, &right), left);
        assert_eq!(apply_binary(BinaryOp::Add, &num("1"), &right), right);
        assert_eq!(apply_unary(UnaryOp::Not, &left), left);
    }

    #[test]
    fn incompatible_types_report_operator_and_types() {
        let result = apply_binary(BinaryOp::Add, &Value::Bool(true), &num("1"));
        assert_eq!(
            result,
            Value::error("operator '+' not applicable to boolean and number")
        );
    }

    #[test]
    fn equality_is_structural_and_total() {
        assert_eq!(
            apply_binary(BinaryOp::Eq, &Value::Undefined, &Value::Undefined),
            Value::Bool(true)
        );
        assert_eq!(
            apply_binary(BinaryOp::Ne, &Value::Null, &Value::Undefined),
            Value::Bool(true)
        );
        assert_eq!(
            apply_binary(BinaryOp::Eq, &num("1.0"), &num("1.00")),
            Value::Bool(true)
        );
    }

    #[test]
    fn text_comparison_is_lexicographic() {
        assert_eq!(
            apply_binary(BinaryOp::Lt, &Value::text("abc"), &Value::text("abd")),
            Value::Bool(true)
        );
    }

    #[test]
    fn array_read_out_of_range_is_undefined() {
        let array = Value::Array(vec![num("1"), num("2")]);
        assert_eq!(index_value(&array, &num("1")), num("2"));
        assert_eq!(index_value(&array, &num("5")), Value::Undefined);
        assert_eq!(index_value(&array, &num("-1")), Value::Undefined);
        assert!(index_value(&array, &num("0.5")).is_error());
    }

    #[test]
    fn object_key_missing_is_undefined() {
        let object = ObjectBuilder::new().entry("a", num("1")).build();
        assert_eq!(field_access(&object, "a"), num("1"));
        assert_eq!(field_access(&object, "b"), Value::Undefined);
        assert!(field_access(&Value::Null, "a").is_error());
    }
}
