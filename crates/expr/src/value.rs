//! Operations on JSON values: ordering, truthiness and arithmetic.

use std::cmp::Ordering;

use serde_json::{Map, Number, Value};

use crate::error::TransformError;

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Only `null` and `false` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

/// Total order over JSON values:
/// `null < false < true < numbers < strings < arrays < objects`.
///
/// Objects compare by their sorted key sets first, then by values in key
/// order.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => as_f64(x).total_cmp(&as_f64(y)),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let mut xk: Vec<&String> = x.keys().collect();
            let mut yk: Vec<&String> = y.keys().collect();
            xk.sort();
            yk.sort();
            let ord = xk.cmp(&yk);
            if ord != Ordering::Equal {
                return ord;
            }
            for key in xk {
                let ord = compare(&x[key.as_str()], &y[key.as_str()]);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Value equality that treats `1` and `1.0` as equal.
pub fn equals(a: &Value, b: &Value) -> bool {
    compare(a, b) == Ordering::Equal
}

#[allow(clippy::cast_precision_loss)]
pub fn as_f64(n: &Number) -> f64 {
    n.as_i64()
        .map(|i| i as f64)
        .or_else(|| n.as_u64().map(|u| u as f64))
        .or_else(|| n.as_f64())
        .unwrap_or(f64::NAN)
}

/// Build a JSON number, preferring an integer representation when exact.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn number(f: f64) -> Result<Value, TransformError> {
    if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
        return Ok(Value::Number(Number::from(f as i64)));
    }
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| TransformError::Runtime(format!("{f} is not a finite number")))
}

fn mismatch(op: &str, a: &Value, b: &Value) -> TransformError {
    TransformError::TypeMismatch(format!(
        "{} and {} cannot be {op}",
        type_name(a),
        type_name(b)
    ))
}

/// `a + b`. `null` is the identity for every type.
pub fn add(a: Value, b: Value) -> Result<Value, TransformError> {
    match (a, b) {
        (Value::Null, other) | (other, Value::Null) => Ok(other),
        (Value::Number(x), Value::Number(y)) => number(as_f64(&x) + as_f64(&y)),
        (Value::String(mut x), Value::String(y)) => {
            x.push_str(&y);
            Ok(Value::String(x))
        }
        (Value::Array(mut x), Value::Array(y)) => {
            x.extend(y);
            Ok(Value::Array(x))
        }
        (Value::Object(mut x), Value::Object(y)) => {
            x.extend(y);
            Ok(Value::Object(x))
        }
        (a, b) => Err(mismatch("added", &a, &b)),
    }
}

/// `a - b`. Arrays subtract by removing every element equal to one in `b`.
pub fn sub(a: Value, b: Value) -> Result<Value, TransformError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => number(as_f64(&x) - as_f64(&y)),
        (Value::Array(x), Value::Array(y)) => Ok(Value::Array(
            x.into_iter()
                .filter(|item| !y.iter().any(|r| equals(item, r)))
                .collect(),
        )),
        (a, b) => Err(mismatch("subtracted", &a, &b)),
    }
}

/// `a * b`. Objects merge recursively.
pub fn mul(a: Value, b: Value) -> Result<Value, TransformError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => number(as_f64(&x) * as_f64(&y)),
        (Value::Object(x), Value::Object(y)) => Ok(Value::Object(deep_merge(x, y))),
        (a, b) => Err(mismatch("multiplied", &a, &b)),
    }
}

fn deep_merge(mut left: Map<String, Value>, right: Map<String, Value>) -> Map<String, Value> {
    for (key, r) in right {
        let merged = match (left.remove(&key), r) {
            (Some(Value::Object(l)), Value::Object(r)) => Value::Object(deep_merge(l, r)),
            (_, r) => r,
        };
        left.insert(key, merged);
    }
    left
}

/// `a / b`. Strings divide by splitting on the separator.
pub fn div(a: Value, b: Value) -> Result<Value, TransformError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let divisor = as_f64(&y);
            if divisor == 0.0 {
                return Err(TransformError::Runtime("division by zero".to_owned()));
            }
            number(as_f64(&x) / divisor)
        }
        (Value::String(x), Value::String(sep)) => Ok(Value::Array(if x.is_empty() {
            Vec::new()
        } else {
            x.split(sep.as_str())
                .map(|s| Value::String(s.to_owned()))
                .collect()
        })),
        (a, b) => Err(mismatch("divided", &a, &b)),
    }
}

/// `a % b` on the integer parts of both operands.
#[allow(clippy::cast_possible_truncation)]
pub fn rem(a: Value, b: Value) -> Result<Value, TransformError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let divisor = as_f64(&y).trunc() as i64;
            if divisor == 0 {
                return Err(TransformError::Runtime("modulo by zero".to_owned()));
            }
            let dividend = as_f64(&x).trunc() as i64;
            Ok(Value::Number(Number::from(
                dividend.wrapping_rem(divisor.wrapping_abs()),
            )))
        }
        (a, b) => Err(mismatch("divided", &a, &b)),
    }
}
