use serde_json::{Map, Number, Value};

use crate::ast::{Builtin, Filter};
use crate::error::TransformError;
use crate::eval::{Evaluator, size_units};
use crate::value::{self, as_f64, compare, equals, is_truthy, type_name};

fn first_arg(args: &[Filter]) -> Result<&Filter, TransformError> {
    args.first()
        .ok_or_else(|| TransformError::Runtime("missing function argument".to_owned()))
}

fn mismatch(what: &str, value: &Value) -> TransformError {
    TransformError::TypeMismatch(format!("{} {what}", type_name(value)))
}

/// Dispatch a builtin call against `input`.
pub(crate) fn call_builtin(
    ev: &Evaluator,
    builtin: Builtin,
    args: &[Filter],
    input: &Value,
) -> Result<Vec<Value>, TransformError> {
    let single = |v: Value| -> Result<Vec<Value>, TransformError> { Ok(vec![v]) };

    match builtin {
        Builtin::Empty => Ok(Vec::new()),
        Builtin::Not => single(Value::Bool(!is_truthy(input))),
        Builtin::Type => single(Value::String(type_name(input).to_owned())),
        Builtin::Length => single(length(input)?),
        Builtin::Keys => single(keys(input)?),
        // `values` keeps non-null inputs, like `select(. != null)`.
        Builtin::Values => Ok(if input.is_null() {
            Vec::new()
        } else {
            vec![input.clone()]
        }),

        Builtin::Has => ev
            .eval(first_arg(args)?, input)?
            .into_iter()
            .map(|key| has(input, &key).map(Value::Bool))
            .collect(),

        Builtin::Select => {
            let mut out = Vec::new();
            for cond in ev.eval(first_arg(args)?, input)? {
                if is_truthy(&cond) {
                    out.push(input.clone());
                }
            }
            Ok(out)
        }

        Builtin::Map => {
            let items: Vec<&Value> = match input {
                Value::Array(items) => items.iter().collect(),
                Value::Object(map) => map.values().collect(),
                other => return Err(mismatch("cannot be iterated", other)),
            };
            let f = first_arg(args)?;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.extend(ev.eval(f, item)?);
            }
            single(Value::Array(out))
        }

        Builtin::Add => {
            let items: Vec<Value> = match input {
                Value::Null => return single(Value::Null),
                Value::Array(items) => items.clone(),
                Value::Object(map) => map.values().cloned().collect(),
                other => return Err(mismatch("cannot be added up", other)),
            };
            let mut acc = Value::Null;
            for item in items {
                acc = value::add(acc, item)?;
                ev.charge(size_units(&acc))?;
            }
            single(acc)
        }

        Builtin::Any | Builtin::All => {
            let Value::Array(items) = input else {
                return Err(mismatch("is not an array", input));
            };
            let result = if builtin == Builtin::Any {
                items.iter().any(is_truthy)
            } else {
                items.iter().all(is_truthy)
            };
            single(Value::Bool(result))
        }

        Builtin::First | Builtin::Last => match input {
            Value::Null => single(Value::Null),
            Value::Array(items) => {
                let item = if builtin == Builtin::First {
                    items.first()
                } else {
                    items.last()
                };
                single(item.cloned().unwrap_or(Value::Null))
            }
            other => Err(mismatch("is not an array", other)),
        },

        Builtin::Sort | Builtin::Unique => {
            let Value::Array(items) = input else {
                return Err(mismatch("cannot be sorted", input));
            };
            let mut sorted = items.clone();
            sorted.sort_by(compare);
            if builtin == Builtin::Unique {
                sorted.dedup_by(|a, b| equals(a, b));
            }
            single(Value::Array(sorted))
        }

        Builtin::Reverse => match input {
            Value::Null => single(Value::Array(Vec::new())),
            Value::Array(items) => single(Value::Array(items.iter().rev().cloned().collect())),
            Value::String(s) => single(Value::String(s.chars().rev().collect())),
            other => Err(mismatch("cannot be reversed", other)),
        },

        Builtin::Min | Builtin::Max => {
            let Value::Array(items) = input else {
                return Err(mismatch("is not an array", input));
            };
            let found = if builtin == Builtin::Min {
                items.iter().min_by(|a, b| compare(a, b))
            } else {
                items.iter().max_by(|a, b| compare(a, b))
            };
            single(found.cloned().unwrap_or(Value::Null))
        }

        Builtin::ToString => {
            let s = match input {
                Value::String(s) => s.clone(),
                other => serde_json::to_string(other)
                    .map_err(|e| TransformError::Runtime(e.to_string()))?,
            };
            ev.charge(1 + (s.len() / 16) as u64)?;
            single(Value::String(s))
        }

        Builtin::ToNumber => match input {
            Value::Number(_) => single(input.clone()),
            Value::String(s) => {
                let parsed: f64 = s.trim().parse().map_err(|_| {
                    TransformError::Runtime(format!("cannot parse {s:?} as a number"))
                })?;
                single(value::number(parsed)?)
            }
            other => Err(mismatch("cannot be parsed as a number", other)),
        },

        Builtin::AsciiDowncase | Builtin::AsciiUpcase => {
            let Value::String(s) = input else {
                return Err(mismatch("cannot be case-converted", input));
            };
            let converted = if builtin == Builtin::AsciiDowncase {
                s.to_ascii_lowercase()
            } else {
                s.to_ascii_uppercase()
            };
            single(Value::String(converted))
        }

        Builtin::Join => {
            let mut out = Vec::new();
            for sep in ev.eval(first_arg(args)?, input)? {
                let joined = join(input, &sep)?;
                ev.charge(1 + (joined.len() / 16) as u64)?;
                out.push(Value::String(joined));
            }
            Ok(out)
        }

        Builtin::ToEntries => {
            let Value::Object(map) = input else {
                return Err(mismatch("has no entries", input));
            };
            let entries = map
                .iter()
                .map(|(k, v)| {
                    let mut entry = Map::new();
                    entry.insert("key".to_owned(), Value::String(k.clone()));
                    entry.insert("value".to_owned(), v.clone());
                    Value::Object(entry)
                })
                .collect();
            single(Value::Array(entries))
        }

        Builtin::FromEntries => single(from_entries(input)?),

        Builtin::Split => {
            let Value::String(s) = input else {
                return Err(mismatch("cannot be split", input));
            };
            let mut out = Vec::new();
            for sep in &ev.eval(first_arg(args)?, input)? {
                let Value::String(sep) = sep else {
                    return Err(mismatch("cannot be used as a separator", sep));
                };
                let parts: Vec<Value> = if sep.is_empty() {
                    s.chars().map(|c| Value::String(c.to_string())).collect()
                } else {
                    s.split(sep.as_str())
                        .map(|p| Value::String(p.to_owned()))
                        .collect()
                };
                ev.charge(parts.len() as u64)?;
                out.push(Value::Array(parts));
            }
            Ok(out)
        }

        Builtin::SortBy | Builtin::GroupBy => {
            let Value::Array(items) = input else {
                return Err(mismatch("cannot be sorted", input));
            };
            let f = first_arg(args)?;
            let mut keyed = Vec::with_capacity(items.len());
            for item in items {
                keyed.push((Value::Array(ev.eval(f, item)?), item.clone()));
            }
            // Stable, so equal keys keep their input order.
            keyed.sort_by(|(a, _), (b, _)| compare(a, b));
            if builtin == Builtin::SortBy {
                return single(Value::Array(keyed.into_iter().map(|(_, v)| v).collect()));
            }
            let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
            for (key, item) in keyed {
                match groups.last_mut() {
                    Some((last, group)) if equals(last, &key) => group.push(item),
                    _ => groups.push((key, vec![item])),
                }
            }
            single(Value::Array(
                groups.into_iter().map(|(_, g)| Value::Array(g)).collect(),
            ))
        }

        Builtin::Floor => match input {
            Value::Number(n) => single(value::number(as_f64(n).floor())?),
            other => Err(mismatch("has no floor", other)),
        },

        Builtin::ToJson => {
            let s = serde_json::to_string(input)
                .map_err(|e| TransformError::Runtime(e.to_string()))?;
            ev.charge(1 + (s.len() / 16) as u64)?;
            single(Value::String(s))
        }

        Builtin::FromJson => {
            let Value::String(s) = input else {
                return Err(mismatch("cannot be parsed as JSON", input));
            };
            ev.charge(1 + (s.len() / 16) as u64)?;
            let parsed = serde_json::from_str(s)
                .map_err(|e| TransformError::Runtime(format!("invalid JSON text: {e}")))?;
            single(parsed)
        }

        Builtin::Range => {
            let bounds = args
                .iter()
                .map(|arg| ev.eval(arg, input))
                .collect::<Result<Vec<_>, _>>()?;
            let (froms, tos) = match bounds.as_slice() {
                [upto] => (vec![Value::from(0)], upto.clone()),
                [from, upto] => (from.clone(), upto.clone()),
                _ => {
                    return Err(TransformError::Runtime(
                        "range takes one or two arguments".to_owned(),
                    ));
                }
            };
            let mut out = Vec::new();
            for from in &froms {
                for to in &tos {
                    let (Value::Number(from), Value::Number(to)) = (from, to) else {
                        return Err(TransformError::TypeMismatch(
                            "range bounds must be numbers".to_owned(),
                        ));
                    };
                    let (mut n, to) = (as_f64(from), as_f64(to));
                    // Charged per element, so a huge range hits the budget first.
                    while n < to {
                        ev.charge(1)?;
                        out.push(value::number(n)?);
                        n += 1.0;
                    }
                }
            }
            Ok(out)
        }
    }
}

fn length(input: &Value) -> Result<Value, TransformError> {
    let len = match input {
        Value::Null => 0,
        Value::Number(n) => return value::number(as_f64(n).abs()),
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::Bool(_) => return Err(mismatch("has no length", input)),
    };
    Ok(Value::Number(Number::from(len)))
}

fn keys(input: &Value) -> Result<Value, TransformError> {
    match input {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            Ok(Value::Array(
                keys.into_iter().map(|k| Value::String(k.clone())).collect(),
            ))
        }
        Value::Array(items) => Ok(Value::Array(
            (0..items.len()).map(|i| Value::Number(Number::from(i))).collect(),
        )),
        other => Err(mismatch("has no keys", other)),
    }
}

#[allow(clippy::cast_precision_loss)]
fn has(input: &Value, key: &Value) -> Result<bool, TransformError> {
    match (input, key) {
        (Value::Object(map), Value::String(k)) => Ok(map.contains_key(k)),
        (Value::Array(items), Value::Number(n)) => {
            let idx = as_f64(n);
            Ok(idx >= 0.0 && idx < items.len() as f64)
        }
        (other, key) => Err(TransformError::TypeMismatch(format!(
            "cannot check whether {} has a {} key",
            type_name(other),
            type_name(key)
        ))),
    }
}

fn join(input: &Value, sep: &Value) -> Result<String, TransformError> {
    let Value::String(sep) = sep else {
        return Err(mismatch("cannot be used as a separator", sep));
    };
    let items = match input {
        Value::Null => return Ok(String::new()),
        Value::Array(items) => items,
        other => return Err(mismatch("cannot be joined", other)),
    };
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        parts.push(match item {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => return Err(mismatch("cannot be joined", other)),
        });
    }
    Ok(parts.join(sep))
}

fn from_entries(input: &Value) -> Result<Value, TransformError> {
    let Value::Array(items) = input else {
        return Err(mismatch("is not an array of entries", input));
    };
    let mut out = Map::new();
    for item in items {
        let Value::Object(entry) = item else {
            return Err(mismatch("is not an entry object", item));
        };
        let key = ["key", "k", "name", "Key", "K", "Name"]
            .iter()
            .find_map(|k| entry.get(*k))
            .ok_or_else(|| TransformError::TypeMismatch("entry has no key".to_owned()))?;
        let key = match key {
            Value::String(s) => s.clone(),
            Value::Number(_) | Value::Bool(_) => key.to_string(),
            other => return Err(mismatch("cannot be used as an object key", other)),
        };
        let value = ["value", "v", "Value", "V"]
            .iter()
            .find_map(|k| entry.get(*k))
            .cloned()
            .unwrap_or(Value::Null);
        out.insert(key, value);
    }
    Ok(Value::Object(out))
}
