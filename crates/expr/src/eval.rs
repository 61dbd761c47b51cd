use std::cell::{Cell, RefCell};

use serde_json::{Map, Value};

use crate::NullPolicy;
use crate::ast::{ArithOp, CompareOp, Filter, ObjectKey, Step};
use crate::builtins::call_builtin;
use crate::error::TransformError;
use crate::value::{self, as_f64, compare, equals, is_truthy, type_name};

/// Single-use evaluator carrying the step budget for one run.
pub(crate) struct Evaluator {
    policy: NullPolicy,
    limit: u64,
    used: Cell<u64>,
    /// Variable bindings, innermost last.
    scope: RefCell<Vec<(String, Value)>>,
}

impl Evaluator {
    pub(crate) fn new(policy: NullPolicy, limit: u64) -> Self {
        Self {
            policy,
            limit,
            used: Cell::new(0),
            scope: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn charge(&self, units: u64) -> Result<(), TransformError> {
        let used = self.used.get().saturating_add(units);
        self.used.set(used);
        if used > self.limit {
            Err(TransformError::BudgetExceeded { limit: self.limit })
        } else {
            Ok(())
        }
    }

    /// Evaluate `filter` against `input`, producing every output in order.
    pub(crate) fn eval(&self, filter: &Filter, input: &Value) -> Result<Vec<Value>, TransformError> {
        self.charge(1)?;
        let outputs = match filter {
            Filter::Identity => vec![input.clone()],
            Filter::Literal(v) => vec![v.clone()],
            Filter::Path { base, steps } => {
                let mut current = self.eval(base, input)?;
                for path_step in steps {
                    let mut next = Vec::new();
                    for v in &current {
                        match self.apply_step(&path_step.step, v, input) {
                            Ok(values) => next.extend(values),
                            Err(e) if path_step.optional && e.is_catchable() => {}
                            Err(e) => return Err(e),
                        }
                    }
                    self.charge(next.len() as u64)?;
                    current = next;
                }
                current
            }
            Filter::Try(inner) => match self.eval(inner, input) {
                Ok(values) => values,
                Err(e) if e.is_catchable() => Vec::new(),
                Err(e) => return Err(e),
            },
            Filter::Pipe(stages) => {
                let mut current = vec![input.clone()];
                for stage in stages {
                    let mut next = Vec::new();
                    for v in &current {
                        next.extend(self.eval(stage, v)?);
                    }
                    current = next;
                }
                current
            }
            Filter::Comma(items) => {
                let mut out = Vec::new();
                for item in items {
                    out.extend(self.eval(item, input)?);
                }
                out
            }
            Filter::Alternative(items) => self.eval_alternative(items, input)?,
            Filter::Or(items) => self.eval_logic(items, input, true)?,
            Filter::And(items) => self.eval_logic(items, input, false)?,
            Filter::Compare(op, lhs, rhs) => {
                let rights = self.eval(rhs, input)?;
                let lefts = self.eval(lhs, input)?;
                let mut out = Vec::with_capacity(rights.len() * lefts.len());
                for r in &rights {
                    for l in &lefts {
                        out.push(Value::Bool(compare_with(*op, l, r)));
                    }
                }
                out
            }
            Filter::Arith { first, rest } => {
                let mut acc = self.eval(first, input)?;
                for (op, rhs) in rest {
                    let rights = self.eval(rhs, input)?;
                    let mut next = Vec::with_capacity(rights.len() * acc.len());
                    for r in &rights {
                        for l in &acc {
                            let v = apply_arith(*op, l.clone(), r.clone())?;
                            self.charge(size_units(&v))?;
                            next.push(v);
                        }
                    }
                    acc = next;
                }
                acc
            }
            Filter::Negate(inner) => self
                .eval(inner, input)?
                .into_iter()
                .map(|v| match v {
                    Value::Number(n) => value::number(-as_f64(&n)),
                    other => Err(TransformError::TypeMismatch(format!(
                        "{} cannot be negated",
                        type_name(&other)
                    ))),
                })
                .collect::<Result<_, _>>()?,
            Filter::Array(None) => vec![Value::Array(Vec::new())],
            Filter::Array(Some(inner)) => vec![Value::Array(self.eval(inner, input)?)],
            Filter::Object(entries) => self.eval_object(entries, input)?,
            Filter::Call(builtin, args) => call_builtin(self, *builtin, args, input)?,
            Filter::If { branches, otherwise } => self.eval_if(branches, otherwise.as_deref(), input)?,
            Filter::Bind { source, name, body } => {
                let mut out = Vec::new();
                for v in self.eval(source, input)? {
                    out.extend(self.with_binding(name, v, || self.eval(body, input))?);
                }
                out
            }
            Filter::Var(name) => vec![self.lookup(name)?],
            Filter::Reduce {
                source,
                name,
                init,
                update,
            } => {
                let items = self.eval(source, input)?;
                let mut out = Vec::new();
                for mut acc in self.eval(init, input)? {
                    for item in &items {
                        let updated =
                            self.with_binding(name, item.clone(), || self.eval(update, &acc))?;
                        acc = updated.into_iter().last().unwrap_or(Value::Null);
                    }
                    out.push(acc);
                }
                out
            }
        };
        self.charge(outputs.len() as u64)?;
        Ok(outputs)
    }

    /// Run `f` with `$name` bound to `value`.
    pub(crate) fn with_binding<T>(
        &self,
        name: &str,
        value: Value,
        f: impl FnOnce() -> Result<T, TransformError>,
    ) -> Result<T, TransformError> {
        self.scope.borrow_mut().push((name.to_owned(), value));
        let result = f();
        self.scope.borrow_mut().pop();
        result
    }

    fn lookup(&self, name: &str) -> Result<Value, TransformError> {
        self.scope
            .borrow()
            .iter()
            .rev()
            .find(|(bound, _)| bound == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| TransformError::Runtime(format!("${name} is not defined")))
    }

    fn eval_if(
        &self,
        branches: &[(Filter, Filter)],
        otherwise: Option<&Filter>,
        input: &Value,
    ) -> Result<Vec<Value>, TransformError> {
        let Some(((cond, then), rest)) = branches.split_first() else {
            return match otherwise {
                Some(f) => self.eval(f, input),
                None => Ok(vec![input.clone()]),
            };
        };
        let mut out = Vec::new();
        for c in self.eval(cond, input)? {
            if is_truthy(&c) {
                out.extend(self.eval(then, input)?);
            } else {
                out.extend(self.eval_if(rest, otherwise, input)?);
            }
        }
        Ok(out)
    }

    fn eval_alternative(&self, items: &[Filter], input: &Value) -> Result<Vec<Value>, TransformError> {
        let Some((last, init)) = items.split_last() else {
            return Ok(Vec::new());
        };
        for item in init {
            match self.eval(item, input) {
                Ok(values) => {
                    let truthy: Vec<Value> = values.into_iter().filter(is_truthy).collect();
                    if !truthy.is_empty() {
                        return Ok(truthy);
                    }
                }
                Err(e) if e.is_catchable() => {}
                Err(e) => return Err(e),
            }
        }
        self.eval(last, input)
    }

    /// `or` / `and` over generators, short-circuiting per left-hand output.
    fn eval_logic(
        &self,
        items: &[Filter],
        input: &Value,
        is_or: bool,
    ) -> Result<Vec<Value>, TransformError> {
        let Some((first, rest)) = items.split_first() else {
            return Ok(Vec::new());
        };
        let mut current: Vec<bool> = self.eval(first, input)?.iter().map(is_truthy).collect();
        for item in rest {
            let mut next = Vec::with_capacity(current.len());
            for l in current {
                if l == is_or {
                    next.push(l);
                } else {
                    next.extend(self.eval(item, input)?.iter().map(is_truthy));
                }
            }
            current = next;
        }
        Ok(current.into_iter().map(Value::Bool).collect())
    }

    fn eval_object(
        &self,
        entries: &[(ObjectKey, Filter)],
        input: &Value,
    ) -> Result<Vec<Value>, TransformError> {
        let mut partials = vec![Map::new()];
        for (key, value_filter) in entries {
            let keys: Vec<String> = match key {
                ObjectKey::Name(name) => vec![name.clone()],
                ObjectKey::Computed(filter) => self
                    .eval(filter, input)?
                    .into_iter()
                    .map(|k| match k {
                        Value::String(s) => Ok(s),
                        other => Err(TransformError::TypeMismatch(format!(
                            "object keys must be strings, got {}",
                            type_name(&other)
                        ))),
                    })
                    .collect::<Result<_, _>>()?,
            };
            let values = self.eval(value_filter, input)?;

            let mut next = Vec::with_capacity(partials.len() * keys.len() * values.len());
            for partial in &partials {
                for k in &keys {
                    for v in &values {
                        let mut object = partial.clone();
                        object.insert(k.clone(), v.clone());
                        next.push(object);
                    }
                }
            }
            self.charge(next.len() as u64)?;
            partials = next;
        }
        Ok(partials.into_iter().map(Value::Object).collect())
    }

    fn apply_step(
        &self,
        step: &Step,
        value: &Value,
        path_input: &Value,
    ) -> Result<Vec<Value>, TransformError> {
        match step {
            Step::Field(name) => Ok(vec![self.field(value, name)?]),
            Step::Index(index) => self
                .eval(index, path_input)?
                .iter()
                .map(|key| self.index(value, key))
                .collect(),
            Step::Slice(from, to) => {
                let froms = match from {
                    Some(f) => self.eval(f, path_input)?,
                    None => vec![Value::Null],
                };
                let tos = match to {
                    Some(t) => self.eval(t, path_input)?,
                    None => vec![Value::Null],
                };
                let mut out = Vec::with_capacity(froms.len() * tos.len());
                for t in &tos {
                    for f in &froms {
                        out.push(self.slice(value, f, t)?);
                    }
                }
                Ok(out)
            }
            Step::Iterate => match value {
                Value::Array(items) => Ok(items.clone()),
                Value::Object(map) => Ok(map.values().cloned().collect()),
                other => Err(TransformError::TypeMismatch(format!(
                    "cannot iterate over {}",
                    type_name(other)
                ))),
            },
        }
    }

    /// Resolution of a path step that found nothing, per the null policy.
    fn missing(&self, path: String) -> Result<Value, TransformError> {
        match self.policy {
            NullPolicy::Strict => Err(TransformError::PathNotFound(path)),
            NullPolicy::Propagate => Ok(Value::Null),
        }
    }

    fn field(&self, value: &Value, name: &str) -> Result<Value, TransformError> {
        match value {
            Value::Object(map) => match map.get(name) {
                Some(v) => Ok(v.clone()),
                None => self.missing(format!(".{name}")),
            },
            Value::Null => self.missing(format!(".{name}")),
            other => Err(TransformError::TypeMismatch(format!(
                "cannot index {} with {name:?}",
                type_name(other)
            ))),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn index(&self, value: &Value, key: &Value) -> Result<Value, TransformError> {
        match (value, key) {
            (_, Value::String(name)) => self.field(value, name),
            (Value::Array(items), Value::Number(n)) => {
                let raw = as_f64(n).floor() as i64;
                let idx = if raw < 0 { raw + items.len() as i64 } else { raw };
                match usize::try_from(idx).ok().and_then(|i| items.get(i)) {
                    Some(v) => Ok(v.clone()),
                    None => self.missing(format!("[{raw}]")),
                }
            }
            (Value::Null, Value::Number(n)) => self.missing(format!("[{n}]")),
            (other, key) => Err(TransformError::TypeMismatch(format!(
                "cannot index {} with {}",
                type_name(other),
                type_name(key)
            ))),
        }
    }

    fn slice(&self, value: &Value, from: &Value, to: &Value) -> Result<Value, TransformError> {
        match value {
            Value::Array(items) => {
                let (start, end) = slice_bounds(items.len(), from, to)?;
                Ok(Value::Array(items[start..end].to_vec()))
            }
            Value::String(s) => {
                let chars: Vec<char> = s.chars().collect();
                let (start, end) = slice_bounds(chars.len(), from, to)?;
                Ok(Value::String(chars[start..end].iter().collect()))
            }
            Value::Null => self.missing("[:]".to_owned()),
            other => Err(TransformError::TypeMismatch(format!(
                "cannot slice {}",
                type_name(other)
            ))),
        }
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
fn slice_bounds(len: usize, from: &Value, to: &Value) -> Result<(usize, usize), TransformError> {
    let len_i = len as i64;
    let resolve = |bound: &Value, default: i64| -> Result<usize, TransformError> {
        let raw = match bound {
            Value::Null => default,
            Value::Number(n) => as_f64(n).floor() as i64,
            other => {
                return Err(TransformError::TypeMismatch(format!(
                    "slice bounds must be numbers, got {}",
                    type_name(other)
                )));
            }
        };
        let adjusted = if raw < 0 { raw + len_i } else { raw };
        Ok(adjusted.clamp(0, len_i) as usize)
    };
    let start = resolve(from, 0)?;
    let end = resolve(to, len_i)?;
    Ok((start, end.max(start)))
}

fn compare_with(op: CompareOp, l: &Value, r: &Value) -> bool {
    match op {
        CompareOp::Eq => equals(l, r),
        CompareOp::Ne => !equals(l, r),
        CompareOp::Lt => compare(l, r).is_lt(),
        CompareOp::Le => compare(l, r).is_le(),
        CompareOp::Gt => compare(l, r).is_gt(),
        CompareOp::Ge => compare(l, r).is_ge(),
    }
}

fn apply_arith(op: ArithOp, l: Value, r: Value) -> Result<Value, TransformError> {
    match op {
        ArithOp::Add => value::add(l, r),
        ArithOp::Sub => value::sub(l, r),
        ArithOp::Mul => value::mul(l, r),
        ArithOp::Div => value::div(l, r),
        ArithOp::Mod => value::rem(l, r),
    }
}

/// Budget units charged for a freshly built value.
pub(crate) fn size_units(value: &Value) -> u64 {
    let len = match value {
        Value::String(s) => s.len() / 16,
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        _ => 0,
    };
    1 + len as u64
}
