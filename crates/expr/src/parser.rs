//! Hand-written recursive descent parser for the query language.
//!
//! `nom` handles token recognition; operator precedence is encoded by the
//! layering of the `parse_*` functions, lowest precedence first:
//!
//! `|` < `,` < `//` < `or` < `and` < comparisons < `+ -` < `* / %` < unary `-`
//! < postfix path steps.
//!
//! `term as $name | body` binds at the postfix layer and takes the rest of the
//! enclosing pipe as its body, so `.a + .b as $x | f` is `.a + (.b as $x | f)`.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0, one_of},
    combinator::{not, opt, recognize},
    error::{Error, ErrorKind},
    multi::{separated_list0, separated_list1},
    sequence::{delimited, pair, terminated, tuple},
};
use serde_json::{Number, Value};

use crate::ast::{ArithOp, Builtin, CompareOp, Filter, ObjectKey, PathStep, Step};
use crate::error::TransformError;

/// Parse a complete expression into a [`Filter`].
///
/// Rejects empty input, trailing tokens, and bracket nesting deeper than
/// `max_depth`.
pub fn parse_filter(input: &str, max_depth: usize) -> Result<Filter, TransformError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(TransformError::Parse("empty expression".to_owned()));
    }
    check_depth(input, max_depth)?;

    match parse_pipe(input) {
        Ok((rest, filter)) => {
            let rest = rest.trim();
            if rest.is_empty() {
                check_variables(&filter, &mut Vec::new())?;
                Ok(filter)
            } else {
                Err(TransformError::Parse(format!(
                    "unexpected trailing input: {:?}",
                    snippet(rest)
                )))
            }
        }
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(describe(&e)),
        Err(nom::Err::Incomplete(_)) => {
            Err(TransformError::Parse("incomplete expression".to_owned()))
        }
    }
}

fn describe(e: &Error<&str>) -> TransformError {
    if e.code == ErrorKind::Verify
        && let Ok((_, name)) = parse_ident_str(e.input)
    {
        return TransformError::Parse(format!("unknown function {name:?} or wrong arity"));
    }
    if e.input.is_empty() {
        return TransformError::Parse("unexpected end of expression".to_owned());
    }
    TransformError::Parse(format!("unexpected input at {:?}", snippet(e.input)))
}

fn snippet(s: &str) -> &str {
    match s.char_indices().nth(24) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Reject inputs whose bracket nesting exceeds `limit`, ignoring string contents.
fn check_depth(input: &str, limit: usize) -> Result<(), TransformError> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for c in input.chars() {
        if in_string {
            match (escaped, c) {
                (true, _) => escaped = false,
                (false, '\\') => escaped = true,
                (false, '"') => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' | '[' | '{' => {
                depth += 1;
                if depth > limit {
                    return Err(TransformError::TooDeep { limit });
                }
            }
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

/// Reject references to variables that no enclosing `as` or `reduce` binds.
fn check_variables<'a>(
    filter: &'a Filter,
    bound: &mut Vec<&'a str>,
) -> Result<(), TransformError> {
    match filter {
        Filter::Identity | Filter::Literal(_) => Ok(()),
        Filter::Var(name) => {
            if bound.contains(&name.as_str()) {
                Ok(())
            } else {
                Err(TransformError::Parse(format!("${name} is not defined")))
            }
        }
        Filter::Path { base, steps } => {
            check_variables(base, bound)?;
            for path_step in steps {
                match &path_step.step {
                    Step::Index(f) => check_variables(f, bound)?,
                    Step::Slice(from, to) => {
                        for f in [from, to].into_iter().flatten() {
                            check_variables(f, bound)?;
                        }
                    }
                    Step::Field(_) | Step::Iterate => {}
                }
            }
            Ok(())
        }
        Filter::Try(f) | Filter::Negate(f) | Filter::Array(Some(f)) => check_variables(f, bound),
        Filter::Array(None) => Ok(()),
        Filter::Pipe(items)
        | Filter::Comma(items)
        | Filter::Alternative(items)
        | Filter::Or(items)
        | Filter::And(items)
        | Filter::Call(_, items) => items.iter().try_for_each(|f| check_variables(f, bound)),
        Filter::Compare(_, lhs, rhs) => {
            check_variables(lhs, bound)?;
            check_variables(rhs, bound)
        }
        Filter::Arith { first, rest } => {
            check_variables(first, bound)?;
            rest.iter().try_for_each(|(_, f)| check_variables(f, bound))
        }
        Filter::Object(entries) => entries.iter().try_for_each(|(key, value)| {
            if let ObjectKey::Computed(f) = key {
                check_variables(f, bound)?;
            }
            check_variables(value, bound)
        }),
        Filter::If { branches, otherwise } => {
            for (cond, then) in branches {
                check_variables(cond, bound)?;
                check_variables(then, bound)?;
            }
            otherwise
                .as_deref()
                .map_or(Ok(()), |f| check_variables(f, bound))
        }
        Filter::Bind { source, name, body } => {
            check_variables(source, bound)?;
            with_bound(bound, name, |bound| check_variables(body, bound))
        }
        Filter::Reduce {
            source,
            name,
            init,
            update,
        } => {
            check_variables(source, bound)?;
            check_variables(init, bound)?;
            with_bound(bound, name, |bound| check_variables(update, bound))
        }
    }
}

fn with_bound<'a>(
    bound: &mut Vec<&'a str>,
    name: &'a str,
    f: impl FnOnce(&mut Vec<&'a str>) -> Result<(), TransformError>,
) -> Result<(), TransformError> {
    bound.push(name);
    let result = f(bound);
    bound.pop();
    result
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Consume optional whitespace around a parser.
fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Match a keyword that is not the prefix of a longer identifier.
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag(word), not(take_while1(is_ident_char)))
}

/// Parse a bare identifier matching `[a-zA-Z_][a-zA-Z0-9_]*`.
fn parse_ident_str(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(is_ident_char),
    ))(input)
}

fn parse_ident_owned(input: &str) -> IResult<&str, String> {
    let (rest, name) = parse_ident_str(input)?;
    Ok((rest, name.to_owned()))
}

/// Collapse a single-element chain into its element.
fn chain(mut items: Vec<Filter>, wrap: fn(Vec<Filter>) -> Filter) -> Filter {
    if items.len() == 1 {
        items.remove(0)
    } else {
        wrap(items)
    }
}

// ---------------------------------------------------------------------------
// Binary layers
// ---------------------------------------------------------------------------

fn parse_pipe(input: &str) -> IResult<&str, Filter> {
    let (rest, items) = separated_list1(ws(char('|')), parse_comma)(input)?;
    Ok((rest, chain(items, Filter::Pipe)))
}

fn parse_comma(input: &str) -> IResult<&str, Filter> {
    let (rest, items) = separated_list1(ws(char(',')), parse_alternative)(input)?;
    Ok((rest, chain(items, Filter::Comma)))
}

fn parse_alternative(input: &str) -> IResult<&str, Filter> {
    let (rest, items) = separated_list1(ws(tag("//")), parse_or)(input)?;
    Ok((rest, chain(items, Filter::Alternative)))
}

fn parse_or(input: &str) -> IResult<&str, Filter> {
    let (rest, items) = separated_list1(ws(keyword("or")), parse_and)(input)?;
    Ok((rest, chain(items, Filter::Or)))
}

fn parse_and(input: &str) -> IResult<&str, Filter> {
    let (rest, items) = separated_list1(ws(keyword("and")), parse_comparison)(input)?;
    Ok((rest, chain(items, Filter::And)))
}

fn parse_comparison(input: &str) -> IResult<&str, Filter> {
    let (input, lhs) = parse_additive(input)?;
    let (input, op) = opt(ws(alt((
        tag("=="),
        tag("!="),
        tag("<="),
        tag(">="),
        tag("<"),
        tag(">"),
    ))))(input)?;
    let Some(op) = op else {
        return Ok((input, lhs));
    };
    let op = match op {
        "==" => CompareOp::Eq,
        "!=" => CompareOp::Ne,
        "<=" => CompareOp::Le,
        ">=" => CompareOp::Ge,
        "<" => CompareOp::Lt,
        _ => CompareOp::Gt,
    };
    let (input, rhs) = parse_additive(input)?;
    Ok((input, Filter::Compare(op, Box::new(lhs), Box::new(rhs))))
}

fn parse_additive(input: &str) -> IResult<&str, Filter> {
    arith_layer(input, parse_multiplicative, |i| {
        let (i, op) = ws(one_of("+-"))(i)?;
        Ok((i, if op == '+' { ArithOp::Add } else { ArithOp::Sub }))
    })
}

fn parse_multiplicative(input: &str) -> IResult<&str, Filter> {
    arith_layer(input, parse_unary, |i| {
        // `/` must not swallow the first half of `//`.
        let (i, op) = ws(alt((
            tag("*"),
            terminated(tag("/"), not(char('/'))),
            tag("%"),
        )))(i)?;
        let op = match op {
            "*" => ArithOp::Mul,
            "/" => ArithOp::Div,
            _ => ArithOp::Mod,
        };
        Ok((i, op))
    })
}

fn arith_layer<'a>(
    input: &'a str,
    operand: fn(&'a str) -> IResult<&'a str, Filter>,
    operator: fn(&'a str) -> IResult<&'a str, ArithOp>,
) -> IResult<&'a str, Filter> {
    let (mut input, first) = operand(input)?;
    let mut rest = Vec::new();
    while let Ok((after_op, op)) = operator(input) {
        let (after_rhs, rhs) = operand(after_op)?;
        rest.push((op, rhs));
        input = after_rhs;
    }
    if rest.is_empty() {
        Ok((input, first))
    } else {
        Ok((
            input,
            Filter::Arith {
                first: Box::new(first),
                rest,
            },
        ))
    }
}

fn parse_unary(input: &str) -> IResult<&str, Filter> {
    let mut input = input;
    let mut negations = 0usize;
    loop {
        let (rest, _) = multispace0(input)?;
        match rest.strip_prefix('-') {
            Some(after) => {
                negations += 1;
                input = after;
            }
            None => {
                input = rest;
                break;
            }
        }
    }
    let (input, mut filter) = parse_postfix(input)?;
    if negations > 0 {
        filter = Filter::Negate(Box::new(filter));
        if negations % 2 == 0 {
            filter = Filter::Negate(Box::new(filter));
        }
    }
    Ok((input, filter))
}

// ---------------------------------------------------------------------------
// Postfix path steps
// ---------------------------------------------------------------------------

fn parse_postfix(input: &str) -> IResult<&str, Filter> {
    let (mut input, term) = parse_term(input)?;
    let (mut base, mut steps) = match term {
        Filter::Path { base, steps } => (*base, steps),
        other => (other, Vec::new()),
    };

    loop {
        if let Some(rest) = input.strip_prefix('?') {
            match steps.last_mut() {
                Some(last) => last.optional = true,
                None => base = Filter::Try(Box::new(base)),
            }
            input = rest;
        } else if let Some(rest) = input.strip_prefix('[') {
            let (rest, step) = parse_bracket_step(rest)?;
            steps.push(PathStep {
                step,
                optional: false,
            });
            input = rest;
        } else if let Some(rest) = input.strip_prefix('.') {
            let (rest, step) = if let Some(after) = rest.strip_prefix('[') {
                parse_bracket_step(after)?
            } else {
                let (rest, name) = parse_field_name(rest)?;
                (rest, Step::Field(name))
            };
            steps.push(PathStep {
                step,
                optional: false,
            });
            input = rest;
        } else {
            break;
        }
    }

    let filter = if steps.is_empty() {
        base
    } else {
        Filter::Path {
            base: Box::new(base),
            steps,
        }
    };

    match binding_head(input) {
        Ok((rest, name)) => {
            let (rest, body) = parse_pipe(rest)?;
            Ok((
                rest,
                Filter::Bind {
                    source: Box::new(filter),
                    name,
                    body: Box::new(body),
                },
            ))
        }
        Err(_) => Ok((input, filter)),
    }
}

/// ` as $name |`
fn binding_head(input: &str) -> IResult<&str, String> {
    let (input, _) = ws(keyword("as"))(input)?;
    let (input, name) = parse_variable_name(input)?;
    let (input, _) = ws(char('|'))(input)?;
    Ok((input, name))
}

fn parse_variable_name(input: &str) -> IResult<&str, String> {
    let (input, _) = char('$')(input)?;
    parse_ident_owned(input)
}

/// Field name after a `.`: an identifier or a quoted string.
fn parse_field_name(input: &str) -> IResult<&str, String> {
    if input.starts_with('"') {
        parse_string_literal(input)
    } else {
        parse_ident_owned(input)
    }
}

/// Parse the inside of `[...]` after the opening bracket.
fn parse_bracket_step(input: &str) -> IResult<&str, Step> {
    let (input, _) = multispace0(input)?;
    if let Some(rest) = input.strip_prefix(']') {
        return Ok((rest, Step::Iterate));
    }
    if let Some(rest) = input.strip_prefix(':') {
        let (rest, to) = parse_pipe(rest)?;
        let (rest, _) = ws(char(']'))(rest)?;
        return Ok((rest, Step::Slice(None, Some(Box::new(to)))));
    }

    let (input, from) = parse_pipe(input)?;
    let (input, _) = multispace0(input)?;
    if let Some(rest) = input.strip_prefix(':') {
        let (rest, _) = multispace0(rest)?;
        if let Some(rest) = rest.strip_prefix(']') {
            return Ok((rest, Step::Slice(Some(Box::new(from)), None)));
        }
        let (rest, to) = parse_pipe(rest)?;
        let (rest, _) = ws(char(']'))(rest)?;
        return Ok((
            rest,
            Step::Slice(Some(Box::new(from)), Some(Box::new(to))),
        ));
    }
    let (input, _) = char(']')(input)?;
    Ok((input, Step::Index(Box::new(from))))
}

// ---------------------------------------------------------------------------
// Terms
// ---------------------------------------------------------------------------

fn parse_term(input: &str) -> IResult<&str, Filter> {
    let (input, _) = multispace0(input)?;
    alt((
        parse_dot,
        parse_number,
        parse_string_term,
        parse_paren,
        parse_array,
        parse_object,
        parse_variable,
        parse_word,
    ))(input)
}

fn parse_variable(input: &str) -> IResult<&str, Filter> {
    let (rest, name) = parse_variable_name(input)?;
    Ok((rest, Filter::Var(name)))
}

/// `.`, `.name` or `."name"`. A bare `.` leaves any `[` to the postfix layer.
fn parse_dot(input: &str) -> IResult<&str, Filter> {
    let (rest, _) = char('.')(input)?;
    if rest.starts_with('.') {
        // Recursive descent (`..`) is not part of the language.
        return Err(nom::Err::Failure(Error::new(input, ErrorKind::Char)));
    }
    if rest.starts_with('"') || rest.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
    {
        let (rest, name) = parse_field_name(rest)?;
        return Ok((
            rest,
            Filter::Path {
                base: Box::new(Filter::Identity),
                steps: vec![PathStep {
                    step: Step::Field(name),
                    optional: false,
                }],
            },
        ));
    }
    Ok((rest, Filter::Identity))
}

/// Parse an unsigned number literal; the unary layer handles signs.
fn parse_number(input: &str) -> IResult<&str, Filter> {
    let (rest, text) = recognize(tuple((
        digit1,
        opt(pair(char('.'), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)?;

    let number = if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>().ok().and_then(Number::from_f64)
    } else {
        text.parse::<i64>()
            .map(Number::from)
            .ok()
            .or_else(|| text.parse::<f64>().ok().and_then(Number::from_f64))
    };
    let number = number.ok_or(nom::Err::Failure(Error::new(input, ErrorKind::Float)))?;
    Ok((rest, Filter::Literal(Value::Number(number))))
}

fn parse_string_term(input: &str) -> IResult<&str, Filter> {
    let (rest, s) = parse_string_literal(input)?;
    Ok((rest, Filter::Literal(Value::String(s))))
}

/// Parse a double-quoted string literal with JSON-style escapes.
fn parse_string_literal(input: &str) -> IResult<&str, String> {
    let (body, _) = char('"')(input)?;
    let fail = || nom::Err::Failure(Error::new(input, ErrorKind::Char));
    let mut result = String::new();
    let mut chars = body.char_indices();

    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Ok((&body[idx + 1..], result)),
            '\\' => {
                let (_, escape) = chars.next().ok_or_else(fail)?;
                match escape {
                    'n' => result.push('\n'),
                    't' => result.push('\t'),
                    'r' => result.push('\r'),
                    'b' => result.push('\u{8}'),
                    'f' => result.push('\u{c}'),
                    '\\' => result.push('\\'),
                    '/' => result.push('/'),
                    '"' => result.push('"'),
                    'u' => {
                        let mut code = 0u32;
                        for _ in 0..4 {
                            let (_, h) = chars.next().ok_or_else(fail)?;
                            code = code * 16 + h.to_digit(16).ok_or_else(fail)?;
                        }
                        result.push(char::from_u32(code).ok_or_else(fail)?);
                    }
                    _ => return Err(fail()),
                }
            }
            other => result.push(other),
        }
    }
    Err(fail())
}

fn parse_paren(input: &str) -> IResult<&str, Filter> {
    let (input, _) = char('(')(input)?;
    let (input, filter) = ws(parse_pipe)(input)?;
    let (input, _) = char(')')(input)?;
    Ok((input, filter))
}

/// Array construction: `[]` or `[f]`.
fn parse_array(input: &str) -> IResult<&str, Filter> {
    let (input, _) = char('[')(input)?;
    let (input, _) = multispace0(input)?;
    if let Some(rest) = input.strip_prefix(']') {
        return Ok((rest, Filter::Array(None)));
    }
    let (input, inner) = parse_pipe(input)?;
    let (input, _) = ws(char(']'))(input)?;
    Ok((input, Filter::Array(Some(Box::new(inner)))))
}

/// Object construction: `{a: f, "b": g, c, (k): v}`.
fn parse_object(input: &str) -> IResult<&str, Filter> {
    let (input, _) = char('{')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, entries) = separated_list0(ws(char(',')), parse_object_entry)(input)?;
    let (input, _) = ws(char('}'))(input)?;
    Ok((input, Filter::Object(entries)))
}

fn parse_object_entry(input: &str) -> IResult<&str, (ObjectKey, Filter)> {
    let (input, _) = multispace0(input)?;

    if input.starts_with('(') {
        let (input, key) = parse_paren(input)?;
        let (input, _) = ws(char(':'))(input)?;
        let (input, value) = parse_alternative(input)?;
        return Ok((input, (ObjectKey::Computed(key), value)));
    }

    // `{$name}` is shorthand for `{name: $name}`.
    if let Ok((rest, name)) = parse_variable_name(input) {
        return Ok((rest, (ObjectKey::Name(name.clone()), Filter::Var(name))));
    }

    let (input, name) = alt((parse_string_literal, parse_ident_owned))(input)?;
    let (input, value) = opt(pair(ws(char(':')), parse_alternative))(input)?;
    let value = match value {
        Some((_, value)) => value,
        // `{name}` is shorthand for `{name: .name}`.
        None => Filter::Path {
            base: Box::new(Filter::Identity),
            steps: vec![PathStep {
                step: Step::Field(name.clone()),
                optional: false,
            }],
        },
    };
    Ok((input, (ObjectKey::Name(name), value)))
}

/// Keyword literals, `if` and `reduce` forms, and builtin calls.
fn parse_word(input: &str) -> IResult<&str, Filter> {
    let (rest, word) = parse_ident_str(input)?;
    match word {
        "true" => return Ok((rest, Filter::Literal(Value::Bool(true)))),
        "false" => return Ok((rest, Filter::Literal(Value::Bool(false)))),
        "null" => return Ok((rest, Filter::Literal(Value::Null))),
        "if" => return parse_if(rest),
        "reduce" => return parse_reduce(rest),
        "and" | "or" | "as" | "then" | "elif" | "else" | "end" => {
            return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
        }
        _ => {}
    }

    let (rest, args) = opt(delimited(
        pair(multispace0, char('(')),
        separated_list1(ws(char(';')), parse_pipe),
        ws(char(')')),
    ))(rest)?;
    let args = args.unwrap_or_default();

    let builtin = Builtin::lookup(word, args.len())
        .ok_or(nom::Err::Failure(Error::new(input, ErrorKind::Verify)))?;
    Ok((rest, Filter::Call(builtin, args)))
}

/// The rest of `if c then a (elif d then b)* (else e)? end`, after `if`.
fn parse_if(input: &str) -> IResult<&str, Filter> {
    let mut branches = Vec::new();
    let (mut input, first) = if_branch(input)?;
    branches.push(first);
    while let Ok((rest, _)) = ws(keyword("elif"))(input) {
        let (rest, branch) = if_branch(rest)?;
        branches.push(branch);
        input = rest;
    }
    let (input, otherwise) = opt(pair(ws(keyword("else")), parse_pipe))(input)?;
    let (input, _) = ws(keyword("end"))(input)
        .map_err(|_: nom::Err<Error<&str>>| nom::Err::Failure(Error::new(input, ErrorKind::Tag)))?;
    Ok((
        input,
        Filter::If {
            branches,
            otherwise: otherwise.map(|(_, f)| Box::new(f)),
        },
    ))
}

fn if_branch(input: &str) -> IResult<&str, (Filter, Filter)> {
    let (input, cond) = parse_pipe(input)?;
    let (input, _) = ws(keyword("then"))(input)?;
    let (input, then) = parse_pipe(input)?;
    Ok((input, (cond, then)))
}

/// The rest of `reduce source as $name (init; update)`, after `reduce`.
fn parse_reduce(input: &str) -> IResult<&str, Filter> {
    let (input, source) = parse_postfix(input)?;
    let (input, _) = ws(keyword("as"))(input)?;
    let (input, name) = parse_variable_name(input)?;
    let (input, _) = ws(char('('))(input)?;
    let (input, init) = parse_pipe(input)?;
    let (input, _) = ws(char(';'))(input)?;
    let (input, update) = parse_pipe(input)?;
    let (input, _) = ws(char(')'))(input)?;
    Ok((
        input,
        Filter::Reduce {
            source: Box::new(source),
            name,
            init: Box::new(init),
            update: Box::new(update),
        },
    ))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse(input: &str) -> Filter {
        parse_filter(input, 64).unwrap()
    }

    fn field(name: &str) -> PathStep {
        PathStep {
            step: Step::Field(name.to_owned()),
            optional: false,
        }
    }

    #[test]
    fn identity() {
        assert_eq!(parse("."), Filter::Identity);
        assert_eq!(parse("  .  "), Filter::Identity);
    }

    #[test]
    fn field_chain() {
        assert_eq!(
            parse(".a.b"),
            Filter::Path {
                base: Box::new(Filter::Identity),
                steps: vec![field("a"), field("b")],
            }
        );
    }

    #[test]
    fn quoted_field_and_optional() {
        let Filter::Path { steps, .. } = parse(r#"."a key"?"#) else {
            panic!("expected path");
        };
        assert_eq!(steps[0].step, Step::Field("a key".into()));
        assert!(steps[0].optional);
    }

    #[test]
    fn brackets() {
        let Filter::Path { steps, .. } = parse(".items[0][].tags[1:3].x[:2][-1:]") else {
            panic!("expected path");
        };
        assert!(matches!(steps[1].step, Step::Index(_)));
        assert_eq!(steps[2].step, Step::Iterate);
        assert!(matches!(steps[4].step, Step::Slice(Some(_), Some(_))));
        assert!(matches!(steps[6].step, Step::Slice(None, Some(_))));
        assert!(matches!(steps[7].step, Step::Slice(Some(_), None)));
    }

    #[test]
    fn dot_bracket_forms() {
        assert!(matches!(parse(".[0]"), Filter::Path { .. }));
        assert!(matches!(parse(".[]"), Filter::Path { .. }));
        assert!(matches!(parse(".a.[0]"), Filter::Path { .. }));
        assert!(matches!(parse(r#".["k"]"#), Filter::Path { .. }));
    }

    #[test]
    fn precedence() {
        // `|` binds loosest, then `,`.
        let Filter::Pipe(stages) = parse(".a, .b | .c") else {
            panic!("expected pipe");
        };
        assert!(matches!(stages[0], Filter::Comma(_)));

        // `*` binds tighter than `+`.
        let Filter::Arith { rest, .. } = parse("1 + 2 * 3") else {
            panic!("expected arithmetic");
        };
        assert_eq!(rest.len(), 1);
        assert!(matches!(rest[0].1, Filter::Arith { .. }));

        assert!(matches!(parse(".a == 1 and .b"), Filter::And(_)));
        assert!(matches!(parse(".a // .b or .c"), Filter::Alternative(_)));
    }

    #[test]
    fn alternative_is_not_division() {
        assert!(matches!(parse(".a // 1"), Filter::Alternative(_)));
        assert!(matches!(parse(".a / 2"), Filter::Arith { .. }));
    }

    #[test]
    fn literals() {
        assert_eq!(parse("null"), Filter::Literal(Value::Null));
        assert_eq!(parse("true"), Filter::Literal(json!(true)));
        assert_eq!(parse("42"), Filter::Literal(json!(42)));
        assert_eq!(parse("1.5"), Filter::Literal(json!(1.5)));
        assert_eq!(parse("2e3"), Filter::Literal(json!(2000.0)));
        assert_eq!(
            parse(r#""a\"b\nA""#),
            Filter::Literal(json!("a\"b\nA"))
        );
    }

    #[test]
    fn negative_numbers_are_unary() {
        assert!(matches!(parse("-1"), Filter::Negate(_)));
        assert!(matches!(parse("3 - 1"), Filter::Arith { .. }));
    }

    #[test]
    fn constructors() {
        assert_eq!(parse("[]"), Filter::Array(None));
        assert!(matches!(parse("[.a, .b]"), Filter::Array(Some(_))));

        let Filter::Object(entries) = parse(r#"{a: .x, "b c": 1, id, (.k): .v}"#) else {
            panic!("expected object");
        };
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].0, ObjectKey::Name("a".into()));
        assert_eq!(entries[1].0, ObjectKey::Name("b c".into()));
        assert!(matches!(entries[2].1, Filter::Path { .. }));
        assert!(matches!(entries[3].0, ObjectKey::Computed(_)));
    }

    #[test]
    fn builtin_calls() {
        assert_eq!(parse("length"), Filter::Call(Builtin::Length, vec![]));
        assert!(matches!(
            parse("map(select(.n > 1))"),
            Filter::Call(Builtin::Map, _)
        ));
        assert!(matches!(
            parse(r#"join(", ")"#),
            Filter::Call(Builtin::Join, _)
        ));
    }

    #[test]
    fn rejects_unknown_functions() {
        let err = parse_filter(r#"system("rm -rf /")"#, 64).unwrap_err();
        assert!(matches!(err, TransformError::Parse(ref m) if m.contains("system")));
        assert!(parse_filter("select(.a; .b)", 64).is_err());
    }

    #[test]
    fn conditionals() {
        let Filter::If { branches, otherwise } =
            parse("if .a then 1 elif .b then 2 else 3 end")
        else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 2);
        assert!(otherwise.is_some());

        assert!(matches!(
            parse("if . then 1 end"),
            Filter::If { otherwise: None, .. }
        ));
        assert!(parse_filter("if . then 1", 64).is_err());
        assert!(parse_filter("if . else 1 end", 64).is_err());
    }

    #[test]
    fn bindings_take_the_rest_of_the_pipe() {
        let Filter::Arith { rest, .. } = parse(".a + .b as $x | $x") else {
            panic!("expected arithmetic");
        };
        assert!(matches!(rest[0].1, Filter::Bind { .. }));

        let Filter::Pipe(stages) = parse(".items | .[0] as $first | map(. - $first)") else {
            panic!("expected pipe");
        };
        assert_eq!(stages.len(), 2);
        assert!(matches!(&stages[1], Filter::Bind { name, .. } if name == "first"));

        assert!(matches!(
            parse("reduce .[] as $n (0; . + $n)"),
            Filter::Reduce { .. }
        ));
    }

    #[test]
    fn rejects_unbound_variables() {
        let err = parse_filter("$x", 64).unwrap_err();
        assert!(matches!(err, TransformError::Parse(ref m) if m.contains("$x")));
        assert!(parse_filter(". as $x | $y", 64).is_err());
        assert!(parse_filter("(. as $x | $x), $x", 64).is_err());
        assert!(parse_filter("reduce .[] as $n ($n; .)", 64).is_err());
        assert!(parse_filter("$ENV", 64).is_err());
        assert!(parse_filter(". as $x | {$x}", 64).is_ok());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(parse_filter("", 64), Err(TransformError::Parse(_))));
        assert!(matches!(parse_filter("   ", 64), Err(TransformError::Parse(_))));
        assert!(parse_filter(".a |", 64).is_err());
        assert!(parse_filter(".a[", 64).is_err());
        assert!(parse_filter("..", 64).is_err());
        assert!(parse_filter(".a .b", 64).is_err());
        assert!(parse_filter(r#""unterminated"#, 64).is_err());
        assert!(parse_filter("{a: 1", 64).is_err());
    }

    #[test]
    fn enforces_depth_limit() {
        let deep = format!("{}.{}", "[".repeat(10), "]".repeat(10));
        assert!(parse_filter(&deep, 16).is_ok());
        assert_eq!(
            parse_filter(&deep, 4),
            Err(TransformError::TooDeep { limit: 4 })
        );
        // Brackets inside strings do not count.
        assert!(parse_filter(r#""((((((((""#, 2).is_ok());
    }

    #[test]
    fn long_chains_stay_flat() {
        let expr = vec![".a"; 500].join(" | ");
        let Filter::Pipe(stages) = parse(&expr) else {
            panic!("expected pipe");
        };
        assert_eq!(stages.len(), 500);
    }
}
