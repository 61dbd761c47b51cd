//! Filter tree produced by the parser.
//!
//! Operator chains are stored flat (`Vec`) rather than as nested binary
//! nodes, so tree depth only grows with bracket nesting.

use serde_json::Value;

/// A compiled filter. Each filter maps one input to zero or more outputs.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `.`
    Identity,
    /// A constant.
    Literal(Value),
    /// A term followed by path steps, e.g. `.a[0].b?`.
    Path { base: Box<Filter>, steps: Vec<PathStep> },
    /// `f?` on a non-path term.
    Try(Box<Filter>),
    /// `a | b | c`
    Pipe(Vec<Filter>),
    /// `a, b, c`
    Comma(Vec<Filter>),
    /// `a // b // c`
    Alternative(Vec<Filter>),
    /// `a or b`
    Or(Vec<Filter>),
    /// `a and b`
    And(Vec<Filter>),
    /// `a == b` and friends. Comparisons do not chain.
    Compare(CompareOp, Box<Filter>, Box<Filter>),
    /// `a + b - c` or `a * b / c`, folded left to right.
    Arith { first: Box<Filter>, rest: Vec<(ArithOp, Filter)> },
    /// `-f`
    Negate(Box<Filter>),
    /// `[f]`, or `[]` when empty.
    Array(Option<Box<Filter>>),
    /// `{k: v, ...}`
    Object(Vec<(ObjectKey, Filter)>),
    /// A builtin function call.
    Call(Builtin, Vec<Filter>),
    /// `if c then a elif d then b else e end`. A missing `else` yields the input.
    If {
        branches: Vec<(Filter, Filter)>,
        otherwise: Option<Box<Filter>>,
    },
    /// `source as $name | body`, run once per output of `source`.
    Bind {
        source: Box<Filter>,
        name: String,
        body: Box<Filter>,
    },
    /// `$name`
    Var(String),
    /// `reduce source as $name (init; update)`
    Reduce {
        source: Box<Filter>,
        name: String,
        init: Box<Filter>,
        update: Box<Filter>,
    },
}

/// One path step, with whether a trailing `?` suppresses its errors.
#[derive(Debug, Clone, PartialEq)]
pub struct PathStep {
    pub step: Step,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// `.name` or `."name"`
    Field(String),
    /// `[f]`: numeric index or string key, evaluated against the path's input.
    Index(Box<Filter>),
    /// `[from:to]`
    Slice(Option<Box<Filter>>, Option<Box<Filter>>),
    /// `[]`
    Iterate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKey {
    Name(String),
    Computed(Filter),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Builtin functions, resolved at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Length,
    Keys,
    Values,
    Has,
    Select,
    Map,
    Not,
    Type,
    Add,
    Any,
    All,
    First,
    Last,
    Sort,
    Reverse,
    Unique,
    Min,
    Max,
    ToString,
    ToNumber,
    AsciiDowncase,
    AsciiUpcase,
    Join,
    ToEntries,
    FromEntries,
    Empty,
    Split,
    SortBy,
    GroupBy,
    Floor,
    ToJson,
    FromJson,
    Range,
}

impl Builtin {
    /// Resolve a builtin by name and argument count.
    pub fn lookup(name: &str, arity: usize) -> Option<Self> {
        let builtin = match (name, arity) {
            ("length", 0) => Self::Length,
            ("keys", 0) => Self::Keys,
            ("values", 0) => Self::Values,
            ("has", 1) => Self::Has,
            ("select", 1) => Self::Select,
            ("map", 1) => Self::Map,
            ("not", 0) => Self::Not,
            ("type", 0) => Self::Type,
            ("add", 0) => Self::Add,
            ("any", 0) => Self::Any,
            ("all", 0) => Self::All,
            ("first", 0) => Self::First,
            ("last", 0) => Self::Last,
            ("sort", 0) => Self::Sort,
            ("reverse", 0) => Self::Reverse,
            ("unique", 0) => Self::Unique,
            ("min", 0) => Self::Min,
            ("max", 0) => Self::Max,
            ("tostring", 0) => Self::ToString,
            ("tonumber", 0) => Self::ToNumber,
            ("ascii_downcase", 0) => Self::AsciiDowncase,
            ("ascii_upcase", 0) => Self::AsciiUpcase,
            ("join", 1) => Self::Join,
            ("to_entries", 0) => Self::ToEntries,
            ("from_entries", 0) => Self::FromEntries,
            ("empty", 0) => Self::Empty,
            ("split", 1) => Self::Split,
            ("sort_by", 1) => Self::SortBy,
            ("group_by", 1) => Self::GroupBy,
            ("floor", 0) => Self::Floor,
            ("tojson", 0) => Self::ToJson,
            ("fromjson", 0) => Self::FromJson,
            ("range", 1 | 2) => Self::Range,
            _ => return None,
        };
        Some(builtin)
    }
}
