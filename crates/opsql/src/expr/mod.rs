//! Expression algebra.
//!
//! Every node is an [`Expr`]. Target positions (the left side of an operator, function
//! arguments, select fields) take [`Into<Expr>`], where a string becomes a [`Column`].
//! Value positions take [`IntoOperand`], where a string is a literal bound as an argument.
//!
//! ```ignore
//! use opsql::expr::{and, eq, gt, or};
//!
//! let cond = and([eq("status", "active"), or([gt("age", 18), eq("vip", true)])]);
//! ```

mod column;
mod func;
mod op;

pub use column::{Alias, Column};
pub use func::{Case, Func, Math, MathOp};
pub use op::{Op, OpKind};

pub use func::{
    add, avg, case, case_of, coalesce, count, count_distinct, div, func, lower, max, min, modulo,
    mul, now, sub, sum, upper,
};
pub use op::{
    between, eq, extract_object, extract_text, gt, gte, has_prop, has_props, ilike, in_list, lc,
    like, lt, lte, ne, not_between, not_ilike, not_in, not_like, rc,
};


use crate::emit::{Emit, Fragment};
use crate::error::BuildError;
use crate::options::SqlOptions;
use crate::stmt::Select;
use crate::value::Value;
use chrono::{DateTime, NaiveDateTime, Utc};

/// A node of the expression tree.
#[derive(Debug, Clone)]
pub enum Expr {
    Column(Column),
    Alias(Box<Alias>),
    /// Literal bound as an argument, emits `?`.
    Value(Value),
    /// Comma separated list, e.g. the right side of `IN`.
    List(Vec<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Op(Box<Op>),
    Func(Func),
    Cast(Box<Expr>, String),
    Case(Box<Case>),
    Math(Box<Math>),
    /// `ARRAY[...]`
    Array(Vec<Expr>),
    /// `EXCLUDED.col` inside `ON CONFLICT DO UPDATE`.
    Excluded(Column),
    /// Trusted SQL text, emitted as-is.
    Raw(String),
    /// Sub-select, emitted without parentheses.
    Select(Box<Select>),
}

impl Expr {
    pub fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError> {
        match self {
            Expr::Column(column) => column.emit(opts),
            Expr::Alias(alias) => alias.emit(opts),
            Expr::Value(value) => Ok(Fragment::new("?", vec![value.clone()])),
            Expr::List(items) => emit_list(items, opts),
            Expr::And(items) => emit_group(items, " AND ", opts),
            Expr::Or(items) => emit_group(items, " OR ", opts),
            Expr::Not(inner) => {
                let inner = inner.emit(opts)?;
                if inner.is_empty() {
                    return Ok(inner);
                }
                Ok(Fragment::new(format!("NOT ({})", inner.sql), inner.args))
            }
            Expr::Op(op) => op.emit(opts),
            Expr::Func(func) => func.emit(opts),
            Expr::Cast(inner, ty) => {
                let format = opts.cast_format.ok_or(BuildError::CastFormatMissing)?;
                let inner = inner.emit(opts)?;
                Ok(Fragment::new(format(&inner.sql, ty), inner.args))
            }
            Expr::Case(case) => case.emit(opts),
            Expr::Math(math) => math.emit(opts),
            Expr::Array(items) => {
                let inner = emit_list(items, opts)?;
                Ok(Fragment::new(format!("ARRAY[{}]", inner.sql), inner.args))
            }
            Expr::Excluded(column) => {
                let column = column.emit(opts)?;
                Ok(Fragment::raw(format!(
                    "EXCLUDED{}{}",
                    opts.column_part_delim, column.sql
                )))
            }
            Expr::Raw(sql) => Ok(Fragment::raw(sql.clone())),
            Expr::Select(select) => select.emit(opts),
        }
    }

    /// Whether this node is the NULL literal.
    pub fn is_null(&self) -> bool {
        matches!(self, Expr::Value(Value::Null))
    }

    /// Name under which this node appears as a table or projection.
    pub fn table_name(&self) -> Option<&str> {
        match self {
            Expr::Column(column) => Some(column.path()),
            Expr::Alias(alias) => Some(alias.name()),
            _ => None,
        }
    }
}

impl Emit for Expr {
    fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError> {
        Expr::emit(self, opts)
    }
}

fn emit_list(items: &[Expr], opts: &SqlOptions) -> Result<Fragment, BuildError> {
    let parts = items
        .iter()
        .map(|item| item.emit(opts))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Fragment::join(parts, opts.fields_delim))
}

/// AND/OR: nothing for no children, a bare child for one, parenthesised otherwise.
pub(crate) fn emit_group(items: &[Expr], delim: &str, opts: &SqlOptions) -> Result<Fragment, BuildError> {
    let parts = items
        .iter()
        .map(|item| item.emit(opts))
        .filter(|part| !matches!(part, Ok(f) if f.is_empty()))
        .collect::<Result<Vec<_>, _>>()?;

    match parts.len() {
        0 => Ok(Fragment::default()),
        1 => Ok(parts.into_iter().next().unwrap_or_default()),
        _ => {
            let mut out = Fragment::raw("(");
            out.push(Fragment::join(parts, delim));
            out.push_str(")");
            Ok(out)
        }
    }
}

impl From<&str> for Expr {
    fn from(path: &str) -> Self {
        Expr::Column(Column::new(path))
    }
}

impl From<String> for Expr {
    fn from(path: String) -> Self {
        Expr::Column(Column::new(path))
    }
}

impl From<&String> for Expr {
    fn from(path: &String) -> Self {
        Expr::Column(Column::new(path.as_str()))
    }
}

impl From<Column> for Expr {
    fn from(column: Column) -> Self {
        Expr::Column(column)
    }
}

impl From<Alias> for Expr {
    fn from(alias: Alias) -> Self {
        Expr::Alias(Box::new(alias))
    }
}

impl From<Func> for Expr {
    fn from(func: Func) -> Self {
        Expr::Func(func)
    }
}

impl From<Case> for Expr {
    fn from(case: Case) -> Self {
        Expr::Case(Box::new(case))
    }
}

impl From<Select> for Expr {
    fn from(select: Select) -> Self {
        Expr::Select(Box::new(select))
    }
}

/// Conversion for value positions: scalars become bound literals, nodes pass through.
pub trait IntoOperand {
    fn into_operand(self) -> Expr;
}

macro_rules! operand_from_value {
    ($($ty:ty),* $(,)?) => {$(
        impl IntoOperand for $ty {
            fn into_operand(self) -> Expr {
                Expr::Value(Value::from(self))
            }
        }
    )*};
}

operand_from_value!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    f32,
    f64,
    &str,
    String,
    serde_json::Value,
    uuid::Uuid,
    DateTime<Utc>,
    NaiveDateTime,
);

macro_rules! operand_from_node {
    ($($ty:ty),* $(,)?) => {$(
        impl IntoOperand for $ty {
            fn into_operand(self) -> Expr {
                Expr::from(self)
            }
        }
    )*};
}

operand_from_node!(Column, Alias, Func, Case, Select);

impl IntoOperand for Value {
    fn into_operand(self) -> Expr {
        Expr::Value(self)
    }
}

impl IntoOperand for Expr {
    fn into_operand(self) -> Expr {
        self
    }
}

impl<T: IntoOperand> IntoOperand for Option<T> {
    fn into_operand(self) -> Expr {
        match self {
            Some(v) => v.into_operand(),
            None => Expr::Value(Value::Null),
        }
    }
}

impl<T: IntoOperand> IntoOperand for Vec<T> {
    fn into_operand(self) -> Expr {
        Expr::List(self.into_iter().map(IntoOperand::into_operand).collect())
    }
}

impl<T: IntoOperand, const N: usize> IntoOperand for [T; N] {
    fn into_operand(self) -> Expr {
        Expr::List(self.into_iter().map(IntoOperand::into_operand).collect())
    }
}

// ==================== Constructors ====================

/// Column reference.
pub fn col(path: impl Into<String>) -> Expr {
    Expr::Column(Column::new(path))
}

/// Bound literal.
pub fn val(value: impl Into<Value>) -> Expr {
    Expr::Value(value.into())
}

/// Named argument slot, bound later through a prepared cache.
pub fn arg(name: impl Into<String>) -> Expr {
    Expr::Value(Value::ArgRef(name.into()))
}

/// Trusted SQL text.
pub fn raw(sql: impl Into<String>) -> Expr {
    Expr::Raw(sql.into())
}

/// `(expr) AS name`
pub fn alias(expr: impl Into<Expr>, name: impl Into<String>) -> Alias {
    Alias::new(expr, name)
}

/// Comma separated list of literals.
pub fn list<T: IntoOperand>(items: impl IntoIterator<Item = T>) -> Expr {
    Expr::List(items.into_iter().map(IntoOperand::into_operand).collect())
}

/// `ARRAY[?, ...]`
pub fn array<T: IntoOperand>(items: impl IntoIterator<Item = T>) -> Expr {
    Expr::Array(items.into_iter().map(IntoOperand::into_operand).collect())
}

/// `EXCLUDED.col`
pub fn excluded(column: impl Into<String>) -> Expr {
    Expr::Excluded(Column::new(column))
}

pub fn and(items: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::And(items.into_iter().collect())
}

pub fn or(items: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::Or(items.into_iter().collect())
}

pub fn not(expr: Expr) -> Expr {
    Expr::Not(Box::new(expr))
}

/// `CAST`, rendered through the dialect's cast format.
pub fn cast(value: impl IntoOperand, ty: impl Into<String>) -> Expr {
    Expr::Cast(Box::new(value.into_operand()), ty.into())
}
