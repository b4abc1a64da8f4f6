//! Binary operators.

use super::{Expr, IntoOperand};
use crate::emit::Fragment;
use crate::error::BuildError;
use crate::options::SqlOptions;

/// Operator kinds and their SQL spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
    Like,
    NotLike,
    ILike,
    NotILike,
    /// `@>` (left contains right)
    Lc,
    /// `<@` (right contains left)
    Rc,
    In,
    Nin,
    /// JSON object has the key
    HasProp,
    /// JSON object has every key
    HasProps,
    /// `#>>` path as text
    ExtractText,
    /// `#>` path as JSON
    ExtractObject,
    Between,
    NotBetween,
}

impl OpKind {
    pub fn as_sql(self) -> &'static str {
        match self {
            OpKind::Eq => "=",
            OpKind::Ne => "!=",
            OpKind::Lt => "<",
            OpKind::Gt => ">",
            OpKind::Lte => "<=",
            OpKind::Gte => ">=",
            OpKind::Like => "LIKE",
            OpKind::NotLike => "NOT LIKE",
            OpKind::ILike => "ILIKE",
            OpKind::NotILike => "NOT ILIKE",
            OpKind::Lc => "@>",
            OpKind::Rc => "<@",
            OpKind::In => "IN",
            OpKind::Nin => "NOT IN",
            OpKind::HasProp => "?|",
            OpKind::HasProps => "?&",
            OpKind::ExtractText => "#>>",
            OpKind::ExtractObject => "#>",
            OpKind::Between => "BETWEEN",
            OpKind::NotBetween => "NOT BETWEEN",
        }
    }
}

/// `left <op> right`
#[derive(Debug, Clone)]
pub struct Op {
    pub kind: OpKind,
    pub left: Expr,
    pub right: Expr,
}

impl Op {
    pub fn new(kind: OpKind, left: impl Into<Expr>, right: Expr) -> Self {
        Self {
            kind,
            left: left.into(),
            right,
        }
    }

    pub fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError> {
        let mut out = emit_operand(&self.left, opts)?;

        match self.kind {
            OpKind::Eq if self.right.is_null() => {
                out.push_str(" IS NULL");
                return Ok(out);
            }
            OpKind::Ne if self.right.is_null() => {
                out.push_str(" IS NOT NULL");
                return Ok(out);
            }
            OpKind::In | OpKind::Nin => {
                let right = self.right.emit(opts)?;
                if right.is_empty() {
                    // Nothing is IN an empty list.
                    let constant = if self.kind == OpKind::In { "1=0" } else { "1=1" };
                    return Ok(Fragment::raw(constant));
                }
                out.push_str(" ");
                out.push_str(self.kind.as_sql());
                out.push_str(" (");
                out.push(right);
                out.push_str(")");
                return Ok(out);
            }
            OpKind::Between | OpKind::NotBetween => {
                let bounds = match &self.right {
                    Expr::List(bounds) => bounds.as_slice(),
                    other => std::slice::from_ref(other),
                };
                let [low, high] = bounds else {
                    return Err(BuildError::OperandCount {
                        op: self.kind.as_sql(),
                        expected: 2,
                        got: bounds.len(),
                    });
                };
                out.push_str(" ");
                out.push_str(self.kind.as_sql());
                out.push_str(" ");
                out.push(emit_operand(low, opts)?);
                out.push_str(" AND ");
                out.push(emit_operand(high, opts)?);
                return Ok(out);
            }
            _ => {}
        }

        out.push_str(" ");
        out.push_str(self.kind.as_sql());
        out.push_str(" ");
        out.push(emit_operand(&self.right, opts)?);
        Ok(out)
    }
}

/// Sub-selects used as operands are parenthesised.
fn emit_operand(expr: &Expr, opts: &SqlOptions) -> Result<Fragment, BuildError> {
    let inner = expr.emit(opts)?;
    if !matches!(expr, Expr::Select(_)) {
        return Ok(inner);
    }
    let mut out = Fragment::raw("(");
    out.push(inner);
    out.push_str(")");
    Ok(out)
}

fn op(kind: OpKind, left: impl Into<Expr>, right: Expr) -> Expr {
    Expr::Op(Box::new(Op::new(kind, left, right)))
}

/// `left = right`, or `left IS NULL` for a NULL right side.
pub fn eq(left: impl Into<Expr>, right: impl IntoOperand) -> Expr {
    op(OpKind::Eq, left, right.into_operand())
}

/// `left != right`, or `left IS NOT NULL` for a NULL right side.
pub fn ne(left: impl Into<Expr>, right: impl IntoOperand) -> Expr {
    op(OpKind::Ne, left, right.into_operand())
}

pub fn lt(left: impl Into<Expr>, right: impl IntoOperand) -> Expr {
    op(OpKind::Lt, left, right.into_operand())
}

pub fn gt(left: impl Into<Expr>, right: impl IntoOperand) -> Expr {
    op(OpKind::Gt, left, right.into_operand())
}

pub fn lte(left: impl Into<Expr>, right: impl IntoOperand) -> Expr {
    op(OpKind::Lte, left, right.into_operand())
}

pub fn gte(left: impl Into<Expr>, right: impl IntoOperand) -> Expr {
    op(OpKind::Gte, left, right.into_operand())
}

pub fn like(left: impl Into<Expr>, pattern: impl IntoOperand) -> Expr {
    op(OpKind::Like, left, pattern.into_operand())
}

pub fn not_like(left: impl Into<Expr>, pattern: impl IntoOperand) -> Expr {
    op(OpKind::NotLike, left, pattern.into_operand())
}

pub fn ilike(left: impl Into<Expr>, pattern: impl IntoOperand) -> Expr {
    op(OpKind::ILike, left, pattern.into_operand())
}

pub fn not_ilike(left: impl Into<Expr>, pattern: impl IntoOperand) -> Expr {
    op(OpKind::NotILike, left, pattern.into_operand())
}

/// `left @> right`
pub fn lc(left: impl Into<Expr>, right: impl IntoOperand) -> Expr {
    op(OpKind::Lc, left, right.into_operand())
}

/// `left <@ right`
pub fn rc(left: impl Into<Expr>, right: impl IntoOperand) -> Expr {
    op(OpKind::Rc, left, right.into_operand())
}

/// `left IN (values)`; `values` may be a list or a sub-select.
pub fn in_list(left: impl Into<Expr>, values: impl IntoOperand) -> Expr {
    op(OpKind::In, left, values.into_operand())
}

/// `left NOT IN (values)`
pub fn not_in(left: impl Into<Expr>, values: impl IntoOperand) -> Expr {
    op(OpKind::Nin, left, values.into_operand())
}

/// JSON object `left` has the key `key`.
pub fn has_prop(left: impl Into<Expr>, key: impl IntoOperand) -> Expr {
    op(OpKind::HasProp, left, Expr::Array(vec![key.into_operand()]))
}

/// JSON object `left` has every key in `keys`.
pub fn has_props<T: IntoOperand>(left: impl Into<Expr>, keys: impl IntoIterator<Item = T>) -> Expr {
    op(OpKind::HasProps, left, super::array(keys))
}

/// `left #>> ARRAY[path]`
pub fn extract_text<T: IntoOperand>(left: impl Into<Expr>, path: impl IntoIterator<Item = T>) -> Expr {
    op(OpKind::ExtractText, left, super::array(path))
}

/// `left #> ARRAY[path]`
pub fn extract_object<T: IntoOperand>(
    left: impl Into<Expr>,
    path: impl IntoIterator<Item = T>,
) -> Expr {
    op(OpKind::ExtractObject, left, super::array(path))
}

pub fn between(left: impl Into<Expr>, low: impl IntoOperand, high: impl IntoOperand) -> Expr {
    op(
        OpKind::Between,
        left,
        Expr::List(vec![low.into_operand(), high.into_operand()]),
    )
}

pub fn not_between(left: impl Into<Expr>, low: impl IntoOperand, high: impl IntoOperand) -> Expr {
    op(
        OpKind::NotBetween,
        left,
        Expr::List(vec![low.into_operand(), high.into_operand()]),
    )
}
