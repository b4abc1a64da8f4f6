//! Function calls, CASE chains and arithmetic.

use super::{Expr, IntoOperand};
use crate::emit::Fragment;
use crate::error::BuildError;
use crate::options::SqlOptions;

/// `NAME([prefix ]arg, ...)`
#[derive(Debug, Clone)]
pub struct Func {
    name: String,
    prefix: Option<String>,
    args: Vec<Expr>,
}

impl Func {
    pub fn new(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self {
            name: name.into(),
            prefix: None,
            args,
        }
    }

    /// Keyword placed before the first argument, e.g. `DISTINCT`.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError> {
        let args = self
            .args
            .iter()
            .map(|arg| arg.emit(opts))
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Fragment::raw(format!("{}(", self.name));
        if let Some(prefix) = &self.prefix {
            out.push_str(prefix);
            out.push_str(" ");
        }
        out.push(Fragment::join(args, opts.fields_delim));
        out.push_str(")");
        Ok(out)
    }
}

/// Any function; string arguments are columns.
pub fn func<E: Into<Expr>>(name: impl Into<String>, args: impl IntoIterator<Item = E>) -> Expr {
    Expr::Func(Func::new(name, args.into_iter().map(Into::into).collect()))
}

/// `COUNT(target)`; `count("*")` counts rows.
pub fn count(target: impl Into<Expr>) -> Expr {
    func("COUNT", [target.into()])
}

/// `COUNT(DISTINCT target)`
pub fn count_distinct(target: impl Into<Expr>) -> Expr {
    Expr::Func(Func::new("COUNT", vec![target.into()]).prefix("DISTINCT"))
}

pub fn sum(target: impl Into<Expr>) -> Expr {
    func("SUM", [target.into()])
}

pub fn avg(target: impl Into<Expr>) -> Expr {
    func("AVG", [target.into()])
}

pub fn min(target: impl Into<Expr>) -> Expr {
    func("MIN", [target.into()])
}

pub fn max(target: impl Into<Expr>) -> Expr {
    func("MAX", [target.into()])
}

pub fn lower(target: impl Into<Expr>) -> Expr {
    func("LOWER", [target.into()])
}

pub fn upper(target: impl Into<Expr>) -> Expr {
    func("UPPER", [target.into()])
}

/// `COALESCE(target, fallback)`; the fallback is a bound value.
pub fn coalesce(target: impl Into<Expr>, fallback: impl IntoOperand) -> Expr {
    func("COALESCE", [target.into(), fallback.into_operand()])
}

/// `CURRENT_TIMESTAMP`, valid on both dialects.
pub fn now() -> Expr {
    Expr::Raw("CURRENT_TIMESTAMP".to_string())
}

/// `CASE [base] WHEN .. THEN .. [ELSE ..] END`
#[derive(Debug, Clone, Default)]
pub struct Case {
    base: Option<Expr>,
    whens: Vec<(Expr, Expr)>,
    otherwise: Option<Expr>,
}

impl Case {
    pub fn when(mut self, condition: impl IntoOperand, then: impl IntoOperand) -> Self {
        self.whens.push((condition.into_operand(), then.into_operand()));
        self
    }

    pub fn otherwise(mut self, value: impl IntoOperand) -> Self {
        self.otherwise = Some(value.into_operand());
        self
    }

    pub fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError> {
        let mut out = Fragment::raw("CASE");
        if let Some(base) = &self.base {
            out.push_str(" ");
            out.push(base.emit(opts)?);
        }
        for (condition, then) in &self.whens {
            out.push_str(" WHEN ");
            out.push(condition.emit(opts)?);
            out.push_str(" THEN ");
            out.push(then.emit(opts)?);
        }
        if let Some(otherwise) = &self.otherwise {
            out.push_str(" ELSE ");
            out.push(otherwise.emit(opts)?);
        }
        out.push_str(" END");
        Ok(out)
    }
}

/// Searched CASE: `CASE WHEN cond THEN value ... END`.
pub fn case() -> Case {
    Case::default()
}

/// Simple CASE over `base`: `CASE base WHEN value THEN value ... END`.
pub fn case_of(base: impl Into<Expr>) -> Case {
    Case {
        base: Some(base.into()),
        ..Case::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl MathOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            MathOp::Add => "+",
            MathOp::Sub => "-",
            MathOp::Mul => "*",
            MathOp::Div => "/",
            MathOp::Mod => "%",
        }
    }
}

/// `left <op> right`; nested arithmetic operands are parenthesised.
#[derive(Debug, Clone)]
pub struct Math {
    pub op: MathOp,
    pub left: Expr,
    pub right: Expr,
}

impl Math {
    pub fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError> {
        let mut out = emit_operand(&self.left, opts)?;
        out.push_str(" ");
        out.push_str(self.op.as_sql());
        out.push_str(" ");
        out.push(emit_operand(&self.right, opts)?);
        Ok(out)
    }
}

fn emit_operand(expr: &Expr, opts: &SqlOptions) -> Result<Fragment, BuildError> {
    let inner = expr.emit(opts)?;
    if matches!(expr, Expr::Math(_)) {
        return Ok(Fragment::new(format!("({})", inner.sql), inner.args));
    }
    Ok(inner)
}

fn math(op: MathOp, left: impl Into<Expr>, right: impl IntoOperand) -> Expr {
    Expr::Math(Box::new(Math {
        op,
        left: left.into(),
        right: right.into_operand(),
    }))
}

pub fn add(left: impl Into<Expr>, right: impl IntoOperand) -> Expr {
    math(MathOp::Add, left, right)
}

pub fn sub(left: impl Into<Expr>, right: impl IntoOperand) -> Expr {
    math(MathOp::Sub, left, right)
}

pub fn mul(left: impl Into<Expr>, right: impl IntoOperand) -> Expr {
    math(MathOp::Mul, left, right)
}

pub fn div(left: impl Into<Expr>, right: impl IntoOperand) -> Expr {
    math(MathOp::Div, left, right)
}

pub fn modulo(left: impl Into<Expr>, right: impl IntoOperand) -> Expr {
    math(MathOp::Mod, left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::compile;
    use crate::expr::{col, eq, gt};

    fn emit(expr: &Expr) -> String {
        compile(expr, &SqlOptions::postgres()).unwrap().sql
    }

    #[test]
    fn test_functions_convert_strings_to_columns() {
        assert_eq!(emit(&count("id")), "COUNT(\"id\")");
        assert_eq!(emit(&count("*")), "COUNT(*)");
        assert_eq!(emit(&count_distinct("id")), "COUNT(DISTINCT \"id\")");
        assert_eq!(emit(&coalesce("nick", "anon")), "COALESCE(\"nick\",$1)");
        assert_eq!(emit(&func("GREATEST", ["a", "b"])), "GREATEST(\"a\",\"b\")");
    }

    #[test]
    fn test_case_chain() {
        let expr: Expr = case()
            .when(gt("age", 17), "adult")
            .otherwise("minor")
            .into();
        let out = compile(&expr, &SqlOptions::postgres()).unwrap();
        assert_eq!(out.sql, "CASE WHEN \"age\" > $1 THEN $2 ELSE $3 END");
        assert_eq!(out.args.len(), 3);

        let expr: Expr = case_of("status").when(1, "on").into();
        assert_eq!(emit(&expr), "CASE \"status\" WHEN $1 THEN $2 END");
    }

    #[test]
    fn test_math() {
        assert_eq!(emit(&add("balance", 10)), "\"balance\" + $1");
        assert_eq!(
            emit(&mul(add("a", col("b")), 2)),
            "(\"a\" + \"b\") * $1"
        );
        assert_eq!(emit(&eq("total", sub("a", 1))), "\"total\" = \"a\" - $1");
    }
}
