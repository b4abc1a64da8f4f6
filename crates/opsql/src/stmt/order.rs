use crate::emit::{Emit, Fragment};
use crate::error::BuildError;
use crate::expr::Expr;
use crate::options::SqlOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nulls {
    First,
    Last,
}

/// One `ORDER BY` item: `target [ASC|DESC] [NULLS FIRST|LAST]`.
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub target: Expr,
    pub order: Option<Order>,
    pub nulls: Option<Nulls>,
}

impl Emit for OrderBy {
    fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError> {
        let mut out = self.target.emit(opts)?;
        match self.order {
            Some(Order::Asc) => out.push_str(" ASC"),
            Some(Order::Desc) => out.push_str(" DESC"),
            None => {}
        }
        match self.nulls {
            Some(Nulls::First) => out.push_str(" NULLS FIRST"),
            Some(Nulls::Last) => out.push_str(" NULLS LAST"),
            None => {}
        }
        Ok(out)
    }
}

fn item(target: impl Into<Expr>, order: Option<Order>, nulls: Option<Nulls>) -> OrderBy {
    OrderBy {
        target: target.into(),
        order,
        nulls,
    }
}

/// Order by `target` without a direction.
pub fn order(target: impl Into<Expr>) -> OrderBy {
    item(target, None, None)
}

pub fn asc(target: impl Into<Expr>) -> OrderBy {
    item(target, Some(Order::Asc), None)
}

pub fn desc(target: impl Into<Expr>) -> OrderBy {
    item(target, Some(Order::Desc), None)
}

pub fn asc_nulls_first(target: impl Into<Expr>) -> OrderBy {
    item(target, Some(Order::Asc), Some(Nulls::First))
}

pub fn asc_nulls_last(target: impl Into<Expr>) -> OrderBy {
    item(target, Some(Order::Asc), Some(Nulls::Last))
}

pub fn desc_nulls_first(target: impl Into<Expr>) -> OrderBy {
    item(target, Some(Order::Desc), Some(Nulls::First))
}

pub fn desc_nulls_last(target: impl Into<Expr>) -> OrderBy {
    item(target, Some(Order::Desc), Some(Nulls::Last))
}
