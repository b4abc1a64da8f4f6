//! SELECT builder.

use super::{CounterKind, OrderBy, Returnable, emit_items};
use crate::emit::{Emit, Fragment};
use crate::error::BuildError;
use crate::expr::{Alias, Expr, emit_group};
use crate::options::SqlOptions;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
    /// Plain `JOIN`.
    Default,
}

impl JoinKind {
    pub fn as_sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL JOIN",
            JoinKind::Cross => "CROSS JOIN",
            JoinKind::Default => "JOIN",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinKind,
    pub table: Expr,
    pub on: Option<Expr>,
}

impl Emit for Join {
    fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError> {
        let mut out = Fragment::raw(self.kind.as_sql());
        out.push_str(" ");
        out.push(self.table.emit(opts)?);

        if self.kind == JoinKind::Cross {
            return Ok(out);
        }
        let on = match &self.on {
            Some(on) => on.emit(opts)?,
            None => Fragment::default(),
        };
        if on.is_empty() {
            return Err(BuildError::MissingOnClause(self.kind.as_sql()));
        }
        out.push_str(" ON ");
        out.push(on);
        Ok(out)
    }
}

#[derive(Debug, Clone, Default)]
pub enum Modifier {
    #[default]
    None,
    Distinct,
    DistinctOn(Vec<Expr>),
    All,
}

/// SELECT builder.
#[derive(Debug, Clone, Default)]
pub struct Select {
    modifier: Modifier,
    fields: Vec<Expr>,
    from: Option<Expr>,
    joins: Vec<Join>,
    filters: Vec<Expr>,
    group_by: Vec<Expr>,
    having: Vec<Expr>,
    order_by: Vec<OrderBy>,
    limit: Option<i64>,
    offset: Option<i64>,
}

/// `SELECT fields`; strings are columns.
pub fn select<E: Into<Expr>>(fields: impl IntoIterator<Item = E>) -> Select {
    Select::new().fields(fields)
}

/// `SELECT * FROM table`
pub fn select_from(table: impl Into<Expr>) -> Select {
    Select::new().from(table)
}

impl Select {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: impl Into<Expr>) -> Self {
        self.fields.push(field.into());
        self
    }

    pub fn fields<E: Into<Expr>>(mut self, fields: impl IntoIterator<Item = E>) -> Self {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Table name or aliased sub-select.
    pub fn from(mut self, table: impl Into<Expr>) -> Self {
        self.from = Some(table.into());
        self
    }

    pub fn distinct(mut self) -> Self {
        self.modifier = Modifier::Distinct;
        self
    }

    pub fn distinct_on<E: Into<Expr>>(mut self, targets: impl IntoIterator<Item = E>) -> Self {
        self.modifier = Modifier::DistinctOn(targets.into_iter().map(Into::into).collect());
        self
    }

    pub fn all(mut self) -> Self {
        self.modifier = Modifier::All;
        self
    }

    /// Attach a join. Every kind except CROSS needs `on`.
    pub fn join_with(mut self, kind: JoinKind, table: impl Into<Expr>, on: Option<Expr>) -> Self {
        self.joins.push(Join {
            kind,
            table: table.into(),
            on,
        });
        self
    }

    pub fn join(self, table: impl Into<Expr>, on: Expr) -> Self {
        self.join_with(JoinKind::Default, table, Some(on))
    }

    pub fn inner_join(self, table: impl Into<Expr>, on: Expr) -> Self {
        self.join_with(JoinKind::Inner, table, Some(on))
    }

    pub fn left_join(self, table: impl Into<Expr>, on: Expr) -> Self {
        self.join_with(JoinKind::Left, table, Some(on))
    }

    pub fn right_join(self, table: impl Into<Expr>, on: Expr) -> Self {
        self.join_with(JoinKind::Right, table, Some(on))
    }

    pub fn full_join(self, table: impl Into<Expr>, on: Expr) -> Self {
        self.join_with(JoinKind::Full, table, Some(on))
    }

    pub fn cross_join(self, table: impl Into<Expr>) -> Self {
        self.join_with(JoinKind::Cross, table, None)
    }

    /// Add a WHERE predicate; repeated calls are AND-ed.
    pub fn filter(mut self, predicate: Expr) -> Self {
        self.filters.push(predicate);
        self
    }

    /// Alias of [`Select::filter`].
    pub fn where_(self, predicate: Expr) -> Self {
        self.filter(predicate)
    }

    pub fn group_by<E: Into<Expr>>(mut self, targets: impl IntoIterator<Item = E>) -> Self {
        self.group_by.extend(targets.into_iter().map(Into::into));
        self
    }

    /// Add a HAVING predicate; repeated calls are AND-ed.
    pub fn having(mut self, predicate: Expr) -> Self {
        self.having.push(predicate);
        self
    }

    pub fn order_by(mut self, items: impl IntoIterator<Item = OrderBy>) -> Self {
        self.order_by.extend(items);
        self
    }

    pub fn limit(mut self, n: i64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: i64) -> Self {
        self.offset = Some(n);
        self
    }

    pub fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError> {
        let mut out = Fragment::raw("SELECT ");

        match &self.modifier {
            Modifier::None => {}
            Modifier::Distinct => out.push_str("DISTINCT "),
            Modifier::All => out.push_str("ALL "),
            Modifier::DistinctOn(targets) => {
                out.push_str("DISTINCT ON (");
                out.push(emit_items(targets, opts)?);
                out.push_str(") ");
            }
        }

        if self.fields.is_empty() {
            out.push_str("*");
        } else {
            out.push(emit_items(&self.fields, opts)?);
        }

        if let Some(from) = &self.from {
            out.push_str(" FROM ");
            out.push(from.emit(opts)?);
        }

        for join in &self.joins {
            out.push_str(" ");
            out.push(join.emit(opts)?);
        }

        let filter = emit_group(&self.filters, " AND ", opts)?;
        if !filter.is_empty() {
            out.push_str(" WHERE ");
            out.push(filter);
        }

        if !self.group_by.is_empty() {
            out.push_str(" GROUP BY ");
            out.push(emit_items(&self.group_by, opts)?);
        }

        let having = emit_group(&self.having, " AND ", opts)?;
        if !having.is_empty() {
            out.push_str(" HAVING ");
            out.push(having);
        }

        if !self.order_by.is_empty() {
            out.push_str(" ORDER BY ");
            out.push(emit_items(&self.order_by, opts)?);
        }

        if let Some(limit) = self.limit {
            out.push(Fragment::new(" LIMIT ?", vec![Value::Int(limit)]));
        }
        if let Some(offset) = self.offset {
            out.push(Fragment::new(" OFFSET ?", vec![Value::Int(offset)]));
        }

        Ok(out)
    }
}

impl Emit for Select {
    fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError> {
        Select::emit(self, opts)
    }
}

impl Returnable for Select {
    fn using_tables(&self) -> Vec<String> {
        self.from
            .iter()
            .chain(self.joins.iter().map(|join| &join.table))
            .filter_map(|table| table.table_name().map(str::to_string))
            .collect()
    }

    fn primary_with(&self) -> String {
        self.from
            .as_ref()
            .and_then(Expr::table_name)
            .unwrap_or_default()
            .to_string()
    }

    fn get_returning(&self) -> Vec<Alias> {
        self.fields
            .iter()
            .map(|field| match field {
                Expr::Column(column) => Alias::pure(column.path()),
                Expr::Alias(alias) => (**alias).clone(),
                other => Alias::new(other.clone(), ""),
            })
            .collect()
    }

    fn set_returning(&mut self, aliases: Vec<Alias>) {
        self.fields = aliases.into_iter().map(Expr::from).collect();
    }

    fn limit_returning_one(&mut self) {
        self.limit = Some(1);
    }

    fn counter_kind(&self) -> CounterKind {
        CounterKind::Query
    }
}
