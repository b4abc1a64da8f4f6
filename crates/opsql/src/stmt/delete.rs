use super::{CounterKind, Returnable, emit_returning, pure_aliases};
use crate::emit::{Emit, Fragment};
use crate::error::BuildError;
use crate::expr::{Alias, Column, Expr, emit_group};
use crate::options::SqlOptions;

/// DELETE builder.
#[derive(Debug, Clone)]
pub struct Delete {
    table: String,
    filters: Vec<Expr>,
    returning: Vec<Alias>,
}

/// `DELETE FROM table`
pub fn delete(table: impl Into<String>) -> Delete {
    Delete {
        table: table.into(),
        filters: Vec::new(),
        returning: Vec::new(),
    }
}

impl Delete {
    /// Add a WHERE predicate; repeated calls are AND-ed.
    pub fn filter(mut self, predicate: Expr) -> Self {
        self.filters.push(predicate);
        self
    }

    pub fn where_(self, predicate: Expr) -> Self {
        self.filter(predicate)
    }

    pub fn returning<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.returning.extend(pure_aliases(columns));
        self
    }

    pub fn returning_aliases(mut self, aliases: impl IntoIterator<Item = Alias>) -> Self {
        self.returning.extend(aliases);
        self
    }

    pub fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError> {
        let mut out = Fragment::raw("DELETE FROM ");
        out.push(Column::new(self.table.as_str()).emit(opts)?);

        let filter = emit_group(&self.filters, " AND ", opts)?;
        if !filter.is_empty() {
            out.push_str(" WHERE ");
            out.push(filter);
        }

        emit_returning(&mut out, &self.returning, opts)?;
        Ok(out)
    }
}

impl Emit for Delete {
    fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError> {
        Delete::emit(self, opts)
    }
}

impl Returnable for Delete {
    fn using_tables(&self) -> Vec<String> {
        vec![self.table.clone()]
    }

    fn primary_with(&self) -> String {
        self.table.clone()
    }

    fn get_returning(&self) -> Vec<Alias> {
        self.returning.clone()
    }

    fn set_returning(&mut self, aliases: Vec<Alias>) {
        self.returning = aliases;
    }

    fn limit_returning_one(&mut self) {}

    fn counter_kind(&self) -> CounterKind {
        CounterKind::Exec
    }
}
