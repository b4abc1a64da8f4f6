use super::{CounterKind, Returnable, emit_returning, pure_aliases};
use crate::emit::{Emit, Fragment};
use crate::error::BuildError;
use crate::expr::{Alias, Column, Expr, IntoOperand, emit_group, excluded};
use crate::options::SqlOptions;

/// UPDATE builder. Without a table it renders the `UPDATE SET ..` tail of an upsert.
#[derive(Debug, Clone, Default)]
pub struct Update {
    table: Option<String>,
    sets: Vec<(Column, Expr)>,
    filters: Vec<Expr>,
    returning: Vec<Alias>,
}

/// `UPDATE table SET ..`
pub fn update(table: impl Into<String>) -> Update {
    Update {
        table: Some(table.into()),
        ..Update::default()
    }
}

/// Table-less `UPDATE SET ..` for [`do_update`](super::do_update).
pub fn do_update_set() -> Update {
    Update::default()
}

impl Update {
    /// `column = value`; literals are bound, expressions emit as-is.
    pub fn set(mut self, column: impl Into<String>, value: impl IntoOperand) -> Self {
        self.sets.push((Column::new(column), value.into_operand()));
        self
    }

    /// `column = EXCLUDED.column` for each column.
    pub fn set_excluded<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        for column in columns {
            let column = column.into();
            self.sets.push((Column::new(column.as_str()), excluded(column)));
        }
        self
    }

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
        if self.sets.is_empty() {
            return Err(BuildError::EmptyFields("update"));
        }

        let mut out = Fragment::raw("UPDATE ");
        if let Some(table) = &self.table {
            out.push(Column::new(table.as_str()).emit(opts)?);
            out.push_str(" ");
        }
        out.push_str("SET ");

        let sets = self
            .sets
            .iter()
            .map(|(column, value)| {
                let mut part = column.emit(opts)?;
                part.push_str("=");
                part.push(value.emit(opts)?);
                Ok(part)
            })
            .collect::<Result<Vec<_>, BuildError>>()?;
        out.push(Fragment::join(sets, opts.fields_delim));

        let filter = emit_group(&self.filters, " AND ", opts)?;
        if !filter.is_empty() {
            out.push_str(" WHERE ");
            out.push(filter);
        }

        emit_returning(&mut out, &self.returning, opts)?;
        Ok(out)
    }
}

impl Emit for Update {
    fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError> {
        Update::emit(self, opts)
    }
}

impl Returnable for Update {
    fn using_tables(&self) -> Vec<String> {
        self.table.iter().cloned().collect()
    }

    fn primary_with(&self) -> String {
        self.table.clone().unwrap_or_default()
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
