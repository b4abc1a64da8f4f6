//! INSERT builder, single-row and multi-row.

use super::{CounterKind, Returnable, Update, emit_items, emit_returning, pure_aliases};
use crate::emit::{Emit, Fragment};
use crate::error::BuildError;
use crate::expr::{Alias, Column, Expr, IntoOperand};
use crate::options::SqlOptions;

/// What to do when a row conflicts with an existing one.
#[derive(Debug, Clone)]
pub enum ConflictAction {
    Nothing,
    Update(Update),
}

/// `ON CONFLICT (..) DO NOTHING`
pub fn do_nothing() -> ConflictAction {
    ConflictAction::Nothing
}

/// `ON CONFLICT (..) DO UPDATE SET ..`; build the SET list on the returned [`Update`].
pub fn do_update(update: Update) -> ConflictAction {
    ConflictAction::Update(update)
}

/// A row of values for [`Insert::values`].
pub trait IntoRow {
    fn into_row(self) -> Vec<Expr>;
}

impl IntoRow for Vec<Expr> {
    fn into_row(self) -> Vec<Expr> {
        self
    }
}

impl<T: IntoOperand, const N: usize> IntoRow for [T; N] {
    fn into_row(self) -> Vec<Expr> {
        self.into_iter().map(IntoOperand::into_operand).collect()
    }
}

macro_rules! impl_into_row_tuple {
    ($($name:ident),+) => {
        impl<$($name: IntoOperand),+> IntoRow for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_row(self) -> Vec<Expr> {
                let ($($name,)+) = self;
                vec![$($name.into_operand()),+]
            }
        }
    };
}

impl_into_row_tuple!(A);
impl_into_row_tuple!(A, B);
impl_into_row_tuple!(A, B, C);
impl_into_row_tuple!(A, B, C, D);
impl_into_row_tuple!(A, B, C, D, E);
impl_into_row_tuple!(A, B, C, D, E, F);
impl_into_row_tuple!(A, B, C, D, E, F, G);
impl_into_row_tuple!(A, B, C, D, E, F, G, H);

/// INSERT builder.
///
/// The single-row form is filled with [`Insert::set`]; the multi-row form
/// ([`insert_many`]) with [`Insert::columns`] and [`Insert::values`].
#[derive(Debug, Clone)]
pub struct Insert {
    table: String,
    many: bool,
    columns: Vec<Column>,
    rows: Vec<Vec<Expr>>,
    conflict: Option<(Vec<Expr>, ConflictAction)>,
    returning: Vec<Alias>,
    error: Option<BuildError>,
}

/// Single-row `INSERT INTO table`.
pub fn insert(table: impl Into<String>) -> Insert {
    Insert::new(table, false)
}

/// Multi-row `INSERT INTO table (columns) VALUES (..),(..)`.
pub fn insert_many(table: impl Into<String>) -> Insert {
    Insert::new(table, true)
}

impl Insert {
    fn new(table: impl Into<String>, many: bool) -> Self {
        Self {
            table: table.into(),
            many,
            columns: Vec::new(),
            rows: Vec::new(),
            conflict: None,
            returning: Vec::new(),
            error: None,
        }
    }

    /// Single-row insert from `(column, value)` pairs, in order.
    pub fn from_pairs<K, V>(table: impl Into<String>, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: IntoOperand,
    {
        pairs
            .into_iter()
            .fold(insert(table), |insert, (column, value)| insert.set(column, value))
    }

    fn fail(&mut self, err: BuildError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// Set one column of the single row.
    pub fn set(mut self, column: impl Into<String>, value: impl IntoOperand) -> Self {
        if self.many {
            self.fail(BuildError::SingleInsertOnly);
            return self;
        }
        self.columns.push(Column::new(column));
        match self.rows.first_mut() {
            Some(row) => row.push(value.into_operand()),
            None => self.rows.push(vec![value.into_operand()]),
        }
        self
    }

    /// Column list of a multi-row insert.
    pub fn columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        if !self.many {
            self.fail(BuildError::InsertManyOnly);
            return self;
        }
        self.columns.extend(columns.into_iter().map(Column::new));
        self
    }

    /// Append a row to a multi-row insert.
    pub fn values(mut self, row: impl IntoRow) -> Self {
        if !self.many {
            self.fail(BuildError::InsertManyOnly);
            return self;
        }
        self.rows.push(row.into_row());
        self
    }

    pub fn on_conflict<E: Into<Expr>>(
        mut self,
        targets: impl IntoIterator<Item = E>,
        action: ConflictAction,
    ) -> Self {
        self.conflict = Some((targets.into_iter().map(Into::into).collect(), action));
        self
    }

    pub fn returning<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.returning.extend(pure_aliases(columns));
        self
    }

    pub fn returning_aliases(mut self, aliases: impl IntoIterator<Item = Alias>) -> Self {
        self.returning.extend(aliases);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if self.columns.is_empty() {
            return Err(BuildError::EmptyFields("insert"));
        }
        if self.rows.is_empty() {
            return Err(BuildError::NoInsertValues);
        }

        let mut out = Fragment::raw("INSERT INTO ");
        out.push(Column::new(self.table.as_str()).emit(opts)?);
        out.push_str(" (");
        out.push(emit_items(&self.columns, opts)?);
        out.push_str(") VALUES ");

        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut part = Fragment::raw("(");
                part.push(emit_items(row, opts)?);
                part.push_str(")");
                Ok(part)
            })
            .collect::<Result<Vec<_>, BuildError>>()?;
        out.push(Fragment::join(rows, opts.fields_delim));

        if let Some((targets, action)) = &self.conflict {
            out.push_str(" ON CONFLICT");
            if !targets.is_empty() {
                out.push_str(" (");
                out.push(emit_items(targets, opts)?);
                out.push_str(")");
            }
            out.push_str(" DO ");
            match action {
                ConflictAction::Nothing => out.push_str("NOTHING"),
                ConflictAction::Update(update) => out.push(update.emit(opts)?),
            }
        }

        emit_returning(&mut out, &self.returning, opts)?;
        Ok(out)
    }
}

impl Emit for Insert {
    fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError> {
        Insert::emit(self, opts)
    }
}

impl Returnable for Insert {
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
