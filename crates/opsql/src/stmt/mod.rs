//! Statement assemblers: SELECT, INSERT, UPDATE and DELETE.
//!
//! All four are consuming builders and implement [`Returnable`], the contract the row
//! binder and the prepared cache work against.
//!
//! ```ignore
//! use opsql::expr::eq;
//! use opsql::stmt::{desc, select};
//!
//! let q = select(["id", "name"])
//!     .from("users")
//!     .filter(eq("status", "active"))
//!     .order_by([desc("id")])
//!     .limit(10);
//! ```

mod delete;
mod insert;
mod order;
mod select;
mod update;

pub use delete::{Delete, delete};
pub use insert::{ConflictAction, Insert, IntoRow, do_nothing, do_update, insert, insert_many};
pub use order::{
    Nulls, Order, OrderBy, asc, asc_nulls_first, asc_nulls_last, desc, desc_nulls_first,
    desc_nulls_last, order,
};
pub use select::{Join, JoinKind, Modifier, Select, select, select_from};
pub use update::{Update, do_update_set, update};

use crate::emit::{Emit, Fragment, compile};
use crate::error::BuildError;
use crate::expr::Alias;
use crate::options::SqlOptions;
use crate::prepared::{Args, bind_refs};

/// How a statement is executed: SELECT reads rows, the rest execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    Query,
    Exec,
}

/// A statement whose output columns can be inspected and replaced.
pub trait Returnable: Emit + Send + Sync {
    /// Tables the statement reads from, primary table first.
    fn using_tables(&self) -> Vec<String>;

    /// The table models are described against.
    fn primary_with(&self) -> String;

    /// Current output columns. Empty means "all" for SELECT and "none" elsewhere.
    fn get_returning(&self) -> Vec<Alias>;

    fn set_returning(&mut self, aliases: Vec<Alias>);

    /// Restrict to one row where the statement supports it.
    fn limit_returning_one(&mut self);

    fn counter_kind(&self) -> CounterKind;

    /// Compile and substitute named arguments.
    fn prepared_emit(&self, opts: &SqlOptions, args: &Args) -> Result<Fragment, BuildError> {
        bind_refs(compile(self, opts)?, args)
    }
}

/// Emit `items` joined by the fields delimiter.
pub(crate) fn emit_items<'a, E: Emit + 'a>(
    items: impl IntoIterator<Item = &'a E>,
    opts: &SqlOptions,
) -> Result<Fragment, BuildError> {
    let parts = items
        .into_iter()
        .map(|item| item.emit(opts))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Fragment::join(parts, opts.fields_delim))
}

/// ` RETURNING a,b` or nothing.
pub(crate) fn emit_returning(
    out: &mut Fragment,
    returning: &[Alias],
    opts: &SqlOptions,
) -> Result<(), BuildError> {
    if returning.is_empty() {
        return Ok(());
    }
    out.push_str(" RETURNING ");
    out.push(emit_items(returning, opts)?);
    Ok(())
}

/// Pure aliases for plain column names.
pub(crate) fn pure_aliases<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Vec<Alias> {
    columns.into_iter().map(Alias::pure).collect()
}
