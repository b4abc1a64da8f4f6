//! Row binder: runs a [`Returnable`] statement and scans its rows into a [`Model`].
//!
//! ```ignore
//! use opsql::{query, put};
//! use opsql::expr::eq;
//! use opsql::stmt::select_from;
//!
//! let user: User = query(select_from("users").filter(eq("id", 7)))
//!     .get_one(&db)
//!     .await?;
//!
//! let mut user = User { name: "ann".into(), ..Default::default() };
//! put("users", &mut user).with(&db).await?;
//! assert_ne!(user.id, 0);
//! ```

use crate::client::{ExecResult, Executor, Row};
use crate::error::{OrmError, OrmResult};
use crate::expr::{Alias, arg};
use crate::model::{Model, ModelDetails, describe};
use crate::prepared::{Args, ReturnableCache};
use crate::stmt::{Insert, Returnable, do_update, do_update_set, insert};
use crate::value::Value;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

/// A statement bound for execution, with optional named arguments.
#[must_use]
pub struct Query<R> {
    ret: R,
    args: Args,
}

/// Wrap a statement for execution.
pub fn query<R: Returnable>(ret: R) -> Query<R> {
    Query::new(ret)
}

impl<R: Returnable> Query<R> {
    pub fn new(ret: R) -> Self {
        Self {
            ret,
            args: Args::new(),
        }
    }

    /// Values for the statement's `arg(name)` slots.
    pub fn args(mut self, args: Args) -> Self {
        self.args = args;
        self
    }

    // ==================== Execution ====================

    /// Fetch the first row into `T`.
    ///
    /// SELECT is limited to one row; 0 rows is [`OrmError::NotFound`].
    pub async fn get_one<T: Model>(mut self, conn: &impl Executor) -> OrmResult<T> {
        let (md, keys) = resolve_returning::<T, R>(&mut self.ret)?;
        self.ret.limit_returning_one();

        let paths = md.key_paths(&keys)?;
        fetch_one(conn, &self.ret, &self.args, &paths).await
    }

    /// Fetch every row, one fresh `T::default()` per row.
    pub async fn get_many<T: Model>(mut self, conn: &impl Executor) -> OrmResult<Vec<T>> {
        let (md, keys) = resolve_returning::<T, R>(&mut self.ret)?;
        let paths = md.key_paths(&keys)?;
        fetch_many(conn, &self.ret, &self.args, &paths).await
    }

    /// Run the statement without scanning rows.
    pub async fn exec(self, conn: &impl Executor) -> OrmResult<ExecResult> {
        let fragment = self.ret.prepared_emit(&conn.sql_options(), &self.args)?;
        conn.exec(&fragment.sql, &fragment.args).await
    }
}

/// Map the statement's output columns onto `T` and return the scan keys.
///
/// Empty returning selects every described column of every used table. Otherwise each
/// alias must name a setter directly or match exactly one `table.tag` of the model.
pub(crate) fn resolve_returning<T: Model, R: Returnable + ?Sized>(
    ret: &mut R,
) -> OrmResult<(Arc<ModelDetails>, Vec<String>)> {
    let md = describe::<T>(&ret.primary_with());

    let mut tables: Vec<String> = Vec::new();
    for table in ret.using_tables() {
        if !tables.contains(&table) {
            tables.push(table);
        }
    }

    let returning = ret.get_returning();
    let (aliases, keys) = if returning.is_empty() {
        let keys: Vec<String> = tables
            .iter()
            .flat_map(|table| md.table_fields(table).iter().cloned())
            .collect();
        let aliases = keys.iter().map(Alias::pure).collect();
        (aliases, keys)
    } else {
        let mut aliases = returning;
        let mut keys = Vec::with_capacity(aliases.len());
        for alias in &mut aliases {
            keys.push(resolve_alias(&md, &tables, alias)?);
        }
        (aliases, keys)
    };

    ret.set_returning(aliases);
    Ok((md, keys))
}

fn resolve_alias(md: &ModelDetails, tables: &[String], alias: &mut Alias) -> OrmResult<String> {
    let name = alias.name().to_string();
    if md.setters.contains_key(&name) {
        return Ok(name);
    }

    let matches: Vec<&String> = tables
        .iter()
        .filter_map(|table| md.mapping.get(table).and_then(|tags| tags.get(&name)))
        .collect();

    match matches.as_slice() {
        [] => Err(OrmError::TargetNotDescribed {
            target: name,
            type_name: md.type_name.to_string(),
        }),
        [qualified] => {
            let qualified = (*qualified).clone();
            if alias.is_pure() {
                alias.rename(qualified.as_str());
            }
            Ok(qualified)
        }
        _ => Err(OrmError::AmbiguousTarget(name)),
    }
}

fn scan_row<T: Model>(target: &mut T, paths: &[Vec<usize>], row: Row) -> OrmResult<()> {
    if row.len() != paths.len() {
        return Err(OrmError::Other(format!(
            "row has {} columns, {} expected by {}",
            row.len(),
            paths.len(),
            T::type_name()
        )));
    }
    for (path, value) in paths.iter().zip(row.into_values()) {
        target.scan_field(path, value)?;
    }
    Ok(())
}

pub(crate) async fn fetch_one<T, R, E>(
    conn: &E,
    ret: &R,
    args: &Args,
    paths: &[Vec<usize>],
) -> OrmResult<T>
where
    T: Model,
    R: Returnable + ?Sized,
    E: Executor,
{
    let fragment = ret.prepared_emit(&conn.sql_options(), args)?;
    let row = conn.query_row(&fragment.sql, &fragment.args).await?;
    let mut item = T::default();
    scan_row(&mut item, paths, row)?;
    Ok(item)
}

pub(crate) async fn fetch_many<T, R, E>(
    conn: &E,
    ret: &R,
    args: &Args,
    paths: &[Vec<usize>],
) -> OrmResult<Vec<T>>
where
    T: Model,
    R: Returnable + ?Sized,
    E: Executor,
{
    let fragment = ret.prepared_emit(&conn.sql_options(), args)?;
    let mut rows = conn.query(&fragment.sql, &fragment.args).await?;

    let mut items = Vec::new();
    for (_, row) in rows.by_ref() {
        let mut item = T::default();
        scan_row(&mut item, paths, row)?;
        items.push(item);
    }
    rows.close()?;
    Ok(items)
}

// ==================== Put ====================

struct PutPlan {
    stmt: Arc<ReturnableCache<Insert>>,
    /// Argument name and field path of each inserted column.
    bind: Vec<(String, Vec<usize>)>,
    /// Field path of each RETURNING column.
    scan: Vec<Vec<usize>>,
}

type PutCache = RwLock<HashMap<(String, bool), HashMap<TypeId, Arc<PutPlan>>>>;

static PUT_PLANS: LazyLock<PutCache> = LazyLock::new(|| RwLock::new(HashMap::new()));

/// Upsert of one model row keyed on its primary column.
#[must_use]
pub struct Put<'a, T> {
    table: String,
    item: &'a mut T,
}

/// Insert `item` into `table`, or update it when its primary key conflicts.
///
/// A zero primary key is left out of the insert so the database assigns one.
pub fn put<T: Model>(table: impl Into<String>, item: &mut T) -> Put<'_, T> {
    Put {
        table: table.into(),
        item,
    }
}

impl<T: Model> Put<'_, T> {
    /// Run the upsert and overwrite the item's columns with the stored row.
    pub async fn with(self, conn: &impl Executor) -> OrmResult<()> {
        let md = describe::<T>(&self.table);
        let primary = md
            .primary
            .as_deref()
            .ok_or_else(|| OrmError::NoPrimaryKey(T::type_name().to_string()))?;
        let primary_path = md.key_paths(&[primary])?.remove(0);
        let use_primary = self
            .item
            .field_value(&primary_path)
            .is_some_and(|value| !value.is_zero());

        let plan = put_plan::<T>(&md, use_primary)?;
        let args: Args = plan
            .bind
            .iter()
            .map(|(tag, path)| {
                let value = self.item.field_value(path).unwrap_or(Value::Null);
                (tag.as_str(), value)
            })
            .collect();

        let fragment = plan.stmt.bind(&conn.sql_options(), &args)?;
        let row = conn.query_row(&fragment.sql, &fragment.args).await?;
        scan_row(self.item, &plan.scan, row)
    }
}

fn put_plan<T: Model>(md: &ModelDetails, use_primary: bool) -> OrmResult<Arc<PutPlan>> {
    let key = (md.table.clone(), use_primary);
    let type_id = TypeId::of::<T>();

    if let Some(plan) = PUT_PLANS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
        .and_then(|plans| plans.get(&type_id))
    {
        return Ok(Arc::clone(plan));
    }

    let plan = Arc::new(build_put_plan(md, use_primary)?);
    let mut cache = PUT_PLANS.write().unwrap_or_else(PoisonError::into_inner);
    let plan = cache
        .entry(key)
        .or_default()
        .entry(type_id)
        .or_insert(plan);
    Ok(Arc::clone(plan))
}

fn build_put_plan(md: &ModelDetails, use_primary: bool) -> OrmResult<PutPlan> {
    let table = md.table.as_str();
    let primary_tag = md
        .primary_tag
        .as_deref()
        .ok_or_else(|| OrmError::NoPrimaryKey(md.type_name.to_string()))?;

    let mut columns = Vec::new();
    for tag in md.tags.get(table).into_iter().flatten() {
        if md.is_aggregated(table, tag) {
            continue;
        }
        let qualified = md
            .mapping
            .get(table)
            .and_then(|tags| tags.get(tag))
            .ok_or_else(|| OrmError::key_not_described(tag.as_str(), md.type_name))?;
        let path = md.key_paths(&[qualified])?.remove(0);
        columns.push((tag.clone(), path));
    }

    let bind: Vec<(String, Vec<usize>)> = columns
        .iter()
        .filter(|(tag, _)| use_primary || tag != primary_tag)
        .cloned()
        .collect();
    let updated = columns.iter().map(|(tag, _)| tag.as_str());
    let action = do_update(do_update_set().set_excluded(updated));

    let stmt = bind
        .iter()
        .fold(insert(table), |stmt, (tag, _)| stmt.set(tag.as_str(), arg(tag.as_str())))
        .on_conflict([primary_tag], action)
        .returning(columns.iter().map(|(tag, _)| tag.as_str()));

    tracing::trace!(
        target: "opsql.prepared",
        model = md.type_name,
        table,
        use_primary,
        "built put statement"
    );

    Ok(PutPlan {
        stmt: Arc::new(ReturnableCache::new(stmt)),
        bind,
        scan: columns.into_iter().map(|(_, path)| path).collect(),
    })
}
