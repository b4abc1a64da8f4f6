//! Model descriptions: how a Rust struct maps onto tables, columns and scan targets.
//!
//! `#[derive(Model)]` implements [`Model`] from `#[op("tag,flags")]` field attributes;
//! [`describe`] turns the static field list into a [`ModelDetails`] lookup table.
//!
//! ```ignore
//! use opsql::Model;
//!
//! #[derive(Debug, Default, Model)]
//! struct User {
//!     #[op("id,primary")]
//!     id: i64,
//!     #[op("name")]
//!     name: String,
//!     #[op("role,nested")]
//!     role: Option<Role>,
//! }
//! ```

use crate::error::{OrmError, OrmResult};
use crate::value::{FromValue, Value};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

/// One annotated field of a model.
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    /// Rust field name.
    pub ident: &'static str,
    /// Column name, or sub-table name for nested fields.
    pub tag: &'static str,
    pub primary: bool,
    pub aggregated: bool,
    /// Field list of the nested struct.
    pub nested: Option<fn() -> &'static [FieldDef]>,
}

/// A struct rows can be scanned into. Use `#[derive(Model)]`.
///
/// Paths are index chains into [`Model::fields`], one step per nesting level.
pub trait Model: Default + Send + 'static {
    fn fields() -> &'static [FieldDef];

    /// Store `value` in the field at `path`, initialising nested `Option`s on the way.
    fn scan_field(&mut self, path: &[usize], value: Value) -> OrmResult<()>;

    /// Current value of the field at `path`; `None` if the path is not a column.
    fn field_value(&self, path: &[usize]) -> Option<Value>;

    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Decode `value` into `slot`, attributing failures to `column`.
#[doc(hidden)]
pub fn scan_value<T: FromValue>(slot: &mut T, value: Value, column: &str) -> OrmResult<()> {
    *slot = T::from_value(value).map_err(|err| match err {
        OrmError::Decode { message, .. } => OrmError::decode(column, message),
        other => other,
    })?;
    Ok(())
}

/// Error for a scan path the derived code does not know.
#[doc(hidden)]
pub fn invalid_path(type_name: &str, path: &[usize]) -> OrmError {
    OrmError::decode(type_name, format!("invalid field path {path:?}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TagDetail {
    pub is_aggregated: bool,
}

/// Lookup tables derived from a model's field list for one root table.
///
/// Qualified names are `table.tag`, except aggregated columns which are the bare tag.
#[derive(Debug, Clone, Default)]
pub struct ModelDetails {
    pub type_name: &'static str,
    pub table: String,
    /// Qualified primary key, if the root declares one.
    pub primary: Option<String>,
    pub primary_tag: Option<String>,
    /// Qualified name to field path.
    pub setters: HashMap<String, Vec<usize>>,
    /// Table, then tag, to qualified name.
    pub mapping: HashMap<String, HashMap<String, String>>,
    /// Qualified names per table, in declaration order.
    pub fields: HashMap<String, Vec<String>>,
    pub tags: HashMap<String, Vec<String>>,
    pub tag_details: HashMap<String, HashMap<String, TagDetail>>,
    /// Root table first, then nested tables in declaration order.
    pub tables: Vec<String>,
}

impl ModelDetails {
    fn build(type_name: &'static str, table: &str, defs: &'static [FieldDef]) -> Self {
        let mut md = Self {
            type_name,
            table: table.to_string(),
            ..Self::default()
        };
        md.walk(table, defs, &[], true);
        md
    }

    fn walk(&mut self, table: &str, defs: &'static [FieldDef], prefix: &[usize], root: bool) {
        self.tables.push(table.to_string());
        self.fields.entry(table.to_string()).or_default();
        self.tags.entry(table.to_string()).or_default();

        for (i, def) in defs.iter().enumerate() {
            let mut path = prefix.to_vec();
            path.push(i);

            if let Some(nested) = def.nested {
                self.walk(def.tag, nested(), &path, false);
                continue;
            }

            let qualified = if def.aggregated {
                def.tag.to_string()
            } else {
                format!("{table}.{}", def.tag)
            };

            if root && def.primary {
                self.primary = Some(qualified.clone());
                self.primary_tag = Some(def.tag.to_string());
            }

            self.mapping
                .entry(table.to_string())
                .or_default()
                .insert(def.tag.to_string(), qualified.clone());
            self.tag_details
                .entry(table.to_string())
                .or_default()
                .insert(
                    def.tag.to_string(),
                    TagDetail {
                        is_aggregated: def.aggregated,
                    },
                );
            self.tags
                .entry(table.to_string())
                .or_default()
                .push(def.tag.to_string());
            self.fields
                .entry(table.to_string())
                .or_default()
                .push(qualified.clone());
            self.setters.insert(qualified, path);
        }
    }

    /// Qualified names of `table` in declaration order.
    pub fn table_fields(&self, table: &str) -> &[String] {
        self.fields.get(table).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_aggregated(&self, table: &str, tag: &str) -> bool {
        self.tag_details
            .get(table)
            .and_then(|details| details.get(tag))
            .is_some_and(|detail| detail.is_aggregated)
    }

    /// Resolve each key to its field path.
    pub fn key_paths<S: AsRef<str>>(&self, keys: &[S]) -> OrmResult<Vec<Vec<usize>>> {
        keys.iter()
            .map(|key| {
                let key = key.as_ref();
                self.setters
                    .get(key)
                    .cloned()
                    .ok_or_else(|| OrmError::key_not_described(key, self.type_name))
            })
            .collect()
    }
}

type DetailsCache = RwLock<HashMap<(TypeId, String), Arc<ModelDetails>>>;

static DETAILS: LazyLock<DetailsCache> = LazyLock::new(|| RwLock::new(HashMap::new()));

/// Describe `T` with `table` as its root table. Results are cached per `(T, table)`.
pub fn describe<T: Model>(table: &str) -> Arc<ModelDetails> {
    let key = (TypeId::of::<T>(), table.to_string());

    if let Some(md) = DETAILS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
    {
        return Arc::clone(md);
    }

    let mut cache = DETAILS.write().unwrap_or_else(PoisonError::into_inner);
    let md = cache.entry(key).or_insert_with(|| {
        tracing::trace!(
            target: "opsql.model",
            model = T::type_name(),
            table,
            "describing model"
        );
        Arc::new(ModelDetails::build(T::type_name(), table, T::fields()))
    });
    Arc::clone(md)
}
