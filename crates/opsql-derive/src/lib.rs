//! Derive macros for opsql
//!
//! Provides `#[derive(Model)]`.

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod common;
mod model;

/// Derive `opsql::model::Model` for a struct with named fields.
///
/// # Example
///
/// ```ignore
/// use opsql::Model;
///
/// #[derive(Debug, Default, Model)]
/// struct User {
///     #[op("id,primary")]
///     id: i64,
///     #[op("name")]
///     name: String,
///     #[op("post_count,aggregated")]
///     post_count: i64,
///     #[op("roles,nested")]
///     role: Option<Role>,
///     // not mapped
///     cache: Vec<u8>,
/// }
/// ```
///
/// # Attributes
///
/// `#[op("tag[,flag]*")]`, where `tag` is the column name (the sub-table name for nested
/// fields) and the flags are:
///
/// - `primary` - primary key of the root table
/// - `aggregated` - computed column, addressed by its bare tag
/// - `nested` - a `Model` (or `Option` of one) whose columns live in the `tag` table
#[proc_macro_derive(Model, attributes(op))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    model::expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
