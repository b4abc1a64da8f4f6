//! JSON-driven pagination over an arbitrary SELECT.
//!
//! The caller's query becomes a sub-select aliased `result`; the request's filters and
//! orders apply to its output columns, which must be whitelisted.
//!
//! ```json
//! {
//!   "offset": 20,
//!   "limit": 10,
//!   "orders": [{ "key": "id", "desc": true }],
//!   "filters": { "$or": [{ "age": 25 }, { "age": { "$gte": 60 } }], "name": { "$rlike": "an" } }
//! }
//! ```
//!
//! | operator | SQL |
//! |----------|-----|
//! | value, `$eq` | `=` (`IS NULL` for null) |
//! | `$ne` | `!=` |
//! | `$lt` `$gt` `$lte` `$gte` | `<` `>` `<=` `>=` |
//! | `$in` `$nin` | `IN (..)` `NOT IN (..)` |
//! | `$like` `$llike` `$rlike` | `LIKE '%v%'` `LIKE '%v'` `LIKE 'v%'` |

use crate::binder::{fetch_many, resolve_returning};
use crate::client::Executor;
use crate::emit::compile;
use crate::error::{OrmResult, PaginateError};
use crate::expr::{Expr, alias, col, count, eq, gt, gte, in_list, like, lt, lte, ne, not_in};
use crate::model::Model;
use crate::prepared::Args;
use crate::stmt::{OrderBy, Select, asc, desc, select, select_from};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::collections::HashSet;

type JsonValue = serde_json::Value;

/// Alias of the wrapped caller query.
pub const RESULT_ALIAS: &str = "result";
/// Output column of the count query.
pub const TOTAL_COUNT: &str = "total_count";

/// One page request, usually deserialized from a client payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginateRequest {
    pub offset: u64,
    pub limit: u64,
    pub orders: Vec<OrderRequest>,
    pub filters: Map<String, JsonValue>,
}

impl PaginateRequest {
    pub fn from_json(json: &str) -> Result<Self, PaginateError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderRequest {
    pub key: String,
    pub desc: bool,
}

/// Safety limits applied to every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginatorConfig {
    /// Smallest page size; 1 when unset.
    pub min_limit: Option<u64>,
    pub max_limit: u64,
    /// Deepest allowed `$and`/`$or` nesting.
    pub max_depth: usize,
    /// Longest allowed `$in`/`$nin` array.
    pub max_slice_len: usize,
}

impl Default for PaginatorConfig {
    fn default() -> Self {
        Self {
            min_limit: None,
            max_limit: 100,
            max_depth: 5,
            max_slice_len: 10,
        }
    }
}

/// The two statements behind one page.
#[derive(Debug, Clone)]
pub struct PageStatements {
    /// `SELECT * FROM (inner) AS "result" WHERE .. ORDER BY .. LIMIT .. OFFSET ..`
    pub page: Select,
    /// `SELECT COUNT(*) AS "total_count" FROM (inner) AS "result" WHERE ..`
    pub count: Select,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub total_rows: u64,
    pub rows: Vec<T>,
}

/// Turns untrusted [`PaginateRequest`]s into page and count queries.
#[derive(Debug, Clone)]
pub struct Paginator {
    whitelist: HashSet<String>,
    config: PaginatorConfig,
}

impl Paginator {
    /// Only `whitelist` columns may be filtered or ordered on.
    pub fn new<S: Into<String>>(whitelist: impl IntoIterator<Item = S>) -> Self {
        Self {
            whitelist: whitelist.into_iter().map(Into::into).collect(),
            config: PaginatorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PaginatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &PaginatorConfig {
        &self.config
    }

    /// Clamp a requested page size into `[min_limit, max_limit]`.
    pub fn limit(&self, requested: u64) -> u64 {
        let min = self.config.min_limit.unwrap_or(1);
        requested.max(min).min(self.config.max_limit)
    }

    /// Parse a filter document; `None` when it filters nothing.
    pub fn filter(&self, filters: &Map<String, JsonValue>) -> Result<Option<Expr>, PaginateError> {
        Ok(collapse(self.parse_object(filters, 0)?, Expr::And))
    }

    pub fn orders(&self, orders: &[OrderRequest]) -> Result<Vec<OrderBy>, PaginateError> {
        orders
            .iter()
            .map(|order| {
                if !self.whitelist.contains(&order.key) {
                    return Err(PaginateError::OrderNotAllowed(order.key.clone()));
                }
                Ok(if order.desc {
                    desc(col(order.key.as_str()))
                } else {
                    asc(col(order.key.as_str()))
                })
            })
            .collect()
    }

    /// Wrap `inner` into the page and count statements without running them.
    pub fn build(&self, inner: Select, req: &PaginateRequest) -> Result<PageStatements, PaginateError> {
        let filter = self.filter(&req.filters)?;
        let orders = self.orders(&req.orders)?;
        let limit = i64::try_from(self.limit(req.limit)).unwrap_or(i64::MAX);

        let mut page = select_from(alias(inner.clone(), RESULT_ALIAS));
        let mut total = select([alias(count("*"), TOTAL_COUNT)]).from(alias(inner, RESULT_ALIAS));
        if let Some(filter) = filter {
            page = page.filter(filter.clone());
            total = total.filter(filter);
        }

        page = page.order_by(orders).limit(limit);
        if req.offset > 0 {
            page = page.offset(i64::try_from(req.offset).unwrap_or(i64::MAX));
        }

        Ok(PageStatements { page, count: total })
    }

    /// Run one page of `inner` for `T` together with the total row count.
    ///
    /// Without explicit fields, `inner` selects every column `T` describes.
    pub async fn paginate<T: Model>(
        &self,
        mut inner: Select,
        req: &PaginateRequest,
        conn: &impl Executor,
    ) -> OrmResult<Page<T>> {
        let (md, keys) = resolve_returning::<T, Select>(&mut inner)?;
        let paths = md.key_paths(&keys)?;
        let statements = self.build(inner, req)?;

        let opts = conn.sql_options();
        let counted = compile(&statements.count, &opts)?;
        let total: i64 = conn
            .query_row(&counted.sql, &counted.args)
            .await?
            .try_get(0)?;

        let rows = fetch_many(conn, &statements.page, &Args::new(), &paths).await?;
        tracing::debug!(
            target: "opsql.sql",
            model = T::type_name(),
            total,
            rows = rows.len(),
            "paginated"
        );

        Ok(Page {
            total_rows: u64::try_from(total).unwrap_or_default(),
            rows,
        })
    }

    // ==================== Filter grammar ====================

    fn parse_object(
        &self,
        filters: &Map<String, JsonValue>,
        depth: usize,
    ) -> Result<Vec<Expr>, PaginateError> {
        if depth > self.config.max_depth {
            return Err(PaginateError::DepthExceeded(self.config.max_depth));
        }

        let mut exprs = Vec::with_capacity(filters.len());
        for (key, value) in sorted(filters) {
            let expr = match key.as_str() {
                "$and" => self.parse_group(key, value, depth + 1, Expr::And)?,
                "$or" => self.parse_group(key, value, depth + 1, Expr::Or)?,
                _ => {
                    if !self.whitelist.contains(key) {
                        return Err(PaginateError::DisallowedKey(key.clone()));
                    }
                    Some(self.parse_field(key, value)?)
                }
            };
            exprs.extend(expr);
        }
        Ok(exprs)
    }

    fn parse_group(
        &self,
        key: &str,
        value: &JsonValue,
        depth: usize,
        join: fn(Vec<Expr>) -> Expr,
    ) -> Result<Option<Expr>, PaginateError> {
        let JsonValue::Array(items) = value else {
            return Err(PaginateError::FilterInvalid(key.to_string()));
        };

        let mut children = Vec::with_capacity(items.len());
        for item in items {
            let JsonValue::Object(filters) = item else {
                return Err(PaginateError::FilterInvalid(key.to_string()));
            };
            children.extend(collapse(self.parse_object(filters, depth)?, Expr::And));
        }
        Ok(collapse(children, join))
    }

    fn parse_field(&self, key: &str, value: &JsonValue) -> Result<Expr, PaginateError> {
        let ops = match value {
            JsonValue::Object(ops) if !ops.is_empty() => ops,
            JsonValue::Object(_) | JsonValue::Array(_) => {
                return Err(PaginateError::FilterInvalid(key.to_string()));
            }
            primitive => return Ok(eq(col(key), json_scalar(key, primitive)?)),
        };

        let mut exprs = Vec::with_capacity(ops.len());
        for (op, operand) in sorted(ops) {
            let target = col(key);
            let expr = match op.as_str() {
                "$eq" => eq(target, primitive(key, operand)?),
                "$ne" => ne(target, primitive(key, operand)?),
                "$lt" => lt(target, primitive(key, operand)?),
                "$gt" => gt(target, primitive(key, operand)?),
                "$lte" => lte(target, primitive(key, operand)?),
                "$gte" => gte(target, primitive(key, operand)?),
                "$in" => in_list(target, self.slice(key, operand)?),
                "$nin" => not_in(target, self.slice(key, operand)?),
                "$like" => like(target, format!("%{}%", pattern(key, operand)?)),
                "$llike" => like(target, format!("%{}", pattern(key, operand)?)),
                "$rlike" => like(target, format!("{}%", pattern(key, operand)?)),
                _ => return Err(PaginateError::FilterInvalid(op.clone())),
            };
            exprs.push(expr);
        }
        Ok(collapse(exprs, Expr::And).unwrap_or_else(|| Expr::And(Vec::new())))
    }

    fn slice(&self, key: &str, operand: &JsonValue) -> Result<Vec<Value>, PaginateError> {
        let JsonValue::Array(items) = operand else {
            return Err(PaginateError::FilterInvalid(key.to_string()));
        };
        if items.len() > self.config.max_slice_len {
            return Err(PaginateError::ArrayTooLong(key.to_string()));
        }
        items.iter().map(|item| primitive(key, item)).collect()
    }
}

fn sorted(map: &Map<String, JsonValue>) -> Vec<(&String, &JsonValue)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

/// Nothing for no children, the child itself for one, `join` otherwise.
fn collapse(mut exprs: Vec<Expr>, join: fn(Vec<Expr>) -> Expr) -> Option<Expr> {
    match exprs.len() {
        0 => None,
        1 => exprs.pop(),
        _ => Some(join(exprs)),
    }
}

fn primitive(key: &str, operand: &JsonValue) -> Result<Value, PaginateError> {
    match operand {
        JsonValue::Array(_) | JsonValue::Object(_) => {
            Err(PaginateError::FilterInvalid(key.to_string()))
        }
        other => json_scalar(key, other),
    }
}

fn json_scalar(key: &str, operand: &JsonValue) -> Result<Value, PaginateError> {
    Value::from_json(operand).map_err(|_| PaginateError::FilterInvalid(key.to_string()))
}

fn pattern(key: &str, operand: &JsonValue) -> Result<String, PaginateError> {
    match operand {
        JsonValue::String(text) => Ok(text.clone()),
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::Bool(b) => Ok(b.to_string()),
        _ => Err(PaginateError::FilterInvalid(key.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::Fragment;
    use crate::options::SqlOptions;
    use serde_json::json;

    fn paginator() -> Paginator {
        Paginator::new(["id", "age", "name"])
    }

    fn request(value: JsonValue) -> PaginateRequest {
        serde_json::from_value(value).unwrap()
    }

    fn where_clause(filters: JsonValue) -> Result<Fragment, PaginateError> {
        let req = request(json!({ "filters": filters }));
        let expr = paginator().filter(&req.filters)?;
        Ok(compile(&expr.unwrap_or_else(|| Expr::And(Vec::new())), &SqlOptions::postgres()).unwrap())
    }

    #[test]
    fn test_or_group_with_order_and_limit() {
        let req = request(json!({
            "limit": 10,
            "filters": {"$or": [{"age": 25}, {"age": {"$eq": 26}}]},
            "orders": [{"key": "id", "desc": true}]
        }));
        let inner = select(["id", "age", "name"]).from("u");
        let statements = paginator().build(inner, &req).unwrap();

        let page = compile(&statements.page, &SqlOptions::postgres()).unwrap();
        assert_eq!(
            page.sql,
            r#"SELECT * FROM (SELECT "id","age","name" FROM "u") AS "result" WHERE ("age" = $1 OR "age" = $2) ORDER BY "id" DESC LIMIT $3"#
        );
        assert_eq!(page.args, vec![Value::Int(25), Value::Int(26), Value::Int(10)]);

        let total = compile(&statements.count, &SqlOptions::postgres()).unwrap();
        assert_eq!(
            total.sql,
            r#"SELECT (COUNT(*)) AS "total_count" FROM (SELECT "id","age","name" FROM "u") AS "result" WHERE ("age" = $1 OR "age" = $2)"#
        );
        assert_eq!(total.args, vec![Value::Int(25), Value::Int(26)]);
    }

    #[test]
    fn test_offset_and_ascending_order() {
        let req = request(json!({"offset": 30, "limit": 5, "orders": [{"key": "name"}]}));
        let statements = paginator().build(select_from("u"), &req).unwrap();
        let page = compile(&statements.page, &SqlOptions::postgres()).unwrap();
        assert_eq!(
            page.sql,
            r#"SELECT * FROM (SELECT * FROM "u") AS "result" ORDER BY "name" ASC LIMIT $1 OFFSET $2"#
        );
        assert_eq!(page.args, vec![Value::Int(5), Value::Int(30)]);
    }

    #[test]
    fn test_limit_is_clamped() {
        let p = paginator();
        assert_eq!(p.limit(0), 1);
        assert_eq!(p.limit(50), 50);
        assert_eq!(p.limit(1_000), 100);

        let p = paginator().with_config(PaginatorConfig {
            min_limit: Some(10),
            max_limit: 20,
            ..PaginatorConfig::default()
        });
        assert_eq!(p.limit(3), 10);
        assert_eq!(p.limit(30), 20);
    }

    #[test]
    fn test_operators() {
        let out = where_clause(json!({
            "age": {"$gte": 18, "$lt": 65},
            "name": {"$rlike": "an"}
        }))
        .unwrap();
        assert_eq!(
            out.sql,
            r#"(("age" >= $1 AND "age" < $2) AND "name" LIKE $3)"#
        );
        assert_eq!(
            out.args,
            vec![Value::Int(18), Value::Int(65), Value::Text("an%".into())]
        );

        let out = where_clause(json!({"name": {"$like": "x", "$llike": 7}})).unwrap();
        assert_eq!(out.args, vec![Value::Text("%x%".into()), Value::Text("%7".into())]);

        let out = where_clause(json!({"id": {"$in": [1, 2]}, "name": null})).unwrap();
        assert_eq!(out.sql, r#"("id" IN ($1,$2) AND "name" IS NULL)"#);

        let out = where_clause(json!({"id": {"$nin": []}})).unwrap();
        assert_eq!(out.sql, "1=1");
    }

    #[test]
    fn test_groups_collapse() {
        let out = where_clause(json!({"$and": [{"age": 1}]})).unwrap();
        assert_eq!(out.sql, r#""age" = $1"#);

        let out = where_clause(json!({"$or": []})).unwrap();
        assert!(out.sql.is_empty());

        let out = where_clause(json!({"$or": [{"age": 1, "name": "a"}, {"id": 2}]})).unwrap();
        assert_eq!(out.sql, r#"(("age" = $1 AND "name" = $2) OR "id" = $3)"#);
    }

    #[test]
    fn test_disallowed_key() {
        let err = where_clause(json!({"password": "x"})).unwrap_err();
        assert_eq!(err.to_string(), "\"password\" is not allowed: disallowed key");

        let err = paginator()
            .orders(&[OrderRequest {
                key: "password".into(),
                desc: false,
            }])
            .unwrap_err();
        assert_eq!(err.to_string(), "target \"password\" is not allowed");
    }

    #[test]
    fn test_invalid_shapes() {
        for filters in [
            json!({"age": [1, 2]}),
            json!({"age": {}}),
            json!({"age": {"$eq": [1]}}),
            json!({"age": {"$in": 3}}),
            json!({"age": {"$in": [[1]]}}),
            json!({"age": {"$like": null}}),
            json!({"$or": {"age": 1}}),
            json!({"$and": [1]}),
            json!({"id": u64::MAX}),
            json!({"id": {"$in": [1, u64::MAX]}}),
        ] {
            let err = where_clause(filters.clone()).unwrap_err();
            assert!(
                matches!(err, PaginateError::FilterInvalid(_)),
                "{filters} gave {err}"
            );
        }

        let err = where_clause(json!({"age": {"$regex": "a"}})).unwrap_err();
        assert_eq!(err.to_string(), "invalid value: \"$regex\": filter invalid");
    }

    #[test]
    fn test_depth_limit() {
        let mut filters = json!({"age": 1});
        for _ in 0..5 {
            filters = json!({"$and": [filters]});
        }
        assert!(where_clause(filters.clone()).is_ok());

        let filters = json!({"$and": [filters]});
        let err = where_clause(filters).unwrap_err();
        assert_eq!(err.to_string(), "filter depth exceeded, max depth 5");
    }

    #[test]
    fn test_slice_limit() {
        let values: Vec<i64> = (0..11).collect();
        let err = where_clause(json!({"id": {"$in": values}})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "\"id\" value is too long: filter array length exceeded"
        );
    }

    #[test]
    fn test_malformed_request() {
        let err = PaginateRequest::from_json(r#"{"limit": "ten"}"#).unwrap_err();
        assert!(matches!(err, PaginateError::Json(_)));

        let req = PaginateRequest::from_json("{}").unwrap();
        assert_eq!(req, PaginateRequest::default());
    }
}
