//! End-to-end emission checks through the public API.

use opsql::expr::{arg, col, eq, ne};
use opsql::stmt::{asc_nulls_last, delete, desc, do_nothing, insert_many, select, select_from};
use opsql::{
    Args, BuildError, PaginateRequest, Paginator, ReturnableCache, SqlOptions, Value, compile,
};

fn pg() -> SqlOptions {
    SqlOptions::postgres()
}

#[test]
fn select_with_filter() {
    let out = compile(&select(["id", "name"]).from("users").filter(eq("id", 1)), &pg()).unwrap();
    assert_eq!(out.sql, r#"SELECT "id","name" FROM "users" WHERE "id" = $1"#);
    assert_eq!(out.args, vec![Value::Int(1)]);
}

#[test]
fn select_order_and_limit() {
    let q = select_from("users")
        .order_by([desc("id"), asc_nulls_last("age")])
        .limit(10);
    let out = compile(&q, &pg()).unwrap();
    assert_eq!(
        out.sql,
        r#"SELECT * FROM "users" ORDER BY "id" DESC,"age" ASC NULLS LAST LIMIT $1"#
    );
    assert_eq!(out.args, vec![Value::Int(10)]);
}

#[test]
fn insert_many_on_conflict() {
    let q = insert_many("u")
        .columns(["a", "b"])
        .values((1, 2))
        .values((3, 4))
        .on_conflict(["a"], do_nothing())
        .returning(["a"]);
    let out = compile(&q, &pg()).unwrap();
    assert_eq!(
        out.sql,
        r#"INSERT INTO "u" ("a","b") VALUES ($1,$2),($3,$4) ON CONFLICT ("a") DO NOTHING RETURNING "a""#
    );
    assert_eq!(
        out.args,
        vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)]
    );
}

#[test]
fn delete_not_null() {
    let out = compile(&delete("users").filter(ne("deleted_at", Value::Null)), &pg()).unwrap();
    assert_eq!(out.sql, r#"DELETE FROM "users" WHERE "deleted_at" IS NOT NULL"#);
    assert!(out.args.is_empty());
}

#[test]
fn unsafe_column_is_refused() {
    let err = compile(&col("unsafe+name"), &pg()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "target \"unsafe+name\" contains illegal character '+'"
    );
    assert!(matches!(err, BuildError::IllegalCharacter { ch: '+', .. }));
}

#[test]
fn prepared_cache_compiles_once() {
    let cache = ReturnableCache::new(select_from("u").filter(eq("id", arg("id"))));
    assert_eq!(cache.compile_count(), 0);

    let first = cache.bind(&pg(), &Args::from([("id", "A")])).unwrap();
    let second = cache.bind(&pg(), &Args::from([("id", "B")])).unwrap();

    assert_eq!(first.sql, r#"SELECT * FROM "u" WHERE "id" = $1"#);
    assert_eq!(first.sql, second.sql);
    assert_eq!(first.args, vec![Value::Text("A".into())]);
    assert_eq!(second.args, vec![Value::Text("B".into())]);
    assert_eq!(cache.compile_count(), 1);
}

#[test]
fn paginate_request_wraps_inner_query() {
    let req = PaginateRequest::from_json(
        r#"{"limit":10,"filters":{"$or":[{"age":25},{"age":{"$eq":26}}]},"orders":[{"key":"id","desc":true}]}"#,
    )
    .unwrap();
    let statements = Paginator::new(["id", "age", "name"])
        .build(select(["id", "age", "name"]).from("u"), &req)
        .unwrap();

    let out = compile(&statements.page, &pg()).unwrap();
    assert_eq!(
        out.sql,
        r#"SELECT * FROM (SELECT "id","age","name" FROM "u") AS "result" WHERE ("age" = $1 OR "age" = $2) ORDER BY "id" DESC LIMIT $3"#
    );
    assert_eq!(out.args, vec![Value::Int(25), Value::Int(26), Value::Int(10)]);
}

#[test]
fn sqlite_dialect_casts_and_aliases() {
    use opsql::expr::{alias, cast, count};

    let q = select([alias(count("*"), "n")])
        .from("users")
        .filter(eq("id", cast("7", "INTEGER")));
    let out = compile(&q, &SqlOptions::sqlite()).unwrap();
    assert_eq!(
        out.sql,
        r#"SELECT (COUNT(*)) AS n FROM "users" WHERE "id" = CAST($1 AS INTEGER)"#
    );
}
