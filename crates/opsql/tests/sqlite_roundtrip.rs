//! Binder, upsert and paginator against an in-memory SQLite database.

#![cfg(all(feature = "sqlite", feature = "derive"))]

use opsql::expr::{Expr, alias, arg, col, count, eq, gte};
use opsql::stmt::{asc, delete, desc, select, select_from, update};
use opsql::{
    Args, Connection, Db, DbConfig, Executor, Model, OrmError, PaginateRequest, Paginator,
    ReturnableCache, SqliteDb, put, query,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default, Clone, PartialEq, Model)]
struct Role {
    #[op("id,primary")]
    id: i64,
    #[op("title")]
    title: String,
}

#[derive(Debug, Default, Clone, PartialEq, Model)]
struct User {
    #[op("id,primary")]
    id: i64,
    #[op("name")]
    name: String,
    #[op("age")]
    age: i64,
    #[op("email")]
    email: Option<String>,
    #[op("role_id")]
    role_id: Option<i64>,
    #[op("roles,nested")]
    role: Option<Role>,
}

#[derive(Debug, Default, Clone, PartialEq, Model)]
struct Tag {
    #[op("id,primary")]
    id: i64,
}

#[derive(Debug, Default, serde::Serialize, Model)]
struct AgeGroup {
    #[op("age")]
    age: i64,
    #[op("members,aggregated")]
    members: i64,
}

const SCHEMA: &str = "
    CREATE TABLE roles (id INTEGER PRIMARY KEY, title TEXT NOT NULL);
    CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        age INTEGER NOT NULL,
        email TEXT,
        role_id INTEGER REFERENCES roles(id)
    );
    CREATE TABLE tags (id INTEGER PRIMARY KEY);
";

async fn db() -> SqliteDb {
    let db = SqliteDb::open_in_memory().unwrap();
    db.execute_batch(SCHEMA).await.unwrap();
    db
}

fn user(name: &str, age: i64) -> User {
    User {
        name: name.to_string(),
        age,
        ..User::default()
    }
}

async fn seed(db: &SqliteDb) -> Vec<User> {
    let mut admin = Role {
        title: "admin".into(),
        ..Role::default()
    };
    put("roles", &mut admin).with(db).await.unwrap();

    let mut users = Vec::new();
    for (name, age) in [("ann", 25), ("bob", 26), ("cid", 40), ("dee", 25)] {
        let mut u = user(name, age);
        u.role_id = Some(admin.id);
        put("users", &mut u).with(db).await.unwrap();
        users.push(u);
    }
    users
}

#[tokio::test]
async fn put_inserts_then_updates() {
    let db = db().await;

    let mut ann = user("ann", 25);
    put("users", &mut ann).with(&db).await.unwrap();
    assert_eq!(ann.id, 1);

    ann.email = Some("ann@example.com".into());
    ann.age = 26;
    put("users", &mut ann).with(&db).await.unwrap();
    assert_eq!(ann.id, 1);

    let stored: User = query(select_from("users").filter(eq("id", 1)))
        .get_one(&db)
        .await
        .unwrap();
    assert_eq!(stored, ann);

    let count = db
        .query_row("SELECT COUNT(*) FROM users", &[])
        .await
        .unwrap()
        .try_get::<i64>(0)
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn put_existing_row_with_only_a_primary() {
    let db = db().await;

    let mut tag = Tag { id: 5 };
    put("tags", &mut tag).with(&db).await.unwrap();
    put("tags", &mut tag).with(&db).await.unwrap();
    assert_eq!(tag, Tag { id: 5 });

    let count = db
        .query_row("SELECT COUNT(*) FROM tags", &[])
        .await
        .unwrap()
        .try_get::<i64>(0)
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn put_keeps_nested_fields() {
    let db = db().await;
    let mut u = user("eve", 31);
    u.role = Some(Role {
        id: 9,
        title: "kept".into(),
    });
    put("users", &mut u).with(&db).await.unwrap();
    assert_eq!(u.role.as_ref().map(|r| r.title.as_str()), Some("kept"));
}

#[tokio::test]
async fn get_many_with_join_fills_nested() {
    let db = db().await;
    seed(&db).await;

    let users: Vec<User> = query(
        select_from("users")
            .join("roles", eq(col("roles.id"), col("users.role_id")))
            .order_by([desc("users.id")]),
    )
    .get_many(&db)
    .await
    .unwrap();

    assert_eq!(users.len(), 4);
    assert_eq!(users[0].name, "dee");
    assert_eq!(
        users[0].role,
        Some(Role {
            id: 1,
            title: "admin".into()
        })
    );
}

#[tokio::test]
async fn short_names_and_aggregates() {
    let db = db().await;
    seed(&db).await;

    let names: Vec<User> = query(
        select(["name", "title"])
            .from("users")
            .join("roles", eq(col("roles.id"), col("users.role_id")))
            .order_by([asc("users.id")]),
    )
    .get_many(&db)
    .await
    .unwrap();
    assert_eq!(names[0].name, "ann");
    assert_eq!(names[0].id, 0);
    assert_eq!(names[0].role.as_ref().map(|r| r.title.as_str()), Some("admin"));

    let groups: Vec<AgeGroup> = query(
        select([
            col("age"),
            Expr::from(alias(count("*"), "members")),
        ])
        .from("users")
        .group_by(["age"])
        .order_by([asc("age")]),
    )
    .get_many(&db)
    .await
    .unwrap();
    assert_eq!(groups.len(), 3);
    assert_eq!((groups[0].age, groups[0].members), (25, 2));
}

#[tokio::test]
async fn get_one_not_found_and_unknown_target() {
    let db = db().await;

    let err = query(select_from("users").filter(eq("id", 404)))
        .get_one::<User>(&db)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = query(select(["nickname"]).from("users"))
        .get_one::<User>(&db)
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::TargetNotDescribed { .. }));
}

#[tokio::test]
async fn prepared_statement_is_reused() {
    let db = db().await;
    seed(&db).await;

    let by_age = Arc::new(ReturnableCache::new(
        select_from("users").filter(eq("age", arg("age"))),
    ));

    let young: Vec<User> = query(Arc::clone(&by_age))
        .args(Args::new().set("age", 25))
        .get_many(&db)
        .await
        .unwrap();
    let old: Vec<User> = query(Arc::clone(&by_age))
        .args(Args::new().set("age", 40))
        .get_many(&db)
        .await
        .unwrap();

    assert_eq!(young.len(), 2);
    assert_eq!(old.len(), 1);
    assert_eq!(old[0].name, "cid");
    assert_eq!(by_age.compile_count(), 1);

    let err = query(Arc::clone(&by_age))
        .get_many::<User>(&db)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "incorrect argument count");
}

#[tokio::test]
async fn exec_update_and_delete() {
    let db = db().await;
    seed(&db).await;

    let res = query(update("users").set("age", 30).filter(eq("name", "bob")))
        .exec(&db)
        .await
        .unwrap();
    assert_eq!(res.rows_affected(), 1);

    let res = query(delete("users").filter(gte("age", 30))).exec(&db).await.unwrap();
    assert_eq!(res.rows_affected(), 2);
}

#[tokio::test]
async fn paginate_filters_orders_and_counts() {
    let db = db().await;
    seed(&db).await;

    let paginator = Paginator::new(["id", "name", "age"]);
    let req = PaginateRequest::from_json(
        r#"{"limit": 2, "offset": 1, "filters": {"age": {"$lte": 26}}, "orders": [{"key": "id", "desc": true}]}"#,
    )
    .unwrap();

    let page = paginator
        .paginate::<User>(select(["id", "name", "age"]).from("users"), &req, &db)
        .await
        .unwrap();

    assert_eq!(page.total_rows, 3);
    let names: Vec<&str> = page.rows.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, ["bob", "ann"]);

    let groups = paginator
        .paginate::<AgeGroup>(
            select([
                col("age"),
                Expr::from(alias(count("*"), "members")),
            ])
            .from("users")
            .group_by(["age"]),
            &PaginateRequest::from_json(r#"{"orders": [{"key": "age"}]}"#).unwrap(),
            &db,
        )
        .await
        .unwrap();
    assert_eq!(groups.total_rows, 3);
    assert_eq!(serde_json::to_value(&groups).unwrap()["rows"][0]["members"], 2);
}

#[tokio::test]
async fn transact_rolls_back_on_error() {
    let db = db().await;

    let err = db
        .transact(|tx| async move {
            let mut u = user("tmp", 50);
            put("users", &mut u).with(&tx).await?;
            assert_eq!(u.id, 1);
            Err::<(), _>(OrmError::Other("abort".into()))
        })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "abort");

    let kept = db
        .transact(|tx| async move {
            let mut u = user("kept", 20);
            put("users", &mut u).with(&tx).await?;
            // the open transaction is reused
            tx.transact(|inner| async move {
                query(select_from("users")).get_many::<User>(&inner).await
            })
            .await
        })
        .await
        .unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].name, "kept");
}

async fn user_names(conn: &impl Executor) -> Vec<String> {
    query(select(["name"]).from("users").order_by([asc("id")]))
        .get_many::<User>(conn)
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.name)
        .collect()
}

#[tokio::test]
async fn cancelled_transact_keeps_later_writes() {
    let db = db().await;

    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        db.transact(|tx| async move {
            let mut u = user("lost", 1);
            put("users", &mut u).with(&tx).await?;
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        }),
    )
    .await;
    assert!(cancelled.is_err());

    let mut after = user("after", 2);
    put("users", &mut after).with(&db).await.unwrap();

    let err = db
        .transact(|tx| async move {
            let mut u = user("aborted", 3);
            put("users", &mut u).with(&tx).await?;
            Err::<(), _>(OrmError::Other("abort".into()))
        })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "abort");

    assert_eq!(user_names(&db).await, ["after"]);
}

#[tokio::test]
async fn db_handle_inside_transact_joins_it() {
    let db = Db::Sqlite(db().await);
    let handle = db.clone();

    let err = tokio::time::timeout(
        Duration::from_secs(2),
        db.transact(|_tx| async move {
            let mut u = user("inner", 30);
            put("users", &mut u).with(&handle).await?;
            assert_eq!(user_names(&handle).await, ["inner"]);

            handle
                .transact(|tx| async move {
                    let mut u = user("nested", 31);
                    put("users", &mut u).with(&tx).await
                })
                .await?;
            assert_eq!(user_names(&handle).await, ["inner", "nested"]);
            Err::<(), _>(OrmError::Other("abort".into()))
        }),
    )
    .await
    .expect("statements through the db handle must not wait on their own transaction")
    .unwrap_err();
    assert_eq!(err.to_string(), "abort");

    assert!(user_names(&db).await.is_empty());
}

#[tokio::test]
async fn db_facade_from_config() {
    let db = Db::connect(&DbConfig::new("sqlite::memory:")).unwrap();
    db.exec(SCHEMA.trim().split(';').next().unwrap(), &[]).await.unwrap();

    let mut role = Role {
        title: "ops".into(),
        ..Role::default()
    };
    put("roles", &mut role).with(&db).await.unwrap();
    assert_eq!(role.id, 1);
    db.close().await;
}
