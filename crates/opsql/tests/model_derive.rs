//! `#[derive(Model)]` against hand-checked model descriptions.

use opsql::model::describe;
use opsql::{Model, Value};

#[derive(Debug, Default, Clone, PartialEq, Model)]
struct Role {
    #[op("id,primary")]
    id: i64,
    #[op("title")]
    title: String,
}

#[derive(Debug, Default, Clone, PartialEq, Model)]
struct Author {
    #[op("id,primary")]
    id: i64,
    #[op("name")]
    name: String,
    #[op("email")]
    email: Option<String>,
    #[op("book_count,aggregated")]
    book_count: i64,
    #[op("roles,nested")]
    role: Option<Role>,
    #[op("teams, nested")]
    team: Team,
    scratch: Vec<u8>,
}

#[derive(Debug, Default, Clone, PartialEq, Model)]
struct Team {
    #[op("id,primary")]
    id: i64,
    #[op("label")]
    label: Option<String>,
}

#[test]
fn fields_follow_declaration_order() {
    let tags: Vec<&str> = Author::fields().iter().map(|f| f.tag).collect();
    assert_eq!(tags, ["id", "name", "email", "book_count", "roles", "teams"]);
    assert!(Author::fields()[0].primary);
    assert!(Author::fields()[3].aggregated);
    assert!(Author::fields()[4].nested.is_some());
    assert_eq!(Author::type_name(), "Author");
}

#[test]
fn describe_qualifies_columns() {
    let md = describe::<Author>("authors");

    assert_eq!(md.primary.as_deref(), Some("authors.id"));
    assert_eq!(md.tables, ["authors", "roles", "teams"]);
    assert_eq!(
        md.table_fields("authors"),
        ["authors.id", "authors.name", "authors.email", "book_count"]
    );
    assert_eq!(md.table_fields("teams"), ["teams.id", "teams.label"]);
    assert_eq!(md.mapping["roles"]["title"], "roles.title");
    assert!(md.is_aggregated("authors", "book_count"));
}

#[test]
fn scan_initialises_nested_option() {
    let md = describe::<Author>("authors");
    let paths = md
        .key_paths(&["authors.name", "roles.title", "teams.label", "book_count"])
        .unwrap();

    let mut author = Author::default();
    author.scan_field(&paths[0], Value::Text("ursula".into())).unwrap();
    author.scan_field(&paths[1], Value::Text("editor".into())).unwrap();
    author.scan_field(&paths[2], Value::Null).unwrap();
    author.scan_field(&paths[3], Value::Int(21)).unwrap();

    assert_eq!(author.name, "ursula");
    assert_eq!(author.book_count, 21);
    assert_eq!(
        author.role,
        Some(Role {
            id: 0,
            title: "editor".into()
        })
    );
    assert_eq!(author.team.label, None);
    assert!(author.scratch.is_empty());
}

#[test]
fn field_values_read_back() {
    let author = Author {
        id: 3,
        email: Some("a@b.c".into()),
        ..Author::default()
    };
    assert_eq!(author.field_value(&[0]), Some(Value::Int(3)));
    assert_eq!(author.field_value(&[2]), Some(Value::Text("a@b.c".into())));
    assert_eq!(author.field_value(&[4, 1]), Some(Value::Null));
    assert_eq!(author.field_value(&[5, 0]), Some(Value::Int(0)));
    assert_eq!(author.field_value(&[9]), None);
}

#[test]
fn scan_errors_name_the_column() {
    let mut author = Author::default();
    let err = author.scan_field(&[1], Value::Int(5)).unwrap_err();
    assert!(err.to_string().starts_with("Decode error on column 'name'"), "{err}");

    let err = author.scan_field(&[42], Value::Null).unwrap_err();
    assert!(err.to_string().contains("invalid field path [42]"), "{err}");

    let err = md_missing_key();
    assert_eq!(err, "key \"authors.nope\" is not described in Author");
}

fn md_missing_key() -> String {
    describe::<Author>("authors")
        .key_paths(&["authors.nope"])
        .unwrap_err()
        .to_string()
}
