//! Column paths and aliases.

use super::Expr;
use crate::emit::{Emit, Fragment};
use crate::error::BuildError;
use crate::options::SqlOptions;

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '$')
}

/// Check `input` against `[A-Za-z0-9_\-.$]` (without `.` for aliases).
///
/// Identifiers are refused, never escaped.
pub(crate) fn check_identifier(
    kind: &'static str,
    input: &str,
    allow_dot: bool,
) -> Result<(), BuildError> {
    let illegal = if allow_dot {
        // `table.*` and a bare `*` are the only non-identifier segments accepted.
        input
            .split('.')
            .filter(|segment| *segment != "*")
            .flat_map(str::chars)
            .find(|c| !is_safe_char(*c))
    } else {
        input.chars().find(|c| !is_safe_char(*c))
    };

    match illegal {
        Some(ch) => Err(BuildError::IllegalCharacter {
            kind,
            input: input.to_string(),
            ch,
        }),
        None => Ok(()),
    }
}

/// A dotted column path such as `users.id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    path: String,
}

impl Column {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment, e.g. `id` for `users.id`.
    pub fn name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    pub fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError> {
        if opts.safe_columns {
            check_identifier("target", &self.path, true)?;
        }

        let mut sql = String::with_capacity(self.path.len() + 4);
        for (i, segment) in self.path.split('.').enumerate() {
            if i > 0 {
                sql.push_str(opts.column_part_delim);
            }
            if segment == "*" {
                sql.push('*');
            } else {
                opts.push_wrapped_column(&mut sql, segment);
            }
        }
        Ok(Fragment::raw(sql))
    }
}

/// A named projection: either a column under its own name (pure) or `(expr) AS name`.
#[derive(Debug, Clone)]
pub struct Alias {
    expr: Expr,
    name: String,
    pure: bool,
}

impl Alias {
    /// A column shown under its own name.
    pub fn pure(column: impl Into<String>) -> Self {
        let name = column.into();
        Self {
            expr: Expr::Column(Column::new(name.clone())),
            name,
            pure: true,
        }
    }

    /// `(expr) AS name`.
    pub fn new(expr: impl Into<Expr>, name: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            name: name.into(),
            pure: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_pure(&self) -> bool {
        self.pure
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Rename the alias. A pure alias also points its column at the new name.
    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
        if self.pure {
            self.expr = Expr::Column(Column::new(self.name.clone()));
        }
    }

    pub fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError> {
        if self.pure || self.name.is_empty() {
            return self.expr.emit(opts);
        }
        if opts.safe_columns {
            check_identifier("alias", &self.name, false)?;
        }

        let inner = self.expr.emit(opts)?;
        Ok(Fragment::new(
            format!("({}) AS {}", inner.sql, opts.wrap_alias(&self.name)),
            inner.args,
        ))
    }
}

impl Emit for Column {
    fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError> {
        Column::emit(self, opts)
    }
}

impl Emit for Alias {
    fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError> {
        Alias::emit(self, opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn pg() -> SqlOptions {
        SqlOptions::postgres()
    }

    #[test]
    fn test_column_wraps_each_segment() {
        assert_eq!(Column::new("id").emit(&pg()).unwrap().sql, "\"id\"");
        assert_eq!(
            Column::new("users.id").emit(&pg()).unwrap().sql,
            "\"users\".\"id\""
        );
        assert_eq!(Column::new("users.*").emit(&pg()).unwrap().sql, "\"users\".*");
        assert_eq!(Column::new("*").emit(&pg()).unwrap().sql, "*");
    }

    #[test]
    fn test_column_rejects_illegal_character() {
        let err = Column::new("unsafe+name").emit(&pg()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "target \"unsafe+name\" contains illegal character '+'"
        );

        let err = Column::new("a; DROP").emit(&pg()).unwrap_err();
        assert_eq!(err.to_string(), "target \"a; DROP\" contains illegal character ';'");
    }

    #[test]
    fn test_column_reports_whole_non_ascii_character() {
        let err = Column::new("users.naïve").emit(&pg()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "target \"users.naïve\" contains illegal character 'ï'"
        );

        let err = Column::new("名前").emit(&pg()).unwrap_err();
        assert!(matches!(err, BuildError::IllegalCharacter { ch: '名', .. }));
    }

    #[test]
    fn test_unsafe_columns_skip_check() {
        let opts = pg().unsafe_columns();
        assert_eq!(Column::new("a+b").emit(&opts).unwrap().sql, "\"a+b\"");
    }

    #[test]
    fn test_alias_emit() {
        let alias = Alias::new(Expr::Value(Value::Int(1)), "one");
        let out = alias.emit(&pg()).unwrap();
        assert_eq!(out.sql, "(?) AS \"one\"");
        assert_eq!(out.args, vec![Value::Int(1)]);

        let out = alias.emit(&SqlOptions::sqlite()).unwrap();
        assert_eq!(out.sql, "(?) AS one");
    }

    #[test]
    fn test_alias_rejects_dot() {
        let alias = Alias::new(Column::new("users.id"), "users.id");
        let err = alias.emit(&pg()).unwrap_err();
        assert_eq!(err.to_string(), "alias \"users.id\" contains illegal character '.'");
    }

    #[test]
    fn test_pure_alias_rename() {
        let mut alias = Alias::pure("id");
        alias.rename("users.id");
        assert_eq!(alias.name(), "users.id");
        assert_eq!(alias.emit(&pg()).unwrap().sql, "\"users\".\"id\"");

        let mut computed = Alias::new(Column::new("x"), "total");
        computed.rename("count");
        assert_eq!(computed.emit(&pg()).unwrap().sql, "(\"x\") AS \"count\"");
    }
}
