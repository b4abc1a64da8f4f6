//! Dialect options consumed by every emitter.

/// Rendering rules for one SQL dialect.
///
/// Nodes never hard-code quoting, casts or placeholders; they read them from here.
#[derive(Debug, Clone, Copy)]
pub struct SqlOptions {
    /// Quote pair wrapped around each column path segment.
    pub wrap_column: Option<(char, char)>,
    /// Quote pair wrapped around alias names.
    pub wrap_alias: Option<(char, char)>,
    pub column_part_delim: &'static str,
    pub fields_delim: &'static str,
    /// Reject identifiers outside `[A-Za-z0-9_\-.$]` instead of emitting them.
    pub safe_columns: bool,
    /// `(value, type) -> sql`; `None` makes casts fail to emit.
    pub cast_format: Option<fn(&str, &str) -> String>,
    /// Placeholder for the 1-based argument `n`.
    pub placeholder_format: fn(usize) -> String,
}

fn dollar_placeholder(n: usize) -> String {
    format!("${n}")
}

fn postgres_cast(value: &str, ty: &str) -> String {
    format!("{value}::{ty}")
}

fn standard_cast(value: &str, ty: &str) -> String {
    format!("CAST({value} AS {ty})")
}

impl SqlOptions {
    /// PostgreSQL: ANSI quotes, `v::T` casts, `$n` placeholders.
    pub const fn postgres() -> Self {
        Self {
            wrap_column: Some(('"', '"')),
            wrap_alias: Some(('"', '"')),
            column_part_delim: ".",
            fields_delim: ",",
            safe_columns: true,
            cast_format: Some(postgres_cast),
            placeholder_format: dollar_placeholder,
        }
    }

    /// SQLite: quoted columns, bare aliases, `CAST(v AS T)`.
    pub const fn sqlite() -> Self {
        Self {
            wrap_column: Some(('"', '"')),
            wrap_alias: None,
            column_part_delim: ".",
            fields_delim: ",",
            safe_columns: true,
            cast_format: Some(standard_cast),
            placeholder_format: dollar_placeholder,
        }
    }

    pub const fn without_cast(mut self) -> Self {
        self.cast_format = None;
        self
    }

    /// Disable identifier checking. Only for identifiers that never come from user input.
    pub const fn unsafe_columns(mut self) -> Self {
        self.safe_columns = false;
        self
    }

    pub const fn with_placeholder(mut self, format: fn(usize) -> String) -> Self {
        self.placeholder_format = format;
        self
    }

    pub const fn with_wrap_alias(mut self, wrap: Option<(char, char)>) -> Self {
        self.wrap_alias = wrap;
        self
    }

    pub(crate) fn push_wrapped_column(&self, out: &mut String, segment: &str) {
        match self.wrap_column {
            Some((open, close)) => {
                out.push(open);
                out.push_str(segment);
                out.push(close);
            }
            None => out.push_str(segment),
        }
    }

    pub(crate) fn wrap_alias(&self, name: &str) -> String {
        match self.wrap_alias {
            Some((open, close)) => format!("{open}{name}{close}"),
            None => name.to_string(),
        }
    }
}

impl Default for SqlOptions {
    fn default() -> Self {
        Self::postgres()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let pg = SqlOptions::postgres();
        assert_eq!((pg.placeholder_format)(3), "$3");
        assert_eq!((pg.cast_format.unwrap())("$1", "int"), "$1::int");

        let lite = SqlOptions::sqlite();
        assert_eq!((lite.cast_format.unwrap())("$1", "int"), "CAST($1 AS int)");
        assert_eq!(lite.wrap_alias("total"), "total");
        assert_eq!(pg.wrap_alias("total"), "\"total\"");
    }

    #[test]
    fn test_without_cast() {
        assert!(SqlOptions::postgres().without_cast().cast_format.is_none());
    }
}
