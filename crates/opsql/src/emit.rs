//! Emitted fragments and placeholder renumbering.
//!
//! Nodes emit SQL with the universal `?` marker. [`compile`] drives emission on a root node
//! and rewrites each marker into the dialect placeholder (`$1`, `$2`, ...). A `?` directly
//! followed by one of `? # | > &` is an operator, not a marker, and is copied unchanged
//! together with the byte after it.

use crate::error::BuildError;
use crate::options::SqlOptions;
use crate::value::Value;

/// SQL text plus the arguments its markers refer to, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub sql: String,
    pub args: Vec<Value>,
}

impl Fragment {
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }

    /// Fragment without arguments.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    pub(crate) fn push_str(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    pub(crate) fn push(&mut self, other: Fragment) {
        self.sql.push_str(&other.sql);
        self.args.extend(other.args);
    }

    /// Join non-empty fragments with `delim`.
    pub(crate) fn join(parts: impl IntoIterator<Item = Fragment>, delim: &str) -> Fragment {
        let mut out = Fragment::default();
        for part in parts {
            if part.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push_str(delim);
            }
            out.push(part);
        }
        out
    }
}

/// Anything that renders itself into a [`Fragment`].
pub trait Emit {
    fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError>;
}

/// Emit `node` and renumber its markers into dialect placeholders.
pub fn compile<E: Emit + ?Sized>(node: &E, opts: &SqlOptions) -> Result<Fragment, BuildError> {
    let Fragment { sql, args } = node.emit(opts)?;
    Ok(Fragment::new(renumber(&sql, opts), args))
}

/// Replace each `?` marker with `placeholder_format(n)`, `n` counting from 1.
pub fn renumber(sql: &str, opts: &SqlOptions) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'?' {
            i += 1;
            continue;
        }
        if matches!(bytes.get(i + 1), Some(b'?' | b'#' | b'|' | b'>' | b'&')) {
            i += 2;
            continue;
        }
        out.push_str(&sql[copied..i]);
        n += 1;
        out.push_str(&(opts.placeholder_format)(n));
        i += 1;
        copied = i;
    }
    out.push_str(&sql[copied..]);
    out
}

/// Number of `?` markers in `sql`, escapes excluded.
pub fn count_markers(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut n = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'?' {
            if matches!(bytes.get(i + 1), Some(b'?' | b'#' | b'|' | b'>' | b'&')) {
                i += 2;
                continue;
            }
            n += 1;
        }
        i += 1;
    }
    n
}
