//! Prepared-argument cache.
//!
//! A statement built with [`arg`](crate::expr::arg) slots is compiled once by
//! [`ReturnableCache`]; later calls only substitute the named arguments.
//!
//! ```ignore
//! use opsql::expr::{arg, eq};
//! use opsql::prepared::{Args, ReturnableCache};
//! use opsql::stmt::select;
//!
//! let cache = ReturnableCache::new(select(["id"]).from("users").filter(eq("name", arg("name"))));
//! let first = cache.bind(&opts, &Args::new().set("name", "A"))?;
//! let second = cache.bind(&opts, &Args::new().set("name", "B"))?;
//! ```

use crate::emit::{Emit, Fragment, compile};
use crate::error::BuildError;
use crate::expr::Alias;
use crate::options::SqlOptions;
use crate::stmt::{CounterKind, Returnable};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Named argument values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    values: HashMap<String, Value>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Args {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Args {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Compiled SQL plus the argument positions of each named slot.
#[derive(Debug, Clone)]
struct Template {
    fragment: Fragment,
    slots: HashMap<String, Vec<usize>>,
}

impl Template {
    fn new(fragment: Fragment) -> Self {
        let mut slots: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, value) in fragment.args.iter().enumerate() {
            if let Value::ArgRef(name) = value {
                slots.entry(name.clone()).or_default().push(i);
            }
        }
        Self { fragment, slots }
    }

    fn bind(&self, args: &Args) -> Result<Fragment, BuildError> {
        if args.len() != self.slots.len() {
            return Err(BuildError::ArgCount);
        }

        let mut out = self.fragment.clone();
        for (name, value) in args.iter() {
            let positions = self
                .slots
                .get(name)
                .ok_or_else(|| BuildError::UnknownArg(name.to_string()))?;
            for &i in positions {
                out.args[i] = value.clone();
            }
        }
        Ok(out)
    }
}

/// Substitute named slots in an already compiled fragment.
pub fn bind_refs(fragment: Fragment, args: &Args) -> Result<Fragment, BuildError> {
    let template = Template::new(fragment);
    if template.slots.is_empty() && args.is_empty() {
        return Ok(template.fragment);
    }
    template.bind(args)
}

/// Compile-once wrapper around a [`Returnable`] builder.
///
/// The first [`bind`](Self::bind) compiles the builder; a compile error is kept and
/// returned by every later call. `set_returning` and `limit_returning_one` apply once.
pub struct ReturnableCache<B> {
    builder: Mutex<B>,
    returning_set: OnceLock<()>,
    limited: OnceLock<()>,
    template: OnceLock<Result<Template, BuildError>>,
    compiles: AtomicUsize,
}

impl<B: Returnable> ReturnableCache<B> {
    pub fn new(builder: B) -> Self {
        Self {
            builder: Mutex::new(builder),
            returning_set: OnceLock::new(),
            limited: OnceLock::new(),
            template: OnceLock::new(),
            compiles: AtomicUsize::new(0),
        }
    }

    fn builder(&self) -> MutexGuard<'_, B> {
        self.builder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn template(&self, opts: &SqlOptions) -> Result<&Template, BuildError> {
        self.template
            .get_or_init(|| {
                self.compiles.fetch_add(1, Ordering::Relaxed);
                let compiled = compile(&*self.builder(), opts).map(Template::new);
                if let Ok(template) = &compiled {
                    tracing::trace!(
                        target: "opsql.prepared",
                        sql = %template.fragment.sql,
                        slots = template.slots.len(),
                        "compiled prepared statement"
                    );
                }
                compiled
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Compile on first use, then substitute `args` into a copy of the template.
    pub fn bind(&self, opts: &SqlOptions, args: &Args) -> Result<Fragment, BuildError> {
        self.template(opts)?.bind(args)
    }

    /// How many times the builder was compiled: 0 before first use, 1 after.
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::Relaxed)
    }

    /// Names of the argument slots, once compiled.
    pub fn arg_names(&self, opts: &SqlOptions) -> Result<Vec<String>, BuildError> {
        let mut names: Vec<String> = self.template(opts)?.slots.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub fn latch_returning(&self, aliases: Vec<Alias>) {
        self.returning_set
            .get_or_init(|| self.builder().set_returning(aliases));
    }

    pub fn latch_limit_one(&self) {
        self.limited.get_or_init(|| self.builder().limit_returning_one());
    }
}

impl<B: Returnable> Emit for ReturnableCache<B> {
    fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError> {
        self.builder().emit(opts)
    }
}

impl<B: Returnable> Returnable for ReturnableCache<B> {
    fn using_tables(&self) -> Vec<String> {
        self.builder().using_tables()
    }

    fn primary_with(&self) -> String {
        self.builder().primary_with()
    }

    fn get_returning(&self) -> Vec<Alias> {
        self.builder().get_returning()
    }

    fn set_returning(&mut self, aliases: Vec<Alias>) {
        self.latch_returning(aliases);
    }

    fn limit_returning_one(&mut self) {
        self.latch_limit_one();
    }

    fn counter_kind(&self) -> CounterKind {
        self.builder().counter_kind()
    }

    fn prepared_emit(&self, opts: &SqlOptions, args: &Args) -> Result<Fragment, BuildError> {
        self.bind(opts, args)
    }
}

impl<B: Returnable> Emit for Arc<ReturnableCache<B>> {
    fn emit(&self, opts: &SqlOptions) -> Result<Fragment, BuildError> {
        self.as_ref().emit(opts)
    }
}

/// Shared caches hand out `Arc` clones; setters go through the latches.
impl<B: Returnable> Returnable for Arc<ReturnableCache<B>> {
    fn using_tables(&self) -> Vec<String> {
        self.as_ref().using_tables()
    }

    fn primary_with(&self) -> String {
        self.as_ref().primary_with()
    }

    fn get_returning(&self) -> Vec<Alias> {
        self.as_ref().get_returning()
    }

    fn set_returning(&mut self, aliases: Vec<Alias>) {
        self.latch_returning(aliases);
    }

    fn limit_returning_one(&mut self) {
        self.latch_limit_one();
    }

    fn counter_kind(&self) -> CounterKind {
        self.as_ref().counter_kind()
    }

    fn prepared_emit(&self, opts: &SqlOptions, args: &Args) -> Result<Fragment, BuildError> {
        self.bind(opts, args)
    }
}
