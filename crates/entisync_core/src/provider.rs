//! Provider trait and the method table providers declare into.
//!
//! A provider announces, once at registration, the named methods it
//! implements. The dispatcher later locates methods by conventional name
//! (`get_user`, `get_users`, `create_user`, ...) instead of reflecting on
//! the provider on every call.

use crate::context::ProviderContext;
use crate::error::ProviderResult;
use crate::naming::snake_case;
use crate::value::{Record, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// The subject of a single-entity operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A backend id (reads and deletes).
    Id(Value),
    /// An entity-shaped record (creates, updates, deletes).
    Record(Record),
}

impl Target {
    /// Returns the id, either directly or from the record's `id_key` field.
    pub fn id(&self, id_key: &str) -> Option<&Value> {
        match self {
            Target::Id(id) => Some(id),
            Target::Record(record) => record.get(id_key),
        }
    }
}

/// Signature of a single-entity method.
pub type SingleFn =
    dyn Fn(&ProviderContext, Target) -> ProviderResult<Option<Record>> + Send + Sync;

/// Signature of a list method. Reads receive an empty input list.
pub type ListFn = dyn Fn(&ProviderContext, Vec<Record>) -> ProviderResult<Vec<Record>> + Send + Sync;

/// A callable provider method.
#[derive(Clone)]
pub enum MethodKind {
    /// Operates on one entity.
    Single(Arc<SingleFn>),
    /// Operates on a list of entities.
    List(Arc<ListFn>),
}

/// A declared provider method plus the filter keys it claims statically.
#[derive(Clone)]
pub struct Method {
    kind: MethodKind,
    claims: Option<BTreeSet<String>>,
}

impl Method {
    /// Wraps a single-entity closure.
    pub fn single<F>(f: F) -> Self
    where
        F: Fn(&ProviderContext, Target) -> ProviderResult<Option<Record>> + Send + Sync + 'static,
    {
        Self {
            kind: MethodKind::Single(Arc::new(f)),
            claims: None,
        }
    }

    /// Wraps a list closure.
    pub fn list<F>(f: F) -> Self
    where
        F: Fn(&ProviderContext, Vec<Record>) -> ProviderResult<Vec<Record>> + Send + Sync + 'static,
    {
        Self {
            kind: MethodKind::List(Arc::new(f)),
            claims: None,
        }
    }

    /// Declares the complete set of filter keys this method consumes.
    ///
    /// Lets the filter enforcer reject unsupported filters before the
    /// provider is called.
    #[must_use]
    pub fn claims<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.claims = Some(keys.into_iter().map(|k| snake_case(k.as_ref())).collect());
        self
    }

    /// The callable.
    pub fn kind(&self) -> &MethodKind {
        &self.kind
    }

    /// Statically declared filter keys, if any.
    pub fn static_claims(&self) -> Option<&BTreeSet<String>> {
        self.claims.as_ref()
    }

    /// Returns true for list methods.
    pub fn is_list(&self) -> bool {
        matches!(self.kind, MethodKind::List(_))
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("list", &self.is_list())
            .field("claims", &self.claims)
            .finish()
    }
}

/// Named methods declared by one provider.
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, Method>,
}

impl MethodTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a method. Names are normalized to snake_case.
    pub fn declare(&mut self, name: impl AsRef<str>, method: Method) -> &mut Self {
        self.methods.insert(snake_case(name.as_ref()), method);
        self
    }

    /// Looks up a method by (already snake_case) name.
    pub fn get(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    /// Number of declared methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Returns true if nothing was declared.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Declared method names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// A backend that can perform sync operations for one or more entity types.
pub trait Provider: Send + Sync + 'static {
    /// Stable provider name; also the provider's identity in caches.
    fn name(&self) -> &str;

    /// Declares the methods this provider implements.
    ///
    /// Called once, when the provider is registered with a
    /// [`Container`](crate::Container).
    fn declare_methods(self: Arc<Self>, methods: &mut MethodTable);
}
