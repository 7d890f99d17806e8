//! Operation dispatcher.
//!
//! Maps (provider, entity type, operation) to a callable provider method.
//! Method names follow the convention `<verb>_<entity>`: `get_user`,
//! `get_users`, `create_user`, `delete_users`, and so on, with the plural
//! form for list operations. Lookups are cached, misses included.

use crate::error::{EngineError, EngineResult};
use entisync_core::{
    snake_case, CoreError, EntityType, Method, MethodKind, ProviderContext, Record,
    RegisteredProvider, SyncOperation, Target,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type CacheKey = (String, String, SyncOperation);

#[derive(Clone)]
enum Resolution {
    Declared(Method),
    ReadFromList(Method),
    NotImplemented,
}

/// Conventional provider method name for an operation.
pub fn method_name(entity_type: &EntityType, operation: SyncOperation) -> String {
    let noun = if operation.is_list() {
        entity_type.plural_name()
    } else {
        entity_type.name()
    };
    format!("{}_{}", operation.verb(), snake_case(noun))
}

/// A provider operation ready to be called.
#[derive(Clone)]
pub struct Operation {
    provider: String,
    entity_type: Arc<EntityType>,
    operation: SyncOperation,
    method: Method,
    synthesized: bool,
}

impl Operation {
    /// Name of the provider the method belongs to.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Entity type metadata.
    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    /// The operation kind.
    pub fn operation(&self) -> SyncOperation {
        self.operation
    }

    /// True when `READ` is served by scanning `READ_LIST`.
    pub fn is_synthesized(&self) -> bool {
        self.synthesized
    }

    /// Filter keys the method declared it consumes, if it declared any.
    pub fn static_claims(&self) -> Option<&std::collections::BTreeSet<String>> {
        self.method.static_claims()
    }

    /// Returns true if both operations call the same provider closure.
    pub fn same_method(&self, other: &Operation) -> bool {
        match (self.method.kind(), other.method.kind()) {
            (MethodKind::Single(a), MethodKind::Single(b)) => Arc::ptr_eq(a, b),
            (MethodKind::List(a), MethodKind::List(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn not_implemented(&self) -> EngineError {
        EngineError::not_implemented(&self.provider, self.entity_type.name(), self.operation)
    }

    /// Calls a single-entity operation.
    pub fn call_single(&self, ctx: &ProviderContext, target: Target) -> EngineResult<Option<Record>> {
        match (self.method.kind(), self.synthesized) {
            (MethodKind::Single(f), false) => Ok(f(ctx, target)?),
            (MethodKind::List(f), true) => {
                let id = target
                    .id(self.entity_type.id_key())
                    .filter(|id| id.is_identifier())
                    .cloned()
                    .ok_or_else(|| CoreError::invalid_filter_signature("read requires an id"))?;
                let found = f(ctx, Vec::new())?
                    .into_iter()
                    .find(|record| self.entity_type.id_of(record) == Some(&id));
                match found {
                    Some(record) => Ok(Some(record)),
                    None => Err(EngineError::entity_not_found(self.entity_type.name(), id)),
                }
            }
            _ => Err(self.not_implemented()),
        }
    }

    /// Calls a list operation. Reads pass an empty input list.
    pub fn call_list(&self, ctx: &ProviderContext, records: Vec<Record>) -> EngineResult<Vec<Record>> {
        match self.method.kind() {
            MethodKind::List(f) if !self.synthesized => Ok(f(ctx, records)?),
            _ => Err(self.not_implemented()),
        }
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that consulted a method table.
    pub misses: u64,
}

/// Resolves and caches provider operations.
pub struct Dispatcher {
    cache: RwLock<HashMap<CacheKey, Resolution>>,
    synthesize_read: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Dispatcher {
    /// Creates a dispatcher with an empty cache.
    pub fn new(synthesize_read: bool) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            synthesize_read,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Resolves an operation, failing with `OperationNotImplemented` if the
    /// provider has no method for it.
    pub fn resolve(
        &self,
        provider: &RegisteredProvider,
        entity_type: &Arc<EntityType>,
        operation: SyncOperation,
    ) -> EngineResult<Operation> {
        let (method, synthesized) = match self.lookup(provider, entity_type, operation) {
            Resolution::Declared(method) => (method, false),
            Resolution::ReadFromList(method) => (method, true),
            Resolution::NotImplemented => {
                return Err(EngineError::not_implemented(
                    provider.name(),
                    entity_type.name(),
                    operation,
                ))
            }
        };
        Ok(Operation {
            provider: provider.name().to_string(),
            entity_type: Arc::clone(entity_type),
            operation,
            method,
            synthesized,
        })
    }

    /// Returns true if the operation resolves, declared or synthesized.
    pub fn has_operation(
        &self,
        provider: &RegisteredProvider,
        entity_type: &EntityType,
        operation: SyncOperation,
    ) -> bool {
        !matches!(
            self.lookup(provider, entity_type, operation),
            Resolution::NotImplemented
        )
    }

    /// Number of cached resolutions.
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }

    /// Cache counters.
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Drops every cached resolution.
    pub fn clear(&self) {
        self.cache.write().clear();
    }

    fn lookup(
        &self,
        provider: &RegisteredProvider,
        entity_type: &EntityType,
        operation: SyncOperation,
    ) -> Resolution {
        let key = (
            provider.name().to_string(),
            entity_type.name().to_string(),
            operation,
        );
        if let Some(resolution) = self.cache.read().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                provider = provider.name(),
                entity_type = entity_type.name(),
                %operation,
                "dispatch cache hit"
            );
            return resolution.clone();
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let resolution = self.introspect(provider, entity_type, operation);
        tracing::trace!(
            provider = provider.name(),
            entity_type = entity_type.name(),
            %operation,
            implemented = !matches!(resolution, Resolution::NotImplemented),
            "dispatch cache miss"
        );
        // Concurrent misses compute the same resolution; last write wins.
        self.cache.write().insert(key, resolution.clone());
        resolution
    }

    fn introspect(
        &self,
        provider: &RegisteredProvider,
        entity_type: &EntityType,
        operation: SyncOperation,
    ) -> Resolution {
        let methods = provider.methods();
        let name = method_name(entity_type, operation);
        if let Some(method) = methods.get(&name) {
            if method.is_list() == operation.is_list() {
                return Resolution::Declared(method.clone());
            }
            tracing::warn!(
                provider = provider.name(),
                method = %name,
                "declared method has the wrong shape for {operation}"
            );
        }

        if operation == SyncOperation::Read
            && self.synthesize_read
            && entity_type.allows_read_from_list()
        {
            let list = methods
                .get(&method_name(entity_type, SyncOperation::ReadList))
                .filter(|m| m.is_list());
            if let Some(method) = list {
                tracing::debug!(
                    provider = provider.name(),
                    entity_type = entity_type.name(),
                    "synthesizing read from read_list"
                );
                return Resolution::ReadFromList(method.clone());
            }
        }

        Resolution::NotImplemented
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("cached", &self.cached())
            .field("synthesize_read", &self.synthesize_read)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entisync_core::{record, Container, MethodTable, Provider, Value};

    struct Users;

    impl Provider for Users {
        fn name(&self) -> &str {
            "users"
        }

        fn declare_methods(self: Arc<Self>, methods: &mut MethodTable) {
            methods
                .declare(
                    "get_user",
                    Method::single(|_, target| {
                        Ok(target.id("id").map(|id| record! { "id" => id.clone() }))
                    }),
                )
                .declare(
                    "get_users",
                    Method::list(|_, _| {
                        Ok(vec![
                            record! { "id" => 1, "name" => "ada" },
                            record! { "id" => 2, "name" => "grace" },
                        ])
                    }),
                )
                .declare(
                    "get_tags",
                    Method::list(|_, _| Ok(vec![record! { "id" => "rust" }])),
                )
                .declare("delete_users", Method::single(|_, _| Ok(None)));
        }
    }

    fn setup() -> (Container, Dispatcher) {
        let mut container = Container::new();
        container
            .register_entity(EntityType::new("User"))
            .register_entity(EntityType::new("Tag").read_from_list(true))
            .register_entity(EntityType::new("Post"))
            .register_provider(Arc::new(Users));
        (container, Dispatcher::new(true))
    }

    fn op(
        container: &Container,
        dispatcher: &Dispatcher,
        entity: &str,
        operation: SyncOperation,
    ) -> EngineResult<Operation> {
        let provider = container.provider("users").unwrap();
        let meta = container.entity_type(entity).unwrap();
        dispatcher.resolve(provider, &meta, operation)
    }

    fn ctx(container: Container) -> ProviderContext {
        let container = Arc::new(container);
        let provider = Arc::clone(container.provider("users").unwrap().provider());
        ProviderContext::new(provider, container)
    }

    #[test]
    fn method_names_follow_convention() {
        let user = EntityType::new("User");
        assert_eq!(method_name(&user, SyncOperation::Read), "get_user");
        assert_eq!(method_name(&user, SyncOperation::ReadList), "get_users");
        assert_eq!(method_name(&user, SyncOperation::CreateList), "create_users");
        let cat = EntityType::new("BlogCategory");
        assert_eq!(method_name(&cat, SyncOperation::UpdateList), "update_blog_categories");
    }

    #[test]
    fn resolution_is_cached() {
        let (container, dispatcher) = setup();
        let first = op(&container, &dispatcher, "User", SyncOperation::Read).unwrap();
        let second = op(&container, &dispatcher, "User", SyncOperation::Read).unwrap();
        assert!(first.same_method(&second));
        assert_eq!(dispatcher.stats(), DispatchStats { hits: 1, misses: 1 });
    }

    #[test]
    fn negative_results_are_cached() {
        let (container, dispatcher) = setup();
        for _ in 0..3 {
            let err = op(&container, &dispatcher, "Post", SyncOperation::Create)
                .err()
                .unwrap();
            assert!(matches!(
                err,
                EngineError::OperationNotImplemented {
                    operation: SyncOperation::Create,
                    ..
                }
            ));
        }
        assert_eq!(dispatcher.cached(), 1);
        assert_eq!(dispatcher.stats().misses, 1);
        assert_eq!(dispatcher.stats().hits, 2);
    }

    #[test]
    fn wrong_shape_is_not_implemented() {
        let (container, dispatcher) = setup();
        assert!(op(&container, &dispatcher, "User", SyncOperation::DeleteList).is_err());
    }

    #[test]
    fn read_synthesized_only_when_opted_in() {
        let (container, dispatcher) = setup();
        let tag = op(&container, &dispatcher, "Tag", SyncOperation::Read).unwrap();
        assert!(tag.is_synthesized());

        // User has get_user, Post has nothing, neither opted in.
        assert!(!op(&container, &dispatcher, "User", SyncOperation::Read)
            .unwrap()
            .is_synthesized());
        assert!(op(&container, &dispatcher, "Post", SyncOperation::Read).is_err());
    }

    #[test]
    fn synthesis_can_be_disabled() {
        let (container, _) = setup();
        let dispatcher = Dispatcher::new(false);
        assert!(op(&container, &dispatcher, "Tag", SyncOperation::Read).is_err());
    }

    #[test]
    fn synthesized_read_scans_list() {
        let (container, dispatcher) = setup();
        let tag = op(&container, &dispatcher, "Tag", SyncOperation::Read).unwrap();
        let ctx = ctx(container);

        let found = tag.call_single(&ctx, Target::Id(Value::from("rust"))).unwrap();
        assert_eq!(found, Some(record! { "id" => "rust" }));

        let err = tag
            .call_single(&ctx, Target::Id(Value::from("go")))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn calls_reach_provider() {
        let (container, dispatcher) = setup();
        let read = op(&container, &dispatcher, "User", SyncOperation::Read).unwrap();
        let list = op(&container, &dispatcher, "User", SyncOperation::ReadList).unwrap();
        let ctx = ctx(container);

        let user = read.call_single(&ctx, Target::Id(Value::Integer(7))).unwrap();
        assert_eq!(user, Some(record! { "id" => 7 }));
        assert_eq!(list.call_list(&ctx, Vec::new()).unwrap().len(), 2);
        assert!(read.call_list(&ctx, Vec::new()).is_err());
    }

    #[test]
    fn has_operation_never_fails() {
        let (container, dispatcher) = setup();
        let provider = container.provider("users").unwrap();
        let user = container.entity_type("User").unwrap();
        assert!(dispatcher.has_operation(provider, &user, SyncOperation::ReadList));
        assert!(!dispatcher.has_operation(provider, &user, SyncOperation::Update));
    }
}
