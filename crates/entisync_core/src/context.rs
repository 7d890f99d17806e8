//! Immutable provider context.
//!
//! A `ProviderContext` is created once per provider per logical request
//! chain and threaded through every operation call. Every `with_*` method
//! returns a new context; the receiver is never changed. The only shared
//! state is the per-call [`Filters`], whose claim marks the filter enforcer
//! reads back after the provider returns.

use crate::catalog::{Conformity, DeferredEntityPolicy, FilterPolicy, HydrationFlags};
use crate::entity::{Container, EntityType};
use crate::error::CoreResult;
use crate::filter::Filters;
use crate::graph::EntityHandle;
use crate::naming::snake_case;
use crate::provider::Provider;
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// An entity pushed onto a context's ancestry stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEntity {
    /// Entity type name.
    pub entity_type: String,
    /// Backend id, if the entity has one.
    pub id: Option<Value>,
    /// Handle in the run's entity graph, if the entity lives in one.
    pub handle: Option<EntityHandle>,
}

impl ContextEntity {
    /// Creates a reference to an entity by type and id.
    pub fn new(entity_type: impl Into<String>, id: impl Into<Value>) -> Self {
        let id = id.into();
        Self {
            entity_type: entity_type.into(),
            id: (!id.is_null()).then_some(id),
            handle: None,
        }
    }

    /// Attaches a graph handle.
    #[must_use]
    pub fn with_handle(mut self, handle: EntityHandle) -> Self {
        self.handle = Some(handle);
        self
    }
}

/// Context propagated through provider operations.
#[derive(Clone)]
pub struct ProviderContext {
    provider: Arc<dyn Provider>,
    container: Arc<Container>,
    entity_type: Option<String>,
    conformity: Conformity,
    stack: Vec<ContextEntity>,
    parent: Option<ContextEntity>,
    values: BTreeMap<String, Value>,
    deferred_policy: DeferredEntityPolicy,
    filter_policy: FilterPolicy,
    hydration: BTreeMap<String, HydrationFlags>,
    filters: Arc<Filters>,
}

impl ProviderContext {
    /// Creates a root context for `provider`.
    pub fn new(provider: Arc<dyn Provider>, container: Arc<Container>) -> Self {
        Self {
            provider,
            container,
            entity_type: None,
            conformity: Conformity::None,
            stack: Vec::new(),
            parent: None,
            values: BTreeMap::new(),
            deferred_policy: DeferredEntityPolicy::default(),
            filter_policy: FilterPolicy::default(),
            hydration: BTreeMap::new(),
            filters: Arc::new(Filters::empty()),
        }
    }

    /// The provider this context belongs to.
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Name of the provider this context belongs to.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// The container entity metadata and providers are looked up in.
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// The entity type currently being operated on.
    pub fn entity_type(&self) -> Option<&str> {
        self.entity_type.as_deref()
    }

    /// Metadata for the current entity type.
    pub fn entity_meta(&self) -> Option<CoreResult<Arc<EntityType>>> {
        self.entity_type
            .as_deref()
            .map(|name| self.container.entity_type(name))
    }

    /// Conformity of the records flowing through this context.
    pub fn conformity(&self) -> Conformity {
        self.conformity
    }

    /// Ancestor entities, most recent last.
    pub fn stack(&self) -> &[ContextEntity] {
        &self.stack
    }

    /// The most recently pushed entity.
    pub fn last_entity(&self) -> Option<&ContextEntity> {
        self.stack.last()
    }

    /// Parent entity, for tree-shaped entities.
    pub fn parent(&self) -> Option<&ContextEntity> {
        self.parent.as_ref()
    }

    /// Active deferred entity policy.
    pub fn deferred_policy(&self) -> DeferredEntityPolicy {
        self.deferred_policy
    }

    /// Active filter policy.
    pub fn filter_policy(&self) -> FilterPolicy {
        self.filter_policy
    }

    /// Filters for the current call.
    pub fn filters(&self) -> &Arc<Filters> {
        &self.filters
    }

    /// Returns a context with different conformity.
    #[must_use]
    pub fn with_conformity(&self, conformity: Conformity) -> Self {
        let mut ctx = self.clone();
        ctx.conformity = conformity;
        ctx
    }

    /// Returns a context bound to another provider, keeping everything else.
    ///
    /// Used when a relationship crosses into an entity type served by a
    /// different backend.
    #[must_use]
    pub fn with_provider(&self, provider: Arc<dyn Provider>) -> Self {
        let mut ctx = self.clone();
        ctx.provider = provider;
        ctx
    }

    /// Returns a context for a different entity type.
    #[must_use]
    pub fn with_entity_type(&self, entity_type: impl Into<String>) -> Self {
        let mut ctx = self.clone();
        ctx.entity_type = Some(entity_type.into());
        ctx
    }

    /// Returns a context with a parent entity.
    #[must_use]
    pub fn with_parent(&self, parent: Option<ContextEntity>) -> Self {
        let mut ctx = self.clone();
        ctx.parent = parent;
        ctx
    }

    /// Returns a context with `entity` pushed onto the ancestry stack.
    ///
    /// If the entity has an identifying id, `<entity>_id` is also set.
    #[must_use]
    pub fn push_entity(&self, entity: ContextEntity) -> Self {
        let mut ctx = self.clone();
        if let Some(id) = entity.id.as_ref().filter(|id| id.is_identifier()) {
            ctx.values
                .insert(format!("{}_id", snake_case(&entity.entity_type)), id.clone());
        }
        ctx.stack.push(entity);
        ctx
    }

    /// Returns a context with a named value set.
    #[must_use]
    pub fn with_value(&self, name: &str, value: impl Into<Value>) -> Self {
        let mut ctx = self.clone();
        ctx.values.insert(snake_case(name), value.into());
        ctx
    }

    /// Returns a context with a different deferred entity policy.
    #[must_use]
    pub fn with_deferred_policy(&self, policy: DeferredEntityPolicy) -> Self {
        let mut ctx = self.clone();
        ctx.deferred_policy = policy;
        ctx
    }

    /// Returns a context with a different filter policy.
    #[must_use]
    pub fn with_filter_policy(&self, policy: FilterPolicy) -> Self {
        let mut ctx = self.clone();
        ctx.filter_policy = policy;
        ctx
    }

    /// Returns a context that overrides a relationship's hydration flags.
    ///
    /// With `entity_type` of `None` the override applies to relationships
    /// of that name on every entity type.
    #[must_use]
    pub fn with_hydration_flags(
        &self,
        entity_type: Option<&str>,
        relationship: &str,
        flags: HydrationFlags,
    ) -> Self {
        let mut ctx = self.clone();
        ctx.hydration
            .insert(hydration_key(entity_type, relationship), flags);
        ctx
    }

    /// Returns a context carrying `filters` for the next provider call.
    #[must_use]
    pub fn with_filters(&self, filters: Filters) -> Self {
        let mut ctx = self.clone();
        ctx.filters = Arc::new(filters);
        ctx
    }

    /// Hydration override for a relationship, if one is set.
    pub fn hydration_flags(&self, entity_type: &str, relationship: &str) -> Option<HydrationFlags> {
        self.hydration
            .get(&hydration_key(Some(entity_type), relationship))
            .or_else(|| self.hydration.get(&hydration_key(None, relationship)))
            .copied()
    }

    /// Returns true if a named value is set.
    ///
    /// `<name>_id` falls back to `<name>` and vice versa.
    pub fn has_value(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Returns a named value.
    ///
    /// `<name>_id` falls back to `<name>` and vice versa.
    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.lookup(name)
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        let key = snake_case(name);
        if let Some(value) = self.values.get(&key) {
            return Some(value);
        }
        match key.strip_suffix("_id") {
            Some(stripped) => self.values.get(stripped),
            None => self.values.get(&format!("{key}_id")),
        }
    }

    /// Claims a filter value for the current call.
    pub fn claim_filter(&self, key: &str) -> Option<Value> {
        self.filters.claim(key)
    }

    /// Filter keys the provider has not claimed.
    pub fn unclaimed_filters(&self) -> Vec<String> {
        self.filters.unclaimed()
    }

    /// Returns true if an entity of `entity_type` with `id` is already on
    /// the ancestry stack.
    pub fn is_in_stack(&self, entity_type: &str, id: &Value) -> bool {
        self.stack
            .iter()
            .any(|e| e.entity_type == entity_type && e.id.as_ref() == Some(id))
    }
}

fn hydration_key(entity_type: Option<&str>, relationship: &str) -> String {
    match entity_type {
        Some(t) => format!("{}.{}", snake_case(t), snake_case(relationship)),
        None => snake_case(relationship),
    }
}

impl fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderContext")
            .field("provider", &self.provider.name())
            .field("entity_type", &self.entity_type)
            .field("conformity", &self.conformity)
            .field("stack", &self.stack)
            .field("parent", &self.parent)
            .field("values", &self.values)
            .field("deferred_policy", &self.deferred_policy)
            .field("filter_policy", &self.filter_policy)
            .finish_non_exhaustive()
    }
}
