//! Per-run entity arena.
//!
//! Entities built during a run live in an [`EntityGraph`] and are addressed
//! by [`EntityHandle`]. A placeholder and the entity it becomes share one
//! handle: resolution replaces the slot, so everything holding the handle
//! observes the resolved entity. Slots are written at most once.

use crate::context::ProviderContext;
use crate::entity::Relationship;
use crate::error::{CoreError, CoreResult};
use crate::value::{Record, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Stable index of an entity slot in an [`EntityGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityHandle(usize);

impl EntityHandle {
    /// Raw index.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

/// Stable index of a deferred relationship slot in an [`EntityGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelationshipHandle(usize);

impl RelationshipHandle {
    /// Raw index.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A fully built entity.
#[derive(Debug, Clone)]
pub struct Entity {
    entity_type: String,
    provider: String,
    id: Option<Value>,
    fields: Record,
    relations: Vec<(String, Relation)>,
}

impl Entity {
    /// Creates an entity from a provider record.
    pub fn new(
        entity_type: impl Into<String>,
        provider: impl Into<String>,
        id: Option<Value>,
        fields: Record,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            provider: provider.into(),
            id,
            fields,
            relations: Vec::new(),
        }
    }

    /// Entity type name.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Name of the provider the entity came from.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Backend id, if assigned.
    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    /// Scalar fields, in provider order.
    pub fn fields(&self) -> &Record {
        &self.fields
    }

    /// A single field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Relationship properties that have been set, in hydration order.
    pub fn relations(&self) -> impl Iterator<Item = (&str, &Relation)> {
        self.relations.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// A relationship property, if it was set.
    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    fn set_relation(&mut self, name: &str, relation: Relation) {
        match self.relations.iter_mut().find(|(k, _)| k == name) {
            Some((_, slot)) => *slot = relation,
            None => self.relations.push((name.to_string(), relation)),
        }
    }
}

/// Related entities that are available without further I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Related {
    /// A to-one relationship; `None` when the foreign key is null.
    One(Option<EntityHandle>),
    /// A to-many relationship.
    Many(Vec<EntityHandle>),
}

impl Related {
    /// All handles referenced.
    pub fn handles(&self) -> Vec<EntityHandle> {
        match self {
            Related::One(h) => h.iter().copied().collect(),
            Related::Many(hs) => hs.clone(),
        }
    }
}

/// The value of a relationship property.
#[derive(Debug, Clone)]
pub enum Relation {
    /// Loaded (the handles themselves may still be deferred placeholders).
    Loaded(Related),
    /// A deferred list, filled when the registry resolves it.
    Deferred(RelationshipHandle),
    /// Loaded on first access.
    Lazy(Arc<LazyRelation>),
}

/// A placeholder for an entity known only by its backend id.
#[derive(Debug, Clone)]
pub struct DeferredEntity {
    /// Target entity type.
    pub entity_type: String,
    /// Provider expected to supply it.
    pub provider: String,
    /// Backend id.
    pub id: Value,
    /// Context active when the placeholder was created.
    pub context: ProviderContext,
}

/// A placeholder for an unresolved list of related entities.
#[derive(Debug, Clone)]
pub struct DeferredRelationship {
    /// Target entity type.
    pub entity_type: String,
    /// Provider expected to supply it.
    pub provider: String,
    /// Filter identifying the list, e.g. `{ "user_id": 1 }`.
    pub filter: Record,
    /// Entity owning the relationship.
    pub parent: EntityHandle,
    /// Relationship name on the parent.
    pub name: String,
    /// Context active when the placeholder was created.
    pub context: ProviderContext,
}

/// State of an entity slot.
#[derive(Debug, Clone)]
pub enum Node {
    /// A built entity.
    Resolved(Entity),
    /// A placeholder awaiting resolution.
    Deferred(DeferredEntity),
    /// A placeholder whose resolution found no record.
    Missing(DeferredEntity),
}

/// State of a deferred relationship slot.
#[derive(Debug, Clone)]
pub enum RelationshipNode {
    /// Awaiting resolution.
    Deferred(DeferredRelationship),
    /// Resolved to a list of entities.
    Resolved(Vec<EntityHandle>),
}

/// A relationship that is loaded on first access.
///
/// The load runs under a per-instance lock so concurrent first accesses
/// trigger at most one fetch.
pub struct LazyRelation {
    relationship: Relationship,
    parent: EntityHandle,
    context: ProviderContext,
    loaded: Mutex<Option<Related>>,
}

impl LazyRelation {
    /// Creates an unloaded lazy relationship.
    pub fn new(relationship: Relationship, parent: EntityHandle, context: ProviderContext) -> Self {
        Self {
            relationship,
            parent,
            context,
            loaded: Mutex::new(None),
        }
    }

    /// The relationship declaration.
    pub fn relationship(&self) -> &Relationship {
        &self.relationship
    }

    /// The entity owning the relationship.
    pub fn parent(&self) -> EntityHandle {
        self.parent
    }

    /// Context captured when the trigger was installed.
    pub fn context(&self) -> &ProviderContext {
        &self.context
    }

    /// The loaded value, without triggering a load.
    pub fn get(&self) -> Option<Related> {
        self.loaded.lock().clone()
    }

    /// Returns true once a load has succeeded.
    pub fn is_loaded(&self) -> bool {
        self.loaded.lock().is_some()
    }

    /// Returns the loaded value, running `load` if nothing is loaded yet.
    ///
    /// A failed load leaves the relationship unloaded.
    pub fn get_or_try_load<E>(
        &self,
        load: impl FnOnce(&Self) -> Result<Related, E>,
    ) -> Result<Related, E> {
        let mut guard = self.loaded.lock();
        if let Some(related) = guard.as_ref() {
            return Ok(related.clone());
        }
        let related = load(self)?;
        *guard = Some(related.clone());
        Ok(related)
    }
}

impl fmt::Debug for LazyRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyRelation")
            .field("relationship", &self.relationship.name())
            .field("parent", &self.parent)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

type IdentityKey = (String, String, Value);

/// Outcome of inserting a built entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inserted {
    /// Handle of the entity.
    pub handle: EntityHandle,
    /// False when the identity map already held a resolved entity.
    pub fresh: bool,
}

/// Arena of entities and deferred relationships for one run.
#[derive(Debug, Default)]
pub struct EntityGraph {
    nodes: RwLock<Vec<Node>>,
    relationships: RwLock<Vec<RelationshipNode>>,
    identity: RwLock<HashMap<IdentityKey, EntityHandle>>,
}

impl EntityGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entity slots.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Returns true if the graph has no entity slots.
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Looks up the handle for a backend entity.
    pub fn lookup(&self, provider: &str, entity_type: &str, id: &Value) -> Option<EntityHandle> {
        self.identity
            .read()
            .get(&(provider.to_string(), entity_type.to_string(), id.clone()))
            .copied()
    }

    /// Inserts a built entity.
    ///
    /// If a pending placeholder for the same backend entity exists it is
    /// resolved in place. A resolved entity or a placeholder already marked
    /// missing is kept and the insert reports `fresh: false`.
    pub fn insert(&self, entity: Entity) -> Inserted {
        let key = entity
            .id
            .clone()
            .map(|id| (entity.provider.clone(), entity.entity_type.clone(), id));

        let mut identity = self.identity.write();
        let mut nodes = self.nodes.write();

        if let Some(handle) = key.as_ref().and_then(|k| identity.get(k)).copied() {
            let slot = &mut nodes[handle.0];
            return match slot {
                Node::Resolved(_) | Node::Missing(_) => Inserted {
                    handle,
                    fresh: false,
                },
                Node::Deferred(_) => {
                    *slot = Node::Resolved(entity);
                    Inserted {
                        handle,
                        fresh: true,
                    }
                }
            };
        }

        let handle = EntityHandle(nodes.len());
        nodes.push(Node::Resolved(entity));
        if let Some(key) = key {
            identity.insert(key, handle);
        }
        Inserted {
            handle,
            fresh: true,
        }
    }

    /// Inserts a built entity, replacing whatever slot holds the same
    /// identity instead of keeping it.
    ///
    /// Used for records returned by writes, which supersede what the run
    /// has seen so far, missing placeholders included. Relationships on the
    /// replaced entity are dropped.
    pub fn upsert(&self, entity: Entity) -> Inserted {
        let key = entity
            .id
            .clone()
            .map(|id| (entity.provider.clone(), entity.entity_type.clone(), id));
        if let Some(handle) = key.as_ref().and_then(|k| self.identity.read().get(k).copied()) {
            let mut nodes = self.nodes.write();
            nodes[handle.0] = Node::Resolved(entity);
            return Inserted {
                handle,
                fresh: true,
            };
        }
        self.insert(entity)
    }

    /// Inserts a placeholder, or returns the existing handle for the same
    /// backend entity.
    pub fn insert_deferred(&self, deferred: DeferredEntity) -> EntityHandle {
        let key = (
            deferred.provider.clone(),
            deferred.entity_type.clone(),
            deferred.id.clone(),
        );
        let mut identity = self.identity.write();
        if let Some(handle) = identity.get(&key) {
            return *handle;
        }
        let mut nodes = self.nodes.write();
        let handle = EntityHandle(nodes.len());
        nodes.push(Node::Deferred(deferred));
        identity.insert(key, handle);
        handle
    }

    /// Marks a placeholder as not found. Returns false unless the slot was
    /// still deferred.
    pub fn mark_missing(&self, handle: EntityHandle) -> CoreResult<bool> {
        let mut nodes = self.nodes.write();
        let slot = nodes
            .get_mut(handle.0)
            .ok_or(CoreError::UnknownHandle { handle: handle.0 })?;
        let Node::Deferred(deferred) = slot else {
            return Ok(false);
        };
        let missing = deferred.clone();
        *slot = Node::Missing(missing);
        Ok(true)
    }

    /// Restores a slot to an earlier state.
    ///
    /// Used to undo a build whose hydration failed, so that the identity
    /// map never holds a half-hydrated entity.
    pub fn revert(&self, handle: EntityHandle, node: Node) -> CoreResult<()> {
        let mut nodes = self.nodes.write();
        let slot = nodes
            .get_mut(handle.0)
            .ok_or(CoreError::UnknownHandle { handle: handle.0 })?;
        *slot = node;
        Ok(())
    }

    /// A clone of a slot.
    pub fn node(&self, handle: EntityHandle) -> CoreResult<Node> {
        self.nodes
            .read()
            .get(handle.0)
            .cloned()
            .ok_or(CoreError::UnknownHandle { handle: handle.0 })
    }

    /// Returns true if the slot holds a built entity.
    pub fn is_resolved(&self, handle: EntityHandle) -> bool {
        matches!(self.nodes.read().get(handle.0), Some(Node::Resolved(_)))
    }

    /// Runs `f` against a built entity.
    ///
    /// Fails with `Unresolved` for pending placeholders and
    /// `EntityNotFound` for placeholders that resolved to nothing.
    pub fn with_entity<R>(&self, handle: EntityHandle, f: impl FnOnce(&Entity) -> R) -> CoreResult<R> {
        let nodes = self.nodes.read();
        match nodes.get(handle.0) {
            Some(Node::Resolved(entity)) => Ok(f(entity)),
            Some(Node::Deferred(d)) => Err(CoreError::Unresolved {
                entity_type: d.entity_type.clone(),
                id: d.id.clone(),
            }),
            Some(Node::Missing(d)) => Err(CoreError::entity_not_found(&d.entity_type, d.id.clone())),
            None => Err(CoreError::UnknownHandle { handle: handle.0 }),
        }
    }

    /// A clone of a built entity.
    pub fn entity(&self, handle: EntityHandle) -> CoreResult<Entity> {
        self.with_entity(handle, Entity::clone)
    }

    /// Sets a relationship property on a built entity.
    pub fn set_relation(&self, handle: EntityHandle, name: &str, relation: Relation) -> CoreResult<()> {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(handle.0) {
            Some(Node::Resolved(entity)) => {
                entity.set_relation(name, relation);
                Ok(())
            }
            Some(Node::Deferred(d) | Node::Missing(d)) => Err(CoreError::Unresolved {
                entity_type: d.entity_type.clone(),
                id: d.id.clone(),
            }),
            None => Err(CoreError::UnknownHandle { handle: handle.0 }),
        }
    }

    /// Handles of every pending placeholder.
    pub fn pending(&self) -> Vec<EntityHandle> {
        self.nodes
            .read()
            .iter()
            .enumerate()
            .filter(|(_, n)| matches!(n, Node::Deferred(_)))
            .map(|(i, _)| EntityHandle(i))
            .collect()
    }

    /// Inserts a deferred relationship.
    pub fn insert_relationship(&self, deferred: DeferredRelationship) -> RelationshipHandle {
        let mut relationships = self.relationships.write();
        let handle = RelationshipHandle(relationships.len());
        relationships.push(RelationshipNode::Deferred(deferred));
        handle
    }

    /// A clone of a relationship slot.
    pub fn relationship(&self, handle: RelationshipHandle) -> CoreResult<RelationshipNode> {
        self.relationships
            .read()
            .get(handle.0)
            .cloned()
            .ok_or(CoreError::UnknownHandle { handle: handle.0 })
    }

    /// Fills a deferred relationship. Returns false if it was already filled.
    pub fn resolve_relationship(
        &self,
        handle: RelationshipHandle,
        entities: Vec<EntityHandle>,
    ) -> CoreResult<bool> {
        let mut relationships = self.relationships.write();
        let slot = relationships
            .get_mut(handle.0)
            .ok_or(CoreError::UnknownHandle { handle: handle.0 })?;
        if matches!(slot, RelationshipNode::Resolved(_)) {
            return Ok(false);
        }
        *slot = RelationshipNode::Resolved(entities);
        Ok(true)
    }

    /// Handles of every pending deferred relationship.
    pub fn pending_relationships(&self) -> Vec<RelationshipHandle> {
        self.relationships
            .read()
            .iter()
            .enumerate()
            .filter(|(_, n)| matches!(n, RelationshipNode::Deferred(_)))
            .map(|(i, _)| RelationshipHandle(i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Container;
    use crate::provider::{MethodTable, Provider};
    use crate::record;

    struct NullProvider;

    impl Provider for NullProvider {
        fn name(&self) -> &str {
            "null"
        }

        fn declare_methods(self: Arc<Self>, _methods: &mut MethodTable) {}
    }

    fn ctx() -> ProviderContext {
        ProviderContext::new(Arc::new(NullProvider), Arc::new(Container::new()))
    }

    fn user(id: i64) -> Entity {
        Entity::new(
            "User",
            "null",
            Some(Value::Integer(id)),
            record! { "id" => id, "name" => format!("user{id}") },
        )
    }

    fn placeholder(id: i64) -> DeferredEntity {
        DeferredEntity {
            entity_type: "User".into(),
            provider: "null".into(),
            id: Value::Integer(id),
            context: ctx(),
        }
    }

    #[test]
    fn identity_map_dedupes_entities() {
        let graph = EntityGraph::new();
        let first = graph.insert(user(1));
        let second = graph.insert(user(1));
        assert!(first.fresh);
        assert!(!second.fresh);
        assert_eq!(first.handle, second.handle);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn entities_without_ids_are_never_merged() {
        let graph = EntityGraph::new();
        let a = graph.insert(Entity::new("User", "null", None, record! {}));
        let b = graph.insert(Entity::new("User", "null", None, record! {}));
        assert_ne!(a.handle, b.handle);
    }

    #[test]
    fn placeholder_is_replaced_in_place() {
        let graph = EntityGraph::new();
        let handle = graph.insert_deferred(placeholder(5));
        assert!(!graph.is_resolved(handle));
        assert!(matches!(graph.entity(handle), Err(CoreError::Unresolved { .. })));
        assert_eq!(graph.pending(), vec![handle]);

        let inserted = graph.insert(user(5));
        assert_eq!(inserted.handle, handle);
        assert!(graph.is_resolved(handle));
        assert_eq!(graph.entity(handle).unwrap().id(), Some(&Value::Integer(5)));
        assert!(graph.pending().is_empty());
    }

    #[test]
    fn upsert_replaces_resolved_entity() {
        let graph = EntityGraph::new();
        let handle = graph.insert(user(1)).handle;
        graph
            .set_relation(handle, "manager", Relation::Loaded(Related::One(None)))
            .unwrap();

        let updated = Entity::new(
            "User",
            "null",
            Some(Value::Integer(1)),
            record! { "id" => 1, "name" => "renamed" },
        );
        let inserted = graph.upsert(updated);
        assert_eq!(inserted.handle, handle);
        let entity = graph.entity(handle).unwrap();
        assert_eq!(entity.field("name"), Some(&Value::from("renamed")));
        assert!(entity.relation("manager").is_none());
    }

    #[test]
    fn deferring_twice_returns_same_handle() {
        let graph = EntityGraph::new();
        let a = graph.insert_deferred(placeholder(9));
        let b = graph.insert_deferred(placeholder(9));
        assert_eq!(a, b);

        let resolved = graph.insert(user(3)).handle;
        assert_eq!(graph.insert_deferred(placeholder(3)), resolved);
    }

    #[test]
    fn missing_placeholders_fail_on_dereference() {
        let graph = EntityGraph::new();
        let handle = graph.insert_deferred(placeholder(8));
        assert!(graph.mark_missing(handle).unwrap());
        assert!(!graph.mark_missing(handle).unwrap());
        assert!(matches!(
            graph.entity(handle),
            Err(CoreError::EntityNotFound { .. })
        ));
    }

    #[test]
    fn missing_slots_are_kept_by_reads() {
        let graph = EntityGraph::new();
        let handle = graph.insert_deferred(placeholder(8));
        graph.mark_missing(handle).unwrap();

        let inserted = graph.insert(user(8));
        assert_eq!(inserted.handle, handle);
        assert!(!inserted.fresh);
        assert!(matches!(
            graph.entity(handle),
            Err(CoreError::EntityNotFound { .. })
        ));

        assert!(graph.upsert(user(8)).fresh);
        assert!(graph.is_resolved(handle));
    }

    #[test]
    fn revert_restores_a_placeholder() {
        let graph = EntityGraph::new();
        let handle = graph.insert_deferred(placeholder(4));
        let before = graph.node(handle).unwrap();
        graph.insert(user(4));
        assert!(graph.is_resolved(handle));

        graph.revert(handle, before).unwrap();
        assert_eq!(graph.pending(), vec![handle]);
        assert!(graph.insert(user(4)).fresh);
        assert!(graph.revert(EntityHandle(99), Node::Missing(placeholder(1))).is_err());
    }

    #[test]
    fn relationship_slots_are_write_once() {
        let graph = EntityGraph::new();
        let parent = graph.insert(user(1)).handle;
        let rel = graph.insert_relationship(DeferredRelationship {
            entity_type: "Post".into(),
            provider: "null".into(),
            filter: record! { "user_id" => 1 },
            parent,
            name: "posts".into(),
            context: ctx(),
        });
        assert_eq!(graph.pending_relationships(), vec![rel]);
        assert!(graph.resolve_relationship(rel, vec![parent]).unwrap());
        assert!(!graph.resolve_relationship(rel, vec![]).unwrap());
        match graph.relationship(rel).unwrap() {
            RelationshipNode::Resolved(handles) => assert_eq!(handles, vec![parent]),
            RelationshipNode::Deferred(_) => panic!("expected resolved relationship"),
        }
    }

    #[test]
    fn lazy_relation_loads_once() {
        let graph = EntityGraph::new();
        let parent = graph.insert(user(1)).handle;
        let lazy = LazyRelation::new(Relationship::many("posts", "Post"), parent, ctx());
        let mut calls = 0;

        let first: Result<Related, CoreError> = lazy.get_or_try_load(|_| {
            calls += 1;
            Ok(Related::Many(vec![]))
        });
        assert!(first.is_ok());
        let second: Result<Related, CoreError> = lazy.get_or_try_load(|_| {
            calls += 1;
            Ok(Related::Many(vec![parent]))
        });
        assert_eq!(second.unwrap(), Related::Many(vec![]));
        assert_eq!(calls, 1);
    }

    #[test]
    fn failed_lazy_load_can_be_retried() {
        let lazy = LazyRelation::new(
            Relationship::one("author", "User"),
            EntityHandle(0),
            ctx(),
        );
        let failed: Result<Related, &str> = lazy.get_or_try_load(|_| Err("offline"));
        assert!(failed.is_err());
        assert!(!lazy.is_loaded());
        let ok: Result<Related, &str> = lazy.get_or_try_load(|_| Ok(Related::One(None)));
        assert_eq!(ok.unwrap(), Related::One(None));
    }

    #[test]
    fn relations_are_set_on_resolved_entities_only() {
        let graph = EntityGraph::new();
        let parent = graph.insert(user(1)).handle;
        graph
            .set_relation(parent, "manager", Relation::Loaded(Related::One(None)))
            .unwrap();
        let entity = graph.entity(parent).unwrap();
        assert!(matches!(
            entity.relation("manager"),
            Some(Relation::Loaded(Related::One(None)))
        ));

        let pending = graph.insert_deferred(placeholder(2));
        assert!(graph
            .set_relation(pending, "manager", Relation::Loaded(Related::One(None)))
            .is_err());
    }
}
