//! Entity graph to plain value conversion.

use crate::error::SerializeResult;
use crate::rules::{FieldRule, SerializeRules};
use entisync_core::{
    Container, Entity, EntityGraph, EntityHandle, Node, Record, Related, Relation,
    RelationshipNode, Value,
};
use std::borrow::Cow;
use std::collections::HashMap;

/// Marker written under `@why` in circular reference tokens.
pub const CIRCULAR_REFERENCE: &str = "Circular reference detected";

const DEFAULT_ID_FIELD: &str = "id";

/// Serializes entities out of one graph.
///
/// Per-type rules registered with [`with_type_rules`](Self::with_type_rules)
/// are merged onto the caller's rules whenever an entity of that type is
/// visited; their field paths are relative to that entity.
#[derive(Debug)]
pub struct Serializer<'g> {
    graph: &'g EntityGraph,
    container: Option<&'g Container>,
    type_rules: HashMap<String, SerializeRules>,
}

impl<'g> Serializer<'g> {
    /// Creates a serializer over `graph`.
    pub fn new(graph: &'g EntityGraph) -> Self {
        Self {
            graph,
            container: None,
            type_rules: HashMap::new(),
        }
    }

    /// Uses entity metadata from `container` to find each type's id field.
    #[must_use]
    pub fn with_container(mut self, container: &'g Container) -> Self {
        self.container = Some(container);
        self
    }

    /// Registers rules applied to every entity of `entity_type`.
    #[must_use]
    pub fn with_type_rules(mut self, entity_type: impl Into<String>, rules: SerializeRules) -> Self {
        self.type_rules.insert(entity_type.into(), rules);
        self
    }

    /// Serializes the entity at `handle`.
    pub fn to_plain(&self, handle: EntityHandle, rules: &SerializeRules) -> SerializeResult<Value> {
        let mut walk = Walk::new(self, rules)?;
        let root = walk.root.clone();
        walk.node(handle, 0, root)
    }

    /// Serializes several entities into an array; root rules apply to each.
    pub fn to_plain_list(
        &self,
        handles: &[EntityHandle],
        rules: &SerializeRules,
    ) -> SerializeResult<Value> {
        let mut walk = Walk::new(self, rules)?;
        let items = handles
            .iter()
            .map(|handle| {
                let root = walk.root.clone();
                walk.node(*handle, 0, root)
            })
            .collect::<SerializeResult<Vec<_>>>()?;
        Ok(Value::Array(items))
    }

    fn id_field(&self, entity_type: &str) -> String {
        self.container
            .and_then(|c| c.entity_type(entity_type).ok())
            .map(|meta| meta.id_key().to_string())
            .unwrap_or_else(|| DEFAULT_ID_FIELD.to_string())
    }
}

/// Serializes the entity at `handle` with `rules`.
pub fn to_plain(
    graph: &EntityGraph,
    handle: EntityHandle,
    rules: &SerializeRules,
) -> SerializeResult<Value> {
    Serializer::new(graph).to_plain(handle, rules)
}

/// The unmatched remainder of a field path.
#[derive(Debug, Clone)]
struct Tail {
    segments: Vec<String>,
    rename: Option<String>,
}

impl Tail {
    fn from_rule(rule: &FieldRule) -> SerializeResult<Self> {
        Ok(Self {
            segments: rule.segments()?,
            rename: rule.rename.clone(),
        })
    }
}

/// What happens to one output key.
enum Action {
    Remove,
    Keep {
        rename: Option<String>,
        children: Vec<Tail>,
    },
}

fn action(key: &str, tails: &[Tail]) -> Action {
    let mut rename = None;
    let mut children = Vec::new();
    for tail in tails.iter().filter(|t| t.segments[0] == key) {
        if tail.segments.len() == 1 {
            match &tail.rename {
                None => return Action::Remove,
                Some(to) => {
                    rename.get_or_insert_with(|| to.clone());
                }
            }
        } else {
            children.push(Tail {
                segments: tail.segments[1..].to_vec(),
                rename: tail.rename.clone(),
            });
        }
    }
    Action::Keep { rename, children }
}

/// Applies removals and renames to a plain value.
fn prune(value: &mut Value, tails: &[Tail]) {
    match value {
        Value::Map(record) => prune_record(record, tails),
        Value::Array(items) => {
            for item in items {
                prune(item, tails);
            }
        }
        _ => {}
    }
}

fn prune_record(record: &mut Record, tails: &[Tail]) {
    if tails.is_empty() {
        return;
    }
    let mut out = Record::with_capacity(record.len());
    for (key, mut value) in std::mem::take(record) {
        if let Action::Keep { rename, children } = action(&key, tails) {
            if !children.is_empty() {
                prune(&mut value, &children);
            }
            out.insert(rename.unwrap_or(key), value);
        }
    }
    *record = out;
}

fn sort_record(record: &mut Record) {
    record.sort_by_key();
    let sorted = std::mem::take(record)
        .into_iter()
        .map(|(key, mut value)| {
            sort_plain(&mut value);
            (key, value)
        })
        .collect();
    *record = sorted;
}

fn sort_plain(value: &mut Value) {
    match value {
        Value::Map(record) => sort_record(record),
        Value::Array(items) => items.iter_mut().for_each(sort_plain),
        _ => {}
    }
}

fn circular(entity: &Entity) -> Value {
    Value::Map(
        Record::new()
            .with("@type", entity.entity_type())
            .with("@id", entity.id().cloned().unwrap_or_default())
            .with("@why", CIRCULAR_REFERENCE),
    )
}

/// State of one serialization call.
struct Walk<'s, 'g> {
    serializer: &'s Serializer<'g>,
    rules: &'s SerializeRules,
    root: Vec<Tail>,
    scoped: Vec<(String, Tail)>,
    stack: Vec<EntityHandle>,
}

impl<'s, 'g> Walk<'s, 'g> {
    fn new(serializer: &'s Serializer<'g>, rules: &'s SerializeRules) -> SerializeResult<Self> {
        let mut root = Vec::new();
        let mut scoped = Vec::new();
        for rule in rules.fields() {
            let tail = Tail::from_rule(rule)?;
            match &rule.scope {
                None => root.push(tail),
                Some(entity_type) => scoped.push((entity_type.clone(), tail)),
            }
        }
        Ok(Self {
            serializer,
            rules,
            root,
            scoped,
            stack: Vec::new(),
        })
    }

    fn node(&mut self, handle: EntityHandle, depth: usize, tails: Vec<Tail>) -> SerializeResult<Value> {
        match self.serializer.graph.node(handle)? {
            Node::Resolved(entity) => self.entity(handle, &entity, depth, tails),
            Node::Deferred(deferred) => Ok(deferred.id),
            Node::Missing(_) => Ok(Value::Null),
        }
    }

    fn entity(
        &mut self,
        handle: EntityHandle,
        entity: &Entity,
        depth: usize,
        mut tails: Vec<Tail>,
    ) -> SerializeResult<Value> {
        let entity_type = entity.entity_type();
        if self.stack.contains(&handle) {
            tracing::trace!(entity_type, depth, "circular reference");
            return Ok(circular(entity));
        }

        let serializer = self.serializer;
        let rules = self.rules;
        let type_rules = serializer.type_rules.get(entity_type);
        let settings = match type_rules {
            Some(extra) => Cow::Owned(rules.apply(extra)),
            None => Cow::Borrowed(rules),
        };
        let canonical = serializer.id_field(entity_type);
        let alias = settings
            .id_key_for(entity_type)?
            .filter(|alias| *alias != canonical);

        if settings.depth_limit().is_some_and(|max| depth > max) {
            let key = alias.unwrap_or(canonical);
            let id = entity.id().cloned().unwrap_or_default();
            return Ok(Value::Map(Record::new().with(key, id)));
        }

        tails.extend(
            self.scoped
                .iter()
                .filter(|(scope, _)| scope == entity_type)
                .map(|(_, tail)| tail.clone()),
        );
        if let Some(extra) = type_rules {
            for rule in extra.fields() {
                tails.push(Tail::from_rule(rule)?);
            }
        }

        let mut fields = Record::with_capacity(entity.fields().len() + 1);
        for (key, value) in entity.fields().iter() {
            if key != canonical {
                fields.insert(key, value.clone());
                continue;
            }
            if !settings.removes_canonical_id() {
                fields.insert(key, value.clone());
            }
            if let Some(alias) = &alias {
                fields.insert(alias.clone(), value.clone());
            }
        }
        prune_record(&mut fields, &tails);
        if settings.sorts_keys() {
            sort_record(&mut fields);
        }
        let mut out = fields;

        self.stack.push(handle);
        let relations = self.relations(entity, depth, &tails);
        self.stack.pop();
        for (key, value) in relations? {
            out.insert(key, value);
        }

        if settings.sorts_keys() {
            out.sort_by_key();
        }
        Ok(Value::Map(out))
    }

    fn relations(
        &mut self,
        entity: &Entity,
        depth: usize,
        tails: &[Tail],
    ) -> SerializeResult<Vec<(String, Value)>> {
        let mut out = Vec::new();
        for (name, relation) in entity.relations() {
            let Action::Keep { rename, children } = action(name, tails) else {
                continue;
            };
            if let Some(value) = self.relation(relation, depth, children)? {
                out.push((rename.unwrap_or_else(|| name.to_string()), value));
            }
        }
        Ok(out)
    }

    /// Renders a relationship; `None` when it is not available without I/O.
    fn relation(
        &mut self,
        relation: &Relation,
        depth: usize,
        children: Vec<Tail>,
    ) -> SerializeResult<Option<Value>> {
        let related = match relation {
            Relation::Loaded(related) => related.clone(),
            Relation::Deferred(slot) => match self.serializer.graph.relationship(*slot)? {
                RelationshipNode::Resolved(handles) => Related::Many(handles),
                RelationshipNode::Deferred(_) => return Ok(None),
            },
            Relation::Lazy(lazy) => match lazy.get() {
                Some(related) => related,
                None => return Ok(None),
            },
        };
        let value = match related {
            Related::One(None) => Value::Null,
            Related::One(Some(handle)) => self.node(handle, depth + 1, children)?,
            Related::Many(handles) => Value::Array(
                handles
                    .into_iter()
                    .map(|handle| self.node(handle, depth + 1, children.clone()))
                    .collect::<SerializeResult<Vec<_>>>()?,
            ),
        };
        Ok(Some(value))
    }
}
