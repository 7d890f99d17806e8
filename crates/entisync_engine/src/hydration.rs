//! Hydration controller.
//!
//! Builds provider records into graph entities and populates their
//! relationship properties according to each relationship's effective
//! [`HydrationFlags`]: a context override if one is set, else the declared
//! default.

use crate::engine::Run;
use crate::enforcer::SingleOutcome;
use crate::error::{EngineError, EngineResult};
use entisync_core::{
    Cardinality, Conformity, ContextEntity, CoreError, DeferredEntity, DeferredEntityPolicy, Entity,
    EntityHandle, EntityType, Filters, HydrationFlags, HydrationMode, LazyRelation, Node,
    ProviderContext, Record, Related, Relation, RelationshipNode, Relationship, SyncOperation,
    Target, Value,
};
use std::sync::Arc;

/// Builds entities for one run.
pub(crate) struct Hydrator<'r> {
    run: &'r Run,
}

impl<'r> Hydrator<'r> {
    pub(crate) fn new(run: &'r Run) -> Self {
        Self { run }
    }

    /// Builds a record into the graph and hydrates it.
    ///
    /// A record whose entity the run already holds returns the existing
    /// handle without re-hydrating, unless `replace` is set. If hydration
    /// fails the slot goes back to what it held before, and an entity new
    /// to the run is left as a pending placeholder.
    pub(crate) fn build(
        &self,
        ctx: &ProviderContext,
        entity_type: &Arc<EntityType>,
        record: Record,
        replace: bool,
    ) -> EngineResult<EntityHandle> {
        let id = entity_type.id_of(&record).cloned();
        let entity = Entity::new(
            entity_type.name(),
            ctx.provider_name(),
            id.clone(),
            record.clone(),
        );
        let graph = self.run.graph();
        let previous = id
            .as_ref()
            .and_then(|id| graph.lookup(ctx.provider_name(), entity_type.name(), id))
            .map(|handle| graph.node(handle))
            .transpose()?;
        let inserted = if replace {
            graph.upsert(entity)
        } else {
            graph.insert(entity)
        };
        if !inserted.fresh {
            return Ok(inserted.handle);
        }
        self.run.record_built();

        let entity_ctx = ctx
            .with_entity_type(entity_type.name())
            .with_filters(Filters::empty())
            .push_entity(
                ContextEntity::new(entity_type.name(), id.clone().unwrap_or_default())
                    .with_handle(inserted.handle),
            );
        if let Err(err) = self.hydrate(inserted.handle, &entity_ctx, entity_type, &record) {
            self.unbuild(inserted.handle, previous, ctx, entity_type, id)?;
            return Err(err);
        }
        Ok(inserted.handle)
    }

    /// Undoes a build whose hydration failed.
    fn unbuild(
        &self,
        handle: EntityHandle,
        previous: Option<Node>,
        ctx: &ProviderContext,
        entity_type: &EntityType,
        id: Option<Value>,
    ) -> EngineResult<()> {
        let restored = match (previous, id) {
            (Some(node), _) => node,
            (None, Some(id)) => Node::Deferred(DeferredEntity {
                entity_type: entity_type.name().to_string(),
                provider: ctx.provider_name().to_string(),
                id,
                context: ctx.clone(),
            }),
            // Without an id nothing can find the entity again.
            (None, None) => return Ok(()),
        };
        let pending = matches!(restored, Node::Deferred(_));
        self.run.graph().revert(handle, restored)?;
        if pending {
            self.run
                .registry()
                .track(ctx.provider_name(), entity_type.name(), handle);
        }
        tracing::debug!(
            run = %self.run.id(),
            entity_type = entity_type.name(),
            handle = %handle,
            pending,
            "rolled back entity after failed hydration"
        );
        Ok(())
    }

    /// Builds a list of records, noting their conformity on the context.
    pub(crate) fn build_all(
        &self,
        ctx: &ProviderContext,
        entity_type: &Arc<EntityType>,
        records: Vec<Record>,
        replace: bool,
    ) -> EngineResult<Vec<EntityHandle>> {
        let ctx = ctx.with_conformity(Conformity::detect(&records));
        records
            .into_iter()
            .map(|record| self.build(&ctx, entity_type, record, replace))
            .collect()
    }

    fn hydrate(
        &self,
        handle: EntityHandle,
        ctx: &ProviderContext,
        entity_type: &EntityType,
        fields: &Record,
    ) -> EngineResult<()> {
        for relationship in entity_type.relationships() {
            let flags = effective_flags(ctx, entity_type.name(), relationship);
            let relation = match flags.mode()? {
                HydrationMode::Suppress => continue,
                HydrationMode::Eager => {
                    Relation::Loaded(self.fetch(relationship, handle, ctx, flags)?)
                }
                HydrationMode::Lazy => Relation::Lazy(Arc::new(LazyRelation::new(
                    relationship.clone(),
                    handle,
                    ctx.clone(),
                ))),
                HydrationMode::Defer => self.defer(relationship, handle, ctx, fields, flags)?,
            };
            tracing::trace!(
                entity_type = entity_type.name(),
                relationship = relationship.name(),
                ?flags,
                "hydrated relationship"
            );
            self.run
                .graph()
                .set_relation(handle, relationship.name(), relation)?;
        }
        Ok(())
    }

    /// Context for reading the target of a relationship.
    fn target_context(
        &self,
        ctx: &ProviderContext,
        relationship: &Relationship,
    ) -> EngineResult<(ProviderContext, Arc<EntityType>)> {
        let container = self.run.container();
        let meta = container.entity_type(relationship.target())?;
        let provider = container.provider_for(relationship.target())?;
        let mut target = ctx
            .with_provider(Arc::clone(provider.provider()))
            .with_entity_type(relationship.target())
            .with_filters(Filters::empty());
        if relationship.cardinality() == Cardinality::Many
            && ctx.entity_type() == Some(relationship.target())
        {
            target = target.with_parent(ctx.last_entity().cloned());
        }
        Ok((target, meta))
    }

    /// Filter locating the children of a to-many relationship.
    ///
    /// `None` means the parent has no id, so there is nothing to find.
    fn children_filter(
        &self,
        relationship: &Relationship,
        ctx: &ProviderContext,
        parent_id: Option<Value>,
        flags: HydrationFlags,
    ) -> EngineResult<Option<Record>> {
        if flags.no_filter() {
            return Ok(Some(Record::new()));
        }
        let Some(id) = parent_id else {
            return Ok(None);
        };
        let parent_type = match ctx.entity_meta() {
            Some(meta) => meta?,
            None => return Ok(None),
        };
        Ok(Some(
            Record::new().with(relationship.filter_key(&parent_type), id),
        ))
    }

    fn defer(
        &self,
        relationship: &Relationship,
        handle: EntityHandle,
        ctx: &ProviderContext,
        fields: &Record,
        flags: HydrationFlags,
    ) -> EngineResult<Relation> {
        let (target, meta) = self.target_context(ctx, relationship)?;
        match relationship.cardinality() {
            Cardinality::One => {
                let Some(fk) = foreign_key(fields, relationship) else {
                    return Ok(Relation::Loaded(Related::One(None)));
                };
                let handles = self.run.registry().defer(self.run, &target, &meta, vec![fk])?;
                Ok(Relation::Loaded(Related::One(handles.first().copied())))
            }
            Cardinality::Many => {
                let parent_id = ctx.last_entity().and_then(|e| e.id.clone());
                let Some(filter) = self.children_filter(relationship, ctx, parent_id, flags)? else {
                    return Ok(Relation::Loaded(Related::Many(Vec::new())));
                };
                let slot = self.run.registry().defer_relationship(
                    self.run,
                    &target,
                    filter,
                    handle,
                    relationship.name(),
                )?;
                Ok(Relation::Deferred(slot))
            }
        }
    }

    /// Loads a relationship now.
    pub(crate) fn fetch(
        &self,
        relationship: &Relationship,
        parent: EntityHandle,
        ctx: &ProviderContext,
        flags: HydrationFlags,
    ) -> EngineResult<Related> {
        let graph = self.run.graph();
        let (target, meta) = self.target_context(ctx, relationship)?;
        match relationship.cardinality() {
            Cardinality::One => {
                let fields = graph.with_entity(parent, |e| e.fields().clone())?;
                let Some(fk) = foreign_key(&fields, relationship) else {
                    return Ok(Related::One(None));
                };
                if let Some(existing) = graph.lookup(target.provider_name(), meta.name(), &fk) {
                    if graph.is_resolved(existing) {
                        return Ok(Related::One(Some(existing)));
                    }
                }
                let op = self.run.operation(&target, SyncOperation::Read)?;
                match self.run.invoke_single(&op, &target, Target::Id(fk.clone()))? {
                    SingleOutcome::Found(record) => {
                        Ok(Related::One(Some(self.build(&target, &meta, record, false)?)))
                    }
                    SingleOutcome::Absent => Err(EngineError::entity_not_found(meta.name(), fk)),
                    SingleOutcome::Emptied => Ok(Related::One(None)),
                }
            }
            Cardinality::Many => {
                let parent_id = graph.with_entity(parent, |e| e.id().cloned())?;
                let Some(filter) = self.children_filter(relationship, ctx, parent_id, flags)? else {
                    return Ok(Related::Many(Vec::new()));
                };
                let call = target.with_filters(Filters::from_record(filter));
                let op = self.run.operation(&call, SyncOperation::ReadList)?;
                let records = self.run.invoke_list(&op, &call, Vec::new())?;
                Ok(Related::Many(self.build_all(&target, &meta, records, false)?))
            }
        }
    }

    /// Reads a relationship property, loading it if it is lazy.
    ///
    /// Returns `None` for relationships that were suppressed.
    pub(crate) fn load(&self, handle: EntityHandle, name: &str) -> EngineResult<Option<Related>> {
        let graph = self.run.graph();
        let (entity_type, relation) =
            graph.with_entity(handle, |e| (e.entity_type().to_string(), e.relation(name).cloned()))?;

        match relation {
            None => {
                self.run
                    .container()
                    .entity_type(&entity_type)?
                    .find_relationship(name)?;
                Ok(None)
            }
            Some(Relation::Loaded(related)) => Ok(Some(related)),
            Some(Relation::Deferred(slot)) => match graph.relationship(slot)? {
                RelationshipNode::Resolved(handles) => Ok(Some(Related::Many(handles))),
                RelationshipNode::Deferred(deferred) => Err(CoreError::Unresolved {
                    entity_type: deferred.entity_type,
                    id: Value::Map(deferred.filter),
                }
                .into()),
            },
            Some(Relation::Lazy(lazy)) => {
                let related = lazy.get_or_try_load(|lazy| {
                    let ctx = lazy.context();
                    let flags =
                        effective_flags(ctx, ctx.entity_type().unwrap_or_default(), lazy.relationship());
                    tracing::debug!(
                        run = %self.run.id(),
                        relationship = lazy.relationship().name(),
                        "loading lazy relationship"
                    );
                    self.fetch(lazy.relationship(), lazy.parent(), ctx, flags)
                })?;
                if lazy.context().deferred_policy() == DeferredEntityPolicy::ResolveLate {
                    self.run.resolve()?;
                }
                Ok(Some(related))
            }
        }
    }
}

fn effective_flags(ctx: &ProviderContext, entity_type: &str, relationship: &Relationship) -> HydrationFlags {
    ctx.hydration_flags(entity_type, relationship.name())
        .unwrap_or_else(|| relationship.default_hydration())
}

fn foreign_key(fields: &Record, relationship: &Relationship) -> Option<Value> {
    fields
        .get(&relationship.foreign_key())
        .filter(|v| v.is_identifier())
        .cloned()
}
