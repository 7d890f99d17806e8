//! Deferred resolution registry.
//!
//! Placeholders are registered against a (provider, entity type) group.
//! Resolving issues one `READ_LIST` per group, filtered by the pending ids,
//! and builds the returned records into the graph, which fills each
//! placeholder's slot in place. Placeholders nothing came back for are
//! marked missing.

use crate::engine::Run;
use crate::enforcer::SingleOutcome;
use crate::error::{EngineError, EngineResult};
use entisync_core::{
    Conformity, DeferredEntity, DeferredEntityPolicy, DeferredRelationship, EntityHandle,
    EntityType, FilterPolicy, Filters, Node, ProviderContext, Record, RelationshipHandle,
    RelationshipNode, SyncOperation, Target, Value,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::AddAssign;

type GroupKey = (String, String);

/// Summary of a `resolve` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// Passes run; each pass drains everything outstanding at its start.
    pub passes: u32,
    /// Placeholders filled with an entity.
    pub resolved: usize,
    /// Placeholders marked missing.
    pub missing: usize,
    /// Deferred relationships filled.
    pub relationships: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct GroupOutcome {
    resolved: usize,
    missing: usize,
}

impl AddAssign for GroupOutcome {
    fn add_assign(&mut self, rhs: Self) {
        self.resolved += rhs.resolved;
        self.missing += rhs.missing;
    }
}

/// Outstanding placeholders of one run.
///
/// Resolution drains a group under the registry lock, so a `defer` racing
/// with resolution lands in the next pass rather than in the batch being
/// fetched.
#[derive(Debug, Default)]
pub struct DeferredRegistry {
    groups: Mutex<BTreeMap<GroupKey, Vec<EntityHandle>>>,
    relationships: Mutex<Vec<RelationshipHandle>>,
}

impl DeferredRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of outstanding placeholders and relationships.
    pub fn pending(&self) -> usize {
        let entities: usize = self.groups.lock().values().map(Vec::len).sum();
        entities + self.relationships.lock().len()
    }

    /// Returns true if anything is waiting to be resolved.
    pub fn has_pending(&self) -> bool {
        self.pending() > 0
    }

    /// Creates one placeholder per id.
    ///
    /// Ids the run already knows reuse the existing handle. `ctx` must be a
    /// context of the provider serving `entity_type`.
    pub(crate) fn defer(
        &self,
        run: &Run,
        ctx: &ProviderContext,
        entity_type: &EntityType,
        ids: Vec<Value>,
    ) -> EngineResult<Vec<EntityHandle>> {
        let key = (ctx.provider_name().to_string(), entity_type.name().to_string());
        let mut handles = Vec::with_capacity(ids.len());
        {
            let mut groups = self.groups.lock();
            for id in ids {
                let handle = run.graph().insert_deferred(DeferredEntity {
                    entity_type: key.1.clone(),
                    provider: key.0.clone(),
                    id,
                    context: ctx.clone(),
                });
                if matches!(run.graph().node(handle)?, Node::Deferred(_)) {
                    let group = groups.entry(key.clone()).or_default();
                    if !group.contains(&handle) {
                        group.push(handle);
                    }
                }
                handles.push(handle);
            }
        }
        tracing::debug!(
            run = %run.id(),
            provider = %key.0,
            entity_type = %key.1,
            count = handles.len(),
            "deferred entities"
        );

        if ctx.deferred_policy() == DeferredEntityPolicy::ResolveEarly {
            self.resolve(run)?;
        }
        Ok(handles)
    }

    /// Creates a placeholder for a list of related entities.
    pub(crate) fn defer_relationship(
        &self,
        run: &Run,
        ctx: &ProviderContext,
        filter: Record,
        parent: EntityHandle,
        name: &str,
    ) -> EngineResult<RelationshipHandle> {
        let handle = run.graph().insert_relationship(DeferredRelationship {
            entity_type: ctx.entity_type().unwrap_or_default().to_string(),
            provider: ctx.provider_name().to_string(),
            filter,
            parent,
            name: name.to_string(),
            context: ctx.clone(),
        });
        self.relationships.lock().push(handle);

        if ctx.deferred_policy() == DeferredEntityPolicy::ResolveEarly {
            self.resolve(run)?;
        }
        Ok(handle)
    }

    /// Resolves everything outstanding.
    ///
    /// Entities built during a pass may defer more; passes continue until
    /// nothing is outstanding or the configured pass limit is reached.
    pub(crate) fn resolve(&self, run: &Run) -> EngineResult<ResolveReport> {
        let mut report = ResolveReport::default();
        while report.passes < run.config().max_resolution_passes {
            let groups = std::mem::take(&mut *self.groups.lock());
            let relationships = std::mem::take(&mut *self.relationships.lock());
            if groups.is_empty() && relationships.is_empty() {
                break;
            }
            report.passes += 1;

            let drained = (groups.clone(), relationships.clone());
            if let Err(err) = self.resolve_pass(run, groups, relationships, &mut report) {
                self.requeue(run, drained.0, drained.1);
                tracing::debug!(
                    run = %run.id(),
                    pending = self.pending(),
                    error = %err,
                    "resolution pass failed, outstanding work requeued"
                );
                return Err(err);
            }
        }

        if self.has_pending() {
            tracing::warn!(
                run = %run.id(),
                passes = report.passes,
                pending = self.pending(),
                "placeholders still outstanding after pass limit"
            );
        }
        run.record_resolution(&report);
        Ok(report)
    }

    fn resolve_pass(
        &self,
        run: &Run,
        groups: BTreeMap<GroupKey, Vec<EntityHandle>>,
        relationships: Vec<RelationshipHandle>,
        report: &mut ResolveReport,
    ) -> EngineResult<()> {
        let outcome = self.resolve_groups(run, groups)?;
        report.resolved += outcome.resolved;
        report.missing += outcome.missing;

        for handle in relationships {
            if self.resolve_relationship(run, handle)? {
                report.relationships += 1;
            }
        }
        Ok(())
    }

    /// Puts back whatever a failed pass left unresolved.
    fn requeue(
        &self,
        run: &Run,
        groups: BTreeMap<GroupKey, Vec<EntityHandle>>,
        relationships: Vec<RelationshipHandle>,
    ) {
        for (key, handles) in groups {
            for handle in handles {
                if matches!(run.graph().node(handle), Ok(Node::Deferred(_))) {
                    self.track(&key.0, &key.1, handle);
                }
            }
        }
        let mut queue = self.relationships.lock();
        for handle in relationships {
            let unresolved = matches!(
                run.graph().relationship(handle),
                Ok(RelationshipNode::Deferred(_))
            );
            if unresolved && !queue.contains(&handle) {
                queue.push(handle);
            }
        }
    }

    /// Registers an existing placeholder for resolution.
    pub(crate) fn track(&self, provider: &str, entity_type: &str, handle: EntityHandle) {
        let mut groups = self.groups.lock();
        let group = groups
            .entry((provider.to_string(), entity_type.to_string()))
            .or_default();
        if !group.contains(&handle) {
            group.push(handle);
        }
    }

    fn resolve_groups(
        &self,
        run: &Run,
        groups: BTreeMap<GroupKey, Vec<EntityHandle>>,
    ) -> EngineResult<GroupOutcome> {
        let mut total = GroupOutcome::default();
        if !run.config().parallel_resolution || groups.len() < 2 {
            for (key, handles) in groups {
                total += self.resolve_group(run, &key, handles)?;
            }
            return Ok(total);
        }

        std::thread::scope(|scope| {
            let workers: Vec<_> = groups
                .into_iter()
                .map(|(key, handles)| scope.spawn(move || self.resolve_group(run, &key, handles)))
                .collect();
            for worker in workers {
                match worker.join() {
                    Ok(outcome) => total += outcome?,
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            Ok(total)
        })
    }

    fn resolve_group(
        &self,
        run: &Run,
        key: &GroupKey,
        handles: Vec<EntityHandle>,
    ) -> EngineResult<GroupOutcome> {
        let mut pending: Vec<(EntityHandle, DeferredEntity)> = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Node::Deferred(deferred) = run.graph().node(handle)? {
                pending.push((handle, deferred));
            }
        }
        let Some((_, first)) = pending.first() else {
            return Ok(GroupOutcome::default());
        };

        let (provider_name, type_name) = key;
        let meta = run.container().entity_type(type_name)?;
        let provider = run.container().provider(provider_name)?;
        let base = first.context.clone();
        let context_for = |id: Option<&Value>| {
            id.and_then(|id| pending.iter().find(|(_, d)| &d.id == id))
                .map(|(_, d)| d.context.clone())
                .unwrap_or_else(|| base.clone())
        };

        tracing::debug!(
            run = %run.id(),
            provider = %provider_name,
            entity_type = %type_name,
            ids = pending.len(),
            "resolving deferred group"
        );

        if run
            .dispatcher()
            .has_operation(provider, &meta, SyncOperation::ReadList)
        {
            let ids = Value::Array(pending.iter().map(|(_, d)| d.id.clone()).collect());
            let ctx = base
                .with_filter_policy(FilterPolicy::FilterLocally)
                .with_filters(Filters::from_record(Record::new().with(meta.id_key(), ids)));
            let op = run
                .dispatcher()
                .resolve(provider, &meta, SyncOperation::ReadList)?;
            let records = run.invoke_list(&op, &ctx, Vec::new())?;
            let conformity = Conformity::detect(&records);
            for record in records {
                let ctx = context_for(meta.id_of(&record)).with_conformity(conformity);
                run.hydrator().build(&ctx, &meta, record, false)?;
            }
        } else {
            let op = run.dispatcher().resolve(provider, &meta, SyncOperation::Read)?;
            for (_, deferred) in &pending {
                let ctx = deferred.context.with_filters(Filters::empty());
                match run.invoke_single(&op, &ctx, Target::Id(deferred.id.clone())) {
                    Ok(SingleOutcome::Found(record)) => {
                        run.hydrator().build(&deferred.context, &meta, record, false)?;
                    }
                    Ok(SingleOutcome::Absent) | Err(EngineError::EntityNotFound { .. }) => {
                        tracing::trace!(
                            run = %run.id(),
                            entity_type = %type_name,
                            id = %deferred.id,
                            "read returned nothing"
                        );
                    }
                    Ok(SingleOutcome::Emptied) => {
                        tracing::debug!(
                            run = %run.id(),
                            entity_type = %type_name,
                            id = %deferred.id,
                            "read result discarded by filter policy"
                        );
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        let mut outcome = GroupOutcome::default();
        for (handle, deferred) in &pending {
            if run.graph().is_resolved(*handle) {
                outcome.resolved += 1;
            } else if run.graph().mark_missing(*handle)? {
                tracing::debug!(
                    run = %run.id(),
                    entity_type = %deferred.entity_type,
                    id = %deferred.id,
                    "deferred entity not found"
                );
                outcome.missing += 1;
            }
        }
        Ok(outcome)
    }

    fn resolve_relationship(&self, run: &Run, handle: RelationshipHandle) -> EngineResult<bool> {
        let RelationshipNode::Deferred(deferred) = run.graph().relationship(handle)? else {
            return Ok(false);
        };
        let meta = run.container().entity_type(&deferred.entity_type)?;
        let ctx = deferred
            .context
            .with_filters(Filters::from_record(deferred.filter.clone()));
        let op = run.operation(&ctx, SyncOperation::ReadList)?;
        let records = run.invoke_list(&op, &ctx, Vec::new())?;
        let handles = run
            .hydrator()
            .build_all(&deferred.context, &meta, records, false)?;
        tracing::trace!(
            run = %run.id(),
            relationship = %deferred.name,
            count = handles.len(),
            "resolved deferred relationship"
        );
        Ok(run.graph().resolve_relationship(handle, handles)?)
    }
}
