//! Engine facade and per-run state.

use crate::config::EngineConfig;
use crate::dispatcher::{Dispatcher, Operation};
use crate::enforcer::{self, SingleOutcome};
use crate::error::{EngineError, EngineResult};
use crate::hydration::Hydrator;
use crate::registry::{DeferredRegistry, ResolveReport};
use entisync_core::{
    Conformity, Container, CoreError, DeferredEntityPolicy, Entity, EntityGraph, EntityHandle,
    EntityType, FilterArg, Filters, ProviderContext, Record, Related, SyncOperation, Target,
    Value,
};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identifies one run, for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(Uuid);

impl RunId {
    /// Generates a new random run id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Statistics about a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Provider methods called.
    pub provider_calls: u64,
    /// Entities built into the graph.
    pub entities_built: u64,
    /// Placeholders filled by resolution.
    pub placeholders_resolved: u64,
    /// Placeholders marked missing by resolution.
    pub placeholders_missing: u64,
    /// Resolution passes run.
    pub resolution_passes: u64,
}

/// The sync engine: a container of entity types and providers, a shared
/// dispatcher, and the configuration runs start from.
#[derive(Debug)]
pub struct SyncEngine {
    container: Arc<Container>,
    dispatcher: Arc<Dispatcher>,
    config: EngineConfig,
}

impl SyncEngine {
    /// Creates an engine with the default configuration.
    pub fn new(container: impl Into<Arc<Container>>) -> Self {
        Self::with_config(container, EngineConfig::default())
    }

    /// Creates an engine.
    pub fn with_config(container: impl Into<Arc<Container>>, config: EngineConfig) -> Self {
        Self {
            container: container.into(),
            dispatcher: Arc::new(Dispatcher::new(config.synthesize_read)),
            config,
        }
    }

    /// The container.
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// The shared dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns true if the provider bound to `entity_type` implements
    /// `operation`, declared or synthesized.
    pub fn has_operation(&self, entity_type: &str, operation: SyncOperation) -> EngineResult<bool> {
        let meta = self.container.entity_type(entity_type)?;
        let provider = self.container.provider_for(entity_type)?;
        Ok(self.dispatcher.has_operation(provider, &meta, operation))
    }

    /// Starts a run with its own entity graph and deferred registry.
    pub fn run(&self) -> Run {
        let run = Run {
            id: RunId::new(),
            container: Arc::clone(&self.container),
            dispatcher: Arc::clone(&self.dispatcher),
            config: self.config.clone(),
            graph: EntityGraph::new(),
            registry: DeferredRegistry::new(),
            stats: RwLock::new(RunStats::default()),
        };
        tracing::debug!(run = %run.id, "started run");
        run
    }
}

/// One unit of work: every entity read, written or deferred through a run
/// lives in its graph, with one handle per backend entity.
pub struct Run {
    id: RunId,
    container: Arc<Container>,
    dispatcher: Arc<Dispatcher>,
    config: EngineConfig,
    graph: EntityGraph,
    registry: DeferredRegistry,
    stats: RwLock<RunStats>,
}

impl Run {
    /// The run id.
    pub fn id(&self) -> RunId {
        self.id
    }

    /// The run's entity graph.
    pub fn graph(&self) -> &EntityGraph {
        &self.graph
    }

    /// The container.
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// The configuration this run started with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Statistics so far.
    pub fn stats(&self) -> RunStats {
        self.stats.read().clone()
    }

    /// Number of placeholders and deferred relationships outstanding.
    pub fn pending(&self) -> usize {
        self.registry.pending()
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub(crate) fn registry(&self) -> &DeferredRegistry {
        &self.registry
    }

    pub(crate) fn hydrator(&self) -> Hydrator<'_> {
        Hydrator::new(self)
    }

    /// Creates a root context for the provider bound to `entity_type`,
    /// carrying the configured policies.
    pub fn context(&self, entity_type: &str) -> EngineResult<ProviderContext> {
        let meta = self.container.entity_type(entity_type)?;
        let provider = self.container.provider_for(meta.name())?;
        Ok(
            ProviderContext::new(Arc::clone(provider.provider()), Arc::clone(&self.container))
                .with_entity_type(meta.name())
                .with_deferred_policy(self.config.deferred_policy)
                .with_filter_policy(self.config.filter_policy),
        )
    }

    /// Reads one entity by id.
    ///
    /// Fails with `EntityNotFound` if the provider has no such entity.
    /// Returns `None` only when the filter policy discarded the result.
    pub fn read(
        &self,
        ctx: &ProviderContext,
        id: impl Into<Value>,
        args: &[FilterArg],
    ) -> EngineResult<Option<EntityHandle>> {
        let id = id.into();
        let op = self.operation(ctx, SyncOperation::Read)?;
        let call = ctx.with_filters(Filters::from_args(args)?);
        let handle = match self.invoke_single(&op, &call, Target::Id(id.clone()))? {
            SingleOutcome::Found(record) => {
                Some(self.hydrator().build(ctx, op.entity_type(), record, false)?)
            }
            SingleOutcome::Absent => {
                return Err(EngineError::entity_not_found(op.entity_type().name(), id))
            }
            SingleOutcome::Emptied => None,
        };
        self.finish(ctx)?;
        Ok(handle)
    }

    /// Reads a list of entities.
    pub fn read_list(&self, ctx: &ProviderContext, args: &[FilterArg]) -> EngineResult<Vec<EntityHandle>> {
        let op = self.operation(ctx, SyncOperation::ReadList)?;
        let call = ctx.with_filters(Filters::from_args(args)?);
        let records = self.invoke_list(&op, &call, Vec::new())?;
        let handles = self.hydrator().build_all(ctx, op.entity_type(), records, false)?;
        self.finish(ctx)?;
        Ok(handles)
    }

    /// Creates an entity; returns the stored entity if the provider
    /// returned one.
    pub fn create(
        &self,
        ctx: &ProviderContext,
        record: Record,
        args: &[FilterArg],
    ) -> EngineResult<Option<EntityHandle>> {
        self.write(ctx, SyncOperation::Create, record, args)
    }

    /// Updates an entity; returns the stored entity if the provider
    /// returned one.
    pub fn update(
        &self,
        ctx: &ProviderContext,
        record: Record,
        args: &[FilterArg],
    ) -> EngineResult<Option<EntityHandle>> {
        self.write(ctx, SyncOperation::Update, record, args)
    }

    /// Deletes an entity by id or record; returns whatever the provider
    /// returned.
    pub fn delete(
        &self,
        ctx: &ProviderContext,
        target: Target,
        args: &[FilterArg],
    ) -> EngineResult<Option<Record>> {
        let op = self.operation(ctx, SyncOperation::Delete)?;
        let call = ctx.with_filters(Filters::from_args(args)?);
        let deleted = self.invoke_single(&op, &call, target)?.into_record();
        self.finish(ctx)?;
        Ok(deleted)
    }

    /// Creates a list of entities.
    pub fn create_list(
        &self,
        ctx: &ProviderContext,
        records: Vec<Record>,
        args: &[FilterArg],
    ) -> EngineResult<Vec<EntityHandle>> {
        self.write_list(ctx, SyncOperation::CreateList, records, args)
    }

    /// Updates a list of entities.
    pub fn update_list(
        &self,
        ctx: &ProviderContext,
        records: Vec<Record>,
        args: &[FilterArg],
    ) -> EngineResult<Vec<EntityHandle>> {
        self.write_list(ctx, SyncOperation::UpdateList, records, args)
    }

    /// Deletes a list of entities; returns whatever the provider returned.
    pub fn delete_list(
        &self,
        ctx: &ProviderContext,
        records: Vec<Record>,
        args: &[FilterArg],
    ) -> EngineResult<Vec<Record>> {
        let op = self.operation(ctx, SyncOperation::DeleteList)?;
        let call = ctx
            .with_conformity(Conformity::detect(&records))
            .with_filters(Filters::from_args(args)?);
        let deleted = self.invoke_list(&op, &call, records)?;
        self.finish(ctx)?;
        Ok(deleted)
    }

    /// Reads one entity of `entity_type` through a fresh root context.
    pub fn get(&self, entity_type: &str, id: impl Into<Value>) -> EngineResult<Option<EntityHandle>> {
        self.read(&self.context(entity_type)?, id, &[])
    }

    /// Reads entities of `entity_type` through a fresh root context.
    pub fn get_list(&self, entity_type: &str, args: &[FilterArg]) -> EngineResult<Vec<EntityHandle>> {
        self.read_list(&self.context(entity_type)?, args)
    }

    /// Creates placeholders for `ids` of `entity_type`.
    ///
    /// Under `RESOLVE_EARLY` they are resolved before this returns.
    pub fn defer(
        &self,
        ctx: &ProviderContext,
        entity_type: &str,
        ids: Vec<Value>,
    ) -> EngineResult<Vec<EntityHandle>> {
        let meta = self.container.entity_type(entity_type)?;
        let provider = self.container.provider_for(meta.name())?;
        let target = ctx
            .with_provider(Arc::clone(provider.provider()))
            .with_entity_type(meta.name());
        self.registry.defer(self, &target, &meta, ids)
    }

    /// Resolves every outstanding placeholder and deferred relationship.
    pub fn resolve(&self) -> EngineResult<ResolveReport> {
        self.registry.resolve(self)
    }

    /// A built entity.
    ///
    /// Dereferencing a placeholder fails: `EntityNotFound` once resolution
    /// found nothing for it, an unresolved error before that.
    pub fn entity(&self, handle: EntityHandle) -> EngineResult<Entity> {
        Ok(self.graph.entity(handle)?)
    }

    /// Reads a relationship property, running a lazy load on first access.
    ///
    /// `None` means the relationship was suppressed.
    pub fn load_relation(&self, handle: EntityHandle, name: &str) -> EngineResult<Option<Related>> {
        self.hydrator().load(handle, name)
    }

    /// Handles of the entities a relationship points at.
    pub fn related(&self, handle: EntityHandle, name: &str) -> EngineResult<Vec<EntityHandle>> {
        Ok(self
            .load_relation(handle, name)?
            .map(|related| related.handles())
            .unwrap_or_default())
    }

    /// Resolves a provider operation for the context's entity type.
    pub fn operation(&self, ctx: &ProviderContext, operation: SyncOperation) -> EngineResult<Operation> {
        let meta = self.meta(ctx)?;
        let provider = self.container.provider(ctx.provider_name())?;
        self.dispatcher.resolve(provider, &meta, operation)
    }

    fn meta(&self, ctx: &ProviderContext) -> EngineResult<Arc<EntityType>> {
        match ctx.entity_meta() {
            Some(meta) => Ok(meta?),
            None => Err(CoreError::unknown_entity_type("<context has no entity type>").into()),
        }
    }

    fn write(
        &self,
        ctx: &ProviderContext,
        operation: SyncOperation,
        record: Record,
        args: &[FilterArg],
    ) -> EngineResult<Option<EntityHandle>> {
        let op = self.operation(ctx, operation)?;
        let call = ctx.with_filters(Filters::from_args(args)?);
        let handle = match self.invoke_single(&op, &call, Target::Record(record))?.into_record() {
            Some(stored) => Some(self.hydrator().build(ctx, op.entity_type(), stored, true)?),
            None => None,
        };
        self.finish(ctx)?;
        Ok(handle)
    }

    fn write_list(
        &self,
        ctx: &ProviderContext,
        operation: SyncOperation,
        records: Vec<Record>,
        args: &[FilterArg],
    ) -> EngineResult<Vec<EntityHandle>> {
        let op = self.operation(ctx, operation)?;
        let call = ctx
            .with_conformity(Conformity::detect(&records))
            .with_filters(Filters::from_args(args)?);
        let stored = self.invoke_list(&op, &call, records)?;
        let handles = self.hydrator().build_all(ctx, op.entity_type(), stored, true)?;
        self.finish(ctx)?;
        Ok(handles)
    }

    /// Runs late resolution when a top-level operation completes.
    fn finish(&self, ctx: &ProviderContext) -> EngineResult<()> {
        if ctx.deferred_policy() == DeferredEntityPolicy::ResolveLate && self.registry.has_pending() {
            self.resolve()?;
        }
        Ok(())
    }

    pub(crate) fn invoke_single(
        &self,
        op: &Operation,
        ctx: &ProviderContext,
        target: Target,
    ) -> EngineResult<SingleOutcome> {
        self.record_call(op);
        enforcer::call_single(op, ctx, target)
    }

    pub(crate) fn invoke_list(
        &self,
        op: &Operation,
        ctx: &ProviderContext,
        input: Vec<Record>,
    ) -> EngineResult<Vec<Record>> {
        self.record_call(op);
        enforcer::call_list(op, ctx, input)
    }

    fn record_call(&self, op: &Operation) {
        self.stats.write().provider_calls += 1;
        tracing::debug!(
            run = %self.id,
            provider = op.provider(),
            entity_type = op.entity_type().name(),
            operation = %op.operation(),
            synthesized = op.is_synthesized(),
            "calling provider"
        );
    }

    pub(crate) fn record_built(&self) {
        self.stats.write().entities_built += 1;
    }

    pub(crate) fn record_resolution(&self, report: &ResolveReport) {
        let mut stats = self.stats.write();
        stats.resolution_passes += u64::from(report.passes);
        stats.placeholders_resolved += report.resolved as u64;
        stats.placeholders_missing += report.missing as u64;
    }
}

impl fmt::Debug for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Run")
            .field("id", &self.id)
            .field("entities", &self.graph.len())
            .field("pending", &self.registry.pending())
            .field("stats", &self.stats())
            .finish()
    }
}
