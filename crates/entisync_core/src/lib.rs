//! # EntiSync Core
//!
//! Core types for the EntiSync entity synchronization engine.
//!
//! This crate provides:
//! - The operation catalog (sync operations, conformity, hydration flags,
//!   deferred and filter policies)
//! - Dynamic [`Value`]s and ordered [`Record`]s
//! - Entity metadata and the [`Container`] that hands it out
//! - The [`Provider`] trait and the [`MethodTable`] providers declare into
//! - The immutable [`ProviderContext`]
//! - Filter normalization and claim tracking
//! - The per-run [`EntityGraph`] arena
//! - The key-conformity [`KeyMapper`]
//!
//! ## Key Invariants
//!
//! - Contexts are never mutated; every `with_*` returns a new one
//! - One graph handle per backend entity per run
//! - Graph slots are written at most once by resolution

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod context;
mod entity;
mod error;
mod filter;
mod graph;
mod mapper;
mod naming;
mod provider;
mod value;

pub use catalog::{
    Conformity, DeferredEntityPolicy, FilterPolicy, HydrationFlags, HydrationMode, SyncOperation,
};
pub use context::{ContextEntity, ProviderContext};
pub use entity::{Cardinality, Container, EntityType, RegisteredProvider, Relationship};
pub use error::{CoreError, CoreResult, ProviderError, ProviderResult};
pub use filter::{FilterArg, Filters};
pub use graph::{
    DeferredEntity, DeferredRelationship, Entity, EntityGraph, EntityHandle, Inserted,
    LazyRelation, Node, Related, Relation, RelationshipHandle, RelationshipNode,
};
pub use mapper::{KeyMapper, MapperFlags};
pub use naming::{pluralize, snake_case};
pub use provider::{ListFn, Method, MethodKind, MethodTable, Provider, SingleFn, Target};
pub use value::{Record, Value};
