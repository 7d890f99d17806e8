//! # EntiSync Engine
//!
//! Operation dispatch, deferred resolution and hydration for EntiSync.
//!
//! This crate provides:
//! - The operation dispatcher (convention-named provider methods, cached)
//! - The filter policy enforcer
//! - The deferred resolution registry
//! - The hydration controller
//! - The [`SyncEngine`] facade and per-[`Run`] state
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entisync_engine::{EngineConfig, SyncEngine};
//!
//! let engine = SyncEngine::with_config(container, EngineConfig::default());
//! let run = engine.run();
//! let user = run.get("User", 1)?.expect("read");
//! let posts = run.related(user, "posts")?;
//! ```
//!
//! ## Key Invariants
//!
//! - Dispatch results, misses included, are cached per
//!   (provider, entity type, operation)
//! - A placeholder is written at most once
//! - A lazy relationship is fetched at most once
//! - Unclaimed filter keys are never silently dropped unless the policy
//!   is `IGNORE`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dispatcher;
mod enforcer;
mod engine;
mod error;
mod hydration;
mod registry;

pub use config::EngineConfig;
pub use dispatcher::{method_name, DispatchStats, Dispatcher, Operation};
pub use enforcer::SingleOutcome;
pub use engine::{Run, RunId, RunStats, SyncEngine};
pub use error::{EngineError, EngineResult};
pub use registry::{DeferredRegistry, ResolveReport};
