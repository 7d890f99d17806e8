//! # EntiSync Serialize
//!
//! Converts entity graphs into plain [`Value`](entisync_core::Value) trees.
//!
//! This crate provides:
//! - [`SerializeRules`]: field removal and renaming by output path, id-key
//!   renaming, key sorting and depth limits, merged with [`SerializeRules::apply`]
//! - [`Serializer`]: the cycle-safe graph walk, with per-type rules
//! - JSON and CBOR export of plain values
//!
//! ## Key Invariants
//!
//! - Serialization never performs I/O: unresolved placeholders render as
//!   their id, missing ones as null, unloaded lazy relationships are omitted
//! - An entity already being serialized further up the current path renders
//!   as a circular reference token instead of recursing
//! - Merging rules is right-biased for the id-key callback and flags

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod export;
mod plain;
mod rules;

pub use error::{SerializeError, SerializeResult};
pub use export::{from_json, to_cbor, to_json, to_json_pretty};
pub use plain::{to_plain, Serializer, CIRCULAR_REFERENCE};
pub use rules::{FieldRule, IdKeyFn, SerializeRules};
