//! Operation catalog and policy enumerations.

use crate::error::{CoreError, CoreResult};
use crate::value::Record;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of operation a provider can perform for an entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    /// Create one entity.
    Create,
    /// Read one entity by id.
    Read,
    /// Update one entity.
    Update,
    /// Delete one entity.
    Delete,
    /// Create a list of entities.
    CreateList,
    /// Read a (filtered) list of entities.
    ReadList,
    /// Update a list of entities.
    UpdateList,
    /// Delete a list of entities.
    DeleteList,
}

impl SyncOperation {
    /// Every operation.
    pub const ALL: [SyncOperation; 8] = [
        SyncOperation::Create,
        SyncOperation::Read,
        SyncOperation::Update,
        SyncOperation::Delete,
        SyncOperation::CreateList,
        SyncOperation::ReadList,
        SyncOperation::UpdateList,
        SyncOperation::DeleteList,
    ];

    /// Operations on lists of entities.
    pub const ALL_LIST: [SyncOperation; 4] = [
        SyncOperation::CreateList,
        SyncOperation::ReadList,
        SyncOperation::UpdateList,
        SyncOperation::DeleteList,
    ];

    /// Operations that only read.
    pub const ALL_READ: [SyncOperation; 2] = [SyncOperation::Read, SyncOperation::ReadList];

    /// Operations that write.
    pub const ALL_WRITE: [SyncOperation; 6] = [
        SyncOperation::Create,
        SyncOperation::Update,
        SyncOperation::Delete,
        SyncOperation::CreateList,
        SyncOperation::UpdateList,
        SyncOperation::DeleteList,
    ];

    /// Returns true for the `_LIST` operations.
    pub fn is_list(self) -> bool {
        Self::ALL_LIST.contains(&self)
    }

    /// Returns true for `READ` and `READ_LIST`.
    pub fn is_read(self) -> bool {
        Self::ALL_READ.contains(&self)
    }

    /// Returns true for every operation except the reads.
    pub fn is_write(self) -> bool {
        !self.is_read()
    }

    /// The single-entity counterpart of this operation.
    pub fn single(self) -> Self {
        match self {
            SyncOperation::CreateList => SyncOperation::Create,
            SyncOperation::ReadList => SyncOperation::Read,
            SyncOperation::UpdateList => SyncOperation::Update,
            SyncOperation::DeleteList => SyncOperation::Delete,
            op => op,
        }
    }

    /// The list counterpart of this operation.
    pub fn list(self) -> Self {
        match self {
            SyncOperation::Create => SyncOperation::CreateList,
            SyncOperation::Read => SyncOperation::ReadList,
            SyncOperation::Update => SyncOperation::UpdateList,
            SyncOperation::Delete => SyncOperation::DeleteList,
            op => op,
        }
    }

    /// Verb used when deriving provider method names.
    pub fn verb(self) -> &'static str {
        match self.single() {
            SyncOperation::Create => "create",
            SyncOperation::Read => "get",
            SyncOperation::Update => "update",
            _ => "delete",
        }
    }

    /// Stable lower-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            SyncOperation::Create => "create",
            SyncOperation::Read => "read",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
            SyncOperation::CreateList => "create_list",
            SyncOperation::ReadList => "read_list",
            SyncOperation::UpdateList => "update_list",
            SyncOperation::DeleteList => "delete_list",
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether every record in a list shares an identical key sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conformity {
    /// Records may have different keys; inspect each one.
    #[default]
    None,
    /// Records share a key set, but not necessarily its order.
    Partial,
    /// Records share the same keys in the same order.
    Complete,
}

impl Conformity {
    /// Inspects `records` and reports their conformity.
    ///
    /// Empty and single-record lists are trivially complete.
    pub fn detect(records: &[Record]) -> Self {
        let Some(first) = records.first() else {
            return Conformity::Complete;
        };
        let first_keys: Vec<&str> = first.keys().collect();
        let mut sorted_first = first_keys.clone();
        sorted_first.sort_unstable();

        let mut conformity = Conformity::Complete;
        for record in &records[1..] {
            if record.keys().eq(first_keys.iter().copied()) {
                continue;
            }
            let mut keys: Vec<&str> = record.keys().collect();
            keys.sort_unstable();
            if keys != sorted_first {
                return Conformity::None;
            }
            conformity = Conformity::Partial;
        }
        conformity
    }

    /// Returns true if a key plan may be reused across records.
    pub fn is_complete(self) -> bool {
        self == Conformity::Complete
    }
}

bitflags! {
    /// How and when a relationship property is populated.
    ///
    /// Exactly one of `SUPPRESS`, `LAZY`, `DEFER` and `EAGER` should be set;
    /// `NO_FILTER` is a modifier.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HydrationFlags: u8 {
        /// Never populate.
        const SUPPRESS = 1;
        /// Populate on first access.
        const LAZY = 1 << 1;
        /// Populate according to the active [`DeferredEntityPolicy`].
        const DEFER = 1 << 2;
        /// Populate while the entity is being built.
        const EAGER = 1 << 3;
        /// Do not pass the parent filter to the hydrating read.
        const NO_FILTER = 1 << 4;
    }
}

/// The mode selected by a [`HydrationFlags`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HydrationMode {
    /// Leave the property unset.
    Suppress,
    /// Install an on-access trigger.
    Lazy,
    /// Hand the relationship to the deferred registry.
    Defer,
    /// Load immediately.
    Eager,
}

impl HydrationFlags {
    const MODES: HydrationFlags = HydrationFlags::SUPPRESS
        .union(HydrationFlags::LAZY)
        .union(HydrationFlags::DEFER)
        .union(HydrationFlags::EAGER);

    /// Returns the selected mode, failing unless exactly one is set.
    pub fn mode(self) -> CoreResult<HydrationMode> {
        let modes = self.intersection(Self::MODES);
        if modes == HydrationFlags::SUPPRESS {
            Ok(HydrationMode::Suppress)
        } else if modes == HydrationFlags::LAZY {
            Ok(HydrationMode::Lazy)
        } else if modes == HydrationFlags::DEFER {
            Ok(HydrationMode::Defer)
        } else if modes == HydrationFlags::EAGER {
            Ok(HydrationMode::Eager)
        } else {
            Err(CoreError::InvalidHydrationFlags { bits: self.bits() })
        }
    }

    /// Returns true if the `NO_FILTER` modifier is set.
    pub fn no_filter(self) -> bool {
        self.contains(HydrationFlags::NO_FILTER)
    }
}

impl Default for HydrationFlags {
    fn default() -> Self {
        HydrationFlags::DEFER
    }
}

/// When deferred entities are turned into real ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferredEntityPolicy {
    /// Never resolve automatically.
    DoNotResolve,
    /// Resolve as soon as placeholders are created.
    ResolveEarly,
    /// Resolve when the top-level operation completes.
    #[default]
    ResolveLate,
}

/// What happens when caller-supplied filter keys are not claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterPolicy {
    /// Return the provider's result unmodified.
    Ignore,
    /// Fail with a filter policy violation.
    #[default]
    ThrowException,
    /// Discard the result and return nothing.
    ReturnEmpty,
    /// Apply unclaimed keys as equality predicates to the result.
    FilterLocally,
}
