//! Serialization rules and their merge.

use crate::error::{SerializeError, SerializeResult};
use std::fmt;
use std::sync::Arc;

/// Maps an entity type name to the output key its id is written under.
pub type IdKeyFn = dyn Fn(&str) -> SerializeResult<String> + Send + Sync;

/// A field removal entry.
///
/// `path` is dot-separated and matches output key names. With a `rename`
/// the field is kept and written under the new key instead of removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRule {
    /// Entity type the path is relative to; `None` means the root entity.
    pub scope: Option<String>,
    /// Dot-separated output path.
    pub path: String,
    /// Output key to rename to instead of removing.
    pub rename: Option<String>,
}

impl FieldRule {
    /// Path segments, failing on empty segments.
    pub(crate) fn segments(&self) -> SerializeResult<Vec<String>> {
        let segments: Vec<String> = self.path.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(SerializeError::InvalidPath {
                path: self.path.clone(),
            });
        }
        Ok(segments)
    }
}

/// How an entity graph is turned into plain values.
///
/// Flags are optional so that [`apply`](Self::apply) can tell an unset flag
/// from an explicit `false`.
#[derive(Clone, Default)]
pub struct SerializeRules {
    fields: Vec<FieldRule>,
    id_key: Option<Arc<IdKeyFn>>,
    sort_by_key: Option<bool>,
    remove_canonical_id: Option<bool>,
    max_depth: Option<usize>,
}

impl SerializeRules {
    /// Creates empty rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes the field at `path` of the root entity.
    #[must_use]
    pub fn remove(self, path: impl Into<String>) -> Self {
        self.field(FieldRule {
            scope: None,
            path: path.into(),
            rename: None,
        })
    }

    /// Renames the field at `path` of the root entity.
    #[must_use]
    pub fn rename(self, path: impl Into<String>, to: impl Into<String>) -> Self {
        self.field(FieldRule {
            scope: None,
            path: path.into(),
            rename: Some(to.into()),
        })
    }

    /// Removes the field at `path` of every entity of `entity_type`.
    #[must_use]
    pub fn remove_in(self, entity_type: impl Into<String>, path: impl Into<String>) -> Self {
        self.field(FieldRule {
            scope: Some(entity_type.into()),
            path: path.into(),
            rename: None,
        })
    }

    /// Adds a field rule, dropping exact duplicates.
    #[must_use]
    pub fn field(mut self, rule: FieldRule) -> Self {
        if !self.fields.contains(&rule) {
            self.fields.push(rule);
        }
        self
    }

    /// Sets the id-key callback.
    #[must_use]
    pub fn id_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> SerializeResult<String> + Send + Sync + 'static,
    {
        self.id_key = Some(Arc::new(f));
        self
    }

    /// Sorts output keys at every level.
    #[must_use]
    pub fn sort_by_key(mut self, enabled: bool) -> Self {
        self.sort_by_key = Some(enabled);
        self
    }

    /// Drops the canonical id field from the output.
    ///
    /// With an id-key callback the id is still written under the
    /// callback's key.
    #[must_use]
    pub fn remove_canonical_id(mut self, enabled: bool) -> Self {
        self.remove_canonical_id = Some(enabled);
        self
    }

    /// Flattens entities nested deeper than `depth` to their id.
    ///
    /// The root entity is at depth zero.
    #[must_use]
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Field rules, in application order.
    pub fn fields(&self) -> &[FieldRule] {
        &self.fields
    }

    /// The id-key callback, if set.
    pub fn id_key_fn(&self) -> Option<&Arc<IdKeyFn>> {
        self.id_key.as_ref()
    }

    /// Returns true if both rule sets hold the same id-key callback.
    pub fn same_id_key(&self, other: &SerializeRules) -> bool {
        match (&self.id_key, &other.id_key) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Whether output keys are sorted.
    pub fn sorts_keys(&self) -> bool {
        self.sort_by_key.unwrap_or(false)
    }

    /// Whether the canonical id field is dropped.
    pub fn removes_canonical_id(&self) -> bool {
        self.remove_canonical_id.unwrap_or(false)
    }

    /// Depth limit, if any.
    pub fn depth_limit(&self) -> Option<usize> {
        self.max_depth
    }

    /// Merges `other` onto `self`.
    ///
    /// Field rules concatenate with `other`'s after `self`'s. An entry equal
    /// to one already present is dropped, not repeated, so applying the same
    /// rules twice changes nothing. `other`'s id-key callback and flags win
    /// where `other` sets them.
    #[must_use]
    pub fn apply(&self, other: &SerializeRules) -> SerializeRules {
        let mut merged = self.clone();
        for rule in &other.fields {
            if !merged.fields.contains(rule) {
                merged.fields.push(rule.clone());
            }
        }
        if other.id_key.is_some() {
            merged.id_key = other.id_key.clone();
        }
        merged.sort_by_key = other.sort_by_key.or(self.sort_by_key);
        merged.remove_canonical_id = other.remove_canonical_id.or(self.remove_canonical_id);
        merged.max_depth = other.max_depth.or(self.max_depth);
        merged
    }

    /// Output key for the id of `entity_type`, if a callback is set.
    pub(crate) fn id_key_for(&self, entity_type: &str) -> SerializeResult<Option<String>> {
        self.id_key.as_ref().map(|f| f(entity_type)).transpose()
    }
}

impl fmt::Debug for SerializeRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializeRules")
            .field("fields", &self.fields)
            .field("id_key", &self.id_key.is_some())
            .field("sort_by_key", &self.sort_by_key)
            .field("remove_canonical_id", &self.remove_canonical_id)
            .field("max_depth", &self.max_depth)
            .finish()
    }
}
