//! Key-conformity mapper.
//!
//! Renames record keys through a key map, one input key to one or more
//! output keys. When a batch is [`Conformity::Complete`] the key plan worked
//! out for the first record is reused positionally for the rest.

use crate::catalog::Conformity;
use crate::error::{CoreError, CoreResult};
use crate::value::{Record, Value};
use bitflags::bitflags;
use std::collections::HashSet;

bitflags! {
    /// Mapping options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MapperFlags: u8 {
        /// Drop outputs whose value is null.
        const REMOVE_NULL = 1;
        /// Copy input keys that are not in the key map.
        const ADD_UNMAPPED = 1 << 1;
        /// Emit null for mapped keys absent from the input.
        const ADD_MISSING = 1 << 2;
        /// Fail when a mapped key is absent from the input.
        const REQUIRE_MAPPED = 1 << 3;
    }
}

/// A key map plus mapping flags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyMapper {
    keys: Vec<(String, Vec<String>)>,
    flags: MapperFlags,
}

#[derive(Debug)]
enum Step {
    Map(usize),
    Copy,
    Drop,
}

/// Resolved per-position actions for records with one key layout.
#[derive(Debug)]
struct Plan {
    steps: Vec<Step>,
    missing: Vec<usize>,
}

impl KeyMapper {
    /// Creates an empty mapper.
    pub fn new(flags: MapperFlags) -> Self {
        Self {
            keys: Vec::new(),
            flags,
        }
    }

    /// Maps `input` to `output`.
    #[must_use]
    pub fn key(self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.keys(input, [output])
    }

    /// Maps `input` to each of `outputs`.
    #[must_use]
    pub fn keys<I, S>(mut self, input: impl Into<String>, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let input = input.into();
        let outputs: Vec<String> = outputs.into_iter().map(Into::into).collect();
        match self.keys.iter_mut().find(|(k, _)| *k == input) {
            Some((_, existing)) => existing.extend(outputs),
            None => self.keys.push((input, outputs)),
        }
        self
    }

    /// Active flags.
    pub fn flags(&self) -> MapperFlags {
        self.flags
    }

    /// Output keys for an input key.
    pub fn outputs(&self, input: &str) -> Option<&[String]> {
        self.index_of(input).map(|i| self.keys[i].1.as_slice())
    }

    fn index_of(&self, input: &str) -> Option<usize> {
        self.keys.iter().position(|(k, _)| k == input)
    }

    fn plan(&self, record: &Record) -> CoreResult<Plan> {
        let mut seen = vec![false; self.keys.len()];
        let steps = record
            .keys()
            .map(|key| match self.index_of(key) {
                Some(i) => {
                    seen[i] = true;
                    Step::Map(i)
                }
                None if self.flags.contains(MapperFlags::ADD_UNMAPPED) => Step::Copy,
                None => Step::Drop,
            })
            .collect();

        let missing: Vec<usize> = seen
            .iter()
            .enumerate()
            .filter(|(_, seen)| !**seen)
            .map(|(i, _)| i)
            .collect();
        if self.flags.contains(MapperFlags::REQUIRE_MAPPED) {
            if let Some(&i) = missing.first() {
                return Err(CoreError::UnmappedKey {
                    key: self.keys[i].0.clone(),
                });
            }
        }
        Ok(Plan { steps, missing })
    }

    fn apply(&self, plan: &Plan, record: &Record) -> Record {
        let mut out = Record::with_capacity(record.len());
        for ((key, value), step) in record.iter().zip(&plan.steps) {
            match step {
                Step::Map(i) => {
                    for output in &self.keys[*i].1 {
                        out.insert(output.clone(), value.clone());
                    }
                }
                Step::Copy => {
                    out.insert(key, value.clone());
                }
                Step::Drop => {}
            }
        }
        if self.flags.contains(MapperFlags::ADD_MISSING) {
            for &i in &plan.missing {
                for output in &self.keys[i].1 {
                    if !out.contains_key(output) {
                        out.insert(output.clone(), Value::Null);
                    }
                }
            }
        }
        if self.flags.contains(MapperFlags::REMOVE_NULL) {
            out.retain(|_, v| !v.is_null());
        }
        out
    }

    /// Maps one record.
    pub fn map(&self, record: &Record) -> CoreResult<Record> {
        let plan = self.plan(record)?;
        Ok(self.apply(&plan, record))
    }

    /// Maps a batch of records.
    ///
    /// With `Conformity::Complete` the caller asserts every record shares
    /// the first record's key sequence; the first plan is reused.
    pub fn map_list(&self, records: &[Record], conformity: Conformity) -> CoreResult<Vec<Record>> {
        if conformity.is_complete() {
            let Some(first) = records.first() else {
                return Ok(Vec::new());
            };
            let plan = self.plan(first)?;
            tracing::trace!(records = records.len(), "reusing key plan");
            return Ok(records.iter().map(|r| self.apply(&plan, r)).collect());
        }
        records.iter().map(|r| self.map(r)).collect()
    }

    /// Builds the reverse mapper, output keys back to input keys.
    ///
    /// Fails with `AmbiguousMapping` if an output key is produced by more
    /// than one input key.
    pub fn invert(&self) -> CoreResult<KeyMapper> {
        let mut seen = HashSet::new();
        let mut inverted = KeyMapper::new(self.flags);
        for (input, outputs) in &self.keys {
            for output in outputs {
                if !seen.insert(output.as_str()) {
                    return Err(CoreError::AmbiguousMapping {
                        key: output.clone(),
                    });
                }
                inverted = inverted.key(output.clone(), input.clone());
            }
        }
        Ok(inverted)
    }
}
