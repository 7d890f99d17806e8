//! Caller-supplied filter arguments and claim tracking.

use crate::error::{CoreError, CoreResult};
use crate::naming::snake_case;
use crate::value::{Record, Value};
use parking_lot::Mutex;
use std::collections::BTreeSet;

/// One variadic filter argument passed to an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterArg {
    /// A scalar or array value.
    Value(Value),
    /// A map of filter keys to values.
    Map(Record),
    /// A reference to an entity, filtering by `<type>_id`.
    Entity {
        /// Entity type name.
        entity_type: String,
        /// Backend id.
        id: Value,
    },
}

impl FilterArg {
    /// Creates an entity reference argument.
    pub fn entity(entity_type: impl Into<String>, id: impl Into<Value>) -> Self {
        FilterArg::Entity {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}

impl From<i64> for FilterArg {
    fn from(n: i64) -> Self {
        FilterArg::Value(Value::Integer(n))
    }
}

impl From<&str> for FilterArg {
    fn from(s: &str) -> Self {
        FilterArg::Value(Value::from(s))
    }
}

impl From<Value> for FilterArg {
    fn from(v: Value) -> Self {
        match v {
            Value::Map(record) => FilterArg::Map(record),
            v => FilterArg::Value(v),
        }
    }
}

impl From<Record> for FilterArg {
    fn from(r: Record) -> Self {
        FilterArg::Map(r)
    }
}

/// A normalized filter for one provider call, with the set of keys the
/// provider has claimed.
#[derive(Debug, Default)]
pub struct Filters {
    values: Record,
    claimed: Mutex<BTreeSet<String>>,
}

impl Filters {
    /// An empty filter.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a filter from an already-normalized record.
    pub fn from_record(values: Record) -> Self {
        Self {
            values: values
                .into_iter()
                .map(|(k, v)| (snake_case(&k), v))
                .collect(),
            claimed: Mutex::new(BTreeSet::new()),
        }
    }

    /// Normalizes variadic filter arguments.
    ///
    /// Recognized shapes:
    /// - no arguments: empty filter
    /// - one map: that map, keys snake_cased
    /// - only integer/text ids: `{ "id": [ids...] }`
    /// - only entity references: `{ "<type>_id": id }` per type, with an
    ///   array when a type is referenced more than once
    pub fn from_args(args: &[FilterArg]) -> CoreResult<Self> {
        match args {
            [] => Ok(Self::empty()),
            [FilterArg::Map(map)] => Ok(Self::from_record(map.clone())),
            _ if args
                .iter()
                .all(|a| matches!(a, FilterArg::Value(v) if v.is_identifier())) =>
            {
                let ids: Vec<Value> = args
                    .iter()
                    .filter_map(|a| match a {
                        FilterArg::Value(v) => Some(v.clone()),
                        _ => None,
                    })
                    .collect();
                Ok(Self::from_record(Record::new().with("id", Value::Array(ids))))
            }
            _ if args.iter().all(|a| matches!(a, FilterArg::Entity { .. })) => {
                let mut values = Record::new();
                for arg in args {
                    let FilterArg::Entity { entity_type, id } = arg else {
                        continue;
                    };
                    if !id.is_identifier() {
                        return Err(CoreError::invalid_filter_signature(format!(
                            "{entity_type} reference has no id"
                        )));
                    }
                    let key = format!("{}_id", snake_case(entity_type));
                    let merged = match values.remove(&key) {
                        None => id.clone(),
                        Some(Value::Array(mut ids)) => {
                            ids.push(id.clone());
                            Value::Array(ids)
                        }
                        Some(existing) => Value::Array(vec![existing, id.clone()]),
                    };
                    values.insert(key, merged);
                }
                Ok(Self::from_record(values))
            }
            _ => Err(CoreError::invalid_filter_signature(describe(args))),
        }
    }

    /// Returns true if no filter keys were supplied.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The filter as a record.
    pub fn values(&self) -> &Record {
        &self.values
    }

    /// Supplied filter keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys()
    }

    /// Reads a filter value without claiming it.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(&snake_case(key))
    }

    /// Reads a filter value and records that the provider consumed it.
    pub fn claim(&self, key: &str) -> Option<Value> {
        let key = snake_case(key);
        let value = self.values.get(&key).cloned()?;
        self.claimed.lock().insert(key);
        Some(value)
    }

    /// Returns true if `key` was claimed.
    pub fn is_claimed(&self, key: &str) -> bool {
        self.claimed.lock().contains(&snake_case(key))
    }

    /// Supplied keys that were not claimed, in supplied order.
    pub fn unclaimed(&self) -> Vec<String> {
        let claimed = self.claimed.lock();
        self.values
            .keys()
            .filter(|k| !claimed.contains(*k))
            .map(str::to_string)
            .collect()
    }

    /// A fresh copy of these filters with no claims recorded.
    pub fn unclaimed_copy(&self) -> Self {
        Self {
            values: self.values.clone(),
            claimed: Mutex::new(BTreeSet::new()),
        }
    }
}

fn describe(args: &[FilterArg]) -> String {
    let shapes: Vec<&str> = args
        .iter()
        .map(|a| match a {
            FilterArg::Value(Value::Integer(_)) => "integer",
            FilterArg::Value(Value::Text(_)) => "text",
            FilterArg::Value(Value::Null) => "null",
            FilterArg::Value(_) => "value",
            FilterArg::Map(_) => "map",
            FilterArg::Entity { .. } => "entity",
        })
        .collect();
    format!("unsupported arguments ({})", shapes.join(", "))
}
