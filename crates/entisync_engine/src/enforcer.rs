//! Filter policy enforcement around provider calls.
//!
//! Providers mark the filter keys they honour with
//! [`ProviderContext::claim_filter`]. After the call, keys that were
//! supplied but never claimed are handled according to the context's
//! [`FilterPolicy`]. Methods that declared their claimable keys up front
//! are checked before the call instead.

use crate::dispatcher::Operation;
use crate::error::{EngineError, EngineResult};
use entisync_core::{FilterPolicy, Filters, ProviderContext, Record, Target, Value};

/// Outcome of a single-entity call after policy enforcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SingleOutcome {
    /// The provider returned a record and the policy kept it.
    Found(Record),
    /// The provider returned nothing.
    Absent,
    /// The policy discarded the result.
    Emptied,
}

impl SingleOutcome {
    /// The record, if one survived.
    pub fn into_record(self) -> Option<Record> {
        match self {
            SingleOutcome::Found(record) => Some(record),
            SingleOutcome::Absent | SingleOutcome::Emptied => None,
        }
    }
}

/// Calls a single-entity operation under the context's filter policy.
pub fn call_single(op: &Operation, ctx: &ProviderContext, target: Target) -> EngineResult<SingleOutcome> {
    precheck(op, ctx)?;
    let result = op.call_single(ctx, target)?;
    let unclaimed = unclaimed(op, ctx);
    let Some(record) = result else {
        return absent(op, ctx, unclaimed);
    };
    if unclaimed.is_empty() {
        return Ok(SingleOutcome::Found(record));
    }
    match ctx.filter_policy() {
        FilterPolicy::Ignore => Ok(SingleOutcome::Found(record)),
        FilterPolicy::ThrowException => Err(violation(op, unclaimed)),
        FilterPolicy::ReturnEmpty => {
            tracing::debug!(provider = op.provider(), ?unclaimed, "discarding result");
            Ok(SingleOutcome::Emptied)
        }
        FilterPolicy::FilterLocally => {
            if passes(&record, ctx.filters(), &unclaimed) {
                Ok(SingleOutcome::Found(record))
            } else {
                Ok(SingleOutcome::Emptied)
            }
        }
    }
}

/// An empty single result is still subject to the policy: unclaimed keys
/// under `THROW_EXCEPTION` fail and `RETURN_EMPTY` reports the result as
/// discarded rather than absent.
fn absent(op: &Operation, ctx: &ProviderContext, unclaimed: Vec<String>) -> EngineResult<SingleOutcome> {
    if unclaimed.is_empty() {
        return Ok(SingleOutcome::Absent);
    }
    match ctx.filter_policy() {
        FilterPolicy::Ignore | FilterPolicy::FilterLocally => Ok(SingleOutcome::Absent),
        FilterPolicy::ThrowException => Err(violation(op, unclaimed)),
        FilterPolicy::ReturnEmpty => {
            tracing::debug!(provider = op.provider(), ?unclaimed, "discarding empty result");
            Ok(SingleOutcome::Emptied)
        }
    }
}

/// Calls a list operation under the context's filter policy.
///
/// `RETURN_EMPTY` yields an empty list, never an error.
pub fn call_list(op: &Operation, ctx: &ProviderContext, input: Vec<Record>) -> EngineResult<Vec<Record>> {
    precheck(op, ctx)?;
    let mut records = op.call_list(ctx, input)?;
    let unclaimed = unclaimed(op, ctx);
    if unclaimed.is_empty() {
        return Ok(records);
    }
    match ctx.filter_policy() {
        FilterPolicy::Ignore => Ok(records),
        FilterPolicy::ThrowException => Err(violation(op, unclaimed)),
        FilterPolicy::ReturnEmpty => {
            tracing::debug!(provider = op.provider(), ?unclaimed, "discarding result");
            Ok(Vec::new())
        }
        FilterPolicy::FilterLocally => {
            let before = records.len();
            records.retain(|record| passes(record, ctx.filters(), &unclaimed));
            tracing::trace!(
                provider = op.provider(),
                kept = records.len(),
                dropped = before - records.len(),
                "filtered locally"
            );
            Ok(records)
        }
    }
}

fn precheck(op: &Operation, ctx: &ProviderContext) -> EngineResult<()> {
    if ctx.filter_policy() != FilterPolicy::ThrowException {
        return Ok(());
    }
    let Some(claims) = op.static_claims() else {
        return Ok(());
    };
    let unsupported: Vec<String> = ctx
        .filters()
        .keys()
        .filter(|k| !claims.contains(*k))
        .map(str::to_string)
        .collect();
    if unsupported.is_empty() {
        Ok(())
    } else {
        Err(violation(op, unsupported))
    }
}

fn unclaimed(op: &Operation, ctx: &ProviderContext) -> Vec<String> {
    let mut keys = ctx.unclaimed_filters();
    if let Some(claims) = op.static_claims() {
        keys.retain(|k| !claims.contains(k));
    }
    keys
}

fn passes(record: &Record, filters: &Filters, keys: &[String]) -> bool {
    keys.iter().all(|key| {
        let expected = filters.get(key).unwrap_or(&Value::Null);
        record.get(key).unwrap_or(&Value::Null).matches(expected)
    })
}

fn violation(op: &Operation, keys: Vec<String>) -> EngineError {
    EngineError::FilterPolicyViolation {
        provider: op.provider().to_string(),
        entity_type: op.entity_type().name().to_string(),
        keys,
    }
}
