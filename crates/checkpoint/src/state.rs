//! State extraction and restoration contract
//!
//! Model, optimizer, and scheduler objects are opaque to the checkpoint
//! layer; they participate through [`Stateful`], a fixed capability
//! interface. Composite wrappers (base model plus an auxiliary training
//! head) additionally declare their key prefixes so the snapshot writer
//! can filter training-only parameters.

use runtime_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tensor_shard::{ShardedTensor, Tensor};

/// One entry in a state mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateValue {
    /// A plain host tensor (replicated or rank-local)
    Tensor(Tensor),

    /// This rank's shard of a distributed tensor
    Sharded(ShardedTensor),

    /// Integer scalar state (step counters, etc.)
    Int(i64),

    /// Float scalar state (learning rate, moment decay, etc.)
    Float(f64),
}

/// Flat mapping from qualified parameter name to state value
///
/// `BTreeMap` keeps iteration deterministic, which in turn keeps gather
/// order identical across ranks.
pub type StateDict = BTreeMap<String, StateValue>;

/// Key prefixes of a composite (wrapper) model
///
/// Base-prefixed keys belong to the wrapped base model and are retained in
/// consolidated snapshots under their canonical (prefix-stripped) names.
/// Auxiliary-prefixed keys belong to a training-only head and are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositePrefixes {
    pub base: String,
    pub auxiliary: String,
}

/// Outcome of a non-strict restore
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Keys the live object has but the incoming state lacks
    pub missing_keys: Vec<String>,

    /// Keys the incoming state has but the live object lacks
    pub unexpected_keys: Vec<String>,
}

impl RestoreReport {
    /// Whether the key sets matched exactly
    pub fn is_clean(&self) -> bool {
        self.missing_keys.is_empty() && self.unexpected_keys.is_empty()
    }

    /// Under strict mode, a non-clean report is a state mismatch error
    pub fn into_result(self, strict: bool) -> Result<RestoreReport> {
        if strict && !self.is_clean() {
            return Err(Error::StateMismatch {
                missing_keys: self.missing_keys,
                unexpected_keys: self.unexpected_keys,
            });
        }
        Ok(self)
    }
}

/// Capability interface for stateful training objects
///
/// The checkpoint layer only ever calls these named operations; there is
/// no fallback delegation to the wrapped object.
pub trait Stateful {
    /// Produce the full state mapping of this object
    fn extract_state(&self) -> StateDict;

    /// Restore state into this object
    ///
    /// Under `strict`, any missing or unexpected key fails the call with
    /// `StateMismatch`; otherwise the mismatch lists are returned and the
    /// overlapping keys are applied best-effort.
    fn restore_state(&mut self, state: StateDict, strict: bool) -> Result<RestoreReport>;

    /// Key prefixes when this object is a composite wrapper
    fn composite_prefixes(&self) -> Option<CompositePrefixes> {
        None
    }
}

/// Apply `incoming` onto `current` key-by-key, reporting mismatches
///
/// Shared by [`InMemoryState`] and other map-backed `Stateful`
/// implementations: values for keys present on both sides are replaced,
/// everything else is reported.
pub fn apply_state(current: &mut StateDict, incoming: StateDict) -> RestoreReport {
    let mut report = RestoreReport::default();

    for key in current.keys() {
        if !incoming.contains_key(key) {
            report.missing_keys.push(key.clone());
        }
    }

    for (key, value) in incoming {
        match current.get_mut(&key) {
            Some(slot) => *slot = value,
            None => report.unexpected_keys.push(key),
        }
    }

    report
}

/// Map-backed stateful object for tests, benches, and simulation
///
/// Stands in for a real model/optimizer/scheduler: it owns a state dict
/// and optionally declares composite prefixes.
#[derive(Debug, Clone, Default)]
pub struct InMemoryState {
    entries: StateDict,
    prefixes: Option<CompositePrefixes>,
}

impl InMemoryState {
    pub fn new(entries: StateDict) -> Self {
        Self {
            entries,
            prefixes: None,
        }
    }

    /// A composite wrapper with the given base/auxiliary prefixes
    pub fn composite(entries: StateDict, base: &str, auxiliary: &str) -> Self {
        Self {
            entries,
            prefixes: Some(CompositePrefixes {
                base: base.to_string(),
                auxiliary: auxiliary.to_string(),
            }),
        }
    }

    pub fn entries(&self) -> &StateDict {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.entries.get(key)
    }
}

impl Stateful for InMemoryState {
    fn extract_state(&self) -> StateDict {
        self.entries.clone()
    }

    fn restore_state(&mut self, state: StateDict, strict: bool) -> Result<RestoreReport> {
        apply_state(&mut self.entries, state).into_result(strict)
    }

    fn composite_prefixes(&self) -> Option<CompositePrefixes> {
        self.prefixes.clone()
    }
}
