//! Snapshot key filtering and renaming
//!
//! A consolidated snapshot carries only inference-facing weights under
//! their canonical names. For composite models the wrapper's base prefix
//! is stripped and auxiliary-head keys are dropped; the plan keeps the
//! original qualified name alongside each canonical name because the
//! collective layer addresses tensors by their fully-qualified name in the
//! owning module graph.

use crate::state::CompositePrefixes;

/// One retained snapshot key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotKey {
    /// Canonical, inference-facing name written to the snapshot
    pub canonical: String,

    /// Original qualified name in the live model's state
    pub original: String,
}

/// Ordered set of keys retained for one consolidation
///
/// Transient: built from one state extraction, discarded after the write.
#[derive(Debug, Clone, Default)]
pub struct SnapshotKeyPlan {
    entries: Vec<SnapshotKey>,
}

impl SnapshotKeyPlan {
    /// Build the plan from state keys and optional composite prefixes
    ///
    /// With prefixes, base-prefixed keys are canonicalized by stripping
    /// the prefix, auxiliary-prefixed keys are dropped, and any remaining
    /// key is retained unchanged. Without prefixes the plan is the
    /// identity over all keys. Input order is preserved.
    pub fn build<'a, I>(keys: I, prefixes: Option<&CompositePrefixes>) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let entries = match prefixes {
            Some(prefixes) => keys
                .into_iter()
                .filter_map(|original| {
                    if let Some(stripped) = original.strip_prefix(prefixes.base.as_str()) {
                        Some(SnapshotKey {
                            canonical: stripped.to_string(),
                            original: original.to_string(),
                        })
                    } else if original.starts_with(prefixes.auxiliary.as_str()) {
                        None
                    } else {
                        Some(SnapshotKey {
                            canonical: original.to_string(),
                            original: original.to_string(),
                        })
                    }
                })
                .collect(),
            None => keys
                .into_iter()
                .map(|original| SnapshotKey {
                    canonical: original.to_string(),
                    original: original.to_string(),
                })
                .collect(),
        };

        Self { entries }
    }

    pub fn entries(&self) -> &[SnapshotKey] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
