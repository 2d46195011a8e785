//! Snapshot diffing with rename detection.
//!
//! [`diff`] computes the smallest set of file-level changes that turns one
//! snapshot into another:
//!
//! 1. Identifiers present in only one snapshot are split into *removed* (old
//!    only) and *inserted* (new only).
//! 2. Removed and inserted items are indexed by [`ValueIdentity`].
//! 3. A signature shared by more than one inserted item is ambiguous and
//!    dropped: those items become plain inserts, never a guessed rename.
//! 4. A removed item whose signature uniquely matches an inserted item (and
//!    passes [`Identifiable::same_value`]) is a rename. Renames cost no I/O.
//! 5. Identifiers present in both snapshots whose items differ are *updated*.
//!
//! When several removed items share a signature, the first one in snapshot
//! order is the rename source and the rest are removed.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};

use crate::ids::{Identifiable, ValueIdentity};
use crate::snapshot::Snapshot;

/// The changes between two snapshots.
///
/// `removed` and `inserted` exclude identifiers consumed by a rename, so
/// they are exactly the files to delete and to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditScript<Id: std::hash::Hash + Eq> {
    /// Identifiers whose files must be deleted.
    pub removed: IndexSet<Id>,
    /// Identifiers whose files must be created.
    pub inserted: IndexSet<Id>,
    /// Old identifier → new identifier; the existing file is re-keyed.
    pub renamed: IndexMap<Id, Id>,
    /// Identifiers present on both sides whose item changed.
    pub updated: IndexSet<Id>,
}

impl<Id: std::hash::Hash + Eq> EditScript<Id> {
    /// True when the two snapshots were identical.
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
            && self.inserted.is_empty()
            && self.renamed.is_empty()
            && self.updated.is_empty()
    }

    /// True when applying the script needs any file I/O.
    pub fn touches_disk(&self) -> bool {
        !(self.removed.is_empty() && self.inserted.is_empty() && self.updated.is_empty())
    }
}

impl<Id: std::hash::Hash + Eq> Default for EditScript<Id> {
    fn default() -> Self {
        Self {
            removed: IndexSet::new(),
            inserted: IndexSet::new(),
            renamed: IndexMap::new(),
            updated: IndexSet::new(),
        }
    }
}

/// Compute the edit script from `old` to `new`.
pub fn diff<T>(old: &Snapshot<T>, new: &Snapshot<T>) -> EditScript<T::Id>
where
    T: Identifiable + PartialEq,
{
    let mut removed: IndexSet<T::Id> = old.ids().filter(|id| !new.contains(id)).cloned().collect();
    let mut inserted: IndexSet<T::Id> = new.ids().filter(|id| !old.contains(id)).cloned().collect();

    // First removed id per signature wins.
    let mut removed_by_identity: IndexMap<ValueIdentity, T::Id> = IndexMap::new();
    for id in &removed {
        let Some(item) = old.get(id) else { continue };
        let identity = item.value_identity();
        if identity.is_supported() {
            removed_by_identity.entry(identity).or_insert_with(|| id.clone());
        }
    }

    // `None` marks a signature shared by several inserted ids.
    let mut inserted_by_identity: HashMap<ValueIdentity, Option<T::Id>> = HashMap::new();
    for id in &inserted {
        let Some(item) = new.get(id) else { continue };
        let identity = item.value_identity();
        if !identity.is_supported() {
            continue;
        }
        match inserted_by_identity.entry(identity) {
            Entry::Vacant(slot) => {
                slot.insert(Some(id.clone()));
            }
            Entry::Occupied(mut slot) => {
                slot.insert(None);
            }
        }
    }

    let mut renamed: IndexMap<T::Id, T::Id> = IndexMap::new();
    for (identity, removed_id) in &removed_by_identity {
        let Some(Some(inserted_id)) = inserted_by_identity.get(identity) else {
            continue;
        };
        let (Some(before), Some(after)) = (old.get(removed_id), new.get(inserted_id)) else {
            continue;
        };
        if before.same_value(after) {
            renamed.insert(removed_id.clone(), inserted_id.clone());
        }
    }

    let rename_targets: HashSet<&T::Id> = renamed.values().collect();
    removed.retain(|id| !renamed.contains_key(id));
    inserted.retain(|id| !rename_targets.contains(id));

    let updated: IndexSet<T::Id> = new
        .iter()
        .filter_map(|item| {
            let id = item.id();
            match old.get(&id) {
                Some(previous) if previous != item => Some(id),
                _ => None,
            }
        })
        .collect();

    EditScript {
        removed,
        inserted,
        renamed,
        updated,
    }
}
