use serde::{Serialize, Deserialize};
use crate::vtime::{VTime, Dot, ReplicaId};
use crate::crdt::convergent::{Convergent, Materialize};
use std::collections::BTreeMap;
use std::collections::btree_map::{Keys, Iter};
use smallvec::SmallVec;
use std::iter::FusedIterator;
use log::debug;

/// Shared state of observed-remove sets: an owning replica `id`, a version vector of all
/// observed events and a birth dot of every present element. Removed elements leave no
/// tombstones behind - the fact that their dots were observed is still recorded in `seen`,
/// which is enough to tell "not yet seen" apart from "seen and removed".
///
/// Invariant: every dot stored in `entries` is contained in `seen`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kernel<T: Ord> {
    id: ReplicaId,
    seen: VTime,
    entries: BTreeMap<T, Dot>,
}

impl<T: Ord> Kernel<T> {
    pub fn new(id: ReplicaId) -> Self {
        Kernel {
            id,
            seen: VTime::default(),
            entries: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> ReplicaId { self.id }

    pub fn seen(&self) -> &VTime { &self.seen }

    pub fn entries(&self) -> &BTreeMap<T, Dot> { &self.entries }

    /// Generates a new dot of the owning replica, without attaching it to any element.
    pub fn inc(&mut self) -> Dot { self.seen.inc(self.id) }

    /// Inserts (or updates) a `value`, stamping it with a freshly generated dot.
    pub fn insert(&mut self, value: T) -> Dot {
        let dot = self.inc();
        self.entries.insert(value, dot);
        dot
    }

    /// Inserts all `values` in order, every one of them under its own dot.
    pub fn insert_all<I>(&mut self, values: I) -> SmallVec<[Dot;1]> where I: IntoIterator<Item=T> {
        values.into_iter().map(|value| self.insert(value)).collect()
    }

    /// Removes a `value`, returning it together with its birth dot if it was present.
    /// Version vector stays untouched.
    pub fn remove(&mut self, value: &T) -> Option<(T, Dot)> {
        self.entries.remove_entry(value)
    }

    /// Brings kernel back to its initial state, keeping the replica `id`.
    pub fn clear(&mut self) {
        self.seen = VTime::default();
        self.entries.clear();
    }

    pub fn get(&self, value: &T) -> Option<&Dot> { self.entries.get(value) }

    pub fn contains(&self, value: &T) -> bool { self.entries.contains_key(value) }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn iter(&self) -> Iter<'_, T, Dot> { self.entries.iter() }

    /// Full state merge with a remote replica described by its version vector `seen` and
    /// its `entries`. Every decision made is passed to `f`.
    pub(crate) fn merge_with<F>(&mut self, seen: &VTime, entries: &BTreeMap<T, Dot>, mut f: F) -> bool
        where T: Clone, F: FnMut(MergeOp<'_, T>)
    {
        debug!("merge {} <- {}", self.seen, seen);
        let mut updated = false;

        // adds and updates of values present on the remote side
        for (value, &dot) in entries.iter() {
            updated = self.merge_entry(value, dot, &mut f) || updated;
        }

        // values observed by the remote side, that are no longer present there, have been removed
        self.entries.retain(|value, dot| {
            if entries.contains_key(value) {
                true
            } else if seen.contains(dot) {
                f(MergeOp::Removed(value, *dot));
                updated = true;
                false
            } else {
                f(MergeOp::Retained(value, *dot));
                true
            }
        });

        self.seen.merge(seen) || updated
    }

    /// Delta merge: the same procedure as `merge_with`, but only `changed` values are considered
    /// for adds and updates, and only `deleted` values are considered for removal.
    pub(crate) fn merge_delta_with<D, F>(
        &mut self,
        seen: &VTime,
        changed: &BTreeMap<T, Dot>,
        deleted: &BTreeMap<T, D>,
        mut f: F,
    ) -> bool where T: Clone, F: FnMut(MergeOp<'_, T>) {
        debug!("delta merge {} <- {} ({} changed, {} deleted)", self.seen, seen, changed.len(), deleted.len());
        let mut updated = false;

        for (value, &dot) in changed.iter() {
            updated = self.merge_entry(value, dot, &mut f) || updated;
        }

        for value in deleted.keys() {
            if changed.contains_key(value) {
                continue;
            }
            match self.entries.get(value) {
                Some(&dot) if seen.contains(&dot) => {
                    self.entries.remove(value);
                    f(MergeOp::Removed(value, dot));
                    updated = true;
                },
                // added concurrently to the removal, remote side has never observed it
                Some(&dot) => f(MergeOp::Retained(value, dot)),
                None => {},
            }
        }

        self.seen.merge(seen) || updated
    }

    /// A remote dot replaces the local one only if it was never observed here. Overwriting
    /// unconditionally would let a stale remote add win over a local re-add, and full state merge
    /// would no longer agree with `merge_delta_with`, which only ever sees unobserved dots.
    fn merge_entry<F>(&mut self, value: &T, dot: Dot, f: &mut F) -> bool
        where T: Clone, F: FnMut(MergeOp<'_, T>)
    {
        match self.entries.get_mut(value) {
            Some(current) if *current == dot => {
                f(MergeOp::Kept(value, dot));
                false
            },
            Some(current) => {
                if self.seen.contains(&dot) {
                    // we've seen remote dot already, so our own is at least as recent
                    f(MergeOp::Kept(value, *current));
                    false
                } else {
                    let old = *current;
                    *current = dot;
                    f(MergeOp::Updated(value, old, dot));
                    true
                }
            },
            None => {
                if self.seen.contains(&dot) {
                    f(MergeOp::Skipped(value, dot));
                    false
                } else {
                    self.entries.insert(value.clone(), dot);
                    f(MergeOp::Added(value, dot));
                    true
                }
            }
        }
    }
}

/// Decision made about a single value during a merge.
#[derive(Debug, PartialEq, Eq)]
pub enum MergeOp<'a, T> {
    /// Value was unknown locally and its dot was never observed.
    Added(&'a T, Dot),
    /// Value was present under the first dot, which has been replaced with the second one.
    Updated(&'a T, Dot, Dot),
    /// Value is present on both sides, local dot stays.
    Kept(&'a T, Dot),
    /// Value is absent locally, but its dot was already observed - it has been removed before.
    Skipped(&'a T, Dot),
    /// Remote side has observed a dot of that value, but doesn't have it anymore.
    Removed(&'a T, Dot),
    /// Value is absent on the remote side, but it has never observed its dot.
    Retained(&'a T, Dot),
}

impl<'a, T> MergeOp<'a, T> {
    pub fn value(&self) -> &'a T {
        match *self {
            MergeOp::Added(value, _) |
            MergeOp::Updated(value, _, _) |
            MergeOp::Kept(value, _) |
            MergeOp::Skipped(value, _) |
            MergeOp::Removed(value, _) |
            MergeOp::Retained(value, _) => value,
        }
    }
}

impl<'m, T: Ord + 'm> Materialize for &'m Kernel<T> {
    type Value = Value<'m, T>;

    fn value(&self) -> Self::Value {
        Value(self.entries.keys())
    }
}

#[derive(Clone, Debug)]
pub struct Value<'a, T>(Keys<'a, T, Dot>);

impl<'a, V> Iterator for Value<'a, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<&'a V> { self.0.next() }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }

    fn last(mut self) -> Option<&'a V> {
        self.next_back()
    }
}

impl<'a, V> DoubleEndedIterator for Value<'a, V> {
    fn next_back(&mut self) -> Option<&'a V> {
        self.0.next_back()
    }
}

impl<V> ExactSizeIterator for Value<'_, V> {
    fn len(&self) -> usize {
        self.0.len()
    }
}

impl<V> FusedIterator for Value<'_, V> {}
