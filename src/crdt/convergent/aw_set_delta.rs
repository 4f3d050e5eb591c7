use crate::crdt::convergent::kernel::{Kernel, MergeOp};
use crate::crdt::convergent::{Materialize, Convergent, DeltaConvergent};
use crate::vtime::{ReplicaId, Dot, VTime};
use crate::mtime::MTime;
use serde::{Serialize, Deserialize};
use smallvec::{SmallVec, smallvec};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Debug, Display, Formatter};
use log::{debug, trace};

/// Dots of removals of a single value, at most one (the latest) per replica.
pub type Removals = SmallVec<[Dot;1]>;

/// Delta-state variant of an add-wins observed-remove set.
///
/// Once two replicas have synchronized at least once, they no longer need to exchange their
/// full state: it's enough to send the entries the receiver has not observed yet, together
/// with removals it may not know about. To make the latter possible, every removal is recorded
/// in `deleted` under a freshly generated dot. These records are transient - they are dropped
/// as soon as every known peer has acknowledged observing them.
///
/// Dots of dropped records are kept in `collected`. A replica which has not observed all of
/// them may still hold removed values, so it's sent a full state instead of a delta.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AWSetDelta<T: Ord> {
    kernel: Kernel<T>,
    deleted: BTreeMap<T, Removals>,
    acks: MTime,
    collected: VTime,
}

impl<T: Ord> AWSetDelta<T> {
    pub fn new(id: ReplicaId) -> Self {
        AWSetDelta {
            kernel: Kernel::new(id),
            deleted: BTreeMap::new(),
            acks: MTime::default(),
            collected: VTime::default(),
        }
    }

    pub fn id(&self) -> ReplicaId { self.kernel.id() }

    pub fn version(&self) -> &VTime { self.kernel.seen() }

    /// Adds all `values` in order. Each one of them gets its own dot, which is returned.
    pub fn add<I>(&mut self, values: I) -> SmallVec<[Dot;1]> where I: IntoIterator<Item=T> {
        self.kernel.insert_all(values)
    }

    pub fn insert(&mut self, value: T) -> Dot {
        self.kernel.insert(value)
    }

    /// Removes all given `values`. A single dot is generated for the whole call and recorded as
    /// a removal of every value that was present. Absent values are ignored.
    pub fn remove<'a, I>(&mut self, values: I) -> Dot where I: IntoIterator<Item=&'a T>, T: 'a {
        let dot = self.kernel.inc();
        for value in values {
            if let Some((value, _)) = self.kernel.remove(value) {
                record_removal(self.deleted.entry(value).or_default(), dot);
            }
        }
        dot
    }

    pub fn contains(&self, value: &T) -> bool { self.kernel.contains(value) }

    /// Returns a birth dot of a given `value`, if it's present.
    pub fn dot(&self, value: &T) -> Option<Dot> { self.kernel.get(value).cloned() }

    pub fn values(&self) -> impl Iterator<Item=&T> + DoubleEndedIterator + ExactSizeIterator {
        (&self.kernel).value()
    }

    /// Removal records, which have not been acknowledged by all known peers yet.
    pub fn deleted(&self) -> &BTreeMap<T, Removals> { &self.deleted }

    /// Upper bound of dots of all removal records dropped so far, here or on any replica we
    /// have merged with.
    pub fn collected(&self) -> &VTime { &self.collected }

    pub fn is_empty(&self) -> bool { self.kernel.is_empty() }

    pub fn len(&self) -> usize { self.kernel.len() }

    pub fn reset(&mut self) {
        self.kernel.clear();
        self.deleted.clear();
        self.acks = MTime::default();
        self.collected = VTime::default();
    }

    /// Records that replica `peer` has observed everything up to `seen`. Removal records
    /// observed by all known peers are dropped.
    pub fn acknowledge(&mut self, peer: ReplicaId, seen: &VTime) {
        if peer != self.id() {
            self.acks.merge_vtime(peer, seen);
        }
        self.gc();
    }

    /// Drops removal dots, which have been acknowledged by every known peer, and returns how
    /// many of them were dropped. Known peers are replicas, whose events were observed or who
    /// have acknowledged anything. If there are no known peers, nothing is dropped.
    pub fn gc(&mut self) -> usize {
        let id = self.id();
        let peers: BTreeSet<ReplicaId> = self.kernel.seen().iter()
            .map(|(&peer, _)| peer)
            .chain(self.acks.ids().cloned())
            .filter(|&peer| peer != id)
            .collect();
        let stable = match self.acks.min(&peers) {
            Some(stable) => stable,
            None => return 0,
        };

        let mut dropped = 0;
        let collected = &mut self.collected;
        self.deleted.retain(|_, dots| {
            dots.retain(|dot| {
                if stable.contains(dot) {
                    collected.set(*dot);
                    dropped += 1;
                    false
                } else {
                    true
                }
            });
            !dots.is_empty()
        });
        if dropped > 0 {
            debug!("replica {}: collected {} removal dots, stable at {}", id, dropped, stable);
        }
        dropped
    }

    /// Full state merge with `other`, regardless of whether they have synchronized before.
    pub fn merge_state_with<F>(&mut self, other: &Self, f: F) -> bool
        where T: Clone, F: FnMut(MergeOp<'_, T>)
    {
        let updated = self.kernel.merge_with(other.kernel.seen(), other.kernel.entries(), f);
        self.collected.merge(&other.collected);
        self.adopt_deleted(&other.deleted);
        self.acknowledge(other.id(), other.kernel.seen());
        updated
    }

    /// Applies a `delta` produced by another replica, passing every decision made to `f`.
    pub fn merge_delta_with<F>(&mut self, delta: &Delta<T>, f: F) -> bool
        where T: Clone, F: FnMut(MergeOp<'_, T>)
    {
        let updated = if delta.full {
            self.kernel.merge_with(&delta.seen, &delta.changed, f)
        } else {
            self.kernel.merge_delta_with(&delta.seen, &delta.changed, &delta.deleted, f)
        };
        self.collected.merge(&delta.collected);
        self.adopt_deleted(&delta.deleted);
        self.acknowledge(delta.origin, &delta.seen);
        updated
    }

    /// Removal records of values, which are not present here, are kept so that the removal can be
    /// passed on to replicas that synchronize with us only.
    fn adopt_deleted(&mut self, deleted: &BTreeMap<T, Removals>) where T: Clone {
        for (value, dots) in deleted.iter() {
            if self.kernel.contains(value) {
                continue;
            }
            for &dot in dots.iter() {
                if self.collected.contains(&dot) {
                    continue;
                }
                match self.deleted.get_mut(value) {
                    Some(current) => record_removal(current, dot),
                    None => {
                        self.deleted.insert(value.clone(), smallvec![dot]);
                    },
                }
            }
        }
    }
}

/// Dots of different replicas are not comparable, so each replica keeps its own slot.
fn record_removal(dots: &mut Removals, dot: Dot) {
    match dots.iter_mut().find(|current| current.id() == dot.id()) {
        Some(current) => {
            if dot.seq_nr() > current.seq_nr() {
                *current = dot;
            }
        },
        None => dots.push(dot),
    }
}

impl<T: Ord + Clone> AWSetDelta<T> {
    /// Merges `other` into current replica. If `other` was never observed before, a full state
    /// merge is performed. Otherwise only a delta, computed against our version vector, is
    /// applied. Every decision made is passed to `f`.
    pub fn merge_with<F>(&mut self, other: &Self, f: F) -> bool where F: FnMut(MergeOp<'_, T>) {
        if self.kernel.seen().get(&other.id()) == 0 {
            debug!("replica {}: first contact with {}, merging full state", self.id(), other.id());
            self.merge_state_with(other, f)
        } else if let Some(delta) = other.changes_since(self.kernel.seen()) {
            self.merge_delta_with(&delta, f)
        } else {
            false
        }
    }

    /// Computes a delta of entries not observed by `since`, together with removal records of
    /// values that are not present anymore. Returns `None` if there is nothing to send.
    ///
    /// If `since` doesn't cover all collected removal records, the receiver may miss some
    /// removals, so the delta carries a full state instead.
    pub fn changes_since(&self, since: &VTime) -> Option<Delta<T>> {
        let full = !(self.collected <= *since);
        if full {
            debug!("replica {}: {} doesn't cover collected removals {}, sending full state", self.id(), since, self.collected);
        }
        let changed: BTreeMap<T, Dot> = self.kernel.iter()
            .filter(|(_, dot)| full || !since.contains(dot))
            .map(|(value, &dot)| (value.clone(), dot))
            .collect();
        let deleted: BTreeMap<T, Removals> = self.deleted.iter()
            // added again afterwards
            .filter(|(value, _)| !self.kernel.contains(value))
            .map(|(value, dots)| (value.clone(), dots.clone()))
            .collect();

        if !full && changed.is_empty() && deleted.is_empty() {
            None
        } else {
            Some(Delta {
                origin: self.id(),
                seen: self.kernel.seen().clone(),
                changed,
                deleted,
                collected: self.collected.clone(),
                full,
            })
        }
    }
}

impl<T: Ord + Clone + Debug> AWSetDelta<T> {
    /// Full state merge with `other`, regardless of whether they have synchronized before.
    pub fn merge_state(&mut self, other: &Self) -> bool {
        let id = self.id();
        self.merge_state_with(other, |op| trace!("replica {}: {:?}", id, op))
    }
}

impl<'mat, T: Ord> Materialize for &'mat AWSetDelta<T> {
    type Value = BTreeSet<&'mat T>;

    fn value(&self) -> Self::Value {
        self.values().collect()
    }
}

impl<T: Ord + Clone + Debug> Convergent for AWSetDelta<T> {
    fn merge(&mut self, other: &Self) -> bool {
        let id = self.id();
        self.merge_with(other, |op| trace!("replica {}: {:?}", id, op))
    }
}

impl<T: Ord + Clone + Debug> DeltaConvergent for AWSetDelta<T> {
    type Delta = Delta<T>;

    fn delta(&self, since: &VTime) -> Option<Self::Delta> {
        let delta = self.changes_since(since);
        if let Some(delta) = delta.as_ref() {
            trace!("replica {}: delta since {} - changed {:?}, deleted {:?}", self.id(), since, delta.changed, delta.deleted);
        }
        delta
    }

    fn merge_delta(&mut self, other: &Self::Delta) -> bool {
        let id = self.id();
        self.merge_delta_with(other, |op| trace!("replica {}: {:?}", id, op))
    }
}

impl<T: Ord + Debug> Display for AWSetDelta<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version())?;
        for (value, dot) in self.kernel.iter() {
            write!(f, "\n  {}  {:?}", dot, value)?;
        }
        for (value, dots) in self.deleted.iter() {
            for dot in dots.iter() {
                write!(f, "\n  {}  {:?} (deleted)", dot, value)?;
            }
        }
        Ok(())
    }
}

/// Part of the `AWSetDelta` state not observed by a given version vector: entries with unseen
/// dots and removal records. It carries a full version vector of its origin.
///
/// A `full` delta carries every entry of its origin and is applied as a full state merge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Delta<T: Ord> {
    origin: ReplicaId,
    seen: VTime,
    changed: BTreeMap<T, Dot>,
    deleted: BTreeMap<T, Removals>,
    collected: VTime,
    full: bool,
}

impl<T: Ord> Delta<T> {
    /// Replica which has produced this delta.
    pub fn origin(&self) -> ReplicaId { self.origin }

    /// Version vector of the origin at the moment of producing this delta.
    pub fn version(&self) -> &VTime { &self.seen }

    pub fn changed(&self) -> &BTreeMap<T, Dot> { &self.changed }

    pub fn deleted(&self) -> &BTreeMap<T, Removals> { &self.deleted }

    pub fn is_full(&self) -> bool { self.full }
}
