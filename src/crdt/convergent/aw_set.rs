use crate::crdt::convergent::kernel::{Kernel, MergeOp};
use serde::{Serialize, Deserialize};
use crate::crdt::convergent::{Materialize, Convergent};
use crate::vtime::{ReplicaId, Dot, VTime};
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::fmt::{self, Debug, Display, Formatter};
use log::trace;

/// Observed-remove set with add-wins semantics, without tombstones (aka OR-SWOT).
///
/// Every added element is stamped with a "birth dot" taken from the set's version vector.
/// Re-adding an element stamps it again. Removal simply drops the element: when it's present
/// on one replica and absent on another, comparing its dot against version vector of the
/// other replica tells if the other replica has not seen it yet (so it stays) or has seen and
/// removed it (so it goes). A concurrent add produces a dot that remover could not have
/// observed, therefore it always wins over a remove.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AWSet<T: Ord>(Kernel<T>);

impl<T: Ord> AWSet<T> {
    pub fn new(id: ReplicaId) -> Self {
        AWSet(Kernel::new(id))
    }

    /// Identifier of a replica owning this set.
    pub fn id(&self) -> ReplicaId { self.0.id() }

    pub fn version(&self) -> &VTime { self.0.seen() }

    /// Adds all `values` in order. Each one of them gets its own dot, which is returned.
    pub fn add<I>(&mut self, values: I) -> SmallVec<[Dot;1]> where I: IntoIterator<Item=T> {
        self.0.insert_all(values)
    }

    pub fn insert(&mut self, value: T) -> Dot {
        self.0.insert(value)
    }

    /// Removes all given `values`. Values which are not present are ignored.
    pub fn remove<'a, I>(&mut self, values: I) where I: IntoIterator<Item=&'a T>, T: 'a {
        for value in values {
            self.0.remove(value);
        }
    }

    pub fn contains(&self, value: &T) -> bool { self.0.contains(value) }

    /// Returns a birth dot of a given `value`, if it's present.
    pub fn dot(&self, value: &T) -> Option<Dot> { self.0.get(value).cloned() }

    pub fn values(&self) -> impl Iterator<Item=&T> + DoubleEndedIterator + ExactSizeIterator {
        (&self.0).value()
    }

    pub fn reset(&mut self) { self.0.clear() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn len(&self) -> usize { self.0.len() }

    /// Merges `other` into current set, passing every decision made to `f`.
    pub fn merge_with<F>(&mut self, other: &Self, f: F) -> bool where T: Clone, F: FnMut(MergeOp<'_, T>) {
        self.0.merge_with(other.0.seen(), other.0.entries(), f)
    }
}

impl<'mat, T: Ord> Materialize for &'mat AWSet<T> {
    type Value = BTreeSet<&'mat T>;

    fn value(&self) -> Self::Value {
        self.values().collect()
    }
}

impl<T: Ord + Clone + Debug> Convergent for AWSet<T> {
    fn merge(&mut self, other: &Self) -> bool {
        let id = self.id();
        self.merge_with(other, |op| trace!("replica {}: {:?}", id, op))
    }
}

impl<T: Ord + Debug> Display for AWSet<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version())?;
        for (value, dot) in self.0.iter() {
            write!(f, "\n  {}  {:?}", dot, value)?;
        }
        Ok(())
    }
}
