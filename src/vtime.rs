use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use crate::crdt::convergent::Convergent;
use std::iter::FromIterator;
use std::collections::btree_map::Iter;
use std::collections::BTreeSet;

/// Replica (actor) identifier. Assigned externally and expected to be unique among all live
/// replicas.
pub type ReplicaId = u32;

/// Represents a logical timestamp of a single operation. It consists of two values: `id` which is
/// a logical identifier of a replica, and monotonically increasing `seq_nr`, consistent
/// within the scope of that replica. Dots are only ordered meaningfully within the same replica.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct Dot(ReplicaId, u64);

impl Dot {
    pub fn new(id: ReplicaId, seq_nr: u64) -> Self {
        debug_assert!(seq_nr > 0, "Defect: dot ({} {}) has zero sequence number", id, seq_nr);
        Dot(id, seq_nr)
    }

    /// Replica identifer of a creator of current Dot.
    pub fn id(&self) -> ReplicaId { self.0 }

    /// A sequence number, which is monotonically increasing in a scope of a current replica `id`.
    pub fn seq_nr(&self) -> u64 { self.1 }
}

impl Display for Dot {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({} {})", self.0, self.1)
    }
}

/// Version vector. Maps each replica to the highest sequence number observed from it, with
/// unknown replicas implicitly mapped to 0. Since sequence numbers are generated without gaps,
/// a recorded `seq_nr` means that every dot of that replica up to `seq_nr` has been observed.
///
/// Two version vectors can be partially compared - `None` represents concurrent histories.
/// They are also convergent: `merge` is a pointwise maximum.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VTime(BTreeMap<ReplicaId, u64>);

impl VTime {

    /// Increments a partial counter of a given replica `id` by a given `delta`, returning `Dot`
    /// representing a new logical timestamp generated this way.
    pub fn inc_by(&mut self, id: ReplicaId, delta: u64) -> Dot {
        debug_assert!(delta > 0, "Defect: VTime::inc_by called with zero delta");
        let e = self.0.entry(id).or_default();
        *e += delta;
        Dot::new(id, *e)
    }

    /// Increments a partial counter of a given replica `id` by 1, returning `Dot`
    /// representing a new logical timestamp generated this way. It should only be called by
    /// the replica owning the `id`.
    #[inline]
    pub fn inc(&mut self, id: ReplicaId) -> Dot { self.inc_by(id, 1) }

    /// Returns a sequence number of a given replica, or 0 if it was never observed.
    pub fn get(&self, id: &ReplicaId) -> u64 { *self.0.get(id).unwrap_or(&0u64) }

    /// Puts a given `Dot` inside of a vector clock, updating a sequence number of a corresponding
    /// replica id in that clock if it was more recent. Returns true if current vector clock has
    /// been successfully updated.
    pub fn set(&mut self, dot: Dot) -> bool {
        let e = self.0.entry(dot.id()).or_default();
        if dot.seq_nr() > *e {
            *e = dot.seq_nr();
            true
        } else {
            false
        }
    }

    /// Iterates over replica id's and their sequence numbers stored inside of a current vector
    /// clock.
    pub fn iter(&self) -> Iter<'_, ReplicaId, u64> { self.0.iter() }

    /// Checks if current vector clock stores any non-zero value.
    pub fn is_empty(&self) -> bool { self.0.values().all(|&seq_nr| seq_nr == 0) }

    /// Checks if a given `Dot` has been already observed by current vector clock.
    pub fn contains(&self, dot: &Dot) -> bool {
        self.get(&dot.0) >= dot.1
    }

    /// Pairs up counters of both vector clocks for every replica known to any of them, in
    /// replica id order. Missing counters are 0.
    pub fn zip<'a>(&'a self, other: &'a Self) -> impl Iterator<Item=(ReplicaId, u64, u64)> + 'a {
        let ids: BTreeSet<ReplicaId> = self.0.keys().chain(other.0.keys()).cloned().collect();
        ids.into_iter().map(move |id| (id, self.get(&id), other.get(&id)))
    }

    /// Returns a pointwise minimum of two vector clocks.
    pub fn min(&self, other: &Self) -> Self {
        self.zip(other)
            .map(|(id, l, r)| (id, l.min(r)))
            .filter(|&(_, seq_nr)| seq_nr > 0)
            .collect()
    }
}

impl Convergent for VTime {
    fn merge(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (&id, &seq_nr) in other.0.iter() {
            if seq_nr > self.get(&id) {
                self.0.insert(id, seq_nr);
                changed = true;
            }
        }
        changed
    }
}

/// Causal order: `Less` if every counter is lower or equal, `None` for concurrent clocks.
impl PartialOrd for VTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.zip(other).try_fold(Ordering::Equal, |acc, (_, l, r)| match (acc, l.cmp(&r)) {
            (acc, Ordering::Equal) => Some(acc),
            (Ordering::Equal, ord) => Some(ord),
            (acc, ord) if acc == ord => Some(acc),
            _ => None,
        })
    }
}

impl PartialEq for VTime {
    fn eq(&self, other: &Self) -> bool {
        self.zip(other).all(|(_, l, r)| l == r)
    }
}

impl FromIterator<(ReplicaId, u64)> for VTime {
    fn from_iter<T: IntoIterator<Item=(ReplicaId, u64)>>(iter: T) -> Self {
        VTime(iter.into_iter().collect())
    }
}

impl Display for VTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (id, seq_nr)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "({} {})", id, seq_nr)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod test {
    use crate::vtime::{VTime, ReplicaId, Dot};
    use std::cmp::Ordering;
    use crate::crdt::convergent::Convergent;

    const A: ReplicaId = 1;
    const B: ReplicaId = 2;
    const C: ReplicaId = 3;
    const D: ReplicaId = 4;

    fn vtime(a: u64, b: u64, c: u64) -> VTime {
        vec![(A, a), (B, b), (C, c)]
            .into_iter()
            .filter(|&(_, seq_nr)| seq_nr > 0)
            .collect()
    }

    #[test]
    fn vtime_unknown_replica_is_zero() {
        let ts = vtime(1, 0, 2);
        assert_eq!(ts.get(&A), 1);
        assert_eq!(ts.get(&B), 0);
        assert_eq!(ts.get(&D), 0);
        assert!(!ts.contains(&Dot::new(D, 1)));
        assert!(VTime::default().is_empty());
    }

    #[test]
    fn vtime_inc() {
        let mut ts = VTime::default();
        assert_eq!(ts.inc(A), Dot::new(A, 1));
        assert_eq!(ts.inc(A), Dot::new(A, 2));
        assert_eq!(ts.inc(B), Dot::new(B, 1));
        assert_eq!(ts.get(&A), 2);
        assert!(!ts.set(Dot::new(A, 1)));
        assert!(ts.set(Dot::new(C, 4)));
        assert_eq!(ts.get(&C), 4);
    }

    #[test]
    fn vtime_contains() {
        let ts = vtime(1, 3, 2);
        assert!(ts.contains(&Dot::new(B, 2)));
        assert!(ts.contains(&Dot::new(B, 3)));
        assert!(!ts.contains(&Dot::new(B, 4)));
    }

    #[test]
    fn vtime_causal_order() {
        let before = vtime(1, 2, 0);
        let after = vtime(1, 3, 0);
        assert!(before < after);
        assert!(after > before);
        assert!(before <= before.clone());

        // unknown replicas count as 0
        assert_eq!(vtime(1, 0, 0).partial_cmp(&vtime(1, 0, 0)), Some(Ordering::Equal));
        assert!(VTime::default() < vtime(0, 0, 1));
        let with_zero: VTime = vec![(A, 1), (D, 0)].into_iter().collect();
        assert_eq!(with_zero, vtime(1, 0, 0));

        // concurrent
        let left = vtime(2, 1, 0);
        let right = vtime(1, 1, 1);
        assert_eq!(left.partial_cmp(&right), None);
        assert!(!(left <= right) && !(right <= left));
    }

    #[test]
    fn vtime_zip_fills_missing_counters() {
        let left = vtime(1, 0, 3);
        let right: VTime = vec![(B, 2), (D, 5)].into_iter().collect();
        assert_eq!(left.zip(&right).collect::<Vec<_>>(), vec![
            (A, 1, 0),
            (B, 0, 2),
            (C, 3, 0),
            (D, 0, 5),
        ]);
        assert_eq!(VTime::default().zip(&VTime::default()).count(), 0);
    }

    #[test]
    fn vtime_merge() {

        fn assert_merge(mut left: VTime, right: VTime, expected: VTime, changed: bool) {
            assert_eq!(left.merge(&right), changed);
            assert_eq!(left, expected);
        }

        assert_merge(vtime(0,0,0), vtime(0,0,0), vtime(0,0,0), false);
        assert_merge(vtime(2,2,3), vtime(1,2,0), vtime(2,2,3), false);
        assert_merge(vtime(1,3,3), vtime(1,2,4), vtime(1,3,4), true);
        assert_merge(vtime(1,0,1), vtime(1,1,0), vtime(1,1,1), true);
    }

    #[test]
    fn vtime_merge_grows() {
        let mut a: VTime = vec![(A, 1), (B, 1), (D, 4)].into_iter().collect();
        let b: VTime = vec![(A, 2), (C, 3)].into_iter().collect();
        let expected: VTime = vec![(A, 2), (B, 1), (C, 3), (D, 4)].into_iter().collect();

        assert!(a.merge(&b));
        assert_eq!(a, expected);

        let mut b = b;
        assert!(b.merge(&a));
        assert_eq!(b, expected);
    }

    #[test]
    fn vtime_min() {
        let a = vtime(1, 4, 0);
        let b = vtime(2, 3, 5);
        assert_eq!(a.min(&b), vtime(1, 3, 0));
        assert!(a.min(&b) <= a && a.min(&b) <= b);
    }

    #[test]
    fn vtime_display() {
        assert_eq!(vtime(1, 0, 2).to_string(), "[(1 1), (3 2)]");
        assert_eq!(Dot::new(B, 7).to_string(), "(2 7)");
    }
}
