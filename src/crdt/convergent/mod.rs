use crate::vtime::VTime;

pub mod kernel;
pub mod aw_set;
pub mod aw_set_delta;

pub use aw_set::AWSet;
pub use aw_set_delta::{AWSetDelta, Delta};
pub use kernel::MergeOp;

/// A convergent trait that can be used to merge data from two instances together. Returns a true,
/// when self has been changed in result of merge operation (there were new updates carried by
/// `other`), or false otherwise.
///
/// `merge` operation is expected to be:
/// - idempotent: `a.merge(a) <=> a`
/// - commutative: `a.merge(b) <=> b.merge(a)`
/// - associative: `a.merge(b).merge(c) <=> a.merge(b.merge(c))`
pub trait Convergent {
    fn merge(&mut self, other: &Self) -> bool;
}

/// It's similar to `Convergent` trait, but allows to merge not only with other instance of the same
/// type but also their deltas - a special "carrier" type, that doesn't convey the full state
/// of a given CRDT, but only the part of it that a receiver has not observed yet.
///
/// Deltas are computed against the version vector of a receiver, using `delta` function. `None`
/// means that receiver is already up to date and there is nothing to send.
pub trait DeltaConvergent {
    type Delta;
    /// Computes the part of the current state which was not observed by `since`.
    fn delta(&self, since: &VTime) -> Option<Self::Delta>;
    fn merge_delta(&mut self, other: &Self::Delta) -> bool;
}

/// Trait used to materialize a CRDT value into a user-facing state, stripped of CRDT-specific
/// metadata.
pub trait Materialize {
    type Value;
    fn value(&self) -> Self::Value;
}
