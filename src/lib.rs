pub mod crdt;
pub mod vtime;
pub mod mtime;
pub mod codec;

pub type Result<T> = anyhow::Result<T>;

pub use vtime::{ReplicaId, Dot, VTime};
pub use crdt::convergent::{AWSet, AWSetDelta, Delta, MergeOp, Convergent, DeltaConvergent, Materialize};
