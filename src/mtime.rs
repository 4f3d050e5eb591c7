use crate::vtime::{ReplicaId, VTime};
use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use crate::crdt::convergent::Convergent;

/// Matrix clock. Keeps the latest version vector acknowledged by every known peer, so that
/// a replica can tell which of its events have been observed by everyone else.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MTime(BTreeMap<ReplicaId, VTime>);

impl MTime {

    pub fn get(&self, id: &ReplicaId) -> Option<&VTime> {
        self.0.get(id)
    }

    /// Merges `time` into the row of a given replica. Returns true if the row has advanced.
    pub fn merge_vtime(&mut self, id: ReplicaId, time: &VTime) -> bool {
        let e = self.0.entry(id).or_default();
        e.merge(time)
    }

    /// Iterates over identifiers of all replicas with a row in this matrix.
    pub fn ids(&self) -> impl Iterator<Item=&ReplicaId> + '_ {
        self.0.keys()
    }

    /// Returns a pointwise minimum of rows of given `peers`. A peer without a row contributes an
    /// empty vector. Returns `None` when `peers` is empty.
    pub fn min<'a, I>(&self, peers: I) -> Option<VTime> where I: IntoIterator<Item=&'a ReplicaId> {
        let empty = VTime::default();
        peers.into_iter()
            .map(|id| self.0.get(id).unwrap_or(&empty))
            .fold(None, |acc: Option<VTime>, time| match acc {
                None => Some(time.clone()),
                Some(acc) => Some(acc.min(time)),
            })
    }
}
