//! Peer identity → table slot.
//!
//! Every per-peer array in the node (distances, power, calibration, liveness)
//! is indexed by the same [`PeerIndex`]. The engine reports peers by short
//! address; [`PeerIndex::for_peer`] is the single place that mapping lives.

use std::fmt;

use uwb_types::{PeerRef, MAX_ANCHOR_NUM};

/// Number of peer slots in the node.
pub const PEER_SLOTS: usize = MAX_ANCHOR_NUM;

/// A slot index that is always `< PEER_SLOTS`.
///
/// Out-of-range indices cannot be represented: raw indices coming from the
/// wire go through [`PeerIndex::new`] and are rejected there, so table and
/// calibration accessors never need a bounds policy of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerIndex(u8);

impl PeerIndex {
    pub fn new(index: usize) -> Option<Self> {
        (index < PEER_SLOTS).then_some(Self(index as u8))
    }

    /// Canonical slot of a peer: short address modulo the slot count.
    pub fn for_peer(peer: PeerRef) -> Self {
        Self((usize::from(peer.short_address) % PEER_SLOTS) as u8)
    }

    pub fn get(self) -> usize {
        usize::from(self.0)
    }

    pub fn all() -> impl Iterator<Item = PeerIndex> {
        (0..PEER_SLOTS as u8).map(Self)
    }
}

impl fmt::Display for PeerIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
