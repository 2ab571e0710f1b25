//! Directed slot-to-slot edges, packed into 64-bit keys.

use crossbeam_skiplist::SkipSet;

/// Concurrent ordered set of directed edges between slot indices.
///
/// An edge `(a, b)` is packed as `(a << 32) | b`, which keeps all edges with the same source
/// adjacent in the ordering and makes "all targets of `a`" a single range scan.  The skip list
/// gives lock-free add, remove and membership tests, and range iterators that tolerate
/// concurrent mutation.  Scans are weakly consistent, which is all the callers need.
pub(crate) struct PairSet {
    pairs: SkipSet<u64>,
}

impl PairSet {
    pub fn new() -> Self {
        Self {
            pairs: SkipSet::new(),
        }
    }

    fn key(a: u32, b: u32) -> u64 {
        (u64::from(a) << 32) | u64::from(b)
    }

    pub fn add(&self, a: u32, b: u32) {
        self.pairs.insert(Self::key(a, b));
    }

    pub fn remove(&self, a: u32, b: u32) {
        self.pairs.remove(&Self::key(a, b));
    }

    pub fn toggle(&self, on: bool, a: u32, b: u32) {
        if on {
            self.add(a, b);
        } else {
            self.remove(a, b);
        }
    }

    pub fn has(&self, a: u32, b: u32) -> bool {
        self.pairs.contains(&Self::key(a, b))
    }

    /// All `b` such that `(a, b)` is in the set, in ascending order.
    pub fn read(&self, a: u32) -> Vec<u32> {
        let from = Self::key(a, 0);
        let to = Self::key(a, u32::MAX);
        self.pairs
            .range(from..=to)
            .map(|entry| *entry.value() as u32)
            .collect()
    }
}

/// The two mirrored adjacency sets of the follow graph.
///
/// `follows` holds `(left, right)` meaning the user in `left` follows the user in `right`;
/// `watchers` holds the transpose `(right, left)` and is what status updates scan to find whom
/// to notify.  Routing every mutation through [`link`], [`unlink`] or [`toggle`] keeps the two
/// sets in lockstep.
///
/// [`link`]: FollowEdges::link
/// [`unlink`]: FollowEdges::unlink
/// [`toggle`]: FollowEdges::toggle
pub(crate) struct FollowEdges {
    follows: PairSet,
    watchers: PairSet,
}

impl FollowEdges {
    pub fn new() -> Self {
        Self {
            follows: PairSet::new(),
            watchers: PairSet::new(),
        }
    }

    pub fn link(&self, left: u32, right: u32) {
        self.follows.add(left, right);
        self.watchers.add(right, left);
    }

    pub fn unlink(&self, left: u32, right: u32) {
        self.follows.remove(left, right);
        self.watchers.remove(right, left);
    }

    pub fn toggle(&self, on: bool, left: u32, right: u32) {
        self.follows.toggle(on, left, right);
        self.watchers.toggle(on, right, left);
    }

    pub fn is_follow(&self, left: u32, right: u32) -> bool {
        self.follows.has(left, right)
    }

    /// Slots the user in `left` follows.
    pub fn follows_of(&self, left: u32) -> Vec<u32> {
        self.follows.read(left)
    }

    /// Slots whose users follow the user in `right`.
    pub fn watchers_of(&self, right: u32) -> Vec<u32> {
        self.watchers.read(right)
    }
}
