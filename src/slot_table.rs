//! Fixed-capacity open-addressed table of user entries, guarded by striped locks.

use std::{
    cell::RefCell,
    collections::hash_map::RandomState,
    hash::BuildHasher as _,
};

use log::{debug, warn};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::{
    pair_set::FollowEdges,
    user::{UserId, UserInfo, UserMeta},
};

/// How far past the home slot the resolver probes before declaring the window full.
pub(crate) const MAX_STRIDE: u32 = 20;

/// Slot locks are striped over the low bits of the slot index.  This bounds lock memory
/// independently of the table capacity; two slots sharing a stripe simply serialize.
const STRIPE_BITS: u32 = 10;
const STRIPE_COUNT: usize = 1 << STRIPE_BITS;

/// One user known to the cache.
#[derive(Debug, Clone)]
pub(crate) struct UserEntry {
    pub id: UserId,
    pub username: Option<String>,
    pub meta: Option<UserMeta>,
    /// True iff the follow list cached for this slot as the left-hand side is backed by a
    /// completed load, modulo explicit follow/unfollow calls since.
    pub fresh: bool,
}

impl UserEntry {
    /// Entry installed for a user whose follow list has just been loaded.
    pub fn loaded(id: UserId) -> Self {
        Self {
            id,
            username: None,
            meta: None,
            fresh: true,
        }
    }

    /// Entry installed for a user discovered on the right-hand side of a merge.
    pub fn merged(id: UserId, username: String) -> Self {
        Self {
            id,
            username: Some(username),
            meta: None,
            fresh: false,
        }
    }

    /// Entry installed for a user first seen through a status update.
    pub fn told(id: UserId, meta: UserMeta) -> Self {
        Self {
            id,
            username: None,
            meta: Some(meta),
            fresh: false,
        }
    }
}

/// Cells of the slots that hash into one stripe, owned by that stripe's lock.
type StripeCells = Vec<RefCell<Option<UserEntry>>>;

/// Open-addressed array of user entries.
///
/// Each stripe lock owns the cells of the slots that map onto it, so holding the stripe is the
/// only way to reach a cell and [`SlotGuard`] is the only door to one.  Stripes are reentrant
/// so that a thread already holding one can probe or sever slots that happen to share it; the
/// `RefCell` per cell keeps borrows checked in that doubly-held case.
pub(crate) struct SlotTable {
    stripes: Box<[ReentrantMutex<StripeCells>]>,
    mask: u32,
    hasher: RandomState,
}

/// Result of [`SlotTable::resolve`].  The slot's lock is held either way.
pub(crate) enum Resolved<'a> {
    /// The cell is empty; the caller is expected to install an entry before dropping the guard.
    New(SlotGuard<'a>),
    /// The cell already belongs to the requested user.
    Existing(SlotGuard<'a>),
}

impl SlotTable {
    /// Creates a table with `2^log_capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `log_capacity` is not in `1..=30`.
    pub fn new(log_capacity: u32) -> Self {
        assert!(
            (1..=30).contains(&log_capacity),
            "log_capacity out of range: {log_capacity}"
        );
        let capacity = 1_usize << log_capacity;
        Self {
            stripes: (0..STRIPE_COUNT)
                .map(|stripe| {
                    let cells = (stripe..capacity).step_by(STRIPE_COUNT).count();
                    ReentrantMutex::new(
                        (0..cells).map(|_| RefCell::new(None)).collect::<StripeCells>(),
                    )
                })
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            mask: (capacity - 1) as u32,
            hasher: RandomState::new(),
        }
    }

    fn home(&self, id: &UserId) -> u32 {
        self.hasher.hash_one(id) as u32 & self.mask
    }

    /// Locks a slot.  Blocks; callers must not hold another guard when calling this, except for
    /// re-acquisitions by the same thread, which the reentrant stripe absorbs.
    pub fn lock_slot(&self, slot: u32) -> SlotGuard<'_> {
        let stripe = self.stripes[slot as usize & (STRIPE_COUNT - 1)].lock();
        SlotGuard {
            slot,
            offset: slot as usize >> STRIPE_BITS,
            stripe,
        }
    }

    fn try_lock_slot(&self, slot: u32) -> Option<SlotGuard<'_>> {
        let stripe = self.stripes[slot as usize & (STRIPE_COUNT - 1)].try_lock()?;
        Some(SlotGuard {
            slot,
            offset: slot as usize >> STRIPE_BITS,
            stripe,
        })
    }

    /// Finds the slot already occupied by `id`, claiming nothing.
    ///
    /// Probing stops at the first empty cell: occupied cells never return to empty (reclamation
    /// replaces the owner under the same lock hold), so an empty cell before a match means the
    /// user was never installed in this window.
    pub fn lookup(&self, id: &UserId) -> Option<SlotGuard<'_>> {
        let home = self.home(id);
        for stride in 0..=MAX_STRIDE {
            let guard = self.lock_slot((home + stride) & self.mask);
            if guard.is_empty() {
                return None;
            }
            if guard.holds(id) {
                return Some(guard);
            }
        }
        None
    }

    /// Locates or claims a slot for `id` and returns it with its lock held.
    ///
    /// Three passes over the probe window, cheapest first: take an empty or matching cell;
    /// failing that, reclaim a cell whose user is not known to be online; failing that,
    /// overwrite the home cell outright.  A [`Resolved::New`] cell is empty on return.
    pub fn resolve<'a>(&'a self, id: &UserId, edges: &FollowEdges) -> Resolved<'a> {
        let home = self.home(id);
        for stride in 0..=MAX_STRIDE {
            let guard = self.lock_slot((home + stride) & self.mask);
            if guard.is_empty() {
                return Resolved::New(guard);
            }
            if guard.holds(id) {
                return Resolved::Existing(guard);
            }
        }
        for stride in 0..=MAX_STRIDE {
            let guard = self.lock_slot((home + stride) & self.mask);
            if guard.is_reclaimable() {
                debug!("reclaiming slot {} for {id}", guard.index());
                self.sever(&guard, edges);
                guard.clear();
                return Resolved::New(guard);
            }
        }
        // The whole window is occupied by online strangers.  Dropping a live entry loses
        // updates for its user, which the cache is allowed to do once saturated.
        let guard = self.lock_slot(home);
        warn!("slot table saturated, overwriting slot {} for {id}", guard.index());
        self.sever(&guard, edges);
        guard.clear();
        Resolved::New(guard)
    }

    /// Severs every edge incident to a slot that is about to change owners.
    ///
    /// Outgoing and incoming edges are removed from both adjacency sets, and the counterpart
    /// slot of each removed edge is conservatively marked stale so its next `followed` reloads.
    /// Edge removal is lock-free and unconditional.  The stale mark needs the counterpart's
    /// lock; blocking for it while already holding this slot's lock could deadlock against a
    /// concurrent severing running in the opposite direction, so the mark is skipped when the
    /// lock is contended.  A skipped mark widens staleness only: the edge is already gone, so
    /// no notification can be fabricated through it.
    pub fn sever(&self, held: &SlotGuard<'_>, edges: &FollowEdges) {
        let slot = held.index();
        for right in edges.follows_of(slot) {
            edges.unlink(slot, right);
            if let Some(guard) = self.try_lock_slot(right) {
                guard.mark_stale();
            }
        }
        for left in edges.watchers_of(slot) {
            edges.unlink(left, slot);
            if let Some(guard) = self.try_lock_slot(left) {
                guard.mark_stale();
            }
        }
    }
}

/// Exclusive access to one slot, backed by its held stripe lock.
pub(crate) struct SlotGuard<'a> {
    slot: u32,
    offset: usize,
    stripe: ReentrantMutexGuard<'a, StripeCells>,
}

impl SlotGuard<'_> {
    fn cell(&self) -> &RefCell<Option<UserEntry>> {
        &self.stripe[self.offset]
    }

    pub fn index(&self) -> u32 {
        self.slot
    }

    pub fn is_empty(&self) -> bool {
        self.cell().borrow().is_none()
    }

    pub fn holds(&self, id: &UserId) -> bool {
        self.cell().borrow().as_ref().is_some_and(|entry| entry.id == *id)
    }

    /// A cell is reclaimable while its user has never reported a status, or reported offline.
    pub fn is_reclaimable(&self) -> bool {
        self.cell()
            .borrow()
            .as_ref()
            .is_none_or(|entry| !entry.meta.is_some_and(UserMeta::online))
    }

    pub fn fresh(&self) -> bool {
        self.cell().borrow().as_ref().is_some_and(|entry| entry.fresh)
    }

    pub fn id(&self) -> Option<UserId> {
        self.cell().borrow().as_ref().map(|entry| entry.id.clone())
    }

    pub fn meta(&self) -> Option<UserMeta> {
        self.cell().borrow().as_ref().and_then(|entry| entry.meta)
    }

    /// The entry as a [`UserInfo`], or `None` while the cell is empty or the username unknown.
    pub fn info(&self) -> Option<UserInfo> {
        let cell = self.cell().borrow();
        let entry = cell.as_ref()?;
        Some(UserInfo {
            id: entry.id.clone(),
            username: entry.username.clone()?,
            meta: entry.meta,
        })
    }

    pub fn install(&self, entry: UserEntry) {
        *self.cell().borrow_mut() = Some(entry);
    }

    pub fn clear(&self) {
        *self.cell().borrow_mut() = None;
    }

    pub fn set_fresh(&self, fresh: bool) {
        if let Some(entry) = self.cell().borrow_mut().as_mut() {
            entry.fresh = fresh;
        }
    }

    pub fn mark_stale(&self) {
        self.set_fresh(false);
    }

    pub fn set_username(&self, username: String) {
        if let Some(entry) = self.cell().borrow_mut().as_mut() {
            entry.username = Some(username);
        }
    }

    pub fn set_meta(&self, meta: UserMeta) {
        if let Some(entry) = self.cell().borrow_mut().as_mut() {
            entry.meta = Some(meta);
        }
    }
}
