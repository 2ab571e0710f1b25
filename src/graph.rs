//! Public surface of the cache: cached follow lists, edge updates, status fan-out.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use futures::TryStreamExt as _;
use log::trace;

use crate::{
    pair_set::FollowEdges,
    slot_table::{Resolved, SlotTable, UserEntry},
    user::{FollowLoader, FollowRecord, UserId, UserInfo, UserMeta},
};

/// Bounded, concurrent cache of the follow graph around currently-online users.
///
/// The cache tracks at most `2^log_capacity` users at a time.  Follow lists come from the
/// [`FollowLoader`] and are merged into a slot table plus two mirrored edge sets; the session
/// layer shares one instance behind an [`Arc`] across all of its connections.
pub struct SocialGraph {
    table: SlotTable,
    edges: FollowEdges,
    loader: Arc<dyn FollowLoader>,
}

impl SocialGraph {
    /// Creates a cache with `2^log_capacity` slots, filling follow lists through `loader`.
    ///
    /// # Panics
    ///
    /// Panics if `log_capacity` is not in `1..=30`.
    pub fn new(loader: Arc<dyn FollowLoader>, log_capacity: u32) -> Self {
        Self {
            table: SlotTable::new(log_capacity),
            edges: FollowEdges::new(),
            loader,
        }
    }

    /// Users that `id` follows, with their cached status.
    ///
    /// Served synchronously from the cache when the entry is fresh; otherwise the loader is
    /// consulted and its result merged in.  Followed users whose username is not known yet are
    /// left out of the list.  No slot lock is held while the loader runs, and a failing load
    /// leaves the cache untouched.
    pub async fn followed(&self, id: &UserId) -> Result<Vec<UserInfo>> {
        if let Some(infos) = self.cached_followed(id) {
            return Ok(infos);
        }
        let records: Vec<FollowRecord> = self
            .loader
            .load(id.clone())
            .try_collect()
            .await
            .with_context(|| format!("loading followed users of {id}"))?;
        trace!("loaded {} followed users of {id}", records.len());
        Ok(self.merge(id, records))
    }

    /// Records that `left` follows `right`.
    ///
    /// A no-op unless both users already occupy slots: tracking a stranger would spend a
    /// scarce slot for no benefit.
    pub fn follow(&self, left: &UserId, right: &UserId) {
        self.toggle(true, left, right);
    }

    /// Removes the `left` follows `right` edge, if present.
    pub fn unfollow(&self, left: &UserId, right: &UserId) {
        self.toggle(false, left, right);
    }

    /// Updates the status of `id` and returns the users to notify: those whose cached follow
    /// list contains `id`.
    ///
    /// A user nobody has loaded yet has no watchers, so a first-ever `tell` just installs the
    /// status and returns nothing.
    pub fn tell(&self, id: &UserId, meta: UserMeta) -> Vec<UserId> {
        let slot = match self.table.resolve(id, &self.edges) {
            Resolved::Existing(guard) => {
                guard.set_meta(meta);
                guard.index()
            }
            Resolved::New(guard) => {
                guard.install(UserEntry::told(id.clone(), meta));
                return Vec::new();
            }
        };
        self.watchers(slot)
    }

    /// The fresh cached projection for `id`, or `None` when a load is needed.
    fn cached_followed(&self, id: &UserId) -> Option<Vec<UserInfo>> {
        let slot = {
            let guard = self.table.lookup(id)?;
            guard.fresh().then(|| guard.index())?
        };
        // The subject's guard is gone; each neighbor is read under its own slot lock, and the
        // list is only as consistent as a concurrently mutated cache can be.
        let infos = self
            .edges
            .follows_of(slot)
            .into_iter()
            .filter_map(|right| self.table.lock_slot(right).info())
            .collect();
        Some(infos)
    }

    /// Installs a completed load and links its records into the edge sets.
    ///
    /// The left slot is resolved anew rather than carried across the await: the table may have
    /// moved on while the loader ran.
    fn merge(&self, id: &UserId, records: Vec<FollowRecord>) -> Vec<UserInfo> {
        let slot = match self.table.resolve(id, &self.edges) {
            Resolved::New(guard) => {
                guard.install(UserEntry::loaded(id.clone()));
                guard.index()
            }
            Resolved::Existing(guard) => {
                guard.set_fresh(true);
                guard.index()
            }
        };
        let mut infos = Vec::with_capacity(records.len());
        for record in records {
            let info = match self.table.resolve(&record.id, &self.edges) {
                Resolved::New(guard) => {
                    guard.install(UserEntry::merged(record.id.clone(), record.username.clone()));
                    self.edges.link(slot, guard.index());
                    UserInfo {
                        id: record.id,
                        username: record.username,
                        meta: None,
                    }
                }
                Resolved::Existing(guard) => {
                    guard.set_username(record.username.clone());
                    self.edges.link(slot, guard.index());
                    UserInfo {
                        id: record.id,
                        username: record.username,
                        meta: guard.meta(),
                    }
                }
            };
            infos.push(info);
        }
        infos
    }

    fn toggle(&self, on: bool, left: &UserId, right: &UserId) {
        let Some(left_slot) = self.table.lookup(left).map(|guard| guard.index()) else {
            return;
        };
        let Some(right_slot) = self.table.lookup(right).map(|guard| guard.index()) else {
            return;
        };
        // Both lookups released their locks, so re-check the left owner before touching the
        // edges: the slot may have been reclaimed in between.  The mirror check in `watchers`
        // papers over the same race on the right side.
        let guard = self.table.lock_slot(left_slot);
        if !guard.holds(left) {
            return;
        }
        self.edges.toggle(on, left_slot, right_slot);
    }

    fn watchers(&self, slot: u32) -> Vec<UserId> {
        self.edges
            .watchers_of(slot)
            .into_iter()
            // Slot reuse can leave the two adjacency sets briefly asymmetric; only report a
            // watcher whose own outgoing edge is still present.
            .filter(|&left| self.edges.is_follow(left, slot))
            .filter_map(|left| self.table.lock_slot(left).id())
            .collect()
    }
}
