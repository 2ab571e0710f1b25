//! In-memory cache of the follow graph around currently-online users.
//!
//! For any user with an active session, the cache remembers whom that user follows, answers
//! "who among them is online right now, and with what status", and, conversely, answers
//! "which watching users should be notified when this user's status changes".  The
//! authoritative follow lists live in a backing store and are pulled in on demand through a
//! [`FollowLoader`]; the cache keeps a best-effort projection of them that is good enough for
//! push notifications.
//!
//! Capacity is fixed at construction time.  Under pressure, entries of users not known to be
//! online are reclaimed first, and as a last resort an online user's entry is overwritten.
//! Updates can be lost when the cache is saturated, but notifications are never fabricated: a
//! slot is always severed from the edge sets before it is handed to a new owner.

mod graph;
mod pair_set;
mod slot_table;
mod user;

pub use graph::SocialGraph;
pub use user::{FollowLoader, FollowRecord, UserId, UserInfo, UserMeta};
