//! Types crossing the cache boundary, and the loader seam to the backing store.

use std::{fmt, sync::Arc};

use anyhow::Result;
use bitflags::bitflags;
use futures::stream::BoxStream;

/// Opaque user identifier.
///
/// Cheap to clone; the cache stores these by value and hands them back in notification lists.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(Arc<str>);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

bitflags! {
    /// Status bits reported for a user via [`SocialGraph::tell`].
    ///
    /// Kept as a bit set so new status bits can be added without touching the cache itself.
    ///
    /// [`SocialGraph::tell`]: crate::SocialGraph::tell
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UserMeta: u8 {
        const ONLINE = 1;
    }
}

impl UserMeta {
    pub fn online(self) -> bool {
        self.contains(Self::ONLINE)
    }
}

/// One followed user, as reported by the backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowRecord {
    pub id: UserId,
    pub username: String,
}

/// A followed user as the cache currently sees them.
///
/// `meta` stays `None` until some status has been reported for that user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: UserId,
    pub username: String,
    pub meta: Option<UserMeta>,
}

/// Asynchronous provider of the authoritative follow list of a user.
///
/// The stream is collected in full before any cache state is touched, so a failing load leaves
/// the cache exactly as it was.
pub trait FollowLoader: Send + Sync {
    fn load(&self, id: UserId) -> BoxStream<'static, Result<FollowRecord>>;
}
