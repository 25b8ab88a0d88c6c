//! Notifications emitted while entity mutations settle.
//!
//! Every gesture ends in exactly one of three user-visible outcomes: the
//! mutation persisted, it was queued for replay, or it failed and was
//! rolled back. Subscribers receive them through the session channel.

mod channel;

pub use channel::{SessionChannel, SessionEvents, SubscribeOptions};

use crate::session::{EntityKey, SessionId};

/// Generic event wrapper.
#[derive(Debug, Clone)]
pub struct Event<T> {
    inner: T,
}

/// Settlement outcome of one entity mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The mutation persisted remotely; the entity is clean.
    Saved,
    /// Connectivity failed; the mutation is queued and the optimistic
    /// value stays applied.
    Queued,
    /// The server rejected the mutation; the entity was rolled back.
    Failed {
        message: String,
    },
}

/// Notification message carrying its session and entity context.
#[derive(Debug, Clone)]
pub struct SessionMessage {
    /// Session that emitted the notification.
    pub sid: SessionId,
    /// Entity the notification is about.
    pub key: EntityKey,
    /// The settlement outcome.
    pub notification: Notification,
}

impl<T> std::ops::Deref for Event<T>
where
    T: std::fmt::Debug + Clone,
{
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> Event<T>
where
    T: std::fmt::Debug + Clone,
{
    pub fn new(inner: &T) -> Self {
        Self {
            inner: inner.clone(),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl Notification {
    pub fn is_saved(&self) -> bool {
        matches!(self, Notification::Saved)
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Notification::Queued)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Notification::Failed { .. })
    }
}
