//! Outbox for requesters outside the resolver graph.
//!
//! Top-level requesters (citizens, buildings) are not resolvers and cannot be
//! called back. When one of their requests settles, a [`Notice`] is queued
//! under the requester's token and the requester drains it on its own
//! schedule.

use std::collections::BTreeMap;
use std::fmt;

use requestable::Token;
use serde::{Deserialize, Serialize};

/// How a request settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoticeKind {
    /// Fulfilled by its resolver
    Completed,
    /// Fulfilled by an override, usually the player
    Overruled,
    /// Cancelled before fulfilment
    Cancelled,
    /// Given up by its resolver
    Failed,
}

impl NoticeKind {
    /// Returns true if the requester got what it asked for.
    #[must_use]
    pub const fn is_fulfilled(self) -> bool {
        matches!(self, Self::Completed | Self::Overruled)
    }
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Overruled => write!(f, "overruled"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One queued notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// The request that settled
    pub request: Token,
    /// How it settled
    pub kind: NoticeKind,
}

/// Pending notices per requester, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticeBoard {
    pending: BTreeMap<Token, Vec<Notice>>,
}

impl NoticeBoard {
    /// Creates an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of queued notices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Queued notices for `requester`, without removing them.
    #[must_use]
    pub fn peek(&self, requester: Token) -> &[Notice] {
        self.pending.get(&requester).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn push(&mut self, requester: Token, notice: Notice) {
        self.pending.entry(requester).or_default().push(notice);
    }

    pub(crate) fn drain(&mut self, requester: Token) -> Vec<Notice> {
        self.pending.remove(&requester).unwrap_or_default()
    }

    /// Drops every notice about `request`.
    pub(crate) fn forget_request(&mut self, request: Token) {
        self.pending.retain(|_, notices| {
            notices.retain(|n| n.request != request);
            !notices.is_empty()
        });
    }

    /// Drops everything queued for `requester`.
    pub(crate) fn forget_requester(&mut self, requester: Token) {
        self.pending.remove(&requester);
    }
}
