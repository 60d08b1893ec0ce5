//! Request lifecycle states.
//!
//! The lifecycle is a total order of stages with skippable steps and several
//! side branches:
//!
//! ```text
//! Created -> Reported -> Assigning -> Assigned -> InProgress -> Resolved
//!     -> (FollowupInProgress) -> Completed -> (Received)
//!
//! side branches: Overruled, Cancelled, Finalizing, Failed
//! ```
//!
//! # Persistence
//!
//! A state is persisted as its ordinal. Members may only ever be appended;
//! reordering or removing one silently corrupts every stored snapshot.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle stage of a request.
///
/// # Example
///
/// ```
/// use colony_requests::state::RequestState;
///
/// assert_eq!(RequestState::Assigned.ordinal(), 3);
/// assert_eq!(RequestState::from_ordinal(9), Some(RequestState::Cancelled));
/// assert!(RequestState::Cancelled.is_terminal());
/// assert!(!RequestState::InProgress.is_terminal());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum RequestState {
    /// Registered, no assignment attempted yet
    Created = 0,
    /// Known to the manager but currently unassigned
    Reported = 1,
    /// Resolver search in progress
    Assigning = 2,
    /// Bound to a resolver
    Assigned = 3,
    /// Resolver is working, or waiting for children
    InProgress = 4,
    /// Resolver produced its answer
    Resolved = 5,
    /// Waiting for follow-up requests spawned after resolution
    FollowupInProgress = 6,
    /// Done
    Completed = 7,
    /// Forced by the player
    Overruled = 8,
    /// Cancelled
    Cancelled = 9,
    /// Requester confirmed receipt of a completed request
    Received = 10,
    /// Cancellation cascade in flight
    Finalizing = 11,
    /// Resolver gave up
    Failed = 12,
}

impl RequestState {
    /// Every state in ordinal order.
    pub const ALL: [Self; 13] = [
        Self::Created,
        Self::Reported,
        Self::Assigning,
        Self::Assigned,
        Self::InProgress,
        Self::Resolved,
        Self::FollowupInProgress,
        Self::Completed,
        Self::Overruled,
        Self::Cancelled,
        Self::Received,
        Self::Finalizing,
        Self::Failed,
    ];

    /// Persisted numeric representation.
    #[must_use]
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Inverse of [`ordinal`](Self::ordinal).
    #[must_use]
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.get(usize::from(ordinal)).copied()
    }

    /// True for states a request never leaves on its own.
    ///
    /// Terminal requests are eligible for cleanup by their requester.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Overruled | Self::Cancelled | Self::Received | Self::Failed
        )
    }

    /// True for terminal states that delivered what was asked for.
    #[must_use]
    pub const fn is_fulfilled(self) -> bool {
        matches!(self, Self::Completed | Self::Overruled | Self::Received)
    }

    /// True while a new assignment may be attempted.
    #[must_use]
    pub const fn is_assignable(self) -> bool {
        matches!(self, Self::Created | Self::Reported)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "CREATED",
            Self::Reported => "REPORTED",
            Self::Assigning => "ASSIGNING",
            Self::Assigned => "ASSIGNED",
            Self::InProgress => "IN_PROGRESS",
            Self::Resolved => "RESOLVED",
            Self::FollowupInProgress => "FOLLOWUP_IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Overruled => "OVERRULED",
            Self::Cancelled => "CANCELLED",
            Self::Received => "RECEIVED",
            Self::Finalizing => "FINALIZING",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

impl From<RequestState> for u8 {
    fn from(state: RequestState) -> Self {
        state.ordinal()
    }
}

/// Error for a persisted ordinal with no matching state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown request state ordinal {0}")]
pub struct UnknownStateOrdinal(pub u8);

impl TryFrom<u8> for RequestState {
    type Error = UnknownStateOrdinal;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_ordinal(value).ok_or(UnknownStateOrdinal(value))
    }
}
