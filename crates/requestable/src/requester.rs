//! Requester identity.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Location, Token};

/// The party that created a request.
///
/// A requester is a building, a citizen, the colony itself, or a resolver
/// asking for the inputs of its own work. It is referred to by identity and
/// location, never by reference, so a request outlives an unloaded requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Requester {
    /// Stable identity, usable as a map key
    pub id: Token,
    /// Where the requester lives
    pub location: Location,
}

impl Requester {
    /// Create a requester handle.
    #[must_use]
    pub const fn new(id: Token, location: Location) -> Self {
        Self { id, location }
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.location)
    }
}
