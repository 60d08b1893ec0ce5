//! Category sets used to match requests against resolvers.
//!
//! Instead of walking a type hierarchy at runtime, every requestable value
//! declares the explicit set of categories it belongs to, and every resolver
//! declares the set it serves. A resolver is eligible for a request when the
//! two sets intersect. A "specific" resolver serves a narrow flag
//! (`PICKAXE`); a "generic" one serves the broad flag (`TOOL`).

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Request categories.
    ///
    /// Flags are persisted by bit value: append new flags, never renumber.
    ///
    /// # Example
    ///
    /// ```
    /// use requestable::RequestKinds;
    ///
    /// let pickaxe = RequestKinds::TOOL | RequestKinds::PICKAXE;
    /// let any_tool = RequestKinds::TOOL;
    /// let only_axes = RequestKinds::AXE;
    ///
    /// assert!(pickaxe.intersects(any_tool));
    /// assert!(!pickaxe.intersects(only_axes));
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct RequestKinds: u32 {
        /// Any plain item stack
        const ITEM = 1 << 0;
        /// Any tool
        const TOOL = 1 << 1;
        /// Pickaxes
        const PICKAXE = 1 << 2;
        /// Axes
        const AXE = 1 << 3;
        /// Shovels
        const SHOVEL = 1 << 4;
        /// Hoes
        const HOE = 1 << 5;
        /// Weapons
        const WEAPON = 1 << 6;
        /// Food of any kind
        const FOOD = 1 << 7;
        /// Fuel for furnaces
        const BURNABLE = 1 << 8;
        /// Moving an item stack between two locations
        const DELIVERY = 1 << 9;
        /// Collecting items from a building
        const PICKUP = 1 << 10;
        /// Opts the request into retry semantics when nothing can serve it
        const RETRYABLE = 1 << 11;
    }
}

impl RequestKinds {
    /// Returns true if a resolver serving `served` may look at a request of
    /// these kinds.
    #[must_use]
    pub fn eligible_for(self, served: Self) -> bool {
        self.intersects(served)
    }
}
