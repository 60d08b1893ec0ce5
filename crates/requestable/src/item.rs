//! Concrete items.
//!
//! The inventory model itself lives outside the request engine; an
//! [`ItemStack`] is just enough of it to describe what was asked for and what
//! was delivered.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A quantity of one item type, identified by its registry name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemStack {
    /// Registry name of the item (e.g. `"oak_planks"`)
    pub item: String,
    /// Number of items
    pub count: u32,
}

impl ItemStack {
    /// Create a stack of `count` items named `item`.
    #[must_use]
    pub fn new(item: impl Into<String>, count: u32) -> Self {
        Self {
            item: item.into(),
            count,
        }
    }

    /// Returns true if both stacks hold the same item type, ignoring count.
    #[must_use]
    pub fn same_item(&self, other: &Self) -> bool {
        self.item == other.item
    }

    /// Returns true if the stack holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl fmt::Display for ItemStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x {}", self.count, self.item)
    }
}
