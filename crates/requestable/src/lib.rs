//! # Requestable
//!
//! Value types that a colony can ask for, and the opaque handles used to refer
//! to the parties involved.
//!
//! Everything in this crate is plain data: structurally comparable, hashable
//! and serializable. The request engine (`colony-requests`) never holds live
//! pointers to game objects; it holds [`Token`]s and the values defined here.
//!
//! - [`Token`]: opaque identifier for requests, resolvers and requesters
//! - [`RequestKinds`]: the explicit category set used for resolver matching
//! - [`Requestable`]: the closed set of things that can be requested
//! - [`Requester`]: who asked (identity plus location, never a reference)
//!
//! ## Quick Start
//!
//! ```
//! use requestable::{ItemStack, RequestKinds, Requestable, Stack, Tool, ToolClass};
//!
//! let planks = Requestable::Stack(Stack::new(ItemStack::new("oak_planks", 16)));
//! assert!(planks.kinds().contains(RequestKinds::ITEM | RequestKinds::RETRYABLE));
//!
//! // A resolver serving "any tool" is eligible for a specific pickaxe request.
//! let pick = Requestable::Tool(Tool::new(ToolClass::Pickaxe, 1, 3).unwrap());
//! assert!(pick.kinds().intersects(RequestKinds::TOOL));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod item;
pub mod kinds;
pub mod requester;
pub mod token;
pub mod value;

pub use item::ItemStack;
pub use kinds::RequestKinds;
pub use requester::Requester;
pub use token::{Token, TokenParseError};
pub use value::{
    Burnable, Delivery, Food, Pickup, Requestable, RequestableError, Stack, Tool, ToolClass,
};

/// Block position in the colony's world.
///
/// Used for requester identity and for distance-based suitability.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize,
    serde::Deserialize,
)]
pub struct Location {
    /// East/west coordinate
    pub x: i32,
    /// Vertical coordinate
    pub y: i32,
    /// North/south coordinate
    pub z: i32,
}

impl Location {
    /// Create a location from block coordinates.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Squared block distance to another location.
    ///
    /// Saturates at `i64::MAX` for coordinates at the far ends of the world.
    #[must_use]
    pub fn distance_squared(&self, other: &Self) -> i64 {
        let dx = i64::from(self.x) - i64::from(other.x);
        let dy = i64::from(self.y) - i64::from(other.y);
        let dz = i64::from(self.z) - i64::from(other.z);
        dx.saturating_mul(dx)
            .saturating_add(dy.saturating_mul(dy))
            .saturating_add(dz.saturating_mul(dz))
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}
