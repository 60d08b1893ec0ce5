//! The closed set of requestable values.
//!
//! [`Requestable`] is a tagged enum: the variant is the discriminator and
//! [`Requestable::kinds`] is the declared category set used for resolver
//! matching. Resolvers narrow further with a structural predicate such as
//! [`Requestable::matches`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::{ItemStack, Location, RequestKinds};

/// Errors raised when constructing a requestable with inconsistent fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestableError {
    /// Minimum tool level above the maximum.
    #[error("tool level range {min}..={max} is empty")]
    EmptyToolLevelRange {
        /// Requested minimum level
        min: u8,
        /// Requested maximum level
        max: u8,
    },

    /// Minimum count above the requested count.
    #[error("minimum count {min} exceeds requested count {count}")]
    MinimumAboveCount {
        /// Requested count
        count: u32,
        /// Requested minimum
        min: u32,
    },
}

// =============================================================================
// Variants
// =============================================================================

/// A number of a specific item.
///
/// `min_count` lets a resolver satisfy the request partially: anything
/// between `min_count` and `stack.count` items is acceptable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stack {
    /// The item and desired count
    pub stack: ItemStack,
    /// Smallest acceptable delivery
    pub min_count: u32,
}

impl Stack {
    /// Request exactly `stack`.
    #[must_use]
    pub fn new(stack: ItemStack) -> Self {
        let min_count = stack.count;
        Self { stack, min_count }
    }

    /// Request `stack`, accepting as few as `min_count` items.
    ///
    /// # Errors
    ///
    /// Returns [`RequestableError::MinimumAboveCount`] if `min_count` exceeds
    /// the stack count.
    pub fn with_minimum(stack: ItemStack, min_count: u32) -> Result<Self, RequestableError> {
        if min_count > stack.count {
            return Err(RequestableError::MinimumAboveCount {
                count: stack.count,
                min: min_count,
            });
        }
        Ok(Self { stack, min_count })
    }
}

/// Tool classes a citizen may need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ToolClass {
    /// Mining tools
    Pickaxe,
    /// Wood cutting tools
    Axe,
    /// Digging tools
    Shovel,
    /// Farming tools
    Hoe,
    /// Guard weapons
    Sword,
}

impl ToolClass {
    /// Category flag for this class, without the generic `TOOL` flag.
    #[must_use]
    pub const fn kind(self) -> RequestKinds {
        match self {
            Self::Pickaxe => RequestKinds::PICKAXE,
            Self::Axe => RequestKinds::AXE,
            Self::Shovel => RequestKinds::SHOVEL,
            Self::Hoe => RequestKinds::HOE,
            Self::Sword => RequestKinds::WEAPON,
        }
    }

    /// Item name suffix used to recognise delivered tools of this class.
    #[must_use]
    pub const fn item_suffix(self) -> &'static str {
        match self {
            Self::Pickaxe => "_pickaxe",
            Self::Axe => "_axe",
            Self::Shovel => "_shovel",
            Self::Hoe => "_hoe",
            Self::Sword => "_sword",
        }
    }
}

impl fmt::Display for ToolClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pickaxe => write!(f, "pickaxe"),
            Self::Axe => write!(f, "axe"),
            Self::Shovel => write!(f, "shovel"),
            Self::Hoe => write!(f, "hoe"),
            Self::Sword => write!(f, "sword"),
        }
    }
}

/// A tool of a given class within a level range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tool {
    /// Tool class
    pub class: ToolClass,
    /// Lowest acceptable material level
    pub min_level: u8,
    /// Highest acceptable material level (the worker's building limit)
    pub max_level: u8,
}

impl Tool {
    /// Request a tool of `class` with a level in `min_level..=max_level`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestableError::EmptyToolLevelRange`] if the range is empty.
    pub fn new(class: ToolClass, min_level: u8, max_level: u8) -> Result<Self, RequestableError> {
        if min_level > max_level {
            return Err(RequestableError::EmptyToolLevelRange {
                min: min_level,
                max: max_level,
            });
        }
        Ok(Self {
            class,
            min_level,
            max_level,
        })
    }
}

/// Any food items totalling a minimum saturation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Food {
    /// Number of food items wanted
    pub count: u32,
    /// Smallest acceptable saturation per item
    pub min_saturation: u8,
}

/// Furnace fuel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Burnable {
    /// Number of fuel items wanted
    pub count: u32,
}

/// Moving a stack from one place to another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Delivery {
    /// What to move
    pub stack: ItemStack,
    /// Where to pick it up
    pub start: Location,
    /// Where to drop it off
    pub target: Location,
    /// Courier priority, higher first
    pub priority: u8,
}

/// Clearing a building's output inventory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pickup {
    /// Building to empty
    pub location: Location,
    /// Courier priority, higher first
    pub priority: u8,
}

// =============================================================================
// Requestable
// =============================================================================

/// Everything a requester can ask for.
///
/// # Example
///
/// ```
/// use requestable::{Burnable, ItemStack, Requestable, RequestKinds};
///
/// let fuel = Requestable::Burnable(Burnable { count: 8 });
/// assert!(fuel.kinds().contains(RequestKinds::BURNABLE));
/// assert!(fuel.matches(&ItemStack::new("coal", 8)));
/// assert!(!fuel.matches(&ItemStack::new("cobblestone", 8)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Requestable {
    /// A specific item
    Stack(Stack),
    /// A tool
    Tool(Tool),
    /// Food
    Food(Food),
    /// Fuel
    Burnable(Burnable),
    /// A courier delivery
    Delivery(Delivery),
    /// A courier pickup
    Pickup(Pickup),
}

/// Item names accepted as fuel by [`Requestable::matches`].
const FUEL_ITEMS: &[&str] = &["coal", "charcoal", "coal_block", "oak_log", "oak_planks", "stick"];

/// Item names accepted as food, with their saturation.
const FOOD_ITEMS: &[(&str, u8)] = &[
    ("bread", 5),
    ("baked_potato", 5),
    ("cooked_beef", 8),
    ("cooked_porkchop", 8),
    ("cooked_cod", 5),
    ("apple", 4),
    ("carrot", 3),
];

/// Material level by tool item prefix.
const TOOL_LEVELS: &[(&str, u8)] = &[
    ("wooden", 0),
    ("golden", 0),
    ("stone", 1),
    ("iron", 2),
    ("diamond", 3),
    ("netherite", 4),
];

impl Requestable {
    /// Declared category set for resolver matching.
    #[must_use]
    pub fn kinds(&self) -> RequestKinds {
        match self {
            Self::Stack(_) => RequestKinds::ITEM | RequestKinds::RETRYABLE,
            Self::Tool(tool) => RequestKinds::TOOL | tool.class.kind() | RequestKinds::RETRYABLE,
            Self::Food(_) => RequestKinds::FOOD | RequestKinds::RETRYABLE,
            Self::Burnable(_) => RequestKinds::BURNABLE | RequestKinds::RETRYABLE,
            Self::Delivery(_) => RequestKinds::DELIVERY,
            Self::Pickup(_) => RequestKinds::PICKUP,
        }
    }

    /// Returns true if this request opted into retry semantics.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kinds().contains(RequestKinds::RETRYABLE)
    }

    /// Returns true if `stack` would satisfy this request.
    ///
    /// Courier requests (deliveries and pickups) are not satisfied by items
    /// and always return false.
    #[must_use]
    pub fn matches(&self, stack: &ItemStack) -> bool {
        match self {
            Self::Stack(wanted) => {
                wanted.stack.same_item(stack) && stack.count >= wanted.min_count
            }
            Self::Tool(tool) => stack
                .item
                .strip_suffix(tool.class.item_suffix())
                .and_then(|material| {
                    TOOL_LEVELS
                        .iter()
                        .find(|(name, _)| *name == material)
                        .map(|(_, level)| *level)
                })
                .is_some_and(|level| (tool.min_level..=tool.max_level).contains(&level)),
            Self::Food(food) => FOOD_ITEMS
                .iter()
                .any(|(name, sat)| *name == stack.item && *sat >= food.min_saturation),
            Self::Burnable(_) => FUEL_ITEMS.contains(&stack.item.as_str()),
            Self::Delivery(_) | Self::Pickup(_) => false,
        }
    }

    /// Number of items this request asks for, if it is item-shaped.
    #[must_use]
    pub fn count(&self) -> Option<u32> {
        match self {
            Self::Stack(stack) => Some(stack.stack.count),
            Self::Tool(_) => Some(1),
            Self::Food(food) => Some(food.count),
            Self::Burnable(fuel) => Some(fuel.count),
            Self::Delivery(delivery) => Some(delivery.stack.count),
            Self::Pickup(_) => None,
        }
    }

    /// Short human-readable description, shown to players.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::Stack(stack) => stack.stack.to_string(),
            Self::Tool(tool) => format!(
                "{} (level {}-{})",
                tool.class, tool.min_level, tool.max_level
            ),
            Self::Food(food) => format!("{}x food", food.count),
            Self::Burnable(fuel) => format!("{}x fuel", fuel.count),
            Self::Delivery(delivery) => format!(
                "deliver {} from {} to {}",
                delivery.stack, delivery.start, delivery.target
            ),
            Self::Pickup(pickup) => format!("pick up at {}", pickup.location),
        }
    }
}

impl fmt::Display for Requestable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}
