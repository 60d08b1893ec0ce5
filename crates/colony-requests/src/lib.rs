//! # Colony Requests
//!
//! Request brokering for a simulated colony.
//!
//! Citizens and buildings ask for things (items, tools, food, fuel, courier
//! work). Resolvers contributed by the colony's buildings and workers offer
//! to satisfy them. The engine matches the two, tracks every request through
//! its lifecycle, and keeps the dependency graph of sub-requests consistent
//! while resolvers come and go.
//!
//! ## Architecture
//!
//! - **Requests**: plain data in a [`RequestStore`](store::RequestStore),
//!   linked into parent/child trees by token
//! - **Resolvers**: trait objects in a [`ResolverRegistry`](registry::ResolverRegistry),
//!   plus two built-ins: the retry queue and the player fallback
//! - **Handler**: the [`RequestHandler`](handler::RequestHandler) state machine,
//!   the only code that changes request state
//! - **Manager**: the colony-facing [`RequestManager`](manager::RequestManager)
//!   with the tick loop, provider bookkeeping and snapshots
//!
//! ## Usage
//!
//! ```
//! use colony_requests::prelude::*;
//! use requestable::{ItemStack, Location, RequestKinds, Requestable, Requester, Stack, Token};
//!
//! struct Warehouse {
//!     token: Token,
//! }
//!
//! impl Resolver for Warehouse {
//!     fn token(&self) -> Token { self.token }
//!     fn location(&self) -> Location { Location::new(5, 64, 5) }
//!     fn kinds(&self) -> RequestKinds { RequestKinds::ITEM }
//!     fn priority(&self) -> i32 { 0 }
//!     fn can_resolve(&self, _ctx: &ResolverContext<'_>, _request: &Request) -> bool { true }
//!     fn attempt_resolve(
//!         &mut self,
//!         _ctx: &ResolverContext<'_>,
//!         _request: &Request,
//!     ) -> Option<Vec<Requestable>> {
//!         Some(Vec::new())
//!     }
//!     fn resolve(&mut self, _ctx: &ResolverContext<'_>, request: &Request) -> Resolution {
//!         match request.requested() {
//!             Requestable::Stack(stack) => Resolution::delivered(stack.stack.clone()),
//!             _ => Resolution::Failed,
//!         }
//!     }
//! }
//!
//! let mut manager = RequestManager::new(ManagerConfig::with_seed(9), Location::default()).unwrap();
//! let warehouse = manager.mint_token();
//! manager.register_resolver(Box::new(Warehouse { token: warehouse })).unwrap();
//!
//! let citizen = Requester::new(manager.mint_token(), Location::new(0, 64, 0));
//! let planks = Requestable::Stack(Stack::new(ItemStack::new("oak_planks", 8)));
//! let request = manager.create_and_assign_request(citizen, planks).unwrap();
//!
//! assert_eq!(manager.request(request).unwrap().state(), RequestState::Completed);
//! let notices = manager.drain_notices(citizen.id);
//! assert_eq!(notices[0].kind, NoticeKind::Completed);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
#[allow(missing_docs)]
pub mod error;
pub mod handler;
pub mod manager;
pub mod notice;
pub mod persistence;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod state;
pub mod store;
pub mod tokens;

pub use config::{AssigningStrategy, ManagerConfig, RetryConfig};
pub use error::{ConfigError, PersistenceError, RequestError};
pub use manager::RequestManager;
pub use notice::{Notice, NoticeKind};
pub use request::Request;
pub use resolver::{Resolution, Resolver, ResolverContext, ResolverProvider};
pub use state::RequestState;

/// The types most callers need.
pub mod prelude {
    pub use crate::config::{AssigningStrategy, ManagerConfig};
    pub use crate::manager::RequestManager;
    pub use crate::notice::{Notice, NoticeKind};
    pub use crate::request::Request;
    pub use crate::resolver::{
        PlayerResponse, Resolution, Resolver, ResolverContext, ResolverProvider,
    };
    pub use crate::state::RequestState;
}

#[cfg(test)]
mod tests;
