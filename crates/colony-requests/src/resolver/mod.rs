//! Resolvers: the strategies that compete to satisfy requests.
//!
//! A resolver declares which request categories it serves
//! ([`Resolver::kinds`]), a static [`priority`](Resolver::priority) and a
//! per-request [`suitability`](Resolver::suitability). During assignment the
//! handler visits eligible resolvers in order and asks each:
//!
//! 1. [`can_resolve`](Resolver::can_resolve): cheap, side-effect-free check
//! 2. [`attempt_resolve`](Resolver::attempt_resolve): `None` to decline, or
//!    the (possibly empty) list of child requests the resolver needs first
//!
//! The first resolver to accept is bound to the request. Once every child is
//! settled the handler calls [`resolve`](Resolver::resolve).
//!
//! # Invariants
//!
//! - Resolvers never hold requests by reference; the registry is the only
//!   record of which resolver owns which request
//! - `can_resolve` must not mutate anything
//! - Given the same inputs a resolver must make the same decision, or
//!   assignment stops being deterministic
//!
//! # Built-in Resolvers
//!
//! - [`RetryingResolver`]: parks retryable requests and re-attempts them
//! - [`PlayerResolver`]: last resort, hands the request to a human

mod player;
mod retrying;

pub use player::{PlayerResolver, PlayerResponse};
pub use retrying::{RetryEntry, RetryingResolver};

use requestable::{ItemStack, Location, RequestKinds, Requestable, Requester, Token};

use crate::request::Request;
use crate::store::RequestStore;

/// Priority of the player resolver: lowest of all.
pub const PLAYER_PRIORITY: i32 = i32::MIN;

/// Priority of the retrying resolver: just above the player.
pub const RETRYING_PRIORITY: i32 = i32::MIN + 1;

/// Lowest priority a dynamically registered resolver may use.
pub const MIN_DYNAMIC_PRIORITY: i32 = i32::MIN + 2;

/// Read-only view handed to resolver callbacks.
#[derive(Debug, Clone, Copy)]
pub struct ResolverContext<'a> {
    tick: u64,
    requests: &'a RequestStore,
}

impl<'a> ResolverContext<'a> {
    /// Creates a context for the given tick.
    #[must_use]
    pub const fn new(tick: u64, requests: &'a RequestStore) -> Self {
        Self { tick, requests }
    }

    /// Current colony tick.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// All requests of the manager.
    #[must_use]
    pub const fn requests(&self) -> &'a RequestStore {
        self.requests
    }

    /// Looks up another request, e.g. the parent of the one being resolved.
    #[must_use]
    pub fn request(&self, token: Token) -> Option<&'a Request> {
        self.requests.get(token)
    }
}

/// Outcome of [`Resolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The request is fulfilled now.
    Resolved {
        /// Concrete answer, if different from what was asked
        result: Option<Requestable>,
        /// Items handed over
        deliveries: Vec<ItemStack>,
    },
    /// Work continues outside the engine; it reports back through
    /// [`RequestManager::update_request_state`](crate::manager::RequestManager::update_request_state).
    Pending,
    /// The resolver cannot finish after all.
    Failed,
}

impl Resolution {
    /// Resolved by handing over one stack.
    #[must_use]
    pub fn delivered(stack: ItemStack) -> Self {
        Self::Resolved {
            result: None,
            deliveries: vec![stack],
        }
    }

    /// Resolved with nothing to hand over (e.g. a pickup that was performed).
    #[must_use]
    pub const fn done() -> Self {
        Self::Resolved {
            result: None,
            deliveries: Vec::new(),
        }
    }
}

/// A strategy that can fulfil requests.
///
/// Resolvers are requesters too: children they return from
/// [`attempt_resolve`](Self::attempt_resolve) and
/// [`followups`](Self::followups) are created with the resolver as requester,
/// and the resolver hears about them through
/// [`on_requested_request_complete`](Self::on_requested_request_complete) and
/// [`on_requested_request_cancelled`](Self::on_requested_request_cancelled).
///
/// # Example
///
/// ```
/// use colony_requests::resolver::{Resolution, Resolver, ResolverContext};
/// use colony_requests::request::Request;
/// use requestable::{ItemStack, Location, RequestKinds, Requestable, Token};
///
/// /// Hands out cobblestone, forever.
/// struct Quarry {
///     token: Token,
/// }
///
/// impl Resolver for Quarry {
///     fn token(&self) -> Token { self.token }
///     fn location(&self) -> Location { Location::new(0, 60, 0) }
///     fn kinds(&self) -> RequestKinds { RequestKinds::ITEM }
///     fn priority(&self) -> i32 { 10 }
///
///     fn can_resolve(&self, _ctx: &ResolverContext<'_>, request: &Request) -> bool {
///         request.requested().matches(&ItemStack::new("cobblestone", u32::MAX))
///     }
///
///     fn attempt_resolve(
///         &mut self,
///         _ctx: &ResolverContext<'_>,
///         _request: &Request,
///     ) -> Option<Vec<Requestable>> {
///         Some(Vec::new())
///     }
///
///     fn resolve(&mut self, _ctx: &ResolverContext<'_>, request: &Request) -> Resolution {
///         let count = request.requested().count().unwrap_or(1);
///         Resolution::delivered(ItemStack::new("cobblestone", count))
///     }
/// }
/// ```
pub trait Resolver: Send {
    /// The resolver's own token.
    fn token(&self) -> Token;

    /// Where the resolver lives; used for suitability and as requester
    /// location of its child requests.
    fn location(&self) -> Location;

    /// Categories this resolver serves.
    fn kinds(&self) -> RequestKinds;

    /// Static ordering hint, higher first.
    ///
    /// Dynamic resolvers must stay at or above [`MIN_DYNAMIC_PRIORITY`].
    fn priority(&self) -> i32;

    /// Per-request tie-break when priorities are equal, higher wins.
    ///
    /// Defaults to the negated squared distance to the requester, so the
    /// nearest resolver wins.
    fn suitability(&self, request: &Request) -> i64 {
        self.location()
            .distance_squared(&request.requester().location)
            .saturating_neg()
    }

    /// Cheap eligibility check. Must not have side effects.
    fn can_resolve(&self, ctx: &ResolverContext<'_>, request: &Request) -> bool;

    /// Claims the request, returning the child requests needed first, or
    /// `None` to let the next resolver try.
    fn attempt_resolve(
        &mut self,
        ctx: &ResolverContext<'_>,
        request: &Request,
    ) -> Option<Vec<Requestable>>;

    /// Performs the work once all children are settled.
    fn resolve(&mut self, ctx: &ResolverContext<'_>, request: &Request) -> Resolution;

    /// Requests to run after resolution and before completion.
    fn followups(&mut self, _ctx: &ResolverContext<'_>, _request: &Request) -> Vec<Requestable> {
        Vec::new()
    }

    /// The request was bound to this resolver.
    fn on_request_assigned(&mut self, _ctx: &ResolverContext<'_>, _request: &Request) {}

    /// An assigned request is about to be cancelled or reassigned. Its
    /// children are already settled; the graph is not yet updated.
    fn on_assigned_request_being_cancelled(
        &mut self,
        _ctx: &ResolverContext<'_>,
        _request: &Request,
    ) {
    }

    /// An assigned request was cancelled or reassigned away; the graph is
    /// updated.
    fn on_assigned_request_cancelled(&mut self, _ctx: &ResolverContext<'_>, _request: &Request) {}

    /// An assigned request completed.
    fn on_request_completed(&mut self, _ctx: &ResolverContext<'_>, _request: &Request) {}

    /// A request this resolver created was fulfilled.
    fn on_requested_request_complete(&mut self, _ctx: &ResolverContext<'_>, _child: &Request) {}

    /// A request this resolver created was cancelled or failed.
    fn on_requested_request_cancelled(&mut self, _ctx: &ResolverContext<'_>, _child: &Request) {}

    /// This resolver in its requester role.
    fn as_requester(&self) -> Requester {
        Requester::new(self.token(), self.location())
    }
}

/// Something in the colony that contributes resolvers: a warehouse, a
/// crafter's building, a courier.
pub trait ResolverProvider: Send {
    /// The provider's own token.
    fn token(&self) -> Token;

    /// Builds the provider's resolvers.
    ///
    /// Called on registration and again on manager reset or restore, so the
    /// resolvers' tokens must be stable across calls.
    fn build_resolvers(&self) -> Vec<Box<dyn Resolver>>;
}
