//! The request value entity.
//!
//! A [`Request`] wraps what was asked for, who asked, where it is in its
//! lifecycle and where it sits in its request graph. Requests are owned by the
//! [`RequestStore`](crate::store::RequestStore); everything outside the crate
//! sees them read-only and refers to them by [`Token`].

use std::collections::BTreeSet;

use requestable::{ItemStack, Requestable, Requester, Token};
use serde::{Deserialize, Serialize};

use crate::state::RequestState;

/// A single request.
///
/// # Invariants
///
/// - `id` never changes after registration
/// - `state` is only changed by the request handler
/// - `parent` and the parent's `children` agree (maintained by the store)
///
/// # Example
///
/// ```
/// use colony_requests::request::Request;
/// use colony_requests::state::RequestState;
/// use requestable::{Burnable, Location, Requestable, Requester, Token};
///
/// let request = Request::new(
///     Token::new(1),
///     Requester::new(Token::new(100), Location::new(0, 64, 0)),
///     Requestable::Burnable(Burnable { count: 4 }),
/// );
///
/// assert_eq!(request.state(), RequestState::Created);
/// assert!(!request.has_children());
/// assert!(request.result().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    id: Token,
    requester: Requester,
    requested: Requestable,
    state: RequestState,
    #[serde(default)]
    result: Option<Requestable>,
    #[serde(default)]
    deliveries: Vec<ItemStack>,
    #[serde(default)]
    parent: Option<Token>,
    #[serde(default)]
    children: BTreeSet<Token>,
}

impl Request {
    /// Creates a request in [`RequestState::Created`].
    #[must_use]
    pub fn new(id: Token, requester: Requester, requested: Requestable) -> Self {
        Self {
            id,
            requester,
            requested,
            state: RequestState::Created,
            result: None,
            deliveries: Vec::new(),
            parent: None,
            children: BTreeSet::new(),
        }
    }

    /// The request's token.
    #[must_use]
    pub const fn id(&self) -> Token {
        self.id
    }

    /// Who created the request.
    #[must_use]
    pub const fn requester(&self) -> &Requester {
        &self.requester
    }

    /// What was asked for.
    #[must_use]
    pub const fn requested(&self) -> &Requestable {
        &self.requested
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> RequestState {
        self.state
    }

    /// The concrete answer, once a resolver or the player produced one.
    ///
    /// Independent of the state: a request may hold a result while it still
    /// waits on follow-ups.
    #[must_use]
    pub const fn result(&self) -> Option<&Requestable> {
        self.result.as_ref()
    }

    /// Items delivered for this request, in delivery order.
    #[must_use]
    pub fn deliveries(&self) -> &[ItemStack] {
        &self.deliveries
    }

    /// The parent request, if this request was spawned for one.
    #[must_use]
    pub const fn parent(&self) -> Option<Token> {
        self.parent
    }

    /// Returns true if this request was spawned for another.
    #[must_use]
    pub const fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    /// Child request tokens, in token order.
    #[must_use]
    pub const fn children(&self) -> &BTreeSet<Token> {
        &self.children
    }

    /// Returns true if the request has at least one child.
    #[must_use]
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub(crate) fn set_state(&mut self, state: RequestState) {
        self.state = state;
    }

    pub(crate) fn set_result(&mut self, result: Option<Requestable>) {
        self.result = result;
    }

    pub(crate) fn add_delivery(&mut self, stack: ItemStack) {
        self.deliveries.push(stack);
    }

    pub(crate) fn override_deliveries(&mut self, deliveries: Vec<ItemStack>) {
        self.deliveries = deliveries;
    }

    pub(crate) fn reset_deliveries(&mut self) {
        self.deliveries.clear();
    }

    pub(crate) fn set_parent(&mut self, parent: Option<Token>) {
        self.parent = parent;
    }

    pub(crate) fn add_child(&mut self, child: Token) {
        self.children.insert(child);
    }

    pub(crate) fn remove_child(&mut self, child: Token) -> bool {
        self.children.remove(&child)
    }
}
