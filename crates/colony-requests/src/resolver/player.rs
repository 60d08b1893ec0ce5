//! The player fallback.
//!
//! Accepts anything and resolves nothing by itself: the request stays
//! pending until the player answers it through
//! [`RequestManager::on_player_response`](crate::manager::RequestManager::on_player_response).

use std::collections::BTreeSet;

use requestable::{ItemStack, Location, RequestKinds, Requestable, Token};

use super::{Resolution, Resolver, ResolverContext, PLAYER_PRIORITY};
use crate::request::Request;

/// How the player answered a request shown to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerResponse {
    /// The player handed over these items.
    Fulfilled(ItemStack),
    /// The player dismissed the request.
    Cancelled,
}

/// Built-in last-resort resolver.
#[derive(Debug, Clone)]
pub struct PlayerResolver {
    token: Token,
    location: Location,
    open: BTreeSet<Token>,
}

impl PlayerResolver {
    /// Creates the player resolver.
    #[must_use]
    pub fn new(token: Token, location: Location) -> Self {
        Self {
            token,
            location,
            open: BTreeSet::new(),
        }
    }

    /// Requests currently waiting on the player, in token order.
    #[must_use]
    pub const fn open_requests(&self) -> &BTreeSet<Token> {
        &self.open
    }

    pub(crate) fn restore_open(&mut self, open: BTreeSet<Token>) {
        self.open = open;
    }
}

impl Resolver for PlayerResolver {
    fn token(&self) -> Token {
        self.token
    }

    fn location(&self) -> Location {
        self.location
    }

    fn kinds(&self) -> RequestKinds {
        RequestKinds::all()
    }

    fn priority(&self) -> i32 {
        PLAYER_PRIORITY
    }

    fn suitability(&self, _request: &Request) -> i64 {
        0
    }

    fn can_resolve(&self, _ctx: &ResolverContext<'_>, _request: &Request) -> bool {
        true
    }

    fn attempt_resolve(
        &mut self,
        _ctx: &ResolverContext<'_>,
        _request: &Request,
    ) -> Option<Vec<Requestable>> {
        Some(Vec::new())
    }

    fn resolve(&mut self, _ctx: &ResolverContext<'_>, request: &Request) -> Resolution {
        if self.open.insert(request.id()) {
            tracing::info!(
                request = %request.id(),
                requester = %request.requester(),
                wanted = %request.requested(),
                "request needs the player"
            );
        }
        Resolution::Pending
    }

    fn on_assigned_request_cancelled(&mut self, _ctx: &ResolverContext<'_>, request: &Request) {
        self.open.remove(&request.id());
    }

    fn on_request_completed(&mut self, _ctx: &ResolverContext<'_>, request: &Request) {
        self.open.remove(&request.id());
    }
}
