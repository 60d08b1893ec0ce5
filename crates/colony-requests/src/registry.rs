//! Resolver registry.
//!
//! Owns every resolver of one manager together with the assignment relation:
//! which resolver is currently bound to which request. Both directions of the
//! relation are kept so lookups are cheap either way.
//!
//! # Candidate Ordering
//!
//! For [`AssigningStrategy::PriorityBased`] eligible resolvers are visited by
//! priority (highest first), then suitability (highest first), then
//! registration order. [`AssigningStrategy::FirstComeFirstServe`] uses
//! registration order alone. Under both strategies the built-in fallbacks
//! come last, retry queue before player. The ordering is total, so
//! assignment is deterministic.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use requestable::Token;

use crate::config::AssigningStrategy;
use crate::error::{RequestError, Result};
use crate::request::Request;
use crate::resolver::{PlayerResolver, Resolver, RetryingResolver, MIN_DYNAMIC_PRIORITY};

/// A registered resolver: one of the two built-ins or a provider's.
pub(crate) enum ResolverCell {
    Retrying(RetryingResolver),
    Player(PlayerResolver),
    Dynamic(Box<dyn Resolver>),
}

impl ResolverCell {
    pub(crate) fn as_resolver(&self) -> &dyn Resolver {
        match self {
            Self::Retrying(r) => r,
            Self::Player(r) => r,
            Self::Dynamic(r) => r.as_ref(),
        }
    }

    pub(crate) fn as_resolver_mut(&mut self) -> &mut dyn Resolver {
        match self {
            Self::Retrying(r) => r,
            Self::Player(r) => r,
            Self::Dynamic(r) => r.as_mut(),
        }
    }
}

struct Entry {
    cell: ResolverCell,
    order: u64,
}

/// All resolvers of one manager and their current assignments.
#[derive(Default)]
pub struct ResolverRegistry {
    resolvers: BTreeMap<Token, Entry>,
    /// resolver -> requests it holds
    assignments: BTreeMap<Token, BTreeSet<Token>>,
    /// request -> resolver holding it
    owners: BTreeMap<Token, Token>,
    being_removed: BTreeSet<Token>,
    next_order: u64,
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("resolvers", &self.resolvers.keys().collect::<Vec<_>>())
            .field("assignments", &self.assignments)
            .field("being_removed", &self.being_removed)
            .finish_non_exhaustive()
    }
}

impl ResolverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered resolvers, built-ins included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    /// Returns true if no resolver is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Returns true if `resolver` is registered.
    #[must_use]
    pub fn is_registered(&self, resolver: Token) -> bool {
        self.resolvers.contains_key(&resolver)
    }

    /// Registered resolver tokens in registration order.
    #[must_use]
    pub fn resolver_tokens(&self) -> Vec<Token> {
        let mut tokens: Vec<(u64, Token)> = self
            .resolvers
            .iter()
            .map(|(token, entry)| (entry.order, *token))
            .collect();
        tokens.sort_unstable();
        tokens.into_iter().map(|(_, token)| token).collect()
    }

    /// Looks up a resolver.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::UnknownResolver`] for unregistered tokens.
    pub fn get(&self, resolver: Token) -> Result<&dyn Resolver> {
        self.resolvers
            .get(&resolver)
            .map(|entry| entry.cell.as_resolver())
            .ok_or(RequestError::UnknownResolver(resolver))
    }

    pub(crate) fn get_mut(&mut self, resolver: Token) -> Result<&mut dyn Resolver> {
        self.resolvers
            .get_mut(&resolver)
            .map(|entry| entry.cell.as_resolver_mut())
            .ok_or(RequestError::UnknownResolver(resolver))
    }

    /// The built-in retry queue registered under `resolver`.
    #[must_use]
    pub fn retrying(&self, resolver: Token) -> Option<&RetryingResolver> {
        match self.resolvers.get(&resolver).map(|e| &e.cell) {
            Some(ResolverCell::Retrying(r)) => Some(r),
            _ => None,
        }
    }

    pub(crate) fn retrying_mut(&mut self, resolver: Token) -> Option<&mut RetryingResolver> {
        match self.resolvers.get_mut(&resolver).map(|e| &mut e.cell) {
            Some(ResolverCell::Retrying(r)) => Some(r),
            _ => None,
        }
    }

    /// The built-in player resolver registered under `resolver`.
    #[must_use]
    pub fn player(&self, resolver: Token) -> Option<&PlayerResolver> {
        match self.resolvers.get(&resolver).map(|e| &e.cell) {
            Some(ResolverCell::Player(r)) => Some(r),
            _ => None,
        }
    }

    pub(crate) fn player_mut(&mut self, resolver: Token) -> Option<&mut PlayerResolver> {
        match self.resolvers.get_mut(&resolver).map(|e| &mut e.cell) {
            Some(ResolverCell::Player(r)) => Some(r),
            _ => None,
        }
    }

    /// Adds a resolver.
    ///
    /// Dynamic resolvers may not claim the priorities reserved for the
    /// built-in fallbacks.
    pub(crate) fn register(&mut self, cell: ResolverCell) -> Result<Token> {
        let resolver = cell.as_resolver();
        let token = resolver.token();
        if self.resolvers.contains_key(&token) {
            return Err(RequestError::ResolverAlreadyRegistered(token));
        }
        if let ResolverCell::Dynamic(dynamic) = &cell {
            let priority = dynamic.priority();
            if priority < MIN_DYNAMIC_PRIORITY {
                return Err(RequestError::ReservedPriority {
                    resolver: token,
                    priority,
                });
            }
        }
        self.install(cell);
        tracing::debug!(resolver = %token, "resolver registered");
        Ok(token)
    }

    /// Adds a resolver without checks, replacing any resolver under the same
    /// token. Used for the built-ins.
    pub(crate) fn install(&mut self, cell: ResolverCell) -> Token {
        let token = cell.as_resolver().token();
        let order = self.next_order;
        self.next_order += 1;
        self.resolvers.insert(token, Entry { cell, order });
        token
    }

    /// Returns true while `resolver` is being drained before removal.
    #[must_use]
    pub fn is_being_removed(&self, resolver: Token) -> bool {
        self.being_removed.contains(&resolver)
    }

    pub(crate) fn mark_being_removed(&mut self, resolver: Token) -> Result<()> {
        if !self.resolvers.contains_key(&resolver) {
            return Err(RequestError::UnknownResolver(resolver));
        }
        self.being_removed.insert(resolver);
        Ok(())
    }

    /// Drops a drained resolver.
    pub(crate) fn remove(&mut self, resolver: Token) -> Result<()> {
        self.resolvers
            .remove(&resolver)
            .ok_or(RequestError::UnknownResolver(resolver))?;
        self.being_removed.remove(&resolver);
        if let Some(leftover) = self.assignments.remove(&resolver) {
            for request in leftover {
                self.owners.remove(&request);
            }
        }
        tracing::debug!(resolver = %resolver, "resolver removed");
        Ok(())
    }

    /// Token of the resolver holding `request`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::NotAssigned`] if nobody holds the request.
    pub fn resolver_for_request(&self, request: Token) -> Result<Token> {
        self.owners
            .get(&request)
            .copied()
            .ok_or(RequestError::NotAssigned(request))
    }

    /// Returns true if some resolver holds `request`.
    #[must_use]
    pub fn is_assigned(&self, request: Token) -> bool {
        self.owners.contains_key(&request)
    }

    /// Requests currently held by `resolver`, in token order.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::UnknownResolver`] for unregistered tokens.
    pub fn assigned_requests(&self, resolver: Token) -> Result<Vec<Token>> {
        if !self.resolvers.contains_key(&resolver) {
            return Err(RequestError::UnknownResolver(resolver));
        }
        Ok(self
            .assignments
            .get(&resolver)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    /// The whole assignment relation, resolver to requests.
    #[must_use]
    pub fn assignments(&self) -> &BTreeMap<Token, BTreeSet<Token>> {
        &self.assignments
    }

    pub(crate) fn add_assignment(&mut self, resolver: Token, request: Token) -> Result<()> {
        if !self.resolvers.contains_key(&resolver) {
            return Err(RequestError::UnknownResolver(resolver));
        }
        if let Some(holder) = self.owners.get(&request) {
            return Err(RequestError::AlreadyAssigned {
                request,
                resolver: *holder,
            });
        }
        self.assignments.entry(resolver).or_default().insert(request);
        self.owners.insert(request, resolver);
        Ok(())
    }

    pub(crate) fn remove_assignment(&mut self, request: Token) -> Option<Token> {
        let resolver = self.owners.remove(&request)?;
        if let Some(set) = self.assignments.get_mut(&resolver) {
            set.remove(&request);
            if set.is_empty() {
                self.assignments.remove(&resolver);
            }
        }
        Some(resolver)
    }

    /// Eligible resolvers for `request` in visiting order.
    ///
    /// Skips resolvers whose kinds do not intersect the request's, resolvers
    /// in `blacklist`, resolvers being removed and the requester itself.
    #[must_use]
    pub fn candidates(
        &self,
        request: &Request,
        strategy: AssigningStrategy,
        blacklist: &BTreeSet<Token>,
    ) -> Vec<Token> {
        let kinds = request.requested().kinds();
        let mut eligible: Vec<(i32, i64, u64, Token)> = self
            .resolvers
            .iter()
            .filter(|(token, _)| {
                !blacklist.contains(token)
                    && !self.being_removed.contains(token)
                    && **token != request.requester().id
            })
            .filter(|(_, entry)| kinds.eligible_for(entry.cell.as_resolver().kinds()))
            .map(|(token, entry)| {
                let resolver = entry.cell.as_resolver();
                (
                    resolver.priority(),
                    resolver.suitability(request),
                    entry.order,
                    *token,
                )
            })
            .collect();

        match strategy {
            AssigningStrategy::PriorityBased => eligible.sort_by(|a, b| {
                b.0.cmp(&a.0)
                    .then_with(|| b.1.cmp(&a.1))
                    .then_with(|| a.2.cmp(&b.2))
            }),
            AssigningStrategy::FirstComeFirstServe => eligible.sort_by_key(|e| {
                (
                    e.0 < MIN_DYNAMIC_PRIORITY,
                    Reverse(e.0.min(MIN_DYNAMIC_PRIORITY)),
                    e.2,
                )
            }),
        }
        eligible.into_iter().map(|(_, _, _, token)| token).collect()
    }
}
