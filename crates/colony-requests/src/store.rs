//! Request table and request graph.
//!
//! The [`RequestStore`] owns every request of one manager and is the only
//! place that edits parent/child links, so both sides of a link are always
//! written together.
//!
//! # Graph invariants
//!
//! - If `child.parent() == Some(p)` then `p.children()` contains `child`, and
//!   vice versa
//! - A request never appears in its own transitive child set
//!
//! Links are checked at the API boundary: [`RequestStore::link_child`] walks
//! the ancestry of the prospective parent once and rejects any link that
//! would close a cycle.
//!
//! # Determinism
//!
//! Requests are stored in a `BTreeMap` keyed by token, and children are a
//! `BTreeSet`, so every traversal visits requests in the same order on every
//! run.

use std::collections::BTreeMap;

use requestable::Token;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{RequestError, Result};
use crate::request::Request;

/// One broken graph invariant, reported by [`RequestStore::violations`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphViolation {
    /// `child` names `parent`, which does not exist.
    #[error("{child} points at missing parent {parent}")]
    DanglingParent {
        /// Request holding the link
        child: Token,
        /// Missing parent
        parent: Token,
    },
    /// `parent` lists `child`, which does not exist.
    #[error("{parent} lists missing child {child}")]
    DanglingChild {
        /// Request holding the link
        parent: Token,
        /// Missing child
        child: Token,
    },
    /// The two sides of a link disagree.
    #[error("link {parent} -> {child} is one-sided")]
    OneSidedLink {
        /// Parent side
        parent: Token,
        /// Child side
        child: Token,
    },
    /// `token` is reachable from itself.
    #[error("{token} is its own descendant")]
    Cycle {
        /// A request on the cycle
        token: Token,
    },
}

/// All requests of one manager.
///
/// # Example
///
/// ```
/// use colony_requests::request::Request;
/// use colony_requests::store::RequestStore;
/// use requestable::{Burnable, Location, Requestable, Requester, Token};
///
/// let requester = Requester::new(Token::new(100), Location::default());
/// let fuel = Requestable::Burnable(Burnable { count: 1 });
///
/// let mut store = RequestStore::new();
/// store.insert(Request::new(Token::new(1), requester, fuel.clone()));
/// store.insert(Request::new(Token::new(2), requester, fuel));
///
/// store.link_child(Token::new(1), Token::new(2)).unwrap();
/// assert_eq!(store.get(Token::new(2)).unwrap().parent(), Some(Token::new(1)));
///
/// // Closing the loop is rejected.
/// assert!(store.link_child(Token::new(2), Token::new(1)).is_err());
/// assert!(store.violations().is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStore {
    requests: BTreeMap<Token, Request>,
}

impl RequestStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            requests: BTreeMap::new(),
        }
    }

    /// Number of requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Returns true if the store holds no requests.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Returns true if `token` names a stored request.
    #[must_use]
    pub fn contains(&self, token: Token) -> bool {
        self.requests.contains_key(&token)
    }

    /// Looks up a request.
    #[must_use]
    pub fn get(&self, token: Token) -> Option<&Request> {
        self.requests.get(&token)
    }

    /// Looks up a request, failing for unknown tokens.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::UnknownRequest`] if `token` is not stored.
    pub fn require(&self, token: Token) -> Result<&Request> {
        self.requests
            .get(&token)
            .ok_or(RequestError::UnknownRequest(token))
    }

    pub(crate) fn require_mut(&mut self, token: Token) -> Result<&mut Request> {
        self.requests
            .get_mut(&token)
            .ok_or(RequestError::UnknownRequest(token))
    }

    /// Iterates requests in token order.
    pub fn iter(&self) -> impl Iterator<Item = &Request> + '_ {
        self.requests.values()
    }

    /// Iterates request tokens in order.
    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.requests.keys().copied()
    }

    /// Adds a request, replacing any request with the same token.
    ///
    /// Graph links carried by the request are taken as-is; use
    /// [`violations`](Self::violations) to check them.
    pub fn insert(&mut self, request: Request) {
        self.requests.insert(request.id(), request);
    }

    /// Links `child` under `parent`, writing both sides.
    ///
    /// Linking a child to the parent it already has is a no-op.
    ///
    /// # Errors
    ///
    /// - [`RequestError::UnknownRequest`] if either token is unknown
    /// - [`RequestError::ParentAlreadySet`] if `child` has another parent
    /// - [`RequestError::CycleDetected`] if `child` is `parent` or one of its
    ///   ancestors
    pub fn link_child(&mut self, parent: Token, child: Token) -> Result<()> {
        self.require(parent)?;
        let existing = self.require(child)?.parent();
        match existing {
            Some(p) if p == parent => return Ok(()),
            Some(p) => return Err(RequestError::ParentAlreadySet { child, parent: p }),
            None => {}
        }
        if child == parent || self.ancestors(parent).contains(&child) {
            return Err(RequestError::CycleDetected { parent, child });
        }

        self.require_mut(parent)?.add_child(child);
        self.require_mut(child)?.set_parent(Some(parent));
        Ok(())
    }

    /// Removes the link between `parent` and `child`, clearing both sides.
    ///
    /// Returns false if the two were not linked.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::UnknownRequest`] if either token is unknown.
    pub fn unlink_child(&mut self, parent: Token, child: Token) -> Result<bool> {
        self.require(child)?;
        let removed = self.require_mut(parent)?.remove_child(child);
        let child_req = self.require_mut(child)?;
        if child_req.parent() == Some(parent) {
            child_req.set_parent(None);
            return Ok(true);
        }
        Ok(removed)
    }

    /// Parent chain of `token`, nearest first.
    ///
    /// Stops at the first missing or repeated request, so a corrupted graph
    /// cannot loop forever.
    #[must_use]
    pub fn ancestors(&self, token: Token) -> Vec<Token> {
        let mut chain = Vec::new();
        let mut current = self.get(token).and_then(Request::parent);
        while let Some(parent) = current {
            if parent == token || chain.contains(&parent) {
                break;
            }
            chain.push(parent);
            current = self.get(parent).and_then(Request::parent);
        }
        chain
    }

    /// Top of the request graph containing `token`.
    #[must_use]
    pub fn root_of(&self, token: Token) -> Token {
        self.ancestors(token).last().copied().unwrap_or(token)
    }

    /// All transitive children of `token` in depth-first pre-order.
    #[must_use]
    pub fn descendants(&self, token: Token) -> Vec<Token> {
        let mut out = Vec::new();
        let mut stack: Vec<Token> = self
            .get(token)
            .map(|r| r.children().iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(next) = stack.pop() {
            if next == token || out.contains(&next) {
                continue;
            }
            out.push(next);
            if let Some(request) = self.get(next) {
                stack.extend(request.children().iter().rev().copied());
            }
        }
        out
    }

    /// Number of children of `token` that are not terminal yet.
    #[must_use]
    pub fn open_children(&self, token: Token) -> usize {
        self.get(token).map_or(0, |request| {
            request
                .children()
                .iter()
                .filter(|child| self.get(**child).is_some_and(|c| !c.state().is_terminal()))
                .count()
        })
    }

    /// Removes `token` and every descendant, unlinking it from its parent.
    ///
    /// Returns the removed requests, root first. Unknown tokens remove
    /// nothing.
    pub(crate) fn purge_subtree(&mut self, token: Token) -> Vec<Request> {
        if let Some(parent) = self.get(token).and_then(Request::parent) {
            if let Some(parent_req) = self.requests.get_mut(&parent) {
                parent_req.remove_child(token);
            }
        }
        let mut order = vec![token];
        order.extend(self.descendants(token));
        order
            .into_iter()
            .filter_map(|t| self.requests.remove(&t))
            .collect()
    }

    /// Lists every broken graph invariant.
    #[must_use]
    pub fn violations(&self) -> Vec<GraphViolation> {
        let mut found = Vec::new();
        for request in self.requests.values() {
            let id = request.id();
            if let Some(parent) = request.parent() {
                match self.get(parent) {
                    None => found.push(GraphViolation::DanglingParent { child: id, parent }),
                    Some(p) if !p.children().contains(&id) => {
                        found.push(GraphViolation::OneSidedLink { parent, child: id });
                    }
                    Some(_) => {}
                }
            }
            for child in request.children() {
                match self.get(*child) {
                    None => found.push(GraphViolation::DanglingChild {
                        parent: id,
                        child: *child,
                    }),
                    Some(c) if c.parent() != Some(id) => {
                        found.push(GraphViolation::OneSidedLink {
                            parent: id,
                            child: *child,
                        });
                    }
                    Some(_) => {}
                }
            }
            if self.has_parent_loop(id) {
                found.push(GraphViolation::Cycle { token: id });
            }
        }
        found
    }

    /// Checks every graph invariant.
    ///
    /// # Errors
    ///
    /// Returns the first [`GraphViolation`] found.
    pub fn validate(&self) -> std::result::Result<(), GraphViolation> {
        match self.violations().into_iter().next() {
            Some(violation) => Err(violation),
            None => Ok(()),
        }
    }

    /// Returns true if `token` and all its descendants are terminal.
    #[must_use]
    pub fn subtree_terminal(&self, token: Token) -> bool {
        std::iter::once(token)
            .chain(self.descendants(token))
            .all(|t| self.get(t).is_some_and(|r| r.state().is_terminal()))
    }

    /// Drops every link that breaks an invariant. Returns how many links
    /// were removed.
    pub(crate) fn repair(&mut self) -> usize {
        let mut removed = 0;
        for violation in self.violations() {
            match violation {
                GraphViolation::DanglingParent { child, .. } => {
                    if let Some(req) = self.requests.get_mut(&child) {
                        req.set_parent(None);
                        removed += 1;
                    }
                }
                GraphViolation::DanglingChild { parent, child } => {
                    if let Some(req) = self.requests.get_mut(&parent) {
                        req.remove_child(child);
                        removed += 1;
                    }
                }
                GraphViolation::OneSidedLink { parent, child } => {
                    if let Some(req) = self.requests.get_mut(&parent) {
                        req.remove_child(child);
                    }
                    if let Some(req) = self.requests.get_mut(&child) {
                        if req.parent() == Some(parent) {
                            req.set_parent(None);
                        }
                    }
                    removed += 1;
                }
                GraphViolation::Cycle { token } => {
                    if let Some(parent) = self.get(token).and_then(Request::parent) {
                        if let Some(req) = self.requests.get_mut(&parent) {
                            req.remove_child(token);
                        }
                        if let Some(req) = self.requests.get_mut(&token) {
                            req.set_parent(None);
                        }
                        removed += 1;
                    }
                }
            }
        }
        removed
    }

    fn has_parent_loop(&self, token: Token) -> bool {
        let mut seen = vec![token];
        let mut current = self.get(token).and_then(Request::parent);
        while let Some(parent) = current {
            if seen.contains(&parent) {
                return true;
            }
            seen.push(parent);
            current = self.get(parent).and_then(Request::parent);
        }
        false
    }
}
