//! The retry queue.
//!
//! Retryable requests nobody can serve right now land here instead of going
//! straight to the player. The manager periodically hands each due entry back
//! to the assignment loop with the player excluded; after
//! `max_attempts` failed rounds the request is released to everyone,
//! which in practice means the player.

use std::collections::BTreeMap;

use requestable::{Location, RequestKinds, Requestable, Token};
use serde::{Deserialize, Serialize};

use super::{Resolution, Resolver, ResolverContext, RETRYING_PRIORITY};
use crate::config::RetryConfig;
use crate::request::Request;

/// Bookkeeping for one parked request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryEntry {
    /// Reassignment rounds already tried
    pub attempts: u32,
    /// Tick at which the next round is due
    pub due_tick: u64,
}

/// Built-in resolver that holds retryable requests between attempts.
#[derive(Debug, Clone)]
pub struct RetryingResolver {
    token: Token,
    location: Location,
    config: RetryConfig,
    entries: BTreeMap<Token, RetryEntry>,
    reassigning: Option<Token>,
}

impl RetryingResolver {
    /// Creates an empty retry queue.
    #[must_use]
    pub fn new(token: Token, location: Location, config: RetryConfig) -> Self {
        Self {
            token,
            location,
            config,
            entries: BTreeMap::new(),
            reassigning: None,
        }
    }

    /// Parked requests in token order.
    #[must_use]
    pub const fn entries(&self) -> &BTreeMap<Token, RetryEntry> {
        &self.entries
    }

    /// Attempts made for `request`, if it is parked here.
    #[must_use]
    pub fn attempts(&self, request: Token) -> Option<u32> {
        self.entries.get(&request).map(|e| e.attempts)
    }

    /// The request currently being handed back to the assignment loop.
    #[must_use]
    pub const fn reassigning(&self) -> Option<Token> {
        self.reassigning
    }

    /// Returns true once `request` used up its attempts.
    #[must_use]
    pub fn is_exhausted(&self, request: Token) -> bool {
        self.entries
            .get(&request)
            .is_some_and(|e| e.attempts >= self.config.max_attempts)
    }

    /// Tokens due at `tick`, in token order.
    pub(crate) fn due(&self, tick: u64) -> Vec<Token> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.due_tick <= tick)
            .map(|(token, _)| *token)
            .collect()
    }

    pub(crate) fn begin_reassign(&mut self, request: Token) {
        self.reassigning = Some(request);
    }

    pub(crate) fn end_reassign(&mut self) {
        self.reassigning = None;
    }

    /// Counts a failed round and schedules the next one with backoff.
    pub(crate) fn reschedule(&mut self, request: Token, tick: u64) {
        let config = &self.config;
        let entry = self.entries.entry(request).or_insert(RetryEntry {
            attempts: 0,
            due_tick: tick,
        });
        entry.attempts = entry.attempts.saturating_add(1);
        entry.due_tick = tick.saturating_add(config.delay_for(entry.attempts));
    }

    /// Marks `request` as out of attempts, due at `tick`, so the next round
    /// releases it to the player.
    pub(crate) fn exhaust(&mut self, request: Token, tick: u64) {
        let attempts = self.config.max_attempts;
        self.entries.insert(
            request,
            RetryEntry {
                attempts,
                due_tick: tick,
            },
        );
    }

    pub(crate) fn forget(&mut self, request: Token) -> bool {
        self.entries.remove(&request).is_some()
    }

    /// Replaces all entries, e.g. from a snapshot.
    pub(crate) fn restore_entries(&mut self, entries: BTreeMap<Token, RetryEntry>) {
        self.entries = entries;
        self.reassigning = None;
    }
}

impl Resolver for RetryingResolver {
    fn token(&self) -> Token {
        self.token
    }

    fn location(&self) -> Location {
        self.location
    }

    fn kinds(&self) -> RequestKinds {
        RequestKinds::RETRYABLE
    }

    fn priority(&self) -> i32 {
        RETRYING_PRIORITY
    }

    fn can_resolve(&self, _ctx: &ResolverContext<'_>, request: &Request) -> bool {
        request.requested().is_retryable() && !self.is_exhausted(request.id())
    }

    fn attempt_resolve(
        &mut self,
        _ctx: &ResolverContext<'_>,
        _request: &Request,
    ) -> Option<Vec<Requestable>> {
        Some(Vec::new())
    }

    fn resolve(&mut self, _ctx: &ResolverContext<'_>, _request: &Request) -> Resolution {
        Resolution::Pending
    }

    fn on_request_assigned(&mut self, ctx: &ResolverContext<'_>, request: &Request) {
        let due_tick = ctx.tick().saturating_add(self.config.delay_for(0));
        self.entries
            .entry(request.id())
            .or_insert(RetryEntry {
                attempts: 0,
                due_tick,
            });
        tracing::debug!(request = %request.id(), due_tick, "request parked for retry");
    }

    fn on_assigned_request_cancelled(&mut self, _ctx: &ResolverContext<'_>, request: &Request) {
        // Mid-round the entry must survive a revert back to this queue.
        if self.reassigning != Some(request.id()) {
            self.entries.remove(&request.id());
        }
    }

    fn on_request_completed(&mut self, _ctx: &ResolverContext<'_>, request: &Request) {
        self.entries.remove(&request.id());
    }
}
