//! Manager snapshots.
//!
//! A [`ManagerSnapshot`] holds everything needed to resume a manager: the
//! request table, the resolver bindings, the built-ins' queues and the token
//! stream. Resolvers themselves are not stored; they are rebuilt from the
//! providers handed to [`RequestManager::restore`].
//!
//! # Reconciliation
//!
//! The colony a snapshot is restored into may have changed since the save.
//! Restoring therefore:
//!
//! - drops broken graph links
//! - drops requests whose owner is gone: top-level requests whose requester
//!   is no longer alive, and child requests whose requesting resolver is no
//!   longer registered
//! - re-queues requests bound to resolvers that did not come back
//!
//! Every drop is logged at warn level. The restored manager starts clean.

use std::collections::{BTreeMap, BTreeSet};

use requestable::{Location, Requester, Token};
use serde::{Deserialize, Serialize};

use crate::config::ManagerConfig;
use crate::error::PersistenceError;
use crate::handler::RequestHandler;
use crate::manager::RequestManager;
use crate::notice::NoticeBoard;
use crate::request::Request;
use crate::resolver::{ResolverProvider, RetryEntry};
use crate::state::RequestState;
use crate::store::RequestStore;
use crate::tokens::TokenFactory;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serializable state of a [`RequestManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerSnapshot {
    /// Format version, see [`SNAPSHOT_VERSION`]
    pub version: u32,
    /// Ticks processed
    pub tick: u64,
    /// Location of the built-in resolvers
    pub colony_center: Location,
    /// Token stream position
    pub tokens: TokenFactory,
    /// Token of the retry queue
    pub retrying: Token,
    /// Token of the player resolver
    pub player: Token,
    /// All requests
    pub requests: RequestStore,
    /// Resolver to assigned requests
    pub assignments: BTreeMap<Token, BTreeSet<Token>>,
    /// Provider to the resolvers it contributed
    pub providers: BTreeMap<Token, Vec<Token>>,
    /// Retry queue bookkeeping
    pub retry_entries: BTreeMap<Token, RetryEntry>,
    /// Requests waiting on the player
    pub player_open: BTreeSet<Token>,
    /// Undelivered requester notices
    pub notices: NoticeBoard,
}

impl RequestManager {
    /// Captures the manager's state.
    #[must_use]
    pub fn snapshot(&self) -> ManagerSnapshot {
        let registry = self.handler.registry();
        ManagerSnapshot {
            version: SNAPSHOT_VERSION,
            tick: self.tick,
            colony_center: self.colony_center,
            tokens: self.handler.tokens.clone(),
            retrying: self.retrying,
            player: self.player,
            requests: self.handler.requests().clone(),
            assignments: registry.assignments().clone(),
            providers: self
                .providers
                .iter()
                .map(|(token, entry)| (*token, entry.resolvers.clone()))
                .collect(),
            retry_entries: registry
                .retrying(self.retrying)
                .map(|queue| queue.entries().clone())
                .unwrap_or_default(),
            player_open: registry
                .player(self.player)
                .map(|player| player.open_requests().clone())
                .unwrap_or_default(),
            notices: self.handler.notices().clone(),
        }
    }

    /// Encodes a snapshot as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Json`] if encoding fails.
    pub fn serialize(&self) -> Result<Vec<u8>, PersistenceError> {
        Ok(serde_json::to_vec(&self.snapshot())?)
    }

    /// Decodes a JSON snapshot and restores it, see [`restore`](Self::restore).
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Json`] for malformed input, plus every
    /// error of [`restore`](Self::restore).
    pub fn deserialize(
        config: ManagerConfig,
        bytes: &[u8],
        providers: Vec<Box<dyn ResolverProvider>>,
        requester_alive: impl Fn(&Requester) -> bool,
    ) -> Result<Self, PersistenceError> {
        let snapshot: ManagerSnapshot = serde_json::from_slice(bytes)?;
        Self::restore(config, snapshot, providers, requester_alive)
    }

    /// Rebuilds a manager from a snapshot and the colony's current providers.
    ///
    /// `requester_alive` tells whether the owner of a top-level request still
    /// exists; requests of dead owners are dropped.
    ///
    /// # Errors
    ///
    /// - [`PersistenceError::Config`] if `config` does not validate
    /// - [`PersistenceError::UnsupportedVersion`] for foreign snapshots
    /// - [`PersistenceError::Request`] if a provider fails to register
    pub fn restore(
        config: ManagerConfig,
        snapshot: ManagerSnapshot,
        providers: Vec<Box<dyn ResolverProvider>>,
        requester_alive: impl Fn(&Requester) -> bool,
    ) -> Result<Self, PersistenceError> {
        config.validate()?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }

        let handler = RequestHandler::new(snapshot.tokens, config.assigning_strategy);
        let mut manager = Self::assemble(
            config,
            snapshot.colony_center,
            handler,
            snapshot.retrying,
            snapshot.player,
            snapshot.tick,
        );
        for provider in providers {
            manager.on_provider_added(provider)?;
        }
        for provider in snapshot.providers.keys() {
            if !manager.providers.contains_key(provider) {
                tracing::warn!(provider = %provider, "provider did not come back after restore");
            }
        }

        manager.handler.store = snapshot.requests;
        manager.handler.notices = snapshot.notices;
        manager.reconcile(
            &snapshot.assignments,
            snapshot.retry_entries,
            snapshot.player_open,
            &requester_alive,
        );
        manager.dirty = false;
        tracing::info!(
            requests = manager.handler.requests().len(),
            tick = manager.tick,
            "request manager restored"
        );
        Ok(manager)
    }

    fn reconcile(
        &mut self,
        assignments: &BTreeMap<Token, BTreeSet<Token>>,
        retry_entries: BTreeMap<Token, RetryEntry>,
        player_open: BTreeSet<Token>,
        requester_alive: &dyn Fn(&Requester) -> bool,
    ) {
        let repaired = self.handler.store.repair();
        if repaired > 0 {
            tracing::warn!(links = repaired, "dropped broken request links");
        }

        self.restore_bindings(assignments);
        let replan = self.drop_orphans(requester_alive);
        let requeue = self.unbound_requests();

        // Built-in queues only keep what they still hold.
        let retrying = self.retrying;
        let tick = self.tick;
        let held: BTreeSet<Token> = self
            .handler
            .registry()
            .assigned_requests(retrying)
            .unwrap_or_default()
            .into_iter()
            .collect();
        if let Some(queue) = self.handler.registry.retrying_mut(retrying) {
            let mut entries: BTreeMap<Token, RetryEntry> = retry_entries
                .into_iter()
                .filter(|(token, _)| held.contains(token))
                .collect();
            for token in &held {
                entries.entry(*token).or_insert(RetryEntry {
                    attempts: 0,
                    due_tick: tick,
                });
            }
            queue.restore_entries(entries);
        }
        let player = self.player;
        let waiting: BTreeSet<Token> = self
            .handler
            .registry()
            .assigned_requests(player)
            .unwrap_or_default()
            .into_iter()
            .collect();
        if player_open != waiting {
            tracing::debug!(
                saved = player_open.len(),
                held = waiting.len(),
                "player requests rebuilt from bindings"
            );
        }
        if let Some(player) = self.handler.registry.player_mut(player) {
            player.restore_open(waiting);
        }

        for token in requeue {
            let assignable = self
                .handler
                .requests()
                .get(token)
                .is_some_and(|r| r.state().is_assignable());
            if !assignable || self.handler.registry().is_assigned(token) {
                continue;
            }
            if let Err(err) = self.handler.assign_request(token, &BTreeSet::new()) {
                tracing::error!(request = %token, error = %err, "re-queue after restore failed");
            }
        }
        for token in replan {
            if !self.handler.registry().is_assigned(token) {
                continue;
            }
            if let Err(err) = self.handler.reassign_request(token, &BTreeSet::new()) {
                tracing::error!(request = %token, error = %err, "replan after restore failed");
            }
        }

        if let Err(violation) = self.handler.requests().validate() {
            tracing::error!(%violation, "request graph inconsistent after restore");
        }
    }

    /// Re-binds saved assignments whose resolver and request still exist.
    fn restore_bindings(&mut self, assignments: &BTreeMap<Token, BTreeSet<Token>>) {
        for (resolver, requests) in assignments {
            for request in requests {
                let active = self
                    .handler
                    .requests()
                    .get(*request)
                    .is_some_and(|r| is_active(r.state()));
                if !active {
                    continue;
                }
                if !self.handler.registry().is_registered(*resolver) {
                    tracing::warn!(
                        request = %request,
                        resolver = %resolver,
                        "resolver gone after restore, request re-queued"
                    );
                    continue;
                }
                if let Err(err) = self.handler.registry.add_assignment(*resolver, *request) {
                    tracing::warn!(request = %request, error = %err, "dropped duplicate binding");
                }
            }
        }
    }

    /// Purges requests whose owner is gone. Returns the still-bound parents
    /// that lost a child and must be planned again.
    fn drop_orphans(&mut self, requester_alive: &dyn Fn(&Requester) -> bool) -> Vec<Token> {
        let orphans: Vec<Token> = self
            .handler
            .requests()
            .iter()
            .filter(|request| match request.parent() {
                Some(_) => !self.handler.registry().is_registered(request.requester().id),
                None => !requester_alive(request.requester()),
            })
            .map(Request::id)
            .collect();

        let mut replan = Vec::new();
        for token in orphans {
            let Some(parent) = self.handler.requests().get(token).map(Request::parent) else {
                // Already dropped with an earlier subtree.
                continue;
            };
            tracing::warn!(request = %token, "request owner gone after restore, dropping");
            for removed in self.handler.store.purge_subtree(token) {
                self.handler.registry.remove_assignment(removed.id());
                self.handler.notices.forget_request(removed.id());
            }
            if let Some(parent) = parent {
                let active = self
                    .handler
                    .requests()
                    .get(parent)
                    .is_some_and(|r| is_active(r.state()));
                let bound = self.handler.registry().is_assigned(parent);
                if active && bound && !replan.contains(&parent) {
                    replan.push(parent);
                }
            }
        }
        replan
    }

    /// Moves active requests that lost their binding back to `REPORTED`.
    fn unbound_requests(&mut self) -> Vec<Token> {
        let unbound: Vec<Token> = self
            .handler
            .requests()
            .iter()
            .filter(|r| is_active(r.state()) && !self.handler.registry().is_assigned(r.id()))
            .map(Request::id)
            .collect();
        for token in &unbound {
            if let Ok(request) = self.handler.store.require_mut(*token) {
                if !request.state().is_assignable() {
                    request.set_state(RequestState::Reported);
                }
            }
        }
        unbound
    }
}

fn is_active(state: RequestState) -> bool {
    !state.is_terminal()
}
