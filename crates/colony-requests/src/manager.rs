//! The colony-facing request manager.
//!
//! One [`RequestManager`] owns one colony's whole request universe: the
//! request table, the resolver registry, the retry queue and the player
//! fallback. Everything else talks to it by token.
//!
//! # Tick Loop
//!
//! The external driver calls [`RequestManager::tick`] once per colony update:
//!
//! 1. **RETRY**: on ticks divisible by `retry.tick_rate`, due retry entries
//!    are offered to every resolver except the player
//! 2. **REASSESS**: every `reassess_interval_ticks`, parked requests
//!    (unassigned, or held by the retry queue or the player) are offered to
//!    the regular resolvers again
//!
//! # Example
//!
//! ```
//! use colony_requests::config::ManagerConfig;
//! use colony_requests::manager::RequestManager;
//! use colony_requests::state::RequestState;
//! use requestable::{Burnable, Location, Requestable, Requester};
//!
//! let mut manager = RequestManager::new(ManagerConfig::with_seed(1), Location::new(0, 64, 0)).unwrap();
//! let citizen = Requester::new(manager.mint_token(), Location::new(10, 64, 4));
//!
//! // Nobody stocks fuel yet, so the request is parked in the retry queue.
//! let token = manager
//!     .create_and_assign_request(citizen, Requestable::Burnable(Burnable { count: 4 }))
//!     .unwrap();
//! assert_eq!(manager.resolver_for_request(token).unwrap(), manager.retrying_token());
//! assert_eq!(manager.request(token).unwrap().state(), RequestState::InProgress);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use requestable::{ItemStack, Location, Requestable, Requester, Token};

use crate::config::ManagerConfig;
use crate::error::{ConfigError, RequestError, Result};
use crate::handler::RequestHandler;
use crate::notice::{Notice, NoticeBoard};
use crate::registry::{ResolverCell, ResolverRegistry};
use crate::request::Request;
use crate::resolver::{
    PlayerResolver, PlayerResponse, Resolver, ResolverContext, ResolverProvider,
    RetryingResolver,
};
use crate::state::RequestState;
use crate::store::{GraphViolation, RequestStore};
use crate::tokens::TokenFactory;

pub(crate) struct ProviderEntry {
    pub(crate) provider: Box<dyn ResolverProvider>,
    pub(crate) resolvers: Vec<Token>,
}

// =============================================================================
// RequestManager
// =============================================================================

/// Owns and drives one colony's requests.
pub struct RequestManager {
    pub(crate) config: ManagerConfig,
    pub(crate) colony_center: Location,
    pub(crate) handler: RequestHandler,
    pub(crate) providers: BTreeMap<Token, ProviderEntry>,
    pub(crate) retrying: Token,
    pub(crate) player: Token,
    pub(crate) tick: u64,
    pub(crate) dirty: bool,
}

impl fmt::Debug for RequestManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestManager")
            .field("config", &self.config)
            .field("handler", &self.handler)
            .field("providers", &format!("[{} providers]", self.providers.len()))
            .field("retrying", &self.retrying)
            .field("player", &self.player)
            .field("tick", &self.tick)
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl RequestManager {
    /// Creates a manager with only the built-in resolvers registered.
    ///
    /// `colony_center` is where the retry queue and the player resolver
    /// live.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if `config` does not validate.
    pub fn new(config: ManagerConfig, colony_center: Location) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let mut handler = RequestHandler::new(
            TokenFactory::new(config.seed),
            config.assigning_strategy,
        );
        let retrying = handler.mint_token();
        let player = handler.mint_token();
        Ok(Self::assemble(config, colony_center, handler, retrying, player, 0))
    }

    pub(crate) fn assemble(
        config: ManagerConfig,
        colony_center: Location,
        handler: RequestHandler,
        retrying: Token,
        player: Token,
        tick: u64,
    ) -> Self {
        let mut manager = Self {
            config,
            colony_center,
            handler,
            providers: BTreeMap::new(),
            retrying,
            player,
            tick,
            dirty: false,
        };
        manager.handler.set_tick(tick);
        manager.install_builtins();
        manager
    }

    fn install_builtins(&mut self) {
        let retry =
            RetryingResolver::new(self.retrying, self.colony_center, self.config.retry.clone());
        self.handler.registry.install(ResolverCell::Retrying(retry));
        let player = PlayerResolver::new(self.player, self.colony_center);
        self.handler.registry.install(ResolverCell::Player(player));
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The configuration the manager runs with.
    #[must_use]
    pub const fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Location of the built-in resolvers.
    #[must_use]
    pub const fn colony_center(&self) -> Location {
        self.colony_center
    }

    /// Ticks processed so far.
    #[must_use]
    pub const fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Returns true if state changed since the last snapshot.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clears the dirty flag, e.g. after an external save.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// The lifecycle handler.
    #[must_use]
    pub const fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    /// All requests.
    #[must_use]
    pub const fn requests(&self) -> &RequestStore {
        self.handler.requests()
    }

    /// All resolvers and assignments.
    #[must_use]
    pub const fn registry(&self) -> &ResolverRegistry {
        self.handler.registry()
    }

    /// Queued requester notices.
    #[must_use]
    pub const fn notices(&self) -> &NoticeBoard {
        self.handler.notices()
    }

    /// Looks up a request.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::UnknownRequest`] for unknown tokens.
    pub fn request(&self, token: Token) -> Result<&Request> {
        self.handler.requests().require(token)
    }

    /// Token of the resolver holding `request`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::NotAssigned`] if nobody holds the request.
    pub fn resolver_for_request(&self, request: Token) -> Result<Token> {
        self.handler.registry().resolver_for_request(request)
    }

    /// Token of the built-in retry queue.
    #[must_use]
    pub const fn retrying_token(&self) -> Token {
        self.retrying
    }

    /// Token of the built-in player resolver.
    #[must_use]
    pub const fn player_token(&self) -> Token {
        self.player
    }

    /// The built-in retry queue.
    #[must_use]
    pub fn retrying(&self) -> Option<&RetryingResolver> {
        self.handler.registry().retrying(self.retrying)
    }

    /// Registered provider tokens in order.
    pub fn provider_tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.providers.keys().copied()
    }

    /// Resolver tokens a provider contributed.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::UnknownProvider`] for unknown tokens.
    pub fn provider_resolvers(&self, provider: Token) -> Result<&[Token]> {
        self.providers
            .get(&provider)
            .map(|entry| entry.resolvers.as_slice())
            .ok_or(RequestError::UnknownProvider(provider))
    }

    /// Every broken request-graph invariant. Empty in a healthy manager.
    #[must_use]
    pub fn violations(&self) -> Vec<GraphViolation> {
        self.handler.requests().violations()
    }

    /// Mints a fresh token, e.g. for a new requester.
    pub fn mint_token(&mut self) -> Token {
        self.handler.mint_token()
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Registers a new request without assigning it.
    pub fn create_request(&mut self, requester: Requester, requested: Requestable) -> Token {
        self.dirty = true;
        self.handler.create_request(requester, requested)
    }

    /// Registers a new request and assigns it right away.
    ///
    /// # Errors
    ///
    /// Propagates errors of [`RequestHandler::assign_request`].
    pub fn create_and_assign_request(
        &mut self,
        requester: Requester,
        requested: Requestable,
    ) -> Result<Token> {
        let token = self.create_request(requester, requested);
        self.handler.assign_request(token, &BTreeSet::new())?;
        Ok(token)
    }

    /// Assigns a `CREATED` or `REPORTED` request.
    ///
    /// # Errors
    ///
    /// Propagates errors of [`RequestHandler::assign_request`].
    pub fn assign_request(&mut self, token: Token) -> Result<Option<Token>> {
        self.dirty = true;
        self.handler.assign_request(token, &BTreeSet::new())
    }

    /// Moves a request away from its current resolver.
    ///
    /// # Errors
    ///
    /// Propagates errors of [`RequestHandler::reassign_request`].
    pub fn reassign_request(
        &mut self,
        token: Token,
        blacklist: &BTreeSet<Token>,
    ) -> Result<Option<Token>> {
        self.dirty = true;
        self.handler.reassign_request(token, blacklist)
    }

    /// Asks the bound resolver to perform the work now.
    ///
    /// # Errors
    ///
    /// Propagates errors of [`RequestHandler::resolve_request`].
    pub fn resolve_request(&mut self, token: Token) -> Result<()> {
        self.dirty = true;
        self.handler.resolve_request(token)
    }

    /// Reports an outcome produced outside the engine.
    ///
    /// # Errors
    ///
    /// Propagates errors of [`RequestHandler::update_request_state`].
    pub fn update_request_state(&mut self, token: Token, state: RequestState) -> Result<()> {
        self.dirty = true;
        self.handler.update_request_state(token, state)
    }

    /// Reports that a pending resolution finished, with what it produced.
    ///
    /// # Errors
    ///
    /// Propagates errors of [`RequestHandler::complete_resolution`].
    pub fn report_resolved(
        &mut self,
        token: Token,
        result: Option<Requestable>,
        deliveries: Vec<ItemStack>,
    ) -> Result<()> {
        self.dirty = true;
        self.handler.complete_resolution(token, result, deliveries)
    }

    /// Forces a request to settle, optionally recording a delivery.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::UnknownRequest`] for unknown tokens.
    pub fn overrule_request(&mut self, token: Token, delivery: Option<ItemStack>) -> Result<()> {
        self.dirty = true;
        self.handler.overrule_request(token, delivery)
    }

    /// Cancels a request and its subtree.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::UnknownRequest`] for unknown tokens.
    pub fn cancel_request(&mut self, token: Token) -> Result<()> {
        self.dirty = true;
        self.handler.cancel_request(token)
    }

    /// Drops a settled request the requester is done with.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::IllegalState`] if the request is still active.
    pub fn clean_request_data(&mut self, token: Token) -> Result<bool> {
        let removed = self.handler.clean_request_data(token)?;
        self.dirty |= removed;
        Ok(removed)
    }

    /// Takes the notices queued for `requester`.
    pub fn drain_notices(&mut self, requester: Token) -> Vec<Notice> {
        let notices = self.handler.notices.drain(requester);
        self.dirty |= !notices.is_empty();
        notices
    }

    // =========================================================================
    // Resolvers and Providers
    // =========================================================================

    /// Registers a standalone resolver.
    ///
    /// # Errors
    ///
    /// - [`RequestError::ResolverAlreadyRegistered`] for duplicate tokens
    /// - [`RequestError::ReservedPriority`] for priorities in the fallback band
    pub fn register_resolver(&mut self, resolver: Box<dyn Resolver>) -> Result<Token> {
        self.dirty = true;
        self.handler.register_resolver(resolver)
    }

    /// Reassigns or cancels everything `resolver` holds, then unregisters it.
    ///
    /// # Errors
    ///
    /// - [`RequestError::BuiltInResolver`] for the retry queue and the player
    /// - [`RequestError::UnknownResolver`] for unregistered tokens
    pub fn remove_resolver(&mut self, resolver: Token) -> Result<()> {
        if resolver == self.retrying || resolver == self.player {
            return Err(RequestError::BuiltInResolver(resolver));
        }
        self.dirty = true;
        self.handler.remove_resolver(resolver)
    }

    /// Registers every resolver a new colony building or worker brings.
    ///
    /// Either all of the provider's resolvers are registered or none.
    ///
    /// # Errors
    ///
    /// - [`RequestError::ProviderAlreadyRegistered`] for duplicate providers
    /// - registration errors of the provider's resolvers
    pub fn on_provider_added(&mut self, provider: Box<dyn ResolverProvider>) -> Result<Vec<Token>> {
        let token = provider.token();
        if self.providers.contains_key(&token) {
            return Err(RequestError::ProviderAlreadyRegistered(token));
        }

        let mut registered = Vec::new();
        for resolver in provider.build_resolvers() {
            match self.handler.register_resolver(resolver) {
                Ok(resolver) => registered.push(resolver),
                Err(err) => {
                    for resolver in registered {
                        if let Err(rollback) = self.handler.remove_resolver(resolver) {
                            tracing::error!(
                                resolver = %resolver,
                                error = %rollback,
                                "provider rollback failed"
                            );
                        }
                    }
                    return Err(err);
                }
            }
        }

        tracing::info!(provider = %token, resolvers = registered.len(), "provider added");
        self.providers.insert(
            token,
            ProviderEntry {
                provider,
                resolvers: registered.clone(),
            },
        );
        self.dirty = true;
        Ok(registered)
    }

    /// Removes a provider's resolvers, reassigning or cancelling their work.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::UnknownProvider`] for unknown tokens.
    pub fn on_provider_removed(&mut self, provider: Token) -> Result<()> {
        let entry = self
            .providers
            .remove(&provider)
            .ok_or(RequestError::UnknownProvider(provider))?;
        tracing::info!(provider = %provider, resolvers = entry.resolvers.len(), "provider removed");
        self.dirty = true;
        for resolver in entry.resolvers {
            if self.handler.registry().is_registered(resolver) {
                self.handler.remove_resolver(resolver)?;
            }
        }
        Ok(())
    }

    /// Cancels and drops every top-level request of a requester that left
    /// the colony. Returns how many requests were dropped.
    ///
    /// # Errors
    ///
    /// Propagates errors of the cancellation workflow.
    pub fn on_requester_removed(&mut self, requester: Token) -> Result<usize> {
        let dropped = self.handler.drop_requester(requester)?;
        if dropped > 0 {
            tracing::info!(requester = %requester, requests = dropped, "requester removed");
            self.dirty = true;
        }
        Ok(dropped)
    }

    // =========================================================================
    // Player
    // =========================================================================

    /// Requests waiting on the player, in token order.
    #[must_use]
    pub fn player_requests(&self) -> Vec<&Request> {
        self.handler
            .registry()
            .player(self.player)
            .map(|player| {
                player
                    .open_requests()
                    .iter()
                    .filter_map(|token| self.handler.requests().get(*token))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Applies the player's answer to a request shown to them.
    ///
    /// # Errors
    ///
    /// - [`RequestError::NotAssigned`] if nobody holds the request
    /// - [`RequestError::IllegalState`] if it is not waiting on the player
    pub fn on_player_response(&mut self, token: Token, response: PlayerResponse) -> Result<()> {
        let holder = self.handler.registry().resolver_for_request(token)?;
        if holder != self.player {
            return Err(RequestError::IllegalState {
                request: token,
                actual: self.request(token)?.state(),
                expected: "a request waiting on the player",
            });
        }
        match response {
            PlayerResponse::Fulfilled(stack) => {
                tracing::info!(request = %token, delivered = %stack, "player fulfilled request");
                self.overrule_request(token, Some(stack))
            }
            PlayerResponse::Cancelled => {
                tracing::info!(request = %token, "player cancelled request");
                self.cancel_request(token)
            }
        }
    }

    // =========================================================================
    // Tick Loop
    // =========================================================================

    /// Advances one colony update.
    pub fn tick(&mut self) {
        self.tick += 1;
        self.handler.set_tick(self.tick);

        // RETRY
        if self.tick.checked_rem(self.config.retry.tick_rate) == Some(0) {
            self.process_retries();
        }

        // REASSESS
        if self.tick.checked_rem(self.config.reassess_interval_ticks) == Some(0) {
            self.on_colony_update(|_| true);
        }
    }

    /// Offers parked requests matching `predicate` to the regular resolvers
    /// again. Returns how many moved.
    ///
    /// Parked means unassigned, or held by the retry queue or the player.
    /// Requests no regular resolver is willing to take are left alone, and
    /// so are requests that used up their retries: the next retry round
    /// hands those to the player.
    pub fn on_colony_update(&mut self, predicate: impl Fn(&Request) -> bool) -> usize {
        let builtins: BTreeSet<Token> = [self.retrying, self.player].into_iter().collect();
        let parked: Vec<Token> = self
            .handler
            .requests()
            .iter()
            .filter(|request| self.is_parked(request))
            .filter(|request| !self.retries_exhausted(request.id()))
            .filter(|request| predicate(*request))
            .filter(|request| self.has_willing_resolver(request, &builtins))
            .map(Request::id)
            .collect();

        let mut moved = 0;
        for token in parked {
            let before = self.handler.registry().resolver_for_request(token).ok();
            let assignable = self
                .handler
                .requests()
                .get(token)
                .is_some_and(|r| r.state().is_assignable());
            let outcome = match before {
                None if assignable => self.handler.assign_request(token, &BTreeSet::new()),
                None => continue,
                Some(holder) if holder == self.retrying => {
                    self.reassign_parked(token, &std::iter::once(self.player).collect())
                }
                Some(_) => self.reassign_parked(token, &std::iter::once(self.retrying).collect()),
            };
            match outcome {
                Ok(Some(now)) if Some(now) != before => moved += 1,
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(request = %token, error = %err, "reassessment failed");
                }
            }
        }
        if moved > 0 {
            tracing::debug!(moved, "parked requests reassigned");
            self.dirty = true;
        }
        moved
    }

    fn is_parked(&self, request: &Request) -> bool {
        let state = request.state();
        if state.is_terminal() || state == RequestState::Finalizing {
            return false;
        }
        match self.handler.registry().resolver_for_request(request.id()) {
            Ok(holder) => holder == self.retrying || holder == self.player,
            Err(_) => state.is_assignable(),
        }
    }

    fn retries_exhausted(&self, request: Token) -> bool {
        self.retrying()
            .is_some_and(|queue| queue.is_exhausted(request))
    }

    /// Returns true if a resolver outside `excluded` would accept `request`
    /// right now.
    fn has_willing_resolver(&self, request: &Request, excluded: &BTreeSet<Token>) -> bool {
        let registry = self.handler.registry();
        let ctx = ResolverContext::new(self.tick, self.handler.requests());
        registry
            .candidates(request, self.config.assigning_strategy, excluded)
            .into_iter()
            .any(|token| {
                registry
                    .get(token)
                    .is_ok_and(|resolver| resolver.can_resolve(&ctx, request))
            })
    }

    fn process_retries(&mut self) {
        let Some(queue) = self.handler.registry().retrying(self.retrying) else {
            tracing::error!(resolver = %self.retrying, "retry queue missing");
            return;
        };
        if let Some(busy) = queue.reassigning() {
            tracing::debug!(request = %busy, "retry round already running");
            return;
        }
        let due = queue.due(self.tick);
        for request in due {
            self.retry_round(request);
        }
    }

    fn retry_round(&mut self, request: Token) {
        let retrying = self.retrying;
        if self.handler.registry().resolver_for_request(request) != Ok(retrying) {
            if let Some(queue) = self.handler.registry.retrying_mut(retrying) {
                queue.forget(request);
            }
            return;
        }
        let exhausted = self
            .handler
            .registry()
            .retrying(retrying)
            .is_some_and(|queue| queue.is_exhausted(request));
        let blacklist: BTreeSet<Token> = if exhausted {
            BTreeSet::new()
        } else {
            std::iter::once(self.player).collect()
        };

        match self.reassign_parked(request, &blacklist) {
            Ok(Some(holder)) if holder == retrying => {
                let tick = self.tick;
                if let Some(queue) = self.handler.registry.retrying_mut(retrying) {
                    queue.reschedule(request, tick);
                    tracing::debug!(
                        request = %request,
                        attempts = queue.attempts(request).unwrap_or_default(),
                        "retry attempt failed"
                    );
                }
            }
            Ok(Some(holder)) => {
                if holder == self.player {
                    tracing::info!(request = %request, "retries exhausted, escalated to player");
                }
                self.dirty = true;
            }
            Ok(None) => {
                tracing::warn!(request = %request, "retry left request unassigned");
                self.dirty = true;
            }
            Err(err) => {
                tracing::error!(request = %request, error = %err, "retry round failed, cancelling");
                if let Err(err) = self.handler.cancel_request(request) {
                    tracing::error!(request = %request, error = %err, "cancel after failed retry failed");
                }
                self.dirty = true;
            }
        }
    }

    /// Reassigns a request held by a built-in, keeping the retry entry alive
    /// while the request is away from the queue.
    fn reassign_parked(
        &mut self,
        request: Token,
        blacklist: &BTreeSet<Token>,
    ) -> Result<Option<Token>> {
        let retrying = self.retrying;
        let before = self.handler.registry().resolver_for_request(request);
        let from_queue = before == Ok(retrying);
        let from_player = before == Ok(self.player);
        if from_queue {
            if let Some(queue) = self.handler.registry.retrying_mut(retrying) {
                queue.begin_reassign(request);
            }
        }

        let outcome = self.handler.reassign_request(request, blacklist);

        if from_queue {
            let back_in_queue =
                self.handler.registry().resolver_for_request(request) == Ok(retrying);
            if let Some(queue) = self.handler.registry.retrying_mut(retrying) {
                queue.end_reassign();
                if !back_in_queue {
                    queue.forget(request);
                }
            }
        }

        // A request the player already held does not start its retries over.
        if from_player && self.handler.registry().resolver_for_request(request) == Ok(retrying) {
            let tick = self.tick;
            if let Some(queue) = self.handler.registry.retrying_mut(retrying) {
                queue.exhaust(request, tick);
            }
        }
        outcome
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Discards every request and rebuilds the registry from the known
    /// providers.
    ///
    /// The token stream continues, so no token is handed out twice.
    ///
    /// # Errors
    ///
    /// Returns the first provider registration error. Providers that fail
    /// are logged and dropped, the rest are still registered.
    pub fn reset(&mut self) -> Result<()> {
        tracing::warn!(
            requests = self.handler.requests().len(),
            providers = self.providers.len(),
            "resetting request manager"
        );
        let tokens = self.handler.tokens.clone();
        self.handler = RequestHandler::new(tokens, self.config.assigning_strategy);
        self.handler.set_tick(self.tick);
        self.install_builtins();

        let providers = std::mem::take(&mut self.providers);
        let mut first_error = None;
        for (token, entry) in providers {
            if let Err(err) = self.on_provider_added(entry.provider) {
                tracing::error!(provider = %token, error = %err, "provider lost on reset");
                first_error.get_or_insert(err);
            }
        }
        self.dirty = true;
        first_error.map_or(Ok(()), Err)
    }
}
