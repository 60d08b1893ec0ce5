//! The request lifecycle state machine.
//!
//! [`RequestHandler`] owns the request table, the resolver registry and the
//! token stream, and is the only code that changes request state. Every
//! transition follows one of a handful of workflows:
//!
//! ```text
//! CREATED/REPORTED --assign--> ASSIGNING --accept--> ASSIGNED --children spawned--> IN_PROGRESS
//!        ^                          |                                                  |
//!        +-------- nobody accepts --+                               all children settled
//!                                                                                      v
//! COMPLETED <--no followups-- RESOLVED <--------------------------------------- resolve()
//!     ^                           |
//!     +-- followups settled -- FOLLOWUP_IN_PROGRESS
//!
//! any active state --cancel/fail/overrule--> FINALIZING --> CANCELLED / FAILED / OVERRULED
//! ```
//!
//! # Cancellation Order
//!
//! Cancelling a request first marks it `FINALIZING`, which makes every
//! further cancel of it a no-op. Then, in order:
//!
//! 1. children are cancelled depth-first
//! 2. the resolver hears `on_assigned_request_being_cancelled`
//! 3. settled children are purged from the table
//! 4. the resolver hears `on_assigned_request_cancelled`
//! 5. the final state is set and the assignment dropped
//! 6. the requester is notified
//!
//! Reassignment runs steps 1 to 5 without touching the requester, then
//! offers the request to everyone but the previous resolver.
//!
//! # Errors
//!
//! Caller mistakes (unknown tokens, assigning an assigned request) return
//! [`RequestError`]. An inconsistency discovered while a workflow cascades is
//! logged at error level and the affected request is cancelled, so one bad
//! request cannot wedge its whole graph.

use std::collections::BTreeSet;

use requestable::{ItemStack, Requestable, Requester, Stack, Token};

use crate::config::AssigningStrategy;
use crate::error::{RequestError, Result};
use crate::notice::{Notice, NoticeBoard, NoticeKind};
use crate::registry::{ResolverCell, ResolverRegistry};
use crate::request::Request;
use crate::resolver::{Resolution, Resolver, ResolverContext};
use crate::state::RequestState;
use crate::store::RequestStore;
use crate::tokens::TokenFactory;

/// How a terminated request ends.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Termination {
    Cancelled,
    Failed,
    Overruled(Option<ItemStack>),
}

impl Termination {
    const fn state(&self) -> RequestState {
        match self {
            Self::Cancelled => RequestState::Cancelled,
            Self::Failed => RequestState::Failed,
            Self::Overruled(_) => RequestState::Overruled,
        }
    }

    const fn notice(&self) -> NoticeKind {
        match self {
            Self::Cancelled => NoticeKind::Cancelled,
            Self::Failed => NoticeKind::Failed,
            Self::Overruled(_) => NoticeKind::Overruled,
        }
    }
}

/// Drives requests through their lifecycle.
#[derive(Debug)]
pub struct RequestHandler {
    pub(crate) store: RequestStore,
    pub(crate) registry: ResolverRegistry,
    pub(crate) tokens: TokenFactory,
    pub(crate) notices: NoticeBoard,
    strategy: AssigningStrategy,
    tick: u64,
}

impl RequestHandler {
    /// Creates an empty handler.
    #[must_use]
    pub fn new(tokens: TokenFactory, strategy: AssigningStrategy) -> Self {
        Self {
            store: RequestStore::new(),
            registry: ResolverRegistry::new(),
            tokens,
            notices: NoticeBoard::new(),
            strategy,
            tick: 0,
        }
    }

    /// All requests.
    #[must_use]
    pub const fn requests(&self) -> &RequestStore {
        &self.store
    }

    /// All resolvers and assignments.
    #[must_use]
    pub const fn registry(&self) -> &ResolverRegistry {
        &self.registry
    }

    /// Queued requester notices.
    #[must_use]
    pub const fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    /// Resolver visiting order.
    #[must_use]
    pub const fn strategy(&self) -> AssigningStrategy {
        self.strategy
    }

    /// Tick handed to resolver callbacks.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    pub(crate) fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    /// Mints a token not used by any request or resolver.
    pub fn mint_token(&mut self) -> Token {
        let store = &self.store;
        let registry = &self.registry;
        self.tokens
            .mint_unique(|token| store.contains(token) || registry.is_registered(token))
    }

    // =========================================================================
    // Creation and Assignment
    // =========================================================================

    /// Registers a new request in [`RequestState::Created`].
    pub fn create_request(&mut self, requester: Requester, requested: Requestable) -> Token {
        let token = self.mint_token();
        tracing::debug!(
            request = %token,
            requester = %requester,
            wanted = %requested,
            "request created"
        );
        self.store.insert(Request::new(token, requester, requested));
        token
    }

    /// Offers a request to every eligible resolver outside `blacklist`.
    ///
    /// Returns the resolver holding the request afterwards, which differs
    /// from the one that accepted it when a child failed during binding.
    /// `None` means nobody holds it and the request is left `REPORTED` for
    /// a later attempt.
    ///
    /// # Errors
    ///
    /// - [`RequestError::UnknownRequest`] for unknown tokens
    /// - [`RequestError::AlreadyAssigned`] if a resolver already holds it
    /// - [`RequestError::IllegalState`] unless the request is `CREATED` or
    ///   `REPORTED`
    pub fn assign_request(
        &mut self,
        token: Token,
        blacklist: &BTreeSet<Token>,
    ) -> Result<Option<Token>> {
        let request = self.store.require(token)?;
        if let Ok(resolver) = self.registry.resolver_for_request(token) {
            return Err(RequestError::AlreadyAssigned {
                request: token,
                resolver,
            });
        }
        if !request.state().is_assignable() {
            return Err(RequestError::IllegalState {
                request: token,
                actual: request.state(),
                expected: "CREATED or REPORTED",
            });
        }

        let candidates = self.registry.candidates(request, self.strategy, blacklist);
        self.store.require_mut(token)?.set_state(RequestState::Assigning);

        for candidate in candidates {
            if self.try_assign_to(token, candidate)? {
                return Ok(self.holder_after_bind(token, candidate));
            }
        }

        self.store.require_mut(token)?.set_state(RequestState::Reported);
        tracing::debug!(request = %token, "no resolver accepted request");
        Ok(None)
    }

    /// Offers `token` to a single resolver and binds it on acceptance.
    fn try_assign_to(&mut self, token: Token, candidate: Token) -> Result<bool> {
        let children = {
            let ctx = ResolverContext::new(self.tick, &self.store);
            let request = self.store.require(token)?;
            let resolver = self.registry.get_mut(candidate)?;
            if !resolver.can_resolve(&ctx, request) {
                return Ok(false);
            }
            match resolver.attempt_resolve(&ctx, request) {
                Some(children) => children,
                None => return Ok(false),
            }
        };
        self.bind(token, candidate, children)?;
        Ok(true)
    }

    /// Who answers for `token` once `candidate` accepted it.
    ///
    /// Binding runs nested workflows: a failed child sends the request to
    /// another resolver, an immediate resolution settles it. A settled
    /// request counts as served by `candidate`; an active one nobody holds
    /// has no holder.
    fn holder_after_bind(&self, token: Token, candidate: Token) -> Option<Token> {
        match self.registry.resolver_for_request(token) {
            Ok(holder) => Some(holder),
            Err(_) if self.state_of(token).is_some_and(RequestState::is_terminal) => {
                Some(candidate)
            }
            Err(_) => None,
        }
    }

    fn bind(&mut self, token: Token, resolver: Token, children: Vec<Requestable>) -> Result<()> {
        self.registry.add_assignment(resolver, token)?;
        self.store.require_mut(token)?.set_state(RequestState::Assigned);
        tracing::debug!(
            request = %token,
            resolver = %resolver,
            children = children.len(),
            "request assigned"
        );
        self.hook(resolver, token, |r, ctx, req| r.on_request_assigned(ctx, req));
        self.spawn_children(token, resolver, children)?;

        // A child may have failed meanwhile and sent this request elsewhere.
        if self.state_of(token) != Some(RequestState::Assigned) {
            return Ok(());
        }
        self.store.require_mut(token)?.set_state(RequestState::InProgress);
        if self.store.open_children(token) == 0 {
            self.resolve_request(token)?;
        }
        Ok(())
    }

    /// Creates `values` as children of `parent` on behalf of `resolver`,
    /// then assigns them.
    ///
    /// All children are linked before any is assigned, so the parent cannot
    /// look settled while some are still missing.
    fn spawn_children(
        &mut self,
        parent: Token,
        resolver: Token,
        values: Vec<Requestable>,
    ) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let requester = self.registry.get(resolver)?.as_requester();
        let mut spawned = Vec::with_capacity(values.len());
        for value in values {
            let child = self.create_request(requester, value);
            self.store.link_child(parent, child)?;
            spawned.push(child);
        }
        for child in spawned {
            let assignable = self
                .store
                .get(child)
                .is_some_and(|c| c.state().is_assignable());
            if assignable && !self.registry.is_assigned(child) {
                self.assign_request(child, &BTreeSet::new())?;
            }
        }
        Ok(())
    }

    /// Moves a request to a different resolver.
    ///
    /// The current resolver is dropped through the internal cancellation
    /// workflow (children cancelled, hooks fired, requester untouched) and
    /// excluded along with `blacklist`. If nobody else accepts, the request
    /// goes back to the previous resolver when that one still accepts it.
    ///
    /// # Errors
    ///
    /// - [`RequestError::UnknownRequest`] for unknown tokens
    /// - [`RequestError::NotAssigned`] if nobody holds the request
    /// - [`RequestError::IllegalState`] for settled or settling requests
    pub fn reassign_request(
        &mut self,
        token: Token,
        blacklist: &BTreeSet<Token>,
    ) -> Result<Option<Token>> {
        let state = self.store.require(token)?.state();
        let incumbent = self.registry.resolver_for_request(token)?;
        if !matches!(
            state,
            RequestState::Assigned | RequestState::InProgress | RequestState::FollowupInProgress
        ) {
            return Err(RequestError::IllegalState {
                request: token,
                actual: state,
                expected: "ASSIGNED, IN_PROGRESS or FOLLOWUP_IN_PROGRESS",
            });
        }

        self.detach(token, incumbent)?;
        self.store.require_mut(token)?.set_state(RequestState::Reported);

        let mut excluded = blacklist.clone();
        excluded.insert(incumbent);
        if let Some(resolver) = self.assign_request(token, &excluded)? {
            tracing::debug!(
                request = %token,
                from = %incumbent,
                to = %resolver,
                "request reassigned"
            );
            return Ok(Some(resolver));
        }

        if self.registry.is_registered(incumbent) && !self.registry.is_being_removed(incumbent) {
            self.store.require_mut(token)?.set_state(RequestState::Assigning);
            if self.try_assign_to(token, incumbent)? {
                tracing::debug!(
                    request = %token,
                    resolver = %incumbent,
                    "no alternative resolver, kept by previous one"
                );
                return Ok(self.holder_after_bind(token, incumbent));
            }
            self.store.require_mut(token)?.set_state(RequestState::Reported);
        }
        tracing::debug!(request = %token, "request left unassigned after reassignment");
        Ok(None)
    }

    // =========================================================================
    // Resolution and Completion
    // =========================================================================

    /// Asks the bound resolver to perform the work.
    ///
    /// # Errors
    ///
    /// - [`RequestError::NotAssigned`] if nobody holds the request
    /// - [`RequestError::IllegalState`] unless the request is `ASSIGNED` or
    ///   `IN_PROGRESS`
    /// - [`RequestError::ChildrenPending`] while children are open
    pub fn resolve_request(&mut self, token: Token) -> Result<()> {
        let state = self.store.require(token)?.state();
        let resolver = self.registry.resolver_for_request(token)?;
        if !matches!(state, RequestState::Assigned | RequestState::InProgress) {
            return Err(RequestError::IllegalState {
                request: token,
                actual: state,
                expected: "ASSIGNED or IN_PROGRESS",
            });
        }
        let pending = self.store.open_children(token);
        if pending > 0 {
            return Err(RequestError::ChildrenPending {
                request: token,
                pending,
            });
        }
        self.store.require_mut(token)?.set_state(RequestState::InProgress);

        let resolution = {
            let ctx = ResolverContext::new(self.tick, &self.store);
            let request = self.store.require(token)?;
            self.registry.get_mut(resolver)?.resolve(&ctx, request)
        };
        match resolution {
            Resolution::Resolved { result, deliveries } => {
                self.complete_resolution(token, result, deliveries)
            }
            Resolution::Pending => {
                tracing::trace!(request = %token, resolver = %resolver, "resolution pending");
                Ok(())
            }
            Resolution::Failed => {
                tracing::warn!(request = %token, resolver = %resolver, "resolver gave up");
                self.fail_request(token)
            }
        }
    }

    /// Records that the bound resolver finished the work, then runs
    /// followups or completes the request.
    ///
    /// A `None` result keeps any result recorded earlier.
    ///
    /// # Errors
    ///
    /// - [`RequestError::NotAssigned`] if nobody holds the request
    /// - [`RequestError::IllegalState`] unless the request is `ASSIGNED` or
    ///   `IN_PROGRESS`
    pub fn complete_resolution(
        &mut self,
        token: Token,
        result: Option<Requestable>,
        deliveries: Vec<ItemStack>,
    ) -> Result<()> {
        let state = self.store.require(token)?.state();
        let resolver = self.registry.resolver_for_request(token)?;
        if !matches!(state, RequestState::Assigned | RequestState::InProgress) {
            return Err(RequestError::IllegalState {
                request: token,
                actual: state,
                expected: "ASSIGNED or IN_PROGRESS",
            });
        }
        {
            let request = self.store.require_mut(token)?;
            if result.is_some() {
                request.set_result(result);
            }
            for stack in deliveries {
                request.add_delivery(stack);
            }
            request.set_state(RequestState::Resolved);
        }

        let followups = {
            let ctx = ResolverContext::new(self.tick, &self.store);
            let request = self.store.require(token)?;
            self.registry.get_mut(resolver)?.followups(&ctx, request)
        };
        if followups.is_empty() {
            return self.complete_request(token);
        }

        tracing::debug!(request = %token, followups = followups.len(), "running followups");
        self.store
            .require_mut(token)?
            .set_state(RequestState::FollowupInProgress);
        self.spawn_children(token, resolver, followups)?;
        if self.state_of(token) == Some(RequestState::FollowupInProgress)
            && self.store.open_children(token) == 0
        {
            self.complete_request(token)?;
        }
        Ok(())
    }

    /// Marks a request completed and notifies its requester.
    ///
    /// Completing a settled request is a no-op.
    ///
    /// # Errors
    ///
    /// - [`RequestError::UnknownRequest`] for unknown tokens
    /// - [`RequestError::ChildrenPending`] while children are open
    pub fn complete_request(&mut self, token: Token) -> Result<()> {
        let state = self.store.require(token)?.state();
        if state.is_terminal() || state == RequestState::Finalizing {
            return Ok(());
        }
        let pending = self.store.open_children(token);
        if pending > 0 {
            return Err(RequestError::ChildrenPending {
                request: token,
                pending,
            });
        }
        self.store.require_mut(token)?.set_state(RequestState::Completed);
        if let Ok(resolver) = self.registry.resolver_for_request(token) {
            self.hook(resolver, token, |r, ctx, req| r.on_request_completed(ctx, req));
            self.registry.remove_assignment(token);
        }
        tracing::debug!(request = %token, "request completed");
        self.notify_requester(token, NoticeKind::Completed)
    }

    /// Applies a state reported from outside the engine.
    ///
    /// Only outcomes can be reported: `RESOLVED`, `COMPLETED`, `CANCELLED`,
    /// `FAILED`, `OVERRULED` and `RECEIVED`.
    ///
    /// # Errors
    ///
    /// Returns the error of the workflow the state routes to, or
    /// [`RequestError::IllegalState`] for states that cannot be reported.
    pub fn update_request_state(&mut self, token: Token, state: RequestState) -> Result<()> {
        let current = self.store.require(token)?.state();
        match state {
            RequestState::Resolved => self.complete_resolution(token, None, Vec::new()),
            RequestState::Completed => self.complete_request(token),
            RequestState::Cancelled => self.cancel_request(token),
            RequestState::Failed => self.fail_request(token),
            RequestState::Overruled => self.overrule_request(token, None),
            RequestState::Received => {
                if !current.is_fulfilled() {
                    return Err(RequestError::IllegalState {
                        request: token,
                        actual: current,
                        expected: "COMPLETED or OVERRULED",
                    });
                }
                self.store.require_mut(token)?.set_state(RequestState::Received);
                Ok(())
            }
            RequestState::Created
            | RequestState::Reported
            | RequestState::Assigning
            | RequestState::Assigned
            | RequestState::InProgress
            | RequestState::FollowupInProgress
            | RequestState::Finalizing => Err(RequestError::IllegalState {
                request: token,
                actual: current,
                expected: "a reportable outcome",
            }),
        }
    }

    // =========================================================================
    // Termination
    // =========================================================================

    /// Cancels a request and its whole subtree.
    ///
    /// Cancelling a settled request is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::UnknownRequest`] for unknown tokens.
    pub fn cancel_request(&mut self, token: Token) -> Result<()> {
        self.terminate(token, Termination::Cancelled)
    }

    /// Gives up on a request, cancelling its subtree.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::UnknownRequest`] for unknown tokens.
    pub fn fail_request(&mut self, token: Token) -> Result<()> {
        self.terminate(token, Termination::Failed)
    }

    /// Settles a request from outside, optionally recording what was handed
    /// over instead. The requester sees it as fulfilled.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::UnknownRequest`] for unknown tokens.
    pub fn overrule_request(&mut self, token: Token, delivery: Option<ItemStack>) -> Result<()> {
        self.terminate(token, Termination::Overruled(delivery))
    }

    fn terminate(&mut self, token: Token, how: Termination) -> Result<()> {
        let state = self.store.require(token)?.state();
        if state.is_terminal() || state == RequestState::Finalizing {
            return Ok(());
        }
        self.store.require_mut(token)?.set_state(RequestState::Finalizing);
        self.cancel_children(token)?;

        let resolver = self.registry.resolver_for_request(token).ok();
        if let Some(resolver) = resolver {
            self.hook(resolver, token, |r, ctx, req| {
                r.on_assigned_request_being_cancelled(ctx, req);
            });
        }
        self.purge_settled_children(token);
        if let Some(resolver) = resolver {
            self.hook(resolver, token, |r, ctx, req| {
                r.on_assigned_request_cancelled(ctx, req);
            });
        }

        {
            let request = self.store.require_mut(token)?;
            if let Termination::Overruled(Some(stack)) = &how {
                request.set_result(Some(Requestable::Stack(Stack::new(stack.clone()))));
                request.override_deliveries(vec![stack.clone()]);
            }
            request.set_state(how.state());
        }
        self.registry.remove_assignment(token);
        tracing::debug!(request = %token, outcome = %how.notice(), "request settled");
        self.notify_requester(token, how.notice())
    }

    /// Drops the binding to `resolver` without settling the request.
    ///
    /// Leaves the request `FINALIZING`; callers move it on. Deliveries made
    /// by the dropped resolver are discarded, the next one starts over.
    fn detach(&mut self, token: Token, resolver: Token) -> Result<()> {
        {
            let request = self.store.require_mut(token)?;
            request.set_state(RequestState::Finalizing);
            request.reset_deliveries();
        }
        self.cancel_children(token)?;
        self.hook(resolver, token, |r, ctx, req| {
            r.on_assigned_request_being_cancelled(ctx, req);
        });
        self.purge_settled_children(token);
        self.hook(resolver, token, |r, ctx, req| {
            r.on_assigned_request_cancelled(ctx, req);
        });
        self.registry.remove_assignment(token);
        Ok(())
    }

    fn cancel_children(&mut self, token: Token) -> Result<()> {
        let children: Vec<Token> = self.store.require(token)?.children().iter().copied().collect();
        for child in children {
            if self.store.contains(child) {
                self.terminate(child, Termination::Cancelled)?;
            }
        }
        Ok(())
    }

    fn purge_settled_children(&mut self, token: Token) {
        let settled: Vec<Token> = self
            .store
            .get(token)
            .map(|request| {
                request
                    .children()
                    .iter()
                    .copied()
                    .filter(|child| self.state_of(*child).is_some_and(RequestState::is_terminal))
                    .collect()
            })
            .unwrap_or_default();
        for child in settled {
            for removed in self.store.purge_subtree(child) {
                self.registry.remove_assignment(removed.id());
            }
        }
    }

    // =========================================================================
    // Notification
    // =========================================================================

    fn notify_requester(&mut self, token: Token, kind: NoticeKind) -> Result<()> {
        let request = self.store.require(token)?;
        let requester = request.requester().id;
        let Some(parent) = request.parent() else {
            self.notices.push(requester, Notice { request: token, kind });
            return Ok(());
        };

        if self.registry.is_registered(requester) {
            if kind.is_fulfilled() {
                self.hook(requester, token, |r, ctx, child| {
                    r.on_requested_request_complete(ctx, child);
                });
            } else {
                self.hook(requester, token, |r, ctx, child| {
                    r.on_requested_request_cancelled(ctx, child);
                });
            }
        }
        self.child_settled(parent, kind)
    }

    /// Re-checks a parent after one of its children settled.
    fn child_settled(&mut self, parent: Token, kind: NoticeKind) -> Result<()> {
        let Some(state) = self.state_of(parent) else {
            return Ok(());
        };
        let open = self.store.open_children(parent);
        match (state, kind.is_fulfilled()) {
            (RequestState::InProgress, true) if open == 0 => {
                if let Err(err) = self.resolve_request(parent) {
                    self.abandon(parent, &err)?;
                }
                Ok(())
            }
            (RequestState::FollowupInProgress, _) if open == 0 => self.complete_request(parent),
            (RequestState::Assigned | RequestState::InProgress, false) => {
                tracing::debug!(request = %parent, "prerequisite lost, reassigning");
                match self.reassign_request(parent, &BTreeSet::new()) {
                    Ok(_) => Ok(()),
                    Err(err) => self.abandon(parent, &err),
                }
            }
            _ => Ok(()),
        }
    }

    fn abandon(&mut self, token: Token, err: &RequestError) -> Result<()> {
        tracing::error!(request = %token, error = %err, "inconsistent request workflow, cancelling");
        self.terminate(token, Termination::Cancelled)
    }

    // =========================================================================
    // Cleanup and Removal
    // =========================================================================

    /// Drops a settled request and its subtree once the requester is done
    /// with it.
    ///
    /// Returns false if the request is already gone.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::IllegalState`] if the request is still active.
    pub fn clean_request_data(&mut self, token: Token) -> Result<bool> {
        let Some(state) = self.state_of(token) else {
            return Ok(false);
        };
        if !state.is_terminal() {
            return Err(RequestError::IllegalState {
                request: token,
                actual: state,
                expected: "a settled state",
            });
        }
        let open: Vec<Token> = self
            .store
            .descendants(token)
            .into_iter()
            .filter(|t| self.state_of(*t).is_some_and(|s| !s.is_terminal()))
            .collect();
        for descendant in open {
            self.terminate(descendant, Termination::Cancelled)?;
        }
        let removed = self.store.purge_subtree(token);
        for request in &removed {
            self.registry.remove_assignment(request.id());
            self.notices.forget_request(request.id());
        }
        tracing::debug!(request = %token, removed = removed.len(), "request data cleaned");
        Ok(true)
    }

    /// Cancels and cleans every top-level request of `requester`.
    ///
    /// Returns how many requests were dropped.
    ///
    /// # Errors
    ///
    /// Propagates errors of the cancellation workflow.
    pub fn drop_requester(&mut self, requester: Token) -> Result<usize> {
        let owned: Vec<Token> = self
            .store
            .iter()
            .filter(|r| r.requester().id == requester && !r.has_parent())
            .map(Request::id)
            .collect();
        for token in &owned {
            self.cancel_request(*token)?;
            self.clean_request_data(*token)?;
        }
        self.notices.forget_requester(requester);
        Ok(owned.len())
    }

    /// Registers a provider-built resolver.
    ///
    /// # Errors
    ///
    /// - [`RequestError::ResolverAlreadyRegistered`] for duplicate tokens
    /// - [`RequestError::ReservedPriority`] for priorities in the fallback band
    pub fn register_resolver(&mut self, resolver: Box<dyn Resolver>) -> Result<Token> {
        self.registry.register(ResolverCell::Dynamic(resolver))
    }

    /// Hands every request held by `resolver` to someone else, then
    /// unregisters it.
    ///
    /// Requests nobody else accepts are cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::UnknownResolver`] for unregistered tokens.
    pub fn remove_resolver(&mut self, resolver: Token) -> Result<()> {
        self.registry.mark_being_removed(resolver)?;
        let assigned = self.registry.assigned_requests(resolver)?;
        tracing::info!(resolver = %resolver, requests = assigned.len(), "removing resolver");

        let blacklist: BTreeSet<Token> = std::iter::once(resolver).collect();
        for token in assigned {
            // An earlier cascade may already have moved or settled it.
            if self.registry.resolver_for_request(token) != Ok(resolver) {
                continue;
            }
            let active = self
                .state_of(token)
                .is_some_and(|s| !s.is_terminal() && s != RequestState::Finalizing);
            if !active {
                self.registry.remove_assignment(token);
                continue;
            }
            self.detach(token, resolver)?;
            self.store.require_mut(token)?.set_state(RequestState::Reported);
            if self.assign_request(token, &blacklist)?.is_none() {
                tracing::warn!(request = %token, "no resolver left for request, cancelling");
                self.terminate(token, Termination::Cancelled)?;
            }
        }
        self.registry.remove(resolver)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn state_of(&self, token: Token) -> Option<RequestState> {
        self.store.get(token).map(Request::state)
    }

    /// Runs a resolver callback on a request.
    fn hook(
        &mut self,
        resolver: Token,
        request: Token,
        f: impl FnOnce(&mut dyn Resolver, &ResolverContext<'_>, &Request),
    ) {
        let ctx = ResolverContext::new(self.tick, &self.store);
        match (self.store.get(request), self.registry.get_mut(resolver)) {
            (Some(req), Ok(r)) => f(r, &ctx, req),
            _ => tracing::error!(
                request = %request,
                resolver = %resolver,
                "resolver callback target missing"
            ),
        }
    }
}
