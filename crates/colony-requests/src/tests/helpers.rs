//! Test resolvers, providers and setup utilities.
//!
//! [`ScriptedResolver`] covers most needs: it accepts whatever its kinds
//! allow, optionally asks for children or followups, and then delivers,
//! stays pending or fails. Every callback it receives is appended to a
//! shared [`CallLog`], so tests can assert on hook order.

use std::sync::{Arc, Mutex};

use requestable::{
    Burnable, ItemStack, Location, RequestKinds, Requestable, Requester, Stack, Token,
};

use crate::config::ManagerConfig;
use crate::manager::RequestManager;
use crate::request::Request;
use crate::resolver::{Resolution, Resolver, ResolverContext, ResolverProvider};

// =============================================================================
// Logging
// =============================================================================

/// Installs a test-writer subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

// =============================================================================
// Call Log
// =============================================================================

/// Shared, ordered record of resolver callbacks.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    /// Appends an entry.
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    /// Copy of every entry so far.
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Position of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

// =============================================================================
// Scripted Resolver
// =============================================================================

/// What a [`ScriptedResolver`] does when asked to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Deliver this stack right away
    Deliver(ItemStack),
    /// Report `Pending` and wait for an external report
    Wait,
    /// Give up
    Fail,
}

/// A configurable resolver for tests.
#[derive(Debug, Clone)]
pub struct ScriptedResolver {
    pub name: &'static str,
    pub token: Token,
    pub location: Location,
    pub kinds: RequestKinds,
    pub priority: i32,
    pub accepts: bool,
    pub children: Vec<Requestable>,
    pub followups: Vec<Requestable>,
    pub outcome: Outcome,
    pub log: CallLog,
}

impl ScriptedResolver {
    /// A resolver that accepts anything of `kinds` and delivers one plank.
    pub fn new(name: &'static str, token: Token, kinds: RequestKinds, priority: i32) -> Self {
        Self {
            name,
            token,
            location: Location::default(),
            kinds,
            priority,
            accepts: true,
            children: Vec::new(),
            followups: Vec::new(),
            outcome: Outcome::Deliver(ItemStack::new("oak_planks", 1)),
            log: CallLog::default(),
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    pub fn declining(mut self) -> Self {
        self.accepts = false;
        self
    }

    pub fn with_children(mut self, children: Vec<Requestable>) -> Self {
        self.children = children;
        self
    }

    pub fn with_followups(mut self, followups: Vec<Requestable>) -> Self {
        self.followups = followups;
        self
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    fn record(&self, event: &str, request: &Request) {
        self.log
            .push(format!("{}:{}:{}", self.name, event, request.id()));
    }
}

impl Resolver for ScriptedResolver {
    fn token(&self) -> Token {
        self.token
    }

    fn location(&self) -> Location {
        self.location
    }

    fn kinds(&self) -> RequestKinds {
        self.kinds
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn can_resolve(&self, _ctx: &ResolverContext<'_>, _request: &Request) -> bool {
        self.accepts
    }

    fn attempt_resolve(
        &mut self,
        _ctx: &ResolverContext<'_>,
        request: &Request,
    ) -> Option<Vec<Requestable>> {
        self.record("attempt", request);
        Some(self.children.clone())
    }

    fn resolve(&mut self, _ctx: &ResolverContext<'_>, request: &Request) -> Resolution {
        self.record("resolve", request);
        match &self.outcome {
            Outcome::Deliver(stack) => Resolution::delivered(stack.clone()),
            Outcome::Wait => Resolution::Pending,
            Outcome::Fail => Resolution::Failed,
        }
    }

    fn followups(&mut self, _ctx: &ResolverContext<'_>, _request: &Request) -> Vec<Requestable> {
        // Followups run once per resolution.
        std::mem::take(&mut self.followups)
    }

    fn on_request_assigned(&mut self, _ctx: &ResolverContext<'_>, request: &Request) {
        self.record("assigned", request);
    }

    fn on_assigned_request_being_cancelled(
        &mut self,
        ctx: &ResolverContext<'_>,
        request: &Request,
    ) {
        self.record("being_cancelled", request);
        for child in request.children() {
            if let Some(child) = ctx.request(*child) {
                self.log
                    .push(format!("{}:child_state:{}", self.name, child.state()));
            }
        }
    }

    fn on_assigned_request_cancelled(&mut self, _ctx: &ResolverContext<'_>, request: &Request) {
        self.record("cancelled", request);
    }

    fn on_request_completed(&mut self, _ctx: &ResolverContext<'_>, request: &Request) {
        self.record("completed", request);
    }

    fn on_requested_request_complete(&mut self, _ctx: &ResolverContext<'_>, child: &Request) {
        self.record("child_complete", child);
    }

    fn on_requested_request_cancelled(&mut self, _ctx: &ResolverContext<'_>, child: &Request) {
        self.record("child_cancelled", child);
    }
}

// =============================================================================
// Providers
// =============================================================================

/// A building that contributes a fixed set of resolvers.
pub struct TestProvider {
    pub token: Token,
    pub resolvers: Vec<ScriptedResolver>,
}

impl ResolverProvider for TestProvider {
    fn token(&self) -> Token {
        self.token
    }

    fn build_resolvers(&self) -> Vec<Box<dyn Resolver>> {
        self.resolvers
            .iter()
            .cloned()
            .map(|r| Box::new(r) as Box<dyn Resolver>)
            .collect()
    }
}

// =============================================================================
// Setup
// =============================================================================

/// A manager with default settings and the given seed.
pub fn manager(seed: u64) -> RequestManager {
    init_tracing();
    RequestManager::new(ManagerConfig::with_seed(seed), Location::new(0, 64, 0)).unwrap()
}

/// A citizen with a fresh token.
pub fn citizen(manager: &mut RequestManager) -> Requester {
    Requester::new(manager.mint_token(), Location::new(12, 64, -3))
}

/// Sixteen oak logs.
pub fn wood() -> Requestable {
    Requestable::Stack(Stack::new(ItemStack::new("oak_log", 16)))
}

/// Four pieces of fuel.
pub fn fuel() -> Requestable {
    Requestable::Burnable(Burnable { count: 4 })
}
