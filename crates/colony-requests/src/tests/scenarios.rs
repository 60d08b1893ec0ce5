//! End-to-end request workflows through the [`RequestManager`] façade.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};

use requestable::{
    Delivery, Food, ItemStack, Location, RequestKinds, Requestable, Stack,
};

use crate::config::{AssigningStrategy, ManagerConfig};
use crate::error::RequestError;
use crate::handler::RequestHandler;
use crate::manager::RequestManager;
use crate::notice::{Notice, NoticeKind};
use crate::resolver::{PlayerResponse, Resolver, ResolverProvider, MIN_DYNAMIC_PRIORITY};
use crate::state::RequestState;
use crate::tokens::TokenFactory;

use super::helpers::{
    citizen, fuel, init_tracing, manager, wood, CallLog, Outcome, ScriptedResolver, TestProvider,
};

fn state(manager: &RequestManager, token: requestable::Token) -> RequestState {
    manager.request(token).unwrap().state()
}

// =============================================================================
// Assignment
// =============================================================================

#[test]
fn highest_priority_resolver_wins() {
    let mut m = manager(1);
    let a = m.mint_token();
    let b = m.mint_token();
    m.register_resolver(Box::new(
        ScriptedResolver::new("a", a, RequestKinds::ITEM, 5).with_outcome(Outcome::Wait),
    ))
    .unwrap();
    m.register_resolver(Box::new(
        ScriptedResolver::new("b", b, RequestKinds::ITEM, 10).with_outcome(Outcome::Wait),
    ))
    .unwrap();

    let requester = citizen(&mut m);
    let request = m.create_and_assign_request(requester, wood()).unwrap();

    assert_eq!(m.resolver_for_request(request), Ok(b));
    assert_eq!(state(&m, request), RequestState::InProgress);
}

#[test]
fn first_come_first_serve_ignores_priority() {
    init_tracing();
    let config = ManagerConfig {
        assigning_strategy: AssigningStrategy::FirstComeFirstServe,
        ..ManagerConfig::with_seed(1)
    };
    let mut m = RequestManager::new(config, Location::default()).unwrap();
    let a = m.mint_token();
    let b = m.mint_token();
    m.register_resolver(Box::new(
        ScriptedResolver::new("a", a, RequestKinds::ITEM, 5).with_outcome(Outcome::Wait),
    ))
    .unwrap();
    m.register_resolver(Box::new(
        ScriptedResolver::new("b", b, RequestKinds::ITEM, 10).with_outcome(Outcome::Wait),
    ))
    .unwrap();

    let requester = citizen(&mut m);
    let request = m.create_and_assign_request(requester, wood()).unwrap();
    assert_eq!(m.resolver_for_request(request), Ok(a));
}

#[test]
fn nearer_resolver_wins_a_priority_tie() {
    let mut m = manager(2);
    let far = m.mint_token();
    let near = m.mint_token();
    m.register_resolver(Box::new(
        ScriptedResolver::new("far", far, RequestKinds::ITEM, 0)
            .at(Location::new(400, 64, 0))
            .with_outcome(Outcome::Wait),
    ))
    .unwrap();
    m.register_resolver(Box::new(
        ScriptedResolver::new("near", near, RequestKinds::ITEM, 0)
            .at(Location::new(10, 64, 0))
            .with_outcome(Outcome::Wait),
    ))
    .unwrap();

    let requester = citizen(&mut m);
    let request = m.create_and_assign_request(requester, wood()).unwrap();
    assert_eq!(m.resolver_for_request(request), Ok(near));
}

#[test]
fn declining_resolver_is_skipped() {
    let mut m = manager(3);
    let picky = m.mint_token();
    let fallback = m.mint_token();
    m.register_resolver(Box::new(
        ScriptedResolver::new("picky", picky, RequestKinds::ITEM, 10).declining(),
    ))
    .unwrap();
    m.register_resolver(Box::new(
        ScriptedResolver::new("fallback", fallback, RequestKinds::ITEM, 1)
            .with_outcome(Outcome::Wait),
    ))
    .unwrap();

    let requester = citizen(&mut m);
    let request = m.create_and_assign_request(requester, wood()).unwrap();
    assert_eq!(m.resolver_for_request(request), Ok(fallback));
}

#[test]
fn reassign_without_alternative_reverts_to_previous_resolver() {
    let mut m = manager(4);
    let log = CallLog::default();
    let b = m.mint_token();
    m.register_resolver(Box::new(
        ScriptedResolver::new("b", b, RequestKinds::ITEM, 10)
            .with_outcome(Outcome::Wait)
            .with_log(log.clone()),
    ))
    .unwrap();
    let requester = citizen(&mut m);
    let request = m.create_and_assign_request(requester, wood()).unwrap();

    // Exclude the built-in fallbacks too, so nobody but b is left.
    let blacklist: BTreeSet<_> = [b, m.retrying_token(), m.player_token()]
        .into_iter()
        .collect();
    assert_eq!(m.reassign_request(request, &blacklist), Ok(Some(b)));
    assert_eq!(m.resolver_for_request(request), Ok(b));
    assert_eq!(state(&m, request), RequestState::InProgress);

    let cancelled = log.position(&format!("b:cancelled:{request}")).unwrap();
    let entries = log.entries();
    let reassigned = entries
        .iter()
        .rposition(|e| *e == format!("b:assigned:{request}"))
        .unwrap();
    assert!(cancelled < reassigned);
}

#[test]
fn reassign_moves_to_an_alternative() {
    let mut m = manager(5);
    let a = m.mint_token();
    let b = m.mint_token();
    m.register_resolver(Box::new(
        ScriptedResolver::new("a", a, RequestKinds::ITEM, 5).with_outcome(Outcome::Wait),
    ))
    .unwrap();
    m.register_resolver(Box::new(
        ScriptedResolver::new("b", b, RequestKinds::ITEM, 10).with_outcome(Outcome::Wait),
    ))
    .unwrap();
    let requester = citizen(&mut m);
    let request = m.create_and_assign_request(requester, wood()).unwrap();

    assert_eq!(m.reassign_request(request, &BTreeSet::new()), Ok(Some(a)));
    assert_eq!(m.registry().assigned_requests(b).unwrap(), Vec::new());
}

// =============================================================================
// Children and Followups
// =============================================================================

#[test]
fn cancelling_a_parent_cancels_children_before_its_hooks() {
    let mut m = manager(6);
    let log = CallLog::default();
    let crafter = m.mint_token();
    let stoker = m.mint_token();
    m.register_resolver(Box::new(
        ScriptedResolver::new("crafter", crafter, RequestKinds::ITEM, 10)
            .with_children(vec![fuel()])
            .with_log(log.clone()),
    ))
    .unwrap();
    m.register_resolver(Box::new(
        ScriptedResolver::new("stoker", stoker, RequestKinds::BURNABLE, 10)
            .with_outcome(Outcome::Wait)
            .with_log(log.clone()),
    ))
    .unwrap();

    let requester = citizen(&mut m);
    let parent = m.create_and_assign_request(requester, wood()).unwrap();
    let child = *m.request(parent).unwrap().children().iter().next().unwrap();
    assert_eq!(m.resolver_for_request(child), Ok(stoker));
    assert_eq!(m.request(child).unwrap().requester().id, crafter);
    assert_eq!(state(&m, parent), RequestState::InProgress);

    m.cancel_request(parent).unwrap();

    let child_cancelled = log.position(&format!("stoker:cancelled:{child}")).unwrap();
    let being_cancelled = log
        .position(&format!("crafter:being_cancelled:{parent}"))
        .unwrap();
    let cancelled = log.position(&format!("crafter:cancelled:{parent}")).unwrap();
    assert!(child_cancelled < being_cancelled);
    assert!(being_cancelled < cancelled);
    assert!(log
        .entries()
        .contains(&"crafter:child_state:CANCELLED".to_string()));

    assert_eq!(state(&m, parent), RequestState::Cancelled);
    assert!(m.request(child).is_err(), "settled children are purged");
    assert!(!m.registry().is_assigned(parent));
    assert!(!m.registry().is_assigned(child));
    assert!(m.violations().is_empty());
    assert_eq!(
        m.drain_notices(requester.id),
        vec![Notice {
            request: parent,
            kind: NoticeKind::Cancelled
        }]
    );
}

#[test]
fn parent_resolves_once_children_complete() {
    let mut m = manager(7);
    let log = CallLog::default();
    let crafter = m.mint_token();
    let stoker = m.mint_token();
    m.register_resolver(Box::new(
        ScriptedResolver::new("crafter", crafter, RequestKinds::ITEM, 10)
            .with_children(vec![fuel()])
            .with_outcome(Outcome::Deliver(ItemStack::new("oak_log", 16)))
            .with_log(log.clone()),
    ))
    .unwrap();
    m.register_resolver(Box::new(
        ScriptedResolver::new("stoker", stoker, RequestKinds::BURNABLE, 10)
            .with_outcome(Outcome::Wait)
            .with_log(log.clone()),
    ))
    .unwrap();

    let requester = citizen(&mut m);
    let parent = m.create_and_assign_request(requester, wood()).unwrap();
    let child = *m.request(parent).unwrap().children().iter().next().unwrap();
    assert_eq!(
        m.resolve_request(parent),
        Err(RequestError::ChildrenPending {
            request: parent,
            pending: 1
        })
    );

    m.report_resolved(child, None, vec![ItemStack::new("coal", 4)])
        .unwrap();

    assert_eq!(state(&m, child), RequestState::Completed);
    assert_eq!(state(&m, parent), RequestState::Completed);
    assert_eq!(
        m.request(parent).unwrap().deliveries(),
        &[ItemStack::new("oak_log", 16)]
    );
    assert!(log
        .entries()
        .contains(&format!("crafter:child_complete:{child}")));
    assert_eq!(m.drain_notices(requester.id).len(), 1);
    // Child outcomes go to the resolver, not the notice board.
    assert!(m.notices().peek(crafter).is_empty());
}

#[test]
fn children_served_immediately_let_the_parent_finish_in_one_call() {
    let mut m = manager(8);
    let crafter = m.mint_token();
    let stoker = m.mint_token();
    m.register_resolver(Box::new(
        ScriptedResolver::new("crafter", crafter, RequestKinds::ITEM, 10)
            .with_children(vec![fuel(), fuel()]),
    ))
    .unwrap();
    m.register_resolver(Box::new(
        ScriptedResolver::new("stoker", stoker, RequestKinds::BURNABLE, 10)
            .with_outcome(Outcome::Deliver(ItemStack::new("coal", 4))),
    ))
    .unwrap();

    let requester = citizen(&mut m);
    let parent = m.create_and_assign_request(requester, wood()).unwrap();
    assert_eq!(state(&m, parent), RequestState::Completed);
    let children: Vec<_> = m.request(parent).unwrap().children().iter().copied().collect();
    assert_eq!(children.len(), 2);
    for child in children {
        assert_eq!(state(&m, child), RequestState::Completed);
    }
    assert!(m.registry().assignments().values().all(BTreeSet::is_empty));
}

#[test]
fn followups_keep_the_request_open_until_they_settle() {
    let mut m = manager(9);
    let crafter = m.mint_token();
    let courier = m.mint_token();
    let drop_off = Requestable::Delivery(Delivery {
        stack: ItemStack::new("oak_log", 16),
        start: Location::new(5, 64, 5),
        target: Location::new(12, 64, -3),
        priority: 2,
    });
    m.register_resolver(Box::new(
        ScriptedResolver::new("crafter", crafter, RequestKinds::ITEM, 10)
            .with_followups(vec![drop_off]),
    ))
    .unwrap();
    m.register_resolver(Box::new(
        ScriptedResolver::new("courier", courier, RequestKinds::DELIVERY, 10)
            .with_outcome(Outcome::Wait),
    ))
    .unwrap();

    let requester = citizen(&mut m);
    let request = m.create_and_assign_request(requester, wood()).unwrap();
    assert_eq!(state(&m, request), RequestState::FollowupInProgress);
    let followup = *m.request(request).unwrap().children().iter().next().unwrap();
    assert_eq!(m.resolver_for_request(followup), Ok(courier));
    assert!(m.notices().is_empty());

    m.update_request_state(followup, RequestState::Resolved).unwrap();
    assert_eq!(state(&m, followup), RequestState::Completed);
    assert_eq!(state(&m, request), RequestState::Completed);
    assert_eq!(m.notices().peek(requester.id).len(), 1);
}

#[test]
fn failed_child_sends_the_parent_elsewhere() {
    let mut m = manager(10);
    let crafter = m.mint_token();
    let stoker = m.mint_token();
    m.register_resolver(Box::new(
        ScriptedResolver::new("crafter", crafter, RequestKinds::ITEM, 10)
            .with_children(vec![fuel()]),
    ))
    .unwrap();
    m.register_resolver(Box::new(
        ScriptedResolver::new("stoker", stoker, RequestKinds::BURNABLE, 10)
            .with_outcome(Outcome::Wait),
    ))
    .unwrap();

    let requester = citizen(&mut m);
    let parent = m.create_and_assign_request(requester, wood()).unwrap();
    let child = *m.request(parent).unwrap().children().iter().next().unwrap();

    m.update_request_state(child, RequestState::Failed).unwrap();

    // The crafter is excluded, so the retryable parent is parked.
    assert_eq!(m.resolver_for_request(parent), Ok(m.retrying_token()));
    assert!(m.request(child).is_err());
    assert!(m.request(parent).unwrap().children().is_empty());
    assert!(m.violations().is_empty());
}

#[test]
fn failing_resolution_fails_the_request() {
    let mut m = manager(11);
    let broken = m.mint_token();
    m.register_resolver(Box::new(
        ScriptedResolver::new("broken", broken, RequestKinds::ITEM, 10)
            .with_outcome(Outcome::Fail),
    ))
    .unwrap();
    let requester = citizen(&mut m);
    let request = m.create_and_assign_request(requester, wood()).unwrap();
    assert_eq!(state(&m, request), RequestState::Failed);
    assert_eq!(m.notices().peek(requester.id)[0].kind, NoticeKind::Failed);
}

// =============================================================================
// Retry Queue and Player
// =============================================================================

#[test]
fn unserved_request_escalates_to_the_player_after_retries() {
    let mut m = manager(12);
    let requester = citizen(&mut m);
    let request = m.create_and_assign_request(requester, wood()).unwrap();
    assert_eq!(m.resolver_for_request(request), Ok(m.retrying_token()));

    // Rounds run at ticks 20, 60 and 140; the fourth, at 300, escalates.
    for _ in 0..299 {
        m.tick();
    }
    assert_eq!(m.resolver_for_request(request), Ok(m.retrying_token()));
    assert_eq!(m.retrying().unwrap().attempts(request), Some(3));

    m.tick();
    assert_eq!(m.resolver_for_request(request), Ok(m.player_token()));
    assert!(m.retrying().unwrap().entries().is_empty());
    let shown: Vec<_> = m.player_requests().iter().map(|r| r.id()).collect();
    assert_eq!(shown, vec![request]);

    let handed_over = ItemStack::new("oak_log", 16);
    m.on_player_response(request, PlayerResponse::Fulfilled(handed_over.clone()))
        .unwrap();

    let settled = m.request(request).unwrap();
    assert_eq!(settled.state(), RequestState::Overruled);
    assert_eq!(settled.deliveries(), &[handed_over.clone()]);
    assert_eq!(
        settled.result(),
        Some(&Requestable::Stack(Stack::new(handed_over)))
    );
    assert!(m.player_requests().is_empty());
    assert_eq!(
        m.drain_notices(requester.id),
        vec![Notice {
            request,
            kind: NoticeKind::Overruled
        }]
    );
}

#[test]
fn player_can_cancel_a_request() {
    init_tracing();
    let mut config = ManagerConfig::with_seed(13);
    config.retry.max_attempts = 1;
    let mut m = RequestManager::new(config, Location::default()).unwrap();
    let requester = citizen(&mut m);
    let request = m
        .create_and_assign_request(
            requester,
            Requestable::Food(Food {
                count: 3,
                min_saturation: 5,
            }),
        )
        .unwrap();

    assert!(matches!(
        m.on_player_response(request, PlayerResponse::Cancelled),
        Err(RequestError::IllegalState { .. })
    ));

    for _ in 0..60 {
        m.tick();
    }
    assert_eq!(m.resolver_for_request(request), Ok(m.player_token()));
    m.on_player_response(request, PlayerResponse::Cancelled)
        .unwrap();
    assert_eq!(state(&m, request), RequestState::Cancelled);
    assert!(m.player_requests().is_empty());
}

#[test]
fn non_retryable_requests_go_straight_to_the_player() {
    let mut m = manager(14);
    let requester = citizen(&mut m);
    let pickup = Requestable::Pickup(requestable::Pickup {
        location: Location::new(3, 64, 3),
        priority: 1,
    });
    let request = m.create_and_assign_request(requester, pickup).unwrap();
    assert_eq!(m.resolver_for_request(request), Ok(m.player_token()));
}

#[test]
fn a_retry_round_finds_a_resolver_that_appeared_meanwhile() {
    let mut m = manager(15);
    let requester = citizen(&mut m);
    let request = m.create_and_assign_request(requester, wood()).unwrap();

    let mill = m.mint_token();
    m.register_resolver(Box::new(
        ScriptedResolver::new("mill", mill, RequestKinds::ITEM, 10).with_outcome(Outcome::Wait),
    ))
    .unwrap();
    for _ in 0..20 {
        m.tick();
    }
    assert_eq!(m.resolver_for_request(request), Ok(mill));
    assert!(m.retrying().unwrap().entries().is_empty());
}

#[test]
fn reassessment_leaves_retries_to_run_out() {
    let mut m = manager(31);
    let picky = m.mint_token();
    m.register_resolver(Box::new(
        ScriptedResolver::new("picky", picky, RequestKinds::ITEM, 10).declining(),
    ))
    .unwrap();
    let requester = citizen(&mut m);
    let request = m.create_and_assign_request(requester, wood()).unwrap();
    assert_eq!(m.resolver_for_request(request), Ok(m.retrying_token()));

    for _ in 0..2000 {
        m.tick();
    }
    assert_eq!(m.resolver_for_request(request), Ok(m.player_token()));
    assert_eq!(state(&m, request), RequestState::InProgress);
    let shown: Vec<_> = m.player_requests().iter().map(|r| r.id()).collect();
    assert_eq!(shown, vec![request]);
    assert!(m.retrying().unwrap().entries().is_empty());
}

#[test]
fn player_requests_stay_put_when_every_resolver_declines() {
    init_tracing();
    let mut config = ManagerConfig::with_seed(32);
    config.retry.max_attempts = 1;
    let mut m = RequestManager::new(config, Location::default()).unwrap();
    let requester = citizen(&mut m);
    let request = m.create_and_assign_request(requester, wood()).unwrap();
    for _ in 0..60 {
        m.tick();
    }
    assert_eq!(m.resolver_for_request(request), Ok(m.player_token()));

    let picky = m.mint_token();
    m.register_resolver(Box::new(
        ScriptedResolver::new("picky", picky, RequestKinds::ITEM, 10).declining(),
    ))
    .unwrap();
    assert_eq!(m.on_colony_update(|_| true), 0);
    assert_eq!(m.resolver_for_request(request), Ok(m.player_token()));
}

#[test]
fn failed_child_sends_the_parent_through_the_retry_queue() {
    init_tracing();
    let mut config = ManagerConfig::with_seed(33);
    config.reassess_interval_ticks = 0;
    let mut m = RequestManager::new(config, Location::default()).unwrap();
    let crafter = m.mint_token();
    let burner = m.mint_token();
    m.register_resolver(Box::new(
        ScriptedResolver::new("crafter", crafter, RequestKinds::ITEM, 10)
            .with_children(vec![fuel()]),
    ))
    .unwrap();
    m.register_resolver(Box::new(
        ScriptedResolver::new("burner", burner, RequestKinds::BURNABLE, 10)
            .with_outcome(Outcome::Fail),
    ))
    .unwrap();
    let requester = citizen(&mut m);
    let request = m.create_request(requester, wood());

    assert_eq!(m.assign_request(request), Ok(Some(m.retrying_token())));
    assert_eq!(m.resolver_for_request(request), Ok(m.retrying_token()));

    for _ in 0..299 {
        m.tick();
    }
    assert_eq!(m.resolver_for_request(request), Ok(m.retrying_token()));
    assert_eq!(m.retrying().unwrap().attempts(request), Some(3));

    m.tick();
    assert_eq!(m.resolver_for_request(request), Ok(m.player_token()));
    assert!(m.retrying().unwrap().entries().is_empty());
}

#[test]
fn requests_taken_back_from_the_player_do_not_restart_retries() {
    let mut m = manager(34);
    let crafter = m.mint_token();
    let burner = m.mint_token();
    m.register_resolver(Box::new(
        ScriptedResolver::new("crafter", crafter, RequestKinds::ITEM, 10)
            .with_children(vec![fuel()]),
    ))
    .unwrap();
    m.register_resolver(Box::new(
        ScriptedResolver::new("burner", burner, RequestKinds::BURNABLE, 10)
            .with_outcome(Outcome::Fail),
    ))
    .unwrap();
    let requester = citizen(&mut m);
    let request = m.create_and_assign_request(requester, wood()).unwrap();

    // Tick 300 escalates, then reassessment tries the crafter once more.
    for _ in 0..300 {
        m.tick();
    }
    assert_eq!(m.resolver_for_request(request), Ok(m.retrying_token()));
    assert_eq!(m.retrying().unwrap().attempts(request), Some(3));

    for _ in 0..20 {
        m.tick();
    }
    assert_eq!(m.resolver_for_request(request), Ok(m.player_token()));
}

#[test]
fn colony_update_moves_parked_requests() {
    let mut m = manager(16);
    let requester = citizen(&mut m);
    let parked = m.create_and_assign_request(requester, wood()).unwrap();
    let other = m.create_and_assign_request(requester, fuel()).unwrap();

    // Nothing can serve them yet.
    assert_eq!(m.on_colony_update(|_| true), 0);

    let mill = m.mint_token();
    m.register_resolver(Box::new(
        ScriptedResolver::new("mill", mill, RequestKinds::ITEM, 10).with_outcome(Outcome::Wait),
    ))
    .unwrap();
    assert_eq!(m.on_colony_update(|r| r.id() == parked), 1);
    assert_eq!(m.resolver_for_request(parked), Ok(mill));
    assert_eq!(m.resolver_for_request(other), Ok(m.retrying_token()));
    assert_eq!(
        m.retrying().unwrap().entries().keys().copied().collect::<Vec<_>>(),
        vec![other]
    );
}

// =============================================================================
// Resolvers, Providers, Requesters
// =============================================================================

#[test]
fn removing_a_resolver_reassigns_its_requests() {
    let mut m = manager(17);
    let old = m.mint_token();
    let spare = m.mint_token();
    m.register_resolver(Box::new(
        ScriptedResolver::new("old", old, RequestKinds::ITEM, 10).with_outcome(Outcome::Wait),
    ))
    .unwrap();
    m.register_resolver(Box::new(
        ScriptedResolver::new("spare", spare, RequestKinds::ITEM, 5).with_outcome(Outcome::Wait),
    ))
    .unwrap();
    let requester = citizen(&mut m);
    let first = m.create_and_assign_request(requester, wood()).unwrap();
    let second = m.create_and_assign_request(requester, wood()).unwrap();
    assert_eq!(m.registry().assigned_requests(old).unwrap().len(), 2);

    m.remove_resolver(old).unwrap();

    assert!(!m.registry().is_registered(old));
    assert_eq!(m.resolver_for_request(first), Ok(spare));
    assert_eq!(m.resolver_for_request(second), Ok(spare));
    assert!(m
        .registry()
        .assignments()
        .keys()
        .all(|resolver| *resolver != old));
}

#[test]
fn removing_the_last_resolver_cancels_its_requests() {
    init_tracing();
    let mut handler = RequestHandler::new(TokenFactory::new(18), AssigningStrategy::default());
    let only = handler.mint_token();
    handler
        .register_resolver(Box::new(
            ScriptedResolver::new("only", only, RequestKinds::ITEM, 0).with_outcome(Outcome::Wait),
        ))
        .unwrap();
    let requester = requestable::Requester::new(handler.mint_token(), Location::default());
    let first = handler.create_request(requester, wood());
    let second = handler.create_request(requester, wood());
    handler.assign_request(first, &BTreeSet::new()).unwrap();
    handler.assign_request(second, &BTreeSet::new()).unwrap();

    handler.remove_resolver(only).unwrap();

    for request in [first, second] {
        assert_eq!(
            handler.requests().get(request).unwrap().state(),
            RequestState::Cancelled
        );
        assert!(!handler.registry().is_assigned(request));
    }
    assert_eq!(handler.notices().peek(requester.id).len(), 2);
    assert!(handler.registry().is_empty());
}

#[test]
fn built_ins_cannot_be_removed() {
    let mut m = manager(19);
    let retrying = m.retrying_token();
    assert_eq!(
        m.remove_resolver(retrying),
        Err(RequestError::BuiltInResolver(retrying))
    );
    let player = m.player_token();
    assert_eq!(
        m.remove_resolver(player),
        Err(RequestError::BuiltInResolver(player))
    );
}

#[test]
fn providers_register_and_remove_their_resolvers() {
    let mut m = manager(20);
    let provider = m.mint_token();
    let mill = m.mint_token();
    let stoker = m.mint_token();
    let registered = m
        .on_provider_added(Box::new(TestProvider {
            token: provider,
            resolvers: vec![
                ScriptedResolver::new("mill", mill, RequestKinds::ITEM, 5)
                    .with_outcome(Outcome::Wait),
                ScriptedResolver::new("stoker", stoker, RequestKinds::BURNABLE, 5),
            ],
        }))
        .unwrap();
    assert_eq!(registered, vec![mill, stoker]);
    assert_eq!(m.provider_resolvers(provider).unwrap(), &[mill, stoker]);

    let requester = citizen(&mut m);
    let request = m.create_and_assign_request(requester, wood()).unwrap();
    assert_eq!(m.resolver_for_request(request), Ok(mill));

    m.on_provider_removed(provider).unwrap();
    assert!(!m.registry().is_registered(mill));
    assert!(!m.registry().is_registered(stoker));
    assert_eq!(m.resolver_for_request(request), Ok(m.retrying_token()));
    assert_eq!(
        m.on_provider_removed(provider),
        Err(RequestError::UnknownProvider(provider))
    );
}

#[test]
fn provider_registration_is_all_or_nothing() {
    let mut m = manager(21);
    let provider = m.mint_token();
    let good = m.mint_token();
    let bad = m.mint_token();
    let result = m.on_provider_added(Box::new(TestProvider {
        token: provider,
        resolvers: vec![
            ScriptedResolver::new("good", good, RequestKinds::ITEM, 5),
            ScriptedResolver::new("bad", bad, RequestKinds::ITEM, MIN_DYNAMIC_PRIORITY - 1),
        ],
    }));
    assert_eq!(
        result,
        Err(RequestError::ReservedPriority {
            resolver: bad,
            priority: MIN_DYNAMIC_PRIORITY - 1
        })
    );
    assert!(!m.registry().is_registered(good));
    assert_eq!(m.provider_tokens().count(), 0);
}

#[test]
fn departing_requester_takes_its_requests_along() {
    let mut m = manager(22);
    let leaving = citizen(&mut m);
    let staying = citizen(&mut m);
    m.create_and_assign_request(leaving, wood()).unwrap();
    m.create_and_assign_request(leaving, fuel()).unwrap();
    let kept = m.create_and_assign_request(staying, wood()).unwrap();

    assert_eq!(m.on_requester_removed(leaving.id), Ok(2));
    assert_eq!(m.requests().len(), 1);
    assert!(m.requests().contains(kept));
    assert!(m.notices().peek(leaving.id).is_empty());
    assert_eq!(
        m.retrying().unwrap().entries().keys().copied().collect::<Vec<_>>(),
        vec![kept]
    );
    assert_eq!(m.on_requester_removed(leaving.id), Ok(0));
}

// =============================================================================
// Cleanup and Reporting
// =============================================================================

#[test]
fn pending_resolution_finishes_on_report() {
    let mut m = manager(23);
    let mill = m.mint_token();
    m.register_resolver(Box::new(
        ScriptedResolver::new("mill", mill, RequestKinds::ITEM, 10).with_outcome(Outcome::Wait),
    ))
    .unwrap();
    let requester = citizen(&mut m);
    let request = m.create_and_assign_request(requester, wood()).unwrap();
    assert_eq!(state(&m, request), RequestState::InProgress);

    let logs = ItemStack::new("oak_log", 16);
    m.report_resolved(request, None, vec![logs.clone()]).unwrap();
    assert_eq!(state(&m, request), RequestState::Completed);
    assert_eq!(m.request(request).unwrap().deliveries(), &[logs]);

    m.update_request_state(request, RequestState::Received)
        .unwrap();
    assert_eq!(state(&m, request), RequestState::Received);
}

#[test]
fn cleaning_is_idempotent_and_refuses_active_requests() {
    let mut m = manager(24);
    let mill = m.mint_token();
    m.register_resolver(Box::new(
        ScriptedResolver::new("mill", mill, RequestKinds::ITEM, 10).with_outcome(Outcome::Wait),
    ))
    .unwrap();
    let requester = citizen(&mut m);
    let request = m.create_and_assign_request(requester, wood()).unwrap();

    assert!(matches!(
        m.clean_request_data(request),
        Err(RequestError::IllegalState { .. })
    ));
    m.cancel_request(request).unwrap();
    assert_eq!(m.clean_request_data(request), Ok(true));
    assert_eq!(m.clean_request_data(request), Ok(false));
    assert!(m.requests().is_empty());
    assert!(m.notices().is_empty());
}

#[test]
fn dirty_flag_tracks_changes() {
    let mut m = manager(25);
    assert!(!m.is_dirty());
    let requester = citizen(&mut m);
    m.create_request(requester, wood());
    assert!(m.is_dirty());
    m.mark_clean();
    assert!(!m.is_dirty());
}

/// Builds a valid resolver once, then one with a reserved priority.
struct FlakyProvider {
    token: requestable::Token,
    resolver: requestable::Token,
    builds: AtomicU32,
}

impl ResolverProvider for FlakyProvider {
    fn token(&self) -> requestable::Token {
        self.token
    }

    fn build_resolvers(&self) -> Vec<Box<dyn Resolver>> {
        let priority = if self.builds.fetch_add(1, Ordering::Relaxed) == 0 {
            5
        } else {
            MIN_DYNAMIC_PRIORITY - 1
        };
        vec![Box::new(
            ScriptedResolver::new("flaky", self.resolver, RequestKinds::FOOD, priority)
                .with_outcome(Outcome::Wait),
        )]
    }
}

#[test]
fn reset_keeps_providers_after_one_fails() {
    let mut m = manager(35);
    let flaky = m.mint_token();
    let flaky_resolver = m.mint_token();
    let steady = m.mint_token();
    let mill = m.mint_token();
    m.on_provider_added(Box::new(FlakyProvider {
        token: flaky,
        resolver: flaky_resolver,
        builds: AtomicU32::new(0),
    }))
    .unwrap();
    m.on_provider_added(Box::new(TestProvider {
        token: steady,
        resolvers: vec![
            ScriptedResolver::new("mill", mill, RequestKinds::ITEM, 5).with_outcome(Outcome::Wait),
        ],
    }))
    .unwrap();

    assert!(matches!(
        m.reset(),
        Err(RequestError::ReservedPriority { resolver, .. }) if resolver == flaky_resolver
    ));
    assert!(m.registry().is_registered(mill));
    assert_eq!(m.provider_resolvers(steady).unwrap(), &[mill]);
    assert!(!m.registry().is_registered(flaky_resolver));
    assert!(m.provider_resolvers(flaky).is_err());
}

#[test]
fn reset_discards_requests_and_keeps_providers() {
    let mut m = manager(26);
    let provider = m.mint_token();
    let mill = m.mint_token();
    m.on_provider_added(Box::new(TestProvider {
        token: provider,
        resolvers: vec![
            ScriptedResolver::new("mill", mill, RequestKinds::ITEM, 5).with_outcome(Outcome::Wait),
        ],
    }))
    .unwrap();
    let requester = citizen(&mut m);
    m.create_and_assign_request(requester, wood()).unwrap();

    m.reset().unwrap();
    assert!(m.requests().is_empty());
    assert!(m.registry().is_registered(mill));
    assert!(m.registry().is_registered(m.retrying_token()));
    assert!(m.registry().is_registered(m.player_token()));
    assert_eq!(m.provider_resolvers(provider).unwrap(), &[mill]);
}
