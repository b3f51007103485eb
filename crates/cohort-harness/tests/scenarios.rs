//! End-to-end scenarios on the simulated network
//!
//! Whole links talking to whole links through the in-memory driver, with a
//! shared virtual clock driving heartbeats deterministically.

use cohort_core::testing::{ListenerEvent, TestStateProvider};
use cohort_core::{StateId, DEFAULT_ATTEMPTS, DEFAULT_INTERVAL, DEFAULT_PORT};
use cohort_harness::{settle, tick, SimNet};

fn url_of(name: &str) -> String {
    format!("tcp://{name}:{DEFAULT_PORT}/")
}

// ----------------------------------------------------------------------------
// Scenario: Two-Node Claim
// ----------------------------------------------------------------------------

#[test]
fn two_node_claim_hands_over_the_active_role() {
    let net = SimNet::new();
    let mut a = net.node("a");
    let mut b = net.node("b");

    let provider_b = TestStateProvider::new();
    b.link
        .register_state(StateId::new(1), Box::new(provider_b.clone()));

    a.link.set_enabled(true);
    b.link.join(&url_of("a")).unwrap();
    settle(&mut [&mut a, &mut b]);

    // After the handshake both sides know each other and agree that the
    // first node is active.
    assert_eq!(a.link.number_of_peers(), 1);
    assert_eq!(b.link.number_of_peers(), 1);
    assert_eq!(a.link.get_active(), Some(("a".into(), DEFAULT_PORT)));
    assert_eq!(b.link.get_active(), Some(("a".into(), DEFAULT_PORT)));
    b.listener.take_events();

    // The second node requests the role; the decision is deferred.
    assert!(!b.link.claim());
    settle(&mut [&mut a, &mut b]);

    assert!(b.link.is_self_active());
    assert!(!a.link.is_self_active());
    assert_eq!(a.link.get_active(), Some(("b".into(), DEFAULT_PORT)));
    assert_eq!(b.link.get_active(), Some(("b".into(), DEFAULT_PORT)));

    // The old active node pushed its state at hand-over, flagged so the
    // claimer knows it is about to own it.
    let events = b.listener.take_events();
    assert!(events.contains(&ListenerEvent::StateTransferComplete));
    assert!(events.contains(&ListenerEvent::ActiveChanged(true)));
}

// ----------------------------------------------------------------------------
// Scenario: Three-Node Gossip
// ----------------------------------------------------------------------------

#[test]
fn three_nodes_converge_through_gossip() {
    let net = SimNet::new();
    let mut a = net.node("a");
    let mut b = net.node("b");
    let mut c = net.node("c");

    a.link.set_enabled(true);
    b.link.set_enabled(true);
    c.link.set_enabled(true);

    b.link.join(&url_of("a")).unwrap();
    settle(&mut [&mut a, &mut b, &mut c]);
    c.link.join(&url_of("a")).unwrap();
    settle(&mut [&mut a, &mut b, &mut c]);

    // The third node learned of the second through the first's gossip and
    // connected to it directly, and vice versa.
    assert_eq!(a.link.number_of_peers(), 2);
    assert_eq!(b.link.number_of_peers(), 2);
    assert_eq!(c.link.number_of_peers(), 2);

    // Everyone agrees on the active node.
    for node in [&a, &b, &c] {
        assert_eq!(node.link.get_active(), Some(("a".into(), DEFAULT_PORT)));
    }
}

// ----------------------------------------------------------------------------
// Scenario: Duplicate Rejection
// ----------------------------------------------------------------------------

#[test]
fn second_peer_with_the_same_identity_is_rejected() {
    let net = SimNet::new();
    let mut x = net.node("x");
    let mut first = net.node("dup.lan");
    let mut second = net.node("dup.lan");

    x.link.set_enabled(true);
    first.link.join(&url_of("x")).unwrap();
    settle(&mut [&mut x, &mut first, &mut second]);
    assert_eq!(x.link.number_of_peers(), 1);

    second.link.join(&url_of("x")).unwrap();
    settle(&mut [&mut x, &mut first, &mut second]);

    // The imposter got DUPLICATE and dropped its socket; the first peer
    // is untouched.
    assert_eq!(x.link.number_of_peers(), 1);
    assert_eq!(first.link.number_of_peers(), 1);
    assert_eq!(second.link.number_of_peers(), 0);
}

// ----------------------------------------------------------------------------
// Scenario: Reconnect
// ----------------------------------------------------------------------------

#[test]
fn reconnects_are_attempted_until_the_budget_runs_out() {
    let net = SimNet::new();
    let clock = net.clock();
    let mut a = net.node("a");
    let mut b = net.node("b");

    b.link.set_enabled(true);
    a.link.join(&url_of("b")).unwrap();
    settle(&mut [&mut a, &mut b]);
    assert_eq!(a.link.number_of_peers(), 1);
    assert_eq!(net.attempts_to("b", DEFAULT_PORT), 1);

    net.kill("b");
    settle(&mut [&mut a]);
    assert_eq!(a.link.number_of_peers(), 0);

    // Each interval brings one more attempt, up to the configured budget.
    for _ in 0..(DEFAULT_ATTEMPTS as u64 * 3) {
        clock.advance(DEFAULT_INTERVAL);
        a.link.heartbeat();
        settle(&mut [&mut a]);
    }
    assert_eq!(
        net.attempts_to("b", DEFAULT_PORT),
        1 + DEFAULT_ATTEMPTS as usize
    );
}

#[test]
fn reconnect_all_revives_an_exhausted_peer_after_restart() {
    let net = SimNet::new();
    let clock = net.clock();
    let mut a = net.node("a");
    let mut b = net.node("b");

    b.link.set_enabled(true);
    a.link.join(&url_of("b")).unwrap();
    settle(&mut [&mut a, &mut b]);

    net.kill("b");
    settle(&mut [&mut a]);
    for _ in 0..(DEFAULT_ATTEMPTS as u64 * 2) {
        clock.advance(DEFAULT_INTERVAL);
        a.link.heartbeat();
        settle(&mut [&mut a]);
    }
    assert_eq!(a.link.number_of_peers(), 0);

    // The peer comes back under the same name; a manual reconnect brings
    // the link up again.
    let mut b2 = net.node("b");
    b2.link.set_enabled(true);
    assert!(a.link.reconnect_all());
    tick(&mut [&mut a, &mut b2]);

    assert_eq!(a.link.number_of_peers(), 1);
    assert_eq!(b2.link.number_of_peers(), 1);
}

// ----------------------------------------------------------------------------
// Scenario: State Propagation
// ----------------------------------------------------------------------------

#[test]
fn active_node_state_reaches_peers_on_the_broadcast_boundary() {
    let net = SimNet::new();
    let mut a = net.node("a");
    let mut b = net.node("b");

    let provider_a = TestStateProvider::with_value(vec![0x01, 0x02, 0x03]);
    a.link
        .register_state(StateId::new(42), Box::new(provider_a));
    let provider_b = TestStateProvider::new();
    b.link
        .register_state(StateId::new(42), Box::new(provider_b.clone()));

    a.link.set_enabled(true);
    b.link.join(&url_of("a")).unwrap();
    settle(&mut [&mut a, &mut b]);
    b.listener.take_events();

    for _ in 0..59 {
        tick(&mut [&mut a, &mut b]);
    }
    assert!(provider_b.take_received().is_empty());

    tick(&mut [&mut a, &mut b]);

    assert_eq!(
        provider_b.take_received(),
        vec![(StateId::new(42), false, vec![0x01, 0x02, 0x03])]
    );
    assert_eq!(
        b.listener
            .take_events()
            .iter()
            .filter(|e| **e == ListenerEvent::StateTransferComplete)
            .count(),
        1
    );
}

// ----------------------------------------------------------------------------
// Scenario: Credentials
// ----------------------------------------------------------------------------

#[test]
fn wrong_password_is_dropped_silently_and_retried() {
    let net = SimNet::new();
    let clock = net.clock();
    let mut a = net.node("a");
    let mut b = net.node("b");

    a.link.set_user("user", "right");
    b.link.set_user("user", "wrong");

    a.link.set_enabled(true);
    b.link.join(&url_of("a")).unwrap();
    settle(&mut [&mut a, &mut b]);

    // No reply, no peer on either side.
    assert_eq!(a.link.number_of_peers(), 0);
    assert_eq!(b.link.number_of_peers(), 0);

    // The rejected node saw the close and scheduled a retry.
    let before = net.attempts_to("a", DEFAULT_PORT);
    clock.advance(DEFAULT_INTERVAL);
    b.link.heartbeat();
    settle(&mut [&mut a, &mut b]);
    assert!(net.attempts_to("a", DEFAULT_PORT) > before);
}

// ----------------------------------------------------------------------------
// Scenario: Split-Brain Healing
// ----------------------------------------------------------------------------

#[test]
fn two_active_nodes_converge_after_reconnecting() {
    let net = SimNet::new();
    let mut a = net.node("a");
    let mut b = net.node("b");

    a.link.set_enabled(true);
    b.link.set_enabled(true);
    b.link.join(&url_of("a")).unwrap();
    settle(&mut [&mut a, &mut b]);

    // Partition both sides; each ends up considering itself active.
    a.link.disconnect_all();
    b.link.disconnect_all();
    settle(&mut [&mut a, &mut b]);
    assert!(a.link.is_self_active());
    assert!(b.link.is_self_active());

    // One side re-establishes the link; the next gossip exchange leaves
    // exactly one active node that both agree on.
    b.link.reconnect_all();
    tick(&mut [&mut a, &mut b]);

    assert_eq!(
        [a.link.is_self_active(), b.link.is_self_active()]
            .iter()
            .filter(|active| **active)
            .count(),
        1
    );
    assert_eq!(a.link.get_active(), b.link.get_active());
}
