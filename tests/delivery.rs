//! Tests for delivery creation, settlement, peer-linking and deferred free.

use std::sync::{Arc, Mutex};

use amqp_container::{
    ContainerError,
    Delivery,
    DistMode,
    Disposition,
    LifePolicy,
    Link,
    transport::{Role, TransportDelivery},
};
use container_testing::{Harness, RecordingNodeType, harness};
use proptest::prelude::*;
use rstest::rstest;

fn with_queue(harness: &Harness) -> Arc<RecordingNodeType> {
    let recorder = RecordingNodeType::new("anycast");
    let node_type = recorder.as_node_type();
    harness
        .container
        .register_node_type(Arc::clone(&node_type))
        .expect("type name is unique");
    harness
        .container
        .create_node(&node_type, Some("queue1"), None, DistMode::Move, LifePolicy::Permanent)
        .expect("node name is unique");
    harness.open();
    recorder
}

fn sender(harness: &Harness, name: &str) -> Arc<Link> {
    let session = harness.begin();
    harness.attach(&session, Role::Sender, name, Some("queue1"));
    harness
        .connection
        .links()
        .into_iter()
        .find(|link| link.transport().name() == name)
        .expect("attached link has a wrapper")
}

#[rstest]
fn deferred_free_completes_on_last_exit(harness: Harness) {
    let recorder = with_queue(&harness);
    let captured: Arc<Mutex<Option<Arc<Delivery>>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&captured);
    recorder.on_rx_run(move |node, _link, delivery| {
        let container = node.container().expect("container is alive");
        let mut guard = container.lock();
        guard.fifo_enter(delivery);
        guard.free(delivery, Disposition::ACCEPTED);
        assert!(guard.is_live(delivery), "free must defer while enqueued");
        *slot.lock().expect("slot poisoned") = Some(Arc::clone(delivery));
    });
    let session = harness.begin();
    let link = harness.attach(&session, Role::Receiver, "in", Some("queue1"));
    let transfer = harness.peer.remote_transfer(&link, b"t1");
    harness.process();

    let delivery = captured
        .lock()
        .expect("slot poisoned")
        .take()
        .expect("rx hook ran");
    assert!(transfer.is_settled());
    assert_eq!(transfer.local_disposition(), Disposition::ACCEPTED);
    assert_eq!(harness.connection.delivery_count(), 0);

    let mut guard = harness.container.lock();
    assert_eq!(guard.in_flight(&delivery), 1);
    assert!(guard.fifo_exit(&delivery));
    assert!(!guard.is_live(&delivery));
}

#[rstest]
fn free_without_queues_is_immediate(harness: Harness) {
    with_queue(&harness);
    let link = sender(&harness, "out");
    let delivery = link.deliver(b"d1").expect("link is open");
    let transport = delivery.transport().expect("not yet settled");

    let mut guard = harness.container.lock();
    guard.free(&delivery, Disposition::NONE);
    assert!(!guard.is_live(&delivery));
    drop(guard);

    let memory = harness
        .peer
        .delivery_by_key(transport.key())
        .expect("engine tracks delivery");
    assert!(memory.is_settled());
    assert_eq!(memory.local_disposition(), Disposition::NONE);
}

#[rstest]
fn exit_without_pending_free_keeps_delivery(harness: Harness) {
    with_queue(&harness);
    let link = sender(&harness, "out");
    let delivery = link.deliver(b"d1").expect("link is open");

    let mut guard = harness.container.lock();
    guard.fifo_enter(&delivery);
    guard.fifo_enter(&delivery);
    assert!(!guard.fifo_exit(&delivery));
    assert!(!guard.fifo_exit(&delivery));
    assert!(guard.is_live(&delivery));
    assert_eq!(guard.in_flight(&delivery), 0);
}

#[rstest]
fn peers_are_symmetric(harness: Harness) {
    with_queue(&harness);
    let a = sender(&harness, "a").deliver(b"a").expect("link is open");
    let b = sender(&harness, "b").deliver(b"b").expect("link is open");

    let mut guard = harness.container.lock();
    guard.link_peers(&a, &b);
    assert_eq!(guard.peer(&a).map(|d| d.id()), Some(b.id()));
    assert_eq!(guard.peer(&b).map(|d| d.id()), Some(a.id()));

    guard.unlink(&b);
    assert!(guard.peer(&a).is_none());
    assert!(guard.peer(&b).is_none());

    guard.free(&a, Disposition::ACCEPTED);
    guard.free(&b, Disposition::RELEASED);
    assert!(!guard.is_live(&a));
    assert!(!guard.is_live(&b));
}

#[rstest]
fn routing_hop_is_created_and_peered_under_one_guard(harness: Harness) {
    let recorder = with_queue(&harness);
    let outbound = sender(&harness, "out");
    let routed: Arc<Mutex<Option<(Arc<Delivery>, Arc<Delivery>)>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&routed);
    let hop_link = Arc::clone(&outbound);
    recorder.on_rx_run(move |node, _link, inbound| {
        let container = node.container().expect("container is alive");
        let mut guard = container.lock();
        let hop = guard.deliver(&hop_link, b"hop").expect("link is open");
        guard.link_peers(inbound, &hop);
        *slot.lock().expect("slot poisoned") = Some((Arc::clone(inbound), hop));
    });
    let session = harness.begin();
    let link = harness.attach(&session, Role::Receiver, "in", Some("queue1"));
    harness.peer.remote_transfer(&link, b"t1");
    harness.process();

    let (inbound, hop) = routed
        .lock()
        .expect("slot poisoned")
        .take()
        .expect("rx hook ran");
    assert!(Arc::ptr_eq(hop.link(), &outbound));
    assert_eq!(harness.connection.delivery_count(), 2);
    let mut guard = harness.container.lock();
    assert_eq!(guard.peer(&inbound).map(|d| d.id()), Some(hop.id()));
    assert_eq!(guard.peer(&hop).map(|d| d.id()), Some(inbound.id()));
}

#[rstest]
#[should_panic(expected = "freed while linked to a peer")]
fn freeing_a_peered_delivery_panics(harness: Harness) {
    with_queue(&harness);
    let a = sender(&harness, "a").deliver(b"a").expect("link is open");
    let b = sender(&harness, "b").deliver(b"b").expect("link is open");
    let mut guard = harness.container.lock();
    guard.link_peers(&a, &b);
    guard.free(&a, Disposition::NONE);
}

#[rstest]
#[should_panic(expected = "already has a current outbound delivery")]
fn second_current_delivery_panics(harness: Harness) {
    with_queue(&harness);
    let link = sender(&harness, "out");
    let _first = link.deliver(b"1").expect("link is open");
    let _second = link.deliver(b"2");
}

#[rstest]
fn settling_allows_next_delivery(harness: Harness) {
    with_queue(&harness);
    let link = sender(&harness, "out");
    let first = link.deliver(b"1").expect("link is open");
    first.settle();
    first.settle();
    assert!(first.transport().is_none());
    assert!(first.remote_settled());
    let second = link.deliver(b"2").expect("current was cleared");
    assert_ne!(first.id(), second.id());
    assert_eq!(harness.connection.delivery_count(), 1);
}

#[rstest]
fn disposition_tracks_remote_state(harness: Harness) {
    with_queue(&harness);
    let link = sender(&harness, "out");
    let delivery = link.deliver(b"1").expect("link is open");
    let key = delivery.transport().expect("not yet settled").key();
    let memory = harness
        .peer
        .delivery_by_key(key)
        .expect("engine tracks delivery");

    assert!(!delivery.disposition_changed());
    harness
        .peer
        .remote_disposition(&memory, Disposition::ACCEPTED, true);
    assert!(delivery.disposition_changed());
    assert_eq!(delivery.disposition(), Disposition::ACCEPTED);
    assert!(!delivery.disposition_changed());
    assert!(delivery.remote_settled());

    delivery.settle();
    assert_eq!(delivery.disposition(), Disposition::ACCEPTED);
}

#[rstest]
fn deliver_reports_missing_owners(harness: Harness) {
    with_queue(&harness);
    let link = sender(&harness, "out");
    let Harness {
        container,
        connection,
        peer,
        ..
    } = harness;

    link.transport().close();
    assert_eq!(
        link.deliver(b"x").expect_err("closed link"),
        ContainerError::DeliveryUnavailable
    );

    drop(connection);
    assert_eq!(
        link.deliver(b"x").expect_err("connection is gone"),
        ContainerError::ConnectionClosed
    );

    drop(container);
    assert_eq!(
        link.deliver(b"x").expect_err("container is gone"),
        ContainerError::ContainerDropped
    );
    drop(peer);
}

#[rstest]
fn connection_teardown_detaches_deliveries(harness: Harness) {
    with_queue(&harness);
    let link = sender(&harness, "out");
    let delivery = link.deliver(b"1").expect("link is open");
    harness.close();

    assert!(delivery.transport().is_none());
    assert_eq!(harness.connection.delivery_count(), 0);
    let mut guard = harness.container.lock();
    assert!(guard.is_live(&delivery));
    guard.free(&delivery, Disposition::RELEASED);
    assert!(!guard.is_live(&delivery));
}

proptest! {
    #[test]
    fn fifo_accounting_is_balanced(
        depth in 1usize..8,
        free_at in proptest::option::of(0usize..8),
    ) {
        let harness = Harness::default();
        with_queue(&harness);
        let link = sender(&harness, "out");
        let delivery = link.deliver(b"p").expect("link is open");
        let free_at = free_at.map(|at| at % depth);

        let mut guard = harness.container.lock();
        for _ in 0..depth {
            guard.fifo_enter(&delivery);
        }
        for exit in 0..depth {
            if free_at == Some(exit) {
                guard.free(&delivery, Disposition::NONE);
                prop_assert!(guard.is_live(&delivery));
            }
            let freed = guard.fifo_exit(&delivery);
            prop_assert_eq!(freed, free_at.is_some() && exit + 1 == depth);
        }
        prop_assert_eq!(guard.is_live(&delivery), free_at.is_none());
    }
}
