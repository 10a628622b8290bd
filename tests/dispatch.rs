//! Tests for connection event dispatch against the in-memory engine.

use std::sync::{Arc, Mutex};

use amqp_container::{
    Connection,
    ConnectionEvent,
    Container,
    ContainerConfig,
    DistMode,
    Disposition,
    LifePolicy,
    NodeType,
    transport::{
        Phase,
        Role,
        TransportConnection,
        TransportDelivery,
        TransportLink,
        TransportSession,
    },
};
use container_testing::{Call, Harness, RecordingNodeType, harness};
use rstest::rstest;

fn register(harness: &Harness, name: &str) -> Arc<RecordingNodeType> {
    let recorder = RecordingNodeType::new(name);
    harness
        .container
        .register_node_type(recorder.as_node_type())
        .expect("type name is unique");
    recorder
}

fn named_node(harness: &Harness, recorder: &Arc<RecordingNodeType>, name: &str) {
    harness
        .container
        .create_node(
            &recorder.as_node_type(),
            Some(name),
            None,
            DistMode::Move,
            LifePolicy::Permanent,
        )
        .expect("node name is unique");
}

#[rstest]
fn attach_without_any_node_closes_link(harness: Harness) {
    harness.open();
    let session = harness.begin();
    let link = harness.attach(&session, Role::Sender, "out", Some("queue1"));

    assert_eq!(link.state().local, Phase::Closed);
    assert_eq!(harness.connection.link_count(), 0);
}

#[rstest]
fn attach_without_matching_node_invokes_no_hook(harness: Harness) {
    let recorder = register(&harness, "anycast");
    harness.open();
    let session = harness.begin();
    let link = harness.attach(&session, Role::Receiver, "in", Some("queue1"));

    assert_eq!(link.state().local, Phase::Closed);
    assert_eq!(recorder.calls(), vec![Call::InboundOpen(harness.connection.id())]);
}

#[rstest]
fn sender_attach_resolves_remote_source(harness: Harness) {
    let recorder = register(&harness, "anycast");
    named_node(&harness, &recorder, "queue1");
    harness.open();
    let session = harness.begin();
    harness.attach(&session, Role::Sender, "out", Some("queue1"));

    assert!(recorder.calls().contains(&Call::Outgoing {
        link: "out".into(),
        node: Some("queue1".into()),
    }));
    let links = harness.connection.links();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].node().name(), Some("queue1"));
}

#[rstest]
fn receiver_attach_resolves_remote_target(harness: Harness) {
    let recorder = register(&harness, "anycast");
    named_node(&harness, &recorder, "queue1");
    harness.open();
    let session = harness.begin();
    harness.attach(&session, Role::Receiver, "in", Some("amqp://router/queue1/eu"));

    assert_eq!(
        recorder.count(
            |call| matches!(call, Call::Incoming { node: Some(n), .. } if n == "queue1")
        ),
        1
    );
}

#[rstest]
fn unknown_address_falls_back_to_default_node(harness: Harness) {
    let recorder = register(&harness, "anycast");
    named_node(&harness, &recorder, "queue1");
    let default = harness
        .container
        .set_default_node(Some(&recorder.as_node_type()), None, DistMode::Move)
        .expect("default is installed");
    harness.open();
    let session = harness.begin();
    harness.attach(&session, Role::Sender, "out", Some("unknown"));

    assert!(recorder.calls().contains(&Call::Outgoing {
        link: "out".into(),
        node: None,
    }));
    let links = harness.connection.links();
    assert!(Arc::ptr_eq(links[0].node(), &default));
}

#[rstest]
fn attach_caches_drain_flag(harness: Harness) {
    let recorder = register(&harness, "anycast");
    named_node(&harness, &recorder, "queue1");
    harness.open();
    let session = harness.begin();
    let link = harness
        .peer
        .remote_attach(&session, Role::Sender, "out", Some("queue1"), None);
    harness.peer.set_remote_drain(&link, true);
    harness.process();

    let wrapper = harness
        .connection
        .links()
        .pop()
        .expect("link wrapper exists");
    let change = wrapper.drain_changed();
    assert!(!change.changed);
    assert!(change.drain);
}

#[rstest]
fn peer_detach_reports_clean_close(harness: Harness) {
    let recorder = register(&harness, "anycast");
    named_node(&harness, &recorder, "queue1");
    harness.open();
    let session = harness.begin();
    let link = harness.attach(&session, Role::Sender, "out", Some("queue1"));

    harness.peer.remote_detach(&link);
    harness.process();

    assert_eq!(
        recorder.count(|call| *call == Call::Detach { link: "out".into(), closed: true }),
        1
    );
    assert_eq!(link.state().local, Phase::Closed);
    assert_eq!(harness.connection.link_count(), 0);
}

#[rstest]
fn close_orphans_every_active_link_once(harness: Harness) {
    let recorder = register(&harness, "anycast");
    named_node(&harness, &recorder, "queue1");
    harness.open();
    let session = harness.begin();
    let first = harness.attach(&session, Role::Sender, "out", Some("queue1"));
    let second = harness.attach(&session, Role::Receiver, "in", Some("queue1"));
    assert_eq!(harness.connection.link_count(), 2);

    harness.close();

    for name in ["out", "in"] {
        assert_eq!(
            recorder.count(|call| *call == Call::Detach { link: name.into(), closed: false }),
            1
        );
    }
    assert_eq!(recorder.count(|call| matches!(call, Call::Detach { closed: true, .. })), 0);
    assert_eq!(harness.connection.link_count(), 0);
    assert_eq!(first.state().local, Phase::Closed);
    assert_eq!(second.state().local, Phase::Closed);
    assert!(
        harness
            .peer
            .sessions()
            .iter()
            .all(|s| s.state().local == Phase::Closed)
    );
    assert_eq!(harness.peer.state().local, Phase::Closed);
}

#[rstest]
fn close_releases_links_that_never_opened(harness: Harness) {
    let recorder = register(&harness, "anycast");
    recorder.set_open_on_attach(false);
    named_node(&harness, &recorder, "queue1");
    harness.open();
    let session = harness.begin();
    harness.attach(&session, Role::Sender, "out", Some("queue1"));
    assert_eq!(harness.connection.link_count(), 1);

    harness.close();

    assert_eq!(recorder.count(|call| matches!(call, Call::Detach { .. })), 0);
    assert_eq!(harness.connection.link_count(), 0);
}

#[rstest]
fn writable_runs_once_per_active_link(harness: Harness) {
    let recorder = register(&harness, "anycast");
    recorder.set_writable_work(3);
    named_node(&harness, &recorder, "queue1");
    harness.open();
    let session = harness.begin();
    harness.attach(&session, Role::Sender, "a", Some("queue1"));
    harness.attach(&session, Role::Sender, "b", Some("queue1"));

    let before = recorder.count(|call| matches!(call, Call::Writable { .. }));
    assert_eq!(harness.process(), 6);
    let after = recorder.count(|call| matches!(call, Call::Writable { .. }));
    assert_eq!(after - before, 2);
}

#[rstest]
fn process_counts_consumed_events(harness: Harness) {
    harness.container.handle(&harness.connection, ConnectionEvent::ListenerOpen);
    harness.peer.remote_open();
    harness.peer.remote_begin();
    harness.peer.remote_begin();
    assert_eq!(harness.process(), 3);
    assert_eq!(harness.peer.pending_events(), 0);
}

#[rstest]
fn writable_skips_links_not_locally_open(harness: Harness) {
    let recorder = register(&harness, "anycast");
    recorder.set_open_on_attach(false);
    named_node(&harness, &recorder, "queue1");
    harness.open();
    let session = harness.begin();
    harness.attach(&session, Role::Sender, "out", Some("queue1"));
    harness.process();

    assert_eq!(recorder.count(|call| matches!(call, Call::Writable { .. })), 0);
}

#[rstest]
fn writable_waits_for_connection_to_be_fully_active(harness: Harness) {
    let recorder = register(&harness, "anycast");
    named_node(&harness, &recorder, "queue1");
    harness.container.handle(&harness.connection, ConnectionEvent::ListenerOpen);
    let session = harness.peer.remote_begin();
    harness
        .peer
        .remote_attach(&session, Role::Sender, "out", Some("queue1"), None);
    harness.process();
    assert_eq!(recorder.count(|call| matches!(call, Call::Writable { .. })), 0);

    harness.peer.remote_open();
    harness.process();
    assert_eq!(recorder.count(|call| matches!(call, Call::Writable { .. })), 1);
}

#[rstest]
fn sessions_get_the_configured_window() {
    let config = ContainerConfig::default().with_session_window(4096);
    let harness = Harness::new(Container::new(config), 9);
    harness.open();
    let session = harness.begin();
    assert_eq!(session.incoming_capacity(), 4096);
    assert_eq!(session.state().local, Phase::Active);
}

#[rstest]
fn default_session_window_applies(harness: Harness) {
    harness.open();
    let session = harness.begin();
    assert_eq!(session.incoming_capacity(), 1_000_000);
}

#[rstest]
fn peer_end_and_close_are_answered(harness: Harness) {
    harness.open();
    let session = harness.begin();
    harness.peer.remote_end(&session);
    harness.peer.remote_close();
    harness.process();
    assert_eq!(session.state().local, Phase::Closed);
    assert_eq!(harness.connection.transport().state().local, Phase::Closed);
}

#[rstest]
fn unroutable_transfer_is_rejected() {
    let config = ContainerConfig::default().with_reject_credit(2);
    let harness = Harness::new(Container::new(config), 2);
    harness.open();
    let session = harness.begin();
    let link = harness.attach(&session, Role::Receiver, "in", Some("nowhere"));

    let transfer = harness.peer.remote_transfer(&link, b"t1");
    harness.process();

    assert_eq!(transfer.local_disposition(), Disposition::REJECTED);
    assert!(transfer.is_settled());
    assert_eq!(link.credit(), 2);
    assert!(link.current().is_none());
    assert_eq!(harness.connection.delivery_count(), 0);
}

#[rstest]
fn transfer_reaches_node_and_reuses_wrapper(harness: Harness) {
    let recorder = register(&harness, "anycast");
    named_node(&harness, &recorder, "queue1");
    harness.open();
    let session = harness.begin();
    let link = harness.attach(&session, Role::Receiver, "in", Some("queue1"));

    let transfer = harness.peer.remote_transfer(&link, b"t1");
    harness.process();
    harness
        .peer
        .remote_disposition(&transfer, Disposition::ACCEPTED, false);
    harness.process();

    let rx: Vec<_> = recorder
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::Rx { delivery, .. } => Some(delivery),
            _ => None,
        })
        .collect();
    assert_eq!(rx.len(), 2);
    assert_eq!(rx[0], rx[1]);
    assert_eq!(harness.connection.delivery_count(), 1);
    assert!(recorder.calls().contains(&Call::Disposition {
        link: "in".into(),
        delivery: rx[0],
    }));
    assert!(!transfer.updated());
}

#[rstest]
fn update_without_wrapper_is_cleared_silently(harness: Harness) {
    let recorder = register(&harness, "anycast");
    named_node(&harness, &recorder, "queue1");
    harness.open();
    let session = harness.begin();
    let link = harness.attach(&session, Role::Sender, "out", Some("queue1"));
    let outbound = link.delivery(b"x").expect("link is open");
    let transfer = harness
        .peer
        .delivery_by_key(outbound.key())
        .expect("engine tracks delivery");

    harness
        .peer
        .remote_disposition(&transfer, Disposition::RELEASED, true);
    harness.process();

    assert_eq!(recorder.count(|call| matches!(call, Call::Disposition { .. })), 0);
    assert!(!transfer.updated());
}

struct Announcer {
    name: &'static str,
    seen: Arc<Mutex<Vec<String>>>,
}

impl NodeType for Announcer {
    fn type_name(&self) -> &str { self.name }

    fn on_inbound_connection_open(&self, _connection: &Connection) {
        self.seen
            .lock()
            .expect("log poisoned")
            .push(format!("in:{}", self.name));
    }

    fn on_outbound_connection_open(&self, _connection: &Connection) {
        self.seen
            .lock()
            .expect("log poisoned")
            .push(format!("out:{}", self.name));
    }
}

#[rstest]
#[case(ConnectionEvent::ListenerOpen, "in")]
#[case(ConnectionEvent::ConnectorOpen, "out")]
fn open_announces_in_registration_order(
    harness: Harness,
    #[case] event: ConnectionEvent,
    #[case] prefix: &str,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for name in ["router", "anycast", "multicast"] {
        harness
            .container
            .register_node_type(Arc::new(Announcer {
                name,
                seen: Arc::clone(&seen),
            }))
            .expect("type names are unique");
    }

    assert_eq!(harness.container.handle(&harness.connection, event), 0);

    let expected: Vec<String> = ["router", "anycast", "multicast"]
        .iter()
        .map(|name| format!("{prefix}:{name}"))
        .collect();
    assert_eq!(*seen.lock().expect("log poisoned"), expected);
    assert_eq!(harness.peer.state().local, Phase::Active);
}
