use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};

use assert_matches::assert_matches;
use parley_core::{
    config::{Config, load_config_from_str},
    event::{
        BroadcastEventBus, BuddyKind, ConnectionStatus, Event, EventBus, EventPayload,
        EventSubscription,
    },
};
use parley_session::{Collaborators, SessionError, SessionHandle, SessionManager};
use parley_test_support::fixtures;
use parley_xmpp::{ConnectionError, Stanza, TransportConfig, XmppTransport, ns};
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc},
    time,
};
use tokio_test::assert_ok;

const BOUND_JID: &str = "alice@example.com/parley";

#[derive(Default)]
struct TestTransportState {
    connect_outcomes: VecDeque<Result<(), ConnectionError>>,
    connect_calls: u32,
    close_calls: u32,
    last_config: Option<TransportConfig>,
    sent_payloads: Vec<String>,
    inbound: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

fn transport_state() -> &'static Mutex<TestTransportState> {
    static STATE: OnceLock<Mutex<TestTransportState>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(TestTransportState::default()))
}

fn test_lock() -> &'static AsyncMutex<()> {
    static LOCK: OnceLock<AsyncMutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| AsyncMutex::new(()))
}

/// Resets the fake server. The returned sender feeds the next connection.
fn configure_transport(
    outcomes: Vec<Result<(), ConnectionError>>,
) -> mpsc::UnboundedSender<Vec<u8>> {
    let (server, inbound) = mpsc::unbounded_channel();
    let mut state = transport_state()
        .lock()
        .expect("failed to lock transport state");
    *state = TestTransportState {
        connect_outcomes: outcomes.into_iter().collect(),
        inbound: Some(inbound),
        ..TestTransportState::default()
    };
    server
}

fn connect_calls() -> u32 {
    transport_state()
        .lock()
        .expect("failed to lock transport state")
        .connect_calls
}

fn close_calls() -> u32 {
    transport_state()
        .lock()
        .expect("failed to lock transport state")
        .close_calls
}

fn last_config() -> Option<TransportConfig> {
    transport_state()
        .lock()
        .expect("failed to lock transport state")
        .last_config
        .clone()
}

fn sent_stanzas() -> Vec<Stanza> {
    transport_state()
        .lock()
        .expect("failed to lock transport state")
        .sent_payloads
        .iter()
        .map(|payload| Stanza::parse_str(payload).expect("client sent valid stanza"))
        .collect()
}

struct TestTransport {
    inbound: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl XmppTransport for TestTransport {
    async fn connect(config: &TransportConfig) -> Result<Self, ConnectionError> {
        let mut state = transport_state()
            .lock()
            .expect("failed to lock transport state");
        state.connect_calls += 1;
        state.last_config = Some(config.clone());
        match state.connect_outcomes.pop_front().unwrap_or(Ok(())) {
            Ok(()) => Ok(Self {
                inbound: state.inbound.take(),
            }),
            Err(error) => Err(error),
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        transport_state()
            .lock()
            .expect("failed to lock transport state")
            .sent_payloads
            .push(String::from_utf8_lossy(data).into_owned());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, ConnectionError> {
        match self.inbound.as_mut() {
            Some(inbound) => inbound
                .recv()
                .await
                .ok_or_else(|| ConnectionError::StreamError("server went away".to_string())),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        transport_state()
            .lock()
            .expect("failed to lock transport state")
            .close_calls += 1;
        Ok(())
    }

    fn bound_jid(&self) -> Option<&str> {
        Some(BOUND_JID)
    }
}

fn config() -> Config {
    load_config_from_str(&fixtures::config("minimal-config.toml"))
        .expect("minimal config should load")
}

fn start(config: Config) -> (SessionHandle, EventSubscription) {
    let bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::new(256));
    let events = bus.subscribe("**").expect("failed to subscribe");
    let (handle, _task) =
        SessionManager::<TestTransport>::spawn(config, bus, Collaborators::default());
    (handle, events)
}

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Waits for the first sent stanza matching `predicate`.
async fn wait_for_sent(what: &str, predicate: impl Fn(&Stanza) -> bool) -> Stanza {
    for _ in 0..20 {
        if let Some(found) = sent_stanzas().into_iter().find(|stanza| predicate(stanza)) {
            return found;
        }
        settle().await;
    }
    panic!("client never sent {what}");
}

async fn next_event(events: &mut EventSubscription, channel: &str) -> Event {
    loop {
        let event = time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {channel}"))
            .expect("event bus closed");
        if event.channel.as_str() == channel {
            return event;
        }
    }
}

/// Every event already published, without waiting for more.
async fn drain(events: &mut EventSubscription) -> Vec<Event> {
    settle().await;
    let mut drained = Vec::new();
    while let Ok(Ok(event)) = time::timeout(Duration::from_millis(10), events.recv()).await {
        drained.push(event);
    }
    drained
}

fn is_roster_query(stanza: &Stanza) -> bool {
    stanza.name() == "iq" && stanza.type_attr() == Some("get") && stanza.has_child_ns(ns::ROSTER)
}

fn roster_reply(id: &str, items: &str) -> Vec<u8> {
    format!(
        "<iq xmlns='jabber:client' type='result' id='{id}' to='{BOUND_JID}'>\
         <query xmlns='jabber:iq:roster'>{items}</query></iq>"
    )
    .into_bytes()
}

/// Answers the initial roster query with bob and one group.
async fn serve_roster(server: &mpsc::UnboundedSender<Vec<u8>>) {
    let query = wait_for_sent("roster query", is_roster_query).await;
    let id = query.id().expect("roster query carries an id");
    server
        .send(roster_reply(
            id,
            "<item jid='bob@example.com' name='Bob' subscription='both'/>\
             <item jid='lunch@conference.example.com' name='Lunch' subscription='both'/>",
        ))
        .expect("server send");
    wait_for_sent("initial presence", |stanza| stanza.name() == "presence").await;
}

#[tokio::test(flavor = "current_thread")]
async fn missing_server_settings_fail_without_transport_call() {
    let _guard = test_lock().lock().await;
    configure_transport(vec![]);

    let mut config = config();
    config.server.domain.clear();
    config.server.port = None;
    let (handle, mut events) = start(config);

    let result = handle.connect().await;
    assert_matches!(
        result,
        Err(SessionError::Configuration { fields })
            if fields == vec!["server.domain".to_string(), "server.port".to_string()]
    );
    assert_eq!(connect_calls(), 0);

    let snapshot = assert_ok!(handle.snapshot().await);
    assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
    assert!(drain(&mut events).await.is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn connect_derives_login_and_reaches_connected() {
    let _guard = test_lock().lock().await;
    let _server = configure_transport(vec![Ok(())]);

    let mut config = config();
    config.account.user = "Alice".to_string();
    config.server.realm = "58347g3721h".to_string();
    config.server.realm_separator = Some("~".to_string());
    let (handle, mut events) = start(config);

    assert_ok!(handle.connect().await);

    let transport = last_config().expect("transport was configured");
    assert_eq!(transport.username, "58347g3721h~alice");
    assert_eq!(transport.uri, "wss://chat.example.com:5443/ws");

    let connecting = next_event(&mut events, "system.connection.status").await;
    assert_matches!(
        connecting.payload,
        EventPayload::ConnectionStatusChanged {
            status: ConnectionStatus::Connecting,
            ..
        }
    );
    let connected = next_event(&mut events, "system.connection.status").await;
    assert_matches!(
        connected.payload,
        EventPayload::ConnectionStatusChanged {
            status: ConnectionStatus::Connected,
            ..
        }
    );

    wait_for_sent("roster query", is_roster_query).await;
    let snapshot = assert_ok!(handle.snapshot().await);
    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    assert_eq!(snapshot.own_jid.as_deref(), Some(BOUND_JID));
    assert_eq!(snapshot.pending_requests, 1);
}

#[tokio::test(flavor = "current_thread")]
async fn roster_reply_creates_buddies_and_fetches_each_vcard() {
    let _guard = test_lock().lock().await;
    let server = configure_transport(vec![Ok(())]);
    let (handle, mut events) = start(config());
    assert_ok!(handle.connect().await);

    let query = wait_for_sent("roster query", is_roster_query).await;
    let reply = fixtures::stanza("roster-result.xml").replace(
        "id='roster-1'",
        &format!("id='{}'", query.id().expect("query id")),
    );
    server.send(reply.into_bytes()).expect("server send");

    let presence = wait_for_sent("initial presence", |stanza| stanza.name() == "presence").await;
    assert_eq!(presence.type_attr(), None);

    let vcards: Vec<Stanza> = sent_stanzas()
        .into_iter()
        .filter(|stanza| stanza.name() == "iq" && stanza.has_child_ns(ns::VCARD))
        .collect();
    let mut targets: Vec<&str> = vcards.iter().filter_map(Stanza::to).collect();
    targets.sort_unstable();
    assert_eq!(
        targets,
        vec![
            "58347g3721h~123456@conference.xmpp.example.com",
            "58347g3721h~800@xmpp.example.com",
        ]
    );

    let roster_changes = drain(&mut events)
        .await
        .into_iter()
        .filter(|event| event.channel.as_str() == "xmpp.roster.changed")
        .count();
    assert_eq!(roster_changes, 1);

    let snapshot = assert_ok!(handle.snapshot().await);
    assert_eq!(snapshot.roster.len(), 2);
    let kinds: Vec<BuddyKind> = snapshot.roster.iter().map(|entry| entry.kind).collect();
    assert!(kinds.contains(&BuddyKind::Direct));
    assert!(kinds.contains(&BuddyKind::Group));
}

#[tokio::test(flavor = "current_thread")]
async fn authentication_failure_is_reported_without_retry() {
    let _guard = test_lock().lock().await;
    configure_transport(vec![Err(ConnectionError::AuthenticationFailed(
        "not-authorized".to_string(),
    ))]);
    let (handle, mut events) = start(config());

    let result = handle.connect().await;
    assert_matches!(
        result,
        Err(SessionError::Connection(ConnectionError::AuthenticationFailed(_)))
    );

    next_event(&mut events, "system.connection.status").await;
    let failed = next_event(&mut events, "system.connection.status").await;
    assert_matches!(
        failed.payload,
        EventPayload::ConnectionStatusChanged {
            status: ConnectionStatus::ConnectionFailed,
            reason: Some(_),
        }
    );

    settle().await;
    assert_eq!(connect_calls(), 1);
    let snapshot = assert_ok!(handle.snapshot().await);
    assert_eq!(snapshot.status, ConnectionStatus::ConnectionFailed);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn keepalive_ping_times_out_without_reconnecting() {
    let _guard = test_lock().lock().await;
    let _server = configure_transport(vec![Ok(())]);
    let (handle, _events) = start(config());
    assert_ok!(handle.connect().await);
    wait_for_sent("roster query", is_roster_query).await;

    let pings = || {
        sent_stanzas()
            .into_iter()
            .filter(|stanza| stanza.name() == "iq" && stanza.has_child_ns(ns::PING))
            .count()
    };

    time::advance(Duration::from_secs(44)).await;
    settle().await;
    assert_eq!(pings(), 0);

    time::advance(Duration::from_secs(1)).await;
    wait_for_sent("keepalive ping", |stanza| stanza.has_child_ns(ns::PING)).await;
    assert_eq!(pings(), 1);
    // The unanswered roster query expired at 30s.
    assert_eq!(assert_ok!(handle.snapshot().await).pending_requests, 1);

    time::advance(Duration::from_secs(29)).await;
    settle().await;
    assert_eq!(assert_ok!(handle.snapshot().await).pending_requests, 1);

    time::advance(Duration::from_secs(2)).await;
    settle().await;
    let snapshot = assert_ok!(handle.snapshot().await);
    assert_eq!(snapshot.pending_requests, 0);
    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    assert_eq!(connect_calls(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn answers_server_ping() {
    let _guard = test_lock().lock().await;
    let server = configure_transport(vec![Ok(())]);
    let (handle, _events) = start(config());
    assert_ok!(handle.connect().await);

    server
        .send(
            format!(
                "<iq xmlns='jabber:client' type='get' id='s2c-1' from='example.com' to='{BOUND_JID}'>\
                 <ping xmlns='urn:xmpp:ping'/></iq>"
            )
            .into_bytes(),
        )
        .expect("server send");

    let reply = wait_for_sent("ping reply", |stanza| stanza.id() == Some("s2c-1")).await;
    assert_eq!(reply.type_attr(), Some("result"));
    assert_eq!(reply.to(), Some("example.com"));
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_request_gets_service_unavailable() {
    let _guard = test_lock().lock().await;
    let server = configure_transport(vec![Ok(())]);
    let (handle, _events) = start(config());
    assert_ok!(handle.connect().await);

    server
        .send(
            b"<iq xmlns='jabber:client' type='get' id='q-7' from='example.com'>\
              <query xmlns='urn:example:unknown'/></iq>"
                .to_vec(),
        )
        .expect("server send");

    let reply = wait_for_sent("error reply", |stanza| stanza.id() == Some("q-7")).await;
    assert_eq!(reply.type_attr(), Some("error"));
    assert_matches!(
        reply.error_condition(),
        Some((condition, _)) if condition == "service-unavailable"
    );
}

#[tokio::test(flavor = "current_thread")]
async fn incoming_message_is_published_and_acknowledged() {
    let _guard = test_lock().lock().await;
    let server = configure_transport(vec![Ok(())]);
    let (handle, mut events) = start(config());
    assert_ok!(handle.connect().await);
    serve_roster(&server).await;

    server
        .send(fixtures::stanza("message-chat.xml").into_bytes())
        .expect("server send");

    let received = next_event(&mut events, "xmpp.message.received").await;
    assert_matches!(
        received.payload,
        EventPayload::MessageReceived { message }
            if message.id == "m-100" && message.body == "Are we still on for lunch?"
    );

    let receipt = wait_for_sent("delivery receipt", |stanza| {
        stanza.name() == "message" && stanza.has_child_ns(ns::EVENT)
    })
    .await;
    assert!(receipt.to().is_some_and(|to| to.starts_with("bob@example.com")));
    settle().await;
    let receipts = sent_stanzas()
        .into_iter()
        .filter(|stanza| stanza.name() == "message" && stanza.has_child_ns(ns::EVENT))
        .count();
    assert_eq!(receipts, 1, "no display receipt without an active conversation");
}

#[tokio::test(flavor = "current_thread")]
async fn disconnect_is_idempotent() {
    let _guard = test_lock().lock().await;
    let _server = configure_transport(vec![Ok(())]);
    let (handle, mut events) = start(config());
    assert_ok!(handle.connect().await);
    next_event(&mut events, "system.connection.status").await;
    next_event(&mut events, "system.connection.status").await;

    assert_ok!(handle.disconnect().await);
    assert_eq!(close_calls(), 1);
    assert!(
        sent_stanzas()
            .iter()
            .any(|stanza| stanza.name() == "presence" && stanza.type_attr() == Some("unavailable"))
    );

    let disconnecting = next_event(&mut events, "system.connection.status").await;
    assert_matches!(
        disconnecting.payload,
        EventPayload::ConnectionStatusChanged {
            status: ConnectionStatus::Disconnecting,
            ..
        }
    );
    let disconnected = next_event(&mut events, "system.connection.status").await;
    assert_matches!(
        disconnected.payload,
        EventPayload::ConnectionStatusChanged {
            status: ConnectionStatus::Disconnected,
            reason: Some(_),
        }
    );

    assert_ok!(handle.disconnect().await);
    assert_eq!(close_calls(), 1);
    assert!(drain(&mut events).await.is_empty());
    let snapshot = assert_ok!(handle.snapshot().await);
    assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
    assert_eq!(snapshot.own_jid, None);
}

#[tokio::test(flavor = "current_thread")]
async fn server_hangup_drops_to_disconnected() {
    let _guard = test_lock().lock().await;
    let server = configure_transport(vec![Ok(())]);
    let (handle, mut events) = start(config());
    assert_ok!(handle.connect().await);
    next_event(&mut events, "system.connection.status").await;
    next_event(&mut events, "system.connection.status").await;

    drop(server);

    let lost = next_event(&mut events, "system.connection.status").await;
    assert_matches!(
        lost.payload,
        EventPayload::ConnectionStatusChanged {
            status: ConnectionStatus::Disconnected,
            reason: Some(reason),
        } if reason.contains("server went away")
    );
    assert_eq!(connect_calls(), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn composing_twice_arms_a_single_pause() {
    let _guard = test_lock().lock().await;
    let server = configure_transport(vec![Ok(())]);
    let (handle, _events) = start(config());
    assert_ok!(handle.connect().await);
    serve_roster(&server).await;

    let chat_states = |element: &'static str| {
        move || {
            sent_stanzas()
                .into_iter()
                .filter(|stanza| stanza.child(element, ns::CHATSTATES).is_some())
                .count()
        }
    };
    let composing = chat_states("composing");
    let paused = chat_states("paused");

    assert_ok!(handle.start_composing("bob@example.com", None).await);
    settle().await;
    time::advance(Duration::from_secs(5)).await;
    assert_ok!(handle.start_composing("bob@example.com/phone", None).await);
    settle().await;
    assert_eq!(composing(), 1);

    time::advance(Duration::from_secs(9)).await;
    settle().await;
    assert_eq!(paused(), 0);

    time::advance(Duration::from_secs(2)).await;
    wait_for_sent("paused notice", |stanza| {
        stanza.child("paused", ns::CHATSTATES).is_some()
    })
    .await;
    settle().await;
    assert_eq!(paused(), 1);
}
