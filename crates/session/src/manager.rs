//! The session actor: one task that owns the connection and all session
//! state, driven by commands, inbound frames, timers and request deadlines.

use std::sync::Arc;

use parley_core::{
    config::Config,
    event::{ConnectionStatus, EventBus, EventEmitter, EventSource, PresenceKind},
};
use parley_xmpp::{
    ConnectionError, Dispatch, Dispatcher, ScheduledTask, Stanza, StanzaSink, TransportConfig,
    XmppTransport, expire_requests, iq,
    sink::{StanzaReceiver, stanza_channel},
};
use tokio::{
    sync::mpsc,
    time::{Instant, sleep_until, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    command::{Command, SessionHandle},
    error::{Result, SessionError},
    handlers,
    state::{Collaborators, SessionState, TimerEvent},
    sync,
};

const COMMAND_BUFFER: usize = 64;
const OUTBOUND_BUFFER: usize = 1024;

pub struct SessionManager<T: XmppTransport> {
    state: SessionState,
    dispatcher: Dispatcher<SessionState>,
    transport: Option<T>,
    outbound: Option<StanzaReceiver>,
    keepalive: Option<ScheduledTask>,
    commands: mpsc::Receiver<Command>,
    timer_events: mpsc::UnboundedReceiver<TimerEvent>,
}

impl<T: XmppTransport> SessionManager<T> {
    pub fn new(
        config: Config,
        bus: Arc<dyn EventBus>,
        collaborators: Collaborators,
    ) -> (Self, SessionHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (timers, timer_events) = mpsc::unbounded_channel();
        let state = SessionState::new(
            config,
            collaborators,
            EventEmitter::new(bus.clone(), EventSource::Xmpp),
            EventEmitter::new(bus, EventSource::System("session".to_string())),
            timers,
        );
        let manager = Self {
            state,
            dispatcher: handlers::dispatcher(),
            transport: None,
            outbound: None,
            keepalive: None,
            commands,
            timer_events,
        };
        (manager, SessionHandle::new(command_tx))
    }

    /// Starts the loop on the current runtime.
    pub fn spawn(
        config: Config,
        bus: Arc<dyn EventBus>,
        collaborators: Collaborators,
    ) -> (SessionHandle, tokio::task::JoinHandle<()>) {
        let (manager, handle) = Self::new(config, bus, collaborators);
        (handle, tokio::spawn(manager.run()))
    }

    /// Runs until every [`SessionHandle`] is dropped.
    pub async fn run(mut self) {
        loop {
            let deadline = self.state.registry.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => {
                        self.disconnect().await;
                        break;
                    }
                },
                frame = next_frame(self.transport.as_mut()) => self.on_frame(frame).await,
                Some(stanza) = next_outbound(self.outbound.as_mut()) => self.write(stanza).await,
                Some(event) = self.timer_events.recv() => self.on_timer(event),
                _ = sleep_until_deadline(deadline) => {
                    let expired = expire_requests(&mut self.state, Instant::now());
                    debug!(expired, "request deadlines passed");
                }
            }
        }
        debug!("session loop stopped");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => {
                let result = self.connect().await;
                let _ = reply.send(result);
            }
            Command::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Command::SendMessage { message, reply } => {
                let delivery = self.state.messages().send_message(message);
                let _ = reply.send(delivery);
            }
            Command::StartComposing { to, thread } => {
                let scheduler = self.state.pause_timers();
                let pause = self.state.config.session.composing_pause();
                let to = parley_xmpp::jid::bare_jid(&to);
                self.state
                    .messages()
                    .start_composing(&to, thread, &scheduler, pause);
            }
            Command::SetOwnPresence {
                kind,
                status,
                publish_vcard,
            } => sync::set_own_presence(&mut self.state, kind, status.as_deref(), publish_vcard),
            Command::Subscribe { to } => {
                self.state.presence().subscribe(&to);
            }
            Command::Unsubscribe { to } => {
                self.state.presence().unsubscribe(&to);
            }
            Command::AddToRoster { jid, name } => sync::add_to_roster(&mut self.state, &jid, name),
            Command::RemoveFromRoster { jid } => sync::remove_from_roster(&mut self.state, &jid),
            Command::FetchRoster => sync::fetch_roster(&mut self.state),
            Command::FetchVCard { jid } => sync::fetch_vcard(&mut self.state, &jid),
            Command::FetchOwnVCard => sync::fetch_own_vcard(&mut self.state),
            Command::PublishOwnVCard { card } => sync::publish_own_vcard(&mut self.state, card),
            Command::FetchGroups => sync::fetch_groups(&mut self.state),
            Command::FetchGroupMembers { room } => {
                sync::fetch_group_members(&mut self.state, &room)
            }
            Command::JoinGroup { room, nick } => sync::join_group(&mut self.state, &room, &nick),
            Command::QueryServerInfo => sync::query_server_info(&mut self.state),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.state.snapshot());
            }
        }
    }

    async fn on_frame(&mut self, frame: std::result::Result<Vec<u8>, ConnectionError>) {
        let data = match frame {
            Ok(data) => data,
            Err(error) => {
                self.connection_lost(error);
                return;
            }
        };

        let (dispatch, stanza) = self.dispatcher.dispatch_raw(&mut self.state, &data);
        if let (Dispatch::UnhandledRequest, Some(stanza)) = (dispatch, stanza) {
            let result = iq::error_reply(
                &stanza,
                iq::ErrorType::Cancel,
                iq::DefinedCondition::ServiceUnavailable,
            )
                .map_err(|error| error.to_string())
                .and_then(|reply| {
                    self.state
                        .outbox
                        .send(reply)
                        .map_err(|error| error.to_string())
                });
            if let Err(error) = result {
                warn!(id = stanza.id(), %error, "service-unavailable reply not sent");
            }
        }
    }

    async fn write(&mut self, stanza: Stanza) {
        let Some(transport) = self.transport.as_mut() else {
            debug!(kind = stanza.name(), "stanza dropped after disconnect");
            return;
        };
        let data = match stanza.to_bytes() {
            Ok(data) => data,
            Err(error) => {
                warn!(%error, "outbound stanza not serialisable");
                return;
            }
        };
        if let Err(error) = transport.send(&data).await {
            self.connection_lost(error);
        }
    }

    fn on_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::Keepalive => {
                if self.state.status == ConnectionStatus::Connected {
                    sync::keepalive(&mut self.state);
                }
            }
            TimerEvent::PauseComposing {
                jid,
                thread,
                generation,
            } => {
                self.state
                    .messages()
                    .pause_composing(&jid, thread.as_deref(), generation);
            }
        }
    }

    async fn connect(&mut self) -> Result<()> {
        let missing = self.state.config.server.missing_fields();
        if !missing.is_empty() {
            warn!(fields = ?missing, "connection parameters missing");
            return Err(SessionError::Configuration { fields: missing });
        }

        self.disconnect().await;

        let server = &self.state.config.server;
        let account = &self.state.config.account;
        let local = match server.realm_prefix() {
            Some((realm, separator)) => format!("{realm}{separator}{}", account.user),
            None => account.user.clone(),
        }
        .to_lowercase();
        let login = format!("{local}@{}", server.domain.to_lowercase());
        let transport_config = TransportConfig {
            uri: server.websocket_uri(),
            domain: server.domain.clone(),
            username: local,
            password: account.password.clone(),
            resource: account.resource.clone(),
            timeout: self.state.config.session.connect_timeout(),
        };

        info!(%login, uri = %transport_config.uri, "connecting");
        self.state.set_status(ConnectionStatus::Connecting, None);

        let connected = match timeout(transport_config.timeout, T::connect(&transport_config)).await
        {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout),
        };
        let transport = match connected {
            Ok(transport) => transport,
            Err(error) => {
                warn!(%login, %error, "connection failed");
                self.state
                    .set_status(ConnectionStatus::ConnectionFailed, Some(error.to_string()));
                return Err(error.into());
            }
        };

        let own_jid = transport
            .bound_jid()
            .map(str::to_string)
            .unwrap_or(login);
        let (sender, receiver) = stanza_channel(OUTBOUND_BUFFER);
        self.state.outbox.attach(sender);
        self.outbound = Some(receiver);
        self.transport = Some(transport);
        self.state.registry.set_own_jid(Some(own_jid.clone()));
        self.state.own_jid = Some(own_jid);
        self.state.set_status(ConnectionStatus::Connected, None);

        sync::publish_own_vcard(&mut self.state, None);
        sync::fetch_roster(&mut self.state);

        let timers = self.state.timers.clone();
        self.keepalive = Some(ScheduledTask::every(
            self.state.config.session.keepalive_interval(),
            move || timers.send(TimerEvent::Keepalive).is_ok(),
        ));
        Ok(())
    }

    /// Idempotent. Pending requests are left to time out.
    async fn disconnect(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            if self.state.status != ConnectionStatus::Disconnected {
                self.state.set_status(ConnectionStatus::Disconnected, None);
            }
            return;
        };

        self.keepalive = None;
        self.state
            .set_status(ConnectionStatus::Disconnecting, None);
        parley_presence::send_own_presence(
            &self.state.outbox,
            PresenceKind::Unavailable,
            None,
            None,
        );

        self.state.outbox.detach();
        if let Some(mut outbound) = self.outbound.take() {
            while let Ok(stanza) = outbound.try_recv() {
                let Ok(data) = stanza.to_bytes() else {
                    continue;
                };
                if let Err(error) = transport.send(&data).await {
                    debug!(%error, "flush on disconnect stopped");
                    break;
                }
            }
        }
        if let Err(error) = transport.close().await {
            debug!(%error, "transport close failed");
        }

        self.teardown();
        self.state.set_status(
            ConnectionStatus::Disconnected,
            Some("user requested disconnect".to_string()),
        );
    }

    /// The stream died underneath us. No reconnect is attempted.
    fn connection_lost(&mut self, error: ConnectionError) {
        warn!(%error, retryable = error.is_retryable(), "connection lost");
        self.transport = None;
        self.outbound = None;
        self.keepalive = None;
        self.state.outbox.detach();
        self.teardown();
        self.state
            .set_status(ConnectionStatus::Disconnected, Some(error.to_string()));
    }

    fn teardown(&mut self) {
        self.state.directory.cancel_timers();
        self.state.own_jid = None;
        self.state.registry.set_own_jid(None);
    }
}

async fn next_frame<T: XmppTransport>(
    transport: Option<&mut T>,
) -> std::result::Result<Vec<u8>, ConnectionError> {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_outbound(outbound: Option<&mut StanzaReceiver>) -> Option<Stanza> {
    match outbound {
        Some(outbound) => outbound.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
