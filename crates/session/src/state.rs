//! Everything the session mutates while handling one stanza, command or
//! timer firing.

use std::{sync::Arc, time::Duration};

use parley_core::{
    config::Config,
    event::{ConnectionStatus, EventEmitter, EventPayload, RosterEntry},
};
use parley_messaging::{
    ConversationView, InMemoryMessageStore, MessageContext, MessageStore, PauseScheduler,
};
use parley_presence::PresenceContext;
use parley_roster::{Directory, InMemoryProfileStore, ProfileStore, RosterSettings};
use parley_xmpp::{
    Correlator, Outbox, RequestRegistry, ScheduledTask, StanzaSink, jid,
    responders::SoftwareVersion,
};
use tokio::sync::mpsc;
use tracing::info;

/// Timer firings delivered back to the session loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    Keepalive,
    PauseComposing {
        jid: String,
        thread: Option<String>,
        generation: u64,
    },
}

/// The UI and storage side of the session.
pub struct Collaborators {
    pub view: Arc<dyn ConversationView>,
    pub profiles: Arc<dyn ProfileStore>,
    pub messages: Box<dyn MessageStore>,
}

impl Collaborators {
    pub fn new(view: Arc<dyn ConversationView>, profiles: Arc<dyn ProfileStore>) -> Self {
        Self {
            view,
            profiles,
            messages: Box::new(InMemoryMessageStore::new()),
        }
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::new(
            Arc::new(NoActiveConversation),
            Arc::new(InMemoryProfileStore::new()),
        )
    }
}

/// A view that never has a conversation on screen.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoActiveConversation;

impl ConversationView for NoActiveConversation {
    fn is_active(&self, _jid: &str) -> bool {
        false
    }
}

/// Read-only view of the session for the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub status: ConnectionStatus,
    pub own_jid: Option<String>,
    pub roster: Vec<RosterEntry>,
    pub pending_requests: usize,
}

pub struct SessionState {
    pub(crate) config: Config,
    pub(crate) settings: RosterSettings,
    pub(crate) status: ConnectionStatus,
    /// Full address bound for the current connection.
    pub(crate) own_jid: Option<String>,
    pub(crate) registry: RequestRegistry<SessionState>,
    pub(crate) outbox: Outbox,
    pub(crate) directory: Directory,
    pub(crate) messages: Box<dyn MessageStore>,
    pub(crate) profiles: Arc<dyn ProfileStore>,
    pub(crate) view: Arc<dyn ConversationView>,
    pub(crate) xmpp_events: EventEmitter,
    pub(crate) system_events: EventEmitter,
    pub(crate) timers: mpsc::UnboundedSender<TimerEvent>,
    pub(crate) software: SoftwareVersion,
}

impl Correlator for SessionState {
    fn registry(&mut self) -> &mut RequestRegistry<Self> {
        &mut self.registry
    }

    fn sink(&self) -> &dyn StanzaSink {
        &self.outbox
    }
}

impl SessionState {
    pub(crate) fn new(
        config: Config,
        collaborators: Collaborators,
        xmpp_events: EventEmitter,
        system_events: EventEmitter,
        timers: mpsc::UnboundedSender<TimerEvent>,
    ) -> Self {
        let Collaborators {
            view,
            profiles,
            messages,
        } = collaborators;
        Self {
            settings: RosterSettings::from_server(&config.server),
            config,
            status: ConnectionStatus::Disconnected,
            own_jid: None,
            registry: RequestRegistry::new(),
            outbox: Outbox::detached(),
            directory: Directory::new(),
            messages,
            profiles,
            view,
            xmpp_events,
            system_events,
            timers,
            software: SoftwareVersion::default(),
        }
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        self.config.session.request_timeout()
    }

    pub(crate) fn own_bare_jid(&self) -> Option<String> {
        self.own_jid.as_deref().map(jid::bare_jid)
    }

    pub(crate) fn set_status(&mut self, status: ConnectionStatus, reason: Option<String>) {
        if self.status == status {
            return;
        }
        info!(from = ?self.status, to = ?status, reason = ?reason, "connection status changed");
        self.status = status;
        self.system_events.emit(
            "system.connection.status",
            EventPayload::ConnectionStatusChanged { status, reason },
        );
    }

    pub(crate) fn emit_roster(&self) {
        self.xmpp_events.emit(
            "xmpp.roster.changed",
            EventPayload::RosterChanged {
                entries: self.directory.entries(),
            },
        );
    }

    pub(crate) fn messages(&mut self) -> MessageContext<'_> {
        MessageContext {
            directory: &mut self.directory,
            store: self.messages.as_mut(),
            sink: &self.outbox,
            events: &self.xmpp_events,
            view: self.view.as_ref(),
            own_jid: self.own_jid.as_deref(),
        }
    }

    pub(crate) fn presence(&mut self) -> PresenceContext<'_> {
        PresenceContext {
            directory: &mut self.directory,
            sink: &self.outbox,
            events: &self.xmpp_events,
            default_status: &self.config.session.default_status,
        }
    }

    pub(crate) fn pause_timers(&self) -> PauseTimers {
        PauseTimers {
            sender: self.timers.clone(),
        }
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.status,
            own_jid: self.own_jid.clone(),
            roster: self.directory.entries(),
            pending_requests: self.registry.len(),
        }
    }
}

/// Arms typing-pause timers that report back through the session loop.
pub(crate) struct PauseTimers {
    sender: mpsc::UnboundedSender<TimerEvent>,
}

impl PauseScheduler for PauseTimers {
    fn schedule_pause(
        &self,
        jid: &str,
        thread: Option<String>,
        generation: u64,
        delay: Duration,
    ) -> ScheduledTask {
        let sender = self.sender.clone();
        let jid = jid.to_string();
        ScheduledTask::after(delay, async move {
            let _ = sender.send(TimerEvent::PauseComposing {
                jid,
                thread,
                generation,
            });
        })
    }
}
