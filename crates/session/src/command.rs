use parley_core::event::{DeliveryState, PresenceKind};
use parley_messaging::OutgoingMessage;
use parley_roster::OwnProfile;
use tokio::sync::{mpsc, oneshot};

use crate::{
    error::{Result, SessionError},
    state::Snapshot,
};

/// Requests from the UI to the session loop.
#[derive(Debug)]
pub enum Command {
    Connect {
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    SendMessage {
        message: OutgoingMessage,
        reply: oneshot::Sender<DeliveryState>,
    },
    StartComposing {
        to: String,
        thread: Option<String>,
    },
    SetOwnPresence {
        kind: PresenceKind,
        status: Option<String>,
        publish_vcard: bool,
    },
    Subscribe {
        to: String,
    },
    Unsubscribe {
        to: String,
    },
    AddToRoster {
        jid: String,
        name: Option<String>,
    },
    RemoveFromRoster {
        jid: String,
    },
    FetchRoster,
    FetchVCard {
        jid: String,
    },
    FetchOwnVCard,
    PublishOwnVCard {
        card: Option<OwnProfile>,
    },
    FetchGroups,
    FetchGroupMembers {
        room: String,
    },
    JoinGroup {
        room: String,
        nick: String,
    },
    QueryServerInfo,
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
}

/// Cloneable front end of a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
}

impl SessionHandle {
    pub(crate) fn new(commands: mpsc::Sender<Command>) -> Self {
        Self { commands }
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }

    async fn ask<R>(&self, command: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply)).await?;
        response.await.map_err(|_| SessionError::Closed)
    }

    pub async fn connect(&self) -> Result<()> {
        self.ask(|reply| Command::Connect { reply }).await?
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.ask(|reply| Command::Disconnect { reply }).await
    }

    pub async fn send_message(&self, message: OutgoingMessage) -> Result<DeliveryState> {
        self.ask(|reply| Command::SendMessage { message, reply }).await
    }

    /// Typing stops on its own after the configured pause or with the next
    /// message.
    pub async fn start_composing(&self, to: &str, thread: Option<String>) -> Result<()> {
        self.send(Command::StartComposing {
            to: to.to_string(),
            thread,
        })
        .await
    }

    pub async fn set_own_presence(
        &self,
        kind: PresenceKind,
        status: Option<String>,
        publish_vcard: bool,
    ) -> Result<()> {
        self.send(Command::SetOwnPresence {
            kind,
            status,
            publish_vcard,
        })
        .await
    }

    pub async fn subscribe(&self, to: &str) -> Result<()> {
        self.send(Command::Subscribe { to: to.to_string() }).await
    }

    pub async fn unsubscribe(&self, to: &str) -> Result<()> {
        self.send(Command::Unsubscribe { to: to.to_string() }).await
    }

    pub async fn add_to_roster(&self, jid: &str, name: Option<String>) -> Result<()> {
        self.send(Command::AddToRoster {
            jid: jid.to_string(),
            name,
        })
        .await
    }

    pub async fn remove_from_roster(&self, jid: &str) -> Result<()> {
        self.send(Command::RemoveFromRoster {
            jid: jid.to_string(),
        })
        .await
    }

    pub async fn fetch_roster(&self) -> Result<()> {
        self.send(Command::FetchRoster).await
    }

    pub async fn fetch_vcard(&self, jid: &str) -> Result<()> {
        self.send(Command::FetchVCard {
            jid: jid.to_string(),
        })
        .await
    }

    pub async fn fetch_own_vcard(&self) -> Result<()> {
        self.send(Command::FetchOwnVCard).await
    }

    /// Publishes `card`, or the stored profile when `None`.
    pub async fn publish_own_vcard(&self, card: Option<OwnProfile>) -> Result<()> {
        self.send(Command::PublishOwnVCard { card }).await
    }

    pub async fn fetch_groups(&self) -> Result<()> {
        self.send(Command::FetchGroups).await
    }

    pub async fn fetch_group_members(&self, room: &str) -> Result<()> {
        self.send(Command::FetchGroupMembers {
            room: room.to_string(),
        })
        .await
    }

    pub async fn join_group(&self, room: &str, nick: &str) -> Result<()> {
        self.send(Command::JoinGroup {
            room: room.to_string(),
            nick: nick.to_string(),
        })
        .await
    }

    pub async fn query_server_info(&self) -> Result<()> {
        self.send(Command::QueryServerInfo).await
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        self.ask(|reply| Command::Snapshot { reply }).await
    }
}
