use tokio::sync::mpsc;

use crate::{error::ConnectionError, stanza::Stanza};

/// Where outbound stanzas go. Implementations must not block.
pub trait StanzaSink: Send + Sync {
    fn send(&self, stanza: Stanza) -> Result<(), ConnectionError>;
}

pub type StanzaSender = mpsc::Sender<Stanza>;
pub type StanzaReceiver = mpsc::Receiver<Stanza>;

pub fn stanza_channel(buffer: usize) -> (StanzaSender, StanzaReceiver) {
    mpsc::channel(buffer)
}

/// Queue in front of the live connection. Detached while disconnected, in
/// which case every send fails with [`ConnectionError::NotConnected`].
#[derive(Debug, Default)]
pub struct Outbox {
    sender: Option<StanzaSender>,
}

impl Outbox {
    pub fn detached() -> Self {
        Self { sender: None }
    }

    pub fn attach(&mut self, sender: StanzaSender) {
        self.sender = Some(sender);
    }

    /// Drops the sender, which lets the writer side drain and close.
    pub fn detach(&mut self) {
        self.sender = None;
    }

    pub fn is_attached(&self) -> bool {
        self.sender.as_ref().is_some_and(|sender| !sender.is_closed())
    }
}

impl StanzaSink for Outbox {
    fn send(&self, stanza: Stanza) -> Result<(), ConnectionError> {
        let Some(sender) = &self.sender else {
            return Err(ConnectionError::NotConnected);
        };

        sender.try_send(stanza).map_err(|error| match error {
            mpsc::error::TrySendError::Full(_) => {
                ConnectionError::TransportError("outbound queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => ConnectionError::NotConnected,
        })
    }
}
