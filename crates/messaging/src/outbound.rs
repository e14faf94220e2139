//! Builders for messages we originate.

use parley_core::event::{ChatState, MessageType};
use parley_xmpp::{
    Stanza, StanzaError,
    jid::{self, Jid},
    ns,
};
use xmpp_parsers::{
    chatstates::ChatState as WireChatState,
    message::{Id, Lang, Message, MessageType as WireType, Thread},
    minidom::Element,
};

/// Our own outgoing chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: String,
    pub id: String,
    pub body: String,
    pub thread: Option<String>,
    pub message_type: MessageType,
}

impl OutgoingMessage {
    pub fn new(to: impl Into<String>, id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            id: id.into(),
            body: body.into(),
            thread: None,
            message_type: MessageType::Normal,
        }
    }

    pub fn with_thread(mut self, thread: Option<String>) -> Self {
        self.thread = thread;
        self
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }
}

fn wire_type(message_type: MessageType) -> WireType {
    match message_type {
        MessageType::Chat => WireType::Chat,
        MessageType::Normal => WireType::Normal,
        MessageType::Groupchat => WireType::Groupchat,
        MessageType::Headline => WireType::Headline,
        MessageType::Error => WireType::Error,
    }
}

fn wire_state(state: ChatState) -> WireChatState {
    match state {
        ChatState::Active => WireChatState::Active,
        ChatState::Composing => WireChatState::Composing,
        ChatState::Paused => WireChatState::Paused,
    }
}

fn thread(id: Option<&str>) -> Option<Thread> {
    id.map(|id| Thread {
        parent: None,
        id: id.to_string(),
    })
}

/// `jabber:x:event` wrapper around the given children.
fn event(children: impl IntoIterator<Item = Element>) -> Element {
    Element::builder("x", ns::EVENT).append_all(children).build()
}

/// Body plus an `active` state and a request for delivery and display
/// receipts. A `normal` type is left implicit on the wire.
pub fn message(outgoing: &OutgoingMessage) -> Result<Stanza, StanzaError> {
    let mut message = Message::new_with_type(
        wire_type(outgoing.message_type),
        Some(jid::parse(&outgoing.to)?),
    );
    message.id = Some(Id(outgoing.id.clone()));
    message.thread = thread(outgoing.thread.as_deref());
    message.bodies.insert(Lang::new(), outgoing.body.clone());
    message.payloads.push(WireChatState::Active.into());
    message.payloads.push(event([
        Element::bare("delivered", ns::EVENT),
        Element::bare("displayed", ns::EVENT),
    ]));
    Ok(message.into())
}

/// Standalone chat state notification.
pub fn chat_state(to: &str, state: ChatState, thread_id: Option<&str>) -> Result<Stanza, StanzaError> {
    let mut message = Message::chat(Some(jid::parse(to)?)).with_payload(wire_state(state));
    message.thread = thread(thread_id);
    Ok(message.into())
}

fn receipt(to: &str, id: &str, kind: &str) -> Result<Stanza, StanzaError> {
    let target = Element::builder("id", ns::EVENT).append(id).build();
    let message = Message::new(Some(Jid::from(jid::parse_bare(to)?)))
        .with_payloads(vec![event([Element::bare(kind, ns::EVENT), target])]);
    Ok(message.into())
}

pub fn delivery_receipt(to: &str, id: &str) -> Result<Stanza, StanzaError> {
    receipt(to, id, "delivered")
}

pub fn display_receipt(to: &str, id: &str) -> Result<Stanza, StanzaError> {
    receipt(to, id, "displayed")
}
