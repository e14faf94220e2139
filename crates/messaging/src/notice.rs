//! One pass over a message stanza, producing the single fact it carries.
//!
//! Precedence is fixed: a live typing notice wins over a correction, a
//! correction over a receipt, and a receipt over a plain message.

use chrono::{DateTime, Utc};
use parley_core::event::{ChatState, DeliveryState, MessageType};
use parley_xmpp::{
    Stanza, StanzaKind, jid, ns,
    stanza::{child_text, find_child},
};
use xmpp_parsers::{chatstates::ChatState as WireChatState, delay::Delay};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageNotice {
    /// The sender started typing. `delayed` notices are stale.
    Composing { delayed: bool },
    /// Replaces the body of an earlier message.
    Correction { target: String, body: Option<String> },
    /// Progress report for one of our messages.
    Receipt { target: String, state: DeliveryState },
    Plain(PlainMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainMessage {
    pub id: Option<String>,
    pub body: Option<String>,
    pub thread: Option<String>,
    pub message_type: MessageType,
}

/// Addressing and timing shared by every notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Full sender address as received.
    pub from: String,
    pub to: Option<String>,
    /// Server-declared stamp when delayed, arrival time otherwise.
    pub timestamp: DateTime<Utc>,
    pub delayed: bool,
    pub chat_state: Option<ChatState>,
}

impl Envelope {
    pub fn sender(&self) -> String {
        jid::bare_jid(&self.from)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("not a message stanza")]
    NotAMessage,
    #[error("message without sender")]
    MissingSender,
}

fn chat_state_of(stanza: &Stanza) -> Option<ChatState> {
    stanza
        .element()
        .children()
        .find_map(|child| WireChatState::try_from(child.clone()).ok())
        .map(|state| match state {
            WireChatState::Composing => ChatState::Composing,
            WireChatState::Paused => ChatState::Paused,
            WireChatState::Active | WireChatState::Inactive | WireChatState::Gone => {
                ChatState::Active
            }
        })
}

fn delay_of(stanza: &Stanza) -> Option<DateTime<Utc>> {
    stanza
        .element()
        .children()
        .filter(|child| child.name() == "delay" && child.ns() == ns::DELAY)
        .find_map(|child| Delay::try_from(child.clone()).ok())
        .map(|delay| delay.stamp.0.to_utc())
}

/// Last `<body/>` wins when several are present.
fn body_of(stanza: &Stanza) -> Option<String> {
    stanza
        .element()
        .children()
        .filter(|child| child.name() == "body" && child.ns() == ns::CLIENT)
        .last()
        .map(|body| body.text())
        .filter(|body| !body.trim().is_empty())
}

fn receipt_of(stanza: &Stanza) -> Option<(String, DeliveryState)> {
    let event = stanza.child("x", ns::EVENT)?;
    let target = child_text(event, "id", ns::EVENT)?.trim().to_string();
    if find_child(event, "displayed", ns::EVENT).is_some() {
        Some((target, DeliveryState::Displayed))
    } else if find_child(event, "delivered", ns::EVENT).is_some() {
        Some((target, DeliveryState::Delivered))
    } else {
        None
    }
}

/// Target of `<replace/>`, from its `id` attribute or else an `<id/>` child.
fn correction_of(stanza: &Stanza) -> Option<String> {
    let replace = stanza.child("replace", ns::MESSAGE_CORRECT)?;
    replace
        .attr("id")
        .map(str::to_string)
        .or_else(|| child_text(replace, "id", ns::MESSAGE_CORRECT))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

pub fn decode(stanza: &Stanza, now: DateTime<Utc>) -> Result<(Envelope, MessageNotice), DecodeError> {
    if stanza.kind() != StanzaKind::Message {
        return Err(DecodeError::NotAMessage);
    }
    let from = stanza.from().ok_or(DecodeError::MissingSender)?;

    let stamp = delay_of(stanza);
    let chat_state = chat_state_of(stanza);
    let envelope = Envelope {
        from: from.to_string(),
        to: stanza.to().map(str::to_string),
        timestamp: stamp.unwrap_or(now),
        delayed: stamp.is_some(),
        chat_state,
    };

    let body = body_of(stanza);

    if chat_state == Some(ChatState::Composing) {
        let delayed = envelope.delayed;
        return Ok((envelope, MessageNotice::Composing { delayed }));
    }

    if let Some(target) = correction_of(stanza) {
        return Ok((envelope, MessageNotice::Correction { target, body }));
    }

    if let Some((target, state)) = receipt_of(stanza) {
        return Ok((envelope, MessageNotice::Receipt { target, state }));
    }

    let plain = PlainMessage {
        id: stanza.id().map(str::to_string),
        body,
        thread: child_text(stanza.element(), "thread", ns::CLIENT),
        message_type: MessageType::parse(stanza.type_attr()),
    };
    Ok((envelope, MessageNotice::Plain(plain)))
}
