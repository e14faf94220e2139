//! Presence subscription requests and how they move a buddy's state.

use parley_core::event::SubscriptionState;
use parley_xmpp::{Stanza, StanzaError, jid};
use xmpp_parsers::presence::{Presence, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionRequest {
    Subscribe,
    Subscribed,
    Unsubscribe,
    Unsubscribed,
}

impl SubscriptionRequest {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "subscribe" => Some(Self::Subscribe),
            "subscribed" => Some(Self::Subscribed),
            "unsubscribe" => Some(Self::Unsubscribe),
            "unsubscribed" => Some(Self::Unsubscribed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Subscribed => "subscribed",
            Self::Unsubscribe => "unsubscribe",
            Self::Unsubscribed => "unsubscribed",
        }
    }

    fn presence_type(self) -> Type {
        match self {
            Self::Subscribe => Type::Subscribe,
            Self::Subscribed => Type::Subscribed,
            Self::Unsubscribe => Type::Unsubscribe,
            Self::Unsubscribed => Type::Unsubscribed,
        }
    }
}

/// `<presence type='...'/>` addressed to the bare address of `to`.
pub fn request(to: &str, kind: SubscriptionRequest) -> Result<Stanza, StanzaError> {
    let presence = Presence::new(kind.presence_type()).with_to(jid::parse_bare(to)?);
    Ok(presence.into())
}

/// State after the peer sent us `kind`.
pub fn after_incoming(current: SubscriptionState, kind: SubscriptionRequest) -> SubscriptionState {
    use SubscriptionState::*;

    match (kind, current) {
        (SubscriptionRequest::Subscribe, Both) => Both,
        (SubscriptionRequest::Subscribe, _) => Pending,
        (SubscriptionRequest::Subscribed, Pending) => Both,
        (SubscriptionRequest::Subscribed, Both) => Both,
        (SubscriptionRequest::Subscribed, _) => Subscribed,
        (SubscriptionRequest::Unsubscribe, Both) => Subscribed,
        (SubscriptionRequest::Unsubscribe, Pending) => None,
        (SubscriptionRequest::Unsubscribe, state) => state,
        (SubscriptionRequest::Unsubscribed, _) => None,
    }
}

/// State after we sent `kind` to the peer.
pub fn after_outgoing(current: SubscriptionState, kind: SubscriptionRequest) -> SubscriptionState {
    use SubscriptionState::*;

    match (kind, current) {
        (SubscriptionRequest::Subscribe, None) => Pending,
        (SubscriptionRequest::Unsubscribe, _) => None,
        (_, state) => state,
    }
}
