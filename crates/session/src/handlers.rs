//! The routing table installed for every connection.

use parley_presence::PresenceOutcome;
use parley_roster::items;
use parley_xmpp::{
    Dispatcher, IqType, Stanza, StanzaKind, StanzaSink, dispatch_response, iq, ns, responders,
};
use tracing::{debug, warn};

use crate::{state::SessionState, sync};

pub(crate) fn dispatcher() -> Dispatcher<SessionState> {
    Dispatcher::new()
        .on_request(IqType::Get, ns::PING, handle_ping)
        .on_request(IqType::Get, ns::VERSION, handle_version)
        .on_request(IqType::Set, ns::ROSTER, handle_roster_push)
        .on_kind(StanzaKind::Presence, handle_presence)
        .on_kind(StanzaKind::Message, handle_message)
        .on_response(handle_response)
}

fn reply(state: &SessionState, reply: Result<Option<Stanza>, parley_xmpp::StanzaError>) -> bool {
    match reply {
        Ok(Some(stanza)) => {
            if let Err(error) = state.outbox.send(stanza) {
                warn!(%error, "reply not sent");
            }
            true
        }
        Ok(None) => false,
        Err(error) => {
            warn!(%error, "reply not built");
            false
        }
    }
}

fn handle_ping(state: &mut SessionState, stanza: &Stanza) -> bool {
    reply(state, responders::ping_reply(stanza))
}

fn handle_version(state: &mut SessionState, stanza: &Stanza) -> bool {
    reply(state, responders::version_reply(stanza, &state.software))
}

fn handle_roster_push(state: &mut SessionState, stanza: &Stanza) -> bool {
    if !items::is_trusted_push(stanza, state.own_jid.as_deref()) {
        warn!(from = stanza.from().unwrap_or_default(), "roster push from foreign sender ignored");
        return false;
    }
    if !reply(state, iq::empty_result(stanza).map(Some)) {
        return false;
    }
    debug!(id = stanza.id(), "roster push");
    sync::roster_pushed(state, stanza);
    true
}

fn handle_presence(state: &mut SessionState, stanza: &Stanza) -> bool {
    if let PresenceOutcome::Applied {
        refetch_vcard: Some(address),
    } = state.presence().handle_presence(stanza)
    {
        sync::fetch_vcard(state, &address);
    }
    true
}

fn handle_message(state: &mut SessionState, stanza: &Stanza) -> bool {
    let outcome = state.messages().handle_message(stanza);
    debug!(?outcome, id = stanza.id(), "message handled");
    true
}

fn handle_response(state: &mut SessionState, stanza: &Stanza) -> bool {
    dispatch_response(state, stanza)
}
