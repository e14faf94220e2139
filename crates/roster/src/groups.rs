//! Multi-user chat discovery and joining. Room semantics beyond joining
//! are left to the server.

use parley_core::config::ServerConfig;
use parley_xmpp::{
    Stanza, StanzaError,
    iq::{self, BuildResult},
    jid, ns,
};
use xmpp_parsers::{
    minidom::Element,
    muc::Muc,
    presence::{Presence, Type},
};

/// `disco#items` against the group service, listing its rooms.
pub fn rooms_query(server: &ServerConfig) -> BuildResult {
    iq::disco_items(&server.group_service_jid(), Some(ns::MUC_ROOMS))
}

/// `disco#items` against one room, listing its occupants.
pub fn members_query(room: &str, server: &ServerConfig) -> BuildResult {
    iq::disco_items(&room_address(room, server), None)
}

pub fn server_info_query(server: &ServerConfig) -> BuildResult {
    iq::disco_info(&server.domain)
}

/// Full room address for `room`, which may be a bare node or already an
/// address on the group service.
pub fn room_address(room: &str, server: &ServerConfig) -> String {
    if room.contains('@') {
        jid::bare_jid(room)
    } else {
        jid::bare_jid(&format!("{room}@{}", server.group_service_jid()))
    }
}

/// Presence to `room/nick` carrying the MUC marker.
pub fn join(room: &str, nick: &str, server: &ServerConfig) -> Result<Stanza, StanzaError> {
    let room = room_address(room, server);
    let occupant = jid::parse_bare(&room)?
        .with_resource_str(nick)
        .map_err(|_| StanzaError::InvalidJid(format!("{room}/{nick}")))?;

    let mut presence = Presence::new(Type::None).with_to(occupant);
    let muc: Element = Muc::new().into();
    presence.payloads.push(muc);
    Ok(presence.into())
}
