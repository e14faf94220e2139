//! Namespaces used on the wire.

pub const CLIENT: &str = "jabber:client";
pub const STREAM: &str = "http://etherx.jabber.org/streams";
pub const FRAMING: &str = "urn:ietf:params:xml:ns:xmpp-framing";
pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

pub const PING: &str = "urn:xmpp:ping";
pub const VERSION: &str = "jabber:iq:version";
pub const ROSTER: &str = "jabber:iq:roster";
pub const VCARD: &str = "vcard-temp";
pub const VCARD_UPDATE: &str = "vcard-temp:x:update";
pub const DELAY: &str = "urn:xmpp:delay";
pub const CHATSTATES: &str = "http://jabber.org/protocol/chatstates";
pub const MESSAGE_CORRECT: &str = "urn:xmpp:message-correct:0";
pub const EVENT: &str = "jabber:x:event";
pub const DISCO_INFO: &str = "http://jabber.org/protocol/disco#info";
pub const DISCO_ITEMS: &str = "http://jabber.org/protocol/disco#items";
pub const MUC: &str = "http://jabber.org/protocol/muc";
pub const MUC_ROOMS: &str = "http://jabber.org/protocol/muc#rooms";
