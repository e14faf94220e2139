//! Builders for IQ stanzas and the generic replies every client must send.

use std::collections::BTreeMap;

use xmpp_parsers::{
    disco::{DiscoInfoQuery, DiscoItemsQuery},
    iq::{Iq, IqGetPayload, IqResultPayload, IqSetPayload},
    jid::Jid,
    minidom::Element,
    ping::Ping,
    stanza_error::StanzaError as WireError,
};
pub use xmpp_parsers::stanza_error::{DefinedCondition, ErrorType};

use crate::{
    error::StanzaError,
    jid,
    stanza::{Stanza, new_id},
};

pub type BuildResult = Result<Stanza, StanzaError>;

fn address(value: Option<&str>) -> Result<Option<Jid>, StanzaError> {
    value.map(jid::parse).transpose()
}

fn addressed(mut iq: Iq, to: Option<&str>) -> BuildResult {
    *iq.to_mut() = address(to)?;
    Ok(<Stanza as From<Iq>>::from(iq))
}

pub fn iq_get(id: &str, to: Option<&str>, payload: impl IqGetPayload) -> BuildResult {
    addressed(Iq::from_get(id, payload), to)
}

pub fn iq_set(id: &str, to: Option<&str>, payload: impl IqSetPayload) -> BuildResult {
    addressed(Iq::from_set(id, payload), to)
}

fn reply(request: &Stanza, payload: Option<Element>) -> BuildResult {
    Ok(<Stanza as From<Iq>>::from(Iq::Result {
        from: address(request.to())?,
        to: address(request.from())?,
        id: request.id().unwrap_or_default().to_string(),
        payload,
    }))
}

/// `type='result'` answering `request`, addressed back to its sender.
pub fn result_reply(request: &Stanza, payload: impl IqResultPayload) -> BuildResult {
    reply(request, Some(payload.into()))
}

/// Childless `type='result'` answering `request`.
pub fn empty_result(request: &Stanza) -> BuildResult {
    reply(request, None)
}

/// `type='error'` answering `request` with a defined stanza error condition.
pub fn error_reply(
    request: &Stanza,
    error_type: ErrorType,
    condition: DefinedCondition,
) -> BuildResult {
    Ok(<Stanza as From<Iq>>::from(Iq::Error {
        from: address(request.to())?,
        to: address(request.from())?,
        id: request.id().unwrap_or_default().to_string(),
        error: WireError {
            type_: error_type,
            by: None,
            defined_condition: condition,
            texts: BTreeMap::new(),
            other: None,
        },
        payload: None,
    }))
}

/// Liveness check, answered by the server with an empty result.
pub fn ping(to: Option<&str>) -> BuildResult {
    iq_get(&new_id(), to, Ping)
}

pub fn disco_items(to: &str, node: Option<&str>) -> BuildResult {
    let query = DiscoItemsQuery {
        node: node.map(str::to_string),
        rsm: None,
    };
    iq_get(&new_id(), Some(to), query)
}

pub fn disco_info(to: &str) -> BuildResult {
    iq_get(&new_id(), Some(to), DiscoInfoQuery { node: None })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ns, stanza::IqType};

    #[test]
    fn ping_targets_domain() {
        let stanza = ping(Some("example.com")).unwrap();
        assert_eq!(stanza.iq_type(), Some(IqType::Get));
        assert_eq!(stanza.to(), Some("example.com"));
        assert!(stanza.id().is_some());
        assert!(stanza.child("ping", ns::PING).is_some());
    }

    #[test]
    fn empty_result_swaps_addresses() {
        let request = Stanza::parse_str(
            "<iq xmlns='jabber:client' type='get' id='s1' from='example.com' to='alice@example.com/desk'>\
               <ping xmlns='urn:xmpp:ping'/></iq>",
        )
        .unwrap();

        let reply = empty_result(&request).unwrap();
        assert_eq!(reply.iq_type(), Some(IqType::Result));
        assert_eq!(reply.id(), Some("s1"));
        assert_eq!(reply.to(), Some("example.com"));
        assert_eq!(reply.from(), Some("alice@example.com/desk"));
        assert_eq!(reply.element().children().count(), 0);
    }

    #[test]
    fn error_reply_carries_condition() {
        let request = Stanza::parse_str(
            "<iq xmlns='jabber:client' type='get' id='q' from='bob@example.com/x'>\
               <query xmlns='urn:example:unknown'/></iq>",
        )
        .unwrap();

        let reply = error_reply(
            &request,
            ErrorType::Cancel,
            DefinedCondition::ServiceUnavailable,
        )
        .unwrap();
        assert_eq!(reply.iq_type(), Some(IqType::Error));
        assert_eq!(reply.to(), Some("bob@example.com/x"));
        assert_eq!(
            reply.error_condition().map(|(condition, _)| condition).as_deref(),
            Some("service-unavailable")
        );
    }

    #[test]
    fn disco_items_sets_node() {
        let stanza = disco_items("conference.example.com", Some(ns::MUC_ROOMS)).unwrap();
        let query = stanza.child("query", ns::DISCO_ITEMS).unwrap();
        assert_eq!(query.attr("node"), Some(ns::MUC_ROOMS));
        assert_eq!(stanza.to(), Some("conference.example.com"));
    }

    #[test]
    fn invalid_recipient_is_an_error() {
        assert_eq!(
            disco_info("@nowhere"),
            Err(StanzaError::InvalidJid("@nowhere".to_string()))
        );
    }
}
