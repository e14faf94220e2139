//! Answers to server and peer queries that need no application state.

use xmpp_parsers::version::VersionResult;

use crate::{error::StanzaError, iq, ns, stanza::Stanza};

/// What we report for `jabber:iq:version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftwareVersion {
    pub name: String,
    pub version: String,
    pub os: String,
}

impl Default for SoftwareVersion {
    fn default() -> Self {
        Self {
            name: "parley".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
        }
    }
}

/// Empty result for an `urn:xmpp:ping` get, `None` for anything else.
pub fn ping_reply(request: &Stanza) -> Result<Option<Stanza>, StanzaError> {
    if request.child("ping", ns::PING).is_none() {
        return Ok(None);
    }
    iq::empty_result(request).map(Some)
}

pub fn version_reply(
    request: &Stanza,
    software: &SoftwareVersion,
) -> Result<Option<Stanza>, StanzaError> {
    if request.child("query", ns::VERSION).is_none() {
        return Ok(None);
    }
    let result = VersionResult {
        name: software.name.clone(),
        version: software.version.clone(),
        os: Some(software.os.clone()).filter(|os| !os.is_empty()),
    };
    iq::result_reply(request, result).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stanza::{IqType, child_text};

    fn request(payload: &str) -> Stanza {
        Stanza::parse_str(&format!(
            "<iq xmlns='jabber:client' type='get' id='r1' from='bob@example.com/pc' to='alice@example.com/desk'>{payload}</iq>"
        ))
        .unwrap()
    }

    #[test]
    fn answers_ping() {
        let reply = ping_reply(&request("<ping xmlns='urn:xmpp:ping'/>"))
            .unwrap()
            .unwrap();
        assert_eq!(reply.iq_type(), Some(IqType::Result));
        assert_eq!(reply.id(), Some("r1"));
        assert_eq!(reply.to(), Some("bob@example.com/pc"));
        assert_eq!(reply.from(), Some("alice@example.com/desk"));
    }

    #[test]
    fn ignores_non_ping() {
        assert!(
            ping_reply(&request("<query xmlns='jabber:iq:version'/>"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn answers_version_query() {
        let software = SoftwareVersion {
            name: "parley".into(),
            version: "1.2.3".into(),
            os: "linux".into(),
        };
        let reply = version_reply(&request("<query xmlns='jabber:iq:version'/>"), &software)
            .unwrap()
            .unwrap();

        let query = reply.child("query", ns::VERSION).unwrap();
        assert_eq!(child_text(query, "name", ns::VERSION).as_deref(), Some("parley"));
        assert_eq!(child_text(query, "version", ns::VERSION).as_deref(), Some("1.2.3"));
        assert_eq!(child_text(query, "os", ns::VERSION).as_deref(), Some("linux"));
    }
}
