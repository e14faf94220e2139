//! Addresses, parsed and normalized by `xmpp_parsers::jid`. Lookups key on
//! the normalized bare form.

pub use xmpp_parsers::jid::{BareJid, FullJid, Jid};

use crate::error::StanzaError;

pub fn parse(address: &str) -> Result<Jid, StanzaError> {
    Jid::new(address.trim()).map_err(|_| StanzaError::InvalidJid(address.to_string()))
}

pub fn parse_bare(address: &str) -> Result<BareJid, StanzaError> {
    parse(address).map(Jid::into_bare)
}

/// `user@domain/res` -> `user@domain`, normalized. Input that is not a
/// valid address is returned trimmed and lower-cased.
pub fn bare_jid(address: &str) -> String {
    match parse_bare(address) {
        Ok(bare) => bare.into_inner(),
        Err(_) => address.trim().to_lowercase(),
    }
}

pub fn resource_part(address: &str) -> Option<String> {
    parse(address)
        .ok()?
        .resource()
        .map(|resource| resource.as_str().to_string())
}

pub fn node_part(address: &str) -> Option<String> {
    parse(address)
        .ok()?
        .node()
        .map(|node| node.as_str().to_string())
}

pub fn domain_part(address: &str) -> Option<String> {
    parse(address)
        .ok()
        .map(|jid| jid.domain().as_str().to_string())
}

pub fn same_bare(a: &str, b: &str) -> bool {
    match (parse(a), parse(b)) {
        (Ok(a), Ok(b)) => a.to_bare() == b.to_bare(),
        _ => false,
    }
}

/// True when `from` is the account `own` or its server domain.
pub fn is_self_or_server(from: &str, own: &str) -> bool {
    let (Ok(from), Ok(own)) = (parse(from), parse(own)) else {
        return false;
    };
    if from.to_bare() == own.to_bare() {
        return true;
    }
    from.node().is_none()
        && from.resource().is_none()
        && from.domain().as_str() == own.domain().as_str()
}
