use std::str::FromStr;

use xmpp_parsers::{iq::Iq, message::Message, minidom::Element, presence::Presence};

use crate::{error::StanzaError, ns};

/// Top-level stanza kinds on a client stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StanzaKind {
    Message,
    Presence,
    Iq,
}

impl StanzaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StanzaKind::Message => "message",
            StanzaKind::Presence => "presence",
            StanzaKind::Iq => "iq",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IqType {
    Get,
    Set,
    Result,
    Error,
}

impl IqType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "get" => Some(IqType::Get),
            "set" => Some(IqType::Set),
            "result" => Some(IqType::Result),
            "error" => Some(IqType::Error),
            _ => None,
        }
    }

    pub fn is_request(self) -> bool {
        matches!(self, IqType::Get | IqType::Set)
    }
}

/// A parsed stanza. Holds the element as received so handlers can read any
/// extension payload without a second parse.
#[derive(Debug, Clone, PartialEq)]
pub struct Stanza {
    kind: StanzaKind,
    element: Element,
}

impl Stanza {
    pub fn parse(raw: &[u8]) -> Result<Self, StanzaError> {
        let xml = std::str::from_utf8(raw).map_err(|error| {
            StanzaError::ParseFailed(format!("invalid UTF-8 stanza bytes: {error}"))
        })?;
        Self::parse_str(xml)
    }

    pub fn parse_str(xml: &str) -> Result<Self, StanzaError> {
        let trimmed = xml.trim();
        if trimmed.is_empty() {
            return Err(StanzaError::ParseFailed("stanza payload is empty".to_string()));
        }

        let element = Element::from_str(trimmed).map_err(|error| {
            StanzaError::ParseFailed(format!("failed to parse stanza XML: {error}"))
        })?;
        Self::try_from(element)
    }

    pub fn kind(&self) -> StanzaKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn id(&self) -> Option<&str> {
        self.element.attr("id").filter(|id| !id.is_empty())
    }

    pub fn from(&self) -> Option<&str> {
        self.element.attr("from").filter(|from| !from.is_empty())
    }

    pub fn to(&self) -> Option<&str> {
        self.element.attr("to").filter(|to| !to.is_empty())
    }

    /// The raw `type` attribute.
    pub fn type_attr(&self) -> Option<&str> {
        self.element.attr("type")
    }

    /// `type` of an IQ, `None` for other kinds or unknown values.
    pub fn iq_type(&self) -> Option<IqType> {
        if self.kind != StanzaKind::Iq {
            return None;
        }
        self.type_attr().and_then(IqType::parse)
    }

    /// Namespace of the first child element, the IQ payload.
    pub fn payload_ns(&self) -> Option<String> {
        self.element.children().next().map(|child| child.ns())
    }

    pub fn child(&self, name: &str, namespace: &str) -> Option<&Element> {
        find_child(&self.element, name, namespace)
    }

    pub fn has_child_ns(&self, namespace: &str) -> bool {
        self.element.children().any(|child| child.ns() == namespace)
    }

    /// Defined condition of an `type='error'` stanza, e.g. `item-not-found`.
    pub fn error_condition(&self) -> Option<(String, Option<String>)> {
        let error = self.child("error", ns::CLIENT)?;
        let condition = error
            .children()
            .find(|c| c.ns() == ns::STANZAS && c.name() != "text")
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| "undefined-condition".to_string());
        let text = find_child(error, "text", ns::STANZAS)
            .map(|t| t.text())
            .filter(|t| !t.is_empty());
        Some((condition, text))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StanzaError> {
        let mut payload = Vec::new();
        self.element
            .write_to(&mut payload)
            .map_err(|error| StanzaError::ParseFailed(error.to_string()))?;
        Ok(payload)
    }

    /// Serialized form for diagnostics. Never fails.
    pub fn to_xml(&self) -> String {
        self.to_bytes()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_else(|_| format!("<{}/>", self.name()))
    }
}

impl TryFrom<Element> for Stanza {
    type Error = StanzaError;

    fn try_from(element: Element) -> Result<Self, Self::Error> {
        let kind = match element.name() {
            "message" => StanzaKind::Message,
            "presence" => StanzaKind::Presence,
            "iq" => StanzaKind::Iq,
            other => return Err(StanzaError::UnknownKind(other.to_string())),
        };
        Ok(Self { kind, element })
    }
}

impl From<Message> for Stanza {
    fn from(message: Message) -> Self {
        Self {
            kind: StanzaKind::Message,
            element: message.into(),
        }
    }
}

impl From<Presence> for Stanza {
    fn from(presence: Presence) -> Self {
        Self {
            kind: StanzaKind::Presence,
            element: presence.into(),
        }
    }
}

impl From<Iq> for Stanza {
    fn from(iq: Iq) -> Self {
        Self {
            kind: StanzaKind::Iq,
            element: iq.into(),
        }
    }
}

impl From<Stanza> for Element {
    fn from(value: Stanza) -> Self {
        value.element
    }
}

impl std::fmt::Display for Stanza {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_xml())
    }
}

pub fn find_child<'a>(element: &'a Element, name: &str, namespace: &str) -> Option<&'a Element> {
    element
        .children()
        .find(|child| child.name() == name && child.ns() == namespace)
}

/// Text of a direct child, `None` when absent or blank.
pub fn child_text(element: &Element, name: &str, namespace: &str) -> Option<String> {
    find_child(element, name, namespace)
        .map(|child| child.text())
        .filter(|text| !text.trim().is_empty())
}

/// Fresh stanza id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
