use std::time::Duration;

use xmpp_parsers::{minidom::Element, websocket::Open};

use crate::{error::ConnectionError, jid, ns};

/// Everything a transport needs to open an authenticated, bound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// WebSocket endpoint, e.g. `wss://chat.example.com:5443/ws`.
    pub uri: String,
    pub domain: String,
    /// SASL authentication id.
    pub username: String,
    pub password: String,
    pub resource: Option<String>,
    pub timeout: Duration,
}

/// A connected, authenticated XMPP stream that moves whole stanzas.
///
/// `recv` yields one top-level element per call. Stream framing elements are
/// consumed by the transport and never surface.
pub trait XmppTransport: Send + Sized + 'static {
    fn connect(
        config: &TransportConfig,
    ) -> impl Future<Output = Result<Self, ConnectionError>> + Send;

    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    fn recv(&mut self) -> impl Future<Output = Result<Vec<u8>, ConnectionError>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Full JID assigned by resource binding.
    fn bound_jid(&self) -> Option<&str>;
}

/// RFC 7395 framing element carried in its own WebSocket message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Open,
    Close,
}

pub fn open_frame(domain: &str) -> Result<Element, ConnectionError> {
    let to = jid::parse_bare(domain)
        .map_err(|error| ConnectionError::StreamError(error.to_string()))?;
    Ok(Open::new(to).into())
}

pub fn close_frame() -> Element {
    Element::bare("close", ns::FRAMING)
}

/// Serialized form of an element, as sent in one WebSocket message.
pub fn frame_text(element: &Element) -> Result<String, ConnectionError> {
    let mut buffer = Vec::new();
    element
        .write_to(&mut buffer)
        .map_err(|error| ConnectionError::TransportError(error.to_string()))?;
    String::from_utf8(buffer).map_err(|error| ConnectionError::TransportError(error.to_string()))
}

/// Recognizes `<open/>` and `<close/>` without a full parse of ordinary stanzas.
pub fn framing_of(text: &str) -> Option<Framing> {
    let trimmed = text.trim_start();
    if !trimmed.starts_with("<open") && !trimmed.starts_with("<close") {
        return None;
    }
    let element = trimmed.parse::<Element>().ok()?;
    if element.ns() != ns::FRAMING {
        return None;
    }
    match element.name() {
        "open" => Some(Framing::Open),
        "close" => Some(Framing::Close),
        _ => None,
    }
}

#[cfg(feature = "native")]
mod native {
    use std::str::FromStr;

    use futures::{SinkExt, StreamExt};
    use tokio::{net::TcpStream, time::timeout};
    use tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async,
        tungstenite::{Message, client::IntoClientRequest, http::HeaderValue},
    };
    use tracing::{debug, info, warn};
    use xmpp_parsers::{bind::BindQuery, iq::Iq};

    use super::*;
    use crate::{
        sasl::{SaslNegotiation, SaslStep, offered_mechanisms},
        stanza::{find_child, new_id},
    };

    const SUBPROTOCOL: &str = "xmpp";

    fn map_websocket_error(error: tokio_tungstenite::tungstenite::Error) -> ConnectionError {
        let message = error.to_string();
        let lower = message.to_ascii_lowercase();
        if lower.contains("dns")
            || lower.contains("resolve")
            || lower.contains("failed to lookup")
        {
            ConnectionError::DnsResolutionFailed(message)
        } else if lower.contains("tls") || lower.contains("certificate") {
            ConnectionError::TlsHandshakeFailed(message)
        } else {
            ConnectionError::TransportError(message)
        }
    }

    pub struct WebSocketTransport {
        socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
        bound_jid: Option<String>,
    }

    impl std::fmt::Debug for WebSocketTransport {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("WebSocketTransport")
                .field("bound_jid", &self.bound_jid)
                .finish_non_exhaustive()
        }
    }

    impl WebSocketTransport {
        async fn send_text(&mut self, text: String) -> Result<(), ConnectionError> {
            debug!(data = %text, "ws send");
            self.socket
                .send(Message::Text(text.into()))
                .await
                .map_err(map_websocket_error)
        }

        async fn send_element(&mut self, element: &Element) -> Result<(), ConnectionError> {
            self.send_text(frame_text(element)?).await
        }

        /// Next text frame, skipping control frames.
        async fn next_text(&mut self) -> Result<String, ConnectionError> {
            loop {
                let message = self
                    .socket
                    .next()
                    .await
                    .ok_or_else(|| {
                        ConnectionError::StreamError("websocket closed by peer".to_string())
                    })?
                    .map_err(map_websocket_error)?;

                match message {
                    Message::Text(text) => return Ok(text.as_str().to_string()),
                    Message::Binary(bytes) => {
                        return String::from_utf8(bytes.to_vec()).map_err(|error| {
                            ConnectionError::StreamError(format!(
                                "non UTF-8 websocket payload: {error}"
                            ))
                        });
                    }
                    Message::Close(_) => {
                        return Err(ConnectionError::StreamError(
                            "websocket closed by peer".to_string(),
                        ));
                    }
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                }
            }
        }

        /// Next element during negotiation. Skips `<open/>`.
        async fn next_element(&mut self) -> Result<Element, ConnectionError> {
            loop {
                let text = self.next_text().await?;
                match framing_of(&text) {
                    Some(Framing::Open) => continue,
                    Some(Framing::Close) => {
                        return Err(ConnectionError::StreamError(
                            "server closed the stream during negotiation".to_string(),
                        ));
                    }
                    None => {}
                }
                let element = Element::from_str(text.trim()).map_err(|error| {
                    ConnectionError::StreamError(format!("invalid element from server: {error}"))
                })?;
                if element.name() == "error" && element.ns() == ns::STREAM {
                    let condition = element
                        .children()
                        .next()
                        .map(|child| child.name().to_string())
                        .unwrap_or_else(|| "undefined-condition".to_string());
                    return Err(ConnectionError::StreamError(condition));
                }
                return Ok(element);
            }
        }

        async fn open_stream(&mut self, domain: &str) -> Result<Element, ConnectionError> {
            self.send_element(&open_frame(domain)?).await?;
            let features = self.next_element().await?;
            if features.name() != "features" {
                return Err(ConnectionError::StreamError(format!(
                    "expected stream features, got <{}/>",
                    features.name()
                )));
            }
            Ok(features)
        }

        async fn authenticate(
            &mut self,
            features: &Element,
            config: &TransportConfig,
        ) -> Result<(), ConnectionError> {
            let offered = offered_mechanisms(features);
            let (mut negotiation, auth) =
                SaslNegotiation::start(&offered, &config.username, &config.password)?;
            self.send_element(&auth).await?;

            loop {
                let answer = self.next_element().await?;
                match negotiation.step(&answer)? {
                    SaslStep::Respond(response) => self.send_element(&response).await?,
                    SaslStep::Success => return Ok(()),
                }
            }
        }

        async fn bind(&mut self, resource: Option<&str>) -> Result<String, ConnectionError> {
            let id = new_id();
            let request: Element =
                Iq::from_set(id.clone(), BindQuery::new(resource.map(str::to_string))).into();
            self.send_element(&request).await?;

            loop {
                let reply = self.next_element().await?;
                if reply.name() != "iq" || reply.attr("id") != Some(id.as_str()) {
                    warn!(element = reply.name(), "ignoring element while binding");
                    continue;
                }
                if reply.attr("type") != Some("result") {
                    return Err(ConnectionError::StreamError(
                        "resource binding rejected".to_string(),
                    ));
                }
                return find_child(&reply, "bind", ns::BIND)
                    .and_then(|bind| find_child(bind, "jid", ns::BIND))
                    .map(|jid| jid.text().trim().to_string())
                    .filter(|jid| !jid.is_empty())
                    .ok_or_else(|| {
                        ConnectionError::StreamError("bind result without a JID".to_string())
                    });
            }
        }

        async fn negotiate(&mut self, config: &TransportConfig) -> Result<(), ConnectionError> {
            let features = self.open_stream(&config.domain).await?;
            self.authenticate(&features, config).await?;
            self.open_stream(&config.domain).await?;
            let jid = self.bind(config.resource.as_deref()).await?;
            info!(%jid, "resource bound");
            self.bound_jid = Some(jid);
            Ok(())
        }
    }

    impl XmppTransport for WebSocketTransport {
        async fn connect(config: &TransportConfig) -> Result<Self, ConnectionError> {
            let mut request = config
                .uri
                .as_str()
                .into_client_request()
                .map_err(map_websocket_error)?;
            request
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));

            let (socket, _response) = timeout(config.timeout, connect_async(request))
                .await
                .map_err(|_| ConnectionError::Timeout)?
                .map_err(map_websocket_error)?;
            debug!(uri = %config.uri, "websocket connected");

            let mut transport = Self {
                socket,
                bound_jid: None,
            };
            timeout(config.timeout, transport.negotiate(config))
                .await
                .map_err(|_| ConnectionError::Timeout)??;
            Ok(transport)
        }

        async fn send(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
            let text = std::str::from_utf8(data).map_err(|error| {
                ConnectionError::TransportError(format!("outbound data is not UTF-8: {error}"))
            })?;
            self.send_text(text.to_string()).await
        }

        async fn recv(&mut self) -> Result<Vec<u8>, ConnectionError> {
            loop {
                let text = self.next_text().await?;
                match framing_of(&text) {
                    Some(Framing::Open) => continue,
                    Some(Framing::Close) => {
                        return Err(ConnectionError::StreamError(
                            "server closed the stream".to_string(),
                        ));
                    }
                    None => {
                        debug!(data = %text, "ws recv");
                        return Ok(text.into_bytes());
                    }
                }
            }
        }

        async fn close(&mut self) -> Result<(), ConnectionError> {
            if let Err(error) = self.send_element(&close_frame()).await {
                debug!(%error, "close frame not delivered");
            }
            self.socket.close(None).await.map_err(map_websocket_error)
        }

        fn bound_jid(&self) -> Option<&str> {
            self.bound_jid.as_deref()
        }
    }
}

#[cfg(feature = "native")]
pub use native::WebSocketTransport;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_frame_addresses_domain() {
        let frame = open_frame("Example.com").unwrap();
        assert_eq!(frame.attr("to"), Some("example.com"));
        assert_eq!(frame.attr("version"), Some("1.0"));
        assert_eq!(
            framing_of(&frame_text(&frame).unwrap()),
            Some(Framing::Open)
        );
        assert!(open_frame("@example.com").is_err());
    }

    #[test]
    fn recognizes_close() {
        assert_eq!(
            framing_of(&frame_text(&close_frame()).unwrap()),
            Some(Framing::Close)
        );
        assert_eq!(
            framing_of("<close xmlns='urn:ietf:params:xml:ns:xmpp-framing' see-other-uri='wss://x'/>"),
            Some(Framing::Close)
        );
    }

    #[test]
    fn stanzas_are_not_framing() {
        assert_eq!(framing_of("<message xmlns='jabber:client'/>"), None);
        assert_eq!(framing_of("<open xmlns='jabber:client'/>"), None);
        assert_eq!(framing_of("<openness/>"), None);
        assert_eq!(framing_of("<open"), None);
    }
}
