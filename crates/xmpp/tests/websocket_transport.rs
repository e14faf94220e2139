#![cfg(feature = "native")]

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use futures::{SinkExt, StreamExt};
use parley_xmpp::{ConnectionError, TransportConfig, WebSocketTransport, XmppTransport};
use tokio::net::TcpListener;
use xmpp_parsers::minidom::Element;
use tokio_tungstenite::{
    WebSocketStream, accept_hdr_async,
    tungstenite::{
        Message,
        handshake::server::{ErrorResponse, Request, Response},
        http::HeaderValue,
    },
};

const FEATURES_SASL: &str = "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>\
    <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism></mechanisms>\
    </stream:features>";
const FEATURES_BIND: &str = "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>\
    <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></stream:features>";
const OPEN: &str =
    "<open xmlns='urn:ietf:params:xml:ns:xmpp-framing' from='example.com' id='s1' version='1.0'/>";

type ServerSocket = WebSocketStream<tokio::net::TcpStream>;

async fn read_text(socket: &mut ServerSocket) -> String {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("client should send within timeout")
            .expect("stream should not end")
            .expect("frame should be valid");
        if let Message::Text(text) = message {
            return text.as_str().to_string();
        }
    }
}

async fn write_text(socket: &mut ServerSocket, text: &str) {
    socket
        .send(Message::Text(text.to_string().into()))
        .await
        .expect("server send");
}

async fn read_element(socket: &mut ServerSocket) -> Element {
    read_text(socket)
        .await
        .parse()
        .expect("client should send well-formed XML")
}

async fn accept(listener: &TcpListener) -> ServerSocket {
    let (stream, _) = listener.accept().await.expect("accept");
    accept_hdr_async(stream, |request: &Request, mut response: Response| {
        let offered = request
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if offered != "xmpp" {
            return Err(ErrorResponse::new(Some("xmpp subprotocol required".to_string())));
        }
        response
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("xmpp"));
        Ok(response)
    })
    .await
    .expect("websocket handshake")
}

/// Runs the server half of login. Returns the decoded SASL payload.
async fn serve_login(socket: &mut ServerSocket, accept_credentials: bool) -> Vec<u8> {
    let open = read_element(socket).await;
    assert_eq!(open.name(), "open");
    assert_eq!(open.attr("to"), Some("example.com"));
    write_text(socket, OPEN).await;
    write_text(socket, FEATURES_SASL).await;

    let auth = read_element(socket).await;
    assert_eq!(auth.attr("mechanism"), Some("PLAIN"));
    let credentials = BASE64.decode(auth.text()).expect("base64 payload");

    if !accept_credentials {
        write_text(
            socket,
            "<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><not-authorized/></failure>",
        )
        .await;
        return credentials;
    }
    write_text(socket, "<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>").await;

    let reopen = read_element(socket).await;
    assert_eq!(reopen.name(), "open");
    write_text(socket, OPEN).await;
    write_text(socket, FEATURES_BIND).await;

    let bind = read_element(socket).await;
    let query = bind
        .get_child("bind", "urn:ietf:params:xml:ns:xmpp-bind")
        .expect("bind payload");
    assert_eq!(
        query
            .get_child("resource", "urn:ietf:params:xml:ns:xmpp-bind")
            .map(Element::text)
            .as_deref(),
        Some("parley")
    );
    let id = bind.attr("id").expect("bind id").to_string();
    write_text(
        socket,
        &format!(
            "<iq xmlns='jabber:client' type='result' id='{id}'>\
               <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><jid>alice@example.com/parley</jid></bind>\
             </iq>"
        ),
    )
    .await;
    credentials
}

fn config(uri: String, password: &str) -> TransportConfig {
    TransportConfig {
        uri,
        domain: "example.com".to_string(),
        username: "alice".to_string(),
        password: password.to_string(),
        resource: Some("parley".to_string()),
        timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn logs_in_binds_and_exchanges_stanzas() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let uri = format!("ws://{}/ws", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        let credentials = serve_login(&mut socket, true).await;

        let outbound = read_text(&mut socket).await;
        assert!(outbound.contains("<body>hello</body>"));

        write_text(&mut socket, OPEN).await;
        write_text(
            &mut socket,
            "<message xmlns='jabber:client' from='bob@example.com/x' id='m2'><body>hi</body></message>",
        )
        .await;

        let close = read_text(&mut socket).await;
        assert!(close.starts_with("<close"));
        credentials
    });

    let mut transport = WebSocketTransport::connect(&config(uri, "secret"))
        .await
        .expect("login should succeed");
    assert_eq!(transport.bound_jid(), Some("alice@example.com/parley"));

    transport
        .send(b"<message xmlns='jabber:client' to='bob@example.com' id='m1'><body>hello</body></message>")
        .await
        .unwrap();

    let inbound = transport.recv().await.unwrap();
    let inbound = String::from_utf8(inbound).unwrap();
    assert!(inbound.contains("id='m2'") || inbound.contains("id=\"m2\""));

    transport.close().await.unwrap();

    let credentials = server.await.unwrap();
    assert_eq!(credentials, b"\0alice\0secret".to_vec());
}

#[tokio::test]
async fn rejected_credentials_fail_without_retry() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let uri = format!("ws://{}/ws", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        serve_login(&mut socket, false).await;
    });

    let error = WebSocketTransport::connect(&config(uri, "wrong"))
        .await
        .unwrap_err();
    assert!(matches!(error, ConnectionError::AuthenticationFailed(_)));
    assert!(!error.is_retryable());
    server.await.unwrap();
}

#[tokio::test]
async fn unreachable_endpoint_reports_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let uri = format!("ws://{}/ws", listener.local_addr().unwrap());
    drop(listener);

    let error = WebSocketTransport::connect(&config(uri, "secret"))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        ConnectionError::TransportError(_) | ConnectionError::DnsResolutionFailed(_)
    ));
}
