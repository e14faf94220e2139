//! Routes inbound stanzas to handlers by kind, payload namespace and IQ type.

use tracing::{debug, warn};

use crate::stanza::{IqType, Stanza, StanzaKind};

/// Handler signature. The return value acknowledges consumption.
pub type Handler<C> = fn(&mut C, &Stanza) -> bool;

struct Route<C> {
    kind: StanzaKind,
    namespace: Option<&'static str>,
    iq_type: Option<IqType>,
    handler: Handler<C>,
}

impl<C> Route<C> {
    fn matches(&self, stanza: &Stanza) -> bool {
        if self.kind != stanza.kind() {
            return false;
        }
        if self
            .iq_type
            .is_some_and(|iq_type| stanza.iq_type() != Some(iq_type))
        {
            return false;
        }
        match self.namespace {
            Some(namespace) if stanza.kind() == StanzaKind::Iq => {
                stanza.payload_ns().as_deref() == Some(namespace)
            }
            Some(namespace) => stanza.has_child_ns(namespace),
            None => true,
        }
    }
}

/// Outcome of dispatching one stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler consumed it.
    Handled,
    /// An IQ get/set nobody handles. Callers should answer with an error.
    UnhandledRequest,
    /// Dropped with a warning.
    Dropped,
}

/// Static routing table built once per connection.
pub struct Dispatcher<C> {
    routes: Vec<Route<C>>,
    response_handler: Option<Handler<C>>,
}

impl<C> Default for Dispatcher<C> {
    fn default() -> Self {
        Self {
            routes: Vec::new(),
            response_handler: None,
        }
    }
}

impl<C> Dispatcher<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles IQ requests of `iq_type` whose payload is in `namespace`.
    pub fn on_request(
        mut self,
        iq_type: IqType,
        namespace: &'static str,
        handler: Handler<C>,
    ) -> Self {
        self.routes.push(Route {
            kind: StanzaKind::Iq,
            namespace: Some(namespace),
            iq_type: Some(iq_type),
            handler,
        });
        self
    }

    /// Handles every stanza of `kind`. Registered after more specific
    /// routes, it acts as the fallback for that kind.
    pub fn on_kind(mut self, kind: StanzaKind, handler: Handler<C>) -> Self {
        self.routes.push(Route {
            kind,
            namespace: None,
            iq_type: None,
            handler,
        });
        self
    }

    /// Handles stanzas of `kind` carrying a child in `namespace`.
    pub fn on_namespace(
        mut self,
        kind: StanzaKind,
        namespace: &'static str,
        handler: Handler<C>,
    ) -> Self {
        self.routes.push(Route {
            kind,
            namespace: Some(namespace),
            iq_type: None,
            handler,
        });
        self
    }

    /// Receives IQ results and errors, normally the request registry.
    pub fn on_response(mut self, handler: Handler<C>) -> Self {
        self.response_handler = Some(handler);
        self
    }

    pub fn dispatch(&self, ctx: &mut C, stanza: &Stanza) -> Dispatch {
        if stanza.kind() == StanzaKind::Iq {
            match stanza.iq_type() {
                Some(IqType::Result | IqType::Error) => {
                    let handled = self
                        .response_handler
                        .is_some_and(|handler| handler(ctx, stanza));
                    if handled {
                        return Dispatch::Handled;
                    }
                    warn!(stanza = %stanza, "unmatched IQ response dropped");
                    return Dispatch::Dropped;
                }
                Some(_) => {}
                None => {
                    warn!(stanza = %stanza, "IQ without a valid type dropped");
                    return Dispatch::Dropped;
                }
            }
        }

        for route in self.routes.iter().filter(|route| route.matches(stanza)) {
            if (route.handler)(ctx, stanza) {
                debug!(kind = stanza.name(), id = stanza.id(), "stanza handled");
                return Dispatch::Handled;
            }
        }

        if stanza.iq_type().is_some_and(IqType::is_request) {
            warn!(stanza = %stanza, "no handler for IQ request");
            return Dispatch::UnhandledRequest;
        }

        warn!(stanza = %stanza, "unroutable stanza dropped");
        Dispatch::Dropped
    }

    /// Parses raw bytes and dispatches. Parse failures are logged and dropped.
    pub fn dispatch_raw(&self, ctx: &mut C, raw: &[u8]) -> (Dispatch, Option<Stanza>) {
        match Stanza::parse(raw) {
            Ok(stanza) => (self.dispatch(ctx, &stanza), Some(stanza)),
            Err(error) => {
                warn!(
                    %error,
                    raw = %String::from_utf8_lossy(raw),
                    "unparseable inbound data dropped"
                );
                (Dispatch::Dropped, None)
            }
        }
    }
}
