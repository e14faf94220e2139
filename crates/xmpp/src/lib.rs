pub mod disco;
pub mod dispatcher;
pub mod error;
pub mod iq;
pub mod jid;
pub mod ns;
pub mod registry;
pub mod responders;
pub mod sasl;
pub mod sink;
pub mod stanza;
pub mod timer;
pub mod transport;

pub use dispatcher::{Dispatch, Dispatcher, Handler};
pub use error::{ConnectionError, RegistryError, RequestError, StanzaError};
pub use registry::{Correlator, RequestRegistry, dispatch_response, expire_requests, send_request};
pub use sasl::SelectedMechanism;
pub use sink::{Outbox, StanzaSink, stanza_channel};
pub use stanza::{IqType, Stanza, StanzaKind};
pub use timer::ScheduledTask;
pub use transport::{TransportConfig, XmppTransport};

#[cfg(feature = "native")]
pub use transport::WebSocketTransport;
