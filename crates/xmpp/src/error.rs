use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("DNS resolution failed: {0}")]
    DnsResolutionFailed(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("connection timeout")]
    Timeout,

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("not connected")]
    NotConnected,
}

impl ConnectionError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ConnectionError::AuthenticationFailed(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StanzaError {
    #[error("stanza parse failed: {0}")]
    ParseFailed(String),

    #[error("unsupported top-level element <{0}/>")]
    UnknownKind(String),

    #[error("invalid address {0:?}")]
    InvalidJid(String),
}

/// Why a correlated request did not produce a result.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("no response within {0:?}")]
    Timeout(std::time::Duration),

    #[error("remote error: {condition}")]
    Remote { condition: String, text: Option<String> },

    #[error("send failed: {0}")]
    Transport(#[from] ConnectionError),

    #[error("request rejected: {0}")]
    Rejected(#[from] RegistryError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("request id {0} is already outstanding")]
    DuplicateId(String),

    #[error("request has no id")]
    MissingId,
}
