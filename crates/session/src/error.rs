use parley_xmpp::ConnectionError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("missing connection settings: {}", fields.join(", "))]
    Configuration { fields: Vec<String> },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("session task has stopped")]
    Closed,
}

pub type Result<T> = std::result::Result<T, SessionError>;
