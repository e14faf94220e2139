//! Session lifecycle for parley: owns the XMPP connection, routes inbound
//! stanzas, correlates requests and exposes a command handle to the UI.

mod command;
mod error;
mod handlers;
mod manager;
mod state;
mod sync;

pub use command::{Command, SessionHandle};
pub use error::{Result, SessionError};
pub use manager::SessionManager;
pub use state::{Collaborators, NoActiveConversation, Snapshot, TimerEvent};
