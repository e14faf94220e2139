//! Inbound message handling and the messages we originate.
//!
//! Every inbound `<message/>` is decoded once into a [`MessageNotice`] and
//! then applied by [`MessageContext::handle_message`]. Records live in a
//! [`MessageStore`] keyed by message id.

pub mod notice;
pub mod outbound;
pub mod pipeline;
pub mod store;

pub use notice::{DecodeError, Envelope, MessageNotice, PlainMessage, decode};
pub use outbound::OutgoingMessage;
pub use pipeline::{ConversationView, MessageContext, MessageOutcome, PauseScheduler};
pub use store::{Direction, InMemoryMessageStore, MessageRecord, MessageStore};
