use std::time::Duration;

use chrono::Utc;
use parley_core::event::{ChatMessage, ChatState, DeliveryState, EventEmitter, EventPayload};
use parley_roster::Directory;
use parley_xmpp::{ScheduledTask, Stanza, StanzaSink, jid};
use tracing::{debug, warn};

use crate::{
    notice::{Envelope, MessageNotice, PlainMessage, decode},
    outbound::{self, OutgoingMessage},
    store::{Direction, MessageRecord, MessageStore},
};

/// The UI's answer to "is this conversation on screen right now".
#[cfg_attr(test, mockall::automock)]
pub trait ConversationView: Send + Sync {
    fn is_active(&self, jid: &str) -> bool;
}

/// Arms the typing-pause timer for one buddy. The firing must call
/// [`MessageContext::pause_composing`] with the same `generation`.
pub trait PauseScheduler {
    fn schedule_pause(
        &self,
        jid: &str,
        thread: Option<String>,
        generation: u64,
        delay: Duration,
    ) -> ScheduledTask;
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Undecodable,
    UnknownSender,
    Composing,
    StaleComposing,
    Corrected,
    CorrectionIgnored,
    ReceiptApplied,
    ReceiptIgnored,
    Received { displayed: bool },
    Duplicate,
    EmptyBody,
    MissingId,
}

/// Everything the pipeline touches, borrowed for one operation.
pub struct MessageContext<'a> {
    pub directory: &'a mut Directory,
    pub store: &'a mut dyn MessageStore,
    pub sink: &'a dyn StanzaSink,
    pub events: &'a EventEmitter,
    pub view: &'a dyn ConversationView,
    pub own_jid: Option<&'a str>,
}

impl MessageContext<'_> {
    pub fn handle_message(&mut self, stanza: &Stanza) -> MessageOutcome {
        let (envelope, notice) = match decode(stanza, Utc::now()) {
            Ok(decoded) => decoded,
            Err(error) => {
                warn!(%error, stanza = %stanza, "message dropped");
                return MessageOutcome::Undecodable;
            }
        };

        let sender = envelope.sender();
        let Some(buddy) = self.directory.get_mut(&sender) else {
            warn!(from = %envelope.from, "message from unknown sender dropped");
            return MessageOutcome::UnknownSender;
        };
        if let Some(resource) = jid::resource_part(&envelope.from) {
            buddy.resource = Some(resource);
        }

        if let MessageNotice::Composing { delayed } = notice {
            if delayed {
                debug!(jid = %sender, "delayed typing notice ignored");
                return MessageOutcome::StaleComposing;
            }
            buddy.chat_state = ChatState::Composing;
            self.events.emit(
                "xmpp.chatstate.changed",
                EventPayload::ComposingChanged {
                    jid: sender,
                    state: ChatState::Composing,
                },
            );
            return MessageOutcome::Composing;
        }

        let cleared = match envelope.chat_state {
            Some(ChatState::Paused) => ChatState::Paused,
            _ => ChatState::Active,
        };
        buddy.chat_state = cleared;
        self.events.emit(
            "xmpp.chatstate.changed",
            EventPayload::ComposingChanged {
                jid: sender.clone(),
                state: cleared,
            },
        );

        match notice {
            MessageNotice::Composing { .. } => MessageOutcome::Composing,
            MessageNotice::Correction { target, body } => self.apply_correction(&sender, target, body),
            MessageNotice::Receipt { target, state } => self.apply_receipt(&sender, target, state),
            MessageNotice::Plain(plain) => self.receive(&sender, &envelope, plain, stanza),
        }
    }

    fn apply_correction(
        &mut self,
        sender: &str,
        target: String,
        body: Option<String>,
    ) -> MessageOutcome {
        let Some(body) = body else {
            warn!(jid = %sender, id = %target, "correction without body ignored");
            return MessageOutcome::CorrectionIgnored;
        };
        let Some(record) = self
            .store
            .get_mut(&target)
            .filter(|record| record.peer == sender)
        else {
            debug!(jid = %sender, id = %target, "correction for unknown message ignored");
            return MessageOutcome::CorrectionIgnored;
        };

        record.body = body.clone();
        record.corrected = true;
        debug!(jid = %sender, id = %target, "message corrected");
        self.events.emit(
            "xmpp.message.corrected",
            EventPayload::MessageCorrected {
                jid: sender.to_string(),
                id: target,
                body,
            },
        );
        MessageOutcome::Corrected
    }

    fn apply_receipt(&mut self, sender: &str, target: String, state: DeliveryState) -> MessageOutcome {
        let Some(record) = self
            .store
            .get_mut(&target)
            .filter(|record| record.peer == sender)
        else {
            debug!(jid = %sender, id = %target, "receipt for unknown message ignored");
            return MessageOutcome::ReceiptIgnored;
        };

        if !record.advance(state) {
            debug!(jid = %sender, id = %target, current = ?record.delivery, ?state, "stale receipt ignored");
            return MessageOutcome::ReceiptIgnored;
        }

        self.events.emit(
            "xmpp.message.delivery",
            EventPayload::MessageDeliveryChanged {
                jid: sender.to_string(),
                id: target,
                state,
            },
        );
        MessageOutcome::ReceiptApplied
    }

    fn receive(
        &mut self,
        sender: &str,
        envelope: &Envelope,
        plain: PlainMessage,
        stanza: &Stanza,
    ) -> MessageOutcome {
        let Some(body) = plain.body else {
            warn!(jid = %sender, stanza = %stanza, "message without body dropped");
            return MessageOutcome::EmptyBody;
        };
        let Some(id) = plain.id else {
            warn!(jid = %sender, stanza = %stanza, "message without id dropped");
            return MessageOutcome::MissingId;
        };

        if self.store.contains(&id) {
            debug!(jid = %sender, %id, "duplicate message acknowledged again");
            self.send_receipt(outbound::delivery_receipt(&envelope.from, &id));
            return MessageOutcome::Duplicate;
        }

        self.store.insert(MessageRecord {
            id: id.clone(),
            peer: sender.to_string(),
            direction: Direction::Incoming,
            body: body.clone(),
            thread: plain.thread.clone(),
            timestamp: envelope.timestamp,
            delivery: DeliveryState::Delivered,
            corrected: false,
        });

        let to = envelope
            .to
            .clone()
            .or_else(|| self.own_jid.map(str::to_string))
            .unwrap_or_default();
        self.events.emit(
            "xmpp.message.received",
            EventPayload::MessageReceived {
                message: ChatMessage {
                    id: id.clone(),
                    from: envelope.from.clone(),
                    to,
                    body,
                    thread: plain.thread,
                    timestamp: envelope.timestamp,
                    message_type: plain.message_type,
                    delayed: envelope.delayed,
                },
            },
        );
        self.send_receipt(outbound::delivery_receipt(&envelope.from, &id));

        if !self.view.is_active(sender) {
            return MessageOutcome::Received { displayed: false };
        }

        if let Some(record) = self.store.get_mut(&id) {
            record.advance(DeliveryState::Displayed);
        }
        self.send_receipt(outbound::display_receipt(&envelope.from, &id));
        MessageOutcome::Received { displayed: true }
    }

    fn send_receipt(&self, receipt: Result<Stanza, parley_xmpp::StanzaError>) {
        let result = receipt
            .map_err(|error| error.to_string())
            .and_then(|stanza| self.sink.send(stanza).map_err(|error| error.to_string()));
        if let Err(error) = result {
            warn!(%error, "receipt not sent");
        }
    }

    /// Sends `outgoing` and records it. A failed send is recorded as
    /// [`DeliveryState::Failed`] and not retried.
    pub fn send_message(&mut self, outgoing: OutgoingMessage) -> DeliveryState {
        let peer = jid::bare_jid(&outgoing.to);
        if let Some(buddy) = self.directory.get_mut(&peer) {
            buddy.compose.clear();
        }

        let sent = outbound::message(&outgoing)
            .map_err(|error| error.to_string())
            .and_then(|stanza| self.sink.send(stanza).map_err(|error| error.to_string()));
        let state = match sent {
            Ok(()) => DeliveryState::Sent,
            Err(error) => {
                warn!(
                    jid = %peer,
                    id = %outgoing.id,
                    kind = outgoing.message_type.as_str(),
                    %error,
                    "message send failed"
                );
                DeliveryState::Failed
            }
        };

        let recorded = self.store.insert(MessageRecord {
            id: outgoing.id.clone(),
            peer: peer.clone(),
            direction: Direction::Outgoing,
            body: outgoing.body,
            thread: outgoing.thread,
            timestamp: Utc::now(),
            delivery: state,
            corrected: false,
        });
        if !recorded {
            warn!(id = %outgoing.id, "message id reused, earlier record kept");
        }

        self.events.emit(
            "xmpp.message.delivery",
            EventPayload::MessageDeliveryChanged {
                jid: peer,
                id: outgoing.id,
                state,
            },
        );
        state
    }

    /// Re-arms the pause timer and announces typing if not already doing so.
    pub fn start_composing(
        &mut self,
        to: &str,
        thread: Option<String>,
        scheduler: &dyn PauseScheduler,
        pause_after: Duration,
    ) -> bool {
        let Some(buddy) = self.directory.get_mut(to) else {
            warn!(jid = %to, "typing notice to unknown buddy not sent");
            return false;
        };

        let address = buddy.jid.clone();
        let timer_thread = thread.clone();
        buddy.compose.rearm(|generation| {
            scheduler.schedule_pause(&address, timer_thread, generation, pause_after)
        });

        if buddy.compose.state == ChatState::Composing {
            return true;
        }
        buddy.compose.state = ChatState::Composing;
        self.send_chat_state(&address, ChatState::Composing, thread.as_deref());
        true
    }

    /// Timer callback. Ignored unless `generation` is still current.
    pub fn pause_composing(&mut self, to: &str, thread: Option<&str>, generation: u64) -> bool {
        let Some(buddy) = self.directory.get_mut(to) else {
            return false;
        };
        if buddy.compose.generation != generation {
            debug!(jid = %to, generation, current = buddy.compose.generation, "stale pause ignored");
            return false;
        }

        buddy.compose.timer = None;
        if buddy.compose.state == ChatState::Paused {
            return false;
        }
        buddy.compose.state = ChatState::Paused;
        let address = buddy.jid.clone();
        self.send_chat_state(&address, ChatState::Paused, thread);
        true
    }

    fn send_chat_state(&self, to: &str, state: ChatState, thread: Option<&str>) {
        let result = outbound::chat_state(to, state, thread)
            .map_err(|error| error.to_string())
            .and_then(|stanza| self.sink.send(stanza).map_err(|error| error.to_string()));
        if let Err(error) = result {
            warn!(jid = %to, state = state.as_str(), %error, "chat state not sent");
        }
    }
}
