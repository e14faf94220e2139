use parley_core::event::{EventEmitter, EventPayload, PresenceKind, SubscriptionState};
use parley_roster::{
    Directory,
    subscription::{self, SubscriptionRequest},
};
use parley_xmpp::{
    Stanza, StanzaError, StanzaKind, StanzaSink, jid, ns,
    stanza::child_text,
};
use tracing::{debug, warn};
use xmpp_parsers::{
    message::Lang,
    presence::{Presence, Show, Type},
    vcard_update::{Photo, VCardUpdate},
};

/// What the caller still has to do after a presence was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceOutcome {
    Ignored,
    Applied {
        /// Bare address whose vCard should be fetched again.
        refetch_vcard: Option<String>,
    },
}

impl PresenceOutcome {
    fn applied() -> Self {
        Self::Applied {
            refetch_vcard: None,
        }
    }
}

/// Borrowed state for one presence operation.
pub struct PresenceContext<'a> {
    pub directory: &'a mut Directory,
    pub sink: &'a dyn StanzaSink,
    pub events: &'a EventEmitter,
    /// Shown when a buddy is available without a status text.
    pub default_status: &'a str,
}

impl PresenceContext<'_> {
    pub fn handle_presence(&mut self, stanza: &Stanza) -> PresenceOutcome {
        if stanza.kind() != StanzaKind::Presence {
            return PresenceOutcome::Ignored;
        }
        let Some(from) = stanza.from() else {
            debug!(stanza = %stanza, "presence without sender ignored");
            return PresenceOutcome::Ignored;
        };
        if let Some(to) = stanza.to() {
            if jid::same_bare(from, to) {
                debug!(jid = %from, "own presence echo ignored");
                return PresenceOutcome::Ignored;
            }
        }

        let sender = jid::bare_jid(from);
        if !self.directory.contains(&sender) {
            warn!(from = %from, "presence from unknown sender ignored");
            return PresenceOutcome::Ignored;
        }

        match stanza.type_attr() {
            None => self.availability(&sender, from, stanza),
            Some("unavailable") => {
                self.set_presence(&sender, from, PresenceKind::Unavailable, None);
                self.roster_changed();
                PresenceOutcome::applied()
            }
            Some("subscribe") => {
                self.send(subscription::request(&sender, SubscriptionRequest::Subscribed));
                self.send(subscription::request(&sender, SubscriptionRequest::Subscribe));
                self.transition(&sender, SubscriptionRequest::Subscribe);
                self.roster_changed();
                PresenceOutcome::applied()
            }
            Some(kind) => match SubscriptionRequest::parse(kind) {
                Some(request) => {
                    self.transition(&sender, request);
                    self.roster_changed();
                    PresenceOutcome::applied()
                }
                None if kind == "error" => {
                    warn!(jid = %sender, condition = ?stanza.error_condition(), "presence error");
                    PresenceOutcome::Ignored
                }
                None => {
                    debug!(jid = %sender, kind, "presence type ignored");
                    PresenceOutcome::Ignored
                }
            },
        }
    }

    fn availability(&mut self, sender: &str, from: &str, stanza: &Stanza) -> PresenceOutcome {
        let element = stanza.element();
        let show = child_text(element, "show", ns::CLIENT);
        let status = child_text(element, "status", ns::CLIENT);
        let profile_hint = stanza.child("x", ns::VCARD_UPDATE).is_some();

        let refetch_vcard = profile_hint.then(|| sender.to_string());
        if profile_hint && show.is_none() && status.is_none() {
            debug!(jid = %sender, "profile change hinted");
            return PresenceOutcome::Applied { refetch_vcard };
        }

        let kind = show
            .as_deref()
            .and_then(|show| PresenceKind::from_show(show.trim()))
            .unwrap_or(PresenceKind::Available);
        let status = status
            .map(|status| status.trim().to_string())
            .filter(|status| !status.is_empty())
            .unwrap_or_else(|| self.default_status.to_string());

        self.set_presence(sender, from, kind, Some(status));
        self.roster_changed();
        PresenceOutcome::Applied { refetch_vcard }
    }

    fn set_presence(
        &mut self,
        sender: &str,
        from: &str,
        presence: PresenceKind,
        status: Option<String>,
    ) {
        let Some(buddy) = self.directory.get_mut(sender) else {
            return;
        };
        let resource = jid::resource_part(from);
        if presence == PresenceKind::Unavailable {
            if buddy.resource == resource {
                buddy.resource = None;
            }
        } else if resource.is_some() {
            buddy.resource = resource;
        }
        buddy.presence = presence;
        buddy.status = status.clone();

        debug!(jid = %sender, ?presence, "buddy presence changed");
        self.events.emit(
            "xmpp.presence.changed",
            EventPayload::PresenceChanged {
                jid: sender.to_string(),
                presence,
                status,
            },
        );
    }

    fn transition(&mut self, sender: &str, request: SubscriptionRequest) {
        let Some(buddy) = self.directory.get_mut(sender) else {
            return;
        };
        let mut next = subscription::after_incoming(buddy.subscription, request);
        if request == SubscriptionRequest::Subscribe {
            // We answered with our own subscribe.
            next = subscription::after_outgoing(next, SubscriptionRequest::Subscribe);
        }
        self.update_subscription(sender, next);
    }

    fn update_subscription(&mut self, address: &str, next: SubscriptionState) {
        let Some(buddy) = self.directory.get_mut(address) else {
            return;
        };
        if buddy.subscription == next {
            return;
        }
        debug!(jid = %buddy.jid, from = ?buddy.subscription, to = ?next, "subscription changed");
        buddy.subscription = next;
        let jid = buddy.jid.clone();
        self.events.emit(
            "xmpp.subscription.changed",
            EventPayload::SubscriptionChanged {
                jid,
                subscription: next,
            },
        );
    }

    /// Asks to see `to`'s availability.
    pub fn subscribe(&mut self, to: &str) -> bool {
        self.request(to, SubscriptionRequest::Subscribe)
    }

    /// Stops watching `to` and withdraws the permission we gave.
    pub fn unsubscribe(&mut self, to: &str) -> bool {
        let withdrawn = self.request(to, SubscriptionRequest::Unsubscribed);
        self.request(to, SubscriptionRequest::Unsubscribe) && withdrawn
    }

    fn request(&mut self, to: &str, request: SubscriptionRequest) -> bool {
        if !self.send(subscription::request(to, request)) {
            return false;
        }
        let Some(current) = self.directory.get(to).map(|buddy| buddy.subscription) else {
            debug!(jid = %to, kind = request.as_str(), "subscription request to address outside roster");
            return true;
        };
        self.update_subscription(to, subscription::after_outgoing(current, request));
        true
    }

    /// One snapshot of the whole directory.
    pub fn roster_changed(&self) {
        self.events.emit(
            "xmpp.roster.changed",
            EventPayload::RosterChanged {
                entries: self.directory.entries(),
            },
        );
    }

    fn send(&self, stanza: Result<Stanza, StanzaError>) -> bool {
        let result = stanza
            .map_err(|error| error.to_string())
            .and_then(|stanza| self.sink.send(stanza).map_err(|error| error.to_string()));
        match result {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, "presence not sent");
                false
            }
        }
    }
}

fn wire_show(kind: PresenceKind) -> Option<Show> {
    match kind {
        PresenceKind::Chat => Some(Show::Chat),
        PresenceKind::Away => Some(Show::Away),
        PresenceKind::ExtendedAway => Some(Show::Xa),
        PresenceKind::DoNotDisturb => Some(Show::Dnd),
        PresenceKind::Unset | PresenceKind::Available | PresenceKind::Unavailable => None,
    }
}

/// `vcard-temp:x:update` for a hex SHA-1 photo hash.
fn photo_update(hash: &str) -> Option<VCardUpdate> {
    let data = hex::decode(hash.trim())
        .ok()
        .and_then(|bytes| <[u8; 20]>::try_from(bytes).ok());
    if data.is_none() {
        warn!(hash, "photo hash is not a SHA-1 digest, left out of presence");
        return None;
    }
    Some(VCardUpdate {
        photo: Some(Photo { data }),
    })
}

/// Our own broadcast presence. `photo_hash` re-announces the vCard photo
/// under `vcard-temp:x:update`.
pub fn own_presence(
    kind: PresenceKind,
    status: Option<&str>,
    photo_hash: Option<&str>,
) -> Result<Stanza, StanzaError> {
    let mut presence = if kind == PresenceKind::Unavailable {
        Presence::new(Type::Unavailable)
    } else {
        Presence::new(Type::None)
    };
    presence.show = wire_show(kind);
    if let Some(status) = status.filter(|status| !status.is_empty()) {
        presence.statuses.insert(Lang::new(), status.to_string());
    }
    if let Some(update) = photo_hash.and_then(photo_update) {
        presence.payloads.push(update.into());
    }
    Ok(presence.into())
}

/// Builds and sends our presence. Failures are logged only.
pub fn send_own_presence(
    sink: &dyn StanzaSink,
    kind: PresenceKind,
    status: Option<&str>,
    photo_hash: Option<&str>,
) -> bool {
    let result = own_presence(kind, status, photo_hash)
        .map_err(|error| error.to_string())
        .and_then(|stanza| sink.send(stanza).map_err(|error| error.to_string()));
    match result {
        Ok(()) => {
            debug!(?kind, "own presence sent");
            true
        }
        Err(error) => {
            warn!(?kind, %error, "own presence not sent");
            false
        }
    }
}
