//! Correlated requests the session issues and what their replies do.

use parley_core::event::{EventPayload, PresenceKind};
use parley_roster::{
    OwnProfile, groups,
    items::{self, AppliedItems},
    vcard,
};
use parley_xmpp::{
    RequestError, Stanza, StanzaError, StanzaSink, disco, iq, jid, send_request, stanza::new_id,
};
use tracing::{debug, info, warn};

use crate::state::SessionState;

/// Sends `request` with the configured timeout. A build failure is logged
/// and nothing is sent.
fn correlate(
    state: &mut SessionState,
    what: &'static str,
    request: Result<Stanza, StanzaError>,
    on_success: impl FnOnce(&mut SessionState, Stanza) + Send + 'static,
) {
    let stanza = match request {
        Ok(stanza) => stanza,
        Err(error) => {
            warn!(request = what, %error, "request not built");
            return;
        }
    };
    let timeout = state.request_timeout();
    send_request(
        state,
        stanza,
        timeout,
        Box::new(on_success),
        Box::new(move |_: &mut SessionState, error: RequestError| {
            warn!(request = what, %error, "request failed");
        }),
    );
}

pub(crate) fn keepalive(state: &mut SessionState) {
    correlate(state, "keepalive", iq::ping(None), |_, _| {
        debug!("keepalive answered");
    });
}

pub(crate) fn fetch_roster(state: &mut SessionState) {
    correlate(
        state,
        "roster",
        items::roster_query(&new_id()),
        |state: &mut SessionState, reply: Stanza| roster_received(state, &reply),
    );
}

fn roster_received(state: &mut SessionState, reply: &Stanza) {
    let received = items::parse_items(reply);
    let count = received.len();
    let applied = items::apply_items(&mut state.directory, received, &state.settings);
    info!(items = count, created = applied.created.len(), "roster received");

    announce_subscriptions(state, &applied);
    for address in &applied.present {
        fetch_vcard(state, address);
    }

    let show = PresenceKind::from_show(&state.config.session.initial_show)
        .unwrap_or(PresenceKind::Available);
    set_own_presence(state, show, None, true);
    state.emit_roster();
}

/// Applies a server-initiated roster change. The push has already been
/// acknowledged.
pub(crate) fn roster_pushed(state: &mut SessionState, push: &Stanza) {
    let applied = items::apply_items(
        &mut state.directory,
        items::parse_items(push),
        &state.settings,
    );
    if applied.is_empty() {
        return;
    }
    announce_subscriptions(state, &applied);
    for address in &applied.created {
        fetch_vcard(state, address);
    }
    state.emit_roster();
}

fn announce_subscriptions(state: &SessionState, applied: &AppliedItems) {
    for (address, subscription) in &applied.subscription_changes {
        state.xmpp_events.emit(
            "xmpp.subscription.changed",
            EventPayload::SubscriptionChanged {
                jid: jid::bare_jid(address),
                subscription: *subscription,
            },
        );
    }
}

pub(crate) fn fetch_vcard(state: &mut SessionState, address: &str) {
    let address = jid::bare_jid(address);
    let request = vcard::vcard_request(&new_id(), Some(&address));
    correlate(state, "vcard", request, move |state, reply| {
        vcard_received(state, &address, &reply)
    });
}

fn vcard_received(state: &mut SessionState, address: &str, reply: &Stanza) {
    let Some(card) = vcard::parse_vcard(reply) else {
        debug!(jid = %address, "vCard result without card");
        return;
    };
    let Some(buddy) = state.directory.get_mut(address) else {
        debug!(jid = %address, "vCard for buddy no longer in roster");
        return;
    };
    let profile = vcard::apply_to_buddy(buddy, card);
    state.xmpp_events.emit(
        "xmpp.profile.updated",
        EventPayload::ProfileUpdated {
            jid: address.to_string(),
            profile,
        },
    );
}

pub(crate) fn fetch_own_vcard(state: &mut SessionState) {
    correlate(
        state,
        "own vcard",
        vcard::vcard_request(&new_id(), None),
        |state: &mut SessionState, reply: Stanza| {
            let Some(card) = vcard::parse_vcard(&reply) else {
                debug!("own vCard result without card");
                return;
            };
            let profile = card.profile.clone();
            state.profiles.save(card);
            state.xmpp_events.emit(
                "xmpp.profile.updated",
                EventPayload::ProfileUpdated {
                    jid: state.own_bare_jid().unwrap_or_default(),
                    profile,
                },
            );
        },
    );
}

/// Publishes the stored profile, after replacing it with `card` if given.
pub(crate) fn publish_own_vcard(state: &mut SessionState, card: Option<OwnProfile>) {
    if let Some(card) = card {
        state.profiles.save(card);
    }
    let Some(card) = state.profiles.load() else {
        warn!("no vCard created yet");
        return;
    };
    let Some(own) = state.own_jid.clone() else {
        debug!("not connected, vCard stored only");
        return;
    };
    correlate(
        state,
        "vcard publish",
        vcard::publish(&new_id(), &own, &card),
        |_, _| debug!("own vCard published"),
    );
}

/// Broadcasts our presence. A missing or blank status falls back to the
/// configured default. With `publish_vcard` the stored photo hash goes along.
pub(crate) fn set_own_presence(
    state: &mut SessionState,
    kind: PresenceKind,
    status: Option<&str>,
    publish_vcard: bool,
) {
    let status = status
        .map(str::trim)
        .filter(|status| !status.is_empty())
        .unwrap_or(&state.config.session.default_status)
        .to_string();
    let photo_hash = if publish_vcard {
        state
            .profiles
            .load()
            .and_then(|card| card.photo)
            .and_then(|photo| photo.hash())
    } else {
        None
    };
    parley_presence::send_own_presence(&state.outbox, kind, Some(&status), photo_hash.as_deref());
}

pub(crate) fn add_to_roster(state: &mut SessionState, address: &str, name: Option<String>) {
    let address = jid::bare_jid(address);
    let request = items::add_item(&new_id(), &address, name.as_deref());
    correlate(state, "roster add", request, move |state, _| {
        let buddy = state.settings.new_buddy(&address, name.clone());
        if !state.directory.insert(buddy) {
            if let Some(existing) = state.directory.get_mut(&address) {
                existing.name = name;
            }
        }
        debug!(jid = %address, "roster add confirmed");
        state.emit_roster();
    });
}

pub(crate) fn remove_from_roster(state: &mut SessionState, address: &str) {
    let address = jid::bare_jid(address);
    let request = items::remove_item(&new_id(), &address);
    correlate(state, "roster remove", request, move |state, _| {
        if state.directory.remove(&address).is_some() {
            debug!(jid = %address, "roster remove confirmed");
            state.emit_roster();
        }
    });
}

pub(crate) fn fetch_groups(state: &mut SessionState) {
    let service = state.config.server.group_service_jid();
    let request = groups::rooms_query(&state.config.server);
    correlate(state, "groups", request, move |state, reply| {
        let rooms = disco::parse_items(&reply);
        debug!(%service, rooms = rooms.len(), "groups listed");
        state
            .xmpp_events
            .emit("xmpp.groups.listed", EventPayload::GroupsListed { service, rooms });
    });
}

pub(crate) fn fetch_group_members(state: &mut SessionState, room: &str) {
    let room = groups::room_address(room, &state.config.server);
    let request = groups::members_query(&room, &state.config.server);
    correlate(state, "group members", request, move |state, reply| {
        let members = disco::parse_items(&reply);
        state.xmpp_events.emit(
            "xmpp.groups.members",
            EventPayload::GroupMembersListed { room, members },
        );
    });
}

pub(crate) fn query_server_info(state: &mut SessionState) {
    let domain = state.config.server.domain.clone();
    let request = groups::server_info_query(&state.config.server);
    correlate(state, "server info", request, move |state, reply| {
        let features = disco::parse_features(&reply);
        state.xmpp_events.emit(
            "xmpp.server.info",
            EventPayload::ServerInfoListed {
                jid: domain,
                features,
            },
        );
    });
}

pub(crate) fn join_group(state: &mut SessionState, room: &str, nick: &str) {
    let result = groups::join(room, nick, &state.config.server)
        .map_err(|error| error.to_string())
        .and_then(|stanza| state.outbox.send(stanza).map_err(|error| error.to_string()));
    match result {
        Ok(()) => debug!(room, nick, "group join sent"),
        Err(error) => warn!(room, %error, "group join not sent"),
    }
}

#[cfg(test)]
mod tests {
    use parley_xmpp::{ns, stanza::child_text};

    use super::*;
    use crate::handlers::tests::connected_state;

    fn status_of(stanza: &Stanza) -> Option<String> {
        child_text(stanza.element(), "status", ns::CLIENT)
    }

    #[test]
    fn blank_status_falls_back_to_default() {
        let (mut state, mut outbound) = connected_state();

        set_own_presence(&mut state, PresenceKind::Away, Some(""), false);
        set_own_presence(&mut state, PresenceKind::Away, None, false);

        for _ in 0..2 {
            let presence = outbound.try_recv().unwrap();
            assert_eq!(status_of(&presence).as_deref(), Some("Available"));
        }
    }

    #[test]
    fn given_status_is_sent_as_is() {
        let (mut state, mut outbound) = connected_state();

        set_own_presence(&mut state, PresenceKind::DoNotDisturb, Some("in a meeting"), false);

        let presence = outbound.try_recv().unwrap();
        assert_eq!(status_of(&presence).as_deref(), Some("in a meeting"));
        assert_eq!(
            child_text(presence.element(), "show", ns::CLIENT).as_deref(),
            Some("dnd")
        );
    }
}
