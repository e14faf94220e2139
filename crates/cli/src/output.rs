use parley_core::event::{ChatState, Event, EventPayload};

/// One human-readable line per event.
pub fn describe(event: &Event) -> String {
    match &event.payload {
        EventPayload::ConnectionStatusChanged { status, reason } => match reason {
            Some(reason) => format!("* connection {status:?}: {reason}"),
            None => format!("* connection {status:?}"),
        },
        EventPayload::MessageReceived { message } => {
            let stamp = message.timestamp.format("%H:%M");
            let delayed = if message.delayed { " (delayed)" } else { "" };
            format!("[{stamp}] <{}>{delayed} {}", message.from, message.body)
        }
        EventPayload::MessageCorrected { jid, id, body } => {
            format!("* {jid} corrected {id}: {body}")
        }
        EventPayload::MessageDeliveryChanged { jid, id, state } => {
            format!("* {id} to {jid} is {state:?}")
        }
        EventPayload::ComposingChanged { jid, state } => match state {
            ChatState::Composing => format!("* {jid} is typing"),
            ChatState::Paused => format!("* {jid} stopped typing"),
            ChatState::Active => format!("* {jid} is active"),
        },
        EventPayload::PresenceChanged {
            jid,
            presence,
            status,
        } => format!(
            "* {jid} is {presence:?}{}",
            status
                .as_deref()
                .map(|status| format!(" ({status})"))
                .unwrap_or_default()
        ),
        EventPayload::SubscriptionChanged { jid, subscription } => {
            format!("* subscription with {jid}: {subscription:?}")
        }
        EventPayload::RosterChanged { entries } => {
            let mut line = format!("* roster: {} contacts", entries.len());
            for entry in entries {
                let name = entry.name.as_deref().unwrap_or(&entry.local_id);
                line.push_str(&format!(
                    "\n    {name} <{}> {:?} {:?}",
                    entry.jid, entry.presence, entry.subscription
                ));
            }
            line
        }
        EventPayload::ProfileUpdated { jid, profile } => format!(
            "* profile of {jid}: {}",
            profile.name.as_deref().unwrap_or("(no name)")
        ),
        EventPayload::GroupsListed { service, rooms } => {
            let names: Vec<&str> = rooms
                .iter()
                .map(|room| room.name.as_deref().unwrap_or(&room.jid))
                .collect();
            format!("* {} groups on {service}: {}", rooms.len(), names.join(", "))
        }
        EventPayload::GroupMembersListed { room, members } => {
            let names: Vec<&str> = members.iter().map(|member| member.jid.as_str()).collect();
            format!("* {room} members: {}", names.join(", "))
        }
        EventPayload::ServerInfoListed { jid, features } => {
            format!("* {jid} supports {} features", features.len())
        }
    }
}
