//! Slash commands typed at the prompt.

use parley_core::event::{DeliveryState, PresenceKind};
use parley_messaging::OutgoingMessage;
use parley_session::SessionHandle;
use parley_xmpp::stanza::new_id;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Connect,
    Disconnect,
    Send { to: String, body: String },
    Typing { to: String },
    Presence { kind: PresenceKind, status: Option<String> },
    Subscribe { to: String },
    Unsubscribe { to: String },
    Add { jid: String, name: Option<String> },
    Remove { jid: String },
    Roster,
    VCard { jid: String },
    OwnVCard,
    Groups,
    Members { room: String },
    Join { room: String, nick: String },
    Info,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command /{0}, try /help")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("commands start with '/', try /help")]
    NotACommand,
}

pub const HELP: &str = "\
/connect | /disconnect | /quit
/msg <jid> <text>         send a chat message
/typing <jid>             announce typing
/away|/xa|/dnd|/chat|/available|/offline [status]
/subscribe <jid> | /unsubscribe <jid>
/add <jid> [name] | /remove <jid> | /roster
/vcard <jid> | /myvcard
/groups | /members <room> | /join <room> <nick> | /info
/status";

fn argument(value: Option<&str>, usage: &'static str) -> Result<String, CommandError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(CommandError::Usage(usage))
}

fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub fn parse(line: &str) -> Result<Action, CommandError> {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return Err(CommandError::NotACommand);
    };
    let mut parts = command.splitn(2, ' ');
    let name = parts.next().unwrap_or_default();
    let rest = parts.next();
    let mut pair = rest.map(str::trim).unwrap_or_default().splitn(2, ' ');
    let first = pair.next().filter(|value| !value.is_empty());
    let second = pair.next();

    let action = match name {
        "connect" => Action::Connect,
        "disconnect" => Action::Disconnect,
        "quit" | "q" => Action::Quit,
        "help" => Action::Help,
        "status" => Action::Status,
        "msg" => Action::Send {
            to: argument(first, "/msg <jid> <text>")?,
            body: argument(second, "/msg <jid> <text>")?,
        },
        "typing" => Action::Typing {
            to: argument(first, "/typing <jid>")?,
        },
        "available" | "chat" | "away" | "xa" | "dnd" | "offline" => {
            let kind = match name {
                "chat" => PresenceKind::Chat,
                "away" => PresenceKind::Away,
                "xa" => PresenceKind::ExtendedAway,
                "dnd" => PresenceKind::DoNotDisturb,
                "offline" => PresenceKind::Unavailable,
                _ => PresenceKind::Available,
            };
            Action::Presence {
                kind,
                status: optional(rest),
            }
        }
        "subscribe" => Action::Subscribe {
            to: argument(first, "/subscribe <jid>")?,
        },
        "unsubscribe" => Action::Unsubscribe {
            to: argument(first, "/unsubscribe <jid>")?,
        },
        "add" => Action::Add {
            jid: argument(first, "/add <jid> [name]")?,
            name: optional(second),
        },
        "remove" => Action::Remove {
            jid: argument(first, "/remove <jid>")?,
        },
        "roster" => Action::Roster,
        "vcard" => Action::VCard {
            jid: argument(first, "/vcard <jid>")?,
        },
        "myvcard" => Action::OwnVCard,
        "groups" => Action::Groups,
        "members" => Action::Members {
            room: argument(first, "/members <room>")?,
        },
        "join" => Action::Join {
            room: argument(first, "/join <room> <nick>")?,
            nick: argument(second, "/join <room> <nick>")?,
        },
        "info" => Action::Info,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(action)
}

/// Runs `action` against the session. Returns a line to show, if any.
pub async fn run(
    handle: &SessionHandle,
    action: Action,
) -> parley_session::Result<Option<String>> {
    match action {
        Action::Connect => handle.connect().await?,
        Action::Disconnect => handle.disconnect().await?,
        Action::Send { to, body } => {
            let message = OutgoingMessage::new(to.clone(), new_id(), body);
            let state = handle.send_message(message).await?;
            if state == DeliveryState::Failed {
                return Ok(Some(format!("message to {to} not sent")));
            }
        }
        Action::Typing { to } => handle.start_composing(&to, None).await?,
        Action::Presence { kind, status } => handle.set_own_presence(kind, status, false).await?,
        Action::Subscribe { to } => handle.subscribe(&to).await?,
        Action::Unsubscribe { to } => handle.unsubscribe(&to).await?,
        Action::Add { jid, name } => handle.add_to_roster(&jid, name).await?,
        Action::Remove { jid } => handle.remove_from_roster(&jid).await?,
        Action::Roster => handle.fetch_roster().await?,
        Action::VCard { jid } => handle.fetch_vcard(&jid).await?,
        Action::OwnVCard => handle.fetch_own_vcard().await?,
        Action::Groups => handle.fetch_groups().await?,
        Action::Members { room } => handle.fetch_group_members(&room).await?,
        Action::Join { room, nick } => handle.join_group(&room, &nick).await?,
        Action::Info => handle.query_server_info().await?,
        Action::Status => {
            let snapshot = handle.snapshot().await?;
            return Ok(Some(format!(
                "{:?} as {} with {} contacts, {} requests pending",
                snapshot.status,
                snapshot.own_jid.as_deref().unwrap_or("-"),
                snapshot.roster.len(),
                snapshot.pending_requests
            )));
        }
        Action::Help => return Ok(Some(HELP.to_string())),
        Action::Quit => {}
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn message_keeps_spaces_in_body() {
        assert_eq!(
            parse("/msg bob@example.com see you at noon").unwrap(),
            Action::Send {
                to: "bob@example.com".to_string(),
                body: "see you at noon".to_string(),
            }
        );
    }

    #[test]
    fn presence_shortcuts_carry_optional_status() {
        assert_eq!(
            parse("/away back soon").unwrap(),
            Action::Presence {
                kind: PresenceKind::Away,
                status: Some("back soon".to_string()),
            }
        );
        assert_eq!(
            parse("/dnd").unwrap(),
            Action::Presence {
                kind: PresenceKind::DoNotDisturb,
                status: None,
            }
        );
    }

    #[test]
    fn join_needs_room_and_nick() {
        assert_matches!(parse("/join lunch"), Err(CommandError::Usage(_)));
        assert_eq!(
            parse("/join lunch alice").unwrap(),
            Action::Join {
                room: "lunch".to_string(),
                nick: "alice".to_string(),
            }
        );
    }

    #[test]
    fn rejects_plain_text_and_unknown_commands() {
        assert_eq!(parse("hello"), Err(CommandError::NotACommand));
        assert_eq!(
            parse("/dance"),
            Err(CommandError::Unknown("dance".to_string()))
        );
    }

    #[test]
    fn add_name_is_optional() {
        assert_eq!(
            parse("/add carol@example.com").unwrap(),
            Action::Add {
                jid: "carol@example.com".to_string(),
                name: None,
            }
        );
    }
}
