//! `jabber:iq:roster` queries, pushes and how their items land in the
//! directory.

use parley_core::{
    config::ServerConfig,
    event::{BuddyKind, SubscriptionState},
};
use parley_xmpp::{
    Stanza,
    iq::{self, BuildResult},
    jid, ns,
};
use tracing::{debug, warn};
use xmpp_parsers::roster::{Ask, Item, Roster, Subscription};

use crate::directory::{Buddy, Directory};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterItem {
    pub jid: String,
    pub name: Option<String>,
    pub subscription: SubscriptionState,
    /// `subscription='remove'` in a push.
    pub removed: bool,
}

/// How roster addresses map to local ids and buddy kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterSettings {
    realm_separator: Option<String>,
    group_marker: String,
}

impl RosterSettings {
    pub fn new(realm_separator: Option<String>, group_service: &str) -> Self {
        Self {
            realm_separator: realm_separator.filter(|separator| !separator.is_empty()),
            group_marker: format!("@{group_service}."),
        }
    }

    pub fn from_server(server: &ServerConfig) -> Self {
        Self::new(
            server
                .realm_prefix()
                .map(|(_, separator)| separator.to_string()),
            &server.group_service,
        )
    }

    /// The node of `address`, minus the realm prefix when one is configured.
    pub fn local_id(&self, address: &str) -> String {
        let node = jid::node_part(address)
            .or_else(|| jid::domain_part(address))
            .unwrap_or_else(|| jid::bare_jid(address));
        match &self.realm_separator {
            Some(separator) => node
                .split_once(separator.as_str())
                .map_or(node.as_str(), |(_, local)| local)
                .to_string(),
            None => node,
        }
    }

    pub fn kind_of(&self, address: &str) -> BuddyKind {
        if address.to_ascii_lowercase().contains(&self.group_marker) {
            BuddyKind::Group
        } else {
            BuddyKind::Direct
        }
    }

    pub fn new_buddy(&self, address: &str, name: Option<String>) -> Buddy {
        Buddy::new(address, self.local_id(address), self.kind_of(address)).with_name(name)
    }
}

/// Maps a roster item's `subscription` and `ask` attributes.
pub fn subscription_of(subscription: Option<&str>, ask: Option<&str>) -> SubscriptionState {
    match (subscription, ask) {
        (Some("both"), _) => SubscriptionState::Both,
        (Some("to"), _) => SubscriptionState::Subscribed,
        (_, Some("subscribe")) => SubscriptionState::Pending,
        _ => SubscriptionState::None,
    }
}

pub fn roster_query(id: &str) -> BuildResult {
    let query = Roster {
        ver: None,
        items: Vec::new(),
    };
    iq::iq_get(id, None, query)
}

fn single_item(id: &str, item: Item) -> BuildResult {
    let query = Roster {
        ver: None,
        items: vec![item],
    };
    iq::iq_set(id, None, query)
}

pub fn add_item(id: &str, address: &str, name: Option<&str>) -> BuildResult {
    let item = Item {
        jid: jid::parse_bare(address)?,
        name: name.map(str::to_string),
        subscription: Subscription::None,
        ask: Ask::None,
        groups: Vec::new(),
    };
    single_item(id, item)
}

pub fn remove_item(id: &str, address: &str) -> BuildResult {
    let item = Item {
        jid: jid::parse_bare(address)?,
        name: None,
        subscription: Subscription::Remove,
        ask: Ask::None,
        groups: Vec::new(),
    };
    single_item(id, item)
}

/// Items of a roster result or push. Items without an address are skipped.
pub fn parse_items(stanza: &Stanza) -> Vec<RosterItem> {
    let Some(query) = stanza.child("query", ns::ROSTER) else {
        return Vec::new();
    };

    query
        .children()
        .filter(|child| child.name() == "item")
        .filter_map(|item| {
            let Some(address) = item.attr("jid").filter(|jid| !jid.is_empty()) else {
                warn!("roster item without jid skipped");
                return None;
            };
            let subscription = item.attr("subscription");
            Some(RosterItem {
                jid: jid::bare_jid(address),
                name: item
                    .attr("name")
                    .filter(|name| !name.is_empty())
                    .map(str::to_string),
                subscription: subscription_of(subscription, item.attr("ask")),
                removed: subscription == Some("remove"),
            })
        })
        .collect()
}

/// A push is only trusted from our own account or the server itself.
pub fn is_trusted_push(stanza: &Stanza, own_jid: Option<&str>) -> bool {
    match (stanza.from(), own_jid) {
        (None, _) => true,
        (Some(from), Some(own)) => jid::is_self_or_server(from, own),
        (Some(_), None) => false,
    }
}

/// What applying a batch of items changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AppliedItems {
    /// Every address still on the roster, in item order.
    pub present: Vec<String>,
    pub created: Vec<String>,
    pub removed: Vec<String>,
    pub subscription_changes: Vec<(String, SubscriptionState)>,
}

impl AppliedItems {
    pub fn is_empty(&self) -> bool {
        self.present.is_empty() && self.removed.is_empty()
    }
}

pub fn apply_items(
    directory: &mut Directory,
    items: Vec<RosterItem>,
    settings: &RosterSettings,
) -> AppliedItems {
    let mut applied = AppliedItems::default();

    for item in items {
        if item.removed {
            if directory.remove(&item.jid).is_some() {
                debug!(jid = %item.jid, "buddy removed from roster");
                applied.removed.push(item.jid);
            }
            continue;
        }

        if directory.insert(settings.new_buddy(&item.jid, item.name.clone())) {
            debug!(jid = %item.jid, kind = ?settings.kind_of(&item.jid), "buddy added from roster");
            applied.created.push(item.jid.clone());
        }

        if let Some(buddy) = directory.get_mut(&item.jid) {
            if item.name.is_some() {
                buddy.name = item.name;
            }
            if buddy.subscription != item.subscription {
                buddy.subscription = item.subscription;
                applied
                    .subscription_changes
                    .push((item.jid.clone(), item.subscription));
            }
        }
        applied.present.push(item.jid);
    }

    applied
}
