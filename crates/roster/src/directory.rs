use std::collections::HashMap;

use parley_core::event::{
    BuddyKind, ChatState, PresenceKind, Profile, RosterEntry, SubscriptionState,
};
use parley_xmpp::{ScheduledTask, jid};

use crate::vcard::Photo;

/// Our own outgoing chat state towards one buddy.
#[derive(Debug, Default)]
pub struct ComposeState {
    pub state: ChatState,
    /// Pending pause, replaced on every keystroke.
    pub timer: Option<ScheduledTask>,
    /// Bumped whenever the timer is re-armed or cleared. A firing that
    /// carries an older value is stale.
    pub generation: u64,
}

impl ComposeState {
    /// Cancels any pending pause and returns the new generation.
    pub fn rearm(&mut self, timer: impl FnOnce(u64) -> ScheduledTask) -> u64 {
        self.generation += 1;
        self.timer = Some(timer(self.generation));
        self.generation
    }

    pub fn clear(&mut self) {
        self.generation += 1;
        self.timer = None;
        self.state = ChatState::Active;
    }
}

#[derive(Debug)]
pub struct Buddy {
    /// Bare address, lower-cased. The directory key.
    pub jid: String,
    pub local_id: String,
    pub resource: Option<String>,
    pub name: Option<String>,
    pub kind: BuddyKind,
    pub subscription: SubscriptionState,
    pub presence: PresenceKind,
    pub status: Option<String>,
    /// What the buddy last told us about their typing.
    pub chat_state: ChatState,
    pub compose: ComposeState,
    pub profile: Profile,
    pub photo: Option<Photo>,
}

impl Buddy {
    pub fn new(address: &str, local_id: impl Into<String>, kind: BuddyKind) -> Self {
        Self {
            jid: jid::bare_jid(address),
            local_id: local_id.into(),
            resource: jid::resource_part(address),
            name: None,
            kind,
            subscription: SubscriptionState::None,
            presence: PresenceKind::Unset,
            status: None,
            chat_state: ChatState::Active,
            compose: ComposeState::default(),
            profile: Profile::default(),
            photo: None,
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    /// Full address when a resource is known.
    pub fn address(&self) -> String {
        match &self.resource {
            Some(resource) => format!("{}/{resource}", self.jid),
            None => self.jid.clone(),
        }
    }

    pub fn entry(&self) -> RosterEntry {
        RosterEntry {
            jid: self.jid.clone(),
            local_id: self.local_id.clone(),
            name: self.name.clone().or_else(|| self.profile.name.clone()),
            subscription: self.subscription,
            kind: self.kind,
            presence: self.presence,
            status: self.status.clone(),
        }
    }
}

/// Buddies keyed by bare address. Lookups normalize the key, so any full
/// or mixed-case address finds its buddy.
#[derive(Debug, Default)]
pub struct Directory {
    buddies: HashMap<String, Buddy>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &str) -> Option<&Buddy> {
        self.buddies.get(&jid::bare_jid(address))
    }

    pub fn get_mut(&mut self, address: &str) -> Option<&mut Buddy> {
        self.buddies.get_mut(&jid::bare_jid(address))
    }

    pub fn contains(&self, address: &str) -> bool {
        self.buddies.contains_key(&jid::bare_jid(address))
    }

    /// Inserts `buddy` unless one already exists under its address.
    /// Returns whether it was inserted.
    pub fn insert(&mut self, buddy: Buddy) -> bool {
        if self.buddies.contains_key(&buddy.jid) {
            return false;
        }
        self.buddies.insert(buddy.jid.clone(), buddy);
        true
    }

    pub fn remove(&mut self, address: &str) -> Option<Buddy> {
        self.buddies.remove(&jid::bare_jid(address))
    }

    pub fn len(&self) -> usize {
        self.buddies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buddies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Buddy> {
        self.buddies.values()
    }

    /// Sorted by address.
    pub fn entries(&self) -> Vec<RosterEntry> {
        let mut entries: Vec<RosterEntry> = self.buddies.values().map(Buddy::entry).collect();
        entries.sort_by(|a, b| a.jid.cmp(&b.jid));
        entries
    }

    /// Drops every pending compose timer. Buddies stay cached.
    pub fn cancel_timers(&mut self) {
        for buddy in self.buddies.values_mut() {
            buddy.compose.timer = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn lookups_ignore_resource_and_case() {
        let mut directory = Directory::new();
        assert!(directory.insert(Buddy::new("Bob@Example.com/phone", "bob", BuddyKind::Direct)));

        let bob = directory.get("bob@example.com/laptop").unwrap();
        assert_eq!(bob.jid, "bob@example.com");
        assert_eq!(bob.resource.as_deref(), Some("phone"));
        assert_eq!(bob.address(), "bob@example.com/phone");
        assert!(directory.contains("BOB@example.com"));
    }

    #[test]
    fn one_buddy_per_address() {
        let mut directory = Directory::new();
        assert!(directory.insert(Buddy::new("bob@example.com", "bob", BuddyKind::Direct)));
        assert!(!directory.insert(
            Buddy::new("bob@example.com/other", "bob", BuddyKind::Direct)
                .with_name(Some("Impostor".to_string()))
        ));
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.get("bob@example.com").unwrap().name, None);
    }

    #[test]
    fn entries_are_sorted_and_fall_back_to_card_name() {
        let mut directory = Directory::new();
        directory.insert(Buddy::new("zed@example.com", "zed", BuddyKind::Direct));
        let mut amy = Buddy::new("amy@example.com", "amy", BuddyKind::Direct);
        amy.profile.name = Some("Amy Pond".to_string());
        directory.insert(amy);

        let entries = directory.entries();
        assert_eq!(entries[0].jid, "amy@example.com");
        assert_eq!(entries[0].name.as_deref(), Some("Amy Pond"));
        assert_eq!(entries[1].jid, "zed@example.com");
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn rearm_replaces_the_pending_timer() {
        let mut compose = ComposeState::default();
        let first =
            compose.rearm(|_| ScheduledTask::after(Duration::from_secs(10), async {}));
        let second =
            compose.rearm(|_| ScheduledTask::after(Duration::from_secs(10), async {}));

        assert_eq!(second, first + 1);
        assert!(compose.timer.is_some());

        compose.clear();
        assert!(compose.timer.is_none());
        assert_eq!(compose.generation, second + 1);
        assert_eq!(compose.state, ChatState::Active);
    }
}
