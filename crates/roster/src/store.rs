use std::sync::RwLock;

use crate::vcard::VCard;

/// Our own contact card as last saved by the user.
pub type OwnProfile = VCard;

/// Where our own card lives between sessions.
pub trait ProfileStore: Send + Sync {
    fn load(&self) -> Option<OwnProfile>;
    fn save(&self, profile: OwnProfile);
}

#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    profile: RwLock<Option<OwnProfile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(profile: OwnProfile) -> Self {
        Self {
            profile: RwLock::new(Some(profile)),
        }
    }
}

impl ProfileStore for InMemoryProfileStore {
    fn load(&self) -> Option<OwnProfile> {
        self.profile
            .read()
            .map(|profile| profile.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn save(&self, profile: OwnProfile) {
        match self.profile.write() {
            Ok(mut slot) => *slot = Some(profile),
            Err(poisoned) => *poisoned.into_inner() = Some(profile),
        }
    }
}
