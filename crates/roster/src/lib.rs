//! Local view of the contact list: buddies, the roster protocol that feeds
//! them, subscription bookkeeping and contact cards.

pub mod directory;
pub mod groups;
pub mod items;
pub mod store;
pub mod subscription;
pub mod vcard;

pub use directory::{Buddy, ComposeState, Directory};
pub use items::{RosterItem, RosterSettings};
pub use store::{InMemoryProfileStore, OwnProfile, ProfileStore};
pub use vcard::{Photo, VCard};
