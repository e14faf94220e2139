//! `vcard-temp` contact cards.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use parley_core::event::Profile;
use parley_xmpp::{
    Stanza,
    iq::{self, BuildResult},
    jid, ns,
    stanza::find_child,
};
use sha1::{Digest, Sha1};
use tracing::warn;
use xmpp_parsers::{
    minidom::Element,
    vcard::{self as wire, VCardQuery},
};

use crate::directory::Buddy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Photo {
    pub mime_type: String,
    /// Base64 as carried on the wire, whitespace removed.
    pub data: String,
}

impl Photo {
    pub fn new(mime_type: impl Into<String>, data: &str) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.split_whitespace().collect(),
        }
    }

    /// Lower-case hex SHA-1 of the decoded image, as advertised in presence.
    pub fn hash(&self) -> Option<String> {
        photo_hash(&self.data)
    }
}

pub fn photo_hash(data: &str) -> Option<String> {
    let compact: String = data.split_whitespace().collect();
    let bytes = BASE64.decode(compact).ok()?;
    if bytes.is_empty() {
        return None;
    }
    Some(hex::encode(Sha1::digest(&bytes)))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VCard {
    pub jabber_id: Option<String>,
    /// The account number carried in `TEL/NUMBER`.
    pub number: Option<String>,
    pub profile: Profile,
    pub photo: Option<Photo>,
}

pub fn vcard_request(id: &str, to: Option<&str>) -> BuildResult {
    let to = to.map(jid::bare_jid);
    iq::iq_get(id, to.as_deref(), VCardQuery)
}

fn text_of(element: &Element, name: &str) -> Option<String> {
    find_child(element, name, ns::VCARD)
        .map(|child| child.text().trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Reads the card out of a vCard result. `None` when the result carries no
/// card at all.
pub fn parse_vcard(stanza: &Stanza) -> Option<VCard> {
    let card = stanza.child("vCard", ns::VCARD)?;
    let mut vcard = VCard::default();

    for field in card.children() {
        match field.name() {
            "FN" => vcard.profile.name = Some(field.text().trim().to_string()),
            "TITLE" => vcard.profile.description = Some(field.text().trim().to_string()),
            "JABBERID" => vcard.jabber_id = Some(field.text().trim().to_string()),
            "TEL" => {
                if let Some(number) = text_of(field, "NUMBER") {
                    vcard.number = Some(number);
                }
                if let Some(cell) = text_of(field, "CELL") {
                    vcard.profile.mobile = Some(cell);
                }
                if let Some(voice) = text_of(field, "VOICE") {
                    vcard.profile.contact1 = Some(voice);
                }
                if let Some(fax) = text_of(field, "FAX") {
                    vcard.profile.contact2 = Some(fax);
                }
            }
            "EMAIL" => {
                if let Some(email) = text_of(field, "USERID") {
                    vcard.profile.email = Some(email);
                }
            }
            "PHOTO" => {
                if let Some(data) = text_of(field, "BINVAL") {
                    let mime_type =
                        text_of(field, "TYPE").unwrap_or_else(|| "image/webp".to_string());
                    let photo = Photo::new(mime_type, &data);
                    vcard.profile.photo_hash = photo.hash();
                    vcard.photo = Some(photo);
                }
            }
            _ => {}
        }
    }

    Some(vcard)
}

/// Copies a fetched card onto `buddy`. Address mismatches are logged and
/// the card is applied anyway. A card without a photo keeps the old one.
pub fn apply_to_buddy(buddy: &mut Buddy, card: VCard) -> Profile {
    if let Some(jabber_id) = &card.jabber_id {
        if !jid::same_bare(jabber_id, &buddy.jid) {
            warn!(jid = %buddy.jid, card_jid = %jabber_id, "vCard JABBERID does not match sender");
        }
    }
    if let Some(number) = &card.number {
        if number != &buddy.local_id {
            warn!(jid = %buddy.jid, %number, local_id = %buddy.local_id, "vCard number does not match buddy");
        }
    }

    let VCard { profile, photo, .. } = card;
    let current = &mut buddy.profile;
    if profile.name.is_some() {
        current.name = profile.name;
    }
    if profile.description.is_some() {
        current.description = profile.description;
    }
    if profile.mobile.is_some() {
        current.mobile = profile.mobile;
    }
    if profile.contact1.is_some() {
        current.contact1 = profile.contact1;
    }
    if profile.contact2.is_some() {
        current.contact2 = profile.contact2;
    }
    if profile.email.is_some() {
        current.email = profile.email;
    }
    if let Some(photo) = photo {
        current.photo_hash = photo.hash();
        buddy.photo = Some(photo);
    }

    buddy.profile.clone()
}

fn field(name: &str, value: &str) -> Element {
    Element::builder(name, ns::VCARD).append(value).build()
}

fn nested(outer: &str, inner: &str, value: &str) -> Element {
    Element::builder(outer, ns::VCARD)
        .append(field(inner, value))
        .build()
}

fn wire_photo(photo: &Photo) -> Option<wire::Photo> {
    match BASE64.decode(&photo.data) {
        Ok(data) => Some(wire::Photo {
            type_: wire::Type {
                data: photo.mime_type.clone(),
            },
            binval: wire::Binval { data },
        }),
        Err(error) => {
            warn!(%error, "stored photo is not base64, published without it");
            None
        }
    }
}

/// `iq set` publishing our own card. `JABBERID` is always our bare address.
pub fn publish(id: &str, own_jid: &str, card: &VCard) -> BuildResult {
    let own = jid::parse_bare(own_jid)?;
    let profile = &card.profile;
    let fields = [
        profile.name.as_deref().map(|name| field("FN", name)),
        profile.description.as_deref().map(|title| field("TITLE", title)),
        card.number.as_deref().map(|number| nested("TEL", "NUMBER", number)),
        profile.mobile.as_deref().map(|cell| nested("TEL", "CELL", cell)),
        profile.contact1.as_deref().map(|voice| nested("TEL", "VOICE", voice)),
        profile.contact2.as_deref().map(|fax| nested("TEL", "FAX", fax)),
        profile.email.as_deref().map(|email| nested("EMAIL", "USERID", email)),
        Some(field("JABBERID", own.as_str())),
    ];
    let vcard = wire::VCard {
        photo: card.photo.as_ref().and_then(wire_photo),
        payloads: fields.into_iter().flatten().collect(),
    };
    iq::iq_set(id, None, vcard)
}
