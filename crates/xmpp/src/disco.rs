use parley_core::event::DiscoItem;

use crate::{ns, stanza::Stanza};

/// Items of a `disco#items` result.
pub fn parse_items(stanza: &Stanza) -> Vec<DiscoItem> {
    let Some(query) = stanza.child("query", ns::DISCO_ITEMS) else {
        return Vec::new();
    };

    query
        .children()
        .filter(|child| child.name() == "item" && child.ns() == ns::DISCO_ITEMS)
        .filter_map(|item| {
            let jid = item.attr("jid")?.to_string();
            Some(DiscoItem {
                jid,
                name: item.attr("name").map(str::to_string),
                node: item.attr("node").map(str::to_string),
            })
        })
        .collect()
}

/// Feature vars of a `disco#info` result.
pub fn parse_features(stanza: &Stanza) -> Vec<String> {
    let Some(query) = stanza.child("query", ns::DISCO_INFO) else {
        return Vec::new();
    };

    query
        .children()
        .filter(|child| child.name() == "feature" && child.ns() == ns::DISCO_INFO)
        .filter_map(|feature| feature.attr("var").map(str::to_string))
        .collect()
}
