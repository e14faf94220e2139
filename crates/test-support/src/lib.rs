pub mod fixtures {
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};

    pub fn root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("tests")
            .join("fixtures")
    }

    pub fn path(relative: impl AsRef<Path>) -> PathBuf {
        root().join(relative.as_ref())
    }

    pub fn read(relative: impl AsRef<Path>) -> io::Result<String> {
        fs::read_to_string(path(relative))
    }

    pub fn stanza(name: &str) -> String {
        read_or_panic(Path::new("stanzas").join(name))
    }

    pub fn config(name: &str) -> String {
        read_or_panic(Path::new("config").join(name))
    }

    fn read_or_panic(relative: impl AsRef<Path>) -> String {
        let relative = relative.as_ref();
        read(relative).unwrap_or_else(|error| {
            panic!(
                "failed to read fixture {}: {error}",
                relative.to_string_lossy()
            )
        })
    }
}

pub mod sink {
    use std::sync::Mutex;

    use parley_xmpp::{ConnectionError, Stanza, StanzaSink};

    /// Keeps every stanza sent through it. Can be switched to fail sends.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        sent: Mutex<Vec<Stanza>>,
        failing: Mutex<bool>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            let sink = Self::default();
            sink.set_failing(true);
            sink
        }

        pub fn set_failing(&self, failing: bool) {
            *self.failing.lock().unwrap() = failing;
        }

        pub fn sent(&self) -> Vec<Stanza> {
            self.sent.lock().unwrap().clone()
        }

        pub fn take(&self) -> Vec<Stanza> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }

        /// Sent stanzas carrying a child in `namespace`.
        pub fn sent_with_ns(&self, namespace: &str) -> Vec<Stanza> {
            self.sent()
                .into_iter()
                .filter(|stanza| stanza.has_child_ns(namespace))
                .collect()
        }
    }

    impl StanzaSink for RecordingSink {
        fn send(&self, stanza: Stanza) -> Result<(), ConnectionError> {
            if *self.failing.lock().unwrap() {
                return Err(ConnectionError::NotConnected);
            }
            self.sent.lock().unwrap().push(stanza);
            Ok(())
        }
    }
}

pub use sink::RecordingSink;

#[cfg(test)]
mod tests {
    use parley_xmpp::{Stanza, StanzaKind, StanzaSink};

    use super::{RecordingSink, fixtures};

    #[test]
    fn fixture_root_exists() {
        assert!(fixtures::root().is_dir());
    }

    #[test]
    fn stanza_fixtures_parse() {
        for name in [
            "message-chat.xml",
            "message-composing.xml",
            "message-delayed-composing.xml",
            "message-correction.xml",
            "message-receipt-displayed.xml",
            "presence-subscribe.xml",
            "presence-vcard-update.xml",
            "roster-result.xml",
            "vcard-result.xml",
        ] {
            let xml = fixtures::stanza(name);
            assert!(Stanza::parse_str(&xml).is_ok(), "fixture {name} should parse");
        }
    }

    #[test]
    fn loads_config_fixture() {
        let config = fixtures::config("minimal-config.toml");
        let toml: toml::Value =
            toml::from_str(&config).expect("minimal-config.toml should be valid toml");
        assert!(toml.is_table());
    }

    #[test]
    fn recording_sink_records_and_fails_on_demand() {
        let sink = RecordingSink::new();
        let stanza = Stanza::parse_str("<presence xmlns='jabber:client'/>").unwrap();
        sink.send(stanza.clone()).unwrap();
        assert_eq!(sink.sent().len(), 1);
        assert_eq!(sink.sent()[0].kind(), StanzaKind::Presence);

        sink.set_failing(true);
        assert!(sink.send(stanza).is_err());
        assert_eq!(sink.take().len(), 1);
        assert!(sink.sent().is_empty());
    }
}
