use std::collections::HashSet;

use sasl::client::Mechanism;
use sasl::client::mechanisms::{Plain, Scram};
use sasl::common::scram::{Sha1, Sha256};
use sasl::common::{ChannelBinding, Credentials};
use tracing::{debug, warn};
use xmpp_parsers::minidom::Element;
use xmpp_parsers::sasl::{
    Auth, Challenge, Failure, Mechanism as WireMechanism, Response, Success,
};

use crate::{error::ConnectionError, ns};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectedMechanism {
    ScramSha256,
    ScramSha1,
    Plain,
}

impl SelectedMechanism {
    pub fn name(&self) -> &'static str {
        match self {
            SelectedMechanism::ScramSha256 => "SCRAM-SHA-256",
            SelectedMechanism::ScramSha1 => "SCRAM-SHA-1",
            SelectedMechanism::Plain => "PLAIN",
        }
    }

    fn wire(self) -> WireMechanism {
        match self {
            SelectedMechanism::ScramSha256 => WireMechanism::ScramSha256,
            SelectedMechanism::ScramSha1 => WireMechanism::ScramSha1,
            SelectedMechanism::Plain => WireMechanism::Plain,
        }
    }
}

impl std::fmt::Display for SelectedMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

const MECHANISM_PREFERENCE: &[SelectedMechanism] = &[
    SelectedMechanism::ScramSha256,
    SelectedMechanism::ScramSha1,
    SelectedMechanism::Plain,
];

pub fn select_mechanism(server_mechanisms: &HashSet<String>) -> Option<SelectedMechanism> {
    MECHANISM_PREFERENCE
        .iter()
        .find(|m| server_mechanisms.contains(m.name()))
        .copied()
}

/// Mechanism names listed in a `<features/>` element.
pub fn offered_mechanisms(features: &Element) -> HashSet<String> {
    features
        .children()
        .filter(|child| child.name() == "mechanisms" && child.ns() == ns::SASL)
        .flat_map(|mechanisms| mechanisms.children())
        .filter(|child| child.name() == "mechanism")
        .map(|mechanism| mechanism.text().trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

fn build_mechanism(
    selected: SelectedMechanism,
    credentials: &Credentials,
) -> Result<Box<dyn Mechanism + Send>, ConnectionError> {
    match selected {
        SelectedMechanism::ScramSha256 => Scram::<Sha256>::from_credentials(credentials.clone())
            .map(|m| Box::new(m) as Box<dyn Mechanism + Send>)
            .map_err(|e| {
                ConnectionError::AuthenticationFailed(format!(
                    "failed to initialize SCRAM-SHA-256: {e:?}"
                ))
            }),
        SelectedMechanism::ScramSha1 => Scram::<Sha1>::from_credentials(credentials.clone())
            .map(|m| Box::new(m) as Box<dyn Mechanism + Send>)
            .map_err(|e| {
                ConnectionError::AuthenticationFailed(format!(
                    "failed to initialize SCRAM-SHA-1: {e:?}"
                ))
            }),
        SelectedMechanism::Plain => Plain::from_credentials(credentials.clone())
            .map(|m| Box::new(m) as Box<dyn Mechanism + Send>)
            .map_err(|e| {
                ConnectionError::AuthenticationFailed(format!("failed to initialize PLAIN: {e:?}"))
            }),
    }
}

fn map_failure(failure: &Failure) -> ConnectionError {
    let condition = format!("{:?}", failure.defined_condition);
    let text = failure.texts.values().next().cloned().unwrap_or_default();

    if text.is_empty() {
        ConnectionError::AuthenticationFailed(condition)
    } else {
        ConnectionError::AuthenticationFailed(format!("{condition}: {text}"))
    }
}

/// What to do after feeding the server's answer to [`SaslNegotiation::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaslStep {
    /// Send this `<response/>` and wait for the next answer.
    Respond(Element),
    /// Authenticated. The stream must be restarted.
    Success,
}

/// Client side of one SASL exchange, driven element by element.
pub struct SaslNegotiation {
    selected: SelectedMechanism,
    mechanism: Box<dyn Mechanism + Send>,
}

impl SaslNegotiation {
    /// Picks the strongest offered mechanism and returns the `<auth/>`
    /// element to send.
    pub fn start(
        offered: &HashSet<String>,
        username: &str,
        password: &str,
    ) -> Result<(Self, Element), ConnectionError> {
        debug!(mechanisms = ?offered, "server advertised SASL mechanisms");

        let selected = select_mechanism(offered).ok_or_else(|| {
            let mut names: Vec<&str> = offered.iter().map(String::as_str).collect();
            names.sort_unstable();
            ConnectionError::AuthenticationFailed(format!(
                "no supported SASL mechanism found; server offers: {}",
                names.join(", ")
            ))
        })?;

        debug!(mechanism = %selected, "selected SASL mechanism");

        let credentials = Credentials::default()
            .with_username(username)
            .with_password(password)
            .with_channel_binding(ChannelBinding::Unsupported);
        let mut mechanism = build_mechanism(selected, &credentials)?;
        let auth = Auth {
            mechanism: selected.wire(),
            data: mechanism.initial(),
        };

        Ok((Self { selected, mechanism }, auth.into()))
    }

    pub fn mechanism(&self) -> SelectedMechanism {
        self.selected
    }

    pub fn step(&mut self, element: &Element) -> Result<SaslStep, ConnectionError> {
        if element.ns() != ns::SASL {
            return Err(ConnectionError::StreamError(format!(
                "unexpected <{}/> during SASL negotiation",
                element.name()
            )));
        }

        match element.name() {
            "challenge" => {
                let challenge = Challenge::try_from(element.clone()).map_err(|e| {
                    ConnectionError::StreamError(format!("invalid SASL challenge: {e}"))
                })?;
                let response = self.mechanism.response(&challenge.data).map_err(|e| {
                    ConnectionError::AuthenticationFailed(format!(
                        "SASL challenge-response failed: {e:?}"
                    ))
                })?;
                Ok(SaslStep::Respond(Response { data: response }.into()))
            }
            "success" => {
                let success = Success::try_from(element.clone()).map_err(|e| {
                    ConnectionError::StreamError(format!("invalid SASL success: {e}"))
                })?;
                if let Err(e) = self.mechanism.success(&success.data) {
                    warn!(error = ?e, "server signature verification failed");
                    return Err(ConnectionError::AuthenticationFailed(format!(
                        "server signature verification failed: {e:?}"
                    )));
                }
                debug!("SASL authentication succeeded");
                Ok(SaslStep::Success)
            }
            "failure" => {
                let failure = Failure::try_from(element.clone()).map_err(|e| {
                    ConnectionError::StreamError(format!("invalid SASL failure: {e}"))
                })?;
                debug!(condition = ?failure.defined_condition, "SASL authentication failed");
                Err(map_failure(&failure))
            }
            other => Err(ConnectionError::StreamError(format!(
                "unexpected <{other}/> during SASL negotiation"
            ))),
        }
    }
}
