use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found at {path}")]
    FileNotFound { path: PathBuf },

    #[error("invalid TOML at line {line}, column {column}: {message}")]
    InvalidToml {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("missing required fields: {fields:?}")]
    MissingRequiredFields { fields: Vec<String> },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub account: AccountConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub event_bus: EventBusConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Local part of the login address, without realm or domain.
    pub user: String,
    pub password: String,
    pub resource: Option<String>,
}

/// Where and how to reach the server.
///
/// `domain`, `host`, `port` and `path` are checked when connecting rather
/// than at load time, so a half-filled file can still be opened and edited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub host: String,
    pub port: Option<u16>,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub realm: String,
    pub realm_separator: Option<String>,
    #[serde(default = "default_group_service")]
    pub group_service: String,
}

impl ServerConfig {
    /// Names of the connection parameters that are unset.
    pub fn missing_fields(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.domain.trim().is_empty() {
            missing.push("server.domain".to_string());
        }
        if self.host.trim().is_empty() {
            missing.push("server.host".to_string());
        }
        if self.port.is_none_or(|port| port == 0) {
            missing.push("server.port".to_string());
        }
        if self.path.trim().is_empty() {
            missing.push("server.path".to_string());
        }
        missing
    }

    /// `wss://host:port/path`
    pub fn websocket_uri(&self) -> String {
        format!(
            "wss://{}:{}{}",
            self.host,
            self.port.unwrap_or_default(),
            self.path
        )
    }

    /// The realm separator, only when a realm is also configured.
    pub fn realm_prefix(&self) -> Option<(&str, &str)> {
        match self.realm_separator.as_deref() {
            Some(sep) if !self.realm.is_empty() && !sep.is_empty() => Some((&self.realm, sep)),
            _ => None,
        }
    }

    /// Address of the multi-user chat service, e.g. `conference.example.com`.
    pub fn group_service_jid(&self) -> String {
        format!("{}.{}", self.group_service, self.domain)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_composing_pause_secs")]
    pub composing_pause_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_status")]
    pub default_status: String,
    #[serde(default = "default_initial_show")]
    pub initial_show: String,
}

impl SessionConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn composing_pause(&self) -> Duration {
        Duration::from_secs(self.composing_pause_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_secs: default_keepalive_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            composing_pause_secs: default_composing_pause_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            default_status: default_status(),
            initial_show: default_initial_show(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct ConfigOverrides {
    user: Option<String>,
    password: Option<String>,
    server: Option<String>,
    domain: Option<String>,
    log_level: Option<String>,
}

fn default_group_service() -> String {
    "conference".to_string()
}

fn default_keepalive_interval_secs() -> u64 {
    45
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_composing_pause_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_status() -> String {
    "Available".to_string()
}

fn default_initial_show() -> String {
    "chat".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_channel_capacity() -> usize {
    1024
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

const VALID_SHOW_VALUES: &[&str] = &["chat", "available", "away", "xa", "dnd"];

const DEFAULT_CONFIG_TOML: &str = r#"[account]
user = ""
password = ""
# resource = "parley"

[server]
domain = ""
host = ""
# port = 5281
path = "/xmpp-websocket"
# realm = ""
# realm_separator = "."
group_service = "conference"

[session]
keepalive_interval_secs = 45
request_timeout_secs = 30
composing_pause_secs = 10
connect_timeout_secs = 30
default_status = "Available"
initial_show = "chat"

[logging]
level = "info"

[event_bus]
channel_capacity = 1024
"#;

/// Platform configuration file path.
#[cfg(feature = "native")]
pub fn config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("im", "parley", "parley") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        PathBuf::from("config.toml")
    }
}

/// Load configuration from the platform config path, merging environment
/// variable overrides.
#[cfg(feature = "native")]
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(config_path())
}

pub fn load_config_from(path: PathBuf) -> Result<Config, ConfigError> {
    load_config_from_with_overrides(path, config_overrides_from_env())
}

pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    load_config_from_str_with_overrides(toml_str, config_overrides_from_env())
}

fn load_config_from_with_overrides(
    path: PathBuf,
    overrides: ConfigOverrides,
) -> Result<Config, ConfigError> {
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            create_default_config(&path)?;
            tracing::info!(path = %path.display(), "wrote default configuration");
            return Err(ConfigError::MissingRequiredFields {
                fields: vec!["account.user".to_string(), "account.password".to_string()],
            });
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };

    load_config_from_str_with_overrides(&contents, overrides)
}

fn load_config_from_str_with_overrides(
    toml_str: &str,
    overrides: ConfigOverrides,
) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(toml_str).map_err(|e| {
        let (line, column) = e.span().map_or((0, 0), |span| {
            let before = &toml_str[..span.start];
            let line = before.chars().filter(|&c| c == '\n').count() + 1;
            let column = before
                .rfind('\n')
                .map_or(span.start + 1, |nl| span.start - nl);
            (line, column)
        });
        ConfigError::InvalidToml {
            line,
            column,
            message: e.message().to_string(),
        }
    })?;

    apply_overrides(&mut config, overrides);
    validate(&config)?;

    Ok(config)
}

fn config_overrides_from_env() -> ConfigOverrides {
    ConfigOverrides {
        user: std::env::var("PARLEY_USER").ok(),
        password: std::env::var("PARLEY_PASSWORD").ok(),
        server: std::env::var("PARLEY_SERVER").ok(),
        domain: std::env::var("PARLEY_DOMAIN").ok(),
        log_level: std::env::var("PARLEY_LOG_LEVEL").ok(),
    }
}

fn apply_overrides(config: &mut Config, overrides: ConfigOverrides) {
    if let Some(user) = overrides.user {
        config.account.user = user;
    }
    if let Some(password) = overrides.password {
        config.account.password = password;
    }
    if let Some(host) = overrides.server {
        config.server.host = host;
    }
    if let Some(domain) = overrides.domain {
        config.server.domain = domain;
    }
    if let Some(level) = overrides.log_level {
        config.logging.level = level;
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let mut missing = Vec::new();

    if config.account.user.is_empty() {
        missing.push("account.user".to_string());
    }
    if config.account.password.is_empty() {
        missing.push("account.password".to_string());
    }

    if !missing.is_empty() {
        return Err(ConfigError::MissingRequiredFields { fields: missing });
    }

    if !VALID_LOG_LEVELS.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::InvalidValue {
            field: "logging.level".to_string(),
            message: format!("must be one of: {}", VALID_LOG_LEVELS.join(", ")),
        });
    }

    if !VALID_SHOW_VALUES.contains(&config.session.initial_show.as_str()) {
        return Err(ConfigError::InvalidValue {
            field: "session.initial_show".to_string(),
            message: format!("must be one of: {}", VALID_SHOW_VALUES.join(", ")),
        });
    }

    let intervals = [
        ("session.keepalive_interval_secs", config.session.keepalive_interval_secs),
        ("session.request_timeout_secs", config.session.request_timeout_secs),
        ("session.composing_pause_secs", config.session.composing_pause_secs),
        ("session.connect_timeout_secs", config.session.connect_timeout_secs),
    ];
    for (field, value) in intervals {
        if value == 0 {
            return Err(ConfigError::InvalidValue {
                field: field.to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
    }

    if config.event_bus.channel_capacity == 0 {
        return Err(ConfigError::InvalidValue {
            field: "event_bus.channel_capacity".to_string(),
            message: "must be greater than zero".to_string(),
        });
    }

    Ok(())
}

fn create_default_config(path: &PathBuf) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG_TOML)?;
    Ok(())
}
