//! Shared configuration for totosync.
//!
//! TOML profiles, `TOTOSYNC_` environment overrides, token resolution
//! (env var, keyring, plaintext) and translation to
//! `totosync_core::SyncConfig`. The CLI layers its flag overrides on top.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use totosync_api::{StaticEndpoint, TokenProvider, TransportConfig};
use totosync_core::config::{DEFAULT_POLL_INTERVAL, DEFAULT_SCAN_POLL_INTERVAL};
use totosync_core::{BackoffSchedule, BaselineOrdering, EntitySpec, SyncConfig};

/// Keyring service name; entries are `<profile>/token`.
pub const KEYRING_SERVICE: &str = "totosync";

/// Prefix for environment overrides, e.g. `TOTOSYNC_DEFAULT_PROFILE` or
/// `TOTOSYNC_PROFILES__HOME__ENDPOINT`.
pub const ENV_PREFIX: &str = "TOTOSYNC_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

    #[error("no token configured for profile '{profile}'")]
    NoToken { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    /// Named backend profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up a profile by name, falling back to `default_profile`.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into());
        let profile = self
            .profiles
            .get(&name)
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.clone(),
            })?;
        Ok((name, profile))
    }
}

/// A named backend profile.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    /// Backend base URL (e.g., "http://192.168.1.1:8080").
    pub endpoint: String,

    /// Bearer token (plaintext, prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the token.
    pub token_env: Option<String>,

    /// Reconnect delays in milliseconds; the last one repeats.
    pub backoff_ms: Option<Vec<u64>>,

    /// Baseline polling interval while the push channel is down.
    pub poll_interval_secs: Option<u64>,

    /// Scan status polling interval while a scan runs.
    pub scan_poll_interval_secs: Option<u64>,

    /// Entity event prefix (`device` for `device_upsert`).
    pub entity_prefix: Option<String>,

    /// Field that identifies an entity (`ip`).
    pub entity_key: Option<String>,

    /// `arrival-order` or `push-wins`.
    pub ordering: Option<BaselineOrdering>,

    /// Events kept as latest-value slots.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub latest_events: Vec<String>,

    /// REST request timeout.
    pub timeout_secs: Option<u64>,

    /// Accept self-signed certificates.
    pub insecure: Option<bool>,
}

impl Profile {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// TOML rendering with any plaintext token masked.
    pub fn to_toml_redacted(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        if shown.token.is_some() {
            shown.token = Some("********".into());
        }
        Ok(toml::to_string_pretty(&shown)?)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "totoro", "totosync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("totosync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file + environment. A missing file is not an
/// error; defaults and environment still apply.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        // The CLI reads these through its own flags.
        .merge(
            Env::prefixed(ENV_PREFIX)
                .ignore(&["config", "profile", "endpoint", "token"])
                .split("__"),
        );

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Token resolution ────────────────────────────────────────────────

/// Where a profile's token currently comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    Env(String),
    Keyring,
    Plaintext,
    None,
}

impl std::fmt::Display for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env(var) => write!(f, "env:{var}"),
            Self::Keyring => f.write_str("keyring"),
            Self::Plaintext => f.write_str("config"),
            Self::None => f.write_str("none"),
        }
    }
}

fn keyring_token(profile_name: &str) -> Option<String> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token")).ok()?;
    entry.get_password().ok()
}

fn lookup(profile: &Profile, profile_name: &str) -> Option<(TokenSource, String)> {
    // 1. Profile's token_env → env var lookup
    if let Some(ref env_name) = profile.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some((TokenSource::Env(env_name.clone()), val));
        }
    }

    // 2. System keyring
    if let Some(secret) = keyring_token(profile_name) {
        return Some((TokenSource::Keyring, secret));
    }

    // 3. Plaintext in config
    profile
        .token
        .clone()
        .map(|token| (TokenSource::Plaintext, token))
}

/// Resolve the token from the credential chain.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    lookup(profile, profile_name)
        .map(|(_, token)| SecretString::from(token))
        .ok_or_else(|| ConfigError::NoToken {
            profile: profile_name.into(),
        })
}

/// Report which step of the chain would supply the token.
pub fn token_source(profile: &Profile, profile_name: &str) -> TokenSource {
    lookup(profile, profile_name).map_or(TokenSource::None, |(source, _)| source)
}

/// [`TokenProvider`] that walks the credential chain on every call, so a
/// rotated token is picked up on the next reconnect.
#[derive(Debug, Clone)]
pub struct ProfileTokenProvider {
    profile: Profile,
    profile_name: String,
}

impl ProfileTokenProvider {
    pub fn new(profile: Profile, profile_name: impl Into<String>) -> Self {
        Self {
            profile,
            profile_name: profile_name.into(),
        }
    }
}

impl TokenProvider for ProfileTokenProvider {
    fn token(&self) -> Option<SecretString> {
        resolve_token(&self.profile, &self.profile_name).ok()
    }
}

// ── Profile translation ─────────────────────────────────────────────

/// Validate the profile's endpoint.
pub fn profile_endpoint(profile: &Profile) -> Result<StaticEndpoint, ConfigError> {
    let url: Url = profile
        .endpoint
        .parse()
        .map_err(|_| invalid("endpoint", format!("invalid URL: {}", profile.endpoint)))?;
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => Ok(StaticEndpoint::new(url)),
        other => Err(invalid(
            "endpoint",
            format!("unsupported scheme '{other}' (expected http, https, ws or wss)"),
        )),
    }
}

fn secs(field: &str, value: Option<u64>, default: Duration) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(0) => Err(invalid(field, "must be greater than zero")),
        Some(n) => Ok(Duration::from_secs(n)),
    }
}

fn non_empty(field: &str, value: Option<&String>, default: &str) -> Result<String, ConfigError> {
    match value {
        None => Ok(default.to_owned()),
        Some(v) if v.trim().is_empty() => Err(invalid(field, "must not be empty")),
        Some(v) => Ok(v.clone()),
    }
}

/// Build a `SyncConfig` from a profile.
pub fn profile_to_sync_config(profile: &Profile) -> Result<SyncConfig, ConfigError> {
    let backoff = match &profile.backoff_ms {
        Some(steps) => BackoffSchedule::from_millis(steps)
            .map_err(|_| invalid("backoff_ms", "must list at least one delay"))?,
        None => BackoffSchedule::default(),
    };

    let defaults = EntitySpec::default();
    let entity = EntitySpec::new(
        non_empty(
            "entity_prefix",
            profile.entity_prefix.as_ref(),
            &defaults.event_prefix,
        )?,
        non_empty("entity_key", profile.entity_key.as_ref(), &defaults.key_field)?,
    );

    Ok(SyncConfig {
        backoff,
        poll_interval: secs(
            "poll_interval_secs",
            profile.poll_interval_secs,
            DEFAULT_POLL_INTERVAL,
        )?,
        scan_poll_interval: secs(
            "scan_poll_interval_secs",
            profile.scan_poll_interval_secs,
            DEFAULT_SCAN_POLL_INTERVAL,
        )?,
        entity,
        ordering: profile.ordering.unwrap_or_default(),
        latest_events: profile.latest_events.iter().cloned().collect::<BTreeSet<_>>(),
    })
}

/// Build the REST transport settings from a profile.
pub fn profile_to_transport_config(profile: &Profile) -> Result<TransportConfig, ConfigError> {
    let defaults = TransportConfig::default();
    Ok(TransportConfig {
        timeout: secs("timeout_secs", profile.timeout_secs, defaults.timeout)?,
        accept_invalid_certs: profile.insecure.unwrap_or(defaults.accept_invalid_certs),
    })
}
