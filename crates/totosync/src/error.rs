//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use totosync_config::ConfigError;
use totosync_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach backend: {reason}")]
    #[diagnostic(
        code(totosync::connection_failed),
        help(
            "Check that the backend is running and reachable.\n\
             Try: totosync -e http://<host>:8080 watch --once"
        )
    )]
    ConnectionFailed { reason: String },

    #[error("Backend request timed out")]
    #[diagnostic(code(totosync::timeout), help("Raise timeout_secs in your profile."))]
    Timeout,

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(totosync::auth_failed),
        help(
            "Pass a token with --token, set token_env in your profile,\n\
             or store one in the keyring under service 'totosync', entry '<profile>/token'."
        )
    )]
    AuthFailed { message: String },

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error{}: {message}", code_suffix(.code))]
    #[diagnostic(code(totosync::api_error))]
    Api { code: Option<i64>, message: String },

    #[error("Unexpected response from backend: {message}")]
    #[diagnostic(code(totosync::invalid_payload))]
    InvalidPayload { message: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(totosync::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Add one to {path}, or pass --endpoint."
        )
    )]
    ProfileNotFound {
        name: String,
        available: String,
        path: String,
    },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(totosync::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(totosync::config))]
    Config(ConfigError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to encode output: {0}")]
    #[diagnostic(code(totosync::json))]
    Json(#[from] serde_json::Error),
}

#[allow(clippy::ref_option)]
fn code_suffix(code: &Option<i64>) -> String {
    code.map(|c| format!(" ({c})")).unwrap_or_default()
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout => exit_code::TIMEOUT,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoToken { profile } => CliError::AuthFailed {
                message: format!("no token configured for profile '{profile}'"),
            },
            other => CliError::Config(other),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { reason } => CliError::ConnectionFailed { reason },
            CoreError::AuthenticationFailed { message } => CliError::AuthFailed { message },
            CoreError::Timeout => CliError::Timeout,
            CoreError::Api { message, code } => CliError::Api { code, message },
            CoreError::InvalidPayload { message } => CliError::InvalidPayload { message },
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::SessionClosed => CliError::ConnectionFailed {
                reason: "session already torn down".into(),
            },
            // The fetcher name is in the log; the cause decides the exit code.
            CoreError::Baseline { source, .. } => CliError::from(*source),
        }
    }
}
