// ── Core error types ──
//
// User-facing errors from totosync-core. Transport failures on the push
// channel never surface here (they only move `ConnectionState`); these
// are what baseline fetches, configuration and session setup can return.
// The `From<totosync_api::Error>` impl translates transport-layer errors.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach backend: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Backend request timed out")]
    Timeout,

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// Envelope `code` or HTTP status.
        code: Option<i64>,
    },

    #[error("Unexpected response payload: {message}")]
    InvalidPayload { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Session errors ───────────────────────────────────────────────
    #[error("Session has been torn down")]
    SessionClosed,

    #[error("Baseline fetch '{fetcher}' failed: {source}")]
    Baseline {
        fetcher: String,
        #[source]
        source: Box<CoreError>,
    },
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<totosync_api::Error> for CoreError {
    fn from(err: totosync_api::Error) -> Self {
        use totosync_api::Error as Api;

        match err {
            Api::Authentication { message } => CoreError::AuthenticationFailed { message },
            Api::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        code: e.status().map(|s| i64::from(s.as_u16())),
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("invalid endpoint URL: {e}"),
            },
            Api::UnsupportedScheme { .. } => CoreError::Config {
                message: err.to_string(),
            },
            Api::Api { code, message } => CoreError::Api {
                message,
                code: Some(code),
            },
            Api::WebSocketConnect(reason) => CoreError::ConnectionFailed { reason },
            Api::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                reason: format!("closed with code {code}: {reason}"),
            },
            Api::Deserialization { message, .. } => CoreError::InvalidPayload { message },
        }
    }
}
