// ── Injected credentials and endpoint resolution ──
//
// The token and the backend base URL are owned by the host application.
// They are handed to the sync subsystem as trait objects at construction
// time, so nothing here reads global state.

use secrecy::SecretString;
use url::Url;

use crate::error::Error;

/// Supplies the bearer token used for the push channel and REST calls.
///
/// Called once per connection attempt: a token that rotates while a
/// channel is open is only picked up on the next reconnect.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<SecretString>;
}

/// Resolves the backend base URL (e.g. `http://192.168.1.1:8080`).
pub trait EndpointResolver: Send + Sync {
    fn base_url(&self) -> Result<Url, Error>;
}

/// A fixed token (or none, for unauthenticated backends).
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<SecretString>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(SecretString::from(token.into())))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<SecretString> {
        self.0.clone()
    }
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<SecretString> + Send + Sync,
{
    fn token(&self) -> Option<SecretString> {
        self()
    }
}

/// A fixed base URL.
#[derive(Debug, Clone)]
pub struct StaticEndpoint(Url);

impl StaticEndpoint {
    pub fn new(url: Url) -> Self {
        Self(url)
    }

    pub fn parse(raw: &str) -> Result<Self, Error> {
        Ok(Self(Url::parse(raw)?))
    }
}

impl EndpointResolver for StaticEndpoint {
    fn base_url(&self) -> Result<Url, Error> {
        Ok(self.0.clone())
    }
}

impl<F> EndpointResolver for F
where
    F: Fn() -> Result<Url, Error> + Send + Sync,
{
    fn base_url(&self) -> Result<Url, Error> {
        self()
    }
}
