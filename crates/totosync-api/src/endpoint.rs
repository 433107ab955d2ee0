// ── URL construction ──
//
// The push channel lives at `{base}/ws`, with `http(s)` mapped to
// `ws(s)`. The token travels as a `token` query parameter because
// browsers (and the deployed backends) cannot set headers on upgrade.

use secrecy::{ExposeSecret, SecretString};
use url::{Position, Url};

use crate::error::Error;

/// Path of the push endpoint relative to the base URL.
pub const PUSH_PATH: &str = "ws";

/// Build the push-channel URL from a backend base URL.
///
/// `http://host:8080/admin` becomes `ws://host:8080/admin/ws?token=...`.
/// Any query or fragment on the base URL is discarded.
pub fn push_url(base: &Url, token: Option<&SecretString>) -> Result<Url, Error> {
    let scheme = match base.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(Error::UnsupportedScheme {
                scheme: other.to_owned(),
            });
        }
    };

    let authority = &base[Position::BeforeHost..Position::AfterPort];
    let path = base.path().trim_end_matches('/');
    let mut url = Url::parse(&format!("{scheme}://{authority}{path}/{PUSH_PATH}"))?;

    if let Some(token) = token {
        url.query_pairs_mut()
            .append_pair("token", token.expose_secret());
    }

    Ok(url)
}

/// Build a REST URL: `{base}/{path}` with exactly one slash between.
pub fn api_url(base: &Url, path: &str) -> Result<Url, Error> {
    let base = base.as_str().trim_end_matches('/');
    let path = path.trim_start_matches('/');
    Ok(Url::parse(&format!("{base}/{path}"))?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn http_maps_to_ws() {
        let u = push_url(&url("http://192.168.1.1:8080"), None).unwrap();
        assert_eq!(u.as_str(), "ws://192.168.1.1:8080/ws");
    }

    #[test]
    fn https_maps_to_wss_and_keeps_base_path() {
        let u = push_url(&url("https://admin.local/console/"), None).unwrap();
        assert_eq!(u.as_str(), "wss://admin.local/console/ws");
    }

    #[test]
    fn token_is_query_encoded() {
        let token = SecretString::from("a b&c".to_string());
        let u = push_url(&url("http://h:1"), Some(&token)).unwrap();
        let pairs: Vec<(String, String)> = u
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs, vec![("token".to_string(), "a b&c".to_string())]);
    }

    #[test]
    fn base_query_is_dropped() {
        let u = push_url(&url("http://h:1/?x=1"), None).unwrap();
        assert_eq!(u.as_str(), "ws://h:1/ws");
    }

    #[test]
    fn ipv6_host_keeps_brackets() {
        let u = push_url(&url("http://[::1]:8080"), None).unwrap();
        assert_eq!(u.as_str(), "ws://[::1]:8080/ws");
    }

    #[test]
    fn unsupported_scheme() {
        let err = push_url(&url("ftp://h"), None).unwrap_err();
        assert!(matches!(err, Error::UnsupportedScheme { .. }));
    }

    #[test]
    fn api_url_joins_cleanly() {
        let u = api_url(&url("http://h:8080/"), "/api/v1/devices").unwrap();
        assert_eq!(u.as_str(), "http://h:8080/api/v1/devices");
    }
}
