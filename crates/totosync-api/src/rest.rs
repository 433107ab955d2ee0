// Baseline REST client
//
// Fetches full snapshots from the admin backend. Every response is wrapped
// in `{ code, message, data, timestamp }`; anything other than HTTP 2xx with
// `code == 200` is an error. Callers only ever see the unwrapped `data`.

use std::sync::Arc;

use secrecy::ExposeSecret;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::auth::{EndpointResolver, TokenProvider};
use crate::endpoint::api_url;
use crate::error::Error;
use crate::transport::TransportConfig;

pub const SYSTEM_INFO_PATH: &str = "/api/v1/system/info";
pub const SCAN_STATUS_PATH: &str = "/api/v1/devices/scan/status";
pub const DEVICES_PATH: &str = "/api/v1/devices";

/// Page size requested for the device list (the backend caps lower).
pub const DEVICE_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

/// `data` of `GET /api/v1/devices`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DevicePage {
    #[serde(default)]
    pub devices: Vec<Value>,
    #[serde(default)]
    pub total: u64,
}

/// Raw HTTP client for the baseline endpoints.
///
/// The endpoint and token are resolved on every request, so a rotated
/// token or a moved backend is picked up without rebuilding the client.
pub struct BaselineClient {
    http: reqwest::Client,
    endpoint: Arc<dyn EndpointResolver>,
    token: Arc<dyn TokenProvider>,
}

impl BaselineClient {
    pub fn new(
        endpoint: Arc<dyn EndpointResolver>,
        token: Arc<dyn TokenProvider>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self::with_client(transport.build_client()?, endpoint, token))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        endpoint: Arc<dyn EndpointResolver>,
        token: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            http,
            endpoint,
            token,
        }
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// `GET /api/v1/system/info`
    pub async fn system_info(&self) -> Result<Value, Error> {
        self.get(SYSTEM_INFO_PATH, &[]).await
    }

    /// `GET /api/v1/devices/scan/status`
    pub async fn scan_status(&self) -> Result<Value, Error> {
        self.get(SCAN_STATUS_PATH, &[]).await
    }

    /// `GET /api/v1/devices?page=1&page_size=1000`
    pub async fn devices(&self) -> Result<DevicePage, Error> {
        let page_size = DEVICE_PAGE_SIZE.to_string();
        self.get(DEVICES_PATH, &[("page", "1"), ("page_size", &page_size)])
            .await
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, Error> {
        let mut url = api_url(&self.endpoint.base_url()?, path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Send a GET request and unwrap the envelope.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, Error> {
        let url = self.url(path, query)?;
        debug!("GET {}", url);

        let mut builder = self.http.get(url);
        if let Some(token) = self.token.token() {
            builder = builder.bearer_auth(token.expose_secret());
        }
        let resp = builder.send().await?;

        parse_envelope(resp).await
    }
}

/// Parse the `{ code, message, data }` envelope.
///
/// A `data: null` on success deserializes into `T` from JSON `null`, so
/// `Value` callers get `Value::Null` and struct callers get an error.
async fn parse_envelope<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();
    let body = resp.text().await?;

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::Authentication {
            message: message_from(&body).unwrap_or_else(|| "token rejected".into()),
        });
    }

    let envelope: ApiEnvelope<Value> = match serde_json::from_str(&body) {
        Ok(env) => env,
        Err(e) if status.is_success() => {
            let preview = &body[..floor_char_boundary(&body, 200)];
            return Err(Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body,
            });
        }
        Err(_) => {
            let preview = &body[..floor_char_boundary(&body, 200)];
            return Err(Error::Api {
                code: i64::from(status.as_u16()),
                message: format!("HTTP {status}: {preview}"),
            });
        }
    };

    let code = envelope.code.unwrap_or(i64::from(status.as_u16()));
    if !status.is_success() || code != 200 {
        return Err(Error::Api {
            code: if status.is_success() {
                code
            } else {
                i64::from(status.as_u16())
            },
            message: envelope
                .message
                .unwrap_or_else(|| format!("HTTP {status}")),
        });
    }

    let data = envelope.data.unwrap_or(Value::Null);
    serde_json::from_value(data).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body,
    })
}

fn message_from(body: &str) -> Option<String> {
    serde_json::from_str::<ApiEnvelope<Value>>(body)
        .ok()
        .and_then(|env| env.message)
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}
