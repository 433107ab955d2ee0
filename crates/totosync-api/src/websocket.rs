//! Push-channel transport.
//!
//! [`PushConnector`] is the seam between the connection manager and the
//! network: it opens one channel and hands back a stream of text frames.
//! [`WsConnector`] is the production implementation on top of
//! `tokio-tungstenite`. Reconnection is *not* handled here; the stream
//! simply ends (or yields an error) when the channel drops.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures_util::StreamExt;
//! use totosync_api::websocket::{PushConnector, WsConnector};
//!
//! let url = url::Url::parse("ws://192.168.1.1:8080/ws?token=abc")?;
//! let mut frames = WsConnector::new().open(url).await?;
//! while let Some(frame) = frames.next().await {
//!     println!("{}", frame?);
//! }
//! ```

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use crate::error::Error;

/// Text frames from one open channel. The stream ends when the peer
/// closes cleanly; an `Err` item is always the last item.
pub type FrameStream = BoxStream<'static, Result<String, Error>>;

/// Opens push channels.
///
/// Object-safe so sessions can hold an `Arc<dyn PushConnector>` and tests
/// can substitute a scripted connector.
pub trait PushConnector: Send + Sync {
    fn open(&self, url: Url) -> BoxFuture<'static, Result<FrameStream, Error>>;
}

// ── WsConnector ──────────────────────────────────────────────────────

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl PushConnector for WsConnector {
    fn open(&self, url: Url) -> BoxFuture<'static, Result<FrameStream, Error>> {
        async move {
            tracing::info!(url = %redacted(&url), "Connecting to push channel");

            let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

            tracing::info!("Push channel connected");
            Ok(text_frames(ws_stream))
        }
        .boxed()
    }
}

/// Strip the query string (which carries the token) for logging.
pub fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

// ── Frame filtering ──────────────────────────────────────────────────

/// Reduce a raw WebSocket message stream to text payloads.
///
/// Pings are answered by tungstenite itself; binary and pong frames are
/// ignored. A close frame with a payload is reported as
/// [`Error::WebSocketClosed`] so the reason shows up in the connection
/// state; a bare close or end-of-stream just ends the stream.
pub(crate) fn text_frames<S>(mut raw: S) -> FrameStream
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin + Send + 'static,
{
    Box::pin(async_stream::stream! {
        while let Some(frame) = raw.next().await {
            match frame {
                Ok(Message::Text(text)) => yield Ok(text.as_str().to_owned()),
                Ok(Message::Ping(_)) => {
                    tracing::trace!("push channel ping");
                }
                Ok(Message::Close(frame)) => {
                    if let Some(cf) = frame {
                        tracing::info!(
                            code = %cf.code,
                            reason = %cf.reason,
                            "Push channel close frame received"
                        );
                        yield Err(Error::WebSocketClosed {
                            code: u16::from(cf.code),
                            reason: cf.reason.as_str().to_owned(),
                        });
                    } else {
                        tracing::info!("Push channel close frame received (no payload)");
                    }
                    break;
                }
                Ok(_) => {
                    // Binary, Pong, raw Frame -- ignore
                }
                Err(e) => {
                    yield Err(Error::WebSocketConnect(e.to_string()));
                    break;
                }
            }
        }
    })
}
