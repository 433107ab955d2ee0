#![allow(clippy::unwrap_used)]
// End-to-end tests for `WsConnector` against a local tungstenite server.

use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use url::Url;

use totosync_api::endpoint::push_url;
use totosync_api::{Envelope, Error, PushConnector, WsConnector};

/// Accept one connection, report the request URI, send `frames`, then close.
async fn serve_once(frames: Vec<Message>) -> (Url, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (uri_tx, uri_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let _ = uri_tx.send(req.uri().to_string());
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
            .await
            .unwrap();
        for frame in frames {
            ws.send(frame).await.unwrap();
        }
        let _ = ws.close(None).await;
    });

    (Url::parse(&format!("http://{addr}")).unwrap(), uri_rx)
}

#[tokio::test]
async fn test_receives_text_frames_until_close() {
    let hello = Envelope::hello(serde_json::json!({"device_id": "d1"}), "t0").to_frame();
    let event = Envelope::event("scan_progress", serde_json::json!({"progress": 42}), "t1")
        .to_frame();
    let (base, uri_rx) = serve_once(vec![
        Message::Text(hello.clone().into()),
        Message::Binary(vec![0, 1].into()),
        Message::Text(event.clone().into()),
    ])
    .await;

    let token = SecretString::from("a b&c".to_string());
    let url = push_url(&base, Some(&token)).unwrap();
    let frames: Vec<Result<String, Error>> =
        WsConnector::new().open(url).await.unwrap().collect().await;

    let uri = uri_rx.await.unwrap();
    assert_eq!(uri, "/ws?token=a+b%26c");

    let texts: Vec<String> = frames.into_iter().map(Result::unwrap).collect();
    assert_eq!(texts, vec![hello, event]);
}

#[tokio::test]
async fn test_connect_refused_is_connect_error() {
    let url = Url::parse("ws://127.0.0.1:1/ws").unwrap();
    let result = WsConnector::new().open(url).await;
    assert!(
        matches!(result, Err(Error::WebSocketConnect(_))),
        "expected WebSocketConnect"
    );
}
