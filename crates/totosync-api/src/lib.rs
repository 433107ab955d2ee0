// totosync-api: wire types and transport adapters for the Totoro admin backend
// (WebSocket push channel + baseline REST API)

pub mod auth;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod rest;
pub mod transport;
pub mod websocket;

pub use auth::{EndpointResolver, StaticEndpoint, StaticToken, TokenProvider};
pub use envelope::{Envelope, EnvelopeKind};
pub use error::Error;
pub use rest::{BaselineClient, DevicePage};
pub use transport::TransportConfig;
pub use websocket::{FrameStream, PushConnector, WsConnector};
