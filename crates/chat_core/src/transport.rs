use async_trait::async_trait;
use futures::{stream::BoxStream, SinkExt, StreamExt};
use shared::protocol::{ClientFrame, ServerEvent};
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};
use tracing::warn;

use crate::error::{ConnectFailure, TransportError};

/// Inbound half of a live channel. Ends when the server closes the channel;
/// yields an error on transport failure.
pub type EventStream = BoxStream<'static, Result<ServerEvent, TransportError>>;

/// Outbound half of a live channel.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: ClientFrame) -> Result<(), TransportError>;
}

/// A freshly established bidirectional channel to the messaging server.
pub struct TransportChannel {
    pub sink: Box<dyn FrameSink>,
    pub events: EventStream,
}

/// Factory for live channels. One `connect` call per attempt; the reconnect
/// state machine lives in `ConnectionManager`, not here.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, auth_token: &str) -> Result<TransportChannel, ConnectFailure>;
}

/// Websocket transport against the messaging server's `/ws` endpoint.
pub struct WsTransport {
    server_url: String,
}

impl WsTransport {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, auth_token: &str) -> Result<TransportChannel, ConnectFailure> {
        let ws_url = derive_ws_url(&self.server_url)?;
        let ws_url = format!("{ws_url}/ws?token={auth_token}");
        let (ws_stream, _) = connect_async(&ws_url).await.map_err(map_connect_error)?;
        let (writer, reader) = ws_stream.split();

        let events = reader
            .filter_map(|msg| async move {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => Some(Ok(event)),
                        Err(err) => {
                            warn!(%err, "dropping undecodable server event");
                            None
                        }
                    },
                    // Graceful close ends the stream; the state machine treats
                    // that the same as any other channel loss.
                    Ok(Message::Close(_)) => None,
                    Ok(_) => None,
                    Err(err) => Some(Err(TransportError(format!(
                        "websocket receive failed: {err}"
                    )))),
                }
            })
            .boxed();

        Ok(TransportChannel {
            sink: Box::new(WsFrameSink { writer }),
            events,
        })
    }
}

struct WsFrameSink {
    writer: futures::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        Message,
    >,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send(&mut self, frame: ClientFrame) -> Result<(), TransportError> {
        let text = serde_json::to_string(&frame)
            .map_err(|err| TransportError(format!("failed to encode frame: {err}")))?;
        self.writer
            .send(Message::Text(text))
            .await
            .map_err(|err| TransportError(format!("websocket send failed: {err}")))
    }
}

fn derive_ws_url(server_url: &str) -> Result<String, TransportError> {
    if let Some(rest) = server_url.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else {
        Err(TransportError(
            "server_url must start with http:// or https://".into(),
        ))
    }
}

fn map_connect_error(err: tungstenite::Error) -> ConnectFailure {
    match err {
        tungstenite::Error::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            ConnectFailure::AuthRejected(format!("server returned {}", response.status()))
        }
        other => ConnectFailure::Transport(TransportError(other.to_string())),
    }
}
