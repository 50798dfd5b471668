use crate::error::Result;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{BoxFuture, ConnectRequest, Connector, Transport};

pub const PROTOCOL_HEADER: &str = "OpenAI-Beta";
pub const PROTOCOL_VERSION: &str = "realtime=v1";

#[derive(Debug)]
pub struct WsStream(WebSocketStream<MaybeTlsStream<TcpStream>>);

impl WsStream {
    pub(crate) const fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self(stream)
    }
}

/// Builds `<endpoint>?model=<model>`.
///
/// # Errors
/// Returns an error if the endpoint is not a valid URL.
pub fn realtime_url(endpoint: &str, model: &str) -> Result<Url> {
    let mut url = Url::parse(endpoint)?;
    url.query_pairs_mut().append_pair("model", model);
    Ok(url)
}

/// Establish a WebSocket connection to the Realtime API.
///
/// # Errors
/// Returns an error if the URL or headers are invalid or the handshake fails.
pub async fn connect(request: &ConnectRequest) -> Result<WsStream> {
    let url = realtime_url(&request.endpoint, &request.model)?;

    let auth_header = HeaderValue::from_str(&format!("Bearer {}", request.api_key))?;

    let mut req = tokio_tungstenite::tungstenite::client::IntoClientRequest::into_client_request(
        url.as_str(),
    )?;
    let h = req.headers_mut();
    h.insert(AUTHORIZATION, auth_header);
    h.insert(PROTOCOL_HEADER, HeaderValue::from_static(PROTOCOL_VERSION));
    let (ws_stream, _) = connect_async(req).await?;

    tracing::info!(model = %request.model, "Connected to OpenAI Realtime");

    Ok(WsStream::new(ws_stream))
}

/// Text-frame transport over a live WebSocket.
#[derive(Debug)]
pub struct WsTransport {
    stream: WsStream,
}

impl WsTransport {
    #[must_use]
    pub const fn new(stream: WsStream) -> Self {
        Self { stream }
    }

    async fn read_text(&mut self) -> Result<Option<String>> {
        while let Some(msg) = self.stream.0.next().await {
            match msg? {
                Message::Text(text) => return Ok(Some(text.as_str().to_owned())),
                Message::Close(frame) => {
                    tracing::info!(?frame, "WebSocket connection closed by server");
                    return Ok(None);
                }
                Message::Ping(payload) => {
                    tracing::debug!("Received Ping, sending Pong");
                    self.stream.0.send(Message::Pong(payload)).await?;
                }
                Message::Binary(bytes) => {
                    tracing::debug!(len = bytes.len(), "Ignoring binary frame");
                }
                Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        Ok(None)
    }
}

impl Transport for WsTransport {
    fn send_text(&mut self, frame: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.stream.0.send(Message::Text(frame.into())).await?;
            Ok(())
        })
    }

    fn next_text(&mut self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(self.read_text())
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.stream.0.close(None).await?;
            Ok(())
        })
    }
}

/// Opens real WebSocket connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, request: ConnectRequest) -> BoxFuture<'static, Result<Box<dyn Transport>>> {
        Box::pin(async move {
            let stream = connect(&request).await?;
            Ok(Box::new(WsTransport::new(stream)) as Box<dyn Transport>)
        })
    }
}
