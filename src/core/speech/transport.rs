//! Transport seam for the upstream stream.
//!
//! The stream client talks to the service through the [`StreamTransport`]
//! trait so session logic can be driven against an in-memory double. The
//! production implementation is a WebSocket carrying one JSON envelope per
//! text frame.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use http::header::AUTHORIZATION;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{SpeechConfig, SpeechError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of an established stream. Each `send` carries one complete
/// wire frame.
#[async_trait]
pub trait StreamSink: Send {
    async fn send(&mut self, frame: String) -> Result<(), SpeechError>;
    async fn close(&mut self) -> Result<(), SpeechError>;
}

/// Read half of an established stream. `None` means the connection is gone.
#[async_trait]
pub trait StreamSource: Send {
    async fn next_frame(&mut self) -> Option<Result<String, SpeechError>>;
}

/// Factory for one connection to the speech service.
#[async_trait]
pub trait StreamTransport: Send {
    async fn connect(
        &mut self,
    ) -> Result<(Box<dyn StreamSink>, Box<dyn StreamSource>), SpeechError>;
}

// =============================================================================
// WebSocket transport
// =============================================================================

/// WebSocket transport to the speech service.
pub struct WsTransport {
    url: Url,
    api_key: Option<String>,
}

impl WsTransport {
    pub fn from_config(config: &SpeechConfig) -> Result<Self, SpeechError> {
        let mut url = Url::parse(&config.endpoint)
            .map_err(|e| SpeechError::InvalidEndpoint(e.to_string()))?;
        url.query_pairs_mut().append_pair("model", &config.model_id);
        Ok(Self {
            url,
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl StreamTransport for WsTransport {
    async fn connect(
        &mut self,
    ) -> Result<(Box<dyn StreamSink>, Box<dyn StreamSource>), SpeechError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SpeechError::ConnectionFailed(e.to_string()))?;

        if let Some(ref key) = self.api_key {
            let value: http::HeaderValue = format!("Bearer {key}")
                .parse()
                .map_err(|_| SpeechError::ConnectionFailed("invalid api key header".into()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| SpeechError::ConnectionFailed(e.to_string()))?;

        tracing::info!(endpoint = %self.url, "connected to speech service");

        let (sink, source) = stream.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsSource { source })))
    }
}

struct WsSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl StreamSink for WsSink {
    async fn send(&mut self, frame: String) -> Result<(), SpeechError> {
        self.sink
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| SpeechError::WebSocket(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), SpeechError> {
        self.sink
            .close()
            .await
            .map_err(|e| SpeechError::WebSocket(e.to_string()))
    }
}

struct WsSource {
    source: SplitStream<WsStream>,
}

#[async_trait]
impl StreamSource for WsSource {
    async fn next_frame(&mut self) -> Option<Result<String, SpeechError>> {
        while let Some(message) = self.source.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        tracing::warn!("dropping non-UTF-8 binary frame from speech service");
                        continue;
                    }
                },
                Ok(Message::Close(_)) => return None,
                // Pings are answered by the protocol layer on the next write.
                Ok(_) => continue,
                Err(e) => return Some(Err(SpeechError::WebSocket(e.to_string()))),
            }
        }
        None
    }
}
