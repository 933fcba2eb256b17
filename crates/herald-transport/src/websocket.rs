//! WebSocket link implementation.
//!
//! The dialer opens a WebSocket to the configured URL with the bearer
//! credential in the `Authorization` header, then runs the `connect` /
//! `connected` handshake before handing the link to the connection task.

use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use herald_protocol::{codec, Frame, ProtocolError, PROTOCOL_VERSION};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
        Error as WsError, Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::traits::{ConnectionId, Dialer, Link, TransportError};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket dialer configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Server endpoint, `ws://` or `wss://`.
    pub url: String,
    /// Upper bound for the TCP, TLS, upgrade and `connected` exchange.
    pub handshake_timeout: Duration,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            handshake_timeout: Duration::from_secs(10),
            max_message_size: 64 * 1024, // 64 KB
        }
    }
}

/// Opens WebSocket links.
#[derive(Debug, Clone)]
pub struct WebSocketDialer {
    config: WebSocketConfig,
}

impl WebSocketDialer {
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }

    /// Dialer for `url` with default limits.
    #[must_use]
    pub fn with_url(url: impl Into<String>) -> Self {
        Self::new(WebSocketConfig {
            url: url.into(),
            ..Default::default()
        })
    }

    async fn open(&self, token: &str) -> Result<WebSocketLink, TransportError> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Handshake(format!("Invalid URL: {}", e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| TransportError::Handshake("Credential is not a valid header".into()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, _response) = connect_async(request).await.map_err(|e| match e {
            WsError::Io(io) => TransportError::Io(io),
            other => TransportError::Handshake(other.to_string()),
        })?;
        debug!(url = %self.config.url, "WebSocket upgrade completed");

        let mut link = WebSocketLink::new(stream, self.config.max_message_size);
        link.send(Frame::connect(Some(token.to_string()))).await?;

        match link.recv().await? {
            Some(Frame::Connected {
                connection_id,
                version,
                heartbeat,
            }) => {
                if version != PROTOCOL_VERSION {
                    let _ = link.close().await;
                    return Err(TransportError::Handshake(format!(
                        "Server speaks protocol {}, client {}",
                        version, PROTOCOL_VERSION
                    )));
                }
                info!(
                    server_id = %connection_id,
                    heartbeat_ms = heartbeat,
                    "Handshake completed"
                );
                link.id = ConnectionId::new(connection_id);
                Ok(link)
            }
            Some(Frame::Error { code, message, .. }) => {
                let _ = link.close().await;
                Err(TransportError::Handshake(format!("{} ({})", message, code)))
            }
            Some(other) => {
                let _ = link.close().await;
                Err(TransportError::Handshake(format!(
                    "Expected connected, got {}",
                    other.frame_type().as_str()
                )))
            }
            None => Err(TransportError::ConnectionClosed),
        }
    }
}

#[async_trait]
impl Dialer for WebSocketDialer {
    async fn dial(&self, token: &str) -> Result<Box<dyn Link>, TransportError> {
        let link = tokio::time::timeout(self.config.handshake_timeout, self.open(token))
            .await
            .map_err(|_| TransportError::Timeout)??;
        Ok(Box::new(link))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// A WebSocket link.
pub struct WebSocketLink {
    id: ConnectionId,
    stream: Stream,
    is_open: bool,
    read_buffer: BytesMut,
    max_message_size: usize,
}

impl WebSocketLink {
    fn new(stream: Stream, max_message_size: usize) -> Self {
        Self {
            id: ConnectionId::generate(),
            stream,
            is_open: true,
            read_buffer: BytesMut::with_capacity(4096),
            max_message_size,
        }
    }
}

#[async_trait]
impl Link for WebSocketLink {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        if let Some(frame) = codec::decode_from(&mut self.read_buffer)? {
            return Ok(Some(frame));
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    if data.len() > self.max_message_size {
                        warn!(
                            link = %self.id,
                            len = data.len(),
                            max = self.max_message_size,
                            "Message too large"
                        );
                        return Err(TransportError::Protocol(ProtocolError::FrameTooLarge(
                            data.len(),
                        )));
                    }

                    self.read_buffer.extend_from_slice(&data);

                    if let Some(frame) = codec::decode_from(&mut self.read_buffer)? {
                        return Ok(Some(frame));
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    debug!(len = text.len(), "Ignoring text message");
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        warn!(link = %self.id, error = %e, "Failed to send pong");
                    }
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    debug!(link = %self.id, "Received close frame");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) => {
                    debug!("Connection closed");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!(link = %self.id, error = %e, "WebSocket error");
                    self.is_open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    self.is_open = false;
                    return Ok(None);
                }
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        let data = codec::encode(&frame)?;
        self.stream
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.is_open, false) {
            return Ok(());
        }

        self.stream
            .close(None)
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
    use tokio_tungstenite::{accept_async, accept_hdr_async};

    type ServerStream = WebSocketStream<TcpStream>;

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn read_frame(ws: &mut ServerStream) -> Frame {
        loop {
            match ws.next().await {
                Some(Ok(Message::Binary(data))) => return codec::decode(&data).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("Expected binary message, got {:?}", other),
            }
        }
    }

    async fn write_frame(ws: &mut ServerStream, frame: Frame) {
        let data = codec::encode(&frame).unwrap();
        ws.send(Message::Binary(data.to_vec())).await.unwrap();
    }

    fn dialer(url: String) -> WebSocketDialer {
        WebSocketDialer::new(WebSocketConfig {
            url,
            handshake_timeout: Duration::from_secs(5),
            ..Default::default()
        })
    }

    #[test]
    fn test_websocket_config_default() {
        let config = WebSocketConfig::default();
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.max_message_size, 64 * 1024);
    }

    #[tokio::test]
    async fn test_handshake_and_push() {
        let (listener, url) = listener().await;
        let auth = Arc::new(Mutex::new(None::<String>));

        let seen_auth = Arc::clone(&auth);
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_hdr_async(tcp, move |req: &Request, resp: Response| {
                let value = req
                    .headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                *seen_auth.lock().unwrap() = value;
                Ok(resp)
            })
            .await
            .unwrap();

            assert_eq!(
                read_frame(&mut ws).await,
                Frame::connect(Some("secret".into()))
            );
            write_frame(&mut ws, Frame::connected("srv-1", 1, 30_000)).await;

            assert_eq!(
                read_frame(&mut ws).await,
                Frame::subscribe(1, "notifications/u1")
            );
            write_frame(&mut ws, Frame::publish("notifications/u1", b"{}".to_vec())).await;
            ws.close(None).await.unwrap();
        });

        let mut link = dialer(url).dial("secret").await.unwrap();
        assert_eq!(link.id().as_str(), "srv-1");
        assert!(link.is_open());

        link.send(Frame::subscribe(1, "notifications/u1")).await.unwrap();
        assert_eq!(
            link.recv().await.unwrap(),
            Some(Frame::publish("notifications/u1", b"{}".to_vec()))
        );
        assert_eq!(link.recv().await.unwrap(), None);
        assert!(!link.is_open());

        server.await.unwrap();
        assert_eq!(auth.lock().unwrap().as_deref(), Some("Bearer secret"));
    }

    #[tokio::test]
    async fn test_version_mismatch_is_rejected() {
        let (listener, url) = listener().await;
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let _ = read_frame(&mut ws).await;
            write_frame(&mut ws, Frame::connected("srv-2", 9, 30_000)).await;
            let _ = ws.next().await;
        });

        let err = dialer(url).dial("secret").await.err().unwrap();
        assert!(matches!(err, TransportError::Handshake(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_handshake() {
        let (listener, url) = listener().await;
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let _ = read_frame(&mut ws).await;
            write_frame(&mut ws, Frame::error(0, 401, "Invalid token")).await;
            let _ = ws.next().await;
        });

        match dialer(url).dial("stale").await {
            Err(TransportError::Handshake(message)) => assert!(message.contains("401")),
            Err(other) => panic!("Expected handshake error, got {}", other),
            Ok(_) => panic!("Expected handshake error"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let (listener, url) = listener().await;
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let dialer = WebSocketDialer::new(WebSocketConfig {
            url,
            handshake_timeout: Duration::from_millis(200),
            ..Default::default()
        });
        assert!(matches!(
            dialer.dial("secret").await.err(),
            Some(TransportError::Timeout)
        ));
        server.abort();
    }
}
