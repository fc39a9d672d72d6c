//! WebSocket transport implementation using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{self, Message};

use url::form_urlencoded;

use crate::{CloseCode, Connection, ConnectionId, Frame, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type WsStream = WebSocketStream<TcpStream>;

/// Accepts raw TCP connections that are then upgraded with [`upgrade`].
///
/// Accepting and upgrading are split so a slow client can't hold up the
/// accept loop during its opening handshake.
pub struct WebSocketListener {
    listener: TcpListener,
}

impl WebSocketListener {
    /// Binds a listener to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket listener bound");
        Ok(Self { listener })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Waits for the next TCP connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), TransportError> {
        self.listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)
    }
}

/// The parts of the HTTP upgrade request that carry credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Request target, e.g. `/ws?token=abc`.
    pub target: String,
    /// Header name/value pairs; names are lower-cased.
    pub headers: Vec<(String, String)>,
}

impl UpgradeRequest {
    fn from_http(req: &Request) -> Self {
        let headers = req
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_owned()))
            })
            .collect();
        Self {
            target: req.uri().to_string(),
            headers,
        }
    }

    /// Returns the first value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the first value of a query-string parameter, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let (_, query) = self.target.split_once('?')?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Returns the value of a cookie from the `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n == "cookie")
            .flat_map(|(_, v)| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }
}

/// Performs the WebSocket opening handshake on an accepted stream.
///
/// Returns the ready connection together with the request that initiated
/// the upgrade, so the caller can authenticate before admitting it.
///
/// `max_message_size` caps how much the connection buffers for a single
/// message. Anything larger fails [`recv`](Connection::recv) with
/// [`TransportError::ReceiveFailed`].
pub async fn upgrade(
    stream: TcpStream,
    peer: SocketAddr,
    max_message_size: usize,
) -> Result<(WebSocketConnection, UpgradeRequest), TransportError> {
    let config = WebSocketConfig::default()
        .max_message_size(Some(max_message_size))
        .max_frame_size(Some(max_message_size));
    let mut request = None;
    let ws = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            request = Some(UpgradeRequest::from_http(req));
            Ok(resp)
        },
        Some(config),
    )
    .await
    .map_err(|e| TransportError::UpgradeFailed(e.to_string()))?;

    let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
    tracing::debug!(%id, %peer, "upgraded WebSocket connection");

    Ok((
        WebSocketConnection::new(id, peer, ws),
        request.unwrap_or_default(),
    ))
}

/// A single WebSocket connection.
///
/// The stream is split so that a task parked in [`recv`](Connection::recv)
/// never blocks writers or pings.
pub struct WebSocketConnection {
    id: ConnectionId,
    peer: SocketAddr,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    /// Highest ping nonce acknowledged by a pong.
    pong: watch::Sender<u64>,
    next_ping: AtomicU64,
}

impl WebSocketConnection {
    fn new(id: ConnectionId, peer: SocketAddr, ws: WsStream) -> Self {
        let (sink, stream) = ws.split();
        let (pong, _) = watch::channel(0);
        Self {
            id,
            peer,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            pong,
            next_ping: AtomicU64::new(1),
        }
    }

    /// Returns the remote peer address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    async fn write(&self, msg: Message) -> Result<(), TransportError> {
        self.sink.lock().await.send(msg).await.map_err(send_error)
    }

    fn record_pong(&self, data: &[u8]) {
        if let Ok(bytes) = <[u8; 8]>::try_from(data) {
            let nonce = u64::from_be_bytes(bytes);
            self.pong.send_if_modified(|acked| {
                if nonce > *acked {
                    *acked = nonce;
                    true
                } else {
                    false
                }
            });
        }
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send_text(&self, text: &str) -> Result<(), Self::Error> {
        self.write(Message::Text(text.into())).await
    }

    async fn recv(&self) -> Result<Option<Frame>, Self::Error> {
        loop {
            let msg = self.stream.lock().await.next().await;
            match msg {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Frame::Text(text.as_str().to_owned())));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(Frame::Binary(data.to_vec())));
                }
                Some(Ok(Message::Pong(data))) => self.record_pong(&data),
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.as_ref().map(|f| u16::from(f.code));
                    tracing::debug!(id = %self.id, ?code, "peer sent close frame");
                    return Ok(None);
                }
                Some(Ok(_)) => continue, // ping / raw frame
                None => return Ok(None),
                Some(Err(e)) => return Err(recv_error(e)),
            }
        }
    }

    async fn ping(&self) -> Result<(), Self::Error> {
        let nonce = self.next_ping.fetch_add(1, Ordering::Relaxed);
        let mut acked = self.pong.subscribe();
        self.write(Message::Ping(nonce.to_be_bytes().to_vec().into()))
            .await?;
        acked
            .wait_for(|n| *n >= nonce)
            .await
            .map(|_| ())
            .map_err(|_| TransportError::ConnectionClosed("pong watcher dropped".into()))
    }

    async fn close(&self, code: CloseCode, reason: &str) -> Result<(), Self::Error> {
        let frame = CloseFrame {
            code: code.as_u16().into(),
            reason: reason.to_owned().into(),
        };
        let mut sink = self.sink.lock().await;
        sink.send(Message::Close(Some(frame)))
            .await
            .map_err(send_error)?;
        sink.close().await.map_err(send_error)
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

fn send_error(e: tungstenite::Error) -> TransportError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::ConnectionClosed(e.to_string())
        }
        other => TransportError::SendFailed(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            other,
        )),
    }
}

fn recv_error(e: tungstenite::Error) -> TransportError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::ConnectionClosed(e.to_string())
        }
        other => TransportError::ReceiveFailed(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            other,
        )),
    }
}
