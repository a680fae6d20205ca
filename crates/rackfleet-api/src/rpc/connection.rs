//! One RPC session over a WebSocket.
//!
//! A connection owns two background tasks: a writer draining an `mpsc`
//! queue into the socket, and a reader that resolves pending calls and
//! hands incoming requests to the local [`Responder`]. Both stop when the
//! connection's cancellation token fires, which also fails every call
//! still in flight with [`Error::ConnectionClosed`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;
use uuid::Uuid;

use super::commands::RpcCommand;
use super::frame::Frame;
use crate::error::{Error, RemoteError, kinds};

const OUTBOUND_CHANNEL_CAPACITY: usize = 64;
const LOOPBACK_BUFFER: usize = 256 * 1024;

type Pending = DashMap<u64, oneshot::Sender<Result<Value, RemoteError>>>;

// ── Responder ────────────────────────────────────────────────────────

/// Handles requests the peer sends over a connection.
#[async_trait]
pub trait Responder: Send + Sync + 'static {
    async fn respond(&self, command: &str, args: Value) -> Result<Value, RemoteError>;
}

/// Decode request arguments, reporting bad input back to the caller.
pub fn decode_args<T: DeserializeOwned>(args: Value) -> Result<T, RemoteError> {
    serde_json::from_value(args)
        .map_err(|e| RemoteError::new(kinds::INVALID_ARGUMENTS, e.to_string()))
}

/// Encode a reply value.
pub fn encode_reply<T: Serialize>(reply: &T) -> Result<Value, RemoteError> {
    serde_json::to_value(reply).map_err(|e| RemoteError::new("EncodeFailed", e.to_string()))
}

/// The error to return for a command the responder does not implement.
pub fn unhandled(command: &str) -> RemoteError {
    RemoteError::new(kinds::UNHANDLED_COMMAND, format!("no handler for {command}"))
}

// ── ConnectionOptions ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Default bound on a single call. Default: 60s.
    pub call_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
        }
    }
}

// ── RpcConnection ────────────────────────────────────────────────────

/// Handle to a live RPC session. Dropping the last handle closes it.
pub struct RpcConnection {
    id: Uuid,
    eventloop: String,
    address: Option<SocketAddr>,
    outbound: mpsc::Sender<Message>,
    pending: Arc<Pending>,
    next_id: AtomicU64,
    cancel: CancellationToken,
    options: ConnectionOptions,
}

impl fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcConnection")
            .field("id", &self.id)
            .field("eventloop", &self.eventloop)
            .field("address", &self.address)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl RpcConnection {
    /// Dial a WebSocket URL and start the session.
    pub async fn connect(
        url: &Url,
        eventloop: impl Into<String>,
        address: Option<SocketAddr>,
        responder: Arc<dyn Responder>,
        options: ConnectionOptions,
    ) -> Result<Arc<Self>, Error> {
        debug!(url = %url, "Connecting RPC channel");
        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
        Ok(Self::start(ws, eventloop, address, responder, options))
    }

    /// Complete the server side of the WebSocket handshake on `stream`.
    pub async fn accept<S>(
        stream: S,
        eventloop: impl Into<String>,
        address: Option<SocketAddr>,
        responder: Arc<dyn Responder>,
        options: ConnectionOptions,
    ) -> Result<Arc<Self>, Error>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
        Ok(Self::start(ws, eventloop, address, responder, options))
    }

    /// Two connected in-process endpoints, `(client, server)`.
    ///
    /// Used when rack and region run in one process, and by tests.
    pub async fn loopback_pair(
        client_responder: Arc<dyn Responder>,
        server_responder: Arc<dyn Responder>,
        eventloop: impl Into<String>,
        options: ConnectionOptions,
    ) -> (Arc<Self>, Arc<Self>) {
        let (left, right) = tokio::io::duplex(LOOPBACK_BUFFER);
        let (client_ws, server_ws) = tokio::join!(
            WebSocketStream::from_raw_socket(left, Role::Client, None),
            WebSocketStream::from_raw_socket(right, Role::Server, None),
        );
        let eventloop = eventloop.into();
        let client = Self::start(
            client_ws,
            eventloop.clone(),
            None,
            client_responder,
            options.clone(),
        );
        let server = Self::start(server_ws, eventloop, None, server_responder, options);
        (client, server)
    }

    /// Start the reader and writer tasks over an established WebSocket.
    pub fn start<S>(
        ws: WebSocketStream<S>,
        eventloop: impl Into<String>,
        address: Option<SocketAddr>,
        responder: Arc<dyn Responder>,
        options: ConnectionOptions,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let pending: Arc<Pending> = Arc::new(DashMap::new());
        let cancel = CancellationToken::new();

        tokio::spawn(write_loop(sink, outbound_rx, cancel.clone()));
        tokio::spawn(read_loop(
            stream,
            outbound.clone(),
            Arc::clone(&pending),
            responder,
            cancel.clone(),
        ));

        Arc::new(Self {
            id: Uuid::new_v4(),
            eventloop: eventloop.into(),
            address,
            outbound,
            pending,
            next_id: AtomicU64::new(1),
            cancel,
            options,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Identity of the remote event-loop this session talks to.
    pub fn eventloop(&self) -> &str {
        &self.eventloop
    }

    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Tear the session down. Calls in flight fail with `ConnectionClosed`.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the session has closed for any reason.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    /// Issue a typed call with the default timeout.
    pub async fn call<C: RpcCommand>(&self, command: &C) -> Result<C::Response, Error> {
        self.call_with_timeout(command, self.options.call_timeout)
            .await
    }

    /// Issue a typed call bounded by `timeout`.
    pub async fn call_with_timeout<C: RpcCommand>(
        &self,
        command: &C,
        timeout: Duration,
    ) -> Result<C::Response, Error> {
        let args = serde_json::to_value(command)?;
        let value = self.call_raw(C::NAME, args, timeout).await?;
        C::Response::deserialize(&value).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: value.to_string(),
        })
    }

    /// Issue an untyped call.
    pub async fn call_raw(
        &self,
        command: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<Value, Error> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let frame = Frame::Request {
            id,
            command: command.to_owned(),
            args,
        };
        let text = serde_json::to_string(&frame)?;
        if self.outbound.send(Message::text(text)).await.is_err() {
            self.pending.remove(&id);
            return Err(Error::ConnectionClosed);
        }
        trace!(id, command, "RPC call sent");

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                self.pending.remove(&id);
                Err(Error::ConnectionClosed)
            }
            outcome = tokio::time::timeout(timeout, rx) => match outcome {
                Ok(Ok(result)) => result.map_err(Error::Remote),
                Ok(Err(_)) => Err(Error::ConnectionClosed),
                Err(_) => {
                    self.pending.remove(&id);
                    Err(Error::Timeout { timeout_secs: timeout.as_secs() })
                }
            },
        }
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Background tasks ─────────────────────────────────────────────────

async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = sink.send(msg).await {
                    debug!(error = %e, "RPC write failed");
                    break;
                }
            }
        }
    }
    cancel.cancel();
}

async fn read_loop<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    outbound: mpsc::Sender<Message>,
    pending: Arc<Pending>,
    responder: Arc<dyn Responder>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    dispatch(text.as_str(), &outbound, &pending, &responder);
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("RPC peer closed the channel");
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/Pong are answered by tungstenite; binary is unused.
                }
                Some(Err(e)) => {
                    warn!(error = %e, "RPC read failed");
                    break;
                }
            },
        }
    }
    cancel.cancel();
    // Dropping the senders fails every outstanding call.
    pending.clear();
}

fn dispatch(
    text: &str,
    outbound: &mpsc::Sender<Message>,
    pending: &Pending,
    responder: &Arc<dyn Responder>,
) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "Discarding malformed RPC frame");
            return;
        }
    };

    match frame {
        Frame::Response { id, ok, error } => {
            let Some((_, waiter)) = pending.remove(&id) else {
                debug!(id, "Response for unknown or expired call");
                return;
            };
            let outcome = match error {
                Some(err) => Err(err),
                None => Ok(ok.unwrap_or(Value::Null)),
            };
            let _ = waiter.send(outcome);
        }
        Frame::Request { id, command, args } => {
            let responder = Arc::clone(responder);
            let outbound = outbound.clone();
            tokio::spawn(async move {
                trace!(id, command = %command, "Handling RPC request");
                let outcome = responder.respond(&command, args).await;
                if let Err(ref e) = outcome {
                    debug!(id, command = %command, error = %e, "RPC request failed");
                }
                match serde_json::to_string(&Frame::response(id, outcome)) {
                    Ok(text) => {
                        let _ = outbound.send(Message::text(text)).await;
                    }
                    Err(e) => warn!(error = %e, "Failed to encode RPC response"),
                }
            });
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::rpc::commands::{Ack, Identify, Identity, Ping};

    struct Region;

    #[async_trait]
    impl Responder for Region {
        async fn respond(&self, command: &str, _args: Value) -> Result<Value, RemoteError> {
            match command {
                "Ping" => encode_reply(&Ack {}),
                "Identify" => encode_reply(&Identity {
                    ident: "region-1".into(),
                }),
                "Stall" => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    encode_reply(&Ack {})
                }
                "Fail" => Err(RemoteError::new("CannotConfigureDHCP", "dhcpd exploded")),
                other => Err(unhandled(other)),
            }
        }
    }

    struct Silent;

    #[async_trait]
    impl Responder for Silent {
        async fn respond(&self, command: &str, _args: Value) -> Result<Value, RemoteError> {
            Err(unhandled(command))
        }
    }

    async fn pair() -> (Arc<RpcConnection>, Arc<RpcConnection>) {
        RpcConnection::loopback_pair(
            Arc::new(Silent),
            Arc::new(Region),
            "region:1",
            ConnectionOptions::default(),
        )
        .await
    }

    #[tokio::test]
    async fn typed_call_round_trip() {
        let (client, _server) = pair().await;
        let ack = client.call(&Ping {}).await.unwrap();
        assert_eq!(ack, Ack {});
        let identity = client.call(&Identify {}).await.unwrap();
        assert_eq!(identity.ident, "region-1");
        assert_eq!(client.eventloop(), "region:1");
    }

    #[tokio::test]
    async fn websocket_handshake_over_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            RpcConnection::accept(stream, "rack", Some(peer), Arc::new(Region), ConnectionOptions::default())
                .await
                .unwrap()
        });

        let url = Url::parse(&format!("ws://{addr}/ws")).unwrap();
        let client = RpcConnection::connect(&url, "region:1", Some(addr), Arc::new(Silent), ConnectionOptions::default())
            .await
            .unwrap();
        let server = server.await.unwrap();

        assert_eq!(client.call(&Ping {}).await.unwrap(), Ack {});
        assert_eq!(client.address(), Some(addr));
        assert_eq!(server.eventloop(), "rack");
    }

    #[tokio::test]
    async fn remote_failure_is_surfaced() {
        let (client, _server) = pair().await;
        let err = client
            .call_raw("Fail", Value::Null, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.remote_kind(), Some("CannotConfigureDHCP"));
        assert!(err.to_string().contains("dhcpd exploded"));
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let (client, _server) = pair().await;
        let err = client
            .call_raw("Nope", Value::Null, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.remote_kind(), Some(kinds::UNHANDLED_COMMAND));
    }

    #[tokio::test(start_paused = true)]
    async fn call_times_out() {
        let (client, _server) = pair().await;
        let started = tokio::time::Instant::now();
        let err = client
            .call_raw("Stall", Value::Null, Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }), "got {err:?}");
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn peer_close_fails_calls_in_flight() {
        let (client, server) = pair().await;
        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .call_raw("Stall", Value::Null, Duration::from_secs(10))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        server.close();

        let err = call.await.unwrap().unwrap_err();
        assert!(err.is_closed(), "got {err:?}");
        client.closed().await;
        assert!(client.is_closed());
        assert!(matches!(
            client.call(&Ping {}).await,
            Err(Error::ConnectionClosed)
        ));
    }
}
