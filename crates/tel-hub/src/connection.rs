use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::{ClientId, ClientRegistry};

pub const AUTHENTICATION_MESSAGE: &str = "authentication_message";

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Per-connection settings shared by every client task.
pub(crate) struct ConnectionSettings {
    pub(crate) endpoint: String,
    pub(crate) secret: String,
    pub(crate) pong_wait: Duration,
    pub(crate) ping_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct InboundMessage {
    name: String,
    #[serde(default)]
    payload: String,
}

pub(crate) async fn accept_loop(
    listener: TcpListener,
    registry: Arc<ClientRegistry>,
    settings: Arc<ConnectionSettings>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tokio::spawn(serve_client(
                        stream,
                        addr,
                        Arc::clone(&registry),
                        Arc::clone(&settings),
                        shutdown.child_token(),
                    ));
                }
                Err(err) => warn!(error = %err, "accept failed"),
            },
        }
    }
    debug!("accept loop stopped");
}

pub(crate) async fn sweep_loop(
    registry: Arc<ClientRegistry>,
    grace: Duration,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                for id in registry.expired(grace) {
                    registry.remove(id, "authentication timeout");
                }
            }
        }
    }
}

async fn serve_client(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<ClientRegistry>,
    settings: Arc<ConnectionSettings>,
    cancel: CancellationToken,
) {
    let endpoint = settings.endpoint.clone();
    let check_path = move |request: &Request, response: Response| {
        if request.uri().path() == endpoint {
            Ok(response)
        } else {
            let mut rejection = ErrorResponse::new(Some("not found".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };
    let handshake = time::timeout(
        settings.pong_wait,
        tokio_tungstenite::accept_hdr_async(stream, check_path),
    );
    let ws = match handshake.await {
        Ok(Ok(ws)) => ws,
        Ok(Err(err)) => {
            warn!(%addr, error = %err, "handshake failed");
            return;
        }
        Err(_) => {
            warn!(%addr, "handshake timed out");
            return;
        }
    };

    let (id, outbound) = registry.join(addr, cancel.clone());
    let (sink, stream): (WsSink, WsStream) = ws.split();
    let writer = tokio::spawn(write_loop(
        id,
        sink,
        outbound,
        Arc::clone(&registry),
        settings.ping_interval,
        cancel.clone(),
    ));

    let reason = read_loop(id, stream, &registry, &settings, &cancel).await;
    if let Some(reason) = reason {
        registry.remove(id, reason);
    }
    if let Err(err) = writer.await {
        warn!(client = id, error = %err, "client writer task failed");
    }
}

/// Reads until the client goes away. Returns the removal reason, or `None`
/// when the client was already removed elsewhere.
async fn read_loop(
    id: ClientId,
    mut stream: WsStream,
    registry: &ClientRegistry,
    settings: &ConnectionSettings,
    cancel: &CancellationToken,
) -> Option<&'static str> {
    let mut deadline = Instant::now() + settings.pong_wait;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return None,
            next = time::timeout_at(deadline, stream.next()) => next,
        };
        let message = match next {
            Err(_) => return Some("heartbeat timeout"),
            Ok(None) => return Some("connection closed"),
            Ok(Some(Err(err))) => {
                debug!(client = id, error = %err, "read failed");
                return Some("read failed");
            }
            Ok(Some(Ok(message))) => message,
        };
        match message {
            Message::Pong(_) => deadline = Instant::now() + settings.pong_wait,
            Message::Ping(_) | Message::Frame(_) => {}
            Message::Close(_) => return Some("connection closed"),
            Message::Binary(_) => return Some("unexpected binary message"),
            Message::Text(text) => {
                match serde_json::from_str::<InboundMessage>(text.as_str()) {
                    Ok(inbound) if inbound.name == AUTHENTICATION_MESSAGE => {
                        if inbound.payload != settings.secret {
                            return Some("authentication failed");
                        }
                        if !registry.authenticate(id) {
                            return None;
                        }
                    }
                    Ok(inbound) => {
                        info!(client = id, name = %inbound.name, "unexpected message");
                        return Some("unexpected message");
                    }
                    Err(err) => {
                        debug!(client = id, error = %err, "malformed message");
                        return Some("malformed message");
                    }
                }
            }
        }
    }
}

#[derive(Debug, Error)]
enum WriteError {
    #[error(transparent)]
    Socket(#[from] WsError),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Hands one frame to the socket. A peer that stops reading fills the
/// socket buffer, so every write is bounded by `limit`.
async fn send_within<S>(sink: &mut S, message: Message, limit: Duration) -> Result<(), WriteError>
where
    S: futures_util::Sink<Message, Error = WsError> + Unpin,
{
    match time::timeout(limit, sink.send(message)).await {
        Ok(result) => result.map_err(WriteError::from),
        Err(_) => Err(WriteError::Timeout(limit)),
    }
}

async fn write_loop<S>(
    id: ClientId,
    mut sink: S,
    mut outbound: mpsc::Receiver<Message>,
    registry: Arc<ClientRegistry>,
    ping_interval: Duration,
    cancel: CancellationToken,
) where
    S: futures_util::Sink<Message, Error = WsError> + Unpin,
{
    let mut ping = time::interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            message = outbound.recv() => match message {
                Some(message @ Message::Close(_)) => {
                    let _ = send_within(&mut sink, message, ping_interval).await;
                    break;
                }
                Some(message) => {
                    if let Err(err) = send_within(&mut sink, message, ping_interval).await {
                        debug!(client = id, error = %err, "write failed");
                        registry.remove(id, "write failed");
                        break;
                    }
                }
                None => break,
            },
            _ = ping.tick() => {
                let ping = Message::Ping(bytes::Bytes::new());
                if let Err(err) = send_within(&mut sink, ping, ping_interval).await {
                    debug!(client = id, error = %err, "ping failed");
                    registry.remove(id, "ping failed");
                    break;
                }
            }
            _ = cancel.cancelled() => {
                let _ = send_within(&mut sink, Message::Close(None), ping_interval).await;
                break;
            }
        }
    }
    let _ = time::timeout(ping_interval, sink.close()).await;
}
