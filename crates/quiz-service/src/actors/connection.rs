//! Per-connection WebSocket pump.
//!
//! Each connection runs two loops:
//! - a writer task that drains the outbound queue, sends keep-alive pings and
//!   enforces the per-write deadline
//! - a reader loop that enforces the liveness deadline and the inbound size
//!   limit, then hands parsed messages to the [`InboundHandler`] in arrival
//!   order
//!
//! Whichever loop stops first cancels the other. Once both have stopped the
//! connection is unregistered from the hub exactly once.
//!
//! # Liveness
//!
//! The read deadline starts at `pong_wait` and is refreshed only by pong
//! frames. A peer that never answers pings is dropped after `pong_wait`.

use super::envelope::ClientMessage;
use super::hub::HubHandle;
use super::messages::{ConnectionId, Role};
use crate::config::TransportSettings;
use crate::models::{QuizId, UserId};
use crate::observability::metrics;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Identity of one connection, as seen by inbound handlers.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub connection_id: ConnectionId,
    pub quiz_code: String,
    pub quiz_id: QuizId,
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
}

/// Processes inbound client messages for a connection.
///
/// Calls for one connection are sequential.
#[async_trait::async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, ctx: &ConnectionContext, message: ClientMessage);
}

/// Why the reader loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadEnd {
    PeerClosed,
    Cancelled,
    LivenessTimeout,
    Oversized,
    TransportError,
}

impl ReadEnd {
    fn as_str(self) -> &'static str {
        match self {
            ReadEnd::PeerClosed => "peer_closed",
            ReadEnd::Cancelled => "cancelled",
            ReadEnd::LivenessTimeout => "liveness_timeout",
            ReadEnd::Oversized => "message_too_large",
            ReadEnd::TransportError => "transport_error",
        }
    }
}

/// Run a registered connection until it closes.
///
/// `outbound` is the receiving half of the queue whose sender was handed to
/// the hub at registration.
#[instrument(
    skip_all,
    name = "quiz.connection",
    fields(
        quiz_code = %ctx.quiz_code,
        connection_id = %ctx.connection_id,
        user_id = ctx.user_id,
        role = ctx.role.as_str()
    )
)]
pub async fn run_connection<S, R, E>(
    sink: S,
    stream: R,
    outbound: mpsc::Receiver<Arc<str>>,
    ctx: ConnectionContext,
    handler: Arc<dyn InboundHandler>,
    hub: HubHandle,
    settings: TransportSettings,
) where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: Display + Send,
{
    let shutdown = hub.child_token();

    let writer = tokio::spawn(write_loop(
        sink,
        outbound,
        settings,
        shutdown.clone(),
    ));

    let read_end = read_loop(stream, &ctx, handler.as_ref(), &settings, &shutdown).await;
    shutdown.cancel();

    if let Err(e) = writer.await {
        warn!(target: "quiz.connection", error = %e, "Writer task failed");
    }

    if let Err(e) = hub.unregister(&ctx.quiz_code, ctx.connection_id).await {
        debug!(target: "quiz.connection", error = %e, "Unregister after close failed");
    }

    info!(
        target: "quiz.connection",
        reason = read_end.as_str(),
        "Connection closed"
    );
}

async fn read_loop<R, E>(
    mut stream: R,
    ctx: &ConnectionContext,
    handler: &dyn InboundHandler,
    settings: &TransportSettings,
    shutdown: &CancellationToken,
) -> ReadEnd
where
    R: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: Display + Send,
{
    let mut deadline = Instant::now() + settings.pong_wait;

    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => return ReadEnd::Cancelled,
            next = timeout_at(deadline, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                warn!(target: "quiz.connection", "No pong within liveness window");
                return ReadEnd::LivenessTimeout;
            }
            Ok(None) => return ReadEnd::PeerClosed,
            Ok(Some(Err(e))) => {
                debug!(target: "quiz.connection", error = %e, "Read error");
                return ReadEnd::TransportError;
            }
            Ok(Some(Ok(message))) => message,
        };

        let payload: Vec<u8> = match message {
            Message::Pong(_) => {
                deadline = Instant::now() + settings.pong_wait;
                continue;
            }
            // Pings are answered by the WebSocket layer.
            Message::Ping(_) => continue,
            Message::Close(_) => return ReadEnd::PeerClosed,
            Message::Text(text) => text.into_bytes(),
            Message::Binary(bytes) => bytes,
        };

        if payload.len() > settings.max_message_bytes {
            warn!(
                target: "quiz.connection",
                size = payload.len(),
                limit = settings.max_message_bytes,
                "Inbound message exceeds size limit"
            );
            return ReadEnd::Oversized;
        }

        match ClientMessage::parse(&payload) {
            Ok(message) => {
                debug!(target: "quiz.connection", kind = message.kind(), "Inbound message");
                handler.handle(ctx, message).await;
            }
            Err(e) => {
                metrics::record_malformed_message();
                warn!(target: "quiz.connection", error = %e, "Discarding malformed message");
            }
        }
    }
}

async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Arc<str>>,
    settings: TransportSettings,
    shutdown: CancellationToken,
) where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    let mut ping = tokio::time::interval_at(
        Instant::now() + settings.ping_interval,
        settings.ping_interval,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let to_send = tokio::select! {
            () = shutdown.cancelled() => {
                send_close(&mut sink, &settings).await;
                break;
            }

            frame = outbound.recv() => match frame {
                Some(frame) => Message::Text(frame.to_string()),
                None => {
                    // The hub dropped this connection.
                    debug!(target: "quiz.connection", "Outbound queue closed");
                    send_close(&mut sink, &settings).await;
                    break;
                }
            },

            _ = ping.tick() => Message::Ping(Vec::new()),
        };

        match timeout(settings.write_wait, sink.send(to_send)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(target: "quiz.connection", error = %e, "Write failed");
                break;
            }
            Err(_) => {
                warn!(target: "quiz.connection", "Write deadline exceeded");
                break;
            }
        }
    }

    shutdown.cancel();
}

async fn send_close<S>(sink: &mut S, settings: &TransportSettings)
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    let _ = timeout(settings.write_wait, sink.send(Message::Close(None))).await;
}
