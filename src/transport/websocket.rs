//! WebSocket transport
//!
//! This file implements a minimal WebSocket server that translates protocol
//! JSON messages into queue and feed operations. Responsibilities:
//! - Accept TCP/WebSocket connections until the service context is cancelled
//! - Hand `add` content to the backpressure queue (fire-and-forget)
//! - Turn a `feed` request into a `Feed` scoped to the connection and forward
//!   each message as one text frame
//! - Cancel the connection's request context when the client goes away

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::feed::{Feed, FeedService};
use crate::queue::BackpressureQueue;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::{Context, Error, ErrorCode, Result};

/// Frames buffered between a connection's producers and its socket writer.
const OUTBOUND_CAPACITY: usize = 64;

/// Upper bound on the closing handshake once a connection is torn down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// The process-wide components a connection talks to.
#[derive(Clone)]
pub struct Services {
    pub queue: Arc<BackpressureQueue>,
    pub feeds: Arc<FeedService>,
}

pub async fn start_websocket_server(addr: &str, services: Services, ctx: Context) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Unknown(format!("can't bind {addr}: {e}")))?;
    serve(listener, services, ctx).await
}

/// Runs the accept loop on an already bound listener.
pub async fn serve(listener: TcpListener, services: Services, ctx: Context) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "WebSocket server listening");
    }

    loop {
        tokio::select! {
            _ = ctx.cancelled() => {
                info!("Shutdown signal received, no longer accepting connections");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    spawn(handle_connection(stream, peer, services.clone(), ctx.clone()));
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, services: Services, ctx: Context) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "WebSocket handshake error");
            return;
        }
    };
    debug!(%peer, "Client connected");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<WsMessage>(OUTBOUND_CAPACITY);
    let request = Context::new();

    // Ends on request cancel even if the client stopped reading and a send is stuck.
    let send_loop = {
        let request = request.clone();
        spawn(async move {
            loop {
                let msg = tokio::select! {
                    biased;
                    _ = request.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                };
                tokio::select! {
                    biased;
                    _ = request.cancelled() => break,
                    sent = ws_sender.send(msg) => {
                        if let Err(e) = sent {
                            debug!(%peer, error = %e, "Failed to send frame");
                            break;
                        }
                    }
                }
            }
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws_sender.close()).await;
        })
    };

    let mut feed_task: Option<JoinHandle<()>> = None;

    loop {
        let frame = tokio::select! {
            _ = ctx.cancelled() => break,
            frame = ws_receiver.next() => frame,
        };

        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(%peer, error = %e, "WebSocket read error");
                break;
            }
            None => break,
        };
        if msg.is_close() {
            break;
        }
        if !msg.is_text() {
            continue;
        }
        let Ok(text) = msg.to_text() else {
            continue;
        };

        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Add { content }) => {
                if content.is_empty() {
                    reply(
                        &tx,
                        &ctx,
                        error_frame(ErrorCode::InvalidArgument, "content is required"),
                    )
                    .await;
                } else {
                    services.queue.enqueue(&content);
                    reply(&tx, &ctx, ServerMessage::Accepted).await;
                }
            }
            Ok(ClientMessage::Feed) => {
                if feed_task.as_ref().is_some_and(|task| !task.is_finished()) {
                    reply(
                        &tx,
                        &ctx,
                        error_frame(ErrorCode::InvalidArgument, "feed already active"),
                    )
                    .await;
                    continue;
                }
                match services.feeds.generate_feed(request.clone()).await {
                    Ok(feed) => {
                        feed_task = Some(spawn(forward_feed(
                            feed,
                            tx.clone(),
                            ctx.clone(),
                            request.clone(),
                            peer,
                        )));
                    }
                    Err(e) => {
                        error!(%peer, error = %e, "Feed backlog read failed");
                        reply(&tx, &ctx, error_frame(e.code(), "feed streaming failed")).await;
                    }
                }
            }
            Err(err) => {
                warn!(
                    %peer,
                    error = %err,
                    text = %text.chars().take(100).collect::<String>(),
                    "Invalid client message"
                );
                reply(
                    &tx,
                    &ctx,
                    error_frame(ErrorCode::InvalidArgument, "malformed message"),
                )
                .await;
            }
        }
    }

    request.cancel();
    if let Some(task) = feed_task {
        let _ = task.await;
    }
    drop(tx);
    let _ = send_loop.await;
    debug!(%peer, "Client disconnected");
}

/// Streams `feed` into the outbound channel. A full channel never hides a
/// cancellation: the feed is dropped, and so deregistered, as soon as either
/// scope is cancelled.
async fn forward_feed(
    mut feed: Feed,
    tx: mpsc::Sender<WsMessage>,
    service: Context,
    request: Context,
    peer: SocketAddr,
) {
    while let Some(msg) = feed.next().await {
        let frame = WsMessage::text(msg.to_line());
        tokio::select! {
            biased;
            _ = service.cancelled() => break,
            _ = request.cancelled() => break,
            sent = tx.send(frame) => {
                if sent.is_err() {
                    debug!(%peer, "Downstream write failed, ending feed");
                    break;
                }
            }
        }
    }
    debug!(%peer, subscriber = %feed.subscriber_id(), "Feed finished");
}

fn error_frame(code: ErrorCode, message: &str) -> ServerMessage {
    ServerMessage::Error {
        code: code.as_str().to_string(),
        message: message.to_string(),
    }
}

async fn reply(tx: &mpsc::Sender<WsMessage>, service: &Context, msg: ServerMessage) {
    let json = match serde_json::to_string(&msg) {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "Failed to serialize server message");
            return;
        }
    };
    tokio::select! {
        biased;
        _ = service.cancelled() => {}
        _ = tx.send(WsMessage::text(json)) => {}
    }
}
