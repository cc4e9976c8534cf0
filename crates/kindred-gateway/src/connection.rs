use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kindred_types::frames::ServerFrame;

use crate::presence::{Outbound, SessionHandle};
use crate::router::MessageRouter;

/// Drive an admitted WebSocket connection until it ends.
///
/// The handshake already ran at the HTTP upgrade layer, so `user_id` is the
/// authenticated identity. The session is registered on entry and
/// unregistered on exit, whatever ends the connection.
///
/// A Ping goes out every `heartbeat`; two consecutive missed Pongs drop the
/// connection.
pub async fn run_session(
    socket: WebSocket,
    router: MessageRouter,
    user_id: Uuid,
    heartbeat: Duration,
) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
    let session = SessionHandle::new(tx);
    let conn_id = session.conn_id();
    router.presence().register(user_id, session.clone());
    info!(%user_id, %conn_id, "Connected to gateway");

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Writer: frames queued for this connection, plus heartbeat pings.
    let mut send_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(Outbound::Frame(frame)) => {
                            if sender.send(Message::Text(frame.to_json().into())).await.is_err() {
                                break;
                            }
                        }
                        Some(Outbound::Close(reason)) => {
                            let notice = ServerFrame::SessionClosed { reason };
                            let _ = sender.send(Message::Text(notice.to_json().into())).await;
                            let _ = sender.send(Message::Close(None)).await;
                            break;
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(%user_id, "Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Reader: decode and route client frames; replies go through the writer.
    let recv_session = session.clone();
    let recv_router = router.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    recv_session.touch();
                    if let Some(reply) = recv_router
                        .handle_inbound(user_id, &recv_session, text.as_str())
                        .await
                    {
                        if !recv_session.send(reply) {
                            break;
                        }
                    }
                }
                Message::Binary(data) => {
                    debug!(%user_id, "Ignoring {} byte binary frame", data.len());
                }
                Message::Pong(_) => {
                    recv_session.touch();
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    router.presence().unregister(conn_id);
    info!(%user_id, %conn_id, "Disconnected from gateway");
}
