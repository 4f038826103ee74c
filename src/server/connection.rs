// src/server/connection.rs

//! One TCP client ↔ one session.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::server::protocol::{ServerFrame, decode_line, encode};
use crate::session::{ClientEvent, ServerEvent, SessionController, SessionSettings};

/// Serve a client until it disconnects or the server shuts down.
///
/// Closing the socket is the disconnect; the session then kills its program
/// and removes its workspace before this returns.
pub async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    settings: Arc<SessionSettings>,
    shutdown: watch::Receiver<bool>,
) {
    let (read_half, write_half) = stream.into_split();

    let session = SessionController::spawn(settings, shutdown);
    let id = session.id();
    info!(%peer, session = %id, "client connected");

    let (client_tx, out_rx, mut join) = session.into_parts();
    let (reject_tx, reject_rx) = mpsc::channel::<ServerFrame>(16);

    let writer = tokio::spawn(write_frames(write_half, out_rx, reject_rx));

    let mut reading = Box::pin(read_frames(read_half, client_tx, reject_tx));
    let mut session_done = false;

    tokio::select! {
        _ = &mut reading => {
            debug!(session = %id, "client stopped sending");
        }
        res = &mut join => {
            session_done = true;
            if let Err(e) = res {
                warn!(session = %id, error = %e, "session task failed");
            }
        }
    }

    // Dropping the reader drops the request sender, which the session sees
    // as a disconnect.
    drop(reading);

    if !session_done {
        if let Err(e) = join.await {
            warn!(session = %id, error = %e, "session task failed");
        }
    }

    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(session = %id, error = %e, "client write side closed"),
        Err(e) => warn!(session = %id, error = %e, "writer task failed"),
    }

    info!(%peer, session = %id, "client disconnected");
}

async fn read_frames(
    read_half: OwnedReadHalf,
    client_tx: mpsc::Sender<ClientEvent>,
    reject_tx: mpsc::Sender<ServerFrame>,
) {
    let mut lines = BufReader::new(read_half).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match decode_line(&line) {
                Ok(frame) => {
                    if client_tx.send(frame.into()).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "rejecting client frame");
                    let _ = reject_tx.send(ServerFrame::from_error(&e)).await;
                }
            },
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "client read failed");
                break;
            }
        }
    }
}

async fn write_frames(
    mut write_half: OwnedWriteHalf,
    mut out_rx: mpsc::Receiver<ServerEvent>,
    mut reject_rx: mpsc::Receiver<ServerFrame>,
) -> Result<()> {
    loop {
        let frame = tokio::select! {
            Some(event) = out_rx.recv() => ServerFrame::from(event),
            Some(frame) = reject_rx.recv() => frame,
            else => break,
        };

        let line = encode(&frame)?;
        write_half.write_all(line.as_bytes()).await?;
    }

    write_half.shutdown().await?;
    Ok(())
}
