//! Connection loops.
//!
//! Each connection runs three loops concurrently inside one task:
//! - Read loop: bytes → framer → dispatcher; pings and replies are handled
//!   inline, `exec` requests are queued
//! - Exec loop: runs queued scripts one at a time
//! - Write loop: drains the session's outbound queue onto the transport
//!
//! Because reading never waits on a script, a script blocked on an
//! outbound request still receives the `doret` that unblocks it.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::handle::SessionHandle;
use crate::constants::READ_BUFFER_SIZE;
use crate::dispatch::{Dispatcher, ExecRequest};
use crate::objects::ObjectRegistry;
use crate::protocol::{Framer, OutboundMessage};

/// One peer connection, ready to run over a transport.
pub struct Connection {
    session: SessionHandle,
    frame_rx: UnboundedReceiver<Vec<u8>>,
    dispatcher: Arc<Dispatcher>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Create a connection with a fresh session.
    pub fn new(
        id: impl Into<String>,
        registry: Arc<ObjectRegistry>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let (session, frame_rx) = SessionHandle::new(id, registry);
        Self {
            session,
            frame_rx,
            dispatcher,
        }
    }

    /// Session handle, for observing the connection from outside.
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Run until the peer disconnects, a framing error occurs, or the
    /// session is closed. Pending requests are abandoned on exit.
    pub async fn run<S>(self, stream: S)
    where
        S: AsyncRead + AsyncWrite,
    {
        let Self {
            session,
            frame_rx,
            dispatcher,
        } = self;
        let (reader, writer) = tokio::io::split(stream);
        let (exec_tx, exec_rx) = mpsc::unbounded_channel();

        log::info!("[Conn {}] Connected", session.id());

        let read = async {
            Self::read_loop(&session, &dispatcher, reader, exec_tx).await;
            session.close();
        };
        tokio::join!(
            read,
            Self::exec_loop(&session, &dispatcher, exec_rx),
            Self::write_loop(&session, writer, frame_rx),
        );

        log::info!(
            "[Conn {}] Closed (idle for {:?})",
            session.id(),
            session.idle_for()
        );
    }

    /// Read loop: feeds the framer and routes every completed message.
    async fn read_loop<R>(
        session: &SessionHandle,
        dispatcher: &Dispatcher,
        mut reader: R,
        exec_tx: UnboundedSender<ExecRequest>,
    ) where
        R: AsyncRead + Unpin,
    {
        let mut framer = Framer::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let read = tokio::select! {
                result = reader.read(&mut buf) => result,
                () = session.closed() => break,
            };
            match read {
                Ok(0) => {
                    log::info!("[Conn {}] Peer disconnected", session.id());
                    break;
                }
                Ok(n) => {
                    session.touch();
                    let fed = framer.feed_with(&buf[..n], |message| {
                        log::debug!("[Conn {}] <- {}", session.id(), message.command);
                        if let Some(request) = dispatcher.handle(session, message) {
                            // Exec loop outlives the read loop; send cannot fail here.
                            let _ = exec_tx.send(request);
                        }
                    });
                    if let Err(e) = fed {
                        log::error!("[Conn {}] Framing error: {e}", session.id());
                        session.send(&OutboundMessage::Err {
                            message: e.to_string(),
                        });
                        break;
                    }
                }
                Err(e) => {
                    log::error!("[Conn {}] Read error: {e}", session.id());
                    break;
                }
            }
        }
    }

    /// Exec loop: runs scripts sequentially in arrival order.
    async fn exec_loop(
        session: &SessionHandle,
        dispatcher: &Dispatcher,
        mut exec_rx: UnboundedReceiver<ExecRequest>,
    ) {
        loop {
            let request = tokio::select! {
                biased;
                () = session.closed() => break,
                request = exec_rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };
            let reply = dispatcher.execute(session, request).await;
            if !session.send(&reply) {
                break;
            }
        }
    }

    /// Write loop: drains queued frames until the session closes.
    async fn write_loop<W>(
        session: &SessionHandle,
        mut writer: W,
        mut frame_rx: UnboundedReceiver<Vec<u8>>,
    ) where
        W: AsyncWrite + Unpin,
    {
        loop {
            // Queued frames go out before a close is observed.
            let data = tokio::select! {
                biased;
                data = frame_rx.recv() => match data {
                    Some(data) => data,
                    None => break,
                },
                () = session.closed() => break,
            };
            if let Err(e) = writer.write_all(&data).await {
                log::error!("[Conn {}] Write error: {e}", session.id());
                session.close();
                break;
            }
            session.touch();
        }
        let _ = writer.shutdown().await;
    }
}
