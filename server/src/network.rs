//! WebSocket transport: accepts connections, reads frames and queues writes.
//!
//! Every accepted socket runs in its own task. That task reports what
//! happens on the connection to the server loop as [`ConnectionEvent`]s over
//! a single channel, so for any one handle the loop always sees `Opened`
//! (or `Failed`) first, then messages, then exactly one `Closed`.
//!
//! Outbound traffic goes through a bounded per-connection queue drained by
//! a dedicated writer task. The server loop only ever does a non-blocking
//! `try_send`, so one slow peer cannot hold up a broadcast.

use crate::session::ConnectionHandle;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Events sent from connection tasks to the server loop
#[derive(Debug)]
pub enum ConnectionEvent {
    Opened {
        handle: ConnectionHandle,
        addr: SocketAddr,
        outbound: mpsc::Sender<Message>,
    },
    Message {
        handle: ConnectionHandle,
        data: Vec<u8>,
    },
    Closed {
        handle: ConnectionHandle,
    },
    /// The WebSocket handshake did not complete.
    Failed {
        handle: ConnectionHandle,
        addr: SocketAddr,
        reason: String,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("no open connection for {0}")]
    Unknown(ConnectionHandle),
    #[error("connection {0} is closed")]
    Closed(ConnectionHandle),
    #[error("outbound queue for {0} is full")]
    Full(ConnectionHandle),
}

/// Outbound queues of every open connection.
#[derive(Debug, Default)]
pub struct Connections {
    outbound: HashMap<ConnectionHandle, mpsc::Sender<Message>>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: ConnectionHandle, outbound: mpsc::Sender<Message>) {
        self.outbound.insert(handle, outbound);
    }

    /// Drops the queue for `handle`, which makes its writer close the socket.
    /// Returns false if the connection was not tracked.
    pub fn remove(&mut self, handle: ConnectionHandle) -> bool {
        self.outbound.remove(&handle).is_some()
    }

    pub fn contains(&self, handle: ConnectionHandle) -> bool {
        self.outbound.contains_key(&handle)
    }

    /// Queues a binary frame without waiting.
    pub fn send(&self, handle: ConnectionHandle, bytes: Vec<u8>) -> Result<(), SendError> {
        let outbound = self
            .outbound
            .get(&handle)
            .ok_or(SendError::Unknown(handle))?;

        outbound
            .try_send(Message::Binary(bytes))
            .map_err(|e| match e {
                TrySendError::Full(_) => SendError::Full(handle),
                TrySendError::Closed(_) => SendError::Closed(handle),
            })
    }

    pub fn len(&self) -> usize {
        self.outbound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty()
    }

    /// Drops every queue, closing all connections.
    pub fn clear(&mut self) {
        self.outbound.clear();
    }
}

/// Accepts TCP connections and upgrades them to WebSockets.
pub struct Listener {
    listener: TcpListener,
    outbound_buffer: usize,
}

impl Listener {
    pub async fn bind(addr: &str, outbound_buffer: usize) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            outbound_buffer,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Spawns the accept loop. It stops when `shutdown` fires or the event
    /// channel closes, and every connection task it started stops with it.
    pub fn spawn(
        self,
        events: mpsc::UnboundedSender<ConnectionEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.accept_loop(events, shutdown))
    }

    async fn accept_loop(
        self,
        events: mpsc::UnboundedSender<ConnectionEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if *shutdown.borrow() {
            return;
        }

        loop {
            if events.is_closed() {
                break;
            }

            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let handle = ConnectionHandle::next();
                        debug!("Accepted {} from {}", handle, addr);
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            handle,
                            events.clone(),
                            self.outbound_buffer,
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        sleep(Duration::from_millis(10)).await;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Listener stopped");
    }
}

/// Drives one connection from handshake to teardown.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handle: ConnectionHandle,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    outbound_buffer: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            let _ = events.send(ConnectionEvent::Failed {
                handle,
                addr,
                reason: e.to_string(),
            });
            return;
        }
    };

    let (mut sink, mut source) = ws_stream.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<Message>(outbound_buffer);

    if events
        .send(ConnectionEvent::Opened {
            handle,
            addr,
            outbound,
        })
        .is_err()
    {
        return;
    }

    // Ends when the server drops the queue or a write fails. Either way the
    // reader stops too, so the socket is released without waiting on the peer.
    let mut writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if let Err(e) = sink.send(message).await {
                debug!("Write to {} failed: {}", handle, e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Binary(data))) => {
                    if events.send(ConnectionEvent::Message { handle, data }).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    let data = text.into_bytes();
                    if events.send(ConnectionEvent::Message { handle, data }).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Read from {} failed: {}", handle, e);
                    break;
                }
            },
            _ = &mut writer => {
                debug!("Writer for {} finished, closing connection", handle);
                break;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    let _ = events.send(ConnectionEvent::Closed { handle });
}
