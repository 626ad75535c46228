//! Server loop coordinating the transport, the world and the tick clock.
//!
//! The loop is the only owner of the [`World`] and the outbound
//! [`Connections`] table. Connection events and ticks are interleaved by a
//! single `tokio::select!`, so opens, closes, messages and broadcasts never
//! overlap and the world needs no lock.

use crate::config::ServerConfig;
use crate::network::{ConnectionEvent, Connections, Listener};
use crate::tick::{run_tick, tick_interval, TickClock};
use crate::world::World;
use log::{debug, error, info, warn};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinError;
use tokio::time::{Duration, Instant};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("server is already running")]
    AlreadyRunning,
    #[error("listener task failed: {0}")]
    Listener(#[from] JoinError),
}

pub struct Server {
    listener: Option<Listener>,
    local_addr: SocketAddr,
    world: World,
    connections: Connections,
    tick_duration: Duration,
    max_delta: f32,
    max_clients: usize,

    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    events_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl Server {
    pub async fn new(config: &ServerConfig) -> Result<Self, ServerError> {
        let addr = config.address();
        let listener = Listener::bind(&addr, config.outbound_buffer)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;
        info!("Server listening on ws://{}", local_addr);

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            local_addr,
            world: World::from_config(&config.world),
            connections: Connections::new(),
            tick_duration: config.tick_duration(),
            max_delta: config.max_delta,
            max_clients: config.max_clients,
            events_tx,
            events_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Access for registering handlers before the server starts.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Runs until `shutdown` is set to true or its sender is dropped.
    /// On the way out every session is closed and the listener is joined.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        let listener = self.listener.take().ok_or(ServerError::AlreadyRunning)?;
        let accept_task = listener.spawn(self.events_tx.clone(), shutdown.clone());

        let mut ticks = tick_interval(self.tick_duration);
        // The first tick fires immediately
        ticks.tick().await;
        let mut clock = TickClock::new(self.max_delta);

        info!("Server started successfully");

        if !*shutdown.borrow() {
            loop {
                tokio::select! {
                    Some(event) = self.events_rx.recv() => self.handle_event(event),

                    _ = ticks.tick() => {
                        let dt = clock.advance(Instant::now());
                        let report = run_tick(&mut self.world, &mut self.connections, dt);

                        if self.world.tick() % 60 == 0 {
                            debug!(
                                "Tick {}: {} sessions, {:.1}Hz, {} frames sent, {} dropped",
                                self.world.tick(),
                                self.world.sessions().len(),
                                1.0 / dt.max(f32::EPSILON),
                                report.sent,
                                report.dropped
                            );
                        }
                    },

                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }

        info!("Server shutting down");
        for handle in self.world.sessions().handles() {
            self.world.close(handle);
        }
        self.connections.clear();

        accept_task.await?;
        info!("Server stopped");
        Ok(())
    }

    fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened {
                handle,
                addr,
                outbound,
            } => {
                if self.connections.len() >= self.max_clients {
                    warn!(
                        "Rejecting {} from {}: server full ({} clients)",
                        handle, addr, self.max_clients
                    );
                    return;
                }

                match self.world.open(handle) {
                    Ok(entity) => {
                        self.connections.insert(handle, outbound);
                        info!("Client {} connected from {} as entity {}", handle, addr, entity);
                    }
                    Err(e) => warn!("Not opening session: {}", e),
                }
            }

            ConnectionEvent::Message { handle, data } => {
                if let Err(e) = self.world.handle_message(handle, &data) {
                    warn!("Dropping message: {}", e);
                }
            }

            ConnectionEvent::Closed { handle } => {
                if self.connections.remove(handle) {
                    self.world.close(handle);
                } else {
                    debug!("{} closed after its session was released", handle);
                }
            }

            ConnectionEvent::Failed {
                handle,
                addr,
                reason,
            } => {
                warn!("Incoming connection {} from {} failed: {}", handle, addr, reason);
            }
        }
    }
}

/// Returns a shutdown receiver that flips to true once `signal` completes.
/// If the signal cannot be installed the error is logged and the receiver
/// never fires.
pub fn shutdown_on<F>(signal: F) -> watch::Receiver<bool>
where
    F: Future<Output = io::Result<()>> + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal.await {
            Ok(()) => {
                info!("Shutdown signal received, shutting down gracefully...");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!("Unable to listen for shutdown signal: {}", e);
                // Dropping the sender would read as a shutdown.
                std::future::pending::<()>().await;
            }
        }
    });
    shutdown_rx
}
