//! # World Session Server Library
//!
//! This library provides an authoritative, real-time world server. Clients
//! connect over WebSockets, each connection is bound to one simulated
//! entity, incoming messages are routed to subscribed handlers, and at a
//! fixed tick rate the world is advanced and every client receives the
//! latest state of its own entity.
//!
//! ## Core Responsibilities
//!
//! ### Session Lifecycle
//! Every accepted connection opens exactly one session, which creates an
//! entity and attaches a `Player` component to it. When the connection goes
//! away, whether by a clean close, a read error or a failed send, the
//! session is closed exactly once and the entity is destroyed.
//!
//! ### Message Dispatch
//! Messages carry a 2 byte big-endian event code followed by a payload.
//! The server resolves the sending connection to its entity and hands the
//! event to every handler subscribed to that code, in subscription order.
//! Handlers may publish follow-up events, which are delivered after the
//! current event has been handled by everyone.
//!
//! ### Tick Broadcasting
//! On each tick the simulation is stepped and a `PLAYER_FRAME` snapshot is
//! sent to each session. Slow peers only lose frames; a broken peer only
//! loses its own session.
//!
//! ## Architecture Design
//!
//! ### Single Owner Loop
//! A single task owns the world and the outbound connection table. Network
//! tasks never touch the world directly, they report what happens through
//! a channel, and the loop interleaves those events with ticks. Because
//! nothing else can reach the world, no locks are needed.
//!
//! ### Generational Entities
//! Entities are indices into an arena paired with a generation counter.
//! A stale id left over from a closed session never resolves to the entity
//! that later reuses its slot.
//!
//! ## Module Organization
//!
//! - `config`: JSON configuration and validation
//! - `dispatcher`: code to handler routing with bounded follow-up events
//! - `frame`: per-tick player snapshots
//! - `network`: WebSocket listener, connection tasks and outbound queues
//! - `physics`: the simulation backend behind the `Physics` trait
//! - `registry`: entities and component storage
//! - `server`: the main loop tying everything together
//! - `session`: connection to entity bookkeeping
//! - `tick`: tick timing and broadcast
//! - `world`: the simulation state mutated by the loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::server::Server;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let mut server = Server::new(&config).await?;
//!
//!     let (shutdown_tx, shutdown_rx) = watch::channel(false);
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         let _ = shutdown_tx.send(true);
//!     });
//!
//!     server.run(shutdown_rx).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod frame;
pub mod network;
pub mod physics;
pub mod registry;
pub mod server;
pub mod session;
pub mod tick;
pub mod world;
