//! The authoritative world: registry, sessions, dispatcher and physics,
//! owned together so that every mutation goes through one `&mut World`.
//!
//! Nothing here is shared across tasks. The server loop owns the only
//! `World` and feeds it connection events and ticks one at a time.

use crate::config::WorldConfig;
use crate::dispatcher::{Dispatcher, Envelope, Publisher};
use crate::frame::serialize_player;
use crate::physics::{create_world, BodyHandle, Physics, Vector2};
use crate::registry::{Body, Components, Entity, Player, Registry};
use crate::session::{ConnectionHandle, SessionError, SessionManager};
use log::{error, warn};
use shared::{codes, DecodeError, MoveInput, SerializedEvent, PLAYER_SPEED};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("message from untracked connection {0}")]
    Unresolved(ConnectionHandle),
    #[error("malformed message from {handle}: {source}")]
    Malformed {
        handle: ConnectionHandle,
        source: DecodeError,
    },
}

pub struct World {
    registry: Registry,
    sessions: SessionManager,
    dispatcher: Dispatcher<Components>,
    physics: Box<dyn Physics>,
    width: f32,
    height: f32,
    tick: u32,
}

impl World {
    pub fn from_config(config: &WorldConfig) -> Self {
        Self::with_physics(Box::new(create_world(config)), config)
    }

    pub fn with_physics(physics: Box<dyn Physics>, config: &WorldConfig) -> Self {
        let mut dispatcher = Dispatcher::new();
        dispatcher.subscribe(codes::MOVE, handle_move);

        Self {
            registry: Registry::new(),
            sessions: SessionManager::new(),
            dispatcher,
            physics,
            width: config.width,
            height: config.height,
            tick: 0,
        }
    }

    /// Registers an additional handler for inbound events. Handlers see
    /// components only; entities are created and destroyed by sessions.
    pub fn subscribe<F>(&mut self, code: u16, handler: F)
    where
        F: FnMut(&Envelope, &mut Components, &mut Publisher) + Send + 'static,
    {
        self.dispatcher.subscribe(code, handler);
    }

    /// Starts a session for a freshly accepted connection and gives its
    /// player a physics body at the spawn point.
    pub fn open(&mut self, handle: ConnectionHandle) -> Result<Entity, SessionError> {
        let entity = self.sessions.open(&mut self.registry, handle)?;

        let body = self.physics.add_body(self.spawn_point(entity));
        if let Some(transform) = self.physics.transform(body) {
            self.registry.get_mut::<Player>(entity).position = transform.position;
        }
        self.registry.emplace(entity, Body(body));

        Ok(entity)
    }

    /// Ends the session for `handle`, releasing its body and entity.
    pub fn close(&mut self, handle: ConnectionHandle) -> Option<Entity> {
        if let Some(entity) = self.sessions.resolve(handle) {
            if let Some(&Body(body)) = self.registry.try_get::<Body>(entity) {
                self.physics.remove_body(body);
            }
        }
        self.sessions.close(&mut self.registry, handle)
    }

    /// Routes one inbound message from `handle` through the dispatcher.
    /// Returns the number of handlers invoked.
    pub fn handle_message(
        &mut self,
        handle: ConnectionHandle,
        bytes: &[u8],
    ) -> Result<usize, MessageError> {
        let entity = self
            .sessions
            .resolve(handle)
            .ok_or(MessageError::Unresolved(handle))?;
        let event = SerializedEvent::decode(bytes)
            .map_err(|source| MessageError::Malformed { handle, source })?;

        let envelope = Envelope {
            source: Some(entity),
            event,
        };
        Ok(self.dispatcher.publish(self.registry.components_mut(), envelope))
    }

    /// Advances the simulation by `dt` seconds.
    pub fn step(&mut self, dt: f32) {
        self.tick = self.tick.wrapping_add(1);

        let bodies = self.bodies();
        for &(entity, body) in &bodies {
            let input = self
                .registry
                .try_get_mut::<Player>(entity)
                .and_then(|player| player.input.take());
            if let Some(direction) = input {
                self.physics.set_velocity(body, direction.scale(PLAYER_SPEED));
            }
        }

        self.physics.step(dt);

        for &(entity, body) in &bodies {
            let Some(transform) = self.physics.transform(body) else {
                warn!("Entity {} lost its physics body", entity);
                continue;
            };
            if let Some(player) = self.registry.try_get_mut::<Player>(entity) {
                player.position = transform.position;
                player.velocity = transform.velocity;
            }
        }
    }

    /// Serializes every live player, addressed to its own connection.
    pub fn frames(&self) -> Vec<(ConnectionHandle, Vec<u8>)> {
        let mut frames = Vec::with_capacity(self.sessions.len());
        for (handle, entity) in self.sessions.iter() {
            let Some(player) = self.registry.try_get::<Player>(entity) else {
                warn!("Skipping frame for {}: entity {} has no player", handle, entity);
                continue;
            };
            match serialize_player(self.tick, entity, player) {
                Ok(bytes) => frames.push((handle, bytes)),
                Err(e) => error!("Skipping frame for {}: {}", handle, e),
            }
        }
        frames
    }

    pub fn resolve(&self, handle: ConnectionHandle) -> Option<Entity> {
        self.sessions.resolve(handle)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn body_count(&self) -> usize {
        self.physics.body_count()
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    fn bodies(&self) -> Vec<(Entity, BodyHandle)> {
        self.sessions
            .iter()
            .filter_map(|(handle, entity)| match self.registry.try_get::<Body>(entity) {
                Some(&Body(body)) => Some((entity, body)),
                None => {
                    warn!("Session {} has no physics body on entity {}", handle, entity);
                    None
                }
            })
            .collect()
    }

    fn spawn_point(&self, entity: Entity) -> Vector2 {
        let span = (self.width - 200.0).max(1.0);
        let x = 100.0 + (entity.index() as f32 * 60.0) % span;
        Vector2::new(x.min(self.width), self.height / 2.0)
    }
}

/// Stores the sender's requested direction for the next tick.
fn handle_move(envelope: &Envelope, components: &mut Components, _: &mut Publisher) {
    let Some(entity) = envelope.source else {
        warn!("Move event without a source entity");
        return;
    };

    let input = match MoveInput::from_payload(&envelope.event.payload) {
        Ok(input) => input,
        Err(e) => {
            warn!("Ignoring move from entity {}: {}", entity, e);
            return;
        }
    };

    if let Some(player) = components.try_get_mut::<Player>(entity) {
        player.input = Some(Vector2::new(input.x, input.y).normalize());
    }
}
