//! Per-tick player snapshots.

use crate::registry::{Entity, Player};
use shared::{DecodeError, PlayerFrame};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to serialize frame for entity {entity}: {source}")]
pub struct FrameError {
    pub entity: Entity,
    pub source: DecodeError,
}

pub fn snapshot(tick: u32, entity: Entity, player: &Player) -> PlayerFrame {
    PlayerFrame {
        tick,
        entity: entity.to_bits(),
        x: player.position.x,
        y: player.position.y,
        vel_x: player.velocity.x,
        vel_y: player.velocity.y,
    }
}

/// Encodes the player's current state as a ready-to-send frame message.
pub fn serialize_player(tick: u32, entity: Entity, player: &Player) -> Result<Vec<u8>, FrameError> {
    snapshot(tick, entity, player)
        .to_message()
        .map_err(|source| FrameError { entity, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::Vector2;
    use crate::registry::Registry;
    use shared::{codes, SerializedEvent};

    #[test]
    fn test_serialized_player_decodes() {
        let mut registry = Registry::new();
        let entity = registry.create();
        let player = Player {
            position: Vector2::new(12.5, 40.0),
            velocity: Vector2::new(-3.0, 0.0),
            input: None,
        };

        let bytes = serialize_player(9, entity, &player).unwrap();
        let frame = PlayerFrame::from_message(&bytes).unwrap();

        assert_eq!(frame.tick, 9);
        assert_eq!(Entity::from_bits(frame.entity), entity);
        assert_eq!(frame.x, 12.5);
        assert_eq!(frame.y, 40.0);
        assert_eq!(frame.vel_x, -3.0);
        assert_eq!(frame.vel_y, 0.0);
    }

    #[test]
    fn test_frame_carries_header() {
        let mut registry = Registry::new();
        let entity = registry.create();

        let bytes = serialize_player(0, entity, &Player::default()).unwrap();
        let event = SerializedEvent::decode(&bytes).unwrap();
        assert_eq!(event.code, codes::PLAYER_FRAME);
        assert!(!event.payload.is_empty());
    }
}
